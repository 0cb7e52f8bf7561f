//! Type definitions for the classification pipeline

pub mod record;

pub use record::{decode, encode, FeatureRecord};
