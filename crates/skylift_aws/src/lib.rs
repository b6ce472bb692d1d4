//! AWS bindings for the skylift helper patterns.
//!
//! This crate owns SDK client construction and the adapters that implement
//! the `skylift_core` trait seams over S3, SESv2, and Step Functions.

pub mod client;
pub mod s3;
pub mod ses;
pub mod sfn;
