//! Provider-agnostic cloud helper patterns.
//!
//! This crate owns the transfer sizing, activity worker, and email
//! composition logic. It intentionally excludes SDK clients and credential
//! loading; those live behind the trait seams each module defines and are
//! wired up by `skylift_aws`.

pub mod email;
pub mod upload;
pub mod worker;

/// Boxed error type used at the trait seams, so remote-service error types
/// never leak into this crate.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;
