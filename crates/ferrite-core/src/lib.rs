//! Ferrite Core
//!
//! Core domain types, traits, and error handling for the Ferrite scheduling
//! control plane. This crate has minimal dependencies and defines the shared
//! vocabulary used across all other crates.

pub mod build;
pub mod config;
pub mod error;
pub mod ids;
pub mod ports;

pub use error::{Error, Result};
pub use ids::*;
