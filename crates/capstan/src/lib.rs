//! # capstan
//!
//! Command-line front end for Capstan.
//!
//! Reads a manifest of artifacts and builds, downloads or uploads them
//! through [`capstan_artifact`].

#![warn(missing_docs)]

pub mod cli;
pub mod manifest;

pub use manifest::Manifest;
