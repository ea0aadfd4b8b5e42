//! # capstan-common
//!
//! Shared types for the Capstan artifact pipeline.
//!
//! This crate provides the pieces every other Capstan crate agrees on:
//! - The error taxonomy and its retry classification
//! - The sanitized, length-bounded [`Tag`] type

#![warn(missing_docs)]

pub mod error;
pub mod tag;

pub use error::{CapstanError, CapstanResult};
pub use tag::Tag;
