//! # capstan-artifact
//!
//! Artifacts and the machinery that moves them.
//!
//! This crate provides:
//! - The [`Artifact`] contract and the [`TypeRegistry`] that creates artifacts by type
//! - Generic files published over HTTP and images published through a container engine
//! - Retry and endpoint fallback policies
//! - Tag derivation from git working-copy state

#![warn(missing_docs)]

pub mod artifact;
pub mod credentials;
pub mod fallback;
pub mod generic;
pub mod image;
pub mod reference;
pub mod registry;
pub mod retry;
pub mod status;
pub mod tag;
pub mod transport;
pub mod vcs;

#[cfg(test)]
mod testing;

pub use artifact::{Artifact, ArtifactData, BuildOptions, Metadata, REPO_PATH, TransferRequest};
pub use credentials::Credentials;
pub use fallback::{FallbackMode, FallbackPolicy, RegistryEndpoints};
pub use generic::GenericArtifact;
pub use image::ImageArtifact;
pub use registry::TypeRegistry;
pub use retry::RetryPolicy;
pub use tag::derive_tags;
pub use vcs::{GitRepository, VersionSource, VersionState};
