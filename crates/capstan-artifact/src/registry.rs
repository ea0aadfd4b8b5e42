//! Artifact type registry.

use std::collections::HashMap;

use capstan_common::{CapstanError, CapstanResult};

use crate::artifact::{Artifact, ArtifactData, Metadata};
use crate::generic::{self, GenericArtifact};
use crate::image::{self, ImageArtifact};

/// Builds an artifact from its declaration and orchestrator metadata.
pub type Constructor =
    Box<dyn Fn(ArtifactData, Metadata) -> CapstanResult<Box<dyn Artifact>> + Send + Sync>;

/// Maps type names to artifact constructors.
#[derive(Default)]
pub struct TypeRegistry {
    constructors: HashMap<String, Constructor>,
}

impl TypeRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in `generic` and `image` types.
    #[must_use]
    pub fn builtin() -> Self {
        let mut constructors: HashMap<String, Constructor> = HashMap::new();
        constructors.insert(generic::KIND.to_string(), Box::new(create_generic));
        constructors.insert(image::KIND.to_string(), Box::new(create_image));
        Self { constructors }
    }

    /// Register a constructor for `kind`.
    ///
    /// # Errors
    ///
    /// Fails with [`CapstanError::DuplicateType`] if `kind` is taken.
    pub fn register<F>(&mut self, kind: &str, constructor: F) -> CapstanResult<()>
    where
        F: Fn(ArtifactData, Metadata) -> CapstanResult<Box<dyn Artifact>> + Send + Sync + 'static,
    {
        if self.constructors.contains_key(kind) {
            return Err(CapstanError::DuplicateType {
                kind: kind.to_string(),
            });
        }
        tracing::debug!(kind, "Registered artifact type");
        self.constructors
            .insert(kind.to_string(), Box::new(constructor));
        Ok(())
    }

    /// Instantiate the artifact declared by `data`.
    ///
    /// # Errors
    ///
    /// Fails with [`CapstanError::UnknownType`] for unregistered types, or
    /// with the constructor's error.
    pub fn create(
        &self,
        data: ArtifactData,
        metadata: Metadata,
    ) -> CapstanResult<Box<dyn Artifact>> {
        let Some(constructor) = self.constructors.get(&data.kind) else {
            return Err(CapstanError::UnknownType { kind: data.kind });
        };
        tracing::debug!(artifact = %data.name, kind = %data.kind, "Creating artifact");
        constructor(data, metadata)
    }

    /// Whether `kind` is registered.
    #[must_use]
    pub fn contains(&self, kind: &str) -> bool {
        self.constructors.contains_key(kind)
    }

    /// Registered type names, sorted.
    #[must_use]
    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.constructors.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        kinds
    }
}

fn create_generic(data: ArtifactData, metadata: Metadata) -> CapstanResult<Box<dyn Artifact>> {
    Ok(Box::new(GenericArtifact::new(data, metadata)?))
}

fn create_image(data: ArtifactData, metadata: Metadata) -> CapstanResult<Box<dyn Artifact>> {
    Ok(Box::new(ImageArtifact::new(data, metadata)?))
}

impl std::fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypeRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}
