//! Common error types for Capstan.
//!
//! Every failure is classified into one of a small set of kinds. Only
//! [`CapstanError::Retryable`] is transient; everything else is fatal and
//! must never be retried.

use miette::Diagnostic;
use thiserror::Error;

/// Result type alias using [`CapstanError`].
pub type CapstanResult<T> = Result<T, CapstanError>;

/// Errors raised by artifact operations, policies and transports.
#[derive(Error, Diagnostic, Debug)]
pub enum CapstanError {
    /// Transient transport or registry condition.
    #[error("{message}")]
    #[diagnostic(
        code(capstan::retryable),
        help("The remote side may recover; the operation is eligible for retry")
    )]
    Retryable {
        /// Description of the failed request.
        message: String,
    },

    /// Missing or invalid required parameter.
    #[error("Configuration error: {message}")]
    #[diagnostic(code(capstan::config))]
    Configuration {
        /// The error message.
        message: String,
    },

    /// A filename pattern matched more than one local file.
    #[error("Found too many files matching {pattern}:\n{}", matches.join("\n"))]
    #[diagnostic(
        code(capstan::artifact::ambiguous),
        help("Narrow the `filename` pattern so it matches exactly one file")
    )]
    AmbiguousArtifact {
        /// The configured pattern.
        pattern: String,
        /// Every path that matched.
        matches: Vec<String>,
    },

    /// A filename pattern matched no local file.
    #[error("Failed to find artifacts matching {pattern}")]
    #[diagnostic(code(capstan::artifact::missing))]
    MissingArtifact {
        /// The configured pattern.
        pattern: String,
    },

    /// The remote repository holds no artifact for the requested version.
    #[error("Could not find artifact version {version} in {repository}")]
    #[diagnostic(code(capstan::artifact::not_published))]
    RemoteArtifactNotFound {
        /// The requested version.
        version: String,
        /// The repository that was searched.
        repository: String,
    },

    /// No constructor is registered for an artifact type.
    #[error("Unknown artifact type: {kind}")]
    #[diagnostic(
        code(capstan::registry::unknown_type),
        help("Known types are registered at startup; check the `type` field")
    )]
    UnknownType {
        /// The requested type name.
        kind: String,
    },

    /// A constructor is already registered for an artifact type.
    #[error("Artifact type already registered: {kind}")]
    #[diagnostic(code(capstan::registry::duplicate_type))]
    DuplicateType {
        /// The type name registered twice.
        kind: String,
    },

    /// Local image reference does not exist in the container engine.
    #[error("Image not found: {reference}")]
    #[diagnostic(code(capstan::image::not_found))]
    ImageNotFound {
        /// The image reference that was not found.
        reference: String,
    },

    /// The container engine reported errors while building an image.
    #[error("Failed to build {name}:\n{}", errors.join("\n"))]
    #[diagnostic(code(capstan::image::build_failed))]
    BuildFailed {
        /// Image being built.
        name: String,
        /// Error entries from the build stream.
        errors: Vec<String>,
        /// Build output collected before the failure.
        log: String,
    },

    /// The artifact type does not provide the requested capability.
    #[error("{kind} artifacts do not support {operation}")]
    #[diagnostic(code(capstan::unsupported))]
    Unsupported {
        /// The artifact type.
        kind: String,
        /// The capability that was requested.
        operation: String,
    },

    /// The version was changed after the artifact was published.
    #[error("Version of {name} is frozen at {version} after publishing")]
    #[diagnostic(code(capstan::artifact::version_frozen))]
    VersionFrozen {
        /// Artifact name.
        name: String,
        /// The published version.
        version: String,
    },

    /// Failure reading the version-control working copy.
    #[error("Version control error: {message}")]
    #[diagnostic(code(capstan::vcs))]
    VersionControl {
        /// The error message.
        message: String,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    #[diagnostic(code(capstan::io))]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    #[diagnostic(code(capstan::serialization))]
    Serialization(String),

    /// Final error of an artifact operation.
    #[error("{artifact}: {operation} failed: {source}")]
    #[diagnostic(code(capstan::operation))]
    Operation {
        /// Artifact name.
        artifact: String,
        /// Operation attempted (download, upload, build).
        operation: String,
        /// The underlying failure.
        #[source]
        source: Box<CapstanError>,
    },
}

impl CapstanError {
    /// Create a retryable error.
    pub fn retryable(message: impl Into<String>) -> Self {
        Self::Retryable {
            message: message.into(),
        }
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a version-control error.
    pub fn vcs(message: impl Into<String>) -> Self {
        Self::VersionControl {
            message: message.into(),
        }
    }

    /// Whether the failure is transient and the operation may be retried.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Retryable { .. } => true,
            Self::Operation { source, .. } => source.is_retryable(),
            _ => false,
        }
    }

    /// Attach the artifact name and operation to this error.
    ///
    /// Already-wrapped errors are returned unchanged.
    #[must_use]
    pub fn in_operation(self, artifact: &str, operation: &str) -> Self {
        match self {
            err @ Self::Operation { .. } => err,
            err => Self::Operation {
                artifact: artifact.to_string(),
                operation: operation.to_string(),
                source: Box::new(err),
            },
        }
    }

    /// The innermost error, looking through [`CapstanError::Operation`].
    #[must_use]
    pub fn root(&self) -> &Self {
        match self {
            Self::Operation { source, .. } => source.root(),
            err => err,
        }
    }
}

impl From<serde_json::Error> for CapstanError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for CapstanError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
