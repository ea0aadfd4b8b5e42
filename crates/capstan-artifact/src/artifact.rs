//! The artifact contract shared by every artifact type.

use std::collections::BTreeMap;
use std::path::PathBuf;

use capstan_common::{CapstanError, CapstanResult};
use serde::{Deserialize, Deserializer, Serialize, de};
use serde_yaml::Value;

use crate::credentials::Credentials;
use crate::fallback::RegistryEndpoints;
use crate::retry::RetryPolicy;

/// Orchestrator-supplied metadata, read-only to artifacts.
pub type Metadata = BTreeMap<String, String>;

/// Metadata key holding the local repository path.
pub const REPO_PATH: &str = "repopath";

/// Declarative artifact definition, as written in a manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactData {
    /// Artifact name.
    pub name: String,
    /// Artifact type, used to pick the constructor.
    #[serde(rename = "type")]
    pub kind: String,
    /// Version, when pinned in the manifest.
    #[serde(default, deserialize_with = "deserialize_scalar")]
    pub version: Option<String>,
    /// Type-specific options.
    #[serde(flatten)]
    pub options: BTreeMap<String, Value>,
}

impl ArtifactData {
    /// Create a definition with no options.
    pub fn new(name: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
            version: None,
            options: BTreeMap::new(),
        }
    }

    /// Pin a version.
    #[must_use]
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    /// Set an option.
    #[must_use]
    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    /// Read a scalar option as a string.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the option is a list or mapping.
    pub fn option_str(&self, key: &str) -> CapstanResult<Option<String>> {
        match self.options.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => scalar_to_string(value).map(Some).ok_or_else(|| {
                CapstanError::config(format!("{}: option `{key}` must be a scalar", self.name))
            }),
        }
    }

    /// Read a boolean option, defaulting to false.
    #[must_use]
    pub fn flag(&self, key: &str) -> bool {
        self.options
            .get(key)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn deserialize_scalar<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(value) => scalar_to_string(&value)
            .map(Some)
            .ok_or_else(|| de::Error::custom("expected a string or number")),
    }
}

/// Parameters of a single download or upload.
#[derive(Debug, Clone, Default)]
pub struct TransferRequest {
    /// Version to transfer; falls back to the artifact's own version.
    pub version: Option<String>,
    /// Candidate endpoints, keyed by endpoint option name.
    pub endpoints: RegistryEndpoints,
    /// Credentials for publishing.
    pub credentials: Option<Credentials>,
    /// Retry policy applied to each endpoint attempt.
    pub retry: RetryPolicy,
}

impl TransferRequest {
    /// Create a request with default retry settings and no endpoints.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the version.
    #[must_use]
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    /// Add a candidate endpoint under `key`, after any existing ones.
    #[must_use]
    pub fn with_endpoint(mut self, key: &str, endpoint: impl Into<String>) -> Self {
        self.endpoints.push(key, endpoint);
        self
    }

    /// Replace all endpoints.
    #[must_use]
    pub fn with_endpoints(mut self, endpoints: RegistryEndpoints) -> Self {
        self.endpoints = endpoints;
        self
    }

    /// Set the credentials.
    #[must_use]
    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Set the retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

/// Options for building an artifact.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuildOptions {
    /// Do not use the engine's build cache.
    pub no_cache: bool,
    /// Always pull base images.
    pub pull: bool,
}

/// Capability set shared by every artifact type.
///
/// Artifacts are created through [`crate::TypeRegistry`]; callers never
/// branch on the concrete type.
pub trait Artifact: Send + Sync {
    /// Artifact name.
    fn name(&self) -> &str;

    /// Registered type name.
    fn kind(&self) -> &'static str;

    /// Declared configuration.
    fn data(&self) -> &ArtifactData;

    /// Orchestrator metadata.
    fn metadata(&self) -> &Metadata;

    /// Current version, if any.
    fn version(&self) -> Option<&str>;

    /// Assign the version.
    ///
    /// # Errors
    ///
    /// Fails once the artifact has been published.
    fn set_version(&mut self, version: String) -> CapstanResult<()>;

    /// Location of the artifact for a version and endpoint.
    ///
    /// # Errors
    ///
    /// Fails if the location cannot be resolved.
    fn url(&self, version: Option<&str>, endpoint: Option<&str>) -> CapstanResult<String>;

    /// Fetch the artifact, trying every candidate endpoint in order.
    ///
    /// # Errors
    ///
    /// Returns the last failure once every candidate is exhausted.
    fn download(&self, request: &TransferRequest) -> CapstanResult<()>;

    /// Publish the artifact to the first candidate endpoint.
    ///
    /// # Errors
    ///
    /// Returns the failure of the single authoritative endpoint.
    fn upload(&mut self, request: &TransferRequest) -> CapstanResult<()>;

    /// Build the artifact locally.
    ///
    /// # Errors
    ///
    /// Types without a build step return [`CapstanError::Unsupported`].
    fn build(&self, _options: &BuildOptions) -> CapstanResult<()> {
        Err(CapstanError::Unsupported {
            kind: self.kind().to_string(),
            operation: "build".to_string(),
        }
        .in_operation(self.name(), "build"))
    }
}

/// Version slot that freezes after the first successful publish.
#[derive(Debug, Clone, Default)]
pub(crate) struct ArtifactVersion {
    version: Option<String>,
    published: bool,
}

impl ArtifactVersion {
    pub(crate) const fn new(version: Option<String>) -> Self {
        Self {
            version,
            published: false,
        }
    }

    pub(crate) fn get(&self) -> Option<&str> {
        self.version.as_deref()
    }

    pub(crate) fn set(&mut self, name: &str, version: String) -> CapstanResult<()> {
        if self.published && self.version.as_deref() != Some(version.as_str()) {
            return Err(CapstanError::VersionFrozen {
                name: name.to_string(),
                version: self.version.clone().unwrap_or_default(),
            });
        }
        self.version = Some(version);
        Ok(())
    }

    pub(crate) fn mark_published(&mut self, version: Option<&str>) {
        if let Some(version) = version {
            self.version = Some(version.to_string());
        }
        self.published = true;
    }
}

/// Local repository path from metadata, defaulting to the working directory.
pub(crate) fn repo_path(metadata: &Metadata) -> PathBuf {
    metadata
        .get(REPO_PATH)
        .map_or_else(|| PathBuf::from("."), PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_artifact_data() {
        let yaml = r"
name: tarball
type: generic
version: 1.5
filename: dist/out-*.tar
";
        let data: ArtifactData = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(data.name, "tarball");
        assert_eq!(data.kind, "generic");
        assert_eq!(data.version.as_deref(), Some("1.5"));
        assert_eq!(
            data.option_str("filename").unwrap().as_deref(),
            Some("dist/out-*.tar")
        );
        assert!(data.option_str("missing").unwrap().is_none());
    }

    #[test]
    fn non_scalar_option_is_rejected() {
        let data = ArtifactData::new("a", "generic")
            .with_option("filename", Value::Sequence(vec![Value::from("x")]));
        let err = data.option_str("filename").unwrap_err();
        assert!(matches!(err, CapstanError::Configuration { .. }));
    }

    #[test]
    fn flags_default_to_false() {
        let data = ArtifactData::new("a", "image").with_option("pull", true);
        assert!(data.flag("pull"));
        assert!(!data.flag("no_cache"));
    }

    #[test]
    fn version_freezes_after_publish() {
        let mut version = ArtifactVersion::new(None);
        version.set("a", "1.0".to_string()).unwrap();
        version.set("a", "1.1".to_string()).unwrap();
        version.mark_published(None);
        assert_eq!(version.get(), Some("1.1"));
        assert!(version.set("a", "1.1".to_string()).is_ok());
        assert!(matches!(
            version.set("a", "2.0".to_string()),
            Err(CapstanError::VersionFrozen { .. })
        ));
    }

    #[test]
    fn repo_path_defaults_to_cwd() {
        assert_eq!(repo_path(&Metadata::new()), PathBuf::from("."));
        let mut metadata = Metadata::new();
        metadata.insert(REPO_PATH.to_string(), "/src/app".to_string());
        assert_eq!(repo_path(&metadata), PathBuf::from("/src/app"));
    }
}
