//! Pipeline manifest.
//!
//! A manifest declares the artifacts of a repository together with the
//! default endpoints, retry settings and transport timeouts used to move
//! them. It is read from `capstan.yaml` by default.

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use capstan_artifact::transport::{EngineSettings, HttpSettings};
use capstan_artifact::{ArtifactData, RegistryEndpoints, RetryPolicy};
use capstan_common::{CapstanError, CapstanResult};
use serde::{Deserialize, Serialize};

/// Default manifest file name.
pub const DEFAULT_MANIFEST: &str = "capstan.yaml";

/// Declared artifacts and pipeline settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Manifest {
    /// Artifact declarations, in pipeline order.
    pub artifacts: Vec<ArtifactData>,
    /// Default endpoint candidates.
    pub endpoints: RegistryEndpoints,
    /// Retry settings.
    pub retry: RetrySettings,
    /// Transport timeouts.
    pub transport: TransportSettings,
}

/// `retry` section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    /// Attempts per endpoint, including the first.
    pub attempts: u32,
    /// Pause between attempts in milliseconds.
    pub delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            attempts: policy.max_attempts,
            delay_ms: u64::try_from(policy.delay.as_millis()).unwrap_or(u64::MAX),
        }
    }
}

impl RetrySettings {
    /// The retry policy these settings describe.
    #[must_use]
    pub const fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.attempts, Duration::from_millis(self.delay_ms))
    }
}

/// `transport` section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportSettings {
    /// HTTP request timeout in seconds.
    pub http_timeout_secs: u64,
    /// Container engine call timeout in seconds.
    pub engine_timeout_secs: u64,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            http_timeout_secs: HttpSettings::default().timeout.as_secs(),
            engine_timeout_secs: EngineSettings::default().timeout.as_secs(),
        }
    }
}

impl TransportSettings {
    /// HTTP transport settings.
    #[must_use]
    pub const fn http(&self) -> HttpSettings {
        HttpSettings {
            timeout: Duration::from_secs(self.http_timeout_secs),
        }
    }

    /// Container engine settings, with the address taken from `DOCKER_HOST`.
    #[must_use]
    pub fn engine(&self) -> EngineSettings {
        EngineSettings {
            timeout: Duration::from_secs(self.engine_timeout_secs),
            ..EngineSettings::from_env()
        }
    }
}

impl Manifest {
    /// Parse a manifest from YAML.
    ///
    /// # Errors
    ///
    /// Fails if the document is malformed or declares an artifact twice.
    pub fn from_yaml(yaml: &str) -> CapstanResult<Self> {
        let manifest: Self = serde_yaml::from_str(yaml)?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Read a manifest file.
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> CapstanResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            CapstanError::config(format!("Failed to read manifest {}: {e}", path.display()))
        })?;
        Self::from_yaml(&content)
    }

    fn validate(&self) -> CapstanResult<()> {
        let mut seen = HashSet::new();
        for artifact in &self.artifacts {
            if !seen.insert(artifact.name.as_str()) {
                return Err(CapstanError::config(format!(
                    "artifact {} is declared more than once",
                    artifact.name
                )));
            }
        }
        Ok(())
    }

    /// Artifacts named in `names`, or all of them when `names` is empty.
    ///
    /// # Errors
    ///
    /// Fails if a name is not declared.
    pub fn select(&self, names: &[String]) -> CapstanResult<Vec<&ArtifactData>> {
        if names.is_empty() {
            return Ok(self.artifacts.iter().collect());
        }
        names
            .iter()
            .map(|name| {
                self.artifacts
                    .iter()
                    .find(|artifact| &artifact.name == name)
                    .ok_or_else(|| CapstanError::config(format!("no artifact named {name}")))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MANIFEST: &str = r"
artifacts:
  - name: web:latest
    type: image
    context: images/web
  - name: tarball
    type: generic
    filename: dist/out-*.tar
    version: 1.2.3
endpoints:
  generic_url: [https://a/repo, https://b/repo]
  docker_image_registry: registry.example.com
retry:
  attempts: 5
  delay_ms: 250
transport:
  http_timeout_secs: 30
";

    #[test]
    fn parse_manifest() {
        let manifest = Manifest::from_yaml(MANIFEST).unwrap();
        assert_eq!(manifest.artifacts.len(), 2);
        assert_eq!(manifest.artifacts[0].kind, "image");
        assert_eq!(manifest.artifacts[1].version.as_deref(), Some("1.2.3"));
        assert_eq!(
            manifest.endpoints.get("generic_url"),
            ["https://a/repo", "https://b/repo"]
        );
        assert_eq!(
            manifest.endpoints.get("docker_image_registry"),
            ["registry.example.com"]
        );
        assert_eq!(
            manifest.retry.policy(),
            RetryPolicy::new(5, Duration::from_millis(250))
        );
        assert_eq!(manifest.transport.http().timeout, Duration::from_secs(30));
        assert_eq!(manifest.transport.engine_timeout_secs, 3600);
    }

    #[test]
    fn empty_manifest_uses_defaults() {
        let manifest = Manifest::from_yaml("{}").unwrap();
        assert!(manifest.artifacts.is_empty());
        assert_eq!(manifest.retry.policy(), RetryPolicy::default());
        assert_eq!(manifest.transport, TransportSettings::default());
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let yaml = r"
artifacts:
  - { name: a, type: generic, filename: a.bin }
  - { name: a, type: generic, filename: b.bin }
";
        let err = Manifest::from_yaml(yaml).unwrap_err();
        assert!(matches!(err, CapstanError::Configuration { .. }));
    }

    #[test]
    fn select_by_name() {
        let manifest = Manifest::from_yaml(MANIFEST).unwrap();
        assert_eq!(manifest.select(&[]).unwrap().len(), 2);

        let selected = manifest.select(&["tarball".to_string()]).unwrap();
        assert_eq!(selected[0].name, "tarball");

        assert!(manifest.select(&["nope".to_string()]).is_err());
    }

    #[test]
    fn missing_file_is_configuration_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = Manifest::from_file(&dir.path().join(DEFAULT_MANIFEST)).unwrap_err();
        assert!(matches!(err, CapstanError::Configuration { .. }));
    }
}
