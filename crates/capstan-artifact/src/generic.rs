//! Generic file artifacts.
//!
//! A generic artifact is a single local file, located with a glob pattern,
//! that is published to and fetched from an HTTP artifact repository. It has
//! no build step.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use capstan_common::{CapstanError, CapstanResult};
use serde::Deserialize;

use crate::artifact::{
    Artifact, ArtifactData, ArtifactVersion, Metadata, TransferRequest, repo_path,
};
use crate::credentials::Credentials;
use crate::fallback::{FallbackPolicy, resolve_candidates};
use crate::transport::{HttpTransport, shared_http};

/// Registered type name.
pub const KIND: &str = "generic";

/// Endpoint option naming the repository base URL.
pub const ENDPOINT_KEY: &str = "generic_url";

/// Versions with this prefix are pre-release and published under `temp/`.
pub const TEMP_VERSION_PREFIX: &str = "temp_";

/// Property search response.
#[derive(Debug, Deserialize)]
struct SearchResults {
    #[serde(default)]
    results: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    uri: String,
}

/// A file artifact published over HTTP.
pub struct GenericArtifact {
    data: ArtifactData,
    metadata: Metadata,
    version: ArtifactVersion,
    filename: String,
    remote_base_url: Option<String>,
    transport: Option<Arc<dyn HttpTransport>>,
}

impl GenericArtifact {
    /// Create an artifact from its declaration.
    ///
    /// # Errors
    ///
    /// Fails if `filename` is missing.
    pub fn new(data: ArtifactData, metadata: Metadata) -> CapstanResult<Self> {
        let filename = data.option_str("filename")?.ok_or_else(|| {
            CapstanError::config(format!("{}: generic artifacts need a filename", data.name))
        })?;
        let remote_base_url = data.option_str(ENDPOINT_KEY)?;
        let version = ArtifactVersion::new(data.version.clone());

        Ok(Self {
            data,
            metadata,
            version,
            filename,
            remote_base_url,
            transport: None,
        })
    }

    /// Use `transport` instead of the shared HTTP transport.
    #[must_use]
    pub fn with_transport(mut self, transport: Arc<dyn HttpTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// The configured filename pattern.
    #[must_use]
    pub fn filename(&self) -> &str {
        &self.filename
    }

    fn transport(&self) -> CapstanResult<Arc<dyn HttpTransport>> {
        self.transport.clone().map_or_else(shared_http, Ok)
    }

    /// Last path component of the filename pattern.
    fn pattern_basename(&self) -> &str {
        self.filename.rsplit('/').next().unwrap_or(&self.filename)
    }

    /// Resolve the filename pattern to exactly one local file.
    ///
    /// The returned path is relative to the repository path.
    ///
    /// # Errors
    ///
    /// Fails with [`CapstanError::MissingArtifact`] when nothing matches and
    /// [`CapstanError::AmbiguousArtifact`] when several files match.
    pub fn resolve_local_file(&self) -> CapstanResult<PathBuf> {
        let root = repo_path(&self.metadata);
        let pattern = if root == Path::new(".") {
            self.filename.clone()
        } else {
            format!(
                "{}/{}",
                glob::Pattern::escape(&root.to_string_lossy()),
                self.filename
            )
        };

        let paths = glob::glob(&pattern).map_err(|e| {
            CapstanError::config(format!("{}: invalid filename pattern: {e}", self.data.name))
        })?;
        let mut matches = Vec::new();
        for entry in paths {
            let path = entry.map_err(glob::GlobError::into_error)?;
            matches.push(path.strip_prefix(&root).map_or_else(|_| path.clone(), Path::to_path_buf));
        }

        match matches.len() {
            1 => Ok(matches.remove(0)),
            0 => Err(CapstanError::MissingArtifact {
                pattern: self.filename.clone(),
            }),
            _ => Err(CapstanError::AmbiguousArtifact {
                pattern: self.filename.clone(),
                matches: matches
                    .iter()
                    .map(|p| p.display().to_string())
                    .collect(),
            }),
        }
    }

    /// Find the URI of the published file tagged with `version`.
    fn search(
        &self,
        transport: &dyn HttpTransport,
        version: &str,
        endpoint: &str,
    ) -> CapstanResult<String> {
        let base = endpoint.trim_end_matches('/');
        let (root, repository) = base.rsplit_once('/').ok_or_else(|| {
            CapstanError::config(format!("{ENDPOINT_KEY} {endpoint} does not name a repository"))
        })?;
        let api = format!("{root}/api/search/prop");

        let response = transport.get(&api, &[("version", version), ("repos", repository)])?;
        if response.status != 200 {
            return Err(CapstanError::retryable(format!(
                "Failed (status: {}) to search {} for version {}",
                response.status, repository, version
            )));
        }
        let found: SearchResults = serde_json::from_slice(&response.body)?;

        let pattern = glob::Pattern::new(self.pattern_basename()).map_err(|e| {
            CapstanError::config(format!("{}: invalid filename pattern: {e}", self.data.name))
        })?;
        found
            .results
            .into_iter()
            .map(|hit| hit.uri)
            .find(|uri| pattern.matches(basename(uri)))
            .ok_or_else(|| CapstanError::RemoteArtifactNotFound {
                version: version.to_string(),
                repository: repository.to_string(),
            })
    }

    fn resolve_url(
        &self,
        transport: &dyn HttpTransport,
        version: Option<&str>,
        endpoint: Option<&str>,
    ) -> CapstanResult<String> {
        match (version, endpoint) {
            (Some(version), Some(endpoint)) => self.search(transport, version, endpoint),
            // Same path an unversioned upload is stored under.
            (None, Some(endpoint)) => Ok(upload_url(endpoint, &self.filename, None)),
            (_, None) => Ok(self.resolve_local_file()?.display().to_string()),
        }
    }

    fn fetch(
        &self,
        transport: &dyn HttpTransport,
        version: Option<&str>,
        endpoint: &str,
    ) -> CapstanResult<PathBuf> {
        let url = self.resolve_url(transport, version, Some(endpoint))?;
        let name = basename(&url);

        let response = transport.get(&url, &[])?;
        if response.status != 200 {
            return Err(CapstanError::retryable(format!(
                "Failed (status: {}) to download artifact {}",
                response.status, name
            )));
        }

        let destination = repo_path(&self.metadata).join(name);
        fs::write(&destination, &response.body)?;
        tracing::info!(
            artifact = %self.data.name,
            url = %url,
            path = %destination.display(),
            "Downloaded artifact"
        );
        Ok(destination)
    }

    fn publish(
        &self,
        transport: &dyn HttpTransport,
        version: Option<&str>,
        endpoint: &str,
        credentials: Option<&Credentials>,
    ) -> CapstanResult<()> {
        if endpoint.is_empty() {
            return Err(CapstanError::config(format!(
                "{ENDPOINT_KEY} not specified. Unable to publish artifact {}",
                self.data.name
            )));
        }

        let local = self.resolve_local_file()?;
        let data = fs::read(repo_path(&self.metadata).join(&local))?;
        let url = upload_url(endpoint, &local.to_string_lossy(), version);

        let response = transport.put(&url, data, credentials)?;
        if response.status != 201 {
            return Err(CapstanError::retryable(format!(
                "Failed (status: {}) to upload {}",
                response.status, url
            )));
        }

        tracing::info!(artifact = %self.data.name, url = %url, "Successfully pushed artifact");
        Ok(())
    }
}

/// Destination of an upload.
///
/// `endpoint[/temp]/<file>[;version=<v>]`, with `temp/` for versions
/// starting with [`TEMP_VERSION_PREFIX`].
#[must_use]
pub fn upload_url(endpoint: &str, file: &str, version: Option<&str>) -> String {
    let temp = match version {
        Some(v) if v.starts_with(TEMP_VERSION_PREFIX) => "temp/",
        _ => "",
    };
    let matrix = version.map_or_else(String::new, |v| format!(";version={v}"));
    format!("{}/{temp}{file}{matrix}", endpoint.trim_end_matches('/'))
}

fn basename(url: &str) -> &str {
    url.rsplit('/').next().unwrap_or(url)
}

impl Artifact for GenericArtifact {
    fn name(&self) -> &str {
        &self.data.name
    }

    fn kind(&self) -> &'static str {
        KIND
    }

    fn data(&self) -> &ArtifactData {
        &self.data
    }

    fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    fn version(&self) -> Option<&str> {
        self.version.get()
    }

    fn set_version(&mut self, version: String) -> CapstanResult<()> {
        self.version.set(&self.data.name, version)
    }

    fn url(&self, version: Option<&str>, endpoint: Option<&str>) -> CapstanResult<String> {
        let transport = self.transport()?;
        self.resolve_url(transport.as_ref(), version, endpoint)
    }

    fn download(&self, request: &TransferRequest) -> CapstanResult<()> {
        let version = request.version.as_deref().or_else(|| self.version.get());
        let candidates =
            resolve_candidates(&request.endpoints, ENDPOINT_KEY, self.remote_base_url.as_deref());

        self.transport()
            .and_then(|transport| {
                FallbackPolicy::full(ENDPOINT_KEY).run_with_retry(
                    &request.retry,
                    &candidates,
                    |endpoint| self.fetch(transport.as_ref(), version, endpoint),
                )
            })
            .map(|_| ())
            .map_err(|e| e.in_operation(&self.data.name, "download"))
    }

    fn upload(&mut self, request: &TransferRequest) -> CapstanResult<()> {
        let version = request
            .version
            .clone()
            .or_else(|| self.version.get().map(str::to_string));
        let candidates =
            resolve_candidates(&request.endpoints, ENDPOINT_KEY, self.remote_base_url.as_deref());

        self.transport()
            .and_then(|transport| {
                FallbackPolicy::first_only(ENDPOINT_KEY).run_with_retry(
                    &request.retry,
                    &candidates,
                    |endpoint| {
                        self.publish(
                            transport.as_ref(),
                            version.as_deref(),
                            endpoint,
                            request.credentials.as_ref(),
                        )
                    },
                )
            })
            .map_err(|e| e.in_operation(&self.data.name, "upload"))?;

        self.version.mark_published(version.as_deref());
        Ok(())
    }
}
