//! Container engine client.
//!
//! Talks to the Docker Engine API through `bollard`, over the local unix
//! socket by default or over plain HTTP. Calls run on a private
//! current-thread runtime so the [`ContainerEngine`] seam stays blocking.
//! Build, pull and push status streams are re-encoded as line-delimited
//! JSON (see [`crate::status`]) and read to the end before returning.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use bollard::errors::Error as DockerError;
use bollard::image::{BuildImageOptions, CreateImageOptions, PushImageOptions, TagImageOptions};
use bollard::{API_DEFAULT_VERSION, Docker};
use capstan_common::{CapstanError, CapstanResult};
use futures::{Stream, StreamExt};
use once_cell::sync::OnceCell;
use serde::Serialize;
use tokio::runtime::{Builder as RuntimeBuilder, Runtime};

use crate::credentials::Credentials;
use crate::status::ProgressLog;

/// Engine endpoint used when `DOCKER_HOST` is not set.
pub const DEFAULT_HOST: &str = "unix:///var/run/docker.sock";

/// Default timeout for engine calls. Builds and pushes can be slow.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3600);

const DEFAULT_DOCKERFILE: &str = "Dockerfile";

static SETTINGS: OnceCell<EngineSettings> = OnceCell::new();
static SHARED: OnceCell<Arc<dyn ContainerEngine>> = OnceCell::new();

/// Parameters of an image build.
#[derive(Debug, Clone)]
pub struct BuildRequest<'a> {
    /// Build context directory.
    pub context: &'a Path,
    /// Name to give the built image.
    pub tag: &'a str,
    /// Dockerfile path relative to the context.
    pub dockerfile: Option<&'a str>,
    /// Build arguments.
    pub build_args: &'a BTreeMap<String, String>,
    /// Do not use the build cache.
    pub no_cache: bool,
    /// Always pull base images.
    pub pull: bool,
}

/// Operations the image artifact needs from a container engine.
pub trait ContainerEngine: Send + Sync {
    /// Build an image, returning the status stream.
    ///
    /// # Errors
    ///
    /// Fails if the engine cannot be reached or rejects the request.
    fn build(&self, request: &BuildRequest<'_>) -> CapstanResult<String>;

    /// Pull a fully-qualified reference.
    ///
    /// # Errors
    ///
    /// Fails if the pull does not complete.
    fn pull(&self, reference: &str) -> CapstanResult<()>;

    /// Push `repository:tag`, returning the status stream.
    ///
    /// # Errors
    ///
    /// Fails if the engine cannot be reached or rejects the request.
    fn push(
        &self,
        repository: &str,
        tag: &str,
        credentials: Option<&Credentials>,
    ) -> CapstanResult<String>;

    /// Tag `source` as `repository:tag`.
    ///
    /// # Errors
    ///
    /// Fails if `source` does not exist.
    fn tag(&self, source: &str, repository: &str, tag: &str) -> CapstanResult<()>;

    /// Remove a local reference.
    ///
    /// # Errors
    ///
    /// Fails if the reference cannot be removed.
    fn remove_image(&self, reference: &str) -> CapstanResult<()>;

    /// Whether a local reference exists.
    ///
    /// # Errors
    ///
    /// Fails if the engine cannot be reached.
    fn image_exists(&self, reference: &str) -> CapstanResult<bool>;
}

/// Engine connection settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSettings {
    /// Engine address (`unix://`, `tcp://` or `http://`).
    pub host: String,
    /// Timeout applied to every call.
    pub timeout: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

/// Where the engine listens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineAddress {
    /// Path of a local unix socket.
    Socket(String),
    /// Plain HTTP base URL.
    Http(String),
}

impl fmt::Display for EngineAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Socket(path) => write!(f, "unix://{path}"),
            Self::Http(url) => f.write_str(url),
        }
    }
}

impl EngineSettings {
    /// Settings from `DOCKER_HOST`, falling back to the defaults.
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            host: std::env::var("DOCKER_HOST")
                .ok()
                .filter(|host| !host.is_empty())
                .unwrap_or_else(|| DEFAULT_HOST.to_string()),
            ..Self::default()
        }
    }

    /// Parse the engine address.
    ///
    /// # Errors
    ///
    /// Fails for TLS endpoints and unknown schemes.
    pub fn address(&self) -> CapstanResult<EngineAddress> {
        let host = self.host.trim_end_matches('/');
        if let Some(path) = host.strip_prefix("unix://") {
            Ok(EngineAddress::Socket(path.to_string()))
        } else if let Some(rest) = host.strip_prefix("tcp://") {
            Ok(EngineAddress::Http(format!("http://{rest}")))
        } else if host.starts_with("http://") {
            Ok(EngineAddress::Http(host.to_string()))
        } else {
            Err(CapstanError::config(format!(
                "Unsupported container engine address {host}; use unix://, tcp:// or http://"
            )))
        }
    }
}

/// [`ContainerEngine`] backed by a `bollard` client.
#[derive(Debug)]
pub struct DockerEngine {
    docker: Docker,
    runtime: Runtime,
}

impl DockerEngine {
    /// Connect to the engine described by `settings`.
    ///
    /// No request is made until the first call.
    ///
    /// # Errors
    ///
    /// Fails if the address is unsupported or the client cannot be created.
    pub fn connect(settings: &EngineSettings) -> CapstanResult<Self> {
        let address = settings.address()?;
        let runtime = RuntimeBuilder::new_current_thread().enable_all().build()?;
        let timeout = settings.timeout.as_secs();

        let guard = runtime.enter();
        let docker = match &address {
            #[cfg(unix)]
            EngineAddress::Socket(path) => {
                Docker::connect_with_unix(path, timeout, API_DEFAULT_VERSION)
            }
            #[cfg(not(unix))]
            EngineAddress::Socket(_) => {
                return Err(CapstanError::config(format!(
                    "{address}: unix sockets are not available on this platform"
                )));
            }
            EngineAddress::Http(url) => {
                Docker::connect_with_http(url, timeout, API_DEFAULT_VERSION)
            }
        }
        .map_err(|e| {
            CapstanError::config(format!("Failed to create engine client for {address}: {e}"))
        })?;
        drop(guard);

        Ok(Self { docker, runtime })
    }

    /// Run a status stream to completion, stopping at the first error.
    ///
    /// Returns the items seen so far as JSON lines, plus the error if any.
    fn drain<S, T>(&self, stream: S) -> CapstanResult<(String, Option<DockerError>)>
    where
        S: Stream<Item = Result<T, DockerError>>,
        T: Serialize,
    {
        let (items, failure) = self.runtime.block_on(async move {
            let mut stream = std::pin::pin!(stream);
            let mut items = Vec::new();
            while let Some(item) = stream.next().await {
                match item {
                    Ok(item) => items.push(item),
                    Err(err) => return (items, Some(err)),
                }
            }
            (items, None)
        });

        let mut body = String::new();
        for item in &items {
            body.push_str(&serde_json::to_string(item)?);
            body.push('\n');
        }
        Ok((body, failure))
    }

    /// Fold a stream failure into the status body.
    ///
    /// A failure before any status arrived is a transport error and is
    /// returned as such; later ones become an `error` line.
    fn settle(
        what: &str,
        reference: &str,
        mut body: String,
        failure: Option<DockerError>,
    ) -> CapstanResult<String> {
        match failure {
            None => Ok(body),
            Some(err) if body.is_empty() => Err(engine_error(what, reference, err)),
            Some(err) => {
                push_error_line(&mut body, &err);
                Ok(body)
            }
        }
    }
}

fn push_error_line(body: &mut String, err: &DockerError) {
    body.push_str(&serde_json::json!({ "error": err.to_string() }).to_string());
    body.push('\n');
}

fn engine_error(what: &str, reference: &str, err: DockerError) -> CapstanError {
    match err {
        DockerError::DockerResponseServerError {
            status_code: 404, ..
        } => CapstanError::ImageNotFound {
            reference: reference.to_string(),
        },
        other => CapstanError::retryable(format!(
            "Container engine {what} of {reference} failed: {other}"
        )),
    }
}

/// Tar up a build context directory.
///
/// # Errors
///
/// Fails if the directory cannot be read.
pub fn tar_context(context: &Path) -> CapstanResult<Vec<u8>> {
    let mut archive = tar::Builder::new(Vec::new());
    archive.follow_symlinks(false);
    archive.append_dir_all(".", context)?;
    Ok(archive.into_inner()?)
}

impl ContainerEngine for DockerEngine {
    fn build(&self, request: &BuildRequest<'_>) -> CapstanResult<String> {
        let context = tar_context(request.context)?;
        let options = BuildImageOptions {
            t: request.tag.to_string(),
            dockerfile: request.dockerfile.unwrap_or(DEFAULT_DOCKERFILE).to_string(),
            buildargs: request
                .build_args
                .iter()
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect(),
            nocache: request.no_cache,
            pull: request.pull,
            rm: true,
            ..Default::default()
        };

        tracing::debug!(tag = request.tag, bytes = context.len(), "Sending build context");
        let (mut body, failure) =
            self.drain(self.docker.build_image(options, None, Some(context.into())))?;
        // Every build failure is reported through the stream so the log survives.
        if let Some(err) = failure {
            push_error_line(&mut body, &err);
        }
        Ok(body)
    }

    fn pull(&self, reference: &str) -> CapstanResult<()> {
        let options = CreateImageOptions {
            from_image: reference.to_string(),
            ..Default::default()
        };
        let (body, failure) = self.drain(self.docker.create_image(Some(options), None, None))?;
        let body = Self::settle("pull", reference, body, failure)?;
        ProgressLog::new(reference).consume("pulling", reference, &body)
    }

    fn push(
        &self,
        repository: &str,
        tag: &str,
        credentials: Option<&Credentials>,
    ) -> CapstanResult<String> {
        let registry = repository.split('/').next().unwrap_or_default();
        // The engine requires auth even for anonymous pushes.
        let auth = credentials
            .cloned()
            .unwrap_or_else(|| Credentials::new("", None))
            .to_docker_credentials(registry);

        let options = PushImageOptions {
            tag: tag.to_string(),
        };
        let (body, failure) =
            self.drain(self.docker.push_image(repository, Some(options), Some(auth)))?;
        Self::settle("push", &format!("{repository}:{tag}"), body, failure)
    }

    fn tag(&self, source: &str, repository: &str, tag: &str) -> CapstanResult<()> {
        tracing::debug!(source, repository, tag, "Tagging image");
        let options = TagImageOptions {
            repo: repository.to_string(),
            tag: tag.to_string(),
        };
        self.runtime
            .block_on(self.docker.tag_image(source, Some(options)))
            .map_err(|e| engine_error("tag", source, e))
    }

    fn remove_image(&self, reference: &str) -> CapstanResult<()> {
        tracing::debug!(reference, "Removing image reference");
        self.runtime
            .block_on(self.docker.remove_image(reference, None, None))
            .map(|_| ())
            .map_err(|e| engine_error("remove", reference, e))
    }

    fn image_exists(&self, reference: &str) -> CapstanResult<bool> {
        match self.runtime.block_on(self.docker.inspect_image(reference)) {
            Ok(_) => Ok(true),
            Err(err) => match engine_error("inspect", reference, err) {
                CapstanError::ImageNotFound { .. } => Ok(false),
                other => Err(other),
            },
        }
    }
}

/// Install settings for the shared engine.
///
/// Returns false if settings were already installed.
pub fn configure_engine(settings: EngineSettings) -> bool {
    SETTINGS.set(settings).is_ok()
}

/// The process-wide container engine, opened on first use.
///
/// The handle is never closed during a run. It is safe to use from several
/// threads, but operations on one artifact are expected to be sequential.
///
/// # Errors
///
/// Fails if the engine address is unsupported or the client cannot be
/// created.
pub fn shared_engine() -> CapstanResult<Arc<dyn ContainerEngine>> {
    SHARED
        .get_or_try_init(|| {
            let settings = SETTINGS.get_or_init(EngineSettings::from_env);
            tracing::debug!(host = %settings.host, "Opening container engine");
            let engine: Arc<dyn ContainerEngine> = Arc::new(DockerEngine::connect(settings)?);
            Ok(engine)
        })
        .cloned()
}
