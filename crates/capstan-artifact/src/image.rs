//! Container image artifacts.
//!
//! An image artifact is built locally through the container engine, tagged
//! from the state of the working copy, and moved between the engine and
//! remote registries.

use std::collections::BTreeMap;
use std::sync::Arc;

use capstan_common::{CapstanError, CapstanResult};

use crate::artifact::{
    Artifact, ArtifactData, ArtifactVersion, BuildOptions, Metadata, TransferRequest, repo_path,
};
use crate::credentials::Credentials;
use crate::fallback::{FallbackPolicy, resolve_candidates};
use crate::reference::ImageName;
use crate::status::{ProgressLog, consume_build};
use crate::tag::derive_tags;
use crate::transport::{BuildRequest, ContainerEngine, shared_engine};
use crate::vcs::{GitRepository, VersionSource};

/// Registered type name.
pub const KIND: &str = "image";

/// Endpoint option naming the image registry.
pub const ENDPOINT_KEY: &str = "docker_image_registry";

/// Environment variables forwarded to builds as build arguments.
pub const PROXY_VARIABLES: [&str; 3] = ["http_proxy", "https_proxy", "no_proxy"];

/// An image built and published through a container engine.
pub struct ImageArtifact {
    data: ArtifactData,
    metadata: Metadata,
    version: ArtifactVersion,
    image: ImageName,
    remote_registry: Option<String>,
    context: String,
    dockerfile: Option<String>,
    remote: Option<String>,
    no_cache: bool,
    pull: bool,
    build_env: Option<BTreeMap<String, String>>,
    engine: Option<Arc<dyn ContainerEngine>>,
    version_source: Option<Arc<dyn VersionSource>>,
}

impl ImageArtifact {
    /// Create an artifact from its declaration.
    ///
    /// The artifact name is the local image name; a missing tag means
    /// `latest`. A `dev_tag` option overrides the tag.
    ///
    /// # Errors
    ///
    /// Fails if an option has the wrong shape.
    pub fn new(data: ArtifactData, metadata: Metadata) -> CapstanResult<Self> {
        let mut image = ImageName::parse(&data.name);
        if image.repository.is_empty() {
            return Err(CapstanError::config("image artifacts need a name"));
        }
        if let Some(dev_tag) = data.option_str("dev_tag")? {
            image.tag = dev_tag;
        }

        Ok(Self {
            remote_registry: data.option_str(ENDPOINT_KEY)?,
            context: data.option_str("context")?.unwrap_or_else(|| ".".to_string()),
            dockerfile: data.option_str("dockerfile")?,
            remote: data.option_str("remote")?,
            no_cache: data.flag("no_cache"),
            pull: data.flag("pull"),
            build_env: None,
            version: ArtifactVersion::new(data.version.clone()),
            image,
            data,
            metadata,
            engine: None,
            version_source: None,
        })
    }

    /// Use `engine` instead of the shared container engine.
    #[must_use]
    pub fn with_engine(mut self, engine: Arc<dyn ContainerEngine>) -> Self {
        self.engine = Some(engine);
        self
    }

    /// Take proxy settings from `env` instead of the process environment.
    #[must_use]
    pub fn with_build_env(mut self, env: BTreeMap<String, String>) -> Self {
        self.build_env = Some(env);
        self
    }

    /// Read working-copy state from `source` instead of the repository path.
    #[must_use]
    pub fn with_version_source(mut self, source: Arc<dyn VersionSource>) -> Self {
        self.version_source = Some(source);
        self
    }

    /// Repository part of the name.
    #[must_use]
    pub fn image_name(&self) -> &str {
        &self.image.repository
    }

    /// Tag of the locally built image.
    #[must_use]
    pub fn dev_tag(&self) -> &str {
        &self.image.tag
    }

    fn engine(&self) -> CapstanResult<Arc<dyn ContainerEngine>> {
        self.engine.clone().map_or_else(shared_engine, Ok)
    }

    fn version_source(&self) -> Arc<dyn VersionSource> {
        self.version_source.clone().unwrap_or_else(|| {
            Arc::new(GitRepository::new(repo_path(&self.metadata))) as Arc<dyn VersionSource>
        })
    }

    fn local_reference(&self) -> String {
        self.image.to_string()
    }

    fn build_locally(
        &self,
        engine: &dyn ContainerEngine,
        options: &BuildOptions,
    ) -> CapstanResult<()> {
        if let Some(remote) = &self.remote {
            tracing::info!(image = %self.data.name, remote = %remote, "Pulling prebuilt image");
            return self.pull_image(engine, remote);
        }

        let context = repo_path(&self.metadata).join(&self.context);
        let build_args = match &self.build_env {
            Some(env) => proxy_build_args(|key| env.get(key).cloned()),
            None => proxy_build_args(|key| std::env::var(key).ok()),
        };
        let reference = self.local_reference();

        tracing::info!(image = %reference, context = %context.display(), "Building image");
        let body = engine.build(&BuildRequest {
            context: &context,
            tag: &reference,
            dockerfile: self.dockerfile.as_deref(),
            build_args: &build_args,
            no_cache: options.no_cache || self.no_cache,
            pull: options.pull || self.pull,
        })?;
        consume_build(&reference, &body)?;

        let state = self.version_source().state()?;
        for tag in derive_tags(&state) {
            tracing::debug!(image = %reference, tag = %tag, "Tagging build");
            engine.tag(&reference, &self.image.repository, tag.as_str())?;
        }

        tracing::info!(image = %reference, "Built image");
        Ok(())
    }

    /// Pull `reference` and tag it as the local image.
    fn pull_image(&self, engine: &dyn ContainerEngine, reference: &str) -> CapstanResult<()> {
        engine.pull(reference)?;
        engine.tag(reference, &self.image.repository, &self.image.tag)
    }

    /// Push `repository:tag`, which must exist locally.
    fn push_image(
        &self,
        engine: &dyn ContainerEngine,
        repository: &str,
        tag: &str,
        credentials: Option<&Credentials>,
    ) -> CapstanResult<()> {
        let reference = format!("{repository}:{tag}");
        if !engine.image_exists(&reference)? {
            return Err(CapstanError::ImageNotFound { reference });
        }

        let body = engine.push(repository, tag, credentials)?;
        ProgressLog::new(&self.data.name).consume("pushing", &reference, &body)?;
        tracing::info!(image = %reference, "Pushed image");
        Ok(())
    }

    fn fetch(
        &self,
        engine: &dyn ContainerEngine,
        version: &str,
        registry: &str,
    ) -> CapstanResult<()> {
        let reference = self.image.qualified(registry, version);
        tracing::info!(image = %self.data.name, reference = %reference, "Pulling image");

        self.pull_image(engine, &reference)?;
        if version != self.image.tag {
            engine.tag(&reference, &self.image.repository, version)?;
        }
        Ok(())
    }

    fn publish(
        &self,
        engine: &dyn ContainerEngine,
        tag: &str,
        registry: &str,
        credentials: Option<&Credentials>,
    ) -> CapstanResult<()> {
        let repository = self.image.qualified_repository(registry);
        engine.tag(&self.local_reference(), &repository, tag)?;

        let _registry_tag = RegistryTag {
            engine,
            reference: format!("{repository}:{tag}"),
        };
        self.push_image(engine, &repository, tag, credentials)
    }

    fn fetch_any(&self, request: &TransferRequest) -> CapstanResult<()> {
        let version = request
            .version
            .as_deref()
            .or_else(|| self.version.get())
            .ok_or_else(|| CapstanError::config("Unable to pull an image without a version"))?;
        let candidates = resolve_candidates(
            &request.endpoints,
            ENDPOINT_KEY,
            self.remote_registry.as_deref(),
        );
        let engine = self.engine()?;

        FallbackPolicy::full(ENDPOINT_KEY).run_with_retry(&request.retry, &candidates, |registry| {
            self.fetch(engine.as_ref(), version, registry)
        })
    }
}

/// Build arguments for the proxy variables that are set.
pub fn proxy_build_args<F>(lookup: F) -> BTreeMap<String, String>
where
    F: Fn(&str) -> Option<String>,
{
    PROXY_VARIABLES
        .iter()
        .filter_map(|key| lookup(key).map(|value| ((*key).to_string(), value)))
        .collect()
}

/// Removes a registry-qualified tag when dropped.
struct RegistryTag<'a> {
    engine: &'a dyn ContainerEngine,
    reference: String,
}

impl Drop for RegistryTag<'_> {
    fn drop(&mut self) {
        if let Err(err) = self.engine.remove_image(&self.reference) {
            tracing::warn!(
                reference = %self.reference,
                error = %err,
                "Failed to remove registry tag"
            );
        }
    }
}

impl Artifact for ImageArtifact {
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
        let tag = version
            .or_else(|| self.version.get())
            .unwrap_or(&self.image.tag);
        Ok(match endpoint {
            Some(registry) => self.image.qualified(registry, tag),
            None => self.image.with_tag(tag),
        })
    }

    fn build(&self, options: &BuildOptions) -> CapstanResult<()> {
        self.engine()
            .and_then(|engine| self.build_locally(engine.as_ref(), options))
            .map_err(|e| e.in_operation(&self.data.name, "build"))
    }

    fn download(&self, request: &TransferRequest) -> CapstanResult<()> {
        self.fetch_any(request)
            .map_err(|e| e.in_operation(&self.data.name, "download"))
    }

    fn upload(&mut self, request: &TransferRequest) -> CapstanResult<()> {
        let version = request
            .version
            .clone()
            .or_else(|| self.version.get().map(str::to_string));
        let tag = version.as_deref().unwrap_or(&self.image.tag);
        let candidates = resolve_candidates(
            &request.endpoints,
            ENDPOINT_KEY,
            self.remote_registry.as_deref(),
        );

        self.engine()
            .and_then(|engine| {
                FallbackPolicy::first_only(ENDPOINT_KEY).run_with_retry(
                    &request.retry,
                    &candidates,
                    |registry| {
                        self.publish(engine.as_ref(), tag, registry, request.credentials.as_ref())
                    },
                )
            })
            .map_err(|e| e.in_operation(&self.data.name, "upload"))?;

        self.version.mark_published(version.as_deref());
        Ok(())
    }
}
