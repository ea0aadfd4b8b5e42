//! Capstan CLI.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use color_eyre::eyre::Result;

use capstan_artifact::transport::{configure_engine, configure_http};
use capstan_artifact::{
    Artifact, BuildOptions, Credentials, Metadata, REPO_PATH, RegistryEndpoints, TransferRequest,
    TypeRegistry, generic, image,
};
use capstan_common::CapstanError;

use crate::manifest::{DEFAULT_MANIFEST, Manifest};

/// Capstan - publish and fetch build artifacts
#[derive(Parser)]
#[command(name = "capstan")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable debug logging
    #[arg(long, global = true)]
    pub debug: bool,

    /// Path to the manifest
    #[arg(short, long, global = true, default_value = DEFAULT_MANIFEST)]
    pub manifest: PathBuf,

    /// Repository the artifacts are built from
    #[arg(long, global = true, default_value = ".")]
    pub repo_path: PathBuf,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Capstan commands.
#[derive(Subcommand)]
pub enum Commands {
    /// List declared artifacts
    List,

    /// Build artifacts locally
    Build {
        /// Artifacts to build (default: all)
        #[arg(short, long = "artifact")]
        artifacts: Vec<String>,

        /// Don't use the build cache
        #[arg(long)]
        no_cache: bool,

        /// Always pull base images
        #[arg(long)]
        pull: bool,
    },

    /// Fetch artifacts from their remote endpoints
    Download(TransferArgs),

    /// Publish artifacts to their primary endpoint
    Upload(TransferArgs),
}

/// Options shared by transfers.
#[derive(Args)]
pub struct TransferArgs {
    /// Artifacts to transfer (default: all)
    #[arg(short, long = "artifact")]
    pub artifacts: Vec<String>,

    /// Version to transfer
    #[arg(long)]
    pub version: Option<String>,

    /// Generic repository endpoints, in precedence order
    #[arg(long = "generic-url")]
    pub generic_urls: Vec<String>,

    /// Image registries, in precedence order
    #[arg(long = "docker-image-registry")]
    pub registries: Vec<String>,

    /// Registry user
    #[arg(long, env = "CAPSTAN_REGISTRY_USER")]
    pub registry_user: Option<String>,

    /// Registry password
    #[arg(long, env = "CAPSTAN_REGISTRY_PASSWORD", hide_env_values = true)]
    pub registry_password: Option<String>,
}

impl TransferArgs {
    /// Endpoints given on the command line.
    #[must_use]
    pub fn endpoints(&self) -> RegistryEndpoints {
        let mut endpoints = RegistryEndpoints::new();
        if !self.generic_urls.is_empty() {
            endpoints.set(generic::ENDPOINT_KEY, self.generic_urls.clone());
        }
        if !self.registries.is_empty() {
            endpoints.set(image::ENDPOINT_KEY, self.registries.clone());
        }
        endpoints
    }

    /// The transfer request, with command-line endpoints overriding the manifest.
    #[must_use]
    pub fn request(&self, manifest: &Manifest) -> TransferRequest {
        let mut endpoints = manifest.endpoints.clone();
        endpoints.merge(&self.endpoints());

        let mut request = TransferRequest::new()
            .with_endpoints(endpoints)
            .with_retry(manifest.retry.policy());
        if let Some(version) = &self.version {
            request = request.with_version(version.clone());
        }
        if let Some(user) = &self.registry_user {
            request = request.with_credentials(Credentials::new(
                user.clone(),
                self.registry_password.clone(),
            ));
        }
        request
    }
}

impl Cli {
    /// Execute the CLI command.
    ///
    /// # Errors
    ///
    /// Fails on the first artifact operation that fails.
    pub fn execute(self) -> Result<()> {
        let manifest = Manifest::from_file(&self.manifest)?;
        configure_http(manifest.transport.http());
        configure_engine(manifest.transport.engine());

        let mut metadata = Metadata::new();
        metadata.insert(REPO_PATH.to_string(), self.repo_path.display().to_string());
        let registry = TypeRegistry::builtin();

        match self.command {
            Commands::List => {
                for data in &manifest.artifacts {
                    println!(
                        "{}\t{}\t{}",
                        data.name,
                        data.kind,
                        data.version.as_deref().unwrap_or("-")
                    );
                }
                Ok(())
            }

            Commands::Build {
                artifacts,
                no_cache,
                pull,
            } => {
                let options = BuildOptions { no_cache, pull };
                for data in manifest.select(&artifacts)? {
                    let artifact = registry.create(data.clone(), metadata.clone())?;
                    match artifact.build(&options) {
                        Ok(()) => println!("Built {}", artifact.name()),
                        Err(err) if matches!(err.root(), CapstanError::Unsupported { .. }) => {
                            tracing::info!(
                                artifact = %artifact.name(),
                                kind = artifact.kind(),
                                "Nothing to build"
                            );
                        }
                        Err(err) => return Err(err.into()),
                    }
                }
                Ok(())
            }

            Commands::Download(args) => {
                let request = args.request(&manifest);
                for data in manifest.select(&args.artifacts)? {
                    let artifact = registry.create(data.clone(), metadata.clone())?;
                    artifact.download(&request)?;
                    println!("Downloaded {}", artifact.name());
                }
                Ok(())
            }

            Commands::Upload(args) => {
                let request = args.request(&manifest);
                for data in manifest.select(&args.artifacts)? {
                    let mut artifact = registry.create(data.clone(), metadata.clone())?;
                    artifact.upload(&request)?;
                    println!(
                        "Uploaded {} {}",
                        artifact.name(),
                        artifact.version().unwrap_or_default()
                    );
                }
                Ok(())
            }
        }
    }
}

/// Default log filter for a verbosity flag.
#[must_use]
pub const fn log_filter(debug: bool) -> &'static str {
    if debug { "capstan=debug" } else { "capstan=info" }
}
