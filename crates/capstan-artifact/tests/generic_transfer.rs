//! End-to-end transfers of a generic artifact against an in-memory repository.

use std::collections::HashMap;
use std::fs;
use std::sync::Arc;

use capstan_artifact::transport::{HttpResponse, HttpTransport};
use capstan_artifact::{
    Artifact, ArtifactData, Credentials, GenericArtifact, Metadata, REPO_PATH, RegistryEndpoints,
    RetryPolicy, TransferRequest,
};
use capstan_common::{CapstanError, CapstanResult};
use parking_lot::Mutex;
use tempfile::TempDir;

/// Stores PUT bodies and serves them back; hosts listed as down refuse
/// every request.
#[derive(Default)]
struct MemoryRepository {
    files: Mutex<HashMap<String, Vec<u8>>>,
    down: Vec<&'static str>,
    attempts: Mutex<Vec<String>>,
}

impl MemoryRepository {
    fn with_down(host: &'static str) -> Self {
        Self {
            down: vec![host],
            ..Self::default()
        }
    }

    fn check(&self, url: &str) -> CapstanResult<()> {
        self.attempts.lock().push(url.to_string());
        if self.down.iter().any(|host| url.contains(host)) {
            return Err(CapstanError::retryable(format!("{url}: connection refused")));
        }
        Ok(())
    }
}

impl HttpTransport for MemoryRepository {
    fn get(&self, url: &str, _query: &[(&str, &str)]) -> CapstanResult<HttpResponse> {
        self.check(url)?;
        Ok(match self.files.lock().get(url) {
            Some(body) => HttpResponse::new(200, body.clone()),
            None => HttpResponse::new(404, Vec::new()),
        })
    }

    fn put(
        &self,
        url: &str,
        body: Vec<u8>,
        credentials: Option<&Credentials>,
    ) -> CapstanResult<HttpResponse> {
        self.check(url)?;
        if credentials.is_none() {
            return Ok(HttpResponse::new(401, Vec::new()));
        }
        self.files.lock().insert(url.to_string(), body);
        Ok(HttpResponse::new(201, Vec::new()))
    }
}

fn artifact(repo: &TempDir, http: &Arc<MemoryRepository>, filename: &str) -> GenericArtifact {
    let mut metadata = Metadata::new();
    metadata.insert(REPO_PATH.to_string(), repo.path().display().to_string());
    let transport: Arc<dyn HttpTransport> = http.clone();
    GenericArtifact::new(
        ArtifactData::new("bundle", "generic").with_option("filename", filename),
        metadata,
    )
    .unwrap()
    .with_transport(transport)
}

fn endpoints(yaml: &str) -> RegistryEndpoints {
    serde_yaml::from_str(yaml).unwrap()
}

#[test]
fn publish_then_fetch_from_mirror_list() {
    let source = TempDir::new().unwrap();
    fs::create_dir(source.path().join("build")).unwrap();
    fs::write(source.path().join("build/bundle.zip"), b"zip bytes").unwrap();

    let http = Arc::new(MemoryRepository::default());
    let request = TransferRequest::new()
        .with_endpoints(endpoints(
            "generic_url: [https://primary/files, https://mirror/files]",
        ))
        .with_credentials(Credentials::new("ci", Some("secret".to_string())))
        .with_retry(RetryPolicy::no_retry());
    artifact(&source, &http, "build/bundle.zip")
        .upload(&request)
        .unwrap();

    let stored: Vec<String> = http.files.lock().keys().cloned().collect();
    assert_eq!(stored, ["https://primary/files/build/bundle.zip"]);

    let target = TempDir::new().unwrap();
    artifact(&target, &http, "build/bundle.zip")
        .download(&request)
        .unwrap();
    assert_eq!(
        http.attempts.lock().last().map(String::as_str),
        Some("https://primary/files/build/bundle.zip")
    );
    assert_eq!(
        fs::read(target.path().join("bundle.zip")).unwrap(),
        b"zip bytes"
    );
}

#[test]
fn download_skips_unreachable_mirror() {
    let http = Arc::new(MemoryRepository::with_down("primary"));
    http.files.lock().insert(
        "https://mirror/files/bundle.zip".to_string(),
        b"from mirror".to_vec(),
    );
    let target = TempDir::new().unwrap();

    artifact(&target, &http, "bundle.zip")
        .download(
            &TransferRequest::new()
                .with_endpoints(endpoints(
                    "generic_url: [https://primary/files, https://mirror/files]",
                ))
                .with_retry(RetryPolicy::no_delay(2)),
        )
        .unwrap();

    assert_eq!(
        *http.attempts.lock(),
        [
            "https://primary/files/bundle.zip",
            "https://primary/files/bundle.zip",
            "https://mirror/files/bundle.zip",
        ]
    );
}

#[test]
fn rejected_publish_is_retried_then_reported() {
    let source = TempDir::new().unwrap();
    fs::create_dir(source.path().join("build")).unwrap();
    fs::write(source.path().join("build/bundle-9.zip"), b"zip bytes").unwrap();

    let http = Arc::new(MemoryRepository::default());
    let mut bundle = artifact(&source, &http, "build/bundle-*.zip");
    let err = bundle
        .upload(
            &TransferRequest::new()
                .with_version("9")
                .with_endpoints(endpoints(
                    "generic_url: [https://primary/files, https://mirror/files]",
                ))
                .with_retry(RetryPolicy::no_delay(3)),
        )
        .unwrap_err();

    assert!(err.is_retryable());
    assert!(err.to_string().contains("Failed (status: 401)"));
    assert_eq!(http.attempts.lock().len(), 3);
    assert!(
        http.attempts
            .lock()
            .iter()
            .all(|url| url == "https://primary/files/build/bundle-9.zip;version=9")
    );
    assert!(bundle.set_version("10".to_string()).is_ok());
}
