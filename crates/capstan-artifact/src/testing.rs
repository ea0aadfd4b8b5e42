//! In-memory transports for unit tests.

use std::collections::{BTreeMap, HashSet, VecDeque};

use capstan_common::{CapstanError, CapstanResult};
use parking_lot::Mutex;

use crate::credentials::Credentials;
use crate::transport::{BuildRequest, ContainerEngine, HttpResponse, HttpTransport};

/// A request seen by [`FakeHttp`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recorded {
    pub method: &'static str,
    pub url: String,
    pub query: Vec<(String, String)>,
    pub body: Vec<u8>,
    pub username: Option<String>,
}

/// HTTP transport answering from prefix routes; unmatched URLs get a 404.
#[derive(Default)]
pub struct FakeHttp {
    routes: Vec<(&'static str, &'static str, HttpResponse)>,
    requests: Mutex<Vec<Recorded>>,
}

impl FakeHttp {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(
        mut self,
        method: &'static str,
        prefix: &'static str,
        status: u16,
        body: &str,
    ) -> Self {
        self.routes
            .push((method, prefix, HttpResponse::new(status, body.as_bytes())));
        self
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.requests.lock().clone()
    }

    fn answer(&self, recorded: Recorded) -> HttpResponse {
        let response = self
            .routes
            .iter()
            .find(|(method, prefix, _)| {
                *method == recorded.method && recorded.url.starts_with(prefix)
            })
            .map_or_else(|| HttpResponse::new(404, Vec::new()), |(_, _, r)| r.clone());
        self.requests.lock().push(recorded);
        response
    }
}

impl HttpTransport for FakeHttp {
    fn get(&self, url: &str, query: &[(&str, &str)]) -> CapstanResult<HttpResponse> {
        Ok(self.answer(Recorded {
            method: "GET",
            url: url.to_string(),
            query: query
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect(),
            body: Vec::new(),
            username: None,
        }))
    }

    fn put(
        &self,
        url: &str,
        body: Vec<u8>,
        credentials: Option<&Credentials>,
    ) -> CapstanResult<HttpResponse> {
        Ok(self.answer(Recorded {
            method: "PUT",
            url: url.to_string(),
            query: Vec::new(),
            body,
            username: credentials.map(|c| c.username.clone()),
        }))
    }
}

/// Container engine keeping image references in memory.
///
/// Every call is recorded as a short line such as `tag web:latest reg/web:1.0`.
#[derive(Default)]
pub struct FakeEngine {
    images: Mutex<HashSet<String>>,
    calls: Mutex<Vec<String>>,
    build_args: Mutex<Vec<BTreeMap<String, String>>>,
    build_stream: Mutex<Option<String>>,
    push_streams: Mutex<VecDeque<String>>,
    unreachable: Mutex<Vec<String>>,
}

impl FakeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_image(self, reference: &str) -> Self {
        self.images.lock().insert(reference.to_string());
        self
    }

    pub fn with_build_stream(self, stream: &str) -> Self {
        *self.build_stream.lock() = Some(stream.to_string());
        self
    }

    pub fn with_push_stream(self, stream: &str) -> Self {
        self.push_streams.lock().push_back(stream.to_string());
        self
    }

    /// Pulls of references starting with `prefix` fail as transient.
    pub fn with_unreachable(self, prefix: &str) -> Self {
        self.unreachable.lock().push(prefix.to_string());
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    /// Build arguments of every build, in call order.
    pub fn build_args(&self) -> Vec<BTreeMap<String, String>> {
        self.build_args.lock().clone()
    }

    pub fn has_image(&self, reference: &str) -> bool {
        self.images.lock().contains(reference)
    }

    fn record(&self, call: String) {
        self.calls.lock().push(call);
    }
}

impl ContainerEngine for FakeEngine {
    fn build(&self, request: &BuildRequest<'_>) -> CapstanResult<String> {
        self.record(format!("build {} {}", request.tag, request.context.display()));
        self.build_args.lock().push(request.build_args.clone());
        let stream = self
            .build_stream
            .lock()
            .clone()
            .unwrap_or_else(|| r#"{"stream":"Successfully built 0123456789ab\n"}"#.to_string());
        if !stream.contains("\"error\"") {
            self.images.lock().insert(request.tag.to_string());
        }
        Ok(stream)
    }

    fn pull(&self, reference: &str) -> CapstanResult<()> {
        self.record(format!("pull {reference}"));
        if self
            .unreachable
            .lock()
            .iter()
            .any(|prefix| reference.starts_with(prefix.as_str()))
        {
            return Err(CapstanError::retryable(format!("{reference}: connection refused")));
        }
        self.images.lock().insert(reference.to_string());
        Ok(())
    }

    fn push(
        &self,
        repository: &str,
        tag: &str,
        _credentials: Option<&Credentials>,
    ) -> CapstanResult<String> {
        self.record(format!("push {repository}:{tag}"));
        Ok(self
            .push_streams
            .lock()
            .pop_front()
            .unwrap_or_else(|| r#"{"status":"Pushed","id":"0123456789ab"}"#.to_string()))
    }

    fn tag(&self, source: &str, repository: &str, tag: &str) -> CapstanResult<()> {
        self.record(format!("tag {source} {repository}:{tag}"));
        let mut images = self.images.lock();
        if !images.contains(source) {
            return Err(CapstanError::ImageNotFound {
                reference: source.to_string(),
            });
        }
        images.insert(format!("{repository}:{tag}"));
        Ok(())
    }

    fn remove_image(&self, reference: &str) -> CapstanResult<()> {
        self.record(format!("remove {reference}"));
        if self.images.lock().remove(reference) {
            Ok(())
        } else {
            Err(CapstanError::ImageNotFound {
                reference: reference.to_string(),
            })
        }
    }

    fn image_exists(&self, reference: &str) -> CapstanResult<bool> {
        Ok(self.has_image(reference))
    }
}
