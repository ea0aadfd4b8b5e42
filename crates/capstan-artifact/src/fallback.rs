//! Endpoint fallback.
//!
//! Downloads may scan several registries in order; uploads only ever
//! target the first one, so a publish never lands on a secondary mirror.
//! With [`FallbackPolicy::run_with_retry`] each candidate exhausts its retry
//! budget before the next is tried: `a, a, a, b, b, b`, never `a, b, a, b`.

use std::collections::BTreeMap;

use capstan_common::{CapstanError, CapstanResult};
use serde::{Deserialize, Serialize};

use crate::retry::RetryPolicy;

/// Ordered endpoint candidates for one configuration key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "OneOrMany", into = "Vec<String>")]
pub struct EndpointList(Vec<String>);

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl From<OneOrMany> for EndpointList {
    fn from(value: OneOrMany) -> Self {
        match value {
            OneOrMany::One(endpoint) => Self(vec![endpoint]),
            OneOrMany::Many(endpoints) => Self(endpoints),
        }
    }
}

impl From<EndpointList> for Vec<String> {
    fn from(list: EndpointList) -> Self {
        list.0
    }
}

impl From<Vec<String>> for EndpointList {
    fn from(endpoints: Vec<String>) -> Self {
        Self(endpoints)
    }
}

impl EndpointList {
    /// Endpoints in precedence order.
    #[must_use]
    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    /// Append an endpoint with the lowest precedence.
    pub fn push(&mut self, endpoint: impl Into<String>) {
        self.0.push(endpoint.into());
    }

    /// Whether the list is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Endpoint lists keyed by option name (`generic_url`, `docker_image_registry`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RegistryEndpoints(BTreeMap<String, EndpointList>);

impl RegistryEndpoints {
    /// Create an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Candidates for `key`, empty if none are configured.
    #[must_use]
    pub fn get(&self, key: &str) -> &[String] {
        self.0
            .get(key)
            .map(EndpointList::as_slice)
            .unwrap_or_default()
    }

    /// Append an endpoint under `key`.
    pub fn push(&mut self, key: &str, endpoint: impl Into<String>) {
        self.0.entry(key.to_string()).or_default().push(endpoint);
    }

    /// Replace the candidates for `key`.
    pub fn set(&mut self, key: &str, endpoints: impl Into<EndpointList>) {
        self.0.insert(key.to_string(), endpoints.into());
    }

    /// Overlay `other` on top of `self`; keys present in `other` win.
    pub fn merge(&mut self, other: &Self) {
        for (key, list) in &other.0 {
            if !list.is_empty() {
                self.0.insert(key.clone(), list.clone());
            }
        }
    }
}

/// Candidate list for an operation.
///
/// Caller-supplied endpoints take precedence; otherwise the artifact's own
/// configured endpoint is used.
#[must_use]
pub fn resolve_candidates(
    endpoints: &RegistryEndpoints,
    key: &str,
    default: Option<&str>,
) -> Vec<String> {
    let supplied = endpoints.get(key);
    if supplied.is_empty() {
        default.map(str::to_string).into_iter().collect()
    } else {
        supplied.to_vec()
    }
}

/// How many candidates a fallback run may try.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackMode {
    /// Try every candidate until one succeeds.
    Full,
    /// Only ever try the first candidate.
    FirstOnly,
}

/// Runs an endpoint-taking operation against an ordered candidate list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FallbackPolicy {
    key: String,
    mode: FallbackMode,
}

impl FallbackPolicy {
    /// Try every candidate of `key`.
    pub fn full(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            mode: FallbackMode::Full,
        }
    }

    /// Only try the first candidate of `key`.
    pub fn first_only(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            mode: FallbackMode::FirstOnly,
        }
    }

    /// The endpoint option this policy iterates.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The fallback mode.
    #[must_use]
    pub const fn mode(&self) -> FallbackMode {
        self.mode
    }

    /// Invoke `operation` with each candidate until one succeeds.
    ///
    /// # Errors
    ///
    /// Fails with a configuration error when `candidates` is empty, otherwise
    /// returns the error of the last attempted candidate.
    pub fn run<T, F>(&self, candidates: &[String], mut operation: F) -> CapstanResult<T>
    where
        F: FnMut(&str) -> CapstanResult<T>,
    {
        let attempts = match (self.mode, candidates) {
            (_, []) => {
                return Err(CapstanError::config(format!(
                    "{} not specified, no endpoint to try",
                    self.key
                )));
            }
            (FallbackMode::Full, all) => all,
            (FallbackMode::FirstOnly, [first, ..]) => std::slice::from_ref(first),
        };

        let mut last_error = None;
        for (index, candidate) in attempts.iter().enumerate() {
            tracing::debug!(key = %self.key, endpoint = %candidate, "Trying endpoint");
            match operation(candidate) {
                Ok(value) => return Ok(value),
                Err(err) => {
                    if index + 1 < attempts.len() {
                        tracing::warn!(
                            key = %self.key,
                            endpoint = %candidate,
                            error = %err,
                            "Endpoint failed, falling back to next"
                        );
                    }
                    last_error = Some(err);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| CapstanError::config(format!("{} is empty", self.key))))
    }

    /// Like [`run`](Self::run), retrying each candidate with `retry` first.
    ///
    /// # Errors
    ///
    /// See [`run`](Self::run) and [`RetryPolicy::run`].
    pub fn run_with_retry<T, F>(
        &self,
        retry: &RetryPolicy,
        candidates: &[String],
        mut operation: F,
    ) -> CapstanResult<T>
    where
        F: FnMut(&str) -> CapstanResult<T>,
    {
        self.run(candidates, |endpoint| retry.run(|| operation(endpoint)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoints(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn full_mode_tries_in_order() {
        let mut seen = Vec::new();
        let result = FallbackPolicy::full("generic_url").run(&endpoints(&["a", "b", "c"]), |e| {
            seen.push(e.to_string());
            if e == "c" {
                Ok(e.to_uppercase())
            } else {
                Err(CapstanError::retryable(format!("{e} down")))
            }
        });
        assert_eq!(result.unwrap(), "C");
        assert_eq!(seen, ["a", "b", "c"]);
    }

    #[test]
    fn full_mode_returns_last_error() {
        let err = FallbackPolicy::full("generic_url")
            .run(&endpoints(&["a", "b"]), |e| -> CapstanResult<()> {
                Err(CapstanError::retryable(format!("{e} down")))
            })
            .unwrap_err();
        assert_eq!(err.to_string(), "b down");
    }

    #[test]
    fn first_only_mode_tries_first_candidate() {
        let mut seen = Vec::new();
        let err = FallbackPolicy::first_only("generic_url")
            .run(&endpoints(&["a", "b", "c"]), |e| -> CapstanResult<()> {
                seen.push(e.to_string());
                Err(CapstanError::retryable("down"))
            })
            .unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(seen, ["a"]);
    }

    #[test]
    fn empty_candidates_is_configuration_error() {
        let mut called = false;
        let err = FallbackPolicy::full("docker_image_registry")
            .run(&[], |_| -> CapstanResult<()> {
                called = true;
                Ok(())
            })
            .unwrap_err();
        assert!(!called);
        assert!(matches!(err, CapstanError::Configuration { .. }));
        assert!(err.to_string().contains("docker_image_registry"));
    }

    #[test]
    fn retry_applies_per_candidate() {
        let mut seen = Vec::new();
        let result = FallbackPolicy::full("generic_url").run_with_retry(
            &RetryPolicy::no_delay(2),
            &endpoints(&["a", "b"]),
            |e| {
                seen.push(e.to_string());
                if e == "b" {
                    Ok(())
                } else {
                    Err(CapstanError::retryable("down"))
                }
            },
        );
        assert!(result.is_ok());
        assert_eq!(seen, ["a", "a", "b"]);
    }

    #[test]
    fn candidates_are_exhausted_in_turn() {
        let mut seen = Vec::new();
        let err = FallbackPolicy::full("generic_url")
            .run_with_retry(
                &RetryPolicy::no_delay(3),
                &endpoints(&["a", "b"]),
                |e| -> CapstanResult<()> {
                    seen.push(e.to_string());
                    Err(CapstanError::retryable(format!("{e} down")))
                },
            )
            .unwrap_err();
        assert_eq!(seen, ["a", "a", "a", "b", "b", "b"]);
        assert!(err.to_string().contains("b down"));
    }

    #[test]
    fn first_only_still_retries() {
        let mut calls = 0;
        let _ = FallbackPolicy::first_only("generic_url").run_with_retry(
            &RetryPolicy::no_delay(3),
            &endpoints(&["a", "b"]),
            |_| -> CapstanResult<()> {
                calls += 1;
                Err(CapstanError::retryable("down"))
            },
        );
        assert_eq!(calls, 3);
    }

    #[test]
    fn endpoints_accept_string_or_list() {
        let yaml = "
generic_url: https://a/repo
docker_image_registry:
  - reg1.example.com
  - reg2.example.com
";
        let parsed: RegistryEndpoints = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(parsed.get("generic_url"), ["https://a/repo"]);
        assert_eq!(
            parsed.get("docker_image_registry"),
            ["reg1.example.com", "reg2.example.com"]
        );
        assert!(parsed.get("missing").is_empty());
    }

    #[test]
    fn supplied_endpoints_override_default() {
        let mut supplied = RegistryEndpoints::new();
        assert_eq!(
            resolve_candidates(&supplied, "generic_url", Some("https://own")),
            ["https://own"]
        );
        supplied.push("generic_url", "https://cli");
        assert_eq!(
            resolve_candidates(&supplied, "generic_url", Some("https://own")),
            ["https://cli"]
        );
        assert!(resolve_candidates(&RegistryEndpoints::new(), "generic_url", None).is_empty());
    }

    #[test]
    fn merge_overrides_keys() {
        let mut base = RegistryEndpoints::new();
        base.push("generic_url", "https://a");
        base.push("docker_image_registry", "reg");
        let mut overlay = RegistryEndpoints::new();
        overlay.set("generic_url", vec!["https://b".to_string()]);
        base.merge(&overlay);
        assert_eq!(base.get("generic_url"), ["https://b"]);
        assert_eq!(base.get("docker_image_registry"), ["reg"]);
    }
}
