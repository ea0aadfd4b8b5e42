//! Container engine status stream.
//!
//! Build, pull and push responses are a sequence of JSON objects, one per
//! line. Each carries `status` (optionally with a layer `id`), raw build
//! output in `stream`, or a terminal `error`.

use capstan_common::{CapstanError, CapstanResult};
use serde::Deserialize;

/// One entry of a status stream.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StatusLine {
    /// Progress message.
    #[serde(default)]
    pub status: Option<String>,
    /// Layer id the status refers to.
    #[serde(default)]
    pub id: Option<String>,
    /// Raw build output.
    #[serde(default)]
    pub stream: Option<String>,
    /// Failure message.
    #[serde(default)]
    pub error: Option<String>,
}

/// Parse every entry of a status stream.
///
/// # Errors
///
/// Fails if the body is not a sequence of JSON objects.
pub fn parse(body: &str) -> CapstanResult<Vec<StatusLine>> {
    serde_json::Deserializer::from_str(body)
        .into_iter::<StatusLine>()
        .map(|line| line.map_err(CapstanError::from))
        .collect()
}

/// Output of a successful build.
#[derive(Debug, Clone, Default)]
pub struct BuildOutput {
    /// Build log lines.
    pub lines: Vec<String>,
}

/// Consume a build stream.
///
/// `stream` text is logged at debug level and collected; any `error`
/// entries fail the build with the collected log attached.
///
/// # Errors
///
/// Returns [`CapstanError::BuildFailed`] if the stream holds errors.
pub fn consume_build(name: &str, body: &str) -> CapstanResult<BuildOutput> {
    let mut output = Vec::new();
    let mut errors = Vec::new();

    for line in parse(body)? {
        if let Some(stream) = line.stream {
            for out in stream.split("\n\r") {
                tracing::debug!(image = name, "{}", out.trim());
            }
            output.push(stream);
        } else if let Some(error) = line.error {
            errors.push(error);
        }
    }

    if errors.is_empty() {
        return Ok(BuildOutput { lines: output });
    }

    let log = output.concat();
    tracing::error!(image = name, "Failed to build {}:\n{}", name, errors.join("\n"));
    tracing::error!(image = name, "Output from building {}:\n{}", name, log);
    Err(CapstanError::BuildFailed {
        name: name.to_string(),
        errors,
        log,
    })
}

/// Accumulates deduplicated progress messages of a pull or push.
#[derive(Debug, Default)]
pub struct ProgressLog {
    name: String,
    messages: Vec<String>,
}

impl ProgressLog {
    /// Create a log for an artifact.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            messages: Vec::new(),
        }
    }

    /// Messages recorded so far.
    #[must_use]
    pub fn messages(&self) -> &[String] {
        &self.messages
    }

    /// Record a status entry, skipping repeats.
    pub fn record(&mut self, line: &StatusLine) {
        let Some(status) = &line.status else {
            return;
        };
        let msg = match &line.id {
            Some(id) => format!("{} layer {}: {}", self.name, id, status),
            None => format!("{}: {}", self.name, status),
        };
        if !self.messages.contains(&msg) {
            tracing::debug!("{}", msg);
            self.messages.push(msg);
        }
    }

    /// Consume a whole stream.
    ///
    /// Registry-side errors are usually transient (network, rate limits), so
    /// an `error` entry is reported as retryable.
    ///
    /// # Errors
    ///
    /// Returns [`CapstanError::Retryable`] on the first `error` entry.
    pub fn consume(&mut self, action: &str, target: &str, body: &str) -> CapstanResult<()> {
        for line in parse(body)? {
            self.record(&line);
            if let Some(error) = line.error {
                tracing::error!(
                    "Error {} image {}:\n{}",
                    action,
                    target,
                    self.messages.join("\n")
                );
                return Err(CapstanError::retryable(format!(
                    "{} ERROR when {}: {}",
                    self.name, action, error
                )));
            }
        }
        Ok(())
    }
}
