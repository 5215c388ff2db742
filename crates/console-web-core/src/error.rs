//! Error types for console-web-core

use std::fmt::Write;
use thiserror::Error;

/// Remediation command for resolving an error
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct RemediationCommand {
    /// Short label describing the command purpose
    pub label: String,
    /// Command to run
    pub command: String,
}

/// Actionable remediation guidance for an error
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Remediation {
    /// One-line summary of how to fix the issue
    pub summary: String,
    /// Suggested commands to resolve or diagnose the issue
    pub commands: Vec<RemediationCommand>,
    /// Additional alternative guidance
    pub alternatives: Vec<String>,
}

impl Remediation {
    #[must_use]
    pub fn new(summary: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            commands: Vec::new(),
            alternatives: Vec::new(),
        }
    }

    #[must_use]
    pub fn command(mut self, label: impl Into<String>, command: impl Into<String>) -> Self {
        self.commands.push(RemediationCommand {
            label: label.into(),
            command: command.into(),
        });
        self
    }

    #[must_use]
    pub fn alternative(mut self, alternative: impl Into<String>) -> Self {
        self.alternatives.push(alternative.into());
        self
    }

    /// Render remediation text for human-readable output
    #[must_use]
    pub fn render_plain(&self) -> String {
        let mut output = String::new();
        let _ = writeln!(output, "To fix:");
        let _ = writeln!(output, "  {}", self.summary);

        if !self.commands.is_empty() {
            let _ = writeln!(output, "  Commands:");
            for cmd in &self.commands {
                let _ = writeln!(output, "    - {}: {}", cmd.label, cmd.command);
            }
        }

        if !self.alternatives.is_empty() {
            let _ = writeln!(output, "  Alternatives:");
            for alt in &self.alternatives {
                let _ = writeln!(output, "    - {alt}");
            }
        }

        output
    }
}

/// Result type alias using the library's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for console-web-core
#[derive(Error, Debug)]
pub enum Error {
    /// Update or detail stream failures
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Configuration errors
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// Histogram decoding failed
    #[error("Histogram error: {0}")]
    Histogram(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Return remediation guidance when available.
    #[must_use]
    pub fn remediation(&self) -> Option<Remediation> {
        match self {
            Self::Transport(err) => Some(err.remediation()),
            Self::Config(err) => Some(err.remediation()),
            Self::Histogram(_) => Some(
                Remediation::new("The detail stream sent a histogram that could not be decoded.")
                    .alternative("Check that the instrumented process and this client agree on the histogram encoding."),
            ),
            Self::Io(_) => Some(
                Remediation::new("Check file permissions and network reachability, then retry.")
                    .alternative("Verify any configured log file directory exists and is writable."),
            ),
            Self::Json(_) => Some(
                Remediation::new("Validate the JSON input and retry.")
                    .command("Validate JSON", "python -m json.tool < input.json"),
            ),
        }
    }

    /// Stable name used as the title of a user-facing notification.
    #[must_use]
    pub fn notice_name(&self) -> &'static str {
        match self {
            Self::Transport(err) => err.name(),
            Self::Config(_) => "ConfigError",
            Self::Histogram(_) => "HistogramError",
            Self::Io(_) => "IoError",
            Self::Json(_) => "JsonError",
        }
    }
}

/// Errors from the streaming connection to the instrumented process
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Failed to connect to {target}: {reason}")]
    Connect { target: String, reason: String },

    #[error("Stream failed: {0}")]
    Stream(String),

    #[error("Failed to decode message: {0}")]
    Decode(String),

    #[error("Stream closed by remote")]
    Closed,
}

impl TransportError {
    /// Stable error name, e.g. for a notification title.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Connect { .. } => "ConnectError",
            Self::Stream(_) => "StreamError",
            Self::Decode(_) => "DecodeError",
            Self::Closed => "StreamClosed",
        }
    }

    #[must_use]
    pub fn remediation(&self) -> Remediation {
        match self {
            Self::Connect { target, .. } => Remediation::new(format!(
                "Could not reach {target}. Make sure the instrumented process is running and serving the console feed."
            ))
            .command("Check port", format!("nc -z {}", target.replace(':', " ")))
            .alternative("Pass --target with the correct address."),
            Self::Stream(_) | Self::Closed => Remediation::new(
                "The stream was interrupted. The session reconnects automatically.",
            )
            .alternative("If this repeats, check whether the instrumented process restarted."),
            Self::Decode(_) => Remediation::new(
                "The remote sent a message this client cannot decode.",
            )
            .alternative("Check that the instrumented process speaks a compatible protocol version."),
        }
    }
}

/// Configuration-specific errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {0}: {1}")]
    Read(String, String),

    #[error("Failed to parse config: {0}")]
    Parse(String),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

impl ConfigError {
    #[must_use]
    pub fn remediation(&self) -> Remediation {
        match self {
            Self::Read(path, _) => Remediation::new(format!(
                "Failed to read config file: {path}. Check the path and permissions."
            ))
            .command("Check permissions", format!("ls -l \"{path}\""))
            .alternative("Pass --config with the correct path."),
            Self::Parse(_) => Remediation::new("Config parse failed. Fix the TOML syntax and retry.")
                .command("Show defaults", "console-web config"),
            Self::Invalid(_) => {
                Remediation::new("Config validation failed. Fix the invalid fields and retry.")
                    .command("Show defaults", "console-web config")
            }
        }
    }
}

/// Whether an operation that failed with `error` may succeed if retried.
#[must_use]
pub fn is_retryable(error: &Error) -> bool {
    match error {
        // the remote may come back
        Error::Transport(_) | Error::Io(_) => true,
        Error::Config(_) | Error::Json(_) | Error::Histogram(_) => false,
    }
}

/// Format an error with remediation guidance for display.
#[must_use]
pub fn format_error_with_remediation(error: &Error) -> String {
    let mut output = format!("Error: {error}");
    if let Some(remediation) = error.remediation() {
        output.push('\n');
        output.push('\n');
        output.push_str(&remediation.render_plain());
    }
    output
}
