//! Streaming connection to the instrumented process.
//!
//! [`Connector`] is the seam between the session driver and whatever speaks
//! the remote protocol. It opens two kinds of server streams: the update feed
//! ([`UpdateStream`]) and the per-task detail feed ([`DetailStream`]). Both
//! yield `None` when the remote ends the stream cleanly.
//!
//! [`JsonLinesConnector`] is the bundled implementation: one JSON request
//! line over TCP, then one JSON record per response line.

use std::future::Future;
use std::marker::PhantomData;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::TcpStream;
use tracing::{debug, info};

use crate::config::ConnectionConfig;
use crate::error::{Result, TransportError};
use crate::ids::SpanId;
use crate::wire::{TaskDetails, Update};

/// The update feed.
pub trait UpdateStream: Send {
    fn next_update(&mut self) -> impl Future<Output = Option<Result<Update>>> + Send;
}

/// The detail feed for one task.
pub trait DetailStream: Send {
    fn next_details(&mut self) -> impl Future<Output = Option<Result<TaskDetails>>> + Send;
}

/// Opens streams against one instrumented process.
pub trait Connector: Send + Sync + 'static {
    type Updates: UpdateStream;
    type Details: DetailStream;

    /// Human-readable address, for logs and notifications.
    fn target(&self) -> String;

    fn connect_updates(&self) -> impl Future<Output = Result<Self::Updates>> + Send;

    fn connect_details(&self, task: SpanId) -> impl Future<Output = Result<Self::Details>> + Send;
}

// =============================================================================
// JSON lines over TCP
// =============================================================================

/// First line sent after connecting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum Request {
    WatchUpdates {},
    WatchTaskDetails { id: SpanId },
}

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct JsonLinesConnector {
    target: String,
    connect_timeout: Duration,
}

impl JsonLinesConnector {
    #[must_use]
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    /// Connector for the configured target and connect timeout.
    #[must_use]
    pub fn from_config(config: &ConnectionConfig) -> Self {
        Self::new(config.target_addr.clone()).with_connect_timeout(config.connect_timeout())
    }

    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    async fn open<T: DeserializeOwned>(&self, request: &Request) -> Result<JsonLines<T>> {
        let connect_error = |reason: String| TransportError::Connect {
            target: self.target.clone(),
            reason,
        };

        let mut stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(&self.target))
            .await
            .map_err(|_| connect_error(format!("timed out after {:?}", self.connect_timeout)))?
            .map_err(|e| connect_error(e.to_string()))?;

        let mut line = serde_json::to_vec(request)?;
        line.push(b'\n');
        stream
            .write_all(&line)
            .await
            .map_err(|e| TransportError::Stream(e.to_string()))?;

        info!(target_addr = %self.target, ?request, "stream opened");
        Ok(JsonLines {
            lines: BufReader::new(stream).lines(),
            _record: PhantomData,
        })
    }
}

impl Connector for JsonLinesConnector {
    type Updates = JsonLines<Update>;
    type Details = JsonLines<TaskDetails>;

    fn target(&self) -> String {
        self.target.clone()
    }

    async fn connect_updates(&self) -> Result<Self::Updates> {
        self.open(&Request::WatchUpdates {}).await
    }

    async fn connect_details(&self, task: SpanId) -> Result<Self::Details> {
        self.open(&Request::WatchTaskDetails { id: task }).await
    }
}

/// A response stream of newline-delimited JSON records.
#[derive(Debug)]
pub struct JsonLines<T> {
    lines: Lines<BufReader<TcpStream>>,
    _record: PhantomData<fn() -> T>,
}

impl<T: DeserializeOwned> JsonLines<T> {
    async fn next_record(&mut self) -> Option<Result<T>> {
        loop {
            let line = match self.lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => return None,
                Err(e) => return Some(Err(TransportError::Stream(e.to_string()).into())),
            };
            // keep-alive
            if line.trim().is_empty() {
                continue;
            }
            debug!(len = line.len(), "stream record received");
            return Some(
                serde_json::from_str(&line).map_err(|e| TransportError::Decode(e.to_string()).into()),
            );
        }
    }
}

impl UpdateStream for JsonLines<Update> {
    async fn next_update(&mut self) -> Option<Result<Update>> {
        self.next_record().await
    }
}

impl DetailStream for JsonLines<TaskDetails> {
    async fn next_details(&mut self) -> Option<Result<TaskDetails>> {
        self.next_record().await
    }
}
