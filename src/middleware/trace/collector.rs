//! Server events and the collectors that receive them.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::info;

use super::span::SpanId;
use crate::error::Error;

/// What the server knew about the request on arrival.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestInfo {
    pub method: String,
    pub uri: String,
    pub proto: String,
    pub host: Option<String>,
    pub remote_addr: Option<SocketAddr>,
    pub content_length: u64,
    /// Redacted header summary.
    pub headers: BTreeMap<String, String>,
}

/// What the server sent back.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResponseInfo {
    pub status: u16,
    /// Body bytes seen at this behavior's position in the chain. With
    /// compression further in, that is the compressed size.
    pub content_length: u64,
    /// Redacted summary of headers and trailers.
    pub headers: BTreeMap<String, String>,
}

/// One request handled by the server, as seen by the trace behavior.
#[derive(Clone, Debug)]
pub struct ServerEvent {
    pub span: SpanId,
    pub route: String,
    pub request: RequestInfo,
    pub response: ResponseInfo,
    pub server_recv: SystemTime,
    pub server_send: SystemTime,
}

impl ServerEvent {
    /// Time between arrival and completion.
    pub fn elapsed(&self) -> Duration {
        self.server_send
            .duration_since(self.server_recv)
            .unwrap_or_default()
    }
}

/// Destination for [`ServerEvent`]s.
///
/// Called off the request path, on a detached task, once the response is
/// complete. An error is logged and otherwise ignored.
#[async_trait]
pub trait Collector: Send + Sync + 'static {
    async fn collect(&self, event: ServerEvent) -> Result<(), Error>;
}

/// Writes each event as an `INFO` tracing event.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogCollector;

#[async_trait]
impl Collector for LogCollector {
    async fn collect(&self, event: ServerEvent) -> Result<(), Error> {
        info!(
            span = %event.span,
            route = %event.route,
            method = %event.request.method,
            status = event.response.status,
            bytes = event.response.content_length,
            elapsed_us = event.elapsed().as_micros() as u64,
            "server event"
        );
        Ok(())
    }
}

/// Hands events to an mpsc receiver, typically an exporter task.
#[derive(Clone, Debug)]
pub struct ChannelCollector {
    tx: mpsc::UnboundedSender<ServerEvent>,
}

impl ChannelCollector {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ServerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl Collector for ChannelCollector {
    async fn collect(&self, event: ServerEvent) -> Result<(), Error> {
        self.tx
            .send(event)
            .map_err(|_| Error::Collect("event receiver dropped".to_owned()))
    }
}
