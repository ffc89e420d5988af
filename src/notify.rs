//! Notification sinks
//!
//! Optional outbound channel for caller logic: a message plus an optional
//! screenshot. Delivery failures are reported as a bool and logged, never
//! propagated; a run does not depend on notifications going out.

use async_trait::async_trait;
use tracing::info;

#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Deliver a message with an optional PNG attachment. Returns whether
    /// delivery succeeded.
    async fn send(&self, message: &str, png: Option<&[u8]>) -> bool;
}

/// Sink that writes notifications to the log. The default when no real
/// transport is configured.
#[derive(Debug, Default)]
pub struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
    async fn send(&self, message: &str, png: Option<&[u8]>) -> bool {
        match png {
            Some(bytes) => info!("notification: {} ({} byte screenshot)", message, bytes.len()),
            None => info!("notification: {}", message),
        }
        true
    }
}
