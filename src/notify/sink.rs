use std::io::ErrorKind;
use std::path::PathBuf;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::AsyncWriteExt;

use super::dispatcher::Notification;

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("notification permission denied")]
    PermissionDenied,

    #[error("delivery failed: {0}")]
    Failed(String),
}

/// A channel notifications can be delivered through.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn deliver(&self, notification: &Notification) -> Result<(), DeliveryError>;
}

/// Writes notifications to the log.
#[derive(Debug, Default)]
pub struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
    async fn deliver(&self, notification: &Notification) -> Result<(), DeliveryError> {
        tracing::info!(
            title = %notification.title,
            link = %notification.deep_link,
            priority = ?notification.priority,
            "new announcement: {}",
            notification.body
        );
        Ok(())
    }
}

/// Appends each notification as one JSON line to a file that a desktop
/// helper or another process can tail.
#[derive(Debug)]
pub struct InboxSink {
    path: PathBuf,
}

impl InboxSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl NotificationSink for InboxSink {
    async fn deliver(&self, notification: &Notification) -> Result<(), DeliveryError> {
        let mut line = serde_json::to_string(notification)
            .map_err(|e| DeliveryError::Failed(e.to_string()))?;
        line.push('\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(io_to_delivery)?;
        file.write_all(line.as_bytes())
            .await
            .map_err(io_to_delivery)?;
        file.flush().await.map_err(io_to_delivery)?;
        Ok(())
    }
}

fn io_to_delivery(err: std::io::Error) -> DeliveryError {
    match err.kind() {
        ErrorKind::PermissionDenied => DeliveryError::PermissionDenied,
        _ => DeliveryError::Failed(err.to_string()),
    }
}

/// Collects notifications in memory; can simulate a denied permission.
#[cfg(test)]
#[derive(Debug, Default)]
pub struct MemorySink {
    pub delivered: std::sync::Mutex<Vec<Notification>>,
    pub deny: bool,
}

#[cfg(test)]
impl MemorySink {
    pub fn denying() -> Self {
        Self {
            deny: true,
            ..Self::default()
        }
    }

    pub fn delivered(&self) -> Vec<Notification> {
        self.delivered.lock().unwrap().clone()
    }
}

#[cfg(test)]
#[async_trait]
impl NotificationSink for MemorySink {
    async fn deliver(&self, notification: &Notification) -> Result<(), DeliveryError> {
        if self.deny {
            return Err(DeliveryError::PermissionDenied);
        }
        self.delivered.lock().unwrap().push(notification.clone());
        Ok(())
    }
}
