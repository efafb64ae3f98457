use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::models::NewArticle;

use super::sink::{DeliveryError, NotificationSink};

const EXCERPT_CHARS: usize = 200;

/// Urgency hint passed on to the sink, set through `notification_priority`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Default,
    High,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub title: String,
    pub body: String,
    pub deep_link: String,
    pub priority: Priority,
}

impl Notification {
    pub fn for_article(article: &NewArticle, priority: Priority) -> Self {
        let excerpt = excerpt(&article.content, EXCERPT_CHARS);
        let body = match (article.date.is_empty(), excerpt.is_empty()) {
            (true, _) => excerpt,
            (false, true) => article.date.clone(),
            (false, false) => format!("{}\n{}", article.date, excerpt),
        };

        Self {
            title: article.header.clone(),
            body,
            deep_link: article.url.clone(),
            priority,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Delivered,
    /// The channel has no permission; nothing was shown.
    Skipped,
    Failed,
}

/// Fire-and-forget delivery of "new article" notifications.
#[derive(Clone)]
pub struct NotificationDispatcher {
    sink: Arc<dyn NotificationSink>,
    priority: Priority,
}

impl NotificationDispatcher {
    pub fn new(sink: Arc<dyn NotificationSink>, priority: Priority) -> Self {
        Self { sink, priority }
    }

    pub async fn notify_new_article(&self, article: &NewArticle) -> DispatchOutcome {
        let notification = Notification::for_article(article, self.priority);

        match self.sink.deliver(&notification).await {
            Ok(()) => {
                tracing::debug!(url = %article.url, "notification delivered");
                DispatchOutcome::Delivered
            }
            Err(DeliveryError::PermissionDenied) => {
                tracing::debug!(url = %article.url, "notification permission missing, skipped");
                DispatchOutcome::Skipped
            }
            Err(e) => {
                tracing::warn!(url = %article.url, "failed to deliver notification: {}", e);
                DispatchOutcome::Failed
            }
        }
    }
}

fn excerpt(content: &str, max_chars: usize) -> String {
    let trimmed = content.trim();
    match trimmed.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}…", trimmed[..cut].trim_end()),
        None => trimmed.to_string(),
    }
}
