use std::sync::{Arc, Mutex};

use tokio::sync::Notify;

use crate::db::StateStore;
use crate::error::Result;

/// Raised when the app goes to the background and the background service
/// should take over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClosedEvent;

/// Single-slot event: a published value is handed to exactly one consumer
/// and then cleared. Late subscribers never see an already consumed value.
pub struct SingleEvent<T> {
    slot: Mutex<Option<T>>,
    notify: Notify,
}

impl<T> SingleEvent<T> {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(None),
            notify: Notify::new(),
        }
    }

    /// Store `value`, replacing one that nobody has taken yet.
    pub fn publish(&self, value: T) {
        *self.lock() = Some(value);
        self.notify.notify_one();
    }

    pub fn take(&self) -> Option<T> {
        self.lock().take()
    }

    pub async fn recv(&self) -> T {
        loop {
            if let Some(value) = self.take() {
                return value;
            }
            self.notify.notified().await;
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<T>> {
        self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<T> Default for SingleEvent<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    None,
    BecameForeground,
    BecameBackground { service_requested: bool },
}

/// Counts visible UI surfaces to tell when the whole app moves between
/// foreground and background.
pub struct LifecycleMonitor {
    active: usize,
    state: StateStore,
    events: Arc<SingleEvent<ClosedEvent>>,
}

impl LifecycleMonitor {
    pub fn new(state: StateStore, events: Arc<SingleEvent<ClosedEvent>>) -> Self {
        Self {
            active: 0,
            state,
            events,
        }
    }

    pub fn active_surfaces(&self) -> usize {
        self.active
    }

    pub async fn surface_started(&mut self) -> Result<Transition> {
        self.active += 1;
        if self.active > 1 {
            return Ok(Transition::None);
        }

        tracing::debug!("app is in the foreground");
        self.state.set_foreground_flag(true).await?;
        Ok(Transition::BecameForeground)
    }

    pub async fn surface_stopped(&mut self) -> Result<Transition> {
        if self.active == 0 {
            tracing::warn!("surface stopped with no active surfaces");
            return Ok(Transition::None);
        }
        self.active -= 1;
        if self.active > 0 {
            return Ok(Transition::None);
        }

        tracing::debug!("app is in the background");
        // Only the first background transition after a foreground one
        // starts the service.
        let was_foreground = self.state.swap_foreground_flag(false).await?;
        if was_foreground {
            self.events.publish(ClosedEvent);
            self.state.set_service_started(true).await?;
            tracing::info!("app closed, requesting background service");
        }

        Ok(Transition::BecameBackground {
            service_requested: was_foreground,
        })
    }
}
