//! Messages for the UI-owning task.
//!
//! Background work never touches user-visible state directly. Instead it posts
//! a [`UiEvent`] onto the queue behind a [`UiHandle`] and carries on without
//! waiting for the outcome (dialogs, notices and label updates are all
//! fire-and-forget).

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use utoipa::ToSchema;

use crate::session::ScanState;

/// Notice shown when the network clock finishes its first sync.
pub const NOTICE_NTP_SYNCED: &str = "NTP synced successfully";

/// Notice shown after a successful rotation.
pub const NOTICE_DATABASE_SAVED: &str = "Database saved successfully";

/// Notice shown when there is no live database to rotate.
pub const NOTICE_NO_DATABASE: &str = "No database file found";

/// Notice shown when rotation fails.
pub const NOTICE_SAVE_FAILED: &str = "Unable to save database";

/// Notice shown when beacon ranging could not be started.
pub const NOTICE_RANGING_FAILED: &str = "Unable to start beacon ranging";

/// Message shown by the location-settings prompt.
pub const LOCATION_PROMPT_MESSAGE: &str = "Location needs to be turned on";

/// A request for the UI-owning task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UiEvent {
    /// A short one-line notice for the user.
    Notice {
        /// Notice text.
        text: String,
    },

    /// The single control should show the affordance for `state`.
    ControlLabel {
        /// Session state the label reflects.
        state: ScanState,
    },

    /// Ask the user to open the system location settings.
    LocationSettingsPrompt,

    /// Show or hide the persistent foreground-scanning notification.
    ForegroundNotification {
        /// Whether the notification is visible.
        visible: bool,
        /// Notification title.
        title: String,
    },
}

/// Cloneable sender side of the UI queue.
#[derive(Debug, Clone)]
pub struct UiHandle {
    tx: mpsc::UnboundedSender<UiEvent>,
}

impl UiHandle {
    /// Create a handle together with the receiving end for the UI task.
    #[must_use]
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<UiEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Post an event. Never blocks; a closed queue only gets a trace line.
    pub fn send(&self, event: UiEvent) {
        if let Err(err) = self.tx.send(event) {
            tracing::trace!(event = ?err.0, "UI queue closed, dropping event");
        }
    }

    /// Post a user-facing notice.
    pub fn notice(&self, text: impl Into<String>) {
        self.send(UiEvent::Notice { text: text.into() });
    }
}
