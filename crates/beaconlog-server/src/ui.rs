//! The UI-owning task.
//!
//! Core components never touch UI state directly; they post [`UiEvent`]s.
//! This task is the only writer of [`UiView`], which the HTTP handlers read
//! to render the control screen.

use std::collections::VecDeque;
use std::sync::Arc;

use beaconlog_core::{ScanState, UiEvent};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info};
use utoipa::ToSchema;

/// How many notices the view keeps.
pub const MAX_NOTICES: usize = 20;

/// A notice as shown to the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "text": "Database saved successfully",
    "posted_at_utc": "2025-01-15T03:30:00Z"
}))]
pub struct Notice {
    /// Notice text.
    pub text: String,
    /// When the notice was posted.
    pub posted_at_utc: String,
}

/// What the control screen currently shows.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct UiView {
    /// State the control label reflects.
    pub control_state: ScanState,
    /// Title of the visible foreground notification, if any.
    pub notification: Option<String>,
    /// Whether the location-settings dialog is waiting for an answer.
    pub location_prompt_pending: bool,
    /// Most recent notices, oldest first.
    #[schema(value_type = Vec<Notice>)]
    pub notices: VecDeque<Notice>,
}

impl UiView {
    /// Apply one event.
    pub fn apply(&mut self, event: UiEvent) {
        match event {
            UiEvent::Notice { text } => {
                info!(notice = %text, "User notice");
                if self.notices.len() == MAX_NOTICES {
                    self.notices.pop_front();
                }
                self.notices.push_back(Notice {
                    text,
                    posted_at_utc: Utc::now().to_rfc3339(),
                });
            }
            UiEvent::ControlLabel { state } => {
                debug!(label = state.control_label(), "Control label updated");
                self.control_state = state;
            }
            UiEvent::LocationSettingsPrompt => {
                info!("Location settings prompt shown");
                self.location_prompt_pending = true;
            }
            UiEvent::ForegroundNotification { visible, title } => {
                debug!(visible, %title, "Foreground notification updated");
                self.notification = visible.then_some(title);
            }
        }
    }
}

/// Shared handle onto the view.
pub type SharedView = Arc<RwLock<UiView>>;

/// Run the UI task until every [`beaconlog_core::UiHandle`] is gone.
pub fn spawn(mut rx: mpsc::UnboundedReceiver<UiEvent>, view: SharedView) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            view.write().await.apply(event);
        }
        debug!("UI queue closed");
    })
}
