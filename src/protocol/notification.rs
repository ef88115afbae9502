//! Session event notifications

use serde::{Deserialize, Serialize};

use crate::core::types::{DisconnectReason, SessionState};

/// Events broadcast by a device session
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event", content = "params")]
#[serde(rename_all = "snake_case")]
pub enum SessionEvent {
    /// Session state changed
    StateChanged(StateChangedParams),

    /// Session was torn down; emitted exactly once per connection
    Disconnected(DisconnectedParams),
}

/// State change notification parameters
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StateChangedParams {
    pub state: SessionState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub firmware_version: Option<String>,
}

/// Teardown notification parameters
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DisconnectedParams {
    pub reason: DisconnectReason,
}

impl SessionEvent {
    pub fn state(state: SessionState) -> Self {
        SessionEvent::StateChanged(StateChangedParams {
            state,
            firmware_version: None,
        })
    }

    pub fn connected(firmware_version: Option<String>) -> Self {
        SessionEvent::StateChanged(StateChangedParams {
            state: SessionState::Connected,
            firmware_version,
        })
    }

    pub fn disconnected(reason: DisconnectReason) -> Self {
        SessionEvent::Disconnected(DisconnectedParams { reason })
    }
}
