//! Initialization state machine.
//!
//! ```text
//! NotInitialized --initialize--> Initializing --notifications/initialized--> Initialized
//! ```
//!
//! State is held per session. Transitions only move forward; anything else is
//! an [`InvalidStateTransition`].

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::mcp::protocol::methods;

/// Handshake progress for one connection or session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InitializationState {
    /// Waiting for the initialize request.
    #[default]
    NotInitialized,
    /// Initialize received, waiting for the initialized notification.
    Initializing,
    /// Handshake complete; all methods are dispatchable.
    Initialized,
}

/// Inputs that drive the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// The client sent `initialize`.
    InitializeRequest,
    /// The client sent `notifications/initialized`.
    InitializedNotification,
}

impl LifecycleEvent {
    /// Maps a method name to the lifecycle event it triggers, if any.
    #[must_use]
    pub fn from_method(method: &str) -> Option<Self> {
        match method {
            methods::INITIALIZE => Some(Self::InitializeRequest),
            methods::INITIALIZED | methods::INITIALIZED_ALIAS => {
                Some(Self::InitializedNotification)
            }
            _ => None,
        }
    }
}

/// A lifecycle event arrived in a state that does not accept it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid state transition: {event:?} while {from:?}")]
pub struct InvalidStateTransition {
    /// State the session was in.
    pub from: InitializationState,
    /// Event that was rejected.
    pub event: LifecycleEvent,
}

impl InitializationState {
    /// Computes the next state.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidStateTransition`] for every move other than
    /// `NotInitialized -> Initializing -> Initialized`.
    pub const fn transition(self, event: LifecycleEvent) -> Result<Self, InvalidStateTransition> {
        match (self, event) {
            (Self::NotInitialized, LifecycleEvent::InitializeRequest) => Ok(Self::Initializing),
            (Self::Initializing, LifecycleEvent::InitializedNotification) => Ok(Self::Initialized),
            (from, event) => Err(InvalidStateTransition { from, event }),
        }
    }

    /// Dispatch gate: whether `method` may be dispatched in this state.
    #[must_use]
    pub fn allows(self, method: &str) -> bool {
        self.is_initialized() || is_handshake_method(method)
    }

    /// Whether the handshake has completed.
    #[must_use]
    pub const fn is_initialized(self) -> bool {
        matches!(self, Self::Initialized)
    }
}

/// Methods that may be dispatched before the handshake completes.
#[must_use]
pub fn is_handshake_method(method: &str) -> bool {
    matches!(
        method,
        methods::INITIALIZE | methods::INITIALIZED | methods::INITIALIZED_ALIAS | methods::PING
    )
}
