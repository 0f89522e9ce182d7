//! Reconnect state machine for roomsync.
//!
//! This module provides a pure, side-effect-free state machine for recovering
//! from lost connectivity. It takes events as input and produces a new state
//! plus a list of actions to execute.
//!
//! Probing the homeserver and waiting between probes is performed by
//! sync-client's `Reconnector`, not by this module.

/// Connectivity as reported to the application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionStatus {
    /// Waiting for the backoff delay before the next probe.
    Waiting,
    /// A probe request is in flight.
    Reconnecting,
    /// The homeserver is reachable.
    #[default]
    Online,
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Waiting => "waiting",
            Self::Reconnecting => "reconnecting",
            Self::Online => "online",
        };
        f.write_str(name)
    }
}

/// Reconnect state machine - NO I/O, just state transitions.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ReconnectState {
    /// No reconnect loop is running.
    #[default]
    Online,
    /// Probe in flight.
    Reconnecting {
        /// Probe number within the current loop, starting at 1.
        attempt: u32,
    },
    /// Backoff wait in progress.
    Waiting {
        /// Number of the probe that failed.
        attempt: u32,
    },
    /// The probe was rejected with a non-connectivity error. The loop has
    /// stopped and is only restarted by a new failure or an explicit retry.
    Failed,
}

impl ReconnectState {
    /// Create a new state machine in the Online state.
    pub fn new() -> Self {
        Self::Online
    }

    /// Process an event and return the new state plus actions to execute.
    ///
    /// This is a pure function - no side effects. The caller (sync-client)
    /// is responsible for executing the returned actions.
    pub fn on_event(self, event: Event) -> (Self, Vec<Action>) {
        match (self, event) {
            // Start a loop
            (Self::Online | Self::Failed, Event::RequestFailed) => start_loop(),
            (Self::Failed, Event::RetryRequested) => start_loop(),

            // From Reconnecting
            (Self::Reconnecting { .. }, Event::ProbeSucceeded) => (
                Self::Online,
                vec![
                    Action::ResetBackoff,
                    Action::EmitStatus(ConnectionStatus::Online),
                ],
            ),
            (Self::Reconnecting { attempt }, Event::ConnectionLost) => (
                Self::Waiting { attempt },
                vec![
                    Action::EmitStatus(ConnectionStatus::Waiting),
                    Action::StartWait,
                ],
            ),
            (Self::Reconnecting { .. }, Event::ProbeRejected { error }) => (
                Self::Failed,
                vec![
                    Action::ResetBackoff,
                    Action::ReportFatal { error },
                    Action::EmitStatus(ConnectionStatus::Waiting),
                ],
            ),

            // From Waiting
            (Self::Waiting { attempt }, Event::WaitElapsed) => (
                Self::Reconnecting {
                    attempt: attempt.saturating_add(1),
                },
                vec![
                    Action::EmitStatus(ConnectionStatus::Reconnecting),
                    Action::StartProbe,
                ],
            ),
            (state @ Self::Waiting { .. }, Event::RetryRequested) => {
                (state, vec![Action::CancelWait])
            }

            // A loop is already running, or the event does not apply
            (state, _) => (state, vec![]),
        }
    }

    /// Status reported to the application for this state.
    pub fn status(&self) -> ConnectionStatus {
        match self {
            Self::Online => ConnectionStatus::Online,
            Self::Reconnecting { .. } => ConnectionStatus::Reconnecting,
            Self::Waiting { .. } | Self::Failed => ConnectionStatus::Waiting,
        }
    }

    /// Check if a reconnect loop is active (probing or waiting).
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Reconnecting { .. } | Self::Waiting { .. })
    }
}

fn start_loop() -> (ReconnectState, Vec<Action>) {
    (
        ReconnectState::Reconnecting { attempt: 1 },
        vec![
            Action::EmitStatus(ConnectionStatus::Reconnecting),
            Action::StartProbe,
        ],
    )
}

/// Events that drive the reconnect lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A request failed with a connection error.
    RequestFailed,
    /// The probe got a response.
    ProbeSucceeded,
    /// The probe failed with a connection error or timed out.
    ConnectionLost,
    /// The probe failed with any other error.
    ProbeRejected {
        /// Error message describing the failure.
        error: String,
    },
    /// The backoff wait ended (elapsed or cut short).
    WaitElapsed,
    /// The application asked to retry right away.
    RetryRequested,
}

/// Actions to be executed by the sync-client.
///
/// These are instructions, not side effects. The sync-client interprets
/// these and performs the actual I/O.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Send a probe request.
    StartProbe,
    /// Wait for the current backoff delay.
    StartWait,
    /// Cut the current backoff wait short.
    CancelWait,
    /// Restore the backoff start value.
    ResetBackoff,
    /// Publish a new connection status.
    EmitStatus(ConnectionStatus),
    /// Record a fatal probe error.
    ReportFatal {
        /// Error message describing the failure.
        error: String,
    },
}
