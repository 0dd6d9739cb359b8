use crate::types::ConnectionState;

/// What a status signal did to the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Disconnected -> Connected. Aliases must be resolved again before reads are trusted.
    SessionStarted,
    /// Connected signal while already connected.
    Refresh,
    /// Connected -> Disconnected.
    SessionEnded,
    /// Disconnected signal while already disconnected.
    Unchanged,
}

/// Tracks the connection and numbers every state change.
///
/// The epoch lets the sync loop tell whether a device job finished in the session that
/// started it.
#[derive(Debug, Default)]
pub struct ConnectionStateMachine {
    state: ConnectionState,
    epoch: u64,
}

impl ConnectionStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn apply(&mut self, signal: ConnectionState) -> Transition {
        match (self.state, signal) {
            (ConnectionState::Disconnected, ConnectionState::Connected) => {
                self.state = ConnectionState::Connected;
                self.epoch = self.epoch.wrapping_add(1);
                Transition::SessionStarted
            }
            (ConnectionState::Connected, ConnectionState::Connected) => Transition::Refresh,
            (ConnectionState::Connected, ConnectionState::Disconnected) => {
                self.state = ConnectionState::Disconnected;
                self.epoch = self.epoch.wrapping_add(1);
                Transition::SessionEnded
            }
            (ConnectionState::Disconnected, ConnectionState::Disconnected) => Transition::Unchanged,
        }
    }
}
