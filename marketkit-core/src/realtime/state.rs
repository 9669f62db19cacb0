//! Connection state machine of the realtime channel.

/// Lifecycle of the realtime connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, uniffi::Enum)]
pub enum ChannelState {
    /// No connection and none being attempted.
    #[default]
    Disconnected,
    /// First connection attempt for the current token.
    Connecting,
    /// Authenticated and receiving events.
    Connected,
    /// Connection lost; attempting to get it back.
    Reconnecting,
}

/// Inputs of the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Transition {
    /// The session has a token and no connection exists.
    Open,
    /// The transport finished its handshake.
    Established,
    /// The transport dropped or an attempt failed.
    Lost,
    /// The channel was torn down, rejected, or gave up.
    Close,
}

impl ChannelState {
    /// Returns the next state, or `None` if `transition` does not apply here.
    pub(crate) const fn next(self, transition: Transition) -> Option<Self> {
        match (self, transition) {
            (Self::Disconnected, Transition::Open) => Some(Self::Connecting),
            (Self::Connecting | Self::Reconnecting, Transition::Established) => {
                Some(Self::Connected)
            }
            (Self::Connecting | Self::Connected | Self::Reconnecting, Transition::Lost) => {
                Some(Self::Reconnecting)
            }
            (_, Transition::Close) => Some(Self::Disconnected),
            _ => None,
        }
    }

    /// Whether arriving in `Connected` from `self` closes a gap during which
    /// events may have been missed.
    pub(crate) const fn resumes_after_gap(self) -> bool {
        matches!(self, Self::Reconnecting)
    }
}
