/// Peripheral connection lifecycle as the session classifies it.
///
/// `Disconnected` means the peer acknowledged a close we asked for; `Lost`
/// means the link dropped without a local disconnect request; `Failed` means
/// a connect attempt never reached `Connected`.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Connected,
    Disconnecting,
    Disconnected,
    Lost,
    Failed,
}

impl ConnectionState {
    /// States that end the current session; a fresh `connect()` starts over.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ConnectionState::Disconnected | ConnectionState::Lost | ConnectionState::Failed
        )
    }

    pub fn is_connected(self) -> bool {
        self == ConnectionState::Connected
    }
}
