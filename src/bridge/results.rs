use serde::Serialize;

use crate::console::patterns::PlayerSnapshot;
use crate::websocket::ConnectionState;

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum BridgeError {
    #[error("console command is empty")]
    EmptyCommand,
    #[error("console command must be a single line")]
    MultiLineCommand,
}

#[derive(Debug, Clone, PartialEq)]
pub enum WhitelistAdd {
    Added,
    AlreadyPresent,
    Failed(String),
    /// No answer in time; the player may or may not have been added
    Timeout,
    ConnectionLost,
}

#[derive(Debug, Clone, PartialEq)]
pub enum WhitelistRemove {
    Removed,
    NotPresent,
    Failed(String),
    Timeout,
    ConnectionLost,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PlayerList {
    Players(PlayerSnapshot),
    Unavailable(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Diagnostics {
    pub state: ConnectionState,
    pub buffered_lines: usize,
    pub pending_commands: usize,
    pub ambiguous_matches: u64,
    pub pattern_version: &'static str,
}
