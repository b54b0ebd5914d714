//! Client side of the Wings console websocket
//!
//! The node speaks the same `{"event", "args"}` JSON the panel's browser
//! console uses.
//!
//! ### Inbound (node -> bridge)
//! - `auth success` - token accepted
//! - `console output` - one or more console lines
//! - `token expiring` / `token expired` - JWT lifetime notices
//! - `jwt error` - token rejected
//! - `status`, `stats`, `daemon message`, `daemon error` - logged only
//!
//! ### Outbound (bridge -> node)
//! - `auth` - JWT from the panel
//! - `send command` - console command for the server process

pub mod backoff;
pub mod machine;
pub mod protocol;
pub mod state;
#[cfg(test)]
pub mod testutil;

pub use machine::ConnectionStateMachine;
pub use state::ConnectionState;
