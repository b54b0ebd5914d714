//! Panel authentication for the console socket

pub mod session;

pub use session::{AuthError, CredentialSource, Credentials, PanelSessionProvider};
