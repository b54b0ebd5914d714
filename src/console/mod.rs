//! Console line ingestion and command/response correlation
//!
//! The node gives us free text, not replies. Everything here works on that
//! assumption: lines are buffered as they arrive and commands are resolved by
//! watching for the next line that looks like their answer.

pub mod ansi;
pub mod buffer;
pub mod correlator;
pub mod matcher;
pub mod patterns;

pub use buffer::{LogLine, LogRingBuffer};
pub use correlator::{Correlator, Outcome};
pub use matcher::{FnMatcher, SharedMatcher};
