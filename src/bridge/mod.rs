pub mod facade;
pub mod results;

pub use facade::Bridge;
pub use results::{PlayerList, WhitelistAdd, WhitelistRemove};
