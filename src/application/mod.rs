pub mod accounts;
pub mod billing;
pub mod chat;

pub use accounts::*;
pub use billing::*;
pub use chat::*;
