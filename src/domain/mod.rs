pub mod conversation;
pub mod influencer;
pub mod message;
pub mod plan;
pub mod subscription;
pub mod user;

pub use conversation::*;
pub use influencer::*;
pub use message::*;
pub use plan::*;
pub use subscription::*;
pub use user::*;
