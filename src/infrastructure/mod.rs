pub mod auth_provider;
pub mod catalog_repo;
pub mod config;
pub mod inference;
pub mod payments;
pub mod repository;
pub mod subscription_repo;

pub use auth_provider::*;
pub use catalog_repo::*;
pub use config::*;
pub use inference::*;
pub use payments::*;
pub use repository::*;
pub use subscription_repo::*;
