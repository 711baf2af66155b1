//! Persona Chat
//!
//! Token-metered chat with a single AI persona: a durable and a fast
//! message-send path, subscription webhooks that top up token balances, and a
//! client-side thread cache with optimistic sends.
//!
//! ## Standalone
//!
//! Run the binary:
//! ```bash
//! persona-chat-server
//! ```
//!
//! ## Embedded (Axum)
//!
//! When the `server` feature is enabled, this crate can be embedded into a larger Axum app:
//! ```rust,ignore
//! use axum::Router;
//! use persona_chat::infrastructure::AppConfig;
//! use persona_chat::server::{build_state_with_pool, router};
//! use sqlx::PgPool;
//!
//! let cfg = AppConfig::from_env()?;
//! let pool = PgPool::connect(&cfg.database_url).await?;
//! let state = build_state_with_pool(cfg, pool, true).await?;
//! let app = Router::new().nest("/chat", router(state));
//! ```

pub mod application;
pub mod client;
pub mod domain;
pub mod infrastructure;

// Standalone + embedded HTTP server support (Axum).
// Enabled behind the `server` feature so the core library can be used without Axum.
#[cfg(feature = "server")]
pub mod server;

pub use application::*;
pub use domain::*;
pub use infrastructure::*;
