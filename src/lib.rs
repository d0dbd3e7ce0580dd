//! # scrim-gateway
//!
//! Match orchestration for pick-up and league game servers.
//!
//! The gateway leases servers from a hosting provider, boots them with a
//! fresh login token, resolves teams and captains, tracks live scoreboards
//! and ratings, and archives the recorded demo once a match ends. League
//! subscribers are notified of lifecycle events over signed webhooks.
//!
//! ## Architecture
//!
//! ```text
//! Operators (HTTP)
//!     │
//!     ├── REST Handlers (api/) ── SSE league events ◄── EventBus
//!     │
//!     ├── MatchService (service/)
//!     │     ├── LeaseManager ── GameServerControl, TokenIssuer (control/)
//!     │     ├── DemoPipeline ── ObjectStorage (storage/)
//!     │     ├── EventDispatcher ── webhooks + EventBus (domain/)
//!     │     └── TaskQueue (background jobs)
//!     │
//!     └── PostgreSQL or in-memory persistence (persistence/)
//! ```

pub mod api;
pub mod app_state;
pub mod config;
pub mod control;
pub mod domain;
pub mod error;
pub mod persistence;
pub mod service;
pub mod storage;

#[cfg(test)]
mod testing;
