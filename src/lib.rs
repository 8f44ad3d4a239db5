//! # Query Node
//!
//! Answers natural-language queries against encrypted files held in an
//! external data registry.
//!
//! A query names a registry file by id or URL. On first use the node fetches
//! its permission grant, decrypts the content through the decryption
//! gateway, chunks it and caches the fragments in a collection keyed by the
//! file's content hash. Later queries for the same content are served from
//! that collection.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────────┐   ┌────────────────────┐
//! │   HTTP   │──▶│   Resolver   │──▶│ Registry / Decrypt │
//! │  (axum)  │   │ (core crate) │   │   (HTTP gateways)  │
//! └──────────┘   └──────┬───────┘   └────────────────────┘
//!                       ▼
//!               ┌───────────────┐
//!               │ SQLite (FTS5) │
//!               │  or memory    │
//!               └───────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`logging`] | Tracing subscriber setup |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`sqlite_store`] | Durable collection store |
//! | [`backend`] | Store selection with in-memory fallback |
//! | [`registry`] | Registry gateway client |
//! | [`decrypt`] | Decryption gateway client |
//! | [`server`] | HTTP server |

pub mod backend;
pub mod config;
pub mod db;
pub mod decrypt;
pub mod logging;
pub mod migrate;
pub mod registry;
pub mod server;
pub mod sqlite_store;
