//! # Query Node Core
//!
//! Shared logic for the private data query node: data models, the error
//! taxonomy, chunking, the collection store abstraction, the external
//! collaborator traits, and the [`resolver::Resolver`] that ties them
//! together.
//!
//! This crate performs no network or SQL I/O itself. Concrete registry,
//! decryption and durable-store implementations live in the `query-node`
//! application crate.
//!
//! ```text
//!  QueryRequest ──▶ Resolver ──▶ Registry ──▶ Decryptor ──▶ Chunker
//!                      │                                      │
//!                      └──────────── CollectionStore ◀────────┘
//! ```

pub mod chunk;
pub mod error;
pub mod flight;
pub mod gateway;
pub mod locks;
pub mod models;
pub mod resolver;
pub mod store;

pub use error::{KeyRejected, QueryError, Stage};
pub use resolver::{Resolver, ResolverSettings};
