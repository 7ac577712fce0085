//! Session management: a local hot cache over a TTL'd key-value store.
//!
//! Sessions are cached per process for hot access and serialized to the
//! store as canonical JSON so horizontal replicas can observe them and
//! orphaned entries expire automatically. For a given session id, mutation
//! is single-owner (the orchestrator that created it); the manager itself is
//! a shared resource and serializes writes per session, last-writer-wins.

pub mod kv;
pub mod store;

pub use kv::{KeyValueStore, MemoryKv};
pub use store::SessionManager;
