//! Distributed Multi-Tenant Cache Library
//!
//! This library crate defines the core modules of the cache node.
//! It serves as the foundation for the binary executable (`main.rs`).
//!
//! ## Architecture Modules
//! The system is composed of four loosely coupled subsystems:
//!
//! - **`cluster`**: topology layer. A consistent-hash ring with virtual
//!   nodes decides key ownership; membership is leader-driven (smallest id)
//!   with followers polling the leader's snapshot.
//! - **`cache`**: the in-memory state layer. Per-tenant stores with LRU
//!   eviction, TTL expiry, last-writer-wins conflict resolution, and JSON
//!   snapshot persistence.
//! - **`replication`**: best-effort asynchronous write propagation to
//!   successor nodes through a bounded queue and a fixed worker pool.
//! - **`server`**: request ingress. Owner-routed HTTP handlers with
//!   transparent forwarding, the internal replication sink, a local-only
//!   TCP line protocol, and node lifecycle management.

pub mod cache;
pub mod cluster;
pub mod replication;
pub mod server;
