//! Asynchronous Replication Module
//!
//! After a primary applies a write locally, copies are pushed to successor
//! nodes in the background. The client's acknowledgement is bound to the
//! local apply, never to replica confirmation.
//!
//! ## Core Mechanisms
//! - **Bounded Queue**: producers hand tasks to a fixed-capacity channel and
//!   never block; overflow drops the task with a warning.
//! - **Worker Pool**: a fixed number of long-running consumers deliver tasks
//!   over HTTP with a per-attempt deadline.
//! - **Bounded Retries**: failed deliveries back off for a fixed pause and
//!   retry a limited number of times, then the task is dropped. Convergence
//!   relies on last-writer-wins at the receivers, not on reliable delivery.

pub mod pipeline;
pub mod protocol;

#[cfg(test)]
mod tests;
