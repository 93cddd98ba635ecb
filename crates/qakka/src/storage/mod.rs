//! In-memory implementations of the storage traits.
//!
//! Each mirrors the wide-column layout the traits assume: rows held in
//! clustering order, counters as a plain map mutated under the lock. Used by
//! tests and single-process deployments; a real driver implements the same
//! traits against the database.

pub mod memory_message;
pub mod memory_queue;
pub mod memory_shard;
