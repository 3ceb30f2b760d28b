//! In-process shared store for Trellis
//!
//! Implements [`SharedStore`] over an ordered map. It models the parts of an
//! eventually-consistent store that the index and registry depend on:
//! - Causal contexts: every write bumps a per-key version
//! - Siblings: a blind write to an existing key keeps the old values
//! - Conflicts: a write against a stale context is rejected
//! - Atomic batches and ordered prefix scans
//!
//! Several nodes sharing one `Arc<MemoryStore>` see each other's writes
//! immediately, which is the simplest consistent replica of the real thing.
//! Batch failures can be injected to exercise partial-write paths.

mod store;

pub use store::MemoryStore;
