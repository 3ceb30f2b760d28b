//! Contract of the shared, eventually-consistent key/value store
//!
//! The store is an external collaborator. Values are strings; a key may hold
//! several concurrently written siblings that readers merge. Writes that
//! supersede a read carry the read's causal [`Context`].

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Opaque causal-version token returned by reads
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Context(String);

impl Context {
    /// Context for a blind write that supersedes nothing.
    pub fn empty() -> Self {
        Self(String::new())
    }

    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Value of one key: its siblings plus the context to write against
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreValue {
    pub siblings: Vec<String>,
    pub context: Context,
}

/// One result of a prefix scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreEntry {
    pub key: String,
    pub value: StoreValue,
}

/// A write inside a batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOp {
    Put {
        key: String,
        value: String,
        context: Context,
    },
    Delete {
        key: String,
        context: Context,
    },
}

impl BatchOp {
    pub fn put(key: impl Into<String>, value: impl Into<String>, context: Context) -> Self {
        BatchOp::Put {
            key: key.into(),
            value: value.into(),
            context,
        }
    }

    pub fn delete(key: impl Into<String>) -> Self {
        BatchOp::Delete {
            key: key.into(),
            context: Context::empty(),
        }
    }

    pub fn key(&self) -> &str {
        match self {
            BatchOp::Put { key, .. } | BatchOp::Delete { key, .. } => key,
        }
    }
}

/// Shared store used by the replicated index and registry
///
/// Batches are all-or-nothing. Nothing here retries; `Conflict` and `Store`
/// errors go straight back to the caller.
#[async_trait]
pub trait SharedStore: Send + Sync {
    /// Read several keys; `None` for keys without any sibling.
    async fn get(&self, keys: &[String]) -> Result<Vec<Option<StoreValue>>>;

    /// Write one key against `context`.
    async fn put(&self, key: &str, value: &str, context: &Context) -> Result<()>;

    /// Apply all operations atomically.
    async fn batch(&self, ops: Vec<BatchOp>) -> Result<()>;

    /// All live entries whose key starts with `prefix`, in key order.
    async fn get_matches(&self, prefix: &str) -> Result<Vec<StoreEntry>>;

    /// Remove one key.
    async fn delete(&self, key: &str, context: &Context) -> Result<()>;

    /// Read a single key.
    async fn get_one(&self, key: &str) -> Result<Option<StoreValue>> {
        let mut values = self.get(&[key.to_string()]).await?;
        Ok(values.pop().flatten())
    }
}
