//! Key layout in the shared store
//!
//! Keys are `<namespace>.<segment>[.<segment>...]` with every variable
//! segment URL-safe base64 encoded, so a prefix scan can target one
//! dimension, one value or one group subtree.

use crate::error::{Result, TrellisError};
use crate::types::Dimension;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;

pub const RESOURCE_INDEX_PREFIX: &str = "trellis.resourceIndex";
pub const RESOURCE_GROUPS_PREFIX: &str = "trellis.resourceGroups";
pub const SUBSCRIBER_REGISTRY_PREFIX: &str = "trellis.subscriberRegistry";
pub const SUBSCRIPTION_INPUTS_PREFIX: &str = "trellis.subscriptionInputs";

pub fn encode_segment(segment: &str) -> String {
    URL_SAFE_NO_PAD.encode(segment.as_bytes())
}

pub fn decode_segment(encoded: &str) -> Result<String> {
    let bytes = URL_SAFE_NO_PAD
        .decode(encoded)
        .map_err(|e| TrellisError::Serialization(format!("bad key segment {}: {}", encoded, e)))?;
    String::from_utf8(bytes)
        .map_err(|e| TrellisError::Serialization(format!("bad key segment {}: {}", encoded, e)))
}

/// Keys of the replicated resource index
pub mod resource {
    use super::*;

    /// Prefix covering every resource with `dimension = value`.
    pub fn value_prefix(dimension: Dimension, value: &str) -> String {
        format!(
            "{}.{}.{}.",
            RESOURCE_INDEX_PREFIX,
            dimension.as_str(),
            encode_segment(value)
        )
    }

    /// Prefix covering every value of `dimension`.
    pub fn dimension_prefix(dimension: Dimension) -> String {
        format!("{}.{}.", RESOURCE_INDEX_PREFIX, dimension.as_str())
    }

    /// Membership marker for `resource_id` under `dimension = value`.
    pub fn marker(dimension: Dimension, value: &str, resource_id: &str) -> String {
        format!(
            "{}{}",
            value_prefix(dimension, value),
            encode_segment(resource_id)
        )
    }

    /// Canonical record of a resource (holds its properties as JSON).
    pub fn record(resource_id: &str) -> String {
        marker(Dimension::Id, resource_id, resource_id)
    }

    /// Resource id from the last segment of a marker key.
    pub fn resource_id_from_key(key: &str) -> Result<String> {
        match key.rsplit('.').next() {
            Some(segment) => decode_segment(segment),
            None => Err(TrellisError::Serialization(format!("bad index key {}", key))),
        }
    }
}

/// Keys of the group hierarchy
pub mod group {
    use super::*;

    /// Key of the root node.
    pub fn root() -> String {
        format!("{}.root", RESOURCE_GROUPS_PREFIX)
    }

    /// Key of the node at `path`; the empty path is the root.
    pub fn node(path: &str) -> String {
        if path.is_empty() {
            return root();
        }
        let mut key = root();
        for segment in path.split('/') {
            key.push('/');
            key.push_str(&encode_segment(segment));
        }
        key
    }

    /// Prefix covering strict descendants of `path`.
    pub fn descendants_prefix(path: &str) -> String {
        format!("{}/", node(path))
    }

    /// Path relative to `path` for a key found under its descendant prefix.
    pub fn relative_segments(path: &str, key: &str) -> Result<Vec<String>> {
        let prefix = descendants_prefix(path);
        let rest = key.strip_prefix(&prefix).ok_or_else(|| {
            TrellisError::Serialization(format!("{} is not below {}", key, prefix))
        })?;
        rest.split('/').map(decode_segment).collect()
    }
}

/// Keys of the replicated subscription registry
pub mod subscription {
    use super::*;

    /// Existence record of a subscription owned by `server_id`.
    pub fn log(server_id: &str, subscription_id: &str) -> String {
        format!(
            "{}.{}.{}",
            SUBSCRIBER_REGISTRY_PREFIX,
            encode_segment(server_id),
            encode_segment(subscription_id)
        )
    }

    /// Prefix covering every subscription fed by `input_key`.
    pub fn input_prefix(input_key: &str) -> String {
        format!(
            "{}.{}.",
            SUBSCRIPTION_INPUTS_PREFIX,
            encode_segment(input_key)
        )
    }

    pub fn input(input_key: &str, subscription_id: &str) -> String {
        format!(
            "{}{}",
            input_prefix(input_key),
            encode_segment(subscription_id)
        )
    }

    /// Subscription id from the last segment of a log or input key.
    pub fn subscription_id_from_key(key: &str) -> Result<String> {
        match key.rsplit('.').next() {
            Some(segment) => decode_segment(segment),
            None => Err(TrellisError::Serialization(format!(
                "bad subscription key {}",
                key
            ))),
        }
    }
}
