//! Trellis Registry: who wants which event from which resource
//!
//! Selections are compiled once into a [`SelectionGraph`] whose source
//! vertices are keyed by input strings such as `type="Light"`. Matching a
//! resource means computing the input keys it produces and walking the
//! graphs that listen on them, without re-evaluating any predicate.
//!
//! - [`SubscriberRegistry`]: subscriptions of this process
//! - [`ReplicatedSubscriberRegistry`]: persists subscriptions to the shared
//!   store and answers which other servers want an event
//! - [`CloudSubscriberRegistry`]: graphs pushed from the cloud
//! - [`ResourceSelector`]: one-shot evaluation of arbitrary selections,
//!   negation included

pub mod cloud;
pub mod graph;
pub mod local;
pub mod replicated;
pub mod selector;
pub mod subscription;

pub use cloud::{CloudSubscriberRegistry, CLOUD_SUBSCRIBER};
pub use graph::{LogicKind, LogicNode, SelectionGraph, SourceNode, VertexId};
pub use local::SubscriberRegistry;
pub use replicated::{Reachability, RemoteCacheKey, ReplicatedSubscriberRegistry};
pub use selector::{is_in_selection, ResourceSelector};
pub use subscription::{Subscription, SubscriptionTable};
