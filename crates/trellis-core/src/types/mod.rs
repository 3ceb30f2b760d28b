pub mod dimension;
pub mod group;
pub mod resource;

pub use dimension::Dimension;
pub use group::{
    group_ancestors, is_descendant_or_self, parent_group, validate_group_path, GroupNode,
};
pub use resource::{ResourceDescriptor, ResourceProperties, ResourceSet};
