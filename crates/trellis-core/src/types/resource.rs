use super::group::group_ancestors;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A set of resource ids
pub type ResourceSet = BTreeSet<String>;

/// What a resource declares when it registers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceDescriptor {
    pub id: String,
    #[serde(rename = "type")]
    pub resource_type: String,
    #[serde(default)]
    pub interfaces: Vec<String>,
}

impl ResourceDescriptor {
    pub fn new(
        id: impl Into<String>,
        resource_type: impl Into<String>,
        interfaces: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            id: id.into(),
            resource_type: resource_type.into(),
            interfaces: interfaces.into_iter().map(Into::into).collect(),
        }
    }
}

/// The indexed view of a resource: its type, interfaces and the group paths
/// it joined explicitly
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ResourceProperties {
    #[serde(rename = "type")]
    pub resource_type: String,
    #[serde(default)]
    pub interfaces: Vec<String>,
    #[serde(default)]
    pub groups: BTreeSet<String>,
}

impl ResourceProperties {
    pub fn from_descriptor(descriptor: &ResourceDescriptor) -> Self {
        Self {
            resource_type: descriptor.resource_type.clone(),
            interfaces: descriptor.interfaces.clone(),
            groups: BTreeSet::new(),
        }
    }

    /// Every joined group plus all of its ancestor paths.
    ///
    /// Membership in `A/B/C` makes the resource visible to queries on `A` and
    /// `A/B`, so matching has to consider each prefix.
    pub fn expanded_groups(&self) -> BTreeSet<String> {
        self.groups
            .iter()
            .flat_map(|group| group_ancestors(group))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expanded_groups_dedup() {
        let properties = ResourceProperties {
            resource_type: "Light".into(),
            interfaces: vec!["Power".into()],
            groups: ["A/B/C".to_string(), "A/D".to_string()].into_iter().collect(),
        };

        let expanded: Vec<String> = properties.expanded_groups().into_iter().collect();
        assert_eq!(expanded, vec!["A", "A/B", "A/B/C", "A/D"]);
    }

    #[test]
    fn test_properties_json_shape() {
        let properties = ResourceProperties::from_descriptor(&ResourceDescriptor::new(
            "dev1",
            "Light",
            ["Power"],
        ));
        let json = serde_json::to_value(&properties).unwrap();
        assert_eq!(json["type"], "Light");
        assert_eq!(json["interfaces"][0], "Power");
        assert!(json["groups"].as_array().unwrap().is_empty());
    }
}
