use crate::error::{Result, TrellisError};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// One node of a reconstructed group hierarchy.
///
/// `resources` holds direct members of exactly this path; descendants live in
/// `children` keyed by their last path segment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupNode {
    pub children: BTreeMap<String, GroupNode>,
    pub resources: BTreeSet<String>,
}

impl GroupNode {
    /// Walk (creating as needed) to the node at `segments` below this one.
    pub fn descend_mut<'a, I>(&mut self, segments: I) -> &mut GroupNode
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut node = self;
        for segment in segments {
            if segment.is_empty() {
                continue;
            }
            node = node.children.entry(segment.to_string()).or_default();
        }
        node
    }

    /// All resource ids in this node and every descendant.
    pub fn flatten(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        self.collect_into(&mut out);
        out
    }

    fn collect_into(&self, out: &mut BTreeSet<String>) {
        out.extend(self.resources.iter().cloned());
        for child in self.children.values() {
            child.collect_into(out);
        }
    }
}

/// `A/B/C` -> `A`, `A/B`, `A/B/C`
pub fn group_ancestors(path: &str) -> impl Iterator<Item = String> + '_ {
    let segments: Vec<&str> = path.split('/').collect();
    (1..=segments.len()).map(move |n| segments[..n].join("/"))
}

/// Parent path of `path`, or `None` for a top-level group.
pub fn parent_group(path: &str) -> Option<&str> {
    path.rfind('/').map(|idx| &path[..idx])
}

/// Reject paths that cannot name a group: empty, with an empty segment, or
/// containing a topic wildcard segment.
pub fn validate_group_path(path: &str) -> Result<()> {
    if path.is_empty() {
        return Err(TrellisError::InvalidState("group path is empty".into()));
    }
    for segment in path.split('/') {
        match segment {
            "" => {
                return Err(TrellisError::InvalidState(format!(
                    "group path {} has an empty segment",
                    path
                )))
            }
            "+" | "#" => {
                return Err(TrellisError::InvalidState(format!(
                    "group path {} contains wildcard segment {}",
                    path, segment
                )))
            }
            _ => {}
        }
    }
    Ok(())
}

/// Whether `candidate` is `path` itself or lies below it.
pub fn is_descendant_or_self(candidate: &str, path: &str) -> bool {
    candidate == path
        || (candidate.len() > path.len()
            && candidate.starts_with(path)
            && candidate.as_bytes()[path.len()] == b'/')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ancestors_and_parent() {
        let ancestors: Vec<String> = group_ancestors("A/B/C").collect();
        assert_eq!(ancestors, vec!["A", "A/B", "A/B/C"]);
        assert_eq!(parent_group("A/B/C"), Some("A/B"));
        assert_eq!(parent_group("A"), None);
    }

    #[test]
    fn test_descendant_check_respects_segments() {
        assert!(is_descendant_or_self("A/B", "A"));
        assert!(is_descendant_or_self("A", "A"));
        assert!(!is_descendant_or_self("AB", "A"));
        assert!(!is_descendant_or_self("A", "A/B"));
    }

    #[test]
    fn test_validate_group_path() {
        assert!(validate_group_path("A/B").is_ok());
        assert!(validate_group_path("").is_err());
        assert!(validate_group_path("A//B").is_err());
        assert!(validate_group_path("A/").is_err());
        assert!(validate_group_path("A/#").is_err());
    }

    #[test]
    fn test_flatten_collects_descendants() {
        let mut root = GroupNode::default();
        root.descend_mut(["A"]).resources.insert("r1".into());
        root.descend_mut(["A", "B"]).resources.insert("r2".into());
        root.descend_mut(["C"]).resources.insert("r3".into());

        assert_eq!(root.flatten().len(), 3);
        assert_eq!(
            root.children["A"].flatten().into_iter().collect::<Vec<_>>(),
            vec!["r1", "r2"]
        );
    }
}
