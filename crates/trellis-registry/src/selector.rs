//! Brute-force selection evaluation
//!
//! Evaluates a full predicate tree, negation included, directly against a
//! resource index. Used for one-shot queries and as the reference answer for
//! the incremental graph matcher.

use futures::future::{BoxFuture, FutureExt};
use std::sync::Arc;
use trellis_core::{parse, Dimension, Predicate, ResourceSet, Result};
use trellis_index::ResourceIndex;

/// Whether `resource_id` satisfies `predicate`.
///
/// AND and OR short-circuit left to right. `id="x"` compares ids without a
/// lookup and `id=*` holds for every id, matching the inputs the registry
/// derives for a resource.
pub fn is_in_selection<'a>(
    index: &'a dyn ResourceIndex,
    resource_id: &'a str,
    predicate: &'a Predicate,
) -> BoxFuture<'a, Result<bool>> {
    async move {
        match predicate {
            Predicate::And(left, right) => {
                Ok(is_in_selection(index, resource_id, left).await?
                    && is_in_selection(index, resource_id, right).await?)
            }
            Predicate::Or(left, right) => {
                Ok(is_in_selection(index, resource_id, left).await?
                    || is_in_selection(index, resource_id, right).await?)
            }
            Predicate::Not(operand) => Ok(!is_in_selection(index, resource_id, operand).await?),
            Predicate::Exact {
                dimension: Dimension::Id,
                value,
            } => Ok(value == resource_id),
            Predicate::Any {
                dimension: Dimension::Id,
            } => Ok(true),
            Predicate::Exact { dimension, value } => Ok(index
                .get_resources(*dimension, Some(value.as_str()))
                .await?
                .contains(resource_id)),
            Predicate::Any { dimension } => Ok(index
                .get_resources(*dimension, None)
                .await?
                .contains(resource_id)),
        }
    }
    .boxed()
}

/// Set-algebra evaluation of selections over a resource index
pub struct ResourceSelector {
    index: Arc<dyn ResourceIndex>,
}

impl ResourceSelector {
    pub fn new(index: Arc<dyn ResourceIndex>) -> Self {
        Self { index }
    }

    /// Parse and evaluate a selection string.
    pub async fn select(&self, selection: &str) -> Result<ResourceSet> {
        let predicate = parse(selection)?;
        self.evaluate(&predicate).await
    }

    /// AND intersects, OR unites, NOT complements against every known
    /// resource, and leaves are dimension queries.
    pub fn evaluate<'a>(&'a self, predicate: &'a Predicate) -> BoxFuture<'a, Result<ResourceSet>> {
        async move {
            match predicate {
                Predicate::And(left, right) => {
                    let (left, right) =
                        futures::try_join!(self.evaluate(left), self.evaluate(right))?;
                    Ok(left.intersection(&right).cloned().collect())
                }
                Predicate::Or(left, right) => {
                    let (mut left, right) =
                        futures::try_join!(self.evaluate(left), self.evaluate(right))?;
                    left.extend(right);
                    Ok(left)
                }
                Predicate::Not(operand) => {
                    let (all, excluded) = futures::try_join!(
                        self.index.get_resources(Dimension::Id, None),
                        self.evaluate(operand)
                    )?;
                    Ok(all.difference(&excluded).cloned().collect())
                }
                Predicate::Exact { dimension, value } => {
                    self.index.get_resources(*dimension, Some(value.as_str())).await
                }
                Predicate::Any { dimension } => self.index.get_resources(*dimension, None).await,
            }
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trellis_core::ResourceDescriptor;
    use trellis_index::LocalResourceIndex;

    fn ids(items: &[&str]) -> ResourceSet {
        items.iter().map(|s| s.to_string()).collect()
    }

    async fn index() -> Arc<LocalResourceIndex> {
        let index = Arc::new(LocalResourceIndex::new());
        for (id, resource_type, interfaces) in [
            ("dev1", "Light", vec!["Power"]),
            ("dev2", "Light", vec!["Power", "Dim"]),
            ("dev3", "Sensor", vec![]),
        ] {
            index
                .add_resource(&ResourceDescriptor::new(id, resource_type, interfaces))
                .await
                .unwrap();
        }
        index.join_group("dev1", "A/B").await.unwrap();
        index.join_group("dev3", "A").await.unwrap();
        index
    }

    #[tokio::test]
    async fn test_select_set_algebra() {
        let selector = ResourceSelector::new(index().await);

        assert_eq!(
            selector.select(r#"type="Light""#).await.unwrap(),
            ids(&["dev1", "dev2"])
        );
        assert_eq!(
            selector
                .select(r#"type="Light" and group="A""#)
                .await
                .unwrap(),
            ids(&["dev1"])
        );
        assert_eq!(
            selector
                .select(r#"interface="Dim" or type="Sensor""#)
                .await
                .unwrap(),
            ids(&["dev2", "dev3"])
        );
        assert_eq!(
            selector.select(r#"not group="A""#).await.unwrap(),
            ids(&["dev2"])
        );
        assert_eq!(
            selector.select("group=*").await.unwrap(),
            ids(&["dev1", "dev3"])
        );
        assert!(selector.select("type=").await.is_err());
    }

    #[tokio::test]
    async fn test_is_in_selection() {
        let index = index().await;
        let check = |selection: &'static str, resource: &'static str| {
            let index = index.clone();
            async move {
                let predicate = parse(selection).unwrap();
                is_in_selection(index.as_ref(), resource, &predicate)
                    .await
                    .unwrap()
            }
        };

        assert!(check(r#"type="Light" and group="A""#, "dev1").await);
        assert!(!check(r#"type="Light" and group="A""#, "dev2").await);
        assert!(check(r#"not group="A""#, "dev2").await);
        assert!(check(r#"id="ghost""#, "ghost").await);
        assert!(check("interface=*", "dev3").await);
        assert!(!check("group=*", "dev2").await);
    }

    #[tokio::test]
    async fn test_long_id_list() {
        let index = index().await;
        let selector = ResourceSelector::new(index.clone());
        let mut terms: Vec<String> = (0..20_000).map(|i| format!(r#"id="x{}""#, i)).collect();
        terms.push(r#"id="dev3""#.to_string());
        let selection = terms.join(" or ");

        assert_eq!(selector.select(&selection).await.unwrap(), ids(&["dev3"]));
        let predicate = parse(&selection).unwrap();
        assert!(is_in_selection(index.as_ref(), "dev3", &predicate)
            .await
            .unwrap());
        assert!(!is_in_selection(index.as_ref(), "dev1", &predicate)
            .await
            .unwrap());
    }
}
