//! Incremental graph matching agrees with full predicate evaluation

use proptest::prelude::*;
use trellis::prelude::*;

const IDS: [&str; 5] = ["r0", "r1", "r2", "r3", "r4"];
const TYPES: [&str; 2] = ["Light", "Switch"];
const INTERFACES: [&str; 3] = ["Power", "Dim", "Color"];
const GROUPS: [&str; 5] = ["A", "A/B", "A/B/C", "D", "D/E"];

#[derive(Debug, Clone)]
struct ResourceShape {
    registered: bool,
    resource_type: &'static str,
    interfaces: Vec<&'static str>,
    groups: Vec<&'static str>,
}

fn resource_shape() -> impl Strategy<Value = ResourceShape> {
    (
        prop::bool::weighted(0.8),
        prop::sample::select(TYPES.to_vec()),
        prop::sample::subsequence(INTERFACES.to_vec(), 0..=3),
        prop::sample::subsequence(GROUPS.to_vec(), 0..=2),
    )
        .prop_map(|(registered, resource_type, interfaces, groups)| ResourceShape {
            registered,
            resource_type,
            interfaces,
            groups,
        })
}

fn leaf() -> impl Strategy<Value = Predicate> {
    prop_oneof![
        prop::sample::select(IDS.to_vec()).prop_map(|id| Predicate::exact(Dimension::Id, id)),
        prop::sample::select(TYPES.to_vec()).prop_map(|t| Predicate::exact(Dimension::Type, t)),
        prop::sample::select(INTERFACES.to_vec())
            .prop_map(|i| Predicate::exact(Dimension::Interface, i)),
        prop::sample::select(GROUPS.to_vec()).prop_map(|g| Predicate::exact(Dimension::Group, g)),
        prop::sample::select(Dimension::ALL.to_vec()).prop_map(Predicate::any),
    ]
}

fn predicate() -> impl Strategy<Value = Predicate> {
    leaf().prop_recursive(4, 24, 2, |inner| {
        prop_oneof![
            (inner.clone(), inner.clone()).prop_map(|(left, right)| left.and(right)),
            (inner.clone(), inner).prop_map(|(left, right)| left.or(right)),
        ]
    })
}

/// `(resource, fired, expected)` for every id.
fn evaluate(resources: &[ResourceShape], predicate: &Predicate) -> Vec<(String, bool, bool)> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();

    runtime.block_on(async {
        let index = Arc::new(LocalResourceIndex::new());
        for (id, shape) in IDS.iter().zip(resources) {
            if !shape.registered {
                continue;
            }
            index
                .add_resource(&ResourceDescriptor::new(
                    *id,
                    shape.resource_type,
                    shape.interfaces.iter().copied(),
                ))
                .await
                .unwrap();
            for group in &shape.groups {
                index.join_group(id, group).await.unwrap();
            }
        }

        let registry = SubscriberRegistry::new(index);
        registry
            .subscribe("s", &predicate.to_string(), "e", false)
            .unwrap();

        let mut results = Vec::new();
        for id in IDS {
            let fired = !registry.get_subscribers(id, "e").await.unwrap().is_empty();
            let expected = registry.is_in_selection(id, predicate).await.unwrap();
            results.push((id.to_string(), fired, expected));
        }
        results
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn graph_match_equals_is_in_selection(
        resources in prop::collection::vec(resource_shape(), IDS.len()),
        predicate in predicate(),
    ) {
        for (id, fired, expected) in evaluate(&resources, &predicate) {
            prop_assert_eq!(fired, expected, "resource {} predicate {}", id, predicate);
        }
    }

    #[test]
    fn display_parses_back(predicate in predicate()) {
        prop_assert_eq!(parse(&predicate.to_string()).unwrap(), predicate);
    }
}

#[test]
fn test_or_under_and_does_not_fire_alone() {
    let resources = vec![
        ResourceShape {
            registered: true,
            resource_type: "Light",
            interfaces: vec!["Power"],
            groups: vec![],
        };
        IDS.len()
    ];
    let predicate = parse(r#"(type="Light" or interface="Power") and group="A""#).unwrap();
    for (id, fired, expected) in evaluate(&resources, &predicate) {
        assert!(!expected, "{id}");
        assert!(!fired, "{id}");
    }
}
