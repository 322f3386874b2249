//! # Property-Based Tests
//!
//! Conflict detection and stage transitions checked over generated inputs.

use proptest::collection::{btree_map, vec};
use proptest::prelude::*;
use stagehand_core::{
    BundleError, BundleRecord, BundleRegistry, InMemoryEngine, InMemoryPackageReader,
    PackageContents, Stage, Transition, activator_fn,
};
use std::collections::BTreeSet;
use std::sync::Arc;

const NAMES: [&str; 2] = ["org.alpha", "org.beta"];
const CLASSES: [&str; 3] = ["pkg/A.class", "pkg/B.class", "pkg/C.class"];

fn setup() -> (BundleRegistry, Arc<InMemoryPackageReader>) {
    let reader = Arc::new(InMemoryPackageReader::new());
    let engine = Arc::new(InMemoryEngine::new(reader.clone()));
    engine.register_activator("noop", activator_fn(|_| Ok(())));
    let registry = BundleRegistry::new(engine, reader.clone()).expect("attach");
    (registry, reader)
}

fn step(record: &Arc<BundleRecord>, transition: Transition) -> Result<Option<Arc<BundleRecord>>, BundleError> {
    match transition {
        Transition::Install => record.install().map(Some),
        Transition::Start => record.start().map(Some),
        Transition::Stop => record.stop().map(Some),
        Transition::Uninstall => record.uninstall().map(Some),
        Transition::Unregister => record.unregister().map(|()| None),
    }
}

// =============================================================================
// PROPERTY TESTS
// =============================================================================

proptest! {
    /// Conflicts are symmetric and name exactly the differing shared classes.
    #[test]
    fn conflicts_symmetric_and_exact(
        bundles in vec((0usize..2, btree_map(0usize..3, 0u8..2, 0..3)), 2..6)
    ) {
        let (registry, reader) = setup();
        let mut records = Vec::new();
        for (i, (name, classes)) in bundles.iter().enumerate() {
            let origin = format!("mem://bundle/{i}");
            let contents = classes.iter().fold(
                PackageContents::new().with_descriptor(NAMES[*name], "1.0.0", "noop"),
                |contents, (class, body)| contents.with_class_bytes(CLASSES[*class], &[*body]),
            );
            reader.insert(origin.as_str(), contents);
            records.push(registry.register(origin).expect("register"));
        }

        for (i, subject) in records.iter().enumerate() {
            let conflicts = subject.conflicts().expect("live");
            prop_assert!(conflicts.iter().all(|c| c.record().id() != subject.id()));

            for (j, other) in records.iter().enumerate() {
                if i == j {
                    continue;
                }
                let expected: BTreeSet<String> = bundles[i]
                    .1
                    .iter()
                    .filter(|(class, body)| bundles[j].1.get(*class).is_some_and(|b| b != *body))
                    .map(|(class, _)| CLASSES[*class].to_string())
                    .collect();
                let same_name = bundles[i].0 == bundles[j].0;

                let found = conflicts.iter().find(|c| c.record().id() == other.id());
                match found {
                    Some(conflict) => {
                        prop_assert_eq!(conflict.classes(), &expected);
                        prop_assert_eq!(conflict.is_symbolic_name_conflict(), same_name);
                    }
                    None => prop_assert!(expected.is_empty() && !same_name),
                }

                let mirrored = other
                    .conflicts()
                    .expect("live")
                    .iter()
                    .any(|c| c.record().id() == subject.id());
                prop_assert_eq!(found.is_some(), mirrored);
            }
        }
    }

    /// Arbitrary transition sequences: legal steps replace in place, illegal
    /// steps change nothing.
    #[test]
    fn random_walk_keeps_slot(steps in vec(0usize..5, 1..30)) {
        let (registry, reader) = setup();
        for origin in ["mem://anchor", "mem://walker"] {
            reader.insert(origin, PackageContents::new().with_descriptor(origin, "1.0.0", "noop"));
        }
        registry.register("mem://anchor").expect("anchor");
        let mut current = registry.register("mem://walker").expect("walker");

        for index in steps {
            let transition = Transition::ALL[index];
            let stage = current.stage().expect("current is live");
            let result = step(&current, transition);

            if transition.source() == stage {
                let next = result.expect("legal transition");
                let expiration = current.expiration().expect("source expired");
                prop_assert_eq!(expiration.previous_stage(), stage);
                prop_assert_eq!(expiration.new_stage(), transition.target());
                match next {
                    Some(replacement) => {
                        prop_assert_eq!(replacement.index().expect("live"), 1);
                        prop_assert_eq!(replacement.stage().expect("live"), transition.target());
                        current = replacement;
                    }
                    None => {
                        prop_assert_eq!(transition.target(), Stage::Unregistered);
                        prop_assert_eq!(registry.list_active().len(), 1);
                        break;
                    }
                }
            } else {
                let err = result.expect_err("illegal transition");
                let is_stage_violation = matches!(err.root_cause(), BundleError::StageViolation { .. });
                prop_assert!(is_stage_violation);
                prop_assert!(!current.is_expired());
                prop_assert_eq!(current.index().expect("live"), 1);
            }
        }
    }
}
