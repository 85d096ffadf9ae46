//! Property tests for repeated and reordered reconciliation passes.

use std::sync::Arc;

use cmsync_api::{ConfigMapSync, ConfigMapSyncSpec, ObjectKey};
use cmsync_reconciler::{
    InMemoryDeclarationStore, InMemoryResourceStore, Reconciler, ReconcilerConfig, ResourceData,
    SyncAction,
};
use proptest::prelude::*;

/// Test helper: Unwrap a Result or panic with context
fn unwrap_result<T, E: std::fmt::Display>(result: std::result::Result<T, E>, context: &str) -> T {
    match result {
        Ok(value) => value,
        Err(e) => panic!("{}: {}", context, e),
    }
}

fn runtime() -> tokio::runtime::Runtime {
    unwrap_result(
        tokio::runtime::Builder::new_current_thread().build(),
        "runtime creation should succeed",
    )
}

fn resource_data() -> impl Strategy<Value = ResourceData> {
    prop::collection::btree_map("[a-z][a-z0-9_.-]{0,11}", ".{0,24}", 0..8)
}

struct World {
    declarations: Arc<InMemoryDeclarationStore>,
    resources: Arc<InMemoryResourceStore>,
    reconciler: Reconciler,
    key: ObjectKey,
}

async fn world(source: ResourceData, destination: Option<ResourceData>) -> World {
    let declarations = Arc::new(InMemoryDeclarationStore::new());
    let resources = Arc::new(InMemoryResourceStore::new());
    let reconciler = Reconciler::new(
        declarations.clone(),
        resources.clone(),
        ReconcilerConfig::default(),
    );

    let mut sync = ConfigMapSync::new("mirror", ConfigMapSyncSpec::new("src", "dst", "settings"));
    sync.metadata.namespace = Some("ops".into());
    let key = match declarations.apply(sync).await {
        Some(key) => key,
        None => panic!("declaration should be addressable"),
    };

    resources.put(ObjectKey::new("src", "settings"), source).await;
    if let Some(existing) = destination {
        resources.put(ObjectKey::new("dst", "settings"), existing).await;
    }

    World {
        declarations,
        resources,
        reconciler,
        key,
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Property: After any pass the destination holds exactly the source's
    /// data, and a second pass issues no write.
    #[test]
    fn prop_repeated_pass_is_noop(
        source in resource_data(),
        destination in prop::option::of(resource_data()),
    ) {
        let rt = runtime();
        rt.block_on(async {
            let w = world(source.clone(), destination).await;

            unwrap_result(w.reconciler.reconcile(&w.key).await, "first pass should succeed");
            let after_first = w.resources.data(&ObjectKey::new("dst", "settings")).await;
            let writes = w.resources.write_count();

            let second = unwrap_result(w.reconciler.reconcile(&w.key).await, "second pass should succeed");
            let after_second = w.resources.data(&ObjectKey::new("dst", "settings")).await;

            prop_assert_eq!(after_first.as_ref(), Some(&source));
            prop_assert_eq!(after_second, after_first);
            prop_assert_eq!(second.action(), Some(SyncAction::Unchanged));
            prop_assert_eq!(w.resources.write_count(), writes);
            prop_assert!(w.declarations.status(&w.key).await.is_some());
            Ok(())
        })?;
    }

    /// Property: Equality is over the key/value mapping, not insertion order,
    /// so a destination built in any order from the same pairs is left alone.
    #[test]
    fn prop_equal_content_in_any_order_is_unchanged(
        pairs in prop::collection::vec(("[a-z]{1,6}", "[a-z0-9]{0,6}"), 0..10),
    ) {
        let source: ResourceData = pairs.into_iter().collect();
        let reversed: ResourceData = source
            .iter()
            .rev()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        let rt = runtime();
        rt.block_on(async {
            let w = world(source.clone(), Some(reversed)).await;

            let outcome = unwrap_result(w.reconciler.reconcile(&w.key).await, "pass should succeed");

            prop_assert_eq!(outcome.action(), Some(SyncAction::Unchanged));
            prop_assert_eq!(w.resources.write_count(), 0);
            Ok(())
        })?;
    }
}
