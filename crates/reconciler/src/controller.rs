//! Wires the reconciler to Kubernetes watch events.
//!
//! `kube::runtime::Controller` supplies per-identity serialization and
//! deduplication: a declaration is never reconciled by two workers at once,
//! and bursts of events for one declaration collapse into a single pass.
//!
//! Declarations only trigger a pass when their generation changes. Status
//! writes leave the generation alone, so recording a sync never re-triggers.

use std::sync::Arc;
use std::time::Duration;

use cmsync_api::{ConfigMapSync, ObjectKey, TypeRegistry};
use futures::StreamExt;
use itertools::Itertools;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::runtime::controller::{self, Action, Controller};
use kube::runtime::reflector::{self, ObjectRef};
use kube::runtime::{WatchStreamExt, predicates, watcher};
use kube::{Api, Client, ResourceExt};
use tracing::{debug, info, warn};

use crate::backoff::RequeueBackoff;
use crate::config::ControllerConfig;
use crate::error::{Error, Result};
use crate::kube_store::{KubeConfigMapAccessor, KubeDeclarationStore};
use crate::reconciler::Reconciler;
use crate::types::RequeueDecision;

/// State shared by every reconciliation pass.
pub struct Context {
    reconciler: Reconciler,
    backoff: RequeueBackoff,
    resync_interval: Duration,
}

impl Context {
    /// Create a context around `reconciler`.
    pub fn new(reconciler: Reconciler, config: &ControllerConfig) -> Self {
        Self {
            reconciler,
            backoff: RequeueBackoff::new(config.backoff.clone()),
            resync_interval: config.resync_interval,
        }
    }

    /// Get the reconciler.
    pub const fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    /// Get the failure tracker.
    pub const fn backoff(&self) -> &RequeueBackoff {
        &self.backoff
    }

    fn action_for(&self, decision: RequeueDecision) -> Action {
        match decision {
            RequeueDecision::AwaitChange => Action::await_change(),
            RequeueDecision::Resync => Action::requeue(self.resync_interval),
            RequeueDecision::Backoff(delay) => Action::requeue(delay),
        }
    }
}

/// Run one pass for `declaration` and decide when to look at it again.
///
/// # Errors
///
/// Returns the reconciler's error; [`error_policy`] turns it into a requeue.
pub async fn reconcile(declaration: Arc<ConfigMapSync>, ctx: Arc<Context>) -> Result<Action> {
    let key = ObjectKey::of(declaration.as_ref()).ok_or_else(|| Error::Unaddressable {
        name: declaration.name_any(),
    })?;

    let outcome = ctx.reconciler.reconcile(&key).await?;
    ctx.backoff.reset(&key);
    Ok(ctx.action_for(outcome.requeue()))
}

/// Requeue a failed declaration after its backoff delay.
pub fn error_policy(declaration: Arc<ConfigMapSync>, error: &Error, ctx: Arc<Context>) -> Action {
    let Some(key) = ObjectKey::of(declaration.as_ref()) else {
        warn!(name = %declaration.name_any(), error = %error, "Ignoring declaration without namespace");
        return Action::await_change();
    };

    let delay = ctx.backoff.record_failure(&key);
    warn!(
        declaration = %key,
        reason = error.reason(),
        error = %error,
        retry_in = ?delay,
        "Reconciliation failed, requeueing with backoff"
    );
    ctx.action_for(RequeueDecision::Backoff(delay))
}

/// Declarations that read from or write to `config_map`.
///
/// A change to a source propagates the new data; a change to a destination
/// repairs drift.
pub fn declarations_for_config_map(
    declarations: &[Arc<ConfigMapSync>],
    config_map: &ConfigMap,
) -> Vec<ObjectRef<ConfigMapSync>> {
    let Some(changed) = ObjectKey::of(config_map) else {
        return Vec::new();
    };

    declarations
        .iter()
        .filter(|declaration| {
            declaration.source_key() == changed || declaration.destination_key() == changed
        })
        .map(|declaration| ObjectRef::from_obj(declaration.as_ref()))
        .unique()
        .collect()
}

/// Run the controller until SIGINT or SIGTERM.
///
/// On a signal no new passes start; passes already running finish before
/// this returns.
///
/// # Errors
///
/// Returns an error if the configuration is invalid or `ConfigMapSync` is
/// not registered in `registry`. Failures of individual passes are requeued,
/// never returned.
pub async fn run(client: Client, registry: &TypeRegistry, config: ControllerConfig) -> Result<()> {
    config.validate()?;
    let kind = registry.require::<ConfigMapSync>()?;

    let declarations: Api<ConfigMapSync> = match config.watch_namespace.as_deref() {
        Some(namespace) => Api::namespaced(client.clone(), namespace),
        None => Api::all(client.clone()),
    };
    // Sources and destinations may live in any namespace.
    let config_maps: Api<ConfigMap> = Api::all(client.clone());

    let reconciler = Reconciler::new(
        Arc::new(KubeDeclarationStore::new(client.clone())),
        Arc::new(KubeConfigMapAccessor::new(client)),
        config.reconciler_config(),
    );
    let ctx = Arc::new(Context::new(reconciler, &config));

    info!(
        kind = %kind,
        namespace = config.watch_namespace.as_deref().unwrap_or("*"),
        concurrency = config.concurrency,
        resync_secs = config.resync_interval.as_secs(),
        "Starting ConfigMapSync controller"
    );

    let (reader, writer) = reflector::store();
    let spec_changes = watcher(declarations, watcher::Config::default())
        .default_backoff()
        .reflect(writer)
        .applied_objects()
        .predicate_filter(predicates::generation);

    let controller = Controller::for_stream(spec_changes, reader);
    let cache = controller.store();
    controller
        .watches(config_maps, watcher::Config::default(), move |config_map| {
            declarations_for_config_map(&cache.state(), &config_map)
        })
        .with_config(controller::Config::default().concurrency(config.concurrency))
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(|result| async move {
            match result {
                Ok((declaration, action)) => {
                    debug!(declaration = %declaration, ?action, "Reconciled");
                }
                Err(e) => warn!(error = %e, "Controller event failed"),
            }
        })
        .await;

    info!("ConfigMapSync controller stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::backoff::BackoffConfig;
    use crate::store::{InMemoryDeclarationStore, InMemoryResourceStore};
    use crate::types::ResourceData;
    use cmsync_api::ConfigMapSyncSpec;
    use kube::api::ObjectMeta;

    fn declaration(namespace: &str, name: &str, source: &str, destination: &str) -> ConfigMapSync {
        let mut sync = ConfigMapSync::new(name, ConfigMapSyncSpec::new(source, destination, "settings"));
        sync.metadata.namespace = Some(namespace.into());
        sync
    }

    fn config_map(namespace: &str, name: &str) -> ConfigMap {
        ConfigMap {
            metadata: ObjectMeta {
                name: Some(name.into()),
                namespace: Some(namespace.into()),
                ..ObjectMeta::default()
            },
            ..ConfigMap::default()
        }
    }

    fn config() -> ControllerConfig {
        ControllerConfig {
            resync_interval: Duration::from_secs(30),
            backoff: BackoffConfig {
                initial_delay: Duration::from_secs(1),
                max_delay: Duration::from_secs(8),
                multiplier: 2.0,
                jitter: false,
            },
            ..ControllerConfig::default()
        }
    }

    async fn context() -> (Arc<InMemoryDeclarationStore>, Arc<InMemoryResourceStore>, Arc<Context>) {
        let declarations = Arc::new(InMemoryDeclarationStore::new());
        let resources = Arc::new(InMemoryResourceStore::new());
        let reconciler = Reconciler::new(
            declarations.clone(),
            resources.clone(),
            config().reconciler_config(),
        );
        (declarations, resources, Arc::new(Context::new(reconciler, &config())))
    }

    #[test]
    fn test_config_map_maps_to_declarations_using_it() {
        let declarations = vec![
            Arc::new(declaration("ops", "from-a", "team-a", "team-b")),
            Arc::new(declaration("ops", "into-a", "team-c", "team-a")),
            Arc::new(declaration("ops", "unrelated", "team-c", "team-d")),
        ];

        let refs = declarations_for_config_map(&declarations, &config_map("team-a", "settings"));

        let names: Vec<_> = refs.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["from-a", "into-a"]);
    }

    #[test]
    fn test_status_writes_do_not_pass_generation_filter() {
        let mut before = declaration("ops", "mirror", "src", "dst");
        before.metadata.generation = Some(1);
        before.metadata.resource_version = Some("3".into());

        let mut status_only = before.clone();
        status_only.metadata.resource_version = Some("4".into());
        status_only.status = Some(cmsync_api::ConfigMapSyncStatus {
            last_sync_time: Some(chrono::Utc::now()),
            observed_generation: Some(1),
        });
        assert_eq!(
            predicates::generation(&before),
            predicates::generation(&status_only)
        );

        let mut respecced = before.clone();
        respecced.metadata.generation = Some(2);
        assert_ne!(
            predicates::generation(&before),
            predicates::generation(&respecced)
        );
    }

    #[test]
    fn test_other_names_do_not_trigger() {
        let declarations = vec![Arc::new(declaration("ops", "mirror", "team-a", "team-b"))];
        let refs = declarations_for_config_map(&declarations, &config_map("team-a", "other"));
        assert!(refs.is_empty());
    }

    #[test]
    fn test_config_map_without_namespace_triggers_nothing() {
        let declarations = vec![Arc::new(declaration("ops", "mirror", "team-a", "team-b"))];
        let mut cm = config_map("team-a", "settings");
        cm.metadata.namespace = None;
        assert!(declarations_for_config_map(&declarations, &cm).is_empty());
    }

    #[tokio::test]
    async fn test_success_requeues_after_resync_interval() {
        let (declarations, resources, ctx) = context().await;
        let sync = declaration("ops", "mirror", "src", "dst");
        declarations.apply(sync.clone()).await;
        resources
            .put(
                ObjectKey::new("src", "settings"),
                ResourceData::from([("a".to_string(), "1".to_string())]),
            )
            .await;

        let action = reconcile(Arc::new(sync), ctx).await.unwrap();

        assert_eq!(action, Action::requeue(Duration::from_secs(30)));
    }

    #[tokio::test]
    async fn test_gone_declaration_awaits_change() {
        let (_, _, ctx) = context().await;
        let sync = declaration("ops", "mirror", "src", "dst");

        let action = reconcile(Arc::new(sync), ctx).await.unwrap();

        assert_eq!(action, Action::await_change());
    }

    #[tokio::test]
    async fn test_failures_back_off_then_reset() {
        let (declarations, resources, ctx) = context().await;
        let sync = Arc::new(declaration("ops", "mirror", "src", "dst"));
        declarations.apply(sync.as_ref().clone()).await;
        let key = ObjectKey::new("ops", "mirror");

        let err = reconcile(sync.clone(), ctx.clone()).await.unwrap_err();
        assert_eq!(
            error_policy(sync.clone(), &err, ctx.clone()),
            Action::requeue(Duration::from_secs(1))
        );
        let err = reconcile(sync.clone(), ctx.clone()).await.unwrap_err();
        assert_eq!(
            error_policy(sync.clone(), &err, ctx.clone()),
            Action::requeue(Duration::from_secs(2))
        );

        resources
            .put(ObjectKey::new("src", "settings"), ResourceData::new())
            .await;
        reconcile(sync, ctx.clone()).await.unwrap();
        assert_eq!(ctx.backoff().failures(&key), 0);
    }

    #[tokio::test]
    async fn test_declaration_without_namespace_is_unaddressable() {
        let (_, _, ctx) = context().await;
        let mut sync = declaration("ops", "mirror", "src", "dst");
        sync.metadata.namespace = None;

        let err = reconcile(Arc::new(sync), ctx).await.unwrap_err();

        assert!(matches!(err, Error::Unaddressable { ref name } if name == "mirror"));
    }
}
