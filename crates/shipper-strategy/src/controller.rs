//! Release controller
//!
//! Drives the strategy executor for the newest release of each application:
//! loads a snapshot of the contender, its incumbent and the strategy, runs
//! the executor and applies the returned patches with optimistic concurrency.

use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::NamespaceResourceScope;
use kube::api::{Api, ListParams, Patch, PatchParams};
use kube::runtime::controller::Action;
use kube::runtime::events::EventType;
use kube::{Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::{debug, error, info, warn};

#[cfg(test)]
use mockall::automock;

use shipper_common::crd::{
    CapacityTarget, CapacityTargetSpec, InstallationTarget, Release, ReleasePhase,
    ReleaseStatus, Strategy, TrafficTarget, TrafficTargetSpec,
};
use shipper_common::events::{actions, reasons, EventPublisher};
use shipper_common::kube_utils::versioned_merge_patch;
use shipper_common::retry::retry_with_backoff_if;
use shipper_common::{Error, APP_LABEL};

use crate::config::ControllerConfig;
use crate::error::{ControllerError, ErrorClass};
use crate::executor::{release_key, Executor, ReleaseInfo};
use crate::result::ExecutorResult;

/// Kubernetes operations the Release controller needs.
///
/// Getters return `Ok(None)` for objects that do not exist. Patch methods
/// take the snapshot the patch was computed from and send its
/// resourceVersion along, so a write against a changed object fails with
/// 409 Conflict.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait StrategyClient: Send + Sync {
    /// Releases of `app` in `namespace`
    async fn list_releases(&self, namespace: &str, app: &str) -> Result<Vec<Release>, Error>;

    async fn get_strategy(&self, namespace: &str, name: &str) -> Result<Option<Strategy>, Error>;

    async fn get_installation_target(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<InstallationTarget>, Error>;

    async fn get_capacity_target(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<CapacityTarget>, Error>;

    async fn get_traffic_target(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<TrafficTarget>, Error>;

    /// Replace the status of `release`
    async fn patch_release_status(
        &self,
        release: &Release,
        status: &ReleaseStatus,
    ) -> Result<(), Error>;

    /// Replace the spec of `target`
    async fn patch_capacity_target(
        &self,
        target: &CapacityTarget,
        spec: &CapacityTargetSpec,
    ) -> Result<(), Error>;

    /// Replace the spec of `target`
    async fn patch_traffic_target(
        &self,
        target: &TrafficTarget,
        spec: &TrafficTargetSpec,
    ) -> Result<(), Error>;
}

/// Production client backed by kube `Api`s
pub struct KubeStrategyClient {
    client: Client,
    field_manager: String,
}

impl KubeStrategyClient {
    pub fn new(client: Client, field_manager: impl Into<String>) -> Self {
        Self {
            client,
            field_manager: field_manager.into(),
        }
    }

    fn api<K>(&self, namespace: &str) -> Api<K>
    where
        K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
            + Clone
            + DeserializeOwned
            + Debug,
    {
        Api::namespaced(self.client.clone(), namespace)
    }

    async fn get<K>(&self, namespace: &str, name: &str) -> Result<Option<K>, Error>
    where
        K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
            + Clone
            + DeserializeOwned
            + Debug,
    {
        Ok(self.api::<K>(namespace).get_opt(name).await?)
    }

    /// Merge-patch `obj`, guarded by the resourceVersion of the snapshot
    async fn patch<K>(&self, obj: &K, body: serde_json::Value, status: bool) -> Result<(), Error>
    where
        K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
            + Clone
            + DeserializeOwned
            + Debug,
    {
        let name = obj.name_any();
        let namespace = obj.namespace().ok_or_else(|| {
            Error::validation_for(&name, format!("{} has no namespace", K::kind(&())))
        })?;
        let api = self.api::<K>(&namespace);
        let patch = versioned_merge_patch(obj.resource_version().as_deref(), body);
        let params = PatchParams::apply(&self.field_manager);

        if status {
            api.patch_status(&name, &params, &Patch::Merge(&patch)).await?;
        } else {
            api.patch(&name, &params, &Patch::Merge(&patch)).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl StrategyClient for KubeStrategyClient {
    async fn list_releases(&self, namespace: &str, app: &str) -> Result<Vec<Release>, Error> {
        let params = ListParams::default().labels(&format!("{}={}", APP_LABEL, app));
        Ok(self.api::<Release>(namespace).list(&params).await?.items)
    }

    async fn get_strategy(&self, namespace: &str, name: &str) -> Result<Option<Strategy>, Error> {
        self.get(namespace, name).await
    }

    async fn get_installation_target(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<InstallationTarget>, Error> {
        self.get(namespace, name).await
    }

    async fn get_capacity_target(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<CapacityTarget>, Error> {
        self.get(namespace, name).await
    }

    async fn get_traffic_target(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<TrafficTarget>, Error> {
        self.get(namespace, name).await
    }

    async fn patch_release_status(
        &self,
        release: &Release,
        status: &ReleaseStatus,
    ) -> Result<(), Error> {
        self.patch(release, json!({ "status": status }), true).await
    }

    async fn patch_capacity_target(
        &self,
        target: &CapacityTarget,
        spec: &CapacityTargetSpec,
    ) -> Result<(), Error> {
        self.patch(target, json!({ "spec": spec }), false).await
    }

    async fn patch_traffic_target(
        &self,
        target: &TrafficTarget,
        spec: &TrafficTargetSpec,
    ) -> Result<(), Error> {
        self.patch(target, json!({ "spec": spec }), false).await
    }
}

/// Shared context for the Release controller
pub struct Context {
    pub client: Arc<dyn StrategyClient>,
    pub events: Arc<dyn EventPublisher>,
    pub config: ControllerConfig,
}

impl Context {
    pub fn new(
        client: Arc<dyn StrategyClient>,
        events: Arc<dyn EventPublisher>,
        config: ControllerConfig,
    ) -> Self {
        Self {
            client,
            events,
            config,
        }
    }
}

fn ordering_key(release: &Release) -> (u64, String) {
    (release.generation().unwrap_or(0), release.name_any())
}

/// Whether `release` is the newest of its siblings.
///
/// Releases are ordered by generation, then by name. `siblings` may or may
/// not include `release` itself.
pub fn is_contender(release: &Release, siblings: &[Release]) -> bool {
    let key = ordering_key(release);
    siblings
        .iter()
        .filter(|s| s.name_any() != key.1)
        .all(|s| ordering_key(s) < key)
}

/// The newest sibling older than `contender` that is fully installed
pub fn find_incumbent<'a>(contender: &Release, siblings: &'a [Release]) -> Option<&'a Release> {
    let key = ordering_key(contender);
    siblings
        .iter()
        .filter(|s| s.phase() == ReleasePhase::Installed)
        .filter(|s| ordering_key(s) < key)
        .max_by_key(|s| ordering_key(s))
}

/// Whether the status of `release` already records its target step
fn step_recorded(release: &Release) -> bool {
    let status = release.current_status();
    status.phase != ReleasePhase::WaitingForStrategy
        && u32::try_from(release.spec.target_step).is_ok_and(|t| status.achieved_step >= t)
}

/// Reconcile a Release
pub async fn reconcile(release: Arc<Release>, ctx: Arc<Context>) -> Result<Action, ControllerError> {
    let key = release_key(&release);
    let namespace = release
        .namespace()
        .ok_or(ControllerError::MissingNamespace)?;

    let phase = release.phase();
    if phase.is_inactive() {
        debug!(release = %key, %phase, "release is not rolling out");
        return Ok(Action::await_change());
    }

    let siblings = match release.app_name() {
        Some(app) => {
            read(&ctx, "list_releases", || {
                ctx.client.list_releases(&namespace, app)
            })
            .await?
        }
        None => Vec::new(),
    };
    if !is_contender(&release, &siblings) {
        debug!(release = %key, "newer release exists, leaving strategy to it");
        return Ok(Action::await_change());
    }
    let incumbent = find_incumbent(&release, &siblings).cloned();

    let strategy_name = release.strategy_name();
    let strategy = read(&ctx, "get_strategy", || {
        ctx.client.get_strategy(&namespace, strategy_name)
    })
    .await?
    .ok_or_else(|| ControllerError::StrategyNotFound {
        namespace: namespace.clone(),
        name: strategy_name.to_string(),
    })?;

    let contender = load_release_info(&ctx, &namespace, (*release).clone()).await?;
    let incumbent = match incumbent {
        Some(incumbent) => Some(load_release_info(&ctx, &namespace, incumbent).await?),
        None => None,
    };

    let patches = match Executor::new(&contender, incumbent.as_ref(), &strategy).execute() {
        Ok(patches) => patches,
        Err(e) => {
            if e.class() == ErrorClass::Configuration {
                ctx.events
                    .publish(
                        &release.object_ref(&()),
                        EventType::Warning,
                        reasons::STRATEGY_INVALID,
                        actions::EXECUTE_STRATEGY,
                        Some(e.to_string()),
                    )
                    .await;
            }
            return Err(e.into());
        }
    };

    if patches.is_empty() {
        // Incumbent progress is not guaranteed to wake this release
        if incumbent.is_some() && !step_recorded(&release) {
            debug!(release = %key, "waiting on clusters with an incumbent, polling");
            return Ok(Action::requeue(ctx.config.requeue_after_progress));
        }
        return Ok(Action::await_change());
    }

    match apply_patches(&ctx, &contender, incumbent.as_ref(), &patches).await {
        Ok(()) => {}
        Err(e) if e.is_conflict() => {
            info!(release = %key, "snapshot went stale while patching, retrying");
            return Ok(Action::requeue(ctx.config.requeue_after_conflict));
        }
        Err(e) => return Err(e),
    }

    publish_events(&ctx, &contender, incumbent.as_ref(), &patches).await;
    Ok(Action::requeue(ctx.config.requeue_after_progress))
}

/// Error policy for Release reconciliation
pub fn error_policy(release: Arc<Release>, error: &ControllerError, ctx: Arc<Context>) -> Action {
    if error.is_conflict() {
        return Action::requeue(ctx.config.requeue_after_conflict);
    }
    match error {
        ControllerError::Strategy(e) if e.class() == ErrorClass::MissingData => {
            warn!(release = %release_key(&release), error = %e, "snapshot incomplete");
        }
        _ => {
            error!(?error, release = %release_key(&release), "release reconciliation failed");
        }
    }
    Action::requeue(ctx.config.requeue_after_error)
}

/// Read with retries on transient API errors
async fn read<T, F, Fut>(ctx: &Context, operation: &str, op: F) -> Result<T, Error>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, Error>>,
{
    retry_with_backoff_if(&ctx.config.retry, operation, Error::is_retryable, op).await
}

async fn load_release_info(
    ctx: &Context,
    namespace: &str,
    release: Release,
) -> Result<ReleaseInfo, Error> {
    let name = release.name_any();
    let client = &ctx.client;

    let installation_target = read(ctx, "get_installation_target", || {
        client.get_installation_target(namespace, &name)
    })
    .await?;
    let capacity_target = read(ctx, "get_capacity_target", || {
        client.get_capacity_target(namespace, &name)
    })
    .await?;
    let traffic_target = read(ctx, "get_traffic_target", || {
        client.get_traffic_target(namespace, &name)
    })
    .await?;

    Ok(ReleaseInfo {
        release,
        installation_target,
        capacity_target,
        traffic_target,
    })
}

/// Snapshot a patch refers to
fn snapshot_for<'a>(
    name: &str,
    contender: &'a ReleaseInfo,
    incumbent: Option<&'a ReleaseInfo>,
) -> Result<&'a ReleaseInfo, Error> {
    std::iter::once(contender)
        .chain(incumbent)
        .find(|info| info.name() == name)
        .ok_or_else(|| {
            Error::internal_with_context(
                "apply_patches",
                format!("patch targets release {} outside the snapshot", name),
            )
        })
}

/// Apply patches in order, stopping at the first failure
async fn apply_patches(
    ctx: &Context,
    contender: &ReleaseInfo,
    incumbent: Option<&ReleaseInfo>,
    patches: &[ExecutorResult],
) -> Result<(), ControllerError> {
    for patch in patches {
        let info = snapshot_for(patch.name(), contender, incumbent)?;
        match patch {
            ExecutorResult::ReleaseStatusUpdate { name, status } => {
                ctx.client
                    .patch_release_status(&info.release, status)
                    .await?;
                info!(release = %name, phase = %status.phase, achieved_step = status.achieved_step, "release status updated");
            }
            ExecutorResult::CapacityTargetSpecUpdate { name, spec } => {
                ctx.client
                    .patch_capacity_target(info.capacity_target()?, spec)
                    .await?;
                info!(release = %name, clusters = spec.clusters.len(), "capacity target updated");
            }
            ExecutorResult::TrafficTargetSpecUpdate { name, spec } => {
                ctx.client
                    .patch_traffic_target(info.traffic_target()?, spec)
                    .await?;
                info!(release = %name, clusters = spec.clusters.len(), "traffic target updated");
            }
        }
    }
    Ok(())
}

async fn publish_events(
    ctx: &Context,
    contender: &ReleaseInfo,
    incumbent: Option<&ReleaseInfo>,
    patches: &[ExecutorResult],
) {
    for patch in patches {
        let Ok(info) = snapshot_for(patch.name(), contender, incumbent) else {
            continue;
        };
        let (reason, note) = match patch {
            ExecutorResult::ReleaseStatusUpdate { status, .. }
                if status.phase == ReleasePhase::Superseded =>
            {
                (
                    reasons::RELEASE_SUPERSEDED,
                    format!("superseded by {}", contender.name()),
                )
            }
            ExecutorResult::ReleaseStatusUpdate { status, .. } => (
                reasons::STRATEGY_APPLIED,
                format!(
                    "step {} finished, phase {}",
                    contender.release.spec.target_step, status.phase
                ),
            ),
            ExecutorResult::CapacityTargetSpecUpdate { .. } => (
                reasons::TARGETS_UPDATED,
                "capacity retargeted".to_string(),
            ),
            ExecutorResult::TrafficTargetSpecUpdate { .. } => (
                reasons::TARGETS_UPDATED,
                "traffic retargeted".to_string(),
            ),
        };
        ctx.events
            .publish(
                &info.release.object_ref(&()),
                EventType::Normal,
                reason,
                actions::EXECUTE_STRATEGY,
                Some(note),
            )
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicU32, Ordering};

    use shipper_common::crd::{
        CapacityTargetStatus, ClusterCapacityStatus, ClusterCapacityTarget,
        ClusterInstallationStatus, ClusterTrafficStatus, ClusterTrafficTarget,
        InstallationStatus, InstallationTargetSpec, InstallationTargetStatus, ReleaseSpec,
        StrategySpec, StrategyStep, TrafficTargetStatus,
    };
    use shipper_common::events::NoopEventPublisher;
    use shipper_common::RELEASE_GENERATION_ANNOTATION;

    use crate::error::StrategyError;

    const NS: &str = "web-ns";
    const CLUSTER: &str = "kube-a";

    fn release(name: &str, generation: u64, phase: ReleasePhase, target_step: i32) -> Release {
        let mut release = Release::new(
            name,
            ReleaseSpec {
                target_step,
                ..Default::default()
            },
        );
        release.spec.environment.shipment_order.strategy = "vanguard".to_string();
        release.metadata.namespace = Some(NS.to_string());
        release.metadata.resource_version = Some("100".to_string());
        release.metadata.labels = Some(BTreeMap::from([(
            APP_LABEL.to_string(),
            "web".to_string(),
        )]));
        release.metadata.annotations = Some(BTreeMap::from([(
            RELEASE_GENERATION_ANNOTATION.to_string(),
            generation.to_string(),
        )]));
        release.status = Some(ReleaseStatus {
            achieved_step: 0,
            phase,
        });
        release
    }

    fn strategy() -> Strategy {
        Strategy::new(
            "vanguard",
            StrategySpec {
                steps: vec![
                    StrategyStep::new(50, 50, 50, 50),
                    StrategyStep::new(100, 100, 0, 0),
                ],
            },
        )
    }

    fn installation(name: &str) -> InstallationTarget {
        let mut it = InstallationTarget::new(
            name,
            InstallationTargetSpec {
                clusters: vec![CLUSTER.to_string()],
            },
        );
        it.status = Some(InstallationTargetStatus {
            clusters: vec![ClusterInstallationStatus {
                name: CLUSTER.to_string(),
                status: InstallationStatus::Installed,
            }],
        });
        it
    }

    fn capacity(name: &str, percent: u32, achieved: u32) -> CapacityTarget {
        let mut ct = CapacityTarget::new(
            name,
            CapacityTargetSpec {
                clusters: vec![ClusterCapacityTarget {
                    name: CLUSTER.to_string(),
                    percent,
                    total_replica_count: 10,
                }],
            },
        );
        ct.metadata.namespace = Some(NS.to_string());
        ct.status = Some(CapacityTargetStatus {
            clusters: vec![ClusterCapacityStatus {
                name: CLUSTER.to_string(),
                achieved_percent: achieved,
                available_replicas: achieved / 10,
                status: String::new(),
            }],
        });
        ct
    }

    fn traffic(name: &str, weight: u32, achieved: u32) -> TrafficTarget {
        let mut tt = TrafficTarget::new(
            name,
            TrafficTargetSpec {
                clusters: vec![ClusterTrafficTarget {
                    name: CLUSTER.to_string(),
                    weight,
                }],
            },
        );
        tt.metadata.namespace = Some(NS.to_string());
        tt.status = Some(TrafficTargetStatus {
            clusters: vec![ClusterTrafficStatus {
                name: CLUSTER.to_string(),
                achieved_traffic: achieved,
                status: String::new(),
            }],
        });
        tt
    }

    fn context(mock: MockStrategyClient) -> Arc<Context> {
        let config = ControllerConfig {
            retry: shipper_common::retry::RetryConfig {
                max_attempts: 2,
                initial_delay: std::time::Duration::from_millis(1),
                max_delay: std::time::Duration::from_millis(2),
                backoff_multiplier: 2.0,
            },
            ..ControllerConfig::default()
        };
        Arc::new(Context::new(
            Arc::new(mock),
            Arc::new(NoopEventPublisher),
            config,
        ))
    }

    /// Mock serving a single-cluster app with the given target states
    fn mock_with(
        releases: Vec<Release>,
        capacities: Vec<CapacityTarget>,
        traffics: Vec<TrafficTarget>,
    ) -> MockStrategyClient {
        let mut mock = mock_targets(capacities, traffics);
        mock.expect_list_releases()
            .returning(move |_, _| Ok(releases.clone()));
        mock
    }

    /// Mock serving everything but the release listing
    fn mock_targets(
        capacities: Vec<CapacityTarget>,
        traffics: Vec<TrafficTarget>,
    ) -> MockStrategyClient {
        let mut mock = MockStrategyClient::new();
        mock.expect_get_strategy()
            .returning(|_, _| Ok(Some(strategy())));
        mock.expect_get_installation_target()
            .returning(|_, name| Ok(Some(installation(name))));
        mock.expect_get_capacity_target().returning(move |_, name| {
            Ok(capacities.iter().find(|c| c.name_any() == name).cloned())
        });
        mock.expect_get_traffic_target().returning(move |_, name| {
            Ok(traffics.iter().find(|t| t.name_any() == name).cloned())
        });
        mock
    }

    fn api_error(code: u16) -> Error {
        Error::Kube {
            source: kube::Error::Api(kube::core::ErrorResponse {
                status: "Failure".to_string(),
                message: "test".to_string(),
                reason: "Test".to_string(),
                code,
            }),
        }
    }

    mod selection {
        use super::*;

        #[test]
        fn newest_generation_is_the_contender() {
            let old = release("web-1", 1, ReleasePhase::Installed, 1);
            let new = release("web-2", 2, ReleasePhase::WaitingForStrategy, 0);
            let siblings = vec![old.clone(), new.clone()];

            assert!(is_contender(&new, &siblings));
            assert!(!is_contender(&old, &siblings));
            assert!(is_contender(&new, &[]));
        }

        #[test]
        fn incumbent_is_newest_installed_older_release() {
            let ancient = release("web-1", 1, ReleasePhase::Installed, 1);
            let old = release("web-2", 2, ReleasePhase::Installed, 1);
            let abandoned = release("web-3", 3, ReleasePhase::WaitingForCommand, 0);
            let new = release("web-4", 4, ReleasePhase::WaitingForStrategy, 0);
            let siblings = vec![ancient, old, abandoned, new.clone()];

            let incumbent = find_incumbent(&new, &siblings).map(|r| r.name_any());
            assert_eq!(incumbent.as_deref(), Some("web-2"));
        }

        #[test]
        fn first_release_has_no_incumbent() {
            let new = release("web-1", 1, ReleasePhase::WaitingForStrategy, 0);
            assert!(find_incumbent(&new, std::slice::from_ref(&new)).is_none());
        }
    }

    #[tokio::test]
    async fn inactive_releases_are_skipped() {
        for phase in [ReleasePhase::WaitingForScheduling, ReleasePhase::Superseded] {
            let ctx = context(MockStrategyClient::new());
            let action = reconcile(Arc::new(release("web-1", 1, phase, 0)), ctx)
                .await
                .unwrap();
            assert_eq!(action, Action::await_change());
        }
    }

    #[tokio::test]
    async fn older_releases_leave_the_strategy_alone() {
        let old = release("web-1", 1, ReleasePhase::Installed, 1);
        let new = release("web-2", 2, ReleasePhase::WaitingForStrategy, 0);

        let mut mock = MockStrategyClient::new();
        let siblings = vec![old.clone(), new];
        mock.expect_list_releases()
            .returning(move |_, _| Ok(siblings.clone()));

        let action = reconcile(Arc::new(old), context(mock)).await.unwrap();
        assert_eq!(action, Action::await_change());
    }

    #[tokio::test]
    async fn missing_strategy_is_reported() {
        let new = release("web-1", 1, ReleasePhase::WaitingForStrategy, 0);
        let mut mock = MockStrategyClient::new();
        let siblings = vec![new.clone()];
        mock.expect_list_releases()
            .returning(move |_, _| Ok(siblings.clone()));
        mock.expect_get_strategy().returning(|_, _| Ok(None));

        let err = reconcile(Arc::new(new), context(mock)).await.unwrap_err();
        assert!(matches!(
            err,
            ControllerError::StrategyNotFound { ref name, .. } if name == "vanguard"
        ));
    }

    #[tokio::test]
    async fn missing_namespace_is_reported() {
        let mut orphan = release("web-1", 1, ReleasePhase::WaitingForStrategy, 0);
        orphan.metadata.namespace = None;
        let err = reconcile(Arc::new(orphan), context(MockStrategyClient::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, ControllerError::MissingNamespace));
    }

    /// Story: a first release scales up, then gets traffic, then waits
    #[tokio::test]
    async fn story_first_release_walks_through_step_zero() {
        let new = release("web-1", 1, ReleasePhase::WaitingForStrategy, 0);

        // Capacity is retargeted first, guarded by the snapshot's version
        let mut mock = mock_with(
            vec![new.clone()],
            vec![capacity("web-1", 0, 0)],
            vec![traffic("web-1", 0, 0)],
        );
        mock.expect_patch_capacity_target()
            .withf(|target, spec| {
                target.name_any() == "web-1" && spec.is_at(50) && spec.clusters[0].total_replica_count == 10
            })
            .times(1)
            .returning(|_, _| Ok(()));
        let ctx = context(mock);
        let action = reconcile(Arc::new(new.clone()), ctx.clone()).await.unwrap();
        assert_eq!(action, Action::requeue(ctx.config.requeue_after_progress));

        // Capacity reached, traffic follows
        let mut mock = mock_with(
            vec![new.clone()],
            vec![capacity("web-1", 50, 50)],
            vec![traffic("web-1", 0, 0)],
        );
        mock.expect_patch_traffic_target()
            .withf(|_, spec| spec.is_at(50))
            .times(1)
            .returning(|_, _| Ok(()));
        reconcile(Arc::new(new.clone()), context(mock)).await.unwrap();

        // Both reached: status moves to WaitingForCommand
        let mut mock = mock_with(
            vec![new.clone()],
            vec![capacity("web-1", 50, 50)],
            vec![traffic("web-1", 50, 50)],
        );
        mock.expect_patch_release_status()
            .withf(|release, status| {
                release.resource_version().as_deref() == Some("100")
                    && *status
                        == ReleaseStatus {
                            achieved_step: 0,
                            phase: ReleasePhase::WaitingForCommand,
                        }
            })
            .times(1)
            .returning(|_, _| Ok(()));
        reconcile(Arc::new(new), context(mock)).await.unwrap();
    }

    #[tokio::test]
    async fn converging_targets_wait_for_change() {
        let new = release("web-1", 1, ReleasePhase::WaitingForStrategy, 0);
        let mock = mock_with(
            vec![new.clone()],
            vec![capacity("web-1", 50, 20)],
            vec![traffic("web-1", 0, 0)],
        );
        let action = reconcile(Arc::new(new), context(mock)).await.unwrap();
        assert_eq!(action, Action::await_change());
    }

    /// Story: the incumbent drains while its own target events reconcile only itself
    #[tokio::test]
    async fn story_contender_polls_while_incumbent_drains() {
        let old = release("web-1", 1, ReleasePhase::Installed, 1);
        let new = release("web-2", 2, ReleasePhase::WaitingForStrategy, 0);
        let siblings = vec![old.clone(), new.clone()];

        // Contender at 50/50, incumbent traffic already retargeted but lagging
        let ctx = context(mock_with(
            siblings.clone(),
            vec![capacity("web-2", 50, 50), capacity("web-1", 100, 100)],
            vec![traffic("web-2", 50, 50), traffic("web-1", 50, 100)],
        ));
        let action = reconcile(Arc::new(new.clone()), ctx.clone()).await.unwrap();
        assert_eq!(action, Action::requeue(ctx.config.requeue_after_progress));

        // The incumbent itself stays passive
        let action = reconcile(Arc::new(old.clone()), ctx).await.unwrap();
        assert_eq!(action, Action::await_change());

        // Traffic drained: the contender moves on to the incumbent's capacity
        let mut mock = mock_with(
            siblings,
            vec![capacity("web-2", 50, 50), capacity("web-1", 100, 100)],
            vec![traffic("web-2", 50, 50), traffic("web-1", 50, 50)],
        );
        mock.expect_patch_capacity_target()
            .withf(|target, spec| target.name_any() == "web-1" && spec.is_at(50))
            .times(1)
            .returning(|_, _| Ok(()));
        let ctx = context(mock);
        let action = reconcile(Arc::new(new), ctx.clone()).await.unwrap();
        assert_eq!(action, Action::requeue(ctx.config.requeue_after_progress));
    }

    #[tokio::test]
    async fn recorded_step_waits_for_a_new_command() {
        let old = release("web-1", 1, ReleasePhase::Installed, 1);
        let new = release("web-2", 2, ReleasePhase::WaitingForCommand, 0);
        let ctx = context(mock_with(
            vec![old, new.clone()],
            vec![capacity("web-2", 50, 50), capacity("web-1", 50, 50)],
            vec![traffic("web-2", 50, 50), traffic("web-1", 50, 50)],
        ));
        let action = reconcile(Arc::new(new), ctx).await.unwrap();
        assert_eq!(action, Action::await_change());
    }

    #[tokio::test]
    async fn last_step_supersedes_the_incumbent() {
        let old = release("web-1", 1, ReleasePhase::Installed, 1);
        let new = release("web-2", 2, ReleasePhase::WaitingForStrategy, 1);

        let mut mock = mock_with(
            vec![old, new.clone()],
            vec![capacity("web-2", 100, 100), capacity("web-1", 0, 0)],
            vec![traffic("web-2", 100, 100), traffic("web-1", 0, 0)],
        );
        let order = Arc::new(AtomicU32::new(0));
        let seen = order.clone();
        mock.expect_patch_release_status()
            .times(2)
            .returning(move |release, status| {
                match seen.fetch_add(1, Ordering::SeqCst) {
                    0 => {
                        assert_eq!(release.name_any(), "web-2");
                        assert_eq!(status.phase, ReleasePhase::Installed);
                        assert_eq!(status.achieved_step, 1);
                    }
                    _ => {
                        assert_eq!(release.name_any(), "web-1");
                        assert_eq!(status.phase, ReleasePhase::Superseded);
                    }
                }
                Ok(())
            });

        reconcile(Arc::new(new), context(mock)).await.unwrap();
        assert_eq!(order.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn conflicts_requeue_quickly() {
        let new = release("web-1", 1, ReleasePhase::WaitingForStrategy, 0);
        let mut mock = mock_with(
            vec![new.clone()],
            vec![capacity("web-1", 0, 0)],
            vec![traffic("web-1", 0, 0)],
        );
        mock.expect_patch_capacity_target()
            .returning(|_, _| Err(api_error(409)));

        let ctx = context(mock);
        let action = reconcile(Arc::new(new), ctx.clone()).await.unwrap();
        assert_eq!(action, Action::requeue(ctx.config.requeue_after_conflict));
    }

    #[tokio::test]
    async fn transient_read_errors_are_retried() {
        let new = release("web-1", 1, ReleasePhase::WaitingForStrategy, 0);
        let mut mock = mock_targets(vec![capacity("web-1", 50, 20)], vec![traffic("web-1", 0, 0)]);
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        mock.expect_list_releases().returning(move |_, _| {
            if c.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(api_error(503))
            } else {
                Ok(vec![])
            }
        });

        reconcile(Arc::new(new), context(mock)).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn invalid_strategy_fails_without_patches() {
        let new = release("web-1", 1, ReleasePhase::WaitingForStrategy, 5);
        let mock = mock_with(
            vec![new.clone()],
            vec![capacity("web-1", 0, 0)],
            vec![traffic("web-1", 0, 0)],
        );
        let err = reconcile(Arc::new(new), context(mock)).await.unwrap_err();
        assert!(matches!(
            err,
            ControllerError::Strategy(StrategyError::OutOfRangeStep { step: 5, .. })
        ));
    }

    #[test]
    fn error_policy_requeues() {
        let release = Arc::new(release("web-1", 1, ReleasePhase::WaitingForStrategy, 0));
        let ctx = context(MockStrategyClient::new());

        let action = error_policy(release.clone(), &ControllerError::MissingNamespace, ctx.clone());
        assert_eq!(action, Action::requeue(ctx.config.requeue_after_error));

        let conflict = ControllerError::Common(api_error(409));
        let action = error_policy(release, &conflict, ctx.clone());
        assert_eq!(action, Action::requeue(ctx.config.requeue_after_conflict));
    }
}
