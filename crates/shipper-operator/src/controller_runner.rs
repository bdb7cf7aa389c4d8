use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use futures::StreamExt;
use kube::runtime::reflector::ObjectRef;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client, Resource, ResourceExt};
use tracing::{debug, error, info};

use shipper_common::crd::{CapacityTarget, InstallationTarget, Release, TrafficTarget};
use shipper_common::events::KubeEventPublisher;
use shipper_strategy::controller::{
    error_policy, is_contender, reconcile, Context, KubeStrategyClient,
};
use shipper_strategy::ControllerConfig;

/// Watcher timeout (seconds); must stay below the client read timeout (30s)
/// so the API server closes idle watches first
const WATCH_TIMEOUT_SECS: u32 = 25;

/// Reporting component on published events
const CONTROLLER_NAME: &str = "shipper-strategy-controller";

fn api<K>(client: &Client, namespace: Option<&str>) -> Api<K>
where
    K: Resource<Scope = k8s_openapi::NamespaceResourceScope, DynamicType = ()>,
{
    match namespace {
        Some(ns) => Api::namespaced(client.clone(), ns),
        None => Api::all(client.clone()),
    }
}

/// The Release that owns a target object: same name, same namespace
pub fn owning_release<K: Resource>(obj: &K) -> Option<ObjectRef<Release>> {
    let namespace = obj.namespace()?;
    Some(ObjectRef::new(&obj.name_any()).within(&namespace))
}

/// Releases to reconcile when a target object changes.
///
/// The owning release always; when the owner is an older release of its
/// application, also the application's newest release, which is the one
/// driving the strategy.
pub fn affected_releases<K: Resource>(
    releases: &[Arc<Release>],
    obj: &K,
) -> Vec<ObjectRef<Release>> {
    let Some(owner) = owning_release(obj) else {
        return Vec::new();
    };

    let app = releases
        .iter()
        .find(|r| r.name_any() == owner.name && r.namespace() == owner.namespace)
        .and_then(|r| r.app_name().map(str::to_string));
    let contender = app.and_then(|app| {
        let siblings: Vec<Release> = releases
            .iter()
            .filter(|r| r.namespace() == owner.namespace && r.app_name() == Some(app.as_str()))
            .map(|r| Release::clone(r))
            .collect();
        siblings
            .iter()
            .find(|r| is_contender(r, &siblings))
            .map(|r| r.name_any())
    });

    let mut refs = vec![owner.clone()];
    if let (Some(name), Some(namespace)) = (contender, owner.namespace.as_deref()) {
        if name != owner.name {
            refs.push(ObjectRef::new(&name).within(namespace));
        }
    }
    refs
}

/// Build the Release controller.
///
/// Changes on a release's installation, capacity or traffic target
/// re-trigger the release and its application's newest release, which is
/// how cluster progress reaches the executor.
pub fn build_release_controller(
    client: Client,
    namespace: Option<String>,
    config: ControllerConfig,
) -> Pin<Box<dyn Future<Output = ()> + Send>> {
    let ns = namespace.as_deref();
    let strategy_client = Arc::new(KubeStrategyClient::new(
        client.clone(),
        config.field_manager.clone(),
    ));
    let events = Arc::new(KubeEventPublisher::new(client.clone(), CONTROLLER_NAME));
    let ctx = Arc::new(Context::new(strategy_client, events, config));

    let watcher = || WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS);

    info!(namespace = ns.unwrap_or("*"), "starting Release controller");

    let controller = Controller::new(api::<Release>(&client, ns), watcher());
    let store = controller.store();
    let (it_store, ct_store, tt_store) = (store.clone(), store.clone(), store);

    Box::pin(
        controller
            .watches(
                api::<InstallationTarget>(&client, ns),
                watcher(),
                move |it| affected_releases(&it_store.state(), &it),
            )
            .watches(api::<CapacityTarget>(&client, ns), watcher(), move |ct| {
                affected_releases(&ct_store.state(), &ct)
            })
            .watches(api::<TrafficTarget>(&client, ns), watcher(), move |tt| {
                affected_releases(&tt_store.state(), &tt)
            })
            .shutdown_on_signal()
            .run(reconcile, error_policy, ctx)
            .for_each(|result| {
                match result {
                    Ok((release, action)) => {
                        debug!(release = %release, ?action, "reconciliation completed")
                    }
                    Err(e) => error!(error = ?e, "reconciliation error"),
                }
                std::future::ready(())
            }),
    )
}
