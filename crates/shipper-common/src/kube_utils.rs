//! Kubernetes client helpers shared by the operator and the CLI

use std::path::Path;
use std::time::Duration;

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::{Api, Patch, PatchParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config, ResourceExt};
use tracing::{debug, info};

use crate::Error;

/// Default connect timeout for API server connections
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Default read timeout for API server requests
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Create a client.
///
/// With a kubeconfig path the file is read and `context` selects the context
/// to use (the file's current context when None). Without a path the
/// in-cluster or default kubeconfig is inferred.
pub async fn create_client(
    kubeconfig: Option<&Path>,
    context: Option<&str>,
) -> Result<Client, Error> {
    let mut config = match kubeconfig {
        Some(path) => {
            let kubeconfig = Kubeconfig::read_from(path).map_err(|e| {
                Error::internal_with_context(
                    "create_client",
                    format!("failed to read kubeconfig {}: {}", path.display(), e),
                )
            })?;
            let options = KubeConfigOptions {
                context: context.map(str::to_string),
                ..Default::default()
            };
            Config::from_custom_kubeconfig(kubeconfig, &options)
                .await
                .map_err(|e| {
                    Error::internal_with_context(
                        "create_client",
                        format!("failed to load kubeconfig: {}", e),
                    )
                })?
        }
        None => match context {
            Some(context) => {
                let options = KubeConfigOptions {
                    context: Some(context.to_string()),
                    ..Default::default()
                };
                Config::from_kubeconfig(&options).await.map_err(|e| {
                    Error::internal_with_context(
                        "create_client",
                        format!("failed to load context {}: {}", context, e),
                    )
                })?
            }
            None => Config::infer().await.map_err(|e| {
                Error::internal_with_context(
                    "create_client",
                    format!("failed to infer config: {}", e),
                )
            })?,
        },
    };

    config.connect_timeout = Some(DEFAULT_CONNECT_TIMEOUT);
    config.read_timeout = Some(DEFAULT_READ_TIMEOUT);
    Client::try_from(config).map_err(|e| {
        Error::internal_with_context("create_client", format!("failed to create client: {}", e))
    })
}

/// Install or update CRDs with server-side apply
pub async fn apply_crds(
    client: &Client,
    crds: &[CustomResourceDefinition],
    field_manager: &str,
) -> Result<(), Error> {
    let api: Api<CustomResourceDefinition> = Api::all(client.clone());
    let params = PatchParams::apply(field_manager).force();

    for crd in crds {
        let name = crd.name_any();
        debug!(crd = %name, "applying CRD");
        api.patch(&name, &params, &Patch::Apply(crd)).await?;
    }
    info!(count = crds.len(), "CRDs installed");
    Ok(())
}

/// Build a JSON merge patch guarded by `resource_version`.
///
/// The API server rejects the patch with 409 Conflict when the object changed
/// since `resource_version` was read. Without a version the patch is
/// unconditional.
pub fn versioned_merge_patch(
    resource_version: Option<&str>,
    body: serde_json::Value,
) -> serde_json::Value {
    let mut patch = body;
    if let (Some(version), Some(map)) = (resource_version, patch.as_object_mut()) {
        let metadata = map
            .entry("metadata")
            .or_insert_with(|| serde_json::json!({}));
        if let Some(metadata) = metadata.as_object_mut() {
            metadata.insert(
                "resourceVersion".to_string(),
                serde_json::Value::String(version.to_string()),
            );
        }
    }
    patch
}
