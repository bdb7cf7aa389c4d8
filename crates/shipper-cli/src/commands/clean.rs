//! Clean command - Remove decommissioned clusters from releases
//!
//! Usage: shipperctl clean decommissioned-clusters --decommissioned-clusters kube-a,kube-b
//!
//! Every release in the management cluster is checked against the list of
//! decommissioned clusters:
//! 1. Releases still scheduled on other clusters get their clusters
//!    annotation rewritten without the decommissioned ones
//! 2. Releases left without clusters are deleted, unless they are the
//!    newest release of their application
//!
//! Nothing is written without confirmation unless `--yes` is given.

use std::collections::{BTreeSet, HashMap};
use std::io::Write;
use std::path::PathBuf;

use async_trait::async_trait;
use clap::{Args, Subcommand};
use k8s_openapi::api::core::v1::Namespace;
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams};
use kube::{Client, ResourceExt};
use serde_json::json;
use tokio::io::{AsyncBufReadExt, BufReader, Stdin};
use tracing::{debug, info, warn};

#[cfg(test)]
use mockall::automock;

use shipper_common::crd::Release;
use shipper_common::kube_utils::{create_client, versioned_merge_patch};
use shipper_common::{ErrorList, RELEASE_CLUSTERS_ANNOTATION};
use shipper_strategy::controller::is_contender;

use super::format::print_table;
use crate::{Error, Result};

/// Field manager recorded on patches written by this command
pub const FIELD_MANAGER: &str = "shipperctl";

/// Remove stale state from the fleet
#[derive(Subcommand, Debug)]
pub enum CleanCommand {
    /// Drop decommissioned clusters from every release
    DecommissionedClusters(DecommissionedClustersArgs),
}

/// Arguments of `clean decommissioned-clusters`
#[derive(Args, Debug)]
pub struct DecommissionedClustersArgs {
    /// Path to kubeconfig for the management cluster
    #[arg(short = 'k', long = "kubeconfig")]
    pub kubeconfig: Option<PathBuf>,

    /// Kubeconfig context of the management cluster
    #[arg(long)]
    pub management_cluster_context: Option<String>,

    /// Clusters that no longer exist (comma-separated)
    #[arg(long, value_delimiter = ',', required = true, num_args = 1..)]
    pub decommissioned_clusters: Vec<String>,

    /// Print what would change without writing anything
    #[arg(long)]
    pub dry_run: bool,

    /// Skip confirmation prompts
    #[arg(short = 'y', long = "yes")]
    pub yes: bool,
}

impl DecommissionedClustersArgs {
    /// Validated cleanup settings
    pub fn clean_config(&self) -> Result<CleanConfig> {
        let decommissioned_clusters: BTreeSet<String> = self
            .decommissioned_clusters
            .iter()
            .map(|c| c.trim())
            .filter(|c| !c.is_empty())
            .map(str::to_string)
            .collect();
        if decommissioned_clusters.is_empty() {
            return Err(Error::validation(
                "--decommissioned-clusters needs at least one cluster name",
            ));
        }
        Ok(CleanConfig {
            decommissioned_clusters,
            dry_run: self.dry_run,
            assume_yes: self.yes,
        })
    }
}

/// Settings of a cleanup run
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CleanConfig {
    /// Clusters to remove from every release
    pub decommissioned_clusters: BTreeSet<String>,
    /// Only report planned changes
    pub dry_run: bool,
    /// Apply without asking
    pub assume_yes: bool,
}

// =============================================================================
// Planning
// =============================================================================

/// What to do with one release
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CleanupAction {
    /// Rewrite the clusters annotation to `clusters`
    UpdateClusters { clusters: Vec<String> },
    /// Delete the release
    Delete,
}

/// A change planned for one release
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlannedAction {
    pub namespace: String,
    pub name: String,
    /// resourceVersion the plan was computed from
    pub resource_version: Option<String>,
    /// Clusters the release was scheduled on
    pub old_clusters: Vec<String>,
    pub action: CleanupAction,
}

impl PlannedAction {
    fn key(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }

    fn row(&self) -> Vec<String> {
        let (action, new_clusters) = match &self.action {
            CleanupAction::UpdateClusters { clusters } => ("update", clusters.join(",")),
            CleanupAction::Delete => ("delete", "-".to_string()),
        };
        vec![
            self.namespace.clone(),
            self.name.clone(),
            action.to_string(),
            self.old_clusters.join(","),
            new_clusters,
        ]
    }
}

/// Decide what to do with every release.
///
/// Releases are grouped by namespace and application; a release whose
/// clusters all disappear is deleted unless it is the newest of its group.
/// Releases with nothing to change are left out of the plan.
pub fn plan_cleanup(releases: &[Release], config: &CleanConfig) -> Vec<PlannedAction> {
    let mut apps: HashMap<(String, String), Vec<Release>> = HashMap::new();
    for release in releases {
        if let Some(app) = release.app_name() {
            apps.entry((release.namespace().unwrap_or_default(), app.to_string()))
                .or_default()
                .push(release.clone());
        }
    }

    let mut plan = Vec::new();
    for release in releases {
        let namespace = release.namespace().unwrap_or_default();
        let selected = release.selected_clusters();
        let mut filtered: Vec<String> = selected
            .iter()
            .filter(|c| !config.decommissioned_clusters.contains(*c))
            .cloned()
            .collect();
        filtered.sort();
        filtered.dedup();

        let action = if !filtered.is_empty() {
            if release.clusters_annotation() == Some(filtered.join(",").as_str()) {
                continue;
            }
            CleanupAction::UpdateClusters { clusters: filtered }
        } else {
            let siblings = release
                .app_name()
                .and_then(|app| apps.get(&(namespace.clone(), app.to_string())))
                .map(Vec::as_slice)
                .unwrap_or_default();
            if is_contender(release, siblings) {
                debug!(
                    release = %release.name_any(),
                    "newest release has no clusters left, leaving it alone"
                );
                continue;
            }
            CleanupAction::Delete
        };

        plan.push(PlannedAction {
            namespace,
            name: release.name_any(),
            resource_version: release.resource_version(),
            old_clusters: selected,
            action,
        });
    }

    plan.sort_by(|a, b| (&a.namespace, &a.name).cmp(&(&b.namespace, &b.name)));
    plan
}

// =============================================================================
// Cluster access
// =============================================================================

/// Reads and writes of Release objects in the management cluster
#[cfg_attr(test, automock)]
#[async_trait]
pub trait FleetClient: Send + Sync {
    /// Names of every namespace
    async fn list_namespaces(&self) -> Result<Vec<String>>;

    /// Every release in `namespace`
    async fn list_releases(&self, namespace: &str) -> Result<Vec<Release>>;

    /// Overwrite the clusters annotation of a release
    async fn set_clusters_annotation(
        &self,
        namespace: &str,
        name: &str,
        resource_version: Option<String>,
        clusters: String,
    ) -> Result<()>;

    /// Delete a release
    async fn delete_release(&self, namespace: &str, name: &str) -> Result<()>;
}

/// [`FleetClient`] backed by the Kubernetes API
pub struct KubeFleetClient {
    client: Client,
}

impl KubeFleetClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn releases(&self, namespace: &str) -> Api<Release> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl FleetClient for KubeFleetClient {
    async fn list_namespaces(&self) -> Result<Vec<String>> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        let list = api.list(&ListParams::default()).await?;
        Ok(list.items.iter().map(|ns| ns.name_any()).collect())
    }

    async fn list_releases(&self, namespace: &str) -> Result<Vec<Release>> {
        let list = self.releases(namespace).list(&ListParams::default()).await?;
        Ok(list.items)
    }

    async fn set_clusters_annotation(
        &self,
        namespace: &str,
        name: &str,
        resource_version: Option<String>,
        clusters: String,
    ) -> Result<()> {
        let patch = versioned_merge_patch(
            resource_version.as_deref(),
            json!({
                "metadata": {
                    "annotations": { RELEASE_CLUSTERS_ANNOTATION: clusters }
                }
            }),
        );
        self.releases(namespace)
            .patch(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    async fn delete_release(&self, namespace: &str, name: &str) -> Result<()> {
        self.releases(namespace)
            .delete(name, &DeleteParams::default())
            .await?;
        Ok(())
    }
}

/// List releases across every namespace.
///
/// Failing to list namespaces aborts; a namespace whose releases cannot be
/// listed is recorded and skipped.
pub async fn collect_releases(
    client: &dyn FleetClient,
) -> Result<(Vec<Release>, ErrorList<Error>)> {
    let mut errors = ErrorList::new();
    let mut releases = Vec::new();

    for namespace in client.list_namespaces().await? {
        match client.list_releases(&namespace).await {
            Ok(found) => {
                debug!(namespace = %namespace, count = found.len(), "listed releases");
                releases.extend(found);
            }
            Err(e) => {
                warn!(namespace = %namespace, error = %e, "failed to list releases");
                errors.push(Error::command_failed(format!(
                    "list releases in {}: {}",
                    namespace, e
                )));
            }
        }
    }

    Ok((releases, errors))
}

/// Carry out a plan, returning every failure.
///
/// In dry-run mode each action is only printed.
pub async fn apply_plan(
    client: &dyn FleetClient,
    plan: &[PlannedAction],
    dry_run: bool,
) -> ErrorList<Error> {
    let mut errors = ErrorList::new();

    for planned in plan {
        let key = planned.key();
        match &planned.action {
            CleanupAction::UpdateClusters { clusters } => {
                let value = clusters.join(",");
                if dry_run {
                    println!("[dry-run] would set clusters of {} to {}", key, value);
                    continue;
                }
                let result = client
                    .set_clusters_annotation(
                        &planned.namespace,
                        &planned.name,
                        planned.resource_version.clone(),
                        value.clone(),
                    )
                    .await;
                match result {
                    Ok(()) => info!(release = %key, clusters = %value, "updated clusters"),
                    Err(e) => errors.push(Error::command_failed(format!(
                        "update {}: {}",
                        key, e
                    ))),
                }
            }
            CleanupAction::Delete => {
                if dry_run {
                    println!("[dry-run] would delete {}", key);
                    continue;
                }
                match client.delete_release(&planned.namespace, &planned.name).await {
                    Ok(()) => info!(release = %key, "deleted release"),
                    Err(e) => {
                        errors.push(Error::command_failed(format!("delete {}: {}", key, e)))
                    }
                }
            }
        }
    }

    errors
}

// =============================================================================
// Command
// =============================================================================

/// Line-based yes/no prompts on stdin
struct Prompt {
    reader: BufReader<Stdin>,
}

impl Prompt {
    fn new() -> Self {
        Self {
            reader: BufReader::new(tokio::io::stdin()),
        }
    }

    async fn confirm(&mut self, question: &str) -> Result<bool> {
        print!("{} [y/N] ", question);
        std::io::stdout().flush()?;

        let mut input = String::new();
        self.reader.read_line(&mut input).await?;
        Ok(input.trim().eq_ignore_ascii_case("y"))
    }
}

const TABLE_HEADERS: [&str; 5] = ["NAMESPACE", "NAME", "ACTION", "OLD CLUSTERS", "NEW CLUSTERS"];

fn print_plan(plan: &[PlannedAction]) {
    let rows: Vec<Vec<String>> = plan.iter().map(PlannedAction::row).collect();
    print_table(&TABLE_HEADERS, &rows);
}

fn summarize(plan: &[PlannedAction]) -> (usize, usize) {
    let deletes = plan
        .iter()
        .filter(|p| p.action == CleanupAction::Delete)
        .count();
    (plan.len() - deletes, deletes)
}

pub async fn run(cmd: CleanCommand) -> Result<()> {
    match cmd {
        CleanCommand::DecommissionedClusters(args) => decommissioned_clusters(args).await,
    }
}

async fn decommissioned_clusters(args: DecommissionedClustersArgs) -> Result<()> {
    let config = args.clean_config()?;
    let client = create_client(
        args.kubeconfig.as_deref(),
        args.management_cluster_context.as_deref(),
    )
    .await?;
    let fleet = KubeFleetClient::new(client);

    let (releases, mut errors) = collect_releases(&fleet).await?;
    let plan = plan_cleanup(&releases, &config);
    let (updates, deletes) = summarize(&plan);

    println!(
        "Checked {} releases: {} to update, {} to delete",
        releases.len(),
        updates,
        deletes
    );

    if plan.is_empty() {
        println!("Nothing to clean");
        return errors.into_result().map_err(Error::from);
    }

    if config.dry_run {
        print_plan(&plan);
    } else if !config.assume_yes {
        let mut prompt = Prompt::new();
        if prompt.confirm("Show releases?").await? {
            print_plan(&plan);
        }
        if !prompt.confirm("Apply these changes?").await? {
            println!("Aborted");
            return errors.into_result().map_err(Error::from);
        }
    }

    errors.extend(apply_plan(&fleet, &plan, config.dry_run).await);
    errors.into_result().map_err(Error::from)
}
