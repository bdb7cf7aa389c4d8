use kube::Client;
use tracing::info;

use shipper_common::crd::all_crds;
use shipper_common::kube_utils::apply_crds;

/// Field manager used when installing CRDs
pub const CRD_FIELD_MANAGER: &str = "shipper-operator";

/// Every Shipper CRD as a multi-document YAML stream
pub fn render_crds() -> Result<String, serde_yaml::Error> {
    let docs = all_crds()
        .iter()
        .map(serde_yaml::to_string)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(docs.join("---\n"))
}

/// Install or update every Shipper CRD with server-side apply
pub async fn ensure_crds_installed(client: &Client) -> shipper_common::Result<()> {
    info!("installing Shipper CRDs");
    apply_crds(client, &all_crds(), CRD_FIELD_MANAGER).await
}
