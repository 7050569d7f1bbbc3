mod acropolis;
mod logging;
mod settings;

use std::sync::Arc;

use acropolis::Acropolis;
use anyhow::Error;
use nutanix_k8s_env::{
    cloud_init, config,
    config::K8sClusterConfig,
    inventory,
    orchestrator::{BaseVm, Orchestrator, ProvisionPlan, OS_IMAGE_URL},
};
use settings::EnvSettings;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Error> {
    let settings: EnvSettings = de_env::from_env()?;
    let _log_guard = logging::init(&settings.log_file)?;
    tracing::debug!("Starting..");

    let span = tracing::info_span!("provision", k8s_cluster = %settings.k8s_cluster);
    let result = run(settings).instrument(span).await;
    if let Err(err) = &result {
        tracing::error!("Provisioning failed: {err:#}");
    }

    tracing::debug!("Terminating..");
    result
}

async fn run(settings: EnvSettings) -> Result<(), Error> {
    config::validate_domain(&settings.k8s_cluster)?;

    let cluster = K8sClusterConfig::load(&settings.k8s_config)?;
    let credentials = settings.credentials()?;
    let connection = config::load_cluster_connection(
        &settings.nutanix_config,
        &settings.nutanix_cluster,
        credentials,
    )?;
    let cloud_config = cloud_init::generate(&settings.ssh_dir)?;

    let acropolis = Acropolis::connect(&connection).await?;
    let orchestrator = Orchestrator {
        client: Arc::new(acropolis),
        poll: settings.poll_settings()?,
    };

    let plan = ProvisionPlan {
        domain: settings.k8s_cluster.clone(),
        cluster,
        base_vm: BaseVm::new(settings.base_vm_name.clone()),
        os_image_url: OS_IMAGE_URL.to_string(),
        cloud_config,
    };

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Interrupted. Cancelling..");
                cancel.cancel();
            }
        }
    });

    let hosts = orchestrator.provision(&plan, &cancel).await?;

    tracing::info!("Generate ansible inventory");
    let rendered = inventory::render(&hosts);
    inventory::write(&settings.inventory_file, &rendered)?;
    tracing::info!(
        "Inventory successfully generated at {}",
        settings.inventory_file.display()
    );

    Ok(())
}
