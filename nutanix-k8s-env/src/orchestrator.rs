use std::{collections::BTreeMap, future::Future, sync::Arc, time::Duration};

use tokio_util::sync::CancellationToken;

use crate::{
    cloud_init::CloudConfig,
    config::K8sClusterConfig,
    error::{exactly_one, Error, ItemKind},
    hypervisor::HypervisorClient,
    model::{
        Image, ImageCreateSpec, Network, NodeRoleConfig, PowerTransition, Role, StorageContainer,
        TaskRef, TaskState, TaskStatus, VirtualMachine, VmCloneSpec, VmCreateSpec,
    },
};

/// CentOS cloud image imported when the configured OS image is missing.
pub const OS_IMAGE_URL: &str =
    "http://cloud.centos.org/centos/7/images/CentOS-7-x86_64-GenericCloud-1702.qcow2c";

pub const BASE_VM_CPU: u32 = 2;
pub const BASE_VM_RAM: u32 = 4;
pub const BASE_VM_DISK: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    pub interval: Duration,
    /// Upper bound for a single wait (one task, or IP assignment).
    pub timeout: Duration,
}

impl Default for PollSettings {
    fn default() -> Self {
        PollSettings {
            interval: Duration::from_secs(5),
            timeout: Duration::from_secs(3600),
        }
    }
}

/// Shape of the VM every cluster node is cloned from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BaseVm {
    pub name: String,
    pub vcpu: u32,
    pub ram_size: u32,
    pub disk_size: u32,
}

impl BaseVm {
    pub fn new(name: impl Into<String>) -> Self {
        BaseVm {
            name: name.into(),
            vcpu: BASE_VM_CPU,
            ram_size: BASE_VM_RAM,
            disk_size: BASE_VM_DISK,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProvisionPlan {
    /// Kubernetes cluster name, suffix of every node VM name.
    pub domain: String,
    pub cluster: K8sClusterConfig,
    pub base_vm: BaseVm,
    pub os_image_url: String,
    pub cloud_config: CloudConfig,
}

pub struct Orchestrator<H> {
    pub client: Arc<H>,
    pub poll: PollSettings,
}

impl<H> Orchestrator<H>
where
    H: HypervisorClient,
{
    /// Runs the whole provisioning sequence and returns the first address of
    /// every node VM, keyed by VM name.
    pub async fn provision(
        &self,
        plan: &ProvisionPlan,
        cancel: &CancellationToken,
    ) -> Result<BTreeMap<String, String>, Error> {
        let cluster = self.client.cluster_info().await?;
        tracing::info!(
            "Working on Nutanix cluster {} (version {})",
            cluster.name,
            cluster.version.as_deref().unwrap_or("unknown")
        );

        let domain = plan.domain.as_str();
        tracing::info!("Check if there are any {domain} cluster vms");
        self.get_vms(domain, Some(0)).await?;
        tracing::info!("There is no vm with {domain} in name. Proceeding");

        tracing::info!("Get network configuration and get or create OS image");
        let common = &plan.cluster.common;
        let image_spec = ImageCreateSpec {
            name: common.os_image_name.clone(),
            storage_container_name: common.storage_container_name.clone(),
            url: plan.os_image_url.clone(),
        };
        let (network, image) = futures::try_join!(
            self.find_network(&common.network_name),
            self.ensure_os_image(&image_spec, cancel)
        )?;

        let source_disk_uuid = image
            .vm_disk_id
            .ok_or_else(|| Error::ImageWithoutDisk { name: image.name })?;

        tracing::info!("Get or create base vm");
        let base_vm_spec = VmCreateSpec {
            name: plan.base_vm.name.clone(),
            vcpu: plan.base_vm.vcpu,
            ram_size: plan.base_vm.ram_size,
            disk_size: plan.base_vm.disk_size,
            network_uuid: network.uuid,
            source_disk_uuid,
            user_data: plan.cloud_config.as_str().to_string(),
        };
        let base_vm = self.ensure_base_vm(&base_vm_spec, cancel).await?;

        tracing::info!("Clone vms");
        self.clone_vms(&base_vm.uuid, &plan.cluster.roles(), domain, cancel)
            .await?;

        let expected_count = plan.cluster.total_nodes();
        tracing::info!("Check if all ({expected_count}) vms for {domain} cluster were created");
        self.get_vms(domain, Some(expected_count)).await?;

        tracing::info!("Turn on vms");
        self.power_on(domain, cancel).await?;

        tracing::info!("Get vms ips");
        let vms = self.wait_for_ips(domain, cancel).await?;
        let hosts = vms
            .into_iter()
            .filter_map(|(name, ips)| ips.into_iter().next().map(|ip| (name, ip)))
            .collect();

        Ok(hosts)
    }

    /// Searches VMs whose name contains `query`. With `expected_count` set,
    /// the number of matches must be exactly that.
    pub async fn get_vms(
        &self,
        query: &str,
        expected_count: Option<usize>,
    ) -> Result<Vec<VirtualMachine>, Error> {
        let vms = self.client.search_vms(query).await?;
        match expected_count {
            None => Ok(vms),
            Some(expected) if vms.len() == expected => Ok(vms),
            Some(_) if vms.is_empty() => Err(Error::ItemNotFound {
                kind: ItemKind::Vm,
                name: query.to_string(),
            }),
            Some(expected) => Err(Error::InvalidItemCount {
                kind: ItemKind::Vm,
                name: query.to_string(),
                expected,
                actual: vms.len(),
            }),
        }
    }

    pub async fn find_network(&self, name: &str) -> Result<Network, Error> {
        let networks = self
            .client
            .list_networks()
            .await?
            .into_iter()
            .filter(|network| network.name == name)
            .collect();
        exactly_one(ItemKind::Network, name, networks)
    }

    pub async fn find_storage_container(&self, name: &str) -> Result<StorageContainer, Error> {
        let containers = self
            .client
            .search_storage_containers(name)
            .await?
            .into_iter()
            .filter(|container| container.name == name)
            .collect();
        exactly_one(ItemKind::StorageContainer, name, containers)
    }

    pub async fn ensure_os_image(
        &self,
        spec: &ImageCreateSpec,
        cancel: &CancellationToken,
    ) -> Result<Image, Error> {
        self.get_or_create(
            ItemKind::Image,
            &spec.name,
            move || self.images_named(&spec.name),
            move || async move {
                let container = self
                    .find_storage_container(&spec.storage_container_name)
                    .await?;
                tracing::info!(
                    "Importing image {} from {} into {}",
                    spec.name,
                    spec.url,
                    container.name
                );
                self.client.create_image(spec).await
            },
            cancel,
        )
        .await
    }

    pub async fn ensure_base_vm(
        &self,
        spec: &VmCreateSpec,
        cancel: &CancellationToken,
    ) -> Result<VirtualMachine, Error> {
        self.get_or_create(
            ItemKind::Vm,
            &spec.name,
            move || self.vms_named(&spec.name),
            move || self.client.create_vm(spec),
            cancel,
        )
        .await
    }

    /// Clones `base_vm_uuid` into every node of every role in one batch.
    pub async fn clone_vms(
        &self,
        base_vm_uuid: &str,
        roles: &[&NodeRoleConfig],
        domain: &str,
        cancel: &CancellationToken,
    ) -> Result<(), Error> {
        let specs = clone_specs(roles, domain);
        ensure_active(cancel, || format!("clone of {} vms", specs.len()))?;
        tracing::debug!("Cloning {} vms from {base_vm_uuid}", specs.len());
        let task = self.client.clone_vm(base_vm_uuid, &specs).await?;
        self.wait_for_task(&task, cancel).await?;
        Ok(())
    }

    pub async fn power_on(&self, domain: &str, cancel: &CancellationToken) -> Result<(), Error> {
        for vm in self.get_vms(domain, None).await? {
            ensure_active(cancel, || format!("power on of {}", vm.name))?;
            tracing::debug!("Powering on {} ({})", vm.name, vm.uuid);
            let task = self
                .client
                .set_vm_power(&vm.uuid, PowerTransition::On)
                .await?;
            self.wait_for_task(&task, cancel).await?;
        }
        Ok(())
    }

    /// Polls the VMs of `domain` until each one reports at least one address.
    pub async fn wait_for_ips(
        &self,
        domain: &str,
        cancel: &CancellationToken,
    ) -> Result<BTreeMap<String, Vec<String>>, Error> {
        let interval = self.poll.interval;
        self.poll_until(&format!("{domain} vms ips"), cancel, move || async move {
            let vms: BTreeMap<String, Vec<String>> = self
                .get_vms(domain, None)
                .await?
                .into_iter()
                .map(|vm| (vm.name, vm.ip_addresses))
                .collect();

            if vms.values().all(|ips| !ips.is_empty()) {
                Ok::<_, Error>(Some(vms))
            } else {
                tracing::info!(
                    "Not all ips assigned. Waiting {interval:?} before another check"
                );
                Ok(None)
            }
        })
        .await
    }

    pub async fn wait_for_task(
        &self,
        task: &TaskRef,
        cancel: &CancellationToken,
    ) -> Result<TaskStatus, Error> {
        let interval = self.poll.interval;
        let waiting_for = format!("task {}", task.task_uuid);
        let status = self
            .poll_until(&waiting_for, cancel, move || async move {
                let status = self.client.get_task(&task.task_uuid).await?;
                match status.state() {
                    TaskState::Failed => Err(Error::TaskFailed(Box::new(status))),
                    TaskState::Succeeded => Ok(Some(status)),
                    TaskState::Polling => {
                        tracing::info!(
                            "Task {} ({}) is currently {}% complete. Waiting {interval:?} before another check",
                            status.operation_type,
                            status.uuid,
                            status.percentage_complete
                        );
                        Ok(None)
                    }
                }
            })
            .await?;

        match status.duration_secs() {
            Some(secs) => tracing::info!(
                "Task {} ({}) finished in {secs} seconds",
                status.operation_type,
                status.uuid
            ),
            None => tracing::info!("Task {} ({}) finished", status.operation_type, status.uuid),
        }
        Ok(status)
    }

    async fn get_or_create<T, L, LF, C, CF>(
        &self,
        kind: ItemKind,
        name: &str,
        lookup: L,
        create: C,
        cancel: &CancellationToken,
    ) -> Result<T, Error>
    where
        L: Fn() -> LF,
        LF: Future<Output = Result<Vec<T>, Error>>,
        C: FnOnce() -> CF,
        CF: Future<Output = Result<TaskRef, Error>>,
    {
        let found = lookup().await?;
        if !found.is_empty() {
            return exactly_one(kind, name, found);
        }

        ensure_active(cancel, || format!("creation of {kind} {name}"))?;
        tracing::info!("There is no {kind} {name}. Creating..");
        let task = create().await?;
        self.wait_for_task(&task, cancel).await?;
        exactly_one(kind, name, lookup().await?)
    }

    async fn images_named(&self, name: &str) -> Result<Vec<Image>, Error> {
        let images = self
            .client
            .list_images()
            .await?
            .into_iter()
            .filter(|image| image.name == name)
            .collect();
        Ok(images)
    }

    async fn vms_named(&self, name: &str) -> Result<Vec<VirtualMachine>, Error> {
        let vms = self
            .client
            .search_vms(name)
            .await?
            .into_iter()
            .filter(|vm| vm.name == name)
            .collect();
        Ok(vms)
    }

    /// Re-runs `check` every poll interval until it yields a value, fails,
    /// the poll timeout elapses or `cancel` fires.
    async fn poll_until<T, F, Fut>(
        &self,
        waiting_for: &str,
        cancel: &CancellationToken,
        check: F,
    ) -> Result<T, Error>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<Option<T>, Error>>,
    {
        let poll = async {
            loop {
                match check().await {
                    Ok(Some(done)) => return Ok(done),
                    Ok(None) => tokio::time::sleep(self.poll.interval).await,
                    Err(err) => return Err(err),
                }
            }
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Error::Cancelled {
                operation: waiting_for.to_string(),
            }),
            result = tokio::time::timeout(self.poll.timeout, poll) => {
                result.unwrap_or_else(|_| Err(Error::TimedOut {
                    waiting_for: waiting_for.to_string(),
                    after: self.poll.timeout,
                }))
            }
        }
    }
}

/// Fails with `Cancelled` once `cancel` fired, so no new mutating request
/// goes out after an interrupt.
fn ensure_active(
    cancel: &CancellationToken,
    operation: impl FnOnce() -> String,
) -> Result<(), Error> {
    if cancel.is_cancelled() {
        return Err(Error::Cancelled {
            operation: operation(),
        });
    }
    Ok(())
}

pub fn vm_name(role: Role, index: u32, domain: &str) -> String {
    format!("{role}-{index}-{domain}")
}

/// One clone spec per node; indices restart at zero for every role.
pub fn clone_specs(roles: &[&NodeRoleConfig], domain: &str) -> Vec<VmCloneSpec> {
    roles
        .iter()
        .flat_map(|config| {
            (0..config.number_of_nodes).map(move |index| VmCloneSpec {
                name: vm_name(config.role, index, domain),
                vcpu: config.number_of_vcpu,
                ram_size: config.ram_size,
            })
        })
        .collect()
}
