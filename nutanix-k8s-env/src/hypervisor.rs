use crate::error::Error;
use crate::model::{
    ClusterInfo, Image, ImageCreateSpec, Network, PowerTransition, StorageContainer, TaskRef,
    TaskStatus, VirtualMachine, VmCloneSpec, VmCreateSpec,
};

#[cfg(test)]
use mockall::automock;

/// Operations of the hypervisor management API. Each call maps to one HTTP
/// request; mutating calls return a reference to an asynchronous task.
#[trait_variant::make(Send)]
#[cfg_attr(test, automock)]
pub trait HypervisorClient {
    async fn cluster_info(&self) -> Result<ClusterInfo, Error>;
    async fn search_vms(&self, query: &str) -> Result<Vec<VirtualMachine>, Error>;
    async fn create_vm(&self, spec: &VmCreateSpec) -> Result<TaskRef, Error>;
    async fn clone_vm(&self, vm_uuid: &str, specs: &[VmCloneSpec]) -> Result<TaskRef, Error>;
    async fn set_vm_power(
        &self,
        vm_uuid: &str,
        transition: PowerTransition,
    ) -> Result<TaskRef, Error>;
    async fn get_task(&self, task_uuid: &str) -> Result<TaskStatus, Error>;
    async fn list_networks(&self) -> Result<Vec<Network>, Error>;
    async fn list_images(&self) -> Result<Vec<Image>, Error>;
    async fn create_image(&self, spec: &ImageCreateSpec) -> Result<TaskRef, Error>;
    async fn search_storage_containers(&self, name: &str)
        -> Result<Vec<StorageContainer>, Error>;
}
