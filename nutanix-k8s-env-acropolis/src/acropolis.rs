use reqwest::{Client, Response, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use nutanix_k8s_env::error::{ConfigurationError, Error};
use nutanix_k8s_env::hypervisor::HypervisorClient;
use nutanix_k8s_env::model::{
    ClusterConnection, ClusterInfo, Image, ImageCreateSpec, Network, PowerTransition,
    ProgressStatus, StorageContainer, TaskRef, TaskStatus, VirtualMachine, VmCloneSpec,
    VmCreateSpec,
};

const API_V1: &str = "v1";
const API_V2: &str = "v2.0";

const GIB: u64 = 1024 * 1024 * 1024;

/// Session against the Prism gateway of one Acropolis cluster.
pub struct Acropolis {
    client: Client,
    api_url: String,
}

impl Acropolis {
    /// Logs in once; the session cookie authenticates every later call.
    pub async fn connect(connection: &ClusterConnection) -> Result<Self, Error> {
        let client = Client::builder()
            .cookie_store(true)
            .danger_accept_invalid_certs(true)
            .build()
            .map_err(transport)?;

        let api_address = connection.api_address();
        let login_url = format!("{api_address}/PrismGateway/j_spring_security_check");
        let credentials = &connection.credentials;
        let response = client
            .post(&login_url)
            .form(&[
                ("j_username", credentials.username.as_str()),
                ("j_password", credentials.password.as_str()),
            ])
            .send()
            .await
            .map_err(|e| ConfigurationError::ConnectionProblem {
                address: api_address.clone(),
                source: e.into(),
            })?;

        match response.status() {
            StatusCode::OK => tracing::info!("Connected to Nutanix API at {api_address}"),
            StatusCode::UNAUTHORIZED => return Err(ConfigurationError::InvalidCredentials.into()),
            status => {
                tracing::error!("On connection Nutanix API returned {status}");
                return Err(Error::UnexpectedResponse {
                    url: login_url,
                    status: status.as_u16(),
                });
            }
        }

        Ok(Acropolis {
            client,
            api_url: format!("{api_address}/PrismGateway/services/rest"),
        })
    }

    async fn get<T: DeserializeOwned>(
        &self,
        api_version: &str,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, Error> {
        let url = format!("{}/{api_version}/{path}", self.api_url);
        tracing::debug!("Calling GET on {url} with {query:?}");
        let response = self
            .client
            .get(&url)
            .query(query)
            .send()
            .await
            .map_err(transport)?;
        decode(url, response, StatusCode::OK).await
    }

    async fn post<B: Serialize, T: DeserializeOwned>(
        &self,
        api_version: &str,
        path: &str,
        body: &B,
    ) -> Result<T, Error> {
        let url = format!("{}/{api_version}/{path}", self.api_url);
        tracing::debug!(
            "Calling POST on {url} with {}",
            serde_json::to_string_pretty(body).unwrap_or_default()
        );
        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(transport)?;
        decode(url, response, StatusCode::CREATED).await
    }
}

impl HypervisorClient for Acropolis {
    async fn cluster_info(&self) -> Result<ClusterInfo, Error> {
        let cluster: AcropolisCluster = self.get(API_V1, "cluster", &[]).await?;
        Ok(ClusterInfo {
            uuid: cluster.uuid,
            name: cluster.name,
            version: cluster.version,
        })
    }

    async fn search_vms(&self, query: &str) -> Result<Vec<VirtualMachine>, Error> {
        let result: Entities<AcropolisVm> = self
            .get(API_V1, "vms", &[("searchString", query)])
            .await?;
        Ok(result.entities.into_iter().map(from_acropolis_vm).collect())
    }

    async fn create_vm(&self, spec: &VmCreateSpec) -> Result<TaskRef, Error> {
        self.post(API_V2, "vms", &to_acropolis_vm_create(spec))
            .await
    }

    async fn clone_vm(&self, vm_uuid: &str, specs: &[VmCloneSpec]) -> Result<TaskRef, Error> {
        let body = AcropolisCloneSpecList {
            spec_list: specs.iter().map(to_acropolis_clone_spec).collect(),
        };
        self.post(API_V2, &format!("vms/{vm_uuid}/clone"), &body)
            .await
    }

    async fn set_vm_power(
        &self,
        vm_uuid: &str,
        transition: PowerTransition,
    ) -> Result<TaskRef, Error> {
        let body = AcropolisPowerState { transition };
        self.post(API_V2, &format!("vms/{vm_uuid}/set_power_state"), &body)
            .await
    }

    async fn get_task(&self, task_uuid: &str) -> Result<TaskStatus, Error> {
        let task: AcropolisTask = self
            .get(API_V2, &format!("tasks/{task_uuid}"), &[])
            .await?;
        Ok(from_acropolis_task(task))
    }

    async fn list_networks(&self) -> Result<Vec<Network>, Error> {
        let result: Entities<AcropolisNetwork> = self.get(API_V2, "networks", &[]).await?;
        let networks = result
            .entities
            .into_iter()
            .map(|n| Network {
                uuid: n.uuid,
                name: n.name,
            })
            .collect();
        Ok(networks)
    }

    async fn list_images(&self) -> Result<Vec<Image>, Error> {
        let result: Entities<AcropolisImage> = self
            .get(API_V2, "images/", &[("include_vm_disk_sizes", "false")])
            .await?;
        let images = result
            .entities
            .into_iter()
            .map(|i| Image {
                uuid: i.uuid,
                name: i.name,
                vm_disk_id: i.vm_disk_id,
            })
            .collect();
        Ok(images)
    }

    async fn create_image(&self, spec: &ImageCreateSpec) -> Result<TaskRef, Error> {
        let body = AcropolisImageCreate {
            name: spec.name.clone(),
            image_type: "DISK_IMAGE",
            image_import_spec: AcropolisImageImport {
                storage_container_name: spec.storage_container_name.clone(),
                url: spec.url.clone(),
            },
        };
        self.post(API_V2, "images", &body).await
    }

    async fn search_storage_containers(
        &self,
        name: &str,
    ) -> Result<Vec<StorageContainer>, Error> {
        let result: Entities<AcropolisStorageContainer> = self
            .get(API_V2, "storage_containers/", &[("search_string", name)])
            .await?;
        let containers = result
            .entities
            .into_iter()
            .map(|c| StorageContainer {
                uuid: c.storage_container_uuid,
                name: c.name,
            })
            .collect();
        Ok(containers)
    }
}

async fn decode<T: DeserializeOwned>(
    url: String,
    response: Response,
    expected: StatusCode,
) -> Result<T, Error> {
    let status = response.status();
    if status != expected {
        response.error_for_status_ref().map_err(transport)?;
        return Err(Error::UnexpectedResponse {
            url,
            status: status.as_u16(),
        });
    }

    let body: serde_json::Value = response.json().await.map_err(transport)?;
    tracing::debug!("{url} returned {body}");
    serde_json::from_value(body).map_err(|e| Error::Transport(e.into()))
}

fn transport(err: reqwest::Error) -> Error {
    Error::Transport(err.into())
}

fn from_acropolis_vm(vm: AcropolisVm) -> VirtualMachine {
    VirtualMachine {
        uuid: vm.uuid,
        name: vm.vm_name,
        power_state: vm.power_state,
        ip_addresses: vm.ip_addresses,
    }
}

fn from_acropolis_task(task: AcropolisTask) -> TaskStatus {
    let meta_response = task.meta_response.unwrap_or_default();
    TaskStatus {
        uuid: task.uuid,
        percentage_complete: task.percentage_complete,
        progress_status: task.progress_status,
        operation_type: task.operation_type,
        create_time_usecs: task.create_time_usecs,
        complete_time_usecs: task.complete_time_usecs,
        error_code: meta_response.error_code,
        error_detail: meta_response.error_detail,
    }
}

fn to_acropolis_vm_create(spec: &VmCreateSpec) -> AcropolisVmCreate {
    AcropolisVmCreate {
        name: spec.name.clone(),
        memory_mb: u64::from(spec.ram_size) * 1024,
        num_vcpus: spec.vcpu,
        description: String::new(),
        num_cores_per_vcpu: 1,
        vm_disks: vec![
            AcropolisVmDisk {
                is_cdrom: true,
                is_empty: Some(true),
                disk_address: AcropolisDiskAddress {
                    device_bus: Some("ide"),
                    vmdisk_uuid: None,
                },
                vm_disk_clone: None,
            },
            AcropolisVmDisk {
                is_cdrom: false,
                is_empty: None,
                disk_address: AcropolisDiskAddress {
                    device_bus: Some("scsi"),
                    vmdisk_uuid: None,
                },
                vm_disk_clone: Some(AcropolisDiskClone {
                    disk_address: AcropolisDiskAddress {
                        device_bus: None,
                        vmdisk_uuid: Some(spec.source_disk_uuid.clone()),
                    },
                    minimum_size: u64::from(spec.disk_size) * GIB,
                }),
            },
        ],
        vm_nics: vec![AcropolisVmNic {
            network_uuid: spec.network_uuid.clone(),
        }],
        hypervisor_type: "ACROPOLIS",
        affinity: None,
        vm_customization_config: AcropolisCustomization {
            userdata: spec.user_data.clone(),
            files_to_inject_list: vec![],
        },
    }
}

fn to_acropolis_clone_spec(spec: &VmCloneSpec) -> AcropolisCloneSpec {
    AcropolisCloneSpec {
        name: spec.name.clone(),
        memory_mb: u64::from(spec.ram_size) * 1024,
        num_vcpus: spec.vcpu,
        override_network_config: false,
    }
}

#[derive(Debug, Clone, Deserialize)]
struct Entities<T> {
    entities: Vec<T>,
}

#[derive(Debug, Clone, Deserialize)]
struct AcropolisCluster {
    uuid: Option<String>,
    name: String,
    version: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AcropolisVm {
    uuid: String,
    vm_name: String,
    power_state: Option<String>,
    #[serde(default)]
    ip_addresses: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct AcropolisTask {
    uuid: String,
    #[serde(default)]
    percentage_complete: u8,
    progress_status: ProgressStatus,
    operation_type: String,
    create_time_usecs: Option<u64>,
    complete_time_usecs: Option<u64>,
    meta_response: Option<AcropolisMetaResponse>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct AcropolisMetaResponse {
    error_code: Option<i64>,
    error_detail: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct AcropolisNetwork {
    uuid: String,
    name: String,
}

#[derive(Debug, Clone, Deserialize)]
struct AcropolisImage {
    uuid: String,
    name: String,
    vm_disk_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct AcropolisStorageContainer {
    storage_container_uuid: String,
    name: String,
}

#[derive(Debug, Clone, Serialize)]
struct AcropolisVmCreate {
    name: String,
    memory_mb: u64,
    num_vcpus: u32,
    description: String,
    num_cores_per_vcpu: u32,
    vm_disks: Vec<AcropolisVmDisk>,
    vm_nics: Vec<AcropolisVmNic>,
    hypervisor_type: &'static str,
    affinity: Option<serde_json::Value>,
    vm_customization_config: AcropolisCustomization,
}

#[derive(Debug, Clone, Serialize)]
struct AcropolisVmDisk {
    is_cdrom: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    is_empty: Option<bool>,
    disk_address: AcropolisDiskAddress,
    #[serde(skip_serializing_if = "Option::is_none")]
    vm_disk_clone: Option<AcropolisDiskClone>,
}

#[derive(Debug, Clone, Serialize)]
struct AcropolisDiskAddress {
    #[serde(skip_serializing_if = "Option::is_none")]
    device_bus: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    vmdisk_uuid: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
struct AcropolisDiskClone {
    disk_address: AcropolisDiskAddress,
    minimum_size: u64,
}

#[derive(Debug, Clone, Serialize)]
struct AcropolisVmNic {
    network_uuid: String,
}

#[derive(Debug, Clone, Serialize)]
struct AcropolisCustomization {
    userdata: String,
    files_to_inject_list: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
struct AcropolisCloneSpecList {
    spec_list: Vec<AcropolisCloneSpec>,
}

#[derive(Debug, Clone, Serialize)]
struct AcropolisCloneSpec {
    name: String,
    memory_mb: u64,
    num_vcpus: u32,
    override_network_config: bool,
}

#[derive(Debug, Clone, Serialize)]
struct AcropolisPowerState {
    transition: PowerTransition,
}

#[derive(Debug, Clone, Serialize)]
struct AcropolisImageCreate {
    name: String,
    image_type: &'static str,
    image_import_spec: AcropolisImageImport,
}

#[derive(Debug, Clone, Serialize)]
struct AcropolisImageImport {
    storage_container_name: String,
    url: String,
}

#[cfg(test)]
mod tests {
    use nutanix_k8s_env::model::{Credentials, TaskState};
    use serde_json::json;

    use super::*;

    #[test]
    fn vm_create_body_clones_image_disk() {
        let spec = VmCreateSpec {
            name: "base-vm".to_string(),
            vcpu: 2,
            ram_size: 4,
            disk_size: 10,
            network_uuid: "net-1".to_string(),
            source_disk_uuid: "disk-1".to_string(),
            user_data: "#cloud-config\nusers:".to_string(),
        };

        let body = serde_json::to_value(to_acropolis_vm_create(&spec)).unwrap();

        assert_eq!(
            body,
            json!({
                "name": "base-vm",
                "memory_mb": 4096,
                "num_vcpus": 2,
                "description": "",
                "num_cores_per_vcpu": 1,
                "vm_disks": [
                    {
                        "is_cdrom": true,
                        "is_empty": true,
                        "disk_address": {"device_bus": "ide"}
                    },
                    {
                        "is_cdrom": false,
                        "disk_address": {"device_bus": "scsi"},
                        "vm_disk_clone": {
                            "disk_address": {"vmdisk_uuid": "disk-1"},
                            "minimum_size": 10737418240u64
                        }
                    }
                ],
                "vm_nics": [{"network_uuid": "net-1"}],
                "hypervisor_type": "ACROPOLIS",
                "affinity": null,
                "vm_customization_config": {
                    "userdata": "#cloud-config\nusers:",
                    "files_to_inject_list": []
                }
            })
        );
    }

    #[test]
    fn clone_and_power_bodies() {
        let clone = AcropolisCloneSpecList {
            spec_list: vec![to_acropolis_clone_spec(&VmCloneSpec {
                name: "worker-0-demo".to_string(),
                vcpu: 4,
                ram_size: 8,
            })],
        };
        assert_eq!(
            serde_json::to_value(clone).unwrap(),
            json!({"spec_list": [{
                "name": "worker-0-demo",
                "memory_mb": 8192,
                "num_vcpus": 4,
                "override_network_config": false
            }]})
        );

        let power = AcropolisPowerState {
            transition: PowerTransition::On,
        };
        assert_eq!(
            serde_json::to_value(power).unwrap(),
            json!({"transition": "on"})
        );
    }

    #[test]
    fn v1_vm_listing_decodes() {
        let payload = json!({
            "metadata": {"grandTotalEntities": 2, "totalEntities": 2, "count": 2},
            "entities": [
                {
                    "uuid": "vm-1",
                    "vmName": "master-0-demo",
                    "powerState": "on",
                    "ipAddresses": ["10.0.0.5"]
                },
                {
                    "uuid": "vm-2",
                    "vmName": "worker-0-demo",
                    "powerState": "off"
                }
            ]
        });

        let result: Entities<AcropolisVm> = serde_json::from_value(payload).unwrap();
        let vms: Vec<VirtualMachine> = result.entities.into_iter().map(from_acropolis_vm).collect();

        assert_eq!(vms[0].name, "master-0-demo");
        assert_eq!(vms[0].ip_addresses, ["10.0.0.5"]);
        assert_eq!(vms[1].uuid, "vm-2");
        assert!(vms[1].ip_addresses.is_empty());
    }

    #[test]
    fn queued_task_without_progress_decodes() {
        let payload = json!({
            "uuid": "task-1",
            "meta_request": {"method_name": "VmClone"},
            "operation_type": "kVmClone",
            "progress_status": "Queued",
            "create_time_usecs": 1_500_000_000_000_000u64
        });

        let task: AcropolisTask = serde_json::from_value(payload).unwrap();
        let status = from_acropolis_task(task);

        assert_eq!(status.percentage_complete, 0);
        assert_eq!(status.progress_status, ProgressStatus::Queued);
        assert_eq!(status.state(), TaskState::Polling);
        assert_eq!(status.complete_time_usecs, None);
    }

    #[test]
    fn failed_task_keeps_reported_reason() {
        let payload = json!({
            "uuid": "task-1",
            "operation_type": "kVmCreate",
            "progress_status": "Failed",
            "percentage_complete": 100,
            "meta_response": {
                "error_code": 16,
                "error_detail": "Not enough memory on host"
            }
        });

        let task: AcropolisTask = serde_json::from_value(payload).unwrap();
        let status = from_acropolis_task(task);
        assert_eq!(status.state(), TaskState::Failed);

        let message = Error::TaskFailed(Box::new(status)).to_string();
        assert!(message.contains("Not enough memory on host"));
        assert!(message.contains("error code 16"));
    }

    #[test]
    fn image_listing_tolerates_pending_import() {
        let payload = json!({"entities": [
            {"uuid": "img-1", "name": "centos7", "vm_disk_id": "disk-1"},
            {"uuid": "img-2", "name": "half-imported"}
        ]});

        let result: Entities<AcropolisImage> = serde_json::from_value(payload).unwrap();

        assert_eq!(result.entities[0].vm_disk_id.as_deref(), Some("disk-1"));
        assert_eq!(result.entities[1].name, "half-imported");
        assert_eq!(result.entities[1].vm_disk_id, None);
    }

    #[derive(Deserialize)]
    struct LiveSettings {
        #[serde(rename = "NUTANIX_ADDRESS")]
        address: String,
        #[serde(rename = "NUTANIX_PORT")]
        port: u16,
        #[serde(rename = "NUTANIX_USER")]
        username: String,
        #[serde(rename = "NUTANIX_PASSWORD")]
        password: String,
    }

    async fn connect() -> Acropolis {
        let settings: LiveSettings = de_env::from_env().unwrap();
        let connection = ClusterConnection {
            address: settings.address,
            port: settings.port,
            credentials: Credentials {
                username: settings.username,
                password: settings.password,
            },
        };
        Acropolis::connect(&connection).await.unwrap()
    }

    #[tokio::test]
    #[ignore]
    async fn cluster_info() {
        let acropolis = connect().await;
        let cluster = acropolis.cluster_info().await.unwrap();
        assert!(!cluster.name.is_empty());
    }

    #[tokio::test]
    #[ignore]
    async fn list_networks_and_images() {
        let acropolis = connect().await;
        let networks = acropolis.list_networks().await.unwrap();
        assert!(!networks.is_empty());
        let images = acropolis.list_images().await.unwrap();
        assert!(images.iter().all(|image| !image.name.is_empty()));
    }

    #[tokio::test]
    #[ignore]
    async fn rejects_invalid_credentials() {
        let settings: LiveSettings = de_env::from_env().unwrap();
        let connection = ClusterConnection {
            address: settings.address,
            port: settings.port,
            credentials: Credentials {
                username: settings.username,
                password: format!("{}-wrong", settings.password),
            },
        };
        let err = Acropolis::connect(&connection).await.err().unwrap();
        assert!(matches!(
            err,
            Error::Configuration(ConfigurationError::InvalidCredentials)
        ));
    }
}
