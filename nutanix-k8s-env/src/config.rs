use std::{collections::HashMap, fs, path::Path, sync::OnceLock};

use regex::Regex;
use serde::Deserialize;

use crate::{
    error::{ConfigurationError, Error, SUPPORTED_NUMBER_OF_MASTERS},
    model::{ClusterConnection, Credentials, NodeRoleConfig, Role},
};

pub const DEFAULT_NUMBER_OF_NODES: u32 = 3;
pub const DEFAULT_NUMBER_OF_VCPU: u32 = 2;
pub const DEFAULT_RAM_SIZE: u32 = 4;

const DOMAIN_NAME_PATTERN: &str =
    r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?(\.[a-z0-9]([-a-z0-9]*[a-z0-9])?)*$";

/// Settings shared by every node of the Kubernetes cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommonConfig {
    pub network_name: String,
    pub os_image_name: String,
    pub storage_container_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct K8sClusterConfig {
    pub common: CommonConfig,
    pub master: NodeRoleConfig,
    pub worker: NodeRoleConfig,
}

impl K8sClusterConfig {
    pub fn roles(&self) -> [&NodeRoleConfig; 2] {
        [&self.master, &self.worker]
    }

    pub fn total_nodes(&self) -> usize {
        (self.master.number_of_nodes + self.worker.number_of_nodes) as usize
    }

    pub fn load(path: &Path) -> Result<Self, Error> {
        tracing::info!("Reading cluster configuration from {}", path.display());
        let content = fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self, Error> {
        let raw: RawK8sConfig = parse_yaml(content)?;

        let common = raw
            .common
            .ok_or(ConfigurationError::MissingSection("common"))?;
        let common = CommonConfig {
            network_name: common
                .network_name
                .ok_or(ConfigurationError::MissingField("network_name"))?,
            os_image_name: common
                .os_image_name
                .ok_or(ConfigurationError::MissingField("os_image_name"))?,
            storage_container_name: common
                .storage_container_name
                .ok_or(ConfigurationError::MissingField("storage_container_name"))?,
        };

        let master = role_config(Role::Master, raw.master.unwrap_or_default());
        if !SUPPORTED_NUMBER_OF_MASTERS.contains(&master.number_of_nodes) {
            return Err(ConfigurationError::InvalidNumberOfMasters(master.number_of_nodes).into());
        }
        let worker = role_config(Role::Worker, raw.worker.unwrap_or_default());

        Ok(K8sClusterConfig {
            common,
            master,
            worker,
        })
    }
}

/// Reads the connection parameters of `cluster_name` from the Nutanix
/// clusters document.
pub fn load_cluster_connection(
    path: &Path,
    cluster_name: &str,
    credentials: Credentials,
) -> Result<ClusterConnection, Error> {
    tracing::info!("Reading cluster configuration from {}", path.display());
    let content = fs::read_to_string(path)?;
    cluster_connection_from_yaml(&content, cluster_name, credentials)
}

pub fn cluster_connection_from_yaml(
    content: &str,
    cluster_name: &str,
    credentials: Credentials,
) -> Result<ClusterConnection, Error> {
    let raw: RawNutanixConfig = parse_yaml(content)?;
    let mut clusters = raw
        .clusters
        .ok_or(ConfigurationError::MissingSection("clusters"))?;
    let cluster = clusters
        .remove(cluster_name)
        .ok_or_else(|| ConfigurationError::MissingCluster(cluster_name.to_string()))?;

    Ok(ClusterConnection {
        address: cluster
            .address
            .ok_or(ConfigurationError::MissingField("address"))?,
        port: cluster.port.ok_or(ConfigurationError::MissingField("port"))?,
        credentials,
    })
}

/// Checks the Kubernetes cluster name against RFC 1035; it becomes the
/// suffix of every cloned VM name.
pub fn validate_domain(domain: &str) -> Result<(), ConfigurationError> {
    static DOMAIN_NAME: OnceLock<Regex> = OnceLock::new();
    let re = DOMAIN_NAME
        .get_or_init(|| Regex::new(DOMAIN_NAME_PATTERN).expect("domain pattern is valid"));
    if re.is_match(domain) {
        Ok(())
    } else {
        Err(ConfigurationError::InvalidDomain(domain.to_string()))
    }
}

fn parse_yaml<T: serde::de::DeserializeOwned>(content: &str) -> Result<T, Error> {
    serde_yaml::from_str(content)
        .map_err(|e| ConfigurationError::InvalidValue(e.to_string()).into())
}

fn role_config(role: Role, raw: RawRoleConfig) -> NodeRoleConfig {
    NodeRoleConfig {
        role,
        number_of_nodes: raw.number_of_nodes.unwrap_or(DEFAULT_NUMBER_OF_NODES),
        number_of_vcpu: raw.number_of_vcpu.unwrap_or(DEFAULT_NUMBER_OF_VCPU),
        ram_size: raw.ram_size.unwrap_or(DEFAULT_RAM_SIZE),
    }
}

#[derive(Debug, Deserialize)]
struct RawK8sConfig {
    common: Option<RawCommonConfig>,
    master: Option<RawRoleConfig>,
    worker: Option<RawRoleConfig>,
}

#[derive(Debug, Deserialize)]
struct RawCommonConfig {
    network_name: Option<String>,
    os_image_name: Option<String>,
    storage_container_name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawRoleConfig {
    number_of_nodes: Option<u32>,
    number_of_vcpu: Option<u32>,
    ram_size: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct RawNutanixConfig {
    clusters: Option<HashMap<String, RawClusterConfig>>,
}

#[derive(Debug, Deserialize)]
struct RawClusterConfig {
    address: Option<String>,
    port: Option<u16>,
}
