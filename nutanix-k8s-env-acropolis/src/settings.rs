use std::{
    io::{self, Write},
    path::PathBuf,
    time::Duration,
};

use serde::Deserialize;

use nutanix_k8s_env::error::{ConfigurationError, Error};
use nutanix_k8s_env::model::Credentials;
use nutanix_k8s_env::orchestrator::PollSettings;

#[derive(Deserialize)]
pub struct EnvSettings {
    /// Kubernetes cluster name; also the domain part of every node name.
    #[serde(rename = "K8S_CLUSTER")]
    pub k8s_cluster: String,
    #[serde(rename = "NUTANIX_CLUSTER")]
    pub nutanix_cluster: String,
    #[serde(rename = "BASE_VM_NAME")]
    pub base_vm_name: String,
    #[serde(rename = "SSH_DIR")]
    pub ssh_dir: PathBuf,
    #[serde(rename = "NUTANIX_USER", default)]
    pub username: Option<String>,
    #[serde(rename = "NUTANIX_PASSWORD", default)]
    pub password: Option<String>,
    #[serde(rename = "K8S_CONFIG", default = "default_k8s_config")]
    pub k8s_config: PathBuf,
    #[serde(rename = "NUTANIX_CONFIG", default = "default_nutanix_config")]
    pub nutanix_config: PathBuf,
    #[serde(rename = "INVENTORY_FILE", default = "default_inventory_file")]
    pub inventory_file: PathBuf,
    #[serde(rename = "LOG_FILE", default = "default_log_file")]
    pub log_file: PathBuf,
    #[serde(rename = "POLL_INTERVAL", default)]
    pub poll_interval: Option<String>,
    #[serde(rename = "POLL_TIMEOUT", default)]
    pub poll_timeout: Option<String>,
}

impl EnvSettings {
    pub fn poll_settings(&self) -> Result<PollSettings, ConfigurationError> {
        let defaults = PollSettings::default();
        Ok(PollSettings {
            interval: parse_duration("POLL_INTERVAL", self.poll_interval.as_deref())?
                .unwrap_or(defaults.interval),
            timeout: parse_duration("POLL_TIMEOUT", self.poll_timeout.as_deref())?
                .unwrap_or(defaults.timeout),
        })
    }

    /// Credentials from the environment, prompting for whatever is missing.
    pub fn credentials(&self) -> Result<Credentials, Error> {
        let username = match &self.username {
            Some(username) => username.clone(),
            None => {
                print!("Nutanix API User: ");
                io::stdout().flush()?;
                let mut username = String::new();
                io::stdin().read_line(&mut username)?;
                username.trim().to_string()
            }
        };
        let password = match &self.password {
            Some(password) => password.clone(),
            None => rpassword::prompt_password("Password: ")?,
        };
        Ok(Credentials { username, password })
    }
}

fn parse_duration(
    name: &str,
    value: Option<&str>,
) -> Result<Option<Duration>, ConfigurationError> {
    value
        .map(|value| {
            duration_str::parse(value)
                .map_err(|e| ConfigurationError::InvalidValue(format!("{name}={value}: {e}")))
        })
        .transpose()
}

fn default_k8s_config() -> PathBuf {
    PathBuf::from("configs/k8s_cluster.yml")
}

fn default_nutanix_config() -> PathBuf {
    PathBuf::from("configs/nutanix_cluster.yml")
}

fn default_inventory_file() -> PathBuf {
    PathBuf::from("inventory")
}

fn default_log_file() -> PathBuf {
    PathBuf::from("/tmp/k8s_installer.log")
}
