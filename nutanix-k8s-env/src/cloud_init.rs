use std::{fs, path::Path, sync::OnceLock};

use regex::Regex;

use crate::error::Error;

pub const SSH_KEY_FILE_PATTERN: &str = r"^(?P<username>[a-z_][a-z0-9_-]*[$]?)\.pub$";

const CLOUD_CONFIG_HEADER: &str = "#cloud-config\nusers:";

/// Cloud-init user-data authorizing one user per discovered SSH key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloudConfig(String);

impl CloudConfig {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for CloudConfig {
    fn from(document: String) -> Self {
        CloudConfig(document)
    }
}

/// Builds the cloud-init document from `<username>.pub` files found in
/// `ssh_keys_dir`. Entries are ordered by file name.
pub fn generate(ssh_keys_dir: &Path) -> Result<CloudConfig, Error> {
    static KEY_FILE: OnceLock<Regex> = OnceLock::new();
    let re = KEY_FILE.get_or_init(|| Regex::new(SSH_KEY_FILE_PATTERN).expect("key pattern is valid"));

    let mut keys = Vec::new();
    for entry in fs::read_dir(ssh_keys_dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let file_name = entry.file_name();
        let Some(file_name) = file_name.to_str() else {
            continue;
        };
        let Some(captures) = re.captures(file_name) else {
            tracing::debug!("Skipping {file_name}, it doesn't look like a public key");
            continue;
        };
        keys.push((captures["username"].to_string(), entry.path()));
    }

    if keys.is_empty() {
        return Err(Error::MissingKeys {
            dir: ssh_keys_dir.to_path_buf(),
            pattern: SSH_KEY_FILE_PATTERN.to_string(),
        });
    }
    keys.sort();

    let mut parts = vec![CLOUD_CONFIG_HEADER.to_string()];
    for (username, path) in keys {
        let ssh_key = fs::read_to_string(&path)?;
        parts.push(user_part(&username, ssh_key.trim()));
    }

    let cloud_config = parts.join("\n");
    tracing::info!("Prepared cloud config for vms.\n{cloud_config}");
    Ok(CloudConfig(cloud_config))
}

fn user_part(username: &str, ssh_key: &str) -> String {
    [
        format!("  - name: {username}"),
        "    shell: /bin/bash".to_string(),
        "    sudo: ['ALL=(ALL) NOPASSWD:ALL']".to_string(),
        "    lock_passwd: true".to_string(),
        "    ssh-authorized-keys:".to_string(),
        format!("      - {ssh_key}"),
    ]
    .join("\n")
}
