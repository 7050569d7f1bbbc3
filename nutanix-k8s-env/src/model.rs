use std::fmt;

use serde::{Deserialize, Serialize};

/// Kubernetes role a cloned node plays. Its name prefixes the VM name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Master,
    Worker,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Master => "master",
            Role::Worker => "worker",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shape of every node of one role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeRoleConfig {
    pub role: Role,
    pub number_of_nodes: u32,
    pub number_of_vcpu: u32,
    /// RAM in GB.
    pub ram_size: u32,
}

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterConnection {
    pub address: String,
    pub port: u16,
    pub credentials: Credentials,
}

impl ClusterConnection {
    pub fn api_address(&self) -> String {
        format!("https://{}:{}", self.address, self.port)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterInfo {
    pub uuid: Option<String>,
    pub name: String,
    pub version: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtualMachine {
    pub uuid: String,
    pub name: String,
    pub power_state: Option<String>,
    pub ip_addresses: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Network {
    pub uuid: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    pub uuid: String,
    pub name: String,
    /// Disk backing the image; new VM disks are cloned from it. Absent while
    /// an import is pending or after it failed.
    pub vm_disk_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageContainer {
    pub uuid: String,
    pub name: String,
}

/// Reference returned by every asynchronous hypervisor operation.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TaskRef {
    pub task_uuid: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub enum ProgressStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
    Aborted,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskStatus {
    pub uuid: String,
    pub percentage_complete: u8,
    pub progress_status: ProgressStatus,
    pub operation_type: String,
    pub create_time_usecs: Option<u64>,
    pub complete_time_usecs: Option<u64>,
    pub error_code: Option<i64>,
    /// Reason reported by the hypervisor for a failed task.
    pub error_detail: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Polling,
    Succeeded,
    Failed,
}

impl TaskStatus {
    pub fn state(&self) -> TaskState {
        match self.progress_status {
            ProgressStatus::Failed => TaskState::Failed,
            ProgressStatus::Succeeded if self.percentage_complete == 100 => TaskState::Succeeded,
            _ => TaskState::Polling,
        }
    }

    /// Wall-clock duration of a finished task, in seconds.
    pub fn duration_secs(&self) -> Option<f64> {
        let start = self.create_time_usecs?;
        let end = self.complete_time_usecs?;
        Some(end.saturating_sub(start) as f64 / 1_000_000.0)
    }

    pub fn failure_reason(&self) -> String {
        match (&self.error_detail, self.error_code) {
            (Some(detail), Some(code)) => format!("{detail} (error code {code})"),
            (Some(detail), None) => detail.clone(),
            (None, Some(code)) => format!("error code {code}"),
            (None, None) => "no reason reported".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PowerTransition {
    On,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmCreateSpec {
    pub name: String,
    pub vcpu: u32,
    /// RAM in GB.
    pub ram_size: u32,
    /// Minimum size of the system disk in GB.
    pub disk_size: u32,
    pub network_uuid: String,
    pub source_disk_uuid: String,
    pub user_data: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmCloneSpec {
    pub name: String,
    pub vcpu: u32,
    /// RAM in GB.
    pub ram_size: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageCreateSpec {
    pub name: String,
    pub storage_container_name: String,
    pub url: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(progress_status: ProgressStatus, percentage_complete: u8) -> TaskStatus {
        TaskStatus {
            uuid: "task-1".to_string(),
            percentage_complete,
            progress_status,
            operation_type: "VmClone".to_string(),
            create_time_usecs: Some(1_000_000),
            complete_time_usecs: None,
            error_code: None,
            error_detail: None,
        }
    }

    #[test]
    fn failed_status_is_failed_regardless_of_progress() {
        assert_eq!(task(ProgressStatus::Failed, 0).state(), TaskState::Failed);
        assert_eq!(task(ProgressStatus::Failed, 100).state(), TaskState::Failed);
    }

    #[test]
    fn succeeded_requires_full_progress() {
        assert_eq!(task(ProgressStatus::Succeeded, 100).state(), TaskState::Succeeded);
        assert_eq!(task(ProgressStatus::Succeeded, 99).state(), TaskState::Polling);
        assert_eq!(task(ProgressStatus::Running, 100).state(), TaskState::Polling);
        assert_eq!(task(ProgressStatus::Queued, 0).state(), TaskState::Polling);
    }

    #[test]
    fn duration_is_computed_from_usecs() {
        let mut status = task(ProgressStatus::Succeeded, 100);
        assert_eq!(status.duration_secs(), None);
        status.complete_time_usecs = Some(3_500_000);
        assert_eq!(status.duration_secs(), Some(2.5));
    }

    #[test]
    fn failure_reason_prefers_reported_detail() {
        let mut status = task(ProgressStatus::Failed, 100);
        assert_eq!(status.failure_reason(), "no reason reported");
        status.error_code = Some(16);
        assert_eq!(status.failure_reason(), "error code 16");
        status.error_detail = Some("Not enough memory on host".to_string());
        assert_eq!(
            status.failure_reason(),
            "Not enough memory on host (error code 16)"
        );
    }

    #[test]
    fn unknown_progress_status_decodes() {
        let status: ProgressStatus = serde_json::from_str("\"Suspended\"").unwrap();
        assert_eq!(status, ProgressStatus::Unknown);
    }

    #[test]
    fn credentials_debug_hides_password() {
        let credentials = Credentials {
            username: "admin".to_string(),
            password: "secret".to_string(),
        };
        let debug = format!("{credentials:?}");
        assert!(debug.contains("admin"));
        assert!(!debug.contains("secret"));
    }
}
