use std::{fmt, path::PathBuf, time::Duration};

use crate::model::TaskStatus;

pub const SUPPORTED_NUMBER_OF_MASTERS: [u32; 3] = [1, 3, 5];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemKind {
    Vm,
    Image,
    Network,
    StorageContainer,
}

impl fmt::Display for ItemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ItemKind::Vm => "vm",
            ItemKind::Image => "image",
            ItemKind::Network => "network",
            ItemKind::StorageContainer => "storage container",
        };
        f.write_str(name)
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigurationError {
    #[error("Number of master nodes must belong to set {SUPPORTED_NUMBER_OF_MASTERS:?}, got {0}")]
    InvalidNumberOfMasters(u32),
    #[error("Invalid config field value: {0}")]
    InvalidValue(String),
    #[error("Missing {0} section in configuration file")]
    MissingSection(&'static str),
    #[error("Missing {0} cluster configuration")]
    MissingCluster(String),
    #[error("Configuration missing field {0}")]
    MissingField(&'static str),
    #[error("Invalid credentials")]
    InvalidCredentials,
    #[error("Problem with connection to Nutanix API at {address}. Check Prism address, port and connectivity")]
    ConnectionProblem {
        address: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("Kubernetes cluster name (domain) {0:?} needs to match RFC 1035")]
    InvalidDomain(String),
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    #[error("{kind} {name} does not exist")]
    ItemNotFound { kind: ItemKind, name: String },
    #[error("There is {actual} {kind}(s) with name {name}, expected number was {expected}")]
    InvalidItemCount {
        kind: ItemKind,
        name: String,
        expected: usize,
        actual: usize,
    },
    #[error(
        "Task {} ({}) failed: {}. Detailed info: {0:?}",
        .0.operation_type,
        .0.uuid,
        .0.failure_reason()
    )]
    TaskFailed(Box<TaskStatus>),
    #[error("Image {name} has no vm disk, its import is pending or failed")]
    ImageWithoutDisk { name: String },
    #[error("There weren't any files matching {pattern} in ssh keys directory {}", dir.display())]
    MissingKeys { dir: PathBuf, pattern: String },
    #[error("Timed out after {after:?} waiting for {waiting_for}")]
    TimedOut { waiting_for: String, after: Duration },
    #[error("Cancelled before {operation} finished")]
    Cancelled { operation: String },
    #[error("Unexpected response status {status} from {url}")]
    UnexpectedResponse { url: String, status: u16 },
    #[error(transparent)]
    Transport(anyhow::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Resolves a name-based lookup that must match exactly one item.
pub fn exactly_one<T>(kind: ItemKind, name: &str, mut items: Vec<T>) -> Result<T, Error> {
    match items.len() {
        1 => Ok(items.remove(0)),
        0 => Err(Error::ItemNotFound {
            kind,
            name: name.to_string(),
        }),
        actual => Err(Error::InvalidItemCount {
            kind,
            name: name.to_string(),
            expected: 1,
            actual,
        }),
    }
}
