use std::{fs::File, path::Path, sync::Mutex};

use anyhow::Error;
use tracing_subscriber::{
    filter::{LevelFilter, Targets},
    fmt,
    layer::SubscriberExt,
    util::SubscriberInitExt,
    Layer,
};

/// Keeps the debug log file alive; syncs it to disk on drop.
pub struct LogGuard {
    file: File,
}

impl Drop for LogGuard {
    fn drop(&mut self) {
        if let Err(err) = self.file.sync_all() {
            eprintln!("Failed to sync log file: {err}");
        }
    }
}

/// INFO and above goes to stderr, DEBUG from this project to `log_file`.
pub fn init(log_file: &Path) -> Result<LogGuard, Error> {
    let file = File::create(log_file)?;
    let guard = LogGuard {
        file: file.try_clone()?,
    };

    let console = fmt::layer()
        .with_writer(std::io::stderr)
        .with_filter(LevelFilter::INFO);
    let debug_file = fmt::layer()
        .with_ansi(false)
        .with_writer(Mutex::new(file))
        .with_filter(
            Targets::new()
                .with_default(LevelFilter::INFO)
                .with_target("nutanix_k8s_env", LevelFilter::DEBUG)
                .with_target("nutanix_k8s_env_acropolis", LevelFilter::DEBUG),
        );

    tracing_subscriber::registry()
        .with(console)
        .with(debug_file)
        .try_init()?;

    Ok(guard)
}
