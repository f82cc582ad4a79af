use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;

use chrono::Local;

const MAX_LOG_SIZE: u64 = 512 * 1024;

/// Append-only log file for one provider, written to from scripts via
/// `helper.error()` and from the storage layer on corrupted entries.
/// The file is wiped once it exceeds 512 KiB.
#[derive(Debug, Clone)]
pub struct ProviderLog {
    path: PathBuf,
}

impl ProviderLog {
    pub fn new(log_dir: impl Into<PathBuf>, provider_id: &str) -> Self {
        Self {
            path: log_dir.into().join(format!("{}.log", provider_id)),
        }
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    pub fn append(&self, message: &str, failing_text: &str) {
        if let Some(parent) = self.path.parent() {
            if let Err(why) = fs::create_dir_all(parent) {
                log::warn!("cannot create log directory {}: {}", parent.display(), why);
                return;
            }
        }
        if let Ok(metadata) = fs::metadata(&self.path) {
            if metadata.len() > MAX_LOG_SIZE {
                if let Err(why) = fs::remove_file(&self.path) {
                    log::warn!("cannot rotate log {}: {}", self.path.display(), why);
                }
            }
        }
        let line = if failing_text.is_empty() {
            format!("{}: {}\n", Local::now().format("%Y-%m-%d %H:%M:%S"), message)
        } else {
            format!(
                "{}: {} -- failing text: {:?}\n",
                Local::now().format("%Y-%m-%d %H:%M:%S"),
                message,
                failing_text
            )
        };
        let result = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .and_then(|mut file| file.write_all(line.as_bytes()));
        if let Err(why) = result {
            log::warn!("cannot write to log {}: {}", self.path.display(), why);
        }
    }
}
