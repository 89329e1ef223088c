use std::path::PathBuf;
use std::fs;
use crate::common::error::Result;
use crate::common::paths;

#[derive(Debug, Clone)]
pub struct DevMode {
    enabled: bool,
    base_dir: PathBuf,
}

impl DevMode {
    pub fn new(enabled: bool) -> Result<Self> {
        Self::with_base_dir(enabled, PathBuf::from("./dev_data"))
    }

    pub fn with_base_dir(enabled: bool, base_dir: PathBuf) -> Result<Self> {
        // Create dev directories if in dev mode
        if enabled {
            fs::create_dir_all(base_dir.join("captures"))?;
            fs::create_dir_all(base_dir.join("audit"))?;

            tracing::info!(
                "Development mode enabled - captures and audit log kept in {}",
                base_dir.display()
            );
        }

        Ok(Self { enabled, base_dir })
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn captures_dir(&self) -> PathBuf {
        if self.enabled {
            self.base_dir.join("captures")
        } else {
            paths::default_captures_dir()
        }
    }

    /// Dev mode keeps every capture for inspection; otherwise stills are
    /// deleted once the backend call that consumed them finishes.
    pub fn keep_captures(&self) -> bool {
        self.enabled
    }

    pub fn audit_log_path(&self) -> PathBuf {
        if self.enabled {
            self.base_dir.join("audit").join("audit.jsonl")
        } else {
            paths::default_audit_log()
        }
    }

    pub fn config_file(&self) -> PathBuf {
        if self.enabled {
            PathBuf::from("configs/supface.toml")
        } else {
            paths::system_config_file()
        }
    }
}
