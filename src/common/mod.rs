pub mod config;
pub mod dev_mode;
pub mod error;
pub mod paths;

pub use config::Config;
pub use dev_mode::DevMode;
pub use error::{FaceAuthError, Result};
pub use paths::{default_audit_log, default_captures_dir, system_config_file};
