use directories::ProjectDirs;
use std::path::PathBuf;

// System and per-user locations. Dev mode overrides all of these with ./dev_data.

pub fn system_config_file() -> PathBuf {
    PathBuf::from("/etc/supface/supface.toml")
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("com", "supface", "SupFace")
}

pub fn default_captures_dir() -> PathBuf {
    project_dirs()
        .map(|dirs| dirs.cache_dir().join("captures"))
        .unwrap_or_else(|| std::env::temp_dir().join("supface-captures"))
}

pub fn default_audit_log() -> PathBuf {
    project_dirs()
        .map(|dirs| dirs.data_dir().join("audit.jsonl"))
        .unwrap_or_else(|| PathBuf::from("/var/lib/supface/audit.jsonl"))
}
