use directories::ProjectDirs;
use std::path::PathBuf;

use crate::error::{EngineError, Result};

pub const APP_QUALIFIER: &str = "org";
pub const APP_ORG: &str = "tripline";
pub const APP_NAME: &str = "tripline";

fn project_dirs() -> Result<ProjectDirs> {
    ProjectDirs::from(APP_QUALIFIER, APP_ORG, APP_NAME)
        .ok_or_else(|| EngineError::Config("cannot determine data directory".into()))
}

pub fn data_dir() -> Result<PathBuf> {
    Ok(project_dirs()?.data_dir().to_path_buf())
}

pub fn default_state_dir() -> Result<PathBuf> {
    Ok(data_dir()?.join("state"))
}

pub fn default_config_file() -> Result<PathBuf> {
    if let Ok(override_path) = std::env::var("TRIPLINE_CONFIG") {
        return Ok(PathBuf::from(override_path));
    }
    Ok(project_dirs()?.config_dir().join("tripline.toml"))
}
