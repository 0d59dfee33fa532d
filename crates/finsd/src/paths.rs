use std::env;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Result};
use directories_next::ProjectDirs;

pub const ENV_CONFIG_DIR: &str = "FINS_CONFIG_DIR";
pub const ENV_SHARE_DIR: &str = "FINS_SHARE_DIR";

const QUALIFIER: &str = "org";
const ORGANISATION: &str = "Protosuit";
const APPLICATION: &str = "Fins";
const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, Clone)]
pub struct AppPaths {
    config_dir: PathBuf,
    share_dir: PathBuf,
}

impl AppPaths {
    pub fn discover() -> Result<Self> {
        let project_dirs = ProjectDirs::from(QUALIFIER, ORGANISATION, APPLICATION)
            .ok_or_else(|| anyhow!("failed to determine user directories"))?;
        let config_dir =
            env_override(ENV_CONFIG_DIR).unwrap_or_else(|| project_dirs.config_dir().to_path_buf());
        let share_dir = env_override(ENV_SHARE_DIR).unwrap_or_else(default_share_dir);
        Ok(Self {
            config_dir,
            share_dir,
        })
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    pub fn share_dir(&self) -> &Path {
        &self.share_dir
    }

    /// Config file to load: an explicit path, else the user's, else the
    /// system-wide copy.
    pub fn config_file(&self, explicit: Option<&Path>) -> Result<PathBuf> {
        if let Some(path) = explicit {
            return Ok(path.to_path_buf());
        }
        let candidates = [
            self.config_dir.join(CONFIG_FILE),
            self.share_dir.join(CONFIG_FILE),
        ];
        candidates
            .iter()
            .find(|candidate| candidate.is_file())
            .cloned()
            .ok_or_else(|| {
                anyhow!(
                    "no configuration found; looked for {} and {} (use --config)",
                    candidates[0].display(),
                    candidates[1].display()
                )
            })
    }
}

fn env_override(name: &str) -> Option<PathBuf> {
    match env::var_os(name) {
        Some(value) if !value.is_empty() => Some(PathBuf::from(value)),
        _ => None,
    }
}

fn default_share_dir() -> PathBuf {
    PathBuf::from("/usr/share/fins")
}
