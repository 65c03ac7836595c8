use std::path::PathBuf;
use std::fs;
use crate::common::error::{FaceUnlockError, Result};

pub enum RunMode {
    Development(PathBuf),  // Base directory for dev mode
    System,                // Use system paths
    User(PathBuf),         // Base directory under the user's home
}

/// Where config, gallery and logs live for the selected run mode.
pub struct Paths {
    mode: RunMode,
}

impl Paths {
    pub fn new(dev: bool, system: bool) -> Result<Self> {
        match (dev, system) {
            (true, true) => Err(FaceUnlockError::Config(
                "Cannot use both --dev and --system flags".into(),
            )),
            (true, false) => {
                let base_dir = PathBuf::from("./dev_data");
                fs::create_dir_all(base_dir.join("logs"))?;
                fs::create_dir_all(base_dir.join("models"))?;

                tracing::info!("Development mode - using local directory: {}", base_dir.display());
                Ok(Self { mode: RunMode::Development(base_dir) })
            }
            (false, true) => {
                tracing::info!("System mode - using system paths");
                Ok(Self { mode: RunMode::System })
            }
            (false, false) => {
                let home = dirs::home_dir()
                    .ok_or_else(|| FaceUnlockError::Config("Could not find home directory".into()))?;
                let base_dir = home.join(".local/share/faceunlock");
                fs::create_dir_all(&base_dir)?;

                tracing::debug!("User mode - using home directory: {}", base_dir.display());
                Ok(Self { mode: RunMode::User(base_dir) })
            }
        }
    }

    pub fn config_file(&self) -> PathBuf {
        match &self.mode {
            RunMode::Development(_) => PathBuf::from("configs/face-unlock.toml"),
            RunMode::System => PathBuf::from("/etc/faceunlock/face-unlock.toml"),
            RunMode::User(_) => {
                // Try user config first, then system config
                if let Some(home) = dirs::home_dir() {
                    let user_config = home.join(".config/faceunlock/face-unlock.toml");
                    if user_config.exists() {
                        return user_config;
                    }
                }
                PathBuf::from("/etc/faceunlock/face-unlock.toml")
            }
        }
    }

    /// Base directory that relative paths in the config are resolved against.
    pub fn data_dir(&self) -> PathBuf {
        match &self.mode {
            RunMode::Development(base) | RunMode::User(base) => base.clone(),
            RunMode::System => PathBuf::from("/var/lib/faceunlock"),
        }
    }

    pub fn is_system(&self) -> bool {
        matches!(self.mode, RunMode::System)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dev_and_system_are_exclusive() {
        assert!(matches!(Paths::new(true, true), Err(FaceUnlockError::Config(_))));
    }

    #[test]
    fn system_mode_uses_fixed_locations() {
        let paths = Paths::new(false, true).unwrap();
        assert!(paths.is_system());
        assert_eq!(paths.config_file(), PathBuf::from("/etc/faceunlock/face-unlock.toml"));
        assert_eq!(paths.data_dir(), PathBuf::from("/var/lib/faceunlock"));
    }
}
