use std::env::{current_exe};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::Mutex;
use directories_next::{ProjectDirs};
use tokio::fs::{File};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use serde_json;
use fd_lock::{RwLock, RwLockWriteGuard};
use log::{info, warn};
use std::fs::OpenOptions;
use std::str;

use crate::config::types::Config;
use crate::error::ConfigError;

// creates a path to <exe name>.json in the same directory as the executable
// this could be useful for a raspberry pi image that ships the binary and its config together
fn get_portable_config_path() -> Option<PathBuf> {
    match current_exe() {
        Ok(mut path) => {
            // /opt/arm/robot-arm-gateway => /opt/arm/robot-arm-gateway.json
            if !path.set_extension("json") {
                warn!("current exe has no filename: {}", path.to_string_lossy());
                return None
            }

            Some(path)
        },
        Err(err) => {
            warn!("failed to get current exe path: {:?}", err);
            None
        },
    }
}

// creates a path to robot-arm-link.json in an os dependent standard directory, such as ~/.config on linux
fn get_local_config_path() -> Option<PathBuf> {
    ProjectDirs::from("org", "robot-arm", "robot-arm-link").map(|dirs| {
        dirs.config_dir().join("robot-arm-link.json")
    })
}

fn get_config_path() -> Result<PathBuf, ConfigError> {
    let portable = get_portable_config_path();
    if let Some(path) = portable {
        match std::fs::metadata(&path) {
            Ok(attr) => {
                if attr.is_file() {
                    return Ok(path);
                }
            }
            Err(err) => {
                info!("No portable config at {}; using local path instead. ({})", path.to_string_lossy(), err);
            },
        }
    }

    match get_local_config_path() {
        None => Err(ConfigError::NoConfigPath),
        Some(path) => Ok(path),
    }
}

/// Exclusive lock on the config file. Whoever holds it owns the physical link on this host.
pub struct ConfigIOLocker {
    rw_lock: RwLock<std::fs::File>,
}

impl ConfigIOLocker {
    pub fn lock(&mut self) -> Result<RwLockWriteGuard<std::fs::File>, ConfigError> {
        match self.rw_lock.try_write() {
            Ok(guard) => Ok(guard),
            Err(source) => Err(ConfigError::CanNotLock { source }),
        }
    }
}

struct ConfigIOInner {
    file: std::fs::File,
}

#[derive(Clone)]
pub struct ConfigIO {
    inner: Arc<Mutex<ConfigIOInner>>,
}

impl ConfigIO {
    /// Opens `explicit` if given, otherwise the portable config next to the executable or the
    /// per-user one. The file is created when it does not exist yet.
    pub fn open(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match explicit {
            Some(path) => path.to_path_buf(),
            None => get_config_path()?,
        };
        info!("Using config file {}", path.to_string_lossy());

        if let Some(directory) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            std::fs::create_dir_all(directory)?;
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .truncate(false)
            .append(false)
            .create(true)
            .open(&path)?;

        let inner = ConfigIOInner { file };
        Ok(ConfigIO { inner: Arc::new(Mutex::new(inner)) })
    }

    pub fn locker(&self) -> Result<ConfigIOLocker, ConfigError> {
        let inner = self.inner.lock().expect("Failed to lock ConfigIO inner");

        Ok(ConfigIOLocker {
            rw_lock: RwLock::new(inner.file.try_clone()?),
        })
    }

    // The File returned from here should never be closed!
    fn get_file(&self) -> Result<File, ConfigError> {
        let inner = self.inner.lock().expect("Failed to lock ConfigIO inner");
        let file = inner.file.try_clone()?; // std File
        Ok(File::from_std(file)) // tokio File
    }

    pub async fn read(&self) -> Result<Config, ConfigError> {
        let mut file = self.get_file()?;
        info!("Reading config file");

        let mut content = vec![];
        file.rewind().await?;
        file.read_to_end(&mut content).await?;

        // a new file gets the defaults written out, so there is something to edit
        if content.is_empty() {
            let config = Config::default();
            self.save(&config).await?;
            return Ok(config);
        }

        let content = str::from_utf8(&content)?;

        let config: Config = serde_json::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub async fn save(&self, config: &Config) -> Result<(), ConfigError> {
        let mut file = self.get_file()?;
        info!("Saving config");

        let content = serde_json::to_string_pretty(config)?;
        file.rewind().await?;
        file.set_len(0).await?;
        file.write_all(content.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn new_file_gets_the_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("arm.json");
        let io = ConfigIO::open(Some(&path)).unwrap();

        assert_eq!(io.read().await.unwrap(), Config::default());

        let written: Config = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written, Config::default());
        assert_eq!(io.read().await.unwrap(), Config::default());
    }

    #[tokio::test]
    async fn save_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let io = ConfigIO::open(Some(&dir.path().join("arm.json"))).unwrap();

        let mut config = Config::default();
        config.device.name_filter = "Bench-Arm".to_string();
        config.gateway.link_check_interval_ms = 1000;
        io.save(&config).await.unwrap();

        // a second save must fully replace the first
        config.device.name_filter = "Arm".to_string();
        io.save(&config).await.unwrap();

        let read = io.read().await.unwrap();
        assert_eq!(read.device.name_filter, "Arm");
        assert_eq!(read.gateway.link_check_interval(), Duration::from_secs(1));
    }

    #[tokio::test]
    async fn invalid_identifier_is_rejected_on_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("arm.json");
        std::fs::write(&path, r#"{"device": {"service": "12345"}}"#).unwrap();

        let io = ConfigIO::open(Some(&path)).unwrap();
        assert!(matches!(io.read().await, Err(ConfigError::InvalidIdentifier { field: "device.service", .. })));
    }

    #[test]
    fn second_locker_can_not_lock() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("arm.json");

        let first = ConfigIO::open(Some(&path)).unwrap();
        let mut first_locker = first.locker().unwrap();
        let _guard = first_locker.lock().unwrap();

        let second = ConfigIO::open(Some(&path)).unwrap();
        let mut second_locker = second.locker().unwrap();
        assert!(matches!(second_locker.lock(), Err(ConfigError::CanNotLock { .. })));
    }
}
