//! Android devices and emulators driven through adb

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;

use crate::common::config::DeviceConfig;
use crate::common::{Error, Result};

use super::Device;

/// Intent category used when no launch activity is configured
const LAUNCHER_CATEGORY: &str = "android.intent.category.LAUNCHER";

/// adb-backed device
#[derive(Debug, Clone)]
pub struct AdbDevice {
    adb: PathBuf,
    serial: Option<String>,
    app_package: Option<String>,
    app_activity: Option<String>,
}

impl AdbDevice {
    pub fn new(adb: PathBuf) -> Self {
        Self {
            adb,
            serial: None,
            app_package: None,
            app_activity: None,
        }
    }

    /// Locate adb and apply the configured target
    ///
    /// Looks at the configured path, then PATH, then `$ANDROID_HOME/platform-tools`.
    pub fn from_config(config: &DeviceConfig) -> Result<Self> {
        let adb = match &config.adb_path {
            Some(path) => path.clone(),
            None => find_adb().ok_or_else(|| {
                Error::Device(
                    "adb not found on PATH or in $ANDROID_HOME/platform-tools; \
                     set device.adb_path or use --device host"
                        .to_string(),
                )
            })?,
        };

        Ok(Self {
            adb,
            serial: config.serial.clone(),
            app_package: config.app_package.clone(),
            app_activity: config.app_activity.clone(),
        })
    }

    pub fn with_serial(mut self, serial: impl Into<String>) -> Self {
        self.serial = Some(serial.into());
        self
    }

    pub fn with_app(mut self, package: impl Into<String>, activity: Option<String>) -> Self {
        self.app_package = Some(package.into());
        self.app_activity = activity;
        self
    }

    pub fn adb_path(&self) -> &Path {
        &self.adb
    }

    /// Arguments for one adb invocation, including the target serial
    fn args(&self, args: &[&str]) -> Vec<String> {
        let mut full = Vec::with_capacity(args.len() + 2);
        if let Some(serial) = &self.serial {
            full.push("-s".to_string());
            full.push(serial.clone());
        }
        full.extend(args.iter().map(|a| a.to_string()));
        full
    }

    fn reverse_args(&self, port: u16) -> Vec<String> {
        let spec = format!("tcp:{}", port);
        self.args(&["reverse", &spec, &spec])
    }

    /// Invocations that stop and start the app, in order
    fn relaunch_invocations(&self, package: &str) -> Vec<Vec<String>> {
        let stop = self.args(&["shell", "am", "force-stop", package]);
        let start = match &self.app_activity {
            Some(activity) => {
                let component = if activity.contains('/') {
                    activity.clone()
                } else {
                    format!("{}/{}", package, activity)
                };
                self.args(&["shell", "am", "start", "-n", &component])
            }
            None => self.args(&["shell", "monkey", "-p", package, "-c", LAUNCHER_CATEGORY, "1"]),
        };
        vec![stop, start]
    }

    async fn run(&self, args: Vec<String>) -> Result<String> {
        tracing::debug!(adb = %self.adb.display(), ?args, "Running adb");
        let output = Command::new(&self.adb)
            .args(&args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| Error::Device(format!("Failed to run {}: {}", self.adb.display(), e)))?;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).into_owned())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(Error::Device(format!(
                "adb {} exited with {:?}: {}",
                args.join(" "),
                output.status.code(),
                stderr.trim()
            )))
        }
    }
}

#[async_trait]
impl Device for AdbDevice {
    fn name(&self) -> &str {
        "adb"
    }

    async fn reverse_tcp_port(&self, port: u16) -> Result<()> {
        self.run(self.reverse_args(port)).await?;
        tracing::info!(port, serial = ?self.serial, "Routed device port to host");
        Ok(())
    }

    async fn relaunch_app(&self) -> Result<()> {
        let Some(package) = self.app_package.as_deref() else {
            tracing::warn!("No app package configured; cannot relaunch the app");
            return Ok(());
        };
        for invocation in self.relaunch_invocations(package) {
            self.run(invocation).await?;
        }
        tracing::info!(package, "Relaunched app under test");
        Ok(())
    }
}

fn find_adb() -> Option<PathBuf> {
    which::which("adb").ok().or_else(|| {
        let home = std::env::var_os("ANDROID_HOME").or_else(|| std::env::var_os("ANDROID_SDK_ROOT"))?;
        let candidate = PathBuf::from(home).join("platform-tools").join(adb_binary());
        candidate.exists().then_some(candidate)
    })
}

fn adb_binary() -> &'static str {
    if cfg!(windows) {
        "adb.exe"
    } else {
        "adb"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reverse_args_with_serial() {
        let device = AdbDevice::new(PathBuf::from("adb")).with_serial("emulator-5554");
        assert_eq!(
            device.reverse_args(7007),
            vec!["-s", "emulator-5554", "reverse", "tcp:7007", "tcp:7007"]
        );
    }

    #[test]
    fn test_relaunch_uses_launcher_without_activity() {
        let device = AdbDevice::new(PathBuf::from("adb")).with_app("com.example.app", None);
        let invocations = device.relaunch_invocations("com.example.app");
        assert_eq!(invocations[0], vec!["shell", "am", "force-stop", "com.example.app"]);
        assert_eq!(
            invocations[1],
            vec!["shell", "monkey", "-p", "com.example.app", "-c", LAUNCHER_CATEGORY, "1"]
        );
    }

    #[test]
    fn test_relaunch_qualifies_short_activity() {
        let device = AdbDevice::new(PathBuf::from("adb"))
            .with_app("com.example.app", Some(".MainActivity".to_string()));
        let invocations = device.relaunch_invocations("com.example.app");
        assert_eq!(
            invocations[1],
            vec!["shell", "am", "start", "-n", "com.example.app/.MainActivity"]
        );
    }

    #[tokio::test]
    async fn test_missing_adb_binary_is_device_error() {
        let device = AdbDevice::new(PathBuf::from("/nonexistent/adb"));
        let err = device.reverse_tcp_port(7007).await.unwrap_err();
        assert!(matches!(err, Error::Device(_)));
    }

    #[tokio::test]
    async fn test_relaunch_without_package_is_noop() {
        let device = AdbDevice::new(PathBuf::from("/nonexistent/adb"));
        device.relaunch_app().await.unwrap();
    }
}
