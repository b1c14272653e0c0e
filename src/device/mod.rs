//! Device collaborators
//!
//! The channel needs two things from the device side: a route from the
//! device's port to the host listener, and a way to restart the app under
//! test when it has dropped its connection.

mod adb;

use std::sync::Arc;

use async_trait::async_trait;

use crate::common::config::{DeviceConfig, DeviceKind};
use crate::common::Result;

pub use adb::AdbDevice;

/// Device-side operations the channel relies on
#[async_trait]
pub trait Device: Send + Sync {
    /// Short name for logs
    fn name(&self) -> &str;

    /// Make `port` on the device reach `port` on the host. Idempotent.
    async fn reverse_tcp_port(&self, port: u16) -> Result<()>;

    /// Restart the app under test so it reconnects
    async fn relaunch_app(&self) -> Result<()>;
}

/// Simulator sharing the host loopback: nothing to route, nothing to relaunch
#[derive(Debug, Default, Clone, Copy)]
pub struct HostDevice;

#[async_trait]
impl Device for HostDevice {
    fn name(&self) -> &str {
        "host"
    }

    async fn reverse_tcp_port(&self, port: u16) -> Result<()> {
        tracing::trace!(port, "Host device shares loopback; no route needed");
        Ok(())
    }

    async fn relaunch_app(&self) -> Result<()> {
        tracing::debug!("Host device cannot relaunch the app; waiting for it to reconnect");
        Ok(())
    }
}

/// Build the configured device collaborator
pub fn from_config(config: &DeviceConfig) -> Result<Arc<dyn Device>> {
    match config.kind {
        DeviceKind::Adb => {
            let device = AdbDevice::from_config(config)?;
            tracing::debug!(adb = %device.adb_path().display(), serial = ?config.serial, "Using adb device");
            Ok(Arc::new(device))
        }
        DeviceKind::Host => Ok(Arc::new(HostDevice)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_host_device_is_noop() {
        let device = from_config(&DeviceConfig {
            kind: DeviceKind::Host,
            ..Default::default()
        })
        .unwrap();
        assert_eq!(device.name(), "host");
        device.reverse_tcp_port(7007).await.unwrap();
        device.relaunch_app().await.unwrap();
    }
}
