//! Connectivity watchdog
//!
//! Checks the IPv4 link of the device and reboots it when the link is down.
//! Meant to be run periodically (cron, systemd timer): every call performs a
//! single check.

use crate::device::{Device, Report};
use crate::error::{logged, Error, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_REBOOT_WAIT_DELAY: Duration = Duration::from_secs(120);

/// Result of one watchdog run
#[derive(Debug)]
pub enum CheckOutcome {
    /// Link was up, nothing done
    Healthy,
    /// Link was down, came back after a reboot
    Recovered(Report),
    /// Link still down after a reboot
    StillDown,
    /// Link down but the failure threshold is not reached yet
    Postponed { failures: u32 },
}

pub struct Watcher {
    device: Device,
    reboot_wait_delay: Duration,
}

impl Watcher {
    pub fn new(device: Device, reboot_wait_delay: Duration) -> Self {
        Self {
            device,
            reboot_wait_delay,
        }
    }

    async fn is_up(&mut self) -> Result<bool> {
        Ok(self.device.ipv4_status().await?.is_connected())
    }

    /// Reboot, wait, then check again
    async fn reboot_and_recheck(&mut self) -> Result<bool> {
        self.device.reboot().await?;
        tracing::info!(
            "Waiting {}s for the device to come back...",
            self.reboot_wait_delay.as_secs()
        );
        tokio::time::sleep(self.reboot_wait_delay).await;
        self.is_up().await
    }

    /// Reboot the device right away if its link is down
    pub async fn check_and_reboot(&mut self) -> Result<CheckOutcome> {
        tracing::info!("Checking connection status...");
        if self.is_up().await? {
            tracing::info!("Connection up, no action needed.");
            return Ok(CheckOutcome::Healthy);
        }

        tracing::warn!("Connection down, rebooting device...");
        if !self.reboot_and_recheck().await? {
            tracing::error!("Connection *still* down, aborting.");
            return Ok(CheckOutcome::StillDown);
        }

        tracing::info!("Connection back up, retrieving system info...");
        Ok(CheckOutcome::Recovered(self.device.full_report().await?))
    }

    /// Reboot only after `threshold` consecutive down checks, counted in
    /// `counter_file` across runs
    pub async fn check_and_reboot_on_failures(
        &mut self,
        threshold: u32,
        counter_file: &Path,
    ) -> Result<CheckOutcome> {
        tracing::info!("Checking connection status...");
        if self.is_up().await? {
            tracing::info!("Connection up, no action needed.");
            write_counter(counter_file, 0).await?;
            return Ok(CheckOutcome::Healthy);
        }

        let failures = read_counter(counter_file).await.saturating_add(1);
        write_counter(counter_file, failures).await?;
        if failures < threshold {
            tracing::info!(
                "Connection down ({}/{}), postponing reboot.",
                failures,
                threshold
            );
            return Ok(CheckOutcome::Postponed { failures });
        }

        tracing::warn!(
            "Connection down for {} checks, rebooting device...",
            failures
        );
        if !self.reboot_and_recheck().await? {
            // counter kept: next run reboots again without waiting
            tracing::error!("Connection *still* down, aborting.");
            return Ok(CheckOutcome::StillDown);
        }

        tracing::info!("Connection back up, retrieving system info...");
        write_counter(counter_file, 0).await?;
        Ok(CheckOutcome::Recovered(self.device.full_report().await?))
    }
}

/// Failure counter file for `host` under `state_dir`
pub fn counter_path(state_dir: &Path, host: &str) -> PathBuf {
    let host: String = host
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' { c } else { '_' })
        .collect();
    state_dir.join(format!("{host}_fail_count"))
}

/// Missing or garbled counter reads as zero
async fn read_counter(path: &Path) -> u32 {
    match tokio::fs::read_to_string(path).await {
        Ok(contents) => contents.trim().parse().unwrap_or(0),
        Err(_) => 0,
    }
}

async fn write_counter(path: &Path, value: u32) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| io_error(parent, source))?;
        }
    }
    tokio::fs::write(path, value.to_string())
        .await
        .map_err(|source| io_error(path, source))
}

fn io_error(path: &Path, source: std::io::Error) -> Error {
    logged(Error::Io {
        path: path.display().to_string(),
        source,
    })
}
