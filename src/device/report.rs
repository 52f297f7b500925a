//! Full device report: every read-only getter, keyed by name

use super::Device;
use crate::error::Result;
use crate::models::{HeaderedTable, KeyValueTable, StatusValue};
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};

/// One entry of the report registry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportItem {
    AdslInfo,
    ConnectedHosts,
    DeviceInfo,
    HotspotStatus,
    Ipv4ConnectionInfo,
    Ipv4Status,
    Ipv6ConnectionInfo,
    Ipv6Status,
    LocalDnsInfo,
    ModemInfo,
    NatConfig,
    PhoneCallHistory,
    PhoneStatus,
    PortsInfo,
    PppInfo,
    TelevisionStatus,
    WifiInfo,
    WifiStatus,
}

impl ReportItem {
    /// Every item, in key order
    pub const ALL: [ReportItem; 18] = [
        Self::AdslInfo,
        Self::ConnectedHosts,
        Self::DeviceInfo,
        Self::HotspotStatus,
        Self::Ipv4ConnectionInfo,
        Self::Ipv4Status,
        Self::Ipv6ConnectionInfo,
        Self::Ipv6Status,
        Self::LocalDnsInfo,
        Self::ModemInfo,
        Self::NatConfig,
        Self::PhoneCallHistory,
        Self::PhoneStatus,
        Self::PortsInfo,
        Self::PppInfo,
        Self::TelevisionStatus,
        Self::WifiInfo,
        Self::WifiStatus,
    ];

    pub fn key(self) -> &'static str {
        match self {
            Self::AdslInfo => "adsl_info",
            Self::ConnectedHosts => "connected_hosts",
            Self::DeviceInfo => "device_info",
            Self::HotspotStatus => "hotspot_status",
            Self::Ipv4ConnectionInfo => "ipv4_connection_info",
            Self::Ipv4Status => "ipv4_status",
            Self::Ipv6ConnectionInfo => "ipv6_connection_info",
            Self::Ipv6Status => "ipv6_status",
            Self::LocalDnsInfo => "local_dns_info",
            Self::ModemInfo => "modem_info",
            Self::NatConfig => "nat_config",
            Self::PhoneCallHistory => "phone_call_history",
            Self::PhoneStatus => "phone_status",
            Self::PortsInfo => "ports_info",
            Self::PppInfo => "ppp_info",
            Self::TelevisionStatus => "television_status",
            Self::WifiInfo => "wifi_info",
            Self::WifiStatus => "wifi_status",
        }
    }

    pub async fn fetch(self, device: &mut Device) -> Result<ReportValue> {
        Ok(match self {
            Self::AdslInfo => device.adsl_info().await?.into(),
            Self::ConnectedHosts => device.connected_hosts().await?.into(),
            Self::DeviceInfo => device.device_info().await?.into(),
            Self::HotspotStatus => device.hotspot_status().await?.into(),
            Self::Ipv4ConnectionInfo => device.ipv4_connection_info().await?.into(),
            Self::Ipv4Status => device.ipv4_status().await?.into(),
            Self::Ipv6ConnectionInfo => device.ipv6_connection_info().await?.into(),
            Self::Ipv6Status => device.ipv6_status().await?.into(),
            Self::LocalDnsInfo => device.local_dns_info().await?.into(),
            Self::ModemInfo => device.modem_info().await?.into(),
            Self::NatConfig => device.nat_config().await?.into(),
            Self::PhoneCallHistory => device.phone_call_history().await?.into(),
            Self::PhoneStatus => device.phone_status().await?.into(),
            Self::PortsInfo => device.ports_info().await?.into(),
            Self::PppInfo => device.ppp_info().await?.into(),
            Self::TelevisionStatus => device.television_status().await?.into(),
            Self::WifiInfo => device.wifi_info().await?.into(),
            Self::WifiStatus => device.wifi_status().await?.into(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ReportValue {
    Status(StatusValue),
    Table(KeyValueTable),
    Rows(HeaderedTable),
}

impl From<StatusValue> for ReportValue {
    fn from(value: StatusValue) -> Self {
        Self::Status(value)
    }
}

impl From<KeyValueTable> for ReportValue {
    fn from(value: KeyValueTable) -> Self {
        Self::Table(value)
    }
}

impl From<HeaderedTable> for ReportValue {
    fn from(value: HeaderedTable) -> Self {
        Self::Rows(value)
    }
}

/// Report entries in key order; serializes as a JSON object
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Report {
    pub entries: Vec<(&'static str, ReportValue)>,
}

impl Report {
    pub fn get(&self, key: &str) -> Option<&ReportValue> {
        self.entries.iter().find(|(k, _)| *k == key).map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Serialize for Report {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (key, value) in &self.entries {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

impl Device {
    /// Run every read-only getter; the first failure aborts the report
    pub async fn full_report(&mut self) -> Result<Report> {
        tracing::info!("Building full report...");
        let mut report = Report::default();
        for item in ReportItem::ALL {
            let value = item.fetch(self).await?;
            report.entries.push((item.key(), value));
        }
        Ok(report)
    }
}
