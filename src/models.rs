//! Data models scraped from (or submitted to) the device

use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// Administrator credentials. Only ever sent as the login hash.
#[derive(Clone)]
pub struct Credentials {
    pub login: String,
    pub password: String,
}

impl Credentials {
    pub fn new(login: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            login: login.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("login", &self.login)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Connectivity indicator read from the `class` attribute of a status cell
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusValue {
    Connected,
    Connecting,
    Unused,
    NotConnected,
    Unknown,
}

impl StatusValue {
    pub fn from_css_class(class: &str) -> Self {
        match class.trim() {
            "enabled" => Self::Connected,
            "disabled" => Self::NotConnected,
            "unused" => Self::Unused,
            _ => Self::Unknown,
        }
    }

    pub fn is_connected(self) -> bool {
        self == Self::Connected
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connected => "Connected",
            Self::Connecting => "Connecting",
            Self::Unused => "Unused",
            Self::NotConnected => "Not Connected",
            Self::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for StatusValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for StatusValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Ordered label → value pairs with unique labels.
///
/// Used both for label/value tables and for a single row of a headered
/// table. Inserting an existing label replaces its value in place.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Record {
    entries: Vec<(String, String)>,
}

pub type KeyValueTable = Record;

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, label: impl Into<String>, value: impl Into<String>) {
        let label = label.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(l, _)| *l == label) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((label, value)),
        }
    }

    pub fn get(&self, label: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(l, _)| l == label)
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, label: &str) -> bool {
        self.get(label).is_some()
    }

    pub fn remove(&mut self, label: &str) -> Option<String> {
        let idx = self.entries.iter().position(|(l, _)| l == label)?;
        Some(self.entries.remove(idx).1)
    }

    /// Drop the last column
    pub fn pop(&mut self) -> Option<(String, String)> {
        self.entries.pop()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(l, _)| l.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(l, v)| (l.as_str(), v.as_str()))
    }

    pub fn values_mut(&mut self) -> impl Iterator<Item = &mut String> {
        self.entries.iter_mut().map(|(_, v)| v)
    }
}

impl<L: Into<String>, V: Into<String>> FromIterator<(L, V)> for Record {
    fn from_iter<I: IntoIterator<Item = (L, V)>>(iter: I) -> Self {
        let mut record = Record::new();
        for (label, value) in iter {
            record.insert(label, value);
        }
        record
    }
}

impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (label, value) in &self.entries {
            map.serialize_entry(label, value)?;
        }
        map.end()
    }
}

/// Rows of a `<thead>`/`<tbody>` table, each keyed by column name
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct HeaderedTable {
    pub rows: Vec<Record>,
}

impl HeaderedTable {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Current values of the fields of a form, as a browser would submit them
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormSnapshot {
    fields: BTreeMap<String, String>,
}

impl FormSnapshot {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.fields.insert(name.into(), value.into());
    }

    /// Overlay caller-provided fields on top of the current values
    pub fn merge<K, V>(&mut self, overrides: impl IntoIterator<Item = (K, V)>)
    where
        K: Into<String>,
        V: Into<String>,
    {
        for (name, value) in overrides {
            self.set(name, value);
        }
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Fields ready for submission, values percent-encoded
    pub fn to_encoded_fields(&self) -> Vec<(String, String)> {
        self.fields
            .iter()
            .map(|(k, v)| (k.clone(), urlencoding::encode(v).into_owned()))
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NatProtocol {
    Tcp,
    Udp,
    Both,
}

impl NatProtocol {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Tcp => "tcp",
            Self::Udp => "udp",
            Self::Both => "both",
        }
    }
}

impl fmt::Display for NatProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Both => f.write_str("tcp-udp"),
            other => f.write_str(other.as_str()),
        }
    }
}

impl std::str::FromStr for NatProtocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "tcp" => Ok(Self::Tcp),
            "udp" => Ok(Self::Udp),
            "both" | "tcp-udp" => Ok(Self::Both),
            other => Err(format!("unknown protocol: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortSpec {
    Single(u16),
    Range(u16, u16),
}

impl PortSpec {
    pub fn is_range(self) -> bool {
        matches!(self, Self::Range(..))
    }

    /// Distance between the bounds; zero for a single port
    pub fn span(self) -> i32 {
        match self {
            Self::Single(_) => 0,
            Self::Range(low, high) => i32::from(high) - i32::from(low),
        }
    }
}

impl fmt::Display for PortSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Single(port) => write!(f, "{port}"),
            Self::Range(low, high) => write!(f, "{low}-{high}"),
        }
    }
}

impl std::str::FromStr for PortSpec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parse = |p: &str| {
            p.trim()
                .parse::<u16>()
                .map_err(|_| format!("invalid port: {p}"))
        };
        match s.split_once('-') {
            Some((low, high)) => Ok(Self::Range(parse(low)?, parse(high)?)),
            None => Ok(Self::Single(parse(s)?)),
        }
    }
}

/// A port forwarding rule as submitted to the NAT form
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NatRule {
    pub name: String,
    pub protocol: NatProtocol,
    pub external_ports: PortSpec,
    pub target_ip: String,
    pub target_ports: PortSpec,
    pub active: bool,
}

impl fmt::Display for NatRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}) {} => {}:{} {}",
            self.name,
            self.protocol,
            self.external_ports,
            self.target_ip,
            self.target_ports,
            if self.active { "ACTIVE" } else { "INACTIVE" }
        )
    }
}

/// Hotspot flavour offered by the device
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum HotspotMode {
    #[default]
    Sfr,
    SfrFon,
}

impl HotspotMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sfr => "sfr",
            Self::SfrFon => "sfr_fon",
        }
    }
}

/// Progress of a ping job running on the device
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PingStats {
    pub hostname: String,
    pub status: String,
    pub sent: u32,
    pub received: u32,
    #[serde(rename = "avgrtt")]
    pub avg_rtt: u32,
}

impl PingStats {
    pub fn to_record(&self) -> Record {
        Record::from_iter([
            ("hostname", self.hostname.clone()),
            ("status", self.status.clone()),
            ("sent", self.sent.to_string()),
            ("received", self.received.to_string()),
            ("avgrtt", self.avg_rtt.to_string()),
        ])
    }
}

/// One traceroute hop: field name → text, as reported by the device
pub type TracerouteHop = Record;
