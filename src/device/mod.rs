//! Neufbox device facade
//!
//! Every operation maps to one page (or form) of the administration web
//! interface. Reads scrape the page each time; writes follow the browser's
//! read-modify-write flow: load the form, overlay our fields, post it back.
//!
//! A 200 answer to a submit is taken as success. The device does not report
//! whether it actually applied the change.

pub mod diagnostics;
pub mod nat;
pub mod report;

pub use report::{Report, ReportItem, ReportValue};

use crate::error::{logged, Error, Result};
use crate::http::{HttpClient, RawResponse, Request, Transport};
use crate::models::{
    Credentials, FormSnapshot, HeaderedTable, HotspotMode, KeyValueTable, StatusValue,
};
use crate::parser;
use crate::utils::trim_text;
use std::path::Path;
use std::time::Duration;
use tokio::time::Instant;

pub const DEFAULT_HOST: &str = "192.168.1.1";

/// Client for one device, owning its session
pub struct Device {
    session: crate::session::Session,
    last_ping: Option<Instant>,
}

impl Device {
    pub fn new(transport: Box<dyn Transport>, credentials: Credentials) -> Self {
        tracing::debug!("Initialized new connection to host {}", transport.host());
        Self {
            session: crate::session::Session::new(transport, credentials),
            last_ping: None,
        }
    }

    /// Plain HTTP client for `host` with a per-request `timeout`
    pub fn connect(host: &str, credentials: Credentials, timeout: Duration) -> Result<Self> {
        let client = HttpClient::new(host, timeout)?;
        Ok(Self::new(Box::new(client), credentials))
    }

    pub fn host(&self) -> &str {
        self.session.host()
    }

    pub fn logout(&mut self) {
        self.session.logout();
    }

    async fn page(&mut self, path: &str) -> Result<String> {
        Ok(self.session.request(Request::get(path)).await?.body)
    }

    async fn status(&mut self, path: &str, selector: &str) -> Result<StatusValue> {
        let body = self.page(path).await?;
        parser::status_at(&body, selector).map_err(logged)
    }

    async fn table(&mut self, path: &str, selector: &str) -> Result<KeyValueTable> {
        let body = self.page(path).await?;
        parser::key_value_table(&body, selector).map_err(logged)
    }

    async fn rows(&mut self, path: &str, selector: &str) -> Result<HeaderedTable> {
        let body = self.page(path).await?;
        parser::headered_table(&body, selector).map_err(logged)
    }

    async fn form(&mut self, path: &str, scope: &str) -> Result<FormSnapshot> {
        let body = self.page(path).await?;
        parser::form_snapshot(&body, scope).map_err(logged)
    }

    /// POST `fields` to `path`, failing on anything but HTTP 200
    async fn submit(
        &mut self,
        path: &str,
        fields: Vec<(String, String)>,
        operation: &str,
    ) -> Result<RawResponse> {
        let resp = self
            .session
            .request(Request::post(path).fields(fields))
            .await?;
        if resp.status != 200 {
            return Err(logged(Error::operation(operation, resp.status)));
        }
        Ok(resp)
    }

    // Status

    pub async fn ipv4_status(&mut self) -> Result<StatusValue> {
        tracing::info!("Retrieving IPv4 status...");
        self.status("/state", "td#internet_status").await
    }

    pub async fn ipv6_status(&mut self) -> Result<StatusValue> {
        tracing::info!("Retrieving IPv6 status...");
        self.status("/state", "td#internet_status_v6").await
    }

    pub async fn phone_status(&mut self) -> Result<StatusValue> {
        tracing::info!("Retrieving phone status...");
        self.status("/state", "td#voip_status").await
    }

    pub async fn television_status(&mut self) -> Result<StatusValue> {
        tracing::info!("Retrieving TV status...");
        self.status("/state", "td#tv_status").await
    }

    pub async fn wifi_status(&mut self) -> Result<StatusValue> {
        tracing::info!("Retrieving Wifi status...");
        self.status("/wifi", "table#wifi_info td").await
    }

    pub async fn hotspot_status(&mut self) -> Result<StatusValue> {
        tracing::info!("Retrieving hotspot status...");
        self.status("/hotspot", "td#hotspot_status").await
    }

    // Information tables

    pub async fn modem_info(&mut self) -> Result<KeyValueTable> {
        tracing::info!("Retrieving modem info...");
        self.table("/state", "table#modem_infos").await
    }

    pub async fn ipv4_connection_info(&mut self) -> Result<KeyValueTable> {
        tracing::info!("Retrieving IPv4 info...");
        self.table("/state/wan", "table#wan_info").await
    }

    pub async fn ipv6_connection_info(&mut self) -> Result<KeyValueTable> {
        tracing::info!("Retrieving IPv6 info...");
        self.table("/state/wan", "table#ipv6_info").await
    }

    pub async fn adsl_info(&mut self) -> Result<KeyValueTable> {
        tracing::info!("Retrieving ADSL info...");
        self.table("/state/wan", "table#adsl_info").await
    }

    pub async fn ppp_info(&mut self) -> Result<KeyValueTable> {
        tracing::info!("Retrieving PPP info...");
        self.table("/state/wan", "table#ppp_info").await
    }

    pub async fn ports_info(&mut self) -> Result<KeyValueTable> {
        tracing::info!("Retrieving ports info...");
        self.table("/network", "table#network_status").await
    }

    pub async fn wifi_info(&mut self) -> Result<KeyValueTable> {
        tracing::info!("Retrieving Wifi info...");
        self.table("/wifi", "table#wifi_info").await
    }

    /// Model and firmware block of the public home page
    pub async fn device_info(&mut self) -> Result<KeyValueTable> {
        tracing::info!("Retrieving device info...");
        let body = self.session.request_anonymous(Request::get("/")).await?.body;
        let mut data = parser::key_value_table(&body, "#infos table").map_err(logged)?;
        // values are rendered as ": value"
        for value in data.values_mut() {
            *value = trim_text(value.trim_start_matches(':')).to_string();
        }
        Ok(data)
    }

    pub async fn connected_hosts(&mut self) -> Result<HeaderedTable> {
        tracing::info!("Retrieving connected hosts list...");
        self.rows("/network", "table#network_clients").await
    }

    pub async fn local_dns_info(&mut self) -> Result<HeaderedTable> {
        tracing::info!("Retrieving local DNS info...");
        let mut data = self.rows("/network/dns", "table#dnshosts_config").await?;
        // the unnamed last column holds the GUI delete buttons
        for row in &mut data.rows {
            row.remove("");
        }
        Ok(data)
    }

    pub async fn phone_call_history(&mut self) -> Result<HeaderedTable> {
        tracing::info!("Retrieving phone call history...");
        self.rows("/state/voip", "table#call_history_list").await
    }

    // Mutations

    pub async fn set_wifi_enabled(&mut self, enable: bool) -> Result<()> {
        let mut form = self.form("/wifi/config", "table#access_point_config").await?;
        if enable {
            tracing::info!("Enabling Wifi...");
            form.set("ap_active", "on");
        } else {
            tracing::info!("Disabling Wifi...");
            form.set("ap_active", "off");
        }

        let operation = if enable { "Wifi activation" } else { "Wifi deactivation" };
        self.submit("/wifi/config", form.to_encoded_fields(), operation)
            .await?;
        tracing::info!("{} command sent successfully", operation);
        Ok(())
    }

    /// Overlay `config` (`ap_ssid`, `ap_closed`, `ap_channel`, `ap_mode`, ...)
    /// on the access point form
    pub async fn set_wifi_config<K, V>(
        &mut self,
        config: impl IntoIterator<Item = (K, V)>,
    ) -> Result<()>
    where
        K: Into<String>,
        V: Into<String>,
    {
        let mut form = self.form("/wifi/config", "table#access_point_config").await?;
        tracing::info!("Setting Wifi configuration...");
        form.merge(config);

        self.submit("/wifi/config", form.to_encoded_fields(), "Wifi configuration")
            .await?;
        tracing::info!("Wifi configuration set successfully");
        Ok(())
    }

    /// Overlay `config` (`wlan_encryptiontype`, `wlan_keytype`,
    /// `wlan_wepkey`, `wlan_wpakey`) on the encryption form
    pub async fn set_wifi_security<K, V>(
        &mut self,
        config: impl IntoIterator<Item = (K, V)>,
    ) -> Result<()>
    where
        K: Into<String>,
        V: Into<String>,
    {
        let mut form = self.form("/wifi/security", "table#wlan_encryption").await?;
        tracing::info!("Setting Wifi security...");
        form.merge(config);

        self.submit("/wifi/security", form.to_encoded_fields(), "Wifi security configuration")
            .await?;
        tracing::info!("Wifi security set successfully");
        Ok(())
    }

    pub async fn set_hotspot_enabled(&mut self, enable: bool, mode: HotspotMode) -> Result<()> {
        let mut form = self.form("/hotspot/config", "table#hotspot_config").await?;
        if enable {
            tracing::info!("Enabling hotspot...");
            form.set("hotspot_active", "on");
            form.set("hotspot_mode", mode.as_str());
            form.set("hotspot_conditions", "accept");
        } else {
            tracing::info!("Disabling hotspot...");
            form.set("hotspot_active", "off");
        }

        let operation = if enable { "Hotspot activation" } else { "Hotspot deactivation" };
        self.submit("/hotspot/config", form.to_encoded_fields(), operation)
            .await?;
        tracing::info!("{} command sent successfully", operation);

        if enable && !self.wifi_status().await?.is_connected() {
            tracing::warn!("Hotspot cannot be active if Wifi is off");
        }
        Ok(())
    }

    /// Download the user configuration backup into `path`
    pub async fn export_user_config(&mut self, path: &Path) -> Result<()> {
        tracing::info!("Exporting user config...");
        let fields = vec![("action".to_string(), "config_user_export".to_string())];
        let resp = self
            .submit("/maintenance/system", fields, "User config export")
            .await?;

        tokio::fs::write(path, &resp.bytes)
            .await
            .map_err(|source| {
                logged(Error::Io {
                    path: path.display().to_string(),
                    source,
                })
            })?;
        tracing::info!("User config exported successfully to {}", path.display());
        Ok(())
    }

    pub async fn reboot(&mut self) -> Result<()> {
        tracing::info!("Rebooting device...");
        let fields = vec![("submit".to_string(), String::new())];
        self.submit("/reboot", fields, "Reboot").await?;
        tracing::info!("Reboot command sent successfully");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ExtractionError;
    use crate::http::Method;
    use crate::testing::{device, html, FakeDevice, STATE_PAGE};

    const WIFI_CONFIG_PAGE: &str = r#"<html><body><form method="post">
        <table id="access_point_config">
            <tr><th>Activation</th><td>
                <input type="radio" name="ap_active" value="on" checked="checked">
                <input type="radio" name="ap_active" value="off">
            </td></tr>
            <tr><th>SSID</th><td><input type="text" name="ap_ssid" value="NEUF 1234"></td></tr>
            <tr><th>Canal</th><td><select name="ap_channel">
                <option value="auto">auto</option><option value="11" selected="selected">11</option>
            </select></td></tr>
        </table>
    </form></body></html>"#;

    #[tokio::test]
    async fn test_status_getters() {
        let fake = FakeDevice::new();
        fake.on(Method::Get, "/state", [html(200, STATE_PAGE)]);
        let mut device = device(&fake);

        assert_eq!(device.ipv4_status().await.unwrap(), StatusValue::NotConnected);
        assert_eq!(device.ipv6_status().await.unwrap(), StatusValue::Unused);
        assert_eq!(device.phone_status().await.unwrap(), StatusValue::Connected);
        assert_eq!(device.television_status().await.unwrap(), StatusValue::Unknown);
        // one login for the whole run
        assert_eq!(fake.login_count(), 1);
    }

    #[tokio::test]
    async fn test_missing_status_node_is_extraction_error() {
        let fake = FakeDevice::new();
        fake.on(Method::Get, "/hotspot", [html(200, "<html></html>")]);
        let mut device = device(&fake);

        let err = device.hotspot_status().await.unwrap_err();
        assert!(matches!(err, Error::Extraction(ExtractionError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_modem_info() {
        let fake = FakeDevice::new();
        fake.on(Method::Get, "/state", [html(200, STATE_PAGE)]);
        let mut device = device(&fake);

        let info = device.modem_info().await.unwrap();
        assert_eq!(info.get("Modèle"), Some("NB4-SER-r2"));
        assert_eq!(info.len(), 2);
    }

    #[tokio::test]
    async fn test_device_info_is_anonymous_and_trimmed() {
        let fake = FakeDevice::new();
        fake.on(
            Method::Get,
            "/",
            [html(
                200,
                r#"<div id="infos"><table>
                    <tr><th>Modèle</th><td>: NB4-SER-r2</td></tr>
                    <tr><th>MAC</th><td>:&nbsp;00:17:33:aa:bb:cc</td></tr>
                </table></div>"#,
            )],
        );
        let mut device = device(&fake);

        let info = device.device_info().await.unwrap();
        assert_eq!(info.get("Modèle"), Some("NB4-SER-r2"));
        assert_eq!(info.get("MAC"), Some("00:17:33:aa:bb:cc"));
        assert_eq!(fake.login_count(), 0);
    }

    #[tokio::test]
    async fn test_local_dns_drops_unnamed_column() {
        let fake = FakeDevice::new();
        fake.on(
            Method::Get,
            "/network/dns",
            [html(
                200,
                r#"<table id="dnshosts_config">
                    <thead><tr><th>Nom</th><th>Adresse IP</th><th></th></tr></thead>
                    <tbody><tr><td>nas</td><td>192.168.1.30</td><td><img alt="Supprimer"></td></tr></tbody>
                </table>"#,
            )],
        );
        let mut device = device(&fake);

        let dns = device.local_dns_info().await.unwrap();
        assert_eq!(dns.rows[0].labels().collect::<Vec<_>>(), vec!["Nom", "Adresse IP"]);
    }

    #[tokio::test]
    async fn test_enable_wifi_resubmits_form() {
        let fake = FakeDevice::new();
        fake.on(Method::Get, "/wifi/config", [html(200, WIFI_CONFIG_PAGE)]);
        fake.on(Method::Post, "/wifi/config", [html(200, "ok")]);
        let mut device = device(&fake);

        device.set_wifi_enabled(false).await.unwrap();

        let posted = fake.requests_to(Method::Post, "/wifi/config");
        assert_eq!(posted.len(), 1);
        let fields = &posted[0].fields;
        assert!(fields.contains(&("ap_active".into(), "off".into())));
        assert!(fields.contains(&("ap_ssid".into(), "NEUF%201234".into())));
        assert!(fields.contains(&("ap_channel".into(), "11".into())));
        assert_eq!(posted[0].cookie.as_deref(), Some("sid=c0ffee42"));
    }

    #[tokio::test]
    async fn test_wifi_config_overrides_fields() {
        let fake = FakeDevice::new();
        fake.on(Method::Get, "/wifi/config", [html(200, WIFI_CONFIG_PAGE)]);
        fake.on(Method::Post, "/wifi/config", [html(200, "ok")]);
        let mut device = device(&fake);

        device
            .set_wifi_config([("ap_ssid", "maison"), ("ap_channel", "6")])
            .await
            .unwrap();

        let fields = &fake.requests_to(Method::Post, "/wifi/config")[0].fields;
        assert!(fields.contains(&("ap_ssid".into(), "maison".into())));
        assert!(fields.contains(&("ap_channel".into(), "6".into())));
        assert!(fields.contains(&("ap_active".into(), "on".into())));
    }

    #[tokio::test]
    async fn test_wifi_security_posts_encryption_form() {
        let fake = FakeDevice::new();
        fake.on(
            Method::Get,
            "/wifi/security",
            [html(
                200,
                r#"<form><table id="wlan_encryption">
                    <tr><th>Chiffrement</th><td><select name="wlan_encryptiontype">
                        <option value="OPEN">aucun</option>
                        <option value="WPA-PSK" selected>WPA</option>
                    </select></td></tr>
                    <tr><th>Clé</th><td><input type="text" name="wlan_wpakey" value="old"></td></tr>
                </table></form>"#,
            )],
        );
        fake.on(Method::Post, "/wifi/security", [html(200, "ok")]);
        let mut device = device(&fake);

        device
            .set_wifi_security([("wlan_wpakey", "new key")])
            .await
            .unwrap();

        let fields = &fake.requests_to(Method::Post, "/wifi/security")[0].fields;
        assert!(fields.contains(&("wlan_encryptiontype".into(), "WPA-PSK".into())));
        assert!(fields.contains(&("wlan_wpakey".into(), "new%20key".into())));
    }

    #[tokio::test]
    async fn test_connected_hosts_and_call_history() {
        let fake = FakeDevice::new();
        fake.on(
            Method::Get,
            "/network",
            [html(
                200,
                r#"<table id="network_clients">
                    <thead><tr><th>Nom</th><th>IP</th><th>Port</th></tr></thead>
                    <tbody><tr><td>nas</td><td>192.168.1.30</td><td><img alt="lan1"></td></tr></tbody>
                </table>"#,
            )],
        );
        fake.on(
            Method::Get,
            "/state/voip",
            [html(
                200,
                r#"<table id="call_history_list">
                    <thead><tr><th>Type</th><th>Numéro</th></tr></thead>
                    <tbody>
                        <tr><td>Entrant</td><td>0102030405</td></tr>
                        <tr><td>Sortant</td><td>0607080910</td></tr>
                    </tbody>
                </table>"#,
            )],
        );
        let mut device = device(&fake);

        let hosts = device.connected_hosts().await.unwrap();
        assert_eq!(hosts.len(), 1);
        assert_eq!(hosts.rows[0].get("Port"), Some("lan1"));

        let calls = device.phone_call_history().await.unwrap();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls.rows[1].get("Numéro"), Some("0607080910"));
    }

    #[tokio::test]
    async fn test_logout_forces_new_login() {
        let fake = FakeDevice::new();
        fake.on(Method::Get, "/state", [html(200, STATE_PAGE)]);
        let mut device = device(&fake);

        device.ipv4_status().await.unwrap();
        device.logout();
        device.ipv4_status().await.unwrap();
        assert_eq!(fake.login_count(), 2);
    }

    #[tokio::test]
    async fn test_submit_non_200_is_operation_error() {
        let fake = FakeDevice::new();
        fake.on(Method::Post, "/reboot", [html(500, "")]);
        let mut device = device(&fake);

        let err = device.reboot().await.unwrap_err();
        assert!(matches!(err, Error::Operation { status: 500, .. }));
    }

    #[tokio::test]
    async fn test_reboot_posts_submit_field() {
        let fake = FakeDevice::new();
        fake.on(Method::Post, "/reboot", [html(200, "")]);
        let mut device = device(&fake);

        device.reboot().await.unwrap();
        let posted = fake.requests_to(Method::Post, "/reboot");
        assert_eq!(posted[0].fields, vec![("submit".into(), String::new())]);
    }

    #[tokio::test]
    async fn test_enable_hotspot_checks_wifi() {
        let fake = FakeDevice::new();
        fake.on(
            Method::Get,
            "/hotspot/config",
            [html(
                200,
                r#"<table id="hotspot_config"><tr><td>
                    <input type="radio" name="hotspot_active" value="off" checked>
                    <select name="hotspot_mode"><option value="sfr" selected>SFR</option></select>
                </td></tr></table>"#,
            )],
        );
        fake.on(Method::Post, "/hotspot/config", [html(200, "")]);
        fake.on(
            Method::Get,
            "/wifi",
            [html(200, r#"<table id="wifi_info"><tr><th>Etat</th><td class="disabled">off</td></tr></table>"#)],
        );
        let mut device = device(&fake);

        device
            .set_hotspot_enabled(true, HotspotMode::SfrFon)
            .await
            .unwrap();

        let fields = &fake.requests_to(Method::Post, "/hotspot/config")[0].fields;
        assert!(fields.contains(&("hotspot_active".into(), "on".into())));
        assert!(fields.contains(&("hotspot_mode".into(), "sfr_fon".into())));
        assert!(fields.contains(&("hotspot_conditions".into(), "accept".into())));
        assert_eq!(fake.count(Method::Get, "/wifi"), 1);
    }

    #[tokio::test]
    async fn test_export_user_config_writes_body() {
        let fake = FakeDevice::new();
        // binary backup, not valid UTF-8
        let backup = vec![0x4e, 0x42, 0x34, 0x00, 0xe8, 0xff, 0x80];
        fake.on(
            Method::Post,
            "/maintenance/system",
            [RawResponse::from_bytes(200, Default::default(), backup.clone())],
        );
        let mut device = device(&fake);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("backup.conf");

        device.export_user_config(&path).await.unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), backup);
        let posted = fake.requests_to(Method::Post, "/maintenance/system");
        assert_eq!(
            posted[0].fields,
            vec![("action".into(), "config_user_export".into())]
        );
    }
}
