//! In-memory device used by the unit tests
//!
//! Routes are keyed by method and path. A route either runs a handler or
//! serves a queue of canned responses, repeating the last one once the queue
//! is drained. Every request is recorded.

use crate::device::Device;
use crate::error::TransportError;
use crate::http::{Method, RawResponse, Request, Transport};
use crate::models::Credentials;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::{Arc, Mutex};

pub const CHALLENGE: &str = "c0ffee42";

/// `/state` page with the IPv4 link down
pub const STATE_PAGE: &str = r#"<html><body>
    <table id="modem_infos">
        <tr><th>Modèle</th><td>NB4-SER-r2</td></tr>
        <tr><th>Version du firmware</th><td>NB4-MAIN-R3.1.10</td></tr>
    </table>
    <table class="status">
        <tr><th>Internet</th><td id="internet_status" class="disabled">Déconnecté</td></tr>
        <tr><th>Internet v6</th><td id="internet_status_v6" class="unused">-</td></tr>
        <tr><th>Téléphone</th><td id="voip_status" class="enabled">OK</td></tr>
        <tr><th>TV</th><td id="tv_status" class="???">?</td></tr>
    </table>
</body></html>"#;

/// Every page the full report reads, other than `/state`
const REPORT_PAGE: &str = "<html><body>\
    <div id=\"infos\"><table><tr><th>Modèle</th><td>: NB4</td></tr></table></div>\
    <table id=\"wan_info\"><tr><th>IP</th><td>1.2.3.4</td></tr></table>\
    <table id=\"ipv6_info\"></table><table id=\"adsl_info\"></table>\
    <table id=\"ppp_info\"></table><table id=\"network_status\"></table>\
    <table id=\"wifi_info\"><tr><th>Etat</th><td class=\"enabled\">on</td></tr></table>\
    <table id=\"network_clients\"><thead><tr><th>IP</th></tr></thead></table>\
    <table id=\"dnshosts_config\"><thead><tr><th>Nom</th></tr></thead></table>\
    <table id=\"nat_config\"><thead><tr><th>Nom</th></tr></thead><tbody><tr><td>add</td></tr></tbody></table>\
    <table id=\"call_history_list\"><thead><tr><th>Date</th></tr></thead></table>\
    <table><tr><td id=\"hotspot_status\" class=\"disabled\">off</td></tr></table>\
    </body></html>";

/// Log lines captured by [`capture_logs`]
#[derive(Clone, Default)]
pub struct LogBuffer(Arc<Mutex<Vec<u8>>>);

impl LogBuffer {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl io::Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Record every event of the current thread until the guard is dropped
pub fn capture_logs() -> (LogBuffer, tracing::subscriber::DefaultGuard) {
    let logs = LogBuffer::default();
    let writer = logs.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::TRACE)
        .with_ansi(false)
        .with_writer(move || writer.clone())
        .finish();
    (logs, tracing::subscriber::set_default(subscriber))
}

type Handler = Box<dyn FnMut(&Request) -> Result<RawResponse, TransportError> + Send>;

#[derive(Default)]
struct State {
    routes: HashMap<(Method, String), Handler>,
    requests: Vec<Request>,
    unreachable: bool,
}

#[derive(Clone, Default)]
pub struct FakeDevice {
    state: Arc<Mutex<State>>,
}

pub fn device(fake: &FakeDevice) -> Device {
    Device::new(Box::new(fake.clone()), Credentials::new("admin", "secret"))
}

/// `/state` page with the IPv4 status cell carrying `wan_class`
pub fn state_page(wan_class: &str) -> String {
    STATE_PAGE.replace("class=\"disabled\"", &format!("class=\"{wan_class}\""))
}

/// Device serving every page of the full report
pub fn full_device(wan_class: &str) -> FakeDevice {
    let fake = FakeDevice::new();
    for path in [
        "/",
        "/state/wan",
        "/network",
        "/network/dns",
        "/network/nat",
        "/state/voip",
        "/wifi",
        "/hotspot",
    ] {
        fake.on(Method::Get, path, [html(200, REPORT_PAGE)]);
    }
    fake.on(Method::Get, "/state", [html(200, &state_page(wan_class))]);
    fake
}

pub fn html(status: u16, body: &str) -> RawResponse {
    RawResponse::new(status, body).with_header("Content-Type", "text/html")
}

pub fn xml(body: &str) -> RawResponse {
    RawResponse::new(200, body).with_header("Content-Type", "text/xml")
}

fn challenge_xml(challenge: &str) -> RawResponse {
    xml(&format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<rsp stat=\"ok\" version=\"1.0\">\n<challenge>{challenge}</challenge>\n</rsp>"
    ))
}

fn is_challenge(req: &Request) -> bool {
    req.fields.iter().any(|(k, v)| k == "action" && v == "challenge")
}

impl FakeDevice {
    /// A device accepting any credentials
    pub fn new() -> Self {
        let device = Self::default();
        device.login_with(|req| {
            if is_challenge(req) {
                Ok(challenge_xml(CHALLENGE))
            } else {
                Ok(html(200, "<html>welcome</html>"))
            }
        });
        device
    }

    /// Every request fails as if the host were down
    pub fn unreachable() -> Self {
        let device = Self::new();
        device.state.lock().unwrap().unreachable = true;
        device
    }

    pub fn rejecting_credentials(self) -> Self {
        self.login_with(|req| {
            if is_challenge(req) {
                Ok(challenge_xml(CHALLENGE))
            } else {
                Ok(html(401, "denied"))
            }
        });
        self
    }

    pub fn login_with(
        &self,
        handler: impl FnMut(&Request) -> Result<RawResponse, TransportError> + Send + 'static,
    ) {
        self.handle(Method::Post, "/login", handler);
    }

    pub fn handle(
        &self,
        method: Method,
        path: &str,
        handler: impl FnMut(&Request) -> Result<RawResponse, TransportError> + Send + 'static,
    ) {
        self.state
            .lock()
            .unwrap()
            .routes
            .insert((method, path.to_string()), Box::new(handler));
    }

    /// Serve `responses` in order, then keep serving the last one
    pub fn on(&self, method: Method, path: &str, responses: impl IntoIterator<Item = RawResponse>) {
        let mut queue: VecDeque<RawResponse> = responses.into_iter().collect();
        self.handle(method, path, move |_| {
            let resp = if queue.len() > 1 {
                queue.pop_front()
            } else {
                queue.front().cloned()
            };
            Ok(resp.unwrap_or_else(|| html(404, "not found")))
        });
    }

    pub fn requests(&self) -> Vec<Request> {
        self.state.lock().unwrap().requests.clone()
    }

    pub fn requests_to(&self, method: Method, path: &str) -> Vec<Request> {
        self.requests()
            .into_iter()
            .filter(|r| r.method == method && r.path == path)
            .collect()
    }

    pub fn count(&self, method: Method, path: &str) -> usize {
        self.requests_to(method, path).len()
    }

    /// Number of challenge requests, i.e. login attempts
    pub fn login_count(&self) -> usize {
        self.requests().iter().filter(|r| is_challenge(r)).count()
    }
}

#[async_trait]
impl Transport for FakeDevice {
    fn host(&self) -> &str {
        "fake-box"
    }

    async fn send(&self, request: &Request) -> Result<RawResponse, TransportError> {
        let mut state = self.state.lock().unwrap();
        state.requests.push(request.clone());
        if state.unreachable {
            return Err(TransportError::Connect {
                host: "fake-box".into(),
            });
        }
        match state
            .routes
            .get_mut(&(request.method, request.path.clone()))
        {
            Some(handler) => handler(request),
            None => Ok(html(404, "not found")),
        }
    }
}
