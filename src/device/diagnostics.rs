//! Ping and traceroute jobs run by the device itself
//!
//! Both use the same AJAX protocol on `/maintenance/tests`: `run=start`
//! answers the job `<id>`, then `run=status` is polled until the job reports
//! `<status val="finished"/>`.

use super::Device;
use crate::error::{logged, Error, Result};
use crate::http::Request;
use crate::models::{PingStats, TracerouteHop};
use crate::parser;
use std::time::Duration;
use tokio::time::{sleep, sleep_until, Instant};

const TESTS_PATH: &str = "/maintenance/tests";

pub const DEFAULT_PING_COUNT: u32 = 10;
pub const DEFAULT_PING_TIMEOUT: Duration = Duration::from_millis(1500);

const PING_POLL_INTERVAL: Duration = Duration::from_millis(800);
/// The device refuses a new ping job started too soon after the last one
const PING_SPACING: Duration = Duration::from_secs(2);
const TRACEROUTE_POLL_INTERVAL: Duration = Duration::from_secs(1);
const TRACEROUTE_DEADLINE: Duration = Duration::from_secs(120);

fn xml_number(body: &str, tag: &str) -> u32 {
    parser::xml_text(body, tag)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(0)
}

fn job_status(body: &str) -> String {
    parser::xml_attr(body, "status", "val").unwrap_or_default()
}

impl Device {
    async fn job_request(
        &mut self,
        fields: Vec<(String, String)>,
        operation: &str,
    ) -> Result<String> {
        let resp = self
            .session
            .request(Request::post(TESTS_PATH).fields(fields).ajax())
            .await?;
        if resp.status != 200 {
            return Err(logged(Error::operation(operation, resp.status)));
        }
        Ok(resp.body)
    }

    async fn start_job(&mut self, action: &str, hostname: &str) -> Result<String> {
        let fields = vec![
            ("action".to_string(), action.to_string()),
            (
                format!("{action}_dest_hostname"),
                urlencoding::encode(hostname).into_owned(),
            ),
            ("run".to_string(), "start".to_string()),
        ];
        let body = self
            .job_request(fields, &format!("Starting {action}"))
            .await?;
        let id = parser::xml_text(&body, "id")
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .ok_or_else(|| logged(Error::protocol(action, "no ID found in response body")))?;
        tracing::debug!("Got {} id: {}", action, id);
        Ok(id)
    }

    async fn job_command(&mut self, action: &str, id: &str, run: &str) -> Result<String> {
        let fields = vec![
            ("action".to_string(), action.to_string()),
            ("id".to_string(), id.to_string()),
            ("run".to_string(), run.to_string()),
        ];
        self.job_request(fields, &format!("{action} {run}")).await
    }

    /// Ping `hostname` from the device, `count` echo requests
    ///
    /// The job is stopped once `count` requests went out; the call returns
    /// when every reply is in or after `count * timeout`, whichever comes
    /// first. Calls on one device are spaced at least two seconds apart.
    pub async fn ping(
        &mut self,
        hostname: &str,
        count: u32,
        timeout: Duration,
    ) -> Result<PingStats> {
        if let Some(last) = self.last_ping {
            if last.elapsed() < PING_SPACING {
                tracing::debug!("Last ping is too recent, delaying request...");
                sleep_until(last + PING_SPACING).await;
            }
        }
        tracing::info!("Sending {} ping requests to {}...", count, hostname);

        let id = self.start_job("ping", hostname).await?;
        let deadline = Instant::now() + timeout * count;

        let mut stats = PingStats {
            hostname: hostname.to_string(),
            ..Default::default()
        };
        let mut stopped = false;
        loop {
            sleep(PING_POLL_INTERVAL).await;
            let body = self.job_command("ping", &id, "status").await?;
            let sent = xml_number(&body, "sent");
            let received = xml_number(&body, "received");
            let status = job_status(&body);

            if !stopped {
                stats.sent = sent;
            }
            stats.received = received;
            stats.avg_rtt = xml_number(&body, "avgrtt");
            stats.status = status.clone();
            tracing::debug!("Ping stats updated: {:?}", stats);

            if !stopped && sent >= count {
                self.job_command("ping", &id, "stop").await?;
                stopped = true;
            } else if status == "finished" {
                stopped = true;
            }

            if (stopped && status == "finished" && received >= sent) || Instant::now() >= deadline {
                break;
            }
        }

        self.last_ping = Some(Instant::now());
        Ok(stats)
    }

    /// Traceroute to `hostname` from the device
    pub async fn traceroute(&mut self, hostname: &str) -> Result<Vec<TracerouteHop>> {
        tracing::info!("Performing traceroute to {}...", hostname);

        let id = self.start_job("traceroute", hostname).await?;
        let deadline = Instant::now() + TRACEROUTE_DEADLINE;

        loop {
            sleep(TRACEROUTE_POLL_INTERVAL).await;
            let body = self.job_command("traceroute", &id, "status").await?;
            if job_status(&body) == "finished" {
                return Ok(parser::xml_hops(&body));
            }
            if Instant::now() >= deadline {
                tracing::warn!(
                    "Traceroute to {} still running after {}s, returning partial hops",
                    hostname,
                    TRACEROUTE_DEADLINE.as_secs()
                );
                return Ok(parser::xml_hops(&body));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::Method;
    use crate::testing::{device, html, xml, FakeDevice};
    use std::sync::{Arc, Mutex};

    fn run(req: &Request) -> String {
        req.fields
            .iter()
            .find(|(k, _)| k == "run")
            .map(|(_, v)| v.clone())
            .unwrap_or_default()
    }

    fn ping_status(sent: u32, received: u32, status: &str) -> String {
        format!(
            "<rsp stat=\"ok\"><sent>{sent}</sent><received>{received}</received>\
             <avgrtt>12</avgrtt><status val=\"{status}\"/></rsp>"
        )
    }

    /// Device answering ping status polls from `script`, repeating the last
    fn scripted(fake: &FakeDevice, script: Vec<String>) {
        let mut polls = 0;
        fake.handle(Method::Post, TESTS_PATH, move |req| {
            Ok(match run(req).as_str() {
                "start" => xml("<rsp><id>42</id></rsp>"),
                "status" => {
                    let body = &script[polls.min(script.len() - 1)];
                    polls += 1;
                    xml(body)
                }
                _ => xml("<rsp stat=\"ok\"/>"),
            })
        });
    }

    fn runs(fake: &FakeDevice, which: &str) -> usize {
        fake.requests_to(Method::Post, TESTS_PATH)
            .iter()
            .filter(|r| run(r) == which)
            .count()
    }

    #[tokio::test(start_paused = true)]
    async fn test_ping_stops_once_and_finishes() {
        let fake = FakeDevice::new();
        scripted(
            &fake,
            vec![
                ping_status(1, 1, "running"),
                ping_status(3, 2, "running"),
                ping_status(3, 2, "running"),
                ping_status(3, 3, "finished"),
            ],
        );
        let mut device = device(&fake);

        let stats = device.ping("example.com", 3, Duration::from_secs(10)).await.unwrap();

        assert_eq!(stats.hostname, "example.com");
        assert_eq!(stats.status, "finished");
        assert_eq!(stats.sent, 3);
        assert_eq!(stats.received, 3);
        assert_eq!(stats.avg_rtt, 12);
        assert_eq!(runs(&fake, "stop"), 1);
        assert_eq!(runs(&fake, "status"), 4);

        let start = &fake.requests_to(Method::Post, TESTS_PATH)[0];
        assert!(start
            .fields
            .contains(&("ping_dest_hostname".into(), "example.com".into())));
        assert!(start
            .headers
            .contains(&("X-Requested-With".into(), "XMLHttpRequest".into())));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ping_gives_up_at_deadline() {
        let fake = FakeDevice::new();
        scripted(&fake, vec![ping_status(1, 0, "running")]);
        let mut device = device(&fake);

        let stats = device
            .ping("10.0.0.1", 2, Duration::from_millis(1500))
            .await
            .unwrap();

        // deadline at 3s, polls at 0.8 1.6 2.4 3.2
        assert_eq!(runs(&fake, "status"), 4);
        assert_eq!(runs(&fake, "stop"), 0);
        assert_eq!(stats.received, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_successive_pings_are_spaced() {
        let fake = FakeDevice::new();
        let starts = Arc::new(Mutex::new(Vec::new()));
        let recorded = starts.clone();
        fake.handle(Method::Post, TESTS_PATH, move |req| {
            if run(req) == "start" {
                recorded.lock().unwrap().push(Instant::now());
                return Ok(xml("<rsp><id>7</id></rsp>"));
            }
            Ok(xml(&ping_status(1, 1, "finished")))
        });
        let mut device = device(&fake);

        device.ping("a", 1, DEFAULT_PING_TIMEOUT).await.unwrap();
        device.ping("b", 1, DEFAULT_PING_TIMEOUT).await.unwrap();

        let starts = starts.lock().unwrap();
        assert_eq!(starts.len(), 2);
        // first ping ends one poll after its start, the second waits 2s more
        assert!(starts[1] - starts[0] >= PING_POLL_INTERVAL + PING_SPACING);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ping_without_id_is_protocol_error() {
        let fake = FakeDevice::new();
        fake.on(Method::Post, TESTS_PATH, [xml("<rsp stat=\"fail\"/>")]);
        let mut device = device(&fake);

        let err = device.ping("a", 1, DEFAULT_PING_TIMEOUT).await.unwrap_err();
        assert!(matches!(err, Error::Protocol { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ping_status_error_is_operation_error() {
        let fake = FakeDevice::new();
        fake.handle(Method::Post, TESTS_PATH, |req| {
            Ok(if run(req) == "start" {
                xml("<rsp><id>1</id></rsp>")
            } else {
                html(500, "")
            })
        });
        let mut device = device(&fake);

        let err = device.ping("a", 1, DEFAULT_PING_TIMEOUT).await.unwrap_err();
        assert!(matches!(err, Error::Operation { status: 500, .. }));
    }

    const HOPS: &str = "<rsp><status val=\"finished\"/><hops>\
        <hop><ip>192.168.1.1</ip><rtt>1.2</rtt></hop>\
        <hop><ip>10.0.0.1</ip><rtt>8.4</rtt></hop>\
        </hops></rsp>";

    #[tokio::test(start_paused = true)]
    async fn test_traceroute_polls_until_finished() {
        let fake = FakeDevice::new();
        let mut polls = 0;
        fake.handle(Method::Post, TESTS_PATH, move |req| {
            Ok(match run(req).as_str() {
                "start" => xml("<rsp><id>9</id></rsp>"),
                _ => {
                    polls += 1;
                    if polls < 3 {
                        xml("<rsp><status val=\"running\"/></rsp>")
                    } else {
                        xml(HOPS)
                    }
                }
            })
        });
        let mut device = device(&fake);

        let hops = device.traceroute("example.com").await.unwrap();
        assert_eq!(hops.len(), 2);
        assert_eq!(hops[1].get("ip"), Some("10.0.0.1"));
        assert_eq!(runs(&fake, "status"), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_traceroute_deadline_returns_partial_hops() {
        let fake = FakeDevice::new();
        fake.handle(Method::Post, TESTS_PATH, |req| {
            Ok(match run(req).as_str() {
                "start" => xml("<rsp><id>9</id></rsp>"),
                _ => xml(
                    "<rsp><status val=\"running\"/><hops><hop><ip>192.168.1.1</ip></hop></hops></rsp>",
                ),
            })
        });
        let mut device = device(&fake);

        let start = Instant::now();
        let hops = device.traceroute("example.com").await.unwrap();
        assert_eq!(hops.len(), 1);
        assert!(start.elapsed() >= TRACEROUTE_DEADLINE);
        assert_eq!(runs(&fake, "status"), 120);
    }
}
