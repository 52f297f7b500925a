//! Session handling for the device web interface
//!
//! Login is a challenge-response exchange:
//!
//! 1. `POST /login action=challenge` (XHR headers) answers a small XML
//!    document whose `<challenge>` is also the new session id.
//! 2. The proof is `HMAC-SHA256(sha256(login))` followed by
//!    `HMAC-SHA256(sha256(password))`, both keyed with the challenge and
//!    hex-encoded.
//! 3. `POST /login` with the proof and the `sid` cookie. A 401 means the
//!    credentials are wrong.
//!
//! Any later response with HTTP 302, HTTP 401 or the lockout page means the
//! session is gone: we log in again and replay the request exactly once.

use crate::error::{logged, AuthError, Result};
use crate::http::{RawResponse, Request, Transport};
use crate::models::Credentials;
use crate::parser;
use crate::utils::trim_text;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

const LOGIN_PATH: &str = "/login";
const LOCKOUT_MARKER: &str = "access_lock";
const BROWSER_USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64; rv:30.0) Gecko/20100101 Firefox/30.0";

type HmacSha256 = Hmac<Sha256>;

/// Login proof expected by the device for `challenge`
pub fn login_hash(challenge: &str, login: &str, password: &str) -> String {
    fn keyed(challenge: &str, secret: &str) -> String {
        let digest = hex::encode(Sha256::digest(secret.as_bytes()));
        let mut mac = HmacSha256::new_from_slice(challenge.as_bytes())
            .expect("HMAC accepts keys of any length");
        mac.update(digest.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    keyed(challenge, login) + &keyed(challenge, password)
}

/// Does this response mean our session id is no longer accepted?
fn is_invalidated(resp: &RawResponse) -> bool {
    matches!(resp.status, 302 | 401) || resp.body.contains(LOCKOUT_MARKER)
}

/// Authenticated session against one device
pub struct Session {
    transport: Box<dyn Transport>,
    credentials: Credentials,
    session_id: Option<String>,
}

impl Session {
    pub fn new(transport: Box<dyn Transport>, credentials: Credentials) -> Self {
        Self {
            transport,
            credentials,
            session_id: None,
        }
    }

    pub fn host(&self) -> &str {
        self.transport.host()
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn logout(&mut self) {
        tracing::info!("Logging out");
        self.session_id = None;
    }

    fn sid_cookie(&self) -> Option<String> {
        self.session_id.as_ref().map(|sid| format!("sid={sid}"))
    }

    /// Log in unless a session is already held (or `force` is set)
    pub async fn ensure_session(&mut self, force: bool) -> Result<()> {
        if !force && self.session_id.is_some() {
            return Ok(());
        }
        self.session_id = None;

        // 1. Challenge
        let challenge_req = Request::post(LOGIN_PATH).field("action", "challenge").ajax();
        let resp = self.send(&challenge_req).await?;
        if resp.status != 200 {
            return Err(logged(AuthError::ChallengeStatus(resp.status)));
        }
        let content_type = resp.content_type().unwrap_or_default();
        if content_type != "text/xml" {
            return Err(logged(AuthError::ChallengeContentType(
                content_type.to_string(),
            )));
        }
        let challenge = parser::xml_text(&resp.body, "challenge")
            .map(|c| trim_text(&c).to_string())
            .filter(|c| !c.is_empty())
            .ok_or_else(|| logged(AuthError::MissingChallenge))?;

        // 2. Proof
        if self.credentials.login.is_empty() || self.credentials.password.is_empty() {
            tracing::warn!("Missing or empty login/password");
        }
        let hash = login_hash(
            &challenge,
            &self.credentials.login,
            &self.credentials.password,
        );

        // 3. Authenticate
        let login_req = Request::post(LOGIN_PATH)
            .field("hash", hash)
            .field("login", "")
            .field("method", "passwd")
            .field("password", "")
            .field("zsid", challenge.as_str())
            .header("User-Agent", BROWSER_USER_AGENT)
            .cookie(Some(format!("sid={challenge}")));
        let resp = self.send(&login_req).await?;
        if resp.status == 401 {
            return Err(logged(AuthError::BadCredentials));
        }

        tracing::debug!("Login successful! Session ID: {}", challenge);
        self.session_id = Some(challenge);
        Ok(())
    }

    /// Send `request` with the session cookie, renewing the session once if
    /// the device dropped it
    pub async fn request(&mut self, request: Request) -> Result<RawResponse> {
        if self.session_id.is_none() {
            tracing::debug!("No session, initializing...");
            self.ensure_session(false).await?;
        }

        let resp = self.send(&request.clone().cookie(self.sid_cookie())).await?;
        if !is_invalidated(&resp) {
            return Ok(resp);
        }

        tracing::debug!("Session lost, attempting to renew...");
        self.ensure_session(true).await?;

        let resp = self.send(&request.cookie(self.sid_cookie())).await?;
        if is_invalidated(&resp) {
            self.session_id = None;
            return Err(logged(AuthError::SessionLost {
                status: resp.status,
            }));
        }
        Ok(resp)
    }

    /// Send `request` without any session (public pages)
    pub async fn request_anonymous(&self, request: Request) -> Result<RawResponse> {
        self.send(&request.cookie(None)).await
    }

    async fn send(&self, request: &Request) -> Result<RawResponse> {
        self.transport.send(request).await.map_err(logged)
    }
}
