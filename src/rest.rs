//! HTTP implementations of the backend gateway and identity provider.
//!
//! The hosted backend speaks a JSON-node dialect: every tree path maps to
//! `{database_url}/{path}.json`, `PUT` replaces a node, `PATCH` merges
//! children (a JSON null deletes the key), `DELETE` removes the subtree,
//! and `GET` of an absent node returns `null`. Blobs are `PUT` to the
//! storage host; identity verbs live under `/auth` on the database host.
//! The API key, when configured, rides along as a query parameter.
//!
//! There is no push channel, so live subscriptions poll the watched node
//! and deliver a snapshot whenever its content digest changes.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use reqwest::{Client, Method, StatusCode};
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::auth::{require_credentials, AdminUser, IdentityProvider};
use crate::config::RestConfig;
use crate::error::{AdminError, Result};
use crate::gateway::{BackendGateway, ErrorHandler, SnapshotHandler, Subscription, TreePath};

/// Poll cadence for live subscriptions.
const POLL_INTERVAL: Duration = Duration::from_secs(3);

/// Session lifetime assumed when the identity endpoint does not report
/// one (seconds).
const DEFAULT_TOKEN_LIFETIME_SECS: i64 = 3600;

// ---------------------------------------------------------------------------
// Error mapping
// ---------------------------------------------------------------------------

/// Convert a transport error into a message that names the service
/// rather than the full request URL.
fn friendly_error(url: &str, err: &reqwest::Error) -> anyhow::Error {
    if err.is_connect() {
        return anyhow::anyhow!("Cannot reach the backend at {url}");
    }
    if err.is_timeout() {
        return anyhow::anyhow!("Connection to {url} timed out");
    }
    if err.is_builder() {
        return anyhow::anyhow!("Invalid backend URL: {url}");
    }
    anyhow::anyhow!("Network error communicating with {url}: {err}")
}

fn status_error(status: StatusCode) -> anyhow::Error {
    anyhow::anyhow!(match status.as_u16() {
        401 => "API key is invalid or expired".to_string(),
        403 => "Access to this path is denied".to_string(),
        404 => "Backend endpoint not found".to_string(),
        s if s >= 500 => format!("Backend server error (HTTP {s})"),
        s => format!("Unexpected backend response (HTTP {s})"),
    })
}

// ---------------------------------------------------------------------------
// Document and blob gateway
// ---------------------------------------------------------------------------

pub struct RestGateway {
    client: Client,
    config: RestConfig,
}

impl RestGateway {
    pub fn new(config: RestConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| {
                AdminError::storage("create HTTP client", config.database_url.clone(), e)
            })?;
        Ok(Self { client, config })
    }

    fn node_url(&self, path: &TreePath) -> String {
        let mut url = format!(
            "{}/{}.json",
            self.config.database_url,
            path.segments().join("/")
        );
        if let Some(key) = &self.config.api_key {
            url.push_str("?auth=");
            url.push_str(key);
        }
        url
    }

    async fn send_json(
        &self,
        op: &'static str,
        path: &TreePath,
        method: Method,
        body: Option<&Value>,
    ) -> Result<Value> {
        let url = self.node_url(path);
        let mut req = self.client.request(method, &url);
        if let Some(body) = body {
            req = req.json(body);
        }
        let resp = req.send().await.map_err(|e| {
            AdminError::storage(
                op,
                path.to_string(),
                friendly_error(&self.config.database_url, &e),
            )
        })?;
        let status = resp.status();
        if !status.is_success() {
            return Err(AdminError::storage(op, path.to_string(), status_error(status)));
        }
        // Write verbs echo the stored node, DELETE replies with null.
        Ok(resp.json::<Value>().await.unwrap_or(Value::Null))
    }
}

#[async_trait]
impl BackendGateway for RestGateway {
    async fn put(&self, path: &TreePath, record: Value) -> Result<()> {
        self.send_json("write", path, Method::PUT, Some(&record))
            .await
            .map(|_| ())
    }

    async fn update(&self, path: &TreePath, fields: Map<String, Value>) -> Result<()> {
        let body = Value::Object(fields);
        self.send_json("update", path, Method::PATCH, Some(&body))
            .await
            .map(|_| ())
    }

    async fn delete(&self, path: &TreePath) -> Result<()> {
        self.send_json("delete", path, Method::DELETE, None)
            .await
            .map(|_| ())
    }

    async fn get_once(&self, path: &TreePath) -> Result<Value> {
        self.send_json("read", path, Method::GET, None).await
    }

    fn subscribe(
        &self,
        path: &TreePath,
        on_snapshot: SnapshotHandler,
        on_error: ErrorHandler,
    ) -> Subscription {
        let active = Arc::new(AtomicBool::new(true));
        let gate = active.clone();
        let client = self.client.clone();
        let url = self.node_url(path);
        let base = self.config.database_url.clone();
        let watched = path.to_string();

        let task = tokio::spawn(async move {
            debug!(path = %watched, "snapshot poll started");
            let mut last_digest: Option<String> = None;
            loop {
                if !gate.load(Ordering::SeqCst) {
                    break;
                }

                match fetch_snapshot(&client, &url, &watched, &base).await {
                    Ok(snapshot) => {
                        let digest = snapshot_digest(&snapshot);
                        if last_digest.as_deref() != Some(digest.as_str()) {
                            last_digest = Some(digest);
                            if gate.load(Ordering::SeqCst) {
                                on_snapshot(snapshot);
                            }
                        }
                    }
                    Err(err) => {
                        warn!(path = %watched, error = %err, "snapshot poll failed");
                        if gate.load(Ordering::SeqCst) {
                            on_error(err);
                        }
                    }
                }

                tokio::time::sleep(POLL_INTERVAL).await;
                if !gate.load(Ordering::SeqCst) {
                    debug!(path = %watched, "snapshot poll stopped");
                    break;
                }
            }
        });

        Subscription::with_task(active, task)
    }

    async fn upload_blob(&self, folder: &str, bytes: Vec<u8>) -> Result<String> {
        let name = Uuid::new_v4().to_string();
        let url = format!("{}/{}/{}", self.config.storage_url, folder, name);
        let label = format!("{folder}/{name}");

        let mut req = self.client.put(&url).body(bytes);
        if let Some(key) = &self.config.api_key {
            req = req.query(&[("auth", key)]);
        }
        let resp = req.send().await.map_err(|e| {
            AdminError::storage(
                "upload blob",
                label.clone(),
                friendly_error(&self.config.storage_url, &e),
            )
        })?;
        let status = resp.status();
        if !status.is_success() {
            return Err(AdminError::storage("upload blob", label, status_error(status)));
        }

        // The blob host echoes the public URL; fall back to the node URL.
        let reply = resp.json::<Value>().await.unwrap_or(Value::Null);
        Ok(reply
            .get("downloadUrl")
            .or_else(|| reply.get("url"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or(url))
    }
}

async fn fetch_snapshot(client: &Client, url: &str, watched: &str, base: &str) -> Result<Value> {
    let resp = client
        .get(url)
        .send()
        .await
        .map_err(|e| AdminError::storage("read", watched, friendly_error(base, &e)))?;
    let status = resp.status();
    if !status.is_success() {
        return Err(AdminError::storage("read", watched, status_error(status)));
    }
    Ok(resp.json::<Value>().await.unwrap_or(Value::Null))
}

/// Content digest of a snapshot, used to suppress unchanged poll
/// deliveries. Object keys serialize in sorted order, so equal trees
/// digest equally.
fn snapshot_digest(snapshot: &Value) -> String {
    let serialized = serde_json::to_string(snapshot).unwrap_or_else(|_| "null".to_string());
    let mut hasher = DefaultHasher::new();
    serialized.hash(&mut hasher);
    format!("digest:{:016x}", hasher.finish())
}

// ---------------------------------------------------------------------------
// Identity provider
// ---------------------------------------------------------------------------

struct AuthSession {
    user: AdminUser,
    id_token: String,
    expires_at: DateTime<Utc>,
}

impl AuthSession {
    fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }
}

/// Wire shape of a successful identity grant.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AuthReply {
    local_id: String,
    email: String,
    id_token: String,
    /// Seconds, sent as a string on the wire.
    #[serde(default)]
    expires_in: Option<String>,
}

/// Email/password identity against the hosted auth endpoints. The
/// session is cached in memory and considered signed out once its token
/// expires.
pub struct RestIdentity {
    client: Client,
    auth_url: String,
    api_key: Option<String>,
    session: Mutex<Option<AuthSession>>,
}

impl RestIdentity {
    pub fn new(config: &RestConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| {
                AdminError::storage("create HTTP client", config.database_url.clone(), e)
            })?;
        Ok(Self {
            client,
            auth_url: format!("{}/auth", config.database_url),
            api_key: config.api_key.clone(),
            session: Mutex::new(None),
        })
    }

    /// Bearer token for the active session, if it has not expired.
    pub fn id_token(&self) -> Option<String> {
        let session = self.session.lock().unwrap();
        session
            .as_ref()
            .filter(|s| !s.is_expired())
            .map(|s| s.id_token.clone())
    }

    async fn grant(&self, op: &'static str, verb: &str, email: &str, password: &str) -> Result<AdminUser> {
        let url = format!("{}/{}", self.auth_url, verb);
        let mut req = self.client.post(&url).json(&serde_json::json!({
            "email": email,
            "password": password,
            "returnSecureToken": true,
        }));
        if let Some(key) = &self.api_key {
            req = req.query(&[("key", key)]);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| AdminError::storage(op, email, friendly_error(&self.auth_url, &e)))?;
        let status = resp.status();
        if !status.is_success() {
            // Identity failures carry a code in `error.message`, e.g.
            // EMAIL_EXISTS or INVALID_LOGIN_CREDENTIALS.
            let body = resp.json::<Value>().await.unwrap_or(Value::Null);
            let code = body
                .pointer("/error/message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| status_error(status).to_string());
            return Err(AdminError::storage(op, email, anyhow::anyhow!(code)));
        }

        let reply: AuthReply = resp
            .json()
            .await
            .map_err(|e| AdminError::storage(op, email, friendly_error(&self.auth_url, &e)))?;

        let lifetime = reply
            .expires_in
            .as_deref()
            .and_then(|s| s.parse::<i64>().ok())
            .unwrap_or(DEFAULT_TOKEN_LIFETIME_SECS);
        let user = AdminUser {
            uid: reply.local_id,
            email: reply.email,
        };
        {
            let mut session = self.session.lock().unwrap();
            *session = Some(AuthSession {
                user: user.clone(),
                id_token: reply.id_token,
                expires_at: Utc::now() + ChronoDuration::seconds(lifetime),
            });
        }
        Ok(user)
    }
}

#[async_trait]
impl IdentityProvider for RestIdentity {
    fn current_user(&self) -> Option<AdminUser> {
        let session = self.session.lock().unwrap();
        session
            .as_ref()
            .filter(|s| !s.is_expired())
            .map(|s| s.user.clone())
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<AdminUser> {
        let (email, password) = require_credentials(email, password)?;
        let user = self
            .grant("sign in", "accounts:signInWithPassword", email, password)
            .await?;
        info!(uid = %user.uid, "signed in");
        Ok(user)
    }

    async fn sign_up(&self, email: &str, password: &str) -> Result<AdminUser> {
        let (email, password) = require_credentials(email, password)?;
        let user = self.grant("sign up", "accounts:signUp", email, password).await?;
        info!(uid = %user.uid, "account created and signed in");
        Ok(user)
    }

    fn sign_out(&self) {
        if let Some(session) = self.session.lock().unwrap().take() {
            info!(uid = %session.user.uid, "signed out");
        }
    }
}
