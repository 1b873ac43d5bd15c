/*
 *  remote/bridge.rs
 *
 *  SignPlay - exhibit display controller
 *  (c) 2020-26 Stuart Hunter
 *
 *  JSON-RPC client for the SDK sidecar. The sidecar hosts the vendor SDK
 *  and exposes its calls and socket events on a local port.
 *
 *  This program is free software: you can redistribute it and/or modify
 *  it under the terms of the GNU General Public License as published by
 *  the Free Software Foundation, either version 3 of the License, or
 *  (at your option) any later version.
 *
 *  This program is distributed in the hope that it will be useful,
 *  but WITHOUT ANY WARRANTY; without even the implied warranty of
 *  MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 *  GNU General Public License for more details.
 *
 *  See <http://www.gnu.org/licenses/> to get a copy of the GNU General
 *  Public License.
 *
 */

use async_trait::async_trait;
use log::{debug, warn};
use reqwest::{Client, header};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio::sync::mpsc::{self, Sender};
use tokio::time;

use super::{RemoteClient, RemoteError, RemoteEvent, SettingValue};

/// Where the sidecar listens and who we are.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub host: String,
    pub port: u16,
    pub exhibit_id: String,
    pub token: String,
    /// How often to ask the sidecar for queued socket events
    pub poll: Duration,
}

/// Request payload.
#[derive(Debug, Serialize)]
pub struct BridgeRequest<'a> {
    pub id: u32,
    pub method: &'a str,
    pub params: Vec<Value>,
}

/// Error object carried in a reply.
#[derive(Debug, Deserialize)]
pub struct BridgeRpcError {
    pub code: i32,
    pub message: String,
}

/// Reply payload.
#[derive(Debug, Deserialize)]
pub struct BridgeResponse {
    pub id: Option<u32>,
    pub result: Option<Value>,
    pub error: Option<BridgeRpcError>,
}

impl From<reqwest::Error> for RemoteError {
    fn from(err: reqwest::Error) -> Self {
        RemoteError::Transport(err.to_string())
    }
}

/// A client for the SDK sidecar.
#[derive(Debug)]
pub struct BridgeClient {
    url: String,
    next_id: AtomicU32,
    client: Client,
}

impl BridgeClient {
    pub fn new(cfg: &BridgeConfig) -> Result<Self, RemoteError> {
        const VERSION: &str = concat!("SignPlay ", env!("CARGO_PKG_NAME"), " v", env!("CARGO_PKG_VERSION"));

        let mut headers = header::HeaderMap::new();
        headers.insert("User-Agent", header::HeaderValue::from_static(VERSION));
        headers.insert("Content-Type", header::HeaderValue::from_static("application/json"));
        headers.insert("Accept", header::HeaderValue::from_static("application/json"));
        headers.insert(
            "X-Exhibit-Id",
            header::HeaderValue::from_str(&cfg.exhibit_id)
                .map_err(|e| RemoteError::Protocol(format!("exhibit id: {}", e)))?,
        );
        let mut auth = header::HeaderValue::from_str(&format!("Bearer {}", cfg.token))
            .map_err(|e| RemoteError::Protocol(format!("exhibit token: {}", e)))?;
        auth.set_sensitive(true);
        headers.insert(header::AUTHORIZATION, auth);

        let client = Client::builder()
            .connect_timeout(Duration::from_millis(500))
            .default_headers(headers)
            .timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            url: format!("http://{}:{}/jsonrpc", cfg.host, cfg.port),
            next_id: AtomicU32::new(1),
            client,
        })
    }

    /// Sends one request and returns its `result`.
    pub async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value, RemoteError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = BridgeRequest { id, method, params };

        let response = self.client
            .post(&self.url)
            .json(&request)
            .send()
            .await?;
        response.error_for_status_ref()?;
        let text = response.text().await?;

        let reply: BridgeResponse = serde_json::from_str(&text)
            .map_err(|e| RemoteError::Protocol(format!("{} reply: {}", method, e)))?;
        check_reply(id, reply)
    }

    /// Drains socket events queued by the sidecar since the last poll.
    pub async fn poll_events(&self) -> Result<Vec<RemoteEvent>, RemoteError> {
        let result = self.call("events.poll", vec![]).await?;
        Ok(parse_events(result))
    }
}

/// Validates a reply against the request id and unwraps it.
fn check_reply(expected: u32, reply: BridgeResponse) -> Result<Value, RemoteError> {
    match reply.id {
        None => return Err(RemoteError::Protocol("reply missing 'id'".into())),
        Some(id) if id != expected => {
            return Err(RemoteError::Protocol(format!(
                "id mismatch: expected {}, received {}",
                expected, id
            )));
        }
        _ => {}
    }
    if let Some(error) = reply.error {
        return Err(RemoteError::Rejected { code: error.code, message: error.message });
    }
    // void methods reply with a null/absent result
    Ok(reply.result.unwrap_or(Value::Null))
}

fn parse_setting(result: Value) -> Result<Option<SettingValue>, RemoteError> {
    let value = match result {
        Value::Object(mut obj) => obj.remove("value").unwrap_or(Value::Null),
        other => other,
    };
    if value.is_null() {
        return Ok(None);
    }
    serde_json::from_value(value)
        .map(Some)
        .map_err(|e| RemoteError::Protocol(format!("setting value: {}", e)))
}

fn parse_file_list(result: Value) -> Vec<String> {
    result
        .get("files")
        .and_then(|f| f.as_array())
        .map(|files| {
            files
                .iter()
                .filter_map(|f| {
                    f.get("file")
                        .and_then(|n| n.as_str())
                        .or_else(|| f.as_str())
                        .map(str::to_string)
                })
                .collect()
        })
        .unwrap_or_default()
}

fn parse_events(result: Value) -> Vec<RemoteEvent> {
    let Value::Array(items) = result else {
        return Vec::new();
    };
    items
        .into_iter()
        .filter_map(|item| match serde_json::from_value::<RemoteEvent>(item.clone()) {
            Ok(evt) => Some(evt),
            Err(e) => {
                warn!("bridge: ignoring event {}: {}", item, e);
                None
            }
        })
        .collect()
}

#[async_trait]
impl RemoteClient for BridgeClient {
    async fn get_setting(&self, id: &str) -> Result<Option<SettingValue>, RemoteError> {
        let result = self.call("setting.get", vec![json!(id)]).await?;
        parse_setting(result)
    }

    async fn set_setting(&self, id: &str, value: SettingValue) -> Result<(), RemoteError> {
        self.call("setting.set", vec![json!(id), json!(value)]).await.map(|_| ())
    }

    async fn set_status(&self, id: &str, value: &str) -> Result<(), RemoteError> {
        self.call("status.set", vec![json!(id), json!(value)]).await.map(|_| ())
    }

    async fn set_hardware_property(&self, device_id: &str, property: &str, value: i64) -> Result<(), RemoteError> {
        self.call("hardware.set", vec![json!(device_id), json!(property), json!(value)])
            .await
            .map(|_| ())
    }

    async fn create_event(&self, name: &str, attributes: Map<String, Value>) -> Result<(), RemoteError> {
        self.call("event.create", vec![json!(name), Value::Object(attributes)])
            .await
            .map(|_| ())
    }

    async fn create_metric(&self, name: &str) -> Result<(), RemoteError> {
        self.call("metric.create", vec![json!(name)]).await.map(|_| ())
    }

    async fn remote_files(&self) -> Result<Vec<String>, RemoteError> {
        let result = self.call("content.list", vec![]).await?;
        Ok(parse_file_list(result))
    }

    async fn upload_file(&self, path: &Path) -> Result<(), RemoteError> {
        // the sidecar shares our filesystem and streams the file itself
        let path = tokio::fs::canonicalize(path).await?;
        self.call("content.upload", vec![json!(path.to_string_lossy())])
            .await
            .map(|_| ())
    }

    async fn sync_content(&self) -> Result<(), RemoteError> {
        self.call("content.sync", vec![]).await.map(|_| ())
    }

    async fn send_notification_email(&self, message: &str) -> Result<(), RemoteError> {
        self.call("notification.email", vec![json!(message)]).await.map(|_| ())
    }
}

#[derive(Debug)]
pub enum PollerCmd {
    Shutdown,
}

/// Spawn a task that polls the sidecar for socket events and forwards them.
/// Returns the command sender used to stop it.
pub fn spawn_event_poller<T>(client: Arc<BridgeClient>, poll: Duration, evt_tx: Sender<T>) -> Sender<PollerCmd>
where
    T: From<RemoteEvent> + Send + 'static,
{
    let (cmd_tx, mut cmd_rx) = mpsc::channel::<PollerCmd>(1);

    tokio::spawn(async move {
        let mut interval = time::interval(poll);
        interval.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
        let mut failing = false;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match client.poll_events().await {
                        Ok(events) => {
                            if failing {
                                debug!("event poller: bridge reachable again");
                                failing = false;
                            }
                            for evt in events {
                                if evt_tx.send(T::from(evt)).await.is_err() {
                                    debug!("event poller: receiver gone");
                                    return;
                                }
                            }
                        }
                        Err(e) => {
                            // log once per outage, the sidecar may simply be starting
                            if !failing {
                                warn!("event poller: {}", e);
                                failing = true;
                            }
                        }
                    }
                }

                cmd = cmd_rx.recv() => {
                    match cmd {
                        Some(PollerCmd::Shutdown) | None => {
                            debug!("event poller: shutdown");
                            break;
                        }
                    }
                }
            }
        }
    });

    cmd_tx
}
