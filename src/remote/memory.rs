/*
 *  remote/memory.rs
 *
 *  SignPlay - exhibit display controller
 *  (c) 2020-26 Stuart Hunter
 *
 *  In-memory remote for testing and offline runs
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
use log::info;
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use super::{RemoteClient, RemoteError, RemoteEvent, SettingValue};
use crate::manifest::Manifest;

/// One outbound call, as recorded by [`MemoryRemote`].
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteCall {
    GetSetting(String),
    SetSetting { id: String, value: SettingValue },
    SetStatus { id: String, value: String },
    SetHardware { device_id: String, property: String, value: i64 },
    Event { name: String, attributes: Map<String, Value> },
    Metric(String),
    Upload(String),
    Sync,
    Email(String),
}

type Echo = Box<dyn Fn(RemoteEvent) + Send + Sync>;

/// Shared state, inspectable from tests
#[derive(Default)]
pub struct MemoryRemoteState {
    /// Current settings snapshot
    pub settings: HashMap<String, SettingValue>,

    /// Latest value written to each status
    pub statuses: HashMap<String, String>,

    /// Remote content store, by file name
    pub files: Vec<String>,

    /// Every call in order
    pub calls: Vec<RemoteCall>,

    /// Setting reads that should fail
    pub failing_reads: HashSet<String>,

    /// File names whose upload should fail
    pub failing_uploads: HashSet<String>,

    /// When set, writes are echoed back as SETTING_RECEIVED like the cloud does
    echo: Option<Echo>,
}

impl std::fmt::Debug for MemoryRemoteState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryRemoteState")
            .field("settings", &self.settings)
            .field("statuses", &self.statuses)
            .field("files", &self.files)
            .field("calls", &self.calls.len())
            .finish()
    }
}

/// Remote that keeps everything in process.
#[derive(Debug, Clone, Default)]
pub struct MemoryRemote {
    state: Arc<Mutex<MemoryRemoteState>>,
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds every setting that declares a default.
    pub fn from_manifest(manifest: &Manifest) -> Self {
        let remote = Self::new();
        {
            let mut state = remote.lock();
            for path in manifest.ordered_paths() {
                if let Some(d) = manifest.default_for(&path) {
                    state.settings.insert(path, SettingValue::from(d));
                }
            }
        }
        remote
    }

    pub fn with_setting(self, id: &str, value: impl Into<SettingValue>) -> Self {
        self.lock().settings.insert(id.to_string(), value.into());
        self
    }

    pub fn with_files(self, files: &[&str]) -> Self {
        self.lock().files.extend(files.iter().map(|f| f.to_string()));
        self
    }

    pub fn set_echo(&self, echo: impl Fn(RemoteEvent) + Send + Sync + 'static) {
        self.lock().echo = Some(Box::new(echo));
    }

    pub fn state(&self) -> MutexGuard<'_, MemoryRemoteState> {
        self.lock()
    }

    /// Recorded calls, draining the log.
    pub fn take_calls(&self) -> Vec<RemoteCall> {
        std::mem::take(&mut self.lock().calls)
    }

    fn lock(&self) -> MutexGuard<'_, MemoryRemoteState> {
        // a panicking test thread must not hide the log from the others
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }
}

#[async_trait]
impl RemoteClient for MemoryRemote {
    async fn get_setting(&self, id: &str) -> Result<Option<SettingValue>, RemoteError> {
        let mut state = self.lock();
        state.calls.push(RemoteCall::GetSetting(id.to_string()));
        if state.failing_reads.contains(id) {
            return Err(RemoteError::Transport(format!("simulated failure reading {}", id)));
        }
        Ok(state.settings.get(id).cloned())
    }

    async fn set_setting(&self, id: &str, value: SettingValue) -> Result<(), RemoteError> {
        let mut state = self.lock();
        state.calls.push(RemoteCall::SetSetting { id: id.to_string(), value: value.clone() });
        state.settings.insert(id.to_string(), value.clone());
        if let Some(echo) = state.echo.as_ref() {
            echo(RemoteEvent::SettingChanged { id: id.to_string(), value: Some(value) });
        }
        Ok(())
    }

    async fn set_status(&self, id: &str, value: &str) -> Result<(), RemoteError> {
        let mut state = self.lock();
        state.calls.push(RemoteCall::SetStatus { id: id.to_string(), value: value.to_string() });
        state.statuses.insert(id.to_string(), value.to_string());
        Ok(())
    }

    async fn set_hardware_property(&self, device_id: &str, property: &str, value: i64) -> Result<(), RemoteError> {
        self.lock().calls.push(RemoteCall::SetHardware {
            device_id: device_id.to_string(),
            property: property.to_string(),
            value,
        });
        Ok(())
    }

    async fn create_event(&self, name: &str, attributes: Map<String, Value>) -> Result<(), RemoteError> {
        self.lock().calls.push(RemoteCall::Event { name: name.to_string(), attributes });
        Ok(())
    }

    async fn create_metric(&self, name: &str) -> Result<(), RemoteError> {
        self.lock().calls.push(RemoteCall::Metric(name.to_string()));
        Ok(())
    }

    async fn remote_files(&self) -> Result<Vec<String>, RemoteError> {
        Ok(self.lock().files.clone())
    }

    async fn upload_file(&self, path: &Path) -> Result<(), RemoteError> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| RemoteError::Protocol(format!("not a file: {}", path.display())))?;
        let mut state = self.lock();
        state.calls.push(RemoteCall::Upload(name.clone()));
        if state.failing_uploads.contains(&name) {
            return Err(RemoteError::Transport(format!("simulated upload failure for {}", name)));
        }
        state.files.push(name);
        Ok(())
    }

    async fn sync_content(&self) -> Result<(), RemoteError> {
        self.lock().calls.push(RemoteCall::Sync);
        Ok(())
    }

    async fn send_notification_email(&self, message: &str) -> Result<(), RemoteError> {
        info!("offline notification: {}", message);
        self.lock().calls.push(RemoteCall::Email(message.to_string()));
        Ok(())
    }
}
