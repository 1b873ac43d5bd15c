/*
 *  remote/mod.rs
 *
 *  SignPlay - exhibit display controller
 *  (c) 2020-26 Stuart Hunter
 *
 *  Narrow interface to the device management cloud. The vendor SDK owns
 *  transport, auth and persistence; we only see settings, statuses,
 *  events and content.
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
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::fmt::{self, Display, Formatter};
use std::path::Path;

use crate::deutils::{
    deserialize_bool_from_anything,
    deserialize_numeric_i64,
    deserialize_op_mode,
    to_boolean,
};

pub mod bridge;
pub mod memory;

pub use bridge::{BridgeClient, BridgeConfig, PollerCmd, spawn_event_poller};
pub use memory::{MemoryRemote, MemoryRemoteState, RemoteCall};

/// A setting value as the remote side reports it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SettingValue {
    Bool(bool),
    Integer(i64),
    Text(String),
}

impl SettingValue {
    pub fn as_text(&self) -> String {
        match self {
            SettingValue::Bool(b) => b.to_string(),
            SettingValue::Integer(i) => i.to_string(),
            SettingValue::Text(s) => s.clone(),
        }
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            SettingValue::Bool(b) => *b,
            SettingValue::Integer(i) => *i != 0,
            SettingValue::Text(s) => to_boolean(s),
        }
    }
}

impl From<&str> for SettingValue {
    fn from(s: &str) -> Self {
        SettingValue::Text(s.to_string())
    }
}

impl From<String> for SettingValue {
    fn from(s: String) -> Self {
        SettingValue::Text(s)
    }
}

impl From<i64> for SettingValue {
    fn from(i: i64) -> Self {
        SettingValue::Integer(i)
    }
}

impl From<Value> for SettingValue {
    /// Structured payloads (file selections and the like) are kept as
    /// their JSON text.
    fn from(v: Value) -> Self {
        match v {
            Value::Bool(b) => SettingValue::Bool(b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => SettingValue::Integer(i),
                None => SettingValue::Text(n.to_string()),
            },
            Value::String(s) => SettingValue::Text(s),
            other => SettingValue::Text(other.to_string()),
        }
    }
}

/// Any JSON value, null or absent is `None`.
fn deserialize_lenient_setting<'de, D>(deserializer: D) -> Result<Option<SettingValue>, D::Error>
where
    D: Deserializer<'de>,
{
    let v = Value::deserialize(deserializer)?;
    Ok(match v {
        Value::Null => None,
        other => Some(SettingValue::from(other)),
    })
}

impl Display for SettingValue {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_text())
    }
}

/// Events pushed by the cloud, names as the SDK socket layer emits them.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type")]
pub enum RemoteEvent {
    #[serde(rename = "READY")]
    Ready {
        #[serde(rename = "opMode", default, deserialize_with = "deserialize_op_mode")]
        op_mode: bool,
    },
    #[serde(rename = "OP_MODE_RECEIVED")]
    OpModeChanged {
        #[serde(deserialize_with = "deserialize_bool_from_anything")]
        value: bool,
    },
    #[serde(rename = "SETTING_RECEIVED")]
    SettingChanged {
        id: String,
        #[serde(default, deserialize_with = "deserialize_lenient_setting")]
        value: Option<SettingValue>,
    },
    #[serde(rename = "CONTROL_RECEIVED")]
    ControlTriggered { id: String },
    #[serde(rename = "HARDWARE_PROPERTY_RECEIVED")]
    HardwarePropertyChanged {
        peripheral: String,
        #[serde(default)]
        property: Option<String>,
        #[serde(deserialize_with = "deserialize_numeric_i64")]
        value: i64,
    },
    #[serde(rename = "FILE_UPLOADED")]
    FileUploaded { file: String },
    #[serde(rename = "HARDWARE_REGISTERED")]
    HardwareRegistered { id: String },
}

/// Error type for remote operations.
#[derive(Debug)]
pub enum RemoteError {
    /// Transport failure talking to the SDK bridge
    Transport(String),
    /// The bridge answered with an error object
    Rejected { code: i32, message: String },
    /// Reply could not be understood
    Protocol(String),
    /// Local file problem while uploading
    Io(std::io::Error),
}

impl Display for RemoteError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            RemoteError::Transport(msg) => write!(f, "Remote transport error: {}", msg),
            RemoteError::Rejected { code, message } => {
                write!(f, "Remote rejected request ({}): {}", code, message)
            }
            RemoteError::Protocol(msg) => write!(f, "Remote protocol error: {}", msg),
            RemoteError::Io(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl std::error::Error for RemoteError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RemoteError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for RemoteError {
    fn from(err: std::io::Error) -> Self {
        RemoteError::Io(err)
    }
}

/// Everything the controller needs from the management cloud.
///
/// Implementations are expected to be cheap to share behind an `Arc`; all
/// calls are best effort and never retried by callers.
#[async_trait]
pub trait RemoteClient: Send + Sync {
    /// Current value of a setting, `None` when it has never been set.
    async fn get_setting(&self, id: &str) -> Result<Option<SettingValue>, RemoteError>;

    async fn set_setting(&self, id: &str, value: SettingValue) -> Result<(), RemoteError>;

    async fn set_status(&self, id: &str, value: &str) -> Result<(), RemoteError>;

    async fn set_hardware_property(&self, device_id: &str, property: &str, value: i64) -> Result<(), RemoteError>;

    async fn create_event(&self, name: &str, attributes: Map<String, Value>) -> Result<(), RemoteError>;

    async fn create_metric(&self, name: &str) -> Result<(), RemoteError>;

    /// File names already held by the remote content store.
    async fn remote_files(&self) -> Result<Vec<String>, RemoteError>;

    async fn upload_file(&self, path: &Path) -> Result<(), RemoteError>;

    async fn sync_content(&self) -> Result<(), RemoteError>;

    async fn send_notification_email(&self, message: &str) -> Result<(), RemoteError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_setting_value_untagged() {
        let v: SettingValue = serde_json::from_str(r#""hello""#).unwrap();
        assert_eq!(v, SettingValue::Text("hello".into()));
        let v: SettingValue = serde_json::from_str("12").unwrap();
        assert_eq!(v, SettingValue::Integer(12));
        let v: SettingValue = serde_json::from_str("true").unwrap();
        assert_eq!(v, SettingValue::Bool(true));
        assert_eq!(serde_json::to_string(&SettingValue::from("false")).unwrap(), r#""false""#);
    }

    #[test]
    fn test_truthiness() {
        assert!(!SettingValue::from("").is_truthy());
        assert!(!SettingValue::from("false").is_truthy());
        assert!(SettingValue::from("true").is_truthy());
        assert!(!SettingValue::Bool(false).is_truthy());
        assert!(!SettingValue::Integer(0).is_truthy());
        assert!(SettingValue::Integer(3).is_truthy());
    }

    #[test]
    fn test_event_decoding() {
        let e: RemoteEvent = serde_json::from_str(r#"{"type":"READY","opMode":"On","extra":1}"#).unwrap();
        assert_eq!(e, RemoteEvent::Ready { op_mode: true });

        let e: RemoteEvent = serde_json::from_str(r#"{"type":"OP_MODE_RECEIVED","value":false}"#).unwrap();
        assert_eq!(e, RemoteEvent::OpModeChanged { value: false });

        let e: RemoteEvent = serde_json::from_str(
            r#"{"type":"SETTING_RECEIVED","id":"game-group/game-duration","value":"10"}"#,
        )
        .unwrap();
        assert_eq!(
            e,
            RemoteEvent::SettingChanged {
                id: "game-group/game-duration".into(),
                value: Some(SettingValue::Text("10".into())),
            }
        );

        // structured values must not cost us the change notification
        let e: RemoteEvent = serde_json::from_str(
            r#"{"type":"SETTING_RECEIVED","id":"signage-group/main-image","value":{"file":"hero.png","size":1024}}"#,
        )
        .unwrap();
        assert_eq!(
            e,
            RemoteEvent::SettingChanged {
                id: "signage-group/main-image".into(),
                value: Some(SettingValue::Text(r#"{"file":"hero.png","size":1024}"#.into())),
            }
        );
        let e: RemoteEvent = serde_json::from_str(r#"{"type":"SETTING_RECEIVED","id":"game-mode"}"#).unwrap();
        assert_eq!(e, RemoteEvent::SettingChanged { id: "game-mode".into(), value: None });
        let e: RemoteEvent = serde_json::from_str(r#"{"type":"SETTING_RECEIVED","id":"g","value":[1,2]}"#).unwrap();
        assert_eq!(e, RemoteEvent::SettingChanged { id: "g".into(), value: Some(SettingValue::Text("[1,2]".into())) });

        let e: RemoteEvent = serde_json::from_str(
            r#"{"type":"HARDWARE_PROPERTY_RECEIVED","peripheral":"Button","property":"Press","value":0}"#,
        )
        .unwrap();
        assert_eq!(
            e,
            RemoteEvent::HardwarePropertyChanged {
                peripheral: "Button".into(),
                property: Some("Press".into()),
                value: 0,
            }
        );

        assert!(serde_json::from_str::<RemoteEvent>(r#"{"type":"BOGUS"}"#).is_err());
    }
}
