/*
 *  manifest.rs
 *
 *  SignPlay - exhibit display controller
 *  (c) 2020-26 Stuart Hunter
 *
 *  Remote-configurable settings, controls and statuses exposed to the
 *  device management UI
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

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use thiserror::Error;

pub const SCREEN_STATUS: &str = "screen-status";
pub const LAST_GAME_PLAYED_STATUS: &str = "last-game-played";

pub const RELOAD_FRONTEND_CONTROL: &str = "reload-frontend";
pub const TOGGLE_GAME_MODE_CONTROL: &str = "toggle-game-mode";

pub const SIGNAGE_GROUP_ID: &str = "signage-group";
pub const SIGNAGE_HEADER_ID: &str = "header";
pub const SIGNAGE_SUBHEADER_ID: &str = "subheader";
pub const SIGNAGE_BODY_ID: &str = "body";
pub const SIGNAGE_MAIN_IMAGE_ID: &str = "main-image";

pub const GAME_MODE_ID: &str = "game-mode";

pub const GAME_GROUP_ID: &str = "game-group";
pub const GAME_DURATION_ID: &str = "game-duration";
pub const GAME_SUMMARY_SCREEN_DURATION_ID: &str = "game-summary-screen-duration";

// fully qualified paths as the remote side addresses them
pub const SIGNAGE_HEADER: &str = "signage-group/header";
pub const SIGNAGE_SUBHEADER: &str = "signage-group/subheader";
pub const SIGNAGE_BODY: &str = "signage-group/body";
pub const SIGNAGE_MAIN_IMAGE: &str = "signage-group/main-image";
pub const GAME_DURATION: &str = "game-group/game-duration";
pub const GAME_SUMMARY_SCREEN_DURATION: &str = "game-group/game-summary-screen-duration";

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Validation error: {0}")]
    Validation(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SettingKind {
    TextInput,
    IntegerInput,
    Toggle,
    FileSelection,
    SettingsGroup,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StatusKind {
    String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControlKind {
    Single,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusDef {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: StatusKind,
    pub display: String,
    pub order: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlDef {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: ControlKind,
    pub display: String,
    pub order: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettingDef {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: SettingKind,
    pub display: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
    pub order: u32,
    /// Children, only present on `SettingsGroup`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<Vec<SettingDef>>,
}

impl SettingDef {
    fn leaf(id: &str, kind: SettingKind, display: &str, order: u32) -> Self {
        Self {
            id: id.to_string(),
            kind,
            display: display.to_string(),
            default: None,
            order,
            schema: None,
        }
    }

    fn with_default(mut self, default: &str) -> Self {
        self.default = Some(default.to_string());
        self
    }

    fn group(id: &str, display: &str, order: u32, schema: Vec<SettingDef>) -> Self {
        Self {
            id: id.to_string(),
            kind: SettingKind::SettingsGroup,
            display: display.to_string(),
            default: None,
            order,
            schema: Some(schema),
        }
    }
}

/// The settings, controls and statuses this exhibit exposes. Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Manifest {
    #[serde(default)]
    pub statuses: Vec<StatusDef>,
    #[serde(default)]
    pub controls: Vec<ControlDef>,
    #[serde(default)]
    pub settings: Vec<SettingDef>,
}

/// On-disk wrapper, the SDK expects `{ "manifest": { ... } }`
#[derive(Debug, Serialize, Deserialize)]
struct ManifestFile {
    manifest: Manifest,
}

impl Manifest {
    /// The manifest the exhibit ships with.
    pub fn builtin() -> Self {
        use SettingKind::*;
        Self {
            statuses: vec![
                StatusDef {
                    id: SCREEN_STATUS.to_string(),
                    kind: StatusKind::String,
                    display: "Screen is currently showing:".to_string(),
                    order: 0,
                },
                StatusDef {
                    id: LAST_GAME_PLAYED_STATUS.to_string(),
                    kind: StatusKind::String,
                    display: "Last game played:".to_string(),
                    order: 1,
                },
            ],
            controls: vec![
                ControlDef {
                    id: RELOAD_FRONTEND_CONTROL.to_string(),
                    kind: ControlKind::Single,
                    display: "Reload Frontend".to_string(),
                    order: 0,
                },
                ControlDef {
                    id: TOGGLE_GAME_MODE_CONTROL.to_string(),
                    kind: ControlKind::Single,
                    display: "Toggle Game Mode".to_string(),
                    order: 1,
                },
            ],
            settings: vec![
                SettingDef::group(SIGNAGE_GROUP_ID, "Digital Signage Settings", 0, vec![
                    SettingDef::leaf(SIGNAGE_HEADER_ID, TextInput, "Header Copy", 0),
                    SettingDef::leaf(SIGNAGE_SUBHEADER_ID, TextInput, "Subheader Copy", 1),
                    SettingDef::leaf(SIGNAGE_BODY_ID, TextInput, "Body Copy (separate by | for new paragraph)", 2),
                    SettingDef::leaf(SIGNAGE_MAIN_IMAGE_ID, FileSelection, "Image Asset", 3),
                ]),
                SettingDef::leaf(GAME_MODE_ID, Toggle, "Game Mode", 1),
                SettingDef::group(GAME_GROUP_ID, "Game Settings", 2, vec![
                    SettingDef::leaf(GAME_DURATION_ID, IntegerInput, "Game Duration (seconds)", 0)
                        .with_default("5"),
                    SettingDef::leaf(GAME_SUMMARY_SCREEN_DURATION_ID, IntegerInput, "Game Summary Screen Duration (seconds)", 1)
                        .with_default("5"),
                ]),
            ],
        }
    }

    /// Reads a manifest file and validates it.
    pub fn load(path: &Path) -> Result<Self, ManifestError> {
        let s = fs::read_to_string(path)?;
        let file: ManifestFile = serde_json::from_str(&s)?;
        file.manifest.validate()?;
        Ok(file.manifest)
    }

    /// Serializes in the wrapped form the SDK loads.
    pub fn to_json_pretty(&self) -> Result<String, ManifestError> {
        let file = ManifestFile { manifest: self.clone() };
        Ok(serde_json::to_string_pretty(&file)?)
    }

    pub fn write(&self, path: &Path) -> Result<(), ManifestError> {
        fs::write(path, self.to_json_pretty()?)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ManifestError> {
        unique(self.statuses.iter().map(|s| s.id.as_str()), "status")?;
        unique(self.controls.iter().map(|c| c.id.as_str()), "control")?;
        unique(self.settings.iter().map(|s| s.id.as_str()), "setting")?;

        for setting in &self.settings {
            match (setting.kind, setting.schema.as_ref()) {
                (SettingKind::SettingsGroup, Some(children)) => {
                    unique(children.iter().map(|c| c.id.as_str()), &setting.id)?;
                    for child in children {
                        if child.kind == SettingKind::SettingsGroup || child.schema.is_some() {
                            return Err(ManifestError::Validation(format!(
                                "nested group '{}/{}' is not supported",
                                setting.id, child.id
                            )));
                        }
                        check_default(child, &setting.id)?;
                    }
                }
                (SettingKind::SettingsGroup, None) => {
                    return Err(ManifestError::Validation(format!(
                        "group '{}' has no schema",
                        setting.id
                    )));
                }
                (_, Some(_)) => {
                    return Err(ManifestError::Validation(format!(
                        "'{}' has a schema but is not a group",
                        setting.id
                    )));
                }
                (_, None) => check_default(setting, "")?,
            }
        }
        Ok(())
    }

    /// Looks up a setting by `group/id` or a top-level `id`.
    pub fn setting(&self, path: &str) -> Option<&SettingDef> {
        match path.split_once('/') {
            Some((group, id)) => self
                .settings
                .iter()
                .find(|s| s.id == group && s.kind == SettingKind::SettingsGroup)?
                .schema
                .as_ref()?
                .iter()
                .find(|s| s.id == id),
            None => self
                .settings
                .iter()
                .find(|s| s.id == path && s.kind != SettingKind::SettingsGroup),
        }
    }

    pub fn default_for(&self, path: &str) -> Option<&str> {
        self.setting(path).and_then(|s| s.default.as_deref())
    }

    pub fn has_control(&self, id: &str) -> bool {
        self.controls.iter().any(|c| c.id == id)
    }

    pub fn has_status(&self, id: &str) -> bool {
        self.statuses.iter().any(|s| s.id == id)
    }

    /// Every leaf setting path, groups flattened, in display order.
    pub fn ordered_paths(&self) -> Vec<String> {
        let mut top: Vec<&SettingDef> = self.settings.iter().collect();
        top.sort_by_key(|s| s.order);

        let mut paths = Vec::new();
        for setting in top {
            match setting.schema.as_ref() {
                Some(children) => {
                    let mut children: Vec<&SettingDef> = children.iter().collect();
                    children.sort_by_key(|c| c.order);
                    paths.extend(children.iter().map(|c| format!("{}/{}", setting.id, c.id)));
                }
                None => paths.push(setting.id.clone()),
            }
        }
        paths
    }
}

fn unique<'a>(ids: impl Iterator<Item = &'a str>, what: &str) -> Result<(), ManifestError> {
    let mut seen = HashSet::new();
    for id in ids {
        if id.is_empty() {
            return Err(ManifestError::Validation(format!("empty {} id", what)));
        }
        if !seen.insert(id) {
            return Err(ManifestError::Validation(format!("duplicate {} id '{}'", what, id)));
        }
    }
    Ok(())
}

fn check_default(setting: &SettingDef, group: &str) -> Result<(), ManifestError> {
    if setting.kind == SettingKind::IntegerInput {
        if let Some(d) = setting.default.as_deref() {
            if d.trim().parse::<i64>().is_err() {
                return Err(ManifestError::Validation(format!(
                    "default '{}' of '{}/{}' is not an integer",
                    d, group, setting.id
                )));
            }
        }
    }
    Ok(())
}
