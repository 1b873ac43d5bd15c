/*
 *  reconciler.rs
 *
 *  SignPlay - exhibit display controller
 *  (c) 2020-26 Stuart Hunter
 *
 *  Display reconciler - turns the remote settings snapshot into one
 *  complete display state and keeps the cloud's screen status in step
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

use log::{debug, info, warn};
use std::sync::Arc;

use crate::deutils::{parse_seconds, to_boolean};
use crate::frontend::{DisplayMode, DisplayState, FrontendLink, GameSettings, SignageContent};
use crate::manifest::{
    Manifest,
    GAME_DURATION,
    GAME_MODE_ID,
    GAME_SUMMARY_SCREEN_DURATION,
    SCREEN_STATUS,
    SIGNAGE_BODY,
    SIGNAGE_HEADER,
    SIGNAGE_MAIN_IMAGE,
    SIGNAGE_SUBHEADER,
};
use crate::remote::{RemoteClient, SettingValue};

const BODY_DELIMITER: char = '|';

/// Session state carried between reconciliations
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SessionState {
    /// Operation mode as last reported by the cloud
    pub op_mode: bool,

    /// Mode of the last display state sent, `None` before the first
    pub displayed: Option<DisplayMode>,

    /// Device pulsed on gameplay, configured or adopted on registration
    pub indicator: Option<String>,
}

impl SessionState {
    pub fn with_op_mode(self, op_mode: bool) -> Self {
        Self { op_mode, ..self }
    }
}

/// Splits pipe separated body copy into paragraphs; empty copy has none.
pub fn split_body(body: &str) -> Vec<String> {
    if body.is_empty() {
        return Vec::new();
    }
    body.split(BODY_DELIMITER).map(str::to_string).collect()
}

/// Reads settings and pushes display states.
#[derive(Debug, Clone)]
pub struct DisplayReconciler {
    manifest: Arc<Manifest>,
}

impl DisplayReconciler {
    pub fn new(manifest: Arc<Manifest>) -> Self {
        Self { manifest }
    }

    /// Reads one setting as text. Unset or unreadable settings fall back to
    /// the manifest default, then to empty.
    pub async fn read_text(&self, remote: &dyn RemoteClient, id: &str) -> String {
        match remote.get_setting(id).await {
            Ok(Some(value)) => return value.as_text(),
            Ok(None) => debug!("setting {} unset, using default", id),
            Err(e) => warn!("reading setting {} failed, using default: {}", id, e),
        }
        self.manifest.default_for(id).unwrap_or_default().to_string()
    }

    /// Reads an IntegerInput as whole seconds, falling back to the
    /// manifest default, then zero.
    pub async fn read_seconds(&self, remote: &dyn RemoteClient, id: &str) -> u32 {
        let text = self.read_text(remote, id).await;
        parse_seconds(&text)
            .or_else(|| {
                if !text.is_empty() {
                    warn!("setting {} = '{}' is not a number of seconds", id, text);
                }
                self.manifest.default_for(id).and_then(parse_seconds)
            })
            .unwrap_or(0)
    }

    /// Reads a toggle with the value's own truthiness, so `0` is off.
    /// Fallbacks are manifest text.
    pub async fn read_flag(&self, remote: &dyn RemoteClient, id: &str) -> bool {
        match remote.get_setting(id).await {
            Ok(Some(value)) => return value.is_truthy(),
            Ok(None) => debug!("setting {} unset, using default", id),
            Err(e) => warn!("reading setting {} failed, using default: {}", id, e),
        }
        to_boolean(self.manifest.default_for(id).unwrap_or_default())
    }

    /// Builds the display state for the current settings. Standby reads
    /// nothing at all.
    pub async fn read_state(&self, remote: &dyn RemoteClient, op_mode: bool) -> DisplayState {
        if !op_mode {
            return DisplayState::Standby;
        }

        let game_mode = self.read_flag(remote, GAME_MODE_ID).await;
        match DisplayMode::derive(op_mode, game_mode) {
            DisplayMode::Standby => DisplayState::Standby,
            DisplayMode::Signage => {
                let header = self.read_text(remote, SIGNAGE_HEADER).await;
                let subheader = self.read_text(remote, SIGNAGE_SUBHEADER).await;
                let body = self.read_text(remote, SIGNAGE_BODY).await;
                let image = self.read_text(remote, SIGNAGE_MAIN_IMAGE).await;
                DisplayState::Signage(SignageContent {
                    header,
                    subheader,
                    body: split_body(&body),
                    image,
                })
            }
            DisplayMode::Game => DisplayState::Game(GameSettings {
                game_duration_secs: self.read_seconds(remote, GAME_DURATION).await,
                summary_duration_secs: self.read_seconds(remote, GAME_SUMMARY_SCREEN_DURATION).await,
            }),
        }
    }

    /// Sends the full display state and mirrors the screen status.
    pub async fn reconcile(
        &self,
        remote: &dyn RemoteClient,
        frontend: &FrontendLink,
        session: SessionState,
    ) -> SessionState {
        let state = self.read_state(remote, session.op_mode).await;
        let mode = state.mode();

        if session.displayed != Some(mode) {
            info!("Display mode changed: {:?} -> {:?}", session.displayed, mode);
        } else {
            debug!("Re-sending {:?} display state", mode);
        }

        frontend.show(state);

        if let Err(e) = remote.set_status(SCREEN_STATUS, mode.status_text()).await {
            warn!("setting {} failed: {}", SCREEN_STATUS, e);
        }

        SessionState { displayed: Some(mode), ..session }
    }

    /// Flips the game-mode toggle, returns the value written.
    pub async fn toggle_game_mode(&self, remote: &dyn RemoteClient) -> bool {
        let next = !self.read_flag(remote, GAME_MODE_ID).await;
        info!("Toggling game mode to {}", next);
        if let Err(e) = remote.set_setting(GAME_MODE_ID, SettingValue::from(next.to_string())).await {
            warn!("setting {} failed: {}", GAME_MODE_ID, e);
        }
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::FrontendCommand;
    use crate::remote::{MemoryRemote, RemoteCall};

    fn reconciler() -> DisplayReconciler {
        DisplayReconciler::new(Arc::new(Manifest::builtin()))
    }

    #[test]
    fn test_split_body() {
        assert!(split_body("").is_empty());
        assert_eq!(split_body("one"), vec!["one"]);
        assert_eq!(split_body("one|two|three"), vec!["one", "two", "three"]);
        // empty paragraphs are kept, count is delimiters + 1
        assert_eq!(split_body("|"), vec!["", ""]);
        for body in ["a|b", "||", "x|y|z|"] {
            let delimiters = body.matches('|').count();
            assert_eq!(split_body(body).len(), delimiters + 1);
        }
    }

    #[tokio::test]
    async fn test_standby_reads_nothing() {
        let remote = MemoryRemote::from_manifest(&Manifest::builtin());
        let (link, mut rx) = FrontendLink::channel();

        let session = reconciler().reconcile(&remote, &link, SessionState::default()).await;

        assert_eq!(session.displayed, Some(DisplayMode::Standby));
        assert_eq!(rx.try_recv().unwrap(), FrontendCommand::Show(DisplayState::Standby));
        assert_eq!(
            remote.take_calls(),
            vec![RemoteCall::SetStatus { id: SCREEN_STATUS.into(), value: "Standby Screen".into() }]
        );
    }

    #[tokio::test]
    async fn test_signage_state() {
        let remote = MemoryRemote::from_manifest(&Manifest::builtin())
            .with_setting(GAME_MODE_ID, "false")
            .with_setting(SIGNAGE_HEADER, "Welcome")
            .with_setting(SIGNAGE_SUBHEADER, "to the exhibit")
            .with_setting(SIGNAGE_BODY, "First para|Second para")
            .with_setting(SIGNAGE_MAIN_IMAGE, "hero.png");
        let (link, mut rx) = FrontendLink::channel();

        let session = reconciler()
            .reconcile(&remote, &link, SessionState::default().with_op_mode(true))
            .await;

        assert_eq!(session.displayed, Some(DisplayMode::Signage));
        assert_eq!(
            rx.try_recv().unwrap(),
            FrontendCommand::Show(DisplayState::Signage(SignageContent {
                header: "Welcome".into(),
                subheader: "to the exhibit".into(),
                body: vec!["First para".into(), "Second para".into()],
                image: "hero.png".into(),
            }))
        );
        assert_eq!(remote.state().statuses.get(SCREEN_STATUS).map(String::as_str), Some("Digital Signage"));
        // game fields are not read for signage
        assert!(!remote.take_calls().contains(&RemoteCall::GetSetting(GAME_DURATION.into())));
    }

    #[tokio::test]
    async fn test_game_state_uses_defaults_when_unset() {
        let remote = MemoryRemote::new().with_setting(GAME_MODE_ID, "true");
        let (link, mut rx) = FrontendLink::channel();

        reconciler()
            .reconcile(&remote, &link, SessionState::default().with_op_mode(true))
            .await;

        assert_eq!(
            rx.try_recv().unwrap(),
            FrontendCommand::Show(DisplayState::Game(GameSettings { game_duration_secs: 5, summary_duration_secs: 5 }))
        );
        assert_eq!(remote.state().statuses.get(SCREEN_STATUS).map(String::as_str), Some("Game Screen"));
    }

    #[tokio::test]
    async fn test_failed_reads_are_not_fatal() {
        let remote = MemoryRemote::new()
            .with_setting(GAME_MODE_ID, "true")
            .with_setting(GAME_DURATION, "not a number");
        remote.state().failing_reads.insert(GAME_SUMMARY_SCREEN_DURATION.into());
        let (link, mut rx) = FrontendLink::channel();

        reconciler()
            .reconcile(&remote, &link, SessionState::default().with_op_mode(true))
            .await;

        assert_eq!(
            rx.try_recv().unwrap(),
            FrontendCommand::Show(DisplayState::Game(GameSettings { game_duration_secs: 5, summary_duration_secs: 5 }))
        );
    }

    #[tokio::test]
    async fn test_unset_signage_is_empty() {
        let remote = MemoryRemote::new();
        remote.state().failing_reads.insert(SIGNAGE_HEADER.into());
        let state = reconciler().read_state(&remote, true).await;
        assert_eq!(state, DisplayState::Signage(SignageContent::default()));
    }

    #[tokio::test]
    async fn test_toggle_game_mode() {
        let remote = MemoryRemote::new().with_setting(GAME_MODE_ID, "false");
        assert!(reconciler().toggle_game_mode(&remote).await);
        assert_eq!(remote.state().settings.get(GAME_MODE_ID), Some(&SettingValue::from("true")));
        assert!(!reconciler().toggle_game_mode(&remote).await);
        assert_eq!(remote.state().settings.get(GAME_MODE_ID), Some(&SettingValue::from("false")));

        // never set counts as off
        let remote = MemoryRemote::new();
        assert!(reconciler().toggle_game_mode(&remote).await);
    }

    #[tokio::test]
    async fn test_flag_uses_value_truthiness() {
        let r = reconciler();
        let remote = MemoryRemote::new().with_setting(GAME_MODE_ID, 0i64);
        assert!(!r.read_flag(&remote, GAME_MODE_ID).await);
        assert_eq!(r.read_state(&remote, true).await.mode(), DisplayMode::Signage);

        let remote = MemoryRemote::new().with_setting(GAME_MODE_ID, 1i64);
        assert!(r.read_flag(&remote, GAME_MODE_ID).await);

        let remote = MemoryRemote::new().with_setting(GAME_MODE_ID, SettingValue::Bool(false));
        assert!(!r.read_flag(&remote, GAME_MODE_ID).await);
        assert!(r.toggle_game_mode(&remote).await);

        let remote = MemoryRemote::new().with_setting(GAME_MODE_ID, "0");
        assert!(r.read_flag(&remote, GAME_MODE_ID).await);
    }
}
