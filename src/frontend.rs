/*
 *  frontend.rs
 *
 *  SignPlay - exhibit display controller
 *  (c) 2020-26 Stuart Hunter
 *
 *  Display state sent to the renderer, gameplay reports coming back,
 *  and the JSON-lines bridge for an external web renderer
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

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc::{self, Sender, UnboundedReceiver, UnboundedSender};

/// What the screen is for right now
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum DisplayMode {
    Standby,  // powered down for the public
    Signage,  // digital signage page
    Game,     // button clicker
}

impl DisplayMode {
    /// Operation mode off wins over everything.
    pub fn derive(op_mode: bool, game_mode: bool) -> Self {
        match (op_mode, game_mode) {
            (false, _) => DisplayMode::Standby,
            (true, false) => DisplayMode::Signage,
            (true, true) => DisplayMode::Game,
        }
    }

    /// Human readable status mirrored to the cloud.
    pub fn status_text(&self) -> &'static str {
        match self {
            DisplayMode::Standby => "Standby Screen",
            DisplayMode::Signage => "Digital Signage",
            DisplayMode::Game => "Game Screen",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SignageContent {
    pub header: String,
    pub subheader: String,
    pub body: Vec<String>,
    /// File name in the content directory, empty for none
    pub image: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GameSettings {
    pub game_duration_secs: u32,
    pub summary_duration_secs: u32,
}

/// One complete description of the screen. Each one replaces the last.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisplayState {
    Standby,
    Signage(SignageContent),
    Game(GameSettings),
}

impl DisplayState {
    pub fn mode(&self) -> DisplayMode {
        match self {
            DisplayState::Standby => DisplayMode::Standby,
            DisplayState::Signage(_) => DisplayMode::Signage,
            DisplayState::Game(_) => DisplayMode::Game,
        }
    }

    /// Expands into the tagged messages an external renderer understands.
    ///
    /// Such renderers redraw on `game-mode` only, so for a game the
    /// durations must already be in place when it arrives.
    pub fn messages(&self) -> Vec<FrontendMessage> {
        match self {
            DisplayState::Standby => vec![
                FrontendMessage::OperationMode(false),
                FrontendMessage::StandBy(true),
            ],
            DisplayState::Signage(content) => vec![
                FrontendMessage::OperationMode(true),
                FrontendMessage::GameMode(false),
                FrontendMessage::Header(content.header.clone()),
                FrontendMessage::Subheader(content.subheader.clone()),
                FrontendMessage::Body(content.body.clone()),
                FrontendMessage::MainImage(content.image.clone()),
            ],
            DisplayState::Game(game) => vec![
                FrontendMessage::OperationMode(true),
                FrontendMessage::GameDuration(game.game_duration_secs),
                FrontendMessage::GameSummaryScreenDuration(game.summary_duration_secs),
                FrontendMessage::GameMode(true),
            ],
        }
    }
}

/// Tagged message, `{"type": "...", "value": ...}` on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "kebab-case")]
pub enum FrontendMessage {
    OperationMode(bool),
    GameMode(bool),
    Header(String),
    Subheader(String),
    Body(Vec<String>),
    MainImage(String),
    GameDuration(u32),
    GameSummaryScreenDuration(u32),
    StandBy(bool),
    Reload,
}

/// Reports from the renderer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "kebab-case")]
pub enum FrontendEvent {
    /// End of a timed run, with the number of targets hit
    GameCompleted(u32),
    /// A single target hit, no running total
    TargetHit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrontendCommand {
    Show(DisplayState),
    Reload,
}

/// Controller side of the renderer channel.
#[derive(Debug, Clone)]
pub struct FrontendLink {
    tx: UnboundedSender<FrontendCommand>,
}

impl FrontendLink {
    pub fn channel() -> (Self, UnboundedReceiver<FrontendCommand>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn show(&self, state: DisplayState) {
        if self.tx.send(FrontendCommand::Show(state)).is_err() {
            debug!("frontend: renderer gone, display state dropped");
        }
    }

    pub fn reload(&self) {
        if self.tx.send(FrontendCommand::Reload).is_err() {
            debug!("frontend: renderer gone, reload dropped");
        }
    }
}

/// Writes every command as JSON lines until the link closes.
pub async fn forward_json_lines<W>(mut rx: UnboundedReceiver<FrontendCommand>, mut out: W) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(cmd) = rx.recv().await {
        let messages = match cmd {
            FrontendCommand::Show(state) => state.messages(),
            FrontendCommand::Reload => vec![FrontendMessage::Reload],
        };
        for msg in messages {
            let mut line = serde_json::to_string(&msg)?;
            line.push('\n');
            out.write_all(line.as_bytes()).await?;
        }
        out.flush().await?;
    }
    Ok(())
}

/// Reads renderer reports, one JSON object per line, until EOF.
pub async fn read_json_lines<R, T>(reader: R, evt_tx: Sender<T>) -> std::io::Result<()>
where
    R: AsyncBufRead + Unpin,
    T: From<FrontendEvent> + Send + 'static,
{
    let mut lines = reader.lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<FrontendEvent>(line) {
            Ok(evt) => {
                if evt_tx.send(T::from(evt)).await.is_err() {
                    break;
                }
            }
            Err(e) => warn!("frontend: ignoring '{}': {}", line, e),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_mode_derivation() {
        assert_eq!(DisplayMode::derive(false, false), DisplayMode::Standby);
        assert_eq!(DisplayMode::derive(false, true), DisplayMode::Standby);
        assert_eq!(DisplayMode::derive(true, false), DisplayMode::Signage);
        assert_eq!(DisplayMode::derive(true, true), DisplayMode::Game);
    }

    #[test]
    fn test_game_mode_message_comes_last() {
        let state = DisplayState::Game(GameSettings { game_duration_secs: 10, summary_duration_secs: 4 });
        let msgs = state.messages();
        let pos = |m: &FrontendMessage| msgs.iter().position(|x| x == m).unwrap();
        assert_eq!(msgs.last(), Some(&FrontendMessage::GameMode(true)));
        assert!(pos(&FrontendMessage::GameDuration(10)) < pos(&FrontendMessage::GameMode(true)));
        assert!(pos(&FrontendMessage::GameSummaryScreenDuration(4)) < pos(&FrontendMessage::GameMode(true)));
    }

    #[test]
    fn test_wire_format() {
        assert_eq!(
            serde_json::to_value(FrontendMessage::GameSummaryScreenDuration(5)).unwrap(),
            json!({"type": "game-summary-screen-duration", "value": 5})
        );
        assert_eq!(
            serde_json::to_value(FrontendMessage::Body(vec!["a".into(), "b".into()])).unwrap(),
            json!({"type": "body", "value": ["a", "b"]})
        );
        assert_eq!(serde_json::to_value(FrontendMessage::StandBy(true)).unwrap(), json!({"type": "stand-by", "value": true}));
        assert_eq!(serde_json::to_value(FrontendMessage::Reload).unwrap(), json!({"type": "reload"}));

        let evt: FrontendEvent = serde_json::from_str(r#"{"type":"game-completed","value":7}"#).unwrap();
        assert_eq!(evt, FrontendEvent::GameCompleted(7));
        let evt: FrontendEvent = serde_json::from_str(r#"{"type":"target-hit"}"#).unwrap();
        assert_eq!(evt, FrontendEvent::TargetHit);
    }

    #[tokio::test]
    async fn test_forward_json_lines() {
        let (link, rx) = FrontendLink::channel();
        link.show(DisplayState::Standby);
        link.reload();
        drop(link);

        let mut out = Vec::new();
        forward_json_lines(rx, &mut out).await.unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines,
            vec![
                r#"{"type":"operation-mode","value":false}"#,
                r#"{"type":"stand-by","value":true}"#,
                r#"{"type":"reload"}"#,
            ]
        );
    }

    #[tokio::test]
    async fn test_read_json_lines_skips_garbage() {
        let input: &[u8] = b"{\"type\":\"target-hit\"}\n\nnot json\n{\"type\":\"game-completed\",\"value\":3}\n";
        let (tx, mut rx) = mpsc::channel::<FrontendEvent>(8);
        read_json_lines(input, tx).await.unwrap();
        assert_eq!(rx.recv().await, Some(FrontendEvent::TargetHit));
        assert_eq!(rx.recv().await, Some(FrontendEvent::GameCompleted(3)));
        assert_eq!(rx.recv().await, None);
    }
}
