/*
 *  renderer.rs
 *
 *  SignPlay - exhibit display controller
 *  (c) 2020-26 Stuart Hunter
 *
 *  Screen model for the signage page and the button clicker game, and a
 *  console presentation of it
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

use log::{debug, info};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc::{Sender, UnboundedReceiver};
use tokio::time::{self, Instant};

use crate::frontend::{DisplayState, FrontendCommand, FrontendEvent, GameSettings, SignageContent};

pub const GAME_TITLE: &str = "Button Clicker";

/// Targets land anywhere in the first 90% of each axis
const TARGET_RANGE: u8 = 90;

const DEFAULT_GAME: GameSettings = GameSettings { game_duration_secs: 5, summary_duration_secs: 5 };

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Screen {
    /// Nothing shown, standby or freshly reloaded
    Blank,
    Signage(SignageContent),
    GameMenu,
    GameLive { targets: u32, target: (u8, u8) },
    GameOver { targets: u32 },
}

/// What is on screen and when it next changes by itself.
#[derive(Debug, Clone)]
pub struct Renderer {
    screen: Screen,
    game: GameSettings,
    deadline: Option<Instant>,
    content_dir: PathBuf,
}

fn random_target<R: Rng + ?Sized>(rng: &mut R) -> (u8, u8) {
    (rng.random_range(0..TARGET_RANGE), rng.random_range(0..TARGET_RANGE))
}

impl Renderer {
    pub fn new(content_dir: PathBuf) -> Self {
        Self {
            screen: Screen::Blank,
            game: DEFAULT_GAME,
            deadline: None,
            content_dir,
        }
    }

    pub fn screen(&self) -> &Screen {
        &self.screen
    }

    /// When the current screen times out, if it does.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Replaces whatever is on screen. A live game is abandoned.
    pub fn apply(&mut self, cmd: FrontendCommand) {
        self.deadline = None;
        match cmd {
            FrontendCommand::Show(DisplayState::Standby) => self.screen = Screen::Blank,
            FrontendCommand::Show(DisplayState::Signage(content)) => self.screen = Screen::Signage(content),
            FrontendCommand::Show(DisplayState::Game(game)) => {
                self.game = game;
                self.screen = Screen::GameMenu;
            }
            FrontendCommand::Reload => {
                self.game = DEFAULT_GAME;
                self.screen = Screen::Blank;
            }
        }
    }

    /// Starts a run from the menu. Returns false anywhere else.
    pub fn start<R: Rng + ?Sized>(&mut self, now: Instant, rng: &mut R) -> bool {
        if self.screen != Screen::GameMenu {
            return false;
        }
        self.screen = Screen::GameLive { targets: 0, target: random_target(rng) };
        self.deadline = Some(now + Duration::from_secs(self.game.game_duration_secs as u64));
        true
    }

    /// Counts a hit and moves the target. Returns false when no game is live.
    pub fn hit<R: Rng + ?Sized>(&mut self, rng: &mut R) -> bool {
        match &mut self.screen {
            Screen::GameLive { targets, target } => {
                *targets += 1;
                *target = random_target(rng);
                true
            }
            _ => false,
        }
    }

    /// Advances timed screens. Ending a run yields its report.
    pub fn poll(&mut self, now: Instant) -> Option<FrontendEvent> {
        let deadline = self.deadline?;
        if now < deadline {
            return None;
        }
        match self.screen {
            Screen::GameLive { targets, .. } => {
                self.screen = Screen::GameOver { targets };
                self.deadline = Some(now + Duration::from_secs(self.game.summary_duration_secs as u64));
                Some(FrontendEvent::GameCompleted(targets))
            }
            Screen::GameOver { .. } => {
                self.screen = Screen::GameMenu;
                self.deadline = None;
                None
            }
            _ => {
                self.deadline = None;
                None
            }
        }
    }

    /// Text rendering of the current screen.
    pub fn lines(&self) -> Vec<String> {
        match &self.screen {
            Screen::Blank => vec![String::new()],
            Screen::Signage(content) => {
                let mut lines = vec![content.header.clone(), content.subheader.clone()];
                lines.extend(content.body.iter().cloned());
                if !content.image.is_empty() {
                    lines.push(format!("[image {}]", self.content_dir.join(&content.image).display()));
                }
                lines
            }
            Screen::GameMenu => vec![
                GAME_TITLE.to_string(),
                format!(
                    "Click start to begin. You have {} seconds to click as many targets as you can!",
                    self.game.game_duration_secs
                ),
                "[ START ]".to_string(),
            ],
            Screen::GameLive { targets, target } => vec![
                format!("Targets: {}", targets),
                format!("(o) at {}% down, {}% across", target.0, target.1),
            ],
            Screen::GameOver { targets } => {
                let header = if *targets < self.game.game_duration_secs {
                    "are you even trying?!"
                } else {
                    "Congrats!"
                };
                vec![
                    header.to_string(),
                    format!("You got {} target{}!", targets, if *targets == 1 { "" } else { "s" }),
                ]
            }
        }
    }
}

async fn draw<W: AsyncWrite + Unpin>(renderer: &Renderer, out: &mut W) -> std::io::Result<()> {
    let mut frame = String::from("----------------------------------------\n");
    for line in renderer.lines() {
        frame.push_str(&line);
        frame.push('\n');
    }
    out.write_all(frame.as_bytes()).await?;
    out.flush().await
}

/// Runs the console presentation until the controller side closes.
///
/// Input lines: `s` starts a game from the menu, an empty line or `h`
/// hits the target.
pub async fn run_console<I, W, T>(
    mut renderer: Renderer,
    mut rx: UnboundedReceiver<FrontendCommand>,
    input: I,
    mut out: W,
    evt_tx: Sender<T>,
    report_hits: bool,
) -> std::io::Result<()>
where
    I: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
    T: From<FrontendEvent> + Send + 'static,
{
    let mut lines = input.lines();
    let mut input_open = true;
    let mut rng = StdRng::from_os_rng();

    loop {
        let deadline = renderer.deadline();
        tokio::select! {
            biased;

            cmd = rx.recv() => {
                let Some(cmd) = cmd else { break };
                renderer.apply(cmd);
                draw(&renderer, &mut out).await?;
            }

            line = lines.next_line(), if input_open => {
                match line? {
                    None => {
                        debug!("console: input closed");
                        input_open = false;
                    }
                    Some(line) => match line.trim() {
                        "s" | "start" => {
                            if renderer.start(Instant::now(), &mut rng) {
                                draw(&renderer, &mut out).await?;
                            }
                        }
                        "" | "h" => {
                            if renderer.hit(&mut rng) {
                                if report_hits {
                                    let _ = evt_tx.send(T::from(FrontendEvent::TargetHit)).await;
                                }
                                draw(&renderer, &mut out).await?;
                            }
                        }
                        other => debug!("console: unknown input '{}'", other),
                    },
                }
            }

            _ = time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                if let Some(evt) = renderer.poll(Instant::now()) {
                    info!("console: game over, {:?}", evt);
                    if evt_tx.send(T::from(evt)).await.is_err() {
                        break;
                    }
                }
                draw(&renderer, &mut out).await?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn game(duration: u32, summary: u32) -> FrontendCommand {
        FrontendCommand::Show(DisplayState::Game(GameSettings {
            game_duration_secs: duration,
            summary_duration_secs: summary,
        }))
    }

    #[test]
    fn test_mode_switch_replaces_screen() {
        let mut r = Renderer::new(PathBuf::from("content"));
        r.apply(FrontendCommand::Show(DisplayState::Signage(SignageContent {
            header: "Hello".into(),
            subheader: "World".into(),
            body: vec!["p1".into(), "p2".into()],
            image: "a.png".into(),
        })));
        assert_eq!(r.lines(), vec!["Hello", "World", "p1", "p2", "[image content/a.png]"]);

        r.apply(game(10, 3));
        assert_eq!(r.screen(), &Screen::GameMenu);
        assert!(r.lines()[1].contains("You have 10 seconds"));

        r.apply(FrontendCommand::Show(DisplayState::Standby));
        assert_eq!(r.screen(), &Screen::Blank);
    }

    #[test]
    fn test_game_run() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut r = Renderer::new(PathBuf::from("content"));
        let t0 = Instant::now();

        // not on the menu yet
        assert!(!r.start(t0, &mut rng));
        r.apply(game(3, 2));
        assert!(r.start(t0, &mut rng));
        assert!(r.hit(&mut rng));
        assert!(r.hit(&mut rng));
        if let Screen::GameLive { target, .. } = r.screen() {
            assert!(target.0 < TARGET_RANGE && target.1 < TARGET_RANGE);
        } else {
            panic!("expected a live game");
        }

        assert_eq!(r.poll(t0 + Duration::from_secs(2)), None);
        assert_eq!(r.poll(t0 + Duration::from_secs(3)), Some(FrontendEvent::GameCompleted(2)));
        assert_eq!(r.lines(), vec!["are you even trying?!", "You got 2 targets!"]);
        assert!(!r.hit(&mut rng));

        assert_eq!(r.poll(t0 + Duration::from_secs(5)), None);
        assert_eq!(r.screen(), &Screen::GameMenu);
        assert_eq!(r.deadline(), None);
    }

    #[test]
    fn test_end_screen_wording() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut r = Renderer::new(PathBuf::new());
        let t0 = Instant::now();
        r.apply(game(1, 1));
        r.start(t0, &mut rng);
        r.hit(&mut rng);
        r.poll(t0 + Duration::from_secs(1));
        assert_eq!(r.lines(), vec!["Congrats!", "You got 1 target!"]);
    }

    #[test]
    fn test_reload_blanks_and_resets() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut r = Renderer::new(PathBuf::new());
        r.apply(game(30, 9));
        r.start(Instant::now(), &mut rng);
        r.apply(FrontendCommand::Reload);
        assert_eq!(r.screen(), &Screen::Blank);
        assert_eq!(r.game, DEFAULT_GAME);
        assert_eq!(r.deadline(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_console_reports_completion() {
        let (tx, rx) = mpsc::unbounded_channel();
        let (evt_tx, mut evt_rx) = mpsc::channel::<FrontendEvent>(4);
        let input: &[u8] = b"s\n\nh\n";

        tx.send(game(2, 1)).unwrap();
        let console = tokio::spawn(run_console(
            Renderer::new(PathBuf::new()),
            rx,
            input,
            tokio::io::sink(),
            evt_tx,
            true,
        ));

        assert_eq!(evt_rx.recv().await, Some(FrontendEvent::TargetHit));
        assert_eq!(evt_rx.recv().await, Some(FrontendEvent::TargetHit));
        assert_eq!(evt_rx.recv().await, Some(FrontendEvent::GameCompleted(2)));

        drop(tx);
        console.await.unwrap().unwrap();
    }
}
