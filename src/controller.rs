/*
 *  controller.rs
 *
 *  SignPlay - exhibit display controller
 *  (c) 2020-26 Stuart Hunter
 *
 *  Controller - single dispatch loop over remote, frontend and timer events
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

use chrono::{Local, Utc};
use log::{debug, info, warn};
use serde_json::{Map, Value, json};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{Receiver, Sender};
use tokio::task::JoinHandle;

use crate::frontend::{FrontendEvent, FrontendLink};
use crate::maintenance::{self, MaintenanceSchedule, MaintenanceState, MaintenanceTick};
use crate::manifest::{
    GAME_DURATION,
    LAST_GAME_PLAYED_STATUS,
    Manifest,
    RELOAD_FRONTEND_CONTROL,
    SCREEN_STATUS,
    TOGGLE_GAME_MODE_CONTROL,
};
use crate::reconciler::{DisplayReconciler, SessionState};
use crate::remote::{RemoteClient, RemoteEvent};
use crate::seed::{self, SeedReport};

pub const GAME_COMPLETED_EVENT: &str = "game-completed";
pub const GAMES_PLAYED_METRIC: &str = "games-played";

/// Peripheral whose release toggles game mode
pub const BUTTON_PERIPHERAL: &str = "Button";

/// Everything the dispatch loop reacts to.
#[derive(Debug, Clone, PartialEq)]
pub enum ControllerEvent {
    Remote(RemoteEvent),
    Frontend(FrontendEvent),
    MaintenanceTick,
    /// Re-send the full display state, posted after a frontend reload
    Resync,
    IndicatorOff { device: String },
    Shutdown,
}

impl From<RemoteEvent> for ControllerEvent {
    fn from(evt: RemoteEvent) -> Self {
        ControllerEvent::Remote(evt)
    }
}

impl From<FrontendEvent> for ControllerEvent {
    fn from(evt: FrontendEvent) -> Self {
        ControllerEvent::Frontend(evt)
    }
}

impl From<MaintenanceTick> for ControllerEvent {
    fn from(_: MaintenanceTick) -> Self {
        ControllerEvent::MaintenanceTick
    }
}

#[derive(Debug, Clone)]
pub struct IndicatorConfig {
    /// Configured device, otherwise the first one that registers
    pub device_id: Option<String>,
    pub property: String,
    pub pulse: Duration,
}

impl Default for IndicatorConfig {
    fn default() -> Self {
        Self {
            device_id: None,
            property: "LED".to_string(),
            pulse: Duration::from_millis(250),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub seed_dir: PathBuf,
    /// Longer than the renderer takes to come back after a reload
    pub reload_delay: Duration,
    pub indicator: IndicatorConfig,
    pub maintenance: MaintenanceSchedule,
    pub check_period: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            seed_dir: PathBuf::from("seed"),
            reload_delay: Duration::from_millis(100),
            indicator: IndicatorConfig::default(),
            maintenance: MaintenanceSchedule::default(),
            check_period: maintenance::CHECK_PERIOD,
        }
    }
}

pub struct Controller {
    remote: Arc<dyn RemoteClient>,
    frontend: FrontendLink,
    reconciler: DisplayReconciler,
    config: ControllerConfig,
    session: SessionState,
    maintenance: Option<MaintenanceState>,
    ticker: Option<JoinHandle<()>>,
    seeding: Option<JoinHandle<SeedReport>>,
    evt_tx: Sender<ControllerEvent>,
}

impl Controller {
    pub fn new(
        remote: Arc<dyn RemoteClient>,
        frontend: FrontendLink,
        manifest: Arc<Manifest>,
        config: ControllerConfig,
        evt_tx: Sender<ControllerEvent>,
    ) -> Self {
        for control in [TOGGLE_GAME_MODE_CONTROL, RELOAD_FRONTEND_CONTROL] {
            if !manifest.has_control(control) {
                warn!("manifest does not declare control '{}'", control);
            }
        }
        for status in [SCREEN_STATUS, LAST_GAME_PLAYED_STATUS] {
            if !manifest.has_status(status) {
                warn!("manifest does not declare status '{}'", status);
            }
        }

        let session = SessionState {
            indicator: config.indicator.device_id.clone(),
            ..SessionState::default()
        };
        Self {
            remote,
            frontend,
            reconciler: DisplayReconciler::new(manifest),
            config,
            session,
            maintenance: None,
            ticker: None,
            seeding: None,
            evt_tx,
        }
    }

    pub fn session(&self) -> &SessionState {
        &self.session
    }

    pub fn maintenance(&self) -> Option<MaintenanceState> {
        self.maintenance
    }

    /// Waits for the seed upload started on readiness, if one is running.
    pub async fn wait_for_seed(&mut self) -> Option<SeedReport> {
        let handle = self.seeding.take()?;
        match handle.await {
            Ok(report) => Some(report),
            Err(e) => {
                warn!("seed upload task failed: {}", e);
                None
            }
        }
    }

    /// Drains the channel until shutdown.
    pub async fn run(mut self, mut rx: Receiver<ControllerEvent>) {
        info!("Controller running");
        while let Some(evt) = rx.recv().await {
            if !self.handle(evt).await {
                break;
            }
        }
        if let Some(ticker) = self.ticker.take() {
            ticker.abort();
        }
        info!("Controller stopped");
    }

    /// Dispatches one event. Returns false once the loop should stop.
    pub async fn handle(&mut self, evt: ControllerEvent) -> bool {
        match evt {
            ControllerEvent::Remote(evt) => self.on_remote(evt).await,
            ControllerEvent::Frontend(FrontendEvent::GameCompleted(targets)) => {
                self.on_game_completed(targets).await
            }
            ControllerEvent::Frontend(FrontendEvent::TargetHit) => self.pulse_indicator().await,
            ControllerEvent::MaintenanceTick => {
                if let Some(state) = self.maintenance {
                    let now = Utc::now().timestamp();
                    let next = self.config.maintenance.check(state, self.remote.as_ref(), now).await;
                    self.maintenance = Some(next);
                }
            }
            ControllerEvent::Resync => self.reconcile().await,
            ControllerEvent::IndicatorOff { device } => {
                if let Err(e) = self
                    .remote
                    .set_hardware_property(&device, &self.config.indicator.property, 0)
                    .await
                {
                    warn!("indicator {} off failed: {}", device, e);
                }
            }
            ControllerEvent::Shutdown => {
                debug!("controller: shutdown requested");
                return false;
            }
        }
        true
    }

    async fn on_remote(&mut self, evt: RemoteEvent) {
        match evt {
            RemoteEvent::Ready { op_mode } => {
                info!("Remote ready, operation mode {}", if op_mode { "on" } else { "off" });
                self.session = self.session.clone().with_op_mode(op_mode);
                self.start_seed_upload();
                self.reconcile().await;
                self.start_maintenance();
            }
            RemoteEvent::OpModeChanged { value } => {
                info!("Operation mode {}", if value { "on" } else { "off" });
                self.session = self.session.clone().with_op_mode(value);
                self.reconcile().await;
            }
            RemoteEvent::SettingChanged { id, value } => {
                debug!("setting {} changed to {:?}", id, value);
                self.reconcile().await;
            }
            RemoteEvent::ControlTriggered { id } => match id.as_str() {
                TOGGLE_GAME_MODE_CONTROL => self.toggle_game_mode().await,
                RELOAD_FRONTEND_CONTROL => self.reload_frontend(),
                other => warn!("ignoring unknown control '{}'", other),
            },
            RemoteEvent::HardwarePropertyChanged { peripheral, property, value } => {
                debug!("hardware {} {:?} = {}", peripheral, property, value);
                if peripheral == BUTTON_PERIPHERAL && value == 0 {
                    self.toggle_game_mode().await;
                }
            }
            RemoteEvent::FileUploaded { file } => info!("Remote file uploaded: {}", file),
            RemoteEvent::HardwareRegistered { id } => {
                if self.session.indicator.is_none() {
                    info!("Using {} as gameplay indicator", id);
                    self.session.indicator = Some(id);
                } else {
                    debug!("hardware {} registered", id);
                }
            }
        }
    }

    async fn reconcile(&mut self) {
        let session = std::mem::take(&mut self.session);
        self.session = self
            .reconciler
            .reconcile(self.remote.as_ref(), &self.frontend, session)
            .await;
    }

    async fn toggle_game_mode(&mut self) {
        self.reconciler.toggle_game_mode(self.remote.as_ref()).await;
        // the cloud echoes the write too, a second send is harmless
        self.reconcile().await;
    }

    fn reload_frontend(&self) {
        info!("Reloading frontend");
        self.frontend.reload();
        self.post_later(self.config.reload_delay, ControllerEvent::Resync);
    }

    fn start_seed_upload(&mut self) {
        if self.seeding.as_ref().is_some_and(|h| !h.is_finished()) {
            debug!("seed upload already running");
            return;
        }
        let remote = Arc::clone(&self.remote);
        let dir = self.config.seed_dir.clone();
        self.seeding = Some(tokio::spawn(async move { seed::upload_seed_content(remote, &dir).await }));
    }

    /// First readiness only. A reconnect keeps the count so a boundary
    /// crossed since the last check is still reminded about.
    fn start_maintenance(&mut self) {
        if let Some(state) = self.maintenance {
            debug!("Maintenance already running, {} reminder(s) counted", state.notified);
            return;
        }
        let now = Utc::now().timestamp();
        let state = self.config.maintenance.start(now);
        info!(
            "Maintenance: {} interval(s) since install, checking every {:?}",
            state.notified, self.config.check_period
        );
        self.maintenance = Some(state);
        if self.ticker.is_none() {
            self.ticker = Some(maintenance::spawn_ticker(self.config.check_period, self.evt_tx.clone()));
        }
    }

    async fn on_game_completed(&mut self, targets: u32) {
        info!("Game completed, {} target(s)", targets);
        let duration = self.reconciler.read_seconds(self.remote.as_ref(), GAME_DURATION).await;

        let mut attributes = Map::new();
        attributes.insert("targets-clicked".to_string(), json!(targets));
        attributes.insert("game-duration".to_string(), Value::from(duration));
        if let Err(e) = self.remote.create_event(GAME_COMPLETED_EVENT, attributes).await {
            warn!("recording {} failed: {}", GAME_COMPLETED_EVENT, e);
        }
        if let Err(e) = self.remote.create_metric(GAMES_PLAYED_METRIC).await {
            warn!("bumping {} failed: {}", GAMES_PLAYED_METRIC, e);
        }

        let played = Local::now().format("%a %b %d %Y %H:%M:%S GMT%z").to_string();
        if let Err(e) = self.remote.set_status(LAST_GAME_PLAYED_STATUS, &played).await {
            warn!("setting {} failed: {}", LAST_GAME_PLAYED_STATUS, e);
        }

        self.pulse_indicator().await;
    }

    /// Indicator on now, off after the pulse length.
    async fn pulse_indicator(&self) {
        let Some(device) = self.session.indicator.clone() else {
            return;
        };
        if let Err(e) = self
            .remote
            .set_hardware_property(&device, &self.config.indicator.property, 1)
            .await
        {
            warn!("indicator {} on failed: {}", device, e);
            return;
        }
        self.post_later(self.config.indicator.pulse, ControllerEvent::IndicatorOff { device });
    }

    fn post_later(&self, delay: Duration, evt: ControllerEvent) {
        let tx = self.evt_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if tx.send(evt).await.is_err() {
                debug!("controller gone, delayed event dropped");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::{DisplayState, FrontendCommand, GameSettings};
    use crate::manifest::GAME_MODE_ID;
    use crate::remote::{MemoryRemote, RemoteCall};
    use tokio::sync::mpsc::{self, UnboundedReceiver};

    struct Rig {
        controller: Controller,
        remote: MemoryRemote,
        frontend: UnboundedReceiver<FrontendCommand>,
        events: Receiver<ControllerEvent>,
    }

    fn rig(remote: MemoryRemote, config: ControllerConfig) -> Rig {
        let (tx, events) = mpsc::channel(16);
        let (link, frontend) = FrontendLink::channel();
        let controller = Controller::new(
            Arc::new(remote.clone()),
            link,
            Arc::new(Manifest::builtin()),
            config,
            tx,
        );
        Rig { controller, remote, frontend, events }
    }

    fn no_seed() -> ControllerConfig {
        ControllerConfig {
            seed_dir: PathBuf::from("/nonexistent/seed"),
            ..ControllerConfig::default()
        }
    }

    #[tokio::test]
    async fn test_op_mode_off_goes_to_standby() {
        let remote = MemoryRemote::from_manifest(&Manifest::builtin());
        let mut r = rig(remote, no_seed());

        r.controller.handle(RemoteEvent::OpModeChanged { value: true }.into()).await;
        assert!(matches!(r.frontend.try_recv(), Ok(FrontendCommand::Show(DisplayState::Signage(_)))));

        r.controller.handle(RemoteEvent::OpModeChanged { value: false }.into()).await;
        assert_eq!(r.frontend.try_recv().unwrap(), FrontendCommand::Show(DisplayState::Standby));
        assert_eq!(r.remote.state().statuses.get(SCREEN_STATUS).map(String::as_str), Some("Standby Screen"));
    }

    #[tokio::test]
    async fn test_button_release_toggles() {
        let remote = MemoryRemote::from_manifest(&Manifest::builtin()).with_setting(GAME_MODE_ID, "false");
        let mut r = rig(remote, no_seed());
        r.controller.session.op_mode = true;

        // press is ignored
        r.controller
            .handle(RemoteEvent::HardwarePropertyChanged { peripheral: "Button".into(), property: None, value: 1 }.into())
            .await;
        assert!(r.frontend.try_recv().is_err());

        r.controller
            .handle(RemoteEvent::HardwarePropertyChanged { peripheral: "Button".into(), property: None, value: 0 }.into())
            .await;
        assert_eq!(
            r.frontend.try_recv().unwrap(),
            FrontendCommand::Show(DisplayState::Game(GameSettings { game_duration_secs: 5, summary_duration_secs: 5 }))
        );
    }

    #[tokio::test]
    async fn test_unknown_control_is_ignored() {
        let mut r = rig(MemoryRemote::new(), no_seed());
        assert!(r.controller.handle(RemoteEvent::ControlTriggered { id: "self-destruct".into() }.into()).await);
        assert!(r.frontend.try_recv().is_err());
        assert!(r.remote.take_calls().is_empty());
    }

    #[tokio::test]
    async fn test_game_completed_records_play() {
        let remote = MemoryRemote::from_manifest(&Manifest::builtin()).with_setting(crate::manifest::GAME_DURATION, "12");
        let mut r = rig(remote, no_seed());

        r.controller.handle(FrontendEvent::GameCompleted(9).into()).await;

        let calls = r.remote.take_calls();
        let mut attributes = Map::new();
        attributes.insert("targets-clicked".into(), json!(9));
        attributes.insert("game-duration".into(), json!(12));
        assert!(calls.contains(&RemoteCall::Event { name: GAME_COMPLETED_EVENT.into(), attributes }));
        assert!(calls.contains(&RemoteCall::Metric(GAMES_PLAYED_METRIC.into())));
        assert!(r.remote.state().statuses.contains_key(LAST_GAME_PLAYED_STATUS));
        // no indicator known, nothing pulsed
        assert!(!calls.iter().any(|c| matches!(c, RemoteCall::SetHardware { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_indicator_pulse() {
        let mut r = rig(MemoryRemote::new(), no_seed());
        r.controller.handle(RemoteEvent::HardwareRegistered { id: "dev-1".into() }.into()).await;
        // only the first registration is adopted
        r.controller.handle(RemoteEvent::HardwareRegistered { id: "dev-2".into() }.into()).await;
        assert_eq!(r.controller.session().indicator.as_deref(), Some("dev-1"));

        r.controller.handle(FrontendEvent::TargetHit.into()).await;
        assert_eq!(
            r.remote.take_calls(),
            vec![RemoteCall::SetHardware { device_id: "dev-1".into(), property: "LED".into(), value: 1 }]
        );

        let off = r.events.recv().await.unwrap();
        assert_eq!(off, ControllerEvent::IndicatorOff { device: "dev-1".into() });
        r.controller.handle(off).await;
        assert_eq!(
            r.remote.take_calls(),
            vec![RemoteCall::SetHardware { device_id: "dev-1".into(), property: "LED".into(), value: 0 }]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_reload_resyncs_after_delay() {
        let remote = MemoryRemote::from_manifest(&Manifest::builtin());
        let mut r = rig(remote, no_seed());
        r.controller.session.op_mode = true;

        let started = tokio::time::Instant::now();
        r.controller.handle(RemoteEvent::ControlTriggered { id: RELOAD_FRONTEND_CONTROL.into() }.into()).await;
        assert_eq!(r.frontend.try_recv().unwrap(), FrontendCommand::Reload);
        assert!(r.frontend.try_recv().is_err());

        let resync = r.events.recv().await.unwrap();
        assert_eq!(resync, ControllerEvent::Resync);
        assert!(started.elapsed() >= Duration::from_millis(100));

        r.controller.handle(resync).await;
        assert!(matches!(r.frontend.try_recv(), Ok(FrontendCommand::Show(DisplayState::Signage(_)))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ready_starts_everything() {
        let remote = MemoryRemote::from_manifest(&Manifest::builtin());
        let config = ControllerConfig {
            check_period: Duration::from_secs(60),
            ..no_seed()
        };
        let mut r = rig(remote, config);

        r.controller.handle(RemoteEvent::Ready { op_mode: false }.into()).await;
        assert_eq!(r.frontend.try_recv().unwrap(), FrontendCommand::Show(DisplayState::Standby));
        assert!(r.controller.maintenance().is_some());

        let report = r.controller.wait_for_seed().await.unwrap();
        assert!(report.uploaded.is_empty());
        assert!(report.synced);

        assert_eq!(r.events.recv().await, Some(ControllerEvent::MaintenanceTick));
        assert!(r.controller.handle(ControllerEvent::MaintenanceTick).await);
        assert!(!r.controller.handle(ControllerEvent::Shutdown).await);
    }

    #[tokio::test]
    async fn test_reconnect_keeps_pending_reminder() {
        const INTERVAL: u64 = 1_000_000;
        let config = ControllerConfig {
            maintenance: MaintenanceSchedule { install_date: Utc::now().timestamp() - 10, interval_secs: INTERVAL },
            ..no_seed()
        };
        let mut r = rig(MemoryRemote::new(), config);

        r.controller.handle(RemoteEvent::Ready { op_mode: false }.into()).await;
        assert_eq!(r.controller.maintenance(), Some(MaintenanceState { notified: 0 }));

        // a whole interval goes by before the SDK reconnects
        r.controller.config.maintenance.install_date -= INTERVAL as i64;
        r.controller.handle(RemoteEvent::Ready { op_mode: false }.into()).await;
        assert_eq!(r.controller.maintenance(), Some(MaintenanceState { notified: 0 }));
        r.remote.take_calls();

        r.controller.handle(ControllerEvent::MaintenanceTick).await;
        r.controller.handle(ControllerEvent::MaintenanceTick).await;
        let emails: Vec<RemoteCall> = r
            .remote
            .take_calls()
            .into_iter()
            .filter(|c| matches!(c, RemoteCall::Email(_)))
            .collect();
        assert_eq!(emails, vec![RemoteCall::Email(maintenance::MAINTENANCE_MESSAGE.into())]);
        assert_eq!(r.controller.maintenance(), Some(MaintenanceState { notified: 1 }));
        if let Some(ticker) = r.controller.ticker.take() {
            ticker.abort();
        }
    }
}
