/*
 *  main.rs
 *
 *  SignPlay - exhibit display controller
 *  (c) 2020-26 Stuart Hunter
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

use env_logger::Env;
use log::{debug, error, info, warn};
use std::sync::Arc;
use tokio::io::BufReader;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use tokio::signal::unix::{SignalKind, signal};

use signplay::config::{self, RendererKind};
use signplay::frontend::{self, FrontendLink};
use signplay::remote::{BridgeClient, MemoryRemote, PollerCmd, RemoteClient, RemoteEvent, spawn_event_poller};
use signplay::renderer::{self, Renderer};
use signplay::{Controller, ControllerEvent, Manifest};

include!(concat!(env!("OUT_DIR"), "/build_info.rs"));

const EVENT_QUEUE: usize = 64;

/// Asynchronously waits for a SIGINT, SIGTERM, or SIGHUP signal.
async fn signal_handler() -> Result<(), Box<dyn std::error::Error>> {
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sighup = signal(SignalKind::hangup())?;

    tokio::select! {
        _ = sigint.recv() => {
            info!("SIGINT received. Initiating graceful shutdown.");
        }
        _ = sigterm.recv() => {
            info!("SIGTERM received. Initiating graceful shutdown.");
        }
        _ = sighup.recv() => {
            info!("SIGHUP received. Initiating graceful shutdown.");
        }
    }
    Ok(())
}

/// Starts the configured renderer on stdin/stdout.
fn spawn_renderer(
    cfg: &config::Config,
    rx: mpsc::UnboundedReceiver<signplay::FrontendCommand>,
    evt_tx: mpsc::Sender<ControllerEvent>,
) -> JoinHandle<std::io::Result<()>> {
    match cfg.renderer() {
        RendererKind::Console => {
            let renderer = Renderer::new(cfg.content_dir());
            let report_hits = cfg.report_hits();
            tokio::spawn(renderer::run_console(
                renderer,
                rx,
                BufReader::new(tokio::io::stdin()),
                tokio::io::stdout(),
                evt_tx,
                report_hits,
            ))
        }
        RendererKind::JsonLines => {
            // logs stay on stderr, stdout belongs to the web view
            tokio::spawn(async move {
                if let Err(e) = frontend::read_json_lines(BufReader::new(tokio::io::stdin()), evt_tx).await {
                    warn!("frontend reader stopped: {}", e);
                }
            });
            tokio::spawn(frontend::forward_json_lines(rx, tokio::io::stdout()))
        }
    }
}

#[tokio::main] // Requires the `tokio` runtime with `macros` and `rt-multi-thread` features
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let (cfg, cli) = config::load()?;

    env_logger::Builder::from_env(Env::default().default_filter_or(cfg.log_level.as_deref().unwrap_or("info")))
        .format_timestamp_secs()
        .init();

    info!("{} exhibit display controller", env!("CARGO_PKG_NAME"));
    info!("v.{} built {} for {}", env!("CARGO_PKG_VERSION"), BUILD_DATE, BUILD_TARGET);

    let manifest = match cfg.manifest_path.as_ref() {
        Some(path) => {
            info!("Loading manifest {}", path.display());
            Manifest::load(path)?
        }
        None => {
            let builtin = Manifest::builtin();
            builtin.validate()?;
            builtin
        }
    };

    if let Some(path) = cli.write_manifest.as_ref() {
        manifest.write(path)?;
        info!("Manifest written to {}", path.display());
        return Ok(());
    }
    let manifest = Arc::new(manifest);

    let (evt_tx, evt_rx) = mpsc::channel::<ControllerEvent>(EVENT_QUEUE);
    let (link, frontend_rx) = FrontendLink::channel();

    let mut poller = None;
    let remote: Arc<dyn RemoteClient> = if cfg.is_offline() {
        info!("Offline: using the in-process remote");
        let memory = MemoryRemote::from_manifest(&manifest);
        let echo_tx = evt_tx.clone();
        memory.set_echo(move |evt| {
            if echo_tx.try_send(ControllerEvent::from(evt)).is_err() {
                warn!("event queue full, setting echo dropped");
            }
        });
        // there is no cloud to say hello
        evt_tx.send(RemoteEvent::Ready { op_mode: true }.into()).await?;
        Arc::new(memory)
    } else {
        let bridge_cfg = cfg.bridge_config();
        info!("Using SDK bridge at {}:{} for exhibit {}", bridge_cfg.host, bridge_cfg.port, bridge_cfg.exhibit_id);
        let client = Arc::new(BridgeClient::new(&bridge_cfg)?);
        poller = Some(spawn_event_poller(Arc::clone(&client), bridge_cfg.poll, evt_tx.clone()));
        client
    };

    let frontend_task = spawn_renderer(&cfg, frontend_rx, evt_tx.clone());

    let shutdown_tx = evt_tx.clone();
    tokio::spawn(async move {
        if let Err(e) = signal_handler().await {
            error!("Signal handler failed: {}", e);
        }
        let _ = shutdown_tx.send(ControllerEvent::Shutdown).await;
    });

    let controller = Controller::new(remote, link, manifest, cfg.controller_config(), evt_tx);
    controller.run(evt_rx).await;

    if let Some(poller) = poller {
        let _ = poller.send(PollerCmd::Shutdown).await;
    }
    frontend_task.abort();
    debug!("renderer stopped");

    info!("Shutdown complete");
    Ok(())
}
