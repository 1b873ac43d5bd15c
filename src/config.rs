/*
 *  config.rs
 *
 *  SignPlay - exhibit display controller
 *  (c) 2020-26 Stuart Hunter
 *
 *  Configuration - defaults, YAML file, environment, then command line
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

use clap::{ArgAction, Parser, ValueEnum, ValueHint};
use dirs_next::home_dir;
use serde::{Deserialize, Serialize};
use std::{fs, path::{Path, PathBuf}, time::Duration};
use thiserror::Error;

use crate::controller::{ControllerConfig, IndicatorConfig};
use crate::maintenance::{self, MaintenanceSchedule};
use crate::remote::BridgeConfig;

pub const ENV_TOKEN: &str = "EXHIBIT_TOKEN";
pub const ENV_EXHIBIT_ID: &str = "EXHIBIT_ID";
pub const ENV_BRIDGE_PORT: &str = "EXHIBIT_GBTT_PORT";
pub const ENV_INSTALL_DATE: &str = "EXHIBIT_INSTALL_DATE";
pub const ENV_MAINTENANCE_INTERVAL: &str = "EXHIBIT_MAINTENANCE_INTERVAL";

const DEFAULT_BRIDGE_HOST: &str = "127.0.0.1";
const DEFAULT_BRIDGE_PORT: u16 = 3000;
const DEFAULT_POLL_MS: u64 = 250;
const DEFAULT_RELOAD_DELAY_MS: u64 = 100;
const DEFAULT_PULSE_MS: u64 = 250;

/// Error type for config loading/validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Environment variable {name}: {message}")]
    Env { name: &'static str, message: String },
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Top-level app configuration. Every field is optional so the layers can
/// be merged, the accessors below supply the defaults.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    pub log_level: Option<String>, // "error" ... "trace"
    /// Run against the in-process remote, no sidecar needed
    pub offline: Option<bool>,
    /// Manifest JSON, the built-in one when unset
    pub manifest_path: Option<PathBuf>,
    pub exhibit: Option<ExhibitConfig>,
    pub bridge: Option<BridgeSection>,
    pub maintenance: Option<MaintenanceConfig>,
    pub content: Option<ContentConfig>,
    pub frontend: Option<FrontendConfig>,
    pub indicator: Option<IndicatorSection>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ExhibitConfig {
    pub id: Option<String>,
    pub token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct BridgeSection {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub poll_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MaintenanceConfig {
    /// Epoch seconds
    pub install_date: Option<i64>,
    pub interval_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ContentConfig {
    /// Images pushed to the cloud on startup
    pub seed_dir: Option<PathBuf>,
    /// Where the renderer finds synced images
    pub content_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum RendererKind {
    Console,
    JsonLines,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FrontendConfig {
    pub renderer: Option<RendererKind>,
    pub reload_delay_ms: Option<u64>,
    /// Console renderer reports every hit, not only the final count
    pub report_hits: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct IndicatorSection {
    pub device_id: Option<String>,
    pub property: Option<String>,
    pub pulse_ms: Option<u64>,
}

/// CLI overrides. All fields are Options so we can layer them over YAML.
#[derive(Debug, Parser, Clone, Default)]
#[command(name = "signplay", about = "SignPlay exhibit display controller", version)]
pub struct Cli {
    /// Path to a YAML config file (overrides search)
    #[arg(long, value_hint = ValueHint::FilePath)]
    pub config: Option<PathBuf>,
    #[arg(long)]
    pub log_level: Option<String>,
    /// Debug logging
    #[arg(short = 'v', long, action = ArgAction::SetTrue)]
    pub debug: bool,
    /// Use the in-process remote instead of the SDK bridge
    #[arg(long, action = ArgAction::SetTrue)]
    pub offline: bool,
    #[arg(long, value_hint = ValueHint::FilePath)]
    pub manifest: Option<PathBuf>,
    #[arg(long, value_hint = ValueHint::DirPath)]
    pub seed_dir: Option<PathBuf>,
    #[arg(long, value_enum)]
    pub renderer: Option<RendererKind>,
    #[arg(long)]
    pub bridge_host: Option<String>,
    #[arg(long)]
    pub bridge_port: Option<u16>,
    /// write the manifest JSON to this path and exit
    #[arg(long, value_hint = ValueHint::FilePath)]
    pub write_manifest: Option<PathBuf>,
    /// dump fully merged config (after overrides) and exit
    #[arg(long, action = ArgAction::SetTrue)]
    pub dump_config: bool,
}

/// Public entry point: parse CLI, read YAML, merge, validate.
pub fn load() -> Result<(Config, Cli), ConfigError> {
    let cli = Cli::parse();
    let cfg = resolve(&cli, |name| std::env::var(name).ok())?;

    if cli.dump_config {
        // Pretty YAML of effective config (nice for debugging)
        let s = serde_yaml::to_string(&cfg)?;
        println!("{s}");
        std::process::exit(0);
    }

    Ok((cfg, cli))
}

/// Builds the effective config from every layer, lowest first.
pub fn resolve<F>(cli: &Cli, env: F) -> Result<Config, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    // 1) defaults (from `Default` impl)
    let mut cfg = Config::default();

    // 2) YAML file (explicit path or search)
    if let Some(p) = cli.config.as_ref() {
        if p.exists() {
            let y = read_yaml(p)?;
            merge(&mut cfg, y);
        } else {
            return Err(ConfigError::Validation(format!(
                "Config file not found: {}",
                p.display()
            )));
        }
    } else if let Some(p) = find_config_file() {
        let y = read_yaml(&p)?;
        merge(&mut cfg, y);
    }

    // 3) environment
    apply_env(&mut cfg, env)?;

    // 4) CLI overrides (highest precedence)
    apply_cli_overrides(&mut cfg, cli);

    // 5) Validate
    validate(&cfg)?;
    Ok(cfg)
}

/// Try common locations in order (first hit wins).
fn find_config_file() -> Option<PathBuf> {
    // XDG-style: ~/.config/signplay/config.yaml
    if let Some(home) = home_dir() {
        let p = home.join(".config/signplay/config.yaml");
        if p.exists() { return Some(p) }
        let p = home.join(".config/signplay.yaml");
        if p.exists() { return Some(p) }
    }
    // project local
    for candidate in &["signplay.yaml", "config/signplay.yaml"] {
        let p = PathBuf::from(candidate);
        if p.exists() { return Some(p) }
    }
    None
}

pub fn read_yaml(path: &Path) -> Result<Config, ConfigError> {
    let s = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&s)?;
    Ok(cfg)
}

/// Merge `src` over `dst`, Option-by-Option.
fn merge(dst: &mut Config, src: Config) {
    if src.log_level.is_some()      { dst.log_level = src.log_level; }
    if src.offline.is_some()        { dst.offline = src.offline; }
    if src.manifest_path.is_some()  { dst.manifest_path = src.manifest_path; }

    if let Some(s) = src.exhibit {
        let d = dst.exhibit.get_or_insert_with(Default::default);
        if s.id.is_some()     { d.id = s.id; }
        if s.token.is_some()  { d.token = s.token; }
    }
    if let Some(s) = src.bridge {
        let d = dst.bridge.get_or_insert_with(Default::default);
        if s.host.is_some()     { d.host = s.host; }
        if s.port.is_some()     { d.port = s.port; }
        if s.poll_ms.is_some()  { d.poll_ms = s.poll_ms; }
    }
    if let Some(s) = src.maintenance {
        let d = dst.maintenance.get_or_insert_with(Default::default);
        if s.install_date.is_some()   { d.install_date = s.install_date; }
        if s.interval_secs.is_some()  { d.interval_secs = s.interval_secs; }
    }
    if let Some(s) = src.content {
        let d = dst.content.get_or_insert_with(Default::default);
        if s.seed_dir.is_some()     { d.seed_dir = s.seed_dir; }
        if s.content_dir.is_some()  { d.content_dir = s.content_dir; }
    }
    if let Some(s) = src.frontend {
        let d = dst.frontend.get_or_insert_with(Default::default);
        if s.renderer.is_some()         { d.renderer = s.renderer; }
        if s.reload_delay_ms.is_some()  { d.reload_delay_ms = s.reload_delay_ms; }
        if s.report_hits.is_some()      { d.report_hits = s.report_hits; }
    }
    if let Some(s) = src.indicator {
        let d = dst.indicator.get_or_insert_with(Default::default);
        if s.device_id.is_some()  { d.device_id = s.device_id; }
        if s.property.is_some()   { d.property = s.property; }
        if s.pulse_ms.is_some()   { d.pulse_ms = s.pulse_ms; }
    }
}

fn parse_env<T: std::str::FromStr>(name: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::Env {
        name,
        message: format!("'{}' is not a valid number", value),
    })
}

/// The SDK deployment passes credentials and schedule in the environment.
fn apply_env<F>(cfg: &mut Config, env: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let var = |name: &str| env(name).filter(|v| !v.is_empty());

    if let Some(token) = var(ENV_TOKEN) {
        cfg.exhibit.get_or_insert_with(Default::default).token = Some(token);
    }
    if let Some(id) = var(ENV_EXHIBIT_ID) {
        cfg.exhibit.get_or_insert_with(Default::default).id = Some(id);
    }
    if let Some(port) = var(ENV_BRIDGE_PORT) {
        cfg.bridge.get_or_insert_with(Default::default).port = Some(parse_env(ENV_BRIDGE_PORT, &port)?);
    }
    if let Some(date) = var(ENV_INSTALL_DATE) {
        cfg.maintenance.get_or_insert_with(Default::default).install_date = Some(parse_env(ENV_INSTALL_DATE, &date)?);
    }
    if let Some(interval) = var(ENV_MAINTENANCE_INTERVAL) {
        cfg.maintenance.get_or_insert_with(Default::default).interval_secs =
            Some(parse_env(ENV_MAINTENANCE_INTERVAL, &interval)?);
    }
    Ok(())
}

fn apply_cli_overrides(cfg: &mut Config, cli: &Cli) {
    if cli.debug                     { cfg.log_level = Some("debug".to_string()); }
    if cli.log_level.is_some()       { cfg.log_level = cli.log_level.clone(); }
    // writing the manifest never talks to the cloud
    if cli.offline || cli.write_manifest.is_some() { cfg.offline = Some(true); }
    if cli.manifest.is_some()        { cfg.manifest_path = cli.manifest.clone(); }
    if cli.seed_dir.is_some() {
        cfg.content.get_or_insert_with(Default::default).seed_dir = cli.seed_dir.clone();
    }
    if cli.renderer.is_some() {
        cfg.frontend.get_or_insert_with(Default::default).renderer = cli.renderer;
    }
    if cli.bridge_host.is_some() {
        cfg.bridge.get_or_insert_with(Default::default).host = cli.bridge_host.clone();
    }
    if cli.bridge_port.is_some() {
        cfg.bridge.get_or_insert_with(Default::default).port = cli.bridge_port;
    }
}

/// Put any invariants here (required fields, ranges, etc.)
pub fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if let Some(level) = cfg.log_level.as_deref() {
        match level {
            "error" | "warn" | "info" | "debug" | "trace" => {}
            _ => return Err(ConfigError::Validation(format!("unknown log_level '{}'", level))),
        }
    }
    if let Some(bridge) = cfg.bridge.as_ref() {
        if bridge.port == Some(0) {
            return Err(ConfigError::Validation("bridge port must be > 0".into()));
        }
        if bridge.poll_ms == Some(0) {
            return Err(ConfigError::Validation("bridge poll_ms must be > 0".into()));
        }
    }
    if cfg.maintenance.as_ref().and_then(|m| m.interval_secs) == Some(0) {
        return Err(ConfigError::Validation("maintenance interval_secs must be > 0".into()));
    }
    if cfg.indicator.as_ref().and_then(|i| i.pulse_ms) == Some(0) {
        return Err(ConfigError::Validation("indicator pulse_ms must be > 0".into()));
    }
    if !cfg.is_offline() {
        let exhibit = cfg.exhibit.clone().unwrap_or_default();
        if exhibit.id.as_deref().unwrap_or("").is_empty() {
            return Err(ConfigError::Validation(format!("exhibit id missing, set {} or exhibit.id", ENV_EXHIBIT_ID)));
        }
        if exhibit.token.as_deref().unwrap_or("").is_empty() {
            return Err(ConfigError::Validation(format!("exhibit token missing, set {} or exhibit.token", ENV_TOKEN)));
        }
    }
    Ok(())
}

impl Config {
    pub fn is_offline(&self) -> bool {
        self.offline.unwrap_or(false)
    }

    pub fn renderer(&self) -> RendererKind {
        self.frontend.as_ref().and_then(|f| f.renderer).unwrap_or(RendererKind::Console)
    }

    pub fn report_hits(&self) -> bool {
        self.frontend.as_ref().and_then(|f| f.report_hits).unwrap_or(false)
    }

    pub fn content_dir(&self) -> PathBuf {
        self.content
            .as_ref()
            .and_then(|c| c.content_dir.clone())
            .unwrap_or_else(|| PathBuf::from("content"))
    }

    pub fn bridge_config(&self) -> BridgeConfig {
        let bridge = self.bridge.clone().unwrap_or_default();
        let exhibit = self.exhibit.clone().unwrap_or_default();
        BridgeConfig {
            host: bridge.host.unwrap_or_else(|| DEFAULT_BRIDGE_HOST.to_string()),
            port: bridge.port.unwrap_or(DEFAULT_BRIDGE_PORT),
            exhibit_id: exhibit.id.unwrap_or_default(),
            token: exhibit.token.unwrap_or_default(),
            poll: Duration::from_millis(bridge.poll_ms.unwrap_or(DEFAULT_POLL_MS)),
        }
    }

    pub fn controller_config(&self) -> ControllerConfig {
        let content = self.content.clone().unwrap_or_default();
        let frontend = self.frontend.clone().unwrap_or_default();
        let indicator = self.indicator.clone().unwrap_or_default();
        let maint = self.maintenance.clone().unwrap_or_default();
        let defaults = IndicatorConfig::default();

        ControllerConfig {
            seed_dir: content.seed_dir.unwrap_or_else(|| PathBuf::from("seed")),
            reload_delay: Duration::from_millis(frontend.reload_delay_ms.unwrap_or(DEFAULT_RELOAD_DELAY_MS)),
            indicator: IndicatorConfig {
                device_id: indicator.device_id.filter(|d| !d.is_empty()),
                property: indicator.property.unwrap_or(defaults.property),
                pulse: Duration::from_millis(indicator.pulse_ms.unwrap_or(DEFAULT_PULSE_MS)),
            },
            maintenance: MaintenanceSchedule {
                install_date: maint.install_date.unwrap_or(maintenance::DEFAULT_INSTALL_DATE),
                interval_secs: maint.interval_secs.unwrap_or(maintenance::DEFAULT_INTERVAL_SECS),
            },
            check_period: maintenance::CHECK_PERIOD,
        }
    }
}
