//! Command-line arguments and resolved monitor settings
//!
//! Every setting resolves CLI → environment → TOML → compiled default.

use crate::records::AirtableSettings;
use crate::session::extract_event_ids_from_url;
use clap::Parser;
use muxbot_common::config::{resolve_setting, CompiledDefaults, RootFolderResolver, TomlConfig};
use muxbot_common::{Error, Result};
use std::path::PathBuf;
use std::time::Duration;

/// Module name used for the TOML file and root folder logs
pub const MODULE_NAME: &str = "muxbot-monitor";

pub const ENV_SHEET_WEBHOOK_URL: &str = "MUXBOT_SHEET_WEBHOOK_URL";
pub const ENV_RELAY_TOKEN: &str = "MUXBOT_RELAY_TOKEN";
pub const ENV_RECORDS_API_URL: &str = "MUXBOT_RECORDS_API_URL";
pub const ENV_RECORDS_BASE_ID: &str = "MUXBOT_RECORDS_BASE_ID";
pub const ENV_RECORDS_TABLE_ID: &str = "MUXBOT_RECORDS_TABLE_ID";
pub const ENV_RECORDS_TOKEN: &str = "MUXBOT_RECORDS_TOKEN";
pub const ENV_RECORDS_ID_FIELD: &str = "MUXBOT_RECORDS_ID_FIELD";

/// Webhook URL used by the in-memory sheet in dry runs
pub const DRY_RUN_WEBHOOK_URL: &str = "http://dry-run.invalid/exec";

/// Page snapshot file name inside the root folder
pub const DEFAULT_SNAPSHOT_FILE: &str = "dashboard.txt";

/// Command-line arguments for muxbot-monitor
#[derive(Parser, Debug, Clone, Default)]
#[command(name = "muxbot-monitor")]
#[command(about = "Peak monitor for live viewer dashboards")]
#[command(version)]
pub struct Args {
    /// Dashboard URL; event ids are read from its video_id filters
    #[arg(long)]
    pub dashboard_url: Option<String>,

    /// Event id to monitor (repeatable)
    #[arg(long = "event-id")]
    pub event_ids: Vec<String>,

    /// File holding the captured dashboard page text
    #[arg(long)]
    pub snapshot: Option<PathBuf>,

    /// TOML config file (default: <config_dir>/muxbot/muxbot-monitor.toml)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Root folder holding muxbot.db
    #[arg(long)]
    pub root_folder: Option<PathBuf>,

    /// Status API port
    #[arg(long, env = "MUXBOT_MONITOR_PORT")]
    pub port: Option<u16>,

    /// Sampling interval in milliseconds
    #[arg(long, env = "MUXBOT_INTERVAL_MS")]
    pub interval_ms: Option<u64>,

    /// Write to an in-memory sheet instead of the webhook
    #[arg(long)]
    pub dry_run: bool,
}

/// Fully resolved settings for one monitor process
#[derive(Debug, Clone)]
pub struct MonitorSettings {
    pub root_folder: PathBuf,
    pub event_ids: Vec<String>,
    pub snapshot: PathBuf,
    pub port: u16,
    pub poll_interval: Duration,
    pub dry_run: bool,
    pub webhook_url: String,
    pub relay_token: Option<String>,
    /// None when the record table is not fully configured
    pub records: Option<AirtableSettings>,
}

impl MonitorSettings {
    pub fn resolve(args: &Args, toml: &TomlConfig) -> Result<Self> {
        let defaults = CompiledDefaults::for_current_platform();

        let mut event_ids: Vec<String> = args
            .dashboard_url
            .as_deref()
            .map(extract_event_ids_from_url)
            .unwrap_or_default();
        for id in &args.event_ids {
            let id = id.trim();
            if !id.is_empty() && !event_ids.iter().any(|known| known == id) {
                event_ids.push(id.to_string());
            }
        }
        if event_ids.is_empty() {
            return Err(Error::InvalidInput(
                "no event ids: pass --event-id or a --dashboard-url with video_id filters".to_string(),
            ));
        }

        let root_folder = RootFolderResolver::new(MODULE_NAME)
            .with_cli_arg(args.root_folder.clone())
            .with_toml(toml)
            .resolve();

        let webhook_url = match resolve_setting(None, ENV_SHEET_WEBHOOK_URL, toml.sheet.webhook_url.as_deref()) {
            Some(url) => url,
            None if args.dry_run => DRY_RUN_WEBHOOK_URL.to_string(),
            None => {
                return Err(Error::Config(format!(
                    "sheet webhook URL not configured (set {} or sheet.webhook_url)",
                    ENV_SHEET_WEBHOOK_URL
                )))
            }
        };

        let records = resolve_records(toml, &defaults);

        Ok(Self {
            snapshot: args
                .snapshot
                .clone()
                .unwrap_or_else(|| root_folder.join(DEFAULT_SNAPSHOT_FILE)),
            root_folder,
            event_ids,
            port: args.port.or(toml.port).unwrap_or(defaults.port),
            poll_interval: Duration::from_millis(
                args.interval_ms
                    .or(toml.poll_interval_ms)
                    .unwrap_or(defaults.poll_interval_ms)
                    .max(1),
            ),
            dry_run: args.dry_run,
            webhook_url,
            relay_token: resolve_setting(None, ENV_RELAY_TOKEN, toml.sheet.relay_token.as_deref()),
            records,
        })
    }
}

fn resolve_records(toml: &TomlConfig, defaults: &CompiledDefaults) -> Option<AirtableSettings> {
    let section = &toml.records;
    let base_id = resolve_setting(None, ENV_RECORDS_BASE_ID, section.base_id.as_deref())?;
    let table_id = resolve_setting(None, ENV_RECORDS_TABLE_ID, section.table_id.as_deref())?;
    let token = resolve_setting(None, ENV_RECORDS_TOKEN, section.token.as_deref())?;

    Some(AirtableSettings {
        api_url: resolve_setting(None, ENV_RECORDS_API_URL, section.api_url.as_deref())
            .unwrap_or_else(|| defaults.records_api_url.clone()),
        base_id,
        table_id,
        token,
        id_field: resolve_setting(None, ENV_RECORDS_ID_FIELD, section.id_field.as_deref())
            .unwrap_or_else(|| defaults.records_id_field.clone()),
    })
}
