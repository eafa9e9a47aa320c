//! Tests for monitor settings resolution
//!
//! Tests that manipulate MUXBOT_* environment variables are marked #[serial].

use muxbot_common::config::{RecordsConfig, SheetConfig, TomlConfig};
use muxbot_common::Error;
use muxbot_monitor::config::{
    Args, MonitorSettings, DRY_RUN_WEBHOOK_URL, ENV_RECORDS_BASE_ID, ENV_RECORDS_TABLE_ID,
    ENV_RECORDS_TOKEN, ENV_RELAY_TOKEN, ENV_SHEET_WEBHOOK_URL,
};
use serial_test::serial;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

const ENV_VARS: &[&str] = &[
    ENV_SHEET_WEBHOOK_URL,
    ENV_RELAY_TOKEN,
    ENV_RECORDS_BASE_ID,
    ENV_RECORDS_TABLE_ID,
    ENV_RECORDS_TOKEN,
    "MUXBOT_RECORDS_API_URL",
    "MUXBOT_RECORDS_ID_FIELD",
    "MUXBOT_ROOT_FOLDER",
    "MUXBOT_ROOT",
];

fn clear_env() {
    for var in ENV_VARS {
        env::remove_var(var);
    }
}

fn args_with_ids(ids: &[&str]) -> Args {
    Args {
        event_ids: ids.iter().map(|id| id.to_string()).collect(),
        root_folder: Some(PathBuf::from("/tmp/muxbot-test")),
        ..Args::default()
    }
}

fn toml_with_webhook() -> TomlConfig {
    TomlConfig {
        sheet: SheetConfig {
            webhook_url: Some("https://sheet.example/exec".to_string()),
            relay_token: None,
        },
        ..TomlConfig::default()
    }
}

#[test]
#[serial]
fn test_ids_come_from_dashboard_url_then_flags() {
    clear_env();
    let args = Args {
        dashboard_url: Some(
            "https://dash.example/live?filters[0]=video_id:abc&filters[1]=video_id:def".to_string(),
        ),
        event_ids: vec!["def".to_string(), " ghi ".to_string(), "".to_string()],
        ..args_with_ids(&[])
    };

    let settings = MonitorSettings::resolve(&args, &toml_with_webhook()).unwrap();

    assert_eq!(settings.event_ids, vec!["abc", "def", "ghi"]);
}

#[test]
#[serial]
fn test_no_ids_is_invalid_input() {
    clear_env();
    let result = MonitorSettings::resolve(&args_with_ids(&[]), &toml_with_webhook());

    assert!(matches!(result, Err(Error::InvalidInput(_))));
}

#[test]
#[serial]
fn test_missing_webhook_is_config_error() {
    clear_env();
    let result = MonitorSettings::resolve(&args_with_ids(&["evt-1"]), &TomlConfig::default());

    assert!(matches!(result, Err(Error::Config(_))));
}

#[test]
#[serial]
fn test_dry_run_uses_placeholder_webhook() {
    clear_env();
    let args = Args {
        dry_run: true,
        ..args_with_ids(&["evt-1"])
    };

    let settings = MonitorSettings::resolve(&args, &TomlConfig::default()).unwrap();

    assert!(settings.dry_run);
    assert_eq!(settings.webhook_url, DRY_RUN_WEBHOOK_URL);
}

#[test]
#[serial]
fn test_env_webhook_overrides_toml() {
    clear_env();
    env::set_var(ENV_SHEET_WEBHOOK_URL, "https://env.example/exec");
    env::set_var(ENV_RELAY_TOKEN, "secret");

    let settings = MonitorSettings::resolve(&args_with_ids(&["evt-1"]), &toml_with_webhook()).unwrap();

    assert_eq!(settings.webhook_url, "https://env.example/exec");
    assert_eq!(settings.relay_token.as_deref(), Some("secret"));
    clear_env();
}

#[test]
#[serial]
fn test_records_need_base_table_and_token() {
    clear_env();
    let mut toml = toml_with_webhook();
    toml.records = RecordsConfig {
        base_id: Some("app1".to_string()),
        table_id: Some("tbl1".to_string()),
        ..RecordsConfig::default()
    };

    let settings = MonitorSettings::resolve(&args_with_ids(&["evt-1"]), &toml).unwrap();
    assert!(settings.records.is_none());

    env::set_var(ENV_RECORDS_TOKEN, "pat-123");
    let settings = MonitorSettings::resolve(&args_with_ids(&["evt-1"]), &toml).unwrap();
    let records = settings.records.unwrap();
    assert_eq!(records.base_id, "app1");
    assert_eq!(records.table_id, "tbl1");
    assert_eq!(records.token, "pat-123");
    assert_eq!(records.api_url, "https://api.airtable.com");
    assert_eq!(records.id_field, "Live | Edit ID/Stream ID");
    clear_env();
}

#[test]
#[serial]
fn test_defaults_for_snapshot_port_and_interval() {
    clear_env();
    let settings = MonitorSettings::resolve(&args_with_ids(&["evt-1"]), &toml_with_webhook()).unwrap();

    assert_eq!(settings.snapshot, PathBuf::from("/tmp/muxbot-test/dashboard.txt"));
    assert_eq!(settings.port, 5741);
    assert_eq!(settings.poll_interval, Duration::from_millis(1000));
}

#[test]
#[serial]
fn test_interval_is_at_least_one_millisecond() {
    clear_env();
    let mut toml = toml_with_webhook();
    toml.poll_interval_ms = Some(250);
    toml.port = Some(6000);

    let settings = MonitorSettings::resolve(&args_with_ids(&["evt-1"]), &toml).unwrap();
    assert_eq!(settings.poll_interval, Duration::from_millis(250));
    assert_eq!(settings.port, 6000);

    let args = Args {
        interval_ms: Some(0),
        ..args_with_ids(&["evt-1"])
    };
    let settings = MonitorSettings::resolve(&args, &toml).unwrap();
    assert_eq!(settings.poll_interval, Duration::from_millis(1));
}
