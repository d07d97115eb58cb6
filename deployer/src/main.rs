//! machdeploy - Entry Point
//!
//! Rolls a release out over an app's machines.

use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use machdeploy::app::options::{AppOptions, DeployOptions};
use machdeploy::app::run::run;
use machdeploy::filesys::File;
use machdeploy::logs::{init_logging, LogOptions};
use machdeploy::models::AppConfig;
use machdeploy::storage::Settings;
use machdeploy::utils::version_info;

use tracing::{error, info};

/// Command line arguments in `--key=value` form; `--env` may repeat
struct CliArgs {
    values: HashMap<String, String>,
    env: Vec<String>,
}

fn parse_args(args: impl Iterator<Item = String>) -> CliArgs {
    let mut values = HashMap::new();
    let mut env = Vec::new();

    for arg in args {
        if let Some((key, value)) = arg.split_once('=') {
            // Handle --key=value format
            let clean_key = key.trim_start_matches('-');
            if clean_key == "env" {
                env.push(value.to_string());
            } else {
                values.insert(clean_key.to_string(), value.to_string());
            }
        } else if arg.starts_with("--") {
            // Handle standalone flags like --version
            let clean_key = arg.trim_start_matches('-');
            values.insert(clean_key.to_string(), "true".to_string());
        }
    }

    CliArgs { values, env }
}

/// Seconds, with an optional `s` or `m` suffix
fn parse_duration(value: &str) -> Option<Duration> {
    let value = value.trim();
    if let Some(minutes) = value.strip_suffix('m') {
        return minutes.parse().ok().map(|m: u64| Duration::from_secs(m * 60));
    }
    value
        .strip_suffix('s')
        .unwrap_or(value)
        .parse()
        .ok()
        .map(Duration::from_secs)
}

fn flag(cli: &CliArgs, key: &str) -> bool {
    cli.values.get(key).is_some_and(|v| v == "true")
}

fn timeout_flag(cli: &CliArgs, key: &str, fallback: Duration) -> Result<Duration, String> {
    match cli.values.get(key) {
        Some(value) => parse_duration(value).ok_or_else(|| format!("invalid --{}: {}", key, value)),
        None => Ok(fallback),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = parse_args(env::args().skip(1));

    // Print version and exit
    let version = version_info();
    if cli.values.contains_key("version") {
        match serde_json::to_string_pretty(&version) {
            Ok(json) => println!("{}", json),
            Err(_) => println!("{}", version.version),
        }
        return ExitCode::SUCCESS;
    }

    let defaults = AppOptions::default();
    let settings_path = cli
        .values
        .get("settings")
        .map(PathBuf::from)
        .unwrap_or(defaults.settings_path);
    let config_path = cli
        .values
        .get("config")
        .map(PathBuf::from)
        .unwrap_or(defaults.config_path);

    // Retrieve the settings file
    let settings = match Settings::load(&File::new(&settings_path)).await {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Unable to read settings file: {e}");
            return ExitCode::FAILURE;
        }
    };

    // Initialize logging
    let log_options = LogOptions {
        log_level: settings.log_level.clone(),
        log_dir: settings.log_dir.clone(),
        json_format: settings.log_json,
        ..Default::default()
    };
    let _log_guard = match init_logging(log_options) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {e}");
            None
        }
    };

    let app_config = match File::new(&config_path).read_json::<AppConfig>().await {
        Ok(config) => config,
        Err(e) => {
            error!("Unable to read app configuration {}: {}", config_path.display(), e);
            return ExitCode::FAILURE;
        }
    };

    let timeouts = timeout_flag(&cli, "wait-timeout", settings.wait_timeout()).and_then(|wait| {
        timeout_flag(&cli, "lease-timeout", settings.lease_timeout()).map(|lease| (wait, lease))
    });
    let (wait_timeout, lease_timeout) = match timeouts {
        Ok(timeouts) => timeouts,
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    let options = DeployOptions {
        image: cli.values.get("image").cloned(),
        strategy: cli.values.get("strategy").cloned(),
        env_from_flags: cli.env.clone(),
        primary_region: cli.values.get("region").cloned(),
        skip_health_checks: flag(&cli, "skip-health-checks"),
        restart_only: flag(&cli, "restart-only"),
        wait_timeout,
        lease_timeout,
    };

    info!(
        "Deploying app {} with machdeploy {} ({})",
        app_config.app_name, version.version, version.git_hash
    );
    match run(&settings, options, app_config, await_shutdown_signal()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Deployment failed: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn await_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let (mut sigterm, mut sigint) =
            match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                (Ok(sigterm), Ok(sigint)) => (sigterm, sigint),
                _ => {
                    error!("Unable to install signal handlers, falling back to Ctrl+C");
                    let _ = tokio::signal::ctrl_c().await;
                    return;
                }
            };

        tokio::select! {
            _ = sigterm.recv() => {
                info!("SIGTERM received, shutting down...");
            }
            _ = sigint.recv() => {
                info!("SIGINT received, shutting down...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl+C received, shutting down...");
        }
    }
}
