//! Launchpad - Entry Point
//!
//! Deployment engine of a self-hosted PaaS. Builds applications from git
//! and rolls them out to remote Docker hosts.

use std::collections::HashMap;
use std::env;
use std::process::ExitCode;

use launchpad::app::options::AppOptions;
use launchpad::app::run::run;
use launchpad::filesys::file::File;
use launchpad::logs::{init_logging, LogOptions};
use launchpad::storage::layout::StorageLayout;
use launchpad::storage::settings::Settings;
use launchpad::utils::{run_diagnostic, version_info};

use tracing::{error, info};

#[tokio::main]
async fn main() -> ExitCode {
    // Parse command line arguments
    let args: Vec<String> = env::args().collect();
    let mut cli_args: HashMap<String, String> = HashMap::new();

    for arg in args.iter().skip(1) {
        if let Some((key, value)) = arg.split_once('=') {
            // Handle --key=value format
            let clean_key = key.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), value.to_string());
        } else if arg.starts_with("--") {
            // Handle standalone flags like --version
            let clean_key = arg.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), "true".to_string());
        }
    }

    // Print version and exit
    let version = version_info();
    if cli_args.contains_key("version") {
        match serde_json::to_string_pretty(&version) {
            Ok(json) => println!("{json}"),
            Err(_) => println!("{}", version.version),
        }
        return ExitCode::SUCCESS;
    }

    let layout = match cli_args.get("dir") {
        Some(dir) => StorageLayout::new(dir),
        None => StorageLayout::default(),
    };

    // Run diagnostics
    if cli_args.contains_key("diagnostic") || cli_args.contains_key("diag") {
        return if run_diagnostic(&layout).await {
            ExitCode::SUCCESS
        } else {
            ExitCode::FAILURE
        };
    }

    // Retrieve the settings file, defaults when there is none
    let settings_file = match cli_args.get("settings") {
        Some(path) => File::new(path),
        None => layout.settings_file(),
    };
    let settings = if settings_file.exists().await {
        match settings_file.read_json::<Settings>().await {
            Ok(settings) => settings,
            Err(e) => {
                eprintln!("Unable to read settings file: {e}");
                return ExitCode::FAILURE;
            }
        }
    } else {
        Settings::default()
    };

    // Initialize logging
    let log_options = LogOptions {
        log_level: settings.log_level,
        json_format: settings.log_json,
        log_dir: settings
            .log_to_file
            .then(|| layout.logs_dir().path().to_path_buf()),
        ..Default::default()
    };
    let _log_guard = match init_logging(log_options) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {e}");
            None
        }
    };

    // Run the engine
    let options = AppOptions::from_settings(layout, &settings);
    info!(version = %version.version, "Running Launchpad with options: {:?}", options);
    match run(options, await_shutdown_signal()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Failed to run the engine: {e}");
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
                    error!("Failed to install signal handlers, waiting for Ctrl+C");
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
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {e}");
        }
        info!("Ctrl+C received, shutting down...");
    }
}
