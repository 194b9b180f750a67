//! Logging initialization from the environment.
//!
//! Same contract as the server's: `LOG_ENABLED`, `LOG_LEVEL`, `LOG_FILEPATH`
//! (`RUST_LOG` wins when set). The one difference is the default sink: the
//! console belongs to the UI, so logs go to `client.log` unless
//! `LOG_FILEPATH` says otherwise.

use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILE: &str = "client.log";

pub fn init() {
    if !enabled_from_env() {
        return;
    }
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level_from_env()));
    let path = match std::env::var("LOG_FILEPATH") {
        Ok(path) if !path.is_empty() => path,
        _ => DEFAULT_LOG_FILE.to_owned(),
    };
    match std::fs::File::create(&path) {
        Ok(file) => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_ansi(false)
            .with_writer(std::sync::Mutex::new(file))
            .init(),
        Err(err) => {
            eprintln!("could not open log file '{path}': {err}");
        }
    }
}

fn enabled_from_env() -> bool {
    match std::env::var("LOG_ENABLED") {
        Ok(value) => !matches!(
            value.to_ascii_lowercase().as_str(),
            "0" | "false" | "no" | "off"
        ),
        Err(_) => true,
    }
}

fn level_from_env() -> &'static str {
    match std::env::var("LOG_LEVEL")
        .unwrap_or_default()
        .to_ascii_uppercase()
        .as_str()
    {
        "DEBUG" => "debug",
        "WARNING" => "warn",
        "ERROR" | "CRITICAL" => "error",
        _ => "info",
    }
}
