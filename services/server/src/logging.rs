//! Logging initialization from the environment.
//!
//! `LOG_ENABLED` turns logging off entirely when falsy. `LOG_LEVEL` is one of
//! DEBUG, INFO, WARNING, ERROR, CRITICAL (default INFO); `RUST_LOG` wins when
//! set. `LOG_FILEPATH` redirects output to a file.

use tracing_subscriber::EnvFilter;

pub fn init() {
    if !enabled_from_env() {
        return;
    }
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level_from_env()));
    match std::env::var("LOG_FILEPATH") {
        Ok(path) if !path.is_empty() => match std::fs::File::create(&path) {
            Ok(file) => tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(std::sync::Mutex::new(file))
                .init(),
            Err(err) => {
                eprintln!("could not open log file '{path}': {err}");
                tracing_subscriber::fmt().with_env_filter(filter).init();
            }
        },
        _ => tracing_subscriber::fmt().with_env_filter(filter).init(),
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
