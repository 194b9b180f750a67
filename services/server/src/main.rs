use std::path::PathBuf;

use clap::{Arg, Command};
use server::{CommandRegistry, ServerApp, ServerNetworking};
use tracing::info;

/// The pong corpus ships next to the binary; fall back to the working
/// directory for `cargo run`.
fn pong_corpus_path() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join("pong_messages.txt")))
        .filter(|path| path.exists())
        .unwrap_or_else(|| PathBuf::from("pong_messages.txt"))
}

#[tokio::main]
async fn main() {
    server::logging::init();

    let matches = Command::new("EchoSphere Server")
        .version(env!("CARGO_PKG_VERSION"))
        .about("A multi-user chat server speaking the EchoSphere protocol")
        .arg(
            Arg::new("port")
                .help("The port number to listen on")
                .short('p')
                .long("port")
                .value_parser(clap::value_parser!(u16))
                .default_value("12300"),
        )
        .arg(
            Arg::new("password")
                .help("The password clients must supply when logging in")
                .long("password"),
        )
        .get_matches();

    let port = *matches.get_one::<u16>("port").expect("port has a default");
    let password = matches.get_one::<String>("password").cloned();

    info!(version = env!("CARGO_PKG_VERSION"), port, "server starting");

    let commands = CommandRegistry::builtin(pong_corpus_path());
    let networking = ServerNetworking::new();
    let app = ServerApp::new(commands);
    app.attach(&networking);

    if let Err(err) = networking.serve("localhost", port, password).await {
        eprintln!("FATAL: {err}");
        std::process::exit(1);
    }
}
