use std::sync::Arc;

use chat_protocol::validators::valid_username;
use clap::{Arg, Command};
use client::console::ConsoleUi;
use client::ui::ClientUi;
use client::{ClientApplication, ClientNetworking};
use tracing::info;

/// Ask until the username is valid or the prompt is cancelled.
fn prompt_username(ui: &dyn ClientUi) -> Option<String> {
    loop {
        let username = ui.ask_for("Enter your username:", None)?;
        if valid_username(&username) {
            return Some(username);
        }
        ui.alert("Your username is invalid, it needs to be alphanumeric and 3 - 12 characters long.");
    }
}

#[tokio::main]
async fn main() {
    client::logging::init();

    let matches = Command::new("EchoSphere Client")
        .version(env!("CARGO_PKG_VERSION"))
        .about("A terminal chat client speaking the EchoSphere protocol")
        .arg(
            Arg::new("host")
                .help("The server host to connect to")
                .long("host")
                .default_value("localhost"),
        )
        .arg(
            Arg::new("port")
                .help("The server port to connect to")
                .short('p')
                .long("port")
                .value_parser(clap::value_parser!(u16))
                .default_value("12300"),
        )
        .arg(
            Arg::new("username")
                .help("The display name to log in with (prompted when omitted)")
                .short('u')
                .long("username"),
        )
        .arg(
            Arg::new("password")
                .help("The server password, when the server requires one")
                .long("password"),
        )
        .get_matches();

    let host = matches
        .get_one::<String>("host")
        .expect("host has a default")
        .clone();
    let port = *matches.get_one::<u16>("port").expect("port has a default");
    let password = matches.get_one::<String>("password").cloned();

    let ui = ConsoleUi::new();

    let username = match matches.get_one::<String>("username").cloned() {
        Some(username) if valid_username(&username) => username,
        Some(username) => {
            eprintln!("FATAL: invalid username '{username}': must be alphanumeric, 3 - 12 characters");
            std::process::exit(1);
        }
        None => {
            // Prompting blocks on stdin; keep it off the runtime workers.
            let prompt_ui = Arc::clone(&ui);
            match tokio::task::spawn_blocking(move || prompt_username(&*prompt_ui))
                .await
                .expect("prompt task")
            {
                Some(username) => username,
                None => {
                    println!("Goodbye.");
                    return;
                }
            }
        }
    };

    info!(version = env!("CARGO_PKG_VERSION"), "client starting");

    let networking = ClientNetworking::new();
    let app = ClientApplication::new(ui.clone(), Arc::clone(&networking));

    ui.draw();
    match app.run(&host, port, &username, password.as_deref()).await {
        Ok(()) => println!("Goodbye."),
        // The application has already alerted through the UI.
        Err(_) => std::process::exit(1),
    }
}
