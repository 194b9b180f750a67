//! Plain terminal UI: stdin lines in, stdout lines out.

use std::io::{BufRead, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chat_protocol::events::Listeners;
use tracing::debug;

use crate::ui::ClientUi;

pub struct ConsoleUi {
    submissions: Arc<Listeners<String>>,
    closed: Arc<Listeners<()>>,
    started: AtomicBool,
}

impl ConsoleUi {
    pub fn new() -> Arc<Self> {
        Arc::new(ConsoleUi {
            submissions: Arc::new(Listeners::new()),
            closed: Arc::new(Listeners::new()),
            started: AtomicBool::new(false),
        })
    }
}

impl ClientUi for ConsoleUi {
    fn alert(&self, text: &str) {
        eprintln!("! {text}");
    }

    fn ask_for(&self, prompt: &str, default: Option<&str>) -> Option<String> {
        match default {
            Some(default) => print!("{prompt} [{default}] "),
            None => print!("{prompt} "),
        }
        let _ = std::io::stdout().flush();

        let mut line = String::new();
        if std::io::stdin().read_line(&mut line).unwrap_or(0) == 0 {
            return None;
        }
        let line = line.trim();
        if line.is_empty() {
            default.map(ToOwned::to_owned)
        } else {
            Some(line.to_owned())
        }
    }

    fn display_text(&self, text: &str) {
        println!("{text}");
    }

    fn draw(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }
        // Stdin has no async story worth having here; a plain thread feeding
        // the submission listeners is enough. It ends with the process.
        let submissions = Arc::clone(&self.submissions);
        let closed = Arc::clone(&self.closed);
        std::thread::spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                let Ok(line) = line else { break };
                let line = line.trim().to_owned();
                if line.is_empty() {
                    continue;
                }
                submissions.emit(&line);
            }
            debug!("stdin closed, input thread ending");
            closed.emit(&());
        });
    }

    fn exit(&self, err: Option<&str>) {
        if let Some(err) = err {
            eprintln!("! {err}");
        }
    }

    fn submissions(&self) -> &Listeners<String> {
        &self.submissions
    }

    fn closed(&self) -> &Listeners<()> {
        &self.closed
    }
}
