mod builtins;
mod executor;
mod job_control;
mod jobs;
mod parser;
mod reader;
mod signals;

use std::io::{self, Write};

use builtins::Dispatch;
use jobs::JobTable;

fn main() {
    signals::install().expect("Failed to install signal handlers");

    let mut table = JobTable::new();
    let mut stdout = io::stdout();
    let mut stderr = io::stderr();

    loop {
        // Report any Stopped/Done transitions before showing the prompt.
        signals::drain(&mut table);

        print!("gsh> ");
        if stdout.flush().is_err() {
            break;
        }

        let line = match reader::read_line(|| signals::drain(&mut table)) {
            Ok(Some(line)) => line,
            Ok(None) => {
                println!("exit");
                break;
            }
            Err(error) => {
                eprintln!("gsh: read: {error}");
                break;
            }
        };

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let parsed = match parser::parse(trimmed) {
            Ok(parsed) => parsed,
            Err(message) => {
                println!("error: {message}");
                continue;
            }
        };

        match builtins::dispatch(&parsed, &mut table, &mut stdout, &mut stderr) {
            Dispatch::Handled(_) => {}
            Dispatch::NotBuiltin => {
                executor::run_pipeline(&parsed, &mut table);
            }
        }
    }
}
