//! Mock debugger target for integration testing
//!
//! Prints every line of the script passed as its first argument, then
//! answers commands read from stdin, one per line. It stands in for
//! `lldb -- node <script>` so the harness can be tested without either.

use std::io::{BufRead, Write};
use std::time::Duration;

fn main() {
    let script = match std::env::args().nth(1) {
        Some(path) => path,
        None => {
            eprintln!("usage: mock_target <script>");
            std::process::exit(2);
        }
    };
    let content = match std::fs::read_to_string(&script) {
        Ok(content) => content,
        Err(e) => {
            eprintln!("mock_target: cannot read {}: {}", script, e);
            std::process::exit(2);
        }
    };

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    for line in content.lines() {
        emit(&mut out, line);
    }

    let stdin = std::io::stdin();
    for command in stdin.lock().lines() {
        let Ok(command) = command else {
            break;
        };
        if let Some(code) = handle(&mut out, command.trim()) {
            out.flush().ok();
            std::process::exit(code);
        }
    }
}

fn emit<W: Write>(out: &mut W, line: &str) {
    writeln!(out, "{}", line).ok();
    out.flush().ok();
}

/// Run one command; returns an exit code when the target should stop
fn handle<W: Write>(out: &mut W, command: &str) -> Option<i32> {
    let (verb, rest) = match command.split_once(' ') {
        Some((verb, rest)) => (verb, rest.trim()),
        None => (command, ""),
    };

    match verb {
        "" => {}
        "run" => {
            let pid = std::process::id();
            emit(out, &format!("Process {} launched", pid));
            emit(out, &format!("Process {} stopped", pid));
        }
        "ping" => emit(out, "pong"),
        "echo" => emit(out, rest),
        "err" => {
            eprintln!("{}", rest);
        }
        "burst" => {
            let n: usize = rest.parse().unwrap_or(0);
            for i in 1..=n {
                writeln!(out, "line {}", i).ok();
            }
            out.flush().ok();
        }
        "partial" => {
            write!(out, "{}", rest).ok();
            return Some(0);
        }
        "sleep" => {
            let ms: u64 = rest.parse().unwrap_or(0);
            std::thread::sleep(Duration::from_millis(ms));
        }
        "crash" => return Some(rest.parse().unwrap_or(1)),
        "ignore-term" => {
            #[cfg(unix)]
            unsafe {
                libc::signal(libc::SIGTERM, libc::SIG_IGN);
            }
            emit(out, "ignoring SIGTERM");
        }
        "v8" => match rest {
            "getactivehandles" => {
                emit(out, "Active handles");
                emit(out, " 0x000036eccf7c1b09:<Object: TCP>");
                emit(out, " 0x000036eccf7c2e61:<Object: Timer>");
            }
            "getactiverequests" => {
                emit(out, "Active requests");
                emit(out, " 0x000036eccf7c4a29:<Object: FSReqWrap>");
            }
            other => emit(out, &format!("error: unknown v8 command '{}'", other)),
        },
        "kill" | "quit" => return Some(0),
        other => emit(out, &format!("error: '{}' is not a valid command.", other)),
    }
    None
}
