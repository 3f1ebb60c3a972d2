//! victor-ctl — command-line interface for victord's control API.

use anyhow::{Context, Result};

mod cmd;

const DEFAULT_PORT: u16 = 7901;

fn print_usage() {
    println!("Usage: victor-ctl [--port <port>] <command>");
    println!();
    println!("Pairing");
    println!("  begin-pairing                   Arm pairing mode");
    println!("  stop-pairing                    Disarm pairing mode");
    println!("  status                          Robot name, pairing state, counters");
    println!("  events                          Recently emitted upward events");
    println!("  ota-progress <percent>          Record an OTA progress update");
    println!();
    println!(
        "Options:\n  --port <port>                   API port (default: {DEFAULT_PORT})"
    );
    println!();
    println!("Examples:");
    println!("  victor-ctl begin-pairing");
    println!("  victor-ctl status");
    println!("  victor-ctl events");
}

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();

    let mut port = DEFAULT_PORT;
    let mut remaining: Vec<String> = Vec::new();
    let mut i = 0;
    while i < args.len() {
        if args[i] == "--port" {
            i += 1;
            port = args
                .get(i)
                .context("--port requires a value")?
                .parse()
                .context("--port must be a number")?;
        } else {
            remaining.push(args[i].clone());
        }
        i += 1;
    }

    let remaining_refs: Vec<&str> = remaining.iter().map(|s| s.as_str()).collect();

    match remaining_refs.as_slice() {
        ["begin-pairing"] => cmd::pairing::cmd_begin_pairing(port).await,
        ["stop-pairing"] => cmd::pairing::cmd_stop_pairing(port).await,
        ["status"] | [] => cmd::pairing::cmd_status(port).await,
        ["events"] => cmd::pairing::cmd_events(port).await,
        ["ota-progress", percent] => {
            let percent: u8 = percent.parse().context("percent must be 0-255")?;
            cmd::pairing::cmd_ota_progress(port, percent).await
        }
        ["help"] | ["--help"] | ["-h"] => {
            print_usage();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {}", other.join(" "));
            eprintln!();
            print_usage();
            std::process::exit(1);
        }
    }
}
