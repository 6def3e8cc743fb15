//! xtask: Development tasks for livebridge
//!
//! Run with: `cargo xtask <command>`

use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::process::{Child, ExitCode, Stdio};

use clap::{Parser, Subcommand};
use xshell::{cmd, Shell};

#[derive(Parser)]
#[command(name = "xtask")]
#[command(about = "Development tasks for livebridge")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run all tests (workspace + fuzz harnesses)
    Test,
    /// Run fuzz tests with bolero
    Fuzz {
        /// Target to fuzz ("registry", "turn", "timeline", "handshake")
        /// If not specified, runs all fuzz harnesses in test mode (quick smoke test)
        target: Option<String>,
    },
    /// Run a probe server and client against each other
    Smoke {
        /// Frames the server publishes
        #[arg(long, default_value_t = 200)]
        ticks: u32,
        /// Let the client drive the timeline
        #[arg(long)]
        timeline: bool,
    },
    /// Run clippy on all code
    Clippy,
    /// Check formatting
    Fmt {
        /// Fix formatting issues instead of just checking
        #[arg(long)]
        fix: bool,
    },
}

type BoxError = Box<dyn std::error::Error>;

fn main() -> ExitCode {
    if let Err(e) = run() {
        eprintln!("Error: {e}");
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

fn workspace_root() -> Result<PathBuf, BoxError> {
    let manifest_dir = match std::env::var("CARGO_MANIFEST_DIR") {
        Ok(dir) => PathBuf::from(dir),
        Err(_) => std::env::current_dir()?,
    };
    manifest_dir
        .parent()
        .map(Path::to_path_buf)
        .ok_or_else(|| "xtask has no parent directory".into())
}

fn run() -> Result<(), BoxError> {
    let cli = Cli::parse();
    let sh = Shell::new()?;

    let workspace_root = workspace_root()?;
    sh.change_dir(&workspace_root);

    match cli.command {
        Commands::Test => {
            println!("=== Running workspace tests ===");

            // Try nextest first, fall back to cargo test
            if cmd!(sh, "cargo nextest --version").quiet().run().is_ok() {
                println!("Using cargo-nextest");
                cmd!(sh, "cargo nextest run --workspace").run()?;
            } else {
                println!("cargo-nextest not found, using cargo test");
                cmd!(sh, "cargo test --workspace").run()?;
            }

            println!("\n=== Running fuzz harnesses (test mode) ===");
            sh.change_dir(workspace_root.join("fuzz"));
            cmd!(sh, "cargo test").run()?;

            println!("\n=== All tests passed ===");
        }
        Commands::Fuzz { target } => {
            sh.change_dir(workspace_root.join("fuzz"));

            if let Some(t) = target {
                println!("=== Fuzzing target: {t} ===");
                println!("Press Ctrl+C to stop.\n");

                if cmd!(sh, "cargo bolero --version").quiet().run().is_err() {
                    eprintln!("cargo-bolero not found. Install with:");
                    eprintln!("  cargo install cargo-bolero");
                    return Err("cargo-bolero not installed".into());
                }

                cmd!(sh, "cargo bolero test {t}").run()?;
            } else {
                println!("=== Running all fuzz harnesses in test mode ===");
                println!("(For real fuzzing, specify a target: cargo xtask fuzz turn)\n");
                println!("Available targets:");
                println!("  - registry   (session ids, slot reuse)");
                println!("  - turn       (doorbells + turn token hand-off)");
                println!("  - timeline   (playhead arbitration)");
                println!("  - handshake  (look-at pose sync)\n");

                cmd!(sh, "cargo test").run()?;
            }
        }
        Commands::Smoke { ticks, timeline } => {
            run_smoke(&sh, &workspace_root, ticks, timeline)?;
        }
        Commands::Clippy => {
            println!("=== Running clippy ===");
            cmd!(sh, "cargo clippy --workspace --all-features -- -D warnings").run()?;

            println!("\n=== Clippy on fuzz crate ===");
            sh.change_dir(workspace_root.join("fuzz"));
            cmd!(sh, "cargo clippy -- -D warnings").run()?;
        }
        Commands::Fmt { fix } => {
            if fix {
                println!("=== Fixing formatting ===");
                cmd!(sh, "cargo fmt --all").run()?;
            } else {
                println!("=== Checking formatting ===");
                cmd!(sh, "cargo fmt --all -- --check").run()?;
            }
        }
    }

    Ok(())
}

/// Build the probe, start a server, wait until it is up, then run a client
/// to completion and check both exit cleanly.
fn run_smoke(sh: &Shell, workspace_root: &Path, ticks: u32, timeline: bool) -> Result<(), BoxError> {
    println!("=== Building livebridge-probe ===");
    cmd!(sh, "cargo build --package livebridge-probe --release").run()?;

    let probe = workspace_root
        .join("target/release/livebridge-probe")
        .with_extension(std::env::consts::EXE_EXTENSION);
    let pair = format!("lb_smoke_{}", std::process::id());
    let mode: &[&str] = if timeline { &["--timeline"] } else { &[] };

    println!("\n=== Starting server on {pair} ===");
    let mut server = std::process::Command::new(&probe)
        .args(["server", "--pair", &pair, "--ticks", &ticks.to_string()])
        .args(mode)
        .env("RUST_LOG", "info")
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .spawn()?;

    if let Err(e) = wait_for_server_ready(&mut server, "server started") {
        let _ = server.kill();
        return Err(e);
    }

    println!("\n=== Running client ===");
    let client = std::process::Command::new(&probe)
        .args(["client", "--pair", &pair])
        .args(mode)
        .env("RUST_LOG", "info")
        .status();

    let server_status = match client {
        Ok(status) if status.success() => server.wait()?,
        other => {
            let _ = server.kill();
            return Err(format!("client failed: {other:?}").into());
        }
    };
    if !server_status.success() {
        return Err(format!("server exited with {server_status}").into());
    }

    println!("\n=== Smoke run passed ===");
    Ok(())
}

/// Wait for a server process to output a ready message, then spawn a thread to drain remaining output.
fn wait_for_server_ready(process: &mut Child, ready_marker: &str) -> Result<(), BoxError> {
    let stdout = process.stdout.take().ok_or("no stdout")?;
    let reader = BufReader::new(stdout);
    let mut lines = reader.lines();

    while let Some(line) = lines.next() {
        let line = line?;
        println!("  {}", line);
        if line.contains(ready_marker) {
            std::thread::spawn(move || {
                for line in lines.map_while(Result::ok) {
                    println!("  [server] {}", line);
                }
            });
            return Ok(());
        }
    }

    Err("Server process exited before becoming ready".into())
}
