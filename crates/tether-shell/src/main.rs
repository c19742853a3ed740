//! Tether shell
//!
//! Usage:
//!   tether                         Connect to 127.0.0.1:5448
//!   tether --host 10.0.0.5         Connect to another machine
//!   tether --exclude vendor/       Skip matching resources at startup

use std::io::IsTerminal;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use crossterm::event::{self, Event, KeyEventKind};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use tether::protocol::DEFAULT_PORT;
use tether::{BridgeConfig, NullSink, ScriptEvaluator, ScriptLoader};
use tether_shell::{EditorInput, ReplExit, Session, forward_interrupts, run_repl};

/// Tether shell - interactive console for a tether host
#[derive(Parser, Debug)]
#[command(name = "tether")]
#[command(about = "Interactive console for a tether evaluation host")]
struct Args {
    /// Host to connect to
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Host port
    #[arg(long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Skip host resources whose identity contains this text (repeatable;
    /// replaces the built-in list)
    #[arg(long = "exclude", value_name = "TEXT")]
    exclusions: Vec<String>,

    /// Pause after each reply before showing the prompt, in milliseconds
    #[arg(long, default_value_t = 500)]
    receive_delay_ms: u64,
}

fn main() -> anyhow::Result<ExitCode> {
    // Logs go to stderr and default to warn so they stay out of the prompt.
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into()))
        .init();

    let args = Args::parse();

    let mut config = BridgeConfig {
        port: args.port,
        receive_delay: Duration::from_millis(args.receive_delay_ms),
        ..Default::default()
    };
    if !args.exclusions.is_empty() {
        config.exclusions = args.exclusions;
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start runtime")?;

    let addr = format!("{}:{}", args.host, config.port);
    let mut session = match runtime.block_on(Session::connect(&addr, config)) {
        Ok(session) => session,
        Err(e) => {
            tracing::debug!("{}", e);
            println!("Connection to host failed!");
            println!("Please press any key...");
            wait_for_key();
            return Ok(ExitCode::FAILURE);
        }
    };

    let shadow = ScriptEvaluator::new();
    {
        let exclusions = session.config().exclusions.clone();
        let mut loader = ScriptLoader::new(&shadow, &NullSink);
        match runtime.block_on(session.load_startup_resources(&mut loader, &exclusions)) {
            Ok(report) => tracing::info!(
                loaded = report.loaded,
                skipped = report.skipped,
                failed = report.failed,
                "Startup resources replayed"
            ),
            Err(e) => tracing::warn!("Failed to load startup resources: {}", e),
        }
    }

    session.start_receiver(std::io::stdout());
    runtime.spawn(forward_interrupts(session.interrupt_handle()));

    println!("tether v{} connected to {}", env!("CARGO_PKG_VERSION"), addr);
    println!("Type quit or exit to leave.");

    let mut input = EditorInput::new().context("failed to create line editor")?;
    let exit = run_repl(&mut session, &shadow, runtime.handle(), &mut input)?;

    let code = match exit {
        ReplExit::Quit | ReplExit::Eof => ExitCode::SUCCESS,
        ReplExit::Disconnected => {
            println!("Connection to host lost.");
            ExitCode::FAILURE
        }
    };
    runtime.block_on(session.close());
    Ok(code)
}

/// Block until a key is pressed. Returns immediately without a terminal.
fn wait_for_key() {
    if !std::io::stdin().is_terminal() {
        return;
    }
    if let Err(e) = crossterm::terminal::enable_raw_mode() {
        tracing::debug!("Raw mode unavailable: {}", e);
        return;
    }
    loop {
        match event::read() {
            Ok(Event::Key(key)) if key.kind == KeyEventKind::Press => break,
            Ok(_) => continue,
            Err(e) => {
                tracing::debug!("Failed to read key: {}", e);
                break;
            }
        }
    }
    let _ = crossterm::terminal::disable_raw_mode();
}
