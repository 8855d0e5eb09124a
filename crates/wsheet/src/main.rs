//! wsheet CLI entry point.
//!
//! A terminal front end for the worksheet engine: it evaluates code on a
//! remote execution server, shows completions and documentation, and prints
//! stored worksheets.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use log::{debug, info};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::sync::mpsc::UnboundedReceiver;
use worksheet_engine::output::Output;
use worksheet_engine::settings::{load_settings, save_settings_to, settings_path};
use worksheet_engine::{
    start, CellKind, ClientSettings, ExecState, PaneView, SnapshotStore, WorksheetEvent,
};

mod store;

use crate::store::{default_store_dir, spawn_autosave, JsonFileStore};

#[derive(Parser, Debug)]
#[command(name = "wsheet")]
#[command(about = "Evaluate code on a remote worksheet execution server")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Server address, host:port or ws:// URL (default from settings)
    #[arg(long, global = true)]
    endpoint: Option<String>,

    /// Worksheet id (default from settings)
    #[arg(long, global = true)]
    worksheet: Option<String>,

    /// Log level
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Evaluate a file (or stdin) as a new cell of the worksheet
    Exec {
        /// Source file, `-` or omitted for stdin
        file: Option<PathBuf>,
    },

    /// Show completions for WORD, or its documentation (`WORD?`) or source (`WORD??`)
    Complete { word: String },

    /// Print the stored worksheet
    Show {
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Print the effective settings, optionally saving them as the defaults
    Config {
        /// Write the settings (including --endpoint/--worksheet) to the settings file
        #[arg(long)]
        save: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&cli.log_level))
        .init();

    let settings = apply_overrides(load_settings(), cli.endpoint, cli.worksheet);
    let store = JsonFileStore::new(default_store_dir());

    match cli.command {
        Commands::Exec { file } => exec(&settings, &store, file).await,
        Commands::Complete { word } => complete(&settings, &word).await,
        Commands::Show { json } => show(&settings, &store, json),
        Commands::Config { save } => config(&settings, save.then(settings_path).as_deref()),
    }
}

/// Command line flags win over the settings file.
fn apply_overrides(
    mut settings: ClientSettings,
    endpoint: Option<String>,
    worksheet: Option<String>,
) -> ClientSettings {
    if let Some(endpoint) = endpoint {
        settings.endpoint = endpoint;
    }
    if let Some(worksheet) = worksheet {
        settings.worksheet_id = worksheet;
    }
    settings
}

/// Wait for the first connection outcome.
async fn wait_for_server(
    settings: &ClientSettings,
    events: &mut UnboundedReceiver<WorksheetEvent>,
) -> Result<()> {
    while let Some(event) = events.recv().await {
        match event {
            WorksheetEvent::ServerAvailability { available: true } => return Ok(()),
            WorksheetEvent::ReconnectCountdown { .. } => {
                bail!("Could not connect to {}", settings.endpoint)
            }
            other => debug!("[wsheet] {:?}", other),
        }
    }
    bail!("Worksheet engine stopped")
}

async fn read_source(file: Option<PathBuf>) -> Result<String> {
    match file {
        Some(path) if path.as_os_str() != "-" => tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read {}", path.display())),
        _ => {
            let mut code = String::new();
            tokio::io::stdin().read_to_string(&mut code).await?;
            Ok(code)
        }
    }
}

async fn exec(settings: &ClientSettings, store: &JsonFileStore, file: Option<PathBuf>) -> Result<()> {
    let code = read_source(file).await?;
    let snapshot = store.load(&settings.worksheet_id)?;

    let (handle, mut events, task) = start(settings, snapshot);
    wait_for_server(settings, &mut events).await?;

    let cell = handle.insert_cell(CellKind::Code, None).await?;
    handle.set_input(cell, &code).await?;
    handle.evaluate(cell).await?;
    info!("[wsheet] Evaluating cell {} of {}", cell, settings.worksheet_id);

    let autosave = (settings.autosave_interval_ms > 0).then(|| {
        spawn_autosave(
            handle.clone(),
            store.clone(),
            Duration::from_millis(settings.autosave_interval_ms),
        )
    });

    let mut stdin_lines = BufReader::new(tokio::io::stdin()).lines();
    let mut awaiting_stdin = false;
    let mut interrupted = false;
    let mut failed = false;

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                match event {
                    WorksheetEvent::OutputAppended { cell: c, tag, text } if c == cell => {
                        match tag.as_str() {
                            "Stdout" => {
                                print!("{}", text);
                                std::io::stdout().flush()?;
                            }
                            // Echo of what we sent ourselves.
                            "Stdin" => {}
                            "Except" => {
                                failed = true;
                                eprint!("{}", text);
                            }
                            _ => eprint!("{}", text),
                        }
                    }
                    WorksheetEvent::StdinRequested { cell: c } if c == cell => awaiting_stdin = true,
                    WorksheetEvent::InterruptFailed { cell: c } if c == cell => {
                        eprintln!("Interrupt failed, press Ctrl-C again to kill the worker");
                    }
                    WorksheetEvent::CellStateChanged { cell: c, state: ExecState::Idle } if c == cell => break,
                    other => debug!("[wsheet] {:?}", other),
                }
            }
            line = stdin_lines.next_line(), if awaiting_stdin => {
                awaiting_stdin = false;
                match stdin_reply(line?) {
                    Some(text) => { handle.send_stdin(&text).await?; }
                    None => { handle.send_stdin_eof("").await?; }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                if interrupted {
                    eprintln!("Killing worker");
                    handle.kill(cell).await?;
                } else {
                    interrupted = true;
                    handle.interrupt(cell).await?;
                }
            }
        }
    }

    if let Some(autosave) = autosave {
        autosave.abort();
    }
    store.save(&handle.snapshot().await?)?;
    handle.shutdown().await?;
    let _ = task.await;

    if failed {
        std::process::exit(1);
    }
    Ok(())
}

/// Text to send for one line read from the terminal, or `None` at EOF.
fn stdin_reply(line: Option<String>) -> Option<String> {
    line.map(|line| format!("{}\n", line))
}

/// Terminal width from `COLUMNS`, or 80.
fn terminal_width() -> usize {
    std::env::var("COLUMNS")
        .ok()
        .and_then(|value| value.parse().ok())
        .filter(|&width| width > 0)
        .unwrap_or(80)
}

async fn complete(settings: &ClientSettings, word: &str) -> Result<()> {
    let (handle, mut events, task) = start(settings, None);
    wait_for_server(settings, &mut events).await?;

    let cell = handle.insert_cell(CellKind::Code, None).await?;
    handle.set_input(cell, word).await?;
    if handle
        .inspect(cell, 0, word.chars().count(), terminal_width())
        .await?
        .is_none()
    {
        bail!("Nothing to look up in '{}'", word);
    }

    while let Some(event) = events.recv().await {
        match event {
            WorksheetEvent::InspectUpdated { pane, .. } => match pane {
                PaneView::Loading => continue,
                PaneView::Completions { grid } => print!("{}", grid.render()),
                PaneView::Text { text } => println!("{}", text),
                PaneView::Message { text } => eprintln!("{}", text),
            },
            WorksheetEvent::CompletionApplied { content, .. } => println!("{}", content),
            WorksheetEvent::InspectClosed { .. } => eprintln!("Lookup cancelled"),
            other => {
                debug!("[wsheet] {:?}", other);
                continue;
            }
        }
        break;
    }

    handle.shutdown().await?;
    let _ = task.await;
    Ok(())
}

fn show(settings: &ClientSettings, store: &JsonFileStore, json: bool) -> Result<()> {
    let Some(snapshot) = store.load(&settings.worksheet_id)? else {
        bail!(
            "No stored worksheet '{}' in {}",
            settings.worksheet_id,
            store.dir().display()
        );
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
        return Ok(());
    }

    println!("{} ({})", snapshot.title, snapshot.id);
    for cell in &snapshot.cells {
        let kind = match cell.kind {
            CellKind::Code => "code",
            CellKind::Text => "text",
        };
        println!();
        println!("[{}] {}", cell.id, kind);
        println!("{}", cell.input.trim_end());
        let output = Output::from_html(&cell.output).plain_text();
        if !output.is_empty() {
            println!("---");
            println!("{}", output.trim_end());
        }
    }
    Ok(())
}

fn config(settings: &ClientSettings, save_to: Option<&Path>) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(settings)?);
    if let Some(path) = save_to {
        save_settings_to(settings, path)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        eprintln!("Saved to {}", path.display());
    }
    Ok(())
}
