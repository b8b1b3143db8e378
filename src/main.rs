use clap::{CommandFactory, Parser};
use colored::*;
use std::io::{self, Write};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

use flux_tree::cli::Args;
use flux_tree::config::FluxConfig;
use flux_tree::launch::take_new_tree_param;
use flux_tree::repl::{render_tree, Command, Flow, Repl};
use flux_tree::session::{FlowSnapshot, Session};
use flux_tree::settings::Settings;
use flux_tree::store::{Autosaver, LocalStore, MODEL_SETTINGS_KEY, REACT_FLOW_KEY};

fn init_tracing(verbose: bool) {
    let default = if verbose { "flux_tree=debug" } else { "flux_tree=warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(io::stderr).init();
}

/// Seed text from `--new-tree-with`, else from a `--url` launch link.
fn new_tree_seed(args: &Args) -> Result<Option<String>, Box<dyn std::error::Error>> {
    if args.new_tree_with.is_some() {
        return Ok(args.new_tree_with.clone());
    }
    match &args.url {
        Some(url) => {
            let (content, stripped) = take_new_tree_param(url)?;
            tracing::debug!(url = %stripped, seeded = content.is_some(), "launch url");
            Ok(content)
        }
        None => Ok(None),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    if let Some(shell) = args.completions {
        let mut command = Args::command();
        clap_complete::generate(shell, &mut command, "flux", &mut io::stdout());
        return Ok(());
    }

    init_tracing(args.verbose);

    let mut config = FluxConfig::load(&args.config)?;
    if let Some(dir) = &args.store_dir {
        config.store_dir = dir.clone();
    }
    let store = LocalStore::open(&config.store_dir)?;
    tracing::info!(dir = %store.dir().display(), "state store opened");

    let stored_settings: Settings = match store.read(MODEL_SETTINGS_KEY) {
        Ok(settings) => settings.unwrap_or_default(),
        Err(e) => {
            tracing::warn!(error = %e, "ignoring unreadable settings");
            Settings::default()
        }
    };
    let settings = args.apply_overrides(stored_settings);

    let flow: Option<FlowSnapshot> = match store.read(REACT_FLOW_KEY) {
        Ok(flow) => flow,
        Err(e) => {
            tracing::warn!(error = %e, "ignoring unreadable flow");
            None
        }
    };

    let seed = new_tree_seed(&args)?;
    let mut session = Session::new(settings, config.history_size);
    session.restore(flow, seed.as_deref());
    let session = Arc::new(Mutex::new(session));

    let autosaver = Arc::new(Autosaver::spawn(session.clone(), store.clone(), config.autosave_delay()));
    autosaver.flush()?;

    let mut repl = Repl::new(session.clone(), store, autosaver.clone(), config.api_base.clone());

    println!("{}", "flux: type 'help' for commands".bright_cyan());
    if let Ok(session) = session.lock() {
        println!("{}", render_tree(&session));
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("{} ", ">".bright_cyan());
        io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            autosaver.shutdown()?;
            break;
        };

        let command = match Command::parse(&line) {
            Ok(command) => command,
            Err(message) => {
                println!("{}", message.yellow());
                continue;
            }
        };

        match repl.execute(command).await {
            Ok(Flow::Continue) => {}
            Ok(Flow::Quit) => break,
            Err(e) if e.is_silent() => {}
            Err(e) => println!("{}", format!("error: {e}").red()),
        }
    }

    Ok(())
}
