//! Binary entrypoint for the photobooth kiosk.
//!
//! Delegates all logic to the library crate.

use std::io::{self, IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{ArgAction, Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

use photobooth::config::Configuration;
use photobooth::events::{Intent, UiUpdate};
use photobooth::i18n::{Catalog, Translate};
use photobooth::{camera, console, delivery, tasks};

#[derive(Debug, Parser)]
#[command(name = "photobooth", version, about = "Kiosk photobooth")]
struct Cli {
    /// Path to YAML config file
    #[arg(short, long, value_name = "FILE", default_value = "config.yaml", global = true)]
    config: PathBuf,

    /// Increase log verbosity (repeatable)
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the kiosk with a console front end (default)
    Run,
    /// Upload one session directory to the configured cloud and print the link
    Upload {
        #[arg(value_name = "DIR")]
        dir: PathBuf,
    },
}

fn init_tracing(verbosity: u8) -> Result<()> {
    let level = match verbosity {
        0 => LevelFilter::INFO,
        1 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    };
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy()
        .add_directive(
            format!("photobooth={level}")
                .parse()
                .context("invalid log directive")?,
        );
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .with_writer(io::stderr)
        .init();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose)?;

    let cfg = Configuration::from_yaml_file(&cli.config)
        .with_context(|| format!("failed to load configuration from {}", cli.config.display()))?
        .validated()
        .context("invalid configuration values")?;
    tracing::debug!("Loaded configuration from {}:\n{:#?}", cli.config.display(), cfg);

    let translator: Arc<dyn Translate> = Arc::new(
        Catalog::new(cfg.general.language).context("failed to load translations")?,
    );

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run_kiosk(cfg, translator).await,
        Command::Upload { dir } => upload_once(&cfg, translator, &dir).await,
    }
}

async fn run_kiosk(cfg: Configuration, translator: Arc<dyn Translate>) -> Result<()> {
    let camera = camera::build_camera(&cfg.camera);
    let backends = delivery::build_backends(&cfg, Arc::clone(&translator));
    if backends.is_empty() {
        tracing::warn!("no delivery backend enabled; sessions can only be stored locally");
    }

    let (intent_tx, intent_rx) = mpsc::channel::<Intent>(16); // Console -> Kiosk
    let (ui_tx, mut ui_rx) = mpsc::channel::<UiUpdate>(64); // Kiosk -> Console

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::warn!("ctrl-c handler failed: {err}");
                return;
            }
            tracing::info!("ctrl-c received; initiating shutdown");
            cancel.cancel();
        });
    }

    let mut tasks = JoinSet::new();

    // Kiosk loop
    tasks.spawn({
        let cancel = cancel.clone();
        async move {
            tasks::kiosk::run(cfg, camera, backends, translator, intent_rx, ui_tx, cancel)
                .await
                .context("kiosk task failed")
        }
    });

    // Console output
    tasks.spawn(async move {
        let mut stdout = io::stdout();
        while let Some(update) = ui_rx.recv().await {
            if let Some(line) = console::render(&update) {
                writeln!(stdout, "{line}").context("failed to write to stdout")?;
            }
        }
        Ok(())
    });

    // Console input; Ctrl-D ends the session
    tasks.spawn({
        let cancel = cancel.clone();
        async move {
            if io::stdin().is_terminal() {
                println!("{}", console::HELP);
            }
            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            loop {
                let line = tokio::select! {
                    _ = cancel.cancelled() => break,
                    line = lines.next_line() => line.context("failed to read stdin")?,
                };
                let Some(line) = line else {
                    tracing::info!("stdin closed; initiating shutdown");
                    break;
                };
                if line.trim().is_empty() {
                    continue;
                }
                match console::parse_intent(&line) {
                    Some(intent) => {
                        if intent_tx.send(intent).await.is_err() {
                            break;
                        }
                    }
                    None => println!("{}", console::HELP),
                }
            }
            cancel.cancel();
            Ok(())
        }
    });

    while let Some(res) = tasks.join_next().await {
        match res {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::error!("task error: {e:?}"),
            Err(e) => tracing::error!("join error: {e}"),
        }
        cancel.cancel();
    }
    Ok(())
}

async fn upload_once(cfg: &Configuration, translator: Arc<dyn Translate>, dir: &Path) -> Result<()> {
    if !dir.is_dir() {
        bail!("{} is not a directory", dir.display());
    }
    let backends = delivery::build_backends(cfg, translator);
    let Some(cloud) = backends.cloud else {
        bail!("no cloud provider configured (general.cloud-provider)");
    };
    match delivery::share_to_cloud(cloud.as_ref(), dir).await? {
        Some(share) => {
            println!("{}", share.share_url);
            if let Some(qr) = share.qr_code_path {
                tracing::info!(qr = %qr.display(), "QR code written");
            }
            Ok(())
        }
        None => bail!("cloud provider declined to create a share link"),
    }
}
