use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use miette::IntoDiagnostic;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use runa_album_bridge::archive::FileArchiveSink;
use runa_album_bridge::config::ConfigLoader;
use runa_album_bridge::dispatch::{Dispatcher, NopFullscreen, TracingDiagnostics};
use runa_album_bridge::dom::{InMemoryDom, IntervalClock};
use runa_album_bridge::domain::Locator;
use runa_album_bridge::error::RunaError;
use runa_album_bridge::events::{BridgeEvent, EventBus};
use runa_album_bridge::fetch::HttpFetcher;
use runa_album_bridge::headless::HeadlessRuntime;
use runa_album_bridge::map::{MapController, MapOptions};
use runa_album_bridge::messages::{self, PortMessage};
use runa_album_bridge::pipeline::{DownloadOptions, download_archive};
use runa_album_bridge::tokens::HttpTokenSource;

#[derive(Parser)]
#[command(name = "runa-ab")]
#[command(about = "Native bridge for the Runa album viewer (archive downloads and map lifecycle)")]
#[command(version, author)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Fetch the given image locators into one zip archive")]
    Download(DownloadArgs),
    #[command(about = "Serve NDJSON port messages on stdin, events on stdout")]
    Pipe(PipeArgs),
    #[command(about = "Generate a default runa-ab.json")]
    Init(InitArgs),
}

#[derive(Args)]
struct DownloadArgs {
    #[arg(required = true)]
    locators: Vec<String>,

    #[arg(long)]
    config: Option<String>,

    #[arg(long)]
    out_dir: Option<String>,
}

#[derive(Args)]
struct PipeArgs {
    #[arg(long)]
    config: Option<String>,
}

#[derive(Args)]
struct InitArgs {
    path: Option<String>,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(runa) = report.downcast_ref::<RunaError>() {
            return ExitCode::from(map_exit_code(runa));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &RunaError) -> u8 {
    match error {
        RunaError::ConfigRead(_) | RunaError::ConfigParse(_) => 2,
        RunaError::ContainerUnresolved(_) => 2,
        RunaError::FetchHttp(_)
        | RunaError::FetchStatus { .. }
        | RunaError::TokenHttp(_)
        | RunaError::TokenStatus { .. } => 3,
        _ => 1,
    }
}

#[tokio::main]
async fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Download(args) => run_download(args).await,
        Commands::Pipe(args) => run_pipe(args).await,
        Commands::Init(args) => run_init(args),
    }
}

async fn run_download(args: DownloadArgs) -> miette::Result<()> {
    let mut config = ConfigLoader::resolve(args.config.as_deref()).into_diagnostic()?;
    if let Some(dir) = args.out_dir {
        config.download_dir = dir.into();
    }

    let locators = args
        .locators
        .iter()
        .map(|value| value.parse::<Locator>())
        .collect::<Result<Vec<_>, _>>()
        .into_diagnostic()?;

    let fetcher = HttpFetcher::new(config.fetch_timeout).into_diagnostic()?;
    let bus = EventBus::default();
    let cancel = CancellationToken::new();

    let bar = ProgressBar::new(100);
    bar.set_style(
        ProgressStyle::default_bar()
            .template("[{bar:40.cyan/blue}] {percent}% {msg}")
            .into_diagnostic()?
            .progress_chars("=> "),
    );
    let mut rx = bus.subscribe();
    let render = tokio::spawn({
        let bar = bar.clone();
        async move {
            loop {
                match rx.recv().await {
                    Ok(BridgeEvent::DownloadProgress(percent)) => {
                        bar.set_position(percent as u64);
                    }
                    Ok(BridgeEvent::Error(message)) => bar.println(format!("error: {message}")),
                    Err(RecvError::Lagged(_)) => {}
                    Err(RecvError::Closed) => break,
                }
            }
        }
    });

    let sink = FileArchiveSink::create(&config.download_dir, &config.archive_name)
        .await
        .into_diagnostic()?;
    let archive_path = sink.final_path().to_owned();
    let options = DownloadOptions::from_config(&config);
    let result = download_archive(&fetcher, &locators, sink, &options, &bus, &cancel).await;

    drop(bus);
    let _ = render.await;

    match result {
        Ok(()) => {
            bar.finish_with_message(format!("saved {archive_path}"));
            Ok(())
        }
        Err(err) => {
            bar.abandon_with_message("download failed");
            Err(err).into_diagnostic()
        }
    }
}

async fn run_pipe(args: PipeArgs) -> miette::Result<()> {
    let config = ConfigLoader::resolve(args.config.as_deref()).into_diagnostic()?;
    let bus = EventBus::default();
    let cancel = CancellationToken::new();

    let fetcher = HttpFetcher::new(config.fetch_timeout).into_diagnostic()?;
    let dom = InMemoryDom::new();
    let runtime = HeadlessRuntime::new(dom.clone());
    let clock = IntervalClock::new(config.frame_interval);
    let tokens = HttpTokenSource::new(&config.base_url, config.fetch_timeout).into_diagnostic()?;
    let controller = MapController::new(
        runtime,
        dom.clone(),
        clock,
        tokens,
        MapOptions::from_config(&config),
    );
    let mut dispatcher = Dispatcher::new(
        fetcher,
        controller,
        TracingDiagnostics,
        NopFullscreen,
        bus.clone(),
        &config,
        cancel.clone(),
    );

    let mut rx = bus.subscribe();
    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        loop {
            match rx.recv().await {
                Ok(event) => match messages::encode_event(&event) {
                    Ok(line) => {
                        if stdout.write_all(line.as_bytes()).await.is_err()
                            || stdout.write_all(b"\n").await.is_err()
                        {
                            break;
                        }
                        let _ = stdout.flush().await;
                    }
                    Err(err) => tracing::warn!(error = %err, "failed to encode event"),
                },
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "outbound event stream lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    let stdin = BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();
    while let Some(line) = lines.next_line().await.into_diagnostic()? {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        match messages::decode_line(trimmed) {
            Ok(Some(message)) => {
                // The UI renders the container before requesting a map;
                // the in-memory document stands in for that render here.
                if let PortMessage::InitMap { view, .. } = &message {
                    dom.attach_container(view.container_id());
                }
                dispatcher.handle(message);
            }
            Ok(None) => tracing::debug!(line = %trimmed, "ignoring unknown port"),
            Err(err) => {
                tracing::warn!(error = %err, "rejected inbound line");
                bus.publish(BridgeEvent::Error(err.to_string()));
            }
        }
    }

    dispatcher.settle().await;
    drop(dispatcher);
    drop(bus);
    writer.await.into_diagnostic()?;
    Ok(())
}

fn run_init(args: InitArgs) -> miette::Result<()> {
    let path = ConfigLoader::write_default(args.path.as_deref()).into_diagnostic()?;
    println!("wrote {}", path.display());
    Ok(())
}
