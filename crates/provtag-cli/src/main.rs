use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use bytes::Bytes;
use clap::{Parser, Subcommand};
use provtag_contracts::blob::ImageBlob;
use provtag_contracts::report::{split_message, MESSAGE_CHUNK_LIMIT};
use provtag_contracts::settings::Settings;
use provtag_engine::orchestrator::NOT_AN_IMAGE_TEXT;
use provtag_engine::{ImageDownloader, InboundFile, MetadataReader, Orchestrator, Reply, WdTaggerClient};
use serde_json::json;
use tracing::warn;

#[derive(Debug, Parser)]
#[command(name = "provtag", version, about = "Image provenance metadata and tag enrichment")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Tag an image and print the enriched report.
    Inspect(InspectArgs),
    /// Print the provenance record embedded in an image.
    Metadata(MetadataArgs),
}

#[derive(Debug, Parser)]
struct InspectArgs {
    #[arg(long)]
    file: PathBuf,
    #[arg(long)]
    endpoint: Option<String>,
    #[arg(long)]
    token: Option<String>,
    #[arg(long)]
    general_threshold: Option<f64>,
    #[arg(long)]
    character_threshold: Option<f64>,
    #[arg(long)]
    env_file: Option<PathBuf>,
    #[arg(long, allow_hyphen_values = true)]
    chat_id: Option<i64>,
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Parser)]
struct MetadataArgs {
    #[arg(long)]
    file: PathBuf,
    #[arg(long)]
    env_file: Option<PathBuf>,
}

const EXIT_NO_REPORT: i32 = 2;
const EXIT_ACCESS_DENIED: i32 = 3;

fn main() {
    init_tracing();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("provtag error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Inspect(args) => run_inspect(args),
        Command::Metadata(args) => run_metadata(args),
    }
}

fn run_inspect(args: InspectArgs) -> Result<i32> {
    let mut settings = Settings::load(args.env_file.as_deref())?;
    apply_overrides(&mut settings, &args)?;
    if let Some(chat_id) = args.chat_id {
        if !settings.access.allows(chat_id) {
            eprintln!("chat {chat_id} is not on the allow list");
            return Ok(EXIT_ACCESS_DENIED);
        }
    }

    let reader = MetadataReader::from_settings(&settings);
    let tagger = WdTaggerClient::from_settings(&settings)?;
    let orchestrator = Orchestrator::new(LocalFileDownloader, tagger, reader);
    let file = inbound_file(&args.file);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed starting async runtime")?;
    let reply = runtime.block_on(orchestrator.handle(&file));

    if args.json {
        println!("{}", serde_json::to_string_pretty(&reply_json(&reply))?);
    } else {
        let chunks = split_message(&reply.render(), MESSAGE_CHUNK_LIMIT);
        println!("{}", chunks.join("\n\n"));
    }
    Ok(match reply {
        Reply::Report(_) => 0,
        Reply::NotAnImage | Reply::TaggingFailed => EXIT_NO_REPORT,
    })
}

fn run_metadata(args: MetadataArgs) -> Result<i32> {
    let settings = Settings::load(args.env_file.as_deref())?;
    let file = inbound_file(&args.file);
    let bytes = std::fs::read(&args.file)
        .with_context(|| format!("failed reading {}", args.file.display()))?;
    let Some(blob) = ImageBlob::from_upload(&file.file_name, bytes) else {
        println!("{NOT_AN_IMAGE_TEXT}");
        return Ok(EXIT_NO_REPORT);
    };
    let record = MetadataReader::from_settings(&settings).read(&blob);
    println!("{}", serde_json::to_string_pretty(&record)?);
    Ok(0)
}

fn apply_overrides(settings: &mut Settings, args: &InspectArgs) -> Result<()> {
    if let Some(endpoint) = args.endpoint.as_deref().map(str::trim).filter(|v| !v.is_empty()) {
        settings.tagger_endpoint = endpoint.to_string();
    }
    if let Some(token) = args.token.as_deref().map(str::trim).filter(|v| !v.is_empty()) {
        settings.tagger_token = token.to_string();
    }
    if let Some(value) = args.general_threshold {
        settings.thresholds.general = checked_threshold("--general-threshold", value)?;
    }
    if let Some(value) = args.character_threshold {
        settings.thresholds.character = checked_threshold("--character-threshold", value)?;
    }
    Ok(())
}

fn checked_threshold(flag: &str, value: f64) -> Result<f64> {
    if !(0.0..=1.0).contains(&value) {
        anyhow::bail!("{flag} must be within 0..=1, got {value}");
    }
    Ok(value)
}

fn inbound_file(path: &Path) -> InboundFile {
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    InboundFile::new(path.to_string_lossy().into_owned(), file_name)
}

fn reply_json(reply: &Reply) -> serde_json::Value {
    match reply {
        Reply::Report(report) => json!({
            "status": "report",
            "blocks": report.blocks(),
        }),
        Reply::NotAnImage => json!({"status": "not_an_image", "text": reply.render()}),
        Reply::TaggingFailed => json!({"status": "tagging_failed", "text": reply.render()}),
    }
}

struct LocalFileDownloader;

impl ImageDownloader for LocalFileDownloader {
    async fn download(&self, file: &InboundFile) -> Result<Option<Bytes>> {
        match tokio::fs::read(&file.file_id).await {
            Ok(bytes) => Ok(Some(Bytes::from(bytes))),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                warn!(path = %file.file_id, "image file not found");
                Ok(None)
            }
            Err(err) => Err(err).with_context(|| format!("failed reading {}", file.file_id)),
        }
    }
}
