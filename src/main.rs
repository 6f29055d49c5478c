use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use artguard::{AppContext, GuardCfg, HashComputer, Platform, PostLocation, Verdict};

#[derive(Parser)]
#[command(name = "artguard", version, about = "Perceptual duplicate guard for art posts")]
struct Cli {
    /// YAML config; env vars (ARTGUARD_*, DATABASE_URL) override it.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Print machine-readable JSON.
    #[arg(long, global = true)]
    json: bool,
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Print the phash and dhash of an image file.
    Hash { file: PathBuf },
    /// Check whether an image was already posted in a guild (exit code 2 if so).
    Check {
        #[arg(long)]
        guild: u64,
        file: PathBuf,
    },
    /// Check an image and, if new, record it as posted at the given message.
    Register {
        #[arg(long)]
        guild: u64,
        #[arg(long)]
        thread: u64,
        #[arg(long)]
        message: u64,
        #[arg(long)]
        url: String,
        file: PathBuf,
    },
    /// Show how many records are stored and cached.
    Stats,
}

#[derive(Serialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
enum Report {
    Hashes { phash: String, dhash: String },
    Accept { phash: String, dhash: String },
    Duplicate { previous: String, record_id: i64 },
    Registered { record_id: i64, phash: String, dhash: String },
    Stats { stored: u64, cached: usize },
}

impl Report {
    fn print(&self, json: bool) -> Result<()> {
        if json {
            println!("{}", serde_json::to_string(self)?);
            return Ok(());
        }
        match self {
            Report::Hashes { phash, dhash } => println!("phash {phash}\ndhash {dhash}"),
            Report::Accept { phash, dhash } => println!("not posted yet (phash {phash}, dhash {dhash})"),
            Report::Duplicate { previous, .. } => println!("already posted: {previous}"),
            Report::Registered { record_id, .. } => println!("registered as record {record_id}"),
            Report::Stats { stored, cached } => println!("{stored} records stored, {cached} fingerprints cached"),
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("artguard=info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    // Hashing needs no database.
    if let Cmd::Hash { file } = &cli.cmd {
        hash_file(file).await?.print(cli.json)?;
        return Ok(ExitCode::SUCCESS);
    }

    let cfg = GuardCfg::load(cli.config.as_deref())?;
    let ctx = AppContext::connect(cfg).await?;
    let code = run(&ctx, cli.cmd, cli.json).await;
    ctx.shutdown().await;
    code
}

async fn run(ctx: &AppContext, cmd: Cmd, json: bool) -> Result<ExitCode> {
    let guard = ctx.guard();
    let report = match cmd {
        Cmd::Hash { file } => hash_file(&file).await?,
        Cmd::Check { guild, file } => {
            let bytes = read_image(&file).await?;
            match guard.check(guild, &bytes).await? {
                Verdict::Accept(token) => Report::Accept { phash: token.phash().to_hex(), dhash: token.dhash().to_hex() },
                Verdict::Reject(rec) => Report::Duplicate { previous: rec.jump_url(), record_id: rec.id },
            }
        }
        Cmd::Register { guild, thread, message, url, file } => {
            let bytes = read_image(&file).await?;
            match guard.check(guild, &bytes).await? {
                Verdict::Accept(token) => {
                    let at = PostLocation {
                        platform: Platform::detect(&url),
                        source_url: url,
                        thread_id: thread,
                        message_id: message,
                    };
                    let rec = guard.register(token, at).await?;
                    Report::Registered { record_id: rec.id, phash: rec.phash, dhash: rec.dhash }
                }
                Verdict::Reject(rec) => Report::Duplicate { previous: rec.jump_url(), record_id: rec.id },
            }
        }
        Cmd::Stats => Report::Stats { stored: ctx.store().count().await?, cached: guard.index().len() },
    };

    report.print(json)?;
    Ok(match report {
        Report::Duplicate { .. } => ExitCode::from(2),
        _ => ExitCode::SUCCESS,
    })
}

async fn hash_file(path: &Path) -> Result<Report> {
    let bytes = read_image(path).await?;
    let h = HashComputer::new().compute(&bytes)?;
    Ok(Report::Hashes { phash: h.phash.to_hex(), dhash: h.dhash.to_hex() })
}

async fn read_image(path: &Path) -> Result<Vec<u8>> {
    tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read image file: {}", path.display()))
}
