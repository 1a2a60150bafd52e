use anyhow::Result;
use catalogscraper::{pipeline::RunPaths, Config, FilterSpec, Pipeline};
use chrono::Local;
use clap::{Parser, Subcommand};
use std::{path::PathBuf, process::ExitCode};
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

/// Download the vendor catalog, keep the rows you care about, save them.
#[derive(Parser, Debug)]
struct Args {
    /// YAML config file; flags below override it
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Catalog URL (gzip-compressed CSV)
    #[arg(long, global = true)]
    url: Option<String>,

    #[arg(long, global = true)]
    download_root: Option<PathBuf>,

    #[arg(long, global = true)]
    extract_root: Option<PathBuf>,

    #[arg(long, global = true)]
    output_root: Option<PathBuf>,

    /// Download attempts before giving up
    #[arg(long, global = true)]
    max_attempts: Option<u32>,

    /// Column to filter on; use with --value or --values
    #[arg(long, global = true)]
    column: Option<String>,

    /// Keep rows where <column> equals this value
    #[arg(long, global = true, requires = "column", conflicts_with = "values")]
    value: Option<String>,

    /// Keep rows where <column> is one of these comma-separated values
    #[arg(long, global = true, requires = "column", value_delimiter = ',')]
    values: Vec<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, Copy)]
enum Command {
    /// Download, decompress, filter and save (default)
    Run,
    /// Download and decompress only
    Download,
    /// Filter the newest extracted CSV and save
    Filter,
}

fn load_config(args: &Args) -> Result<Config> {
    let mut cfg = match &args.config {
        Some(path) => Config::from_yaml_file(path)?,
        None => Config::default(),
    };

    if let Some(url) = &args.url {
        cfg.source_url = url.clone();
    }
    if let Some(d) = &args.download_root {
        cfg.download_root = d.clone();
    }
    if let Some(d) = &args.extract_root {
        cfg.extract_root = d.clone();
    }
    if let Some(d) = &args.output_root {
        cfg.output_root = d.clone();
    }
    if let Some(n) = args.max_attempts {
        cfg.max_download_attempts = n;
    }
    if let Some(column) = &args.column {
        cfg.filter = match (&args.value, args.values.is_empty()) {
            (Some(v), _) => FilterSpec::equals(column, v),
            (None, false) => FilterSpec::one_of(column, args.values.iter().cloned()),
            (None, true) => anyhow::bail!("--column needs --value or --values"),
        };
    }

    cfg.validate()?;
    Ok(cfg)
}

async fn run(args: Args) -> Result<()> {
    let cfg = load_config(&args)?;
    info!(url = %cfg.source_url, filter = %cfg.filter, "configuration");
    let pipeline = Pipeline::new(cfg)?;
    let now = Local::now();

    match args.command.unwrap_or(Command::Run) {
        Command::Run => {
            let report = pipeline.run_at(&now).await?;
            info!(
                output = %report.paths.output.display(),
                scanned = report.rows_scanned,
                written = report.rows_written,
                downloaded_bytes = report.downloaded_bytes,
                "filtered data saved"
            );
        }
        Command::Download => {
            let paths = RunPaths::for_time(pipeline.config(), &now);
            let (compressed, plain) = pipeline.download(&paths).await?;
            info!(
                archive = %paths.download.display(),
                extracted = %paths.extract.display(),
                compressed,
                plain,
                "download complete"
            );
        }
        Command::Filter => {
            let saved = pipeline.filter_latest(&now).await?;
            info!(
                output = %saved.output.display(),
                scanned = saved.rows_scanned,
                written = saved.rows_written,
                "filtered data saved"
            );
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let env = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt::Subscriber::builder()
        .with_env_filter(env)
        .with_span_events(fmt::format::FmtSpan::CLOSE)
        .init();

    let args = Args::parse();
    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}
