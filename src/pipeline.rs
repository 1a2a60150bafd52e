// src/pipeline.rs

use anyhow::Context;
use chrono::{DateTime, TimeZone};
use reqwest::Client;
use std::{
    fs, io,
    path::{Path, PathBuf},
    time::Instant,
};
use tracing::{info, instrument, warn};

use crate::{
    config::Config,
    error::{PipelineError, Stage, StageError, TransferError},
    fetch,
    paths::{destination_path, ensure_parent, latest_csv},
    process::{
        filter::{filter_stream, FilterSpec},
        gunzip::{decompress, plain_file_name},
        parse::RecordStream,
        select::{select, ColumnMapping},
        write::save,
    },
    retry::RetryPolicy,
};

/// Where one run reads and writes. All three share the run's minute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunPaths {
    pub download: PathBuf,
    pub extract: PathBuf,
    pub output: PathBuf,
}

impl RunPaths {
    pub fn for_time<Tz: TimeZone>(cfg: &Config, now: &DateTime<Tz>) -> Self {
        let archive = cfg.download_file_name();
        Self {
            extract: destination_path(
                &cfg.extract_root,
                now,
                Some(&plain_file_name(&archive)),
            ),
            download: destination_path(&cfg.download_root, now, Some(&archive)),
            output: destination_path(&cfg.output_root, now, Some(&cfg.output_file_name)),
        }
    }
}

/// What a successful run produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub paths: RunPaths,
    pub downloaded_bytes: u64,
    pub extracted_bytes: u64,
    pub rows_scanned: usize,
    pub rows_written: usize,
}

/// Result of filtering one extracted CSV into the output location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Saved {
    pub output: PathBuf,
    pub rows_scanned: usize,
    pub rows_written: usize,
}

/// fetch → decompress → parse → filter → save, one run at a time.
pub struct Pipeline {
    config: Config,
    client: Client,
}

impl Pipeline {
    pub fn new(config: Config) -> anyhow::Result<Self> {
        config.validate()?;
        let client = fetch::build_client(config.connect_timeout(), config.request_timeout())
            .context("building HTTP client")?;
        Ok(Self { config, client })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn dir_policy(&self) -> RetryPolicy {
        self.config.retry_policy()
    }

    /// Full run with paths derived from `now`.
    #[instrument(level = "info", skip_all, fields(url = %self.config.source_url))]
    pub async fn run_at<Tz: TimeZone>(
        &self,
        now: &DateTime<Tz>,
    ) -> Result<RunReport, StageError> {
        let start = Instant::now();
        let paths = RunPaths::for_time(&self.config, now);
        let (downloaded_bytes, extracted_bytes) = self.download(&paths).await?;
        let saved = self.filter_file(&paths.extract, &paths.output).await?;

        if self.config.cleanup_intermediates {
            for p in [&paths.download, &paths.extract] {
                match fs::remove_file(p) {
                    Ok(()) => info!(path = %p.display(), "removed intermediate"),
                    Err(e) => {
                        warn!(path = %p.display(), error = %e, "failed to remove intermediate")
                    }
                }
            }
        }

        info!(
            elapsed = ?start.elapsed(),
            rows = saved.rows_written,
            output = %saved.output.display(),
            "run complete"
        );
        Ok(RunReport {
            paths,
            downloaded_bytes,
            extracted_bytes,
            rows_scanned: saved.rows_scanned,
            rows_written: saved.rows_written,
        })
    }

    /// Fetch the archive to `paths.download` and decompress it to
    /// `paths.extract`. Returns (compressed bytes, plain bytes).
    pub async fn download(&self, paths: &RunPaths) -> Result<(u64, u64), StageError> {
        // a download directory that cannot be created is a sink failure
        ensure_parent(&paths.download, self.dir_policy()).map_err(|e| match e {
            PipelineError::Io { path, source } => {
                PipelineError::from(TransferError::Sink { path, source })
            }
            e => e,
        })?;
        let downloaded = fetch::fetch(
            &self.client,
            &self.config.source_url,
            &paths.download,
            self.config.retry_policy(),
        )
        .await
        .map_err(PipelineError::from)?;

        let policy = self.dir_policy();
        let src = paths.download.clone();
        let dest = paths.extract.clone();
        let extracted = blocking(Stage::Decompress, move || {
            ensure_parent(&dest, policy)?;
            decompress(&src, &dest)
        })
        .await?;

        Ok((downloaded, extracted))
    }

    /// Parse `csv`, keep the rows matching the configured filter, apply the
    /// column mapping and save to `output`.
    pub async fn filter_file(&self, csv: &Path, output: &Path) -> Result<Saved, StageError> {
        let spec = self.config.filter.clone();
        let columns = self.config.columns.clone();
        let policy = self.dir_policy();
        let csv = csv.to_path_buf();
        let output = output.to_path_buf();

        tokio::task::spawn_blocking(move || {
            filter_and_save(&csv, &output, &spec, &columns, policy)
        })
        .await
        .unwrap_or_else(|e| Err(join_error(Stage::Filter, e)))
    }

    /// Filter the newest CSV under the extract root into an output path for `now`.
    pub async fn filter_latest<Tz: TimeZone>(
        &self,
        now: &DateTime<Tz>,
    ) -> Result<Saved, StageError> {
        let csv = latest_csv(&self.config.extract_root)
            .map_err(|e| StageError::new(Stage::Parse, e))?;
        info!(csv = %csv.display(), "filtering latest extracted file");
        let output = destination_path(
            &self.config.output_root,
            now,
            Some(&self.config.output_file_name),
        );
        self.filter_file(&csv, &output).await
    }
}

#[instrument(level = "info", skip_all, fields(csv = %csv.display()))]
fn filter_and_save(
    csv: &Path,
    output: &Path,
    spec: &FilterSpec,
    columns: &[ColumnMapping],
    policy: RetryPolicy,
) -> Result<Saved, StageError> {
    let stream = RecordStream::open(csv).map_err(|e| StageError::new(Stage::Parse, e))?;
    // io failures while reading belong to the parse stage; the rest keep their own.
    let outcome = filter_stream(stream, spec).map_err(|e| match e {
        PipelineError::Io { .. } => StageError::new(Stage::Parse, e),
        e => StageError::from(e),
    })?;
    let rows_scanned = outcome.scanned;

    let dataset =
        select(outcome.dataset, columns).map_err(|e| StageError::new(Stage::Filter, e))?;
    let output =
        save(&dataset, output, spec, policy).map_err(|e| StageError::new(Stage::Save, e))?;

    Ok(Saved {
        output,
        rows_scanned,
        rows_written: dataset.len(),
    })
}

async fn blocking<T, F>(stage: Stage, f: F) -> Result<T, StageError>
where
    F: FnOnce() -> crate::error::Result<T> + Send + 'static,
    T: Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(res) => res.map_err(|e| StageError::new(stage, e)),
        Err(e) => Err(join_error(stage, e)),
    }
}

fn join_error(stage: Stage, e: tokio::task::JoinError) -> StageError {
    if e.is_panic() {
        std::panic::resume_unwind(e.into_panic());
    }
    StageError::new(
        stage,
        PipelineError::io("<blocking task>", io::Error::new(io::ErrorKind::Other, e)),
    )
}
