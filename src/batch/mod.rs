//! Directory-driven batch processing.
//!
//! Every `.eml` file in the input directory is reconstructed on the blocking
//! pool, at most `workers` at a time. Output for one input is written to a
//! staging directory and renamed into place only once complete, so a failed or
//! cancelled file leaves nothing behind in the output directory.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::{self, JoinSet};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::assemble::{render_markdown, sanitize_filename};
use crate::config::Config;
use crate::error::ThreadError;
use crate::pipeline::{self, EngineConfig};

pub const REPORT_FILE: &str = "thread.json";

type Job = (PathBuf, crate::error::Result<ProcessedFile>);

#[derive(Debug, Clone, Serialize)]
pub struct ProcessedFile {
    pub input: PathBuf,
    pub output_dir: PathBuf,
    pub document: PathBuf,
    pub messages: usize,
    pub duplicates_dropped: usize,
    pub attachments: usize,
    pub diagnostics: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct FailedFile {
    pub input: PathBuf,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchSummary {
    pub processed: Vec<ProcessedFile>,
    pub failed: Vec<FailedFile>,
    pub cancelled: Vec<PathBuf>,
}

impl BatchSummary {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty() && self.cancelled.is_empty()
    }
}

/// Lists `.eml` files (extension compared case-insensitively) in name order.
pub fn list_inputs(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = fs::read_dir(dir).with_context(|| format!("Failed to read input directory {}", dir.display()))?;

    let mut inputs = Vec::new();
    for entry in entries {
        let entry = entry.with_context(|| format!("Failed to list input directory {}", dir.display()))?;
        let path = entry.path();
        let is_eml = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("eml"));
        if is_eml && path.is_file() {
            inputs.push(path);
        }
    }
    inputs.sort();
    Ok(inputs)
}

/// Picks one output folder name per input, in input order.
///
/// The name is the sanitized file stem, or `thread` when the stem is not
/// UTF-8. Names are compared case-insensitively and a clash gets a `_2`,
/// `_3`... suffix, so no two inputs of a batch share a folder.
pub fn output_names(inputs: &[PathBuf]) -> Vec<String> {
    let mut used = HashSet::new();
    inputs
        .iter()
        .map(|input| {
            let stem = input
                .file_stem()
                .and_then(|s| s.to_str())
                .map(sanitize_filename)
                .unwrap_or_else(|| "thread".to_string());
            let mut name = stem.clone();
            let mut n = 2;
            while !used.insert(name.to_lowercase()) {
                name = format!("{}_{}", stem, n);
                n += 1;
            }
            name
        })
        .collect()
}

/// Processes every input file found under `config.input_dir`.
///
/// Per-file failures are collected in the summary. Only inaccessible input or
/// output locations fail the batch as a whole.
pub async fn run_batch(config: &Config, cancel: CancellationToken) -> Result<BatchSummary> {
    let mut dirs = vec![&config.input_dir, &config.output_dir];
    dirs.extend(config.done_dir.as_ref());
    for dir in dirs {
        fs::create_dir_all(dir).with_context(|| format!("Failed to create directory {}", dir.display()))?;
    }

    let inputs = list_inputs(&config.input_dir)?;
    tracing::info!(
        "Found {} input file(s) in {}, processing with {} worker(s)",
        inputs.len(),
        config.input_dir.display(),
        config.workers
    );

    let semaphore = Arc::new(Semaphore::new(config.workers));
    let engine = config.engine();
    let names = output_names(&inputs);
    let mut summary = BatchSummary::default();
    let mut jobs = JoinSet::new();
    let mut running = HashMap::new();

    for (input, name) in inputs.into_iter().zip(names) {
        let permit = tokio::select! {
            permit = Arc::clone(&semaphore).acquire_owned() => {
                permit.context("Worker semaphore closed unexpectedly")?
            }
            _ = cancel.cancelled() => {
                tracing::info!("Cancellation requested, not starting {}", input.display());
                summary.cancelled.push(input);
                continue;
            }
        };

        let output_dir = config.output_dir.join(&name);
        let done_dir = config.done_dir.clone();
        let cancel = cancel.clone();
        let job_input = input.clone();
        let handle = jobs.spawn_blocking(move || {
            let _permit = permit;
            let result = process_file(&job_input, &output_dir, done_dir.as_deref(), &engine, &cancel);
            (job_input, result)
        });
        running.insert(handle.id(), input);
    }

    collect_results(&mut jobs, &mut running, &mut summary).await;

    summary.processed.sort_by(|a, b| a.input.cmp(&b.input));
    summary.failed.sort_by(|a, b| a.input.cmp(&b.input));
    summary.cancelled.sort();
    Ok(summary)
}

/// Drains finished jobs into the summary.
///
/// A job that panicked is recorded as a failure of the input it was started
/// for, looked up in `running` by task id. The remaining jobs still run to
/// completion.
async fn collect_results(
    jobs: &mut JoinSet<Job>,
    running: &mut HashMap<task::Id, PathBuf>,
    summary: &mut BatchSummary,
) {
    while let Some(joined) = jobs.join_next_with_id().await {
        let (input, result) = match joined {
            Ok((id, job)) => {
                running.remove(&id);
                job
            }
            Err(e) => {
                let input = running.remove(&e.id()).unwrap_or_default();
                tracing::error!("Worker for {} stopped: {}", input.display(), e);
                summary.failed.push(FailedFile {
                    input,
                    error: format!("Worker stopped: {}", e),
                });
                continue;
            }
        };

        match result {
            Ok(processed) => {
                tracing::info!(
                    "Processed: {} -> {} ({} message(s), {} duplicate(s) dropped)",
                    input.display(),
                    processed.document.display(),
                    processed.messages,
                    processed.duplicates_dropped
                );
                summary.processed.push(processed);
            }
            Err(ThreadError::Cancelled) => {
                tracing::info!("Cancelled: {}", input.display());
                summary.cancelled.push(input);
            }
            Err(e) => {
                tracing::error!("Error processing {}: {}", input.display(), e);
                summary.failed.push(FailedFile {
                    input,
                    error: e.to_string(),
                });
            }
        }
    }
}

fn check_cancelled(cancel: &CancellationToken) -> crate::error::Result<()> {
    if cancel.is_cancelled() {
        return Err(ThreadError::Cancelled);
    }
    Ok(())
}

/// Reconstructs one file and commits it as the directory `final_dir`.
///
/// The directory is staged next to `final_dir` and renamed into place. A
/// directory left there by an earlier run is replaced.
pub fn process_file(
    input: &Path,
    final_dir: &Path,
    done_dir: Option<&Path>,
    engine: &EngineConfig,
    cancel: &CancellationToken,
) -> crate::error::Result<ProcessedFile> {
    check_cancelled(cancel)?;

    let raw = fs::read(input).map_err(|e| ThreadError::io(input, e))?;
    let thread = pipeline::process(&raw, engine)?;
    let rendered = render_markdown(&thread);
    check_cancelled(cancel)?;

    let folder = final_dir
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("thread");
    let document_name = format!("{}.md", folder);
    let output_root = final_dir.parent().unwrap_or_else(|| Path::new("."));
    let staging = output_root.join(format!(".staging-{}", Uuid::new_v4()));

    let written = write_staging(&staging, &document_name, &rendered, cancel);
    if let Err(e) = written {
        let _ = fs::remove_dir_all(&staging);
        return Err(e);
    }

    if final_dir.exists() {
        log::warn!("Replacing existing output {}", final_dir.display());
        if let Err(e) = fs::remove_dir_all(final_dir) {
            let _ = fs::remove_dir_all(&staging);
            return Err(ThreadError::io(final_dir, e));
        }
    }
    if let Err(e) = fs::rename(&staging, final_dir) {
        let _ = fs::remove_dir_all(&staging);
        return Err(ThreadError::io(final_dir, e));
    }

    if let Some(done) = done_dir {
        move_to_done(input, done)?;
    }

    Ok(ProcessedFile {
        input: input.to_path_buf(),
        document: final_dir.join(&document_name),
        output_dir: final_dir.to_path_buf(),
        messages: thread.len(),
        duplicates_dropped: thread.duplicates_dropped(),
        attachments: rendered.attachments.len(),
        diagnostics: thread.diagnostics.len(),
    })
}

fn write_staging(
    staging: &Path,
    document_name: &str,
    rendered: &crate::assemble::RenderedThread,
    cancel: &CancellationToken,
) -> crate::error::Result<()> {
    fs::create_dir_all(staging).map_err(|e| ThreadError::io(staging, e))?;

    let document_path = staging.join(document_name);
    fs::write(&document_path, &rendered.document).map_err(|e| ThreadError::io(&document_path, e))?;

    let report_path = staging.join(REPORT_FILE);
    let report = rendered
        .report_json()
        .map_err(|e| ThreadError::io(&report_path, std::io::Error::other(e)))?;
    fs::write(&report_path, report).map_err(|e| ThreadError::io(&report_path, e))?;

    for attachment in &rendered.attachments {
        check_cancelled(cancel)?;
        let path = staging.join(&attachment.filename);
        if path == document_path || path == report_path {
            log::warn!(
                "Attachment '{}' collides with a generated file, skipping it",
                attachment.filename
            );
            continue;
        }
        fs::write(&path, &attachment.data).map_err(|e| ThreadError::io(&path, e))?;
    }

    check_cancelled(cancel)
}

fn move_to_done(input: &Path, done: &Path) -> crate::error::Result<()> {
    let Some(name) = input.file_name() else {
        return Ok(());
    };
    let target = done.join(name);
    if fs::rename(input, &target).is_ok() {
        log::debug!("Moved {} to {}", input.display(), target.display());
        return Ok(());
    }
    // rename fails across filesystems
    fs::copy(input, &target).map_err(|e| ThreadError::io(&target, e))?;
    fs::remove_file(input).map_err(|e| ThreadError::io(input, e))?;
    log::debug!("Copied {} to {}", input.display(), target.display());
    Ok(())
}
