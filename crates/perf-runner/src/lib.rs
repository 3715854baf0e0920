//! Trial execution and sweep orchestration for the `vhi` inference tool.
//!
//! The orchestration is strictly sequential: every trial mutates the
//! repository directory (activation renames, cache-bypass renames), so
//! nothing here runs concurrently. The only blocking points are the child
//! process wait and ordinary file I/O.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use perf_core::trace::read_trace_file;
use perf_core::{versions, Error, TraceRecord, Variant};

/// Telemetry file name used when traces are transient. Deleted after every
/// count iteration.
pub const TEMP_TRACE_NAME: &str = "perf_trace_tmp.json";

/// Repositories with fewer version directories than this are skipped by the
/// corpus drivers.
pub const MIN_VERSIONS: usize = 2;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepConfig {
    pub repos_dir: PathBuf,
    pub tool: PathBuf,
    #[serde(default = "default_version_counts")]
    pub version_counts: Vec<usize>,
    #[serde(default = "default_runs_per_count")]
    pub runs_per_count: usize,
    #[serde(default = "default_variant")]
    pub variant: Variant,
    #[serde(default)]
    pub save_traces: bool,
    #[serde(default = "default_true")]
    pub tag_with_version_count: bool,
    /// Operator assertion that background file scanning is off. Checked
    /// before any trial when the variant claims scanner-free timing.
    #[serde(default)]
    pub scanner_disabled: bool,
    #[serde(default)]
    pub continue_on_error: bool,
}

fn default_version_counts() -> Vec<usize> {
    (2..=20).step_by(2).collect()
}

fn default_runs_per_count() -> usize {
    5
}

fn default_variant() -> Variant {
    Variant::NO_DEFENDER
}

fn default_true() -> bool {
    true
}

impl SweepConfig {
    pub fn new(repos_dir: PathBuf, tool: PathBuf) -> Self {
        SweepConfig {
            repos_dir,
            tool,
            version_counts: default_version_counts(),
            runs_per_count: default_runs_per_count(),
            variant: default_variant(),
            save_traces: false,
            tag_with_version_count: true,
            scanner_disabled: false,
            continue_on_error: false,
        }
    }

    pub fn validate(&self) -> perf_core::Result<()> {
        if self.version_counts.is_empty() {
            return Err(Error::Config("version_counts must not be empty".into()));
        }
        if self.version_counts.contains(&0) {
            return Err(Error::Config("version_counts entries must be positive".into()));
        }
        if self.runs_per_count == 0 {
            return Err(Error::Config("runs_per_count must be at least 1".into()));
        }
        Ok(())
    }
}

pub fn load_config(path: &Path) -> Result<SweepConfig> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read config: {}", path.display()))?;
    let config: SweepConfig = serde_yaml::from_str(&raw)
        .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
    config.validate()?;
    Ok(config)
}

/// Name of a kept sweep trace: `perf_trace<suffix>_<count>_versions_<run>.json`.
pub fn sweep_trace_name(variant: &Variant, count: usize, run: usize) -> String {
    format!(
        "perf_trace{}_{}_versions_{}.json",
        variant.file_suffix(),
        count,
        run
    )
}

/// Name of a one-shot capture trace, optionally tagged with the version count.
pub fn capture_trace_name(variant: &Variant, count: Option<usize>) -> String {
    match count {
        Some(count) => format!("perf_trace{}_{}_versions.json", variant.file_suffix(), count),
        None => format!("perf_trace{}.json", variant.file_suffix()),
    }
}

#[derive(Debug, Clone)]
pub struct TrialOptions {
    pub multithreading: bool,
    /// Telemetry file name; the tool resolves it relative to the target
    /// directory.
    pub trace_name: String,
}

/// Run one blocking invocation of the inference tool against `repo_dir` and
/// parse the telemetry it wrote. A non-zero exit status and a missing or
/// malformed telemetry file are both fatal; nothing is retried.
pub fn run_trial(tool: &Path, repo_dir: &Path, options: &TrialOptions) -> Result<TraceRecord> {
    let mut cmd = Command::new(tool);
    cmd.arg("infer").arg("-d");
    if !options.multithreading {
        cmd.arg("--no-multithreading");
    }
    cmd.arg("-p").arg(&options.trace_name);
    cmd.arg(repo_dir);

    let status = cmd
        .status()
        .map_err(|e| Error::fs(tool.to_path_buf(), e))
        .with_context(|| format!("failed to launch {}", tool.display()))?;
    if !status.success() {
        return Err(Error::ToolExit { status }.into());
    }

    let trace_path = repo_dir.join(&options.trace_name);
    let record = read_trace_file(&trace_path)?;
    Ok(record)
}

/// Scoped hold on a repository directory while trials rename it for cache
/// bypass. `restore` puts the canonical name back and propagates rename
/// failures; `Drop` retries best-effort so the directory never stays under a
/// suffixed name on an error path.
struct RepoLease {
    repos_dir: PathBuf,
    canonical: String,
    current: PathBuf,
    restored: bool,
}

impl RepoLease {
    fn new(repos_dir: &Path, name: &str) -> Self {
        RepoLease {
            repos_dir: repos_dir.to_path_buf(),
            canonical: name.to_string(),
            current: repos_dir.join(name),
            restored: false,
        }
    }

    fn dir(&self) -> &Path {
        &self.current
    }

    /// Rename to the unique per-run name so the tool cannot hit a cache keyed
    /// by directory identity. The `_bench_` infix keeps the name from
    /// colliding with a sibling repository.
    fn shift(&mut self, run: usize) -> perf_core::Result<()> {
        let next = self.repos_dir.join(format!("{}_bench_{}", self.canonical, run));
        fs::rename(&self.current, &next).map_err(|e| Error::fs(self.current.clone(), e))?;
        self.current = next;
        Ok(())
    }

    fn restore(&mut self) -> perf_core::Result<()> {
        let home = self.repos_dir.join(&self.canonical);
        if self.current != home {
            fs::rename(&self.current, &home).map_err(|e| Error::fs(self.current.clone(), e))?;
            self.current = home;
        }
        self.restored = true;
        Ok(())
    }
}

impl Drop for RepoLease {
    fn drop(&mut self) {
        if !self.restored {
            let home = self.repos_dir.join(&self.canonical);
            if self.current != home {
                let _ = fs::rename(&self.current, &home);
            }
        }
    }
}

fn check_scanner_precondition(config: &SweepConfig) -> perf_core::Result<()> {
    if config.variant.scanner_disabled && !config.scanner_disabled {
        return Err(Error::Precondition(
            "variant claims scanner-free timing but the scanner_disabled assertion is absent; \
             disable background file scanning and pass --scanner-disabled"
                .into(),
        ));
    }
    Ok(())
}

/// Sweep one repository across `version_counts`, `runs_per_count` trials
/// each. Stops early when the repository runs out of versions (the remaining
/// larger counts are unreachable too). Returns the captured records in
/// execution order; a trial failure is fatal to the whole call after the
/// directory name and transient telemetry have been cleaned up.
pub fn run_sweep(
    repos_dir: &Path,
    repo_name: &str,
    config: &SweepConfig,
) -> Result<Vec<TraceRecord>> {
    check_scanner_precondition(config)?;

    let mut records = Vec::new();
    for &count in &config.version_counts {
        let canonical = repos_dir.join(repo_name);
        let achieved = versions::set_active_count(&canonical, count)?;
        if !achieved {
            info!(repo = repo_name, count, "version pool exhausted, ending sweep");
            break;
        }

        let mut lease = RepoLease::new(repos_dir, repo_name);
        let outcome = run_trials_for_count(&mut lease, repo_name, count, config, &mut records);
        let cleanup = release_lease(&mut lease, config);
        outcome?;
        cleanup?;
    }
    Ok(records)
}

fn run_trials_for_count(
    lease: &mut RepoLease,
    repo_name: &str,
    count: usize,
    config: &SweepConfig,
    records: &mut Vec<TraceRecord>,
) -> Result<()> {
    for run in 1..=config.runs_per_count {
        info!(repo = repo_name, versions = count, run, "starting trial");
        lease.shift(run)?;

        let trace_name = if config.save_traces {
            sweep_trace_name(&config.variant, count, run)
        } else {
            TEMP_TRACE_NAME.to_string()
        };
        let options = TrialOptions {
            multithreading: config.variant.multithreading,
            trace_name,
        };
        let mut record = run_trial(&config.tool, lease.dir(), &options)?;
        record.name = repo_name.to_string();
        record.run = run;
        records.push(record);
    }
    Ok(())
}

/// Release half of the lease scope: drop the transient telemetry file, then
/// hand the canonical name back. Runs on every exit path of a count
/// iteration; the trial's own error takes precedence when both fail.
fn release_lease(lease: &mut RepoLease, config: &SweepConfig) -> Result<()> {
    if !config.save_traces {
        let tmp = lease.dir().join(TEMP_TRACE_NAME);
        if tmp.exists() {
            fs::remove_file(&tmp).map_err(|e| Error::fs(tmp.clone(), e))?;
        }
    }
    lease.restore()?;
    Ok(())
}

/// Sorted names of the repository directories inside a corpus directory.
pub fn list_repos(repos_dir: &Path) -> perf_core::Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in fs::read_dir(repos_dir).map_err(|e| Error::fs(repos_dir.to_path_buf(), e))? {
        let entry = entry.map_err(|e| Error::fs(repos_dir.to_path_buf(), e))?;
        let is_dir = entry
            .file_type()
            .map_err(|e| Error::fs(entry.path(), e))?
            .is_dir();
        if is_dir {
            names.push(entry.file_name().to_string_lossy().to_string());
        }
    }
    names.sort();
    Ok(names)
}

/// Sweep every repository in the corpus, handing each repository's records to
/// `sink` as soon as they exist so the caller can persist incrementally. A
/// repository failure aborts the whole run unless `continue_on_error` is set,
/// in which case it is logged and the remaining repositories still run.
pub fn run_corpus<F>(config: &SweepConfig, mut sink: F) -> Result<()>
where
    F: FnMut(&str, &[TraceRecord]) -> Result<()>,
{
    check_scanner_precondition(config)?;

    for name in list_repos(&config.repos_dir)? {
        let repo_dir = config.repos_dir.join(&name);
        let survey = perf_core::survey::survey_repo(&repo_dir)?;
        if survey.version_dirs < MIN_VERSIONS {
            info!(repo = %name, versions = survey.version_dirs, "too few versions, skipping");
            continue;
        }

        match run_sweep(&config.repos_dir, &name, config) {
            Ok(records) => sink(&name, &records)?,
            Err(err) if config.continue_on_error => {
                warn!(repo = %name, error = %err, "sweep failed, continuing with next repository");
            }
            Err(err) => return Err(err),
        }
    }
    Ok(())
}

/// One tool invocation per repository at its natural version count, leaving a
/// named per-variant trace file behind for later aggregation.
pub fn capture_corpus(config: &SweepConfig) -> Result<Vec<TraceRecord>> {
    check_scanner_precondition(config)?;

    let mut records = Vec::new();
    for name in list_repos(&config.repos_dir)? {
        let repo_dir = config.repos_dir.join(&name);
        let survey = perf_core::survey::survey_repo(&repo_dir)?;
        if survey.version_dirs < MIN_VERSIONS {
            info!(repo = %name, versions = survey.version_dirs, "too few versions, skipping");
            continue;
        }

        // Make sure nothing is left deactivated by an interrupted sweep.
        versions::set_active_count(&repo_dir, survey.version_dirs)?;

        let count = config.tag_with_version_count.then_some(survey.version_dirs);
        let options = TrialOptions {
            multithreading: config.variant.multithreading,
            trace_name: capture_trace_name(&config.variant, count),
        };
        info!(repo = %name, versions = survey.version_dirs, "capturing trace");

        match run_trial(&config.tool, &repo_dir, &options) {
            Ok(mut record) => {
                record.name = name.clone();
                record.run = 1;
                records.push(record);
            }
            Err(err) if config.continue_on_error => {
                warn!(repo = %name, error = %err, "capture failed, continuing with next repository");
            }
            Err(err) => return Err(err),
        }
    }
    Ok(records)
}

fn sha256_file(path: &Path) -> Result<String> {
    let bytes = fs::read(path).map_err(|e| Error::fs(path.to_path_buf(), e))?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(hex::encode(hasher.finalize()))
}

/// Provenance manifest written next to the output CSV once a sweep completes.
pub fn write_run_manifest(path: &Path, config: &SweepConfig, record_count: usize) -> Result<()> {
    let manifest = json!({
        "schema_version": "perf_run_manifest_v1",
        "created_at": Utc::now().to_rfc3339(),
        "tool": config.tool.display().to_string(),
        "tool_sha256": sha256_file(&config.tool)?,
        "variant": config.variant.label(),
        "version_counts": config.version_counts,
        "runs_per_count": config.runs_per_count,
        "save_traces": config.save_traces,
        "records": record_count,
    });
    let bytes = serde_json::to_vec_pretty(&manifest)?;
    fs::write(path, bytes).map_err(|e| Error::fs(path.to_path_buf(), e))?;
    Ok(())
}
