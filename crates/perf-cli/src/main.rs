use anyhow::{anyhow, Result};
use clap::{Args, Parser, Subcommand};
use serde_json::json;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use perf_core::{survey, Stage, TraceRecord, Variant};
use perf_runner::SweepConfig;

#[derive(Parser)]
#[command(
    name = "vhi-perf",
    version,
    about = "Benchmark harness for the vhi version-history-inference tool"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Flags shared by the commands that execute the tool. Values given here
/// override the config file.
#[derive(Args, Clone)]
struct RunArgs {
    /// Sweep configuration file (see `vhi-perf init`)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Corpus directory holding one sub-directory per test repository
    #[arg(long)]
    repos_dir: Option<PathBuf>,

    /// Path to the inference tool binary
    #[arg(long)]
    tool: Option<PathBuf>,

    /// Configuration variant: base | no_mt | no_defender | no_mt_no_defender
    #[arg(long)]
    variant: Option<String>,

    /// Assert that background file scanning is disabled on this machine
    #[arg(long)]
    scanner_disabled: bool,

    /// Log per-repository failures and keep going instead of aborting
    #[arg(long)]
    continue_on_error: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a bench.yaml configuration template
    Init {
        #[arg(long, default_value = "bench.yaml")]
        path: PathBuf,
        #[arg(long)]
        force: bool,
    },
    /// Survey the corpus: version counts and average files per version
    Describe {
        repos_dir: PathBuf,
        #[arg(long)]
        json: bool,
    },
    /// Run the full sweep: per repository, per version count, repeated trials
    Sweep {
        #[command(flatten)]
        run: RunArgs,
        /// Sweep a single repository instead of the whole corpus
        #[arg(long)]
        repo: Option<String>,
        /// Active-version counts to sweep, in order
        #[arg(long, value_delimiter = ',')]
        counts: Option<Vec<usize>>,
        /// Trials per version count
        #[arg(long)]
        runs: Option<usize>,
        /// Keep per-trial trace files instead of deleting them
        #[arg(long)]
        save_traces: bool,
        /// Output CSV path (default: <repos-dir>/time_vs_versions.csv)
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// One tool invocation per repository at its natural version count,
    /// leaving a named per-variant trace file behind
    Capture {
        #[command(flatten)]
        run: RunArgs,
        /// Tag the trace file name with the version count
        #[arg(long)]
        tag_version_count: bool,
    },
    /// Time-series CSV from saved version-count-tagged traces
    Aggregate {
        repos_dir: PathBuf,
        #[arg(long, default_value = "no_defender")]
        variant: String,
        /// Stages to report: load_versions | infer | saving | total
        #[arg(long, value_delimiter = ',', default_value = "load_versions,infer")]
        stages: Vec<String>,
        #[arg(long, default_value = "time_vs_versions.csv")]
        out: PathBuf,
    },
    /// Wide per-repository comparison CSV across configuration variants
    Compare {
        repos_dir: PathBuf,
        #[arg(long, value_delimiter = ',', default_value = "no_mt,base,no_defender")]
        variants: Vec<String>,
        #[arg(long, default_value = "perf_under_cond.csv")]
        out: PathBuf,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    run_command(cli.command)
}

fn run_command(command: Commands) -> Result<()> {
    match command {
        Commands::Init { path, force } => {
            if !force && path.exists() {
                return Err(anyhow!(
                    "config file already exists (use --force): {}",
                    path.display()
                ));
            }
            std::fs::write(&path, CONFIG_TEMPLATE)?;
            println!("wrote: {}", path.display());
            println!("next: edit {} and fill in the fields marked REQUIRED", path.display());
            println!("next: vhi-perf sweep --config {}", path.display());
        }
        Commands::Describe { repos_dir, json } => {
            let mut surveys = Vec::new();
            for name in perf_runner::list_repos(&repos_dir)? {
                surveys.push(survey::survey_repo(&repos_dir.join(&name))?);
            }
            if json {
                let payload = json!({
                    "ok": true,
                    "command": "describe",
                    "repos_dir": repos_dir.display().to_string(),
                    "repos": surveys.iter().map(|s| json!({
                        "name": s.name,
                        "version_dirs": s.version_dirs,
                        "avg_files_per_version": s.avg_files_per_version,
                    })).collect::<Vec<_>>(),
                });
                println!("{}", serde_json::to_string(&payload)?);
                return Ok(());
            }
            for s in &surveys {
                println!(
                    "{}: versions={} avg_files_per_version={:.1}",
                    s.name, s.version_dirs, s.avg_files_per_version
                );
            }
            println!("repos: {}", surveys.len());
        }
        Commands::Sweep {
            run,
            repo,
            counts,
            runs,
            save_traces,
            out,
        } => {
            let mut config = resolve_config(&run)?;
            if let Some(counts) = counts {
                config.version_counts = counts;
            }
            if let Some(runs) = runs {
                config.runs_per_count = runs;
            }
            if save_traces {
                config.save_traces = true;
            }
            config.validate()?;

            let out = out.unwrap_or_else(|| config.repos_dir.join("time_vs_versions.csv"));
            let mut all_records: Vec<TraceRecord> = Vec::new();

            match repo {
                Some(repo) => {
                    let records = perf_runner::run_sweep(&config.repos_dir, &repo, &config)?;
                    all_records.extend(records);
                    perf_analysis::write_records_csv(&all_records, &out)?;
                }
                None => {
                    // Persist after every repository so a late failure keeps
                    // everything gathered so far.
                    let out_ref = &out;
                    let all = &mut all_records;
                    perf_runner::run_corpus(&config, |_name, records| {
                        all.extend_from_slice(records);
                        perf_analysis::write_records_csv(all, out_ref)
                    })?;
                }
            }

            let manifest_path = out.with_extension("manifest.json");
            perf_runner::write_run_manifest(&manifest_path, &config, all_records.len())?;
            println!("records: {}", all_records.len());
            println!("csv: {}", out.display());
            println!("manifest: {}", manifest_path.display());
        }
        Commands::Capture {
            run,
            tag_version_count,
        } => {
            let mut config = resolve_config(&run)?;
            if tag_version_count {
                config.tag_with_version_count = true;
            }
            let records = perf_runner::capture_corpus(&config)?;
            for record in &records {
                println!(
                    "{}: versions={} total_s={}",
                    record.name, record.no_versions, record.total_rt
                );
            }
            println!("captured: {}", records.len());
        }
        Commands::Aggregate {
            repos_dir,
            variant,
            stages,
            out,
        } => {
            let variant = Variant::parse(&variant)?;
            let stages = parse_stages(&stages)?;
            let records = perf_analysis::collect_tagged(&repos_dir, &variant)?;
            let table = perf_analysis::time_series(&records, &stages);
            perf_analysis::write_csv(&table, &out)?;
            println!("records: {}", records.len());
            println!("rows: {}", table.rows.len());
            println!("csv: {}", out.display());
        }
        Commands::Compare {
            repos_dir,
            variants,
            out,
        } => {
            let variants = variants
                .iter()
                .map(|v| Variant::parse(v).map_err(Into::into))
                .collect::<Result<Vec<_>>>()?;
            let groups = perf_analysis::collect_variants(&repos_dir, &variants)?;
            let table = perf_analysis::comparison(&groups);
            perf_analysis::write_csv(&table, &out)?;
            println!("rows: {}", table.rows.len());
            println!("csv: {}", out.display());
        }
    }
    Ok(())
}

fn resolve_config(run: &RunArgs) -> Result<SweepConfig> {
    let mut config = match &run.config {
        Some(path) => perf_runner::load_config(path)?,
        None => {
            let repos_dir = run
                .repos_dir
                .clone()
                .ok_or_else(|| anyhow!("--repos-dir is required without --config"))?;
            let tool = run
                .tool
                .clone()
                .ok_or_else(|| anyhow!("--tool is required without --config"))?;
            SweepConfig::new(repos_dir, tool)
        }
    };

    if let Some(repos_dir) = &run.repos_dir {
        config.repos_dir = repos_dir.clone();
    }
    if let Some(tool) = &run.tool {
        config.tool = tool.clone();
    }
    if let Some(variant) = &run.variant {
        config.variant = Variant::parse(variant)?;
    }
    if run.scanner_disabled {
        config.scanner_disabled = true;
    }
    if run.continue_on_error {
        config.continue_on_error = true;
    }
    Ok(config)
}

fn parse_stages(names: &[String]) -> Result<Vec<Stage>> {
    names
        .iter()
        .map(|name| {
            Stage::parse(name).ok_or_else(|| {
                anyhow!(
                    "unknown stage '{}': expected load_versions|infer|saving|total",
                    name
                )
            })
        })
        .collect()
}

const CONFIG_TEMPLATE: &str = "\
# vhi-perf sweep configuration
repos_dir: ''                  # REQUIRED: corpus directory of test repositories
tool: ''                       # REQUIRED: path to the vhi binary
version_counts: [2, 4, 6, 8, 10, 12, 14, 16, 18, 20]
runs_per_count: 5
variant: no_defender           # base | no_mt | no_defender | no_mt_no_defender
save_traces: false             # keep per-trial trace files
tag_with_version_count: true   # used by `capture` trace names
scanner_disabled: false        # assert background file scanning is off
continue_on_error: false       # isolate per-repository failures
";
