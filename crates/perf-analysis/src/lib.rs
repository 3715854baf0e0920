//! Reduction of raw trace records into tabular summaries, plus collection of
//! trace files a previous run left on disk.
//!
//! Both reductions are pure functions over record slices; rows only exist
//! for groups with at least one contributing record, so no mean is ever
//! taken over an empty set.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};

use perf_core::trace::read_trace_file;
use perf_core::{Stage, TraceRecord, Variant};

/// Ordered named columns over rows of string cells. Cells absent from a row
/// serialize as empty fields.
#[derive(Debug, Clone)]
pub struct SummaryTable {
    pub columns: Vec<String>,
    pub rows: Vec<BTreeMap<String, String>>,
}

impl SummaryTable {
    pub fn cell(&self, row: usize, column: &str) -> Option<&str> {
        self.rows.get(row).and_then(|r| r.get(column)).map(String::as_str)
    }
}

fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let collected: Vec<f64> = values.collect();
    if collected.is_empty() {
        return None;
    }
    Some(collected.iter().sum::<f64>() / collected.len() as f64)
}

/// Time-series reduction: one row per (repository, stage), one column per
/// observed version count, cells holding the mean stage seconds across the
/// runs that share the count. Counts never observed for a repository leave
/// the cell empty; no zero-fill.
pub fn time_series(records: &[TraceRecord], stages: &[Stage]) -> SummaryTable {
    let mut by_name: BTreeMap<&str, BTreeMap<u64, Vec<&TraceRecord>>> = BTreeMap::new();
    let mut counts: BTreeSet<u64> = BTreeSet::new();
    for record in records {
        counts.insert(record.no_versions);
        by_name
            .entry(record.name.as_str())
            .or_default()
            .entry(record.no_versions)
            .or_default()
            .push(record);
    }

    let mut columns = vec!["name".to_string(), "stage".to_string()];
    columns.extend(counts.iter().map(|c| c.to_string()));

    let mut rows = Vec::new();
    for (name, buckets) in &by_name {
        for &stage in stages {
            let mut row = BTreeMap::new();
            row.insert("name".to_string(), name.to_string());
            row.insert("stage".to_string(), stage.wire_key().to_string());
            for (count, bucket) in buckets {
                let value = mean(bucket.iter().map(|r| r.stage_seconds(stage)))
                    .expect("bucket holds at least one record");
                row.insert(count.to_string(), value.to_string());
            }
            rows.push(row);
        }
    }

    SummaryTable { columns, rows }
}

/// Comparison reduction: one row per repository, four stage columns per
/// variant prefix. `version_count` and `avg_files_per_version` come from the
/// baseline variant when it contributed, else from the first variant that
/// did. Variants with no records for a repository leave their cells empty.
pub fn comparison(groups: &[(Variant, Vec<TraceRecord>)]) -> SummaryTable {
    let mut columns = vec![
        "name".to_string(),
        "version_count".to_string(),
        "avg_files_per_version".to_string(),
    ];
    for (variant, _) in groups {
        for stage in Stage::ALL {
            columns.push(format!("{}{}", variant.prefix(), stage.column_stem()));
        }
    }

    let mut names: BTreeSet<&str> = BTreeSet::new();
    for (_, records) in groups {
        for record in records {
            names.insert(record.name.as_str());
        }
    }

    let mut rows = Vec::new();
    for name in names {
        let mut row = BTreeMap::new();
        row.insert("name".to_string(), name.to_string());

        let mut meta: Option<(u64, f64)> = None;
        for (variant, records) in groups {
            let mine: Vec<&TraceRecord> =
                records.iter().filter(|r| r.name == name).collect();
            if mine.is_empty() {
                continue;
            }

            if meta.is_none() || *variant == Variant::BASE {
                let avg = mean(mine.iter().map(|r| r.avg_files_per_version))
                    .expect("mine holds at least one record");
                meta = Some((mine[0].no_versions, avg));
            }

            for stage in Stage::ALL {
                let value = mean(mine.iter().map(|r| r.stage_seconds(stage)))
                    .expect("mine holds at least one record");
                row.insert(
                    format!("{}{}", variant.prefix(), stage.column_stem()),
                    value.to_string(),
                );
            }
        }

        // names came from the records, so some variant contributed
        let (version_count, avg_files) = meta.expect("row has a contributing variant");
        row.insert("version_count".to_string(), version_count.to_string());
        row.insert("avg_files_per_version".to_string(), avg_files.to_string());
        rows.push(row);
    }

    SummaryTable { columns, rows }
}

pub fn write_csv(table: &SummaryTable, path: &Path) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("failed to create {}", path.display()))?;
    writer.write_record(&table.columns)?;
    for row in &table.rows {
        let cells: Vec<&str> = table
            .columns
            .iter()
            .map(|c| row.get(c).map(String::as_str).unwrap_or(""))
            .collect();
        writer.write_record(&cells)?;
    }
    writer.flush()?;
    Ok(())
}

/// Flat per-run record dump, one CSV row per trial.
pub fn write_records_csv(records: &[TraceRecord], path: &Path) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("failed to create {}", path.display()))?;
    for record in records {
        writer.serialize(record)?;
    }
    writer.flush()?;
    Ok(())
}

/// Run index encoded in a tagged trace file name, or `0` for a one-shot
/// capture. `None` when the name does not belong to the variant.
///
/// The baseline's file suffix is empty, so the character after the prefix
/// must start the version count; otherwise `perf_trace_4_versions.json`
/// and `perf_trace_no_mt_4_versions.json` would both match the baseline.
pub fn parse_tagged_trace_name(file_name: &str, variant: &Variant) -> Option<usize> {
    let prefix = format!("perf_trace{}_", variant.file_suffix());
    let rest = file_name.strip_prefix(&prefix)?.strip_suffix(".json")?;

    let (count, tail) = rest.split_once('_')?;
    if count.is_empty() || !count.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    if tail == "versions" {
        return Some(0);
    }
    let run = tail.strip_prefix("versions_")?;
    if run.is_empty() || !run.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    run.parse().ok()
}

fn repo_dirs(repos_dir: &Path) -> Result<Vec<(String, std::path::PathBuf)>> {
    let mut dirs = Vec::new();
    for entry in fs::read_dir(repos_dir)
        .with_context(|| format!("failed to read {}", repos_dir.display()))?
    {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            dirs.push((entry.file_name().to_string_lossy().to_string(), entry.path()));
        }
    }
    dirs.sort();
    Ok(dirs)
}

/// Gather version-count-tagged traces for one variant from every repository
/// in the corpus: both one-shot captures (`..._<n>_versions.json`) and kept
/// sweep traces (`..._<n>_versions_<run>.json`).
pub fn collect_tagged(repos_dir: &Path, variant: &Variant) -> Result<Vec<TraceRecord>> {
    let mut records = Vec::new();
    for (name, repo_dir) in repo_dirs(repos_dir)? {
        for entry in fs::read_dir(&repo_dir)
            .with_context(|| format!("failed to read {}", repo_dir.display()))?
        {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let file_name = entry.file_name().to_string_lossy().to_string();
            let Some(run) = parse_tagged_trace_name(&file_name, variant) else {
                continue;
            };
            let mut record = read_trace_file(&entry.path())?;
            record.name = name.clone();
            record.run = run;
            records.push(record);
        }
    }
    Ok(records)
}

/// Gather untagged per-variant captures (`perf_trace<suffix>.json`) for
/// comparison mode. Repositories missing a variant's file simply contribute
/// nothing for that variant.
pub fn collect_variants(
    repos_dir: &Path,
    variants: &[Variant],
) -> Result<Vec<(Variant, Vec<TraceRecord>)>> {
    let mut groups: Vec<(Variant, Vec<TraceRecord>)> =
        variants.iter().map(|v| (*v, Vec::new())).collect();
    for (name, repo_dir) in repo_dirs(repos_dir)? {
        for (variant, records) in groups.iter_mut() {
            let path = repo_dir.join(format!("perf_trace{}.json", variant.file_suffix()));
            if !path.exists() {
                continue;
            }
            let mut record = read_trace_file(&path)?;
            record.name = name.clone();
            record.run = 1;
            records.push(record);
        }
    }
    Ok(groups)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn record(name: &str, run: usize, no_versions: u64, infer_rt: f64) -> TraceRecord {
        TraceRecord {
            name: name.to_string(),
            run,
            no_versions,
            avg_files_per_version: 10.0,
            load_versions_rt: 0.5,
            infer_rt,
            saving_rt: 0.1,
            total_rt: 0.6 + infer_rt,
        }
    }

    fn temp_dir(tag: &str) -> PathBuf {
        let micros = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_micros();
        let dir = std::env::temp_dir().join(format!(
            "vhi_perf_analysis_{}_{}_{}",
            tag,
            std::process::id(),
            micros
        ));
        fs::create_dir_all(&dir).expect("temp dir");
        dir
    }

    fn trace_json(no_versions: u64, infer_rt: f64) -> String {
        format!(
            r#"{{"no_versions":{},"avg_files_per_version":3.0,
                "load_versions_rt":0.4,"infer_rt":{},"saving_rt":0.1,"total_rt":1.0}}"#,
            no_versions, infer_rt
        )
    }

    #[test]
    fn time_series_means_runs_within_a_bucket() {
        let records = vec![
            record("R", 1, 4, 1.0),
            record("R", 2, 4, 2.0),
            record("R", 3, 4, 3.0),
        ];
        let table = time_series(&records, &[Stage::Infer]);

        assert_eq!(table.columns, vec!["name", "stage", "4"]);
        assert_eq!(table.rows.len(), 1);
        assert_eq!(table.cell(0, "name"), Some("R"));
        assert_eq!(table.cell(0, "stage"), Some("infer"));
        assert_eq!(table.cell(0, "4"), Some("2"));
    }

    #[test]
    fn time_series_leaves_unobserved_buckets_absent() {
        let records = vec![
            record("alpha", 1, 2, 1.0),
            record("alpha", 1, 4, 2.0),
            record("beta", 1, 2, 5.0),
        ];
        let table = time_series(&records, &[Stage::Infer]);

        assert_eq!(table.columns, vec!["name", "stage", "2", "4"]);
        assert_eq!(table.rows.len(), 2);
        assert_eq!(table.cell(0, "name"), Some("alpha"));
        assert_eq!(table.cell(0, "4"), Some("2"));
        assert_eq!(table.cell(1, "name"), Some("beta"));
        assert_eq!(table.cell(1, "2"), Some("5"));
        assert_eq!(table.cell(1, "4"), None);
    }

    #[test]
    fn time_series_over_nothing_is_empty() {
        let table = time_series(&[], &[Stage::LoadVersions, Stage::Infer]);
        assert_eq!(table.columns, vec!["name", "stage"]);
        assert!(table.rows.is_empty());
    }

    #[test]
    fn comparison_emits_variant_prefixed_columns() {
        let base = vec![record("R", 1, 6, 2.0)];
        let no_mt = vec![record("R", 1, 6, 8.0)];
        let table = comparison(&[(Variant::NO_MT, no_mt), (Variant::BASE, base)]);

        assert!(table.columns.contains(&"no_mt_infer_s".to_string()));
        assert!(table.columns.contains(&"base_total_s".to_string()));
        assert_eq!(table.rows.len(), 1);
        assert_eq!(table.cell(0, "name"), Some("R"));
        assert_eq!(table.cell(0, "version_count"), Some("6"));
        assert_eq!(table.cell(0, "no_mt_infer_s"), Some("8"));
        assert_eq!(table.cell(0, "base_infer_s"), Some("2"));
    }

    #[test]
    fn comparison_tolerates_a_missing_variant() {
        let base = vec![record("R", 1, 6, 2.0)];
        let table = comparison(&[(Variant::BASE, base), (Variant::NO_DEFENDER, Vec::new())]);

        assert_eq!(table.rows.len(), 1);
        assert_eq!(table.cell(0, "base_infer_s"), Some("2"));
        assert_eq!(table.cell(0, "no_defender_infer_s"), None);
    }

    #[test]
    fn comparison_over_nothing_is_empty() {
        let table = comparison(&[(Variant::BASE, Vec::new())]);
        assert!(table.rows.is_empty());
    }

    #[test]
    fn csv_serializes_columns_in_order_with_empty_gaps() {
        let dir = temp_dir("csv");
        let path = dir.join("out.csv");
        let records = vec![record("alpha", 1, 2, 1.0), record("beta", 1, 4, 2.0)];
        let table = time_series(&records, &[Stage::Infer]);
        write_csv(&table, &path).expect("write");

        let contents = fs::read_to_string(&path).expect("read back");
        let mut lines = contents.lines();
        assert_eq!(lines.next(), Some("name,stage,2,4"));
        assert_eq!(lines.next(), Some("alpha,infer,1,"));
        assert_eq!(lines.next(), Some("beta,infer,,2"));

        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn records_csv_has_one_row_per_trial() {
        let dir = temp_dir("records_csv");
        let path = dir.join("records.csv");
        write_records_csv(&[record("R", 1, 2, 1.0), record("R", 2, 2, 1.5)], &path)
            .expect("write");

        let contents = fs::read_to_string(&path).expect("read back");
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(
            lines[0],
            "name,run,no_versions,avg_files_per_version,load_versions_rt,infer_rt,saving_rt,total_rt"
        );
        assert!(lines[1].starts_with("R,1,2,"));

        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn tagged_names_parse_for_their_variant_only() {
        let no_defender = Variant::NO_DEFENDER;
        assert_eq!(
            parse_tagged_trace_name("perf_trace_no_defender_4_versions.json", &no_defender),
            Some(0)
        );
        assert_eq!(
            parse_tagged_trace_name("perf_trace_no_defender_4_versions_2.json", &no_defender),
            Some(2)
        );
        assert_eq!(
            parse_tagged_trace_name("perf_trace_4_versions.json", &no_defender),
            None
        );

        // the baseline's empty suffix must not swallow other variants' files
        let base = Variant::BASE;
        assert_eq!(parse_tagged_trace_name("perf_trace_4_versions.json", &base), Some(0));
        assert_eq!(
            parse_tagged_trace_name("perf_trace_no_mt_4_versions.json", &base),
            None
        );
        assert_eq!(parse_tagged_trace_name("perf_trace.json", &base), None);
        assert_eq!(
            parse_tagged_trace_name("perf_trace_4_versions.json.bak", &base),
            None
        );
    }

    #[test]
    fn collect_tagged_reads_only_matching_files() {
        let root = temp_dir("collect_tagged");
        let repo = root.join("demo");
        fs::create_dir(&repo).expect("repo");
        fs::create_dir(repo.join("v1")).expect("version dir is ignored by collection");
        fs::write(
            repo.join("perf_trace_no_defender_4_versions.json"),
            trace_json(4, 2.0),
        )
        .expect("trace");
        fs::write(
            repo.join("perf_trace_no_defender_6_versions_2.json"),
            trace_json(6, 3.0),
        )
        .expect("trace");
        fs::write(repo.join("perf_trace_no_mt_4_versions.json"), trace_json(4, 9.0))
            .expect("trace");

        let records = collect_tagged(&root, &Variant::NO_DEFENDER).expect("collect");
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.name == "demo"));
        assert!(records.iter().any(|r| r.no_versions == 4 && r.run == 0));
        assert!(records.iter().any(|r| r.no_versions == 6 && r.run == 2));

        let base_records = collect_tagged(&root, &Variant::BASE).expect("collect");
        assert!(base_records.is_empty());

        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn collect_variants_pairs_files_with_their_variant() {
        let root = temp_dir("collect_variants");
        let repo = root.join("demo");
        fs::create_dir(&repo).expect("repo");
        fs::write(repo.join("perf_trace.json"), trace_json(5, 2.0)).expect("trace");
        fs::write(repo.join("perf_trace_no_mt.json"), trace_json(5, 8.0)).expect("trace");

        let groups =
            collect_variants(&root, &[Variant::BASE, Variant::NO_MT, Variant::NO_DEFENDER])
                .expect("collect");
        assert_eq!(groups[0].1.len(), 1);
        assert_eq!(groups[1].1.len(), 1);
        assert!(groups[2].1.is_empty());
        assert_eq!(groups[1].1[0].infer_rt, 8.0);

        let _ = fs::remove_dir_all(root);
    }
}
