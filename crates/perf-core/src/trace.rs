//! Wire model for the telemetry record the inference tool writes per run.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Named timing stages reported by the tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    LoadVersions,
    Infer,
    Saving,
    Total,
}

impl Stage {
    pub const ALL: [Stage; 4] = [Stage::LoadVersions, Stage::Infer, Stage::Saving, Stage::Total];

    /// Field stem used in the telemetry JSON (`<key>_rt`).
    pub fn wire_key(self) -> &'static str {
        match self {
            Stage::LoadVersions => "load_versions",
            Stage::Infer => "infer",
            Stage::Saving => "saving",
            Stage::Total => "total",
        }
    }

    /// Column stem used in comparison CSV output (`<prefix><stem>`).
    pub fn column_stem(self) -> &'static str {
        match self {
            Stage::LoadVersions => "load_s",
            Stage::Infer => "infer_s",
            Stage::Saving => "save_s",
            Stage::Total => "total_s",
        }
    }

    pub fn parse(name: &str) -> Option<Stage> {
        Stage::ALL.into_iter().find(|s| s.wire_key() == name)
    }
}

/// One trial's telemetry as emitted by `vhi infer -p`. The `name` and `run`
/// tags are absent from the wire format; the orchestrator (or the saved-trace
/// collector) fills them in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceRecord {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub run: usize,
    pub no_versions: u64,
    pub avg_files_per_version: f64,
    pub load_versions_rt: f64,
    pub infer_rt: f64,
    pub saving_rt: f64,
    pub total_rt: f64,
}

impl TraceRecord {
    pub fn stage_seconds(&self, stage: Stage) -> f64 {
        match stage {
            Stage::LoadVersions => self.load_versions_rt,
            Stage::Infer => self.infer_rt,
            Stage::Saving => self.saving_rt,
            Stage::Total => self.total_rt,
        }
    }
}

/// Read and validate a telemetry file. Missing file, malformed JSON, and
/// negative durations all surface as `Error::Telemetry`.
pub fn read_trace_file(path: &Path) -> Result<TraceRecord> {
    let bytes = fs::read(path).map_err(|e| Error::telemetry(path, format!("read failed: {}", e)))?;
    let record: TraceRecord = serde_json::from_slice(&bytes)
        .map_err(|e| Error::telemetry(path, format!("invalid telemetry JSON: {}", e)))?;
    for stage in Stage::ALL {
        let secs = record.stage_seconds(stage);
        if secs < 0.0 {
            return Err(Error::telemetry(
                path,
                format!("negative duration for {}: {}", stage.wire_key(), secs),
            ));
        }
    }
    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::time::{SystemTime, UNIX_EPOCH};

    const SAMPLE: &str = r#"{
        "no_versions": 4,
        "avg_files_per_version": 12.5,
        "load_versions_rt": 0.81,
        "infer_rt": 2.45,
        "saving_rt": 0.05,
        "total_rt": 3.31
    }"#;

    fn temp_file(tag: &str, contents: &str) -> PathBuf {
        let micros = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_micros();
        let path = std::env::temp_dir().join(format!(
            "vhi_perf_trace_{}_{}_{}.json",
            tag,
            std::process::id(),
            micros
        ));
        fs::write(&path, contents).expect("trace file");
        path
    }

    #[test]
    fn parses_wire_format_and_defaults_tags() {
        let path = temp_file("ok", SAMPLE);
        let record = read_trace_file(&path).expect("parse");
        assert_eq!(record.no_versions, 4);
        assert_eq!(record.name, "");
        assert_eq!(record.run, 0);
        assert_eq!(record.stage_seconds(Stage::Infer), 2.45);
        assert_eq!(record.stage_seconds(Stage::Total), 3.31);
        let _ = fs::remove_file(path);
    }

    #[test]
    fn missing_file_is_a_telemetry_error() {
        let path = std::env::temp_dir().join("vhi_perf_trace_does_not_exist.json");
        let err = read_trace_file(&path).expect_err("should fail");
        assert!(matches!(err, Error::Telemetry { .. }));
    }

    #[test]
    fn rejects_negative_durations() {
        let path = temp_file(
            "neg",
            r#"{"no_versions":1,"avg_files_per_version":1.0,
                "load_versions_rt":0.1,"infer_rt":-0.5,"saving_rt":0.0,"total_rt":0.6}"#,
        );
        let err = read_trace_file(&path).expect_err("should fail");
        assert!(err.to_string().contains("negative duration for infer"));
        let _ = fs::remove_file(path);
    }

    #[test]
    fn stage_names_round_trip() {
        for stage in Stage::ALL {
            assert_eq!(Stage::parse(stage.wire_key()), Some(stage));
        }
        assert_eq!(Stage::parse("warmup"), None);
    }
}
