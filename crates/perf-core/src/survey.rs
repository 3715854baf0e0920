//! Corpus inspection: how many version directories a repository holds and how
//! large they are on average.

use std::path::Path;

use walkdir::WalkDir;

use crate::error::Result;
use crate::versions;

#[derive(Debug, Clone)]
pub struct RepoSurvey {
    pub name: String,
    pub version_dirs: usize,
    pub avg_files_per_version: f64,
}

pub fn survey_repo(repo_dir: &Path) -> Result<RepoSurvey> {
    let entries = versions::scan_versions(repo_dir)?;
    let dirs: Vec<_> = entries.iter().filter(|e| e.is_dir).collect();

    let mut total_files = 0usize;
    for dir in &dirs {
        total_files += WalkDir::new(repo_dir.join(&dir.name))
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .count();
    }

    let avg_files_per_version = if dirs.is_empty() {
        0.0
    } else {
        total_files as f64 / dirs.len() as f64
    };

    Ok(RepoSurvey {
        name: repo_dir
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default(),
        version_dirs: dirs.len(),
        avg_files_per_version,
    })
}
