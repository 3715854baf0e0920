//! Activation control for the version directories inside a test repository.
//!
//! A version directory is inactive iff its name carries the `ignore_` prefix;
//! toggling that prefix is the only mutation this module performs. Decision
//! logic (`plan_activation`) is pure and separated from the renames
//! (`apply_plan`) so the selection rules can be tested without touching disk.

use std::fs;
use std::path::Path;

use crate::error::{Error, Result};

pub const INACTIVE_PREFIX: &str = "ignore_";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionEntry {
    pub name: String,
    pub active: bool,
    pub is_dir: bool,
}

impl VersionEntry {
    /// Name with the inactive marker stripped, if present.
    pub fn canonical_name(&self) -> &str {
        self.name.strip_prefix(INACTIVE_PREFIX).unwrap_or(&self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rename {
    pub from: String,
    pub to: String,
}

#[derive(Debug, Clone)]
pub struct ActivationPlan {
    pub renames: Vec<Rename>,
    pub active_count: usize,
    pub achieved: bool,
}

/// Enumerate the immediate children of `repo_dir`, sorted lexicographically
/// by canonical name so that "the first k" is reproducible across
/// filesystems.
pub fn scan_versions(repo_dir: &Path) -> Result<Vec<VersionEntry>> {
    let mut entries = Vec::new();
    for entry in fs::read_dir(repo_dir).map_err(|e| Error::fs(repo_dir, e))? {
        let entry = entry.map_err(|e| Error::fs(repo_dir, e))?;
        let name = entry.file_name().to_string_lossy().to_string();
        let is_dir = entry
            .file_type()
            .map_err(|e| Error::fs(entry.path(), e))?
            .is_dir();
        let active = !name.starts_with(INACTIVE_PREFIX);
        entries.push(VersionEntry {
            name,
            active,
            is_dir,
        });
    }
    entries.sort_by(|a, b| a.canonical_name().cmp(b.canonical_name()));
    Ok(entries)
}

/// Decide the minimal rename set that leaves exactly `k` directories active,
/// or as many as exist when the repository has fewer than `k`.
///
/// Non-directory children are never counted, but a stray marker on one is
/// stripped as a housekeeping fix-up. Entries already in the desired state
/// produce no rename.
pub fn plan_activation(entries: &[VersionEntry], k: usize) -> ActivationPlan {
    let mut renames = Vec::new();
    let mut active_count = 0usize;

    for entry in entries {
        if !entry.is_dir {
            if !entry.active {
                renames.push(Rename {
                    from: entry.name.clone(),
                    to: entry.canonical_name().to_string(),
                });
            }
            continue;
        }

        let include = active_count < k;
        if include {
            active_count += 1;
        }
        if include != entry.active {
            let to = if include {
                entry.canonical_name().to_string()
            } else {
                format!("{}{}", INACTIVE_PREFIX, entry.canonical_name())
            };
            renames.push(Rename {
                from: entry.name.clone(),
                to,
            });
        }
    }

    ActivationPlan {
        renames,
        active_count,
        achieved: active_count == k,
    }
}

pub fn apply_plan(repo_dir: &Path, plan: &ActivationPlan) -> Result<()> {
    for rename in &plan.renames {
        let from = repo_dir.join(&rename.from);
        let to = repo_dir.join(&rename.to);
        fs::rename(&from, &to).map_err(|e| Error::fs(from.clone(), e))?;
    }
    Ok(())
}

/// Mark exactly `k` version directories active and the rest inactive.
///
/// Returns `true` iff `k` active directories were achieved. `false` means
/// the repository is exhausted: it has fewer than `k` eligible directories,
/// all of which are left active.
pub fn set_active_count(repo_dir: &Path, k: usize) -> Result<bool> {
    let entries = scan_versions(repo_dir)?;
    let plan = plan_activation(&entries, k);
    apply_plan(repo_dir, &plan)?;
    Ok(plan.achieved)
}
