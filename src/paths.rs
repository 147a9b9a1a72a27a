use anyhow::{bail, Result};
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// One input file scheduled for ingestion.
#[derive(Clone, Debug)]
pub struct FileJob {
    pub path: PathBuf,
    pub size: u64,
}

impl FileJob {
    pub fn name(&self) -> String {
        file_label(&self.path)
    }
}

/// File name for logs and reports, falling back to the full path.
pub fn file_label(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Regular files directly under `dir` whose names match `pattern`, sorted by name.
pub fn discover_inputs(dir: &Path, pattern: &Regex) -> Result<Vec<FileJob>> {
    if !dir.is_dir() {
        bail!("input directory {} does not exist", dir.display());
    }
    let mut jobs = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
        let ent = match entry {
            Ok(ent) => ent,
            Err(e) => {
                tracing::warn!(error = %e, "skipping unreadable directory entry");
                continue;
            }
        };
        if !ent.file_type().is_file() {
            continue;
        }
        let Some(name) = ent.file_name().to_str() else { continue };
        if pattern.is_match(name) {
            let size = fs::metadata(ent.path()).map(|m| m.len()).unwrap_or(0);
            jobs.push(FileJob { path: ent.path().to_path_buf(), size });
        }
    }
    jobs.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(jobs)
}

pub fn total_size(files: &[FileJob]) -> u64 {
    files.iter().map(|j| j.size).sum()
}
