//! Ingest command handler.
//!
//! Uploads files, waits for each job to finish and saves the snapshot.

use super::open_engine;
use clap::Args;
use ragbridge_core::{config::AppConfig, AppError, AppResult};
use ragbridge_knowledge::{mime_for_path, IngestRequest, JobStatus, RagEngine};
use std::path::{Path, PathBuf};
use std::time::Duration;
use walkdir::WalkDir;

/// Upload files or directories and wait for them to be indexed
#[derive(Args, Debug)]
pub struct IngestCommand {
    /// Files or directories to upload
    #[arg(required = true)]
    pub paths: Vec<PathBuf>,

    /// Re-upload a single file under an existing document id
    #[arg(long)]
    pub file_id: Option<String>,

    /// Status poll interval in milliseconds
    #[arg(long, default_value = "200")]
    pub poll_ms: u64,
}

impl IngestCommand {
    pub async fn execute(&self, config: &AppConfig) -> AppResult<()> {
        tracing::info!("Executing ingest command");

        let files = collect_files(&self.paths);
        if files.is_empty() {
            return Err(AppError::InvalidInput("No files found to ingest".to_string()));
        }
        if self.file_id.is_some() && files.len() > 1 {
            return Err(AppError::InvalidInput(
                "--file-id can only be used with a single file".to_string(),
            ));
        }

        let engine = open_engine(config).await?;

        let mut completed = 0usize;
        let mut failed = 0usize;

        for path in &files {
            match self.ingest_file(&engine, path).await {
                Ok(JobStatus::Completed) => completed += 1,
                Ok(_) => failed += 1,
                Err(e) => {
                    println!("{}: {}", path.display(), e);
                    failed += 1;
                }
            }
        }

        let snapshot = engine.snapshot().await?;
        tracing::debug!(path = %snapshot.display(), "Saved snapshot");

        println!("Ingested {} file(s), {} failed", completed, failed);
        Ok(())
    }

    async fn ingest_file(&self, engine: &RagEngine, path: &Path) -> AppResult<JobStatus> {
        let bytes = tokio::fs::read(path).await?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        let mut request = IngestRequest::new(bytes, mime_for_path(path), name);
        if let Some(file_id) = &self.file_id {
            request = request.with_file_id(file_id.clone());
        }

        let job_id = engine.ingest(request).await?;
        let mut last_line = String::new();

        loop {
            let job = engine.get_job_status(&job_id).await?;
            let line = job.format_simple();
            if line != last_line {
                println!("{} {}", path.display(), line);
                last_line = line;
            }
            if job.status.is_terminal() {
                return Ok(job.status);
            }
            tokio::time::sleep(Duration::from_millis(self.poll_ms)).await;
        }
    }
}

/// Expand directories into the files beneath them, skipping hidden entries.
fn collect_files(paths: &[PathBuf]) -> Vec<PathBuf> {
    let mut files = Vec::new();

    for path in paths {
        if path.is_file() {
            files.push(path.clone());
            continue;
        }

        for entry in WalkDir::new(path)
            .follow_links(false)
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !e.file_name().to_string_lossy().starts_with('.'))
        {
            match entry {
                Ok(entry) if entry.file_type().is_file() => files.push(entry.into_path()),
                Ok(_) => {}
                Err(e) => tracing::warn!("Skipping unreadable entry: {}", e),
            }
        }
    }

    files.sort();
    files
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_collect_files_walks_directories() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("a.txt"), "a").unwrap();
        std::fs::create_dir(temp.path().join("nested")).unwrap();
        std::fs::write(temp.path().join("nested").join("b.md"), "b").unwrap();
        std::fs::create_dir(temp.path().join(".hidden")).unwrap();
        std::fs::write(temp.path().join(".hidden").join("c.txt"), "c").unwrap();

        let files = collect_files(&[temp.path().to_path_buf()]);
        assert_eq!(files.len(), 2);
        assert!(files.iter().all(|f| !f.to_string_lossy().contains(".hidden")));
    }
}
