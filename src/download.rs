use anyhow::Result;
use futures_util::TryStreamExt;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::fs;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

/// Byte-range operations against the archive's HTTPS endpoints. Implemented
/// by the authenticated [`crate::auth::Session`].
pub trait ArchiveOps {
    async fn content_length(self: &Self, url: &str) -> Result<u64>;

    async fn get_range(self: &Self, url: &str, start_byte: u64) -> Result<reqwest::Response>;
}

#[derive(Deserialize, Serialize, Debug)]
pub struct DownloadTask {
    url: String,
    output: String,
}

impl DownloadTask {
    pub fn new(url: &str, output: &str) -> Self {
        DownloadTask {
            url: url.to_string(),
            output: output.to_string(),
        }
    }

    pub fn output(&self) -> &Path {
        Path::new(&self.output)
    }
}

#[derive(Deserialize, Serialize, Debug)]
pub struct DownloadPlan {
    tasks: Vec<DownloadTask>,
}

impl DownloadPlan {
    pub fn new(tasks: Vec<DownloadTask>) -> Self {
        Self { tasks }
    }

    pub fn tasks(&self) -> &[DownloadTask] {
        &self.tasks
    }

    #[allow(dead_code)]
    pub fn read<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let plan: Self = serde_json::from_str(&content)?;
        Ok(plan)
    }

    pub fn write<P: AsRef<Path>>(self: &Self, path: P) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Download every task in order, blocking until all files exist locally.
    pub async fn execute(self: &Self, archive: &impl ArchiveOps) -> Result<()> {
        for task in self.tasks.iter() {
            info!("current task: {:?}", task);
            try_download(archive, &task.url, &task.output).await?;
        }
        Ok(())
    }
}

pub async fn try_download(archive: &impl ArchiveOps, url: &str, output: &str) -> Result<()> {
    // Check if the output file already exists; return early if so
    let dst = Path::new(output);
    if dst.exists() {
        debug!("output file already exists: {output}");
        return Ok(());
    }

    // Make parent directories as necessary
    if let Some(parent_dir) = dst.parent() {
        if !parent_dir.exists() {
            fs::create_dir_all(parent_dir)?;
        }
    }

    // Check if partial file exists and get its size
    let partial = format!("{}.partial", output);
    let mut partial_file = OpenOptions::new()
        .read(true)
        .create(true)
        .append(true)
        .open(&partial)?;
    let mut byte_count = partial_file.metadata()?.len();

    let total_size = archive.content_length(url).await?;

    let progress = (byte_count as f64 / total_size as f64) * 100.;
    if progress > 0.0 {
        info!("resuming download from {:.2}% completion", progress);
    }

    if byte_count < total_size {
        debug!("downloading {url}");

        let response = archive.get_range(url, byte_count).await?;
        let mut stream = response.bytes_stream();

        while let Some(bytes) = stream.try_next().await? {
            let bytes_len = bytes.len() as u64;
            partial_file.write_all(&bytes)?;
            byte_count += bytes_len;
        }
    }

    debug!("download complete: {output}");
    // Rename the file to remove .partial suffix
    fs::rename(partial, dst)?;

    Ok(())
}
