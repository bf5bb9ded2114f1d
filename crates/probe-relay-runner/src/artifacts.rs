//! Local artifact bookkeeping: transcript copy, cursor file, stale probe.

use std::path::{Path, PathBuf};

use probe_relay_core::PROBE_SUFFIX;
use tokio::fs;

/// Local files derived from a remote probe path.
///
/// All three share the probe's base name and live in the work directory:
/// the pulled transcript (`.log`), the persisted tail cursor (`.cursor`),
/// and a possibly stale pulled probe (`.probe`).
#[derive(Debug, Clone)]
pub struct LocalArtifacts {
    dir: PathBuf,
    transcript: PathBuf,
    cursor: PathBuf,
    probe: PathBuf,
}

impl LocalArtifacts {
    /// Compute artifact paths for a probe, under `work_dir` when given,
    /// otherwise under the platform cache directory.
    #[must_use]
    pub fn for_probe(probe: &str, work_dir: Option<&Path>) -> Self {
        let dir = work_dir.map_or_else(default_work_dir, Path::to_path_buf);
        let name = probe.rsplit('/').next().unwrap_or(probe);
        let base = name.strip_suffix(PROBE_SUFFIX).unwrap_or(name);

        Self {
            transcript: dir.join(format!("{base}.log")),
            cursor: dir.join(format!("{base}.cursor")),
            probe: dir.join(format!("{base}.probe")),
            dir,
        }
    }

    /// Path of the local transcript copy.
    #[must_use]
    pub fn transcript(&self) -> &Path {
        &self.transcript
    }

    /// Path of the local cursor file.
    #[must_use]
    pub fn cursor(&self) -> &Path {
        &self.cursor
    }

    /// Path of a stale local probe artifact, if one was ever pulled.
    #[must_use]
    pub fn probe(&self) -> &Path {
        &self.probe
    }

    /// Create the work directory if missing.
    ///
    /// # Errors
    /// Returns error if the directory cannot be created.
    pub async fn ensure_dir(&self) -> std::io::Result<()> {
        fs::create_dir_all(&self.dir).await
    }

    /// Read the persisted cursor; missing or malformed means zero.
    pub async fn read_cursor(&self) -> usize {
        match fs::read_to_string(&self.cursor).await {
            Ok(contents) => contents.trim().parse().unwrap_or(0),
            Err(_) => 0,
        }
    }

    /// Persist the cursor.
    ///
    /// # Errors
    /// Returns error if the write fails.
    pub async fn write_cursor(&self, cursor: usize) -> std::io::Result<()> {
        fs::write(&self.cursor, cursor.to_string()).await
    }

    /// Remove run artifacts. The cursor file and any stale local probe are
    /// always removed; the transcript survives only with `keep_transcript`.
    ///
    /// # Errors
    /// Returns error if a removal fails for a reason other than the file
    /// being absent.
    pub async fn cleanup(&self, keep_transcript: bool) -> std::io::Result<()> {
        remove_if_present(&self.cursor).await?;
        remove_if_present(&self.probe).await?;
        if !keep_transcript {
            remove_if_present(&self.transcript).await?;
        }
        Ok(())
    }
}

async fn remove_if_present(path: &Path) -> std::io::Result<()> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err),
    }
}

fn default_work_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("probe-relay")
}
