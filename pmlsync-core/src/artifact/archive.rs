//! Archive extraction: interim download → named ZIP → single renamed CSV.
//!
//! Layout after a successful extraction: `{working_dir}/{prefix}_{SUBSYSTEM}.csv`.
//! The ZIP itself is removed once its tabular file has been written.

use regex::Regex;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use thiserror::Error;
use tracing::{debug, info};

use crate::domain::Subsystem;

/// Errors extracting one subsystem's export. Fatal for that subsystem only.
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("archive I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("corrupt archive {}: {reason}", path.display())]
    Corrupt { path: PathBuf, reason: String },

    #[error("archive {} contains no files", path.display())]
    Empty { path: PathBuf },
}

fn io_err(path: &Path) -> impl FnOnce(io::Error) -> ArchiveError + '_ {
    move |source| ArchiveError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// A per-subsystem tabular file ready for validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadedArtifact {
    pub subsystem: Subsystem,
    pub path: PathBuf,
}

/// Deterministic artifact name, e.g. `PML_MDA_BCA.csv`.
pub fn artifact_file_name(prefix: &str, subsystem: Subsystem) -> String {
    format!("{prefix}_{}.csv", subsystem.as_str())
}

/// Filename announced by a `Content-Disposition` header, without any path part.
pub fn attachment_filename(content_disposition: &str) -> Option<String> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    let re = RE
        .get_or_init(|| Regex::new(r#"filename=(?:"([^"]+)"|([^;]+))"#).ok())
        .as_ref()?;
    let caps = re.captures(content_disposition)?;
    let raw = caps.get(1).or_else(|| caps.get(2))?.as_str().trim();
    let name = raw.rsplit(|c: char| c == '/' || c == '\\').next()?.trim();
    if name.is_empty() || name == "." || name == ".." {
        return None;
    }
    Some(name.to_string())
}

/// Unpacks downloaded exports into renamed per-subsystem artifacts.
#[derive(Debug, Clone)]
pub struct ArchiveExtractor {
    working_dir: PathBuf,
    prefix: String,
    interim_name: String,
}

impl ArchiveExtractor {
    pub fn new(
        working_dir: impl Into<PathBuf>,
        prefix: impl Into<String>,
        interim_name: impl Into<String>,
    ) -> Self {
        Self {
            working_dir: working_dir.into(),
            prefix: prefix.into(),
            interim_name: interim_name.into(),
        }
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    /// Where the driver writes the raw export body.
    pub fn interim_path(&self) -> PathBuf {
        self.working_dir.join(&self.interim_name)
    }

    /// Final location of a subsystem's artifact.
    pub fn artifact_path(&self, subsystem: Subsystem) -> PathBuf {
        self.working_dir
            .join(artifact_file_name(&self.prefix, subsystem))
    }

    /// Persist `body` at the interim path.
    pub fn write_interim(&self, body: &[u8]) -> Result<PathBuf, ArchiveError> {
        let path = self.interim_path();
        fs::create_dir_all(&self.working_dir).map_err(io_err(&self.working_dir))?;
        fs::write(&path, body).map_err(io_err(&path))?;
        Ok(path)
    }

    /// Turn the interim download into the subsystem's artifact.
    ///
    /// 1. Move the interim file to the name announced by `content_disposition`
    ///    (kept as-is when no name is announced).
    /// 2. Unpack the single tabular entry next to it.
    /// 3. Delete the archive.
    /// 4. Rename the entry to [`artifact_file_name`].
    pub fn extract(
        &self,
        subsystem: Subsystem,
        content_disposition: Option<&str>,
    ) -> Result<DownloadedArtifact, ArchiveError> {
        let interim = self.interim_path();
        let archive_name = content_disposition
            .and_then(attachment_filename)
            .unwrap_or_else(|| self.interim_name.clone());
        let archive_path = self.working_dir.join(&archive_name);

        if archive_path != interim {
            fs::rename(&interim, &archive_path).map_err(io_err(&interim))?;
        }
        info!(subsystem = %subsystem, archive = %archive_path.display(), "archive saved");

        let extracted = match self.unpack(&archive_path) {
            Ok(path) => path,
            Err(e) => {
                let _ = fs::remove_file(&archive_path);
                return Err(e);
            }
        };

        fs::remove_file(&archive_path).map_err(io_err(&archive_path))?;
        debug!(archive = %archive_path.display(), "archive removed");

        let target = self.artifact_path(subsystem);
        if extracted != target {
            fs::rename(&extracted, &target).map_err(io_err(&extracted))?;
        }
        info!(subsystem = %subsystem, artifact = %target.display(), "artifact ready");

        Ok(DownloadedArtifact {
            subsystem,
            path: target,
        })
    }

    /// Write the chosen entry of `archive_path` into the working directory.
    fn unpack(&self, archive_path: &Path) -> Result<PathBuf, ArchiveError> {
        let corrupt = |e: zip::result::ZipError| ArchiveError::Corrupt {
            path: archive_path.to_path_buf(),
            reason: e.to_string(),
        };

        let file = File::open(archive_path).map_err(io_err(archive_path))?;
        let mut archive = zip::ZipArchive::new(file).map_err(corrupt)?;

        let mut entries: Vec<(usize, String)> = Vec::new();
        for i in 0..archive.len() {
            let entry = archive.by_index(i).map_err(corrupt)?;
            if !entry.is_file() {
                continue;
            }
            let name = entry
                .enclosed_name()
                .and_then(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()));
            if let Some(name) = name {
                entries.push((i, name));
            }
        }

        let stem = archive_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let chosen = entries
            .iter()
            .find(|(_, name)| {
                Path::new(name)
                    .file_stem()
                    .is_some_and(|s| s.to_string_lossy() == stem.as_str())
            })
            .or_else(|| {
                entries
                    .iter()
                    .find(|(_, name)| name.to_ascii_lowercase().ends_with(".csv"))
            })
            .or_else(|| entries.first())
            .cloned()
            .ok_or_else(|| ArchiveError::Empty {
                path: archive_path.to_path_buf(),
            })?;

        if entries.len() > 1 {
            debug!(entries = entries.len(), chosen = %chosen.1, "archive has several files");
        }

        let (index, name) = chosen;
        let out_path = self.working_dir.join(&name);
        let mut entry = archive.by_index(index).map_err(corrupt)?;
        let mut out = File::create(&out_path).map_err(io_err(&out_path))?;
        io::copy(&mut entry, &mut out).map_err(io_err(&out_path))?;

        Ok(out_path)
    }
}

/// Remove every artifact `{prefix}_{SUBSYSTEM}.csv` in `working_dir`.
///
/// Returns the paths that were deleted.
pub fn delete_artifacts(working_dir: &Path, prefix: &str) -> Result<Vec<PathBuf>, ArchiveError> {
    let mut removed = Vec::new();
    for subsystem in Subsystem::ALL {
        let path = working_dir.join(artifact_file_name(prefix, subsystem));
        match fs::remove_file(&path) {
            Ok(()) => {
                info!(path = %path.display(), "deleted artifact");
                removed.push(path);
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(source) => return Err(ArchiveError::Io { path, source }),
        }
    }
    Ok(removed)
}
