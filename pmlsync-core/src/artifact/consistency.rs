//! Consistency gate between download and merge.
//!
//! The portal sometimes answers several subsystems with the same cached file,
//! or with a report for a different day. Before anything is merged:
//! 1. every subsystem artifact must exist;
//! 2. no two artifacts may be byte-identical;
//! 3. the `Fecha:` label must be present and identical in all of them.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{error, info};

use super::archive::artifact_file_name;
use crate::domain::Subsystem;

/// Label preceding the report date inside each artifact.
pub const DEFAULT_DATE_LABEL: &str = "Fecha:";

/// Reasons the merge is refused. All of them abort the pipeline before publish.
#[derive(Debug, Error)]
pub enum ConsistencyError {
    #[error("artifact not found: {} (all subsystem files must be downloaded)", path.display())]
    MissingArtifact { path: PathBuf },

    #[error("failed to read artifact {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("artifacts for {first} and {second} are identical; refusing to merge")]
    IdenticalArtifacts { first: Subsystem, second: Subsystem },

    #[error("artifact for {subsystem} has no date label ({})", path.display())]
    MissingDateLabel { subsystem: Subsystem, path: PathBuf },

    #[error("artifact dates disagree: {}", describe_labels(labels))]
    DateMismatch { labels: Vec<(Subsystem, String)> },
}

fn describe_labels(labels: &[(Subsystem, String)]) -> String {
    labels
        .iter()
        .map(|(s, l)| format!("{s}={l}"))
        .collect::<Vec<_>>()
        .join(", ")
}

/// One artifact that passed the gate.
#[derive(Debug, Clone)]
pub struct ValidatedArtifact {
    pub subsystem: Subsystem,
    pub path: PathBuf,
    /// Decoded file content.
    pub text: String,
    /// BLAKE3 hex digest of the raw bytes.
    pub fingerprint: String,
}

/// The full artifact set, cleared for merging.
#[derive(Debug, Clone)]
pub struct ValidatedArtifacts {
    /// Date label shared by every artifact, e.g. `02/may/2024`.
    pub date_label: String,
    /// One entry per subsystem, in subsystem order.
    pub artifacts: Vec<ValidatedArtifact>,
}

/// Text following `label` on the first line that contains it.
///
/// Surrounding whitespace, quotes and trailing commas are removed. An empty
/// remainder counts as absent.
pub fn extract_date_label(text: &str, label: &str) -> Option<String> {
    let line = text.lines().find(|line| line.contains(label))?;
    let (_, rest) = line.split_once(label)?;
    let value = rest.trim_matches(|c: char| c.is_whitespace() || c == '"' || c == ',');
    (!value.is_empty()).then(|| value.to_string())
}

/// Decode artifact bytes: UTF-8 when valid, otherwise Latin-1.
pub fn decode_artifact(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(s) => s.trim_start_matches('\u{feff}').to_string(),
        Err(_) => bytes.iter().map(|&b| b as char).collect(),
    }
}

/// Checks the per-subsystem artifacts in a working directory.
#[derive(Debug, Clone)]
pub struct ConsistencyValidator {
    working_dir: PathBuf,
    prefix: String,
    date_label: String,
}

impl ConsistencyValidator {
    pub fn new(working_dir: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        Self {
            working_dir: working_dir.into(),
            prefix: prefix.into(),
            date_label: DEFAULT_DATE_LABEL.to_string(),
        }
    }

    pub fn with_date_label(mut self, label: impl Into<String>) -> Self {
        self.date_label = label.into();
        self
    }

    fn path_for(&self, subsystem: Subsystem) -> PathBuf {
        self.working_dir.join(artifact_file_name(&self.prefix, subsystem))
    }

    /// Run the gate over all subsystems.
    pub fn validate(&self) -> Result<ValidatedArtifacts, ConsistencyError> {
        // Existence first, so a missing file is reported before any content check.
        let paths: Vec<(Subsystem, PathBuf)> = Subsystem::ALL
            .iter()
            .map(|&s| (s, self.path_for(s)))
            .collect();
        if let Some((_, path)) = paths.iter().find(|(_, p)| !p.is_file()) {
            error!(path = %path.display(), "required artifact not found");
            return Err(ConsistencyError::MissingArtifact { path: path.clone() });
        }

        let mut raw: Vec<(Subsystem, PathBuf, Vec<u8>)> = Vec::with_capacity(paths.len());
        for (subsystem, path) in paths {
            let bytes = read(&path)?;
            raw.push((subsystem, path, bytes));
        }

        for i in 0..raw.len() {
            for j in (i + 1)..raw.len() {
                if raw[i].2 == raw[j].2 {
                    error!(
                        first = %raw[i].1.display(),
                        second = %raw[j].1.display(),
                        "artifacts are identical; skipping merge"
                    );
                    return Err(ConsistencyError::IdenticalArtifacts {
                        first: raw[i].0,
                        second: raw[j].0,
                    });
                }
            }
        }
        info!("all artifacts are different");

        let mut artifacts = Vec::with_capacity(raw.len());
        let mut labels = Vec::with_capacity(raw.len());
        for (subsystem, path, bytes) in raw {
            let text = decode_artifact(&bytes);
            let label = extract_date_label(&text, &self.date_label).ok_or_else(|| {
                ConsistencyError::MissingDateLabel {
                    subsystem,
                    path: path.clone(),
                }
            })?;
            labels.push((subsystem, label));
            artifacts.push(ValidatedArtifact {
                subsystem,
                path,
                text,
                fingerprint: blake3::hash(&bytes).to_hex().to_string(),
            });
        }

        let date_label = labels[0].1.clone();
        if labels.iter().any(|(_, l)| *l != date_label) {
            error!(labels = %describe_labels(&labels), "artifact dates do not match");
            return Err(ConsistencyError::DateMismatch { labels });
        }
        info!(date = %date_label, "dates match; proceeding to merge");

        Ok(ValidatedArtifacts {
            date_label,
            artifacts,
        })
    }
}

fn read(path: &Path) -> Result<Vec<u8>, ConsistencyError> {
    fs::read(path).map_err(|source| ConsistencyError::Io {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn artifact(date: &str, node: &str) -> String {
        format!(
            "\"Precios de energia en el MDA\"\n\"Fecha: {date}\"\nHora,Clave del nodo\n1,{node}\n"
        )
    }

    fn write_all(dir: &Path, contents: [&str; 3]) {
        for (s, c) in Subsystem::ALL.iter().zip(contents) {
            fs::write(dir.join(artifact_file_name("PML_MDA", *s)), c).unwrap();
        }
    }

    #[test]
    fn date_label_trims_quotes_and_commas() {
        assert_eq!(
            extract_date_label("x\n\"Fecha: 02/may/2024\",,\n", "Fecha:").as_deref(),
            Some("02/may/2024")
        );
        assert_eq!(extract_date_label("Fecha:   \n", "Fecha:"), None);
        assert_eq!(extract_date_label("no label here", "Fecha:"), None);
    }

    #[test]
    fn latin1_fallback() {
        assert_eq!(decode_artifact(b"energ\xeda"), "energía");
        assert_eq!(decode_artifact("energía".as_bytes()), "energía");
    }

    #[test]
    fn distinct_artifacts_with_same_date_pass() {
        let dir = tempfile::tempdir().unwrap();
        let (a, b, c) = (
            artifact("02/may/2024", "A"),
            artifact("02/may/2024", "B"),
            artifact("02/may/2024", "C"),
        );
        write_all(dir.path(), [a.as_str(), b.as_str(), c.as_str()]);

        let validated = ConsistencyValidator::new(dir.path(), "PML_MDA").validate().unwrap();
        assert_eq!(validated.date_label, "02/may/2024");
        assert_eq!(validated.artifacts.len(), 3);
        assert_eq!(validated.artifacts[1].subsystem, Subsystem::Bca);
        assert_ne!(validated.artifacts[0].fingerprint, validated.artifacts[1].fingerprint);
    }

    #[test]
    fn identical_pair_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (a, c) = (artifact("02/may/2024", "A"), artifact("02/may/2024", "C"));
        write_all(dir.path(), [a.as_str(), c.as_str(), c.as_str()]);

        let err = ConsistencyValidator::new(dir.path(), "PML_MDA").validate().unwrap_err();
        assert!(matches!(
            err,
            ConsistencyError::IdenticalArtifacts {
                first: Subsystem::Bca,
                second: Subsystem::Bcs
            }
        ));
    }

    #[test]
    fn date_mismatch_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (a, b, c) = (
            artifact("02/may/2024", "A"),
            artifact("03/may/2024", "B"),
            artifact("02/may/2024", "C"),
        );
        write_all(dir.path(), [a.as_str(), b.as_str(), c.as_str()]);

        let err = ConsistencyValidator::new(dir.path(), "PML_MDA").validate().unwrap_err();
        match err {
            ConsistencyError::DateMismatch { labels } => {
                assert_eq!(labels[1], (Subsystem::Bca, "03/may/2024".to_string()));
            }
            other => panic!("expected DateMismatch, got {other}"),
        }
    }

    #[test]
    fn missing_date_label_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (a, c) = (artifact("02/may/2024", "A"), artifact("02/may/2024", "C"));
        write_all(dir.path(), [a.as_str(), "Hora,Clave del nodo\n1,B\n", c.as_str()]);

        let err = ConsistencyValidator::new(dir.path(), "PML_MDA").validate().unwrap_err();
        assert!(matches!(
            err,
            ConsistencyError::MissingDateLabel { subsystem: Subsystem::Bca, .. }
        ));
    }

    #[test]
    fn missing_file_names_exact_path() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("PML_MDA_SIN.csv"), artifact("02/may/2024", "A")).unwrap();
        fs::write(dir.path().join("PML_MDA_BCS.csv"), artifact("02/may/2024", "C")).unwrap();

        let err = ConsistencyValidator::new(dir.path(), "PML_MDA").validate().unwrap_err();
        match err {
            ConsistencyError::MissingArtifact { path } => {
                assert_eq!(path, dir.path().join("PML_MDA_BCA.csv"));
            }
            other => panic!("expected MissingArtifact, got {other}"),
        }
    }
}
