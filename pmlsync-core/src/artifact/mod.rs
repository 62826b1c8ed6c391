//! Downloaded artifacts: extraction from archives and the pre-merge consistency gate.

pub mod archive;
pub mod consistency;

pub use archive::{
    artifact_file_name, delete_artifacts, ArchiveError, ArchiveExtractor, DownloadedArtifact,
};
pub use consistency::{ConsistencyError, ConsistencyValidator, ValidatedArtifact, ValidatedArtifacts};
