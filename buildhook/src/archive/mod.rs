use async_trait::async_trait;
use flate2::{write::GzEncoder, Compression};
use std::fmt::Debug;
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum ArchiveError {
    /// The archive could not be read as an archive at all, or one of its entries is unusable.
    #[error("archive is corrupt or unsupported; {0}")]
    Corrupt(String),

    #[error("could not read or write archive contents; {0}")]
    Io(String),
}

impl From<std::io::Error> for ArchiveError {
    fn from(err: std::io::Error) -> Self {
        ArchiveError::Io(err.to_string())
    }
}

impl From<zip::result::ZipError> for ArchiveError {
    fn from(err: zip::result::ZipError) -> Self {
        match err {
            zip::result::ZipError::Io(e) => ArchiveError::Io(e.to_string()),
            other => ArchiveError::Corrupt(other.to_string()),
        }
    }
}

/// Unpacks an archive on disk into a directory.
#[async_trait]
pub trait Extractor: Debug + Send + Sync + 'static {
    async fn extract(&self, archive: &Path, destination: &Path) -> Result<(), ArchiveError>;
}

/// Extracts zip archives. Entries with paths escaping the destination are refused by the zip
/// reader itself.
#[derive(Debug, Default, Clone)]
pub struct ZipExtractor;

#[async_trait]
impl Extractor for ZipExtractor {
    async fn extract(&self, archive: &Path, destination: &Path) -> Result<(), ArchiveError> {
        let archive = archive.to_path_buf();
        let destination = destination.to_path_buf();

        tokio::task::spawn_blocking(move || extract_zip(&archive, &destination))
            .await
            .map_err(|e| ArchiveError::Io(format!("extraction task did not complete; {e}")))?
    }
}

fn extract_zip(archive: &Path, destination: &Path) -> Result<(), ArchiveError> {
    let file = File::open(archive)?;
    let mut zip = zip::ZipArchive::new(file)?;

    debug!(
        archive = %archive.display(),
        destination = %destination.display(),
        entries = zip.len(),
        "Extracting archive"
    );

    zip.extract(destination)?;

    Ok(())
}

/// Packs the contents of `dir` into a gzip compressed tarball, with entries relative to `dir`.
pub fn pack_directory(dir: &Path) -> Result<Vec<u8>, ArchiveError> {
    let encoder = GzEncoder::new(Vec::new(), Compression::default());
    let mut builder = tar::Builder::new(encoder);
    builder.follow_symlinks(false);

    builder.append_dir_all(".", dir)?;

    let encoder = builder.into_inner()?;
    let packed = encoder.finish()?;

    Ok(packed)
}

/// Async wrapper around [`pack_directory`].
pub async fn pack_directory_async(dir: PathBuf) -> Result<Vec<u8>, ArchiveError> {
    tokio::task::spawn_blocking(move || pack_directory(&dir))
        .await
        .map_err(|e| ArchiveError::Io(format!("packing task did not complete; {e}")))?
}
