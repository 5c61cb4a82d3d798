use crate::error::GitsError;
use bytes::Bytes;
use flate2::read::GzDecoder;
use object_store::ObjectStore;
use object_store::aws::AmazonS3Builder;
use object_store::path::Path as ObjectPath;
use std::io::Read;
use std::path::{Path, PathBuf};
use tar::{Archive, EntryType};
use tracing::{debug, info};

const SCHEME: &str = "s3://";

/// Fetches repository archives (`s3://bucket/key.tar[.gz]`) from object storage.
#[derive(Clone, Debug)]
pub struct ArchiveSource {
    region: Option<String>,
    allowed: Vec<String>,
}

impl ArchiveSource {
    pub fn new(region: Option<String>, allowed: Vec<String>) -> Self {
        Self { region, allowed }
    }

    pub fn check(&self, archive: &str) -> Result<(), GitsError> {
        if !archive.starts_with(SCHEME) {
            return Err(GitsError::NotSupported(format!(
                "archive `{}` scheme not supported, only `s3://` scheme is supported",
                archive
            )));
        }
        if !self.allowed.is_empty() && !self.allowed.iter().any(|prefix| archive.starts_with(prefix)) {
            return Err(GitsError::NotSupported(format!(
                "archive `{}` is not under an allowed prefix, allowed: {:?}",
                archive, self.allowed
            )));
        }
        Ok(())
    }

    async fn fetch(&self, archive: &str) -> Result<Bytes, GitsError> {
        let (bucket, key) = split_url(archive)?;
        let mut builder = AmazonS3Builder::from_env().with_bucket_name(bucket);
        if let Some(region) = &self.region {
            builder = builder.with_region(region);
        }
        let store = builder
            .build()
            .map_err(|e| GitsError::Storage(format!("S3 client for `{}`: {}", bucket, e)))?;
        let object = store
            .get(&ObjectPath::from(key))
            .await
            .map_err(|e| GitsError::Storage(format!("failed to get S3 object `{}`: {}", archive, e)))?;
        object
            .bytes()
            .await
            .map_err(|e| GitsError::Storage(format!("failed to read S3 object `{}`: {}", archive, e)))
    }

    /// Downloads `archive` and unpacks it into `dir`.
    pub async fn unarchive(&self, archive: &str, dir: &Path) -> Result<(), GitsError> {
        self.check(archive)?;
        let data = self.fetch(archive).await?;
        info!("Fetched {} ({} bytes)", archive, data.len());
        let gzipped = archive.ends_with("gz");
        let dir = dir.to_path_buf();
        tokio::task::spawn_blocking(move || {
            if gzipped {
                untar(GzDecoder::new(&data[..]), &dir)
            } else {
                untar(&data[..], &dir)
            }
        })
        .await
        .map_err(|e| GitsError::Internal(format!("untar task: {}", e)))?
    }
}

fn split_url(archive: &str) -> Result<(&str, &str), GitsError> {
    archive
        .strip_prefix(SCHEME)
        .and_then(|rest| rest.split_once('/'))
        .filter(|(bucket, key)| !bucket.is_empty() && !key.is_empty())
        .ok_or_else(|| GitsError::BadRequest(format!("archive `{}` must be s3://bucket/key", archive)))
}

/// Extracts directories and regular files only; anything else is skipped.
pub fn untar<R: Read>(reader: R, dir: &Path) -> Result<(), GitsError> {
    let mut archive = Archive::new(reader);
    let entries = archive
        .entries()
        .map_err(|e| GitsError::Io(format!("reading archive: {}", e)))?;
    for entry in entries {
        let mut entry = entry.map_err(|e| GitsError::Io(format!("reading archive: {}", e)))?;
        let name: PathBuf = entry.path().map(|p| p.into_owned()).unwrap_or_default();
        match entry.header().entry_type() {
            EntryType::Directory | EntryType::Regular => {
                entry
                    .unpack_in(dir)
                    .map_err(|e| GitsError::Io(format!("failed to extract {}: {}", name.display(), e)))?;
            }
            other => {
                debug!("Ignoring {} while untaring into {}: {:?}", name.display(), dir.display(), other);
            }
        }
    }
    Ok(())
}
