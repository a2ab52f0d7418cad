//! Metadata read from a local file.
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use crate::{
    commons::util::file,
    metadata::error::{ProviderError, ProviderResult, SourceError},
};

use super::{FetchedMetadata, MetadataSource, RefreshingMetadataProvider};

//------------ FilesystemSource ----------------------------------------------

/// Reads the whole file on every refresh.
///
/// Refreshes are scheduled from the expiry of the document read, so how
/// often the file is read is governed by the refresh delay settings.
#[derive(Clone, Debug)]
pub struct FilesystemSource {
    path: PathBuf,
}

impl FilesystemSource {
    pub fn new(path: impl Into<PathBuf>) -> ProviderResult<Self> {
        let path = path.into();
        file::check_readable(&path).map_err(|e| {
            ProviderError::config(format!("unusable metadata file: {}", e))
        })?;
        Ok(FilesystemSource { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl MetadataSource for FilesystemSource {
    fn locator(&self) -> String {
        self.path.display().to_string()
    }

    fn fetch(
        &self,
        _last_update: Option<DateTime<Utc>>,
    ) -> Result<Option<FetchedMetadata>, SourceError> {
        let content = file::read(&self.path)?;
        Ok(Some(FetchedMetadata::new(content)))
    }
}

//------------ FilesystemMetadataProvider ------------------------------------

pub type FilesystemMetadataProvider = RefreshingMetadataProvider<FilesystemSource>;

impl RefreshingMetadataProvider<FilesystemSource> {
    pub fn new(name: &str, path: impl Into<PathBuf>) -> ProviderResult<Self> {
        Ok(Self::with_source(name, FilesystemSource::new(path)?))
    }
}

//------------ Tests ---------------------------------------------------------
