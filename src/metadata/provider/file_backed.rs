//! HTTP metadata with a local backup copy.
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use log::{info, warn};

use crate::{
    commons::util::{file, httpclient::HttpClientConfig},
    metadata::error::{ProviderError, ProviderResult, SourceError},
};

use super::{
    FetchedMetadata, HttpMetadataSource, MetadataSource,
    RefreshingMetadataProvider,
};

//------------ FileBackedHttpSource ------------------------------------------

/// Fetches metadata over HTTP and falls back to a backing file.
///
/// Every document fetched over HTTP and installed by the provider is saved
/// to the backing file. When the HTTP fetch fails, the backing file is read
/// instead.
pub struct FileBackedHttpSource {
    http: HttpMetadataSource,
    backing_file: PathBuf,
}

impl FileBackedHttpSource {
    pub fn new(http: HttpMetadataSource, backing_file: PathBuf) -> ProviderResult<Self> {
        Self::check_backing_file(&backing_file)?;
        Ok(FileBackedHttpSource { http, backing_file })
    }

    /// The backing file may not exist yet, but if it does it must be a
    /// readable file.
    fn check_backing_file(path: &Path) -> ProviderResult<()> {
        if path.as_os_str().is_empty() {
            return Err(ProviderError::config("empty backing file path"));
        }
        if path.exists() {
            file::check_readable(path).map_err(|e| {
                ProviderError::config(format!("unusable backing file: {}", e))
            })?;
        }
        Ok(())
    }

    pub fn backing_file(&self) -> &Path {
        &self.backing_file
    }

    pub fn http(&self) -> &HttpMetadataSource {
        &self.http
    }

    fn read_backup(&self) -> Result<FetchedMetadata, SourceError> {
        let content = file::read(&self.backing_file)?;
        if content.is_empty() {
            return Err(SourceError::other(format!(
                "backing file {} is empty",
                self.backing_file.display()
            )));
        }
        let mut fetched = FetchedMetadata::new(content);
        fetched.from_fallback = true;
        Ok(fetched)
    }
}

impl MetadataSource for FileBackedHttpSource {
    fn locator(&self) -> String {
        format!(
            "{} (backed by {})",
            self.http.locator(),
            self.backing_file.display()
        )
    }

    fn fetch(
        &self,
        last_update: Option<DateTime<Utc>>,
    ) -> Result<Option<FetchedMetadata>, SourceError> {
        match self.http.fetch(last_update) {
            Ok(fetched) => Ok(fetched),
            Err(e) => {
                warn!(
                    "Fetching {} failed, using backing file {}: {}",
                    self.http.locator(),
                    self.backing_file.display(),
                    e
                );
                self.read_backup()
                    .map(Some)
                    .map_err(|backup| SourceError::fallback(e, backup))
            }
        }
    }

    fn commit(&self, fetched: &FetchedMetadata) {
        if fetched.from_fallback {
            return;
        }
        self.http.commit(fetched);
        match file::save(&fetched.content, &self.backing_file) {
            Ok(()) => info!(
                "Saved metadata from {} to {}",
                self.http.locator(),
                self.backing_file.display()
            ),
            Err(e) => warn!("Could not save backing file: {}", e),
        }
    }
}

//------------ FileBackedHttpMetadataProvider --------------------------------

pub type FileBackedHttpMetadataProvider =
    RefreshingMetadataProvider<FileBackedHttpSource>;

impl RefreshingMetadataProvider<FileBackedHttpSource> {
    pub fn new(
        name: &str,
        url: &str,
        backing_file: impl Into<PathBuf>,
        config: &HttpClientConfig,
    ) -> ProviderResult<Self> {
        let http = HttpMetadataSource::new(url, config)?;
        let source = FileBackedHttpSource::new(http, backing_file.into())?;
        Ok(Self::with_source(name, source))
    }
}

//------------ Tests ---------------------------------------------------------
