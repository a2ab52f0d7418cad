//! Metadata read from a resource that can tell when it last changed.
use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use log::debug;

use crate::{
    commons::util::file,
    metadata::error::SourceError,
};

use super::{FetchedMetadata, MetadataSource, RefreshingMetadataProvider};

//------------ MetadataResource ----------------------------------------------

/// Some place holding a metadata document.
pub trait MetadataResource: Send + Sync {
    fn location(&self) -> String;

    fn last_modified(&self) -> Result<DateTime<Utc>, SourceError>;

    fn content(&self) -> Result<Bytes, SourceError>;
}

//------------ FileResource --------------------------------------------------

/// A resource backed by a local file.
#[derive(Clone, Debug)]
pub struct FileResource {
    path: PathBuf,
}

impl FileResource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        FileResource { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl MetadataResource for FileResource {
    fn location(&self) -> String {
        self.path.display().to_string()
    }

    fn last_modified(&self) -> Result<DateTime<Utc>, SourceError> {
        file::modified(&self.path).map_err(SourceError::from)
    }

    fn content(&self) -> Result<Bytes, SourceError> {
        file::read(&self.path).map_err(SourceError::from)
    }
}

//------------ ResourceSource ------------------------------------------------

/// Reads the resource only if it changed since the last update.
#[derive(Clone)]
pub struct ResourceSource {
    resource: Arc<dyn MetadataResource>,
}

impl ResourceSource {
    pub fn new(resource: Arc<dyn MetadataResource>) -> Self {
        ResourceSource { resource }
    }
}

impl MetadataSource for ResourceSource {
    fn locator(&self) -> String {
        self.resource.location()
    }

    fn fetch(
        &self,
        last_update: Option<DateTime<Utc>>,
    ) -> Result<Option<FetchedMetadata>, SourceError> {
        let modified = self.resource.last_modified()?;
        if let Some(last_update) = last_update {
            if modified <= last_update {
                debug!(
                    "Resource {} not modified since {}",
                    self.resource.location(),
                    last_update
                );
                return Ok(None);
            }
        }
        Ok(Some(FetchedMetadata::new(self.resource.content()?)))
    }
}

//------------ ResourceBackedMetadataProvider --------------------------------

pub type ResourceBackedMetadataProvider = RefreshingMetadataProvider<ResourceSource>;

impl RefreshingMetadataProvider<ResourceSource> {
    pub fn new(name: &str, resource: Arc<dyn MetadataResource>) -> Self {
        Self::with_source(name, ResourceSource::new(resource))
    }
}

//------------ Tests ---------------------------------------------------------
