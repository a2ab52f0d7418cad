//! Small helpers for reading and saving files.

use std::{
    fmt,
    fs::{self, File},
    io::{self, Read, Write},
    path::Path,
    time::SystemTime,
};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use log::trace;

/// Reads a file to Bytes
pub fn read(path: &Path) -> Result<Bytes, FileError> {
    let mut f = File::open(path).map_err(|e| {
        FileError::new(format!("Could not open: '{}'", path.display()), e)
    })?;
    let mut bytes = Vec::new();
    f.read_to_end(&mut bytes).map_err(|e| {
        FileError::new(format!("Could not read: {}", path.display()), e)
    })?;
    Ok(Bytes::from(bytes))
}

/// Saves a file, creating parent dirs as needed.
///
/// The content is written to a temporary sibling first and then renamed
/// into place, so that readers never see a partially written file.
pub fn save(content: &[u8], full_path: &Path) -> Result<(), FileError> {
    if let Some(parent) = full_path.parent() {
        if !parent.as_os_str().is_empty() && !parent.is_dir() {
            trace!("Creating path: {}", parent.display());
            fs::create_dir_all(parent).map_err(|e| {
                FileError::new(
                    format!(
                        "Could not create dir path for: {}",
                        parent.display()
                    ),
                    e,
                )
            })?;
        }
    }

    let mut tmp_path = full_path.as_os_str().to_owned();
    tmp_path.push(".tmp");
    let tmp_path = Path::new(&tmp_path);

    let mut f = File::create(tmp_path).map_err(|e| {
        FileError::new(
            format!("Could not create file: {}", tmp_path.display()),
            e,
        )
    })?;
    f.write_all(content).map_err(|e| {
        FileError::new(format!("Could not write to: {}", tmp_path.display()), e)
    })?;
    f.sync_all().map_err(|e| {
        FileError::new(format!("Could not sync: {}", tmp_path.display()), e)
    })?;
    fs::rename(tmp_path, full_path).map_err(|e| {
        FileError::new(
            format!("Could not move file into place: {}", full_path.display()),
            e,
        )
    })?;

    trace!("Saved file: {}", full_path.display());
    Ok(())
}

/// Returns the last modification time of a file.
pub fn modified(path: &Path) -> Result<DateTime<Utc>, FileError> {
    let modified: SystemTime = fs::metadata(path)
        .and_then(|meta| meta.modified())
        .map_err(|e| {
            FileError::new(
                format!("Could not get modification time: {}", path.display()),
                e,
            )
        })?;
    Ok(DateTime::<Utc>::from(modified))
}

/// Checks that a path points to an existing, readable regular file.
pub fn check_readable(path: &Path) -> Result<(), FileError> {
    let meta = fs::metadata(path).map_err(|e| {
        FileError::new(format!("Cannot access file: {}", path.display()), e)
    })?;
    if !meta.is_file() {
        return Err(FileError::new(
            format!("Not a regular file: {}", path.display()),
            io::Error::new(io::ErrorKind::InvalidInput, "not a file"),
        ));
    }
    File::open(path).map(|_| ()).map_err(|e| {
        FileError::new(format!("Cannot read file: {}", path.display()), e)
    })
}

//------------ FileError -----------------------------------------------------

#[derive(Debug)]
pub struct FileError {
    context: String,
    cause: io::Error,
}

impl FileError {
    pub fn new(context: String, cause: io::Error) -> Self {
        FileError { context, cause }
    }

    pub fn kind(&self) -> io::ErrorKind {
        self.cause.kind()
    }
}

impl fmt::Display for FileError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}: {}", self.context, self.cause)
    }
}

impl std::error::Error for FileError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.cause)
    }
}

//------------ Tests ---------------------------------------------------------
