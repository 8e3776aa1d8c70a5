//! Filesystem markers that make restore and start idempotent.
//!
//! A marker is a regular file whose presence means "this phase already ran
//! in this environment". Two markers are kept. The serve marker holds the
//! owning process id, written for operators and never read back, and lives
//! as long as this tool owns a running server. The restore marker persists
//! and holds a [`RestoreRecord`]; it only counts for the snapshot and data
//! directory it names.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::process;
use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

const MARKER_TARGET: &str = "etcd_extractor::marker";

/// Errors raised while creating or removing a marker.
#[derive(Debug, Error)]
pub enum MarkerError {
    /// The marker could not be created or written.
    #[error("failed to write marker '{path}': {source}")]
    Write {
        /// Marker path.
        path: Utf8PathBuf,
        /// Underlying I/O error.
        #[source]
        source: Arc<io::Error>,
    },
    /// The marker could not be removed.
    #[error("failed to remove marker '{path}': {source}")]
    Remove {
        /// Marker path.
        path: Utf8PathBuf,
        /// Underlying I/O error.
        #[source]
        source: Arc<io::Error>,
    },
    /// Another invocation created the marker first.
    #[error("marker '{path}' is already held by another invocation")]
    Held {
        /// Marker path.
        path: Utf8PathBuf,
    },
}

/// Which snapshot was restored into which data directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestoreRecord {
    /// Canonical snapshot path.
    pub snapshot: Utf8PathBuf,
    /// Absolute data directory path.
    pub data_dir: Utf8PathBuf,
}

impl RestoreRecord {
    /// Describes restoring `snapshot` into `data_dir`.
    ///
    /// The snapshot must exist; the data directory need not.
    ///
    /// # Errors
    ///
    /// Returns the I/O error raised while resolving either path.
    pub fn resolve(snapshot: &Utf8Path, data_dir: &Utf8Path) -> io::Result<Self> {
        Ok(Self {
            snapshot: snapshot.canonicalize_utf8()?,
            data_dir: absolute(data_dir)?,
        })
    }
}

fn absolute(path: &Utf8Path) -> io::Result<Utf8PathBuf> {
    let resolved = std::path::absolute(path)?;
    Utf8PathBuf::from_path_buf(resolved).map_err(|path| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("path is not valid UTF-8: {}", path.display()),
        )
    })
}

/// A single phase marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Marker {
    path: Utf8PathBuf,
}

impl Marker {
    /// Describes the marker at `path`; nothing touches the filesystem yet.
    #[must_use]
    pub fn new(path: impl Into<Utf8PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Marker path.
    #[must_use]
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// Returns true when a regular file exists at the marker path.
    ///
    /// Stat failures other than "not found" count as active so a broken
    /// environment never leads to a second restore or server.
    #[must_use]
    pub fn is_active(&self) -> bool {
        match fs::metadata(&self.path) {
            Ok(metadata) => metadata.is_file(),
            Err(error) if error.kind() == io::ErrorKind::NotFound => false,
            Err(error) => {
                warn!(
                    target: MARKER_TARGET,
                    file = %self.path,
                    %error,
                    "cannot inspect marker; treating it as active"
                );
                true
            }
        }
    }

    /// Creates the marker and writes the current process id into it.
    ///
    /// # Errors
    ///
    /// Returns [`MarkerError::Held`] when the file already exists and
    /// [`MarkerError::Write`] for any other filesystem failure.
    pub fn acquire(&self) -> Result<(), MarkerError> {
        let mut options = OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o644);
        }
        let mut file = options.open(&self.path).map_err(|source| {
            if source.kind() == io::ErrorKind::AlreadyExists {
                MarkerError::Held {
                    path: self.path.clone(),
                }
            } else {
                self.write_error(source)
            }
        })?;
        let pid = process::id();
        writeln!(file, "{pid}").map_err(|source| self.write_error(source))?;
        file.sync_all().map_err(|source| self.write_error(source))?;
        info!(target: MARKER_TARGET, pid, file = %self.path, "marker written");
        Ok(())
    }

    /// Writes `record` into the marker, replacing any earlier content.
    ///
    /// # Errors
    ///
    /// Returns [`MarkerError::Write`] when the file cannot be written.
    pub fn write_record(&self, record: &RestoreRecord) -> Result<(), MarkerError> {
        let mut payload = serde_json::to_vec_pretty(record)
            .map_err(|error| self.write_error(io::Error::other(error)))?;
        payload.push(b'\n');
        let mut options = OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o644);
        }
        let mut file = options
            .open(&self.path)
            .map_err(|source| self.write_error(source))?;
        file.write_all(&payload)
            .map_err(|source| self.write_error(source))?;
        file.sync_all().map_err(|source| self.write_error(source))?;
        info!(
            target: MARKER_TARGET,
            file = %self.path,
            snapshot = %record.snapshot,
            data_dir = %record.data_dir,
            "restore recorded"
        );
        Ok(())
    }

    /// Reads the record stored in the marker.
    ///
    /// A missing, unreadable or malformed marker yields `None`.
    #[must_use]
    pub fn read_record(&self) -> Option<RestoreRecord> {
        let payload = match fs::read(&self.path) {
            Ok(payload) => payload,
            Err(error) if error.kind() == io::ErrorKind::NotFound => return None,
            Err(error) => {
                warn!(target: MARKER_TARGET, file = %self.path, %error, "cannot read marker");
                return None;
            }
        };
        match serde_json::from_slice(&payload) {
            Ok(record) => Some(record),
            Err(error) => {
                warn!(target: MARKER_TARGET, file = %self.path, %error, "ignoring malformed marker");
                None
            }
        }
    }

    /// Removes the marker.
    ///
    /// A marker that is already gone is not an error.
    ///
    /// # Errors
    ///
    /// Returns [`MarkerError::Remove`] when the file exists but cannot be
    /// deleted.
    pub fn release(&self) -> Result<(), MarkerError> {
        match fs::remove_file(&self.path) {
            Ok(()) => {
                info!(target: MARKER_TARGET, file = %self.path, "marker removed");
                Ok(())
            }
            Err(error) if error.kind() == io::ErrorKind::NotFound => {
                debug!(target: MARKER_TARGET, file = %self.path, "marker already absent");
                Ok(())
            }
            Err(source) => Err(MarkerError::Remove {
                path: self.path.clone(),
                source: Arc::new(source),
            }),
        }
    }

    fn write_error(&self, source: io::Error) -> MarkerError {
        MarkerError::Write {
            path: self.path.clone(),
            source: Arc::new(source),
        }
    }
}

/// The restore and serve markers of one environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseMarkers {
    /// Written after a successful snapshot restore and kept.
    pub restore: Marker,
    /// Held while this tool owns a running server.
    pub serve: Marker,
}

impl PhaseMarkers {
    /// Builds the pair from their paths.
    #[must_use]
    pub fn new(restore: impl Into<Utf8PathBuf>, serve: impl Into<Utf8PathBuf>) -> Self {
        Self {
            restore: Marker::new(restore),
            serve: Marker::new(serve),
        }
    }

    /// Whether `expected` has already been restored here.
    ///
    /// The restore marker must name the same snapshot and data directory, and
    /// the data directory must still exist.
    #[must_use]
    pub fn restored(&self, expected: &RestoreRecord) -> bool {
        let Some(recorded) = self.restore.read_record() else {
            return false;
        };
        if recorded != *expected {
            info!(
                target: MARKER_TARGET,
                recorded_snapshot = %recorded.snapshot,
                recorded_data_dir = %recorded.data_dir,
                "restore marker describes another restore"
            );
            return false;
        }
        if !expected.data_dir.is_dir() {
            info!(
                target: MARKER_TARGET,
                data_dir = %expected.data_dir,
                "restored data directory is gone"
            );
            return false;
        }
        true
    }

    /// Whether a server owned by some invocation is running here.
    #[must_use]
    pub fn serving(&self) -> bool {
        self.serve.is_active()
    }
}
