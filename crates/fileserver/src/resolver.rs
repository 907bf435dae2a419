//! Root-confined path resolution
//!
//! Confinement is delegated to a `strict_path::PathBoundary`: every request is
//! joined onto the boundary, canonicalized (symlinks included) and checked
//! against it before anything touches the file.

use std::io;
use std::path::{Path, PathBuf};

use strict_path::{PathBoundary, StrictPathError};
use thiserror::Error;
use tokio::fs;

/// Marker for paths proven to lie inside the served root
#[derive(Debug, Clone, Copy)]
pub struct ServedRoot;

/// Reasons a request path could not be resolved.
///
/// All of these are answered with the same 404; the variants only drive logging.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// Nothing exists at the resolved location.
    #[error("path does not exist: {0}")]
    NotFound(String),

    /// The location exists but cannot be read.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// The request tried to leave the served root.
    #[error("path escapes the served root: {0}")]
    OutsideRoot(String),

    /// Any other filesystem failure.
    #[error("failed to stat {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
}

impl ResolveError {
    fn from_io(path: &str, err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => ResolveError::NotFound(path.to_string()),
            io::ErrorKind::PermissionDenied => ResolveError::PermissionDenied(path.to_string()),
            _ => ResolveError::Io {
                path: path.to_string(),
                source: err,
            },
        }
    }

    fn from_boundary(path: &str, err: StrictPathError) -> Self {
        match err {
            StrictPathError::PathEscapesBoundary { .. } => ResolveError::OutsideRoot(path.to_string()),
            StrictPathError::PathResolutionError { source, .. } => Self::from_io(path, source),
            other => ResolveError::Io {
                path: path.to_string(),
                source: io::Error::other(other),
            },
        }
    }

    /// Log the failure at a severity that reflects what actually happened
    pub fn log(&self) {
        match self {
            ResolveError::NotFound(_) => {
                tracing::warn!(error = %self, "Requested path does not exist")
            }
            ResolveError::PermissionDenied(_) | ResolveError::OutsideRoot(_) => {
                tracing::error!(error = %self, "Access to requested path denied")
            }
            ResolveError::Io { .. } => tracing::error!(error = %self, "Unable to resolve path"),
        }
    }
}

/// A request path mapped onto the filesystem
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPath {
    /// Root-relative path, `/`-separated, empty for the root itself
    pub requested_relative_path: String,
    /// Canonical absolute path inside the root
    pub absolute_path: PathBuf,
    pub is_directory: bool,
}

impl ResolvedPath {
    /// Last segment of the requested path, falling back to the root directory's own name
    pub fn file_name(&self) -> String {
        match self.requested_relative_path.rsplit('/').next() {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => self
                .absolute_path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| "root".to_string()),
        }
    }
}

/// Maps request paths onto a fixed root directory
#[derive(Debug, Clone)]
pub struct PathResolver {
    boundary: PathBoundary<ServedRoot>,
}

impl PathResolver {
    /// Create a resolver for `root`
    ///
    /// # Errors
    /// Fails if the root does not exist or is not a directory
    pub fn new(root: impl AsRef<Path>) -> io::Result<Self> {
        let boundary = PathBoundary::try_new(root.as_ref()).map_err(|e| match e {
            StrictPathError::InvalidRestriction { source, .. } => source,
            other => io::Error::other(other),
        })?;
        Ok(Self { boundary })
    }

    /// Canonical root directory
    pub fn root(&self) -> &Path {
        Path::new(self.boundary.interop_path())
    }

    /// Resolve a request path (route prefix already stripped)
    ///
    /// # Arguments
    /// * `requested` - Path below the route prefix, e.g. `music/album` or `/music/album/`
    ///
    /// # Returns
    /// * `Ok(ResolvedPath)` - The path exists, is readable and lies inside the root
    /// * `Err(ResolveError)` - Otherwise
    pub async fn resolve(&self, requested: &str) -> Result<ResolvedPath, ResolveError> {
        let candidate = requested.trim_start_matches('/').to_string();
        let boundary = self.boundary.clone();

        // Canonicalization hits the filesystem
        let joined = tokio::task::spawn_blocking(move || boundary.strict_join(candidate))
            .await
            .map_err(|e| ResolveError::Io {
                path: requested.to_string(),
                source: io::Error::other(e),
            })?
            .map_err(|e| ResolveError::from_boundary(requested, e))?;
        let absolute_path = joined.unstrict();

        let relative = match clean_request_path(requested) {
            Some(relative) => relative,
            None => self
                .relative_to_root(&absolute_path)
                .ok_or_else(|| ResolveError::OutsideRoot(requested.to_string()))?,
        };

        let metadata = fs::metadata(&absolute_path)
            .await
            .map_err(|e| ResolveError::from_io(&relative, e))?;
        let is_directory = metadata.is_dir();

        // Readability check; the handle is dropped right away
        if is_directory {
            fs::read_dir(&absolute_path)
                .await
                .map_err(|e| ResolveError::from_io(&relative, e))?;
        } else {
            fs::File::open(&absolute_path)
                .await
                .map_err(|e| ResolveError::from_io(&relative, e))?;
        }

        Ok(ResolvedPath {
            requested_relative_path: relative,
            absolute_path,
            is_directory,
        })
    }

    fn relative_to_root(&self, absolute: &Path) -> Option<String> {
        let relative = absolute.strip_prefix(self.root()).ok()?;
        let segments: Vec<String> = relative
            .iter()
            .map(|segment| segment.to_string_lossy().into_owned())
            .collect();
        Some(segments.join("/"))
    }
}

/// Tidy a request path into a root-relative, `/`-separated path
///
/// Empty and `.` segments are dropped. Returns `None` when a `..` segment is
/// present, since only the filesystem can tell where that lands.
pub fn clean_request_path(requested: &str) -> Option<String> {
    let mut segments = Vec::new();
    for segment in requested.split('/') {
        match segment {
            "" | "." => {}
            ".." => return None,
            name => segments.push(name),
        }
    }
    Some(segments.join("/"))
}
