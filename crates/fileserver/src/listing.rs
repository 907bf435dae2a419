//! Directory listings handed to the renderer

use std::fs::FileType;
use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;
use tokio::fs;

use crate::resolver::ResolvedPath;

/// Route prefix of direct downloads
pub const DOWNLOAD_PREFIX: &str = "download";
/// Route prefix of temp link minting
pub const MINT_PREFIX: &str = "gettemplink";

#[derive(Debug, Error)]
pub enum ListError {
    #[error("unable to read directory {path}: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// One child of a listed directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Entry {
    pub name: String,
    pub is_file: bool,
    /// Root-relative route that downloads this entry, e.g. `download/music/a.mp3`
    pub download_path: String,
    /// Root-relative route that mints a temp link, e.g. `gettemplink/music/a.mp3`
    pub temp_link_mint_path: String,
}

/// Immediate children of one directory, ready for rendering
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryListing {
    /// Directory as shown to the user, always ending in `/`
    pub display_path: String,
    pub entries: Vec<Entry>,
}

/// List the immediate children of a resolved directory
///
/// Symlinks are classified by what they point at; dangling links show up as files.
/// A child whose type cannot be read is logged and left out.
pub async fn list_directory(dir: &ResolvedPath) -> Result<DirectoryListing, ListError> {
    let unreadable = |source| ListError::Unreadable {
        path: dir.absolute_path.clone(),
        source,
    };

    let relative = dir.requested_relative_path.as_str();
    let mut read_dir = fs::read_dir(&dir.absolute_path).await.map_err(unreadable)?;
    let mut entries = Vec::new();

    while let Some(child) = read_dir.next_entry().await.map_err(unreadable)? {
        let name = child.file_name().to_string_lossy().into_owned();
        let Some(is_file) = classify(&child.path(), child.file_type().await).await else {
            continue;
        };

        entries.push(Entry {
            download_path: join_route(DOWNLOAD_PREFIX, relative, &name),
            temp_link_mint_path: join_route(MINT_PREFIX, relative, &name),
            name,
            is_file,
        });
    }

    sort_entries(&mut entries);

    Ok(DirectoryListing {
        display_path: display_path(relative),
        entries,
    })
}

/// Whether a child lists as a file, or `None` when it should be skipped
async fn classify(path: &Path, file_type: io::Result<FileType>) -> Option<bool> {
    let file_type = match file_type {
        Ok(file_type) => file_type,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Unable to inspect entry, skipping");
            return None;
        }
    };

    if file_type.is_symlink() {
        let is_file = fs::metadata(path)
            .await
            .map(|meta| !meta.is_dir())
            .unwrap_or(true);
        Some(is_file)
    } else {
        Some(!file_type.is_dir())
    }
}

/// Sort entries case-insensitively by name, keeping enumeration order for ties
pub fn sort_entries(entries: &mut [Entry]) {
    // sort_by_cached_key is stable
    entries.sort_by_cached_key(|entry| entry.name.to_uppercase());
}

fn display_path(relative: &str) -> String {
    if relative.is_empty() {
        "/".to_string()
    } else {
        format!("{}/", relative)
    }
}

fn join_route(prefix: &str, relative: &str, name: &str) -> String {
    [prefix, relative, name]
        .iter()
        .filter(|part| !part.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join("/")
}
