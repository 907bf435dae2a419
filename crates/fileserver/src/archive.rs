//! On-the-fly zip streaming of directory trees
//!
//! The archive is written entry by entry into one end of an in-memory pipe
//! while the HTTP body drains the other end, so memory use is bounded by the
//! pipe capacity no matter how large the tree is. Entries are stored
//! uncompressed.

use std::error::Error as StdError;
use std::fs::FileType;
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};

use async_zip::base::write::ZipFileWriter;
use async_zip::{Compression, ZipEntryBuilder};
use axum::body::Body;
use axum::http::header;
use axum::response::{IntoResponse, Response};
use futures_util::io::AsyncWriteExt as _;
use thiserror::Error;
use tokio::fs::{self, File};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio_util::io::ReaderStream;

use crate::download::attachment_disposition;
use crate::resolver::ResolvedPath;

/// Bytes buffered between the zip writer and the response body
const PIPE_CAPACITY: usize = 256 * 1024;
/// Chunk size used when copying a file into its entry
const COPY_BUFFER_SIZE: usize = 64 * 1024;

/// Failure writing to the response sink
#[derive(Debug, Error)]
pub enum StreamError {
    /// The client went away; expected, not an error
    #[error("client disconnected: {0}")]
    ClientDisconnected(String),

    #[error("response write failed: {0}")]
    InternalWriteFailure(String),
}

impl StreamError {
    /// Classify a sink-side error by looking for a disconnect anywhere in its source chain
    pub fn classify(err: &(dyn StdError + 'static)) -> Self {
        if is_disconnect(err) {
            StreamError::ClientDisconnected(err.to_string())
        } else {
            StreamError::InternalWriteFailure(err.to_string())
        }
    }

    pub fn is_disconnect(&self) -> bool {
        matches!(self, StreamError::ClientDisconnected(_))
    }

    pub fn log(&self, folder: &Path) {
        match self {
            StreamError::ClientDisconnected(_) => tracing::info!(
                folder = %folder.display(),
                error = %self,
                "Zip stream stopped (likely client-initiated stop)"
            ),
            StreamError::InternalWriteFailure(_) => tracing::error!(
                folder = %folder.display(),
                error = %self,
                "Zip stream write failed"
            ),
        }
    }
}

fn is_disconnect(err: &(dyn StdError + 'static)) -> bool {
    let mut current = Some(err);
    while let Some(err) = current {
        if let Some(io_err) = err.downcast_ref::<io::Error>() {
            if matches!(
                io_err.kind(),
                io::ErrorKind::BrokenPipe
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
            ) {
                return true;
            }
        }
        current = err.source();
    }
    false
}

/// Outcome of one archive run
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ArchiveReport {
    /// Files copied completely
    pub files_written: usize,
    /// Files that could not be opened or failed mid-read
    pub files_failed: usize,
    /// The sink was closed by the client before the walk finished
    pub client_disconnected: bool,
    /// The zip trailer was written
    pub finalized: bool,
}

/// A node waiting on the walk stack
struct Pending {
    path: PathBuf,
    /// Entry name relative to the archived directory, `/`-separated
    name: String,
    is_dir: bool,
}

/// Build the streaming zip response for a resolved directory
///
/// The response is returned immediately; a spawned task walks the tree and
/// feeds the body. The download is named `<basename>.zip`.
pub fn stream_directory(dir: &ResolvedPath) -> Response {
    let (sink, source) = tokio::io::duplex(PIPE_CAPACITY);
    let folder = dir.absolute_path.clone();
    let archive_name = format!("{}.zip", dir.file_name());

    tokio::spawn(async move {
        let report = write_archive(&folder, sink).await;
        tracing::info!(
            folder = %folder.display(),
            files_written = report.files_written,
            files_failed = report.files_failed,
            client_disconnected = report.client_disconnected,
            finalized = report.finalized,
            "Zip stream finished"
        );
    });

    (
        [
            (header::CONTENT_TYPE, header::HeaderValue::from_static("application/zip")),
            (header::CONTENT_DISPOSITION, attachment_disposition(&archive_name)),
        ],
        Body::from_stream(ReaderStream::new(source)),
    )
        .into_response()
}

/// Write `dir` as a zip archive into `sink`
///
/// Walks depth-first in lexical order. Only regular files become entries;
/// symlinks are skipped. Per-file failures are logged and skipped. A failed
/// write to the sink ends the walk. The writer's close path runs on every
/// outcome so a live client always gets a trailer.
pub async fn write_archive<W>(dir: &Path, sink: W) -> ArchiveReport
where
    W: AsyncWrite + Unpin,
{
    write_archive_from(dir, sink, |path: PathBuf| File::open(path)).await
}

/// Same walk as [`write_archive`], with `open` supplying each file's contents
async fn write_archive_from<W, O, Fut, R>(dir: &Path, sink: W, open: O) -> ArchiveReport
where
    W: AsyncWrite + Unpin,
    O: Fn(PathBuf) -> Fut,
    Fut: Future<Output = io::Result<R>>,
    R: AsyncRead + Unpin,
{
    let mut report = ArchiveReport::default();
    let mut writer = ZipFileWriter::with_tokio(sink);

    let mut stack = match read_children(dir, "").await {
        Ok(children) => children,
        Err(e) => {
            tracing::warn!(folder = %dir.display(), error = %e, "Unable to read folder for zipping");
            Vec::new()
        }
    };

    while let Some(node) = stack.pop() {
        if node.is_dir {
            match read_children(&node.path, &node.name).await {
                Ok(children) => stack.extend(children),
                Err(e) => tracing::warn!(
                    folder = %node.path.display(),
                    error = %e,
                    "Unable to read subfolder, skipping"
                ),
            }
            continue;
        }

        tracing::debug!(folder = %dir.display(), file = %node.name, "Zipping");
        let result = match open(node.path.clone()).await {
            Ok(source) => add_file(&mut writer, &node.name, source).await,
            Err(e) => Err(EntryFailure::Source(e)),
        };

        match result {
            Ok(()) => report.files_written += 1,
            Err(EntryFailure::Source(e)) => {
                report.files_failed += 1;
                tracing::warn!(
                    folder = %dir.display(),
                    file = %node.name,
                    error = %e,
                    "Unable to zip file, skipping"
                );
            }
            Err(EntryFailure::Sink(e)) => {
                e.log(dir);
                report.client_disconnected = e.is_disconnect();
                break;
            }
        }
    }

    match writer.close().await {
        Ok(_) => report.finalized = true,
        Err(e) => {
            let err = StreamError::classify(&e);
            if report.client_disconnected {
                tracing::debug!(folder = %dir.display(), error = %err, "Zip trailer not sent");
            } else {
                err.log(dir);
                report.client_disconnected = err.is_disconnect();
            }
        }
    }

    report
}

enum EntryFailure {
    /// Reading the source file failed
    Source(io::Error),
    /// Writing to the response failed
    Sink(StreamError),
}

/// Read a directory's children, returned in reverse lexical order for the walk stack
///
/// A child that cannot be inspected is logged and left out; its siblings are still returned.
async fn read_children(dir: &Path, prefix: &str) -> io::Result<Vec<Pending>> {
    let mut read_dir = fs::read_dir(dir).await?;
    let mut children = Vec::new();

    while let Some(child) = read_dir.next_entry().await? {
        let file_name = child.file_name().to_string_lossy().into_owned();
        if let Some(pending) = pending_child(prefix, child.path(), file_name, child.file_type().await) {
            children.push(pending);
        }
    }

    children.sort_by(|a, b| b.name.cmp(&a.name));
    Ok(children)
}

fn pending_child(
    prefix: &str,
    path: PathBuf,
    file_name: String,
    file_type: io::Result<FileType>,
) -> Option<Pending> {
    let file_type = match file_type {
        Ok(file_type) => file_type,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Unable to inspect entry, skipping");
            return None;
        }
    };
    if !file_type.is_dir() && !file_type.is_file() {
        tracing::debug!(path = %path.display(), "Skipping non-regular file");
        return None;
    }

    let name = if prefix.is_empty() {
        file_name
    } else {
        format!("{}/{}", prefix, file_name)
    };
    Some(Pending {
        path,
        name,
        is_dir: file_type.is_dir(),
    })
}

/// Copy one source into a new stored entry
///
/// A read error mid-copy still closes the entry, leaving a truncated but
/// well-formed record in the archive.
async fn add_file<S, R>(writer: &mut ZipFileWriter<S>, name: &str, mut source: R) -> Result<(), EntryFailure>
where
    S: futures_util::io::AsyncWrite + Unpin,
    R: AsyncRead + Unpin,
{
    let builder = ZipEntryBuilder::new(name.to_string().into(), Compression::Stored);
    let mut entry = writer
        .write_entry_stream(builder)
        .await
        .map_err(|e| EntryFailure::Sink(StreamError::classify(&e)))?;

    let mut buffer = vec![0u8; COPY_BUFFER_SIZE];
    let mut read_error = None;
    loop {
        let n = match source.read(&mut buffer).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                read_error = Some(e);
                break;
            }
        };
        entry
            .write_all(&buffer[..n])
            .await
            .map_err(|e| EntryFailure::Sink(StreamError::classify(&e)))?;
    }

    entry
        .close()
        .await
        .map_err(|e| EntryFailure::Sink(StreamError::classify(&e)))?;

    match read_error {
        Some(e) => Err(EntryFailure::Source(e)),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs as stdfs;
    use std::io::{Cursor, Read};
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tempfile::TempDir;
    use tokio::io::ReadBuf;

    /// Yields one chunk, then fails like a disk read error
    struct FailingReader {
        sent: bool,
    }

    impl AsyncRead for FailingReader {
        fn poll_read(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            if self.sent {
                return Poll::Ready(Err(io::Error::new(io::ErrorKind::Other, "read failed")));
            }
            self.sent = true;
            buf.put_slice(b"partial");
            Poll::Ready(Ok(()))
        }
    }

    fn create_abc_folder() -> TempDir {
        let temp_dir = TempDir::new().unwrap();
        for name in ["a.txt", "b.txt", "c.txt"] {
            stdfs::write(temp_dir.path().join(name), name).unwrap();
        }
        temp_dir
    }

    fn read_zip(bytes: Vec<u8>) -> zip::ZipArchive<Cursor<Vec<u8>>> {
        zip::ZipArchive::new(Cursor::new(bytes)).expect("archive should be readable")
    }

    fn entry_names(archive: &zip::ZipArchive<Cursor<Vec<u8>>>) -> Vec<String> {
        let mut names: Vec<String> = archive.file_names().map(str::to_string).collect();
        names.sort();
        names
    }

    #[tokio::test]
    async fn test_entry_names_are_relative_to_folder() {
        let temp_dir = TempDir::new().unwrap();
        let folder = temp_dir.path().join("photos");
        stdfs::create_dir_all(folder.join("sub")).unwrap();
        stdfs::write(folder.join("a.txt"), "alpha").unwrap();
        stdfs::write(folder.join("sub/b.txt"), "beta").unwrap();

        let mut bytes = Vec::new();
        let report = write_archive(&folder, &mut bytes).await;
        assert_eq!(report.files_written, 2);
        assert!(report.finalized);
        assert!(!report.client_disconnected);

        let mut archive = read_zip(bytes);
        assert_eq!(entry_names(&archive), ["a.txt", "sub/b.txt"]);

        let mut contents = String::new();
        archive
            .by_name("sub/b.txt")
            .unwrap()
            .read_to_string(&mut contents)
            .unwrap();
        assert_eq!(contents, "beta");
    }

    #[tokio::test]
    async fn test_entries_are_stored() {
        let temp_dir = TempDir::new().unwrap();
        stdfs::write(temp_dir.path().join("data.bin"), vec![7u8; 200_000]).unwrap();

        let mut bytes = Vec::new();
        write_archive(temp_dir.path(), &mut bytes).await;

        let mut archive = read_zip(bytes);
        let entry = archive.by_name("data.bin").unwrap();
        assert_eq!(entry.compression(), zip::CompressionMethod::Stored);
        assert_eq!(entry.size(), 200_000);
    }

    #[tokio::test]
    async fn test_empty_folder_yields_valid_empty_archive() {
        let temp_dir = TempDir::new().unwrap();
        stdfs::create_dir(temp_dir.path().join("nested_empty")).unwrap();

        let mut bytes = Vec::new();
        let report = write_archive(temp_dir.path(), &mut bytes).await;
        assert_eq!(report.files_written, 0);
        assert!(report.finalized);

        let archive = read_zip(bytes);
        assert_eq!(archive.len(), 0);
    }

    #[tokio::test]
    async fn test_walk_order_is_depth_first_lexical() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        stdfs::create_dir_all(root.join("b/inner")).unwrap();
        stdfs::write(root.join("c.txt"), "c").unwrap();
        stdfs::write(root.join("a.txt"), "a").unwrap();
        stdfs::write(root.join("b/inner/z.txt"), "z").unwrap();
        stdfs::write(root.join("b/y.txt"), "y").unwrap();

        let mut bytes = Vec::new();
        write_archive(root, &mut bytes).await;

        let mut archive = read_zip(bytes);
        let in_order: Vec<String> = (0..archive.len())
            .map(|i| archive.by_index(i).unwrap().name().to_string())
            .collect();
        assert_eq!(in_order, ["a.txt", "b/inner/z.txt", "b/y.txt", "c.txt"]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_symlinks_are_skipped() {
        let temp_dir = TempDir::new().unwrap();
        let folder = temp_dir.path().join("share");
        stdfs::create_dir(&folder).unwrap();
        stdfs::write(temp_dir.path().join("secret.txt"), "outside").unwrap();
        stdfs::write(folder.join("ok.txt"), "ok").unwrap();
        std::os::unix::fs::symlink(temp_dir.path().join("secret.txt"), folder.join("leak.txt"))
            .unwrap();

        let mut bytes = Vec::new();
        write_archive(&folder, &mut bytes).await;

        assert_eq!(entry_names(&read_zip(bytes)), ["ok.txt"]);
    }

    #[tokio::test]
    async fn test_disconnected_client_stops_walk() {
        let temp_dir = TempDir::new().unwrap();
        for i in 0..4 {
            stdfs::write(temp_dir.path().join(format!("f{}.bin", i)), vec![1u8; 4096]).unwrap();
        }

        let (sink, source) = tokio::io::duplex(1024);
        drop(source);

        let report = write_archive(temp_dir.path(), sink).await;
        assert!(report.client_disconnected);
        assert!(!report.finalized);
        assert_eq!(report.files_written, 0);
    }

    #[tokio::test]
    async fn test_unopenable_file_is_skipped() {
        let temp_dir = create_abc_folder();

        let mut bytes = Vec::new();
        let report = write_archive_from(temp_dir.path(), &mut bytes, |path: PathBuf| async move {
            if path.ends_with("b.txt") {
                Err(io::Error::new(io::ErrorKind::PermissionDenied, "denied"))
            } else {
                File::open(path).await
            }
        })
        .await;

        assert_eq!(report.files_written, 2);
        assert_eq!(report.files_failed, 1);
        assert!(report.finalized);
        assert!(!report.client_disconnected);

        let mut archive = read_zip(bytes);
        assert_eq!(entry_names(&archive), ["a.txt", "c.txt"]);
        let mut contents = String::new();
        archive
            .by_name("c.txt")
            .unwrap()
            .read_to_string(&mut contents)
            .unwrap();
        assert_eq!(contents, "c.txt");
    }

    #[tokio::test]
    async fn test_read_error_mid_copy_keeps_archive_valid() {
        let temp_dir = create_abc_folder();

        let mut bytes = Vec::new();
        let report = write_archive_from(temp_dir.path(), &mut bytes, |path: PathBuf| async move {
            let source: Box<dyn AsyncRead + Unpin + Send> = if path.ends_with("b.txt") {
                Box::new(FailingReader { sent: false })
            } else {
                Box::new(File::open(path).await?)
            };
            Ok::<_, io::Error>(source)
        })
        .await;

        assert_eq!(report.files_written, 2);
        assert_eq!(report.files_failed, 1);
        assert!(report.finalized);

        // The failed entry is closed truncated, not dropped
        let mut archive = read_zip(bytes);
        assert_eq!(entry_names(&archive), ["a.txt", "b.txt", "c.txt"]);
        let mut contents = String::new();
        archive
            .by_name("b.txt")
            .unwrap()
            .read_to_string(&mut contents)
            .unwrap();
        assert_eq!(contents, "partial");
    }

    #[test]
    fn test_uninspectable_child_is_skipped() {
        let temp_dir = create_abc_folder();
        let path = temp_dir.path().join("a.txt");

        let failed = Err(io::Error::new(io::ErrorKind::PermissionDenied, "denied"));
        assert!(pending_child("", path.clone(), "a.txt".to_string(), failed).is_none());

        let file_type = stdfs::metadata(&path).unwrap().file_type();
        let pending = pending_child("sub", path, "a.txt".to_string(), Ok(file_type)).unwrap();
        assert_eq!(pending.name, "sub/a.txt");
        assert!(!pending.is_dir);
    }

    #[test]
    fn test_disconnect_classification() {
        let broken = io::Error::new(io::ErrorKind::BrokenPipe, "pipe closed");
        assert!(StreamError::classify(&broken).is_disconnect());

        let reset = io::Error::new(io::ErrorKind::ConnectionReset, "reset");
        assert!(StreamError::classify(&reset).is_disconnect());

        let other = io::Error::new(io::ErrorKind::Other, "disk on fire");
        assert!(!StreamError::classify(&other).is_disconnect());
    }
}
