//! TLS file server with folder-to-zip streaming and temporary links
//!
//! This crate serves a directory tree over HTTPS: browsing, downloading single
//! files (with range support) or whole folders as streamed zip archives, and
//! minting short-lived unauthenticated links to individual paths.

mod archive;
mod auth;
mod config;
mod download;
mod error;
mod links;
mod listing;
mod render;
mod resolver;
mod server;
mod state;
mod token;

pub use archive::{write_archive, ArchiveReport, StreamError};
pub use auth::{is_protected_path, PROTECTED_PREFIXES};
pub use config::{ConfigError, Credentials, ServerSettings, DEFAULT_SWEEP_INTERVAL, DEFAULT_TEMP_LINK_HOURS};
pub use error::AppError;
pub use links::{MintError, TempLink, TempLinkStore};
pub use listing::{list_directory, sort_entries, DirectoryListing, Entry, ListError};
pub use resolver::{clean_request_path, PathResolver, ResolveError, ResolvedPath, ServedRoot};
pub use server::FileServerApi;
pub use state::ServerState;
pub use token::generate_link_token;

/// Result type alias for file server operations
pub type Result<T> = std::result::Result<T, Box<dyn std::error::Error + Send + Sync>>;
