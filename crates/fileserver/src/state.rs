//! Shared state handed to every request handler

use std::io;
use std::sync::Arc;

use crate::config::ServerSettings;
use crate::links::TempLinkStore;
use crate::resolver::PathResolver;

/// Server state: the path resolver, the temp link store and the settings
#[derive(Clone)]
pub struct ServerState {
    resolver: PathResolver,
    links: TempLinkStore,
    settings: Arc<ServerSettings>,
}

impl ServerState {
    /// Create new server state
    ///
    /// # Arguments
    /// * `settings` - Validated server settings
    ///
    /// # Errors
    /// Fails if the root directory cannot be opened or the link lifetime is out of range
    pub fn new(settings: ServerSettings) -> io::Result<Self> {
        let ttl = settings.temp_link_ttl().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("temp link lifetime of {} hours is too large", settings.temp_link_hours),
            )
        })?;
        let resolver = PathResolver::new(&settings.root_dir)?;
        let links = TempLinkStore::new(ttl);
        Ok(Self {
            resolver,
            links,
            settings: Arc::new(settings),
        })
    }

    pub fn resolver(&self) -> &PathResolver {
        &self.resolver
    }

    pub fn links(&self) -> &TempLinkStore {
        &self.links
    }

    pub fn settings(&self) -> &ServerSettings {
        &self.settings
    }
}
