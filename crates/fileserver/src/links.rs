//! Temporary link store: expiring token -> path mapping
//!
//! Expiry is enforced on every lookup, so a link is dead the instant its
//! deadline passes. Sweeps only reclaim memory.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Duration, Utc};
use thiserror::Error;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::token::{generate_link_token, token_prefix};

/// Attempts at drawing a token that is not already in the store
const MAX_MINT_ATTEMPTS: usize = 8;

/// A minted temporary link
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TempLink {
    /// Opaque token that addresses this link
    pub token: String,
    /// Root-relative path the link points at, valid when minted
    pub target_path: String,
    /// The link is honored strictly before this instant
    pub expires_at: DateTime<Utc>,
}

impl TempLink {
    pub fn is_live_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

/// Errors raised while minting a link
#[derive(Debug, Error)]
pub enum MintError {
    #[error("entropy source failed: {0}")]
    Entropy(#[from] rand::Error),

    #[error("no unused token after {0} attempts")]
    Exhausted(usize),

    #[error("link lifetime runs past the last representable date")]
    ExpiryOutOfRange,
}

/// Concurrent store of temporary links
///
/// Cloning is cheap; every clone shares the same map.
#[derive(Clone)]
pub struct TempLinkStore {
    /// Live and not-yet-swept links mapped by token
    links: Arc<RwLock<HashMap<String, TempLink>>>,
    /// Lifetime given to newly minted links
    ttl: Duration,
    /// Wakes the background sweeper
    sweep_requested: Arc<Notify>,
}

impl TempLinkStore {
    /// Create an empty store
    ///
    /// # Arguments
    /// * `ttl` - Lifetime of every minted link
    pub fn new(ttl: Duration) -> Self {
        Self {
            links: Arc::new(RwLock::new(HashMap::new())),
            ttl,
            sweep_requested: Arc::new(Notify::new()),
        }
    }

    /// Lifetime of minted links
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Mint a link to `target_path`, valid for the store's TTL from now
    ///
    /// # Returns
    /// * `Ok(token)` - The new token
    /// * `Err(MintError)` - The entropy source failed or the deadline is out of range
    pub fn mint(&self, target_path: impl Into<String>) -> Result<String, MintError> {
        self.mint_at(target_path, Utc::now())
    }

    /// Mint a link as if the current time were `now`
    pub fn mint_at(
        &self,
        target_path: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<String, MintError> {
        let target_path = target_path.into();
        let expires_at = now
            .checked_add_signed(self.ttl)
            .ok_or(MintError::ExpiryOutOfRange)?;

        for _ in 0..MAX_MINT_ATTEMPTS {
            let token = generate_link_token()?;

            let mut links = self.links.write().unwrap_or_else(|e| e.into_inner());
            if links.contains_key(&token) {
                tracing::warn!(token = token_prefix(&token), "Token collision, drawing again");
                continue;
            }
            links.insert(
                token.clone(),
                TempLink {
                    token: token.clone(),
                    target_path,
                    expires_at,
                },
            );
            drop(links);

            self.request_sweep();
            return Ok(token);
        }

        Err(MintError::Exhausted(MAX_MINT_ATTEMPTS))
    }

    /// Look up the path behind a token
    ///
    /// # Returns
    /// * `Some(path)` if the token exists and has not expired, `None` otherwise
    pub fn lookup(&self, token: &str) -> Option<String> {
        self.lookup_at(token, Utc::now())
    }

    /// Look up a token as if the current time were `now`
    pub fn lookup_at(&self, token: &str, now: DateTime<Utc>) -> Option<String> {
        let links = self.links.read().unwrap_or_else(|e| e.into_inner());
        let link = links.get(token)?;
        if link.is_live_at(now) {
            Some(link.target_path.clone())
        } else {
            tracing::debug!(token = token_prefix(token), "Temp link expired");
            None
        }
    }

    /// Remove every expired link
    ///
    /// # Returns
    /// * Number of links removed
    pub fn sweep(&self) -> usize {
        self.sweep_at(Utc::now())
    }

    /// Remove links that have expired by `now`
    pub fn sweep_at(&self, now: DateTime<Utc>) -> usize {
        let mut links = self.links.write().unwrap_or_else(|e| e.into_inner());
        let initial_count = links.len();
        links.retain(|_, link| link.is_live_at(now));
        initial_count - links.len()
    }

    /// Ask the background sweeper for a pass. Never blocks.
    pub fn request_sweep(&self) {
        self.sweep_requested.notify_one();
    }

    /// Number of stored links, including expired ones not yet swept
    pub fn len(&self) -> usize {
        let links = self.links.read().unwrap_or_else(|e| e.into_inner());
        links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Spawn the background sweeper
    ///
    /// The task sweeps on every `interval` tick and whenever a sweep is
    /// requested, and exits once `shutdown` flips to `true` or its sender is dropped.
    pub fn spawn_sweeper(
        &self,
        interval: std::time::Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let store = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = store.sweep_requested.notified() => {}
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                        continue;
                    }
                }

                let removed = store.sweep();
                if removed > 0 {
                    tracing::info!(removed, remaining = store.len(), "Swept expired temp links");
                }
            }

            tracing::debug!("Temp link sweeper stopped");
        })
    }
}
