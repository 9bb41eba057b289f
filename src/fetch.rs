use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;

use crate::config::Settings;
use crate::error::{FetchError, StoreError};
use crate::platform::Platform;
use crate::progress::{EventSink, FetchEvent};
use crate::prompt::GuardCodePrompt;
use crate::steamcmd::{OutputMonitor, SteamCmd};
use crate::store::{self, VersionStore};

#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: Option<String>,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "********"))
            .finish()
    }
}

/// One platform + manifest id to fetch.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub platform: Platform,
    pub manifest_id: String,
    pub credentials: Credentials,
}

impl FetchRequest {
    pub fn new(platform: Platform, manifest_id: impl Into<String>, credentials: Credentials) -> Self {
        Self {
            platform,
            manifest_id: manifest_id.into().trim().to_string(),
            credentials,
        }
    }

    /// Unknown depot ids are an error rather than an `Unknown` folder.
    pub fn for_depot(
        depot_id: &str,
        manifest_id: impl Into<String>,
        credentials: Credentials,
    ) -> Result<Self, FetchError> {
        let platform = Platform::from_depot_id(depot_id)
            .ok_or_else(|| FetchError::UnknownDepot(depot_id.to_string()))?;
        Ok(Self::new(platform, manifest_id, credentials))
    }
}

#[derive(Debug, Clone)]
pub struct FetchOptions {
    /// How long a Steam Guard prompt may wait for the human.
    pub guard_code_timeout: Duration,
    /// Kill steamcmd after this long without any output. `None` waits forever.
    pub stall_timeout: Option<Duration>,
    pub max_guard_attempts: u32,
    /// Empty the leaf before ingesting (user confirmed an overwrite).
    pub clean_target: bool,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            guard_code_timeout: Duration::from_secs(300),
            stall_timeout: Some(Duration::from_secs(3600)),
            max_guard_attempts: 3,
            clean_target: false,
        }
    }
}

impl FetchOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            guard_code_timeout: settings.guard_code_timeout(),
            stall_timeout: settings.stall_timeout(),
            ..Self::default()
        }
    }
}

type LockKey = (Platform, String);

/// Advisory per-leaf locks so two fetches never ingest into the same directory at once.
#[derive(Debug, Clone, Default)]
pub struct FetchLocks {
    inner: Arc<Mutex<HashMap<LockKey, Arc<AsyncMutex<()>>>>>,
}

impl FetchLocks {
    pub async fn acquire(&self, platform: Platform, manifest_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            // Entries nobody else holds are idle; drop them so the map stays small.
            map.retain(|_, m| Arc::strong_count(m) > 1);
            map.entry((platform, manifest_id.to_string()))
                .or_default()
                .clone()
        };
        lock.lock_owned().await
    }
}

/// Runs SteamCMD for a request and ingests the result into the version store.
pub struct DepotFetcher {
    steamcmd: SteamCmd,
    store: VersionStore,
    locks: FetchLocks,
    events: EventSink,
}

impl DepotFetcher {
    pub fn new(steamcmd: SteamCmd, store: VersionStore, events: EventSink) -> Self {
        Self {
            steamcmd,
            store,
            locks: FetchLocks::default(),
            events,
        }
    }

    /// Share locks with other fetchers working on the same store.
    pub fn with_locks(mut self, locks: FetchLocks) -> Self {
        self.locks = locks;
        self
    }

    pub fn store(&self) -> &VersionStore {
        &self.store
    }

    /// Populates `versions/<platform>/<manifest id>` and returns that path.
    ///
    /// On any failure before ingest the leaf is left as it was: a leaf created by
    /// this call is removed again while still empty.
    pub async fn fetch(
        &self,
        req: &FetchRequest,
        options: &FetchOptions,
        prompt: &dyn GuardCodePrompt,
        cancel: &CancellationToken,
    ) -> Result<PathBuf, FetchError> {
        let res = self.fetch_inner(req, options, prompt, cancel).await;
        if let Err(e) = &res {
            self.events.emit(FetchEvent::Error(e.to_string()));
        }
        res
    }

    async fn fetch_inner(
        &self,
        req: &FetchRequest,
        options: &FetchOptions,
        prompt: &dyn GuardCodePrompt,
        cancel: &CancellationToken,
    ) -> Result<PathBuf, FetchError> {
        let leaf = self.store.leaf_dir(req.platform, &req.manifest_id)?;
        let _guard = self.locks.acquire(req.platform, &req.manifest_id).await;
        if cancel.is_cancelled() {
            return Err(FetchError::Cancelled);
        }

        log::info!(
            "Fetching manifest {} (depot {}) into {}",
            req.manifest_id,
            req.platform.depot_id(),
            leaf.display()
        );
        self.events.emit(FetchEvent::Started {
            platform: req.platform,
            manifest_id: req.manifest_id.clone(),
        });

        let created = !leaf.exists();
        std::fs::create_dir_all(&leaf)
            .map_err(|e| StoreError::io(format!("create {}", leaf.display()), e))?;

        let monitor = OutputMonitor::new(prompt, &self.events, options, cancel);
        let downloaded = self.steamcmd.download_depot(req, &monitor).await;
        let content = match downloaded {
            Ok(p) if cancel.is_cancelled() => {
                log::info!("cancelled after download; leaving {} untouched", p.display());
                Err(FetchError::Cancelled)
            }
            other => other,
        };
        let content = match content {
            Ok(p) => p,
            Err(e) => {
                if created {
                    rollback_leaf(&leaf);
                }
                return Err(e);
            }
        };

        self.events.emit(FetchEvent::Ingesting {
            from: EventSink::path_string(&content),
            to: EventSink::path_string(&leaf),
        });
        let moved = ingest_into(&content, &leaf, options.clean_target).map_err(|source| {
            FetchError::Ingest {
                target: leaf.clone(),
                scratch: content.clone(),
                source,
            }
        })?;
        log::info!("Saved version to: {} ({moved} entries)", leaf.display());

        cleanup_scratch(&content, self.store.root());

        self.events.emit(FetchEvent::Finished {
            path: EventSink::path_string(&leaf),
        });
        Ok(leaf)
    }
}

fn ingest_into(content: &Path, leaf: &Path, clean_target: bool) -> std::io::Result<usize> {
    if clean_target {
        log::info!("Clearing previous contents of {}", leaf.display());
        store::clear_dir(leaf)?;
    }
    store::ingest(content, leaf)
}

fn rollback_leaf(leaf: &Path) {
    if store::dir_has_any_entries(leaf) {
        return;
    }
    if let Err(e) = std::fs::remove_dir(leaf) {
        log::warn!("failed to remove empty {}: {e}", leaf.display());
    }
}

/// Best-effort removal of the emptied depot folder and, if nothing else lives
/// there, the app folder SteamCMD created around it.
fn cleanup_scratch(content: &Path, store_root: &Path) {
    if let Err(e) = std::fs::remove_dir_all(content) {
        log::warn!("Cleanup failed for {}: {e}", content.display());
        return;
    }
    log::debug!("Cleaned up: {}", content.display());

    let Some(parent) = content.parent() else { return };
    if parent.parent().is_none() || store_root.starts_with(parent) {
        return;
    }
    // Other depots of the same app may still be downloading into the parent.
    match std::fs::remove_dir(parent) {
        Ok(()) => log::debug!("Cleaned up: {}", parent.display()),
        Err(e) => log::warn!("Cleanup of {} skipped: {e}", parent.display()),
    }
}
