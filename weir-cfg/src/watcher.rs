//  WATCHER.rs
//    by Lut99
//
//  Created:
//    13 Feb 2025, 09:36:12
//  Last edited:
//    25 Jul 2025, 09:40:19
//  Auto updated?
//    Yes
//
//  Description:
//!   Implements the live handle to the providers file: a shared,
//!   atomically swappable view of the parsed configuration plus a
//!   debounced file watcher that reloads it when the file changes on
//!   disk.
//!
//!   A reload that fails to parse or validate leaves the previous
//!   configuration in place.
//

use std::error::Error;
use std::fmt::{Display, Formatter, Result as FResult};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::mpsc::{Receiver, channel};
use std::thread::JoinHandle;
use std::time::Duration;

use log::{debug, error, info, warn};
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher as _};
use parking_lot::RwLock;

use crate::info::Info as _;
use crate::providers::{Provider, ProcessConfig, ProvidersFile};


/***** CONSTANTS *****/
/// The quiet period that must elapse after a file event before we reload.
const DEBOUNCE_DELAY: Duration = Duration::from_millis(500);





/***** ERRORS *****/
/// Errors that relate to watching the providers file.
#[derive(Debug)]
pub enum WatcherError {
    /// Failed to create the filesystem watcher itself.
    WatcherCreate { err: notify::Error },
    /// Failed to register the providers file's directory with the watcher.
    WatchPath { path: PathBuf, err: notify::Error },
}
impl Display for WatcherError {
    fn fmt(&self, f: &mut Formatter<'_>) -> FResult {
        use WatcherError::*;
        match self {
            WatcherCreate { .. } => write!(f, "Failed to create filesystem watcher"),
            WatchPath { path, .. } => write!(f, "Failed to watch '{}'", path.display()),
        }
    }
}
impl Error for WatcherError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        use WatcherError::*;
        match self {
            WatcherCreate { err } => Some(err),
            WatchPath { err, .. } => Some(err),
        }
    }
}





/***** HELPER FUNCTIONS *****/
/// Checks whether a filesystem event concerns the watched providers file.
///
/// Also matches the `..data` indirection that Kubernetes configmap mounts use.
fn concerns_providers_file(event: &Event, path: &Path) -> bool {
    event.paths.iter().any(|p| {
        p == path || p.file_name() == path.file_name() || p.to_string_lossy().contains("..data")
    })
}





/***** LIBRARY *****/
/// Keeps the filesystem watcher and its debounce thread alive.
///
/// Dropping the guard stops watching; the running service holds on to it for its lifetime.
pub struct WatcherGuard {
    /// The watcher itself. Dropping it closes the event channel, which terminates the thread.
    watcher: Option<RecommendedWatcher>,
    /// The debounce/reload thread.
    thread:  Option<JoinHandle<()>>,
}
impl Drop for WatcherGuard {
    fn drop(&mut self) {
        drop(self.watcher.take());
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}



/// A shared, reloadable view of the parsed providers file.
///
/// Cloning the handle is cheap; all clones observe the same configuration.
#[derive(Clone)]
pub struct ProvidersHandle {
    /// The path the configuration was loaded from.
    path:  PathBuf,
    /// The current parsed configuration.
    inner: Arc<RwLock<ProvidersFile>>,
}
impl ProvidersHandle {
    /// Loads the providers file at the given path and wraps it in a live handle.
    ///
    /// # Arguments
    /// - `path`: The path of the providers file.
    ///
    /// # Returns
    /// A new ProvidersHandle holding the parsed configuration.
    ///
    /// # Errors
    /// This function errors if the file could not be read or parsed.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, crate::providers::Error> {
        let path: PathBuf = path.into();
        let file: ProvidersFile = ProvidersFile::from_path(&path)?;
        info!("Loaded {} provider(s) from '{}'", file.providers.len(), path.display());
        Ok(Self { path, inner: Arc::new(RwLock::new(file)) })
    }

    /// Re-reads the providers file and atomically swaps the shared view.
    ///
    /// On any read or parse error the previous configuration is retained and the error returned.
    pub fn reload(&self) -> Result<(), crate::providers::Error> {
        let file: ProvidersFile = ProvidersFile::from_path(&self.path)?;
        let n_providers: usize = file.providers.len();
        *self.inner.write() = file;
        info!("Reloaded {} provider(s) from '{}'", n_providers, self.path.display());
        Ok(())
    }

    /// Returns the provider with the given name, if declared.
    #[inline]
    pub fn provider(&self, name: &str) -> Option<Provider> { self.inner.read().get(name).cloned() }

    /// Returns the names of all declared providers.
    #[inline]
    pub fn names(&self) -> Vec<String> { self.inner.read().names() }

    /// Returns the configuration of the given process of the given provider, if both exist.
    #[inline]
    pub fn process_config(&self, provider: &str, raw_id: &str) -> Option<ProcessConfig> { self.inner.read().process_config(provider, raw_id).cloned() }

    /// Returns whether the given process may be listed and executed through the gateway.
    #[inline]
    pub fn is_available(&self, provider: &str, raw_id: &str) -> bool { self.inner.read().is_available(provider, raw_id) }

    /// Starts watching the providers file for changes, reloading it after a debounce period.
    ///
    /// # Returns
    /// A [`WatcherGuard`] that must be kept alive for as long as the file should be watched.
    ///
    /// # Errors
    /// This function errors if the filesystem watcher could not be set up.
    pub fn watch(&self) -> Result<WatcherGuard, WatcherError> {
        let dir: PathBuf = self.path.parent().map(Path::to_path_buf).unwrap_or_else(|| PathBuf::from("."));

        // Funnel raw notify events into a channel the debounce thread consumes
        let (tx, rx) = channel();
        let mut watcher: RecommendedWatcher = match notify::recommended_watcher(move |res| {
            let _ = tx.send(res);
        }) {
            Ok(watcher) => watcher,
            Err(err) => {
                return Err(WatcherError::WatcherCreate { err });
            },
        };
        if let Err(err) = watcher.watch(&dir, RecursiveMode::NonRecursive) {
            return Err(WatcherError::WatchPath { path: dir, err });
        }
        debug!("Watching '{}' for changes to '{}'", dir.display(), self.path.display());

        // The thread lives until the watcher (and with it, the sender) is dropped
        let handle: ProvidersHandle = self.clone();
        let thread: JoinHandle<()> = std::thread::spawn(move || handle.debounce_loop(rx));

        Ok(WatcherGuard { watcher: Some(watcher), thread: Some(thread) })
    }

    /// Consumes raw watcher events, collapses bursts into a single reload.
    fn debounce_loop(&self, rx: Receiver<Result<Event, notify::Error>>) {
        loop {
            match rx.recv() {
                Ok(Ok(event)) => {
                    if !concerns_providers_file(&event, &self.path) {
                        continue;
                    }

                    // Every further event restarts the quiet period
                    while rx.recv_timeout(DEBOUNCE_DELAY).is_ok() {}

                    if let Err(err) = self.reload() {
                        error!("Failed to reload providers file '{}': {} (keeping previous configuration)", self.path.display(), err);
                    }
                },
                Ok(Err(err)) => {
                    warn!("Providers file watcher reported an error: {err}");
                },
                // The sender is gone, i.e., the watcher was dropped
                Err(_) => break,
            }
        }
        debug!("Providers file watcher thread terminating");
    }
}





/***** TESTS *****/
