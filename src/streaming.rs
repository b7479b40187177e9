//! Asset streaming.
//!
//! The render thread hands paths to a [`StreamingSubsystem`] and polls it once
//! per frame. [`AssetStreamer`] either loads queued files during that poll or
//! loads them on a background tokio runtime; in both cases results only become
//! visible from inside [`StreamingSubsystem::update`].

use std::{
    collections::{HashMap, HashSet, VecDeque},
    path::{Path, PathBuf},
    sync::Arc,
};

use tokio::sync::mpsc;

use crate::error::{CrowdError, Result};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamingConfig {
    /// Load on worker threads instead of during the poll.
    pub background: bool,
    pub worker_threads: usize,
    /// Upper bound of files loaded per poll in synchronous mode.
    pub loads_per_update: usize,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            background: false,
            worker_threads: 2,
            loads_per_update: 8,
        }
    }
}

pub trait StreamingSubsystem {
    /// Queues an asset. Requests for assets that are loaded or in flight are ignored.
    fn request(&mut self, path: &Path);
    /// The per-frame poll. The only place loaded assets are handed over.
    fn update(&mut self, elapsed: f32) -> Result<()>;
    fn get(&self, path: &Path) -> Option<Arc<[u8]>>;
    /// Returns the asset right away, reading it on the calling thread when no
    /// poll has handed it over yet. The result is cached like a streamed load.
    fn load_now(&mut self, path: &Path) -> Result<Arc<[u8]>>;
    /// Drops queued work and cached assets.
    fn shutdown(&mut self);
}

type LoadResult = (PathBuf, std::io::Result<Vec<u8>>);

pub struct AssetStreamer {
    config: StreamingConfig,
    runtime: Option<tokio::runtime::Runtime>,
    sender: mpsc::UnboundedSender<LoadResult>,
    receiver: mpsc::UnboundedReceiver<LoadResult>,
    queued: VecDeque<PathBuf>,
    in_flight: HashSet<PathBuf>,
    cache: HashMap<PathBuf, Arc<[u8]>>,
    failed: HashSet<PathBuf>,
    polls: u64,
}

impl std::fmt::Debug for AssetStreamer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssetStreamer")
            .field("config", &self.config)
            .field("queued", &self.queued)
            .field("in_flight", &self.in_flight)
            .field("cached", &self.cache.len())
            .field("polls", &self.polls)
            .finish_non_exhaustive()
    }
}

impl AssetStreamer {
    pub fn new(config: StreamingConfig) -> Result<Self> {
        let runtime = if config.background {
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .worker_threads(config.worker_threads.max(1))
                .thread_name("asset-streamer")
                .build()
                .map_err(|e| CrowdError::Streaming(e.to_string()))?;
            Some(runtime)
        } else {
            None
        };
        let (sender, receiver) = mpsc::unbounded_channel();
        Ok(Self {
            config,
            runtime,
            sender,
            receiver,
            queued: VecDeque::new(),
            in_flight: HashSet::new(),
            cache: HashMap::new(),
            failed: HashSet::new(),
            polls: 0,
        })
    }

    pub fn polls(&self) -> u64 {
        self.polls
    }

    pub fn is_idle(&self) -> bool {
        self.queued.is_empty() && self.in_flight.is_empty()
    }

    pub fn has_failed(&self, path: &Path) -> bool {
        self.failed.contains(path)
    }

    fn accept(&mut self, (path, result): LoadResult) {
        self.in_flight.remove(&path);
        match result {
            Ok(bytes) => {
                log::debug!("streamed {} ({} bytes)", path.display(), bytes.len());
                self.cache.insert(path, bytes.into());
            }
            Err(e) => {
                log::warn!("failed to stream {}: {}", path.display(), e);
                self.failed.insert(path);
            }
        }
    }
}

impl StreamingSubsystem for AssetStreamer {
    fn request(&mut self, path: &Path) {
        if self.cache.contains_key(path)
            || self.in_flight.contains(path)
            || self.queued.iter().any(|p| p == path)
        {
            return;
        }
        self.failed.remove(path);
        match &self.runtime {
            Some(runtime) => {
                let sender = self.sender.clone();
                let path = path.to_path_buf();
                self.in_flight.insert(path.clone());
                runtime.spawn(async move {
                    let result = tokio::fs::read(&path).await;
                    // the receiver only goes away on shutdown
                    let _ = sender.send((path, result));
                });
            }
            None => self.queued.push_back(path.to_path_buf()),
        }
    }

    fn update(&mut self, _elapsed: f32) -> Result<()> {
        self.polls += 1;
        for _ in 0..self.config.loads_per_update {
            let Some(path) = self.queued.pop_front() else {
                break;
            };
            let result = std::fs::read(&path);
            self.accept((path, result));
        }
        while let Ok(loaded) = self.receiver.try_recv() {
            self.accept(loaded);
        }
        Ok(())
    }

    fn get(&self, path: &Path) -> Option<Arc<[u8]>> {
        self.cache.get(path).cloned()
    }

    fn load_now(&mut self, path: &Path) -> Result<Arc<[u8]>> {
        if let Some(bytes) = self.cache.get(path) {
            return Ok(Arc::clone(bytes));
        }
        // a background load still in flight is accepted later and replaces the entry
        self.queued.retain(|p| p != path);
        match std::fs::read(path) {
            Ok(bytes) => {
                log::debug!("loaded {} ({} bytes) ahead of streaming", path.display(), bytes.len());
                self.failed.remove(path);
                let bytes: Arc<[u8]> = bytes.into();
                self.cache.insert(path.to_path_buf(), Arc::clone(&bytes));
                Ok(bytes)
            }
            Err(e) => {
                self.failed.insert(path.to_path_buf());
                Err(CrowdError::Streaming(format!("{}: {}", path.display(), e)))
            }
        }
    }

    fn shutdown(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
        self.queued.clear();
        self.in_flight.clear();
        self.cache.clear();
        log::info!("asset streamer shut down after {} polls", self.polls);
    }
}

impl Drop for AssetStreamer {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_asset(name: &str, contents: &[u8]) -> PathBuf {
        let path = std::env::temp_dir().join(format!("flow-crowd-{}-{}", std::process::id(), name));
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn should_load_synchronously_during_poll() {
        let path = temp_asset("sync.bin", b"abc");
        let mut streamer = AssetStreamer::new(StreamingConfig::default()).unwrap();
        streamer.request(&path);
        assert!(streamer.get(&path).is_none());
        streamer.update(0.016).unwrap();
        assert_eq!(streamer.get(&path).as_deref(), Some(&b"abc"[..]));
        assert!(streamer.is_idle());
    }

    #[test]
    fn should_load_queued_asset_ahead_of_poll() {
        let path = temp_asset("now.bin", b"chr");
        let mut streamer = AssetStreamer::new(StreamingConfig::default()).unwrap();
        streamer.request(&path);

        let bytes = streamer.load_now(&path).unwrap();
        assert_eq!(&bytes[..], b"chr");
        assert!(streamer.is_idle());
        assert_eq!(streamer.get(&path).as_deref(), Some(&b"chr"[..]));

        streamer.update(0.016).unwrap();
        assert_eq!(streamer.get(&path).as_deref(), Some(&b"chr"[..]));
    }

    #[test]
    fn should_fail_immediate_load_of_missing_file() {
        let path = std::env::temp_dir().join("flow-crowd-never-written.bin");
        let mut streamer = AssetStreamer::new(StreamingConfig::default()).unwrap();
        let err = streamer.load_now(&path).unwrap_err();
        assert!(matches!(err, CrowdError::Streaming(_)));
        assert!(streamer.has_failed(&path));
    }

    #[test]
    fn should_record_missing_files() {
        let path = std::env::temp_dir().join("flow-crowd-does-not-exist.bin");
        let mut streamer = AssetStreamer::new(StreamingConfig::default()).unwrap();
        streamer.request(&path);
        streamer.update(0.016).unwrap();
        assert!(streamer.has_failed(&path));
    }

    #[test]
    fn should_hand_over_background_loads_only_in_poll() {
        let path = temp_asset("bg.bin", b"xyz");
        let mut streamer = AssetStreamer::new(StreamingConfig {
            background: true,
            ..Default::default()
        })
        .unwrap();
        streamer.request(&path);
        for _ in 0..200 {
            streamer.update(0.016).unwrap();
            if streamer.get(&path).is_some() {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        assert_eq!(streamer.get(&path).as_deref(), Some(&b"xyz"[..]));
        streamer.shutdown();
    }
}
