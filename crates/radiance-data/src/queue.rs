//! Sequential asset queue
//!
//! One worker thread decodes requested frames strictly in index order and
//! reports each one over a channel. The owner drains events on its own
//! thread and registers the examples with its session.

use anyhow::{Context, Result};
use radiance_train::TrainingExample;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::thread::JoinHandle;

use crate::images::load_target;
use crate::transforms::{base_dir, TransformsFile};

/// Progress reported by the worker
#[derive(Debug)]
pub enum LoadEvent {
    Loaded {
        index: usize,
        example: TrainingExample,
    },
    Failed {
        index: usize,
        error: String,
    },
    /// Every frame has been attempted
    Exhausted,
}

/// Everything the worker needs to turn a frame index into an example
#[derive(Clone, Debug)]
pub struct FrameSource {
    pub transforms: TransformsFile,
    pub base_dir: PathBuf,
    pub resolution: usize,
    pub pose_tolerance: f32,
}

impl FrameSource {
    pub fn open(metadata_path: &Path, resolution: usize, pose_tolerance: f32) -> Result<Self> {
        Ok(Self {
            transforms: TransformsFile::load(metadata_path)?,
            base_dir: base_dir(metadata_path),
            resolution,
            pose_tolerance,
        })
    }

    pub fn len(&self) -> usize {
        self.transforms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transforms.is_empty()
    }

    pub fn load(&self, index: usize) -> Result<TrainingExample> {
        let pose = self.transforms.pose(index, self.pose_tolerance)?;
        let path = self.transforms.image_path(&self.base_dir, index);
        let target = load_target(&path, self.resolution)
            .with_context(|| format!("Frame {}", index))?;
        Ok(TrainingExample::new(pose, target))
    }
}

pub struct AssetQueue {
    total: usize,
    next_request: usize,
    loaded: usize,
    failed: usize,
    exhausted: bool,
    requests: Option<Sender<usize>>,
    events: Receiver<LoadEvent>,
    worker: Option<JoinHandle<()>>,
}

impl AssetQueue {
    /// Spawn the worker. Nothing is loaded until [`AssetQueue::request`].
    pub fn spawn(source: FrameSource) -> Result<Self> {
        let total = source.len();
        let (request_tx, request_rx) = mpsc::channel::<usize>();
        let (event_tx, event_rx) = mpsc::channel();

        let worker = std::thread::Builder::new()
            .name("asset-queue".to_string())
            .spawn(move || worker_loop(source, request_rx, event_tx))
            .context("Failed to spawn asset worker")?;

        Ok(Self {
            total,
            next_request: 0,
            loaded: 0,
            failed: 0,
            exhausted: false,
            requests: Some(request_tx),
            events: event_rx,
            worker: Some(worker),
        })
    }

    /// Queue the next `count` frames, or every remaining frame with `None`.
    ///
    /// Returns how many frames were queued.
    pub fn request(&mut self, count: Option<usize>) -> usize {
        let remaining = self.total - self.next_request;
        let count = count.map_or(remaining, |n| n.min(remaining));
        let Some(requests) = &self.requests else {
            return 0;
        };

        let mut queued = 0;
        for index in self.next_request..self.next_request + count {
            if requests.send(index).is_err() {
                tracing::warn!("Asset worker stopped, dropping request for frame {}", index);
                break;
            }
            queued += 1;
        }
        self.next_request += queued;
        if queued > 0 {
            tracing::info!(
                "Requested {} frames ({}/{} queued)",
                queued,
                self.next_request,
                self.total
            );
        }
        queued
    }

    /// Drain events without blocking.
    pub fn poll(&mut self) -> Vec<LoadEvent> {
        let mut out = Vec::new();
        loop {
            match self.events.try_recv() {
                Ok(event) => {
                    self.observe(&event);
                    out.push(event);
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        out
    }

    /// Block for the next event. `None` once nothing more can arrive.
    pub fn recv(&mut self) -> Option<LoadEvent> {
        if self.pending() == 0 && !self.has_unreported_exhaustion() {
            return None;
        }
        let event = self.events.recv().ok()?;
        self.observe(&event);
        Some(event)
    }

    /// Frames requested but not yet reported
    pub fn pending(&self) -> usize {
        self.next_request - self.loaded - self.failed
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn loaded(&self) -> usize {
        self.loaded
    }

    pub fn failed(&self) -> usize {
        self.failed
    }

    /// Every frame was attempted
    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// Every frame loaded successfully
    pub fn is_complete(&self) -> bool {
        self.loaded == self.total
    }

    fn has_unreported_exhaustion(&self) -> bool {
        self.total > 0 && self.next_request == self.total && !self.exhausted
    }

    fn observe(&mut self, event: &LoadEvent) {
        match event {
            LoadEvent::Loaded { .. } => self.loaded += 1,
            LoadEvent::Failed { .. } => self.failed += 1,
            LoadEvent::Exhausted => self.exhausted = true,
        }
    }
}

impl Drop for AssetQueue {
    fn drop(&mut self) {
        // closing the request channel ends the worker loop
        self.requests.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                tracing::warn!("Asset worker panicked");
            }
        }
    }
}

fn worker_loop(source: FrameSource, requests: Receiver<usize>, events: Sender<LoadEvent>) {
    let total = source.len();
    while let Ok(index) = requests.recv() {
        let event = match source.load(index) {
            Ok(example) => {
                tracing::debug!("Loaded frame {}", index);
                LoadEvent::Loaded { index, example }
            }
            Err(e) => {
                tracing::warn!("Failed to load frame {}: {:#}", index, e);
                LoadEvent::Failed {
                    index,
                    error: format!("{:#}", e),
                }
            }
        };
        if events.send(event).is_err() {
            return;
        }
        if index + 1 == total {
            tracing::info!("All {} frames processed", total);
            if events.send(LoadEvent::Exhausted).is_err() {
                return;
            }
        }
    }
}
