use std::panic;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use arc_swap::ArcSwapOption;
use crossbeam_channel::{Receiver, Sender};
use glam::Vec3;

use crate::bounds::Bounds;
use crate::guiding::direction::DirectionSampler;
use crate::guiding::spatial_tree::{IterationStats, SamplerIndex, SpatialTree};

/// Radiance observed from `position` towards `direction`.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Record {
    pub position: Vec3,
    pub direction: Vec3,
    pub value: f32,
}

enum Message {
    Batch(Vec<Record>),
    Stop,
}

/// State owned by the recording thread. It is handed back through `join` so
/// the tree can be restructured on the calling thread.
struct Consumer {
    tree: SpatialTree,
    receiver: Receiver<Message>,
}

impl Consumer {
    fn run(mut self) -> Self {
        for message in self.receiver.iter() {
            match message {
                Message::Batch(batch) => {
                    for record in batch {
                        self.tree.record(record.position, record.direction, record.value);
                    }
                }
                Message::Stop => break,
            }
        }
        self
    }

    /// Applies batches still queued behind the last `Stop`, returning how
    /// many records they held.
    fn drain(&mut self) -> usize {
        let mut applied = 0;
        for message in self.receiver.try_iter() {
            if let Message::Batch(batch) = message {
                applied += batch.len();
                for record in batch {
                    self.tree.record(record.position, record.direction, record.value);
                }
            }
        }
        applied
    }

    fn spawn(self) -> JoinHandle<Consumer> {
        thread::spawn(move || self.run())
    }
}

enum Stage {
    Recording(JoinHandle<Consumer>),
    Finalized,
}

/// Thread-safe front of a [`SpatialTree`].
///
/// Records are queued and applied by a single background thread. `iterate`
/// and `iterate_end` stop that thread, restructure the tree and publish a new
/// [`SamplerIndex`]; readers only ever see complete snapshots and never wait
/// on a lock to get one.
pub struct Guider {
    bounds: Bounds,
    sender: Sender<Message>,
    stage: Mutex<Stage>,
    finalized: AtomicBool,
    samplers: ArcSwapOption<SamplerIndex>,
}

impl Guider {
    pub fn new(bounds: Bounds) -> Self {
        let (sender, receiver) = crossbeam_channel::unbounded();
        let consumer = Consumer {
            tree: SpatialTree::new(bounds),
            receiver,
        };

        Guider {
            bounds,
            sender,
            stage: Mutex::new(Stage::Recording(consumer.spawn())),
            finalized: AtomicBool::new(false),
            samplers: ArcSwapOption::empty(),
        }
    }

    pub fn bounds(&self) -> Bounds {
        self.bounds
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized.load(Ordering::Acquire)
    }

    pub fn record(&self, position: Vec3, direction: Vec3, value: f32) {
        self.add_batch(vec![Record {
            position,
            direction,
            value,
        }]);
    }

    pub fn add_batch(&self, batch: Vec<Record>) {
        if batch.is_empty() {
            return;
        }
        if self.is_finalized() {
            log::warn!("dropping {} records submitted after the guider was finalized", batch.len());
            return;
        }
        let len = batch.len();
        if self.sender.send(Message::Batch(batch)).is_err() {
            log::warn!("dropping {} records submitted after the guider was finalized", len);
        }
    }

    /// Applies every record submitted so far, then refines and splits the
    /// tree. Recording resumes on the new structure when this returns.
    pub fn iterate(&self, rho: f32, record_count_threshold: u32) -> IterationStats {
        let mut stage = self.stage.lock().unwrap_or_else(PoisonError::into_inner);
        let mut consumer = self.stop_recording(&mut stage, "iterate");

        let stats = consumer.tree.iterate(rho, record_count_threshold);
        log::debug!(
            "guider iteration: {} records, {} splits, {} leaves, {} quadtree nodes",
            stats.records,
            stats.splits,
            stats.leaves,
            stats.quad_nodes
        );
        self.publish(&consumer.tree);

        *stage = Stage::Recording(consumer.spawn());
        stats
    }

    /// Applies every record submitted so far and freezes the guider. Later
    /// records are dropped.
    pub fn iterate_end(&self) -> IterationStats {
        let mut stage = self.stage.lock().unwrap_or_else(PoisonError::into_inner);
        let mut consumer = self.stop_recording(&mut stage, "iterate_end");
        self.finalized.store(true, Ordering::Release);

        // batches that raced past the finalized check still belong to this
        // round; closing the receiver makes any later send fail
        let late = consumer.drain();
        let Consumer { mut tree, receiver } = consumer;
        drop(receiver);
        if late > 0 {
            log::debug!("applied {late} records queued while finalizing");
        }

        let stats = tree.iterate_end();
        log::info!(
            "guider finalized with {} spatial leaves ({} records in the last round)",
            stats.leaves,
            stats.records
        );
        log::debug!("final quadtree nodes: {}", stats.quad_nodes);
        self.publish(&tree);

        stats
    }

    fn stop_recording(&self, stage: &mut Stage, caller: &str) -> Consumer {
        let handle = match std::mem::replace(stage, Stage::Finalized) {
            Stage::Recording(handle) => handle,
            Stage::Finalized => panic!("Guider::{caller} called on a finalized guider"),
        };

        // a consumer that already died is reported by `join` below
        let _ = self.sender.send(Message::Stop);
        match handle.join() {
            Ok(consumer) => consumer,
            Err(payload) => panic::resume_unwind(payload),
        }
    }

    fn publish(&self, tree: &SpatialTree) {
        self.samplers.store(Some(Arc::new(tree.sampler_index())));
    }

    /// Latest published snapshot, or `None` before the first iteration.
    pub fn sampler_index(&self) -> Option<Arc<SamplerIndex>> {
        self.samplers.load_full()
    }

    pub fn direction_sampler(&self, position: Vec3) -> Option<Arc<DirectionSampler>> {
        self.samplers.load().as_ref()?.sampler(position).cloned()
    }
}

impl Drop for Guider {
    fn drop(&mut self) {
        let stage = self.stage.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Stage::Recording(handle) = std::mem::replace(stage, Stage::Finalized) {
            let _ = self.sender.send(Message::Stop);
            if handle.join().is_err() {
                log::error!("guider recording thread panicked");
            }
        }
    }
}

/// Per-worker buffer that hands records to a [`Guider`] in batches.
pub struct RecordBatchBuilder<'a> {
    guider: &'a Guider,
    batch_size: usize,
    batch: Vec<Record>,
}

impl<'a> RecordBatchBuilder<'a> {
    pub fn new(guider: &'a Guider, batch_size: usize) -> Self {
        assert!(batch_size > 0, "record batch size must be positive");
        RecordBatchBuilder {
            guider,
            batch_size,
            batch: Vec::with_capacity(batch_size),
        }
    }

    pub fn add(&mut self, position: Vec3, direction: Vec3, value: f32) {
        self.batch.push(Record {
            position,
            direction,
            value,
        });
        if self.batch.len() >= self.batch_size {
            self.flush();
        }
    }

    pub fn len(&self) -> usize {
        self.batch.len()
    }

    pub fn is_empty(&self) -> bool {
        self.batch.is_empty()
    }

    pub fn flush(&mut self) {
        if self.batch.is_empty() {
            return;
        }
        let batch = std::mem::replace(&mut self.batch, Vec::with_capacity(self.batch_size));
        self.guider.add_batch(batch);
    }
}

impl Drop for RecordBatchBuilder<'_> {
    fn drop(&mut self) {
        self.flush();
    }
}
