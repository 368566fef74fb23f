//! Background loading of fragment data into main memory.
//!
//! Workers only call [`FragmentSource::load_data`]; they never touch the
//! device. Finished loads are drained on the render thread and handed to
//! [`RenderableFragment::install_data`](crate::RenderableFragment::install_data).

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender, bounded};
use dashmap::DashMap;

use crate::data::FragmentData;
use crate::descriptor::FragmentId;
use crate::error::DataLoadError;
use crate::source::FragmentSource;

/// Outcome of one background load.
#[derive(Debug)]
pub struct LoadedFragment {
    pub id: FragmentId,
    pub result: Result<FragmentData, DataLoadError>,
    /// Time spent in `load_data`, in microseconds.
    pub load_time_us: u64,
}

struct LoadTask {
    id: FragmentId,
    cancelled: Arc<AtomicBool>,
}

/// Thread pool feeding fragment data from a [`FragmentSource`].
pub struct FragmentLoader {
    task_sender: Option<Sender<LoadTask>>,
    result_receiver: Option<Receiver<LoadedFragment>>,
    /// Cancellation flag per pending fragment.
    pending: Arc<DashMap<FragmentId, Arc<AtomicBool>>>,
    in_flight: Arc<AtomicU64>,
    max_in_flight: u64,
    workers: Vec<JoinHandle<()>>,
}

impl FragmentLoader {
    /// Spawn `thread_count` workers accepting at most `max_in_flight`
    /// loads queued or running at once.
    pub fn new(
        source: Arc<dyn FragmentSource>,
        thread_count: usize,
        max_in_flight: usize,
    ) -> io::Result<Self> {
        let max_in_flight = max_in_flight.max(1);
        let (task_sender, task_receiver) = bounded::<LoadTask>(max_in_flight);
        let (result_sender, result_receiver) = bounded::<LoadedFragment>(max_in_flight);
        let in_flight = Arc::new(AtomicU64::new(0));

        let mut workers = Vec::with_capacity(thread_count.max(1));
        for _ in 0..thread_count.max(1) {
            let receiver = task_receiver.clone();
            let sender = result_sender.clone();
            let in_flight = Arc::clone(&in_flight);
            let source = Arc::clone(&source);

            let worker = std::thread::Builder::new()
                .name("fragment-loader".into())
                .spawn(move || {
                    while let Ok(task) = receiver.recv() {
                        if !task.cancelled.load(Ordering::Relaxed) {
                            let start = std::time::Instant::now();
                            let result = source.load_data(task.id);
                            let load_time_us = start.elapsed().as_micros() as u64;

                            if !task.cancelled.load(Ordering::Relaxed) {
                                let _ = sender.send(LoadedFragment {
                                    id: task.id,
                                    result,
                                    load_time_us,
                                });
                            }
                        }
                        in_flight.fetch_sub(1, Ordering::AcqRel);
                    }
                })?;
            workers.push(worker);
        }

        tracing::debug!(threads = workers.len(), max_in_flight, "started fragment loader");
        Ok(Self {
            task_sender: Some(task_sender),
            result_receiver: Some(result_receiver),
            pending: Arc::new(DashMap::new()),
            in_flight,
            max_in_flight: max_in_flight as u64,
            workers,
        })
    }

    /// Size the pool from the machine when `thread_count` is zero.
    pub fn with_threads(
        source: Arc<dyn FragmentSource>,
        thread_count: usize,
        max_in_flight: usize,
    ) -> io::Result<Self> {
        let threads = if thread_count == 0 {
            num_cpus::get().saturating_sub(2).max(1)
        } else {
            thread_count
        };
        Self::new(source, threads, max_in_flight)
    }

    /// Queue a load. Returns `Err(id)` if `max_in_flight` loads are already
    /// queued or running.
    ///
    /// Submitting a fragment that is already pending is accepted and does
    /// nothing.
    pub fn submit(&self, id: FragmentId) -> Result<(), FragmentId> {
        if self.pending.contains_key(&id) {
            return Ok(());
        }
        let Some(sender) = &self.task_sender else {
            return Err(id);
        };

        // Reserve a slot before queueing; workers release it when done.
        let reserved = self
            .in_flight
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < self.max_in_flight).then_some(n + 1)
            });
        if reserved.is_err() {
            return Err(id);
        }

        let cancelled = Arc::new(AtomicBool::new(false));
        self.pending.insert(id, Arc::clone(&cancelled));

        sender.try_send(LoadTask { id, cancelled }).map_err(|e| {
            self.in_flight.fetch_sub(1, Ordering::AcqRel);
            let id = e.into_inner().id;
            self.pending.remove(&id);
            id
        })
    }

    /// Drop a pending load. A load that already finished is unaffected.
    pub fn cancel(&self, id: FragmentId) {
        if let Some((_, cancelled)) = self.pending.remove(&id) {
            cancelled.store(true, Ordering::Relaxed);
        }
    }

    pub fn is_pending(&self, id: FragmentId) -> bool {
        self.pending.contains_key(&id)
    }

    /// Collect finished loads. Call once per frame on the render thread.
    pub fn drain_results(&self) -> Vec<LoadedFragment> {
        let Some(receiver) = &self.result_receiver else {
            return Vec::new();
        };
        let mut results = Vec::new();
        while let Ok(loaded) = receiver.try_recv() {
            // A cancel racing with completion leaves no pending entry.
            if self.pending.remove(&loaded.id).is_some() {
                results.push(loaded);
            }
        }
        results
    }

    /// Loads queued or running.
    pub fn in_flight_count(&self) -> u64 {
        self.in_flight.load(Ordering::Acquire)
    }

    pub fn thread_count(&self) -> usize {
        self.workers.len()
    }
}

impl Drop for FragmentLoader {
    fn drop(&mut self) {
        for entry in self.pending.iter() {
            entry.value().store(true, Ordering::Relaxed);
        }
        self.pending.clear();
        // Closing both channels unblocks every worker.
        self.task_sender.take();
        self.result_receiver.take();
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                tracing::warn!("fragment loader worker panicked");
            }
        }
    }
}
