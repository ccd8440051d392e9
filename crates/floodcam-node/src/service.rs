use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use floodcam_transport::adapter::TransportMessage;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::config::ReassemblyConfig;
use crate::error::ServiceError;
use crate::finalize::{CompletedObject, Finalizer, ObjectStore};
use crate::pairs::PairTracker;
use crate::runtime::{process_message, Pipeline, RuntimeEvent, RuntimeStats};

const MIN_EVICTION_INTERVAL: Duration = Duration::from_millis(10);

type SharedStats = Arc<Mutex<RuntimeStats>>;

fn lock_stats(stats: &SharedStats) -> MutexGuard<'_, RuntimeStats> {
    stats.lock().unwrap_or_else(|e| e.into_inner())
}

/// Long-running collector: one ingestion worker fed by a bounded channel,
/// an eviction timer, and a persistence worker that keeps slow storage off
/// the ingest path.
///
/// Must be started from inside a Tokio runtime.
pub struct CollectorService {
    ingest_tx: mpsc::Sender<TransportMessage>,
    shutdown_tx: watch::Sender<bool>,
    pipeline: Arc<Pipeline>,
    stats: SharedStats,
    ingest_task: JoinHandle<()>,
    eviction_task: JoinHandle<()>,
    persist_task: JoinHandle<()>,
}

impl CollectorService {
    pub fn start<S>(config: ReassemblyConfig, store: S) -> Self
    where
        S: ObjectStore + Send + Sync + 'static,
    {
        let pipeline = Arc::new(Pipeline::new(&config));
        let stats = SharedStats::default();
        let finalizer = Arc::new(Finalizer::new(store, config.persistence_retries));
        let (ingest_tx, ingest_rx) = mpsc::channel(config.ingest_queue_capacity.max(1));
        let (completed_tx, completed_rx) = mpsc::channel(config.completed_queue_capacity.max(1));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let ingest_task = tokio::spawn(ingest_loop(
            Arc::clone(&pipeline),
            Arc::clone(&stats),
            ingest_rx,
            completed_tx,
        ));
        let eviction_task = tokio::spawn(eviction_loop(
            Arc::clone(&pipeline),
            Arc::clone(&stats),
            config.eviction_interval.max(MIN_EVICTION_INTERVAL),
            shutdown_rx,
        ));
        let persist_task = tokio::spawn(persist_loop(
            finalizer,
            PairTracker::new(config.pair_capacity),
            Arc::clone(&stats),
            completed_rx,
        ));

        info!(
            staleness_ms = config.staleness.as_millis() as u64,
            max_open = config.max_open_assemblies,
            "collector service started"
        );

        Self {
            ingest_tx,
            shutdown_tx,
            pipeline,
            stats,
            ingest_task,
            eviction_task,
            persist_task,
        }
    }

    /// Queues a message, waiting for room when the queue is full.
    pub async fn handle(&self, message: TransportMessage) -> Result<(), ServiceError> {
        self.ingest_tx
            .send(message)
            .await
            .map_err(|_| ServiceError::Closed)
    }

    /// Queues a message without waiting. For synchronous transport callbacks
    /// that must never block; a full queue drops the message.
    pub fn try_submit(&self, message: TransportMessage) -> Result<(), ServiceError> {
        match self.ingest_tx.try_send(message) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                lock_stats(&self.stats).queue_drops += 1;
                Err(ServiceError::QueueFull)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(ServiceError::Closed),
        }
    }

    pub fn stats(&self) -> RuntimeStats {
        *lock_stats(&self.stats)
    }

    /// Buffer table and decoder, for diagnostics.
    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// Drains queued messages and pending persistence, stops the timer and
    /// returns the final counters. Open assemblies are discarded.
    pub async fn shutdown(self) -> RuntimeStats {
        let Self {
            ingest_tx,
            shutdown_tx,
            pipeline,
            stats,
            ingest_task,
            eviction_task,
            persist_task,
        } = self;

        drop(ingest_tx);
        let _ = shutdown_tx.send(true);
        for (name, task) in [
            ("ingest", ingest_task),
            ("eviction", eviction_task),
            ("persistence", persist_task),
        ] {
            if let Err(err) = task.await {
                error!("collector {name} task failed: {err}");
            }
        }

        let snapshot = *lock_stats(&stats);
        info!(
            open_assemblies = pipeline.manager().len(),
            completed = snapshot.completed(),
            persisted = snapshot.persisted,
            evictions = snapshot.evictions,
            "collector service stopped"
        );
        snapshot
    }
}

async fn ingest_loop(
    pipeline: Arc<Pipeline>,
    stats: SharedStats,
    mut rx: mpsc::Receiver<TransportMessage>,
    completed_tx: mpsc::Sender<CompletedObject>,
) {
    while let Some(message) = rx.recv().await {
        let result = {
            let mut stats = lock_stats(&stats);
            process_message(
                &pipeline,
                &message.topic,
                &message.payload,
                Instant::now(),
                &mut stats,
            )
        };
        if let Ok(RuntimeEvent::Completed(object)) = result {
            if completed_tx.send(object).await.is_err() {
                error!("persistence worker gone; stopping ingestion");
                return;
            }
        }
    }
}

async fn eviction_loop(
    pipeline: Arc<Pipeline>,
    stats: SharedStats,
    interval: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let mut stats = lock_stats(&stats);
                pipeline.sweep(Instant::now(), &mut stats);
            }
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    return;
                }
            }
        }
    }
}

async fn persist_loop<S>(
    finalizer: Arc<Finalizer<S>>,
    mut pairs: PairTracker,
    stats: SharedStats,
    mut rx: mpsc::Receiver<CompletedObject>,
) where
    S: ObjectStore + Send + Sync + 'static,
{
    while let Some(object) = rx.recv().await {
        let worker = Arc::clone(&finalizer);
        let key = object.key.clone();
        let outcome = tokio::task::spawn_blocking(move || worker.finalize(&object)).await;

        let mut stats = lock_stats(&stats);
        match outcome {
            Ok(Ok(_record)) => {
                stats.persisted += 1;
                if pairs.record(&key).is_some() {
                    stats.pairs_completed += 1;
                }
            }
            // Already logged by the finalizer.
            Ok(Err(_)) => stats.persistence_failures += 1,
            Err(err) => {
                stats.persistence_failures += 1;
                error!(
                    session = %key.session,
                    variant = %key.variant,
                    "persistence task failed: {err}"
                );
            }
        }
    }
}
