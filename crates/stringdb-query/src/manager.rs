//! The query manager: one scan cursor broadcast to many subscribers.

use std::collections::HashMap;
use std::io::{Read, Seek, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use stringdb_common::{Result, StringDbError};
use stringdb_store::{Database, ValueLoader};

use crate::message::{Control, LoadHandle, LoadReply, Record, RecordId, ScanEpoch, SubscriberId};
use crate::subscriber::Subscription;

/// State shared between the listener and scanner tasks.
///
/// The surrounding mutex is the scan lock: subscriber-set mutation and
/// value loads are serialized against cursor advances, and the scanner
/// relinquishes it between emissions so queued loads can run.
struct ScanState<S: Read + Write + Seek> {
    subscribers: HashMap<SubscriberId, mpsc::UnboundedSender<Record>>,
    /// Loader tables for recent scans, keyed by scan epoch. The previous
    /// scan's table is kept alive because a subscriber may still be
    /// draining its records when a new scan starts.
    scans: HashMap<ScanEpoch, Vec<ValueLoader<S>>>,
}

struct Shared<S: Read + Write + Seek> {
    scan: Mutex<ScanState<S>>,
    /// Event waiter: number of active subscribers. The scanner parks on
    /// this while the set is empty and restarts a fresh scan while it is
    /// not.
    active: watch::Sender<usize>,
}

/// Broadcasts one database scan to N concurrent subscribers.
///
/// Construction spawns the listener and scanner tasks; [`QueryManager::shutdown`]
/// signals cancellation and waits for both to exit. Every subscriber
/// operation is parameterized by the same shutdown signal and exits at
/// its next suspension point once it fires.
pub struct QueryManager {
    control_tx: mpsc::UnboundedSender<Control>,
    shutdown_tx: broadcast::Sender<()>,
    next_subscriber: AtomicU64,
    listener: JoinHandle<()>,
    scanner: JoinHandle<()>,
}

impl QueryManager {
    /// Spawns a manager over `database`.
    pub fn new<S>(database: Database<S>) -> Self
    where
        S: Read + Write + Seek + Send + 'static,
    {
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, _) = broadcast::channel(1);
        let (active_tx, active_rx) = watch::channel(0usize);

        let shared = Arc::new(Shared {
            scan: Mutex::new(ScanState {
                subscribers: HashMap::new(),
                scans: HashMap::new(),
            }),
            active: active_tx,
        });

        let listener = tokio::spawn(listener_loop(
            shared.clone(),
            control_rx,
            shutdown_tx.subscribe(),
        ));
        let scanner = tokio::spawn(scanner_loop(
            shared,
            database,
            control_tx.clone(),
            active_rx,
            shutdown_tx.subscribe(),
        ));

        Self {
            control_tx,
            shutdown_tx,
            next_subscriber: AtomicU64::new(0),
            listener,
            scanner,
        }
    }

    /// Registers a new subscriber pipe.
    ///
    /// The subscriber joins the active set when it sends `Go` (see
    /// [`Subscription::go`]); it is then guaranteed every record of any
    /// scan that starts afterward.
    pub fn subscribe(&self) -> Subscription {
        let id = self.next_subscriber.fetch_add(1, Ordering::SeqCst);
        Subscription::new(id, self.control_tx.clone(), self.shutdown_tx.subscribe())
    }

    /// Signals cancellation and waits for the listener and scanner to
    /// exit.
    pub async fn shutdown(self) -> Result<()> {
        self.shutdown_tx.send(()).ok();
        self.listener
            .await
            .map_err(|e| StringDbError::Internal(format!("listener join error: {e}")))?;
        self.scanner
            .await
            .map_err(|e| StringDbError::Internal(format!("scanner join error: {e}")))?;
        Ok(())
    }
}

/// Consumes control and load-request messages until shutdown.
async fn listener_loop<S>(
    shared: Arc<Shared<S>>,
    mut control_rx: mpsc::UnboundedReceiver<Control>,
    mut shutdown: broadcast::Receiver<()>,
) where
    S: Read + Write + Seek + Send + 'static,
{
    loop {
        let message = tokio::select! {
            _ = shutdown.recv() => {
                debug!("listener shutting down");
                return;
            }
            message = control_rx.recv() => match message {
                Some(message) => message,
                None => return,
            },
        };

        match message {
            Control::Go { id, pipe } => {
                let mut scan = shared.scan.lock().await;
                scan.subscribers.insert(id, pipe);
                shared.active.send_replace(scan.subscribers.len());
                debug!(subscriber = id, "subscriber active");
            }
            Control::Stop { id } => {
                let mut scan = shared.scan.lock().await;
                scan.subscribers.remove(&id);
                shared.active.send_replace(scan.subscribers.len());
                debug!(subscriber = id, "subscriber stopped");
            }
            Control::Load {
                epoch,
                record_id,
                reply,
            } => {
                let mut scan = shared.scan.lock().await;
                let value = match scan
                    .scans
                    .get_mut(&epoch)
                    .and_then(|table| table.get_mut(record_id as usize))
                {
                    Some(loader) => loader.load(),
                    None => Err(StringDbError::UnknownRecord(record_id)),
                };
                // The requester may have gone away; that is its problem,
                // not the scan's.
                let _ = reply.send(LoadReply { record_id, value });
            }
        }
    }
}

/// Scans the database and broadcasts each record to the active set,
/// restarting with a fresh iterator while subscribers remain.
async fn scanner_loop<S>(
    shared: Arc<Shared<S>>,
    database: Database<S>,
    control_tx: mpsc::UnboundedSender<Control>,
    mut active_rx: watch::Receiver<usize>,
    mut shutdown: broadcast::Receiver<()>,
) where
    S: Read + Write + Seek + Send + 'static,
{
    let mut epoch: ScanEpoch = 0;

    loop {
        // Park until at least one subscriber is active. While subscribers
        // remain after a scan ends, the wait returns immediately and a
        // fresh iterator starts.
        tokio::select! {
            _ = shutdown.recv() => {
                debug!("scanner shutting down");
                return;
            }
            changed = active_rx.wait_for(|count| *count > 0) => {
                if changed.is_err() {
                    return;
                }
            }
        }

        epoch += 1;

        // Snapshot the active set under the scan lock: subscribers join a
        // scan atomically at its start, and anyone who sends `Go` mid-scan
        // waits for the next one.
        let mut snapshot: Vec<(SubscriberId, mpsc::UnboundedSender<Record>)> = {
            let mut scan = shared.scan.lock().await;
            // Keep the previous scan's loaders for stragglers still
            // draining their pipe; anything older is dropped.
            scan.scans.retain(|e, _| e + 1 >= epoch);
            scan.scans.insert(epoch, Vec::new());
            scan.subscribers
                .iter()
                .map(|(id, pipe)| (*id, pipe.clone()))
                .collect()
        };
        debug!(epoch, subscribers = snapshot.len(), "scan starting");

        let mut records = database.iter();
        let mut record_id: RecordId = 0;

        loop {
            match shutdown.try_recv() {
                Err(broadcast::error::TryRecvError::Empty) => {}
                _ => {
                    debug!("scanner shutting down");
                    return;
                }
            }

            let mut scan = shared.scan.lock().await;
            if snapshot.is_empty() || scan.subscribers.is_empty() {
                break;
            }

            match records.next() {
                None => break,
                Some(Err(e)) => {
                    warn!(error = %e, "scan aborted");
                    break;
                }
                Some(Ok((key, loader))) => {
                    // The current epoch's table was created at scan start
                    // and is only pruned by this task.
                    if let Some(table) = scan.scans.get_mut(&epoch) {
                        table.push(loader);
                    }

                    let handle = LoadHandle::new(epoch, record_id, control_tx.clone());
                    let subscribers = &mut scan.subscribers;
                    let mut dropped = false;
                    snapshot.retain(|(id, pipe)| {
                        // Stopped mid-scan: removed from the active set by
                        // the listener, stop delivering.
                        if !subscribers.contains_key(id) {
                            return false;
                        }
                        let record = Record {
                            record_id,
                            key: key.clone(),
                            value: handle.clone(),
                        };
                        if pipe.send(record).is_ok() {
                            true
                        } else {
                            warn!(
                                subscriber = *id,
                                "dropping subscriber after delivery failure"
                            );
                            subscribers.remove(id);
                            dropped = true;
                            false
                        }
                    });
                    if dropped {
                        shared.active.send_replace(subscribers.len());
                    }
                    record_id += 1;
                }
            }

            drop(scan);
            // Relinquish the scan lock between emissions so queued load
            // requests can run before the cursor advances.
            tokio::task::yield_now().await;
        }

        debug!(epoch, records = record_id, "scan finished");
        // Relinquish between scans too, so restarts for a still-active
        // set stay cooperative rather than a tight loop.
        tokio::task::yield_now().await;
    }
}
