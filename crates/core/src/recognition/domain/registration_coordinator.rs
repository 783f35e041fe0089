use std::collections::HashSet;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};

use crate::recognition::domain::identity::{Descriptor, Identity};
use crate::recognition::domain::identity_store::{IdentityStore, StoreError};

/// Result of a background store task, delivered back to the coordinator.
#[derive(Debug)]
pub enum RegistrationMessage {
    Allocated {
        id: String,
        descriptor: Descriptor,
    },
    AllocationFailed(StoreError),
    Saved {
        id: String,
        snapshot: Result<Vec<Identity>, StoreError>,
    },
    SaveFailed {
        id: String,
        error: StoreError,
    },
}

/// Turns unmatched descriptors into new identities without ever blocking
/// the detection loop.
///
/// Registration is two-phase: allocate an empty identity, then append the
/// probe descriptor and refresh the snapshot. Both phases run on background
/// threads and report back over a channel that [`poll`](Self::poll) drains
/// on the loop thread, so `last_attempt` and `in_flight` have a single
/// writer.
///
/// At most one registration starts per cooldown window, and an allocated id
/// is submitted at most once while in flight. Store failures are logged and
/// dropped; an identity whose append failed stays in the store with no
/// descriptors, which the matcher skips.
pub struct RegistrationCoordinator {
    store: Arc<dyn IdentityStore>,
    cooldown: Duration,
    last_attempt: Option<Instant>,
    in_flight: HashSet<String>,
    pending_tasks: usize,
    tx: Sender<RegistrationMessage>,
    rx: Receiver<RegistrationMessage>,
}

impl RegistrationCoordinator {
    pub fn new(store: Arc<dyn IdentityStore>, cooldown: Duration) -> Self {
        let (tx, rx) = crossbeam_channel::unbounded();
        Self {
            store,
            cooldown,
            last_attempt: None,
            in_flight: HashSet::new(),
            pending_tasks: 0,
            tx,
            rx,
        }
    }

    /// Starts a registration for `descriptor` unless one started less than
    /// `cooldown` ago. Returns whether a registration was started.
    ///
    /// The cooldown is stamped before any I/O so a burst of unmatched faces
    /// in one batch starts a single registration.
    pub fn register_unmatched(&mut self, descriptor: &Descriptor, now: Instant) -> bool {
        if let Some(last) = self.last_attempt {
            if now.saturating_duration_since(last) < self.cooldown {
                return false;
            }
        }
        self.last_attempt = Some(now);
        self.spawn_allocation(descriptor.clone());
        true
    }

    /// Applies every message that has arrived so far. Returns the freshest
    /// identity snapshot if a registration completed.
    pub fn poll(&mut self) -> Option<Vec<Identity>> {
        let mut latest = None;
        while let Ok(message) = self.rx.try_recv() {
            if let Some(snapshot) = self.handle(message) {
                latest = Some(snapshot);
            }
        }
        latest
    }

    /// Blocks until no background task is outstanding or `timeout` elapses,
    /// applying messages as they arrive.
    pub fn settle(&mut self, timeout: Duration) -> Option<Vec<Identity>> {
        let deadline = Instant::now() + timeout;
        let mut latest = self.poll();
        while self.pending_tasks > 0 {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.rx.recv_timeout(remaining) {
                Ok(message) => {
                    if let Some(snapshot) = self.handle(message) {
                        latest = Some(snapshot);
                    }
                }
                Err(RecvTimeoutError::Timeout) => {
                    log::warn!(
                        "Gave up waiting for {} registration task(s)",
                        self.pending_tasks
                    );
                    break;
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        latest
    }

    pub fn in_flight(&self) -> &HashSet<String> {
        &self.in_flight
    }

    pub fn pending_tasks(&self) -> usize {
        self.pending_tasks
    }

    fn handle(&mut self, message: RegistrationMessage) -> Option<Vec<Identity>> {
        self.pending_tasks = self.pending_tasks.saturating_sub(1);
        match message {
            RegistrationMessage::Allocated { id, descriptor } => {
                if self.in_flight.contains(&id) {
                    log::debug!("Identity {id} already in flight, skipping duplicate save");
                    return None;
                }
                self.in_flight.insert(id.clone());
                self.spawn_save(id, descriptor);
                None
            }
            RegistrationMessage::AllocationFailed(e) => {
                log::warn!("Register new identity failed: {e}");
                None
            }
            RegistrationMessage::Saved { id, snapshot } => {
                self.in_flight.remove(&id);
                match snapshot {
                    Ok(identities) => {
                        log::info!(
                            "Registered {id} ({} identities: {})",
                            identities.len(),
                            identities
                                .iter()
                                .map(|i| i.id.as_str())
                                .collect::<Vec<_>>()
                                .join(", ")
                        );
                        Some(identities)
                    }
                    Err(e) => {
                        log::warn!("Saved {id} but refreshing identities failed: {e}");
                        None
                    }
                }
            }
            RegistrationMessage::SaveFailed { id, error } => {
                self.in_flight.remove(&id);
                log::warn!("Save failed for {id}: {error}");
                None
            }
        }
    }

    fn spawn_allocation(&mut self, descriptor: Descriptor) {
        let store = Arc::clone(&self.store);
        let tx = self.tx.clone();
        self.pending_tasks += 1;
        thread::spawn(move || {
            let message = match store.allocate_identity() {
                Ok(id) => RegistrationMessage::Allocated { id, descriptor },
                Err(e) => RegistrationMessage::AllocationFailed(e),
            };
            let _ = tx.send(message);
        });
    }

    fn spawn_save(&mut self, id: String, descriptor: Descriptor) {
        let store = Arc::clone(&self.store);
        let tx = self.tx.clone();
        self.pending_tasks += 1;
        thread::spawn(move || {
            let message = match store.append_descriptor(&id, &descriptor) {
                Ok(receipt) if receipt.ok => RegistrationMessage::Saved {
                    snapshot: store.list_identities(),
                    id,
                },
                Ok(_) => RegistrationMessage::SaveFailed {
                    id,
                    error: StoreError::Unavailable {
                        operation: "append_descriptor",
                        reason: "store did not acknowledge the save".into(),
                    },
                },
                Err(error) => RegistrationMessage::SaveFailed { id, error },
            };
            let _ = tx.send(message);
        });
    }
}
