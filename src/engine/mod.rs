mod availability;
mod conflict;
mod error;
mod lifecycle;
mod mutations;
mod payment;
mod pricing;
mod queries;
mod sweeps;

pub use availability::unavailable_dates;
pub use error::{EngineError, ErrorClass};
pub use lifecycle::NewBooking;
pub use mutations::{NewPriceAdjustment, NewRoom};
pub use payment::{GatewayNotification, GatewayStatus, WebhookOutcome, notification_signature};
pub use pricing::{effective_price, is_room_available, min_effective_price, min_price_across_rooms};
pub use queries::{PropertyQuote, SearchQuery, StayQuote};

use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{OwnedRwLockWriteGuard, RwLock, mpsc, oneshot};
use tracing::info;
use ulid::Ulid;

use crate::config::EngineSettings;
use crate::model::*;
use crate::outbox::Outbox;
use crate::wal::{Record, Wal};

pub type SharedRoomState = Arc<RwLock<RoomState>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        record: Record,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { record, response } => {
                let mut batch = vec![(record, response)];
                let mut deferred = None;

                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { record, response }) => {
                            batch.push((record, response));
                        }
                        Ok(other) => {
                            deferred = Some(other);
                            break;
                        }
                        Err(_) => break, // channel empty, flush batch
                    }
                }

                metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE)
                    .record(batch.len() as f64);
                let flush_start = std::time::Instant::now();
                let result = flush_batch(&mut wal, &batch);
                metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
                    .record(flush_start.elapsed().as_secs_f64());
                respond_batch(batch, &result);

                if let Some(other) = deferred {
                    handle_non_append(&mut wal, other);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn flush_batch(
    wal: &mut Wal,
    batch: &[(Record, oneshot::Sender<io::Result<()>>)],
) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (record, _) in batch {
        if let Err(e) = wal.append_buffered(record) {
            append_err = Some(e);
            break;
        }
    }
    // Always flush so partially buffered bytes don't leak into the next batch.
    let flush_err = wal.flush_sync().err();
    match (append_err, flush_err) {
        (Some(e), _) | (None, Some(e)) => Err(e),
        (None, None) => Ok(()),
    }
}

fn respond_batch(
    batch: Vec<(Record, oneshot::Sender<io::Result<()>>)>,
    result: &io::Result<()>,
) {
    for (_, tx) in batch {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { response } => {
            let result = Wal::replay(wal.path())
                .map(|records| snapshot(&records))
                .and_then(|record| Wal::write_compact_file(wal.path(), &record))
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        // Appends never reach here; the writer loop batches them.
        WalCommand::Append { response, .. } => {
            let _ = response.send(Err(io::Error::other("append routed to control path")));
        }
    }
}

/// Fold a log into the minimal record that recreates the same state.
fn snapshot(records: &[Record]) -> Record {
    let mut order: Vec<Ulid> = Vec::new();
    let mut rooms: HashMap<Ulid, RoomState> = HashMap::new();
    for event in records.iter().flatten() {
        match event {
            Event::RoomCreated { room } => {
                order.push(room.id);
                rooms.insert(room.id, RoomState::new(room.clone()));
            }
            other => {
                if let Some(rs) = rooms.get_mut(&other.room_id()) {
                    apply_to_room(rs, other);
                }
            }
        }
    }
    order
        .iter()
        .filter_map(|id| rooms.get(id))
        .flat_map(snapshot_room)
        .collect()
}

fn snapshot_room(rs: &RoomState) -> Vec<Event> {
    let room_id = rs.room.id;
    let mut events = vec![Event::RoomCreated {
        room: rs.room.clone(),
    }];
    events.extend(rs.adjustments.iter().map(|a| Event::AdjustmentAdded {
        adjustment: a.clone(),
    }));
    events.extend(rs.bookings.iter().map(|b| Event::BookingCreated {
        booking: b.clone(),
    }));
    events.extend(rs.proofs.values().map(|p| Event::ProofRecorded {
        room_id,
        proof: p.clone(),
    }));
    events.extend(
        rs.gateway_payments
            .values()
            .map(|p| Event::GatewayPaymentRecorded {
                room_id,
                payment: p.clone(),
            }),
    );
    let mut blocks: Vec<(Option<Ulid>, Vec<chrono::NaiveDate>)> = Vec::new();
    for row in rs.calendar.values().filter(|row| !row.is_available) {
        match blocks.iter_mut().find(|(id, _)| *id == row.booking_id) {
            Some((_, dates)) => dates.push(row.date),
            None => blocks.push((row.booking_id, vec![row.date])),
        }
    }
    events.extend(blocks.into_iter().map(|(booking_id, dates)| Event::DatesBlocked {
        room_id,
        dates,
        booking_id,
    }));
    events
}

/// Apply a row write to a RoomState. Caller holds the lock.
fn apply_to_room(rs: &mut RoomState, event: &Event) {
    match event {
        Event::AdjustmentAdded { adjustment } => rs.insert_adjustment(adjustment.clone()),
        Event::AdjustmentRemoved { id, .. } => {
            rs.remove_adjustment(id);
        }
        Event::BookingCreated { booking } | Event::BookingUpdated { booking } => {
            rs.upsert_booking(booking.clone());
        }
        Event::ProofRecorded { proof, .. } => {
            rs.proofs.insert(proof.booking_id, proof.clone());
        }
        Event::GatewayPaymentRecorded { payment, .. } => {
            rs.gateway_payments.insert(payment.booking_id, payment.clone());
        }
        Event::DatesBlocked {
            room_id,
            dates,
            booking_id,
        } => {
            for date in dates {
                rs.calendar.insert(
                    *date,
                    RoomAvailability {
                        room_id: *room_id,
                        date: *date,
                        is_available: false,
                        booking_id: *booking_id,
                    },
                );
            }
        }
        Event::DatesUnblocked { dates, .. } => {
            for date in dates {
                rs.calendar.remove(date);
            }
        }
        // Rooms are created at the DashMap level, not here
        Event::RoomCreated { .. } => {}
    }
}

pub struct Engine {
    rooms: DashMap<Ulid, SharedRoomState>,
    wal_tx: mpsc::Sender<WalCommand>,
    /// Reverse lookup: booking id → room id
    booking_to_room: DashMap<Ulid, Ulid>,
    /// Gateway provider reference → booking id
    order_to_booking: DashMap<String, Ulid>,
    settings: EngineSettings,
    outbox: Outbox,
}

impl Engine {
    pub fn new(wal_path: PathBuf, settings: EngineSettings, outbox: Outbox) -> io::Result<Self> {
        let records = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            rooms: DashMap::new(),
            wal_tx,
            booking_to_room: DashMap::new(),
            order_to_booking: DashMap::new(),
            settings,
            outbox,
        };

        // We're the sole owner of these Arcs, so try_write always succeeds.
        // Never use blocking_write here: this may run inside an async context.
        for event in records.iter().flatten() {
            match event {
                Event::RoomCreated { room } => {
                    engine
                        .rooms
                        .insert(room.id, Arc::new(RwLock::new(RoomState::new(room.clone()))));
                }
                other => {
                    if let Some(entry) = engine.rooms.get(&other.room_id())
                        && let Ok(mut guard) = entry.value().try_write()
                    {
                        apply_to_room(&mut guard, other);
                        engine.index_event(other);
                    }
                }
            }
        }

        info!(
            "engine loaded {} rooms, {} bookings from {} WAL records",
            engine.rooms.len(),
            engine.booking_to_room.len(),
            records.len()
        );
        Ok(engine)
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Write one record to the WAL via the background group-commit writer.
    async fn wal_append(&self, record: Record) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                record,
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    fn index_event(&self, event: &Event) {
        match event {
            Event::BookingCreated { booking } => {
                self.booking_to_room.insert(booking.id, booking.room_id);
            }
            Event::GatewayPaymentRecorded { payment, .. } => {
                self.order_to_booking
                    .insert(payment.provider_ref.clone(), payment.booking_id);
            }
            _ => {}
        }
    }

    /// Commit a unit of work: one WAL record, then apply every row write.
    /// The caller holds the room's write lock for the whole read-check-write.
    pub(super) async fn persist_and_apply(
        &self,
        rs: &mut RoomState,
        record: Record,
    ) -> Result<(), EngineError> {
        if record.is_empty() {
            return Ok(());
        }
        self.wal_append(record.clone()).await?;
        for event in &record {
            apply_to_room(rs, event);
            self.index_event(event);
        }
        Ok(())
    }

    pub(super) fn get_room(&self, id: &Ulid) -> Option<SharedRoomState> {
        self.rooms.get(id).map(|e| e.value().clone())
    }

    pub(super) fn room_ids(&self) -> Vec<Ulid> {
        let mut ids: Vec<Ulid> = self.rooms.iter().map(|e| *e.key()).collect();
        ids.sort();
        ids
    }

    pub fn get_room_for_booking(&self, booking_id: &Ulid) -> Option<Ulid> {
        self.booking_to_room.get(booking_id).map(|e| *e.value())
    }

    /// Lookup booking → room, acquire the room's write lock.
    pub(super) async fn resolve_booking_write(
        &self,
        booking_id: &Ulid,
    ) -> Result<OwnedRwLockWriteGuard<RoomState>, EngineError> {
        let room_id = self
            .get_room_for_booking(booking_id)
            .ok_or(EngineError::NotFound(*booking_id))?;
        let rs = self
            .get_room(&room_id)
            .ok_or(EngineError::NotFound(room_id))?;
        Ok(rs.write_owned().await)
    }

    /// Rewrite the WAL as the minimal record that recreates current state.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
