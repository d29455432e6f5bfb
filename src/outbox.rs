use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{error, warn};
use ulid::Ulid;

use crate::engine::{Engine, EngineError};
use crate::mailer::{MailError, Mailer};
use crate::model::Stay;
use crate::observability::SIDE_EFFECTS_TOTAL;

/// Attempts per side effect before it is given up and logged.
pub const MAX_ATTEMPTS: u32 = 3;

const RETRY_DELAY: Duration = Duration::from_secs(2);

/// Work that follows a committed transition and must not roll it back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SideEffect {
    BlockDates {
        room_id: Ulid,
        booking_id: Ulid,
        stay: Stay,
    },
    PaymentConfirmedEmail {
        booking_id: Ulid,
    },
}

impl SideEffect {
    pub fn label(&self) -> &'static str {
        match self {
            SideEffect::BlockDates { .. } => "block_dates",
            SideEffect::PaymentConfirmedEmail { .. } => "payment_confirmed_email",
        }
    }
}

#[derive(Debug)]
pub enum SideEffectError {
    Engine(EngineError),
    Mail(MailError),
}

impl std::fmt::Display for SideEffectError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SideEffectError::Engine(e) => write!(f, "{e}"),
            SideEffectError::Mail(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for SideEffectError {}

pub type OutboxReceiver = mpsc::UnboundedReceiver<SideEffect>;

/// Queue for post-commit side effects. Enqueue never blocks the caller.
#[derive(Clone)]
pub struct Outbox {
    tx: mpsc::UnboundedSender<SideEffect>,
}

impl Outbox {
    pub fn channel() -> (Self, OutboxReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn enqueue(&self, effect: SideEffect) {
        let label = effect.label();
        if self.tx.send(effect).is_err() {
            warn!("outbox closed, dropping {label}");
            record_side_effect(label, "dropped");
            return;
        }
        record_side_effect(label, "enqueued");
    }
}

fn record_side_effect(kind: &'static str, status: &'static str) {
    metrics::counter!(SIDE_EFFECTS_TOTAL, "kind" => kind, "status" => status).increment(1);
}

/// Background task draining the outbox in enqueue order.
pub async fn run_dispatcher(engine: Arc<Engine>, mailer: Arc<dyn Mailer>, mut rx: OutboxReceiver) {
    while let Some(effect) = rx.recv().await {
        deliver(&engine, mailer.as_ref(), &effect, RETRY_DELAY).await;
    }
}

/// Run one side effect with fixed-delay retries. Returns whether it succeeded.
pub async fn deliver(
    engine: &Engine,
    mailer: &dyn Mailer,
    effect: &SideEffect,
    retry_delay: Duration,
) -> bool {
    let label = effect.label();
    for attempt in 1..=MAX_ATTEMPTS {
        match execute(engine, mailer, effect).await {
            Ok(()) => {
                record_side_effect(label, "ok");
                return true;
            }
            Err(e) if attempt < MAX_ATTEMPTS => {
                warn!("{label} attempt {attempt}/{MAX_ATTEMPTS} failed: {e}");
                record_side_effect(label, "retry");
                tokio::time::sleep(retry_delay).await;
            }
            Err(e) => {
                error!("{label} gave up after {MAX_ATTEMPTS} attempts: {e} ({effect:?})");
                record_side_effect(label, "failed");
            }
        }
    }
    false
}

async fn execute(
    engine: &Engine,
    mailer: &dyn Mailer,
    effect: &SideEffect,
) -> Result<(), SideEffectError> {
    match effect {
        SideEffect::BlockDates {
            room_id,
            booking_id,
            stay,
        } => engine
            .block_date_range(*room_id, *stay, *booking_id)
            .await
            .map(|_| ())
            .map_err(SideEffectError::Engine),
        SideEffect::PaymentConfirmedEmail { booking_id } => {
            let booking = engine
                .get_booking(booking_id)
                .await
                .ok_or(SideEffectError::Engine(EngineError::NotFound(*booking_id)))?;
            mailer
                .send_payment_confirmation(&booking)
                .await
                .map_err(SideEffectError::Mail)
        }
    }
}
