use tracing::{debug, info, warn};

use crate::config::TEST_MODE_PAYMENT_WINDOW;
use crate::model::*;

use super::lifecycle::{record_transition, transitioned};
use super::{Engine, EngineError};

impl Engine {
    /// Run one sweep. Each room is a separate unit of work; a storage error
    /// stops the sweep and is returned so the caller can log and retry later.
    /// Rooms committed before the error stay committed.
    pub async fn run_sweep(
        &self,
        job: JobKind,
        now: Timestamp,
    ) -> Result<SweepReport, EngineError> {
        let mut booking_ids = Vec::new();
        for room_id in self.room_ids() {
            let Some(rs) = self.get_room(&room_id) else {
                continue;
            };
            let mut guard = rs.write().await;
            let mut record = Vec::new();
            let mut moved = Vec::new();
            for booking in &guard.bookings {
                let Some(to) = self.sweep_target(job, booking, now) else {
                    continue;
                };
                record.push(Event::BookingUpdated {
                    booking: transitioned(booking, to, now),
                });
                moved.push((booking.id, booking.status, to));
            }
            if record.is_empty() {
                continue;
            }
            if let Err(e) = self.persist_and_apply(&mut guard, record).await {
                warn!(
                    "{job} sweep stopped at room {room_id} after moving {} bookings: {e}",
                    booking_ids.len()
                );
                return Err(e);
            }
            drop(guard);
            metrics::counter!(
                crate::observability::SWEEP_TRANSITIONS_TOTAL,
                "job" => job.as_str()
            )
            .increment(moved.len() as u64);
            for (id, from, to) in moved {
                record_transition(from, to, job.as_str());
                debug!("{job}: booking {id} {from} -> {to}");
                booking_ids.push(id);
            }
        }

        if !booking_ids.is_empty() {
            info!("{job} sweep moved {} bookings", booking_ids.len());
        }
        Ok(SweepReport {
            job,
            count: booking_ids.len(),
            booking_ids,
        })
    }

    /// Status a sweep would move `booking` to at `now`, if any.
    ///
    /// Overdue cancellation only claims stays that are still unsettled past
    /// check-in: WAITING_CONFIRMATION, or PROCESSING on a gateway payment that
    /// has not been paid. An approved or auto-confirmed transfer is settled
    /// and runs to completion. Completion and overdue cancellation are
    /// disjoint: a PROCESSING booking past its completion deadline belongs to
    /// completion.
    fn sweep_target(
        &self,
        job: JobKind,
        booking: &Booking,
        now: Timestamp,
    ) -> Option<BookingStatus> {
        let settings = &self.settings;
        let completion_due = |b: &Booking| {
            b.status == BookingStatus::Processing
                && start_of_day(b.check_out) + settings.completion_grace <= now
        };
        let eligible = match job {
            JobKind::Expiration => {
                let lapsed = if settings.test_mode {
                    booking.updated_at <= now - TEST_MODE_PAYMENT_WINDOW
                } else {
                    booking.expires_at.is_some_and(|deadline| deadline < now)
                };
                booking.status == BookingStatus::WaitingPayment && lapsed
            }
            JobKind::AutoConfirmation => {
                booking.status == BookingStatus::WaitingConfirmation
                    && booking.updated_at <= now - settings.confirmation_timeout
            }
            JobKind::Completion => completion_due(booking),
            JobKind::OverdueCancellation => {
                let unsettled = match booking.status {
                    BookingStatus::WaitingConfirmation => true,
                    BookingStatus::Processing => {
                        booking.payment_method == PaymentMethod::PaymentGateway
                            && booking.paid_at.is_none()
                    }
                    _ => false,
                };
                unsettled
                    && start_of_day(booking.check_in) + settings.overdue_grace <= now
                    && !completion_due(booking)
            }
        };
        eligible.then_some(match job {
            JobKind::Expiration | JobKind::OverdueCancellation => BookingStatus::Canceled,
            JobKind::AutoConfirmation => BookingStatus::Processing,
            JobKind::Completion => BookingStatus::Completed,
        })
    }

    pub async fn expire_unpaid(&self, now: Timestamp) -> Result<SweepReport, EngineError> {
        self.run_sweep(JobKind::Expiration, now).await
    }

    pub async fn auto_confirm(&self, now: Timestamp) -> Result<SweepReport, EngineError> {
        self.run_sweep(JobKind::AutoConfirmation, now).await
    }

    pub async fn complete_stays(&self, now: Timestamp) -> Result<SweepReport, EngineError> {
        self.run_sweep(JobKind::Completion, now).await
    }

    pub async fn cancel_overdue(&self, now: Timestamp) -> Result<SweepReport, EngineError> {
        self.run_sweep(JobKind::OverdueCancellation, now).await
    }
}
