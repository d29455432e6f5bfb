use chrono::NaiveDate;
use tracing::info;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::outbox::SideEffect;

use super::conflict::{
    check_no_overlap, check_not_blocked, check_tenant, validate_guests, validate_stay,
};
use super::queries::StayQuote;
use super::{Engine, EngineError};

/// A guest's booking request.
#[derive(Debug, Clone)]
pub struct NewBooking {
    pub guest_id: Ulid,
    pub room_id: Ulid,
    pub check_in: NaiveDate,
    pub check_out: NaiveDate,
    pub guests: u32,
    pub quantity: u32,
    pub payment_method: PaymentMethod,
}

/// `BK-YYYYMMDD-XXXXXXXX`: creation day plus the random tail of the id.
pub(super) fn order_code(id: Ulid, now: Timestamp) -> String {
    let id = id.to_string();
    let tail = &id[id.len() - 8..];
    format!("BK-{}-{tail}", now.format("%Y%m%d"))
}

pub(super) fn transitioned(booking: &Booking, to: BookingStatus, now: Timestamp) -> Booking {
    let mut next = booking.clone();
    next.status = to;
    next.updated_at = now;
    next
}

pub(super) fn record_transition(from: BookingStatus, to: BookingStatus, trigger: &'static str) {
    metrics::counter!(
        crate::observability::BOOKING_TRANSITIONS_TOTAL,
        "from" => from.as_str(),
        "to" => to.as_str(),
        "trigger" => trigger
    )
    .increment(1);
}

fn expect_status(
    booking: &Booking,
    expected: BookingStatus,
    action: &'static str,
) -> Result<(), EngineError> {
    if booking.status != expected {
        return Err(EngineError::InvalidTransition {
            id: booking.id,
            status: booking.status,
            action,
        });
    }
    Ok(())
}

fn booking_in<'a>(rs: &'a RoomState, id: &Ulid) -> Result<&'a Booking, EngineError> {
    rs.booking(id).ok_or(EngineError::NotFound(*id))
}

impl Engine {
    /// Create a booking in WAITING_PAYMENT with its price snapshot.
    pub async fn create_booking(
        &self,
        req: NewBooking,
        now: Timestamp,
    ) -> Result<Booking, EngineError> {
        validate_guests(req.guests, req.quantity)?;
        let stay = validate_stay(req.check_in, req.check_out, MAX_STAY_NIGHTS)?;
        if stay.check_in < now.date_naive() {
            return Err(EngineError::Validation("check-in date is in the past".into()));
        }

        let rs = self
            .get_room(&req.room_id)
            .ok_or(EngineError::NotFound(req.room_id))?;
        let mut guard = rs.write().await;
        if guard.bookings.len() >= MAX_BOOKINGS_PER_ROOM {
            return Err(EngineError::LimitExceeded("too many bookings on room"));
        }
        if guard.room.capacity < req.guests {
            return Err(EngineError::CapacityExceeded {
                capacity: guard.room.capacity,
                guests: req.guests,
            });
        }
        check_not_blocked(&guard, &stay)?;
        check_no_overlap(&guard, &stay, None)?;

        let quote = StayQuote::for_room(&guard, stay, req.quantity)?;
        let id = Ulid::new();
        let booking = Booking {
            id,
            guest_id: req.guest_id,
            tenant_id: guard.room.tenant_id,
            property_id: guard.room.property_id,
            room_id: req.room_id,
            order_code: order_code(id, now),
            status: BookingStatus::WaitingPayment,
            payment_method: req.payment_method,
            check_in: stay.check_in,
            check_out: stay.check_out,
            nights: quote.nights,
            quantity: req.quantity,
            guests: req.guests,
            price_per_night: quote.price_per_night,
            total_amount: quote.total_amount,
            expires_at: Some(now + self.settings.payment_window),
            created_at: now,
            updated_at: now,
            paid_at: None,
        };

        let mut record = vec![Event::BookingCreated {
            booking: booking.clone(),
        }];
        if booking.payment_method == PaymentMethod::PaymentGateway {
            record.push(Event::GatewayPaymentRecorded {
                room_id: booking.room_id,
                payment: GatewayPayment {
                    booking_id: id,
                    provider: self.settings.gateway_provider.clone(),
                    provider_ref: booking.order_code.clone(),
                    status: "pending".into(),
                    paid_amount: None,
                    paid_at: None,
                    updated_at: now,
                },
            });
        }
        self.persist_and_apply(&mut guard, record).await?;

        metrics::counter!(
            crate::observability::BOOKINGS_CREATED_TOTAL,
            "payment_method" => booking.payment_method.as_str()
        )
        .increment(1);
        info!(
            "booking {} ({}) created on room {} for {}, total {}",
            booking.id, booking.order_code, booking.room_id, stay, booking.total_amount
        );
        Ok(booking)
    }

    /// Guest uploads a transfer receipt: WAITING_PAYMENT → WAITING_CONFIRMATION.
    pub async fn upload_payment_proof(
        &self,
        booking_id: Ulid,
        guest_id: Ulid,
        image_ref: String,
        now: Timestamp,
    ) -> Result<Booking, EngineError> {
        if image_ref.trim().is_empty() {
            return Err(EngineError::Validation("payment proof image is required".into()));
        }
        if image_ref.len() > MAX_IMAGE_REF_LEN {
            return Err(EngineError::LimitExceeded("image reference too long"));
        }
        let mut guard = self.resolve_booking_write(&booking_id).await?;
        let booking = booking_in(&guard, &booking_id)?;
        if booking.guest_id != guest_id {
            return Err(EngineError::Forbidden(booking_id));
        }
        if booking.payment_method != PaymentMethod::ManualTransfer {
            return Err(EngineError::Validation(
                "payment proofs are only accepted for manual transfers".into(),
            ));
        }
        expect_status(booking, BookingStatus::WaitingPayment, "upload proof for")?;
        if booking.expires_at.is_some_and(|deadline| now > deadline) {
            return Err(EngineError::PaymentWindowClosed(booking_id));
        }

        let mut next = transitioned(booking, BookingStatus::WaitingConfirmation, now);
        next.expires_at = None;
        let proof = PaymentProof {
            booking_id,
            image_ref,
            uploaded_at: now,
            accepted_at: None,
            rejected_at: None,
            reviewed_by: None,
        };
        let record = vec![
            Event::ProofRecorded {
                room_id: next.room_id,
                proof,
            },
            Event::BookingUpdated {
                booking: next.clone(),
            },
        ];
        self.persist_and_apply(&mut guard, record).await?;
        record_transition(BookingStatus::WaitingPayment, next.status, "proof_upload");
        info!("payment proof uploaded for booking {booking_id}");
        Ok(next)
    }

    /// Guest cancels an unpaid booking.
    pub async fn cancel_booking(
        &self,
        booking_id: Ulid,
        guest_id: Ulid,
        now: Timestamp,
    ) -> Result<Booking, EngineError> {
        let mut guard = self.resolve_booking_write(&booking_id).await?;
        let booking = booking_in(&guard, &booking_id)?;
        if booking.guest_id != guest_id {
            return Err(EngineError::Forbidden(booking_id));
        }
        expect_status(booking, BookingStatus::WaitingPayment, "cancel")?;
        if guard.proofs.contains_key(&booking_id) {
            return Err(EngineError::ProofSubmitted(booking_id));
        }

        let next = transitioned(booking, BookingStatus::Canceled, now);
        let record = vec![Event::BookingUpdated {
            booking: next.clone(),
        }];
        self.persist_and_apply(&mut guard, record).await?;
        record_transition(BookingStatus::WaitingPayment, next.status, "guest_cancel");
        info!("booking {booking_id} canceled by guest");
        Ok(next)
    }

    /// Tenant accepts the proof: WAITING_CONFIRMATION → PROCESSING.
    ///
    /// Re-checks overlap against every other active booking first, since
    /// time has passed between upload and review. Calendar blocking and the
    /// confirmation email go to the outbox after the commit.
    pub async fn approve_payment_proof(
        &self,
        booking_id: Ulid,
        tenant_id: Ulid,
        now: Timestamp,
    ) -> Result<Booking, EngineError> {
        let mut guard = self.resolve_booking_write(&booking_id).await?;
        check_tenant(&guard, tenant_id)?;
        let booking = booking_in(&guard, &booking_id)?;
        let proof = guard
            .proofs
            .get(&booking_id)
            .ok_or(EngineError::ProofMissing(booking_id))?;
        if proof.accepted_at.is_some() {
            return Err(EngineError::ProofAlreadyAccepted(booking_id));
        }
        expect_status(booking, BookingStatus::WaitingConfirmation, "approve")?;
        let stay = booking.stay();
        check_no_overlap(&guard, &stay, Some(booking_id))?;

        let mut proof = proof.clone();
        proof.accepted_at = Some(now);
        proof.rejected_at = None;
        proof.reviewed_by = Some(tenant_id);
        let mut next = transitioned(booking, BookingStatus::Processing, now);
        next.paid_at = Some(now);
        let record = vec![
            Event::ProofRecorded {
                room_id: next.room_id,
                proof,
            },
            Event::BookingUpdated {
                booking: next.clone(),
            },
        ];
        self.persist_and_apply(&mut guard, record).await?;
        drop(guard);

        record_transition(BookingStatus::WaitingConfirmation, next.status, "tenant_approve");
        info!("payment proof for booking {booking_id} approved by {tenant_id}");
        self.outbox.enqueue(SideEffect::BlockDates {
            room_id: next.room_id,
            booking_id,
            stay,
        });
        self.outbox
            .enqueue(SideEffect::PaymentConfirmedEmail { booking_id });
        Ok(next)
    }

    /// Tenant rejects the proof: back to WAITING_PAYMENT with a fresh window.
    pub async fn reject_payment_proof(
        &self,
        booking_id: Ulid,
        tenant_id: Ulid,
        now: Timestamp,
    ) -> Result<Booking, EngineError> {
        let mut guard = self.resolve_booking_write(&booking_id).await?;
        check_tenant(&guard, tenant_id)?;
        let booking = booking_in(&guard, &booking_id)?;
        let proof = guard
            .proofs
            .get(&booking_id)
            .ok_or(EngineError::ProofMissing(booking_id))?;
        if proof.rejected_at.is_some() {
            return Err(EngineError::ProofAlreadyRejected(booking_id));
        }
        expect_status(booking, BookingStatus::WaitingConfirmation, "reject")?;

        let mut proof = proof.clone();
        proof.rejected_at = Some(now);
        proof.accepted_at = None;
        proof.reviewed_by = Some(tenant_id);
        let mut next = transitioned(booking, BookingStatus::WaitingPayment, now);
        next.expires_at = Some(now + self.settings.payment_window);
        let record = vec![
            Event::ProofRecorded {
                room_id: next.room_id,
                proof,
            },
            Event::BookingUpdated {
                booking: next.clone(),
            },
        ];
        self.persist_and_apply(&mut guard, record).await?;
        record_transition(BookingStatus::WaitingConfirmation, next.status, "tenant_reject");
        info!("payment proof for booking {booking_id} rejected by {tenant_id}");
        Ok(next)
    }
}
