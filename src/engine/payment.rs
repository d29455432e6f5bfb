use std::str::FromStr;

use rust_decimal::Decimal;
use serde::Deserialize;
use sha2::{Digest, Sha512};
use tracing::{info, warn};
use ulid::Ulid;

use crate::limits::MAX_WEBHOOK_BODY_BYTES;
use crate::model::*;
use crate::outbox::SideEffect;

use super::lifecycle::record_transition;
use super::{Engine, EngineError};

/// Fields consumed from a gateway payment notification.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayNotification {
    pub order_id: String,
    pub transaction_status: String,
    pub gross_amount: String,
    pub status_code: String,
    pub signature_key: String,
    #[serde(default)]
    pub fraud_status: Option<String>,
    #[serde(default)]
    pub payment_type: Option<String>,
}

impl GatewayNotification {
    pub fn from_json(body: &[u8]) -> Result<Self, EngineError> {
        if body.len() > MAX_WEBHOOK_BODY_BYTES {
            return Err(EngineError::LimitExceeded("notification body too large"));
        }
        serde_json::from_slice(body)
            .map_err(|e| EngineError::Validation(format!("malformed notification: {e}")))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayStatus {
    Capture,
    Settlement,
    Pending,
    Deny,
    Cancel,
    Expire,
    Failure,
}

impl GatewayStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "capture" => Some(GatewayStatus::Capture),
            "settlement" => Some(GatewayStatus::Settlement),
            "pending" => Some(GatewayStatus::Pending),
            "deny" => Some(GatewayStatus::Deny),
            "cancel" => Some(GatewayStatus::Cancel),
            "expire" => Some(GatewayStatus::Expire),
            "failure" => Some(GatewayStatus::Failure),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            GatewayStatus::Capture => "capture",
            GatewayStatus::Settlement => "settlement",
            GatewayStatus::Pending => "pending",
            GatewayStatus::Deny => "deny",
            GatewayStatus::Cancel => "cancel",
            GatewayStatus::Expire => "expire",
            GatewayStatus::Failure => "failure",
        }
    }

    pub fn is_paid(&self) -> bool {
        matches!(self, GatewayStatus::Capture | GatewayStatus::Settlement)
    }

    pub fn booking_status(&self) -> BookingStatus {
        match self {
            GatewayStatus::Capture | GatewayStatus::Settlement | GatewayStatus::Pending => {
                BookingStatus::Processing
            }
            GatewayStatus::Deny
            | GatewayStatus::Cancel
            | GatewayStatus::Expire
            | GatewayStatus::Failure => BookingStatus::Canceled,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookOutcome {
    /// The booking row changed.
    Applied {
        booking_id: Ulid,
        from: BookingStatus,
        to: BookingStatus,
        newly_paid: bool,
    },
    /// Only the gateway record was touched.
    Unchanged {
        booking_id: Ulid,
        status: BookingStatus,
    },
}

/// Hex SHA-512 of `order_id + status_code + gross_amount + server_key`.
pub fn notification_signature(
    order_id: &str,
    status_code: &str,
    gross_amount: &str,
    server_key: &str,
) -> String {
    let mut hasher = Sha512::new();
    hasher.update(order_id.as_bytes());
    hasher.update(status_code.as_bytes());
    hasher.update(gross_amount.as_bytes());
    hasher.update(server_key.as_bytes());
    hex::encode(hasher.finalize())
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.bytes().zip(b.bytes()) {
        diff |= x ^ y;
    }
    diff == 0
}

fn record_webhook(outcome: &'static str) {
    metrics::counter!(crate::observability::WEBHOOKS_TOTAL, "outcome" => outcome).increment(1);
}

impl Engine {
    /// Verify and apply a gateway notification.
    ///
    /// Nothing is read from the payload beyond the signed fields until the
    /// signature matches. The gateway record and the booking are written in
    /// one unit of work.
    pub async fn handle_gateway_notification(
        &self,
        n: &GatewayNotification,
        now: Timestamp,
    ) -> Result<WebhookOutcome, EngineError> {
        let server_key = self
            .settings
            .gateway_server_key
            .as_deref()
            .ok_or(EngineError::GatewayNotConfigured)?;
        let expected =
            notification_signature(&n.order_id, &n.status_code, &n.gross_amount, server_key);
        if !constant_time_eq(&expected, &n.signature_key) {
            warn!("rejected gateway notification with bad signature");
            record_webhook("bad_signature");
            return Err(EngineError::InvalidSignature);
        }

        let mut status = GatewayStatus::parse(&n.transaction_status).ok_or_else(|| {
            EngineError::Validation(format!(
                "unknown transaction status: {:?}",
                n.transaction_status
            ))
        })?;
        if status == GatewayStatus::Capture && n.fraud_status.as_deref() == Some("challenge") {
            status = GatewayStatus::Pending;
        }

        let booking_id = self
            .order_to_booking
            .get(&n.order_id)
            .map(|e| *e.value())
            .ok_or_else(|| EngineError::UnknownOrder(n.order_id.clone()))?;
        let mut guard = self.resolve_booking_write(&booking_id).await?;
        let booking = guard
            .booking(&booking_id)
            .ok_or(EngineError::NotFound(booking_id))?
            .clone();

        let paid_amount = if status.is_paid() {
            let amount = Decimal::from_str(n.gross_amount.trim()).map_err(|_| {
                EngineError::Validation(format!("bad gross_amount: {:?}", n.gross_amount))
            })?;
            if amount != booking.total_amount {
                warn!(
                    "gateway amount {amount} does not match booking {booking_id} total {}",
                    booking.total_amount
                );
                record_webhook("amount_mismatch");
                return Err(EngineError::AmountMismatch(booking_id));
            }
            Some(amount)
        } else {
            None
        };

        let mut payment = guard
            .gateway_payments
            .get(&booking_id)
            .cloned()
            .unwrap_or_else(|| GatewayPayment {
                booking_id,
                provider: self.settings.gateway_provider.clone(),
                provider_ref: n.order_id.clone(),
                status: String::new(),
                paid_amount: None,
                paid_at: None,
                updated_at: now,
            });
        payment.status = status.as_str().to_string();
        payment.updated_at = now;
        if paid_amount.is_some() {
            payment.paid_amount = paid_amount;
            payment.paid_at.get_or_insert(now);
        }
        let mut record = vec![Event::GatewayPaymentRecorded {
            room_id: booking.room_id,
            payment,
        }];

        let from = booking.status;
        let to = status.booking_status();
        let newly_paid = status.is_paid() && booking.paid_at.is_none();
        if from.is_final() || (from == to && !newly_paid) {
            self.persist_and_apply(&mut guard, record).await?;
            info!(
                "gateway {} for booking {booking_id} left status {from}",
                status.as_str()
            );
            record_webhook("unchanged");
            return Ok(WebhookOutcome::Unchanged {
                booking_id,
                status: from,
            });
        }

        let mut next = booking;
        next.status = to;
        next.updated_at = now;
        if to == BookingStatus::Processing {
            next.expires_at = None;
        }
        if newly_paid {
            next.paid_at = Some(now);
        }
        record.push(Event::BookingUpdated { booking: next });
        self.persist_and_apply(&mut guard, record).await?;
        drop(guard);

        if from != to {
            record_transition(from, to, "gateway");
        }
        info!(
            "gateway {} moved booking {booking_id} {from} -> {to}",
            status.as_str()
        );
        record_webhook("applied");
        if newly_paid {
            self.outbox
                .enqueue(SideEffect::PaymentConfirmedEmail { booking_id });
        }
        Ok(WebhookOutcome::Applied {
            booking_id,
            from,
            to,
            newly_paid,
        })
    }

    /// Parse, verify and apply a raw notification body.
    pub async fn handle_gateway_webhook(
        &self,
        body: &[u8],
        now: Timestamp,
    ) -> Result<WebhookOutcome, EngineError> {
        let notification = GatewayNotification::from_json(body)?;
        self.handle_gateway_notification(&notification, now).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_is_sha512_hex() {
        let sig = notification_signature("BK-1", "200", "300.00", "secret");
        assert_eq!(sig.len(), 128);
        assert!(sig.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_eq!(sig, notification_signature("BK-1", "200", "300.00", "secret"));
        assert_ne!(sig, notification_signature("BK-1", "200", "300.00", "other"));
        assert_ne!(sig, notification_signature("BK-1", "201", "300.00", "secret"));
    }

    #[test]
    fn constant_time_eq_is_exact() {
        assert!(constant_time_eq("abc", "abc"));
        assert!(!constant_time_eq("abc", "abd"));
        assert!(!constant_time_eq("abc", "ABC"));
        assert!(!constant_time_eq("abc", "abcd"));
    }

    #[test]
    fn status_mapping() {
        assert_eq!(
            GatewayStatus::parse("settlement").map(|s| s.booking_status()),
            Some(BookingStatus::Processing)
        );
        assert_eq!(
            GatewayStatus::parse("pending").map(|s| s.booking_status()),
            Some(BookingStatus::Processing)
        );
        for s in ["deny", "cancel", "expire", "failure"] {
            assert_eq!(
                GatewayStatus::parse(s).map(|s| s.booking_status()),
                Some(BookingStatus::Canceled)
            );
        }
        assert!(GatewayStatus::parse("refund").is_none());
        assert!(GatewayStatus::Capture.is_paid());
        assert!(!GatewayStatus::Pending.is_paid());
    }

    #[test]
    fn notification_from_json() {
        let body = br#"{"order_id":"BK-1","transaction_status":"capture","gross_amount":"300.00",
            "status_code":"200","signature_key":"x","fraud_status":"accept","extra":1}"#;
        let n = GatewayNotification::from_json(body).unwrap();
        assert_eq!(n.order_id, "BK-1");
        assert_eq!(n.fraud_status.as_deref(), Some("accept"));
        assert!(n.payment_type.is_none());

        assert!(matches!(
            GatewayNotification::from_json(b"{\"order_id\":1}"),
            Err(EngineError::Validation(_))
        ));
        let huge = vec![b' '; MAX_WEBHOOK_BODY_BYTES + 1];
        assert!(matches!(
            GatewayNotification::from_json(&huge),
            Err(EngineError::LimitExceeded(_))
        ));
    }
}
