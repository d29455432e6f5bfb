use async_trait::async_trait;
use tracing::info;

use crate::model::Booking;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailError(pub String);

impl std::fmt::Display for MailError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "mail delivery failed: {}", self.0)
    }
}

impl std::error::Error for MailError {}

/// Outbound email. Templating and transport live behind this trait.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send_payment_confirmation(&self, booking: &Booking) -> Result<(), MailError>;
}

/// Writes the message to the log instead of delivering it.
#[derive(Debug, Default)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send_payment_confirmation(&self, booking: &Booking) -> Result<(), MailError> {
        info!(
            booking_id = %booking.id,
            guest_id = %booking.guest_id,
            order = %booking.order_code,
            "payment confirmed for stay {} → {} ({} nights, total {})",
            booking.check_in,
            booking.check_out,
            booking.nights,
            booking.total_amount
        );
        Ok(())
    }
}
