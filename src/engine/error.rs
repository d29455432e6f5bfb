use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::BookingStatus;

/// Coarse taxonomy callers map onto responses (4xx vs 5xx, retry or not).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Validation,
    NotFound,
    Forbidden,
    Conflict,
    Infrastructure,
}

#[derive(Debug)]
pub enum EngineError {
    NotFound(Ulid),
    UnknownOrder(String),
    Forbidden(Ulid),
    Validation(String),
    LimitExceeded(&'static str),
    CapacityExceeded { capacity: u32, guests: u32 },
    DateBlocked(NaiveDate),
    Conflict(Ulid),
    InvalidTransition {
        id: Ulid,
        status: BookingStatus,
        action: &'static str,
    },
    PaymentWindowClosed(Ulid),
    ProofMissing(Ulid),
    ProofAlreadyAccepted(Ulid),
    ProofAlreadyRejected(Ulid),
    ProofSubmitted(Ulid),
    AmountMismatch(Ulid),
    InvalidSignature,
    GatewayNotConfigured,
    WalError(String),
}

impl EngineError {
    pub fn class(&self) -> ErrorClass {
        match self {
            EngineError::Validation(_)
            | EngineError::LimitExceeded(_)
            | EngineError::CapacityExceeded { .. }
            | EngineError::InvalidSignature => ErrorClass::Validation,
            EngineError::NotFound(_) | EngineError::UnknownOrder(_) => ErrorClass::NotFound,
            EngineError::Forbidden(_) => ErrorClass::Forbidden,
            EngineError::DateBlocked(_)
            | EngineError::Conflict(_)
            | EngineError::InvalidTransition { .. }
            | EngineError::PaymentWindowClosed(_)
            | EngineError::ProofMissing(_)
            | EngineError::ProofAlreadyAccepted(_)
            | EngineError::ProofAlreadyRejected(_)
            | EngineError::ProofSubmitted(_)
            | EngineError::AmountMismatch(_) => ErrorClass::Conflict,
            EngineError::GatewayNotConfigured | EngineError::WalError(_) => {
                ErrorClass::Infrastructure
            }
        }
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::UnknownOrder(order) => write!(f, "no booking for order: {order}"),
            EngineError::Forbidden(id) => write!(f, "not permitted to act on: {id}"),
            EngineError::Validation(msg) => write!(f, "invalid request: {msg}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::CapacityExceeded { capacity, guests } => {
                write!(f, "{guests} guests exceed room capacity {capacity}")
            }
            EngineError::DateBlocked(date) => write!(f, "room is not available on {date}"),
            EngineError::Conflict(id) => write!(f, "dates overlap booking: {id}"),
            EngineError::InvalidTransition { id, status, action } => {
                write!(f, "cannot {action} booking {id} in status {status}")
            }
            EngineError::PaymentWindowClosed(id) => {
                write!(f, "payment window for booking {id} has closed")
            }
            EngineError::ProofMissing(id) => write!(f, "booking {id} has no payment proof"),
            EngineError::ProofAlreadyAccepted(id) => {
                write!(f, "payment proof for booking {id} was already accepted")
            }
            EngineError::ProofAlreadyRejected(id) => {
                write!(f, "payment proof for booking {id} was already rejected")
            }
            EngineError::ProofSubmitted(id) => {
                write!(f, "booking {id} already has a payment proof")
            }
            EngineError::AmountMismatch(id) => {
                write!(f, "paid amount does not match total of booking {id}")
            }
            EngineError::InvalidSignature => write!(f, "invalid notification signature"),
            EngineError::GatewayNotConfigured => write!(f, "payment gateway is not configured"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
