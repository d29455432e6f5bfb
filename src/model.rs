use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Wall-clock instant, always UTC.
pub type Timestamp = DateTime<Utc>;

/// Half-open night range `[check_in, check_out)`. The checkout day is not a night.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Stay {
    pub check_in: NaiveDate,
    pub check_out: NaiveDate,
}

impl Stay {
    pub fn new(check_in: NaiveDate, check_out: NaiveDate) -> Self {
        debug_assert!(check_in < check_out, "Stay check_in must be before check_out");
        Self { check_in, check_out }
    }

    /// `None` unless `check_out > check_in`.
    pub fn try_new(check_in: NaiveDate, check_out: NaiveDate) -> Option<Self> {
        (check_in < check_out).then_some(Self { check_in, check_out })
    }

    pub fn nights(&self) -> i64 {
        (self.check_out - self.check_in).num_days()
    }

    pub fn overlaps(&self, other: &Stay) -> bool {
        self.check_in < other.check_out && other.check_in < self.check_out
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.check_in <= date && date < self.check_out
    }

    /// Every priced night, in order.
    pub fn dates(&self) -> impl Iterator<Item = NaiveDate> + use<> {
        let end = self.check_out;
        self.check_in.iter_days().take_while(move |d| *d < end)
    }
}

impl fmt::Display for Stay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.check_in, self.check_out)
    }
}

/// Midnight UTC at the start of `date`.
pub fn start_of_day(date: NaiveDate) -> Timestamp {
    date.and_time(NaiveTime::MIN).and_utc()
}

pub fn parse_iso_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").ok()
}

pub fn format_iso_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

// ── Booking ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BookingStatus {
    WaitingPayment,
    WaitingConfirmation,
    Processing,
    Completed,
    Canceled,
    Expired,
}

impl BookingStatus {
    /// Statuses that still occupy the calendar.
    pub const ACTIVE: [BookingStatus; 4] = [
        BookingStatus::WaitingPayment,
        BookingStatus::WaitingConfirmation,
        BookingStatus::Processing,
        BookingStatus::Completed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::WaitingPayment => "WAITING_PAYMENT",
            BookingStatus::WaitingConfirmation => "WAITING_CONFIRMATION",
            BookingStatus::Processing => "PROCESSING",
            BookingStatus::Completed => "COMPLETED",
            BookingStatus::Canceled => "CANCELED",
            BookingStatus::Expired => "EXPIRED",
        }
    }

    pub fn is_active(&self) -> bool {
        Self::ACTIVE.contains(self)
    }

    /// No transition leaves these.
    pub fn is_final(&self) -> bool {
        matches!(
            self,
            BookingStatus::Completed | BookingStatus::Canceled | BookingStatus::Expired
        )
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BookingStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "WAITING_PAYMENT" => Ok(BookingStatus::WaitingPayment),
            "WAITING_CONFIRMATION" => Ok(BookingStatus::WaitingConfirmation),
            "PROCESSING" => Ok(BookingStatus::Processing),
            "COMPLETED" => Ok(BookingStatus::Completed),
            "CANCELED" => Ok(BookingStatus::Canceled),
            "EXPIRED" => Ok(BookingStatus::Expired),
            other => Err(format!("unknown booking status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentMethod {
    ManualTransfer,
    PaymentGateway,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::ManualTransfer => "MANUAL_TRANSFER",
            PaymentMethod::PaymentGateway => "PAYMENT_GATEWAY",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub guest_id: Ulid,
    pub tenant_id: Ulid,
    pub property_id: Ulid,
    pub room_id: Ulid,
    pub order_code: String,
    pub status: BookingStatus,
    pub payment_method: PaymentMethod,
    pub check_in: NaiveDate,
    pub check_out: NaiveDate,
    pub nights: u32,
    pub quantity: u32,
    pub guests: u32,
    /// Snapshot at creation; never recomputed.
    pub price_per_night: Decimal,
    /// Snapshot at creation: `nights * price_per_night`.
    pub total_amount: Decimal,
    pub expires_at: Option<Timestamp>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub paid_at: Option<Timestamp>,
}

impl Booking {
    pub fn stay(&self) -> Stay {
        Stay::new(self.check_in, self.check_out)
    }

    /// A review may be written once the stay is completed and over.
    pub fn is_reviewable(&self, today: NaiveDate, has_review: bool) -> bool {
        self.status == BookingStatus::Completed && self.check_out < today && !has_review
    }
}

/// One blocked calendar day for a room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomAvailability {
    pub room_id: Ulid,
    pub date: NaiveDate,
    pub is_available: bool,
    /// Set when the block was applied for an approved booking.
    pub booking_id: Option<Ulid>,
}

// ── Pricing ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AdjustType {
    Percentage,
    Nominal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceAdjustment {
    pub id: Ulid,
    pub room_id: Ulid,
    pub title: String,
    /// Inclusive.
    pub start_date: NaiveDate,
    /// Inclusive.
    pub end_date: NaiveDate,
    pub adjust_type: AdjustType,
    pub adjust_value: Decimal,
    pub apply_all_dates: bool,
    /// Only consulted when `apply_all_dates` is false.
    pub dates: Vec<NaiveDate>,
    pub created_at: Timestamp,
}

impl PriceAdjustment {
    pub fn applies_on(&self, date: NaiveDate) -> bool {
        if date < self.start_date || date > self.end_date {
            return false;
        }
        self.apply_all_dates || self.dates.contains(&date)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    pub id: Ulid,
    pub tenant_id: Ulid,
    pub property_id: Ulid,
    pub name: String,
    pub base_price: Decimal,
    /// Max guests.
    pub capacity: u32,
    pub created_at: Timestamp,
}

// ── Payments ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentProof {
    pub booking_id: Ulid,
    pub image_ref: String,
    pub uploaded_at: Timestamp,
    pub accepted_at: Option<Timestamp>,
    pub rejected_at: Option<Timestamp>,
    pub reviewed_by: Option<Ulid>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayPayment {
    pub booking_id: Ulid,
    pub provider: String,
    /// The order id the gateway reports back in notifications.
    pub provider_ref: String,
    /// Raw gateway vocabulary (`pending`, `settlement`, ...).
    pub status: String,
    pub paid_amount: Option<Decimal>,
    pub paid_at: Option<Timestamp>,
    pub updated_at: Timestamp,
}

// ── Per-room state ───────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct RoomState {
    pub room: Room,
    /// Sorted by `check_in`.
    pub bookings: Vec<Booking>,
    /// Blocked days keyed by date.
    pub calendar: BTreeMap<NaiveDate, RoomAvailability>,
    /// Sorted by `(created_at, id)`; this is the application order.
    pub adjustments: Vec<PriceAdjustment>,
    pub proofs: HashMap<Ulid, PaymentProof>,
    pub gateway_payments: HashMap<Ulid, GatewayPayment>,
}

impl RoomState {
    pub fn new(room: Room) -> Self {
        Self {
            room,
            bookings: Vec::new(),
            calendar: BTreeMap::new(),
            adjustments: Vec::new(),
            proofs: HashMap::new(),
            gateway_payments: HashMap::new(),
        }
    }

    /// Insert or replace a booking, keeping sort order by check-in.
    pub fn upsert_booking(&mut self, booking: Booking) {
        if let Some(pos) = self.bookings.iter().position(|b| b.id == booking.id) {
            self.bookings.remove(pos);
        }
        let pos = self
            .bookings
            .partition_point(|b| b.check_in <= booking.check_in);
        self.bookings.insert(pos, booking);
    }

    pub fn booking(&self, id: &Ulid) -> Option<&Booking> {
        self.bookings.iter().find(|b| b.id == *id)
    }

    /// Bookings whose stay intersects `stay`, in any status.
    pub fn overlapping(&self, stay: &Stay) -> impl Iterator<Item = &Booking> {
        let right_bound = self
            .bookings
            .partition_point(|b| b.check_in < stay.check_out);
        let from = stay.check_in;
        self.bookings[..right_bound]
            .iter()
            .filter(move |b| b.check_out > from)
    }

    pub fn insert_adjustment(&mut self, adjustment: PriceAdjustment) {
        let key = (adjustment.created_at, adjustment.id);
        let pos = self
            .adjustments
            .partition_point(|a| (a.created_at, a.id) <= key);
        self.adjustments.insert(pos, adjustment);
    }

    pub fn remove_adjustment(&mut self, id: &Ulid) -> Option<PriceAdjustment> {
        let pos = self.adjustments.iter().position(|a| a.id == *id)?;
        Some(self.adjustments.remove(pos))
    }

    /// Whether a day carries an explicit `is_available = false` row.
    pub fn is_blocked(&self, date: NaiveDate) -> bool {
        self.calendar.get(&date).is_some_and(|row| !row.is_available)
    }
}

// ── WAL record format ────────────────────────────────────────────

/// Row writes. A unit of work persists several of these as one WAL record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    RoomCreated {
        room: Room,
    },
    AdjustmentAdded {
        adjustment: PriceAdjustment,
    },
    AdjustmentRemoved {
        id: Ulid,
        room_id: Ulid,
    },
    BookingCreated {
        booking: Booking,
    },
    BookingUpdated {
        booking: Booking,
    },
    ProofRecorded {
        room_id: Ulid,
        proof: PaymentProof,
    },
    GatewayPaymentRecorded {
        room_id: Ulid,
        payment: GatewayPayment,
    },
    DatesBlocked {
        room_id: Ulid,
        dates: Vec<NaiveDate>,
        booking_id: Option<Ulid>,
    },
    DatesUnblocked {
        room_id: Ulid,
        dates: Vec<NaiveDate>,
    },
}

impl Event {
    pub fn room_id(&self) -> Ulid {
        match self {
            Event::RoomCreated { room } => room.id,
            Event::AdjustmentAdded { adjustment } => adjustment.room_id,
            Event::BookingCreated { booking } | Event::BookingUpdated { booking } => {
                booking.room_id
            }
            Event::AdjustmentRemoved { room_id, .. }
            | Event::ProofRecorded { room_id, .. }
            | Event::GatewayPaymentRecorded { room_id, .. }
            | Event::DatesBlocked { room_id, .. }
            | Event::DatesUnblocked { room_id, .. } => *room_id,
        }
    }
}

// ── Scheduled sweeps ─────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum JobKind {
    Expiration,
    AutoConfirmation,
    Completion,
    OverdueCancellation,
}

impl JobKind {
    pub const ALL: [JobKind; 4] = [
        JobKind::Expiration,
        JobKind::AutoConfirmation,
        JobKind::Completion,
        JobKind::OverdueCancellation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Expiration => "expiration",
            JobKind::AutoConfirmation => "auto_confirmation",
            JobKind::Completion => "completion",
            JobKind::OverdueCancellation => "overdue_cancellation",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one sweep run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SweepReport {
    pub job: JobKind,
    pub count: usize,
    pub booking_ids: Vec<Ulid>,
}
