/// Longest bookable stay.
pub const MAX_STAY_NIGHTS: i64 = 365;

/// Units per booking.
pub const MAX_BOOKING_QUANTITY: u32 = 10;

/// Rooms per engine.
pub const MAX_ROOMS: usize = 100_000;

/// Booking rows retained per room.
pub const MAX_BOOKINGS_PER_ROOM: usize = 50_000;

/// Price adjustments per room.
pub const MAX_ADJUSTMENTS_PER_ROOM: usize = 1_000;

/// Largest room base price.
pub const MAX_BASE_PRICE: i64 = 1_000_000_000;

/// Largest `PERCENTAGE` adjustment value.
pub const MAX_ADJUSTMENT_PERCENT: i64 = 1_000;

/// Largest magnitude of a `NOMINAL` adjustment value.
pub const MAX_ADJUSTMENT_NOMINAL: i64 = 1_000_000_000;

/// Explicit dates on a single price adjustment.
pub const MAX_ADJUSTMENT_DATES: usize = 366;

/// Dates accepted by one block/unblock request.
pub const MAX_DATES_PER_REQUEST: usize = 366;

/// Widest window a price or availability query may scan.
pub const MAX_QUERY_NIGHTS: i64 = 366;

pub const MAX_NAME_LEN: usize = 256;

pub const MAX_IMAGE_REF_LEN: usize = 2048;

/// Largest raw webhook body accepted.
pub const MAX_WEBHOOK_BODY_BYTES: usize = 64 * 1024;
