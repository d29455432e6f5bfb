use chrono::NaiveDate;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::EngineError;

/// Shape checks shared by booking creation and search.
pub(crate) fn validate_stay(
    check_in: NaiveDate,
    check_out: NaiveDate,
    max_nights: i64,
) -> Result<Stay, EngineError> {
    let stay = Stay::try_new(check_in, check_out)
        .ok_or_else(|| EngineError::Validation("check-out must be after check-in".into()))?;
    if stay.nights() > max_nights {
        return Err(EngineError::Validation(format!(
            "stay of {} nights exceeds {max_nights}",
            stay.nights()
        )));
    }
    Ok(stay)
}

pub(crate) fn validate_guests(guests: u32, quantity: u32) -> Result<(), EngineError> {
    if guests < 1 {
        return Err(EngineError::Validation("at least one guest is required".into()));
    }
    if quantity < 1 {
        return Err(EngineError::Validation("quantity must be at least 1".into()));
    }
    if quantity > MAX_BOOKING_QUANTITY {
        return Err(EngineError::LimitExceeded("quantity too large"));
    }
    Ok(())
}

/// First active booking overlapping `stay`, ignoring `exclude`.
pub(crate) fn first_overlap(rs: &RoomState, stay: &Stay, exclude: Option<Ulid>) -> Option<Ulid> {
    rs.overlapping(stay)
        .filter(|b| b.status.is_active())
        .find(|b| Some(b.id) != exclude)
        .map(|b| b.id)
}

pub(crate) fn check_no_overlap(
    rs: &RoomState,
    stay: &Stay,
    exclude: Option<Ulid>,
) -> Result<(), EngineError> {
    match first_overlap(rs, stay, exclude) {
        Some(id) => Err(EngineError::Conflict(id)),
        None => Ok(()),
    }
}

pub(crate) fn check_not_blocked(rs: &RoomState, stay: &Stay) -> Result<(), EngineError> {
    match stay.dates().find(|d| rs.is_blocked(*d)) {
        Some(date) => Err(EngineError::DateBlocked(date)),
        None => Ok(()),
    }
}

pub(crate) fn check_tenant(rs: &RoomState, tenant_id: Ulid) -> Result<(), EngineError> {
    if rs.room.tenant_id != tenant_id {
        return Err(EngineError::Forbidden(rs.room.id));
    }
    Ok(())
}

/// Parse a request's ISO date strings, deduplicated and ascending.
pub(crate) fn parse_request_dates(raw: &[String]) -> Result<Vec<NaiveDate>, EngineError> {
    if raw.len() > MAX_DATES_PER_REQUEST {
        return Err(EngineError::LimitExceeded("too many dates in request"));
    }
    let mut dates = Vec::with_capacity(raw.len());
    for s in raw {
        let date = parse_iso_date(s)
            .ok_or_else(|| EngineError::Validation(format!("not an ISO date: {s:?}")))?;
        dates.push(date);
    }
    dates.sort();
    dates.dedup();
    Ok(dates)
}
