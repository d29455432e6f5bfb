use chrono::NaiveDate;
use rust_decimal::Decimal;

use crate::model::*;

use super::EngineError;

/// Per-night price of a room on `date`.
///
/// Starts from the base price and applies every adjustment whose window
/// (and, when not `apply_all_dates`, explicit date list) covers `date`.
/// Adjustments compound in `(created_at, id)` order: `PERCENTAGE` multiplies
/// by `1 + value/100`, `NOMINAL` adds `value`. The result is clamped to zero
/// and rounded to cents. A price that leaves the decimal range is
/// `LimitExceeded`.
pub fn effective_price(rs: &RoomState, date: NaiveDate) -> Result<Decimal, EngineError> {
    let mut price = rs.room.base_price;
    for adj in rs.adjustments.iter().filter(|a| a.applies_on(date)) {
        let next = match adj.adjust_type {
            AdjustType::Percentage => Decimal::ONE
                .checked_add(adj.adjust_value / Decimal::ONE_HUNDRED)
                .and_then(|factor| price.checked_mul(factor)),
            AdjustType::Nominal => price.checked_add(adj.adjust_value),
        };
        price = next.ok_or(EngineError::LimitExceeded("price out of range"))?;
    }
    Ok(price.max(Decimal::ZERO).round_dp(2))
}

/// Cheapest night of `stay`, or today's price when no stay is given.
pub fn min_effective_price(
    rs: &RoomState,
    stay: Option<Stay>,
    today: NaiveDate,
) -> Result<Decimal, EngineError> {
    let Some(stay) = stay else {
        return effective_price(rs, today);
    };
    let mut min: Option<Decimal> = None;
    for date in stay.dates() {
        let price = effective_price(rs, date)?;
        min = Some(min.map_or(price, |m| m.min(price)));
    }
    Ok(min.unwrap_or(Decimal::ZERO))
}

/// Cheapest `min_effective_price` across `rooms`; zero for an empty set.
pub fn min_price_across_rooms<'a>(
    rooms: impl IntoIterator<Item = &'a RoomState>,
    stay: Option<Stay>,
    today: NaiveDate,
) -> Result<Decimal, EngineError> {
    let mut min: Option<Decimal> = None;
    for rs in rooms {
        let price = min_effective_price(rs, stay, today)?;
        min = Some(min.map_or(price, |m| m.min(price)));
    }
    Ok(min.unwrap_or(Decimal::ZERO))
}

/// Capacity and manual-block check only. Other bookings are not consulted.
pub fn is_room_available(rs: &RoomState, stay: &Stay, guests: u32) -> bool {
    if rs.room.capacity < guests {
        return false;
    }
    !stay.dates().any(|d| rs.is_blocked(d))
}
