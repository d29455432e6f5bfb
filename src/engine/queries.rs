use std::collections::BTreeMap;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use tokio::sync::OwnedRwLockReadGuard;
use tracing::warn;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::conflict::{first_overlap, validate_stay};
use super::pricing::{
    effective_price, is_room_available, min_effective_price, min_price_across_rooms,
};
use super::{Engine, EngineError};

/// Price of a stay in one room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StayQuote {
    pub room_id: Ulid,
    pub stay: Stay,
    pub nights: u32,
    pub quantity: u32,
    /// Effective price of every night, for display.
    pub nightly: Vec<(NaiveDate, Decimal)>,
    /// Check-in night price times quantity. This is what a booking snapshots.
    pub price_per_night: Decimal,
    pub total_amount: Decimal,
}

impl StayQuote {
    pub(super) fn for_room(
        rs: &RoomState,
        stay: Stay,
        quantity: u32,
    ) -> Result<Self, EngineError> {
        let nightly = stay
            .dates()
            .map(|d| effective_price(rs, d).map(|price| (d, price)))
            .collect::<Result<Vec<_>, _>>()?;
        let nights = nightly.len() as u32;
        let check_in_price = nightly.first().map_or(Decimal::ZERO, |(_, price)| *price);
        let price_per_night = check_in_price
            .checked_mul(Decimal::from(quantity))
            .ok_or(EngineError::LimitExceeded("price out of range"))?;
        let total_amount = price_per_night
            .checked_mul(Decimal::from(nights))
            .ok_or(EngineError::LimitExceeded("price out of range"))?;
        Ok(Self {
            room_id: rs.room.id,
            stay,
            nights,
            quantity,
            nightly,
            price_per_night,
            total_amount,
        })
    }
}

#[derive(Debug, Clone)]
pub struct SearchQuery {
    pub check_in: NaiveDate,
    pub check_out: NaiveDate,
    pub guests: u32,
}

/// One property in search results with the rooms that can take the stay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyQuote {
    pub property_id: Ulid,
    pub tenant_id: Ulid,
    pub min_price: Decimal,
    pub room_ids: Vec<Ulid>,
}

impl Engine {
    pub async fn room_info(&self, room_id: &Ulid) -> Option<Room> {
        let rs = self.get_room(room_id)?;
        let guard = rs.read().await;
        Some(guard.room.clone())
    }

    pub async fn get_booking(&self, booking_id: &Ulid) -> Option<Booking> {
        let room_id = self.get_room_for_booking(booking_id)?;
        let rs = self.get_room(&room_id)?;
        let guard = rs.read().await;
        guard.booking(booking_id).cloned()
    }

    pub async fn get_payment_proof(&self, booking_id: &Ulid) -> Option<PaymentProof> {
        let room_id = self.get_room_for_booking(booking_id)?;
        let rs = self.get_room(&room_id)?;
        let guard = rs.read().await;
        guard.proofs.get(booking_id).cloned()
    }

    pub async fn get_gateway_payment(&self, booking_id: &Ulid) -> Option<GatewayPayment> {
        let room_id = self.get_room_for_booking(booking_id)?;
        let rs = self.get_room(&room_id)?;
        let guard = rs.read().await;
        guard.gateway_payments.get(booking_id).cloned()
    }

    /// Every booking on a room in any status, ordered by check-in.
    pub async fn room_bookings(&self, room_id: Ulid) -> Result<Vec<Booking>, EngineError> {
        let rs = self.get_room(&room_id).ok_or(EngineError::NotFound(room_id))?;
        let guard = rs.read().await;
        Ok(guard.bookings.clone())
    }

    pub async fn quote_stay(
        &self,
        room_id: Ulid,
        check_in: NaiveDate,
        check_out: NaiveDate,
        quantity: u32,
    ) -> Result<StayQuote, EngineError> {
        let stay = validate_stay(check_in, check_out, MAX_QUERY_NIGHTS)?;
        if !(1..=MAX_BOOKING_QUANTITY).contains(&quantity) {
            return Err(EngineError::Validation(format!(
                "quantity must be between 1 and {MAX_BOOKING_QUANTITY}"
            )));
        }
        let rs = self.get_room(&room_id).ok_or(EngineError::NotFound(room_id))?;
        let guard = rs.read().await;
        StayQuote::for_room(&guard, stay, quantity)
    }

    /// Properties with at least one room free for the stay, cheapest first.
    ///
    /// A room qualifies when it passes capacity and manual blocks and no
    /// active booking overlaps the stay. Rooms whose stored adjustments
    /// price the stay out of range are logged and left out.
    pub async fn search_properties(
        &self,
        query: &SearchQuery,
        today: NaiveDate,
    ) -> Result<Vec<PropertyQuote>, EngineError> {
        let stay = validate_stay(query.check_in, query.check_out, MAX_QUERY_NIGHTS)?;
        if query.guests < 1 {
            return Err(EngineError::Validation("at least one guest is required".into()));
        }

        let mut by_property: BTreeMap<Ulid, Vec<OwnedRwLockReadGuard<RoomState>>> =
            BTreeMap::new();
        for room_id in self.room_ids() {
            let Some(rs) = self.get_room(&room_id) else {
                continue;
            };
            let guard = rs.read_owned().await;
            if !is_room_available(&guard, &stay, query.guests)
                || first_overlap(&guard, &stay, None).is_some()
            {
                continue;
            }
            if let Err(e) = min_effective_price(&guard, Some(stay), today) {
                warn!("search skipped room {room_id}: {e}");
                continue;
            }
            by_property
                .entry(guard.room.property_id)
                .or_default()
                .push(guard);
        }

        let mut results = by_property
            .into_iter()
            .map(|(property_id, rooms)| -> Result<PropertyQuote, EngineError> {
                Ok(PropertyQuote {
                    property_id,
                    tenant_id: rooms[0].room.tenant_id,
                    min_price: min_price_across_rooms(
                        rooms.iter().map(|g| &**g),
                        Some(stay),
                        today,
                    )?,
                    room_ids: rooms.iter().map(|g| g.room.id).collect(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        results.sort_by(|a, b| {
            a.min_price
                .cmp(&b.min_price)
                .then(a.property_id.cmp(&b.property_id))
        });
        Ok(results)
    }
}
