use std::collections::BTreeSet;

use chrono::NaiveDate;
use tracing::{debug, info};
use ulid::Ulid;

use crate::model::*;

use super::conflict::{check_tenant, first_overlap, parse_request_dates};
use super::{Engine, EngineError};

// ── Calendar ──────────────────────────────────────────────────────

/// Nights a room cannot be sold: every night of an active booking plus
/// every `is_available = false` row. Sorted and deduplicated.
pub fn unavailable_dates(rs: &RoomState) -> BTreeSet<NaiveDate> {
    let mut dates: BTreeSet<NaiveDate> = rs
        .bookings
        .iter()
        .filter(|b| b.status.is_active())
        .flat_map(|b| b.stay().dates())
        .collect();
    dates.extend(
        rs.calendar
            .values()
            .filter(|row| !row.is_available)
            .map(|row| row.date),
    );
    dates
}

/// Dates of `stay` whose row is missing or not yet tied to `booking_id`.
fn dates_needing_block(rs: &RoomState, stay: &Stay, booking_id: Ulid) -> Vec<NaiveDate> {
    stay.dates()
        .filter(|d| {
            !rs.calendar
                .get(d)
                .is_some_and(|row| !row.is_available && row.booking_id == Some(booking_id))
        })
        .collect()
}

impl Engine {
    /// Whether an active booking other than `exclude` intersects the stay.
    pub async fn has_overlap(
        &self,
        room_id: Ulid,
        stay: Stay,
        exclude: Option<Ulid>,
    ) -> Result<bool, EngineError> {
        let rs = self.get_room(&room_id).ok_or(EngineError::NotFound(room_id))?;
        let guard = rs.read().await;
        Ok(first_overlap(&guard, &stay, exclude).is_some())
    }

    pub async fn unavailable_dates_for(
        &self,
        room_id: Ulid,
    ) -> Result<Vec<NaiveDate>, EngineError> {
        let rs = self.get_room(&room_id).ok_or(EngineError::NotFound(room_id))?;
        let guard = rs.read().await;
        Ok(unavailable_dates(&guard).into_iter().collect())
    }

    /// Calendar view as `YYYY-MM-DD` strings.
    pub async fn unavailable_iso_dates(&self, room_id: Ulid) -> Result<Vec<String>, EngineError> {
        Ok(self
            .unavailable_dates_for(room_id)
            .await?
            .into_iter()
            .map(format_iso_date)
            .collect())
    }

    /// Block every night of `stay` on behalf of a booking. Repeating the call
    /// for the same booking writes nothing. Returns the number of rows written.
    pub async fn block_date_range(
        &self,
        room_id: Ulid,
        stay: Stay,
        booking_id: Ulid,
    ) -> Result<usize, EngineError> {
        let rs = self.get_room(&room_id).ok_or(EngineError::NotFound(room_id))?;
        let mut guard = rs.write().await;
        let dates = dates_needing_block(&guard, &stay, booking_id);
        if dates.is_empty() {
            debug!("dates {stay} already blocked for booking {booking_id}");
            return Ok(0);
        }
        let written = dates.len();
        let record = vec![Event::DatesBlocked {
            room_id,
            dates,
            booking_id: Some(booking_id),
        }];
        self.persist_and_apply(&mut guard, record).await?;
        info!("blocked {written} nights {stay} of room {room_id} for booking {booking_id}");
        Ok(written)
    }

    /// Manual tenant block. Days that are already blocked keep their row.
    /// Returns the dates that were newly blocked.
    pub async fn block_room_dates(
        &self,
        room_id: Ulid,
        tenant_id: Ulid,
        dates: &[String],
    ) -> Result<Vec<NaiveDate>, EngineError> {
        let dates = parse_request_dates(dates)?;
        let rs = self.get_room(&room_id).ok_or(EngineError::NotFound(room_id))?;
        let mut guard = rs.write().await;
        check_tenant(&guard, tenant_id)?;

        let fresh: Vec<NaiveDate> = dates.into_iter().filter(|d| !guard.is_blocked(*d)).collect();
        if fresh.is_empty() {
            return Ok(fresh);
        }
        let record = vec![Event::DatesBlocked {
            room_id,
            dates: fresh.clone(),
            booking_id: None,
        }];
        self.persist_and_apply(&mut guard, record).await?;
        info!("tenant {tenant_id} blocked {} dates on room {room_id}", fresh.len());
        Ok(fresh)
    }

    /// Delete manual block rows. Rows tied to a booking are left alone.
    /// Returns the dates that were unblocked.
    pub async fn unblock_room_dates(
        &self,
        room_id: Ulid,
        tenant_id: Ulid,
        dates: &[String],
    ) -> Result<Vec<NaiveDate>, EngineError> {
        let dates = parse_request_dates(dates)?;
        let rs = self.get_room(&room_id).ok_or(EngineError::NotFound(room_id))?;
        let mut guard = rs.write().await;
        check_tenant(&guard, tenant_id)?;

        let removable: Vec<NaiveDate> = dates
            .into_iter()
            .filter(|d| guard.calendar.get(d).is_some_and(|row| row.booking_id.is_none()))
            .collect();
        if removable.is_empty() {
            return Ok(removable);
        }
        let record = vec![Event::DatesUnblocked {
            room_id,
            dates: removable.clone(),
        }];
        self.persist_and_apply(&mut guard, record).await?;
        info!("tenant {tenant_id} unblocked {} dates on room {room_id}", removable.len());
        Ok(removable)
    }
}
