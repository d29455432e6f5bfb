use std::sync::Arc;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use tokio::sync::RwLock;
use tracing::info;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::conflict::check_tenant;
use super::{Engine, EngineError};

#[derive(Debug, Clone)]
pub struct NewRoom {
    pub tenant_id: Ulid,
    pub property_id: Ulid,
    pub name: String,
    pub base_price: Decimal,
    pub capacity: u32,
}

#[derive(Debug, Clone)]
pub struct NewPriceAdjustment {
    pub title: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub adjust_type: AdjustType,
    pub adjust_value: Decimal,
    pub apply_all_dates: bool,
    pub dates: Vec<NaiveDate>,
}

fn validate_adjustment(req: &NewPriceAdjustment) -> Result<(), EngineError> {
    if req.title.trim().is_empty() {
        return Err(EngineError::Validation("adjustment title is required".into()));
    }
    if req.title.len() > MAX_NAME_LEN {
        return Err(EngineError::LimitExceeded("adjustment title too long"));
    }
    if req.end_date < req.start_date {
        return Err(EngineError::Validation(
            "adjustment end date is before its start date".into(),
        ));
    }
    if (req.end_date - req.start_date).num_days() > MAX_QUERY_NIGHTS {
        return Err(EngineError::LimitExceeded("adjustment window too wide"));
    }
    if req.adjust_type == AdjustType::Percentage && req.adjust_value <= -Decimal::ONE_HUNDRED {
        return Err(EngineError::Validation(
            "percentage adjustment must be greater than -100".into(),
        ));
    }
    match req.adjust_type {
        AdjustType::Percentage if req.adjust_value > Decimal::from(MAX_ADJUSTMENT_PERCENT) => {
            return Err(EngineError::LimitExceeded("percentage adjustment too large"));
        }
        AdjustType::Nominal if req.adjust_value.abs() > Decimal::from(MAX_ADJUSTMENT_NOMINAL) => {
            return Err(EngineError::LimitExceeded("nominal adjustment too large"));
        }
        _ => {}
    }
    if !req.apply_all_dates && req.dates.is_empty() {
        return Err(EngineError::Validation(
            "explicit dates are required unless the adjustment applies to all dates".into(),
        ));
    }
    if req.dates.len() > MAX_ADJUSTMENT_DATES {
        return Err(EngineError::LimitExceeded("too many adjustment dates"));
    }
    Ok(())
}

impl Engine {
    pub async fn create_room(&self, req: NewRoom, now: Timestamp) -> Result<Room, EngineError> {
        if self.rooms.len() >= MAX_ROOMS {
            return Err(EngineError::LimitExceeded("too many rooms"));
        }
        if req.name.trim().is_empty() {
            return Err(EngineError::Validation("room name is required".into()));
        }
        if req.name.len() > MAX_NAME_LEN {
            return Err(EngineError::LimitExceeded("room name too long"));
        }
        if req.base_price < Decimal::ZERO {
            return Err(EngineError::Validation("base price cannot be negative".into()));
        }
        if req.base_price > Decimal::from(MAX_BASE_PRICE) {
            return Err(EngineError::LimitExceeded("base price too large"));
        }
        if req.capacity < 1 {
            return Err(EngineError::Validation("capacity must be at least 1".into()));
        }

        let room = Room {
            id: Ulid::new(),
            tenant_id: req.tenant_id,
            property_id: req.property_id,
            name: req.name,
            base_price: req.base_price,
            capacity: req.capacity,
            created_at: now,
        };
        self.wal_append(vec![Event::RoomCreated { room: room.clone() }])
            .await?;
        self.rooms
            .insert(room.id, Arc::new(RwLock::new(RoomState::new(room.clone()))));
        metrics::gauge!(crate::observability::ROOMS_ACTIVE).set(self.rooms.len() as f64);
        info!("room {} created for property {}", room.id, room.property_id);
        Ok(room)
    }

    pub async fn add_price_adjustment(
        &self,
        room_id: Ulid,
        tenant_id: Ulid,
        req: NewPriceAdjustment,
        now: Timestamp,
    ) -> Result<PriceAdjustment, EngineError> {
        validate_adjustment(&req)?;
        let rs = self.get_room(&room_id).ok_or(EngineError::NotFound(room_id))?;
        let mut guard = rs.write().await;
        check_tenant(&guard, tenant_id)?;
        if guard.adjustments.len() >= MAX_ADJUSTMENTS_PER_ROOM {
            return Err(EngineError::LimitExceeded("too many adjustments on room"));
        }

        let mut dates = req.dates;
        dates.sort();
        dates.dedup();
        let adjustment = PriceAdjustment {
            id: Ulid::new(),
            room_id,
            title: req.title,
            start_date: req.start_date,
            end_date: req.end_date,
            adjust_type: req.adjust_type,
            adjust_value: req.adjust_value,
            apply_all_dates: req.apply_all_dates,
            dates,
            created_at: now,
        };
        let record = vec![Event::AdjustmentAdded {
            adjustment: adjustment.clone(),
        }];
        self.persist_and_apply(&mut guard, record).await?;
        info!("price adjustment {} added to room {room_id}", adjustment.id);
        Ok(adjustment)
    }

    pub async fn remove_price_adjustment(
        &self,
        room_id: Ulid,
        tenant_id: Ulid,
        adjustment_id: Ulid,
    ) -> Result<(), EngineError> {
        let rs = self.get_room(&room_id).ok_or(EngineError::NotFound(room_id))?;
        let mut guard = rs.write().await;
        check_tenant(&guard, tenant_id)?;
        if !guard.adjustments.iter().any(|a| a.id == adjustment_id) {
            return Err(EngineError::NotFound(adjustment_id));
        }
        let record = vec![Event::AdjustmentRemoved {
            id: adjustment_id,
            room_id,
        }];
        self.persist_and_apply(&mut guard, record).await
    }

    pub async fn price_adjustments(
        &self,
        room_id: Ulid,
    ) -> Result<Vec<PriceAdjustment>, EngineError> {
        let rs = self.get_room(&room_id).ok_or(EngineError::NotFound(room_id))?;
        let guard = rs.read().await;
        Ok(guard.adjustments.clone())
    }
}
