//! Default filling for validated inputs.

use chrono::{DateTime, Utc};

use super::types::{PersistableEntity, PortfolioCreateInput};

/// Version given to inputs that do not carry one.
pub const DEFAULT_VERSION: i64 = 1;

/// Source of the "now" timestamp used for missing `createdAt` values.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock pinned to one instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

/// Turn validated inputs into storage-ready entities, in batch order.
pub fn normalize(batch: &[PortfolioCreateInput], now: DateTime<Utc>) -> Vec<PersistableEntity> {
    batch
        .iter()
        .enumerate()
        .map(|(index, input)| PersistableEntity {
            index,
            name: input.name.clone(),
            created_at: input.created_at.unwrap_or(now),
            version: input.version.unwrap_or(DEFAULT_VERSION),
        })
        .collect()
}
