use crate::error::{Result, StoreError};
use crate::ids::IdAllocator;
use collector_core::timestamp;
use obs_sqlite::{Db, Id, Measurement, Stage, Table};
use std::collections::HashMap;
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageState {
    pub id: Id,
    pub sequence: i64,
    pub open: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveMeasurement {
    pub id: Id,
    pub stage: StageState,
}

/// Open measurements by muid, with their current stage.
#[derive(Debug, Default)]
pub struct Measurements {
    active: HashMap<String, ActiveMeasurement>,
}

impl Measurements {
    pub fn start(&mut self, db: &Db, ids: &mut IdAllocator, description: &str, host: &str) -> Result<String> {
        let muid = Uuid::new_v4().simple().to_string();
        if self.active.contains_key(&muid) {
            return Err(StoreError::ActiveMeasurement(muid));
        }
        let now = timestamp::now();
        let m = Measurement {
            id: ids.next(Table::Measurement),
            muid: muid.clone(),
            description: description.to_string(),
            host: host.to_string(),
            start: now,
            end: None,
        };
        db.insert_measurement(&m).map_err(StoreError::Database)?;
        let stage = Stage { id: ids.next(Table::Stage), measurement_id: m.id, sequence: 1, start: now, stop: None };
        db.insert_stage(&stage).map_err(|_| StoreError::NoActiveStage(muid.clone()))?;
        info!(%muid, host, "measurement started");
        self.active.insert(
            muid.clone(),
            ActiveMeasurement { id: m.id, stage: StageState { id: stage.id, sequence: 1, open: true } },
        );
        Ok(muid)
    }

    fn get(&self, muid: &str) -> Result<&ActiveMeasurement> {
        if muid.is_empty() {
            return Err(StoreError::MissingMeasurementId);
        }
        self.active.get(muid).ok_or_else(|| StoreError::NoActiveMeasurement(muid.to_string()))
    }

    pub fn contains(&self, muid: &str) -> bool {
        self.active.contains_key(muid)
    }

    /// Id of the open stage observations of `muid` are attributed to.
    pub fn stage_id(&self, muid: &str) -> Result<Id> {
        let m = self.get(muid)?;
        if !m.stage.open {
            return Err(StoreError::NoActiveStage(muid.to_string()));
        }
        Ok(m.stage.id)
    }

    /// Fails unless `muid` has an open stage; used before flushing ahead of a stop.
    /// The measurement exists, whether or not a stage is open.
    pub fn check_active(&self, muid: &str) -> Result<()> {
        self.get(muid).map(|_| ())
    }

    pub fn check_open_stage(&self, muid: &str) -> Result<()> {
        self.stage_id(muid).map(|_| ())
    }

    pub fn start_stage(&mut self, db: &Db, ids: &mut IdAllocator, muid: &str) -> Result<i64> {
        let m = self.get(muid)?.clone();
        let now = timestamp::now();
        if m.stage.open {
            db.finish_stage(m.stage.id, now).map_err(StoreError::Database)?;
        }
        let stage = Stage {
            id: ids.next(Table::Stage),
            measurement_id: m.id,
            sequence: m.stage.sequence + 1,
            start: now,
            stop: None,
        };
        db.insert_stage(&stage).map_err(StoreError::Database)?;
        info!(%muid, stage = stage.sequence, "stage started");
        if let Some(m) = self.active.get_mut(muid) {
            m.stage = StageState { id: stage.id, sequence: stage.sequence, open: true };
        }
        Ok(stage.sequence)
    }

    pub fn stop_stage(&mut self, db: &Db, muid: &str) -> Result<()> {
        let stage_id = self.stage_id(muid)?;
        db.finish_stage(stage_id, timestamp::now()).map_err(StoreError::Database)?;
        if let Some(m) = self.active.get_mut(muid) {
            m.stage.open = false;
            info!(%muid, stage = m.stage.sequence, "stage stopped");
        }
        Ok(())
    }

    pub fn stop(&mut self, db: &Db, muid: &str) -> Result<()> {
        let m = self.get(muid)?.clone();
        let now = timestamp::now();
        if m.stage.open {
            db.finish_stage(m.stage.id, now).map_err(StoreError::Database)?;
        }
        db.finish_measurement(m.id, now).map_err(StoreError::Database)?;
        self.active.remove(muid);
        info!(%muid, "measurement stopped");
        Ok(())
    }

    pub fn active(&self) -> Vec<String> {
        let mut out: Vec<String> = self.active.keys().cloned().collect();
        out.sort();
        out
    }
}
