use crate::error::{Result, SimlabError};
use crate::scheduler::job::{JobId, UnitId};

/// Fixed set of identical resource units for one run.
///
/// Each unit is either free or held by exactly one job. All mutating
/// operations validate the whole request before touching any unit, so a
/// failed `reserve`/`release` leaves the pool unchanged.
#[derive(Debug, Clone)]
pub struct ResourcePool {
    holders: Vec<Option<JobId>>,
    free: u32,
}

impl ResourcePool {
    pub fn new(capacity: u32) -> Self {
        Self {
            holders: vec![None; capacity as usize],
            free: capacity,
        }
    }

    pub fn capacity(&self) -> u32 {
        self.holders.len() as u32
    }

    pub fn free_count(&self) -> u32 {
        self.free
    }

    pub fn held_count(&self) -> u32 {
        self.capacity() - self.free
    }

    /// All free units in ascending id order.
    pub fn available(&self) -> Vec<UnitId> {
        self.holders
            .iter()
            .enumerate()
            .filter(|(_, h)| h.is_none())
            .map(|(i, _)| i as UnitId)
            .collect()
    }

    /// The `count` lowest-numbered free units, or `None` if not enough are free.
    pub fn lowest_free(&self, count: u32) -> Option<Vec<UnitId>> {
        if count > self.free {
            return None;
        }
        Some(self.available().into_iter().take(count as usize).collect())
    }

    pub fn holder(&self, unit: UnitId) -> Option<JobId> {
        self.holders.get(unit as usize).copied().flatten()
    }

    /// Units currently held by `job_id`, ascending.
    pub fn held_by(&self, job_id: JobId) -> Vec<UnitId> {
        self.holders
            .iter()
            .enumerate()
            .filter(|(_, h)| **h == Some(job_id))
            .map(|(i, _)| i as UnitId)
            .collect()
    }

    /// Mark `units` as held by `job_id`.
    pub fn reserve(&mut self, job_id: JobId, units: &[UnitId]) -> Result<()> {
        for (i, &unit) in units.iter().enumerate() {
            let slot = self
                .holders
                .get(unit as usize)
                .ok_or(SimlabError::UnknownUnit(unit))?;
            if let Some(holder) = slot {
                return Err(SimlabError::ResourceConflict {
                    unit,
                    holder: *holder,
                });
            }
            if units[..i].contains(&unit) {
                return Err(SimlabError::ResourceConflict {
                    unit,
                    holder: job_id,
                });
            }
        }
        for &unit in units {
            self.holders[unit as usize] = Some(job_id);
        }
        self.free -= units.len() as u32;
        Ok(())
    }

    /// Mark `units` as free again.
    pub fn release(&mut self, units: &[UnitId]) -> Result<()> {
        for (i, &unit) in units.iter().enumerate() {
            let slot = self
                .holders
                .get(unit as usize)
                .ok_or(SimlabError::UnknownUnit(unit))?;
            if slot.is_none() || units[..i].contains(&unit) {
                return Err(SimlabError::InvalidRelease(unit));
            }
        }
        for &unit in units {
            self.holders[unit as usize] = None;
        }
        self.free += units.len() as u32;
        Ok(())
    }

    /// Free every held unit. Returns how many were released.
    pub fn release_all(&mut self) -> u32 {
        let released = self.held_count();
        self.holders.iter_mut().for_each(|h| *h = None);
        self.free = self.capacity();
        released
    }
}
