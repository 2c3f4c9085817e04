//! Accelerator memory budget.
//!
//! Every engine reserves its estimated footprint before loading and commits
//! the measured footprint afterwards. The sum of all reservations never
//! exceeds the configured total; a call that would break that leaves the
//! budget untouched.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use voxturn_core::{Accelerator, BudgetError, EngineState};

/// Point-in-time view of the budget.
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryStats {
    pub total_gb: f64,
    pub reserved_gb: f64,
    pub headroom_gb: f64,
    pub reserved_by_engine: BTreeMap<String, f64>,
}

#[derive(Default)]
struct BudgetState {
    reserved: BTreeMap<String, f64>,
    states: HashMap<String, EngineState>,
}

impl BudgetState {
    fn reserved_total(&self) -> f64 {
        self.reserved.values().sum()
    }

    fn state(&self, name: &str) -> EngineState {
        self.states
            .get(name)
            .copied()
            .unwrap_or(EngineState::Unregistered)
    }
}

pub struct ResourceBudgetTracker {
    total_gb: f64,
    state: Mutex<BudgetState>,
    accelerator: Arc<dyn Accelerator>,
}

impl ResourceBudgetTracker {
    pub fn new(total_gb: f64, accelerator: Arc<dyn Accelerator>) -> Self {
        Self {
            total_gb,
            state: Mutex::new(BudgetState::default()),
            accelerator,
        }
    }

    pub fn total_gb(&self) -> f64 {
        self.total_gb
    }

    pub fn accelerator(&self) -> &Arc<dyn Accelerator> {
        &self.accelerator
    }

    fn lock(&self) -> MutexGuard<'_, BudgetState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Claim `estimated_gb` for `name`. Moves the engine to `Reserving`.
    pub fn reserve(&self, name: &str, estimated_gb: f64) -> Result<(), BudgetError> {
        check_amount(name, estimated_gb)?;
        let mut state = self.lock();

        if matches!(
            state.state(name),
            EngineState::Reserving | EngineState::Ready
        ) {
            return Err(BudgetError::AlreadyReserved(name.to_string()));
        }

        let reserved = state.reserved_total();
        if reserved + estimated_gb > self.total_gb {
            return Err(BudgetError::Exhausted {
                engine: name.to_string(),
                requested_gb: estimated_gb,
                available_gb: (self.total_gb - reserved).max(0.0),
            });
        }

        state.reserved.insert(name.to_string(), estimated_gb);
        state.states.insert(name.to_string(), EngineState::Reserving);
        tracing::debug!(engine = %name, gb = estimated_gb, "memory reserved");
        Ok(())
    }

    /// Replace the estimate with the measured footprint. Moves the engine to
    /// `Ready`.
    pub fn commit(&self, name: &str, actual_gb: f64) -> Result<(), BudgetError> {
        check_amount(name, actual_gb)?;
        let mut state = self.lock();

        if state.state(name) != EngineState::Reserving {
            return Err(BudgetError::NotReserved(name.to_string()));
        }

        let current = state.reserved.get(name).copied().unwrap_or(0.0);
        let others = state.reserved_total() - current;
        if others + actual_gb > self.total_gb {
            return Err(BudgetError::Exhausted {
                engine: name.to_string(),
                requested_gb: actual_gb,
                available_gb: (self.total_gb - others).max(0.0),
            });
        }

        if (actual_gb - current).abs() > f64::EPSILON {
            tracing::debug!(
                engine = %name,
                estimated_gb = current,
                actual_gb,
                "committed footprint differs from estimate"
            );
        }
        state.reserved.insert(name.to_string(), actual_gb);
        state.states.insert(name.to_string(), EngineState::Ready);
        Ok(())
    }

    /// Drop the reservation for `name` and reclaim device memory. Returns
    /// the amount freed.
    pub fn release(&self, name: &str) -> Result<f64, BudgetError> {
        let freed = {
            let mut state = self.lock();
            let freed = state
                .reserved
                .remove(name)
                .ok_or_else(|| BudgetError::NotReserved(name.to_string()))?;
            state.states.insert(name.to_string(), EngineState::Released);
            freed
        };

        self.accelerator.clear_cache();
        self.accelerator.collect_garbage();
        tracing::debug!(engine = %name, gb = freed, "memory released");
        Ok(freed)
    }

    pub fn state(&self, name: &str) -> EngineState {
        self.lock().state(name)
    }

    pub fn reserved_total(&self) -> f64 {
        self.lock().reserved_total()
    }

    pub fn headroom_gb(&self) -> f64 {
        (self.total_gb - self.reserved_total()).max(0.0)
    }

    pub fn memory_stats(&self) -> MemoryStats {
        let state = self.lock();
        let reserved_gb = state.reserved_total();
        MemoryStats {
            total_gb: self.total_gb,
            reserved_gb,
            headroom_gb: (self.total_gb - reserved_gb).max(0.0),
            reserved_by_engine: state.reserved.clone(),
        }
    }
}

fn check_amount(name: &str, gb: f64) -> Result<(), BudgetError> {
    if gb.is_finite() && gb >= 0.0 {
        Ok(())
    } else {
        Err(BudgetError::InvalidAmount {
            engine: name.to_string(),
            amount_gb: gb,
        })
    }
}
