// src/core/node/gate.rs
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::utils::error::{NodeError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    Idle,
    Busy,
}

/// Admits one job at a time. Nothing is queued: a second caller is turned
/// away with `NodeBusy` while the first still holds its permit.
#[derive(Debug, Clone)]
pub struct BusyGate {
    node_id: Arc<str>,
    busy: Arc<AtomicBool>,
}

impl BusyGate {
    pub fn new(node_id: &str) -> Self {
        Self {
            node_id: Arc::from(node_id),
            busy: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn try_acquire(&self) -> Result<GatePermit> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| NodeError::NodeBusy(self.node_id.to_string()))?;
        Ok(GatePermit {
            busy: Some(self.busy.clone()),
        })
    }

    pub fn state(&self) -> GateState {
        if self.busy.load(Ordering::Acquire) {
            GateState::Busy
        } else {
            GateState::Idle
        }
    }
}

/// Held for the duration of one job. The gate reopens when the permit is
/// released or dropped, whichever comes first.
#[derive(Debug)]
#[must_use = "the gate reopens as soon as the permit is dropped"]
pub struct GatePermit {
    busy: Option<Arc<AtomicBool>>,
}

impl GatePermit {
    pub fn release(mut self) {
        self.reopen();
    }

    fn reopen(&mut self) {
        if let Some(busy) = self.busy.take() {
            busy.store(false, Ordering::Release);
        }
    }
}

impl Drop for GatePermit {
    fn drop(&mut self) {
        self.reopen();
    }
}
