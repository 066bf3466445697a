//! Mutability state machine
//!
//! `Mutable -> Sealing -> Sealed -> Mutable`. The state is an atomic so every
//! stage can fast-fail with a plain load. Admission and transitions also go
//! through a barrier: admission holds it shared while it checks the state and
//! registers its work, a transition holds it exclusive. Once a transition out
//! of Mutable returns, no admission that saw Mutable is still unregistered.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{PoisonError, RwLock};

use serde::Serialize;

use super::errors::{ExecutorError, ExecutorResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum ExecutorState {
    Mutable = 0,
    Sealing = 1,
    Sealed = 2,
}

impl ExecutorState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ExecutorState::Mutable,
            1 => ExecutorState::Sealing,
            _ => ExecutorState::Sealed,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutorState::Mutable => "mutable",
            ExecutorState::Sealing => "sealing",
            ExecutorState::Sealed => "sealed",
        }
    }
}

impl fmt::Display for ExecutorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

pub(crate) struct StateMachine {
    state: AtomicU8,
    barrier: RwLock<()>,
}

impl StateMachine {
    pub fn new(initial: ExecutorState) -> Self {
        Self {
            state: AtomicU8::new(initial as u8),
            barrier: RwLock::new(()),
        }
    }

    pub fn load(&self) -> ExecutorState {
        ExecutorState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Runs `register` only if the stream is Mutable, with transitions held off.
    pub fn admit<T>(&self, register: impl FnOnce() -> T) -> ExecutorResult<T> {
        let _shared = self.barrier.read().unwrap_or_else(PoisonError::into_inner);
        match self.load() {
            ExecutorState::Mutable => Ok(register()),
            other => Err(ExecutorError::NotMutable(other)),
        }
    }

    /// Unconditional transition. Returns the previous state.
    pub fn transition(&self, to: ExecutorState) -> ExecutorState {
        let _exclusive = self.barrier.write().unwrap_or_else(PoisonError::into_inner);
        ExecutorState::from_u8(self.state.swap(to as u8, Ordering::AcqRel))
    }

    /// Transitions only from `from`. Returns whether it happened.
    pub fn compare_and_transition(&self, from: ExecutorState, to: ExecutorState) -> bool {
        let _exclusive = self.barrier.write().unwrap_or_else(PoisonError::into_inner);
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}
