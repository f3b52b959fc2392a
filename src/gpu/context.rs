//! GPU context lifecycle.

use log::{debug, error};

use crate::error::{RenderError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ContextState {
    #[default]
    Active,
    /// The device went away; every draw fails until restored.
    Lost,
    /// Programs, buffers and textures are being rebuilt.
    Reinitializing,
}

impl ContextState {
    pub fn is_active(self) -> bool {
        self == ContextState::Active
    }

    /// `Ok` only while active.
    pub fn check(self) -> Result<()> {
        match self {
            ContextState::Active => Ok(()),
            _ => Err(RenderError::ContextLost),
        }
    }

    pub fn lose(&mut self) {
        if *self != ContextState::Lost {
            error!("GPU context lost");
        }
        *self = ContextState::Lost;
    }

    /// Enter reinitialization; only a lost context can be restored.
    pub fn begin_restore(&mut self) -> bool {
        if *self != ContextState::Lost {
            return false;
        }
        debug!("GPU context reinitializing");
        *self = ContextState::Reinitializing;
        true
    }

    pub fn finish_restore(&mut self) {
        debug!("GPU context restored");
        *self = ContextState::Active;
    }
}
