//! CRTC allocation
//!
//! Each pipe (index into the kernel's CRTC list) can be owned by at most
//! one display at a time. Pipes are requested by explicit index; choosing
//! which pipe to try is up to the caller.

use super::card::CrtcId;
use crate::constants::{MAX_PIPES, NO_CRTC};

/// Exclusive allocator over the CRTC pool
#[derive(Debug, Default, Clone)]
pub struct CrtcAllocator {
    /// CRTC ids in kernel order; position is the pipe index
    crtcs: Vec<CrtcId>,
    /// Bit per pipe, set while reserved
    used: u32,
}

impl CrtcAllocator {
    pub fn new(crtcs: Vec<CrtcId>) -> Self {
        let mut allocator = Self::default();
        allocator.assign(crtcs);
        allocator
    }

    /// Replace the pool; all reservations are dropped
    pub fn assign(&mut self, mut crtcs: Vec<CrtcId>) {
        if crtcs.len() > MAX_PIPES {
            log::warn!(
                "Kernel reported {} CRTCs, only the first {} are usable",
                crtcs.len(),
                MAX_PIPES
            );
            crtcs.truncate(MAX_PIPES);
        }
        self.crtcs = crtcs;
        self.used = 0;
    }

    /// Reserve a pipe
    ///
    /// Returns the CRTC id, or `NO_CRTC` if the pipe is out of range or
    /// already reserved.
    pub fn reserve(&mut self, pipe: usize) -> CrtcId {
        match self.crtcs.get(pipe) {
            Some(&crtc) if !self.is_reserved(pipe) => {
                self.used |= 1 << pipe;
                crtc
            }
            _ => NO_CRTC,
        }
    }

    /// Release a pipe (no-op if out of range or not reserved)
    pub fn free(&mut self, pipe: usize) {
        if pipe < self.crtcs.len() {
            self.used &= !(1 << pipe);
        }
    }

    pub fn is_reserved(&self, pipe: usize) -> bool {
        pipe < self.crtcs.len() && self.used & (1 << pipe) != 0
    }

    /// Number of pipes
    pub fn len(&self) -> usize {
        self.crtcs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.crtcs.is_empty()
    }

    pub fn crtcs(&self) -> &[CrtcId] {
        &self.crtcs
    }
}
