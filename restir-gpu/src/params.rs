use bytemuck::{Pod, Zeroable};
use glam::Mat4;

use crate::Frame;

/// Per-frame uniform block pushed into every stage.
#[repr(C)]
#[derive(Clone, Copy, Default, PartialEq, Pod, Zeroable)]
#[cfg_attr(not(target_arch = "spirv"), derive(Debug))]
pub struct FrameParams {
    /// Camera's view matrix from the previous frame; used for temporal
    /// reprojection.
    pub prev_view: Mat4,
    pub frame: Frame,
    pub flags: FrameFlags,
    pub seed: u32,
    pub max_bounces: u32,
}

impl FrameParams {
    pub fn has(&self, flag: u32) -> bool {
        self.flags.has(flag)
    }
}

/// Bit set of the boolean switches the kernels branch on.
#[repr(C)]
#[derive(Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
#[cfg_attr(not(target_arch = "spirv"), derive(Debug))]
pub struct FrameFlags(u32);

impl FrameFlags {
    pub const TEMPORAL_REUSE: u32 = 1 << 0;
    pub const SPATIAL_REUSE: u32 = 1 << 1;
    pub const DIRECT_LIGHT: u32 = 1 << 2;
    pub const INDIRECT_LIGHT: u32 = 1 << 3;

    /// Persisted reservoirs must be ignored during this frame.
    pub const CLEAR_BUFFERS: u32 = 1 << 4;

    /// Lights have just been (re)initialized - kernels must generate fresh
    /// initial samples instead of relying on the history.
    pub const INITIAL_SAMPLES: u32 = 1 << 5;

    pub fn new(bits: u32) -> Self {
        Self(bits)
    }

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn has(self, flag: u32) -> bool {
        self.0 & flag == flag
    }

    pub fn with(self, flag: u32, enabled: bool) -> Self {
        if enabled {
            Self(self.0 | flag)
        } else {
            Self(self.0 & !flag)
        }
    }
}
