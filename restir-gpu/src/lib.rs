//! Records shared between the ReSTIR host orchestration and its ray-tracing
//! kernels.
//!
//! Everything here is `#[repr(C)]` + `Pod`, so that it can be copied verbatim
//! into uniform and storage buffers.

#![cfg_attr(target_arch = "spirv", no_std)]

mod binding_table;
mod frame;
mod params;

pub use self::binding_table::*;
pub use self::frame::*;
pub use self::params::*;

/// Sentinel stored in place of a missing shader entry (e.g. a shadow hit group
/// without a closest-hit shader).
pub const NO_ENTRY: u32 = u32::MAX;
