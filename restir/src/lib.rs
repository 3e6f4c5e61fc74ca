//! Host-side orchestration of a multi-pass ReSTIR (reservoir-based
//! spatiotemporal importance resampling) ray-tracing pipeline.
//!
//! The crate sequences ray-tracing stages, owns the per-pixel reservoir
//! storage that survives across frames and builds the binding tables that
//! route rays into shader entry points; the dispatch engine and the scene are
//! provided from the outside through [`RayTracer`] and [`Scene`].

mod backends;
mod defines;
mod frame;
mod graph;
mod pipeline;
mod program;
mod reservoirs;
mod scene;
mod settings;
mod stage;
mod topology;
mod tracer;
mod utils;

#[cfg(test)]
mod test_utils;

pub use restir_gpu as gpu;

pub use self::backends::*;
pub use self::defines::*;
pub use self::frame::*;
pub use self::graph::*;
pub use self::pipeline::*;
pub use self::program::*;
pub use self::reservoirs::*;
pub use self::scene::*;
pub use self::settings::*;
pub use self::stage::*;
pub use self::topology::*;
pub use self::tracer::*;
pub(crate) use self::utils::*;
