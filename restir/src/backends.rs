mod wgpu;

pub use self::wgpu::*;
