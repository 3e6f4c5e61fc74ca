use derivative::Derivative;
use fxhash::FxHashMap;
use glam::UVec2;
use log::debug;

use crate::{RayTracer, ReservoirRole};

/// Per-pixel reservoir storage, sized to the output resolution.
///
/// All reservoirs share the same dimensions; whenever those change, the
/// entire storage gets reallocated (and thus loses its contents).
#[derive(Derivative)]
#[derivative(Debug(bound = ""))]
pub struct ReservoirStorage<R>
where
    R: RayTracer,
{
    size: Option<UVec2>,
    #[derivative(Debug = "ignore")]
    buffers: FxHashMap<ReservoirRole, R::Buffer>,
    #[derivative(Debug = "ignore")]
    textures: FxHashMap<ReservoirRole, R::Texture>,
    allocations: u32,
}

impl<R> ReservoirStorage<R>
where
    R: RayTracer,
{
    pub fn needs_allocation(&self, size: UVec2) -> bool {
        self.size != Some(size)
    }

    /// Makes sure the storage matches given output size, (re)allocating it
    /// if needed; returns whether an allocation took place, in which case
    /// the previous contents are gone.
    ///
    /// `reservoirs` gets called only when allocating.
    pub fn ensure(
        &mut self,
        tracer: &mut R,
        size: UVec2,
        reservoirs: impl FnOnce(&R) -> Vec<(ReservoirRole, Option<u32>)>,
    ) -> bool {
        if !self.needs_allocation(size) {
            return false;
        }

        let reservoirs = reservoirs(&*tracer);

        self.allocate(tracer, size, &reservoirs);

        true
    }

    /// Allocates storage for given reservoirs.
    ///
    /// Structured reservoirs require a stride (reflected from the kernel
    /// that binds them); texture-backed ones ignore it.
    pub fn allocate(
        &mut self,
        tracer: &mut R,
        size: UVec2,
        reservoirs: &[(ReservoirRole, Option<u32>)],
    ) {
        assert!(size.x > 0 && size.y > 0, "Invalid output size: {size}");

        let count = size.x * size.y;

        debug!(
            "Allocating reservoirs: size={size}, count={count}, roles={}",
            reservoirs.len()
        );

        self.buffers.clear();
        self.textures.clear();

        for &(role, stride) in reservoirs {
            let label = role.label();

            if let Some(format) = role.texture_format() {
                let texture = tracer.create_texture(&label, size, format);

                self.textures.insert(role, texture);
            } else {
                let stride = stride.unwrap_or_else(|| {
                    panic!("Stride of `{}` is unknown", role.binding())
                });

                let buffer =
                    tracer.create_structured_buffer(&label, stride, count);

                self.buffers.insert(role, buffer);
            }
        }

        self.size = Some(size);
        self.allocations += 1;
    }

    /// Drops all reservoirs; the next frame will have to allocate them from
    /// scratch.
    pub fn invalidate(&mut self) {
        self.size = None;
        self.buffers.clear();
        self.textures.clear();
    }

    pub fn size(&self) -> Option<UVec2> {
        self.size
    }

    /// Returns the number of elements each reservoir holds.
    pub fn element_count(&self) -> u32 {
        self.size.map_or(0, |size| size.x * size.y)
    }

    /// Returns how many times the storage has been (re)allocated.
    pub fn allocations(&self) -> u32 {
        self.allocations
    }

    pub fn buffer(&self, role: ReservoirRole) -> Option<&R::Buffer> {
        self.buffers.get(&role)
    }

    pub fn texture(&self, role: ReservoirRole) -> Option<&R::Texture> {
        self.textures.get(&role)
    }

    pub fn len(&self) -> usize {
        self.buffers.len() + self.textures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<R> Default for ReservoirStorage<R>
where
    R: RayTracer,
{
    fn default() -> Self {
        Self {
            size: None,
            buffers: Default::default(),
            textures: Default::default(),
            allocations: 0,
        }
    }
}
