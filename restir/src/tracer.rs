use glam::{UVec2, UVec3};

use crate::{gpu, BindingTable, Defines, ProgramDesc};

/// Engine that compiles ray-tracing programs, owns device memory and
/// dispatches rays.
///
/// Faults (compilation errors, out-of-memory, failed dispatches) are not
/// recoverable at the pipeline's level and implementations are expected to
/// panic on them.
pub trait RayTracer {
    type Program;
    type Vars;
    type Buffer;
    type Texture;

    fn create_program(
        &mut self,
        desc: &ProgramDesc,
        defines: &Defines,
    ) -> Self::Program;

    /// Creates the variables (root signature, uniforms, binding table
    /// records) a program gets dispatched with.
    fn create_vars(
        &mut self,
        program: &Self::Program,
        table: &BindingTable,
    ) -> Self::Vars;

    /// Returns the per-element size of given structured buffer, as declared
    /// by the program's kernel; `None` if the program has no such binding.
    fn structured_stride(&self, vars: &Self::Vars, binding: &str)
        -> Option<u32>;

    fn create_structured_buffer(
        &mut self,
        label: &str,
        stride: u32,
        count: u32,
    ) -> Self::Buffer;

    fn create_texture(
        &mut self,
        label: &str,
        size: UVec2,
        format: wgpu::TextureFormat,
    ) -> Self::Texture;

    fn texture_format(&self, texture: &Self::Texture) -> wgpu::TextureFormat;

    fn clear_texture(&mut self, texture: &Self::Texture);

    /// Dispatches `dims` rays; dispatches are executed in the order they were
    /// issued and each one completes before the next one starts.
    fn trace(
        &mut self,
        program: &Self::Program,
        vars: &mut Self::Vars,
        bindings: &Bindings<'_, Self>,
        dims: UVec3,
    );

    /// Sends everything issued since the previous call to the device.
    ///
    /// Called once at the end of each frame; dispatches of the next frame
    /// must not be able to observe its uniforms before that happens.
    fn submit(&mut self);
}

/// Resources bound to a single dispatch.
pub struct Bindings<'a, R>
where
    R: RayTracer + ?Sized,
{
    pub params: gpu::FrameParams,
    pub buffers: Vec<(&'static str, &'a R::Buffer)>,
    pub textures: Vec<(&'static str, &'a R::Texture)>,
}

impl<'a, R> Bindings<'a, R>
where
    R: RayTracer + ?Sized,
{
    pub fn new(params: gpu::FrameParams) -> Self {
        Self {
            params,
            buffers: Default::default(),
            textures: Default::default(),
        }
    }

    pub fn buffer(&self, name: &str) -> Option<&'a R::Buffer> {
        self.buffers
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, buffer)| *buffer)
    }

    pub fn texture(&self, name: &str) -> Option<&'a R::Texture> {
        self.textures
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, texture)| *texture)
    }
}
