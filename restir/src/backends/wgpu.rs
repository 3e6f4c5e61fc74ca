mod library;

use std::mem;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use derivative::Derivative;
use fxhash::FxHashMap;
use glam::{UVec2, UVec3};
use log::{debug, info};
use wgpu::util::DeviceExt;

pub use self::library::*;
use crate::{gpu, BindingTable, Bindings, Defines, ProgramDesc, RayTracer};

/// Kernels are dispatched in 8x8 workgroups.
const WORKGROUP_SIZE: u32 = 8;

/// [`RayTracer`] running on plain wgpu compute pipelines.
///
/// wgpu doesn't expose hardware ray tracing, so each program is compiled into
/// a compute kernel whose `ray_gen` entry point traverses the scene on its
/// own; the serialized binding table is uploaded next to the frame params and
/// tells the kernel which miss / hit functions to call for a given ray type
/// and geometry.
///
/// Commands are recorded into an internal encoder and sent to the GPU at the
/// end of each frame.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct WgpuRayTracer {
    #[derivative(Debug = "ignore")]
    device: Arc<wgpu::Device>,
    #[derivative(Debug = "ignore")]
    queue: Arc<wgpu::Queue>,
    libraries: FxHashMap<&'static str, ShaderLibrary>,
    modules: FxHashMap<String, String>,
    #[derivative(Debug = "ignore")]
    fallbacks: FxHashMap<FallbackKey, WgpuTexture>,
    #[derivative(Debug = "ignore")]
    encoder: Option<wgpu::CommandEncoder>,
}

impl WgpuRayTracer {
    pub fn new(device: Arc<wgpu::Device>, queue: Arc<wgpu::Queue>) -> Self {
        info!("Initializing wgpu ray tracer");

        Self {
            device,
            queue,
            libraries: Default::default(),
            modules: Default::default(),
            fallbacks: Default::default(),
            encoder: None,
        }
    }

    /// Registers kernels of a stage, under the name stage descriptors refer
    /// to it (e.g. `restir/init_temporal`).
    pub fn register_library(
        &mut self,
        name: &'static str,
        library: ShaderLibrary,
    ) {
        debug!("Registering shader library: {name}");

        self.libraries.insert(name, library);
    }

    /// Registers WGSL code the scene wants prepended to every program (e.g.
    /// geometry fetching or materials).
    pub fn register_module(
        &mut self,
        name: impl Into<String>,
        source: impl Into<String>,
    ) {
        let name = name.into();

        debug!("Registering shader module: {name}");

        self.modules.insert(name, source.into());
    }

    fn encoder(&mut self) -> &mut wgpu::CommandEncoder {
        self.encoder.get_or_insert_with(|| {
            self.device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("restir_encoder"),
                })
        })
    }

    fn library(&self, name: &str) -> &ShaderLibrary {
        self.libraries
            .get(name)
            .unwrap_or_else(|| panic!("Unknown shader library: {name}"))
    }

    fn source(&self, desc: &ProgramDesc, defines: &Defines) -> String {
        let mut source = define_consts(defines);

        for module in &desc.shader_modules {
            let module = self.modules.get(module).unwrap_or_else(|| {
                panic!("Unknown shader module: {module}")
            });

            source.push_str(module);
            source.push('\n');
        }

        source.push_str(self.library(desc.library).source());
        source
    }

    fn ensure_fallback(&mut self, key: FallbackKey) {
        if self.fallbacks.contains_key(&key) {
            return;
        }

        let texture = WgpuTexture::create(
            &self.device,
            "restir_fallback",
            UVec2::ONE,
            key.format(),
        );

        self.fallbacks.insert(key, texture);
    }
}

impl RayTracer for WgpuRayTracer {
    type Program = WgpuProgram;
    type Vars = WgpuVars;
    type Buffer = WgpuBuffer;
    type Texture = WgpuTexture;

    fn create_program(
        &mut self,
        desc: &ProgramDesc,
        defines: &Defines,
    ) -> Self::Program {
        debug!(
            "Compiling program `{}` (library={}, defines={})",
            desc.label,
            desc.library,
            defines.len()
        );

        let library = self.library(desc.library).clone();
        let source = self.source(desc, defines);

        let module =
            self.device
                .create_shader_module(wgpu::ShaderModuleDescriptor {
                    label: Some(&desc.label),
                    source: wgpu::ShaderSource::Wgsl(source.into()),
                });

        let bind_group_layout = self.device.create_bind_group_layout(
            &wgpu::BindGroupLayoutDescriptor {
                label: Some(&format!("{}_layout", desc.label)),
                entries: &library.layout_entries(),
            },
        );

        let pipeline_layout = self.device.create_pipeline_layout(
            &wgpu::PipelineLayoutDescriptor {
                label: Some(&format!("{}_pipeline_layout", desc.label)),
                bind_group_layouts: &[&bind_group_layout],
                push_constant_ranges: &[],
            },
        );

        let pipeline = self.device.create_compute_pipeline(
            &wgpu::ComputePipelineDescriptor {
                label: Some(&format!("{}_pipeline", desc.label)),
                layout: Some(&pipeline_layout),
                module: &module,
                entry_point: desc.ray_gen,
            },
        );

        WgpuProgram {
            desc: desc.clone(),
            library,
            bind_group_layout,
            pipeline,
        }
    }

    fn create_vars(
        &mut self,
        program: &Self::Program,
        table: &BindingTable,
    ) -> Self::Vars {
        let label = &program.desc.label;
        let shape = table.shape();

        debug!(
            "Creating vars for `{label}`; table={}x{}x{}",
            shape.miss_count, shape.hit_group_count, shape.geometry_count
        );

        let params = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(&format!("{label}_params")),
            size: mem::size_of::<gpu::FrameParams>() as _,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let table = table.serialize(&program.desc);

        let table =
            self.device
                .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some(&format!("{label}_table")),
                    contents: bytemuck::cast_slice(&table),
                    usage: wgpu::BufferUsages::STORAGE,
                });

        WgpuVars {
            params,
            table,
            library: program.library.clone(),
            bind_group: Default::default(),
        }
    }

    fn structured_stride(
        &self,
        vars: &Self::Vars,
        binding: &str,
    ) -> Option<u32> {
        vars.library.stride(binding)
    }

    fn create_structured_buffer(
        &mut self,
        label: &str,
        stride: u32,
        count: u32,
    ) -> Self::Buffer {
        let size = stride as u64 * count as u64;

        debug!(
            "Allocating structured buffer `{label}`; stride={stride}, \
             count={count}, size={size}"
        );

        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size,
            usage: wgpu::BufferUsages::STORAGE,
            mapped_at_creation: false,
        });

        WgpuBuffer {
            id: ResourceId::next(),
            buffer,
            stride,
            count,
        }
    }

    fn create_texture(
        &mut self,
        label: &str,
        size: UVec2,
        format: wgpu::TextureFormat,
    ) -> Self::Texture {
        WgpuTexture::create(&self.device, label, size, format)
    }

    fn texture_format(&self, texture: &Self::Texture) -> wgpu::TextureFormat {
        texture.format()
    }

    fn clear_texture(&mut self, texture: &Self::Texture) {
        let encoder = self.encoder();

        encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("restir_clear_pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: &texture.view,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                    store: true,
                },
            })],
            depth_stencil_attachment: None,
        });
    }

    fn trace(
        &mut self,
        program: &Self::Program,
        vars: &mut Self::Vars,
        bindings: &Bindings<'_, Self>,
        dims: UVec3,
    ) {
        self.queue.write_buffer(
            &vars.params,
            0,
            bytemuck::bytes_of(&bindings.params),
        );

        for (_, name, binding) in program.library.bindings() {
            if bindings.texture(name).is_none() {
                if let Some(key) = FallbackKey::new(binding) {
                    self.ensure_fallback(key);
                }
            }
        }

        let resources: Vec<_> = program
            .library
            .bindings()
            .map(|(binding, name, ty)| {
                let resource = Resource::resolve(
                    program,
                    bindings,
                    &self.fallbacks,
                    name,
                    ty,
                );

                (binding, resource)
            })
            .collect();

        let key = resources.iter().map(|(_, res)| res.id()).collect();

        let WgpuVars {
            params,
            table,
            bind_group,
            ..
        } = vars;

        let bind_group = bind_group.get_or_build(key, || {
            debug!("Creating bind group for `{}`", program.desc.label);

            let mut entries = vec![
                wgpu::BindGroupEntry {
                    binding: ShaderLibrary::PARAMS_BINDING,
                    resource: params.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: ShaderLibrary::TABLE_BINDING,
                    resource: table.as_entire_binding(),
                },
            ];

            for (binding, resource) in &resources {
                let resource = match resource {
                    Resource::Buffer(buffer) => {
                        buffer.buffer.as_entire_binding()
                    }
                    Resource::Texture(texture) => {
                        wgpu::BindingResource::TextureView(&texture.view)
                    }
                };

                entries.push(wgpu::BindGroupEntry {
                    binding: *binding,
                    resource,
                });
            }

            self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some(&format!("{}_bind_group", program.desc.label)),
                layout: &program.bind_group_layout,
                entries: &entries,
            })
        });

        let encoder = self.encoder();

        let mut pass =
            encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some(&program.desc.label),
            });

        pass.set_pipeline(&program.pipeline);
        pass.set_bind_group(0, bind_group, &[]);

        pass.dispatch_workgroups(
            (dims.x + WORKGROUP_SIZE - 1) / WORKGROUP_SIZE,
            (dims.y + WORKGROUP_SIZE - 1) / WORKGROUP_SIZE,
            dims.z,
        );
    }

    fn submit(&mut self) {
        if let Some(encoder) = self.encoder.take() {
            self.queue.submit([encoder.finish()]);
        }
    }
}

#[derive(Derivative)]
#[derivative(Debug)]
pub struct WgpuProgram {
    desc: ProgramDesc,
    library: ShaderLibrary,
    #[derivative(Debug = "ignore")]
    bind_group_layout: wgpu::BindGroupLayout,
    #[derivative(Debug = "ignore")]
    pipeline: wgpu::ComputePipeline,
}

#[derive(Derivative)]
#[derivative(Debug)]
pub struct WgpuVars {
    #[derivative(Debug = "ignore")]
    params: wgpu::Buffer,
    #[derivative(Debug = "ignore")]
    table: wgpu::Buffer,
    library: ShaderLibrary,
    #[derivative(Debug = "ignore")]
    bind_group: LastBuilt<wgpu::BindGroup>,
}

#[derive(Derivative)]
#[derivative(Debug)]
pub struct WgpuBuffer {
    id: ResourceId,
    #[derivative(Debug = "ignore")]
    buffer: wgpu::Buffer,
    stride: u32,
    count: u32,
}

impl WgpuBuffer {
    pub fn buffer(&self) -> &wgpu::Buffer {
        &self.buffer
    }

    pub fn stride(&self) -> u32 {
        self.stride
    }

    pub fn count(&self) -> u32 {
        self.count
    }
}

/// Texture (together with its view) handed between the render graph and the
/// pipeline.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct WgpuTexture {
    id: ResourceId,
    #[derivative(Debug = "ignore")]
    texture: wgpu::Texture,
    #[derivative(Debug = "ignore")]
    view: wgpu::TextureView,
}

impl WgpuTexture {
    /// Wraps a texture created by the host; to be bound, it must have been
    /// created with `STORAGE_BINDING` or `TEXTURE_BINDING` usage and, to be
    /// cleared, with `RENDER_ATTACHMENT`.
    pub fn new(texture: wgpu::Texture) -> Self {
        let view = texture.create_view(&Default::default());

        Self {
            id: ResourceId::next(),
            texture,
            view,
        }
    }

    fn create(
        device: &wgpu::Device,
        label: &str,
        size: UVec2,
        format: wgpu::TextureFormat,
    ) -> Self {
        debug!("Allocating texture `{label}`; size={size}, format={format:?}");

        assert!(size.x > 0);
        assert!(size.y > 0);

        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: wgpu::Extent3d {
                width: size.x,
                height: size.y,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage: wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::STORAGE_BINDING
                | wgpu::TextureUsages::RENDER_ATTACHMENT,
            view_formats: &[],
        });

        Self::new(texture)
    }

    pub fn texture(&self) -> &wgpu::Texture {
        &self.texture
    }

    pub fn view(&self) -> &wgpu::TextureView {
        &self.view
    }

    pub fn format(&self) -> wgpu::TextureFormat {
        self.texture.format()
    }

    pub fn size(&self) -> UVec2 {
        UVec2::new(self.texture.width(), self.texture.height())
    }
}

/// Identity of a buffer or texture, used to tell whether a cached bind group
/// still refers to the resources a dispatch binds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
struct ResourceId(u64);

impl ResourceId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(0);

        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

enum Resource<'a> {
    Buffer(&'a WgpuBuffer),
    Texture(&'a WgpuTexture),
}

impl<'a> Resource<'a> {
    /// Finds what gets bound under `name`; optional textures the host didn't
    /// provide are replaced with fallbacks.
    fn resolve(
        program: &WgpuProgram,
        bindings: &Bindings<'a, WgpuRayTracer>,
        fallbacks: &'a FxHashMap<FallbackKey, WgpuTexture>,
        name: &str,
        ty: LibraryBinding,
    ) -> Self {
        if let LibraryBinding::Structured { .. } = ty {
            let buffer = bindings.buffer(name).unwrap_or_else(|| {
                panic!(
                    "Program `{}` requires buffer `{name}`",
                    program.desc.label
                )
            });

            return Self::Buffer(buffer);
        }

        let texture = bindings.texture(name).unwrap_or_else(|| {
            FallbackKey::new(ty)
                .and_then(|key| fallbacks.get(&key))
                .unwrap_or_else(|| {
                    panic!(
                        "Program `{}` requires texture `{name}`",
                        program.desc.label
                    )
                })
        });

        Self::Texture(texture)
    }

    fn id(&self) -> ResourceId {
        match self {
            Self::Buffer(buffer) => buffer.id,
            Self::Texture(texture) => texture.id,
        }
    }
}

/// Most recently built value, together with the resources it's been built
/// for.
#[derive(Debug)]
struct LastBuilt<T> {
    entry: Option<(Vec<ResourceId>, T)>,
}

impl<T> LastBuilt<T> {
    fn get_or_build(
        &mut self,
        key: Vec<ResourceId>,
        build: impl FnOnce() -> T,
    ) -> &T {
        if self.entry.as_ref().is_some_and(|(curr, _)| *curr != key) {
            self.entry = None;
        }

        &self.entry.get_or_insert_with(|| (key, build())).1
    }
}

impl<T> Default for LastBuilt<T> {
    fn default() -> Self {
        Self { entry: None }
    }
}

/// Identifies the 1x1 texture bound in place of an optional resource the
/// host didn't provide (kernels skip it thanks to `is_valid_*` defines).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
enum FallbackKey {
    Float,
    Uint,
    Sint,
    Storage(wgpu::TextureFormat),
}

impl FallbackKey {
    fn new(binding: LibraryBinding) -> Option<Self> {
        match binding {
            LibraryBinding::Structured { .. } => None,

            LibraryBinding::Texture { sample_type } => match sample_type {
                wgpu::TextureSampleType::Float { .. } => Some(Self::Float),
                wgpu::TextureSampleType::Uint => Some(Self::Uint),
                wgpu::TextureSampleType::Sint => Some(Self::Sint),
                wgpu::TextureSampleType::Depth => None,
            },

            LibraryBinding::StorageTexture { format, .. } => {
                Some(Self::Storage(format))
            }
        }
    }

    fn format(self) -> wgpu::TextureFormat {
        match self {
            Self::Float => wgpu::TextureFormat::Rgba32Float,
            Self::Uint => wgpu::TextureFormat::Rgba32Uint,
            Self::Sint => wgpu::TextureFormat::Rgba32Sint,
            Self::Storage(format) => format,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_group_is_rebuilt_only_for_new_resources() {
        let mut target = LastBuilt::default();
        let mut builds = 0;
        let (a, b) = (ResourceId::next(), ResourceId::next());

        let mut get = |key: Vec<ResourceId>| {
            *target.get_or_build(key, || {
                builds += 1;
                builds
            })
        };

        assert_eq!(1, get(vec![a, b]));
        assert_eq!(1, get(vec![a, b]));
        assert_eq!(2, get(vec![b, a]));
        assert_eq!(3, get(vec![a, b]));
        assert_eq!(3, get(vec![a, b]));
    }

    #[test]
    fn resource_ids_are_unique() {
        let ids: Vec<_> = (0..8).map(|_| ResourceId::next()).collect();

        for (idx, id) in ids.iter().enumerate() {
            assert!(!ids[idx + 1..].contains(id));
        }
    }

    #[test]
    fn fallbacks() {
        let key = FallbackKey::new(LibraryBinding::Texture {
            sample_type: wgpu::TextureSampleType::Float { filterable: false },
        });

        assert_eq!(Some(FallbackKey::Float), key);

        let key = FallbackKey::new(LibraryBinding::StorageTexture {
            format: wgpu::TextureFormat::Rgba32Float,
            access: wgpu::StorageTextureAccess::ReadWrite,
        });

        assert_eq!(
            Some(wgpu::TextureFormat::Rgba32Float),
            key.map(FallbackKey::format)
        );

        assert_eq!(
            None,
            FallbackKey::new(LibraryBinding::Structured { stride: 4 })
        );
    }
}
