//! Test doubles standing in for the GPU and the scene.

use std::cell::Cell;

use glam::{UVec2, UVec3};

use crate::{
    gpu, BindingTable, Bindings, Defines, GeometryId, GeometryType,
    LightingConfig, ProgramDesc, RayTracer, Scene, TableShape,
};

#[derive(Clone, Debug, PartialEq)]
pub enum Event {
    CreateProgram {
        label: String,
        defines: Defines,
    },
    CreateVars {
        label: String,
        shape: TableShape,
    },
    CreateBuffer {
        label: String,
        stride: u32,
        count: u32,
    },
    CreateTexture {
        label: String,
        size: UVec2,
        format: wgpu::TextureFormat,
    },
    ClearTexture {
        label: String,
    },
    Trace(TraceEvent),
    Submit,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TraceEvent {
    pub label: String,
    pub params: gpu::FrameParams,
    pub dims: UVec3,
    pub buffers: Vec<(&'static str, String)>,
    pub textures: Vec<(&'static str, String)>,
}

/// Ray tracer that doesn't touch any GPU, only records what it was asked to
/// do.
#[derive(Debug)]
pub struct MockTracer {
    pub events: Vec<Event>,
    pub stride: u32,
}

impl MockTracer {
    pub fn traces(&self) -> Vec<&TraceEvent> {
        self.events
            .iter()
            .filter_map(|event| match event {
                Event::Trace(trace) => Some(trace),
                _ => None,
            })
            .collect()
    }

    pub fn buffers(&self) -> Vec<(&str, u32)> {
        self.events
            .iter()
            .filter_map(|event| match event {
                Event::CreateBuffer { label, count, .. } => {
                    Some((label.as_str(), *count))
                }
                _ => None,
            })
            .collect()
    }

    pub fn submits(&self) -> usize {
        self.count(|event| matches!(event, Event::Submit))
    }

    pub fn count(&self, f: impl Fn(&Event) -> bool) -> usize {
        self.events.iter().filter(|event| f(event)).count()
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }
}

impl Default for MockTracer {
    fn default() -> Self {
        Self {
            events: Default::default(),
            stride: 32,
        }
    }
}

#[derive(Debug)]
pub struct MockProgram {
    pub label: String,
}

#[derive(Debug)]
pub struct MockVars {
    pub label: String,
}

#[derive(Debug)]
pub struct MockBuffer {
    pub label: String,
}

#[derive(Debug)]
pub struct MockTexture {
    pub label: String,
    pub format: wgpu::TextureFormat,
}

impl MockTexture {
    pub fn new(label: &str, format: wgpu::TextureFormat) -> Self {
        Self {
            label: label.into(),
            format,
        }
    }
}

impl RayTracer for MockTracer {
    type Program = MockProgram;
    type Vars = MockVars;
    type Buffer = MockBuffer;
    type Texture = MockTexture;

    fn create_program(
        &mut self,
        desc: &ProgramDesc,
        defines: &Defines,
    ) -> Self::Program {
        self.events.push(Event::CreateProgram {
            label: desc.label.clone(),
            defines: defines.clone(),
        });

        MockProgram {
            label: desc.label.clone(),
        }
    }

    fn create_vars(
        &mut self,
        program: &Self::Program,
        table: &BindingTable,
    ) -> Self::Vars {
        self.events.push(Event::CreateVars {
            label: program.label.clone(),
            shape: table.shape(),
        });

        MockVars {
            label: program.label.clone(),
        }
    }

    fn structured_stride(
        &self,
        _: &Self::Vars,
        binding: &str,
    ) -> Option<u32> {
        binding.contains("reservoir").then_some(self.stride)
    }

    fn create_structured_buffer(
        &mut self,
        label: &str,
        stride: u32,
        count: u32,
    ) -> Self::Buffer {
        self.events.push(Event::CreateBuffer {
            label: label.into(),
            stride,
            count,
        });

        MockBuffer {
            label: label.into(),
        }
    }

    fn create_texture(
        &mut self,
        label: &str,
        size: UVec2,
        format: wgpu::TextureFormat,
    ) -> Self::Texture {
        self.events.push(Event::CreateTexture {
            label: label.into(),
            size,
            format,
        });

        MockTexture::new(label, format)
    }

    fn texture_format(&self, texture: &Self::Texture) -> wgpu::TextureFormat {
        texture.format
    }

    fn clear_texture(&mut self, texture: &Self::Texture) {
        self.events.push(Event::ClearTexture {
            label: texture.label.clone(),
        });
    }

    fn trace(
        &mut self,
        program: &Self::Program,
        vars: &mut Self::Vars,
        bindings: &Bindings<'_, Self>,
        dims: UVec3,
    ) {
        assert_eq!(program.label, vars.label);

        self.events.push(Event::Trace(TraceEvent {
            label: program.label.clone(),
            params: bindings.params,
            dims,
            buffers: bindings
                .buffers
                .iter()
                .map(|(name, buffer)| (*name, buffer.label.clone()))
                .collect(),
            textures: bindings
                .textures
                .iter()
                .map(|(name, texture)| (*name, texture.label.clone()))
                .collect(),
        }));
    }

    fn submit(&mut self) {
        self.events.push(Event::Submit);
    }
}

#[derive(Debug, Default)]
pub struct MockScene {
    pub geometry_count: u32,
    pub triangles: Vec<GeometryId>,
    pub curves: Vec<GeometryId>,
    pub lighting: LightingConfig,
    pub light_collection_updates: Cell<u32>,
}

impl MockScene {
    /// Creates a scene made of `n` triangle meshes.
    pub fn triangles(n: u32) -> Self {
        Self {
            geometry_count: n,
            triangles: (0..n).map(GeometryId::new).collect(),
            ..Default::default()
        }
    }
}

impl Scene for MockScene {
    fn geometry_count(&self) -> u32 {
        self.geometry_count
    }

    fn geometry_ids(&self, ty: GeometryType) -> Vec<GeometryId> {
        match ty {
            GeometryType::TriangleMesh => self.triangles.clone(),
            GeometryType::Curve => self.curves.clone(),
            _ => Default::default(),
        }
    }

    fn lighting(&self) -> LightingConfig {
        self.lighting
    }

    fn update_light_collection(&self) {
        self.light_collection_updates
            .set(self.light_collection_updates.get() + 1);
    }

    fn shader_modules(&self) -> Vec<String> {
        vec!["scene".into()]
    }

    fn defines(&self) -> Defines {
        let mut defines = Defines::default();

        defines.set("SCENE_GEOMETRY_TYPES", 1);
        defines
    }

    fn max_attribute_size(&self) -> u32 {
        8
    }
}
