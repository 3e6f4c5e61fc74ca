use std::borrow::Cow;
use std::fmt::Write;

use crate::Defines;

/// Resource a shader library binds, besides the frame params and the binding
/// table every library gets.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LibraryBinding {
    Structured {
        stride: u32,
    },
    Texture {
        sample_type: wgpu::TextureSampleType,
    },
    StorageTexture {
        format: wgpu::TextureFormat,
        access: wgpu::StorageTextureAccess,
    },
}

/// WGSL source of a stage's kernels, together with the resources they
/// declare.
///
/// Bindings of group 0 are laid out as:
///
/// - `0` - frame params (uniform),
/// - `1` - serialized binding table (read-only storage),
/// - `2..` - resources, in the order they've been declared.
///
/// The library's `ray_gen` entry point is dispatched with 8x8 workgroups;
/// misses and hit groups are plain functions it routes to through the
/// binding table.
#[derive(Clone, Debug)]
pub struct ShaderLibrary {
    source: Cow<'static, str>,
    bindings: Vec<(&'static str, LibraryBinding)>,
}

impl ShaderLibrary {
    pub const PARAMS_BINDING: u32 = 0;
    pub const TABLE_BINDING: u32 = 1;
    pub const FIRST_RESOURCE_BINDING: u32 = 2;

    pub fn new(source: impl Into<Cow<'static, str>>) -> Self {
        Self {
            source: source.into(),
            bindings: Default::default(),
        }
    }

    pub fn structured(self, name: &'static str, stride: u32) -> Self {
        assert!(stride > 0, "Binding `{name}` has zero stride");

        self.bind(name, LibraryBinding::Structured { stride })
    }

    pub fn texture(
        self,
        name: &'static str,
        sample_type: wgpu::TextureSampleType,
    ) -> Self {
        self.bind(name, LibraryBinding::Texture { sample_type })
    }

    pub fn storage_texture(
        self,
        name: &'static str,
        format: wgpu::TextureFormat,
        access: wgpu::StorageTextureAccess,
    ) -> Self {
        self.bind(name, LibraryBinding::StorageTexture { format, access })
    }

    fn bind(mut self, name: &'static str, binding: LibraryBinding) -> Self {
        assert!(
            self.binding(name).is_none(),
            "Binding `{name}` is declared more than once"
        );

        self.bindings.push((name, binding));
        self
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Returns resource bindings together with their binding indices.
    pub fn bindings(
        &self,
    ) -> impl Iterator<Item = (u32, &'static str, LibraryBinding)> + '_ {
        self.bindings.iter().enumerate().map(|(idx, (name, binding))| {
            (Self::FIRST_RESOURCE_BINDING + idx as u32, *name, *binding)
        })
    }

    pub fn binding(&self, name: &str) -> Option<LibraryBinding> {
        self.bindings
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, binding)| *binding)
    }

    pub fn stride(&self, name: &str) -> Option<u32> {
        match self.binding(name)? {
            LibraryBinding::Structured { stride } => Some(stride),
            _ => None,
        }
    }

    pub fn layout_entries(&self) -> Vec<wgpu::BindGroupLayoutEntry> {
        let params = wgpu::BindGroupLayoutEntry {
            binding: Self::PARAMS_BINDING,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        };

        let table = wgpu::BindGroupLayoutEntry {
            binding: Self::TABLE_BINDING,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Storage { read_only: true },
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        };

        let resources = self.bindings().map(|(binding, _, ty)| {
            let ty = match ty {
                LibraryBinding::Structured { .. } => wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Storage { read_only: false },
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },

                LibraryBinding::Texture { sample_type } => {
                    wgpu::BindingType::Texture {
                        sample_type,
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    }
                }

                LibraryBinding::StorageTexture { format, access } => {
                    wgpu::BindingType::StorageTexture {
                        access,
                        format,
                        view_dimension: wgpu::TextureViewDimension::D2,
                    }
                }
            };

            wgpu::BindGroupLayoutEntry {
                binding,
                visibility: wgpu::ShaderStages::COMPUTE,
                ty,
                count: None,
            }
        });

        [params, table].into_iter().chain(resources).collect()
    }
}

/// Turns defines into WGSL constants prepended to the program's source.
///
/// WGSL has no preprocessor, so every define must be numeric - kernels
/// branch on the constants and the compiler prunes the dead code.
pub fn define_consts(defines: &Defines) -> String {
    let mut out = String::new();

    for (name, value) in defines.iter() {
        let ty = if value.parse::<u32>().is_ok() {
            "u32"
        } else if value.parse::<i32>().is_ok() {
            "i32"
        } else if value.parse::<f32>().is_ok() {
            "f32"
        } else {
            panic!("Define `{name}` has non-numeric value: {value}");
        };

        let suffix = if ty == "u32" { "u" } else { "" };

        _ = writeln!(out, "const {name}: {ty} = {value}{suffix};");
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bindings() {
        let target = ShaderLibrary::new("")
            .texture("vbuffer", wgpu::TextureSampleType::Uint)
            .structured("temporal_reservoir_di", 48)
            .storage_texture(
                "output_color",
                wgpu::TextureFormat::Rgba32Float,
                wgpu::StorageTextureAccess::WriteOnly,
            );

        let names: Vec<_> =
            target.bindings().map(|(idx, name, _)| (idx, name)).collect();

        assert_eq!(
            vec![
                (2, "vbuffer"),
                (3, "temporal_reservoir_di"),
                (4, "output_color"),
            ],
            names
        );

        assert_eq!(Some(48), target.stride("temporal_reservoir_di"));
        assert_eq!(None, target.stride("vbuffer"));
        assert_eq!(None, target.stride("spatial_reservoir_di"));

        let entries = target.layout_entries();

        assert_eq!(5, entries.len());

        assert_eq!(
            wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            entries[0].ty
        );

        assert_eq!(
            wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Storage { read_only: true },
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            entries[1].ty
        );

        assert_eq!(4, entries[4].binding);
    }

    #[test]
    #[should_panic(expected = "Binding `vbuffer` is declared more than once")]
    fn duplicated_binding() {
        ShaderLibrary::new("")
            .texture("vbuffer", wgpu::TextureSampleType::Uint)
            .texture("vbuffer", wgpu::TextureSampleType::Uint);
    }

    #[test]
    fn define_consts() {
        let mut defines = Defines::default();

        defines
            .set("MAX_BOUNCES", 3)
            .set("OFFSET", -2)
            .set("EXPOSURE", 0.5)
            .set_flag("is_valid_view_w", false);

        assert_eq!(
            "const EXPOSURE: f32 = 0.5;\n\
             const MAX_BOUNCES: u32 = 3u;\n\
             const OFFSET: i32 = -2;\n\
             const is_valid_view_w: u32 = 0u;\n",
            super::define_consts(&defines)
        );
    }

    #[test]
    #[should_panic(expected = "non-numeric value")]
    fn define_consts_with_text() {
        let mut defines = Defines::default();

        defines.set("MODE", "fast");
        super::define_consts(&defines);
    }
}
