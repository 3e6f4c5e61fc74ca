use fxhash::FxHashMap;
use glam::UVec2;

use crate::{Defines, Topology};

pub const VBUFFER: &str = "vbuffer";
pub const VIEW_W: &str = "viewW";
pub const MOTION_VECTOR: &str = "motionVector";
pub const OUTPUT_COLOR: &str = "outputColor";
pub const RESERVOIR_SPATIAL: &str = "reservoirSpatial";
pub const RESERVOIR_PREVIOUS: &str = "reservoirPrevious";

/// Resource exchanged with the render graph hosting the pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Channel {
    /// Name of the resource within the render graph.
    pub name: &'static str,

    /// Name of the kernel variable the resource gets bound to.
    pub texname: &'static str,

    pub desc: &'static str,
    pub optional: bool,

    /// Required format; `None` means the host is free to choose.
    pub format: Option<wgpu::TextureFormat>,
}

impl Channel {
    const fn input(
        name: &'static str,
        texname: &'static str,
        desc: &'static str,
        optional: bool,
    ) -> Self {
        Self {
            name,
            texname,
            desc,
            optional,
            format: None,
        }
    }

    const fn output(
        name: &'static str,
        texname: &'static str,
        desc: &'static str,
        optional: bool,
    ) -> Self {
        Self {
            name,
            texname,
            desc,
            optional,
            format: Some(wgpu::TextureFormat::Rgba32Float),
        }
    }
}

pub const INPUT_VBUFFER: Channel = Channel::input(
    VBUFFER,
    "vbuffer",
    "Visibility buffer in packed format",
    false,
);

pub const INPUT_VIEW_W: Channel = Channel::input(
    VIEW_W,
    "view_w",
    "World-space view direction (xyz float format)",
    true,
);

pub const INPUT_MOTION_VECTOR: Channel = Channel::input(
    MOTION_VECTOR,
    "motion_vector",
    "Screen-space motion vector",
    true,
);

pub const OUTPUT_COLOR_CHANNEL: Channel =
    Channel::output(OUTPUT_COLOR, "output_color", "Output color", false);

pub const OUTPUT_RESERVOIR_SPATIAL: Channel = Channel::output(
    RESERVOIR_SPATIAL,
    "debug_reservoir_spatial",
    "Spatial reservoir state",
    true,
);

pub const OUTPUT_RESERVOIR_PREVIOUS: Channel = Channel::output(
    RESERVOIR_PREVIOUS,
    "debug_reservoir_previous",
    "Previous reservoir state",
    true,
);

/// Resources a pipeline declares to its render graph.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Reflection {
    pub inputs: Vec<Channel>,
    pub outputs: Vec<Channel>,
}

impl Reflection {
    pub fn new(topology: &Topology) -> Self {
        let mut inputs = vec![INPUT_VBUFFER, INPUT_VIEW_W];

        if topology.reprojects() {
            inputs.push(INPUT_MOTION_VECTOR);
        }

        let mut outputs = vec![OUTPUT_COLOR_CHANNEL];

        for stage in topology.stages() {
            for name in stage.outputs() {
                if outputs.iter().all(|channel| channel.name != name) {
                    outputs.push(Self::debug_output(name));
                }
            }
        }

        Self { inputs, outputs }
    }

    fn debug_output(name: &str) -> Channel {
        [OUTPUT_RESERVOIR_SPATIAL, OUTPUT_RESERVOIR_PREVIOUS]
            .into_iter()
            .find(|channel| channel.name == name)
            .unwrap_or_else(|| panic!("Unknown output: {name}"))
    }

    pub fn input(&self, name: &str) -> Option<&Channel> {
        self.inputs.iter().find(|channel| channel.name == name)
    }

    pub fn output(&self, name: &str) -> Option<&Channel> {
        self.outputs.iter().find(|channel| channel.name == name)
    }

    pub fn channels(&self) -> impl Iterator<Item = &Channel> + '_ {
        self.inputs.iter().chain(&self.outputs)
    }

    /// Returns `is_valid_<texname>` definitions telling the kernels which
    /// resources the host actually provided.
    pub fn valid_resource_defines<T>(
        &self,
        resources: &RenderResources<'_, T>,
    ) -> Defines {
        let mut defines = Defines::default();

        for channel in &self.inputs {
            defines.set_flag(
                format!("is_valid_{}", channel.texname),
                resources.input(channel.name).is_some(),
            );
        }

        for channel in &self.outputs {
            defines.set_flag(
                format!("is_valid_{}", channel.texname),
                resources.output(channel.name).is_some(),
            );
        }

        defines
    }
}

/// Textures the render graph hands over for a single frame.
pub struct RenderResources<'a, T> {
    size: UVec2,
    inputs: FxHashMap<&'a str, &'a T>,
    outputs: FxHashMap<&'a str, &'a T>,
}

impl<'a, T> RenderResources<'a, T> {
    /// Creates an empty set of resources; `size` is the output resolution
    /// all stages get dispatched at.
    pub fn new(size: UVec2) -> Self {
        Self {
            size,
            inputs: Default::default(),
            outputs: Default::default(),
        }
    }

    pub fn with_input(mut self, name: &'a str, texture: &'a T) -> Self {
        self.inputs.insert(name, texture);
        self
    }

    pub fn with_output(mut self, name: &'a str, texture: &'a T) -> Self {
        self.outputs.insert(name, texture);
        self
    }

    pub fn size(&self) -> UVec2 {
        self.size
    }

    pub fn input(&self, name: &str) -> Option<&'a T> {
        self.inputs.get(name).copied()
    }

    pub fn output(&self, name: &str) -> Option<&'a T> {
        self.outputs.get(name).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reflection() {
        let target = Reflection::new(&Topology::combined());
        let inputs: Vec<_> = target.inputs.iter().map(|c| c.name).collect();
        let outputs: Vec<_> = target.outputs.iter().map(|c| c.name).collect();

        assert_eq!(vec![VBUFFER, VIEW_W, MOTION_VECTOR], inputs);
        assert_eq!(vec![OUTPUT_COLOR], outputs);

        assert_eq!(
            Some(wgpu::TextureFormat::Rgba32Float),
            target.output(OUTPUT_COLOR).and_then(|c| c.format)
        );

        let target = Reflection::new(&Topology::single());
        let inputs: Vec<_> = target.inputs.iter().map(|c| c.name).collect();

        assert_eq!(vec![VBUFFER, VIEW_W], inputs);

        let target = Reflection::new(&Topology::update_shade());
        let outputs: Vec<_> = target.outputs.iter().map(|c| c.name).collect();

        assert_eq!(
            vec![OUTPUT_COLOR, RESERVOIR_SPATIAL, RESERVOIR_PREVIOUS],
            outputs
        );
    }

    #[test]
    fn valid_resource_defines() {
        let target = Reflection::new(&Topology::combined());

        let resources = RenderResources::new(UVec2::new(4, 4))
            .with_input(VBUFFER, &())
            .with_input(MOTION_VECTOR, &())
            .with_output(OUTPUT_COLOR, &());

        let defines = target.valid_resource_defines(&resources);

        assert_eq!(Some("1"), defines.get("is_valid_vbuffer"));
        assert_eq!(Some("0"), defines.get("is_valid_view_w"));
        assert_eq!(Some("1"), defines.get("is_valid_motion_vector"));
        assert_eq!(Some("1"), defines.get("is_valid_output_color"));
    }
}
