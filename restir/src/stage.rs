use derivative::Derivative;
use glam::UVec3;
use log::{debug, trace};

use crate::gpu::{self, FrameFlags};
use crate::{
    Bindings, Defines, RayTracer, Reflection, RenderResources,
    ReservoirRole, ReservoirStorage, Scene, StageDescriptor, StageProgram,
};

/// Single stage of a bound pipeline: its descriptor, the program built for
/// the current scene and (lazily) the engine-side objects it's dispatched
/// with.
#[derive(Derivative)]
#[derivative(Debug(bound = ""))]
pub struct Stage<R>
where
    R: RayTracer,
{
    descriptor: StageDescriptor,
    program: StageProgram,
    #[derivative(Debug = "ignore")]
    compiled: Option<CompiledStage<R>>,
}

struct CompiledStage<R>
where
    R: RayTracer,
{
    program: R::Program,
    vars: R::Vars,
}

impl<R> Stage<R>
where
    R: RayTracer,
{
    pub fn new(descriptor: StageDescriptor, scene: &dyn Scene) -> Self {
        let program = StageProgram::build(&descriptor, scene);

        Self {
            descriptor,
            program,
            compiled: None,
        }
    }

    pub fn name(&self) -> &'static str {
        self.descriptor.name
    }

    pub fn descriptor(&self) -> &StageDescriptor {
        &self.descriptor
    }

    pub fn program(&self) -> &StageProgram {
        &self.program
    }

    pub fn is_prepared(&self) -> bool {
        self.compiled.is_some()
    }

    /// Updates the defines the stage is specialized with; the engine-side
    /// objects get dropped (and rebuilt on the next [`Self::prepare()`]) only
    /// if the defines have actually changed.
    pub fn set_defines(&mut self, defines: Defines) {
        if self.program.set_defines(defines) && self.compiled.take().is_some()
        {
            debug!("Stage `{}` invalidated (defines changed)", self.name());
        }
    }

    /// Compiles the program and creates its variables, unless that's been
    /// already done; returns whether anything got built.
    pub fn prepare(&mut self, tracer: &mut R) -> bool {
        if self.compiled.is_some() {
            return false;
        }

        debug!("Preparing stage `{}`", self.name());

        let program =
            tracer.create_program(self.program.desc(), self.program.defines());

        let vars = tracer.create_vars(&program, self.program.table());

        self.compiled = Some(CompiledStage { program, vars });

        true
    }

    /// Returns the per-element size of given reservoir, as reflected from
    /// this stage's variables; `None` for texture-backed reservoirs.
    pub fn stride(&self, tracer: &R, role: ReservoirRole) -> Option<u32> {
        if role.texture_format().is_some() {
            return None;
        }

        let compiled = self.compiled.as_ref().unwrap_or_else(|| {
            panic!("Stage `{}` has not been prepared", self.name())
        });

        let stride = tracer
            .structured_stride(&compiled.vars, role.binding())
            .unwrap_or_else(|| {
                panic!(
                    "Stage `{}` doesn't declare `{}`",
                    self.name(),
                    role.binding()
                )
            });

        Some(stride)
    }

    /// Dispatches the stage over the entire output.
    ///
    /// Frame flags the stage doesn't listen to are masked out of `params`.
    pub fn run(
        &mut self,
        tracer: &mut R,
        params: gpu::FrameParams,
        reflection: &Reflection,
        resources: &RenderResources<'_, R::Texture>,
        reservoirs: &ReservoirStorage<R>,
    ) {
        let compiled = self.compiled.as_mut().unwrap_or_else(|| {
            panic!("Stage `{}` has not been prepared", self.descriptor.name)
        });

        let params = gpu::FrameParams {
            flags: FrameFlags::new(params.flags.bits() & self.descriptor.flags),
            ..params
        };

        let mut bindings = Bindings::<R>::new(params);

        for channel in &reflection.inputs {
            if let Some(texture) = resources.input(channel.name) {
                bindings.textures.push((channel.texname, texture));
            }
        }

        for name in self.descriptor.outputs() {
            let Some(channel) = reflection.output(name) else {
                continue;
            };

            if let Some(texture) = resources.output(name) {
                bindings.textures.push((channel.texname, texture));
            }
        }

        for (role, _) in &self.descriptor.reservoirs {
            let role = *role;

            if role.texture_format().is_some() {
                let texture = reservoirs.texture(role).unwrap_or_else(|| {
                    panic!("Reservoir `{}` is not allocated", role.binding())
                });

                bindings.textures.push((role.binding(), texture));
            } else {
                let buffer = reservoirs.buffer(role).unwrap_or_else(|| {
                    panic!("Reservoir `{}` is not allocated", role.binding())
                });

                bindings.buffers.push((role.binding(), buffer));
            }
        }

        let size = resources.size();
        let dims = UVec3::new(size.x, size.y, 1);

        trace!(
            "Tracing `{}`: dims={dims}, flags={:#b}",
            self.descriptor.name,
            params.flags.bits()
        );

        tracer.trace(&compiled.program, &mut compiled.vars, &bindings, dims);
    }
}
