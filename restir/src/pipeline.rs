use std::sync::Arc;

use derivative::Derivative;
use glam::{Mat4, UVec2};
use log::{debug, info};
use rand::Rng;

use crate::{
    metric, Defines, FrameState, RayTracer, Reflection, RenderResources,
    ReservoirRole, ReservoirStorage, Scene, Settings, Stage, Toggles,
    Topology,
};

/// Value of `SAMPLE_GENERATOR_TYPE` selecting the uniform sample generator.
const SAMPLE_GENERATOR_UNIFORM: u32 = 1;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PipelineState {
    /// No scene - frames only clear the outputs.
    Unbound,

    /// Scene is bound, but some stages haven't been prepared yet.
    Bound,

    /// Every stage has its program and variables built.
    Ready,
}

/// Multi-pass ReSTIR pipeline: owns the stages and the reservoirs, and
/// drives them through frames.
#[derive(Derivative)]
#[derivative(Debug(bound = ""))]
pub struct Pipeline<R>
where
    R: RayTracer,
{
    topology: Topology,
    reflection: Reflection,
    max_bounces: u32,
    #[derivative(Debug = "ignore")]
    scene: Option<Arc<dyn Scene>>,
    stages: Vec<Stage<R>>,
    reservoirs: ReservoirStorage<R>,
    frame: FrameState,
    view: Mat4,
    prev_view: Mat4,
}

impl<R> Pipeline<R>
where
    R: RayTracer,
{
    pub fn new(settings: Settings) -> Self {
        Self::with_topology(Topology::from_kind(settings.topology), settings)
    }

    /// Creates a pipeline running given stages; `settings.topology` is
    /// ignored.
    pub fn with_topology(topology: Topology, settings: Settings) -> Self {
        info!(
            "Creating pipeline: topology={}, stages={}, max_bounces={}",
            topology.kind().name(),
            topology.stages().len(),
            settings.max_bounces
        );

        Self {
            reflection: Reflection::new(&topology),
            topology,
            max_bounces: settings.max_bounces,
            scene: None,
            stages: Default::default(),
            reservoirs: Default::default(),
            frame: FrameState::new(settings.toggles),
            view: Mat4::IDENTITY,
            prev_view: Mat4::IDENTITY,
        }
    }

    /// Binds a new scene, discarding everything built for the previous one.
    pub fn bind_scene(&mut self, scene: Arc<dyn Scene>) {
        info!(
            "Binding scene: geometries={}, topology={}",
            scene.geometry_count(),
            self.topology.kind().name()
        );

        self.stages = self
            .topology
            .stages()
            .iter()
            .map(|descriptor| Stage::new(descriptor.clone(), &*scene))
            .collect();

        self.reservoirs.invalidate();
        self.frame.reset();
        self.scene = Some(scene);
    }

    pub fn unbind_scene(&mut self) {
        if self.scene.take().is_some() {
            info!("Unbinding scene");
        }

        self.stages.clear();
        self.reservoirs.invalidate();
    }

    pub fn state(&self) -> PipelineState {
        if self.scene.is_none() {
            PipelineState::Unbound
        } else if self.stages.iter().all(|stage| stage.is_prepared()) {
            PipelineState::Ready
        } else {
            PipelineState::Bound
        }
    }

    /// Renders a single frame into `resources` and submits it.
    ///
    /// Without a scene, only the outputs get cleared; with an empty output,
    /// nothing gets dispatched. In both cases the pipeline's state doesn't
    /// change.
    pub fn run_frame(
        &mut self,
        tracer: &mut R,
        resources: &RenderResources<'_, R::Texture>,
    ) {
        let size = resources.size();

        if size.x == 0 || size.y == 0 {
            debug!("Skipping frame: output is empty ({size})");
        } else if let Some(scene) = self.scene.clone() {
            self.render(tracer, resources, &*scene);
        } else {
            self.clear_outputs(tracer, resources);
        }

        tracer.submit();
    }

    fn render(
        &mut self,
        tracer: &mut R,
        resources: &RenderResources<'_, R::Texture>,
        scene: &dyn Scene,
    ) {
        if scene.lighting().emissive_lights {
            scene.update_light_collection();
        }

        let defines = self.defines(scene, resources);

        for stage in &mut self.stages {
            stage.set_defines(defines.clone());
            stage.prepare(tracer);
        }

        self.check_resources(tracer, resources);

        let mut frame = self.frame.begin();

        let reallocated = {
            let topology = &self.topology;
            let stages = &self.stages;

            self.reservoirs.ensure(tracer, resources.size(), |tracer| {
                reservoir_strides(topology, stages, tracer)
            })
        };

        if reallocated {
            frame.invalidate_history();
        }

        let params = frame.params(
            self.prev_view,
            rand::thread_rng().gen(),
            self.max_bounces,
        );

        let reflection = &self.reflection;
        let reservoirs = &self.reservoirs;

        for stage in &mut self.stages {
            metric(stage.name(), || {
                stage.run(tracer, params, reflection, resources, reservoirs)
            });
        }

        self.frame.finish();
        self.prev_view = self.view;
    }

    fn clear_outputs(
        &self,
        tracer: &mut R,
        resources: &RenderResources<'_, R::Texture>,
    ) {
        for channel in &self.reflection.outputs {
            if let Some(texture) = resources.output(channel.name) {
                tracer.clear_texture(texture);
            }
        }
    }

    /// Builds defines shared by all stages: scene's, lighting, channel
    /// validity and settings.
    fn defines(
        &self,
        scene: &dyn Scene,
        resources: &RenderResources<'_, R::Texture>,
    ) -> Defines {
        let mut defines = scene.defines();

        defines
            .extend(&scene.lighting().defines())
            .extend(&self.reflection.valid_resource_defines(resources))
            .set("MAX_BOUNCES", self.max_bounces)
            .set("SAMPLE_GENERATOR_TYPE", SAMPLE_GENERATOR_UNIFORM);

        defines
    }

    fn check_resources(
        &self,
        tracer: &R,
        resources: &RenderResources<'_, R::Texture>,
    ) {
        for channel in &self.reflection.inputs {
            assert!(
                channel.optional || resources.input(channel.name).is_some(),
                "Missing required input: `{}`",
                channel.name
            );
        }

        for channel in &self.reflection.outputs {
            let Some(texture) = resources.output(channel.name) else {
                assert!(
                    channel.optional,
                    "Missing required output: `{}`",
                    channel.name
                );

                continue;
            };

            if let Some(expected) = channel.format {
                let actual = tracer.texture_format(texture);

                assert_eq!(
                    expected, actual,
                    "Output `{}` has invalid format",
                    channel.name
                );
            }
        }
    }

    /// Requests the persisted reservoirs to be ignored during the next
    /// frame; lights get re-initialized as well.
    pub fn request_clear(&mut self) {
        debug!("Clear requested");

        self.frame.request_clear();
    }

    pub fn is_clear_pending(&self) -> bool {
        self.frame.is_clear_pending()
    }

    pub fn lights_need_init(&self) -> bool {
        self.frame.lights_need_init()
    }

    pub fn toggles(&self) -> Toggles {
        self.frame.toggles()
    }

    pub fn set_toggles(&mut self, toggles: Toggles) {
        *self.frame.toggles_mut() = toggles;
    }

    pub fn toggles_mut(&mut self) -> &mut Toggles {
        self.frame.toggles_mut()
    }

    /// Records camera's current view matrix; stages see it as the previous
    /// view during the next frame.
    pub fn set_view(&mut self, view: Mat4) {
        self.view = view;
    }

    pub fn frame_count(&self) -> u32 {
        self.frame.frame_count()
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn stages(&self) -> &[Stage<R>] {
        &self.stages
    }

    pub fn reservoirs(&self) -> &ReservoirStorage<R> {
        &self.reservoirs
    }

    /// Returns resources the pipeline consumes and produces.
    pub fn reflect(&self) -> &Reflection {
        &self.reflection
    }

    pub fn settings(&self) -> Settings {
        Settings {
            toggles: self.frame.toggles(),
            max_bounces: self.max_bounces,
            topology: self.topology.kind(),
        }
    }

    /// Returns the output size reservoirs are currently allocated for.
    pub fn size(&self) -> Option<UVec2> {
        self.reservoirs.size()
    }
}

impl<R> Drop for Pipeline<R>
where
    R: RayTracer,
{
    fn drop(&mut self) {
        info!("Deleting pipeline: {}", self.topology.kind().name());
    }
}

/// Reflects strides of all reservoirs from the first stage that binds each
/// of them.
fn reservoir_strides<R>(
    topology: &Topology,
    stages: &[Stage<R>],
    tracer: &R,
) -> Vec<(ReservoirRole, Option<u32>)>
where
    R: RayTracer,
{
    topology
        .reservoirs()
        .into_iter()
        .map(|role| {
            let stride = topology
                .first_user_of(role)
                .and_then(|idx| stages[idx].stride(tracer, role));

            (role, stride)
        })
        .collect()
}
