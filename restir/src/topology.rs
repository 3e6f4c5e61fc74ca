use std::fmt;

use crate::gpu::FrameFlags as F;
use crate::{GeometryType, OUTPUT_COLOR, RESERVOIR_PREVIOUS, RESERVOIR_SPATIAL};

/// Largest ray payload any stage may declare.
pub const MAX_PAYLOAD_BYTES: u32 = 256;

/// Payload shared by the resampling stages - it must fit a shadow ray, an
/// indirect bounce and the reservoir candidate carried along.
const RESAMPLING_PAYLOAD_BYTES: u32 = 96;

const PATH_TRACING_PAYLOAD_BYTES: u32 = 72;

const MAX_RECURSION_DEPTH: u32 = 2;

/// Per-pixel storage a stage reads or writes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ReservoirRole {
    TemporalDi,
    TemporalGi,
    SpatialDi,
    SpatialGi,

    /// Color-reservoir textures used by the legacy update-and-shade
    /// topology.
    ColorPrevious,
    ColorCurrent,
    ColorSpatial,
}

impl ReservoirRole {
    pub const ALL: [Self; 7] = [
        Self::TemporalDi,
        Self::TemporalGi,
        Self::SpatialDi,
        Self::SpatialGi,
        Self::ColorPrevious,
        Self::ColorCurrent,
        Self::ColorSpatial,
    ];

    /// Name under which kernels see this reservoir.
    pub fn binding(self) -> &'static str {
        match self {
            Self::TemporalDi => "temporal_reservoir_di",
            Self::TemporalGi => "temporal_reservoir_gi",
            Self::SpatialDi => "spatial_reservoir_di",
            Self::SpatialGi => "spatial_reservoir_gi",
            Self::ColorPrevious => "reservoir_previous",
            Self::ColorCurrent => "reservoir_current",
            Self::ColorSpatial => "reservoir_spatial",
        }
    }

    pub fn label(self) -> String {
        format!("restir_{}", self.binding())
    }

    /// Returns whether the reservoir's contents must survive until the next
    /// frame.
    pub fn is_persistent(self) -> bool {
        matches!(
            self,
            Self::TemporalDi | Self::TemporalGi | Self::ColorPrevious
        )
    }

    /// Returns the texture format for reservoirs stored as textures; the
    /// remaining ones are structured buffers whose stride comes from the
    /// kernel.
    pub fn texture_format(self) -> Option<wgpu::TextureFormat> {
        match self {
            Self::ColorPrevious | Self::ColorCurrent | Self::ColorSpatial => {
                Some(wgpu::TextureFormat::Rgba32Float)
            }
            _ => None,
        }
    }

    /// Returns the render-graph output this reservoir is exposed through
    /// (for debugging), if any.
    pub fn debug_output(self) -> Option<&'static str> {
        match self {
            Self::ColorPrevious => Some(RESERVOIR_PREVIOUS),
            Self::ColorSpatial => Some(RESERVOIR_SPATIAL),
            _ => None,
        }
    }
}

/// How a stage touches a reservoir.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Access {
    /// Reads arbitrary pixels (e.g. reprojected or neighbouring ones).
    Gather,

    /// Reads and writes back only the pixel being processed.
    Pixel,

    /// Only writes the pixel being processed.
    Write,
}

impl Access {
    pub fn reads(self) -> bool {
        matches!(self, Self::Gather | Self::Pixel)
    }

    pub fn writes(self) -> bool {
        matches!(self, Self::Pixel | Self::Write)
    }
}

/// Kind of ray a stage traces; each one occupies a miss slot and a hit-group
/// slot of the binding table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RayType {
    Shadow,
    Indirect,
    Scatter,
}

impl RayType {
    pub fn miss(self) -> &'static str {
        match self {
            Self::Shadow => "shadow_miss",
            Self::Indirect => "indirect_miss",
            Self::Scatter => "scatter_miss",
        }
    }

    /// Shadow rays only care whether anything got hit, so they don't have a
    /// closest-hit shader.
    pub fn closest_hit(self) -> Option<&'static str> {
        match self {
            Self::Shadow => None,
            Self::Indirect => Some("indirect_closest_hit"),
            Self::Scatter => Some("scatter_closest_hit"),
        }
    }

    pub fn any_hit(self) -> &'static str {
        match self {
            Self::Shadow => "shadow_any_hit",
            Self::Indirect => "indirect_any_hit",
            Self::Scatter => "scatter_any_hit",
        }
    }
}

/// Describes a single ray-tracing dispatch of the pipeline.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StageDescriptor {
    pub name: &'static str,
    pub library: &'static str,
    pub ray_gen: &'static str,
    pub rays: Vec<RayType>,
    pub geometry_types: Vec<GeometryType>,
    pub max_payload_bytes: u32,
    pub max_recursion_depth: u32,
    pub reservoirs: Vec<(ReservoirRole, Access)>,

    /// Frame flags this stage receives; the remaining ones are masked out.
    pub flags: u32,

    /// Whether the stage reads screen-space motion vectors.
    pub reprojects: bool,

    /// Whether the stage writes the pipeline's color output.
    pub writes_output: bool,
}

impl StageDescriptor {
    pub fn new(name: &'static str, library: &'static str) -> Self {
        Self {
            name,
            library,
            ray_gen: "ray_gen",
            rays: Default::default(),
            geometry_types: vec![GeometryType::TriangleMesh],
            max_payload_bytes: RESAMPLING_PAYLOAD_BYTES,
            max_recursion_depth: MAX_RECURSION_DEPTH,
            reservoirs: Default::default(),
            flags: F::CLEAR_BUFFERS,
            reprojects: false,
            writes_output: false,
        }
    }

    pub fn rays<const N: usize>(mut self, rays: [RayType; N]) -> Self {
        self.rays.extend(rays);
        self
    }

    pub fn payload(mut self, max_payload_bytes: u32) -> Self {
        self.max_payload_bytes = max_payload_bytes;
        self
    }

    pub fn access<const N: usize>(
        mut self,
        access: Access,
        roles: [ReservoirRole; N],
    ) -> Self {
        self.reservoirs
            .extend(roles.into_iter().map(|role| (role, access)));

        self
    }

    pub fn flags(mut self, flags: u32) -> Self {
        self.flags |= flags;
        self
    }

    pub fn reprojecting(mut self) -> Self {
        self.reprojects = true;
        self
    }

    pub fn writing_output(mut self) -> Self {
        self.writes_output = true;
        self
    }

    pub fn access_of(&self, role: ReservoirRole) -> Option<Access> {
        self.reservoirs
            .iter()
            .find(|(r, _)| *r == role)
            .map(|(_, access)| *access)
    }

    /// Returns names of the graph outputs this stage binds; a debug output
    /// is bound by the stage that produces the reservoir.
    pub fn outputs(&self) -> impl Iterator<Item = &'static str> + '_ {
        let color = self.writes_output.then_some(OUTPUT_COLOR);

        let debug = self
            .reservoirs
            .iter()
            .filter(|(_, access)| *access == Access::Write)
            .filter_map(|(role, _)| role.debug_output());

        color.into_iter().chain(debug)
    }
}

/// Which of the known stage layouts a topology follows.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum TopologyKind {
    /// Candidate generation + temporal reuse, then spatial reuse +
    /// finalization.
    #[default]
    Combined,

    /// Candidate generation, temporal reuse, spatial reuse and finalization
    /// as four separate dispatches.
    Split,

    /// Plain one-dispatch path tracer without any reservoirs.
    Single,

    /// Color reservoirs kept in textures and updated by a dedicated
    /// update-and-shade stage.
    UpdateShade,

    /// Hand-made list of stages.
    Custom,
}

impl TopologyKind {
    pub fn name(self) -> &'static str {
        match self {
            Self::Combined => "combined",
            Self::Split => "split",
            Self::Single => "single",
            Self::UpdateShade => "update_shade",
            Self::Custom => "custom",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "combined" => Some(Self::Combined),
            "split" => Some(Self::Split),
            "single" => Some(Self::Single),
            "update_shade" => Some(Self::UpdateShade),
            _ => None,
        }
    }
}

/// Ordered list of stages executed each frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Topology {
    kind: TopologyKind,
    stages: Vec<StageDescriptor>,
}

impl Topology {
    /// Creates a topology out of given stages.
    ///
    /// Panics if the stages violate the data-dependency rules - see
    /// [`Self::validate()`].
    pub fn new(kind: TopologyKind, stages: Vec<StageDescriptor>) -> Self {
        let this = Self { kind, stages };

        if let Err(err) = this.validate() {
            panic!("Invalid `{}` topology: {err}", kind.name());
        }

        this
    }

    pub fn from_kind(kind: TopologyKind) -> Self {
        match kind {
            TopologyKind::Combined => Self::combined(),
            TopologyKind::Split => Self::split(),
            TopologyKind::Single => Self::single(),
            TopologyKind::UpdateShade => Self::update_shade(),
            TopologyKind::Custom => {
                panic!("Custom topologies must be created via Topology::new()")
            }
        }
    }

    pub fn combined() -> Self {
        use ReservoirRole::*;

        Self::new(
            TopologyKind::Combined,
            vec![
                StageDescriptor::new("init_temporal", "restir/init_temporal")
                    .rays([RayType::Shadow, RayType::Indirect])
                    .access(Access::Gather, [TemporalDi, TemporalGi])
                    .access(Access::Write, [SpatialDi, SpatialGi])
                    .flags(F::TEMPORAL_REUSE | F::INITIAL_SAMPLES)
                    .reprojecting(),
                StageDescriptor::new(
                    "spatial_finalize",
                    "restir/spatial_finalize",
                )
                .rays([RayType::Shadow])
                .access(Access::Gather, [SpatialDi, SpatialGi])
                .access(Access::Write, [TemporalDi, TemporalGi])
                .flags(F::SPATIAL_REUSE | F::DIRECT_LIGHT | F::INDIRECT_LIGHT)
                .writing_output(),
            ],
        )
    }

    pub fn split() -> Self {
        use ReservoirRole::*;

        Self::new(
            TopologyKind::Split,
            vec![
                StageDescriptor::new("init", "restir/init")
                    .rays([RayType::Shadow, RayType::Indirect])
                    .access(Access::Write, [SpatialDi, SpatialGi])
                    .flags(F::INITIAL_SAMPLES),
                StageDescriptor::new("temporal", "restir/temporal")
                    .rays([RayType::Shadow])
                    .access(Access::Gather, [TemporalDi, TemporalGi])
                    .access(Access::Pixel, [SpatialDi, SpatialGi])
                    .flags(F::TEMPORAL_REUSE | F::INITIAL_SAMPLES)
                    .reprojecting(),
                StageDescriptor::new("spatial", "restir/spatial")
                    .rays([RayType::Shadow])
                    .access(Access::Gather, [SpatialDi, SpatialGi])
                    .access(Access::Write, [TemporalDi, TemporalGi])
                    .flags(F::SPATIAL_REUSE),
                StageDescriptor::new("finalize", "restir/finalize")
                    .rays([RayType::Shadow])
                    .access(Access::Pixel, [TemporalDi, TemporalGi])
                    .flags(F::DIRECT_LIGHT | F::INDIRECT_LIGHT)
                    .writing_output(),
            ],
        )
    }

    pub fn single() -> Self {
        Self::new(
            TopologyKind::Single,
            vec![StageDescriptor::new("path_trace", "restir/path_trace")
                .rays([RayType::Scatter, RayType::Shadow])
                .payload(PATH_TRACING_PAYLOAD_BYTES)
                .flags(F::DIRECT_LIGHT | F::INDIRECT_LIGHT)
                .writing_output()],
        )
    }

    pub fn update_shade() -> Self {
        use ReservoirRole::*;

        Self::new(
            TopologyKind::UpdateShade,
            vec![
                StageDescriptor::new("init_temporal", "restir/init_temporal")
                    .rays([RayType::Shadow, RayType::Indirect])
                    .access(Access::Gather, [ColorPrevious])
                    .access(Access::Write, [ColorCurrent])
                    .flags(F::TEMPORAL_REUSE | F::INITIAL_SAMPLES)
                    .reprojecting(),
                StageDescriptor::new("spatial", "restir/spatial")
                    .rays([RayType::Shadow])
                    .access(Access::Gather, [ColorCurrent])
                    .access(Access::Write, [ColorSpatial])
                    .flags(F::SPATIAL_REUSE),
                StageDescriptor::new("update_shade", "restir/update_shade")
                    .rays([RayType::Shadow])
                    .access(Access::Write, [ColorPrevious])
                    .access(Access::Pixel, [ColorSpatial])
                    .flags(F::DIRECT_LIGHT | F::INDIRECT_LIGHT)
                    .writing_output(),
            ],
        )
    }

    pub fn kind(&self) -> TopologyKind {
        self.kind
    }

    pub fn stages(&self) -> &[StageDescriptor] {
        &self.stages
    }

    /// Returns all reservoirs used by any stage, in order of first use.
    pub fn reservoirs(&self) -> Vec<ReservoirRole> {
        let mut roles = Vec::new();

        for stage in &self.stages {
            for (role, _) in &stage.reservoirs {
                if !roles.contains(role) {
                    roles.push(*role);
                }
            }
        }

        roles
    }

    /// Returns index of the first stage that binds given reservoir.
    pub fn first_user_of(&self, role: ReservoirRole) -> Option<usize> {
        self.stages
            .iter()
            .position(|stage| stage.access_of(role).is_some())
    }

    pub fn reprojects(&self) -> bool {
        self.stages.iter().any(|stage| stage.reprojects)
    }

    /// Checks whether the stages can be executed in order without racing on
    /// the reservoirs:
    ///
    /// - a stage never gathers from a reservoir it writes in the same
    ///   dispatch,
    /// - frame-local reservoirs are read only after an earlier stage has
    ///   written them,
    /// - persistent reservoirs that are read get written at some point, so
    ///   that the next frame sees fresh history.
    pub fn validate(&self) -> Result<(), TopologyViolation> {
        if self.stages.is_empty() {
            return Err(TopologyViolation::NoStages);
        }

        if !self.stages.iter().any(|stage| stage.writes_output) {
            return Err(TopologyViolation::NoOutput);
        }

        let mut written = Vec::new();

        for (idx, stage) in self.stages.iter().enumerate() {
            if self.stages[..idx].iter().any(|s| s.name == stage.name) {
                return Err(TopologyViolation::DuplicatedStage(stage.name));
            }

            if stage.rays.is_empty() {
                return Err(TopologyViolation::NoRays(stage.name));
            }

            if stage.max_payload_bytes == 0
                || stage.max_payload_bytes > MAX_PAYLOAD_BYTES
            {
                return Err(TopologyViolation::InvalidPayload(
                    stage.name,
                    stage.max_payload_bytes,
                ));
            }

            for (nth, (role, access)) in stage.reservoirs.iter().enumerate() {
                if stage.reservoirs[..nth].iter().any(|(r, _)| r == role) {
                    return Err(TopologyViolation::AliasedReservoir(
                        stage.name, *role,
                    ));
                }

                if access.reads()
                    && !role.is_persistent()
                    && !written.contains(role)
                {
                    return Err(TopologyViolation::ReadBeforeWrite(
                        stage.name, *role,
                    ));
                }
            }

            for (role, access) in &stage.reservoirs {
                if access.writes() && !written.contains(role) {
                    written.push(*role);
                }
            }
        }

        for role in self.reservoirs() {
            if role.is_persistent() && !written.contains(&role) {
                return Err(TopologyViolation::StaleHistory(role));
            }
        }

        Ok(())
    }
}

impl Default for Topology {
    fn default() -> Self {
        Self::combined()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TopologyViolation {
    NoStages,
    NoOutput,
    DuplicatedStage(&'static str),
    NoRays(&'static str),
    InvalidPayload(&'static str, u32),
    AliasedReservoir(&'static str, ReservoirRole),
    ReadBeforeWrite(&'static str, ReservoirRole),
    StaleHistory(ReservoirRole),
}

impl fmt::Display for TopologyViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoStages => write!(f, "topology has no stages"),
            Self::NoOutput => write!(f, "no stage writes the color output"),

            Self::DuplicatedStage(stage) => {
                write!(f, "stage `{stage}` is declared more than once")
            }

            Self::NoRays(stage) => {
                write!(f, "stage `{stage}` doesn't trace any rays")
            }

            Self::InvalidPayload(stage, size) => write!(
                f,
                "stage `{stage}` declares payload of {size} bytes (allowed: \
                 1..={MAX_PAYLOAD_BYTES})"
            ),

            Self::AliasedReservoir(stage, role) => write!(
                f,
                "stage `{stage}` binds `{}` more than once",
                role.binding()
            ),

            Self::ReadBeforeWrite(stage, role) => write!(
                f,
                "stage `{stage}` reads frame-local `{}` before any stage \
                 writes it",
                role.binding()
            ),

            Self::StaleHistory(role) => write!(
                f,
                "persistent `{}` is read but never written",
                role.binding()
            ),
        }
    }
}

impl std::error::Error for TopologyViolation {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets_are_valid() {
        for kind in [
            TopologyKind::Combined,
            TopologyKind::Split,
            TopologyKind::Single,
            TopologyKind::UpdateShade,
        ] {
            let topology = Topology::from_kind(kind);

            assert_eq!(kind, topology.kind());
            assert_eq!(Ok(()), topology.validate());
            assert_eq!(Some(kind), TopologyKind::parse(kind.name()));
        }
    }

    #[test]
    fn combined() {
        use ReservoirRole::*;

        let target = Topology::combined();
        let names: Vec<_> = target.stages().iter().map(|s| s.name).collect();

        assert_eq!(vec!["init_temporal", "spatial_finalize"], names);

        assert_eq!(
            vec![TemporalDi, TemporalGi, SpatialDi, SpatialGi],
            target.reservoirs()
        );

        assert_eq!(Some(0), target.first_user_of(SpatialGi));
        assert_eq!(None, target.first_user_of(ColorSpatial));
        assert!(target.reprojects());
    }

    #[test]
    fn single_has_no_reservoirs() {
        let target = Topology::single();

        assert!(target.reservoirs().is_empty());
        assert!(!target.reprojects());
        assert_eq!(72, target.stages()[0].max_payload_bytes);
    }

    #[test]
    fn update_shade_exposes_debug_outputs() {
        let target = Topology::update_shade();
        let outputs: Vec<_> = target.stages()[2].outputs().collect();

        assert_eq!(vec![OUTPUT_COLOR, RESERVOIR_PREVIOUS], outputs);

        let outputs: Vec<_> = target.stages()[1].outputs().collect();

        assert_eq!(vec![RESERVOIR_SPATIAL], outputs);
    }

    #[test]
    fn gathering_from_written_reservoir() {
        use ReservoirRole::*;

        let target = Topology {
            kind: TopologyKind::Custom,
            stages: vec![
                StageDescriptor::new("init", "init")
                    .rays([RayType::Shadow])
                    .access(Access::Write, [SpatialDi]),
                StageDescriptor::new("spatial", "spatial")
                    .rays([RayType::Shadow])
                    .access(Access::Gather, [SpatialDi])
                    .access(Access::Write, [SpatialDi])
                    .writing_output(),
            ],
        };

        assert_eq!(
            Err(TopologyViolation::AliasedReservoir("spatial", SpatialDi)),
            target.validate()
        );
    }

    #[test]
    fn reading_scratch_before_write() {
        use ReservoirRole::*;

        let target = Topology {
            kind: TopologyKind::Custom,
            stages: vec![StageDescriptor::new("spatial", "spatial")
                .rays([RayType::Shadow])
                .access(Access::Gather, [SpatialGi])
                .access(Access::Write, [TemporalGi])
                .writing_output()],
        };

        assert_eq!(
            Err(TopologyViolation::ReadBeforeWrite("spatial", SpatialGi)),
            target.validate()
        );
    }

    #[test]
    fn history_that_never_gets_refreshed() {
        use ReservoirRole::*;

        let target = Topology {
            kind: TopologyKind::Custom,
            stages: vec![StageDescriptor::new("temporal", "temporal")
                .rays([RayType::Shadow])
                .access(Access::Gather, [TemporalDi])
                .writing_output()],
        };

        assert_eq!(
            Err(TopologyViolation::StaleHistory(TemporalDi)),
            target.validate()
        );
    }

    #[test]
    #[should_panic(expected = "no stage writes the color output")]
    fn missing_output() {
        Topology::new(
            TopologyKind::Custom,
            vec![StageDescriptor::new("init", "init").rays([RayType::Shadow])],
        );
    }
}
