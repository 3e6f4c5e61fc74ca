use std::fmt;

use crate::Defines;

/// Kind of geometry a scene is made of; each kind needs its own hit shaders.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum GeometryType {
    TriangleMesh,
    DisplacedTriangleMesh,
    Curve,
    SdfGrid,
    Custom,
}

impl GeometryType {
    pub const ALL: [Self; 5] = [
        Self::TriangleMesh,
        Self::DisplacedTriangleMesh,
        Self::Curve,
        Self::SdfGrid,
        Self::Custom,
    ];
}

/// Index of a geometry within the scene; it's also the column of the binding
/// table that routes rays hitting this geometry.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GeometryId(u32);

impl GeometryId {
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Debug for GeometryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "g{}", self.0)
    }
}

/// Which kinds of lights are present in the scene; drives shader
/// specialization.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LightingConfig {
    pub analytic_lights: bool,
    pub emissive_lights: bool,
    pub env_light: bool,
    pub env_background: bool,
}

impl LightingConfig {
    pub fn defines(&self) -> Defines {
        let mut defines = Defines::default();

        defines
            .set_flag("USE_ANALYTIC_LIGHTS", self.analytic_lights)
            .set_flag("USE_EMISSIVE_LIGHTS", self.emissive_lights)
            .set_flag("USE_ENV_LIGHT", self.env_light)
            .set_flag("USE_ENV_BACKGROUND", self.env_background);

        defines
    }
}

/// Scene the pipeline renders.
///
/// The pipeline only queries the scene - geometry, lights and materials are
/// owned and uploaded by whoever implements this trait.
pub trait Scene {
    /// Returns total number of geometries, i.e. the number of binding table
    /// columns.
    fn geometry_count(&self) -> u32;

    /// Returns identifiers of all geometries of given type.
    fn geometry_ids(&self, ty: GeometryType) -> Vec<GeometryId>;

    fn lighting(&self) -> LightingConfig;

    /// Makes sure the emissive-light collection is built and up to date;
    /// called before each frame that uses emissive lights.
    fn update_light_collection(&self);

    /// Returns names of the shader modules every stage program must be
    /// compiled with (materials, geometry fetching etc.).
    fn shader_modules(&self) -> Vec<String>;

    fn defines(&self) -> Defines;

    /// Returns the maximum size of the hit attributes any geometry reports.
    fn max_attribute_size(&self) -> u32;
}
