use log::debug;

use crate::gpu::{self, BindingTableHeader, HitGroupEntry};
use crate::{Defines, GeometryId, GeometryType, Scene, StageDescriptor};

/// Pair of shaders invoked when a ray hits a geometry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HitGroupDesc {
    pub closest_hit: Option<&'static str>,
    pub any_hit: &'static str,
}

/// Everything the dispatch engine needs to compile a ray-tracing program.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProgramDesc {
    pub label: String,
    pub shader_modules: Vec<String>,
    pub library: &'static str,
    pub ray_gen: &'static str,
    pub misses: Vec<&'static str>,
    pub hit_groups: Vec<HitGroupDesc>,
    pub max_payload_bytes: u32,
    pub max_recursion_depth: u32,
    pub max_attribute_bytes: u32,
}

impl ProgramDesc {
    /// Returns all entry points in a stable order: ray-gen, misses and then
    /// hit groups (closest-hit before any-hit).
    pub fn entry_points(&self) -> Vec<&'static str> {
        let mut entries = vec![self.ray_gen];

        entries.extend(self.misses.iter().copied());

        for group in &self.hit_groups {
            entries.extend(group.closest_hit);
            entries.push(group.any_hit);
        }

        entries
    }

    fn entry_point_idx(&self, name: &str) -> u32 {
        self.entry_points()
            .iter()
            .position(|entry| *entry == name)
            .unwrap_or_else(|| panic!("Unknown entry point: {name}"))
            as u32
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TableShape {
    pub miss_count: u32,
    pub hit_group_count: u32,
    pub geometry_count: u32,
}

/// Maps (ray type, geometry) pairs into hit groups and ray types into miss
/// shaders.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BindingTable {
    misses: Vec<Option<usize>>,
    hit_groups: Vec<Vec<Option<usize>>>,
    geometry_count: u32,
}

impl BindingTable {
    pub fn new(
        miss_count: u32,
        hit_group_count: u32,
        geometry_count: u32,
    ) -> Self {
        Self {
            misses: vec![None; miss_count as usize],
            hit_groups: vec![
                vec![None; geometry_count as usize];
                hit_group_count as usize
            ],
            geometry_count,
        }
    }

    pub fn shape(&self) -> TableShape {
        TableShape {
            miss_count: self.misses.len() as u32,
            hit_group_count: self.hit_groups.len() as u32,
            geometry_count: self.geometry_count,
        }
    }

    /// Routes rays of given type that hit nothing into given miss shader
    /// (index into [`ProgramDesc::misses`]).
    pub fn set_miss(&mut self, ray_type: usize, miss: usize) {
        self.misses[ray_type] = Some(miss);
    }

    /// Routes rays of given type that hit any of given geometries into given
    /// hit group (index into [`ProgramDesc::hit_groups`]).
    pub fn set_hit_group(
        &mut self,
        ray_type: usize,
        geometries: &[GeometryId],
        hit_group: usize,
    ) {
        for geometry in geometries {
            assert!(
                geometry.get() < self.geometry_count,
                "Geometry {geometry:?} is out of range (scene has {} \
                 geometries)",
                self.geometry_count
            );

            self.hit_groups[ray_type][geometry.get() as usize] =
                Some(hit_group);
        }
    }

    pub fn miss(&self, ray_type: usize) -> Option<usize> {
        self.misses.get(ray_type).copied().flatten()
    }

    pub fn hit_group(
        &self,
        ray_type: usize,
        geometry: GeometryId,
    ) -> Option<usize> {
        self.hit_groups
            .get(ray_type)?
            .get(geometry.get() as usize)
            .copied()
            .flatten()
    }

    /// Flattens the table into words a kernel can index into; see
    /// [`BindingTableHeader`] for the layout.
    ///
    /// Entries point into [`ProgramDesc::entry_points()`]; unassigned slots
    /// contain [`gpu::NO_ENTRY`].
    pub fn serialize(&self, desc: &ProgramDesc) -> Vec<u32> {
        let shape = self.shape();

        let header = BindingTableHeader {
            ray_gen: desc.entry_point_idx(desc.ray_gen),
            miss_count: shape.miss_count,
            hit_group_count: shape.hit_group_count,
            geometry_count: shape.geometry_count,
        };

        let mut out = bytemuck::cast::<_, [u32; 4]>(header).to_vec();

        for miss in &self.misses {
            out.push(match miss {
                Some(miss) => desc.entry_point_idx(desc.misses[*miss]),
                None => gpu::NO_ENTRY,
            });
        }

        for row in &self.hit_groups {
            for hit_group in row {
                let entry = match hit_group {
                    Some(hit_group) => {
                        let hit_group = desc.hit_groups[*hit_group];

                        HitGroupEntry {
                            closest_hit: hit_group
                                .closest_hit
                                .map(|name| desc.entry_point_idx(name))
                                .unwrap_or(gpu::NO_ENTRY),
                            any_hit: desc.entry_point_idx(hit_group.any_hit),
                        }
                    }

                    None => HitGroupEntry {
                        closest_hit: gpu::NO_ENTRY,
                        any_hit: gpu::NO_ENTRY,
                    },
                };

                out.extend(bytemuck::cast::<_, [u32; 2]>(entry));
            }
        }

        out
    }
}

/// Program description + binding table of a single stage, specialized for a
/// particular scene.
#[derive(Clone, Debug)]
pub struct StageProgram {
    desc: ProgramDesc,
    table: BindingTable,
    defines: Defines,
}

impl StageProgram {
    /// Builds program for given stage, binding one hit group per ray type
    /// to every geometry of the scene.
    ///
    /// Panics if the scene contains geometry the stage has no shaders for.
    pub fn build(stage: &StageDescriptor, scene: &dyn Scene) -> Self {
        let geometry_count = scene.geometry_count();
        let ray_count = stage.rays.len() as u32;

        debug!(
            "Building program: {} (rays={}, geometries={geometry_count})",
            stage.name, ray_count
        );

        let desc = ProgramDesc {
            label: format!("restir_{}", stage.name),
            shader_modules: scene.shader_modules(),
            library: stage.library,
            ray_gen: stage.ray_gen,
            misses: stage.rays.iter().map(|ray| ray.miss()).collect(),
            hit_groups: stage
                .rays
                .iter()
                .map(|ray| HitGroupDesc {
                    closest_hit: ray.closest_hit(),
                    any_hit: ray.any_hit(),
                })
                .collect(),
            max_payload_bytes: stage.max_payload_bytes,
            max_recursion_depth: stage.max_recursion_depth,
            max_attribute_bytes: scene.max_attribute_size(),
        };

        let mut table = BindingTable::new(ray_count, ray_count, geometry_count);

        for ray_type in 0..stage.rays.len() {
            table.set_miss(ray_type, ray_type);
        }

        for ty in GeometryType::ALL {
            let geometries = scene.geometry_ids(ty);

            if geometries.is_empty() {
                continue;
            }

            assert!(
                stage.geometry_types.contains(&ty),
                "Stage `{}` doesn't support {ty:?} geometry",
                stage.name
            );

            for ray_type in 0..stage.rays.len() {
                table.set_hit_group(ray_type, &geometries, ray_type);
            }
        }

        Self {
            desc,
            table,
            defines: Default::default(),
        }
    }

    pub fn desc(&self) -> &ProgramDesc {
        &self.desc
    }

    pub fn table(&self) -> &BindingTable {
        &self.table
    }

    pub fn defines(&self) -> &Defines {
        &self.defines
    }

    /// Replaces the program's defines, returning whether they've changed.
    pub fn set_defines(&mut self, defines: Defines) -> bool {
        if self.defines == defines {
            false
        } else {
            self.defines = defines;
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::MockScene;
    use crate::{RayType, Topology};

    fn ids(ids: &[u32]) -> Vec<GeometryId> {
        ids.iter().copied().map(GeometryId::new).collect()
    }

    #[test]
    fn combined_shapes() {
        let scene = MockScene::triangles(3);
        let topology = Topology::combined();

        let shapes: Vec<_> = topology
            .stages()
            .iter()
            .map(|stage| StageProgram::build(stage, &scene).table().shape())
            .collect();

        assert_eq!(
            vec![
                TableShape {
                    miss_count: 2,
                    hit_group_count: 2,
                    geometry_count: 3,
                },
                TableShape {
                    miss_count: 1,
                    hit_group_count: 1,
                    geometry_count: 3,
                },
            ],
            shapes
        );
    }

    #[test]
    fn init_temporal_entries() {
        let scene = MockScene::triangles(2);
        let topology = Topology::combined();
        let target = StageProgram::build(&topology.stages()[0], &scene);
        let desc = target.desc();

        assert_eq!("ray_gen", desc.ray_gen);
        assert_eq!(vec!["shadow_miss", "indirect_miss"], desc.misses);

        assert_eq!(
            vec![
                HitGroupDesc {
                    closest_hit: None,
                    any_hit: "shadow_any_hit",
                },
                HitGroupDesc {
                    closest_hit: Some("indirect_closest_hit"),
                    any_hit: "indirect_any_hit",
                },
            ],
            desc.hit_groups
        );

        assert_eq!(96, desc.max_payload_bytes);
        assert_eq!(2, desc.max_recursion_depth);
        assert_eq!(8, desc.max_attribute_bytes);
        assert_eq!(vec!["scene"], desc.shader_modules);

        assert_eq!(Some(0), target.table().miss(0));
        assert_eq!(Some(1), target.table().miss(1));

        for geometry in ids(&[0, 1]) {
            assert_eq!(Some(0), target.table().hit_group(0, geometry));
            assert_eq!(Some(1), target.table().hit_group(1, geometry));
        }
    }

    #[test]
    fn only_listed_geometries_get_hit_groups() {
        let mut table = BindingTable::new(1, 1, 4);

        table.set_hit_group(0, &ids(&[1, 3]), 0);

        assert_eq!(None, table.hit_group(0, GeometryId::new(0)));
        assert_eq!(Some(0), table.hit_group(0, GeometryId::new(1)));
        assert_eq!(None, table.hit_group(0, GeometryId::new(2)));
        assert_eq!(Some(0), table.hit_group(0, GeometryId::new(3)));
        assert_eq!(None, table.hit_group(1, GeometryId::new(0)));
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn geometry_out_of_range() {
        BindingTable::new(1, 1, 2).set_hit_group(0, &ids(&[2]), 0);
    }

    #[test]
    #[should_panic(expected = "doesn't support Curve geometry")]
    fn unsupported_geometry() {
        let mut scene = MockScene::triangles(1);

        scene.curves = ids(&[1]);
        scene.geometry_count = 2;

        StageProgram::build(&Topology::combined().stages()[1], &scene);
    }

    #[test]
    fn serialize() {
        let scene = MockScene::triangles(2);
        let topology = Topology::combined();
        let target = StageProgram::build(&topology.stages()[0], &scene);

        // Entry points: ray_gen, shadow_miss, indirect_miss, shadow_any_hit,
        // indirect_closest_hit, indirect_any_hit
        let actual = target.table().serialize(target.desc());

        #[rustfmt::skip]
        let expected = vec![
            0, 2, 2, 2,
            1, 2,
            gpu::NO_ENTRY, 3, gpu::NO_ENTRY, 3,
            4, 5, 4, 5,
        ];

        assert_eq!(expected, actual);
    }

    #[test]
    fn defines_change_detection() {
        let scene = MockScene::triangles(1);

        let stage = StageDescriptor::new("test", "test")
            .rays([RayType::Shadow])
            .writing_output();

        let mut target = StageProgram::build(&stage, &scene);
        let mut defines = Defines::default();

        defines.set("MAX_BOUNCES", 3);

        assert!(target.set_defines(defines.clone()));
        assert!(!target.set_defines(defines.clone()));

        defines.set("MAX_BOUNCES", 4);

        assert!(target.set_defines(defines));
        assert_eq!(Some("4"), target.defines().get("MAX_BOUNCES"));
    }
}
