use bytemuck::{Pod, Zeroable};

/// Leading record of a serialized binding table.
///
/// Followed by `miss_count` miss entries (one `u32` each) and then by
/// `hit_group_count * geometry_count` [`HitGroupEntry`]s, laid out
/// ray-type-major: the entry for ray type `r` hitting geometry `g` lives at
/// index `r * geometry_count + g`.
#[repr(C)]
#[derive(Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
#[cfg_attr(not(target_arch = "spirv"), derive(Debug))]
pub struct BindingTableHeader {
    pub ray_gen: u32,
    pub miss_count: u32,
    pub hit_group_count: u32,
    pub geometry_count: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
#[cfg_attr(not(target_arch = "spirv"), derive(Debug))]
pub struct HitGroupEntry {
    /// Index of the closest-hit entry point or [`crate::NO_ENTRY`].
    pub closest_hit: u32,
    pub any_hit: u32,
}

impl HitGroupEntry {
    pub fn has_closest_hit(&self) -> bool {
        self.closest_hit != crate::NO_ENTRY
    }
}

impl BindingTableHeader {
    /// Returns the position of the hit-group entry for given ray type and
    /// geometry, relative to the first hit-group entry.
    pub fn hit_group_idx(&self, ray_type: u32, geometry: u32) -> u32 {
        ray_type * self.geometry_count + geometry
    }
}
