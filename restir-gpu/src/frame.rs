use bytemuck::{Pod, Zeroable};

#[repr(C)]
#[derive(
    Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Pod, Zeroable,
)]
#[cfg_attr(not(target_arch = "spirv"), derive(Debug))]
pub struct Frame(u32);

impl Frame {
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn get(self) -> u32 {
        self.0
    }

    /// Returns whether this is the first frame rendered since the scene got
    /// bound, i.e. whether there's no history at all to reuse.
    pub fn is_first(self) -> bool {
        self.0 == 0
    }

    pub fn next(self) -> Self {
        Self(self.0.wrapping_add(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next() {
        let frame = Frame::default();

        assert!(frame.is_first());
        assert!(!frame.next().is_first());
        assert_eq!(2, frame.next().next().get());
        assert_eq!(0, Frame::new(u32::MAX).next().get());
    }
}
