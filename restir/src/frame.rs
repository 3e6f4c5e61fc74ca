use glam::Mat4;

use crate::gpu;

/// Persistent switches pushed into the kernels each frame.
///
/// Toggles never change the pipeline's topology - every stage is dispatched
/// regardless, kernels branch on the flags internally.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Toggles {
    pub temporal_reuse: bool,
    pub spatial_reuse: bool,
    pub direct_light: bool,
    pub indirect_light: bool,
}

impl Default for Toggles {
    fn default() -> Self {
        Self {
            temporal_reuse: true,
            spatial_reuse: true,
            direct_light: true,
            indirect_light: true,
        }
    }
}

/// One-shot request to discard the persisted reservoirs.
///
/// Goes `Idle -> Pending` when requested and back to `Idle` when a frame
/// consumes it; a frame consumes it no matter whether its dispatches succeed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ClearRequest {
    #[default]
    Idle,
    Pending,
}

impl ClearRequest {
    /// Arms the request; returns `false` if it was already pending.
    pub fn request(&mut self) -> bool {
        match self {
            Self::Idle => {
                *self = Self::Pending;
                true
            }
            Self::Pending => false,
        }
    }

    /// Consumes the request, returning whether it was pending.
    pub fn take(&mut self) -> bool {
        matches!(std::mem::take(self), Self::Pending)
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending)
    }
}

#[derive(Clone, Debug)]
pub struct FrameState {
    frame: gpu::Frame,
    clear: ClearRequest,
    lights_need_init: bool,
    toggles: Toggles,
}

impl FrameState {
    pub fn new(toggles: Toggles) -> Self {
        Self {
            frame: Default::default(),
            clear: Default::default(),
            lights_need_init: true,
            toggles,
        }
    }

    /// Restarts the frame sequence; called when a new scene gets bound.
    pub fn reset(&mut self) {
        self.frame = Default::default();
        self.lights_need_init = true;
    }

    pub fn request_clear(&mut self) {
        if self.clear.request() {
            self.lights_need_init = true;
        }
    }

    /// Starts a new frame, consuming the pending clear request (if any).
    pub fn begin(&mut self) -> FrameSnapshot {
        FrameSnapshot {
            frame: self.frame,
            clear_buffers: self.clear.take(),
            lights_need_init: self.lights_need_init,
            toggles: self.toggles,
        }
    }

    /// Completes the frame started with [`Self::begin()`].
    pub fn finish(&mut self) {
        self.frame = self.frame.next();
        self.lights_need_init = false;
    }

    pub fn frame(&self) -> gpu::Frame {
        self.frame
    }

    pub fn frame_count(&self) -> u32 {
        self.frame.get()
    }

    pub fn is_clear_pending(&self) -> bool {
        self.clear.is_pending()
    }

    pub fn lights_need_init(&self) -> bool {
        self.lights_need_init
    }

    pub fn toggles(&self) -> Toggles {
        self.toggles
    }

    pub fn toggles_mut(&mut self) -> &mut Toggles {
        &mut self.toggles
    }
}

/// State of a single frame in flight.
#[derive(Clone, Copy, Debug)]
pub struct FrameSnapshot {
    pub frame: gpu::Frame,
    pub clear_buffers: bool,
    pub lights_need_init: bool,
    pub toggles: Toggles,
}

impl FrameSnapshot {
    /// Marks persisted history as unusable for this frame, e.g. because the
    /// reservoirs have just been reallocated.
    pub fn invalidate_history(&mut self) {
        self.clear_buffers = true;
    }

    pub fn params(
        &self,
        prev_view: Mat4,
        seed: u32,
        max_bounces: u32,
    ) -> gpu::FrameParams {
        use gpu::FrameFlags as F;

        let flags = F::default()
            .with(F::TEMPORAL_REUSE, self.toggles.temporal_reuse)
            .with(F::SPATIAL_REUSE, self.toggles.spatial_reuse)
            .with(F::DIRECT_LIGHT, self.toggles.direct_light)
            .with(F::INDIRECT_LIGHT, self.toggles.indirect_light)
            .with(F::CLEAR_BUFFERS, self.clear_buffers)
            .with(F::INITIAL_SAMPLES, self.lights_need_init);

        gpu::FrameParams {
            prev_view,
            frame: self.frame,
            flags,
            seed,
            max_bounces,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clear_request() {
        let mut target = ClearRequest::default();

        assert!(!target.take());
        assert!(target.request());
        assert!(!target.request());
        assert!(target.is_pending());
        assert!(target.take());
        assert!(!target.is_pending());
        assert!(!target.take());
    }

    #[test]
    fn clear_is_consumed_by_exactly_one_frame() {
        let mut target = FrameState::new(Default::default());

        target.begin();
        target.finish();
        assert!(!target.lights_need_init());

        target.request_clear();
        assert!(target.is_clear_pending());
        assert!(target.lights_need_init());

        let frame = target.begin();

        assert!(frame.clear_buffers);
        assert!(frame.lights_need_init);
        assert!(!target.is_clear_pending());

        target.finish();

        let frame = target.begin();

        assert!(!frame.clear_buffers);
        assert!(!frame.lights_need_init);
    }

    #[test]
    fn frame_counting() {
        let mut target = FrameState::new(Default::default());

        for _ in 0..3 {
            target.begin();
            target.finish();
        }

        assert_eq!(3, target.frame_count());

        target.reset();

        assert_eq!(0, target.frame_count());
        assert!(target.lights_need_init());
    }

    #[test]
    fn params() {
        use gpu::FrameFlags as F;

        let mut target = FrameState::new(Toggles {
            spatial_reuse: false,
            ..Default::default()
        });

        let mut frame = target.begin();

        frame.invalidate_history();

        let params = frame.params(Mat4::IDENTITY, 1234, 3);

        assert!(params.has(F::TEMPORAL_REUSE));
        assert!(!params.has(F::SPATIAL_REUSE));
        assert!(params.has(F::CLEAR_BUFFERS));
        assert!(params.has(F::INITIAL_SAMPLES));
        assert_eq!(0, params.frame.get());
        assert_eq!(1234, params.seed);
        assert_eq!(3, params.max_bounces);
    }
}
