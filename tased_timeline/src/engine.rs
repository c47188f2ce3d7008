use tased_log::FrameInput;

/// The deterministic machine that the timeline drives.
///
/// Implementations must be deterministic: restoring a state and running the same inputs
/// must always produce the same states and lag flags.
pub trait ExecutionEngine {
    /// Serialize the current machine state.
    fn serialize_state(&self) -> Vec<u8>;

    /// Load a state produced by [ExecutionEngine::serialize_state].
    ///
    /// Returns false if the state could not be loaded, in which case the machine is left in
    /// an unspecified but valid state.
    fn restore_state(&mut self, state: &[u8]) -> bool;

    /// Execute one frame with the given input.
    ///
    /// Returns true if the machine lagged, i.e. did not poll input during the frame.
    fn run_frame(&mut self, input: &FrameInput) -> bool;

    /// A small preview image of the current frame, stored alongside branches.
    fn thumbnail(&self) -> Vec<u8> {
        Vec::new()
    }
}

/// Receives notifications when cached frames are discarded.
pub trait TimelineObserver {
    /// Every checkpoint after `frame` was invalidated.
    fn invalidated(&mut self, frame: u32);
}

impl TimelineObserver for () {
    fn invalidated(&mut self, _frame: u32) {}
}

/// The frames whose checkpoints must be discarded after an edit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[must_use]
pub enum Invalidation {
    /// Discard checkpoints strictly after the given frame.
    After(u32),
    /// Nothing needs to be discarded.
    None,
}

impl Invalidation {
    /// Build from an optional first difference frame.
    pub fn from_first_difference(frame: Option<u32>) -> Self {
        match frame {
            Some(frame) => Self::After(frame),
            None => Self::None,
        }
    }

    /// Set `self` to None.
    pub fn clear(&mut self) {
        *self = Invalidation::None;
    }

    /// Include everything after `frame`.
    pub fn include(&mut self, frame: u32) {
        match self {
            Self::After(prev_frame) => *prev_frame = frame.min(*prev_frame),
            Self::None => *self = Self::After(frame),
        }
    }

    /// The union of two invalidations.
    pub fn union(mut self, other: Self) -> Self {
        if let Self::After(frame) = other {
            self.include(frame);
        }
        self
    }

    /// The earliest frame whose successors are invalidated.
    pub fn frame(self) -> Option<u32> {
        match self {
            Self::After(frame) => Some(frame),
            Self::None => None,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_union_keeps_earliest() {
        let a = Invalidation::After(30);
        assert_eq!(a.union(Invalidation::After(10)), Invalidation::After(10));
        assert_eq!(a.union(Invalidation::None), a);
        assert_eq!(Invalidation::None.union(a), a);
        let mut b = Invalidation::from_first_difference(None);
        b.include(5);
        assert_eq!(b.frame(), Some(5));
        b.clear();
        assert_eq!(b, Invalidation::None);
    }
}
