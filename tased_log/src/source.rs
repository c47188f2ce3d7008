/// Maximum number of joysticks stored per frame.
pub const MAX_JOYSTICKS: usize = 4;

/// The controller state for a single frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct FrameInput {
    /// One button byte per joystick.
    pub joysticks: [u8; MAX_JOYSTICKS],
    /// Console commands (reset, power, etc).
    pub commands: u8,
}

impl FrameInput {
    /// An input with nothing pressed.
    pub const EMPTY: FrameInput = FrameInput {
        joysticks: [0; MAX_JOYSTICKS],
        commands: 0,
    };

    /// Create an input where joystick 0 holds `buttons`.
    pub fn single(buttons: u8) -> Self {
        let mut input = Self::EMPTY;
        input.joysticks[0] = buttons;
        input
    }

    /// A mask describing which parts of two inputs differ.
    ///
    /// Bit 0 is set if the commands differ, and bit `1 + i` if joystick `i` differs.
    pub fn difference_bits(&self, other: &FrameInput) -> u32 {
        let mut bits = u32::from(self.commands != other.commands);
        for (i, (a, b)) in self.joysticks.iter().zip(&other.joysticks).enumerate() {
            if a != b {
                bits |= 1 << (i + 1);
            }
        }
        bits
    }
}

/// The live input that the editor reads and rewrites.
///
/// Reads outside `0..frame_count()` return [FrameInput::EMPTY].
pub trait InputSource {
    /// The number of joysticks recorded per frame (at most [MAX_JOYSTICKS]).
    fn joysticks_per_frame(&self) -> usize;

    /// The number of frames.
    fn frame_count(&self) -> u32;

    /// The input on the given frame.
    fn frame(&self, frame: u32) -> FrameInput;

    /// Overwrite the input on the given frame.
    ///
    /// Frames past the end are ignored.
    fn set_frame(&mut self, frame: u32, input: FrameInput);

    /// Insert `count` empty frames before `at`, clamping `at` to the end.
    fn insert(&mut self, at: u32, count: u32);

    /// Remove up to `count` frames starting at `at`.
    fn erase(&mut self, at: u32, count: u32);

    /// Grow or shrink to exactly `len` frames.
    fn resize(&mut self, len: u32) {
        let count = self.frame_count();
        if len > count {
            self.insert(count, len - count);
        } else if len < count {
            self.erase(len, count - len);
        }
    }
}

/// A simple in-memory [InputSource].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Movie {
    joysticks_per_frame: usize,
    frames: Vec<FrameInput>,
}

impl Movie {
    /// Create an empty movie.
    pub fn new(joysticks_per_frame: usize) -> Self {
        Self {
            joysticks_per_frame: joysticks_per_frame.clamp(1, MAX_JOYSTICKS),
            frames: Vec::new(),
        }
    }

    /// Create a movie from a list of frames.
    pub fn from_frames(joysticks_per_frame: usize, frames: Vec<FrameInput>) -> Self {
        Self {
            frames,
            ..Self::new(joysticks_per_frame)
        }
    }

    /// The frames of the movie.
    pub fn frames(&self) -> &[FrameInput] {
        &self.frames
    }

    /// Append a frame.
    pub fn push(&mut self, input: FrameInput) {
        self.frames.push(input);
    }
}

impl InputSource for Movie {
    fn joysticks_per_frame(&self) -> usize {
        self.joysticks_per_frame
    }

    fn frame_count(&self) -> u32 {
        self.frames.len() as u32
    }

    fn frame(&self, frame: u32) -> FrameInput {
        self.frames
            .get(frame as usize)
            .copied()
            .unwrap_or(FrameInput::EMPTY)
    }

    fn set_frame(&mut self, frame: u32, input: FrameInput) {
        if let Some(slot) = self.frames.get_mut(frame as usize) {
            *slot = input;
        }
    }

    fn insert(&mut self, at: u32, count: u32) {
        let at = (at as usize).min(self.frames.len());
        self.frames.splice(
            at..at,
            std::iter::repeat(FrameInput::EMPTY).take(count as usize),
        );
    }

    fn erase(&mut self, at: u32, count: u32) {
        let len = self.frames.len();
        let start = (at as usize).min(len);
        let end = start.saturating_add(count as usize).min(len);
        self.frames.drain(start..end);
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_movie_edits_clamp() {
        let mut movie = Movie::from_frames(1, vec![FrameInput::single(1), FrameInput::single(2)]);
        movie.insert(100, 2);
        assert_eq!(movie.frame_count(), 4);
        movie.erase(3, 10);
        assert_eq!(movie.frame_count(), 3);
        movie.set_frame(50, FrameInput::single(9));
        assert_eq!(movie.frame(50), FrameInput::EMPTY);
        movie.resize(1);
        assert_eq!(movie.frames(), &[FrameInput::single(1)]);
    }

    #[test]
    fn test_difference_bits() {
        let mut a = FrameInput::single(1);
        let b = FrameInput::single(3);
        assert_eq!(a.difference_bits(&b), 0b10);
        a.commands = 1;
        a.joysticks[2] = 4;
        assert_eq!(a.difference_bits(&b), 0b1011);
    }
}
