use std::{
    io::{Read, Write},
    ops::RangeBounds,
};

use crate::{
    codec::{pack, read_blob, unpack, write_blob},
    diff::first_difference,
    LogError,
};

/// Whether the machine polled input on a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LagState {
    /// The frame has not been executed since the last relevant edit.
    #[default]
    Unknown,
    /// The machine did not read input on this frame.
    Lagged,
    /// The machine read input on this frame.
    NotLagged,
}

impl LagState {
    fn to_byte(self) -> u8 {
        match self {
            LagState::NotLagged => 0,
            LagState::Lagged => 1,
            LagState::Unknown => 2,
        }
    }

    fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(LagState::NotLagged),
            1 => Some(LagState::Lagged),
            2 => Some(LagState::Unknown),
            _ => None,
        }
    }

    /// Convert an observed lag flag.
    pub fn from_lagged(lagged: bool) -> Self {
        if lagged {
            LagState::Lagged
        } else {
            LagState::NotLagged
        }
    }
}

/// The lag classification of every executed frame.
///
/// The log is extended lazily, so its length is unrelated to the movie length. Frames past
/// the end read as [LagState::Unknown].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LagLog {
    states: Vec<LagState>,
}

impl LagLog {
    /// Create an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// The number of stored frames.
    pub fn len(&self) -> u32 {
        self.states.len() as u32
    }

    /// Returns true if no frames are stored.
    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// The lag state of a frame.
    pub fn get(&self, frame: u32) -> LagState {
        self.states
            .get(frame as usize)
            .copied()
            .unwrap_or(LagState::Unknown)
    }

    /// Record the lag state of a frame, growing the log with unknown frames if needed.
    pub fn set(&mut self, frame: u32, state: LagState) {
        let index = frame as usize;
        if index >= self.states.len() {
            self.states.resize(index + 1, LagState::Unknown);
        }
        self.states[index] = state;
    }

    /// Insert `count` frames with the given state before `at`.
    ///
    /// Nothing is inserted past the end of the log.
    pub fn insert_frames(&mut self, at: u32, state: LagState, count: u32) {
        let at = at as usize;
        if at <= self.states.len() {
            self.states
                .splice(at..at, std::iter::repeat(state).take(count as usize));
        }
    }

    /// Remove up to `count` frames starting at `at`.
    pub fn erase_frames(&mut self, at: u32, count: u32) {
        let len = self.states.len();
        let start = (at as usize).min(len);
        let end = start.saturating_add(count as usize).min(len);
        self.states.drain(start..end);
    }

    /// Forget every frame at or after `frame`.
    pub fn invalidate_from(&mut self, frame: u32) {
        self.states.truncate(frame as usize);
    }

    /// Find the first frame in `range` where the two logs disagree, counting a length
    /// mismatch as a difference.
    pub fn find_first_difference(
        &self,
        other: &LagLog,
        range: impl RangeBounds<u32>,
    ) -> Option<u32> {
        first_difference(self.len(), other.len(), range, |frame| {
            self.get(frame) != other.get(frame)
        })
    }

    /// Find the first frame where one log says lagged and the other says not lagged.
    ///
    /// Unknown frames and extra length never conflict, so a log that only adds knowledge
    /// to another has no conflict with it.
    pub fn find_first_conflict(&self, other: &LagLog) -> Option<u32> {
        self.states
            .iter()
            .zip(&other.states)
            .position(|(&a, &b)| a != b && a != LagState::Unknown && b != LagState::Unknown)
            .map(|frame| frame as u32)
    }

    /// Encode the log without compression.
    pub fn encode(&self) -> Vec<u8> {
        self.states.iter().map(|state| state.to_byte()).collect()
    }

    /// Decode a log produced by [LagLog::encode].
    pub fn decode(data: &[u8]) -> Result<Self, LogError> {
        let states = data
            .iter()
            .map(|&byte| LagState::from_byte(byte))
            .collect::<Option<Vec<_>>>()
            .ok_or(LogError::InvalidData("bad lag state"))?;
        Ok(Self { states })
    }

    /// Compress the log.
    pub fn compress(&self) -> Result<Vec<u8>, LogError> {
        pack(&self.encode())
    }

    /// Decompress a log produced by [LagLog::compress].
    pub fn decompress(packed: &[u8]) -> Result<Self, LogError> {
        Self::decode(&unpack(packed)?)
    }

    /// Write the log as a compressed blob.
    pub fn save<W: Write>(&self, writer: &mut W) -> Result<(), LogError> {
        write_blob(writer, &self.encode())
    }

    /// Read a log written by [LagLog::save].
    pub fn load<R: Read>(reader: &mut R) -> Result<Self, LogError> {
        Self::decode(&read_blob(reader)?)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn log(states: &[LagState]) -> LagLog {
        let mut log = LagLog::new();
        for (frame, &state) in states.iter().enumerate() {
            log.set(frame as u32, state);
        }
        log
    }

    use LagState::{Lagged as Y, NotLagged as N, Unknown as U};

    #[test]
    fn test_unknown_past_end() {
        let mut lag = log(&[N, Y]);
        assert_eq!(lag.get(10), U);
        lag.set(5, Y);
        assert_eq!(lag.len(), 6);
        assert_eq!(lag.get(3), U);
    }

    #[test]
    fn test_difference_vs_conflict() {
        let short = log(&[N, N, Y]);
        let long = log(&[N, N, Y, N, N]);
        assert_eq!(short.find_first_difference(&long, ..), Some(3));
        assert_eq!(short.find_first_conflict(&long), None);

        let other = log(&[N, U, N, N]);
        assert_eq!(short.find_first_difference(&other, ..), Some(1));
        assert_eq!(short.find_first_conflict(&other), Some(2));
    }

    #[test]
    fn test_insert_and_erase() {
        let mut lag = log(&[N, N, N]);
        lag.insert_frames(1, Y, 2);
        assert_eq!(lag, log(&[N, Y, Y, N, N]));
        lag.insert_frames(10, Y, 1);
        assert_eq!(lag.len(), 5);
        lag.erase_frames(1, 2);
        assert_eq!(lag, log(&[N, N, N]));
        lag.invalidate_from(1);
        assert_eq!(lag, log(&[N]));
    }

    #[test]
    fn test_decode_rejects_bad_state() {
        assert!(LagLog::decode(&[0, 1, 7]).is_err());
    }
}
