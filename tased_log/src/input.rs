use std::{
    io::{Read, Write},
    ops::RangeBounds,
};

use crate::{
    codec::{pack, read_blob, read_u32, read_u8, unpack, write_blob},
    diff::{first_difference, frame_bounds},
    FrameInput, InputSource, LogError, MAX_JOYSTICKS,
};

/// Number of buttons on a joystick.
pub const BUTTONS_PER_JOYSTICK: usize = 8;

/// The heat assigned to a button that was just toggled.
pub const MAX_HEAT: u8 = 15;

const HOT_BYTES_PER_JOYSTICK: usize = BUTTONS_PER_JOYSTICK / 2;

/// A frozen copy of the controller input for every frame.
///
/// The log may also carry a hot change map, which stores a 4 bit heat value per button per
/// frame. Even buttons use the low nibble and odd buttons the high nibble.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputLog {
    joysticks_per_frame: usize,
    joysticks: Vec<u8>,
    commands: Vec<u8>,
    hot_changes: Option<Vec<u8>>,
}

impl InputLog {
    /// Create an empty log.
    pub fn new(joysticks_per_frame: usize, hot_changes: bool) -> Self {
        Self {
            joysticks_per_frame: joysticks_per_frame.clamp(1, MAX_JOYSTICKS),
            joysticks: Vec::new(),
            commands: Vec::new(),
            hot_changes: if hot_changes { Some(Vec::new()) } else { None },
        }
    }

    /// Copy the current contents of `source`.
    ///
    /// If `hot_changes` is true, the log gets a hot change map with every heat set to zero.
    pub fn capture<S: InputSource + ?Sized>(source: &S, hot_changes: bool) -> Self {
        let mut log = Self::new(source.joysticks_per_frame(), hot_changes);
        log.resize(source.frame_count());
        for frame in 0..source.frame_count() {
            log.store(frame, &source.frame(frame));
        }
        log
    }

    /// The number of joysticks stored per frame.
    pub fn joysticks_per_frame(&self) -> usize {
        self.joysticks_per_frame
    }

    /// The number of frames.
    pub fn len(&self) -> u32 {
        self.commands.len() as u32
    }

    /// Returns true if the log has no frames.
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Returns true if the log carries a hot change map.
    pub fn has_hot_changes(&self) -> bool {
        self.hot_changes.is_some()
    }

    /// The buttons of a joystick on the given frame, or 0 if out of range.
    pub fn joystick(&self, frame: u32, joystick: usize) -> u8 {
        if joystick >= self.joysticks_per_frame {
            return 0;
        }
        self.joysticks
            .get(frame as usize * self.joysticks_per_frame + joystick)
            .copied()
            .unwrap_or(0)
    }

    /// The commands on the given frame, or 0 if out of range.
    pub fn commands(&self, frame: u32) -> u8 {
        self.commands.get(frame as usize).copied().unwrap_or(0)
    }

    /// The full input on the given frame.
    pub fn frame_input(&self, frame: u32) -> FrameInput {
        let mut input = FrameInput {
            commands: self.commands(frame),
            ..FrameInput::EMPTY
        };
        for joystick in 0..self.joysticks_per_frame {
            input.joysticks[joystick] = self.joystick(frame, joystick);
        }
        input
    }

    /// Overwrite one frame, leaving its hot changes untouched.
    ///
    /// Frames past the end are ignored.
    pub fn set_frame_input(&mut self, frame: u32, input: &FrameInput) {
        if frame < self.len() {
            self.store(frame, input);
        }
    }

    /// Grow with empty frames or shrink to `len` frames.
    pub fn resize(&mut self, len: u32) {
        let len = len as usize;
        self.joysticks.resize(len * self.joysticks_per_frame, 0);
        self.commands.resize(len, 0);
        let hot_len = len * self.hot_bytes_per_frame();
        if let Some(hot_changes) = &mut self.hot_changes {
            hot_changes.resize(hot_len, 0);
        }
    }

    fn store(&mut self, frame: u32, input: &FrameInput) {
        let base = frame as usize * self.joysticks_per_frame;
        self.joysticks[base..base + self.joysticks_per_frame]
            .copy_from_slice(&input.joysticks[..self.joysticks_per_frame]);
        self.commands[frame as usize] = input.commands;
    }

    fn masked(&self, input: FrameInput) -> FrameInput {
        let mut masked = input;
        for joystick in &mut masked.joysticks[self.joysticks_per_frame..] {
            *joystick = 0;
        }
        masked
    }

    /// Find the first frame in `range` where `self` and `other` disagree.
    pub fn find_first_difference(
        &self,
        other: &InputLog,
        range: impl RangeBounds<u32>,
    ) -> Option<u32> {
        first_difference(self.len(), other.len(), range, |frame| {
            self.frame_input(frame) != self.masked(other.frame_input(frame))
        })
    }

    /// Find the first frame in `range` where `self` and a live source disagree.
    pub fn find_first_difference_in<S: InputSource + ?Sized>(
        &self,
        source: &S,
        range: impl RangeBounds<u32>,
    ) -> Option<u32> {
        first_difference(self.len(), source.frame_count(), range, |frame| {
            self.frame_input(frame) != self.masked(source.frame(frame))
        })
    }

    /// Make `source` equal to this log, rewriting only frames at or after `from`.
    pub fn write_to<S: InputSource + ?Sized>(&self, source: &mut S, from: u32) {
        source.resize(self.len());
        for frame in from..self.len() {
            let input = self.frame_input(frame);
            if source.frame(frame) != input {
                source.set_frame(frame, input);
            }
        }
    }

    /// Replace `source` with the first `end` frames of this log.
    pub fn write_prefix_to<S: InputSource + ?Sized>(&self, source: &mut S, end: u32) {
        source.resize(end);
        for frame in 0..end {
            let input = self.frame_input(frame);
            if source.frame(frame) != input {
                source.set_frame(frame, input);
            }
        }
    }

    fn hot_bytes_per_frame(&self) -> usize {
        self.joysticks_per_frame * HOT_BYTES_PER_JOYSTICK
    }

    /// The heat of a button, or 0 if there is no hot change map.
    pub fn hot_change(&self, frame: u32, joystick: usize, button: usize) -> u8 {
        if joystick >= self.joysticks_per_frame || button >= BUTTONS_PER_JOYSTICK {
            return 0;
        }
        let index = frame as usize * self.hot_bytes_per_frame()
            + joystick * HOT_BYTES_PER_JOYSTICK
            + button / 2;
        let byte = match self.hot_changes.as_ref().and_then(|hot| hot.get(index)) {
            Some(&byte) => byte,
            None => return 0,
        };
        if button % 2 == 0 {
            byte & 0x0f
        } else {
            byte >> 4
        }
    }

    /// Reset every heat to zero, adding a map if there was none.
    pub fn init_hot_changes(&mut self) {
        self.hot_changes = Some(vec![0; self.len() as usize * self.hot_bytes_per_frame()]);
    }

    /// Copy the heat map from `source` without fading.
    pub fn copy_hot_changes(&mut self, source: &InputLog) {
        self.inherit_mapped(source, false, Some);
    }

    /// Copy the heat map from `source`, then cool every button by one step.
    pub fn inherit_hot_changes(&mut self, source: &InputLog) {
        self.inherit_mapped(source, true, Some);
    }

    /// Inherit heat from `source` across an insertion of `count` empty frames at `start`.
    pub fn inherit_hot_changes_insert_num(
        &mut self,
        source: &InputLog,
        start: u32,
        count: u32,
        fade: bool,
    ) {
        self.inherit_mapped(source, fade, |frame| {
            if frame < start {
                Some(frame)
            } else if frame - start < count {
                None
            } else {
                Some(frame - count)
            }
        });
    }

    /// Inherit heat from `source` across a deletion of `count` frames at `start`.
    pub fn inherit_hot_changes_delete_num(
        &mut self,
        source: &InputLog,
        start: u32,
        count: u32,
        fade: bool,
    ) {
        self.inherit_mapped(source, fade, |frame| {
            if frame < start {
                Some(frame)
            } else {
                frame.checked_add(count)
            }
        });
    }

    /// Inherit heat from `source` after the sorted frames in `inserted` were inserted.
    ///
    /// `inserted` holds frame numbers in this log. Pressed buttons on inserted frames are
    /// marked as fully hot.
    pub fn inherit_hot_changes_insert_selection(&mut self, source: &InputLog, inserted: &[u32]) {
        self.inherit_mapped(source, true, |frame| {
            match inserted.binary_search(&frame) {
                Ok(_) => None,
                Err(before) => Some(frame - before as u32),
            }
        });
        for &frame in inserted {
            for joystick in 0..self.joysticks_per_frame {
                let pressed = self.joystick(frame, joystick);
                self.heat_bits(frame, joystick, pressed);
            }
        }
    }

    /// Inherit heat from `source` after the sorted frames in `deleted` were removed.
    ///
    /// `deleted` holds frame numbers in `source`.
    pub fn inherit_hot_changes_delete_selection(&mut self, source: &InputLog, deleted: &[u32]) {
        let mut kept: Vec<u32> = Vec::new();
        let mut deleted_iter = deleted.iter().peekable();
        for frame in 0..source.len() {
            while deleted_iter.next_if(|&&deleted| deleted < frame).is_some() {}
            if deleted_iter.peek() == Some(&&frame) {
                continue;
            }
            kept.push(frame);
        }
        self.inherit_mapped(source, true, |frame| kept.get(frame as usize).copied());
    }

    /// Cool every button by one step.
    pub fn fade_hot_changes(&mut self) {
        if let Some(hot_changes) = &mut self.hot_changes {
            for byte in hot_changes.iter_mut() {
                let mut low = *byte & 0x0f;
                let mut high = *byte >> 4;
                low = low.saturating_sub(1);
                high = high.saturating_sub(1);
                *byte = (high << 4) | low;
            }
        }
    }

    /// Mark every button that differs from `other` within `range` as fully hot.
    pub fn fill_hot_changes(&mut self, other: &InputLog, range: impl RangeBounds<u32>) {
        if self.hot_changes.is_none() {
            return;
        }
        let (start, end) = frame_bounds(&range);
        for frame in start..end.min(self.len()) {
            for joystick in 0..self.joysticks_per_frame {
                let changed = self.joystick(frame, joystick) ^ other.joystick(frame, joystick);
                self.heat_bits(frame, joystick, changed);
            }
        }
    }

    /// Mark every button on `frame` that differs from `previous` as fully hot.
    pub fn mark_hot(&mut self, frame: u32, previous: &FrameInput) {
        for joystick in 0..self.joysticks_per_frame {
            let changed = self.joystick(frame, joystick) ^ previous.joysticks[joystick];
            self.heat_bits(frame, joystick, changed);
        }
    }

    fn heat_bits(&mut self, frame: u32, joystick: usize, bits: u8) {
        if bits == 0 {
            return;
        }
        let base = frame as usize * self.hot_bytes_per_frame() + joystick * HOT_BYTES_PER_JOYSTICK;
        let hot_changes = match &mut self.hot_changes {
            Some(hot_changes) => hot_changes,
            None => return,
        };
        for button in 0..BUTTONS_PER_JOYSTICK {
            if bits & (1 << button) == 0 {
                continue;
            }
            if let Some(byte) = hot_changes.get_mut(base + button / 2) {
                if button % 2 == 0 {
                    *byte = (*byte & 0xf0) | MAX_HEAT;
                } else {
                    *byte = (*byte & 0x0f) | (MAX_HEAT << 4);
                }
            }
        }
    }

    /// Rebuild the heat map, taking frame `f`'s heat from `source` frame `map(f)`.
    fn inherit_mapped(&mut self, source: &InputLog, fade: bool, map: impl Fn(u32) -> Option<u32>) {
        if self.hot_changes.is_none() {
            return;
        }
        let per_frame = self.hot_bytes_per_frame();
        let mut hot_changes = vec![0; self.len() as usize * per_frame];
        if let Some(source_hot) = &source.hot_changes {
            let source_per_frame = source.hot_bytes_per_frame();
            let copy_len = per_frame.min(source_per_frame);
            for frame in 0..self.len() {
                let source_frame = match map(frame) {
                    Some(source_frame) if source_frame < source.len() => source_frame as usize,
                    _ => continue,
                };
                let dst = frame as usize * per_frame;
                let src = source_frame * source_per_frame;
                hot_changes[dst..dst + copy_len]
                    .copy_from_slice(&source_hot[src..src + copy_len]);
            }
        }
        self.hot_changes = Some(hot_changes);
        if fade {
            self.fade_hot_changes();
        }
    }

    /// Encode the log without compression.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(
            6 + self.joysticks.len()
                + self.commands.len()
                + self.hot_changes.as_ref().map_or(0, Vec::len),
        );
        buf.push(self.joysticks_per_frame as u8);
        buf.push(u8::from(self.hot_changes.is_some()));
        buf.extend_from_slice(&self.len().to_le_bytes());
        buf.extend_from_slice(&self.joysticks);
        buf.extend_from_slice(&self.commands);
        if let Some(hot_changes) = &self.hot_changes {
            buf.extend_from_slice(hot_changes);
        }
        buf
    }

    /// Decode a log produced by [InputLog::encode].
    pub fn decode(mut data: &[u8]) -> Result<Self, LogError> {
        let reader = &mut data;
        let joysticks_per_frame = read_u8(reader)? as usize;
        if !(1..=MAX_JOYSTICKS).contains(&joysticks_per_frame) {
            return Err(LogError::InvalidData("bad joystick count"));
        }
        let has_hot_changes = match read_u8(reader)? {
            0 => false,
            1 => true,
            _ => return Err(LogError::InvalidData("bad hot change flag")),
        };
        let len = read_u32(reader)? as usize;
        let mut log = Self::new(joysticks_per_frame, has_hot_changes);
        let hot_len = len * log.hot_bytes_per_frame();
        let expected = len * joysticks_per_frame + len + if has_hot_changes { hot_len } else { 0 };
        if reader.len() != expected {
            return Err(LogError::SizeMismatch {
                expected,
                actual: reader.len(),
            });
        }
        let (joysticks, rest) = reader.split_at(len * joysticks_per_frame);
        let (commands, hot_changes) = rest.split_at(len);
        log.joysticks = joysticks.to_vec();
        log.commands = commands.to_vec();
        if has_hot_changes {
            log.hot_changes = Some(hot_changes.to_vec());
        }
        Ok(log)
    }

    /// Compress the log.
    pub fn compress(&self) -> Result<Vec<u8>, LogError> {
        pack(&self.encode())
    }

    /// Decompress a log produced by [InputLog::compress].
    pub fn decompress(packed: &[u8]) -> Result<Self, LogError> {
        Self::decode(&unpack(packed)?)
    }

    /// Write the log as a compressed blob.
    pub fn save<W: Write>(&self, writer: &mut W) -> Result<(), LogError> {
        write_blob(writer, &self.encode())
    }

    /// Read a log written by [InputLog::save].
    pub fn load<R: Read>(reader: &mut R) -> Result<Self, LogError> {
        Self::decode(&read_blob(reader)?)
    }
}
