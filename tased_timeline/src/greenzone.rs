use std::{
    borrow::Cow,
    io::{Read, Write},
    ops::Range,
};

use tased_log::{
    pack, read_blob, read_tag, read_u32, unpack, write_len, write_tag, write_u32, LagLog,
    LagState, LogError, MarkerSet, Section, Tag,
};

use crate::{ExecutionEngine, GreenzoneSaveMode};

/// Section tag for the saved greenzone.
pub const GREENZONE_TAG: Tag = *b"GREENZON";

/// Saved greenzones claiming more frames than this are rejected on load.
pub const MAX_GREENZONE_FRAMES: u32 = 1 << 22;

#[derive(Debug, Clone)]
enum Checkpoint {
    Raw(Vec<u8>),
    Packed(Vec<u8>),
}

impl Checkpoint {
    fn state(&self) -> Result<Cow<'_, [u8]>, LogError> {
        match self {
            Checkpoint::Raw(state) => Ok(Cow::Borrowed(state)),
            Checkpoint::Packed(packed) => Ok(Cow::Owned(unpack(packed)?)),
        }
    }
}

/// Counts reported by [Greenzone::run_eviction].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EvictionStats {
    /// Checkpoints that were discarded.
    pub evicted: usize,
    /// Checkpoints that remain.
    pub retained: usize,
}

/// A sparse cache of machine states, one slot per frame, plus the live lag log.
///
/// Checkpoints exist only below [Greenzone::size]. Frame 0 is never evicted, only
/// invalidated.
#[derive(Debug, Clone, Default)]
pub struct Greenzone {
    checkpoints: Vec<Option<Checkpoint>>,
    size: u32,
    lag: LagLog,
}

impl Greenzone {
    /// An empty greenzone.
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every checkpoint and all lag information.
    pub fn reset(&mut self) {
        self.checkpoints.clear();
        self.size = 0;
        self.lag = LagLog::new();
    }

    /// One past the last explored frame.
    pub fn size(&self) -> u32 {
        self.size
    }

    /// The live lag log.
    pub fn lag(&self) -> &LagLog {
        &self.lag
    }

    /// Mutable access to the live lag log.
    pub fn lag_mut(&mut self) -> &mut LagLog {
        &mut self.lag
    }

    /// Record the observed lag flag for `frame`, returning the previous state.
    pub fn update_lag(&mut self, frame: u32, lagged: bool) -> LagState {
        let previous = self.lag.get(frame);
        self.lag.set(frame, LagState::from_lagged(lagged));
        previous
    }

    /// The number of frames that hold a checkpoint.
    pub fn checkpoint_count(&self) -> usize {
        self.checkpoints.iter().filter(|c| c.is_some()).count()
    }

    /// Returns true if `frame` has a checkpoint.
    pub fn has_checkpoint(&self, frame: u32) -> bool {
        matches!(self.checkpoints.get(frame as usize), Some(Some(_)))
    }

    /// The machine state saved at `frame`.
    pub fn checkpoint(&self, frame: u32) -> Result<Option<Cow<'_, [u8]>>, LogError> {
        match self.checkpoints.get(frame as usize) {
            Some(Some(checkpoint)) => Ok(Some(checkpoint.state()?)),
            _ => Ok(None),
        }
    }

    /// The latest frame at or before `frame` that has a checkpoint.
    pub fn nearest_checkpoint(&self, frame: u32) -> Option<u32> {
        let end = (frame as usize + 1).min(self.checkpoints.len());
        self.checkpoints[..end]
            .iter()
            .rposition(Option::is_some)
            .map(|frame| frame as u32)
    }

    /// Save the engine's state at `frame` unless a checkpoint already exists there.
    ///
    /// Returns true if a new checkpoint was stored.
    pub fn collect<E: ExecutionEngine + ?Sized>(&mut self, frame: u32, engine: &E) -> bool {
        self.size = self.size.max(frame.saturating_add(1));
        if self.has_checkpoint(frame) {
            return false;
        }
        self.store(frame, Checkpoint::Raw(engine.serialize_state()));
        true
    }

    /// Store a known machine state at `frame`, replacing any existing checkpoint.
    pub fn write_checkpoint(&mut self, frame: u32, state: Vec<u8>) {
        self.size = self.size.max(frame.saturating_add(1));
        self.store(frame, Checkpoint::Raw(state));
    }

    /// Discard the checkpoint at `frame`, if any.
    pub fn clear_checkpoint(&mut self, frame: u32) {
        if let Some(slot) = self.checkpoints.get_mut(frame as usize) {
            *slot = None;
        }
    }

    fn store(&mut self, frame: u32, checkpoint: Checkpoint) {
        let index = frame as usize;
        if self.checkpoints.len() <= index {
            self.checkpoints.resize(index + 1, None);
        }
        self.checkpoints[index] = Some(checkpoint);
    }

    fn try_store(&mut self, frame: u32, checkpoint: Checkpoint) -> Result<(), LogError> {
        let index = frame as usize;
        if self.checkpoints.len() <= index {
            self.checkpoints
                .try_reserve(index + 1 - self.checkpoints.len())
                .map_err(|_| LogError::InvalidData("greenzone too large to load"))?;
        }
        self.store(frame, checkpoint);
        Ok(())
    }

    /// Load the checkpoint at `frame` into the engine.
    ///
    /// Returns false if there is no checkpoint or the engine rejected it.
    pub fn restore<E: ExecutionEngine + ?Sized>(
        &self,
        frame: u32,
        engine: &mut E,
    ) -> Result<bool, LogError> {
        match self.checkpoint(frame)? {
            Some(state) => Ok(engine.restore_state(&state)),
            None => Ok(false),
        }
    }

    /// Discard every checkpoint after `frame` and shrink the explored range to end there.
    ///
    /// Returns true if anything changed.
    pub fn invalidate(&mut self, frame: u32) -> bool {
        let keep = frame as usize + 1;
        let mut changed = false;
        if self.checkpoints.len() > keep {
            self.checkpoints.truncate(keep);
            changed = true;
        }
        if self.size > frame.saturating_add(1) {
            self.size = frame.saturating_add(1);
            changed = true;
        }
        if changed {
            tracing::debug!("greenzone invalidated after frame {}", frame);
        }
        changed
    }

    /// Thin out checkpoints far behind `current`.
    ///
    /// Within `window` frames of `current` everything is kept. Further back, each band twice
    /// as wide as the previous one keeps a sparser subset: odd frames, then frames not
    /// divisible by 4, 8 and 16. Frames more than `16 * window` back are evicted, except
    /// frame 0.
    pub fn run_eviction(&mut self, current: u32, window: u32) -> EvictionStats {
        let window = u64::from(window.max(1));
        let mut stats = EvictionStats::default();
        for (frame, slot) in self.checkpoints.iter_mut().enumerate().skip(1) {
            if slot.is_none() {
                continue;
            }
            let frame = frame as u64;
            let distance = u64::from(current).saturating_sub(frame);
            let keep = if distance <= window {
                true
            } else if distance <= 2 * window {
                frame % 2 != 0
            } else if distance <= 4 * window {
                frame % 4 != 0
            } else if distance <= 8 * window {
                frame % 8 != 0
            } else if distance <= 16 * window {
                frame % 16 != 0
            } else {
                false
            };
            if keep {
                stats.retained += 1;
            } else {
                *slot = None;
                stats.evicted += 1;
            }
        }
        if self.has_checkpoint(0) {
            stats.retained += 1;
        }
        if stats.evicted > 0 {
            tracing::debug!(
                "greenzone eviction at frame {}: evicted {}, retained {}",
                current,
                stats.evicted,
                stats.retained
            );
        }
        stats
    }

    /// Compress one raw checkpoint outside `protected`, returning true if work was done.
    pub fn compress_idle(&mut self, protected: Range<u32>) -> Result<bool, LogError> {
        for (frame, slot) in self.checkpoints.iter_mut().enumerate() {
            if protected.contains(&(frame as u32)) {
                continue;
            }
            if let Some(Checkpoint::Raw(state)) = slot {
                *slot = Some(Checkpoint::Packed(pack(state)?));
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn is_saved(frame: u32, mode: GreenzoneSaveMode, markers: &MarkerSet) -> bool {
        match mode {
            GreenzoneSaveMode::All => true,
            GreenzoneSaveMode::EveryNth(interval) => interval <= 1 || frame % interval == 0,
            GreenzoneSaveMode::Marked => frame == 0 || markers.marker_at(frame) != 0,
            GreenzoneSaveMode::Nothing => false,
        }
    }

    /// Write the greenzone.
    ///
    /// The lag log and `playback_frame` are always written. Checkpoints are filtered by
    /// `mode`, and with [GreenzoneSaveMode::Nothing] the section is written as skipped.
    pub fn save<W: Write>(
        &self,
        writer: &mut W,
        mode: GreenzoneSaveMode,
        markers: &MarkerSet,
        playback_frame: u32,
    ) -> Result<(), LogError> {
        let present = mode != GreenzoneSaveMode::Nothing;
        write_tag(writer, GREENZONE_TAG, present)?;
        self.lag.save(writer)?;
        write_u32(writer, playback_frame)?;
        if !present {
            return Ok(());
        }

        let saved: Vec<(u32, &Checkpoint)> = self
            .checkpoints
            .iter()
            .enumerate()
            .filter_map(|(frame, slot)| Some((frame as u32, slot.as_ref()?)))
            .filter(|&(frame, _)| Self::is_saved(frame, mode, markers))
            .collect();
        write_u32(writer, self.size)?;
        write_len(writer, saved.len())?;
        for (frame, checkpoint) in saved {
            write_u32(writer, frame)?;
            match checkpoint {
                Checkpoint::Raw(state) => writer.write_all(&pack(state)?)?,
                Checkpoint::Packed(packed) => writer.write_all(packed)?,
            }
        }
        Ok(())
    }

    /// Read a greenzone written by [Greenzone::save], returning it with the saved playback
    /// frame.
    pub fn load<R: Read>(reader: &mut R) -> Result<(Self, u32), LogError> {
        let section = read_tag(reader, GREENZONE_TAG)?;
        let lag = LagLog::load(reader)?;
        let playback_frame = read_u32(reader)?;
        let mut greenzone = Self {
            lag,
            ..Self::default()
        };
        if section == Section::Skipped {
            return Ok((greenzone, playback_frame));
        }

        let size = read_u32(reader)?;
        if size > MAX_GREENZONE_FRAMES {
            return Err(LogError::InvalidData("greenzone size out of range"));
        }
        let count = read_u32(reader)?;
        let mut previous = None;
        for _ in 0..count {
            let frame = read_u32(reader)?;
            if frame >= size || previous.map_or(false, |previous| frame <= previous) {
                return Err(LogError::InvalidData("greenzone checkpoint out of order"));
            }
            let state = read_blob(reader)?;
            greenzone.try_store(frame, Checkpoint::Raw(state))?;
            previous = Some(frame);
        }
        greenzone.size = size;
        tracing::debug!(
            "loaded greenzone: size {}, {} checkpoints",
            size,
            greenzone.checkpoint_count()
        );
        Ok((greenzone, playback_frame))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use tased_log::FrameInput;

    #[derive(Debug, Default)]
    struct Counter {
        frame: u32,
    }

    impl ExecutionEngine for Counter {
        fn serialize_state(&self) -> Vec<u8> {
            self.frame.to_le_bytes().to_vec()
        }

        fn restore_state(&mut self, state: &[u8]) -> bool {
            match <[u8; 4]>::try_from(state) {
                Ok(bytes) => {
                    self.frame = u32::from_le_bytes(bytes);
                    true
                }
                Err(_) => false,
            }
        }

        fn run_frame(&mut self, _input: &FrameInput) -> bool {
            self.frame += 1;
            false
        }
    }

    fn filled(frames: u32) -> Greenzone {
        let mut engine = Counter::default();
        let mut greenzone = Greenzone::new();
        for frame in 0..frames {
            greenzone.collect(frame, &engine);
            engine.run_frame(&FrameInput::EMPTY);
        }
        greenzone
    }

    #[test]
    fn test_collect_and_restore() {
        let mut greenzone = filled(10);
        assert_eq!(greenzone.size(), 10);
        assert_eq!(greenzone.checkpoint_count(), 10);

        let mut engine = Counter { frame: 99 };
        assert!(!greenzone.collect(3, &engine));
        assert!(greenzone.restore(3, &mut engine).unwrap());
        assert_eq!(engine.frame, 3);
        assert!(!greenzone.restore(10, &mut engine).unwrap());
    }

    #[test]
    fn test_invalidate() {
        let mut greenzone = filled(100);
        assert!(greenzone.invalidate(20));
        assert_eq!(greenzone.size(), 21);
        assert!(greenzone.has_checkpoint(20));
        assert!(!greenzone.has_checkpoint(21));
        assert_eq!(greenzone.nearest_checkpoint(50), Some(20));
        assert!(!greenzone.invalidate(20));
        assert!(!greenzone.invalidate(500));
    }

    #[test]
    fn test_eviction_bands() {
        let mut greenzone = filled(1001);
        let stats = greenzone.run_eviction(1000, 100);
        assert!(stats.evicted > 0);
        assert!(greenzone.has_checkpoint(0));
        assert!(greenzone.has_checkpoint(900));
        assert!(greenzone.has_checkpoint(1000));
        assert!(!greenzone.has_checkpoint(850));
        assert!(greenzone.has_checkpoint(851));
        assert!(!greenzone.has_checkpoint(700));
        assert!(greenzone.has_checkpoint(702));
        assert!(!greenzone.has_checkpoint(400));
        assert!(greenzone.has_checkpoint(404));
        assert!(!greenzone.has_checkpoint(32));
        assert!(greenzone.has_checkpoint(33));
        assert_eq!(stats.retained, greenzone.checkpoint_count());
        assert_eq!(greenzone.nearest_checkpoint(850), Some(849));
    }

    #[test]
    fn test_eviction_far_behind() {
        let mut greenzone = filled(200);
        greenzone.run_eviction(10_000, 10);
        assert_eq!(greenzone.checkpoint_count(), 1);
        assert!(greenzone.has_checkpoint(0));
    }

    #[test]
    fn test_compress_idle() {
        let mut greenzone = filled(3);
        assert!(greenzone.compress_idle(1..3).unwrap());
        assert!(!greenzone.compress_idle(1..3).unwrap());
        let mut engine = Counter::default();
        assert!(greenzone.restore(0, &mut engine).unwrap());
        assert_eq!(engine.frame, 0);
        assert_eq!(greenzone.checkpoint(2).unwrap().as_deref(), Some(&[2, 0, 0, 0][..]));
    }

    #[test]
    fn test_save_load_modes() {
        let mut greenzone = filled(40);
        greenzone.update_lag(5, true);
        greenzone.compress_idle(0..0).unwrap();
        let mut markers = MarkerSet::new();
        markers.resize(40);
        markers.set_marker(7);

        let mut buf = Vec::new();
        greenzone
            .save(&mut buf, GreenzoneSaveMode::All, &markers, 12)
            .unwrap();
        let (loaded, playback) = Greenzone::load(&mut &buf[..]).unwrap();
        assert_eq!(playback, 12);
        assert_eq!(loaded.size(), 40);
        assert_eq!(loaded.checkpoint_count(), 40);
        assert_eq!(loaded.lag(), greenzone.lag());

        let mut buf = Vec::new();
        greenzone
            .save(&mut buf, GreenzoneSaveMode::EveryNth(16), &markers, 0)
            .unwrap();
        let (loaded, _) = Greenzone::load(&mut &buf[..]).unwrap();
        assert_eq!(loaded.checkpoint_count(), 3);
        assert!(loaded.has_checkpoint(32));

        let mut buf = Vec::new();
        greenzone
            .save(&mut buf, GreenzoneSaveMode::Marked, &markers, 0)
            .unwrap();
        let (loaded, _) = Greenzone::load(&mut &buf[..]).unwrap();
        assert_eq!(loaded.checkpoint_count(), 2);
        assert!(loaded.has_checkpoint(7));

        let mut buf = Vec::new();
        greenzone
            .save(&mut buf, GreenzoneSaveMode::Nothing, &markers, 3)
            .unwrap();
        let (loaded, playback) = Greenzone::load(&mut &buf[..]).unwrap();
        assert_eq!(playback, 3);
        assert_eq!(loaded.size(), 0);
        assert_eq!(loaded.lag().get(5), LagState::Lagged);
        assert!(Greenzone::load(&mut &buf[..buf.len() - 1]).is_err());
    }

    fn hostile_section(size: u32, frame: u32) -> Vec<u8> {
        let mut data = Vec::new();
        write_tag(&mut data, GREENZONE_TAG, true).unwrap();
        LagLog::new().save(&mut data).unwrap();
        write_u32(&mut data, 0).unwrap();
        write_u32(&mut data, size).unwrap();
        write_u32(&mut data, 1).unwrap();
        write_u32(&mut data, frame).unwrap();
        data.extend_from_slice(&pack(&[0; 4]).unwrap());
        data
    }

    #[test]
    fn test_load_rejects_oversized_greenzone() {
        let data = hostile_section(u32::MAX, 0xF000_0000);
        assert!(matches!(
            Greenzone::load(&mut &data[..]),
            Err(LogError::InvalidData(_))
        ));

        let data = hostile_section(MAX_GREENZONE_FRAMES + 1, 1);
        assert!(Greenzone::load(&mut &data[..]).is_err());

        let data = hostile_section(16, 0xF000_0000);
        assert!(Greenzone::load(&mut &data[..]).is_err());

        let data = hostile_section(16, 9);
        let (loaded, _) = Greenzone::load(&mut &data[..]).unwrap();
        assert_eq!(loaded.size(), 16);
        assert!(loaded.has_checkpoint(9));
    }

    #[test]
    fn test_invalidate_at_last_frame() {
        let mut greenzone = filled(10);
        assert!(!greenzone.invalidate(u32::MAX));
        assert_eq!(greenzone.size(), 10);
        assert!(!greenzone.collect(9, &Counter::default()));
        assert_eq!(greenzone.size(), 10);
    }
}
