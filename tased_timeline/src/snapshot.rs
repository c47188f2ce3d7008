use std::io::{Read, Write};

use tased_log::{
    read_bytes, read_opt_u32, read_str, read_u32, read_u8, write_bytes, write_opt_u32, write_str,
    write_u32, write_u8, InputLog, InputSource, LagLog, LogError, MarkerSet,
};

use crate::ModificationKind;

/// Maximum length of a snapshot description, in bytes.
pub const MAX_DESCRIPTION_LEN: usize = 100;

/// One undo unit: a full copy of the input, lag and marker logs plus edit metadata.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub(crate) input: InputLog,
    pub(crate) lag: LagLog,
    pub(crate) markers: MarkerSet,
    pub(crate) key_frame: u32,
    pub(crate) start_frame: u32,
    pub(crate) end_frame: Option<u32>,
    pub(crate) kind: ModificationKind,
    pub(crate) tag: Option<u32>,
    pub(crate) recorded_joypads: u32,
    pub(crate) comment: Option<String>,
    pub(crate) description: String,
    pub(crate) timestamp: String,
    // Encoded copy of the logs for saving. The raw logs stay live for undo and redo.
    packed: Option<Vec<u8>>,
}

fn clip(mut text: String, max_len: usize) -> String {
    if text.len() > max_len {
        let mut end = max_len;
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        text.truncate(end);
    }
    text
}

impl Snapshot {
    /// Copy the live logs into a new snapshot.
    pub fn capture<S: InputSource + ?Sized>(
        input: &S,
        lag: &LagLog,
        markers: &MarkerSet,
        hot_changes: bool,
    ) -> Self {
        Self::from_logs(
            InputLog::capture(input, hot_changes),
            lag.clone(),
            markers.clone(),
        )
    }

    /// Build a snapshot from logs that were already copied.
    pub fn from_logs(input: InputLog, lag: LagLog, markers: MarkerSet) -> Self {
        let mut snapshot = Self {
            input,
            lag,
            markers,
            key_frame: 0,
            start_frame: 0,
            end_frame: None,
            kind: ModificationKind::Init,
            tag: None,
            recorded_joypads: 0,
            comment: None,
            description: String::new(),
            timestamp: chrono::Local::now().format("%H:%M:%S").to_string(),
            packed: None,
        };
        snapshot.describe();
        snapshot
    }

    /// Overwrite one frame in place after a consecutive recording.
    ///
    /// The result has the same logs as a fresh [Snapshot::capture] would, provided only
    /// `frame` changed (and the movie possibly grew) since this snapshot was taken.
    pub fn reinit_single_frame<S: InputSource + ?Sized>(
        &mut self,
        input: &S,
        lag: &LagLog,
        markers: &MarkerSet,
        frame: u32,
    ) {
        let previous = self.input.frame_input(frame);
        self.input.resize(input.frame_count());
        let current = input.frame(frame);
        self.input.set_frame_input(frame, &current);
        self.input.mark_hot(frame, &previous);

        // only the tail of the lag log moves during recording
        let lag_start = frame.saturating_sub(1).min(self.lag.len()).min(lag.len());
        self.lag.invalidate_from(lag_start);
        for lag_frame in lag_start..lag.len() {
            self.lag.set(lag_frame, lag.get(lag_frame));
        }

        if self.markers != *markers {
            self.markers = markers.clone();
        }
        self.timestamp = chrono::Local::now().format("%H:%M:%S").to_string();
        self.packed = None;
    }

    /// Rebuild the description from the kind, frame span and comment.
    pub(crate) fn describe(&mut self) {
        let mut description = self.kind.to_string();
        description.push_str(&format!(" {}", self.start_frame));
        match (self.kind, self.end_frame) {
            (ModificationKind::MarkerDrag, Some(end)) => description.push_str(&format!("->{}", end)),
            (ModificationKind::MarkerSwap, Some(end)) => {
                description.push_str(&format!("<->{}", end))
            }
            (_, Some(end)) if end > self.start_frame => {
                description.push_str(&format!("-{}", end))
            }
            _ => {}
        }
        if let Some(comment) = &self.comment {
            description.push(' ');
            description.push_str(comment);
        }
        self.set_description(description);
    }

    pub(crate) fn set_description(&mut self, description: String) {
        self.description = clip(description, MAX_DESCRIPTION_LEN);
        self.packed = None;
    }

    pub(crate) fn lag_mut(&mut self) -> &mut LagLog {
        self.packed = None;
        &mut self.lag
    }

    /// The input log.
    pub fn input(&self) -> &InputLog {
        &self.input
    }

    /// The lag log.
    pub fn lag(&self) -> &LagLog {
        &self.lag
    }

    /// The markers.
    pub fn markers(&self) -> &MarkerSet {
        &self.markers
    }

    /// The frame the user was at when the snapshot was taken.
    pub fn key_frame(&self) -> u32 {
        self.key_frame
    }

    /// The first frame touched by the edit.
    pub fn start_frame(&self) -> u32 {
        self.start_frame
    }

    /// The last frame touched by the edit, or `None` if it extends to the end of the movie.
    pub fn end_frame(&self) -> Option<u32> {
        self.end_frame
    }

    /// The operation that produced this snapshot.
    pub fn kind(&self) -> ModificationKind {
        self.kind
    }

    /// The correlation tag used to coalesce continuous actions.
    pub fn tag(&self) -> Option<u32> {
        self.tag
    }

    /// The joypads changed by a recording, in [tased_log::FrameInput::difference_bits] form.
    pub fn recorded_joypads(&self) -> u32 {
        self.recorded_joypads
    }

    /// A human readable description.
    pub fn description(&self) -> &str {
        &self.description
    }

    /// The wall clock time the snapshot was taken, as `HH:MM:SS`.
    pub fn timestamp(&self) -> &str {
        &self.timestamp
    }

    /// Returns true if an encoded copy of the logs is cached for saving.
    pub fn is_packed(&self) -> bool {
        self.packed.is_some()
    }

    /// Returns true if the live markers differ from this snapshot's markers.
    pub fn markers_differ_from(&self, markers: &MarkerSet) -> bool {
        self.markers.is_different_from(markers)
    }

    /// Encode the logs into the save cache, returning true if work was done.
    ///
    /// The cache only speeds up [Snapshot::save]. It is held alongside the raw logs, which
    /// undo and redo still read, so packing costs memory rather than freeing it. Any change
    /// to the logs or description drops the cache.
    pub fn pack(&mut self) -> Result<bool, LogError> {
        if self.packed.is_some() {
            return Ok(false);
        }
        self.packed = Some(self.encode_payload()?);
        Ok(true)
    }

    fn encode_payload(&self) -> Result<Vec<u8>, LogError> {
        let mut payload = Vec::new();
        self.input.save(&mut payload)?;
        self.lag.save(&mut payload)?;
        self.markers.save(&mut payload)?;
        Ok(payload)
    }

    /// Write the snapshot, reusing the compressed cache if present.
    pub fn save<W: Write>(&self, writer: &mut W) -> Result<(), LogError> {
        write_u8(writer, self.kind.code())?;
        write_u32(writer, self.key_frame)?;
        write_u32(writer, self.start_frame)?;
        write_opt_u32(writer, self.end_frame)?;
        write_opt_u32(writer, self.tag)?;
        write_u32(writer, self.recorded_joypads)?;
        write_str(writer, &self.description)?;
        write_str(writer, &self.timestamp)?;
        match &self.packed {
            Some(payload) => write_bytes(writer, payload),
            None => write_bytes(writer, &self.encode_payload()?),
        }
    }

    /// Read a snapshot written by [Snapshot::save].
    pub fn load<R: Read>(reader: &mut R) -> Result<Self, LogError> {
        let kind = ModificationKind::from_code(read_u8(reader)?)
            .ok_or(LogError::InvalidData("unknown modification kind"))?;
        let key_frame = read_u32(reader)?;
        let start_frame = read_u32(reader)?;
        let end_frame = read_opt_u32(reader)?;
        let tag = read_opt_u32(reader)?;
        let recorded_joypads = read_u32(reader)?;
        let description = read_str(reader)?;
        let timestamp = read_str(reader)?;
        let payload = read_bytes(reader)?;

        let mut payload_reader = &payload[..];
        let input = InputLog::load(&mut payload_reader)?;
        let lag = LagLog::load(&mut payload_reader)?;
        let markers = MarkerSet::load(&mut payload_reader)?;
        if !payload_reader.is_empty() {
            return Err(LogError::InvalidData("trailing bytes in snapshot"));
        }

        Ok(Self {
            input,
            lag,
            markers,
            key_frame,
            start_frame,
            end_frame,
            kind,
            tag,
            recorded_joypads,
            comment: None,
            description: clip(description, MAX_DESCRIPTION_LEN),
            timestamp,
            packed: Some(payload),
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use tased_log::{FrameInput, LagState, Movie};

    fn movie(buttons: &[u8]) -> Movie {
        Movie::from_frames(1, buttons.iter().map(|&b| FrameInput::single(b)).collect())
    }

    #[test]
    fn test_reinit_matches_capture() {
        let mut live = movie(&[1, 2, 3]);
        let mut lag = LagLog::new();
        for frame in 0..3 {
            lag.set(frame, LagState::NotLagged);
        }
        let markers = MarkerSet::new();
        let mut snapshot = Snapshot::capture(&live, &lag, &markers, false);

        live.push(FrameInput::single(4));
        lag.set(3, LagState::Lagged);
        snapshot.reinit_single_frame(&live, &lag, &markers, 3);

        let fresh = Snapshot::capture(&live, &lag, &markers, false);
        assert_eq!(snapshot.input(), fresh.input());
        assert_eq!(snapshot.lag(), fresh.lag());
        assert_eq!(snapshot.markers(), fresh.markers());
    }

    #[test]
    fn test_save_load() {
        let mut markers = MarkerSet::new();
        markers.set_marker(1);
        let mut snapshot = Snapshot::capture(&movie(&[5, 6]), &LagLog::new(), &markers, true);
        snapshot.kind = ModificationKind::Set;
        snapshot.start_frame = 1;
        snapshot.end_frame = Some(4);
        snapshot.comment = Some("hello".to_owned());
        snapshot.describe();
        assert_eq!(snapshot.description(), "Set 1-4 hello");

        let mut buf = Vec::new();
        snapshot.save(&mut buf).unwrap();
        assert!(snapshot.pack().unwrap());
        let mut packed_buf = Vec::new();
        snapshot.save(&mut packed_buf).unwrap();
        assert_eq!(buf, packed_buf);

        let loaded = Snapshot::load(&mut &buf[..]).unwrap();
        assert_eq!(loaded.input(), snapshot.input());
        assert_eq!(loaded.markers(), snapshot.markers());
        assert_eq!(loaded.kind(), ModificationKind::Set);
        assert_eq!(loaded.end_frame(), Some(4));
        assert_eq!(loaded.description(), "Set 1-4 hello");
        assert!(Snapshot::load(&mut &buf[..buf.len() - 1]).is_err());
    }

    #[test]
    fn test_lag_change_drops_save_cache() {
        let mut lag = LagLog::new();
        lag.set(0, LagState::NotLagged);
        let mut snapshot = Snapshot::capture(&movie(&[1, 2]), &lag, &MarkerSet::new(), false);
        assert!(snapshot.pack().unwrap());
        assert!(!snapshot.pack().unwrap());
        assert!(snapshot.is_packed());

        snapshot.lag_mut().set(1, LagState::Lagged);
        assert!(!snapshot.is_packed());
        assert_eq!(snapshot.lag().get(1), LagState::Lagged);

        let mut buf = Vec::new();
        snapshot.save(&mut buf).unwrap();
        let loaded = Snapshot::load(&mut &buf[..]).unwrap();
        assert_eq!(loaded.lag().get(1), LagState::Lagged);
        assert_eq!(loaded.input(), snapshot.input());
    }

    #[test]
    fn test_drag_description() {
        let mut snapshot = Snapshot::capture(&movie(&[]), &LagLog::new(), &MarkerSet::new(), false);
        snapshot.kind = ModificationKind::MarkerDrag;
        snapshot.start_frame = 9;
        snapshot.end_frame = Some(3);
        snapshot.describe();
        assert_eq!(snapshot.description(), "Marker Drag 9->3");
    }
}
