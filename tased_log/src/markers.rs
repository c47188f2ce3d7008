use std::{
    io::{Read, Write},
    ops::RangeBounds,
};

use crate::{
    codec::{pack, read_blob, read_len, read_str, read_u32, unpack, write_blob},
    diff::first_difference,
    LogError,
};

/// Maximum length of a marker note, in bytes.
pub const MAX_NOTE_LEN: usize = 100;

/// Sparse named annotations on frames.
///
/// Each frame holds either 0 (no marker) or the id of a marker. Ids are numbered 1, 2, ...
/// in frame order with no gaps, and are renumbered whenever a marker is added or removed.
/// Note 0 is the global note, which always exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkerSet {
    ids: Vec<u32>,
    notes: Vec<String>,
}

impl Default for MarkerSet {
    fn default() -> Self {
        Self {
            ids: Vec::new(),
            notes: vec![String::new()],
        }
    }
}

fn clip_note(text: &str) -> String {
    let mut end = text.len().min(MAX_NOTE_LEN);
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    text[..end].to_owned()
}

impl MarkerSet {
    /// Create an empty marker set.
    pub fn new() -> Self {
        Self::default()
    }

    /// The length of the per-frame array.
    pub fn len(&self) -> u32 {
        self.ids.len() as u32
    }

    /// Returns true if the per-frame array is empty.
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// The number of markers.
    pub fn count(&self) -> u32 {
        self.notes.len() as u32 - 1
    }

    /// Grow the array with empty frames or shrink it, dropping markers past the end.
    pub fn resize(&mut self, len: u32) {
        if len < self.len() {
            self.truncate(len);
        } else {
            self.ids.resize(len as usize, 0);
        }
    }

    /// The marker id on a frame, or 0 if there is none.
    pub fn marker_at(&self, frame: u32) -> u32 {
        self.ids.get(frame as usize).copied().unwrap_or(0)
    }

    /// The id of the closest marker at or before `frame`, or 0 if there is none.
    pub fn marker_above(&self, frame: u32) -> u32 {
        let end = (frame as usize + 1).min(self.ids.len());
        self.ids[..end]
            .iter()
            .rev()
            .copied()
            .find(|&id| id != 0)
            .unwrap_or(0)
    }

    /// The frame holding the given marker.
    pub fn frame_of(&self, id: u32) -> Option<u32> {
        if id == 0 {
            return None;
        }
        self.ids
            .iter()
            .position(|&marker| marker == id)
            .map(|frame| frame as u32)
    }

    /// The note for a marker id, or the global note for id 0.
    ///
    /// Unknown ids read as an empty note.
    pub fn note(&self, id: u32) -> &str {
        self.notes.get(id as usize).map_or("", String::as_str)
    }

    /// Replace a note, returning true if it changed.
    pub fn set_note(&mut self, id: u32, text: &str) -> bool {
        let text = clip_note(text);
        match self.notes.get_mut(id as usize) {
            Some(note) if *note != text => {
                *note = text;
                true
            }
            _ => false,
        }
    }

    /// Place a marker on a frame and return its id.
    ///
    /// If the frame already has a marker, its id is returned unchanged.
    pub fn set_marker(&mut self, frame: u32) -> u32 {
        let existing = self.marker_at(frame);
        if existing != 0 {
            return existing;
        }
        if frame >= self.len() {
            self.ids.resize(frame as usize + 1, 0);
        }
        let id = self.marker_above(frame) + 1;
        self.notes.insert(id as usize, String::new());
        self.ids[frame as usize] = id;
        self.renumber();
        id
    }

    /// Remove the marker on a frame, returning true if there was one.
    pub fn remove_marker(&mut self, frame: u32) -> bool {
        let id = self.marker_at(frame);
        if id == 0 {
            return false;
        }
        self.notes.remove(id as usize);
        self.ids[frame as usize] = 0;
        self.renumber();
        true
    }

    /// Add a marker if the frame has none, otherwise remove it.
    ///
    /// Returns true if the frame now has a marker.
    pub fn toggle_marker(&mut self, frame: u32) -> bool {
        if self.remove_marker(frame) {
            false
        } else {
            self.set_marker(frame);
            true
        }
    }

    /// Move a marker and its note to an unmarked frame.
    pub fn move_marker(&mut self, from: u32, to: u32) -> bool {
        let id = self.marker_at(from);
        if id == 0 || from == to || self.marker_at(to) != 0 {
            return false;
        }
        let note = self.notes[id as usize].clone();
        self.remove_marker(from);
        let new_id = self.set_marker(to);
        self.notes[new_id as usize] = note;
        true
    }

    /// Exchange the markers (and notes) on two frames.
    pub fn swap_markers(&mut self, a: u32, b: u32) -> bool {
        let (id_a, id_b) = (self.marker_at(a), self.marker_at(b));
        match (id_a, id_b) {
            (0, 0) => false,
            (_, 0) => self.move_marker(a, b),
            (0, _) => self.move_marker(b, a),
            _ => {
                self.notes.swap(id_a as usize, id_b as usize);
                id_a != id_b
            }
        }
    }

    /// Insert `count` unmarked frames before `at`.
    pub fn insert_empty(&mut self, at: u32, count: u32) {
        let at = at as usize;
        if at <= self.ids.len() {
            self.ids
                .splice(at..at, std::iter::repeat(0).take(count as usize));
        }
    }

    /// Remove up to `count` frames starting at `at`, along with any markers on them.
    ///
    /// Returns true if a marker was removed.
    pub fn erase_frames(&mut self, at: u32, count: u32) -> bool {
        let len = self.ids.len();
        let start = (at as usize).min(len);
        let end = start.saturating_add(count as usize).min(len);
        let removed: Vec<u32> = self.ids.drain(start..end).filter(|&id| id != 0).collect();
        for &id in removed.iter().rev() {
            self.notes.remove(id as usize);
        }
        self.renumber();
        !removed.is_empty()
    }

    /// Drop every frame at or after `len`, returning true if a marker was removed.
    pub fn truncate(&mut self, len: u32) -> bool {
        let count = self.len().saturating_sub(len);
        self.erase_frames(len, count)
    }

    /// The first marked frame at or after `from` whose note contains `text`.
    pub fn find_note(&self, text: &str, from: u32) -> Option<u32> {
        let needle = text.to_lowercase();
        (from..self.len()).find(|&frame| {
            let id = self.marker_at(frame);
            id != 0 && self.note(id).to_lowercase().contains(&needle)
        })
    }

    /// Find the first frame in `range` where the marker arrays disagree.
    pub fn find_first_difference(
        &self,
        other: &MarkerSet,
        range: impl RangeBounds<u32>,
    ) -> Option<u32> {
        first_difference(self.len(), other.len(), range, |frame| {
            self.marker_at(frame) != other.marker_at(frame)
        })
    }

    /// Returns true if the markers or any note (including the global note) differ.
    pub fn is_different_from(&self, other: &MarkerSet) -> bool {
        self != other
    }

    fn renumber(&mut self) {
        let mut next = 1;
        for id in self.ids.iter_mut().filter(|id| **id != 0) {
            *id = next;
            next += 1;
        }
    }

    /// Encode the markers without compression.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(8 + self.ids.len() * 4);
        buf.extend_from_slice(&self.len().to_le_bytes());
        for &id in &self.ids {
            buf.extend_from_slice(&id.to_le_bytes());
        }
        buf.extend_from_slice(&(self.notes.len() as u32).to_le_bytes());
        for note in &self.notes {
            buf.extend_from_slice(&(note.len() as u32).to_le_bytes());
            buf.extend_from_slice(note.as_bytes());
        }
        buf
    }

    /// Decode markers produced by [MarkerSet::encode].
    pub fn decode(mut data: &[u8]) -> Result<Self, LogError> {
        let reader = &mut data;
        let len = read_len(reader)?;
        let mut ids = Vec::with_capacity(len.min(reader.len() / 4));
        for _ in 0..len {
            ids.push(read_u32(reader)?);
        }
        let note_count = read_len(reader)?;
        let mut notes = Vec::with_capacity(note_count.min(reader.len() / 4));
        for _ in 0..note_count {
            notes.push(read_str(reader)?);
        }
        if !reader.is_empty() {
            return Err(LogError::InvalidData("trailing bytes after markers"));
        }

        let mut expected = 1;
        for &id in ids.iter().filter(|&&id| id != 0) {
            if id != expected {
                return Err(LogError::InvalidData("marker ids are not contiguous"));
            }
            expected += 1;
        }
        if notes.len() as u32 != expected {
            return Err(LogError::InvalidData("marker notes do not match markers"));
        }
        Ok(Self { ids, notes })
    }

    /// Compress the markers.
    pub fn compress(&self) -> Result<Vec<u8>, LogError> {
        pack(&self.encode())
    }

    /// Decompress markers produced by [MarkerSet::compress].
    pub fn decompress(packed: &[u8]) -> Result<Self, LogError> {
        Self::decode(&unpack(packed)?)
    }

    /// Write the markers as a compressed blob.
    pub fn save<W: Write>(&self, writer: &mut W) -> Result<(), LogError> {
        write_blob(writer, &self.encode())
    }

    /// Read markers written by [MarkerSet::save].
    pub fn load<R: Read>(reader: &mut R) -> Result<Self, LogError> {
        Self::decode(&read_blob(reader)?)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_ids_stay_dense() {
        let mut markers = MarkerSet::new();
        markers.resize(20);
        assert_eq!(markers.set_marker(10), 1);
        markers.set_note(1, "ten");
        assert_eq!(markers.set_marker(5), 1);
        assert_eq!(markers.marker_at(10), 2);
        assert_eq!(markers.note(2), "ten");
        assert_eq!(markers.set_marker(15), 3);

        assert!(markers.remove_marker(5));
        assert_eq!(markers.marker_at(10), 1);
        assert_eq!(markers.marker_at(15), 2);
        assert_eq!(markers.note(1), "ten");
        assert_eq!(markers.count(), 2);
    }

    #[test]
    fn test_out_of_range_reads() {
        let mut markers = MarkerSet::new();
        markers.set_marker(3);
        assert_eq!(markers.len(), 4);
        assert_eq!(markers.marker_at(1000), 0);
        assert_eq!(markers.marker_above(1000), 1);
        assert_eq!(markers.marker_above(2), 0);
        assert_eq!(markers.note(99), "");
    }

    #[test]
    fn test_erase_and_insert_frames() {
        let mut markers = MarkerSet::new();
        markers.resize(10);
        markers.set_marker(2);
        markers.set_marker(4);
        markers.set_marker(8);
        markers.set_note(2, "four");

        assert!(markers.erase_frames(3, 2));
        assert_eq!(markers.len(), 8);
        assert_eq!(markers.count(), 2);
        assert_eq!(markers.marker_at(6), 2);
        assert_eq!(markers.note(2), "");

        markers.insert_empty(0, 3);
        assert_eq!(markers.marker_at(5), 1);
        assert!(!markers.erase_frames(0, 1));
        assert!(markers.truncate(5));
        assert_eq!(markers.count(), 1);
    }

    #[test]
    fn test_move_and_swap() {
        let mut markers = MarkerSet::new();
        markers.set_marker(1);
        markers.set_note(1, "a");
        markers.set_marker(6);
        markers.set_note(2, "b");

        assert!(markers.move_marker(1, 8));
        assert_eq!(markers.note(markers.marker_at(8)), "a");
        assert_eq!(markers.note(markers.marker_at(6)), "b");

        assert!(markers.swap_markers(6, 8));
        assert_eq!(markers.note(markers.marker_at(6)), "a");
        assert_eq!(markers.find_note("B", 0), Some(8));
    }

    #[test]
    fn test_difference() {
        let mut a = MarkerSet::new();
        a.resize(10);
        let mut b = a.clone();
        assert_eq!(a.find_first_difference(&b, ..), None);
        b.set_marker(7);
        assert_eq!(a.find_first_difference(&b, ..), Some(7));
        a.set_marker(7);
        a.set_note(0, "global");
        assert_eq!(a.find_first_difference(&b, ..), None);
        assert!(a.is_different_from(&b));
    }

    #[test]
    fn test_decode_validates_ids() {
        let mut markers = MarkerSet::new();
        markers.set_marker(2);
        let mut encoded = markers.encode();
        assert_eq!(MarkerSet::decode(&encoded).unwrap(), markers);
        // frame 2 id lives at bytes 12..16
        encoded[12] = 5;
        assert!(MarkerSet::decode(&encoded).is_err());
    }
}
