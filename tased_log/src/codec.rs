//! Binary section encoding shared by every persisted component.
//!
//! A section starts with an 8 byte ASCII [Tag]. The same tag with its last byte replaced by
//! `X` marks a section that was intentionally left out, which is distinct from corruption.
//! Integers are little endian `u32`. Large payloads are stored as blobs: the raw length,
//! the compressed length, then the zlib compressed bytes.

use std::io::{self, Read, Write};

use flate2::{read::ZlibDecoder, write::ZlibEncoder, Compression};

use crate::LogError;

/// An 8 byte section tag.
pub type Tag = [u8; 8];

/// Upper bound on the decoded size of any single blob.
pub const MAX_BLOB_SIZE: usize = 1 << 30;

/// Whether a section was written or deliberately skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Section {
    /// The section body follows the tag.
    Present,
    /// The section was not saved and has no body.
    Skipped,
}

/// Return the tag that marks `tag`'s section as intentionally omitted.
pub fn skip_tag(tag: Tag) -> Tag {
    let mut skipped = tag;
    skipped[7] = b'X';
    skipped
}

/// Compress `data` with zlib.
pub fn compress(data: &[u8]) -> Result<Vec<u8>, LogError> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

/// Inflate `data`, which must decode to exactly `expected_len` bytes.
pub fn decompress(data: &[u8], expected_len: usize) -> Result<Vec<u8>, LogError> {
    if expected_len > MAX_BLOB_SIZE {
        return Err(LogError::InvalidData("blob too large"));
    }
    let mut output = Vec::with_capacity(expected_len);
    ZlibDecoder::new(data)
        .take(expected_len as u64 + 1)
        .read_to_end(&mut output)
        .map_err(|error| LogError::Decompress(error.into()))?;
    if output.len() != expected_len {
        tracing::debug!(
            "blob inflated to {} bytes, header says {}",
            output.len(),
            expected_len
        );
        return Err(LogError::SizeMismatch {
            expected: expected_len,
            actual: output.len(),
        });
    }
    Ok(output)
}

/// Encode `raw` in blob format into a new buffer.
pub fn pack(raw: &[u8]) -> Result<Vec<u8>, LogError> {
    let compressed = compress(raw)?;
    let mut packed = Vec::with_capacity(compressed.len() + 8);
    write_len(&mut packed, raw.len())?;
    write_len(&mut packed, compressed.len())?;
    packed.extend_from_slice(&compressed);
    Ok(packed)
}

/// Decode a buffer produced by [pack].
pub fn unpack(mut packed: &[u8]) -> Result<Vec<u8>, LogError> {
    let raw = read_blob(&mut packed)?;
    if !packed.is_empty() {
        return Err(LogError::InvalidData("trailing bytes after blob"));
    }
    Ok(raw)
}

/// Compress `raw` and write it in blob format.
pub fn write_blob<W: Write>(writer: &mut W, raw: &[u8]) -> Result<(), LogError> {
    writer.write_all(&pack(raw)?)?;
    Ok(())
}

/// Read a blob and return its decompressed contents.
pub fn read_blob<R: Read>(reader: &mut R) -> Result<Vec<u8>, LogError> {
    let raw_len = read_len(reader)?;
    let compressed_len = read_len(reader)?;
    let mut compressed = Vec::new();
    reader
        .by_ref()
        .take(compressed_len as u64)
        .read_to_end(&mut compressed)?;
    if compressed.len() != compressed_len {
        return Err(LogError::Truncated);
    }
    decompress(&compressed, raw_len)
}

/// Write a section tag, or its skip variant if `present` is false.
pub fn write_tag<W: Write>(writer: &mut W, tag: Tag, present: bool) -> Result<(), LogError> {
    if present {
        writer.write_all(&tag)?;
    } else {
        writer.write_all(&skip_tag(tag))?;
    }
    Ok(())
}

/// Read a section tag and check that it is `tag` or its skip variant.
pub fn read_tag<R: Read>(reader: &mut R, tag: Tag) -> Result<Section, LogError> {
    let mut found = [0; 8];
    reader.read_exact(&mut found)?;
    if found == tag {
        Ok(Section::Present)
    } else if found == skip_tag(tag) {
        Ok(Section::Skipped)
    } else {
        Err(LogError::BadTag {
            expected: tag,
            found,
        })
    }
}

/// Write a single byte.
pub fn write_u8<W: Write>(writer: &mut W, value: u8) -> io::Result<()> {
    writer.write_all(&[value])
}

/// Read a single byte.
pub fn read_u8<R: Read>(reader: &mut R) -> Result<u8, LogError> {
    let mut buf = [0; 1];
    reader.read_exact(&mut buf)?;
    Ok(buf[0])
}

/// Write a little endian `u32`.
pub fn write_u32<W: Write>(writer: &mut W, value: u32) -> io::Result<()> {
    writer.write_all(&value.to_le_bytes())
}

/// Read a little endian `u32`.
pub fn read_u32<R: Read>(reader: &mut R) -> Result<u32, LogError> {
    let mut buf = [0; 4];
    reader.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

/// Write an optional frame, using `u32::MAX` for `None`.
pub fn write_opt_u32<W: Write>(writer: &mut W, value: Option<u32>) -> io::Result<()> {
    write_u32(writer, value.unwrap_or(u32::MAX))
}

/// Read a value written by [write_opt_u32].
pub fn read_opt_u32<R: Read>(reader: &mut R) -> Result<Option<u32>, LogError> {
    let value = read_u32(reader)?;
    Ok(if value == u32::MAX { None } else { Some(value) })
}

/// Write a length prefix.
pub fn write_len<W: Write>(writer: &mut W, len: usize) -> Result<(), LogError> {
    let len = u32::try_from(len).map_err(|_| LogError::InvalidData("length exceeds u32"))?;
    write_u32(writer, len)?;
    Ok(())
}

/// Read a length prefix, rejecting implausibly large values.
pub fn read_len<R: Read>(reader: &mut R) -> Result<usize, LogError> {
    let len = read_u32(reader)? as usize;
    if len > MAX_BLOB_SIZE {
        return Err(LogError::InvalidData("length too large"));
    }
    Ok(len)
}

/// Write a length prefixed UTF-8 string.
pub fn write_str<W: Write>(writer: &mut W, value: &str) -> Result<(), LogError> {
    write_len(writer, value.len())?;
    writer.write_all(value.as_bytes())?;
    Ok(())
}

/// Read a string written by [write_str].
pub fn read_str<R: Read>(reader: &mut R) -> Result<String, LogError> {
    let len = read_len(reader)?;
    let mut buf = vec![0; len];
    reader.read_exact(&mut buf)?;
    String::from_utf8(buf).map_err(|_| LogError::InvalidData("string is not valid UTF-8"))
}

/// Write length prefixed bytes without compression.
pub fn write_bytes<W: Write>(writer: &mut W, value: &[u8]) -> Result<(), LogError> {
    write_len(writer, value.len())?;
    writer.write_all(value)?;
    Ok(())
}

/// Read bytes written by [write_bytes].
pub fn read_bytes<R: Read>(reader: &mut R) -> Result<Vec<u8>, LogError> {
    let len = read_len(reader)?;
    let mut buf = vec![0; len];
    reader.read_exact(&mut buf)?;
    Ok(buf)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_skip_tag_is_distinguishable() {
        let tag = *b"HISTORY\0";
        let mut buf = Vec::new();
        write_tag(&mut buf, tag, false).unwrap();
        assert_eq!(&buf, b"HISTORYX");
        assert_eq!(read_tag(&mut &buf[..], tag).unwrap(), Section::Skipped);
        assert!(matches!(
            read_tag(&mut &b"GARBAGE!"[..], tag),
            Err(LogError::BadTag { .. })
        ));
    }

    #[test]
    fn test_blob_exactly_full_is_not_an_error() {
        let raw = vec![7u8; 4096];
        let packed = pack(&raw).unwrap();
        assert_eq!(unpack(&packed).unwrap(), raw);
    }

    #[test]
    fn test_corrupt_blob_fails_cleanly() {
        let raw: Vec<u8> = (0..=255).collect();
        let mut packed = pack(&raw).unwrap();
        let last = packed.len() - 3;
        packed[last] ^= 0xff;
        packed[10] ^= 0x55;
        assert!(unpack(&packed).is_err());

        let truncated = &pack(&raw).unwrap()[..12];
        assert!(matches!(unpack(truncated), Err(LogError::Truncated)));
    }

    #[test]
    fn test_blob_length_beyond_input_is_truncated() {
        let mut data = Vec::new();
        write_u32(&mut data, 64).unwrap();
        write_u32(&mut data, 1 << 29).unwrap();
        data.extend_from_slice(&compress(&[1; 64]).unwrap());
        assert!(matches!(
            read_blob(&mut &data[..]),
            Err(LogError::Truncated)
        ));
    }

    #[test]
    fn test_size_mismatch_is_reported() {
        let compressed = compress(b"abcdef").unwrap();
        assert!(matches!(
            decompress(&compressed, 4),
            Err(LogError::SizeMismatch {
                expected: 4,
                actual: 5
            })
        ));
        assert!(decompress(&compressed, 10).is_err());
    }
}
