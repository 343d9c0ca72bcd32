//! Clip duration probe.
//!
//! Reads the ISO-BMFF box tree just far enough to decode the movie header
//! (`moov/mvhd`). Only box headers and the header payload are read; media data
//! is skipped with seeks.

use anyhow::{anyhow, Result};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use std::time::Duration;

/// Largest `mvhd` payload accepted (version 1 is 108 bytes plus header).
const MAX_MVHD_LEN: u64 = 256;

/// Upper bound on boxes visited at one level before giving up.
const MAX_BOXES_PER_LEVEL: usize = 4096;

/// Duration of the clip at `path`, or `None` if the header cannot be read.
pub fn clip_duration(path: &Path) -> Option<Duration> {
    match read_duration(path) {
        Ok(duration) => Some(duration),
        Err(e) => {
            log::debug!("no duration for {}: {}", path.display(), e);
            None
        }
    }
}

fn read_duration(path: &Path) -> Result<Duration> {
    let mut file = File::open(path)?;
    let file_len = file.metadata()?.len();
    let (moov_start, moov_end) = find_box(&mut file, 0, file_len, b"moov")?
        .ok_or_else(|| anyhow!("no moov box"))?;
    let (mvhd_start, mvhd_end) = find_box(&mut file, moov_start, moov_end, b"mvhd")?
        .ok_or_else(|| anyhow!("no mvhd box"))?;
    let len = mvhd_end - mvhd_start;
    if len > MAX_MVHD_LEN {
        return Err(anyhow!("mvhd length {} exceeds maximum {}", len, MAX_MVHD_LEN));
    }
    file.seek(SeekFrom::Start(mvhd_start))?;
    let mut payload = vec![0u8; len as usize];
    file.read_exact(&mut payload)?;
    decode_mvhd(&payload)
}

/// Scans boxes in `[start, end)` for `kind`; returns the payload range.
fn find_box<R: Read + Seek>(
    reader: &mut R,
    start: u64,
    end: u64,
    kind: &[u8; 4],
) -> Result<Option<(u64, u64)>> {
    let mut offset = start;
    for _ in 0..MAX_BOXES_PER_LEVEL {
        if offset.saturating_add(8) > end {
            return Ok(None);
        }
        reader.seek(SeekFrom::Start(offset))?;
        let mut header = [0u8; 8];
        reader.read_exact(&mut header)?;
        let size32 = u32::from_be_bytes([header[0], header[1], header[2], header[3]]);
        let box_kind = &header[4..8];
        let (header_len, box_len) = match size32 {
            0 => (8, end - offset),
            1 => {
                let mut large = [0u8; 8];
                reader.read_exact(&mut large)?;
                (16, u64::from_be_bytes(large))
            }
            n => (8, u64::from(n)),
        };
        let box_end = offset
            .checked_add(box_len)
            .filter(|box_end| box_len >= header_len && *box_end <= end)
            .ok_or_else(|| anyhow!("box at offset {} overruns its parent", offset))?;
        if box_kind == kind {
            return Ok(Some((offset + header_len, box_end)));
        }
        offset = box_end;
    }
    Err(anyhow!("too many boxes"))
}

/// Decodes a `mvhd` payload (after the box header).
fn decode_mvhd(payload: &[u8]) -> Result<Duration> {
    let mut cursor = 0usize;
    let version = read_u8(payload, &mut cursor)?;
    cursor += 3; // flags
    let (timescale, duration) = match version {
        0 => {
            cursor += 8; // creation + modification time
            let timescale = read_u32(payload, &mut cursor)?;
            let duration = u64::from(read_u32(payload, &mut cursor)?);
            (timescale, duration)
        }
        1 => {
            cursor += 16;
            let timescale = read_u32(payload, &mut cursor)?;
            let duration = read_u64(payload, &mut cursor)?;
            (timescale, duration)
        }
        v => return Err(anyhow!("unsupported mvhd version {}", v)),
    };
    if timescale == 0 {
        return Err(anyhow!("mvhd timescale is zero"));
    }
    if duration == u64::MAX || (version == 0 && duration == u64::from(u32::MAX)) {
        return Err(anyhow!("mvhd duration is unknown"));
    }
    let millis = duration.saturating_mul(1000) / u64::from(timescale);
    Ok(Duration::from_millis(millis))
}

fn read_u8(bytes: &[u8], cursor: &mut usize) -> Result<u8> {
    let value = *bytes
        .get(*cursor)
        .ok_or_else(|| anyhow!("unexpected end of mvhd"))?;
    *cursor += 1;
    Ok(value)
}

fn read_u32(bytes: &[u8], cursor: &mut usize) -> Result<u32> {
    let end = *cursor + 4;
    let slice = bytes
        .get(*cursor..end)
        .ok_or_else(|| anyhow!("unexpected end of mvhd"))?;
    *cursor = end;
    Ok(u32::from_be_bytes([slice[0], slice[1], slice[2], slice[3]]))
}

fn read_u64(bytes: &[u8], cursor: &mut usize) -> Result<u64> {
    let end = *cursor + 8;
    let slice = bytes
        .get(*cursor..end)
        .ok_or_else(|| anyhow!("unexpected end of mvhd"))?;
    *cursor = end;
    let mut buf = [0u8; 8];
    buf.copy_from_slice(slice);
    Ok(u64::from_be_bytes(buf))
}

/// Minimal MP4 byte layouts for tests elsewhere in the crate.
#[cfg(test)]
pub(crate) mod fixtures {
    fn boxed(kind: &[u8; 4], payload: &[u8]) -> Vec<u8> {
        let mut out = ((payload.len() + 8) as u32).to_be_bytes().to_vec();
        out.extend_from_slice(kind);
        out.extend_from_slice(payload);
        out
    }

    /// `ftyp` + `mdat` + `moov/mvhd` (version 0) describing `millis` of media.
    pub fn mp4_with_duration(millis: u32) -> Vec<u8> {
        let mut mvhd = vec![0u8; 4]; // version 0, flags
        mvhd.extend_from_slice(&[0u8; 8]);
        mvhd.extend_from_slice(&1000u32.to_be_bytes());
        mvhd.extend_from_slice(&millis.to_be_bytes());
        mvhd.extend_from_slice(&[0u8; 80]);

        let mut out = boxed(b"ftyp", b"isom\0\0\0\x01isomiso2mp41");
        out.extend(boxed(b"mdat", &[0xAB; 64]));
        out.extend(boxed(b"moov", &boxed(b"mvhd", &mvhd)));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_version0_duration() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("clip.mp4");
        std::fs::write(&path, fixtures::mp4_with_duration(12_500))?;
        assert_eq!(clip_duration(&path), Some(Duration::from_millis(12_500)));
        Ok(())
    }

    #[test]
    fn reads_version1_duration() -> Result<()> {
        let mut payload = vec![1u8, 0, 0, 0];
        payload.extend_from_slice(&[0u8; 16]);
        payload.extend_from_slice(&90_000u32.to_be_bytes());
        payload.extend_from_slice(&(90_000u64 * 7).to_be_bytes());
        assert_eq!(decode_mvhd(&payload)?, Duration::from_secs(7));
        Ok(())
    }

    #[test]
    fn truncated_file_has_no_duration() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("partial.mp4");
        let full = fixtures::mp4_with_duration(5_000);
        std::fs::write(&path, &full[..full.len() - 40])?;
        assert_eq!(clip_duration(&path), None);
        Ok(())
    }

    #[test]
    fn oversized_largesize_is_rejected() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("corrupt.mp4");
        let mut bytes = 16u32.to_be_bytes().to_vec();
        bytes.extend_from_slice(b"ftypisom\0\0\0\0");
        bytes.extend_from_slice(&1u32.to_be_bytes());
        bytes.extend_from_slice(b"mdat");
        bytes.extend_from_slice(&u64::MAX.to_be_bytes());
        bytes.extend_from_slice(&[0u8; 32]);
        std::fs::write(&path, &bytes)?;

        assert_eq!(clip_duration(&path), None);
        let err = read_duration(&path).expect_err("largesize past end of file");
        assert!(err.to_string().contains("overruns"));
        Ok(())
    }

    #[test]
    fn zero_timescale_is_rejected() {
        let mut payload = vec![0u8; 12];
        payload.extend_from_slice(&0u32.to_be_bytes());
        payload.extend_from_slice(&10u32.to_be_bytes());
        assert!(decode_mvhd(&payload).is_err());
    }
}
