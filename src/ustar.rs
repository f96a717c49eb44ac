//! 512-byte ustar header codec.
//!
//! Builds POSIX.1-1988 headers with the GNU base-256 extension for sizes
//! that do not fit eleven octal digits, so every track keeps a constant
//! 512-byte header no matter how large the file or how long the path. PAX
//! would break that constant-size property and is deliberately not emitted.
//!
//! The codec is a pure function of the track plus the identity to stamp
//! into the uid/gid/uname/gname fields; it reads no clock, locale, or
//! environment.

use crate::entry::Entry;
#[cfg(test)]
use crate::entry::EntryKind;
use crate::error::{Result, TapeError};
use crate::TapeOptions;

pub const HEADER_LEN: usize = 512;

const NAME_LEN: usize = 100;
const PREFIX_LEN: usize = 155;
const LINKNAME_LEN: usize = 100;

// Largest value eleven octal digits can carry; anything bigger goes base-256.
const OCTAL_FIELD_MAX: u64 = (1 << 33) - 1;

/// Identity stamped into every header. The default is the anonymized
/// 0/0/root/root; overrides come from [`TapeOptions`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub uid: u32,
    pub gid: u32,
    pub uname: String,
    pub gname: String,
}

impl Default for Identity {
    fn default() -> Self {
        Identity {
            uid: 0,
            gid: 0,
            uname: "root".to_string(),
            gname: "root".to_string(),
        }
    }
}

impl Identity {
    pub fn from_options(options: &TapeOptions) -> Identity {
        let base = Identity::default();
        Identity {
            uid: options.override_uid.unwrap_or(base.uid),
            gid: options.override_gid.unwrap_or(base.gid),
            uname: options.override_uname.clone().unwrap_or(base.uname),
            gname: options.override_gname.clone().unwrap_or(base.gname),
        }
    }
}

/// Split an archive path into ustar `(name, prefix)` at the rightmost `/`
/// whose suffix fits the 100-byte name field and whose prefix fits the
/// 155-byte prefix field. Directories carry their trailing `/` through the
/// split, so their name portion keeps it.
pub fn split_arc_path(arc_path: &str) -> Result<(&str, &str)> {
    let bytes = arc_path.as_bytes();
    if bytes.len() <= NAME_LEN {
        return Ok((arc_path, ""));
    }

    let mut split = None;
    for (i, b) in bytes.iter().enumerate() {
        if *b == b'/' {
            let name_len = bytes.len() - i - 1;
            if i <= PREFIX_LEN && name_len > 0 && name_len <= NAME_LEN {
                split = Some(i);
            }
        }
    }

    match split {
        Some(i) => Ok((&arc_path[i + 1..], &arc_path[..i])),
        None => Err(TapeError::PathTooLong(arc_path.to_string())),
    }
}

struct HeaderBlock {
    buf: [u8; HEADER_LEN],
}

impl HeaderBlock {
    fn new() -> Self {
        HeaderBlock {
            buf: [0u8; HEADER_LEN],
        }
    }

    fn put_bytes(&mut self, offset: usize, value: &[u8]) {
        self.buf[offset..offset + value.len()].copy_from_slice(value);
    }

    fn put_str(&mut self, offset: usize, width: usize, value: &str) -> Result<()> {
        let data = value.as_bytes();
        if data.len() > width {
            return Err(TapeError::HeaderField(value.to_string()));
        }
        self.put_bytes(offset, data);
        Ok(())
    }

    // Zero-padded octal digits over the whole field, NUL terminated.
    fn put_octal(&mut self, offset: usize, width: usize, value: u64) -> Result<()> {
        let digits = width - 1;
        let text = format!("{:0digits$o}", value, digits = digits);
        if text.len() > digits {
            return Err(TapeError::HeaderField(format!("{value:o}")));
        }
        self.put_bytes(offset, text.as_bytes());
        Ok(())
    }

    // uid/gid style: six octal digits, a space, a NUL.
    fn put_id(&mut self, offset: usize, value: u32) -> Result<()> {
        if u64::from(value) > 0o777777 {
            return Err(TapeError::HeaderField(format!("id {value}")));
        }
        let text = format!("{value:06o}");
        self.put_bytes(offset, text.as_bytes());
        self.buf[offset + 6] = b' ';
        self.buf[offset + 7] = 0;
        Ok(())
    }

    // Eleven octal digits when the size fits, GNU base-256 otherwise: the
    // field's first byte becomes 0x80 and the remaining eleven carry the
    // value big-endian.
    fn put_size(&mut self, offset: usize, size: u64) -> Result<()> {
        if size <= OCTAL_FIELD_MAX {
            return self.put_octal(offset, 12, size);
        }
        self.buf[offset] = 0x80;
        let mut wide = [0u8; 11];
        wide[3..].copy_from_slice(&size.to_be_bytes());
        self.put_bytes(offset + 1, &wide);
        Ok(())
    }

    // mtime takes the same hybrid treatment; pre-epoch times use the signed
    // base-256 form (0xFF lead byte, two's-complement big-endian).
    fn put_mtime(&mut self, offset: usize, mtime: i64) -> Result<()> {
        if (0..=OCTAL_FIELD_MAX as i64).contains(&mtime) {
            return self.put_octal(offset, 12, mtime as u64);
        }
        let wide = (mtime as i128).to_be_bytes();
        self.buf[offset] = if mtime < 0 { 0xFF } else { 0x80 };
        self.put_bytes(offset + 1, &wide[5..]);
        Ok(())
    }

    // Checksum over all 512 bytes with the checksum field itself read as
    // spaces; stored as six octal digits, NUL, space.
    fn seal(mut self) -> [u8; HEADER_LEN] {
        self.buf[148..156].fill(b' ');
        let sum: u32 = self.buf.iter().map(|b| u32::from(*b)).sum();
        let text = format!("{sum:06o}");
        self.buf[148..154].copy_from_slice(text.as_bytes());
        self.buf[154] = 0;
        self.buf[155] = b' ';
        self.buf
    }
}

/// Encode one track into its 512-byte header.
pub fn encode(entry: &Entry, identity: &Identity) -> Result<[u8; HEADER_LEN]> {
    let (name, prefix) = split_arc_path(&entry.arc_path)?;

    let mut block = HeaderBlock::new();
    block.put_str(0, NAME_LEN, name)?;
    block.put_octal(100, 8, u64::from(entry.mode))?;
    block.put_id(108, identity.uid)?;
    block.put_id(116, identity.gid)?;
    block.put_size(124, entry.size)?;
    block.put_mtime(136, entry.mtime)?;
    block.put_bytes(156, &[entry.kind.type_flag()]);
    if let Some(target) = &entry.link_target {
        block
            .put_str(157, LINKNAME_LEN, target)
            .map_err(|_| TapeError::PathTooLong(target.clone()))?;
    }
    block.put_bytes(257, b"ustar\0");
    block.put_bytes(263, b"00");
    // One byte shy of the field width keeps the names NUL terminated.
    block.put_str(265, 31, &identity.uname)?;
    block.put_str(297, 31, &identity.gname)?;
    block.put_str(345, PREFIX_LEN, prefix)?;

    Ok(block.seal())
}
