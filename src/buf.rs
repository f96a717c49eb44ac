use std::io::Read;

/// Outcome of an exact-fill read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fill {
    /// The buffer was filled completely.
    Full,
    /// The source ran out after this many bytes.
    Eof(usize),
}

/// Read until `buf` is full or the source is exhausted. Unlike
/// `read_exact`, hitting EOF is reported as data, not as an error, so the
/// caller can tell a short file from an I/O failure.
pub fn fill_buf<R: Read>(source: &mut R, buf: &mut [u8]) -> std::io::Result<Fill> {
    let mut filled = 0;
    while filled < buf.len() {
        match source.read(&mut buf[filled..])? {
            0 => return Ok(Fill::Eof(filled)),
            n => filled += n,
        }
    }
    Ok(Fill::Full)
}
