//! Annex-B elementary stream splitting.
//!
//! Units keep their start code so that concatenating them reproduces the
//! input byte for byte.

use std::io::{self, Read};

const READ_CHUNK: usize = 64 * 1024;

/// The NAL unit types the encoder simulation cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NalKind {
    /// Non-IDR slice.
    Slice,
    /// IDR slice.
    Idr,
    Sps,
    Pps,
    Other(u8),
}

impl NalKind {
    pub fn from_header(header: u8) -> Self {
        match header & 0x1F {
            1 => NalKind::Slice,
            5 => NalKind::Idr,
            7 => NalKind::Sps,
            8 => NalKind::Pps,
            other => NalKind::Other(other),
        }
    }

    pub fn is_parameter_set(self) -> bool {
        matches!(self, NalKind::Sps | NalKind::Pps)
    }

    pub fn is_slice(self) -> bool {
        matches!(self, NalKind::Slice | NalKind::Idr)
    }
}

/// One NAL unit including its leading start code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NalUnit {
    pub kind: NalKind,
    pub data: Vec<u8>,
}

/// Splits an Annex-B byte stream read from `R` into NAL units.
pub struct AnnexBReader<R> {
    inner: R,
    buf: Vec<u8>,
    eof: bool,
}

impl<R: Read> AnnexBReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            buf: Vec::new(),
            eof: false,
        }
    }

    /// Next complete unit, or `None` once the input is exhausted.
    ///
    /// Bytes before the first start code are returned as a unit of kind
    /// `Other(0)` so nothing is lost.
    pub fn next_unit(&mut self) -> io::Result<Option<NalUnit>> {
        loop {
            let search_from = match find_start_code(&self.buf, 0) {
                Some((0, len)) => len,
                Some(_) => 0,
                None if self.buf.is_empty() => 0,
                None => 1,
            };
            if let Some((next, _)) = find_start_code(&self.buf, search_from) {
                if next > 0 {
                    let data: Vec<u8> = self.buf.drain(..next).collect();
                    return Ok(Some(unit(data)));
                }
            }
            if self.eof {
                if self.buf.is_empty() {
                    return Ok(None);
                }
                return Ok(Some(unit(std::mem::take(&mut self.buf))));
            }
            self.fill()?;
        }
    }

    fn fill(&mut self) -> io::Result<()> {
        let start = self.buf.len();
        self.buf.resize(start + READ_CHUNK, 0);
        let read = loop {
            match self.inner.read(&mut self.buf[start..]) {
                Ok(n) => break n,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    self.buf.truncate(start);
                    return Err(err);
                }
            }
        };
        self.buf.truncate(start + read);
        if read == 0 {
            self.eof = true;
        }
        Ok(())
    }
}

impl<R: Read> Iterator for AnnexBReader<R> {
    type Item = io::Result<NalUnit>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_unit().transpose()
    }
}

fn unit(data: Vec<u8>) -> NalUnit {
    let header = find_start_code(&data, 0)
        .filter(|(pos, _)| *pos == 0)
        .and_then(|(_, len)| data.get(len).copied());
    let kind = header.map_or(NalKind::Other(0), NalKind::from_header);
    NalUnit { kind, data }
}

/// Position and length of the first `00 00 01` or `00 00 00 01` at or
/// after `from`.
fn find_start_code(data: &[u8], from: usize) -> Option<(usize, usize)> {
    let mut i = from;
    while i + 3 <= data.len() {
        if data[i] == 0 && data[i + 1] == 0 {
            if data[i + 2] == 1 {
                return Some((i, 3));
            }
            if data[i + 2] == 0 && data.get(i + 3) == Some(&1) {
                return Some((i, 4));
            }
        }
        i += 1;
    }
    None
}
