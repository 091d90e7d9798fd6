//! Signal frame serialisation helpers
//!
//! Frames are built in a host buffer and written to the guest with a single
//! checked write; sigreturn reads the whole frame back into a host buffer
//! before anything is parsed. The reader and writer here only ever touch
//! that buffer, so every offset is bounds-checked against it and a corrupt
//! guest frame surfaces as a [`FrameError`], never a host panic.

use core::fmt;

use crate::memory::MemFault;

/// Terminator / header size of an extension record
pub const RECORD_HEADER_SIZE: usize = 8;

/// Upper bound on records in one chain, including both areas of a split chain
pub const MAX_RECORDS: usize = 64;

/// Why a frame could not be built or restored
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    /// Frame pointer not aligned to the ABI frame alignment
    Misaligned { addr: u64 },
    /// Guest memory holding the frame could not be accessed
    Memory(MemFault),
    /// Offset outside the frame buffer
    Truncated { offset: usize },
    /// Record magic not known to the profile
    UnknownRecord { magic: u32, offset: usize },
    /// The same record appeared twice
    DuplicateRecord { magic: u32 },
    /// Record size smaller than its header, misaligned, or wrong for its kind
    BadRecordSize { magic: u32, size: u32 },
    /// Record chain runs past the end of its reserved area
    ChainOverrun { offset: usize },
    /// More records than [`MAX_RECORDS`]
    TooManyRecords,
    /// No `{0, 0}` terminator before the end of the area
    MissingTerminator,
    /// A record the restore cannot do without is absent
    MissingRecord { magic: u32 },
    /// Saved vector length differs from the live one
    VectorLengthMismatch { saved: u32, live: u32 },
    /// Extra-area descriptor does not describe the area after the frame
    BadExtraArea { datap: u64 },
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameError::Misaligned { addr } => write!(f, "misaligned signal frame at {:#x}", addr),
            FrameError::Memory(fault) => write!(f, "{}", fault),
            FrameError::Truncated { offset } => {
                write!(f, "frame access past end at +{:#x}", offset)
            }
            FrameError::UnknownRecord { magic, offset } => {
                write!(f, "unknown record {:#010x} at +{:#x}", magic, offset)
            }
            FrameError::DuplicateRecord { magic } => write!(f, "duplicate record {:#010x}", magic),
            FrameError::BadRecordSize { magic, size } => {
                write!(f, "bad size {} for record {:#010x}", size, magic)
            }
            FrameError::ChainOverrun { offset } => {
                write!(f, "record chain overruns reserved area at +{:#x}", offset)
            }
            FrameError::TooManyRecords => write!(f, "record chain too long"),
            FrameError::MissingTerminator => write!(f, "record chain not terminated"),
            FrameError::MissingRecord { magic } => {
                write!(f, "required record {:#010x} missing", magic)
            }
            FrameError::VectorLengthMismatch { saved, live } => {
                write!(f, "saved vector length {} != live {}", saved, live)
            }
            FrameError::BadExtraArea { datap } => write!(f, "bad extra area pointer {:#x}", datap),
        }
    }
}

impl From<MemFault> for FrameError {
    fn from(fault: MemFault) -> Self {
        FrameError::Memory(fault)
    }
}

/// Bounds-checked little-endian writer over a frame buffer
pub struct FrameWriter<'a> {
    buf: &'a mut [u8],
}

impl<'a> FrameWriter<'a> {
    pub fn new(buf: &'a mut [u8]) -> Self {
        FrameWriter { buf }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn put_bytes(&mut self, offset: usize, data: &[u8]) -> Result<(), FrameError> {
        let end = offset
            .checked_add(data.len())
            .filter(|&end| end <= self.buf.len())
            .ok_or(FrameError::Truncated { offset })?;
        self.buf[offset..end].copy_from_slice(data);
        Ok(())
    }

    pub fn put_u16(&mut self, offset: usize, value: u16) -> Result<(), FrameError> {
        self.put_bytes(offset, &value.to_le_bytes())
    }

    pub fn put_u32(&mut self, offset: usize, value: u32) -> Result<(), FrameError> {
        self.put_bytes(offset, &value.to_le_bytes())
    }

    pub fn put_u64(&mut self, offset: usize, value: u64) -> Result<(), FrameError> {
        self.put_bytes(offset, &value.to_le_bytes())
    }

    pub fn put_u128(&mut self, offset: usize, value: u128) -> Result<(), FrameError> {
        self.put_bytes(offset, &value.to_le_bytes())
    }

    /// Write a `{magic, size}` record header
    pub fn put_record_header(
        &mut self,
        offset: usize,
        magic: u32,
        size: u32,
    ) -> Result<(), FrameError> {
        self.put_u32(offset, magic)?;
        self.put_u32(offset + 4, size)
    }
}

/// Bounds-checked little-endian reader over a frame buffer
#[derive(Clone, Copy)]
pub struct FrameReader<'a> {
    buf: &'a [u8],
}

impl<'a> FrameReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        FrameReader { buf }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn bytes(&self, offset: usize, len: usize) -> Result<&'a [u8], FrameError> {
        let end = offset
            .checked_add(len)
            .filter(|&end| end <= self.buf.len())
            .ok_or(FrameError::Truncated { offset })?;
        Ok(&self.buf[offset..end])
    }

    fn array<const N: usize>(&self, offset: usize) -> Result<[u8; N], FrameError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.bytes(offset, N)?);
        Ok(out)
    }

    pub fn u16(&self, offset: usize) -> Result<u16, FrameError> {
        self.array::<2>(offset).map(u16::from_le_bytes)
    }

    pub fn u32(&self, offset: usize) -> Result<u32, FrameError> {
        self.array::<4>(offset).map(u32::from_le_bytes)
    }

    pub fn u64(&self, offset: usize) -> Result<u64, FrameError> {
        self.array::<8>(offset).map(u64::from_le_bytes)
    }

    pub fn u128(&self, offset: usize) -> Result<u128, FrameError> {
        self.array::<16>(offset).map(u128::from_le_bytes)
    }
}

/// One extension record found in a chain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Record {
    pub magic: u32,
    /// Offset of the header within the frame buffer
    pub offset: usize,
    pub size: u32,
}

/// Validating walker over one or more record areas of a frame
///
/// Keeps state across areas so that duplicate detection and the record
/// budget cover a chain that continues into an extra area.
pub struct RecordWalker<'k> {
    known: &'k [u32],
    seen: Vec<u32>,
    count: usize,
    align: usize,
}

impl<'k> RecordWalker<'k> {
    /// `known` lists every magic the profile accepts; `align` is the
    /// required alignment of each record's offset and size.
    pub fn new(known: &'k [u32], align: usize) -> Self {
        RecordWalker {
            known,
            seen: Vec::new(),
            count: 0,
            align: align.max(1),
        }
    }

    /// Walk `[start, limit)` of `reader` up to and including its terminator
    ///
    /// Returns the records in chain order. Fails on unknown or duplicate
    /// magic, sizes below the header or off alignment, records crossing
    /// `limit`, an over-long chain, or a missing terminator.
    pub fn walk(
        &mut self,
        reader: &FrameReader<'_>,
        start: usize,
        limit: usize,
    ) -> Result<Vec<Record>, FrameError> {
        let limit = limit.min(reader.len());
        let mut records = Vec::new();
        let mut offset = start;

        loop {
            if offset % self.align != 0 {
                return Err(FrameError::ChainOverrun { offset });
            }
            if offset + RECORD_HEADER_SIZE > limit {
                return Err(FrameError::MissingTerminator);
            }
            let magic = reader.u32(offset)?;
            let size = reader.u32(offset + 4)?;

            if magic == 0 {
                if size != 0 {
                    return Err(FrameError::BadRecordSize { magic, size });
                }
                return Ok(records);
            }

            self.count += 1;
            if self.count > MAX_RECORDS {
                return Err(FrameError::TooManyRecords);
            }
            if !self.known.contains(&magic) {
                return Err(FrameError::UnknownRecord { magic, offset });
            }
            if self.seen.contains(&magic) {
                return Err(FrameError::DuplicateRecord { magic });
            }
            if (size as usize) < RECORD_HEADER_SIZE || size as usize % self.align != 0 {
                return Err(FrameError::BadRecordSize { magic, size });
            }
            if limit - offset < size as usize {
                return Err(FrameError::ChainOverrun { offset });
            }

            self.seen.push(magic);
            records.push(Record {
                magic,
                offset,
                size,
            });
            offset += size as usize;
        }
    }
}

/// Round `value` up to a power-of-two `align`
#[inline]
pub const fn align_up(value: u64, align: u64) -> u64 {
    (value + align - 1) & !(align - 1)
}

/// Round `value` down to a power-of-two `align`
#[inline]
pub const fn align_down(value: u64, align: u64) -> u64 {
    value & !(align - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    const A: u32 = 0x4141_0001;
    const B: u32 = 0x4242_0002;

    fn chain(records: &[(u32, u32)], area: usize) -> Vec<u8> {
        let mut buf = vec![0u8; area];
        let mut w = FrameWriter::new(&mut buf);
        let mut off = 0;
        for &(magic, size) in records {
            w.put_record_header(off, magic, size).unwrap();
            off += size.max(16) as usize;
        }
        buf
    }

    #[test]
    fn test_walk_well_formed_chain() {
        let buf = chain(&[(A, 32), (B, 16)], 128);
        let mut walker = RecordWalker::new(&[A, B], 16);
        let records = walker.walk(&FrameReader::new(&buf), 0, 128).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!((records[1].magic, records[1].offset), (B, 32));
        assert_eq!(records[1].size, 16);
    }

    #[test]
    fn test_walk_rejects_unknown_and_duplicate() {
        let buf = chain(&[(0x1234_5678, 16)], 64);
        let mut walker = RecordWalker::new(&[A], 16);
        let err = walker.walk(&FrameReader::new(&buf), 0, 64).unwrap_err();
        assert!(matches!(err, FrameError::UnknownRecord { offset: 0, .. }));

        let buf = chain(&[(A, 16), (A, 16)], 64);
        let mut walker = RecordWalker::new(&[A], 16);
        assert_eq!(
            walker.walk(&FrameReader::new(&buf), 0, 64),
            Err(FrameError::DuplicateRecord { magic: A })
        );
    }

    #[test]
    fn test_walk_rejects_overrun() {
        // Second record claims more than is left in the area
        let buf = chain(&[(A, 16), (B, 256)], 64);
        let mut walker = RecordWalker::new(&[A, B], 16);
        assert_eq!(
            walker.walk(&FrameReader::new(&buf), 0, 64),
            Err(FrameError::ChainOverrun { offset: 16 })
        );
    }

    #[test]
    fn test_walk_requires_terminator() {
        let buf = chain(&[(A, 16), (B, 16)], 32);
        let mut walker = RecordWalker::new(&[A, B], 16);
        assert_eq!(
            walker.walk(&FrameReader::new(&buf), 0, 32),
            Err(FrameError::MissingTerminator)
        );
    }

    #[test]
    fn test_walk_rejects_tiny_record() {
        let buf = chain(&[(A, 4)], 64);
        let mut walker = RecordWalker::new(&[A], 4);
        assert_eq!(
            walker.walk(&FrameReader::new(&buf), 0, 64),
            Err(FrameError::BadRecordSize { magic: A, size: 4 })
        );
    }

    #[test]
    fn test_reader_bounds() {
        let buf = [0u8; 8];
        let r = FrameReader::new(&buf);
        assert!(r.u64(0).is_ok());
        assert_eq!(r.u64(1), Err(FrameError::Truncated { offset: 1 }));
        let end = usize::MAX;
        assert_eq!(r.u32(end), Err(FrameError::Truncated { offset: end }));
    }
}
