use std::fmt;
use std::ops::{BitOr, BitOrAssign};

use crate::error::PoolError;

/// Flags describing what a buffer carries.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct BufferFlags(u8);

impl BufferFlags {
    pub const EMPTY: Self = Self(0);
    /// Codec configuration data (SPS/PPS).
    pub const CONFIG: Self = Self(1 << 0);
    pub const FRAME_START: Self = Self(1 << 1);
    /// Last buffer of a logical frame.
    pub const FRAME_END: Self = Self(1 << 2);
    pub const KEYFRAME: Self = Self(1 << 3);
    /// Motion-vector side information for the preceding frame.
    pub const SIDE_INFO: Self = Self(1 << 4);

    const NAMES: [(Self, &'static str); 5] = [
        (Self::CONFIG, "CONFIG"),
        (Self::FRAME_START, "FRAME_START"),
        (Self::FRAME_END, "FRAME_END"),
        (Self::KEYFRAME, "KEYFRAME"),
        (Self::SIDE_INFO, "SIDE_INFO"),
    ];

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn from_bits(bits: u8) -> Self {
        Self(bits & 0x1F)
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: Self) {
        self.0 &= !other.0;
    }
}

impl BitOr for BufferFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for BufferFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for BufferFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("(none)");
        }
        let mut first = true;
        for (flag, name) in Self::NAMES {
            if self.contains(flag) {
                if !first {
                    f.write_str("|")?;
                }
                f.write_str(name)?;
                first = false;
            }
        }
        Ok(())
    }
}

/// A fixed-capacity codec buffer.
///
/// Neither `Clone` nor `Copy`: whoever holds the value owns the
/// buffer, and handing it to the hardware or back to the pool moves it.
pub struct Buffer {
    id: u32,
    pool_id: u64,
    data: Box<[u8]>,
    len: usize,
    flags: BufferFlags,
}

impl Buffer {
    pub(crate) fn new(id: u32, pool_id: u64, capacity: usize) -> Self {
        Self {
            id,
            pool_id,
            data: vec![0u8; capacity].into_boxed_slice(),
            len: 0,
            flags: BufferFlags::EMPTY,
        }
    }

    /// Index of this buffer within its pool.
    pub fn id(&self) -> u32 {
        self.id
    }

    pub(crate) fn pool_id(&self) -> u64 {
        self.pool_id
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Filled length.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn flags(&self) -> BufferFlags {
        self.flags
    }

    pub fn set_flags(&mut self, flags: BufferFlags) {
        self.flags = flags;
    }

    /// Filled bytes.
    pub fn data(&self) -> &[u8] {
        &self.data[..self.len]
    }

    /// Replace the contents with `bytes` and set `flags`.
    pub fn fill(&mut self, bytes: &[u8], flags: BufferFlags) -> Result<(), PoolError> {
        if bytes.len() > self.data.len() {
            return Err(PoolError::BufferOverflow {
                len: bytes.len(),
                capacity: self.data.len(),
            });
        }
        self.data[..bytes.len()].copy_from_slice(bytes);
        self.len = bytes.len();
        self.flags = flags;
        Ok(())
    }

    /// Reset filled length and flags.
    pub fn clear(&mut self) {
        self.len = 0;
        self.flags = BufferFlags::EMPTY;
    }
}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buffer")
            .field("id", &self.id)
            .field("pool", &self.pool_id)
            .field("len", &self.len)
            .field("capacity", &self.data.len())
            .field("flags", &self.flags)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_compose_and_format() {
        let mut flags = BufferFlags::FRAME_END | BufferFlags::KEYFRAME;
        assert!(flags.contains(BufferFlags::FRAME_END));
        assert!(!flags.contains(BufferFlags::CONFIG));
        flags.insert(BufferFlags::CONFIG);
        flags.remove(BufferFlags::KEYFRAME);
        assert_eq!(format!("{flags:?}"), "CONFIG|FRAME_END");
        assert_eq!(format!("{:?}", BufferFlags::EMPTY), "(none)");
    }

    #[test]
    fn fill_respects_capacity() {
        let mut buffer = Buffer::new(0, 1, 4);
        buffer.fill(b"abcd", BufferFlags::FRAME_END).unwrap();
        assert_eq!(buffer.data(), b"abcd");

        let err = buffer.fill(b"abcde", BufferFlags::EMPTY).unwrap_err();
        assert!(matches!(err, PoolError::BufferOverflow { len: 5, capacity: 4 }));
        assert_eq!(buffer.data(), b"abcd");

        buffer.clear();
        assert!(buffer.is_empty());
        assert!(buffer.flags().is_empty());
    }
}
