use tracing::debug;

use crate::buffer::{Buffer, BufferFlags};
use crate::error::ReassemblyError;

/// One complete frame: a single buffer, or a split-begin buffer plus the
/// buffer that ended it.
#[derive(Debug)]
pub struct LogicalFrame {
    head: Option<Buffer>,
    tail: Buffer,
}

impl LogicalFrame {
    pub fn single(buffer: Buffer) -> Self {
        Self {
            head: None,
            tail: buffer,
        }
    }

    pub fn split(head: Buffer, tail: Buffer) -> Self {
        Self {
            head: Some(head),
            tail,
        }
    }

    /// Total payload length.
    pub fn len(&self) -> usize {
        self.head.as_ref().map_or(0, Buffer::len) + self.tail.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Union of the flags of all constituent buffers.
    pub fn flags(&self) -> BufferFlags {
        self.head
            .as_ref()
            .map_or(BufferFlags::EMPTY, Buffer::flags)
            | self.tail.flags()
    }

    pub fn is_keyframe(&self) -> bool {
        self.flags().contains(BufferFlags::KEYFRAME)
    }

    pub fn is_split(&self) -> bool {
        self.head.is_some()
    }

    /// Payload as contiguous chunks, in order. The head chunk is empty for
    /// single-buffer frames.
    pub fn chunks(&self) -> [&[u8]; 2] {
        [
            self.head.as_ref().map_or(&[] as &[u8], Buffer::data),
            self.tail.data(),
        ]
    }

    /// Give up the buffers so they can be released.
    pub fn into_buffers(self) -> impl Iterator<Item = Buffer> {
        self.head.into_iter().chain(std::iter::once(self.tail))
    }
}

/// Output of one reassembly step.
#[derive(Debug)]
pub enum LogicalUnit {
    /// Codec configuration; never part of a frame.
    Config(Buffer),
    Frame(LogicalFrame),
    /// Motion vectors belonging to the most recently emitted frame.
    SideInfo(Buffer),
}

#[derive(Debug)]
pub enum Step {
    Emit(LogicalUnit),
    /// The buffer is held as a split-begin.
    Held,
    /// The buffer carried nothing and should be released.
    Discard(Buffer),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReassemblyState {
    Idle,
    Accumulating,
}

/// Stitches split buffer deliveries into logical frames.
#[derive(Debug, Default)]
pub struct FrameReassembler {
    pending: Option<Buffer>,
    rejected: Vec<Buffer>,
}

impl FrameReassembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> ReassemblyState {
        if self.pending.is_some() {
            ReassemblyState::Accumulating
        } else {
            ReassemblyState::Idle
        }
    }

    /// Feed one buffer from the hardware.
    pub fn push(&mut self, buffer: Buffer) -> Result<Step, ReassemblyError> {
        let flags = buffer.flags();
        if buffer.is_empty() {
            debug!(id = buffer.id(), ?flags, "empty buffer");
            return Ok(Step::Discard(buffer));
        }
        if flags.contains(BufferFlags::CONFIG) {
            return Ok(Step::Emit(LogicalUnit::Config(buffer)));
        }
        if flags.contains(BufferFlags::SIDE_INFO) {
            return Ok(Step::Emit(LogicalUnit::SideInfo(buffer)));
        }

        match (self.pending.take(), flags.contains(BufferFlags::FRAME_END)) {
            (None, true) => Ok(Step::Emit(LogicalUnit::Frame(LogicalFrame::single(buffer)))),
            (None, false) => {
                debug!(id = buffer.id(), len = buffer.len(), "split frame begins");
                self.pending = Some(buffer);
                Ok(Step::Held)
            }
            (Some(head), true) => {
                debug!(
                    head = head.len(),
                    tail = buffer.len(),
                    "split frame reassembled"
                );
                Ok(Step::Emit(LogicalUnit::Frame(LogicalFrame::split(
                    head, buffer,
                ))))
            }
            (Some(head), false) => {
                let err = ReassemblyError::UnexpectedSplitBegin {
                    pending: head.flags(),
                    incoming: flags,
                };
                self.rejected.push(head);
                self.rejected.push(buffer);
                Err(err)
            }
        }
    }

    /// Drop any in-progress split-begin, returning it for release.
    pub fn take_pending(&mut self) -> Option<Buffer> {
        self.pending.take()
    }

    /// Buffers involved in the last protocol violation, for release.
    pub fn take_rejected(&mut self) -> Vec<Buffer> {
        std::mem::take(&mut self.rejected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{AcquireMode, BufferPool};

    fn filled(pool: &BufferPool, len: usize, flags: BufferFlags) -> Buffer {
        let mut buffer = pool.acquire_empty(AcquireMode::NonBlocking).unwrap();
        buffer.fill(&vec![0xAB; len], flags).unwrap();
        buffer
    }

    #[test]
    fn split_begin_then_end_is_one_frame() {
        let pool = BufferPool::new(4, 256);
        let mut reassembler = FrameReassembler::new();

        let step = reassembler
            .push(filled(&pool, 100, BufferFlags::FRAME_START))
            .unwrap();
        assert!(matches!(step, Step::Held));
        assert_eq!(reassembler.state(), ReassemblyState::Accumulating);

        let step = reassembler
            .push(filled(&pool, 50, BufferFlags::FRAME_END))
            .unwrap();
        let Step::Emit(LogicalUnit::Frame(frame)) = step else {
            panic!("expected frame");
        };
        assert_eq!(frame.len(), 150);
        assert!(frame.is_split());
        assert_eq!(frame.chunks()[0].len(), 100);
        assert_eq!(frame.chunks()[1].len(), 50);
        assert_eq!(reassembler.state(), ReassemblyState::Idle);
        assert_eq!(frame.into_buffers().count(), 2);
    }

    #[test]
    fn second_split_begin_is_rejected() {
        let pool = BufferPool::new(4, 256);
        let mut reassembler = FrameReassembler::new();

        reassembler
            .push(filled(&pool, 10, BufferFlags::KEYFRAME))
            .unwrap();
        let err = reassembler
            .push(filled(&pool, 10, BufferFlags::EMPTY))
            .unwrap_err();
        let ReassemblyError::UnexpectedSplitBegin { pending, incoming } = err;
        assert_eq!(pending, BufferFlags::KEYFRAME);
        assert_eq!(incoming, BufferFlags::EMPTY);
        assert_eq!(reassembler.state(), ReassemblyState::Idle);

        for buffer in reassembler.take_rejected() {
            pool.release(buffer).unwrap();
        }
        assert_eq!(pool.available(), 4);
        assert_eq!(pool.acquired_count(), pool.released_count());
    }

    #[test]
    fn single_buffer_frame_keeps_keyframe_flag() {
        let pool = BufferPool::new(1, 64);
        let mut reassembler = FrameReassembler::new();
        let step = reassembler
            .push(filled(&pool, 20, BufferFlags::FRAME_END | BufferFlags::KEYFRAME))
            .unwrap();
        let Step::Emit(LogicalUnit::Frame(frame)) = step else {
            panic!("expected frame");
        };
        assert!(frame.is_keyframe());
        assert!(!frame.is_split());
        assert!(frame.chunks()[0].is_empty());
    }

    #[test]
    fn config_and_side_info_bypass_pending_split() {
        let pool = BufferPool::new(4, 64);
        let mut reassembler = FrameReassembler::new();
        reassembler
            .push(filled(&pool, 10, BufferFlags::EMPTY))
            .unwrap();

        let config = reassembler
            .push(filled(&pool, 8, BufferFlags::CONFIG))
            .unwrap();
        assert!(matches!(config, Step::Emit(LogicalUnit::Config(_))));
        let side = reassembler
            .push(filled(&pool, 8, BufferFlags::SIDE_INFO | BufferFlags::FRAME_END))
            .unwrap();
        assert!(matches!(side, Step::Emit(LogicalUnit::SideInfo(_))));
        assert_eq!(reassembler.state(), ReassemblyState::Accumulating);
    }

    #[test]
    fn empty_buffers_are_discarded() {
        let pool = BufferPool::new(1, 64);
        let mut reassembler = FrameReassembler::new();
        let step = reassembler
            .push(filled(&pool, 0, BufferFlags::FRAME_END))
            .unwrap();
        assert!(matches!(step, Step::Discard(_)));
        assert_eq!(reassembler.state(), ReassemblyState::Idle);
    }
}
