use bytes::Bytes;
use tracing::debug;

use crate::buffer::Buffer;
use crate::error::{PipelineError, RetentionError};
use crate::motion::{score_side_info, MacroblockGrid, MotionScore};
use crate::reassembly::{FrameReassembler, LogicalFrame, LogicalUnit, Step};
use crate::retention::{Decision, RetentionEngine, RetentionStats};

/// Something to put on the wire.
#[derive(Debug)]
pub enum Outbound {
    Config(Buffer),
    Frame(LogicalFrame),
    /// A frame that was held and copied out of its buffers.
    Retained(Bytes),
    Motion(MotionScore),
}

/// Result of feeding one buffer to the processor.
#[derive(Debug)]
pub enum Action {
    Forward(Vec<Outbound>),
    /// Nothing to send yet; the data is held.
    Hold,
    /// The buffer carried nothing worth sending.
    Drop,
    Fatal(PipelineError),
}

/// A frame waiting for its motion side information, copied out of its
/// buffers so the encoder can keep delivering.
#[derive(Debug)]
struct Staged {
    keyframe: bool,
}

/// Per-buffer encode logic: reassembly, motion scoring and retention.
///
/// Buffers that no longer carry anything to send are collected and must be
/// taken with [`drain_spent`](Self::drain_spent) after every call.
#[derive(Debug)]
pub struct StreamProcessor {
    reassembler: FrameReassembler,
    retention: Option<RetentionEngine>,
    grid: MacroblockGrid,
    side_channel: bool,
    staging: Vec<u8>,
    staged: Option<Staged>,
    spent: Vec<Buffer>,
}

impl StreamProcessor {
    pub fn new(grid: MacroblockGrid) -> Self {
        Self {
            reassembler: FrameReassembler::new(),
            retention: None,
            grid,
            side_channel: false,
            staging: Vec::new(),
            staged: None,
            spent: Vec::new(),
        }
    }

    /// Enable motion-gated retention with a `scratch_capacity` arena.
    pub fn with_retention(mut self, threshold: u8, scratch_capacity: usize) -> Self {
        self.retention = Some(RetentionEngine::new(threshold, scratch_capacity));
        self.staging = Vec::with_capacity(scratch_capacity);
        self
    }

    /// Whether side information follows each frame.
    pub fn set_side_channel(&mut self, enabled: bool) {
        self.side_channel = enabled;
    }

    pub fn retention_stats(&self) -> RetentionStats {
        self.retention
            .as_ref()
            .map(RetentionEngine::stats)
            .unwrap_or_default()
    }

    pub fn on_buffer(&mut self, buffer: Buffer) -> Action {
        match self.step(buffer) {
            Ok(Some(out)) if out.is_empty() => Action::Hold,
            Ok(Some(out)) => Action::Forward(out),
            Ok(None) => Action::Drop,
            Err(err) => Action::Fatal(err),
        }
    }

    /// Buffers that can go back to the pool.
    pub fn drain_spent(&mut self) -> Vec<Buffer> {
        std::mem::take(&mut self.spent)
    }

    /// End of stream: settle a staged frame and give up every buffer.
    pub fn finish(&mut self) -> Result<Vec<Outbound>, PipelineError> {
        let out = self.settle_staged()?;
        if let Some(buffer) = self.reassembler.take_pending() {
            self.spent.push(buffer);
        }
        Ok(out)
    }

    fn step(&mut self, buffer: Buffer) -> Result<Option<Vec<Outbound>>, PipelineError> {
        let step = match self.reassembler.push(buffer) {
            Ok(step) => step,
            Err(err) => {
                self.spent.extend(self.reassembler.take_rejected());
                return Err(err.into());
            }
        };
        match step {
            Step::Held => Ok(Some(Vec::new())),
            Step::Discard(buffer) => {
                self.spent.push(buffer);
                Ok(None)
            }
            Step::Emit(LogicalUnit::Config(buffer)) => {
                let mut out = self.settle_staged()?;
                out.push(Outbound::Config(buffer));
                Ok(Some(out))
            }
            Step::Emit(LogicalUnit::Frame(frame)) => {
                let mut out = self.settle_staged()?;
                self.on_frame(frame, &mut out)?;
                Ok(Some(out))
            }
            Step::Emit(LogicalUnit::SideInfo(buffer)) => {
                let score = score_side_info(buffer.data(), self.grid);
                self.spent.push(buffer);
                let mut out = Vec::new();
                if self.staged.is_some() {
                    self.evaluate_staged(Some(score), &mut out)?;
                }
                out.push(Outbound::Motion(score));
                Ok(Some(out))
            }
        }
    }

    fn on_frame(&mut self, frame: LogicalFrame, out: &mut Vec<Outbound>) -> Result<(), PipelineError> {
        let keyframe = frame.is_keyframe();
        let Some(engine) = self.retention.as_mut() else {
            out.push(Outbound::Frame(frame));
            return Ok(());
        };

        if self.side_channel && engine.needs_score(keyframe) {
            let len = frame.len();
            let capacity = engine.scratch_capacity();
            if len > capacity {
                self.spent.extend(frame.into_buffers());
                return Err(RetentionError::ScratchOverflow { len, capacity }.into());
            }
            self.staging.clear();
            for chunk in frame.chunks() {
                self.staging.extend_from_slice(chunk);
            }
            self.spent.extend(frame.into_buffers());
            self.staged = Some(Staged { keyframe });
            debug!(len, "frame staged for motion score");
            return Ok(());
        }

        let decision = engine.evaluate(&frame.chunks(), keyframe, None)?;
        match decision {
            Decision::Retain { flushed } => {
                if let Some(bytes) = flushed {
                    out.push(Outbound::Retained(bytes));
                }
                out.push(Outbound::Frame(frame));
            }
            Decision::Hold => self.spent.extend(frame.into_buffers()),
        }
        Ok(())
    }

    /// A staged frame whose side information never came is judged without
    /// a score.
    fn settle_staged(&mut self) -> Result<Vec<Outbound>, PipelineError> {
        let mut out = Vec::new();
        if self.staged.is_some() {
            debug!("side information missing for staged frame");
            self.evaluate_staged(None, &mut out)?;
        }
        Ok(out)
    }

    fn evaluate_staged(
        &mut self,
        score: Option<MotionScore>,
        out: &mut Vec<Outbound>,
    ) -> Result<(), PipelineError> {
        let (Some(staged), Some(engine)) = (self.staged.take(), self.retention.as_mut()) else {
            return Ok(());
        };
        let decision = engine.evaluate(&[self.staging.as_slice()], staged.keyframe, score)?;
        if let Decision::Retain { flushed } = decision {
            if let Some(bytes) = flushed {
                out.push(Outbound::Retained(bytes));
            }
            out.push(Outbound::Retained(Bytes::copy_from_slice(&self.staging)));
        }
        self.staging.clear();
        Ok(())
    }
}
