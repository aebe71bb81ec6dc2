use bytes::Bytes;
use serde::Serialize;
use tracing::debug;

use crate::error::RetentionError;
use crate::motion::MotionScore;

/// Outcome for one frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Persist the current frame, after `flushed` if a held frame was
    /// released by this decision.
    Retain { flushed: Option<Bytes> },
    /// The frame replaced the pending entry and is not persisted now.
    Hold,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RetentionStats {
    /// Frames persisted, including flushed pending frames.
    pub retained: u64,
    /// Inter-frames held because their motion stayed at or below threshold.
    pub skipped: u64,
    /// Pending frames persisted because the next frame showed motion.
    pub flushed: u64,
    /// Pending frames overwritten or dropped at a key frame.
    pub discarded: u64,
}

/// Motion-gated retention.
///
/// Holds at most one frame in an arena allocated once at construction.
/// Decisions depend only on the inputs; there is no clock.
#[derive(Debug)]
pub struct RetentionEngine {
    threshold: u8,
    scratch: Box<[u8]>,
    pending_len: Option<usize>,
    previous_key: bool,
    stats: RetentionStats,
}

impl RetentionEngine {
    pub fn new(threshold: u8, scratch_capacity: usize) -> Self {
        Self {
            threshold,
            scratch: vec![0u8; scratch_capacity].into_boxed_slice(),
            pending_len: None,
            previous_key: false,
            stats: RetentionStats::default(),
        }
    }

    pub fn threshold(&self) -> u8 {
        self.threshold
    }

    pub fn scratch_capacity(&self) -> usize {
        self.scratch.len()
    }

    pub fn stats(&self) -> RetentionStats {
        self.stats
    }

    pub fn has_pending(&self) -> bool {
        self.pending_len.is_some()
    }

    /// Whether [`evaluate`](Self::evaluate) will look at a score for this frame.
    pub fn needs_score(&self, keyframe: bool) -> bool {
        !keyframe && !self.previous_key
    }

    /// Decide what happens to one frame given as contiguous chunks.
    ///
    /// A missing score counts as no motion.
    pub fn evaluate(
        &mut self,
        chunks: &[&[u8]],
        keyframe: bool,
        score: Option<MotionScore>,
    ) -> Result<Decision, RetentionError> {
        if keyframe {
            if self.pending_len.take().is_some() {
                self.stats.discarded += 1;
            }
            self.previous_key = true;
            self.stats.retained += 1;
            return Ok(Decision::Retain { flushed: None });
        }

        if self.previous_key {
            // No motion data is meaningful right after a key frame.
            self.previous_key = false;
            self.hold(chunks)?;
            return Ok(Decision::Hold);
        }

        let score = score.unwrap_or_default();
        if score.0 > self.threshold {
            let flushed = self.pending_len.take().map(|len| {
                self.stats.flushed += 1;
                self.stats.retained += 1;
                Bytes::copy_from_slice(&self.scratch[..len])
            });
            self.stats.retained += 1;
            debug!(score = score.0, flushed = flushed.is_some(), "motion above threshold");
            return Ok(Decision::Retain { flushed });
        }

        if self.pending_len.is_some() {
            self.stats.discarded += 1;
        }
        self.hold(chunks)?;
        self.stats.skipped += 1;
        Ok(Decision::Hold)
    }

    /// Drop any pending entry.
    pub fn clear(&mut self) {
        if self.pending_len.take().is_some() {
            self.stats.discarded += 1;
        }
    }

    fn hold(&mut self, chunks: &[&[u8]]) -> Result<(), RetentionError> {
        let len: usize = chunks.iter().map(|chunk| chunk.len()).sum();
        if len > self.scratch.len() {
            return Err(RetentionError::ScratchOverflow {
                len,
                capacity: self.scratch.len(),
            });
        }
        let mut offset = 0;
        for chunk in chunks {
            self.scratch[offset..offset + chunk.len()].copy_from_slice(chunk);
            offset += chunk.len();
        }
        self.pending_len = Some(len);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inter(engine: &mut RetentionEngine, payload: &[u8], score: u8) -> Decision {
        engine
            .evaluate(&[payload], false, Some(MotionScore(score)))
            .unwrap()
    }

    #[test]
    fn quiet_frames_are_skipped_until_motion() {
        let mut engine = RetentionEngine::new(5, 1024);
        assert_eq!(
            engine.evaluate(&[b"key"], true, None).unwrap(),
            Decision::Retain { flushed: None }
        );
        assert_eq!(inter(&mut engine, b"first", 0), Decision::Hold);
        assert_eq!(inter(&mut engine, b"second", 0), Decision::Hold);
        assert_eq!(
            inter(&mut engine, b"third", 9),
            Decision::Retain {
                flushed: Some(Bytes::from_static(b"second"))
            }
        );

        let stats = engine.stats();
        assert_eq!(stats.retained, 3);
        assert_eq!(stats.skipped, 1);
        assert_eq!(stats.flushed, 1);
        assert_eq!(stats.discarded, 1);
    }

    #[test]
    fn frame_after_key_is_held_without_score() {
        let mut engine = RetentionEngine::new(5, 64);
        engine.evaluate(&[b"key"], true, None).unwrap();
        assert!(!engine.needs_score(false));
        assert_eq!(inter(&mut engine, b"after-key", 200), Decision::Hold);
        assert_eq!(engine.stats().skipped, 0);
        assert!(engine.has_pending());
        assert!(engine.needs_score(false));
    }

    #[test]
    fn key_frame_discards_pending() {
        let mut engine = RetentionEngine::new(5, 64);
        inter(&mut engine, b"quiet", 1);
        assert!(engine.has_pending());
        engine.evaluate(&[b"key"], true, None).unwrap();
        assert!(!engine.has_pending());
        assert_eq!(engine.stats().discarded, 1);
    }

    #[test]
    fn score_at_threshold_is_not_motion() {
        let mut engine = RetentionEngine::new(5, 64);
        assert_eq!(inter(&mut engine, b"a", 5), Decision::Hold);
        assert_eq!(
            inter(&mut engine, b"b", 6),
            Decision::Retain {
                flushed: Some(Bytes::from_static(b"a"))
            }
        );
        assert_eq!(inter(&mut engine, b"c", 6), Decision::Retain { flushed: None });
    }

    #[test]
    fn split_chunks_are_held_contiguously() {
        let mut engine = RetentionEngine::new(5, 64);
        engine
            .evaluate(&[b"hea", b"d+tail"], false, Some(MotionScore(0)))
            .unwrap();
        let decision = inter(&mut engine, b"next", 50);
        assert_eq!(
            decision,
            Decision::Retain {
                flushed: Some(Bytes::from_static(b"head+tail"))
            }
        );
    }

    #[test]
    fn oversized_frame_overflows_scratch() {
        let mut engine = RetentionEngine::new(5, 8);
        let err = engine
            .evaluate(&[&[0u8; 9]], false, Some(MotionScore(0)))
            .unwrap_err();
        assert!(matches!(
            err,
            RetentionError::ScratchOverflow { len: 9, capacity: 8 }
        ));
    }

    #[test]
    fn missing_score_counts_as_quiet() {
        let mut engine = RetentionEngine::new(0, 64);
        assert_eq!(engine.evaluate(&[b"x"], false, None).unwrap(), Decision::Hold);
        assert_eq!(engine.stats().skipped, 1);
    }
}
