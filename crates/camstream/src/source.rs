//! Encoder component backed by an Annex-B file.
//!
//! Stands in for the camera's hardware encoder: it fills the empty buffers
//! the pipeline hands it with NAL units read from the input, flags them the
//! way the hardware does and, while inline motion vectors are on, follows
//! each frame with a side-information buffer.

use std::collections::VecDeque;
use std::io::Read;

use camstream_pipeline::motion::VECTOR_RECORD_SIZE;
use camstream_pipeline::{
    Buffer, BufferFlags, HardwareError, HardwarePort, MacroblockGrid, Parameter,
};
use tracing::{debug, info};

use crate::h264::{AnnexBReader, NalKind};

/// Outcome of asking the encoder for its next filled buffer.
#[derive(Debug)]
pub enum Delivery {
    Filled(Buffer),
    /// Disabled or not capturing.
    Paused,
    /// Input exhausted.
    Finished,
}

struct Pending {
    data: Vec<u8>,
    offset: usize,
    flags: BufferFlags,
}

pub struct SimulatedEncoder<R> {
    units: AnnexBReader<R>,
    grid: MacroblockGrid,
    empties: VecDeque<Buffer>,
    enabled: bool,
    capturing: bool,
    motion_vectors: bool,
    /// Non-slice units waiting to be prepended to the next slice.
    prefix: Vec<u8>,
    pending: Option<Pending>,
    side_info: Option<Vec<u8>>,
}

impl<R: Read> SimulatedEncoder<R> {
    /// A disabled encoder reading from `input`.
    pub fn new(input: R, grid: MacroblockGrid) -> Self {
        Self {
            units: AnnexBReader::new(input),
            grid,
            empties: VecDeque::new(),
            enabled: false,
            capturing: false,
            motion_vectors: false,
            prefix: Vec::new(),
            pending: None,
            side_info: None,
        }
    }

    /// Fill the next buffer, if the encoder has anything to say.
    pub fn poll(&mut self) -> Result<Delivery, HardwareError> {
        if !self.enabled || !self.capturing {
            return Ok(Delivery::Paused);
        }
        if let Some(payload) = self.side_info.take() {
            let buffer = self.fill(&payload, BufferFlags::SIDE_INFO)?;
            return Ok(Delivery::Filled(buffer));
        }
        if self.pending.is_none() && !self.load_next()? {
            return Ok(Delivery::Finished);
        }
        self.deliver_pending().map(Delivery::Filled)
    }

    /// Read units until there is a frame or parameter set to deliver.
    fn load_next(&mut self) -> Result<bool, HardwareError> {
        loop {
            let Some(unit) = self.units.next_unit()? else {
                if self.prefix.is_empty() {
                    return Ok(false);
                }
                let data = std::mem::take(&mut self.prefix);
                return self.stage(data, BufferFlags::FRAME_END).map(|()| true);
            };

            match unit.kind {
                kind if kind.is_parameter_set() => {
                    return self
                        .stage(unit.data, BufferFlags::CONFIG | BufferFlags::FRAME_END)
                        .map(|()| true);
                }
                kind if kind.is_slice() => {
                    let mut data = std::mem::take(&mut self.prefix);
                    data.extend_from_slice(&unit.data);
                    let mut flags = BufferFlags::FRAME_END;
                    if kind == NalKind::Idr {
                        flags.insert(BufferFlags::KEYFRAME);
                    }
                    return self.stage(data, flags).map(|()| true);
                }
                _ => self.prefix.extend_from_slice(&unit.data),
            }
        }
    }

    fn stage(&mut self, data: Vec<u8>, flags: BufferFlags) -> Result<(), HardwareError> {
        let capacity = self.next_capacity()?;
        let limit = if flags.contains(BufferFlags::CONFIG) {
            capacity
        } else {
            capacity * 2
        };
        if data.len() > limit {
            return Err(HardwareError::Rejected {
                operation: "encode",
                reason: format!(
                    "{} byte unit does not fit {limit} bytes of buffer space",
                    data.len()
                ),
            });
        }
        self.pending = Some(Pending {
            data,
            offset: 0,
            flags,
        });
        Ok(())
    }

    fn deliver_pending(&mut self) -> Result<Buffer, HardwareError> {
        let capacity = self.next_capacity()?;
        let Some(mut pending) = self.pending.take() else {
            return Err(HardwareError::Component("no unit staged".into()));
        };

        let end = pending.data.len().min(pending.offset + capacity);
        let last = end == pending.data.len();
        let mut flags = pending.flags;
        if !last {
            flags.remove(BufferFlags::FRAME_END);
        }
        let buffer = self.fill(&pending.data[pending.offset..end], flags)?;

        if last {
            if self.motion_vectors && !pending.flags.contains(BufferFlags::CONFIG) {
                self.side_info = Some(synthesize_side_info(self.grid, &pending.data));
            }
        } else {
            pending.offset = end;
            self.pending = Some(pending);
        }
        Ok(buffer)
    }

    fn fill(&mut self, bytes: &[u8], flags: BufferFlags) -> Result<Buffer, HardwareError> {
        let mut buffer = self
            .empties
            .pop_front()
            .ok_or_else(|| HardwareError::Component("encoder has no empty buffers".into()))?;
        if let Err(err) = buffer.fill(bytes, flags) {
            self.empties.push_front(buffer);
            return Err(HardwareError::Component(err.to_string()));
        }
        debug!(len = bytes.len(), ?flags, "encoder filled buffer");
        Ok(buffer)
    }

    fn next_capacity(&self) -> Result<usize, HardwareError> {
        self.empties
            .front()
            .map(Buffer::capacity)
            .ok_or_else(|| HardwareError::Component("encoder has no empty buffers".into()))
    }
}

impl<R: Read + Send> HardwarePort for SimulatedEncoder<R> {
    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn send_buffer(&mut self, buffer: Buffer) -> Result<(), HardwareError> {
        if !self.enabled {
            return Err(HardwareError::PortDisabled);
        }
        self.empties.push_back(buffer);
        Ok(())
    }

    fn enable(&mut self) -> Result<(), HardwareError> {
        self.enabled = true;
        Ok(())
    }

    fn disable(&mut self) -> Result<Vec<Buffer>, HardwareError> {
        self.enabled = false;
        Ok(self.empties.drain(..).collect())
    }

    fn set_parameter(&mut self, parameter: Parameter) -> Result<(), HardwareError> {
        match parameter {
            Parameter::InlineMotionVectors(on) => {
                if self.enabled {
                    return Err(HardwareError::Rejected {
                        operation: "inline motion vectors",
                        reason: "port must be disabled".into(),
                    });
                }
                self.motion_vectors = on;
            }
            Parameter::Capture(on) => self.capturing = on,
            Parameter::Annotate(text) => {
                debug!(text = text.as_deref().unwrap_or(""), "annotation");
            }
            other => info!(parameter = ?other, "encoder parameter set"),
        }
        Ok(())
    }
}

/// Side information for one frame. Vectors are derived from the frame bytes
/// so identical frames score identically.
fn synthesize_side_info(grid: MacroblockGrid, frame: &[u8]) -> Vec<u8> {
    let mut payload = vec![0u8; grid.side_info_len()];
    if frame.is_empty() {
        return payload;
    }
    let stride = (grid.width + 1) * VECTOR_RECORD_SIZE;
    for row in 0..grid.height {
        for col in 0..grid.width {
            let cell = row * grid.width + col;
            let x = (frame[(2 * cell) % frame.len()] as i8) >> 4;
            let y = (frame[(2 * cell + 1) % frame.len()] as i8) >> 4;
            let at = row * stride + col * VECTOR_RECORD_SIZE;
            payload[at] = x as u8;
            payload[at + 1] = y as u8;
        }
    }
    payload
}
