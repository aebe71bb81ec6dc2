//! Decoder component that writes the elementary stream out.

use std::io::Write;
use std::sync::Arc;

use camstream_pipeline::{Buffer, BufferFlags, BufferPool, HardwareError, HardwarePort, Parameter};
use tracing::debug;

/// Consumes each buffer as soon as it arrives and gives it back to the pool.
pub struct DecoderSink<W> {
    output: W,
    pool: Arc<BufferPool>,
    enabled: bool,
    bytes_written: u64,
}

impl<W: Write> DecoderSink<W> {
    pub fn new(output: W, pool: Arc<BufferPool>) -> Self {
        Self {
            output,
            pool,
            enabled: true,
            bytes_written: 0,
        }
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }
}

impl<W: Write + Send> HardwarePort for DecoderSink<W> {
    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn send_buffer(&mut self, buffer: Buffer) -> Result<(), HardwareError> {
        if !self.enabled {
            return Err(HardwareError::PortDisabled);
        }
        let written = self.output.write_all(buffer.data());
        let frame_end = buffer.flags().contains(BufferFlags::FRAME_END);
        let len = buffer.len();
        self.pool
            .release(buffer)
            .map_err(|err| HardwareError::Component(err.to_string()))?;
        written?;

        self.bytes_written += len as u64;
        if frame_end {
            self.output.flush()?;
        }
        Ok(())
    }

    fn enable(&mut self) -> Result<(), HardwareError> {
        self.enabled = true;
        Ok(())
    }

    fn disable(&mut self) -> Result<Vec<Buffer>, HardwareError> {
        self.enabled = false;
        self.output.flush()?;
        Ok(Vec::new())
    }

    fn set_parameter(&mut self, parameter: Parameter) -> Result<(), HardwareError> {
        debug!(?parameter, "decoder ignores parameter");
        Ok(())
    }
}
