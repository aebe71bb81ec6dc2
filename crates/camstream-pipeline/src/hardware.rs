use crate::buffer::Buffer;
use crate::control::CropDirection;
use crate::error::HardwareError;

/// Parameters the pipeline may set on a hardware component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Parameter {
    /// Sensor gain (ISO).
    Iso(u32),
    /// Shutter speed in microseconds.
    ShutterSpeed(u32),
    /// Emit per-macroblock motion vectors after each frame.
    InlineMotionVectors(bool),
    /// On-frame annotation text; `None` clears it.
    Annotate(Option<String>),
    /// Move or zoom the crop window.
    Crop(CropDirection),
    /// Start or stop capture.
    Capture(bool),
}

/// Contract of a hardware codec port.
///
/// The port owns every buffer handed to it with [`send_buffer`] until it
/// delivers the buffer back (filled, through the pipeline's `on_buffer`) or
/// returns it from [`disable`].
///
/// [`send_buffer`]: HardwarePort::send_buffer
/// [`disable`]: HardwarePort::disable
pub trait HardwarePort: Send {
    fn is_enabled(&self) -> bool;

    /// Hand an empty (encoder) or filled (decoder) buffer to the port.
    fn send_buffer(&mut self, buffer: Buffer) -> Result<(), HardwareError>;

    fn enable(&mut self) -> Result<(), HardwareError>;

    /// Disable the port and return all buffers it still held.
    fn disable(&mut self) -> Result<Vec<Buffer>, HardwareError>;

    fn set_parameter(&mut self, parameter: Parameter) -> Result<(), HardwareError>;
}
