//! Streaming buffer pipeline for hardware H.264 codecs.
//!
//! Encode direction, per buffer delivered by the encoder:
//!
//! ```text
//! HardwarePort ──► FrameReassembler ──► RetentionEngine ──► FrameWriter ──► socket
//!      ▲                                                                     │
//!      └──────────────── BufferRecycler (release_and_refill) ◄───────────────┘
//! ```
//!
//! The decode direction reads messages from the socket, copies them into
//! pool buffers and hands those to a decoder port.
//!
//! Processing is synchronous on the thread that delivers buffers. A
//! separate thread runs the [`CommandInterpreter`] on the connection's read
//! half; it shares only [`ControlState`] and the port mutex with the
//! encode path.

pub mod buffer;
pub mod config;
pub mod control;
pub mod decode;
pub mod encode;
pub mod error;
pub mod hardware;
pub mod motion;
pub mod pool;
pub mod processor;
pub mod reassembly;
pub mod recycler;
pub mod retention;
pub mod stats;

pub use buffer::{Buffer, BufferFlags};
pub use config::{PoolConfig, RetentionConfig, StreamConfig};
pub use control::{CommandInterpreter, ControlCommand, ControlState, CropDirection};
pub use decode::DecodePipeline;
pub use encode::EncodePipeline;
pub use error::{
    ConfigError, ControlError, HardwareError, PipelineError, PoolError, ReassemblyError, Result,
    RetentionError,
};
pub use hardware::{HardwarePort, Parameter};
pub use motion::{score_motion, score_side_info, MacroblockGrid, MotionScore, MotionVector};
pub use pool::{AcquireMode, BufferPool};
pub use processor::{Action, Outbound, StreamProcessor};
pub use reassembly::{FrameReassembler, LogicalFrame, LogicalUnit, ReassemblyState, Step};
pub use recycler::BufferRecycler;
pub use retention::{Decision, RetentionEngine, RetentionStats};
pub use stats::{DecodeStats, StatsTracker, StreamStats};
