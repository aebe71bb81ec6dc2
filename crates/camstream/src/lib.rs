//! Hardware H.264 camera streaming.
//!
//! camstream moves encoded video between a hardware codec and a single
//! network peer: buffer recycling, split-frame reassembly, motion-gated
//! retention and three wire framings.
//!
//! # Crate Structure
//!
//! - [`transport`]: Single-accept listener and retrying connector (TCP, UDP)
//! - [`frame`]: Raw, length-prefixed and typed wire framing
//! - [`pipeline`]: Buffer pool, reassembly, retention and the encode/decode pipelines

/// Re-export transport types.
pub mod transport {
    pub use camstream_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use camstream_frame::*;
}

/// Re-export pipeline types.
pub mod pipeline {
    pub use camstream_pipeline::*;
}
