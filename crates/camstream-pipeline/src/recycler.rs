use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, info};

use crate::buffer::Buffer;
use crate::error::{PoolError, Result};
use crate::hardware::{HardwarePort, Parameter};
use crate::pool::{AcquireMode, BufferPool};

/// Moves buffers between a [`BufferPool`] and a hardware port.
///
/// Cloning is cheap and shares the pool and the port; the encode path and
/// the control thread each hold one.
pub struct BufferRecycler<P> {
    pool: Arc<BufferPool>,
    port: Arc<Mutex<P>>,
    mode: AcquireMode,
}

impl<P> Clone for BufferRecycler<P> {
    fn clone(&self) -> Self {
        Self {
            pool: Arc::clone(&self.pool),
            port: Arc::clone(&self.port),
            mode: self.mode,
        }
    }
}

impl<P: HardwarePort> BufferRecycler<P> {
    pub fn new(pool: Arc<BufferPool>, port: Arc<Mutex<P>>, mode: AcquireMode) -> Self {
        Self { pool, port, mode }
    }

    pub fn pool(&self) -> &Arc<BufferPool> {
        &self.pool
    }

    pub fn port(&self) -> &Arc<Mutex<P>> {
        &self.port
    }

    pub fn acquire_mode(&self) -> AcquireMode {
        self.mode
    }

    /// Lock the port for direct access.
    pub fn lock_port(&self) -> MutexGuard<'_, P> {
        self.port.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Hand every available buffer to the port if it is enabled.
    ///
    /// Returns the number of buffers sent.
    pub fn prime(&self) -> Result<usize> {
        let mut port = self.lock_port();
        self.send_available(&mut port)
    }

    /// Re-arm after a re-enable; same as [`prime`](Self::prime).
    pub fn rearm(&self) -> Result<usize> {
        self.prime()
    }

    /// Return a spent buffer to the pool and, if the port is enabled, hand
    /// one available buffer straight back to it.
    ///
    /// The port lock is taken before the release so a concurrent
    /// [`reconfigure`](Self::reconfigure) cannot re-arm the port with the
    /// returned buffer in between.
    pub fn release_and_refill(&self, buffer: Buffer) -> Result<()> {
        let mut port = self.lock_port();
        self.pool.release(buffer)?;
        if !port.is_enabled() {
            return Ok(());
        }
        let empty = self.pool.acquire_empty(self.mode)?;
        port.send_buffer(empty)?;
        Ok(())
    }

    /// Return a buffer to the pool without refilling the port.
    pub fn release(&self, buffer: Buffer) -> Result<()> {
        self.pool.release(buffer).map_err(Into::into)
    }

    /// Stop capture, disable the port, apply `change`, then re-enable,
    /// re-arm and restart capture. The port lock is held throughout.
    pub fn reconfigure<F, R>(&self, change: F) -> Result<R>
    where
        F: FnOnce(&mut P) -> std::result::Result<R, crate::error::HardwareError>,
    {
        let mut port = self.lock_port();
        port.set_parameter(Parameter::Capture(false))?;
        let reclaimed = self.reclaim(&mut port)?;

        let outcome = change(&mut port)?;

        port.enable()?;
        let sent = self.send_available(&mut port)?;
        port.set_parameter(Parameter::Capture(true))?;
        info!(reclaimed, sent, "port reconfigured");
        Ok(outcome)
    }

    /// Disable the port and return everything it held to the pool.
    pub fn shutdown(&self) -> Result<usize> {
        let mut port = self.lock_port();
        let reclaimed = self.reclaim(&mut port)?;
        debug!(reclaimed, "port shut down");
        Ok(reclaimed)
    }

    fn reclaim(&self, port: &mut P) -> Result<usize> {
        let held = port.disable()?;
        let count = held.len();
        for buffer in held {
            self.pool.release(buffer)?;
        }
        Ok(count)
    }

    fn send_available(&self, port: &mut P) -> Result<usize> {
        if !port.is_enabled() {
            return Ok(0);
        }
        let mut sent = 0usize;
        loop {
            match self.pool.acquire_empty(AcquireMode::NonBlocking) {
                Ok(buffer) => {
                    port.send_buffer(buffer)?;
                    sent += 1;
                }
                Err(PoolError::Exhausted { .. }) => break,
                Err(err) => return Err(err.into()),
            }
        }
        debug!(sent, "buffers handed to port");
        Ok(sent)
    }
}
