use std::io::{BufRead, ErrorKind};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use tracing::{debug, info, warn};

use crate::error::{ControlError, Result};
use crate::hardware::{HardwarePort, Parameter};
use crate::recycler::BufferRecycler;

/// Crop-window movement requested with `move=`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CropDirection {
    Left,
    Right,
    Up,
    Down,
    ZoomIn,
    ZoomOut,
    Reset,
}

impl CropDirection {
    pub fn from_code(code: char) -> Option<Self> {
        match code {
            'l' => Some(Self::Left),
            'r' => Some(Self::Right),
            'u' => Some(Self::Up),
            'd' => Some(Self::Down),
            'i' => Some(Self::ZoomIn),
            'o' => Some(Self::ZoomOut),
            'R' => Some(Self::Reset),
            _ => None,
        }
    }
}

/// One line of the control channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    Iso(u32),
    ShutterSpeed(u32),
    Stats(bool),
    Motion(bool),
    Move(CropDirection),
    /// Arm (non-zero) or disarm (zero) the motion alarm.
    MotionAlarm(u8),
}

impl FromStr for ControlCommand {
    type Err = ControlError;

    fn from_str(line: &str) -> std::result::Result<Self, Self::Err> {
        let line = line.trim();
        let (key, value) = line
            .split_once('=')
            .ok_or_else(|| ControlError::Malformed(line.to_string()))?;
        let (key, value) = (key.trim(), value.trim());
        let invalid = || ControlError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        };

        match key {
            "iso" => value.parse().map(Self::Iso).map_err(|_| invalid()),
            "ss" => value.parse().map(Self::ShutterSpeed).map_err(|_| invalid()),
            "stat" => parse_switch(value).map(Self::Stats).ok_or_else(invalid),
            "motion" => parse_switch(value).map(Self::Motion).ok_or_else(invalid),
            "move" => {
                let mut chars = value.chars();
                match (chars.next(), chars.next()) {
                    (Some(code), None) => CropDirection::from_code(code)
                        .map(Self::Move)
                        .ok_or_else(invalid),
                    _ => Err(invalid()),
                }
            }
            "mot_alarm" => value.parse().map(Self::MotionAlarm).map_err(|_| invalid()),
            other => Err(ControlError::UnknownKey(other.to_string())),
        }
    }
}

fn parse_switch(value: &str) -> Option<bool> {
    match value.parse::<u32>() {
        Ok(0) => Some(false),
        Ok(_) => Some(true),
        Err(_) => None,
    }
}

/// Toggles shared between the control thread and the encode path.
#[derive(Debug, Default)]
pub struct ControlState {
    show_stats: AtomicBool,
    motion_vectors: AtomicBool,
    alarm_threshold: AtomicU8,
    retention: bool,
}

impl ControlState {
    pub fn new(show_stats: bool, motion_vectors: bool, alarm_threshold: u8) -> Self {
        Self {
            show_stats: AtomicBool::new(show_stats),
            motion_vectors: AtomicBool::new(motion_vectors),
            alarm_threshold: AtomicU8::new(alarm_threshold),
            retention: false,
        }
    }

    /// Mark the stream as motion-gated; the side channel then stays on.
    pub fn with_retention(mut self, enabled: bool) -> Self {
        self.retention = enabled;
        self
    }

    pub fn retention(&self) -> bool {
        self.retention
    }

    pub fn show_stats(&self) -> bool {
        self.show_stats.load(Ordering::Relaxed)
    }

    pub fn set_show_stats(&self, on: bool) {
        self.show_stats.store(on, Ordering::Relaxed);
    }

    pub fn motion_vectors(&self) -> bool {
        self.motion_vectors.load(Ordering::Acquire)
    }

    pub fn set_motion_vectors(&self, on: bool) {
        self.motion_vectors.store(on, Ordering::Release);
    }

    pub fn alarm_threshold(&self) -> u8 {
        self.alarm_threshold.load(Ordering::Relaxed)
    }

    pub fn set_alarm_threshold(&self, threshold: u8) {
        self.alarm_threshold.store(threshold, Ordering::Relaxed);
    }
}

/// Applies control commands to the camera and the shared state.
pub struct CommandInterpreter<P> {
    state: Arc<ControlState>,
    recycler: BufferRecycler<P>,
}

impl<P: HardwarePort + 'static> CommandInterpreter<P> {
    pub fn new(state: Arc<ControlState>, recycler: BufferRecycler<P>) -> Self {
        Self { state, recycler }
    }

    pub fn state(&self) -> &Arc<ControlState> {
        &self.state
    }

    pub fn apply(&self, command: ControlCommand) -> Result<()> {
        debug!(?command, "control command");
        match command {
            ControlCommand::Iso(iso) => self.set_parameter(Parameter::Iso(iso)),
            ControlCommand::ShutterSpeed(us) => self.set_parameter(Parameter::ShutterSpeed(us)),
            ControlCommand::Move(direction) => self.set_parameter(Parameter::Crop(direction)),
            ControlCommand::Stats(on) => {
                self.state.set_show_stats(on);
                if !on {
                    self.set_parameter(Parameter::Annotate(None))?;
                }
                Ok(())
            }
            ControlCommand::Motion(on) => {
                if self.state.alarm_threshold() != 0 {
                    warn!(on, "motion toggle ignored while the alarm is armed");
                    return Ok(());
                }
                if !on && self.state.retention() {
                    warn!("motion vectors stay on while retention is enabled");
                    return Ok(());
                }
                self.set_motion_vectors(on)
            }
            ControlCommand::MotionAlarm(threshold) => {
                self.state.set_alarm_threshold(threshold);
                info!(threshold, "motion alarm {}", if threshold != 0 { "armed" } else { "disarmed" });
                self.set_motion_vectors(threshold != 0 || self.state.retention())
            }
        }
    }

    /// Parse and apply one line. Malformed lines are logged and ignored.
    pub fn apply_line(&self, line: &str) -> Result<()> {
        if line.trim().is_empty() {
            return Ok(());
        }
        match line.parse::<ControlCommand>() {
            Ok(command) => self.apply(command),
            Err(err) => {
                warn!(line = line.trim(), error = %err, "ignoring control line");
                Ok(())
            }
        }
    }

    /// Read and apply newline-terminated commands until end of input.
    ///
    /// Read timeouts are not errors; partial lines are kept across them.
    pub fn run<R: BufRead>(&self, mut reader: R) -> Result<()> {
        let mut line = String::new();
        loop {
            match reader.read_line(&mut line) {
                Ok(0) => {
                    self.apply_line(&line)?;
                    debug!("control channel closed");
                    return Ok(());
                }
                Ok(_) if line.ends_with('\n') => {
                    self.apply_line(&line)?;
                    line.clear();
                }
                Ok(_) => {}
                Err(err)
                    if matches!(
                        err.kind(),
                        ErrorKind::Interrupted | ErrorKind::WouldBlock | ErrorKind::TimedOut
                    ) => {}
                Err(err) if err.kind() == ErrorKind::InvalidData => {
                    warn!(error = %err, "ignoring non-UTF-8 control input");
                    line.clear();
                }
                Err(err) => {
                    debug!(error = %err, "control channel read failed");
                    return Ok(());
                }
            }
        }
    }

    /// Run the command loop on a named thread.
    pub fn spawn<R>(self, reader: R) -> std::io::Result<JoinHandle<Result<()>>>
    where
        R: BufRead + Send + 'static,
    {
        std::thread::Builder::new()
            .name("camstream-control".into())
            .spawn(move || self.run(reader))
    }

    fn set_parameter(&self, parameter: Parameter) -> Result<()> {
        self.recycler.lock_port().set_parameter(parameter)?;
        Ok(())
    }

    fn set_motion_vectors(&self, on: bool) -> Result<()> {
        if self.state.motion_vectors() == on {
            return Ok(());
        }
        self.recycler.reconfigure(|port| {
            port.set_parameter(Parameter::InlineMotionVectors(on))?;
            self.state.set_motion_vectors(on);
            Ok(())
        })?;
        info!(on, "motion vectors toggled");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::sync::Mutex;

    use super::*;
    use crate::buffer::Buffer;
    use crate::error::HardwareError;
    use crate::hardware::mock::MockPort;
    use crate::pool::{AcquireMode, BufferPool};

    fn interpreter(state: ControlState) -> CommandInterpreter<MockPort> {
        let recycler = BufferRecycler::new(
            Arc::new(BufferPool::new(2, 16)),
            Arc::new(Mutex::new(MockPort::enabled())),
            AcquireMode::NonBlocking,
        );
        recycler.prime().unwrap();
        CommandInterpreter::new(Arc::new(state), recycler)
    }

    fn parameters(interpreter: &CommandInterpreter<MockPort>) -> Vec<Parameter> {
        interpreter.recycler.lock_port().parameters.clone()
    }

    #[test]
    fn parses_every_key() {
        assert_eq!("iso=400".parse::<ControlCommand>().unwrap(), ControlCommand::Iso(400));
        assert_eq!(
            "ss=10000\n".parse::<ControlCommand>().unwrap(),
            ControlCommand::ShutterSpeed(10000)
        );
        assert_eq!("stat=1".parse::<ControlCommand>().unwrap(), ControlCommand::Stats(true));
        assert_eq!("motion=0".parse::<ControlCommand>().unwrap(), ControlCommand::Motion(false));
        assert_eq!(
            "move=R".parse::<ControlCommand>().unwrap(),
            ControlCommand::Move(CropDirection::Reset)
        );
        assert_eq!(
            "mot_alarm=20".parse::<ControlCommand>().unwrap(),
            ControlCommand::MotionAlarm(20)
        );
    }

    #[test]
    fn rejects_malformed_lines() {
        assert!(matches!("iso".parse::<ControlCommand>(), Err(ControlError::Malformed(_))));
        assert!(matches!("zoom=1".parse::<ControlCommand>(), Err(ControlError::UnknownKey(_))));
        assert!(matches!(
            "iso=abc".parse::<ControlCommand>(),
            Err(ControlError::InvalidValue { .. })
        ));
        assert!(matches!(
            "move=x".parse::<ControlCommand>(),
            Err(ControlError::InvalidValue { .. })
        ));
        assert!(matches!(
            "mot_alarm=300".parse::<ControlCommand>(),
            Err(ControlError::InvalidValue { .. })
        ));
    }

    #[test]
    fn motion_toggle_reconfigures_port() {
        let interpreter = interpreter(ControlState::default());
        interpreter.apply(ControlCommand::Motion(true)).unwrap();
        assert!(interpreter.state().motion_vectors());
        assert!(parameters(&interpreter).contains(&Parameter::InlineMotionVectors(true)));
        assert_eq!(interpreter.recycler.lock_port().held.len(), 2);

        // Already on: no second reconfiguration.
        interpreter.apply(ControlCommand::Motion(true)).unwrap();
        let toggles = parameters(&interpreter)
            .iter()
            .filter(|p| matches!(p, Parameter::InlineMotionVectors(_)))
            .count();
        assert_eq!(toggles, 1);
    }

    #[test]
    fn motion_ignored_while_alarm_armed() {
        let interpreter = interpreter(ControlState::default());
        interpreter.apply(ControlCommand::MotionAlarm(10)).unwrap();
        assert!(interpreter.state().motion_vectors());
        assert_eq!(interpreter.state().alarm_threshold(), 10);

        interpreter.apply(ControlCommand::Motion(false)).unwrap();
        assert!(interpreter.state().motion_vectors());

        interpreter.apply(ControlCommand::MotionAlarm(0)).unwrap();
        assert!(!interpreter.state().motion_vectors());
    }

    #[test]
    fn motion_stays_on_while_retention_enabled() {
        let interpreter = interpreter(ControlState::new(false, true, 0).with_retention(true));
        interpreter.apply(ControlCommand::Motion(false)).unwrap();
        assert!(interpreter.state().motion_vectors());

        interpreter.apply(ControlCommand::MotionAlarm(7)).unwrap();
        interpreter.apply(ControlCommand::MotionAlarm(0)).unwrap();
        assert!(interpreter.state().motion_vectors());
        assert!(!parameters(&interpreter).contains(&Parameter::InlineMotionVectors(false)));
    }

    /// Records whether the shared state already shows motion vectors each
    /// time the port is re-enabled.
    struct WatchingPort {
        inner: MockPort,
        state: Arc<ControlState>,
        seen_on_enable: Vec<bool>,
    }

    impl HardwarePort for WatchingPort {
        fn is_enabled(&self) -> bool {
            self.inner.is_enabled()
        }

        fn send_buffer(&mut self, buffer: Buffer) -> std::result::Result<(), HardwareError> {
            self.inner.send_buffer(buffer)
        }

        fn enable(&mut self) -> std::result::Result<(), HardwareError> {
            self.seen_on_enable.push(self.state.motion_vectors());
            self.inner.enable()
        }

        fn disable(&mut self) -> std::result::Result<Vec<Buffer>, HardwareError> {
            self.inner.disable()
        }

        fn set_parameter(
            &mut self,
            parameter: Parameter,
        ) -> std::result::Result<(), HardwareError> {
            self.inner.set_parameter(parameter)
        }
    }

    #[test]
    fn motion_state_changes_before_port_restarts() {
        let state = Arc::new(ControlState::default());
        let port = Arc::new(Mutex::new(WatchingPort {
            inner: MockPort::enabled(),
            state: Arc::clone(&state),
            seen_on_enable: Vec::new(),
        }));
        let recycler = BufferRecycler::new(
            Arc::new(BufferPool::new(2, 16)),
            Arc::clone(&port),
            AcquireMode::NonBlocking,
        );
        let interpreter = CommandInterpreter::new(state, recycler);

        interpreter.apply(ControlCommand::MotionAlarm(3)).unwrap();
        interpreter.apply(ControlCommand::MotionAlarm(0)).unwrap();
        assert_eq!(port.lock().unwrap().seen_on_enable, vec![true, false]);
    }

    #[test]
    fn stat_off_clears_annotation() {
        let interpreter = interpreter(ControlState::new(true, false, 0));
        interpreter.apply(ControlCommand::Stats(false)).unwrap();
        assert!(!interpreter.state().show_stats());
        assert_eq!(parameters(&interpreter), vec![Parameter::Annotate(None)]);
    }

    #[test]
    fn run_skips_bad_lines_and_applies_the_rest() {
        let interpreter = interpreter(ControlState::default());
        let input = "iso=800\ngarbage\nmove=i\n\nss=2000";
        interpreter.run(Cursor::new(input)).unwrap();
        assert_eq!(
            parameters(&interpreter),
            vec![
                Parameter::Iso(800),
                Parameter::Crop(CropDirection::ZoomIn),
                Parameter::ShutterSpeed(2000),
            ]
        );
    }
}
