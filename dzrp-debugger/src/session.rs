//! Per-connection debugger state and the run/stop state machine.
//!
//! One `Session` exists while a client is connected. It lives behind the
//! server's single lock, which both the command handlers and the host's
//! tick take, so a handler's check-then-act on the CPU state can never be
//! interleaved with the tick's own observation of it.

use crate::fmt_hex;
use crate::machine::{
    CpuState, DebugCmd, Machine, NEXTREG_INT_EN0, NEXTREG_INT_STATUS0,
};
use crate::registry::{long_address_of, BreakpointRegistry};
use dzrp_protocol::{
    string_len, BreakReason, Notification, PayloadWriter, ProtocolError, Response, NTF_PAUSE,
};
use log::{debug, info, trace, warn};
use std::io::Write;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Step between "enter debugger" attempts while forcing a stop
const STOP_POLL: Duration = Duration::from_millis(1);

const WATCHPOINT_OR_MANUAL: &str = "Watchpoint hit or manual break";

pub struct Session {
    pub(crate) machine: Arc<dyn Machine>,
    pub(crate) registry: BreakpointRegistry,
    writer: Box<dyn Write + Send>,
    state_timeout: Duration,
    /// Run/stop state as last seen by the tick or a state change we made
    last_state: CpuState,
    /// "Run until" addresses of the current CONTINUE
    temp_breakpoints: [Option<u16>; 2],
    /// Set by PAUSE so the next stop is not mistaken for a watchpoint hit
    manual_break: bool,
    /// Sequence number of the request still awaiting its response
    pending_seq: Option<u8>,
}

impl Session {
    pub fn new(
        machine: Arc<dyn Machine>,
        writer: Box<dyn Write + Send>,
        state_timeout: Duration,
    ) -> Self {
        let last_state = machine.state();
        Session {
            machine,
            registry: BreakpointRegistry::new(),
            writer,
            state_timeout,
            last_state,
            temp_breakpoints: [None, None],
            manual_break: false,
            pending_seq: None,
        }
    }

    /// Bring a freshly connected session to a known state: empty registry,
    /// CPU stopped, no interrupts pending.
    pub fn reset(&mut self) {
        self.registry.reset();
        self.temp_breakpoints = [None, None];
        self.manual_break = false;
        self.pending_seq = None;

        self.machine.debug(DebugCmd::Enter);
        if !self
            .machine
            .wait_for_state(CpuState::Stopped, self.state_timeout)
        {
            warn!(target: "dzrp", "CPU did not stop on connect");
        }
        self.clear_pending_interrupts();
        self.last_state = self.machine.state();
    }

    fn clear_pending_interrupts(&self) {
        let enables: Vec<u8> = (0..3)
            .map(|i| self.machine.next_reg(NEXTREG_INT_EN0 + i))
            .collect();
        for i in 0..3 {
            self.machine.set_next_reg(NEXTREG_INT_EN0 + i, 0);
        }
        for i in 0..3 {
            self.machine.set_next_reg(NEXTREG_INT_STATUS0 + i, 0xFF);
        }
        for (i, value) in enables.into_iter().enumerate() {
            self.machine.set_next_reg(NEXTREG_INT_EN0 + i as u8, value);
        }
    }

    pub fn last_state(&self) -> CpuState {
        self.last_state
    }

    pub fn manual_break(&self) -> bool {
        self.manual_break
    }

    pub fn temp_breakpoints(&self) -> [Option<u16>; 2] {
        self.temp_breakpoints
    }

    /// Note that `seq_num` now awaits its response
    pub fn begin_request(&mut self, seq_num: u8) {
        self.pending_seq = Some(seq_num);
    }

    /// Whether a request has been received but not answered yet
    pub fn owes_response(&self) -> Option<u8> {
        self.pending_seq
    }

    fn send(&mut self, bytes: &[u8]) -> Result<(), ProtocolError> {
        trace!(target: "dzrp", "-> {}", fmt_hex(bytes));
        self.writer.write_all(bytes)?;
        self.writer.flush()?;
        Ok(())
    }

    /// Answer the pending request
    pub fn reply(&mut self, payload: Vec<u8>) -> Result<(), ProtocolError> {
        let Some(seq_num) = self.pending_seq.take() else {
            return Err(ProtocolError::InvalidFormat(
                "response without a pending request".to_string(),
            ));
        };
        let response = Response { seq_num, payload };
        self.send(&response.encode())
    }

    fn notify_pause(
        &mut self,
        reason: BreakReason,
        long_address: i32,
        text: &str,
    ) -> Result<(), ProtocolError> {
        info!(
            target: "dzrp",
            "pause notification: {:?} at 0x{:06x}", reason, long_address
        );
        let mut w = PayloadWriter::with_len(1 + 3 + string_len(text));
        w.write_u8(reason.into())
            .write_long_address(long_address)
            .write_string(text);
        self.send(&Notification::new(NTF_PAUSE, w.finish()).encode())
    }

    /// Drive the CPU to `target`, resolving the break reason if that stops it
    pub fn start_cpu(&mut self, target: CpuState) -> Result<(), ProtocolError> {
        let current = self.machine.state();
        if current == target {
            self.last_state = current;
            return Ok(());
        }

        self.machine.debug(match target {
            CpuState::Running => DebugCmd::Run,
            CpuState::Stopped => DebugCmd::Enter,
        });
        if !self.machine.wait_for_state(target, self.state_timeout) {
            warn!(target: "dzrp", "CPU did not reach {:?} in time", target);
        }
        // a Run that immediately hits a trap is left for the tick to report
        self.last_state = target;

        if target == CpuState::Stopped {
            self.resolve_break(true)?;
        }
        Ok(())
    }

    /// Run `action` with the CPU stopped, restarting it afterwards if it was
    /// running on entry.
    pub fn execute_stopped<T>(
        &mut self,
        action: impl FnOnce(&mut Session) -> Result<T, ProtocolError>,
    ) -> Result<T, ProtocolError> {
        let was_running = self.machine.state() == CpuState::Running;
        if was_running {
            self.force_stop();
        }

        let result = action(self);

        if was_running {
            let reason = self.resolve_break(false)?;
            if reason == BreakReason::ManualBreak {
                self.machine.debug(DebugCmd::Run);
                if !self
                    .machine
                    .wait_for_state(CpuState::Running, self.state_timeout)
                {
                    warn!(target: "dzrp", "CPU did not resume in time");
                }
                self.last_state = CpuState::Running;
            } else {
                // stopped on a real breakpoint; the client has been told
                self.last_state = CpuState::Stopped;
            }
        }
        result
    }

    /// Stop the CPU and wait until it is settled: stopped, with PC and R
    /// unchanged across two samples.
    fn force_stop(&mut self) {
        let deadline = Instant::now() + self.state_timeout;
        let mut previous = None;
        loop {
            self.machine.debug(DebugCmd::Enter);
            self.machine.wait_for_state(CpuState::Stopped, STOP_POLL);
            let regs = self.machine.registers();
            let sample = (regs.pc, regs.r);
            if self.machine.state() == CpuState::Stopped && previous == Some(sample) {
                return;
            }
            previous = Some(sample);
            if Instant::now() > deadline {
                warn!(target: "dzrp", "CPU did not settle while forcing a stop");
                return;
            }
        }
    }

    /// Host tick: report a stop the emulator made on its own
    pub fn tick(&mut self) -> Result<(), ProtocolError> {
        let current = self.machine.state();
        let previous = std::mem::replace(&mut self.last_state, current);
        if previous == CpuState::Running && current == CpuState::Stopped {
            debug!(target: "dzrp", "tick observed CPU stop");
            self.resolve_break(true)?;
        }
        Ok(())
    }

    /// Arm the "run until" breakpoints for the next CONTINUE, dropping any
    /// left over from a previous one
    pub fn set_temp_breakpoints(&mut self, addresses: [Option<u16>; 2]) {
        self.clear_temp_breakpoints();
        for address in addresses.iter().flatten() {
            self.machine.debug(DebugCmd::SetBreakpoint(*address));
        }
        self.temp_breakpoints = addresses;
    }

    pub fn resume(&mut self) -> Result<(), ProtocolError> {
        self.start_cpu(CpuState::Running)?;
        self.manual_break = false;
        Ok(())
    }

    pub fn pause(&mut self) -> Result<(), ProtocolError> {
        self.manual_break = true;
        self.start_cpu(CpuState::Stopped)
    }

    /// Work out why the CPU stopped and tell the client.
    ///
    /// With `notify_default` false (a stop forced for [`Self::execute_stopped`])
    /// a plain manual break is neither reported nor allowed to consume the
    /// temporary breakpoints, since the CPU is about to be restarted.
    pub fn resolve_break(&mut self, notify_default: bool) -> Result<BreakReason, ProtocolError> {
        let pc = self.machine.registers().pc;
        let long_address = long_address_of(self.machine.as_ref(), pc);

        let mut text = "";
        let mut reason = if self.temp_breakpoints.contains(&Some(pc)) {
            BreakReason::NoReason
        } else if self.registry.contains(long_address) || self.registry.contains(pc as i32) {
            BreakReason::BreakpointHit
        } else {
            BreakReason::ManualBreak
        };

        // Best effort only: a watchpoint stop and a stop from the emulator's
        // own UI look the same from here.
        if reason == BreakReason::ManualBreak
            && notify_default
            && !self.manual_break
            && self.any_watchpoint_armed()
        {
            reason = BreakReason::Other;
            text = WATCHPOINT_OR_MANUAL;
        }

        if reason == BreakReason::ManualBreak && !notify_default {
            return Ok(reason);
        }

        self.clear_temp_breakpoints();
        self.manual_break = false;
        self.notify_pause(reason, long_address, text)?;
        Ok(reason)
    }

    fn any_watchpoint_armed(&self) -> bool {
        (0..=u16::MAX).any(|a| self.machine.traps(a).any_watchpoint())
    }

    fn clear_temp_breakpoints(&mut self) {
        for address in std::mem::take(&mut self.temp_breakpoints).into_iter().flatten() {
            if !self.registry.contains(address as i32) {
                self.machine.debug(DebugCmd::ClearBreakpoint(address));
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::machine::MemoryMachine;
    use std::sync::Mutex;

    /// Writer whose output stays readable after being boxed into a session
    #[derive(Clone, Default)]
    pub(crate) struct SharedBuf(pub Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl SharedBuf {
        /// Decode and drain everything written so far
        pub(crate) fn frames(&self) -> Vec<Response> {
            let mut data = std::mem::take(&mut *self.0.lock().unwrap());
            let mut out = Vec::new();
            while let Some((frame, used)) = Response::decode(&data).unwrap() {
                out.push(frame);
                data.drain(..used);
            }
            out
        }
    }

    pub(crate) fn session() -> (Session, Arc<MemoryMachine>, SharedBuf) {
        let machine = Arc::new(MemoryMachine::new());
        let out = SharedBuf::default();
        let mut session = Session::new(
            machine.clone(),
            Box::new(out.clone()),
            Duration::from_millis(50),
        );
        session.reset();
        machine.take_history();
        (session, machine, out)
    }

    #[test]
    fn test_reset_stops_cpu_and_clears_interrupts() {
        let machine = Arc::new(MemoryMachine::new());
        machine.debug(DebugCmd::Run);
        machine.set_next_reg(NEXTREG_INT_EN0, 0x81);

        let mut session = Session::new(
            machine.clone(),
            Box::new(SharedBuf::default()),
            Duration::from_millis(50),
        );
        session.reset();

        assert_eq!(machine.state(), CpuState::Stopped);
        assert_eq!(session.last_state(), CpuState::Stopped);
        assert_eq!(machine.next_reg(NEXTREG_INT_EN0), 0x81);
        assert_eq!(machine.next_reg(NEXTREG_INT_STATUS0), 0);
    }

    #[test]
    fn test_tick_reports_external_stop() {
        let (mut session, machine, out) = session();
        session.resume().unwrap();
        session.tick().unwrap();
        assert!(out.frames().is_empty());

        machine.halt_at(0x8000);
        session.tick().unwrap();
        let frames = out.frames();
        assert_eq!(frames.len(), 1);
        assert!(frames[0].is_notification());
        // ntf, reason, addr lo, addr hi, bank(4)+1, ""
        assert_eq!(frames[0].payload, vec![NTF_PAUSE, 1, 0x00, 0x80, 0x05, 0]);

        // no second report for the same stop
        session.tick().unwrap();
        assert!(out.frames().is_empty());
    }

    #[test]
    fn test_tick_without_transition_is_silent() {
        let (mut session, _machine, out) = session();
        session.tick().unwrap();
        session.tick().unwrap();
        assert!(out.frames().is_empty());
    }

    #[test]
    fn test_breakpoint_hit_reason() {
        let (mut session, machine, out) = session();
        let m: Arc<dyn Machine> = machine.clone();
        session.registry.set_breakpoint(m.as_ref(), 0x05_8010).unwrap();
        session.resume().unwrap();
        machine.halt_at(0x8010);
        session.tick().unwrap();
        let frames = out.frames();
        assert_eq!(frames[0].payload[1], BreakReason::BreakpointHit as u8);
    }

    #[test]
    fn test_flat_breakpoint_hit_reason() {
        let (mut session, machine, out) = session();
        let m: Arc<dyn Machine> = machine.clone();
        session.registry.set_breakpoint(m.as_ref(), 0x4000).unwrap();
        session.resume().unwrap();
        machine.halt_at(0x4000);
        session.tick().unwrap();
        assert_eq!(out.frames()[0].payload[1], BreakReason::BreakpointHit as u8);
    }

    #[test]
    fn test_temp_breakpoint_cleared_after_stop() {
        let (mut session, machine, out) = session();
        session.set_temp_breakpoints([Some(0x9000), None]);
        assert!(machine.traps(0x9000).breakpoint);
        session.resume().unwrap();

        machine.halt_at(0x9000);
        session.tick().unwrap();
        assert_eq!(out.frames()[0].payload[1], BreakReason::NoReason as u8);
        assert!(!machine.traps(0x9000).breakpoint);
        assert_eq!(session.temp_breakpoints(), [None, None]);
    }

    #[test]
    fn test_temp_breakpoint_kept_when_persistent() {
        let (mut session, machine, _out) = session();
        let m: Arc<dyn Machine> = machine.clone();
        session.registry.set_breakpoint(m.as_ref(), 0x9000).unwrap();
        session.set_temp_breakpoints([Some(0x9000), None]);
        session.resume().unwrap();

        machine.halt_at(0x9000);
        session.tick().unwrap();
        assert!(machine.traps(0x9000).breakpoint);
    }

    #[test]
    fn test_watchpoint_heuristic() {
        let (mut session, machine, out) = session();
        machine.debug(DebugCmd::SetWriteWatchpoint(0xC000));
        session.resume().unwrap();
        machine.halt_at(0x8123);
        session.tick().unwrap();

        let frames = out.frames();
        assert_eq!(frames[0].payload[1], BreakReason::Other as u8);
        let text = &frames[0].payload[5..];
        assert_eq!(text, format!("{}\0", WATCHPOINT_OR_MANUAL).as_bytes());
    }

    #[test]
    fn test_pause_is_never_a_watchpoint() {
        let (mut session, machine, out) = session();
        machine.debug(DebugCmd::SetReadWatchpoint(0xC000));
        session.resume().unwrap();

        session.pause().unwrap();
        assert_eq!(machine.state(), CpuState::Stopped);
        let frames = out.frames();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].payload[1], BreakReason::ManualBreak as u8);
        assert!(!session.manual_break());

        // the tick has nothing left to report
        session.tick().unwrap();
        assert!(out.frames().is_empty());
    }

    #[test]
    fn test_execute_stopped_while_stopped() {
        let (mut session, machine, out) = session();
        let pc = session
            .execute_stopped(|s| Ok(s.machine.registers().pc))
            .unwrap();
        assert_eq!(pc, 0);
        assert!(machine.take_history().is_empty());
        assert!(out.frames().is_empty());
    }

    #[test]
    fn test_execute_stopped_resumes() {
        let (mut session, machine, out) = session();
        session.set_temp_breakpoints([Some(0x9000), None]);
        session.resume().unwrap();

        let state = session
            .execute_stopped(|s| Ok(s.machine.state()))
            .unwrap();
        assert_eq!(state, CpuState::Stopped);
        assert_eq!(machine.state(), CpuState::Running);
        assert_eq!(session.last_state(), CpuState::Running);
        // silent, and the run-until target survives
        assert!(out.frames().is_empty());
        assert!(machine.traps(0x9000).breakpoint);
    }

    #[test]
    fn test_execute_stopped_on_breakpoint_stays_stopped() {
        let (mut session, machine, out) = session();
        let m: Arc<dyn Machine> = machine.clone();
        session.registry.set_breakpoint(m.as_ref(), 0x6000).unwrap();
        machine.set_registers(&crate::machine::Registers {
            pc: 0x6000,
            ..Default::default()
        });
        session.resume().unwrap();

        session.execute_stopped(|_| Ok(())).unwrap();
        assert_eq!(machine.state(), CpuState::Stopped);
        assert_eq!(out.frames()[0].payload[1], BreakReason::BreakpointHit as u8);
    }

    #[test]
    fn test_reply_uses_pending_seq() {
        let (mut session, _machine, out) = session();
        session.begin_request(9);
        assert_eq!(session.owes_response(), Some(9));
        session.reply(vec![0xAA]).unwrap();
        assert_eq!(session.owes_response(), None);
        let frames = out.frames();
        assert_eq!(frames[0].seq_num, 9);
        assert_eq!(frames[0].payload, vec![0xAA]);
    }

    #[test]
    fn test_reply_without_request_is_an_error() {
        let (mut session, _machine, out) = session();
        session.begin_request(4);
        session.reply(vec![]).unwrap();
        assert!(matches!(
            session.reply(vec![]),
            Err(ProtocolError::InvalidFormat(_))
        ));
        assert_eq!(out.frames().len(), 1);
    }

    #[test]
    fn test_new_continue_replaces_old_targets() {
        let (mut session, machine, _out) = session();
        session.set_temp_breakpoints([Some(0x9000), Some(0x9100)]);
        session.set_temp_breakpoints([Some(0xA000), None]);
        assert!(!machine.traps(0x9000).breakpoint);
        assert!(!machine.traps(0x9100).breakpoint);
        assert!(machine.traps(0xA000).breakpoint);
        assert_eq!(session.temp_breakpoints(), [Some(0xA000), None]);
    }
}
