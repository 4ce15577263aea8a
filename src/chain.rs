//! The scan chain: an ordered set of parts behind one cable, plus the
//! modeled TAP controller state.  All TCK cycles flow through here so the
//! state model and the hardware can never disagree; clocking the cable
//! behind the chain's back is the one sure way to corrupt a session.
//!
//! Parts are numbered in shift order: part 0's bits enter the cable
//! first, which puts part 0 nearest TDO.

use log::{debug, info, warn};

use crate::cable::Cable;
use crate::detect::{extract_idcodes, extract_ir_lengths, DetectedTap};
use crate::error::{Error, Result};
use crate::part::{Part, BYPASS};
use crate::register::TapRegister;
use crate::statemachine::TapState;

/// Where a shift leaves the TAP controller.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ExitMode {
    /// Stay in Shift-DR/Shift-IR; used for every chain segment but the
    /// last, so the next part's bits continue the same shift.
    Shift,
    /// Rest in Pause-DR/Pause-IR.
    Pause,
    /// Go through Update and stop there.
    Update,
    /// Go through Update to Run-Test/Idle.  One call with this mode is
    /// one complete capture-shift-update cycle, which is what memory bus
    /// drivers need per bus cycle.
    Idle,
}

pub struct Chain {
    cable: Box<dyn Cable>,
    pub parts: Vec<Part>,
    pub active_part: usize,
    state: Option<TapState>,
}

impl Chain {
    /// A chain over the given cable.  The controller state is unknown
    /// until the first reset.
    pub fn new(cable: Box<dyn Cable>) -> Self {
        Self {
            cable,
            parts: Vec::new(),
            active_part: 0,
            state: None,
        }
    }

    /// The modeled controller state; `None` before the first reset or
    /// after TRST release.
    pub fn state(&self) -> Option<TapState> {
        self.state
    }

    fn track(&mut self, tms: bool, n: usize) {
        if let Some(mut s) = self.state {
            for _ in 0..n {
                s = s.transition(tms);
            }
            self.state = Some(s);
        }
    }

    /// Clock `n` cycles and keep the state model in lockstep.
    pub fn clock(&mut self, tms: bool, tdi: bool, n: usize) {
        self.cable.clock(tms, tdi, n);
        self.track(tms, n);
    }

    /// Sample TDO.  Part of the bit-level seam used by player adapters;
    /// sampling does not clock.
    pub fn tdo(&mut self) -> bool {
        self.cable.tdo()
    }

    pub(crate) fn transfer(
        &mut self,
        tdi: &bitvec::slice::BitSlice<u8, bitvec::order::Lsb0>,
        tdo: Option<&mut bitvec::slice::BitSlice<u8, bitvec::order::Lsb0>>,
    ) {
        self.cable.transfer(tdi, tdo);
        self.track(false, tdi.len());
    }

    pub fn flush(&mut self) {
        self.cable.flush();
    }

    /// Drive TRST.  Asserting it forces Test-Logic-Reset; releasing it
    /// leaves the controller state unknown until the next reset.
    pub fn set_trst(&mut self, active: bool) {
        self.cable.trst(active);
        self.state = if active { Some(TapState::Reset) } else { None };
    }

    /// Force the controller to Run-Test/Idle: five TMS-high cycles reach
    /// Test-Logic-Reset from anywhere, one TMS-low cycle steps to Idle.
    /// Always six cycles, even when already in Reset.
    pub fn reset(&mut self) {
        self.state = Some(TapState::Reset);
        self.clock(true, false, 5);
        self.clock(false, false, 1);
    }

    /// Reset, then put every part into BYPASS by shifting an all-ones
    /// instruction register through the whole chain.
    pub fn reset_bypass(&mut self) -> Result<()> {
        self.reset();
        let total = self.total_instruction_length();
        if total == 0 {
            return Ok(());
        }
        let mut ones = TapRegister::new(total);
        ones.fill(true);
        self.goto_state(TapState::ShiftIR)?;
        self.shift_register(&ones, None, ExitMode::Idle)?;
        for part in &mut self.parts {
            part.set_instruction(BYPASS)?;
        }
        Ok(())
    }

    /// Walk the controller to `target`.  From an unknown state this first
    /// forces reset-to-idle.  Asking for the current state again is not a
    /// no-op when that state is stable: exactly one extra cycle is issued
    /// with the state-holding TMS value, because several protocols want
    /// at least one clock even when already in place.
    pub fn goto_state(&mut self, target: TapState) -> Result<()> {
        if self.state.is_none() {
            self.reset();
        }
        let Some(current) = self.state else {
            return Err(Error::Internal("state still unknown after reset".into()));
        };

        if current == target {
            if target.is_stable() {
                self.clock(target.loop_tms(), false, 1);
            }
            return Ok(());
        }

        let mut state = current;
        let mut steps = 0;
        while state != target {
            // Nine steps cover the diameter of the state graph; more
            // means the path map is wrong.
            if steps >= 9 {
                return Err(Error::Internal(format!(
                    "no path from {} to {} after {} steps",
                    current, target, steps
                )));
            }
            let tms = state.tms_toward(target);
            self.clock(tms, false, 1);
            state = state.transition(tms);
            steps += 1;
        }
        debug!("state {} -> {} in {} cycles", current, target, steps);
        Ok(())
    }

    /// Shift one register's worth of bits through the chain.  Expects to
    /// be called in (or on the way into) a shift state; `goto_state` with
    /// `ShiftDR`/`ShiftIR` handles the capture on the way in.  When
    /// `output` is given it must be the same length as `input` and
    /// receives the captured bits in shift order.
    pub fn shift_register(
        &mut self,
        input: &TapRegister,
        mut output: Option<&mut TapRegister>,
        exit: ExitMode,
    ) -> Result<()> {
        let state = self
            .state
            .ok_or_else(|| Error::Internal("shift from unknown state".into()))?;
        if !matches!(
            state,
            TapState::CaptureDR
                | TapState::CaptureIR
                | TapState::ShiftDR
                | TapState::ShiftIR
                | TapState::Exit2DR
                | TapState::Exit2IR
        ) {
            warn!("shifting a register from unexpected state {}", state);
        }
        // A capture state still holds the parallel-loaded value; one
        // TMS-low cycle consumes the load and enters Shift.
        if state.is_capture() {
            self.clock(false, false, 1);
        }

        let n = input.len();
        if let Some(out) = &output {
            if out.len() != n {
                return Err(Error::Internal(format!(
                    "shift of {} bits into a {}-bit capture register",
                    n,
                    out.len()
                )));
            }
        }

        // All but the exit bit stream through the cable's bulk path.
        let body = if exit == ExitMode::Shift { n } else { n - 1 };
        let out_slice = output.as_mut().map(|o| &mut o.bits_mut()[..body]);
        self.cable.transfer(&input.bits()[..body], out_slice);
        self.track(false, body);

        for i in body..n {
            // The last bit's TDO is valid before its own clock; that
            // clock raises TMS and exits to Exit1.
            if let Some(out) = output.as_mut() {
                let bit = self.cable.tdo();
                out.set(i, bit)?;
            }
            self.clock(true, input.get(i)?, 1);
        }

        match exit {
            ExitMode::Shift => {}
            ExitMode::Pause => self.clock(false, false, 1),
            ExitMode::Update => self.clock(true, false, 1),
            ExitMode::Idle => {
                self.clock(true, false, 1);
                self.clock(false, false, 1);
            }
        }
        Ok(())
    }

    /// Sum of all parts' instruction register lengths.
    pub fn total_instruction_length(&self) -> usize {
        self.parts.iter().map(|p| p.instruction_length()).sum()
    }

    pub fn add_part(&mut self, part: Part) {
        self.parts.push(part);
    }

    /// Select the named instruction on the active part and BYPASS on
    /// every other part, the usual setup before a bus operation.
    pub fn set_instruction(&mut self, name: &str) -> Result<()> {
        let active = self.active_part;
        for (i, part) in self.parts.iter_mut().enumerate() {
            if i == active {
                part.set_instruction(name)?;
            } else {
                part.set_instruction(BYPASS)?;
            }
        }
        Ok(())
    }

    fn check_active_instructions(&self) -> Result<()> {
        for (i, part) in self.parts.iter().enumerate() {
            if part.active_instruction().is_none() {
                return Err(Error::NotFound(format!(
                    "active instruction on part {} ({})",
                    i, part.name
                )));
            }
        }
        Ok(())
    }

    /// Shift every part's instruction register, exiting through Update to
    /// Run-Test/Idle.
    pub fn shift_instructions(&mut self) -> Result<()> {
        self.shift_instructions_mode(true, false, ExitMode::Idle)
    }

    /// The parameterized IR shift.  With `write` the assembled opcodes go
    /// out on TDI; otherwise TDI is held low and only the capture
    /// matters.  `capture_output` stores the captured bits into each
    /// instruction's `capture` register.  Afterwards each part's active
    /// instruction is re-resolved from the opcode that was actually
    /// shifted into the device.
    pub fn shift_instructions_mode(
        &mut self,
        write: bool,
        capture_output: bool,
        exit: ExitMode,
    ) -> Result<()> {
        if self.parts.is_empty() {
            warn!("instruction shift on an empty chain");
            return Ok(());
        }
        self.check_active_instructions()?;
        self.goto_state(TapState::ShiftIR)?;

        let n = self.parts.len();
        let mut shifted = Vec::with_capacity(n);
        for i in 0..n {
            let Some(instruction) = self.parts[i].active_instruction() else {
                return Err(Error::Internal(format!("part {} lost its instruction", i)));
            };
            let mut input = instruction.opcode.clone();
            if !write {
                input.fill(false);
            }
            let part_exit = if i + 1 == n { exit } else { ExitMode::Shift };
            let mut capture = TapRegister::new(input.len());
            self.shift_register(
                &input,
                capture_output.then_some(&mut capture),
                part_exit,
            )?;
            if capture_output {
                if let Some(instruction) = self.parts[i].active_instruction_mut() {
                    instruction.capture = capture;
                }
            }
            shifted.push(input);
        }
        for (part, opcode) in self.parts.iter_mut().zip(&shifted) {
            part.set_instruction_by_opcode(opcode);
        }
        Ok(())
    }

    /// Shift every part's active data register, exiting through Update to
    /// Run-Test/Idle: one full bus-visible DR cycle.
    pub fn shift_data_registers(&mut self, capture_output: bool) -> Result<()> {
        self.shift_data_registers_mode(capture_output, ExitMode::Idle)
    }

    /// The parameterized DR shift.  Parts whose active instruction is
    /// BYPASS contribute their 1-bit register, so the assembled width is
    /// the sum of all active register lengths.
    pub fn shift_data_registers_mode(
        &mut self,
        capture_output: bool,
        exit: ExitMode,
    ) -> Result<()> {
        if self.parts.is_empty() {
            warn!("data register shift on an empty chain");
            return Ok(());
        }
        self.check_active_instructions()?;
        self.goto_state(TapState::ShiftDR)?;

        let n = self.parts.len();
        for i in 0..n {
            let Some(register) = self.parts[i].active_data_register() else {
                return Err(Error::Internal(format!("part {} lost its data register", i)));
            };
            let input = register.input.clone();
            let part_exit = if i + 1 == n { exit } else { ExitMode::Shift };
            let mut capture = TapRegister::new(input.len());
            self.shift_register(
                &input,
                capture_output.then_some(&mut capture),
                part_exit,
            )?;
            if capture_output {
                if let Some(register) = self.parts[i].active_data_register_mut() {
                    register.output = capture;
                }
            }
        }
        Ok(())
    }

    /// Enumerate the chain: read the post-reset ID register path for
    /// IDCODEs and bypass flags, then the instruction path for per-part
    /// IR lengths.  Leaves the chain reset and does not touch `parts`.
    pub fn detect(&mut self) -> Result<Vec<DetectedTap>> {
        const MAX_TAPS: usize = 16;

        self.reset();
        self.goto_state(TapState::ShiftDR)?;
        let mut ones = TapRegister::new(32 * MAX_TAPS);
        ones.fill(true);
        let mut dr = TapRegister::new(32 * MAX_TAPS);
        self.shift_register(&ones, Some(&mut dr), ExitMode::Idle)?;
        let idcodes = extract_idcodes(dr.bits())?;
        if idcodes.is_empty() {
            info!("no devices on the chain");
            return Ok(Vec::new());
        }

        self.reset();
        self.goto_state(TapState::ShiftIR)?;
        let mut ones = TapRegister::new(32 * idcodes.len());
        ones.fill(true);
        let mut ir = TapRegister::new(ones.len());
        self.shift_register(&ones, Some(&mut ir), ExitMode::Idle)?;
        let ir_lengths = extract_ir_lengths(ir.bits(), idcodes.len())?;

        self.reset();

        let taps: Vec<DetectedTap> = idcodes
            .into_iter()
            .zip(ir_lengths)
            .map(|(idcode, ir_length)| DetectedTap { idcode, ir_length })
            .collect();
        for (i, tap) in taps.iter().enumerate() {
            match &tap.idcode {
                Some(id) => info!("part {}: {} (IR length {})", i, id, tap.ir_length),
                None => info!("part {}: no IDCODE (IR length {})", i, tap.ir_length),
            }
        }
        Ok(taps)
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;
    use crate::cable::sim::{SimCable, SimDevice};
    use crate::part::BSR;
    use crate::statemachine::ALL_STATES;

    /// Cable that only records the (tms, tdi) pairs it was asked to
    /// clock.
    #[derive(Default)]
    struct RecordingCable {
        log: Rc<RefCell<Vec<(bool, bool)>>>,
    }

    impl RecordingCable {
        fn with_log() -> (Self, Rc<RefCell<Vec<(bool, bool)>>>) {
            let cable = Self::default();
            let log = cable.log.clone();
            (cable, log)
        }
    }

    impl Cable for RecordingCable {
        fn clock(&mut self, tms: bool, tdi: bool, n: usize) {
            let mut log = self.log.borrow_mut();
            for _ in 0..n {
                log.push((tms, tdi));
            }
        }

        fn tdo(&mut self) -> bool {
            false
        }

        fn transfer(
            &mut self,
            tdi: &bitvec::slice::BitSlice<u8, bitvec::order::Lsb0>,
            tdo: Option<&mut bitvec::slice::BitSlice<u8, bitvec::order::Lsb0>>,
        ) {
            if let Some(out) = tdo {
                out[..tdi.len()].fill(false);
            }
            let mut log = self.log.borrow_mut();
            for bit in tdi {
                log.push((false, *bit));
            }
        }
    }

    #[test]
    fn reset_is_exactly_six_cycles() {
        let (cable, log) = RecordingCable::with_log();
        let mut chain = Chain::new(Box::new(cable));
        assert_eq!(chain.state(), None);

        chain.reset();
        assert_eq!(
            *log.borrow(),
            vec![
                (true, false),
                (true, false),
                (true, false),
                (true, false),
                (true, false),
                (false, false)
            ]
        );
        assert_eq!(chain.state(), Some(TapState::Idle));

        // From a known state the sequence is the same six cycles.
        log.borrow_mut().clear();
        chain.reset();
        assert_eq!(log.borrow().len(), 6);
        assert_eq!(chain.state(), Some(TapState::Idle));
    }

    #[test]
    fn goto_state_from_unknown_resets_first() {
        let (cable, log) = RecordingCable::with_log();
        let mut chain = Chain::new(Box::new(cable));
        chain.goto_state(TapState::ShiftDR).unwrap();
        assert_eq!(chain.state(), Some(TapState::ShiftDR));
        // 6 reset cycles + Select-DR + Capture-DR + Shift-DR.
        assert_eq!(log.borrow().len(), 9);
    }

    #[test]
    fn goto_state_reaches_every_target() {
        for target in ALL_STATES {
            let (cable, _log) = RecordingCable::with_log();
            let mut chain = Chain::new(Box::new(cable));
            chain.reset();
            chain.goto_state(target).unwrap();
            assert_eq!(chain.state(), Some(target));
        }
    }

    #[test]
    fn goto_stable_state_loops_once() {
        let (cable, log) = RecordingCable::with_log();
        let mut chain = Chain::new(Box::new(cable));
        chain.reset();
        chain.goto_state(TapState::PauseDR).unwrap();

        log.borrow_mut().clear();
        chain.goto_state(TapState::PauseDR).unwrap();
        assert_eq!(*log.borrow(), vec![(false, false)]);
        assert_eq!(chain.state(), Some(TapState::PauseDR));

        // Reset loops with TMS high instead.
        chain.goto_state(TapState::Reset).unwrap();
        log.borrow_mut().clear();
        chain.goto_state(TapState::Reset).unwrap();
        assert_eq!(*log.borrow(), vec![(true, false)]);
    }

    #[test]
    fn trst_tracking() {
        let (cable, _log) = RecordingCable::with_log();
        let mut chain = Chain::new(Box::new(cable));
        chain.set_trst(true);
        assert_eq!(chain.state(), Some(TapState::Reset));
        chain.set_trst(false);
        assert_eq!(chain.state(), None);
    }

    fn three_part_chain() -> (Chain, Vec<SimDevice>) {
        // Heterogeneous IR lengths; the middle part will sit in BYPASS.
        let devices = vec![
            SimDevice::new(4, Some(0x1397_100D)).with_register("0010", 8),
            SimDevice::new(2, None),
            SimDevice::new(6, Some(0x0597_3045)).with_register("000010", 5),
        ];
        let mut chain = Chain::new(Box::new(SimCable::new(devices.clone())));

        let mut p0 = Part::new("first", 4);
        p0.add_data_register(BSR, 8).unwrap();
        p0.add_instruction("EXTEST", "0010", BSR).unwrap();
        chain.add_part(p0);

        chain.add_part(Part::new("middle", 2));

        let mut p2 = Part::new("last", 6);
        p2.add_data_register(BSR, 5).unwrap();
        p2.add_instruction("EXTEST", "000010", BSR).unwrap();
        chain.add_part(p2);

        (chain, devices)
    }

    #[test]
    fn instruction_shift_reaches_each_part() {
        let (mut chain, devices) = three_part_chain();
        chain.reset_bypass().unwrap();
        for dev in &devices {
            assert!(dev.latched_ir().to_string().chars().all(|c| c == '1'));
        }

        chain.parts[0].set_instruction("EXTEST").unwrap();
        chain.parts[2].set_instruction("EXTEST").unwrap();
        chain.shift_instructions().unwrap();

        assert_eq!(devices[0].latched_ir().to_string(), "0010");
        assert_eq!(devices[1].latched_ir().to_string(), "11");
        assert_eq!(devices[2].latched_ir().to_string(), "000010");
        assert_eq!(chain.state(), Some(TapState::Idle));
    }

    #[test]
    fn instruction_capture_splits_per_part() {
        let (mut chain, _devices) = three_part_chain();
        chain.reset_bypass().unwrap();
        chain.set_instruction(BYPASS).unwrap();
        chain.shift_instructions_mode(true, true, ExitMode::Idle).unwrap();

        // Each part's capture is its own IR capture pattern (..01), with
        // no bleed between the 4, 2 and 6 bit segments.
        assert_eq!(
            chain.parts[0].active_instruction().unwrap().capture.to_string(),
            "0001"
        );
        assert_eq!(
            chain.parts[1].active_instruction().unwrap().capture.to_string(),
            "01"
        );
        assert_eq!(
            chain.parts[2].active_instruction().unwrap().capture.to_string(),
            "000001"
        );
    }

    #[test]
    fn data_shift_concatenates_active_registers() {
        let (mut chain, devices) = three_part_chain();
        chain.reset_bypass().unwrap();
        chain.parts[0].set_instruction("EXTEST").unwrap();
        chain.parts[2].set_instruction("EXTEST").unwrap();
        chain.shift_instructions().unwrap();

        devices[0].push_capture("10110011");
        devices[2].push_capture("01101");

        chain.parts[0]
            .data_register_mut(BSR)
            .unwrap()
            .input
            .init("11000101")
            .unwrap();
        chain.parts[2]
            .data_register_mut(BSR)
            .unwrap()
            .input
            .init("10011")
            .unwrap();
        chain.shift_data_registers(true).unwrap();

        // Captures split back into per-part segments.
        assert_eq!(
            chain.parts[0].data_register(BSR).unwrap().output.to_string(),
            "10110011"
        );
        assert_eq!(
            chain.parts[1].active_data_register().unwrap().output.to_string(),
            "0"
        );
        assert_eq!(
            chain.parts[2].data_register(BSR).unwrap().output.to_string(),
            "01101"
        );

        // What each device latched at Update-DR is what its segment
        // carried, untouched by the neighbours.
        assert_eq!(devices[0].updates()[0].to_string(), "11000101");
        assert_eq!(devices[2].updates()[0].to_string(), "10011");
    }

    #[test]
    fn shift_without_instruction_fails() {
        let (mut chain, _devices) = three_part_chain();
        chain.reset();
        assert!(matches!(
            chain.shift_data_registers(false),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn detect_enumerates_the_chain() {
        let (mut chain, _devices) = three_part_chain();
        let taps = chain.detect().unwrap();
        assert_eq!(taps.len(), 3);
        assert_eq!(taps[0].ir_length, 4);
        assert_eq!(taps[0].idcode.as_ref().unwrap().raw(), 0x1397_100D);
        assert_eq!(taps[1].ir_length, 2);
        assert!(taps[1].idcode.is_none());
        assert_eq!(taps[2].ir_length, 6);
        assert_eq!(taps[2].idcode.as_ref().unwrap().raw(), 0x0597_3045);
    }
}
