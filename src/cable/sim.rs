//! A software-only cable: instead of wiggling real pins it drives a
//! modeled chain of TAP devices.  Useful as a test transport and as a
//! reference model of 1149.1 register selection.
//!
//! Devices are handles with shared interior state, so a test can keep a
//! copy, queue capture patterns for the boundary register and inspect the
//! values the chain committed at Update-DR.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use bitvec::prelude::*;

use crate::cable::Cable;
use crate::register::TapRegister;
use crate::statemachine::TapState;

/// Which data register sits between TDI and TDO for one device.
#[derive(Clone, Copy, PartialEq)]
enum Selected {
    Idcode,
    Bypass,
    Custom,
}

struct CustomReg {
    opcode: BitVec<u8, Lsb0>,
    len: usize,
    /// Queued Capture-DR values; the last one repeats once drained.
    captures: VecDeque<BitVec<u8, Lsb0>>,
    last_capture: BitVec<u8, Lsb0>,
    /// Every value latched by Update-DR while this register was selected.
    updates: Vec<BitVec<u8, Lsb0>>,
}

struct DeviceState {
    ir_len: usize,
    idcode: Option<u32>,
    ir_shift: BitVec<u8, Lsb0>,
    ir_latch: BitVec<u8, Lsb0>,
    dr_shift: BitVec<u8, Lsb0>,
    selected: Selected,
    custom: Option<CustomReg>,
}

impl DeviceState {
    fn reset(&mut self) {
        self.selected = if self.idcode.is_some() {
            Selected::Idcode
        } else {
            Selected::Bypass
        };
        self.ir_latch = bitvec![u8, Lsb0; 1; self.ir_len];
    }

    /// Mandatory IR capture pattern: two least significant bits are 01.
    fn capture_ir(&mut self) {
        self.ir_shift = bitvec![u8, Lsb0; 0; self.ir_len];
        self.ir_shift.set(0, true);
    }

    fn capture_dr(&mut self) {
        self.dr_shift = match self.selected {
            Selected::Bypass => bitvec![u8, Lsb0; 0; 1],
            Selected::Idcode => {
                let id = self.idcode.unwrap_or(0);
                let mut bits = bitvec![u8, Lsb0; 0; 32];
                for i in 0..32 {
                    bits.set(i, (id >> i) & 1 != 0);
                }
                bits
            }
            Selected::Custom => match self.custom.as_mut() {
                Some(custom) => {
                    if let Some(next) = custom.captures.pop_front() {
                        custom.last_capture = next;
                    }
                    custom.last_capture.clone()
                }
                None => bitvec![u8, Lsb0; 0; 1],
            },
        };
    }

    fn update_ir(&mut self) {
        self.ir_latch = self.ir_shift.clone();
        self.selected = match &self.custom {
            Some(c) if c.opcode == self.ir_latch => Selected::Custom,
            // All-ones is BYPASS proper; unknown opcodes behave the same
            // way, as most silicon treats private instructions.
            _ => Selected::Bypass,
        };
    }

    fn update_dr(&mut self) {
        if self.selected == Selected::Custom {
            let value = self.dr_shift.clone();
            if let Some(custom) = self.custom.as_mut() {
                custom.updates.push(value);
            }
        }
    }

    /// One Shift-IR/Shift-DR rising edge: returns the bit leaving toward
    /// TDO, takes `carry` in from the TDI side.
    fn shift_one(&mut self, carry: bool, ir: bool) -> bool {
        let reg = if ir { &mut self.ir_shift } else { &mut self.dr_shift };
        let out = reg[0];
        reg.remove(0);
        reg.push(carry);
        out
    }

    /// The bit the device presents on TDO between edges.
    fn head(&self, ir: bool) -> bool {
        let reg = if ir { &self.ir_shift } else { &self.dr_shift };
        reg.first().map(|b| *b).unwrap_or(false)
    }
}

/// Handle to one simulated device.  Cloning shares the device.
#[derive(Clone)]
pub struct SimDevice {
    state: Rc<RefCell<DeviceState>>,
}

impl SimDevice {
    /// A device with the given instruction register length and an optional
    /// IDCODE.  Devices without an IDCODE select BYPASS after reset.
    pub fn new(ir_len: usize, idcode: Option<u32>) -> Self {
        assert!(ir_len >= 2, "1149.1 requires at least a 2-bit IR");
        let mut state = DeviceState {
            ir_len,
            idcode,
            ir_shift: bitvec![u8, Lsb0; 0; ir_len],
            ir_latch: BitVec::new(),
            dr_shift: bitvec![u8, Lsb0; 0; 1],
            selected: Selected::Bypass,
            custom: None,
        };
        state.reset();
        Self {
            state: Rc::new(RefCell::new(state)),
        }
    }

    /// Bind a data register of `len` bits to `opcode` (MSB-first string,
    /// same notation as part descriptions).  Captures read all zeros until
    /// a pattern is queued with [`SimDevice::push_capture`].
    pub fn with_register(self, opcode: &str, len: usize) -> Self {
        {
            let mut state = self.state.borrow_mut();
            assert_eq!(opcode.len(), state.ir_len);
            let opcode: TapRegister = opcode.parse().expect("opcode bit string");
            state.custom = Some(CustomReg {
                opcode: opcode.bits().to_bitvec(),
                len,
                captures: VecDeque::new(),
                last_capture: bitvec![u8, Lsb0; 0; len],
                updates: Vec::new(),
            });
        }
        self
    }

    /// Queue a Capture-DR value for the bound data register.
    pub fn push_capture(&self, bits: &str) {
        let reg: TapRegister = bits.parse().expect("capture bit string");
        let mut state = self.state.borrow_mut();
        let custom = state.custom.as_mut().expect("no data register bound");
        assert_eq!(reg.len(), custom.len);
        custom.captures.push_back(reg.bits().to_bitvec());
    }

    /// Values committed by Update-DR while the bound register was
    /// selected, oldest first.
    pub fn updates(&self) -> Vec<TapRegister> {
        let state = self.state.borrow();
        let custom = state.custom.as_ref().expect("no data register bound");
        custom
            .updates
            .iter()
            .map(|bits| {
                let mut reg = TapRegister::new(bits.len());
                reg.bits_mut().copy_from_bitslice(bits);
                reg
            })
            .collect()
    }

    /// The currently latched instruction.
    pub fn latched_ir(&self) -> TapRegister {
        let state = self.state.borrow();
        let mut reg = TapRegister::new(state.ir_latch.len().max(1));
        if !state.ir_latch.is_empty() {
            reg.bits_mut().copy_from_bitslice(&state.ir_latch);
        }
        reg
    }
}

/// The virtual cable.  Devices are given in shift order: index 0 sits
/// nearest TDO, so its bits come out first, matching part numbering on a
/// [`crate::chain::Chain`].
pub struct SimCable {
    devices: Vec<SimDevice>,
    state: TapState,
    tdo_line: bool,
    cycles: u64,
}

impl SimCable {
    pub fn new(devices: Vec<SimDevice>) -> Self {
        Self {
            devices,
            state: TapState::Reset,
            tdo_line: false,
            cycles: 0,
        }
    }

    /// Total TCK cycles clocked so far.
    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    fn edge(&mut self, tms: bool, tdi: bool) {
        let before = self.state;
        let after = before.transition(tms);
        self.cycles += 1;

        match before {
            TapState::CaptureIR => {
                for dev in &self.devices {
                    dev.state.borrow_mut().capture_ir();
                }
            }
            TapState::CaptureDR => {
                for dev in &self.devices {
                    dev.state.borrow_mut().capture_dr();
                }
            }
            TapState::ShiftIR | TapState::ShiftDR => {
                let ir = before == TapState::ShiftIR;
                // TDI enters the device furthest from TDO.
                let mut carry = tdi;
                for dev in self.devices.iter().rev() {
                    carry = dev.state.borrow_mut().shift_one(carry, ir);
                }
            }
            _ => {}
        }

        match after {
            TapState::Reset => {
                for dev in &self.devices {
                    dev.state.borrow_mut().reset();
                }
            }
            TapState::UpdateIR => {
                for dev in &self.devices {
                    dev.state.borrow_mut().update_ir();
                }
            }
            TapState::UpdateDR => {
                for dev in &self.devices {
                    dev.state.borrow_mut().update_dr();
                }
            }
            _ => {}
        }

        self.state = after;
        if let Some(first) = self.devices.first() {
            let ir = matches!(
                after,
                TapState::CaptureIR | TapState::ShiftIR | TapState::Exit1IR
            );
            self.tdo_line = first.state.borrow().head(ir);
        }
    }
}

impl Cable for SimCable {
    fn clock(&mut self, tms: bool, tdi: bool, n: usize) {
        for _ in 0..n {
            self.edge(tms, tdi);
        }
    }

    fn tdo(&mut self) -> bool {
        self.tdo_line
    }

    fn transfer(&mut self, tdi: &BitSlice<u8, Lsb0>, tdo: Option<&mut BitSlice<u8, Lsb0>>) {
        match tdo {
            Some(out) => {
                for (i, bit) in tdi.iter().enumerate() {
                    out.set(i, self.tdo_line);
                    self.edge(false, *bit);
                }
            }
            None => {
                for bit in tdi {
                    self.edge(false, *bit);
                }
            }
        }
    }

    fn trst(&mut self, active: bool) {
        if active {
            self.state = TapState::Reset;
            for dev in &self.devices {
                dev.state.borrow_mut().reset();
            }
        }
    }
}
