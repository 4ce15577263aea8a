//! Devices on the chain and their registers.  A `Part` maps symbolic
//! names (signals like "IO93", instructions like "EXTEST") onto bit
//! positions in its shift registers, so bus drivers never deal in raw bit
//! indices.

use log::warn;

use crate::error::{Error, Result};
use crate::register::TapRegister;

/// Name of the boundary-scan register every bus driver works through.
pub const BSR: &str = "BSR";
/// Name of the mandatory 1-bit bypass register.
pub const BYPASS: &str = "BYPASS";

/// An IR or DR path: the `input` vector is what the next shift will send
/// to the device, `output` receives the captured bits.  Both stay the
/// same length for the lifetime of the part.
pub struct DataRegister {
    pub name: String,
    pub input: TapRegister,
    pub output: TapRegister,
}

impl DataRegister {
    fn new(name: &str, len: usize) -> Self {
        Self {
            name: name.to_string(),
            input: TapRegister::new(len),
            output: TapRegister::new(len),
        }
    }

    pub fn len(&self) -> usize {
        self.input.len()
    }

    pub fn is_empty(&self) -> bool {
        self.input.is_empty()
    }
}

/// An instruction opcode and the data register it selects.  `capture`
/// receives the bits the device shifted out of its IR.
pub struct Instruction {
    pub name: String,
    pub opcode: TapRegister,
    pub capture: TapRegister,
    data_register: usize,
}

/// Index of a signal within its part, handed out by
/// [`Part::find_signal`].
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct SignalId(usize);

/// Drive direction for [`Part::set_signal`].
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum SignalDir {
    Input,
    Output,
}

/// A pin wired into the boundary register.  `output` is the BSR cell
/// driving the pin, `input` the cell sensing it; `control` gates the
/// output driver, with `disable` being the value that tristates it.
pub struct Signal {
    pub name: String,
    pub output: Option<usize>,
    pub input: Option<usize>,
    pub control: Option<SignalControl>,
}

pub struct SignalControl {
    pub bit: usize,
    pub disable: bool,
}

impl Signal {
    /// A bidirectional pin with an output-enable cell.
    pub fn new(name: &str, output: usize, input: usize, control: usize, disable: bool) -> Self {
        Self {
            name: name.to_string(),
            output: Some(output),
            input: Some(input),
            control: Some(SignalControl {
                bit: control,
                disable,
            }),
        }
    }

    /// An output-only pin without a controllable driver.
    pub fn output_only(name: &str, output: usize) -> Self {
        Self {
            name: name.to_string(),
            output: Some(output),
            input: None,
            control: None,
        }
    }

    /// An input-only pin.
    pub fn input_only(name: &str, input: usize) -> Self {
        Self {
            name: name.to_string(),
            output: None,
            input: Some(input),
            control: None,
        }
    }
}

/// One device in the scan chain.
pub struct Part {
    pub name: String,
    instruction_length: usize,
    signals: Vec<Signal>,
    instructions: Vec<Instruction>,
    data_registers: Vec<DataRegister>,
    active_instruction: Option<usize>,
}

impl Part {
    /// A part with the given IR length.  The mandatory BYPASS register and
    /// its all-ones instruction come predefined.
    pub fn new(name: &str, instruction_length: usize) -> Self {
        let mut opcode = TapRegister::new(instruction_length);
        opcode.fill(true);
        let mut part = Self {
            name: name.to_string(),
            instruction_length,
            signals: Vec::new(),
            instructions: Vec::new(),
            data_registers: vec![DataRegister::new(BYPASS, 1)],
            active_instruction: None,
        };
        part.instructions.push(Instruction {
            name: BYPASS.to_string(),
            opcode,
            capture: TapRegister::new(instruction_length),
            data_register: 0,
        });
        part
    }

    pub fn instruction_length(&self) -> usize {
        self.instruction_length
    }

    /// Define a data register.  Lengths below one get clamped to the
    /// 1-bit minimum a shift path needs.
    pub fn add_data_register(&mut self, name: &str, len: usize) -> Result<usize> {
        if self.data_registers.iter().any(|r| r.name.eq_ignore_ascii_case(name)) {
            return Err(Error::InvalidParameter(format!(
                "data register {:?} already defined",
                name
            )));
        }
        self.data_registers.push(DataRegister::new(name, len.max(1)));
        Ok(self.data_registers.len() - 1)
    }

    /// Define an instruction by opcode bit string, bound to a data
    /// register defined earlier.
    pub fn add_instruction(&mut self, name: &str, opcode: &str, register: &str) -> Result<()> {
        if opcode.len() != self.instruction_length {
            return Err(Error::InvalidParameter(format!(
                "opcode {:?} does not fit a {}-bit instruction register",
                opcode, self.instruction_length
            )));
        }
        if self.instructions.iter().any(|i| i.name.eq_ignore_ascii_case(name)) {
            return Err(Error::InvalidParameter(format!(
                "instruction {:?} already defined",
                name
            )));
        }
        let data_register = self.find_data_register(register)?;
        self.instructions.push(Instruction {
            name: name.to_string(),
            opcode: opcode.parse()?,
            capture: TapRegister::new(self.instruction_length),
            data_register,
        });
        Ok(())
    }

    fn find_data_register(&self, name: &str) -> Result<usize> {
        self.data_registers
            .iter()
            .position(|r| r.name.eq_ignore_ascii_case(name))
            .ok_or_else(|| Error::NotFound(format!("data register {:?}", name)))
    }

    pub fn data_register(&self, name: &str) -> Result<&DataRegister> {
        Ok(&self.data_registers[self.find_data_register(name)?])
    }

    pub fn data_register_mut(&mut self, name: &str) -> Result<&mut DataRegister> {
        let idx = self.find_data_register(name)?;
        Ok(&mut self.data_registers[idx])
    }

    pub fn find_instruction(&self, name: &str) -> Result<usize> {
        self.instructions
            .iter()
            .position(|i| i.name.eq_ignore_ascii_case(name))
            .ok_or_else(|| Error::NotFound(format!("instruction {:?}", name)))
    }

    /// Select the named instruction for the next IR shift.
    pub fn set_instruction(&mut self, name: &str) -> Result<()> {
        self.active_instruction = Some(self.find_instruction(name)?);
        Ok(())
    }

    /// Re-resolve the active instruction from a raw opcode, e.g. after an
    /// IR shift moved unlisted bits into the device.  Unknown opcodes
    /// clear the selection.
    pub(crate) fn set_instruction_by_opcode(&mut self, opcode: &TapRegister) {
        self.active_instruction = self
            .instructions
            .iter()
            .position(|i| &i.opcode == opcode);
        if self.active_instruction.is_none() {
            warn!(
                "part {}: opcode {} matches no known instruction",
                self.name, opcode
            );
        }
    }

    pub fn active_instruction(&self) -> Option<&Instruction> {
        self.active_instruction.map(|i| &self.instructions[i])
    }

    pub(crate) fn active_instruction_mut(&mut self) -> Option<&mut Instruction> {
        self.active_instruction.map(|i| &mut self.instructions[i])
    }

    /// The data register selected by the active instruction.
    pub fn active_data_register(&self) -> Option<&DataRegister> {
        self.active_instruction()
            .map(|i| &self.data_registers[i.data_register])
    }

    pub(crate) fn active_data_register_mut(&mut self) -> Option<&mut DataRegister> {
        let idx = self.active_instruction.map(|i| self.instructions[i].data_register)?;
        Some(&mut self.data_registers[idx])
    }

    pub fn add_signal(&mut self, signal: Signal) -> SignalId {
        self.signals.push(signal);
        SignalId(self.signals.len() - 1)
    }

    pub fn find_signal(&self, name: &str) -> Result<SignalId> {
        self.signals
            .iter()
            .position(|s| s.name.eq_ignore_ascii_case(name))
            .map(SignalId)
            .ok_or_else(|| Error::NotFound(format!("signal {:?}", name)))
    }

    /// Drive a signal for the next DR shift.  Output mode writes the value
    /// into the BSR cell and enables the pin driver; input mode tristates
    /// the driver so the pin can be sampled.
    pub fn set_signal(&mut self, id: SignalId, dir: SignalDir, value: bool) -> Result<()> {
        let signal = &self.signals[id.0];
        let output = signal.output;
        let input = signal.input;
        let control = signal.control.as_ref().map(|c| (c.bit, c.disable));
        let name = signal.name.clone();
        let bsr = self.data_register_mut(BSR)?;
        match dir {
            SignalDir::Output => {
                let bit = output.ok_or_else(|| {
                    Error::InvalidParameter(format!("signal {:?} cannot drive", name))
                })?;
                bsr.input.set(bit, value)?;
                if let Some((ctl, disable)) = control {
                    bsr.input.set(ctl, !disable)?;
                }
            }
            SignalDir::Input => {
                if input.is_none() {
                    return Err(Error::InvalidParameter(format!(
                        "signal {:?} cannot be sampled",
                        name
                    )));
                }
                if let Some((ctl, disable)) = control {
                    bsr.input.set(ctl, disable)?;
                }
            }
        }
        Ok(())
    }

    pub fn set_signal_high(&mut self, id: SignalId) -> Result<()> {
        self.set_signal(id, SignalDir::Output, true)
    }

    pub fn set_signal_low(&mut self, id: SignalId) -> Result<()> {
        self.set_signal(id, SignalDir::Output, false)
    }

    pub fn set_signal_input(&mut self, id: SignalId) -> Result<()> {
        self.set_signal(id, SignalDir::Input, false)
    }

    /// Read a signal from the last captured boundary register contents.
    pub fn get_signal(&self, id: SignalId) -> Result<bool> {
        let signal = &self.signals[id.0];
        let bit = signal.input.ok_or_else(|| {
            Error::InvalidParameter(format!("signal {:?} is not an input", signal.name))
        })?;
        self.data_register(BSR)?.output.get(bit)
    }
}
