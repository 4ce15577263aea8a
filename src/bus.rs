//! Memory-style access over boundary-scan pins.  A bus driver knows which
//! part signals form the address, data and control lines of an external
//! bus, and sequences DR shifts so that each shift commits one step of a
//! bus cycle through Update-DR.
pub mod slsup3;

use std::thread;
use std::time::Duration;

use log::info;

use crate::cable::Cable;
use crate::chain::Chain;
use crate::error::{Error, Result};
use crate::part::{SignalId, BSR};

/// One mapped region of the address space.  `width == 0` marks the
/// "no such area" sentinel returned for unmapped addresses.
#[derive(Clone, Debug)]
pub struct Area {
    pub description: Option<&'static str>,
    pub start: u32,
    pub length: u64,
    pub width: usize,
}

impl Area {
    pub fn contains(&self, adr: u32) -> bool {
        let adr = adr as u64;
        adr >= self.start as u64 && adr - (self.start as u64) < self.length
    }
}

/// Board-specific memory access over the scan chain.  The chain is passed
/// into every call rather than stored, so one mutable owner sequences all
/// shifts.
///
/// Reads are pipelined: `read_start(a0)` begins the first access,
/// each `read_next(a_i)` returns the data of the previous address while
/// starting the next access, and `read_end` drains the last one.  Writes
/// are not pipelined.
pub trait BusDriver {
    fn name(&self) -> &'static str;

    /// Index of the part this driver works through.
    fn part(&self) -> usize;

    /// The memory area containing `adr`, or the zero-width sentinel.
    fn area(&self, chain: &Chain, adr: u32) -> Result<Area>;

    /// Board-specific bring-up, e.g. entering a debug mode.  Bounded
    /// polling loops belong here; the chain primitives never retry.
    fn init(&mut self, _chain: &mut Chain) -> Result<()> {
        Ok(())
    }

    /// Put the chain into EXTEST so the boundary register drives the
    /// pins.  Call once before a burst of reads or writes.
    fn prepare(&mut self, chain: &mut Chain) -> Result<()> {
        let saved = chain.active_part;
        chain.active_part = self.part();
        let result = chain
            .set_instruction("EXTEST")
            .and_then(|_| chain.shift_instructions());
        chain.active_part = saved;
        result
    }

    fn read_start(&mut self, chain: &mut Chain, adr: u32) -> Result<()>;

    fn read_next(&mut self, chain: &mut Chain, adr: u32) -> Result<u32>;

    fn read_end(&mut self, chain: &mut Chain) -> Result<u32>;

    /// Single-word convenience read.
    fn read(&mut self, chain: &mut Chain, adr: u32) -> Result<u32> {
        self.read_start(chain, adr)?;
        self.read_end(chain)
    }

    fn write_start(&mut self, _chain: &mut Chain, _adr: u32) -> Result<()> {
        Ok(())
    }

    fn write(&mut self, chain: &mut Chain, adr: u32, data: u32) -> Result<()>;

    fn printinfo(&self, _chain: &Chain) {
        info!("{} bus driver via BSR (JTAG part No. {})", self.name(), self.part());
    }
}

/// Poll a status signal across repeated DR shifts until it reads
/// `expected`.  For init sequences that handshake with the target, e.g.
/// waiting for a debug-mode acknowledge bit.  The chain primitives never
/// retry on their own, so the bound lives here: after `tries` shifts the
/// poll gives up and reports the captured boundary register for
/// diagnosis.
pub fn wait_for_signal(
    chain: &mut Chain,
    part: usize,
    signal: SignalId,
    expected: bool,
    tries: usize,
    delay: Duration,
) -> Result<()> {
    for _ in 0..tries {
        chain.shift_data_registers(true)?;
        if chain.parts[part].get_signal(signal)? == expected {
            return Ok(());
        }
        if !delay.is_zero() {
            thread::sleep(delay);
        }
    }
    let seen = chain.parts[part]
        .data_register(BSR)
        .map(|bsr| bsr.output.to_string())
        .unwrap_or_default();
    Err(Error::Timeout(format!(
        "status signal did not go {} in {} polls (last capture {})",
        if expected { "high" } else { "low" },
        tries,
        seen
    )))
}

/// Registry entry for a bus driver, so buses can be constructed by name.
pub struct BusDriverInfo {
    pub name: &'static str,
    pub description: &'static str,
    pub new: fn(&mut Chain) -> Result<Box<dyn BusDriver>>,
}

/// All built-in bus drivers.
pub const BUS_DRIVERS: &[BusDriverInfo] = &[slsup3::DRIVER];

/// Construct a bus driver by registry name against the chain's active
/// part.
pub fn new_bus(chain: &mut Chain, name: &str) -> Result<Box<dyn BusDriver>> {
    let info = BUS_DRIVERS
        .iter()
        .find(|d| d.name.eq_ignore_ascii_case(name))
        .ok_or_else(|| Error::NotFound(format!("bus driver {:?}", name)))?;
    (info.new)(chain)
}

/// A complete debugging session: one chain plus the buses registered on
/// it.  Replaces the process-wide driver/chain globals of older tools so
/// several independent sessions can coexist.
pub struct Session {
    pub chain: Chain,
    buses: Vec<Box<dyn BusDriver>>,
    active: Option<usize>,
}

impl Session {
    pub fn new(cable: Box<dyn Cable>) -> Self {
        Self {
            chain: Chain::new(cable),
            buses: Vec::new(),
            active: None,
        }
    }

    /// Construct the named bus against the chain's active part, run its
    /// init sequence and an initial EXTEST prepare, and make it the
    /// active bus.
    pub fn init_bus(&mut self, name: &str) -> Result<()> {
        let mut bus = new_bus(&mut self.chain, name)?;
        bus.init(&mut self.chain)?;
        bus.prepare(&mut self.chain)?;
        self.buses.push(bus);
        self.active = Some(self.buses.len() - 1);
        Ok(())
    }

    /// Switch the active bus.  Chain state is deliberately left alone;
    /// re-run [`Session::prepare`] before touching memory.
    pub fn select_bus(&mut self, index: usize) -> Result<()> {
        if index >= self.buses.len() {
            return Err(Error::InvalidParameter(format!(
                "no bus {} (have {})",
                index,
                self.buses.len()
            )));
        }
        self.active = Some(index);
        Ok(())
    }

    fn active_index(&self) -> Result<usize> {
        self.active
            .ok_or_else(|| Error::NotFound("active bus".to_string()))
    }

    pub fn prepare(&mut self) -> Result<()> {
        let i = self.active_index()?;
        self.buses[i].prepare(&mut self.chain)
    }

    pub fn area(&self, adr: u32) -> Result<Area> {
        let i = self.active_index()?;
        self.buses[i].area(&self.chain, adr)
    }

    pub fn read(&mut self, adr: u32) -> Result<u32> {
        let i = self.active_index()?;
        self.buses[i].read(&mut self.chain, adr)
    }

    pub fn read_start(&mut self, adr: u32) -> Result<()> {
        let i = self.active_index()?;
        self.buses[i].read_start(&mut self.chain, adr)
    }

    pub fn read_next(&mut self, adr: u32) -> Result<u32> {
        let i = self.active_index()?;
        self.buses[i].read_next(&mut self.chain, adr)
    }

    pub fn read_end(&mut self) -> Result<u32> {
        let i = self.active_index()?;
        self.buses[i].read_end(&mut self.chain)
    }

    pub fn write(&mut self, adr: u32, data: u32) -> Result<()> {
        let i = self.active_index()?;
        self.buses[i].write(&mut self.chain, adr, data)
    }

    pub fn printinfo(&self) -> Result<()> {
        let i = self.active_index()?;
        self.buses[i].printinfo(&self.chain);
        Ok(())
    }
}
