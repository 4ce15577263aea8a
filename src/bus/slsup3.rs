//! SLS UP3 education board (Altera Cyclone) bus driver.  The board hangs
//! an 8-bit flash, a 16-bit SRAM and a character LCD off the FPGA's I/O
//! pins, so every access is a matter of wiggling boundary register cells.
//!
//! Documentation:
//! [1] System Level Solutions Inc., "UP3 Education Kit, Reference Manual"

use crate::bus::{Area, BusDriver, BusDriverInfo};
use crate::chain::Chain;
use crate::error::{Error, Result};
use crate::part::{Part, SignalDir, SignalId};

/// FPGA pin numbers of the shared data bus, DQ0 first.
const DATA_PINS: [u32; 16] = [
    94, 96, 98, 100, 102, 104, 106, 113, 95, 97, 99, 101, 103, 105, 107, 114,
];
/// FPGA pin numbers of the address bus, AD0 first.
const ADDR_PINS: [u32; 20] = [
    93, 88, 87, 86, 85, 84, 83, 63, 64, 65, 66, 67, 68, 74, 75, 76, 77, 82, 81, 78,
];

// All addresses and lengths in bytes; the flash is used in byte mode.
const FLASH_START: u32 = 0x000_0000;
const FLASH_SIZE: u64 = 0x020_0000;
const SRAM_START: u32 = 0x020_0000;
const SRAM_SIZE: u64 = 0x002_0000;
const LCD_START: u32 = 0x030_0000;
const LCD_SIZE: u64 = 0x010_0000;

pub const DRIVER: BusDriverInfo = BusDriverInfo {
    name: "slsup3",
    description: "SLS UP3 compatible bus driver via BSR",
    new: Slsup3::new,
};

pub struct Slsup3 {
    part: usize,
    last_addr: u32,
    ad: [SignalId; 20],
    dq: [SignalId; 16],
    nsdce: SignalId,
    sdclk: SignalId,
    noe: SignalId,
    nsrce: SignalId,
    nflce: SignalId,
    nflbyte: SignalId,
    nflby: SignalId,
    nwe: SignalId,
    lcde: SignalId,
    lcdrs: SignalId,
    lcdrw: SignalId,
}

fn in_flash(adr: u32) -> bool {
    adr >= FLASH_START && (adr as u64) < FLASH_START as u64 + FLASH_SIZE
}

fn in_sram(adr: u32) -> bool {
    adr >= SRAM_START && (adr as u64) < SRAM_START as u64 + SRAM_SIZE
}

fn in_lcd(adr: u32) -> bool {
    adr >= LCD_START && (adr as u64) < LCD_START as u64 + LCD_SIZE
}

impl Slsup3 {
    /// Attach every bus signal on the chain's active part.  Any missing
    /// pin fails the construction.
    pub fn new(chain: &mut Chain) -> Result<Box<dyn BusDriver>> {
        let part_idx = chain.active_part;
        let part = chain
            .parts
            .get(part_idx)
            .ok_or_else(|| Error::InvalidParameter("chain has no parts".to_string()))?;

        let pin = |p: u32| part.find_signal(&format!("IO{}", p));
        let pins = |list: &[u32]| -> Result<Vec<SignalId>> { list.iter().map(|&p| pin(p)).collect() };

        let ad = pins(&ADDR_PINS)?
            .try_into()
            .map_err(|_| Error::Internal("address pin count".to_string()))?;
        let dq = pins(&DATA_PINS)?
            .try_into()
            .map_err(|_| Error::Internal("data pin count".to_string()))?;

        Ok(Box::new(Slsup3 {
            part: part_idx,
            last_addr: 0,
            ad,
            dq,
            noe: pin(118)?,
            nsrce: pin(116)?,
            nsdce: pin(119)?,
            nflce: pin(117)?,
            nflbyte: pin(115)?,
            nflby: pin(80)?,
            nwe: pin(79)?,
            sdclk: pin(11)?,
            lcde: pin(50)?,
            lcdrs: pin(108)?,
            lcdrw: pin(73)?,
        }))
    }

    fn part_mut<'a>(&self, chain: &'a mut Chain) -> &'a mut Part {
        &mut chain.parts[self.part]
    }

    /// Reject addresses the board does not decode.
    fn check_area(&self, chain: &Chain, adr: u32) -> Result<Area> {
        let area = self.area(chain, adr)?;
        if area.width == 0 {
            return Err(Error::OutOfBounds(adr));
        }
        Ok(area)
    }

    fn setup_address(&self, chain: &mut Chain, adr: u32) -> Result<()> {
        let part = self.part_mut(chain);

        part.set_signal(self.lcdrs, SignalDir::Output, adr & 1 != 0)?;

        // Flash runs in byte mode: DQ15 selects the byte lane, the
        // address lines carry the word address.
        if in_flash(adr) {
            for (i, &ad) in self.ad.iter().enumerate() {
                part.set_signal(ad, SignalDir::Output, (adr >> (i + 1)) & 1 != 0)?;
            }
            part.set_signal_low(self.nflce)?;
            part.set_signal(self.dq[15], SignalDir::Output, adr & 1 != 0)?;
        } else {
            part.set_signal_high(self.nflce)?;
        }

        if in_sram(adr) {
            part.set_signal_low(self.nsrce)?;
            for (i, &ad) in self.ad.iter().enumerate() {
                part.set_signal(ad, SignalDir::Output, (adr >> (i + 1)) & 1 != 0)?;
            }
        } else {
            part.set_signal_high(self.nsrce)?;
        }
        Ok(())
    }

    fn set_data_in(&self, chain: &mut Chain, adr: u32) -> Result<()> {
        let width = self.area(chain, adr)?.width;
        let part = self.part_mut(chain);
        for &dq in self.dq.iter().take(width) {
            part.set_signal_input(dq)?;
        }
        Ok(())
    }

    fn setup_data(&self, chain: &mut Chain, adr: u32, data: u32) -> Result<()> {
        let width = self.area(chain, adr)?.width;
        let part = self.part_mut(chain);
        for (i, &dq) in self.dq.iter().take(width).enumerate() {
            part.set_signal(dq, SignalDir::Output, (data >> i) & 1 != 0)?;
        }
        Ok(())
    }

    fn get_data(&self, chain: &Chain, adr: u32) -> Result<u32> {
        let width = self.area(chain, adr)?.width;
        let part = &chain.parts[self.part];
        let mut data = 0;
        for (i, &dq) in self.dq.iter().take(width).enumerate() {
            if part.get_signal(dq)? {
                data |= 1 << i;
            }
        }
        Ok(data)
    }

    /// Pulse the LCD enable around one committed shift.
    fn lcd_strobe(&self, chain: &mut Chain) -> Result<()> {
        self.part_mut(chain).set_signal_high(self.lcde)?;
        chain.shift_data_registers(false)?;
        self.part_mut(chain).set_signal_low(self.lcde)?;
        Ok(())
    }

    /// Control line defaults shared by reads and writes; `read` sets the
    /// LCD direction pin.
    fn setup_controls(&self, chain: &mut Chain, read: bool) -> Result<()> {
        let part = self.part_mut(chain);
        part.set_signal_high(self.nsdce)?; // inhibit SDRAM
        part.set_signal(self.noe, SignalDir::Output, !read)?;
        part.set_signal_high(self.nsrce)?;
        part.set_signal_high(self.nflce)?;
        part.set_signal_low(self.nflbyte)?;
        part.set_signal_low(self.nflby)?;
        part.set_signal_high(self.nwe)?;
        part.set_signal_low(self.sdclk)?;
        part.set_signal_low(self.lcde)?;
        part.set_signal(self.lcdrw, SignalDir::Output, read)?;
        Ok(())
    }
}

impl BusDriver for Slsup3 {
    fn name(&self) -> &'static str {
        DRIVER.name
    }

    fn part(&self) -> usize {
        self.part
    }

    fn area(&self, _chain: &Chain, adr: u32) -> Result<Area> {
        if in_flash(adr) {
            return Ok(Area {
                description: Some("Flash Memory (2 MByte) byte mode"),
                start: FLASH_START,
                length: FLASH_SIZE,
                width: 8,
            });
        }
        if in_sram(adr) {
            return Ok(Area {
                description: Some("SRAM 128KByte (64K x 16)"),
                start: SRAM_START,
                length: SRAM_SIZE,
                width: 16,
            });
        }
        if in_lcd(adr) {
            return Ok(Area {
                description: Some("LCD Display (RS select by A0)"),
                start: LCD_START,
                length: LCD_SIZE,
                width: 8,
            });
        }
        Ok(Area {
            description: None,
            start: 0x040_0000,
            length: 0xFFC0_0000,
            width: 0,
        })
    }

    fn read_start(&mut self, chain: &mut Chain, adr: u32) -> Result<()> {
        self.check_area(chain, adr)?;
        self.last_addr = adr;

        self.setup_controls(chain, true)?;
        self.setup_address(chain, adr)?;

        if in_lcd(adr) {
            self.lcd_strobe(chain)?;
        }

        self.set_data_in(chain, adr)?;
        chain.shift_data_registers(false)
    }

    fn read_next(&mut self, chain: &mut Chain, adr: u32) -> Result<u32> {
        self.check_area(chain, adr)?;
        self.setup_address(chain, adr)?;

        if in_lcd(adr) {
            self.lcd_strobe(chain)?;
        }

        chain.shift_data_registers(true)?;
        let data = self.get_data(chain, self.last_addr)?;
        self.last_addr = adr;
        Ok(data)
    }

    fn read_end(&mut self, chain: &mut Chain) -> Result<u32> {
        if in_lcd(self.last_addr) {
            self.lcd_strobe(chain)?;
        }

        self.part_mut(chain).set_signal_high(self.noe)?;
        chain.shift_data_registers(true)?;
        self.get_data(chain, self.last_addr)
    }

    fn write(&mut self, chain: &mut Chain, adr: u32, data: u32) -> Result<()> {
        self.check_area(chain, adr)?;

        self.setup_controls(chain, false)?;
        self.setup_address(chain, adr)?;
        self.setup_data(chain, adr, data)?;

        if in_lcd(adr) {
            chain.shift_data_registers(false)?;
            self.lcd_strobe(chain)?;
            chain.shift_data_registers(false)
        } else {
            // Commit address and data, then pulse WE around two more
            // committed shifts.
            chain.shift_data_registers(false)?;
            self.part_mut(chain).set_signal_low(self.nwe)?;
            chain.shift_data_registers(false)?;
            self.part_mut(chain).set_signal_high(self.nwe)?;
            chain.shift_data_registers(false)
        }
    }
}
