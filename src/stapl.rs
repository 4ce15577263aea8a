//! Bit-level JTAG access for STAPL/JAM players.  A bytecode interpreter
//! replaying vendor programming files wants raw clocks, not registers;
//! this adapter is its only point of contact with the chain, so the
//! modeled controller state stays in lockstep with every cycle the
//! player issues.

use std::thread;
use std::time::Duration;

use bitvec::prelude::*;

use crate::chain::Chain;
use crate::error::{Error, Result};
use crate::statemachine::TapState;

pub struct JamIo<'a> {
    chain: &'a mut Chain,
}

impl<'a> JamIo<'a> {
    /// Borrow the chain for the duration of a player run.
    pub fn new(chain: &'a mut Chain) -> Self {
        Self { chain }
    }

    /// One TCK cycle.  When `read_tdo` is set, returns the TDO value of
    /// this cycle, sampled before the rising edge.
    pub fn jtag_io(&mut self, tms: bool, tdi: bool, read_tdo: bool) -> Option<bool> {
        let tdo = read_tdo.then(|| self.chain.tdo());
        self.chain.clock(tms, tdi, 1);
        tdo
    }

    /// Bulk form of [`JamIo::jtag_io`] with TMS low: bit i of either
    /// buffer corresponds to the i-th clock of the transfer.
    pub fn jtag_io_transfer(
        &mut self,
        tdi: &BitSlice<u8, Lsb0>,
        tdo: Option<&mut BitSlice<u8, Lsb0>>,
    ) {
        self.chain.transfer(tdi, tdo);
    }

    /// Walk to `state` by the shortest path.
    pub fn goto_state(&mut self, state: TapState) -> Result<()> {
        self.chain.goto_state(state)
    }

    /// Sit in a stable state for `cycles` clocks, walking there first if
    /// needed.
    pub fn wait_cycles(&mut self, cycles: usize, wait_state: TapState) -> Result<()> {
        if !wait_state.is_stable() {
            return Err(Error::InvalidParameter(format!(
                "cannot wait in transient state {}",
                wait_state
            )));
        }
        if self.chain.state() != Some(wait_state) {
            self.chain.goto_state(wait_state)?;
        }
        self.chain.clock(wait_state.loop_tms(), false, cycles);
        Ok(())
    }

    /// Flush queued cycles out to the cable, then stall the player.
    pub fn flush_and_delay(&mut self, microseconds: u64) {
        self.chain.flush();
        thread::sleep(Duration::from_micros(microseconds));
    }
}
