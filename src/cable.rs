//! Transport abstraction.  A `Cable` is anything that can clock TCK while
//! driving TMS/TDI and sampling TDO; the chain layer never talks to
//! hardware except through this trait.
//!
//! Implementations are free to batch `clock` and `transfer` calls
//! internally for throughput; `tdo` and capturing transfers must
//! synchronize with the hardware before returning.  This lets the same
//! chain code run over an immediate bit-banged link or a deferred,
//! command-queued one.
pub mod sim;

use bitvec::prelude::*;

pub trait Cable {
    /// Clock `n` TCK cycles with TMS and TDI held at the given values.
    fn clock(&mut self, tms: bool, tdi: bool, n: usize);

    /// Sample the current TDO level.  Forces any queued cycles out first.
    fn tdo(&mut self) -> bool;

    /// Clock one cycle per input bit with TMS low, driving TDI from
    /// `tdi`.  When `tdo` is given, bit i receives the TDO value sampled
    /// before the i-th rising edge; the slice must be at least as long as
    /// `tdi`.
    fn transfer(&mut self, tdi: &BitSlice<u8, Lsb0>, tdo: Option<&mut BitSlice<u8, Lsb0>>);

    /// Push any internally queued cycles to the transport.
    fn flush(&mut self) {}

    /// Drive the optional TRST line.  Cables without TRST ignore this.
    fn trst(&mut self, _active: bool) {}
}
