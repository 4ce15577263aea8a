//! This crate drives JTAG scan chains at a few levels of abstraction.
//! At the bottom sits the `Cable` trait: anything that can clock TCK
//! while driving TMS/TDI and sampling TDO.  A software simulator cable
//! is included; hardware adapters implement the same trait.
//!
//! On top of a cable, a `Chain` tracks the IEEE 1149.1 controller state
//! in lockstep with every cycle it clocks, walks the state machine by
//! precomputed shortest paths, and shifts whole instruction and data
//! registers through every part on the chain, with BYPASS padding
//! handled by the part descriptions.  `Chain::detect` enumerates an
//! unknown chain from its IDCODEs and IR capture patterns.
//!
//! Parts map symbolic signal and instruction names onto boundary
//! register bits, which is what the bus drivers build on: a `BusDriver`
//! turns "read word at address" into boundary register shifts, with
//! pipelined reads so a memory dump costs one shift per word.  A
//! `Session` bundles one chain with the buses registered on it.
//!
//! # Example
//! ```
//! use jtag_chain::cable::sim::{SimCable, SimDevice};
//! use jtag_chain::chain::Chain;
//! use jtag_chain::part::Part;
//!
//! // One 6-bit-IR device behind the simulator cable; swap in a real
//! // `Cable` implementation to talk to hardware.
//! let device = SimDevice::new(6, Some(0x0597_3045));
//! let mut chain = Chain::new(Box::new(SimCable::new(vec![device])));
//!
//! let taps = chain.detect().unwrap();
//! assert_eq!(taps.len(), 1);
//! assert_eq!(taps[0].ir_length, 6);
//!
//! chain.add_part(Part::new("fpga", 6));
//! chain.reset_bypass().unwrap();
//! ```

pub mod bus;
pub mod cable;
pub mod chain;
pub mod detect;
pub mod error;
pub mod part;
pub mod register;
pub mod stapl;
pub mod statemachine;

pub use error::{Error, Result};
