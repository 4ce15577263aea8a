//! Full-stack exercise over the simulator cable: enumerate a chain,
//! describe the part, bring up a bus driver and move data through the
//! boundary register the way a memory dump would.

use jtag_chain::bus::Session;
use jtag_chain::cable::sim::{SimCable, SimDevice};
use jtag_chain::error::Error;
use jtag_chain::part::{Part, Signal, BSR};

const DATA_PINS: [u32; 16] = [
    94, 96, 98, 100, 102, 104, 106, 113, 95, 97, 99, 101, 103, 105, 107, 114,
];
const ADDR_PINS: [u32; 20] = [
    93, 88, 87, 86, 85, 84, 83, 63, 64, 65, 66, 67, 68, 74, 75, 76, 77, 82, 81, 78,
];
const CONTROL_PINS: [u32; 11] = [118, 116, 119, 117, 115, 80, 79, 11, 50, 108, 73];

const EXTEST: &str = "0000000000";
const IDCODE: u32 = 0x020B_10DD;

/// Boundary cell layout used by the test part: signal i owns cells
/// 3i (output), 3i+1 (input) and 3i+2 (control, high = tristate).
fn bsr_len() -> usize {
    (ADDR_PINS.len() + DATA_PINS.len() + CONTROL_PINS.len()) * 3
}

fn out_cell(signal: usize) -> usize {
    3 * signal
}

fn in_cell(signal: usize) -> usize {
    3 * signal + 1
}

fn dq_signal(i: usize) -> usize {
    ADDR_PINS.len() + i
}

fn up3_part() -> Part {
    let mut part = Part::new("EP1C6", 10);
    let mut names: Vec<String> = Vec::new();
    names.extend(ADDR_PINS.iter().map(|p| format!("IO{}", p)));
    names.extend(DATA_PINS.iter().map(|p| format!("IO{}", p)));
    names.extend(CONTROL_PINS.iter().map(|p| format!("IO{}", p)));
    part.add_data_register(BSR, bsr_len()).unwrap();
    part.add_instruction("EXTEST", EXTEST, BSR).unwrap();
    for (i, name) in names.iter().enumerate() {
        part.add_signal(Signal::new(name, out_cell(i), in_cell(i), out_cell(i) + 2, true));
    }
    part
}

/// A boundary register capture presenting `data` on the DQ input cells.
fn bsr_capture(data: u16) -> String {
    let len = bsr_len();
    let mut bits = vec!['0'; len];
    for i in 0..16 {
        if (data >> i) & 1 != 0 {
            bits[len - 1 - in_cell(dq_signal(i))] = '1';
        }
    }
    bits.into_iter().collect()
}

fn up3_session() -> (Session, SimDevice) {
    let _ = env_logger::builder().is_test(true).try_init();
    let dev = SimDevice::new(10, Some(IDCODE)).with_register(EXTEST, bsr_len());
    let mut session = Session::new(Box::new(SimCable::new(vec![dev.clone()])));

    let taps = session.chain.detect().unwrap();
    assert_eq!(taps.len(), 1);
    assert_eq!(taps[0].ir_length, 10);
    assert_eq!(taps[0].idcode.as_ref().unwrap().raw(), IDCODE);

    session.chain.add_part(up3_part());
    session.chain.reset_bypass().unwrap();
    session.init_bus("slsup3").unwrap();

    // The prepare pass latched EXTEST into the device.
    assert_eq!(dev.latched_ir().to_string(), EXTEST);
    (session, dev)
}

#[test]
fn pipelined_sram_reads() {
    let (mut session, dev) = up3_session();

    // One capture per DR shift: the read_start shift is address setup
    // only, each following shift returns the data of the previous
    // address.
    dev.push_capture(&bsr_capture(0x0000));
    dev.push_capture(&bsr_capture(0xCAFE));
    dev.push_capture(&bsr_capture(0x1234));
    dev.push_capture(&bsr_capture(0xF00D));

    session.read_start(0x020_0000).unwrap();
    assert_eq!(session.read_next(0x020_0002).unwrap(), 0xCAFE);
    assert_eq!(session.read_next(0x020_0004).unwrap(), 0x1234);
    assert_eq!(session.read_end().unwrap(), 0xF00D);

    // During the reads the data pins were tristated.
    let updates = dev.updates();
    let last = updates.last().unwrap();
    for i in 0..16 {
        assert!(last.get(out_cell(dq_signal(i)) + 2).unwrap());
    }
}

#[test]
fn flash_byte_read() {
    let (mut session, dev) = up3_session();
    assert_eq!(session.area(0x3).unwrap().width, 8);

    dev.push_capture(&bsr_capture(0x0000));
    dev.push_capture(&bsr_capture(0x00AB));
    assert_eq!(session.read(0x3).unwrap(), 0xAB);
}

#[test]
fn sram_write_pulses_we() {
    let (mut session, dev) = up3_session();
    session.write(0x020_0002, 0xBEEF).unwrap();

    // Setup shift, WE-low shift, WE-high shift.
    let updates = dev.updates();
    assert_eq!(updates.len(), 3);
    let nwe = ADDR_PINS.len() + DATA_PINS.len() + 6; // IO79
    assert!(updates[0].get(out_cell(nwe)).unwrap());
    assert!(!updates[1].get(out_cell(nwe)).unwrap());
    assert!(updates[2].get(out_cell(nwe)).unwrap());

    // Data and chip select held through the WE pulse.
    for i in 0..16 {
        let expect = (0xBEEF >> i) & 1 != 0;
        assert_eq!(updates[1].get(out_cell(dq_signal(i))).unwrap(), expect);
        // Output drivers enabled while writing.
        assert!(!updates[1].get(out_cell(dq_signal(i)) + 2).unwrap());
    }
    let nsrce = ADDR_PINS.len() + DATA_PINS.len() + 1; // IO116
    assert!(!updates[1].get(out_cell(nsrce)).unwrap());
    // The word address went out on the AD lines.
    assert!(updates[1].get(out_cell(0)).unwrap()); // AD0 = (adr >> 1) & 1
}

#[test]
fn unmapped_address_is_recoverable() {
    let (mut session, dev) = up3_session();
    assert!(matches!(
        session.read(0x050_0000),
        Err(Error::OutOfBounds(_))
    ));

    // The session keeps working after the failed access.
    dev.push_capture(&bsr_capture(0x0000));
    dev.push_capture(&bsr_capture(0x0042));
    assert_eq!(session.read(0x020_0000).unwrap(), 0x42);
}
