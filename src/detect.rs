//! Chain enumeration: decoding IDCODEs and inferring instruction register
//! lengths from the bit streams captured right after a reset.

use bitfield::bitfield;
use bitvec::field::BitField;
use bitvec::prelude::*;

use crate::error::{Error, Result};

bitfield! {
    /// A 32-bit device identification code as captured from the ID
    /// register path after Test-Logic-Reset.
    #[derive(Copy, Clone, PartialEq, Eq)]
    pub struct IdCode(u32);
    impl Debug;

    u8;
    /// Design revision.
    pub version, set_version: 31, 28;

    u16;
    /// Vendor-assigned part number.
    pub part_number, set_part_number: 27, 12;

    /// JEP106 manufacturer code, continuation count plus identity.
    pub manufacturer, set_manufacturer: 11, 1;

    u8;
    pub manufacturer_continuation, set_manufacturer_continuation: 11, 8;
    pub manufacturer_identity, set_manufacturer_identity: 7, 1;

    bool;
    /// Fixed to one so a bypass bit can never be mistaken for an IDCODE.
    pub lsbit, set_lsbit: 0;
}

impl IdCode {
    pub fn raw(&self) -> u32 {
        self.0
    }

    /// A code with the mandatory marker bit and a usable manufacturer
    /// field.
    pub fn valid(&self) -> bool {
        self.lsbit() && self.manufacturer() != 0 && self.manufacturer() != 127
    }

    /// JEP106 manufacturer name, when the code bank knows it.
    pub fn manufacturer_name(&self) -> Option<&'static str> {
        jep106::JEP106Code::new(self.manufacturer_continuation(), self.manufacturer_identity())
            .get()
    }
}

impl std::fmt::Display for IdCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.manufacturer_name() {
            Some(name) => write!(f, "0x{:08X} ({})", self.0, name),
            None => write!(f, "0x{:08X}", self.0),
        }
    }
}

/// One enumerated device, in shift order.
#[derive(Debug)]
pub struct DetectedTap {
    pub idcode: Option<IdCode>,
    pub ir_length: usize,
}

/// Split a captured post-reset DR chain into devices.  Each device
/// contributes either its 32-bit IDCODE (marker bit set) or a single
/// zero bit when it powers up in BYPASS.  The all-ones tail produced by
/// shifting ones into an over-long read ends the walk.
pub fn extract_idcodes(mut dr: &BitSlice<u8, Lsb0>) -> Result<Vec<Option<IdCode>>> {
    let mut codes = Vec::new();

    while !dr.is_empty() && !dr.all() {
        if dr[0] {
            if dr.len() < 32 {
                return Err(Error::Format(format!(
                    "truncated IDCODE: {} bits left",
                    dr.len()
                )));
            }
            let code = IdCode(dr[..32].load_le::<u32>());
            codes.push(Some(code));
            dr = &dr[32..];
        } else {
            codes.push(None);
            dr = &dr[1..];
        }
    }

    Ok(codes)
}

/// Infer per-device IR lengths from a captured IR chain.  1149.1 fixes
/// the two least significant capture bits of every IR to 01, so each
/// device starts a `1, 0` pattern; `count` (from the IDCODE pass) pins
/// down how many to expect.  Devices with design-specific capture bits
/// above the mandatory pair would defeat this heuristic and are reported
/// as a format error rather than guessed at.
pub fn extract_ir_lengths(ir: &BitSlice<u8, Lsb0>, count: usize) -> Result<Vec<usize>> {
    if count == 0 {
        return Ok(Vec::new());
    }

    let starts: Vec<usize> = (0..ir.len())
        .filter(|&p| ir[p] && ir.get(p + 1).map(|b| !*b).unwrap_or(false))
        .collect();

    if starts.first() != Some(&0) {
        return Err(Error::Format(
            "IR chain does not begin with the mandatory 01 pattern".into(),
        ));
    }
    if starts.len() != count {
        return Err(Error::Format(format!(
            "expected {} IR capture patterns, found {}",
            count,
            starts.len()
        )));
    }

    let mut lengths: Vec<usize> = starts.windows(2).map(|w| w[1] - w[0]).collect();
    let last = starts[count - 1];
    let end = (last + 1..ir.len())
        .find(|&p| ir[p])
        .ok_or_else(|| Error::Format("cannot find the end of the last IR".into()))?;
    lengths.push(end - last);

    if lengths.iter().any(|&l| l < 2) {
        return Err(Error::Format("IR shorter than the 1149.1 minimum".into()));
    }
    Ok(lengths)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bits(s: &str) -> BitVec<u8, Lsb0> {
        // LSB-first notation: first character is bit 0, the first bit
        // out of TDO.
        s.chars().map(|c| c == '1').collect()
    }

    #[test]
    fn idcode_fields() {
        let id = IdCode(0x1397_100D);
        assert_eq!(id.version(), 0x1);
        assert_eq!(id.part_number(), 0x3971);
        assert_eq!(id.manufacturer(), 0x006);
        assert!(id.lsbit());
        assert!(id.valid());
        assert!(!IdCode(0x1397_100C).valid()); // marker bit clear
    }

    #[test]
    fn idcodes_and_bypass_devices() {
        let mut dr = BitVec::<u8, Lsb0>::new();
        let first = 0xDEAD_BEEFu32 | 1;
        for i in 0..32 {
            dr.push((first >> i) & 1 != 0);
        }
        dr.push(false); // a TAP that woke up in BYPASS
        let second = 0x1234_5671u32;
        for i in 0..32 {
            dr.push((second >> i) & 1 != 0);
        }
        dr.extend(std::iter::repeat(true).take(64)); // fill

        let codes = extract_idcodes(&dr).unwrap();
        assert_eq!(codes.len(), 3);
        assert_eq!(codes[0].unwrap().raw(), first);
        assert!(codes[1].is_none());
        assert_eq!(codes[2].unwrap().raw(), second);
    }

    #[test]
    fn truncated_idcode() {
        let mut dr = bits("1010");
        dr.push(false);
        assert!(matches!(extract_idcodes(&dr), Err(Error::Format(_))));
    }

    #[test]
    fn ir_lengths_from_capture() {
        // IRs of 4, 2 and 6 bits followed by ones fill.
        let ir = bits("100010100000111111111111");
        assert_eq!(extract_ir_lengths(&ir, 3).unwrap(), vec![4, 2, 6]);
    }

    #[test]
    fn ir_chain_must_start_with_pattern() {
        let ir = bits("010010111111");
        assert!(extract_ir_lengths(&ir, 2).is_err());
    }

    #[test]
    fn ir_count_mismatch() {
        let ir = bits("10001011111111");
        assert!(extract_ir_lengths(&ir, 3).is_err());
    }
}
