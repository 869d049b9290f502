//! Hamming ECC as computed by the AEMIF NAND controller.
//!
//! The controller produces one 32-bit word per operation: for every address
//! bit `j` of the bit stream, the even parity (bits whose index has bit `j`
//! clear) lands in bit `j` and the odd parity (index bit `j` set) in bit
//! `16 + j`. A single flipped data bit therefore changes exactly one of each
//! even/odd pair, and the odd half of the difference spells out its index.

use crate::bus::BusWidth;
use crate::error::Error;

/// Outcome of comparing the stored ECC against the one read back.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum EccCheck {
    Clean,
    /// One data bit was wrong and has been flipped back in place.
    Corrected { byte: usize, bit: u8 },
}

/// Software model of the controller's parity accumulator over `data`.
pub fn compute(data: &[u8]) -> u32 {
    let mut even: u32 = 0;
    let mut odd: u32 = 0;
    for (byte_index, byte) in data.iter().enumerate() {
        for bit in 0..8 {
            if byte & (1 << bit) == 0 {
                continue;
            }
            let index = (byte_index * 8 + bit) as u32;
            // Parity bits only span the address bits the ECC mask keeps.
            for j in 0..16 {
                if index & (1 << j) != 0 {
                    odd ^= 1 << j;
                } else {
                    even ^= 1 << j;
                }
            }
        }
    }
    (odd << 16) | (even & 0xFFFF)
}

/// Byte order the ROM boot loader expects the ECC word in.
///
/// An 8-bit bus reverses all four bytes; a 16-bit bus swaps the half words.
/// Both are involutions, so the same swap undoes itself on read.
pub fn swap(word: u32, width: BusWidth) -> u32 {
    match width {
        BusWidth::Bits8 => word.swap_bytes(),
        BusWidth::Bits16 => word.rotate_left(16),
    }
}

/// Encode an ECC word into the four spare bytes that hold it.
pub fn to_spare(word: u32, width: BusWidth) -> [u8; 4] {
    swap(word, width).to_le_bytes()
}

/// Decode the ECC word from the four spare bytes that hold it.
pub fn from_spare(bytes: [u8; 4], width: BusWidth) -> u32 {
    swap(u32::from_le_bytes(bytes), width)
}

/// True for an operation that has not been programmed since the last erase:
/// the spare ECC word and every data byte read back as all ones.
pub fn is_erased(stored: u32, data: &[u8]) -> bool {
    stored == u32::MAX && data.iter().all(|b| *b == 0xFF)
}

/// Compare the ECC written with the page (`stored`) against the one computed
/// while reading it back (`computed`), repairing `data` if a single bit flipped.
pub fn correct(stored: u32, computed: u32, mask: u32, data: &mut [u8]) -> Result<EccCheck, Error> {
    if stored == computed {
        return Ok(EccCheck::Clean);
    }

    let diff = (stored >> 16) ^ (stored & 0xFFFF) ^ (computed >> 16) ^ (computed & 0xFFFF);
    if diff != mask & 0xFFFF {
        return Err(Error::EccFailure);
    }

    let index = ((stored >> 16) ^ (computed >> 16)) as usize;
    let byte = index >> 3;
    let bit = (index & 0x7) as u8;
    let target = data.get_mut(byte).ok_or(Error::EccFailure)?;
    *target ^= 1 << bit;
    Ok(EccCheck::Corrected { byte, bit })
}
