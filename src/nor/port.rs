//! Width-aware register access for a CFI NOR array.

use crate::bus::{replicate_command, BusWidth, FlashBus};

/// How the chips are wired to the bus. Register offsets are scaled by the
/// combined width and command bytes are replicated across parallel chips.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct NorPort {
    pub base: u32,
    pub bus_width: BusWidth,
    pub chip_width: BusWidth,
    /// Bytes per register offset step.
    pub combined_width: u32,
}

impl NorPort {
    pub fn address(&self, block: u32, offset: u32) -> u32 {
        block + offset * self.combined_width
    }

    /// The bus word that delivers `value` to every chip.
    pub fn replicate(&self, value: u8) -> u16 {
        replicate_command(value, self.bus_width, self.chip_width)
    }

    /// Write a command byte to register `offset` of the block at `block`.
    pub fn command<B: FlashBus + ?Sized>(&self, bus: &mut B, block: u32, offset: u32, cmd: u8) {
        let value = self.replicate(cmd);
        self.bus_width.write(bus, self.address(block, offset), value);
    }

    /// Read register `offset` of the block at `block`.
    pub fn read<B: FlashBus + ?Sized>(&self, bus: &mut B, block: u32, offset: u32) -> u16 {
        self.bus_width.read(bus, self.address(block, offset))
    }

    /// Read the bus word at an absolute address.
    pub fn read_at<B: FlashBus + ?Sized>(&self, bus: &mut B, addr: u32) -> u16 {
        self.bus_width.read(bus, addr)
    }

    /// Write a bus word at an absolute address.
    pub fn write_at<B: FlashBus + ?Sized>(&self, bus: &mut B, addr: u32, value: u16) {
        self.bus_width.write(bus, addr, value)
    }

    /// Assemble `count` consecutive CFI bytes (little endian) starting at `offset`.
    pub fn cfi_bytes<B: FlashBus + ?Sized>(&self, bus: &mut B, block: u32, offset: u32, count: u32) -> u32 {
        (0..count).fold(0, |value, i| {
            let byte = bus.read8(self.address(block, offset + i));
            value | (u32::from(byte) << (8 * i))
        })
    }

    /// True if register `offset` reads back as `value` on every chip.
    pub fn matches<B: FlashBus + ?Sized>(&self, bus: &mut B, block: u32, offset: u32, value: u8) -> bool {
        self.read(bus, block, offset) == self.replicate(value)
    }

    /// True if every chip has all bits of `mask` set at `addr`.
    pub fn all_set<B: FlashBus + ?Sized>(&self, bus: &mut B, addr: u32, mask: u8) -> bool {
        let mask = self.replicate(mask);
        self.read_at(bus, addr) & mask == mask
    }

    /// True if any chip has any bit of `mask` set at `addr`.
    pub fn some_set<B: FlashBus + ?Sized>(&self, bus: &mut B, addr: u32, mask: u8) -> bool {
        self.read_at(bus, addr) & self.replicate(mask) != 0
    }
}
