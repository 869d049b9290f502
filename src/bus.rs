//! Bus access layer.
//!
//! Flash devices sit behind a memory-mapped EMIF chip-select window that is
//! either 8 or 16 bits wide. [`FlashBus`] is the primitive load/store
//! interface; [`BusWidth`] picks the access size for command, address and
//! data cycles.

/// Width of the EMIF data bus (or of one chip on it).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BusWidth {
    Bits8,
    Bits16,
}

impl BusWidth {
    /// Number of bytes moved per bus cycle.
    pub const fn bytes(self) -> u32 {
        match self {
            BusWidth::Bits8 => 1,
            BusWidth::Bits16 => 2,
        }
    }

    /// Value a fully erased bus word reads as.
    pub const fn all_ones(self) -> u16 {
        match self {
            BusWidth::Bits8 => 0x00FF,
            BusWidth::Bits16 => 0xFFFF,
        }
    }

    /// Decode the EMIF width strap from the DM644x BOOTCFG register (bit 5).
    pub const fn from_boot_config(bootcfg: u32) -> Self {
        if bootcfg & (1 << 5) != 0 {
            BusWidth::Bits16
        } else {
            BusWidth::Bits8
        }
    }

    /// Single bus-width load. 8-bit reads come back zero-extended.
    pub fn read<B: FlashBus + ?Sized>(self, bus: &mut B, addr: u32) -> u16 {
        match self {
            BusWidth::Bits8 => u16::from(bus.read8(addr)),
            BusWidth::Bits16 => bus.read16(addr),
        }
    }

    /// Single bus-width store. On an 8-bit bus only the low byte is driven.
    pub fn write<B: FlashBus + ?Sized>(self, bus: &mut B, addr: u32, value: u16) {
        match self {
            BusWidth::Bits8 => bus.write8(addr, value as u8),
            BusWidth::Bits16 => bus.write16(addr, value),
        }
    }

    /// Assemble the bus word starting at `offset` in `src` (little endian).
    /// Bytes past the end of `src` read as erased (0xFF).
    pub fn word_from(self, src: &[u8], offset: usize) -> u16 {
        let byte = |i: usize| src.get(i).copied().unwrap_or(0xFF);
        match self {
            BusWidth::Bits8 => u16::from(byte(offset)),
            BusWidth::Bits16 => u16::from_le_bytes([byte(offset), byte(offset + 1)]),
        }
    }

    /// Store a bus word into `dst` at `offset` (little endian).
    pub fn word_into(self, dst: &mut [u8], offset: usize, value: u16) {
        match self {
            BusWidth::Bits8 => dst[offset] = value as u8,
            BusWidth::Bits16 => dst[offset..offset + 2].copy_from_slice(&value.to_le_bytes()),
        }
    }
}

/// Primitive, volatile access to a memory-mapped flash window.
///
/// Addresses are absolute bus addresses. Implementations must perform every
/// access exactly once and in program order; there is no error path because
/// the layer assumes a responsive device.
pub trait FlashBus {
    fn read8(&mut self, addr: u32) -> u8;
    fn read16(&mut self, addr: u32) -> u16;
    fn write8(&mut self, addr: u32, value: u8);
    fn write16(&mut self, addr: u32, value: u16);
}

impl<T: FlashBus + ?Sized> FlashBus for &mut T {
    fn read8(&mut self, addr: u32) -> u8 {
        (**self).read8(addr)
    }

    fn read16(&mut self, addr: u32) -> u16 {
        (**self).read16(addr)
    }

    fn write8(&mut self, addr: u32, value: u8) {
        (**self).write8(addr, value)
    }

    fn write16(&mut self, addr: u32, value: u16) {
        (**self).write16(addr, value)
    }
}

/// Replicate a command byte across every chip sharing the bus.
///
/// Each byte lane of the bus word carries `cmd` when it is the low lane of a
/// chip (`lane & (chip_bytes - 1) == 0`, counting lanes from the bus width
/// down to one) and zero otherwise. Two x8 chips on a x16 bus both see the
/// command; one x16 chip sees it in its low byte.
pub fn replicate_command(cmd: u8, bus_width: BusWidth, chip_width: BusWidth) -> u16 {
    let chip_mask = chip_width.bytes() - 1;
    let mut lanes = [0u8; 2];
    for (slot, lane) in (1..=bus_width.bytes()).rev().enumerate() {
        lanes[slot] = if lane & chip_mask != 0 { 0x00 } else { cmd };
    }
    u16::from_le_bytes(lanes)
}
