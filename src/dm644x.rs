//! Memory-mapped hardware access for the TMS320DM644x.

use core::ptr::{read_volatile, write_volatile};

use crate::bus::{BusWidth, FlashBus};
use crate::nand::NandHardware;

/// AEMIF configuration registers.
pub const AEMIF_BASE: u32 = 0x01E0_0000;
/// System module BOOTCFG register; bit 5 is the EMIF width strap.
pub const BOOTCFG: u32 = 0x01C4_0014;

const ERCSR: u32 = 0x00;
const AB1CR: u32 = 0x10;
const NANDFCR: u32 = 0x60;
const NANDFSR: u32 = 0x64;
const NANDF1ECC: u32 = 0x70;

const NANDFSR_READY: u32 = 1 << 0;
/// Setup/strobe/hold fields of ABxCR at their slowest, leaving only the width bit.
const ABCR_SLOWEST_TIMING: u32 = 0x3FFF_FFFC;
/// Each chip-select window is 32 MiB, starting with CS2 at 0x0200_0000.
const CS_WINDOW_SHIFT: u32 = 25;

/// Volatile loads and stores at absolute physical addresses.
#[derive(Debug)]
pub struct MmioBus {
    _private: (),
}

impl MmioBus {
    /// # Safety
    ///
    /// Every address later passed to the bus must be a valid, mapped device
    /// address for the access size used, and nothing else may drive the same
    /// flash window concurrently.
    pub const unsafe fn new() -> Self {
        Self { _private: () }
    }
}

impl FlashBus for MmioBus {
    fn read8(&mut self, addr: u32) -> u8 {
        // SAFETY: the constructor's contract covers every bus address.
        unsafe { read_volatile(addr as usize as *const u8) }
    }

    fn read16(&mut self, addr: u32) -> u16 {
        // SAFETY: as above.
        unsafe { read_volatile(addr as usize as *const u16) }
    }

    fn write8(&mut self, addr: u32, value: u8) {
        // SAFETY: as above.
        unsafe { write_volatile(addr as usize as *mut u8, value) }
    }

    fn write16(&mut self, addr: u32, value: u16) {
        // SAFETY: as above.
        unsafe { write_volatile(addr as usize as *mut u16, value) }
    }
}

/// The asynchronous EMIF: flash windows plus the NAND controller registers.
#[derive(Debug)]
pub struct Aemif {
    bus: MmioBus,
}

impl Aemif {
    /// # Safety
    ///
    /// Same contract as [`MmioBus::new`]; additionally the AEMIF register
    /// block must be reachable at [`AEMIF_BASE`].
    pub const unsafe fn new() -> Self {
        Self {
            bus: MmioBus { _private: () },
        }
    }

    fn reg_read(&mut self, offset: u32) -> u32 {
        // SAFETY: AEMIF registers are word aligned and always mapped.
        unsafe { read_volatile((AEMIF_BASE + offset) as usize as *const u32) }
    }

    fn reg_write(&mut self, offset: u32, value: u32) {
        // SAFETY: as above.
        unsafe { write_volatile((AEMIF_BASE + offset) as usize as *mut u32, value) }
    }

    fn reg_set(&mut self, offset: u32, bits: u32) {
        let value = self.reg_read(offset);
        self.reg_write(offset, value | bits);
    }
}

impl FlashBus for Aemif {
    fn read8(&mut self, addr: u32) -> u8 {
        self.bus.read8(addr)
    }

    fn read16(&mut self, addr: u32) -> u16 {
        self.bus.read16(addr)
    }

    fn write8(&mut self, addr: u32, value: u8) {
        self.bus.write8(addr, value)
    }

    fn write16(&mut self, addr: u32, value: u16) {
        self.bus.write16(addr, value)
    }
}

impl NandHardware for Aemif {
    fn configure(&mut self, chip_select_offset: u8, bus_width: BusWidth) {
        let width_bit = match bus_width {
            BusWidth::Bits8 => 0,
            BusWidth::Bits16 => 1,
        };
        let cs = u32::from(chip_select_offset);
        self.reg_write(AB1CR + 4 * cs, ABCR_SLOWEST_TIMING | width_bit);
        self.reg_set(NANDFCR, 1 << cs);
    }

    fn is_ready(&mut self) -> bool {
        self.reg_read(NANDFSR) & NANDFSR_READY != 0
    }

    fn ecc_read_and_restart(&mut self, chip_select_offset: u8) -> u32 {
        let cs = u32::from(chip_select_offset);

        // Reading the next chip-select window drains posted data writes.
        let flush = ((cs + 2) << CS_WINDOW_SHIFT) as usize as *const u32;
        // SAFETY: CS3..CS5 windows are always decoded by the EMIF.
        let _ = unsafe { read_volatile(flush) };

        let value = self.reg_read(NANDF1ECC + 4 * cs);
        self.reg_set(NANDFCR, 1 << (8 + cs));
        // Reading any config register flushes the NANDFCR write.
        let _ = self.reg_read(ERCSR);
        value
    }
}

/// Bus width strapped at reset for the boot chip select.
///
/// # Safety
///
/// The system module must be mapped at [`BOOTCFG`].
pub unsafe fn boot_bus_width() -> BusWidth {
    // SAFETY: guaranteed by the caller.
    let bootcfg = unsafe { read_volatile(BOOTCFG as usize as *const u32) };
    BusWidth::from_boot_config(bootcfg)
}
