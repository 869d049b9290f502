//! Board defaults and per-engine configuration.

use crate::bus::BusWidth;

/// Start of AEMIF chip-select 2, where the DM644x boots NAND or NOR from.
pub const CS2_BASE: u32 = 0x0200_0000;

/// Iterations allowed for NAND ready/status polls.
pub const NAND_TIMEOUT: u32 = 10240;

/// Iterations allowed for the Intel "write buffer available" poll.
pub const INTEL_BUFFER_TIMEOUT: u32 = 0x0001_0000;

/// Iterations allowed for the Intel status-register ready spin.
pub const INTEL_STATUS_TIMEOUT: u32 = 0x0100_0000;

/// Bytes reserved for the UBL itself at the start of NOR flash.
pub const UBL_IMAGE_SIZE: u32 = 0x0000_3800;

/// NAND blocks that may hold the UBL image.
pub const UBL_BLOCKS: BlockRange = BlockRange::new(1, 5);

/// NAND blocks that may hold the application image.
pub const APP_BLOCKS: BlockRange = BlockRange::new(6, 50);

/// Inclusive range of NAND blocks reserved for one boot image.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BlockRange {
    pub start: u32,
    pub end: u32,
}

impl BlockRange {
    pub const fn new(start: u32, end: u32) -> Self {
        Self { start, end }
    }

    /// The reserved range whose first block is `block`, if any.
    pub fn for_start_block(block: u32) -> Option<Self> {
        [UBL_BLOCKS, APP_BLOCKS]
            .into_iter()
            .find(|range| range.start == block)
    }

    pub fn contains(&self, block: u32) -> bool {
        (self.start..=self.end).contains(&block)
    }
}

/// NAND engine configuration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct NandConfig {
    /// Base address of the chip-select window the NAND is wired to.
    pub base: u32,
    pub bus_width: BusWidth,
    /// ECC register bank (0 for CS2 .. 3 for CS5). Derived from `base` when `None`.
    pub chip_select_offset: Option<u8>,
    /// Iterations allowed for each ready/status poll.
    pub timeout: u32,
    /// Settle time before the ready line is sampled (tWB).
    pub settle_ns: u32,
}

impl NandConfig {
    /// Chip-select offset in use, derived from the window base if not overridden.
    pub fn chip_select_offset(&self) -> u8 {
        self.chip_select_offset
            .unwrap_or_else(|| ((self.base >> 25).saturating_sub(1)) as u8)
    }
}

impl Default for NandConfig {
    fn default() -> Self {
        Self {
            base: CS2_BASE,
            bus_width: BusWidth::Bits8,
            chip_select_offset: None,
            timeout: NAND_TIMEOUT,
            settle_ns: 200,
        }
    }
}

/// NOR engine configuration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct NorConfig {
    /// Base address of the chip-select window the NOR is wired to.
    pub base: u32,
    pub bus_width: BusWidth,
    /// Iterations allowed for the Intel status-register ready spin.
    pub status_timeout: u32,
    /// Iterations allowed for the Intel write-buffer-available poll.
    pub buffer_timeout: u32,
}

impl Default for NorConfig {
    fn default() -> Self {
        Self {
            base: CS2_BASE,
            bus_width: BusWidth::Bits16,
            status_timeout: INTEL_STATUS_TIMEOUT,
            buffer_timeout: INTEL_BUFFER_TIMEOUT,
        }
    }
}
