use crate::bus::BusWidth;
use crate::error::Error;

/// Most erase regions a CFI table may describe that are tracked.
pub const MAX_REGIONS: usize = 6;

/// CFI primary command set id.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CommandSet {
    IntelExtended,
    AmdBasic,
    IntelBasic,
    AmdExtended,
    Unknown(u16),
}

impl From<u16> for CommandSet {
    fn from(id: u16) -> Self {
        match id {
            0x0001 => CommandSet::IntelExtended,
            0x0002 => CommandSet::AmdBasic,
            0x0003 => CommandSet::IntelBasic,
            0x0004 => CommandSet::AmdExtended,
            other => CommandSet::Unknown(other),
        }
    }
}

/// A run of equally sized erase blocks.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct EraseRegion {
    pub block_count: u32,
    pub block_size: u32,
}

impl EraseRegion {
    /// Bytes covered by the region, or [`Error::UnsupportedDevice`] if the
    /// table describes more than the address space holds.
    pub fn size(&self) -> Result<u32, Error> {
        self.block_count
            .checked_mul(self.block_size)
            .ok_or(Error::UnsupportedDevice)
    }
}

/// Start address and size of one erase block.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BlockInfo {
    pub address: u32,
    pub size: u32,
}

/// Layout of a NOR array as reported by CFI and the identify command.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct NorGeometry {
    pub flash_base: u32,
    pub bus_width: BusWidth,
    /// Width each chip operates at.
    pub chip_width: BusWidth,
    /// Bytes per CFI register offset step.
    pub combined_width: u32,
    /// Chips wired in parallel across the bus.
    pub devices: u32,
    /// Bytes, all devices together.
    pub size: u32,
    /// Write buffer bytes, all devices together.
    pub buffer_size: u32,
    pub command_set: CommandSet,
    pub manufacturer_id: u8,
    pub device_id: [u16; 2],
    regions: [EraseRegion; MAX_REGIONS],
    region_count: usize,
}

impl NorGeometry {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        flash_base: u32,
        bus_width: BusWidth,
        chip_width: BusWidth,
        combined_width: u32,
        devices: u32,
        size: u32,
        buffer_size: u32,
        command_set: CommandSet,
    ) -> Self {
        Self {
            flash_base,
            bus_width,
            chip_width,
            combined_width,
            devices,
            size,
            buffer_size,
            command_set,
            manufacturer_id: 0,
            device_id: [0; 2],
            regions: [EraseRegion::default(); MAX_REGIONS],
            region_count: 0,
        }
    }

    /// Append an erase region. Returns false once the table is full.
    pub(crate) fn push_region(&mut self, region: EraseRegion) -> bool {
        match self.regions.get_mut(self.region_count) {
            Some(slot) => {
                *slot = region;
                self.region_count += 1;
                true
            }
            None => false,
        }
    }

    /// The DVEVM leaves the top address line unconnected, so a single-region
    /// part answers CFI in both halves. Only the lower half is usable.
    pub(crate) fn fold_mirrored_half(&mut self) {
        self.size >>= 1;
        self.regions[0].block_count >>= 1;
    }

    pub fn regions(&self) -> &[EraseRegion] {
        &self.regions[..self.region_count]
    }

    /// First address past the last erase region.
    pub(crate) fn regions_end(&self) -> Result<u32, Error> {
        self.regions().iter().try_fold(self.flash_base, |start, region| {
            start
                .checked_add(region.size()?)
                .ok_or(Error::UnsupportedDevice)
        })
    }

    /// First address past the array.
    pub fn end(&self) -> u32 {
        self.flash_base + self.size
    }

    pub fn contains(&self, addr: u32) -> bool {
        addr >= self.flash_base && addr < self.end()
    }

    /// The erase block containing `addr`.
    pub fn block_info(&self, addr: u32) -> Result<BlockInfo, Error> {
        if !self.contains(addr) {
            return Err(Error::OutOfRange);
        }

        let mut region_start = self.flash_base;
        for region in self.regions() {
            let region_end = region_start
                .checked_add(region.size()?)
                .ok_or(Error::UnsupportedDevice)?;
            if addr < region_end {
                let index = (addr - region_start) / region.block_size;
                return Ok(BlockInfo {
                    address: region_start + index * region.block_size,
                    size: region.block_size,
                });
            }
            region_start = region_end;
        }
        Err(Error::OutOfRange)
    }

    /// Every erase block, in address order.
    pub fn blocks(&self) -> impl Iterator<Item = BlockInfo> + '_ {
        let mut region_start = self.flash_base;
        self.regions().iter().flat_map(move |region| {
            let start = region_start;
            region_start = region_start.saturating_add(region.block_count.saturating_mul(region.block_size));
            (0..region.block_count).map(move |i| BlockInfo {
                address: start + i * region.block_size,
                size: region.block_size,
            })
        })
    }
}
