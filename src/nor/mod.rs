//! NOR engine.
//!
//! Discovers a CFI compliant NOR array on the EMIF, picks the AMD or Intel
//! programming algorithm from the reported command set, and offers block,
//! range and whole-device erase plus byte-range writes that use the chip's
//! write buffer where alignment allows.

mod amd;
pub mod cfi;
pub mod geometry;
mod intel;
pub mod port;
pub mod vendor;

use core::fmt::Debug;

use crate::bus::FlashBus;
use crate::config::NorConfig;
use crate::error::Error;
use crate::traits::HardwareFlashDevice;

pub use geometry::{BlockInfo, CommandSet, EraseRegion, NorGeometry};
pub use intel::IntelStatus;
pub use port::NorPort;
pub use vendor::{Manufacturer, VendorOps};
use vendor::Chip;

pub struct NorFlash<B> {
    bus: B,
    port: NorPort,
    config: NorConfig,
    geometry: NorGeometry,
    vendor: VendorOps,
}

impl<B> Debug for NorFlash<B> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "NorFlash({:?}, {:?})", self.vendor, self.geometry)
    }
}

impl<B: FlashBus> NorFlash<B> {
    /// Discover the array at `config.base` and identify it.
    ///
    /// Fails with [`Error::CfiNotFound`] if no wiring answers the CFI query
    /// and [`Error::UnsupportedDevice`] if the command set is neither AMD nor
    /// Intel. An unrecognised manufacturer id is only logged; see
    /// [`NorFlash::identify_status`].
    pub fn init(mut bus: B, config: NorConfig) -> Result<Self, Error> {
        let (mut geometry, port) = cfi::query(&mut bus, config.base, config.bus_width)
            .inspect_err(|_| error!("CFI query failed at {:#x}", config.base))?;

        if geometry.regions().len() == 1 {
            let upper_half = config.base + geometry.size / 2;
            if cfi::query(&mut bus, upper_half, config.bus_width).is_ok() {
                debug!("CFI mirrored at {:#x}, using the lower half", upper_half);
                geometry.fold_mirrored_half();
            }
        }

        let vendor = VendorOps::for_command_set(geometry.command_set);
        let identity = vendor
            .identify(&mut Chip {
                bus: &mut bus,
                port,
                geometry: &geometry,
                config: &config,
            })
            .inspect_err(|_| error!("unsupported NOR command set {:?}", geometry.command_set))?;
        geometry.manufacturer_id = identity.manufacturer_id;
        geometry.device_id = identity.device_id;

        let manufacturer = Manufacturer::from(identity.manufacturer_id);
        if let Manufacturer::Unknown(id) = manufacturer {
            warn!("unrecognised NOR manufacturer id {:#x}", id);
        }
        info!(
            "NOR {:?} ({:?}), {} bytes in {} regions, {} byte write buffer",
            manufacturer,
            vendor,
            geometry.size,
            geometry.regions().len(),
            geometry.buffer_size
        );

        Ok(Self {
            bus,
            port,
            config,
            geometry,
            vendor,
        })
    }

    pub fn geometry(&self) -> &NorGeometry {
        &self.geometry
    }

    pub fn vendor(&self) -> VendorOps {
        self.vendor
    }

    /// Hand the bus back.
    pub fn release(self) -> B {
        self.bus
    }

    /// The manufacturer read by identify, or [`Error::IdentifyFailed`] if
    /// its id is not one the boot loader knows.
    pub fn identify_status(&self) -> Result<Manufacturer, Error> {
        match Manufacturer::from(self.geometry.manufacturer_id) {
            Manufacturer::Unknown(_) => Err(Error::IdentifyFailed),
            known => Ok(known),
        }
    }

    fn chip(&mut self) -> Chip<'_, B> {
        Chip {
            bus: &mut self.bus,
            port: self.port,
            geometry: &self.geometry,
            config: &self.config,
        }
    }

    /// Start and size of the erase block containing `addr`.
    pub fn discover_block_info(&self, addr: u32) -> Result<BlockInfo, Error> {
        self.geometry.block_info(addr)
    }

    fn check_range(&self, addr: u32, len: usize) -> Result<(), Error> {
        let len = u32::try_from(len).map_err(|_| Error::OutOfRange)?;
        match addr.checked_add(len) {
            Some(end) if addr >= self.geometry.flash_base && end <= self.geometry.end() => Ok(()),
            _ => Err(Error::OutOfRange),
        }
    }

    /// Erase the block containing `addr`.
    pub fn erase_block(&mut self, addr: u32) -> Result<BlockInfo, Error> {
        let block = self.geometry.block_info(addr)?;
        trace!("NOR erase block {:#x} ({} bytes)", block.address, block.size);
        let vendor = self.vendor;
        vendor.erase_block(&mut self.chip(), block.address)?;
        Ok(block)
    }

    /// Erase every block that overlaps `start..start + len`.
    pub fn erase(&mut self, start: u32, len: u32) -> Result<(), Error> {
        let end = start.checked_add(len).ok_or(Error::OutOfRange)?;
        debug!("NOR erase {:#x}..{:#x}", start, end);

        let mut addr = start;
        while addr < end {
            let block = self.erase_block(addr).inspect_err(|_| {
                warn!("NOR erase failed at {:#x}", addr);
            })?;
            addr = block.address + block.size;
        }
        Ok(())
    }

    /// Erase the whole array.
    pub fn global_erase(&mut self) -> Result<(), Error> {
        info!("NOR global erase");
        self.erase(self.geometry.flash_base, self.geometry.size)
    }

    fn write_words(&mut self, addr: u32, src: &[u8]) -> Result<(), Error> {
        let width = self.geometry.bus_width;
        let vendor = self.vendor;
        for offset in (0..src.len()).step_by(width.bytes() as usize) {
            let target = addr + offset as u32;
            vendor
                .write_word(&mut self.chip(), target, width.word_from(src, offset))
                .map_err(|e| {
                    warn!("NOR word write failed at {:#x}: {:?}", target, e);
                    Error::WriteFailure
                })?;
        }
        Ok(())
    }

    /// Program `src` at `dst`, which must already be erased.
    ///
    /// Odd lengths are padded with one erased byte. Full, aligned write
    /// buffers go through the buffered program command; everything else, and
    /// any buffer the chip rejects, is written one bus word at a time.
    pub fn write_bytes(&mut self, dst: u32, src: &[u8]) -> Result<(), Error> {
        let padded_len = src.len() + (src.len() & 1);
        self.check_range(dst, padded_len)?;
        debug!("NOR write {} bytes at {:#x}", src.len(), dst);

        let width = self.geometry.bus_width;
        let step = width.bytes() as usize;
        let buffer = self.geometry.buffer_size as usize;
        let vendor = self.vendor;

        let mut offset = 0;
        while offset < padded_len {
            let addr = dst + offset as u32;
            let buffered = buffer > step
                && addr as usize % buffer == 0
                && offset + buffer <= src.len();

            if !buffered {
                let end = (offset + step).min(src.len());
                self.write_words(addr, &src[offset..end])?;
                offset += step;
                continue;
            }

            let chunk = &src[offset..offset + buffer];
            if let Err(e) = vendor.buffer_write(&mut self.chip(), addr, chunk) {
                warn!("NOR buffer write failed at {:#x} ({:?}), falling back to word writes", addr, e);
                self.write_words(addr, chunk)?;
            }
            offset += buffer;
        }
        Ok(())
    }

    /// Copy flash contents at `addr` into `dst`.
    pub fn read(&mut self, addr: u32, dst: &mut [u8]) -> Result<(), Error> {
        self.check_range(addr, dst.len())?;
        for (offset, byte) in dst.iter_mut().enumerate() {
            *byte = self.bus.read8(addr + offset as u32);
        }
        Ok(())
    }

    /// Set the lock bit of the block containing `addr` (Intel parts only).
    pub fn lock_block(&mut self, addr: u32) -> Result<(), Error> {
        let block = self.geometry.block_info(addr)?;
        let vendor = self.vendor;
        vendor.set_lock(&mut self.chip(), block.address, true)
    }

    /// Clear the lock bit of the block containing `addr` (Intel parts only).
    pub fn unlock_block(&mut self, addr: u32) -> Result<(), Error> {
        let block = self.geometry.block_info(addr)?;
        let vendor = self.vendor;
        vendor.set_lock(&mut self.chip(), block.address, false)
    }
}

impl<B: FlashBus> HardwareFlashDevice for NorFlash<B> {
    type Error = Error;

    fn read(&mut self, addr: u32, data: &mut [u8]) -> Result<(), Error> {
        NorFlash::read(self, addr, data)
    }

    fn sector_erase(&mut self, addr: u32) -> Result<(), Error> {
        self.erase_block(addr).map(|_| ())
    }

    fn page_program(&mut self, addr: u32, data: &[u8]) -> Result<(), Error> {
        self.write_bytes(addr, data)
    }

    fn chip_erase(&mut self) -> Result<(), Error> {
        self.global_erase()
    }
}
