//! Vendor algorithm dispatch.

use crate::bus::FlashBus;
use crate::config::NorConfig;
use crate::error::Error;

use super::geometry::{CommandSet, NorGeometry};
use super::port::NorPort;
use super::{amd, intel};

/// JEDEC manufacturer ids of parts known to work with the boot loader.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Manufacturer {
    Amd,
    Fujitsu,
    Intel,
    Micron,
    Samsung,
    Sharp,
    Unknown(u8),
}

impl From<u8> for Manufacturer {
    fn from(id: u8) -> Self {
        match id {
            0x01 => Manufacturer::Amd,
            0x04 => Manufacturer::Fujitsu,
            0x89 => Manufacturer::Intel,
            0x2C => Manufacturer::Micron,
            0xEC => Manufacturer::Samsung,
            0xB0 => Manufacturer::Sharp,
            other => Manufacturer::Unknown(other),
        }
    }
}

/// Everything a vendor algorithm touches for one operation.
pub(crate) struct Chip<'a, B: ?Sized> {
    pub bus: &'a mut B,
    pub port: NorPort,
    pub geometry: &'a NorGeometry,
    pub config: &'a NorConfig,
}

/// Manufacturer and device id words read back by identify.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Identity {
    pub manufacturer_id: u8,
    pub device_id: [u16; 2],
}

/// Programming algorithm family, fixed once the command set is known.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum VendorOps {
    Amd,
    Intel,
    Unsupported,
}

impl VendorOps {
    pub fn for_command_set(command_set: CommandSet) -> Self {
        match command_set {
            CommandSet::AmdBasic | CommandSet::AmdExtended => VendorOps::Amd,
            CommandSet::IntelBasic | CommandSet::IntelExtended => VendorOps::Intel,
            CommandSet::Unknown(_) => VendorOps::Unsupported,
        }
    }

    pub(crate) fn identify<B: FlashBus + ?Sized>(self, chip: &mut Chip<'_, B>) -> Result<Identity, Error> {
        match self {
            VendorOps::Amd => Ok(amd::identify(chip)),
            VendorOps::Intel => Ok(intel::identify(chip)),
            VendorOps::Unsupported => Err(Error::UnsupportedDevice),
        }
    }

    pub(crate) fn erase_block<B: FlashBus + ?Sized>(self, chip: &mut Chip<'_, B>, block: u32) -> Result<(), Error> {
        match self {
            VendorOps::Amd => amd::erase_block(chip, block),
            VendorOps::Intel => intel::erase_block(chip, block),
            VendorOps::Unsupported => Err(Error::UnsupportedDevice),
        }
    }

    pub(crate) fn write_word<B: FlashBus + ?Sized>(self, chip: &mut Chip<'_, B>, addr: u32, value: u16) -> Result<(), Error> {
        match self {
            VendorOps::Amd => amd::write_word(chip, addr, value),
            VendorOps::Intel => intel::write_word(chip, addr, value),
            VendorOps::Unsupported => Err(Error::UnsupportedDevice),
        }
    }

    /// Program one full write buffer. `data.len()` must equal the buffer size.
    /// The word count travels in one command byte, so buffers over 256 bus
    /// words are refused with [`Error::UnsupportedDevice`].
    pub(crate) fn buffer_write<B: FlashBus + ?Sized>(self, chip: &mut Chip<'_, B>, addr: u32, data: &[u8]) -> Result<(), Error> {
        match self {
            VendorOps::Amd => amd::buffer_write(chip, addr, data),
            VendorOps::Intel => intel::buffer_write(chip, addr, data),
            VendorOps::Unsupported => Err(Error::UnsupportedDevice),
        }
    }

    pub(crate) fn set_lock<B: FlashBus + ?Sized>(self, chip: &mut Chip<'_, B>, block: u32, locked: bool) -> Result<(), Error> {
        match self {
            VendorOps::Intel if locked => intel::set_lock(chip, block),
            VendorOps::Intel => intel::clear_lock(chip, block),
            VendorOps::Amd | VendorOps::Unsupported => Err(Error::UnsupportedDevice),
        }
    }
}
