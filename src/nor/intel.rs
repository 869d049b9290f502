//! Intel/Sharp command set (CFI ids 0x0001 and 0x0003).

use bitflags::bitflags;

use crate::bus::FlashBus;
use crate::error::Error;

use super::vendor::{Chip, Identity};

const RESET_CMD: u8 = 0xFF;
const CLEAR_STATUS_CMD: u8 = 0x50;
const ID_CMD: u8 = 0x90;
const MANUFACTURER_ID_ADDR: u32 = 0x00;
const DEVICE_ID_ADDR: u32 = 0x01;
const ERASE_SETUP_CMD: u8 = 0x20;
const ERASE_CONFIRM_CMD: u8 = 0xD0;
const PROGRAM_CMD: u8 = 0x40;
const BUFFER_LOAD_CMD: u8 = 0xE8;
const BUFFER_CONFIRM_CMD: u8 = 0xD0;
const LOCK_SETUP_CMD: u8 = 0x60;
const LOCK_BLOCK_CMD: u8 = 0x01;
const UNLOCK_BLOCK_CMD: u8 = 0xD0;

bitflags! {
    /// Intel status register.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct IntelStatus: u8 {
        /// Write state machine ready (SR.7).
        const READY = 1 << 7;
        /// Erase or clear-lock error (SR.5).
        const ERASE_ERROR = 1 << 5;
        /// Program or set-lock error (SR.4).
        const PROGRAM_ERROR = 1 << 4;
        /// Programming voltage out of range (SR.3).
        const VPP_ERROR = 1 << 3;
        /// Operation aborted on a locked block (SR.1).
        const LOCKED = 1 << 1;
    }
}

fn reset<B: FlashBus + ?Sized>(chip: &mut Chip<'_, B>) {
    let base = chip.port.base;
    chip.port.command(chip.bus, base, 0, RESET_CMD);
}

fn clear_status<B: FlashBus + ?Sized>(chip: &mut Chip<'_, B>) {
    let base = chip.port.base;
    chip.port.command(chip.bus, base, 0, CLEAR_STATUS_CMD);
}

fn status_has<B: FlashBus + ?Sized>(chip: &mut Chip<'_, B>, flags: IntelStatus) -> bool {
    let base = chip.port.base;
    chip.port.some_set(chip.bus, base, flags.bits())
}

/// Spin until every chip reports SR.7, up to the configured limit.
fn wait_ready<B: FlashBus + ?Sized>(chip: &mut Chip<'_, B>) -> Result<(), Error> {
    let base = chip.port.base;
    for _ in 0..chip.config.status_timeout {
        if chip.port.all_set(chip.bus, base, IntelStatus::READY.bits()) {
            return Ok(());
        }
    }
    warn!("Intel status wait timed out");
    Err(Error::Timeout)
}

/// Wait for the operation to finish, check `errors`, and return to read-array mode.
fn complete<B: FlashBus + ?Sized>(chip: &mut Chip<'_, B>, errors: IntelStatus, failure: Error) -> Result<(), Error> {
    let ready = wait_ready(chip);
    let failed = ready.is_ok() && status_has(chip, errors);
    clear_status(chip);
    reset(chip);
    ready?;
    if failed {
        return Err(failure);
    }
    Ok(())
}

pub(crate) fn identify<B: FlashBus + ?Sized>(chip: &mut Chip<'_, B>) -> Identity {
    let base = chip.port.base;
    reset(chip);
    chip.port.command(chip.bus, base, 0, ID_CMD);
    let manufacturer_id = chip.port.read(chip.bus, base, MANUFACTURER_ID_ADDR) as u8;
    let device = chip.port.read(chip.bus, base, DEVICE_ID_ADDR);
    reset(chip);

    Identity {
        manufacturer_id,
        device_id: [device, 0],
    }
}

pub(crate) fn set_lock<B: FlashBus + ?Sized>(chip: &mut Chip<'_, B>, block: u32) -> Result<(), Error> {
    chip.port.command(chip.bus, block, 0, LOCK_SETUP_CMD);
    chip.port.command(chip.bus, block, 0, LOCK_BLOCK_CMD);
    complete(chip, IntelStatus::PROGRAM_ERROR | IntelStatus::VPP_ERROR, Error::LockFailure)
}

pub(crate) fn clear_lock<B: FlashBus + ?Sized>(chip: &mut Chip<'_, B>, block: u32) -> Result<(), Error> {
    chip.port.command(chip.bus, block, 0, LOCK_SETUP_CMD);
    chip.port.command(chip.bus, block, 0, UNLOCK_BLOCK_CMD);
    complete(chip, IntelStatus::ERASE_ERROR | IntelStatus::VPP_ERROR, Error::LockFailure)
}

pub(crate) fn erase_block<B: FlashBus + ?Sized>(chip: &mut Chip<'_, B>, block: u32) -> Result<(), Error> {
    clear_lock(chip, block)?;
    chip.port.command(chip.bus, block, 0, ERASE_SETUP_CMD);
    chip.port.command(chip.bus, block, 0, ERASE_CONFIRM_CMD);
    complete(chip, IntelStatus::ERASE_ERROR | IntelStatus::VPP_ERROR, Error::EraseFailure)
        .inspect_err(|_| warn!("Intel erase of block {:#x} failed", block))
}

pub(crate) fn write_word<B: FlashBus + ?Sized>(chip: &mut Chip<'_, B>, addr: u32, value: u16) -> Result<(), Error> {
    chip.port.command(chip.bus, addr, 0, PROGRAM_CMD);
    chip.port.write_at(chip.bus, addr, value);
    complete(chip, IntelStatus::PROGRAM_ERROR | IntelStatus::VPP_ERROR, Error::ProgramFailure)
}

pub(crate) fn buffer_write<B: FlashBus + ?Sized>(chip: &mut Chip<'_, B>, addr: u32, data: &[u8]) -> Result<(), Error> {
    let width = chip.geometry.bus_width;
    let step = width.bytes() as usize;
    if data.len() < step {
        return Ok(());
    }
    let words = data.len() / step;
    let count = u8::try_from(words - 1).map_err(|_| Error::UnsupportedDevice)?;
    let base = chip.port.base;

    let mut available = false;
    for _ in 0..chip.config.buffer_timeout {
        chip.port.command(chip.bus, addr, 0, BUFFER_LOAD_CMD);
        if chip.port.all_set(chip.bus, base, IntelStatus::READY.bits()) {
            available = true;
            break;
        }
    }
    if !available {
        warn!("Intel write buffer at {:#x} never became available", addr);
        reset(chip);
        return Err(Error::Timeout);
    }

    chip.port.command(chip.bus, addr, 0, count);
    for offset in (0..data.len()).step_by(step) {
        chip.port
            .write_at(chip.bus, addr + offset as u32, width.word_from(data, offset));
    }
    chip.port.command(chip.bus, addr, 0, BUFFER_CONFIRM_CMD);

    complete(chip, IntelStatus::PROGRAM_ERROR | IntelStatus::VPP_ERROR, Error::ProgramFailure)
}
