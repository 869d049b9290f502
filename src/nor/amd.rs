//! AMD/Spansion command set (CFI ids 0x0002 and 0x0004).

use crate::bus::FlashBus;
use crate::error::Error;

use super::vendor::{Chip, Identity};

const UNLOCK_ADDR0: u32 = 0x555;
const UNLOCK_ADDR1: u32 = 0x2AA;
const COMMAND_ADDR: u32 = 0x555;
const UNLOCK_CMD0: u8 = 0xAA;
const UNLOCK_CMD1: u8 = 0x55;

const ID_CMD: u8 = 0x90;
const MANUFACTURER_ID_ADDR: u32 = 0x00;
const DEVICE_ID_ADDR0: u32 = 0x01;
const DEVICE_ID_ADDR1: u32 = 0x0E;
/// First device id byte of parts that carry a three byte id.
const MULTI_BYTE_ID: u16 = 0x7E;

const RESET_CMD: u8 = 0xF0;
const ERASE_SETUP_CMD: u8 = 0x80;
const ERASE_CONFIRM_CMD: u8 = 0x30;
const PROGRAM_CMD: u8 = 0xA0;
const BUFFER_LOAD_CMD: u8 = 0x25;
const BUFFER_CONFIRM_CMD: u8 = 0x29;

/// Data# polling bits of both byte lanes.
const DQ7_DQ15: u16 = 0x8080;
const DQ7: u8 = 1 << 7;
/// Exceeded timing limits.
const DQ5: u8 = 1 << 5;
/// Write-to-buffer abort.
const DQ1: u8 = 1 << 1;

fn reset<B: FlashBus + ?Sized>(chip: &mut Chip<'_, B>) {
    let base = chip.port.base;
    chip.port.command(chip.bus, base, COMMAND_ADDR, RESET_CMD);
}

fn unlock<B: FlashBus + ?Sized>(chip: &mut Chip<'_, B>) {
    let base = chip.port.base;
    chip.port.command(chip.bus, base, UNLOCK_ADDR0, UNLOCK_CMD0);
    chip.port.command(chip.bus, base, UNLOCK_ADDR1, UNLOCK_CMD1);
}

/// Recover from a write-buffer abort; a plain reset is ignored in that state.
fn abort_reset<B: FlashBus + ?Sized>(chip: &mut Chip<'_, B>) {
    unlock(chip);
    reset(chip);
}

pub(crate) fn identify<B: FlashBus + ?Sized>(chip: &mut Chip<'_, B>) -> Identity {
    let base = chip.port.base;
    reset(chip);
    unlock(chip);
    chip.port.command(chip.bus, base, COMMAND_ADDR, ID_CMD);

    let manufacturer_id = chip.port.read(chip.bus, base, MANUFACTURER_ID_ADDR) as u8;
    let first = chip.port.read(chip.bus, base, DEVICE_ID_ADDR0);
    let second = if first & 0xFF == MULTI_BYTE_ID {
        chip.port.cfi_bytes(chip.bus, base, DEVICE_ID_ADDR1, 2) as u16
    } else {
        0
    };
    reset(chip);

    Identity {
        manufacturer_id,
        device_id: [first, second],
    }
}

/// Data# polling: wait until DQ7 (and DQ15) at `addr` match `expected`.
///
/// DQ5 signals the chip's internal timeout and DQ1 a write-buffer abort;
/// either is re-checked once against the data before being reported.
fn poll<B: FlashBus + ?Sized>(chip: &mut Chip<'_, B>, addr: u32, expected: u16, watch_abort: bool) -> Result<(), Error> {
    let settled = |value: u16| value & DQ7_DQ15 == expected & DQ7_DQ15;
    loop {
        if settled(chip.port.read_at(chip.bus, addr)) {
            return Ok(());
        }
        if chip.port.all_set(chip.bus, addr, DQ5) {
            if settled(chip.port.read_at(chip.bus, addr)) {
                return Ok(());
            }
            warn!("AMD program timed out at {:#x}", addr);
            return Err(Error::Timeout);
        }
        if watch_abort && chip.port.all_set(chip.bus, addr, DQ1) {
            if settled(chip.port.read_at(chip.bus, addr)) {
                return Ok(());
            }
            warn!("AMD write buffer aborted at {:#x}", addr);
            abort_reset(chip);
            return Err(Error::ProgramFailure);
        }
        core::hint::spin_loop();
    }
}

pub(crate) fn erase_block<B: FlashBus + ?Sized>(chip: &mut Chip<'_, B>, block: u32) -> Result<(), Error> {
    let base = chip.port.base;
    let size = chip.geometry.block_info(block)?.size;

    unlock(chip);
    chip.port.command(chip.bus, base, COMMAND_ADDR, ERASE_SETUP_CMD);
    unlock(chip);
    chip.port.command(chip.bus, block, 0, ERASE_CONFIRM_CMD);

    // No bound: the embedded algorithm always terminates and drives DQ7 high.
    while !chip.port.all_set(chip.bus, block, DQ7) {
        core::hint::spin_loop();
    }

    let erased = chip.geometry.bus_width.all_ones();
    let step = chip.geometry.bus_width.bytes() as usize;
    let clean = (0..size)
        .step_by(step)
        .all(|offset| chip.port.read_at(chip.bus, block + offset) == erased);
    reset(chip);

    if !clean {
        warn!("AMD erase of block {:#x} left programmed bits", block);
        return Err(Error::EraseFailure);
    }
    Ok(())
}

pub(crate) fn write_word<B: FlashBus + ?Sized>(chip: &mut Chip<'_, B>, addr: u32, value: u16) -> Result<(), Error> {
    let base = chip.port.base;
    unlock(chip);
    chip.port.command(chip.bus, base, COMMAND_ADDR, PROGRAM_CMD);
    chip.port.write_at(chip.bus, addr, value);

    let result = poll(chip, addr, value, false);
    reset(chip);
    result?;

    if chip.port.read_at(chip.bus, addr) != value {
        return Err(Error::VerifyFailure);
    }
    Ok(())
}

pub(crate) fn buffer_write<B: FlashBus + ?Sized>(chip: &mut Chip<'_, B>, addr: u32, data: &[u8]) -> Result<(), Error> {
    let width = chip.geometry.bus_width;
    let step = width.bytes() as usize;
    if data.len() < step {
        return Ok(());
    }
    let block = chip.geometry.block_info(addr)?.address;
    let words = data.len() / step;
    let count = u8::try_from(words - 1).map_err(|_| Error::UnsupportedDevice)?;

    unlock(chip);
    chip.port.command(chip.bus, block, 0, BUFFER_LOAD_CMD);
    chip.port.command(chip.bus, block, 0, count);
    for offset in (0..data.len()).step_by(step) {
        chip.port
            .write_at(chip.bus, addr + offset as u32, width.word_from(data, offset));
    }
    chip.port.command(chip.bus, block, 0, BUFFER_CONFIRM_CMD);

    let last = (words - 1) * step;
    let result = poll(chip, addr + last as u32, width.word_from(data, last), true);
    reset(chip);
    result?;

    for offset in (0..data.len()).step_by(step) {
        if chip.port.read_at(chip.bus, addr + offset as u32) != width.word_from(data, offset) {
            warn!("AMD buffer verify failed at {:#x}", addr + offset as u32);
            return Err(Error::VerifyFailure);
        }
    }
    Ok(())
}
