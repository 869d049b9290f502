//! NAND engine.
//!
//! Drives a raw NAND device through the AEMIF NAND controller: device
//! discovery from the read-ID bytes, page program and read with the
//! controller's hardware ECC stored in the spare area, block erase, and the
//! lock/unlock commands some devices support.

pub mod device;
pub mod ecc;

use core::fmt::Debug;

use bitflags::bitflags;
use embedded_hal::delay::DelayNs;

use crate::bus::{BusWidth, FlashBus};
use crate::config::NandConfig;
use crate::error::Error;
use crate::traits::PageFlashDevice;

pub use device::{NandDeviceInfo, NandGeometry, DEVICE_TABLE};
use device::{MAX_OPS_PER_PAGE, MAX_PAGE_DATA, MAX_SPARE_PER_OP};
use ecc::EccCheck;

const DATA_OFFSET: u32 = 0x00;
const ALE_OFFSET: u32 = 0x0B;
const CLE_OFFSET: u32 = 0x10;

const READ_ID_ADDRESS: u8 = 0x00;

#[derive(Clone, Copy)]
enum Command {
    ReadLo = 0x00,
    /// Second read cycle on big-block devices.
    ReadConfirm = 0x30,
    ProgramStart = 0x80,
    ProgramEnd = 0x10,
    EraseStart = 0x60,
    EraseConfirm = 0xD0,
    Status = 0x70,
    ReadId = 0x90,
    Reset = 0xFF,
    UnlockStart = 0x23,
    UnlockEnd = 0x24,
    Lock = 0x2A,
}

bitflags! {
    /// NAND status byte (command 70h).
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct NandStatus: u8 {
        /// Last program or erase failed.
        const FAIL = 1 << 0;
        /// Device is ready for a new command.
        const READY = 1 << 6;
        /// Device is not write protected.
        const WRITABLE = 1 << 7;
    }
}

/// The NAND controller side of the EMIF: the ready line and the ECC
/// accumulators. Data, address and command cycles go through [`FlashBus`].
pub trait NandHardware: FlashBus {
    /// Put chip select `chip_select_offset` (0 for CS2) into NAND mode.
    fn configure(&mut self, chip_select_offset: u8, bus_width: BusWidth);

    /// State of the device's ready/busy line.
    fn is_ready(&mut self) -> bool;

    /// Return the ECC accumulated since the previous call and restart the
    /// accumulator.
    fn ecc_read_and_restart(&mut self, chip_select_offset: u8) -> u32;
}

impl<T: NandHardware + ?Sized> NandHardware for &mut T {
    fn configure(&mut self, chip_select_offset: u8, bus_width: BusWidth) {
        (**self).configure(chip_select_offset, bus_width)
    }

    fn is_ready(&mut self) -> bool {
        (**self).is_ready()
    }

    fn ecc_read_and_restart(&mut self, chip_select_offset: u8) -> u32 {
        (**self).ecc_read_and_restart(chip_select_offset)
    }
}

/// Command, address and data cycles against one NAND window.
#[derive(Clone, Copy)]
struct NandPort {
    base: u32,
    width: BusWidth,
}

impl NandPort {
    fn command<H: FlashBus>(&self, hw: &mut H, cmd: Command) {
        self.width.write(hw, self.base + CLE_OFFSET, cmd as u16);
    }

    fn address<H: FlashBus>(&self, hw: &mut H, byte: u8) {
        self.width.write(hw, self.base + ALE_OFFSET, u16::from(byte));
    }

    /// `count` address cycles, least significant byte first.
    fn address_bytes<H: FlashBus>(&self, hw: &mut H, count: u8, value: u32) {
        for i in 0..u32::from(count) {
            self.address(hw, (value >> (8 * i)) as u8);
        }
    }

    fn read_data<H: FlashBus>(&self, hw: &mut H) -> u16 {
        self.width.read(hw, self.base + DATA_OFFSET)
    }

    fn read_bytes<H: FlashBus>(&self, hw: &mut H, dst: &mut [u8]) {
        let step = self.width.bytes() as usize;
        for offset in (0..dst.len()).step_by(step) {
            let value = self.read_data(hw);
            self.width.word_into(dst, offset, value);
        }
    }

    fn write_bytes<H: FlashBus>(&self, hw: &mut H, src: &[u8]) {
        let step = self.width.bytes() as usize;
        for offset in (0..src.len()).step_by(step) {
            let value = self.width.word_from(src, offset);
            self.width.write(hw, self.base + DATA_OFFSET, value);
        }
    }
}

/// Settle, then poll the ready line a bounded number of times.
fn wait_for_ready<H: NandHardware, D: DelayNs>(
    hw: &mut H,
    delay: &mut D,
    config: &NandConfig,
) -> Result<(), Error> {
    delay.delay_ns(config.settle_ns);
    for _ in 0..config.timeout {
        if hw.is_ready() {
            return Ok(());
        }
    }
    warn!("NAND ready wait timed out");
    Err(Error::Timeout)
}

pub struct NandFlash<H, D> {
    hw: H,
    delay: D,
    port: NandPort,
    config: NandConfig,
    geometry: NandGeometry,
}

impl<H, D> Debug for NandFlash<H, D> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "NandFlash({:?})", self.geometry)
    }
}

impl<H, D> NandFlash<H, D>
where
    H: NandHardware,
    D: DelayNs,
{
    /// Reset the device, read its id and derive the geometry.
    ///
    /// Nothing is programmed or erased. Fails with [`Error::Timeout`] if the
    /// device never becomes ready and [`Error::UnknownDevice`] if its id is not
    /// in [`DEVICE_TABLE`].
    pub fn init(mut hw: H, mut delay: D, config: NandConfig) -> Result<Self, Error> {
        let chip_select_offset = config.chip_select_offset();
        let port = NandPort {
            base: config.base,
            width: config.bus_width,
        };

        hw.configure(chip_select_offset, config.bus_width);
        hw.ecc_read_and_restart(chip_select_offset);

        port.command(&mut hw, Command::Reset);
        wait_for_ready(&mut hw, &mut delay, &config)?;

        port.command(&mut hw, Command::ReadId);
        port.address(&mut hw, READ_ID_ADDRESS);
        let manufacturer_id = port.read_data(&mut hw) as u8;
        let device_id = port.read_data(&mut hw) as u8;
        // Third and fourth id bytes are not used.
        port.read_data(&mut hw);
        port.read_data(&mut hw);

        let Some(info) = NandDeviceInfo::lookup(device_id) else {
            error!("unknown NAND device id {:#x}", device_id);
            return Err(Error::UnknownDevice(device_id));
        };
        let geometry = NandGeometry::from_device(
            info,
            manufacturer_id,
            config.base,
            config.bus_width,
            chip_select_offset,
        );
        info!(
            "NAND manufacturer {:#x} device {:#x}: {} blocks, {} pages/block, {} bytes/page",
            manufacturer_id,
            device_id,
            geometry.blocks,
            geometry.pages_per_block,
            geometry.bytes_per_page
        );

        Ok(Self {
            hw,
            delay,
            port,
            config,
            geometry,
        })
    }

    pub fn geometry(&self) -> &NandGeometry {
        &self.geometry
    }

    /// Hand the hardware and delay back.
    pub fn release(self) -> (H, D) {
        (self.hw, self.delay)
    }

    fn wait_for_ready(&mut self) -> Result<(), Error> {
        wait_for_ready(&mut self.hw, &mut self.delay, &self.config)
    }

    /// Poll the status byte until the device reports ready or failure.
    pub fn wait_for_status(&mut self) -> Result<NandStatus, Error> {
        for _ in 0..self.config.timeout {
            self.port.command(&mut self.hw, Command::Status);
            let status = NandStatus::from_bits_retain(self.port.read_data(&mut self.hw) as u8);
            if status.intersects(NandStatus::READY | NandStatus::FAIL) {
                return Ok(status);
            }
        }
        warn!("NAND status wait timed out");
        Err(Error::Timeout)
    }

    fn check_page(&self, block: u32, page: u32) -> Result<(), Error> {
        if block >= self.geometry.blocks || page >= self.geometry.pages_per_block {
            return Err(Error::OutOfRange);
        }
        Ok(())
    }

    fn check_blocks(&self, start: u32, count: u32) -> Result<(), Error> {
        match start.checked_add(count) {
            Some(end) if end <= self.geometry.blocks => Ok(()),
            _ => Err(Error::OutOfRange),
        }
    }

    fn row_address(&mut self, block: u32, page: u32) {
        let row = self.geometry.row_address(block, page);
        self.port
            .address_bytes(&mut self.hw, self.geometry.row_address_bytes, row);
    }

    fn address_cycles(&mut self, block: u32, page: u32) {
        self.port
            .address_bytes(&mut self.hw, self.geometry.column_address_bytes, 0);
        self.row_address(block, page);
    }

    /// Read one page into `dst`, correcting single-bit errors per ECC operation.
    /// An erased page reads back as all ones.
    pub fn read_page(&mut self, block: u32, page: u32, dst: &mut [u8]) -> Result<(), Error> {
        self.check_page(block, page)?;
        let page_size = self.geometry.bytes_per_page as usize;
        let dst = dst.get_mut(..page_size).ok_or(Error::BufferTooSmall)?;
        trace!("NAND read block {} page {}", block, page);

        self.port.command(&mut self.hw, Command::ReadLo);
        self.address_cycles(block, page);
        if self.geometry.big_block {
            self.port.command(&mut self.hw, Command::ReadConfirm);
        }
        self.wait_for_ready()?;

        let cs = self.geometry.chip_select_offset;
        let mask = self.geometry.ecc_mask;
        let op_size = self.geometry.bytes_per_op as usize;

        self.hw.ecc_read_and_restart(cs);
        let mut computed = [0u32; MAX_OPS_PER_PAGE];
        for (slot, chunk) in computed.iter_mut().zip(dst.chunks_exact_mut(op_size)) {
            self.port.read_bytes(&mut self.hw, chunk);
            *slot = self.hw.ecc_read_and_restart(cs) & mask;
        }

        let offset = self.geometry.ecc_spare_offset();
        let mut spare = [0u8; MAX_SPARE_PER_OP];
        let spare = &mut spare[..self.geometry.spare_bytes_per_op as usize];
        for (op, (computed, chunk)) in computed.iter().zip(dst.chunks_exact_mut(op_size)).enumerate() {
            self.port.read_bytes(&mut self.hw, spare);
            let stored = ecc::from_spare(
                [spare[offset], spare[offset + 1], spare[offset + 2], spare[offset + 3]],
                self.geometry.bus_width,
            );
            if ecc::is_erased(stored, chunk) {
                continue;
            }
            match ecc::correct(stored, *computed, mask, chunk) {
                Ok(EccCheck::Clean) => {}
                Ok(EccCheck::Corrected { byte, bit }) => {
                    warn!(
                        "NAND corrected bit {} of byte {} (block {} page {} op {})",
                        bit,
                        byte,
                        block,
                        page,
                        op
                    );
                }
                Err(e) => {
                    warn!("NAND ECC failure at block {} page {} op {}", block, page, op);
                    return Err(e);
                }
            }
        }

        self.wait_for_status()?;
        Ok(())
    }

    /// Program one page from `src` and store its ECC in the spare area.
    pub fn write_page(&mut self, block: u32, page: u32, src: &[u8]) -> Result<(), Error> {
        self.check_page(block, page)?;
        let page_size = self.geometry.bytes_per_page as usize;
        let src = src.get(..page_size).ok_or(Error::BufferTooSmall)?;
        trace!("NAND write block {} page {}", block, page);

        // Page pointer back to the start of the page before programming.
        self.port.command(&mut self.hw, Command::ReadLo);
        self.port.command(&mut self.hw, Command::ProgramStart);
        self.address_cycles(block, page);

        let cs = self.geometry.chip_select_offset;
        let mask = self.geometry.ecc_mask;
        let op_size = self.geometry.bytes_per_op as usize;

        self.hw.ecc_read_and_restart(cs);
        let mut computed = [0u32; MAX_OPS_PER_PAGE];
        for (slot, chunk) in computed.iter_mut().zip(src.chunks_exact(op_size)) {
            self.port.write_bytes(&mut self.hw, chunk);
            *slot = self.hw.ecc_read_and_restart(cs) & mask;
        }

        let offset = self.geometry.ecc_spare_offset();
        let mut spare = [0xFFu8; MAX_SPARE_PER_OP];
        let spare = &mut spare[..self.geometry.spare_bytes_per_op as usize];
        for value in &computed[..self.geometry.ops_per_page as usize] {
            spare[offset..offset + 4].copy_from_slice(&ecc::to_spare(*value, self.geometry.bus_width));
            self.port.write_bytes(&mut self.hw, spare);
        }

        self.port.command(&mut self.hw, Command::ProgramEnd);
        self.wait_for_ready()?;

        let status = self.wait_for_status()?;
        if status.contains(NandStatus::FAIL) {
            warn!("NAND program failed at block {} page {}", block, page);
            return Err(Error::ProgramFailure);
        }
        Ok(())
    }

    /// Read a page back and compare it byte for byte against `expected`.
    pub fn verify_page(&mut self, block: u32, page: u32, expected: &[u8]) -> Result<(), Error> {
        let page_size = self.geometry.bytes_per_page as usize;
        let expected = expected.get(..page_size).ok_or(Error::BufferTooSmall)?;

        let mut scratch = [0u8; MAX_PAGE_DATA];
        let actual = &mut scratch[..page_size];
        self.read_page(block, page, actual)?;

        if let Some(offset) = actual.iter().zip(expected).position(|(a, e)| a != e) {
            warn!(
                "NAND verify mismatch at block {} page {} offset {}",
                block,
                page,
                offset
            );
            return Err(Error::VerifyFailure);
        }
        Ok(())
    }

    /// Erase `count` blocks starting at `start`.
    pub fn erase_blocks(&mut self, start: u32, count: u32) -> Result<(), Error> {
        self.check_blocks(start, count)?;
        debug!("NAND erase blocks {} through {}", start, start + count.saturating_sub(1));

        for block in start..start + count {
            self.port.command(&mut self.hw, Command::EraseStart);
            self.row_address(block, 0);
            self.port.command(&mut self.hw, Command::EraseConfirm);
            self.wait_for_ready()?;

            let status = self.wait_for_status()?;
            if status.contains(NandStatus::FAIL) {
                warn!("NAND erase failed at block {}", block);
                return Err(Error::EraseFailure);
            }
        }
        Ok(())
    }

    /// Unlock blocks `start..start + count`. Devices without lock support ignore this.
    pub fn unprotect_blocks(&mut self, start: u32, count: u32) -> Result<(), Error> {
        if count == 0 {
            return Err(Error::OutOfRange);
        }
        self.check_blocks(start, count)?;
        let end = start + count - 1;
        debug!("NAND unprotect blocks {} through {}", start, end);

        self.port.command(&mut self.hw, Command::UnlockStart);
        self.row_address(start, 0);
        self.port.command(&mut self.hw, Command::UnlockEnd);
        self.row_address(end, 0);
        Ok(())
    }

    /// Lock the whole device.
    pub fn protect_blocks(&mut self) {
        debug!("NAND protect all blocks");
        self.port.command(&mut self.hw, Command::Lock);
    }

    /// Erase every block except block 0, which holds the ROM boot descriptor.
    pub fn global_erase(&mut self) -> Result<(), Error> {
        let count = self.geometry.blocks - 1;
        info!("NAND global erase of {} blocks", count);
        self.unprotect_blocks(1, count)?;
        let result = self.erase_blocks(1, count);
        self.protect_blocks();
        result
    }
}

impl<H, D> PageFlashDevice for NandFlash<H, D>
where
    H: NandHardware,
    D: DelayNs,
{
    fn page_size(&self) -> usize {
        self.geometry.bytes_per_page as usize
    }

    fn pages_per_block(&self) -> u32 {
        self.geometry.pages_per_block
    }

    fn block_count(&self) -> u32 {
        self.geometry.blocks
    }

    fn read_page(&mut self, block: u32, page: u32, dst: &mut [u8]) -> Result<(), Error> {
        NandFlash::read_page(self, block, page, dst)
    }

    fn write_page(&mut self, block: u32, page: u32, src: &[u8]) -> Result<(), Error> {
        NandFlash::write_page(self, block, page, src)
    }

    fn verify_page(&mut self, block: u32, page: u32, expected: &[u8]) -> Result<(), Error> {
        NandFlash::verify_page(self, block, page, expected)
    }

    fn erase_blocks(&mut self, start: u32, count: u32) -> Result<(), Error> {
        NandFlash::erase_blocks(self, start, count)
    }

    fn unprotect_blocks(&mut self, start: u32, count: u32) -> Result<(), Error> {
        NandFlash::unprotect_blocks(self, start, count)
    }

    fn protect_blocks(&mut self) -> Result<(), Error> {
        NandFlash::protect_blocks(self);
        Ok(())
    }
}
