use crate::error::Error;

/// Byte-addressed flash, the shape of a NOR device.
pub trait HardwareFlashDevice {
    type Error;

    /// Reads flash contents into `data`, starting at `addr`.
    fn read(&mut self, addr: u32, data: &mut [u8]) -> Result<(), Self::Error>;

    /// Sets every byte of the erase block containing `addr` to the erased state (FFh).
    fn sector_erase(&mut self, addr: u32) -> Result<(), Self::Error>;

    /// Programs `data` at previously erased locations starting at `addr`.
    fn page_program(&mut self, addr: u32, data: &[u8]) -> Result<(), Self::Error>;

    /// Sets all memory within the device to the erased state.
    fn chip_erase(&mut self) -> Result<(), Self::Error>;
}

/// Block/page addressed flash, the shape of a NAND device.
///
/// Image placement is written against this trait so it can be driven by a
/// real engine or a test double.
pub trait PageFlashDevice {
    /// Data bytes per page, spare area excluded.
    fn page_size(&self) -> usize;
    fn pages_per_block(&self) -> u32;
    fn block_count(&self) -> u32;

    /// Reads one page into the first `page_size()` bytes of `dst`.
    fn read_page(&mut self, block: u32, page: u32, dst: &mut [u8]) -> Result<(), Error>;

    /// Programs one page from the first `page_size()` bytes of `src`.
    fn write_page(&mut self, block: u32, page: u32, src: &[u8]) -> Result<(), Error>;

    /// Reads one page back and compares it against `expected`.
    fn verify_page(&mut self, block: u32, page: u32, expected: &[u8]) -> Result<(), Error>;

    fn erase_blocks(&mut self, start: u32, count: u32) -> Result<(), Error>;
    fn unprotect_blocks(&mut self, start: u32, count: u32) -> Result<(), Error>;
    fn protect_blocks(&mut self) -> Result<(), Error>;
}
