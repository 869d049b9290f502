//! NAND device table and geometry derivation.

use crate::bus::BusWidth;

/// Largest data chunk the controller ECC covers in one pass.
pub const MAX_BYTES_PER_OP: u32 = 512;
const MAX_BYTES_PER_OP_SHIFT: u32 = 9;
const SPARE_BYTES_PER_OP_SHIFT: u32 = 5;

/// Most ECC operations a single page can need (2048 / 512).
pub const MAX_OPS_PER_PAGE: usize = 4;

/// Largest data area of any supported page.
pub const MAX_PAGE_DATA: usize = 2048;

/// Largest spare record written per ECC operation.
pub const MAX_SPARE_PER_OP: usize = 16;

/// One row of the device table.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct NandDeviceInfo {
    pub device_id: u8,
    pub blocks: u32,
    pub pages_per_block: u32,
    /// Page size including the spare area.
    pub bytes_per_page: u32,
}

const fn dev(device_id: u8, blocks: u32, pages_per_block: u32, bytes_per_page: u32) -> NandDeviceInfo {
    NandDeviceInfo {
        device_id,
        blocks,
        pages_per_block,
        bytes_per_page,
    }
}

/// Devices the DM644x ROM boot loader knows about.
pub static DEVICE_TABLE: [NandDeviceInfo; 33] = [
    dev(0x6E, 256, 16, 256 + 8),    // 1 MB
    dev(0x68, 256, 16, 256 + 8),    // 1 MB
    dev(0xEC, 256, 16, 256 + 8),    // 1 MB
    dev(0xE8, 256, 16, 256 + 8),    // 1 MB
    dev(0xEA, 512, 16, 256 + 8),    // 2 MB
    dev(0xE3, 512, 16, 512 + 16),   // 4 MB
    dev(0xE5, 512, 16, 512 + 16),   // 4 MB
    dev(0xE6, 1024, 16, 512 + 16),  // 8 MB
    dev(0x39, 1024, 16, 512 + 16),  // 8 MB
    dev(0x6B, 1024, 16, 512 + 16),  // 8 MB
    dev(0x73, 1024, 32, 512 + 16),  // 16 MB
    dev(0x33, 1024, 32, 512 + 16),  // 16 MB
    dev(0x75, 2048, 32, 512 + 16),  // 32 MB
    dev(0x35, 2048, 32, 512 + 16),  // 32 MB
    dev(0x43, 1024, 32, 512 + 16),  // 16 MB
    dev(0x45, 2048, 32, 512 + 16),  // 32 MB
    dev(0x53, 1024, 32, 512 + 16),  // 16 MB
    dev(0x55, 2048, 32, 512 + 16),  // 32 MB
    dev(0x36, 4096, 32, 512 + 16),  // 64 MB
    dev(0x46, 4096, 32, 512 + 16),  // 64 MB
    dev(0x56, 4096, 32, 512 + 16),  // 64 MB
    dev(0x76, 4096, 32, 512 + 16),  // 64 MB
    dev(0x74, 8192, 32, 512 + 16),  // 128 MB
    dev(0x79, 8192, 32, 512 + 16),  // 128 MB
    dev(0x71, 16384, 32, 512 + 16), // 256 MB
    dev(0xF1, 1024, 64, 2048 + 64), // 128 MB, big block
    dev(0xA1, 1024, 64, 2048 + 64), // 128 MB, big block
    dev(0xAA, 2048, 64, 2048 + 64), // 256 MB, big block
    dev(0xDA, 2048, 64, 2048 + 64), // 256 MB, big block
    dev(0xDC, 4096, 64, 2048 + 64), // 512 MB, big block
    dev(0xAC, 4096, 64, 2048 + 64), // 512 MB, big block
    dev(0xB1, 1024, 64, 2048 + 64), // 128 MB, big block
    dev(0xC1, 1024, 64, 2048 + 64), // 128 MB, big block
];

impl NandDeviceInfo {
    pub fn lookup(device_id: u8) -> Option<&'static NandDeviceInfo> {
        DEVICE_TABLE.iter().find(|info| info.device_id == device_id)
    }
}

/// Everything the engine needs to address and protect one NAND device.
///
/// Built once by discovery and never modified afterwards.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct NandGeometry {
    pub flash_base: u32,
    pub bus_width: BusWidth,
    pub manufacturer_id: u8,
    pub device_id: u8,
    pub blocks: u32,
    pub pages_per_block: u32,
    /// Data bytes per page, spare area excluded.
    pub bytes_per_page: u32,
    pub spare_bytes_per_page: u32,
    pub big_block: bool,
    pub bytes_per_op: u32,
    pub ops_per_page: u32,
    pub spare_bytes_per_op: u32,
    pub column_address_bytes: u8,
    pub row_address_bytes: u8,
    pub page_shift: u8,
    pub block_shift: u8,
    pub ecc_mask: u32,
    /// Index of the 32-bit ECC word inside each spare record.
    pub ecc_spare_word: u8,
    pub chip_select_offset: u8,
}

fn log2(value: u32) -> u32 {
    let mut shift = 0;
    while (value >> shift) > 1 {
        shift += 1;
    }
    shift
}

/// Mask with one even/odd parity bit pair for each address bit of an operation.
pub fn ecc_mask(bytes_per_op: u32) -> u32 {
    let bits = bytes_per_op * 8;
    let mut mask = 0;
    let mut j = 0;
    while (bits >> j) > 1 {
        mask |= 0x0001_0001 << j;
        j += 1;
    }
    mask
}

impl NandGeometry {
    pub fn from_device(
        info: &NandDeviceInfo,
        manufacturer_id: u8,
        flash_base: u32,
        bus_width: BusWidth,
        chip_select_offset: u8,
    ) -> Self {
        let bytes_per_page = (info.bytes_per_page >> 8) << 8;
        let big_block = bytes_per_page > MAX_BYTES_PER_OP;
        let bytes_per_op = bytes_per_page.min(MAX_BYTES_PER_OP);
        let ops_per_page = if bytes_per_op < MAX_BYTES_PER_OP {
            1
        } else {
            bytes_per_page >> MAX_BYTES_PER_OP_SHIFT
        };
        let spare_bytes_per_op = bytes_per_op >> SPARE_BYTES_PER_OP_SHIFT;

        let page_shift: u32 = if big_block { 16 } else { 8 };
        let block_shift = page_shift + log2(info.pages_per_block);
        let column_address_bytes = page_shift >> 3;

        let address_bits = block_shift + log2(info.blocks);
        let row_address_bytes = if address_bits <= 24 {
            3 - column_address_bytes
        } else if address_bits <= 32 {
            4 - column_address_bytes
        } else {
            5 - column_address_bytes
        };

        Self {
            flash_base,
            bus_width,
            manufacturer_id,
            device_id: info.device_id,
            blocks: info.blocks,
            pages_per_block: info.pages_per_block,
            bytes_per_page,
            spare_bytes_per_page: info.bytes_per_page - bytes_per_page,
            big_block,
            bytes_per_op,
            ops_per_page,
            spare_bytes_per_op,
            column_address_bytes: column_address_bytes as u8,
            row_address_bytes: row_address_bytes as u8,
            page_shift: page_shift as u8,
            block_shift: block_shift as u8,
            ecc_mask: ecc_mask(bytes_per_op),
            ecc_spare_word: if big_block { 2 } else { 0 },
            chip_select_offset,
        }
    }

    /// Row address cycles select the page; the block sits above the page bits.
    pub fn row_address(&self, block: u32, page: u32) -> u32 {
        (block << (self.block_shift - self.page_shift)) | page
    }

    pub fn total_pages(&self) -> u32 {
        self.blocks * self.pages_per_block
    }

    /// Byte offset of the ECC word within a spare record.
    pub fn ecc_spare_offset(&self) -> usize {
        usize::from(self.ecc_spare_word) * 4
    }
}
