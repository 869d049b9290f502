//! Boot image headers and magic numbers.
//!
//! Both headers are stored little endian, one `u32` per field, directly in
//! front of (NOR) or one page before (NAND) the payload they describe.

/// Upper 24 bits shared by every valid magic number.
pub const MAGIC_NUMBER_VALID: u32 = 0xA1AC_ED00;
pub const MAGIC_NUMBER_MASK: u32 = 0xFFFF_FF00;

pub const MAGIC_SAFE: u32 = 0xA1AC_ED00;
pub const MAGIC_DMA: u32 = 0xA1AC_ED11;
pub const MAGIC_IC: u32 = 0xA1AC_ED22;
pub const MAGIC_FAST: u32 = 0xA1AC_ED33;
pub const MAGIC_DMA_IC: u32 = 0xA1AC_ED44;
pub const MAGIC_DMA_IC_FAST: u32 = 0xA1AC_ED55;
/// Payload is a raw binary copied to its load address.
pub const MAGIC_BIN_IMG: u32 = 0xA1AC_ED66;
pub const MAGIC_NOR_RESTORE: u32 = 0xA1AC_ED77;
pub const MAGIC_NOR_SREC_BURN: u32 = 0xA1AC_ED88;
pub const MAGIC_NOR_BIN_BURN: u32 = 0xA1AC_ED99;
pub const MAGIC_NOR_GLOBAL_ERASE: u32 = 0xA1AC_EDAA;
pub const MAGIC_NAND_SREC_BURN: u32 = 0xA1AC_EDBB;
pub const MAGIC_NAND_BIN_BURN: u32 = 0xA1AC_EDCC;
pub const MAGIC_NAND_GLOBAL_ERASE: u32 = 0xA1AC_EDDD;

/// True if `magic` carries the boot loader signature in its upper 24 bits.
pub const fn is_valid_magic(magic: u32) -> bool {
    magic & MAGIC_NUMBER_MASK == MAGIC_NUMBER_VALID
}

fn word(bytes: &[u8], index: usize) -> u32 {
    let at = index * 4;
    u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

/// Header stored in page 0 of the first block of a NAND image.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct NandBootHeader {
    pub magic: u32,
    pub entry_point: u32,
    /// Payload length in pages.
    pub page_count: u32,
    /// Block holding the first payload page.
    pub block: u32,
    /// Page (within `block`) holding the first payload page.
    pub page: u32,
    pub load_address: u32,
}

impl NandBootHeader {
    pub const SIZE: usize = 24;

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        let fields = [
            self.magic,
            self.entry_point,
            self.page_count,
            self.block,
            self.page,
            self.load_address,
        ];
        for (chunk, field) in out.chunks_exact_mut(4).zip(fields) {
            chunk.copy_from_slice(&field.to_le_bytes());
        }
        out
    }

    /// Decode a header from the start of `bytes`. `None` if `bytes` is too short.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < Self::SIZE {
            return None;
        }
        Some(Self {
            magic: word(bytes, 0),
            entry_point: word(bytes, 1),
            page_count: word(bytes, 2),
            block: word(bytes, 3),
            page: word(bytes, 4),
            load_address: word(bytes, 5),
        })
    }

    pub fn is_valid(&self) -> bool {
        is_valid_magic(self.magic)
    }
}

/// Header stored directly in front of a NOR image.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct NorBootHeader {
    pub magic: u32,
    pub entry_point: u32,
    /// Payload length in bytes.
    pub app_size: u32,
    pub load_address: u32,
}

impl NorBootHeader {
    pub const SIZE: usize = 16;

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        let fields = [self.magic, self.entry_point, self.app_size, self.load_address];
        for (chunk, field) in out.chunks_exact_mut(4).zip(fields) {
            chunk.copy_from_slice(&field.to_le_bytes());
        }
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < Self::SIZE {
            return None;
        }
        Some(Self {
            magic: word(bytes, 0),
            entry_point: word(bytes, 1),
            app_size: word(bytes, 2),
            load_address: word(bytes, 3),
        })
    }

    pub fn is_valid(&self) -> bool {
        is_valid_magic(self.magic)
    }
}
