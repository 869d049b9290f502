//! Behavioural models of the flash parts the engines drive.
#![allow(dead_code)]

use std::collections::{HashMap, HashSet};

use davinci_flash::bus::{BusWidth, FlashBus};
use davinci_flash::config::{NandConfig, NorConfig, CS2_BASE};
use davinci_flash::nand::{ecc, NandHardware};
use embedded_hal::delay::DelayNs;

pub struct NoDelay;

impl DelayNs for NoDelay {
    fn delay_ns(&mut self, _ns: u32) {}
}

pub fn nand_config() -> NandConfig {
    NandConfig {
        timeout: 64,
        ..NandConfig::default()
    }
}

pub fn nand_config_for(bus_width: BusWidth) -> NandConfig {
    NandConfig {
        bus_width,
        ..nand_config()
    }
}

pub fn nor_config() -> NorConfig {
    NorConfig {
        status_timeout: 64,
        buffer_timeout: 64,
        ..NorConfig::default()
    }
}

pub fn nor_config_for(wiring: NorWiring) -> NorConfig {
    NorConfig {
        bus_width: wiring.bus_width(),
        ..nor_config()
    }
}

/// Deterministic, non-repeating-looking test data.
pub fn pattern(len: usize, seed: u8) -> Vec<u8> {
    (0..len)
        .map(|i| (i as u8).wrapping_mul(29).wrapping_add(seed) ^ ((i >> 8) as u8))
        .collect()
}

const NAND_DATA: u32 = 0x00;
const NAND_ALE: u32 = 0x0B;
const NAND_CLE: u32 = 0x10;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum NandMode {
    Idle,
    ReadId(usize),
    Status,
    Read,
    Program,
    Erase,
    UnlockStart,
    UnlockEnd(u32),
}

/// A NAND part behind the AEMIF NAND controller, on an 8 or 16-bit bus.
///
/// Pages are stored sparsely (data followed by spare); anything not stored
/// reads as erased. The ECC accumulator sees every byte that crosses the data
/// port, low byte first on a 16-bit bus, as the controller does. Accesses of
/// the wrong width panic.
pub struct SimNand {
    pub bus_width: BusWidth,
    pub manufacturer_id: u8,
    pub device_id: u8,
    pub page_size: usize,
    pub spare_size: usize,
    pub pages_per_block: u32,
    pub blocks: u32,
    column_bytes: usize,
    row_bytes: usize,

    pages: HashMap<u32, Vec<u8>>,
    mode: NandMode,
    address: Vec<u8>,
    column: usize,
    row: u32,
    buffer: Vec<u8>,
    failed: bool,
    ecc_bytes: Vec<u8>,
    unlocked: Option<(u32, u32)>,
    glitches: HashMap<u32, u32>,

    /// Reject program and erase outside the unlocked range.
    pub enforce_lock: bool,
    /// Ready line never goes high.
    pub stuck_busy: bool,
    pub bad_erase: HashSet<u32>,
    pub bad_program: HashSet<u32>,
    /// Blocks erased, in order.
    pub erased: Vec<u32>,
    pub configured: Option<(u8, BusWidth)>,
}

impl SimNand {
    fn new(device_id: u8, blocks: u32, pages_per_block: u32, page_size: usize, spare_size: usize) -> Self {
        let big_block = page_size > 512;
        Self {
            bus_width: BusWidth::Bits8,
            manufacturer_id: 0xEC,
            device_id,
            page_size,
            spare_size,
            pages_per_block,
            blocks,
            column_bytes: if big_block { 2 } else { 1 },
            row_bytes: 2,
            pages: HashMap::new(),
            mode: NandMode::Idle,
            address: Vec::new(),
            column: 0,
            row: 0,
            buffer: Vec::new(),
            failed: false,
            ecc_bytes: Vec::new(),
            unlocked: None,
            glitches: HashMap::new(),
            enforce_lock: false,
            stuck_busy: false,
            bad_erase: HashSet::new(),
            bad_program: HashSet::new(),
            erased: Vec::new(),
            configured: None,
        }
    }

    /// 4 MB, 512 byte pages, 16 pages per block.
    pub fn small_page() -> Self {
        Self::new(0xE3, 512, 16, 512, 16)
    }

    /// 128 MB, 2048 byte pages, 64 pages per block.
    pub fn big_block() -> Self {
        Self::new(0xF1, 1024, 64, 2048, 64)
    }

    /// The same part with a 16-bit data bus.
    pub fn on_bus(self, bus_width: BusWidth) -> Self {
        Self { bus_width, ..self }
    }

    pub fn with_device_id(device_id: u8) -> Self {
        Self {
            device_id,
            ..Self::small_page()
        }
    }

    fn row_of(&self, block: u32, page: u32) -> u32 {
        block * self.pages_per_block + page
    }

    fn raw_len(&self) -> usize {
        self.page_size + self.spare_size
    }

    fn raw(&self, row: u32) -> Vec<u8> {
        self.pages
            .get(&row)
            .cloned()
            .unwrap_or_else(|| vec![0xFF; self.raw_len()])
    }

    /// Data area of a page as stored.
    pub fn page_data(&self, block: u32, page: u32) -> Vec<u8> {
        let mut raw = self.raw(self.row_of(block, page));
        raw.truncate(self.page_size);
        raw
    }

    /// Spare area of a page as stored.
    pub fn spare(&self, block: u32, page: u32) -> Vec<u8> {
        self.raw(self.row_of(block, page))[self.page_size..].to_vec()
    }

    /// Flip one stored data bit.
    pub fn flip_bit(&mut self, block: u32, page: u32, byte: usize, bit: u8) {
        let row = self.row_of(block, page);
        let mut raw = self.raw(row);
        raw[byte] ^= 1 << bit;
        self.pages.insert(row, raw);
    }

    /// Make the next `count` reads of a page return two flipped bits.
    pub fn glitch_reads(&mut self, block: u32, page: u32, count: u32) {
        let row = self.row_of(block, page);
        self.glitches.insert(row, count);
    }

    /// Duplicate a page, spare included.
    pub fn copy_page(&mut self, from: (u32, u32), to: (u32, u32)) {
        let raw = self.raw(self.row_of(from.0, from.1));
        let row = self.row_of(to.0, to.1);
        self.pages.insert(row, raw);
    }

    pub fn is_block_erased(&self, block: u32) -> bool {
        let first = self.row_of(block, 0);
        (first..first + self.pages_per_block).all(|row| !self.pages.contains_key(&row))
    }

    pub fn is_locked(&self, block: u32) -> bool {
        !matches!(self.unlocked, Some((start, end)) if (start..=end).contains(&block))
    }

    fn writable(&self, block: u32) -> bool {
        !self.enforce_lock || !self.is_locked(block)
    }

    fn command(&mut self, cmd: u8) {
        match cmd {
            0xFF => {
                self.mode = NandMode::Idle;
                self.failed = false;
            }
            0x90 => self.mode = NandMode::ReadId(0),
            0x70 => self.mode = NandMode::Status,
            0x00 => {
                self.mode = NandMode::Read;
                self.address.clear();
            }
            // Big-block read confirm; the page was latched with its address.
            0x30 => {}
            0x80 => {
                self.mode = NandMode::Program;
                self.address.clear();
                self.column = 0;
                self.buffer = vec![0xFF; self.raw_len()];
            }
            0x10 => self.program(),
            0x60 => {
                self.mode = NandMode::Erase;
                self.address.clear();
            }
            0xD0 => self.erase(),
            0x23 => {
                self.mode = NandMode::UnlockStart;
                self.address.clear();
            }
            0x24 => {
                if self.mode == NandMode::UnlockStart && self.address.len() == self.row_bytes {
                    let start = self.row_from(0);
                    self.mode = NandMode::UnlockEnd(start);
                    self.address.clear();
                }
            }
            0x2A => self.unlocked = None,
            other => panic!("unexpected NAND command {other:#x}"),
        }
    }

    fn row_from(&self, skip: usize) -> u32 {
        self.address[skip..skip + self.row_bytes]
            .iter()
            .rev()
            .fold(0, |acc, byte| (acc << 8) | u32::from(*byte))
    }

    fn address_byte(&mut self, byte: u8) {
        self.address.push(byte);
        let full = self.column_bytes + self.row_bytes;
        match self.mode {
            NandMode::Read if self.address.len() == full => {
                self.column = self.address[..self.column_bytes]
                    .iter()
                    .rev()
                    .fold(0, |acc, b| (acc << 8) | usize::from(*b));
                self.row = self.row_from(self.column_bytes);
                self.buffer = self.raw(self.row);
                if let Some(remaining) = self.glitches.get_mut(&self.row) {
                    if *remaining > 0 {
                        *remaining -= 1;
                        self.buffer[0] ^= 0x01;
                        self.buffer[1] ^= 0x01;
                    }
                }
            }
            NandMode::Program if self.address.len() == full => {
                self.row = self.row_from(self.column_bytes);
            }
            NandMode::Erase if self.address.len() == self.row_bytes => {
                self.row = self.row_from(0);
            }
            NandMode::UnlockEnd(start) if self.address.len() == self.row_bytes => {
                let end = self.row_from(0);
                self.unlocked = Some((start / self.pages_per_block, end / self.pages_per_block));
                self.mode = NandMode::Idle;
            }
            _ => {}
        }
    }

    fn program(&mut self) {
        if self.mode != NandMode::Program {
            return;
        }
        let block = self.row / self.pages_per_block;
        self.failed = self.bad_program.contains(&block) || !self.writable(block);
        if !self.failed {
            let mut raw = self.raw(self.row);
            for (stored, new) in raw.iter_mut().zip(&self.buffer) {
                *stored &= *new;
            }
            self.pages.insert(self.row, raw);
        }
        self.mode = NandMode::Idle;
    }

    fn erase(&mut self) {
        if self.mode != NandMode::Erase {
            return;
        }
        let block = self.row / self.pages_per_block;
        self.failed = self.bad_erase.contains(&block) || !self.writable(block);
        if !self.failed {
            let first = self.row_of(block, 0);
            for row in first..first + self.pages_per_block {
                self.pages.remove(&row);
            }
            self.erased.push(block);
        }
        self.mode = NandMode::Idle;
    }

    fn read_data(&mut self) -> u8 {
        match self.mode {
            NandMode::ReadId(i) => {
                self.mode = NandMode::ReadId(i + 1);
                [self.manufacturer_id, self.device_id, 0x00, 0x15]
                    .get(i)
                    .copied()
                    .unwrap_or(0)
            }
            NandMode::Status => {
                let mut status = 0x40 | 0x80;
                if self.failed {
                    status |= 0x01;
                }
                status
            }
            NandMode::Read => {
                let byte = self.buffer.get(self.column).copied().unwrap_or(0xFF);
                self.column += 1;
                self.ecc_bytes.push(byte);
                byte
            }
            _ => 0xFF,
        }
    }

    fn write_data(&mut self, byte: u8) {
        if self.mode == NandMode::Program {
            if let Some(slot) = self.buffer.get_mut(self.column) {
                *slot = byte;
            }
            self.column += 1;
            self.ecc_bytes.push(byte);
        }
    }
}

impl SimNand {
    fn expect_width(&self, width: BusWidth) {
        assert_eq!(self.bus_width, width, "NAND accessed with the wrong bus width");
    }

    fn cycle(&mut self, offset: u32, byte: u8) {
        match offset {
            NAND_CLE => self.command(byte),
            NAND_ALE => self.address_byte(byte),
            NAND_DATA => self.write_data(byte),
            other => panic!("NAND access at unexpected offset {other:#x}"),
        }
    }
}

impl FlashBus for SimNand {
    fn read8(&mut self, addr: u32) -> u8 {
        self.expect_width(BusWidth::Bits8);
        match addr - CS2_BASE {
            NAND_DATA => self.read_data(),
            _ => 0xFF,
        }
    }

    fn read16(&mut self, addr: u32) -> u16 {
        self.expect_width(BusWidth::Bits16);
        if addr - CS2_BASE != NAND_DATA {
            return 0xFFFF;
        }
        match self.mode {
            // Id and status bytes arrive on the low lane.
            NandMode::Read => u16::from_le_bytes([self.read_data(), self.read_data()]),
            _ => u16::from(self.read_data()),
        }
    }

    fn write8(&mut self, addr: u32, value: u8) {
        self.expect_width(BusWidth::Bits8);
        self.cycle(addr - CS2_BASE, value);
    }

    fn write16(&mut self, addr: u32, value: u16) {
        self.expect_width(BusWidth::Bits16);
        let offset = addr - CS2_BASE;
        let [lo, hi] = value.to_le_bytes();
        self.cycle(offset, lo);
        if offset == NAND_DATA {
            self.cycle(offset, hi);
        }
    }
}

impl NandHardware for SimNand {
    fn configure(&mut self, chip_select_offset: u8, bus_width: BusWidth) {
        self.configured = Some((chip_select_offset, bus_width));
    }

    fn is_ready(&mut self) -> bool {
        !self.stuck_busy
    }

    fn ecc_read_and_restart(&mut self, _chip_select_offset: u8) -> u32 {
        let value = ecc::compute(&self.ecc_bytes);
        self.ecc_bytes.clear();
        value
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NorFamily {
    Amd,
    Intel,
}

/// How the simulated NOR chips hang off the bus.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NorWiring {
    /// One x16 chip on a 16-bit bus.
    X16,
    /// One x8 chip on an 8-bit bus.
    X8,
    /// One x8/x16 chip strapped for byte mode on an 8-bit bus. Its command
    /// decoder sees the word address, so register offsets are two bytes apart.
    ByteMode,
    /// Two x8 chips side by side on a 16-bit bus, one per byte lane.
    DualX8,
}

impl NorWiring {
    pub const ALL: [NorWiring; 4] = [
        NorWiring::X16,
        NorWiring::X8,
        NorWiring::ByteMode,
        NorWiring::DualX8,
    ];

    pub fn bus_width(self) -> BusWidth {
        match self {
            NorWiring::X16 | NorWiring::DualX8 => BusWidth::Bits16,
            NorWiring::X8 | NorWiring::ByteMode => BusWidth::Bits8,
        }
    }

    pub fn chips(self) -> usize {
        match self {
            NorWiring::DualX8 => 2,
            _ => 1,
        }
    }

    /// Bytes each chip drives per bus cycle.
    fn lane_bytes(self) -> usize {
        self.bus_width().bytes() as usize / self.chips()
    }

    fn lane_mask(self) -> u16 {
        match self.lane_bytes() {
            2 => 0xFFFF,
            _ => 0x00FF,
        }
    }

    fn register_shift(self) -> u32 {
        match self {
            NorWiring::ByteMode => 1,
            _ => 0,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum NorMode {
    Array,
    Cfi,
    Autoselect,
    /// Intel status register reads.
    Status,
    /// AMD write-buffer abort; only the unlock-reset sequence leaves it.
    Aborted(u16),
    /// AMD program that exceeded its time limit (DQ5); a reset leaves it.
    Failed(u16),
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum NorState {
    Idle,
    Unlock1,
    Unlock2,
    EraseSetup,
    EraseUnlock1,
    EraseUnlock2,
    Program,
    LockSetup(usize),
    BufferCount(usize),
    BufferData {
        block: usize,
        remaining: usize,
        cells: Vec<(usize, u16)>,
        outside: bool,
    },
    BufferConfirm {
        block: usize,
        cells: Vec<(usize, u16)>,
        outside: bool,
    },
}

const SR_READY: u16 = 0x80;
const SR_ERASE_ERROR: u16 = 0x20;
const SR_PROGRAM_ERROR: u16 = 0x10;
const SR_VPP_ERROR: u16 = 0x08;
const SR_LOCKED: u16 = 0x02;

/// Command state and storage of one chip. A cell is what the chip moves in
/// one bus cycle: a byte for x8 and byte-mode chips, a word for x16.
#[derive(Clone)]
struct NorChip {
    cells: Vec<u16>,
    mode: NorMode,
    state: NorState,
    sr: u16,
    locked: HashSet<usize>,
}

/// CFI NOR chips at CS2, wired as `wiring` says.
///
/// Every chip runs its own command state machine on the byte lane it is
/// wired to, so a command only takes effect on both chips of a
/// [`NorWiring::DualX8`] pair if it is replicated across the bus word.
/// Counters track lane 0.
pub struct SimNor {
    pub wiring: NorWiring,
    pub family: NorFamily,
    pub manufacturer_id: u8,
    pub command_set: u16,
    /// Bytes per chip the CFI table reports.
    pub reported_size: u32,
    /// Block runs per chip as (count, bytes), as the CFI table reports them.
    pub regions: Vec<(u32, u32)>,
    /// Write buffer bytes per chip.
    pub buffer_bytes: u32,

    chips: Vec<NorChip>,
    /// (first cell, cells) of every erase block.
    blocks: Vec<(usize, usize)>,

    pub cfi_disabled: bool,
    pub abort_next_buffer: bool,
    /// Clearing a lock bit reports a VPP error (SR.5 and SR.3).
    pub unlock_fault: bool,
    pub bad_erase: HashSet<usize>,
    pub buffer_programs: usize,
    pub word_programs: usize,
    pub aborted_buffers: usize,
}

impl SimNor {
    /// `regions` and `physical_size` describe the array as the bus sees it.
    fn new(family: NorFamily, command_set: u16, regions: &[(u32, u32)], physical_size: u32, wiring: NorWiring) -> Self {
        let chips = wiring.chips();
        let lane_bytes = wiring.lane_bytes();
        let regions: Vec<(u32, u32)> = regions
            .iter()
            .map(|(count, size)| (*count, size / chips as u32))
            .collect();
        let reported_size = regions.iter().map(|(count, size)| count * size).sum();

        let mut blocks = Vec::new();
        let mut start = 0usize;
        for (count, size) in &regions {
            for _ in 0..*count {
                let cells = *size as usize / lane_bytes;
                blocks.push((start, cells));
                start += cells;
            }
        }

        let chip = NorChip {
            cells: vec![wiring.lane_mask(); physical_size as usize / chips / lane_bytes],
            mode: NorMode::Array,
            state: NorState::Idle,
            sr: SR_READY,
            locked: HashSet::new(),
        };

        Self {
            wiring,
            family,
            manufacturer_id: match family {
                NorFamily::Amd => 0x01,
                NorFamily::Intel => 0x89,
            },
            command_set,
            reported_size,
            regions,
            buffer_bytes: 32,
            chips: vec![chip; chips],
            blocks,
            cfi_disabled: false,
            abort_next_buffer: false,
            unlock_fault: false,
            bad_erase: HashSet::new(),
            buffer_programs: 0,
            word_programs: 0,
            aborted_buffers: 0,
        }
    }

    /// 4 MB bottom boot part: eight 8 KB blocks then 63 of 64 KB.
    pub fn amd() -> Self {
        Self::amd_on(NorWiring::X16)
    }

    pub fn amd_on(wiring: NorWiring) -> Self {
        Self::new(
            NorFamily::Amd,
            0x0002,
            &[(8, 0x2000), (63, 0x1_0000)],
            0x40_0000,
            wiring,
        )
    }

    /// 4 MB uniform part: 32 blocks of 128 KB.
    pub fn intel() -> Self {
        Self::intel_on(NorWiring::X16)
    }

    pub fn intel_on(wiring: NorWiring) -> Self {
        Self::new(NorFamily::Intel, 0x0001, &[(32, 0x2_0000)], 0x40_0000, wiring)
    }

    /// A 2 MB Intel array whose top address line is not wired, so it
    /// reports 4 MB and appears twice.
    pub fn intel_mirrored() -> Self {
        Self::new(
            NorFamily::Intel,
            0x0001,
            &[(32, 0x2_0000)],
            0x20_0000,
            NorWiring::X16,
        )
    }

    /// Cell every chip sees for bus address `addr`.
    fn cell(&self, addr: u32) -> usize {
        let offset = addr.wrapping_sub(CS2_BASE) as usize / self.wiring.bus_width().bytes() as usize;
        offset % self.chips[0].cells.len()
    }

    /// Address the command decoder sees for `cell`.
    fn register(&self, cell: usize) -> usize {
        cell >> self.wiring.register_shift()
    }

    fn block_of(&self, cell: usize) -> usize {
        self.blocks
            .iter()
            .position(|(start, len)| (*start..start + len).contains(&cell))
            .expect("cell outside every block")
    }

    /// Stored bus word (or byte) at `cell`, ignoring command modes.
    fn stored(&self, cell: usize) -> u16 {
        self.chips
            .iter()
            .enumerate()
            .fold(0, |word, (lane, chip)| word | (chip.cells[cell] << (8 * lane)))
    }

    /// Bytes as stored, starting at absolute address `addr`.
    pub fn bytes(&self, addr: u32, len: usize) -> Vec<u8> {
        (0..len)
            .map(|i| {
                let at = addr + i as u32;
                let word = self.stored(self.cell(at));
                if self.wiring.bus_width() == BusWidth::Bits16 && at & 1 == 1 {
                    (word >> 8) as u8
                } else {
                    word as u8
                }
            })
            .collect()
    }

    pub fn is_locked(&self, addr: u32) -> bool {
        self.chips[0].locked.contains(&self.block_of(self.cell(addr)))
    }

    fn cfi_byte(&self, register: usize) -> u8 {
        let log2 = |value: u32| value.trailing_zeros() as u8;
        match register {
            0x10 => b'Q',
            0x11 => b'R',
            0x12 => b'Y',
            0x13 => self.command_set as u8,
            0x14 => (self.command_set >> 8) as u8,
            0x27 => log2(self.reported_size),
            0x2A => log2(self.buffer_bytes),
            0x2C => self.regions.len() as u8,
            0x2D..=0x3C => {
                let index = (register - 0x2D) / 4;
                let Some((count, size)) = self.regions.get(index) else {
                    return 0;
                };
                let record = (count - 1) | ((size / 256) << 16);
                (record >> (8 * ((register - 0x2D) % 4))) as u8
            }
            _ => 0,
        }
    }

    fn autoselect(&self, register: usize) -> u16 {
        match (self.family, register) {
            (_, 0x00) => u16::from(self.manufacturer_id),
            (NorFamily::Amd, 0x01) => 0x227E,
            (NorFamily::Amd, 0x0E) => 0x2221,
            (NorFamily::Amd, 0x0F) => 0x2201,
            (NorFamily::Intel, 0x01) => 0x0018,
            _ => 0,
        }
    }

    /// What chip `lane` drives onto its lane when `cell` is read.
    fn chip_read(&self, lane: usize, cell: usize) -> u16 {
        let chip = &self.chips[lane];
        let value = match chip.mode {
            NorMode::Array => chip.cells[cell],
            NorMode::Cfi => u16::from(self.cfi_byte(self.register(cell))),
            NorMode::Autoselect => self.autoselect(self.register(cell)),
            NorMode::Status => chip.sr,
            NorMode::Aborted(status) | NorMode::Failed(status) => status,
        };
        value & self.wiring.lane_mask()
    }

    fn erase_block(&mut self, lane: usize, block: usize) -> bool {
        let erased = self.wiring.lane_mask();
        let fill = if self.bad_erase.contains(&block) {
            0xA5A5 & erased
        } else {
            erased
        };
        let (start, len) = self.blocks[block];
        let cells = &mut self.chips[lane].cells;
        let (start, len) = (start % cells.len(), len.min(cells.len()));
        cells[start..start + len].fill(fill);
        fill == erased
    }

    /// Program one cell. Returns false if some bit would have to go from 0 to 1.
    fn program(&mut self, lane: usize, cell: usize, value: u16) -> bool {
        let stored = &mut self.chips[lane].cells[cell];
        *stored &= value;
        *stored == value
    }

    fn set_mode(&mut self, lane: usize, mode: NorMode) {
        self.chips[lane].mode = mode;
    }

    fn set_state(&mut self, lane: usize, state: NorState) {
        self.chips[lane].state = state;
    }

    fn take_state(&mut self, lane: usize) -> NorState {
        std::mem::replace(&mut self.chips[lane].state, NorState::Idle)
    }

    /// Collect one write-buffer cell; returns the state that follows it.
    fn buffer_cell(&self, block: usize, remaining: usize, mut cells: Vec<(usize, u16)>, outside: bool, cell: usize, value: u16) -> NorState {
        let outside = outside || self.block_of(cell) != block;
        cells.push((cell, value));
        if remaining == 1 {
            NorState::BufferConfirm { block, cells, outside }
        } else {
            NorState::BufferData {
                block,
                remaining: remaining - 1,
                cells,
                outside,
            }
        }
    }

    /// Consume the abort request once the last lane has seen the confirm.
    fn take_abort(&mut self, lane: usize) -> bool {
        let abort = self.abort_next_buffer;
        if lane + 1 == self.chips.len() {
            self.abort_next_buffer = false;
        }
        abort
    }

    fn amd_write(&mut self, lane: usize, cell: usize, value: u16) {
        let cmd = value as u8;
        let register = self.register(cell);

        if let NorMode::Aborted(_) = self.chips[lane].mode {
            let next = match (self.take_state(lane), register, cmd) {
                (NorState::Idle, 0x555, 0xAA) => NorState::Unlock1,
                (NorState::Unlock1, 0x2AA, 0x55) => NorState::Unlock2,
                (NorState::Unlock2, _, 0xF0) => {
                    self.set_mode(lane, NorMode::Array);
                    NorState::Idle
                }
                _ => NorState::Idle,
            };
            self.set_state(lane, next);
            return;
        }

        match self.take_state(lane) {
            NorState::Program => {
                if lane == 0 {
                    self.word_programs += 1;
                }
                if !self.program(lane, cell, value) {
                    self.set_mode(lane, NorMode::Failed((!value & 0x8080) | 0x0020));
                }
                return;
            }
            NorState::BufferCount(block) => {
                self.set_state(
                    lane,
                    NorState::BufferData {
                        block,
                        remaining: usize::from(value) + 1,
                        cells: Vec::new(),
                        outside: false,
                    },
                );
                return;
            }
            NorState::BufferData {
                block,
                remaining,
                cells,
                outside,
            } => {
                let next = self.buffer_cell(block, remaining, cells, outside, cell, value);
                self.set_state(lane, next);
                return;
            }
            NorState::BufferConfirm { cells, outside, .. } if cmd == 0x29 => {
                let last = cells.last().map_or(0xFFFF, |(_, value)| *value);
                if self.take_abort(lane) || outside {
                    if lane == 0 {
                        self.aborted_buffers += 1;
                    }
                    self.set_mode(lane, NorMode::Aborted((!last & 0x8080) | 0x0002));
                    return;
                }
                if lane == 0 {
                    self.buffer_programs += 1;
                }
                let ok = cells
                    .iter()
                    .all(|(cell, value)| self.program(lane, *cell, *value));
                if !ok {
                    self.set_mode(lane, NorMode::Failed((!last & 0x8080) | 0x0020));
                }
                return;
            }
            previous => self.set_state(lane, previous),
        }

        if cmd == 0xF0 {
            self.set_mode(lane, NorMode::Array);
            self.set_state(lane, NorState::Idle);
            return;
        }
        if cmd == 0x98 && register == 0x55 && !self.cfi_disabled {
            self.set_mode(lane, NorMode::Cfi);
            self.set_state(lane, NorState::Idle);
            return;
        }

        let next = match (self.take_state(lane), register, cmd) {
            (NorState::Idle, 0x555, 0xAA) => NorState::Unlock1,
            (NorState::Unlock1, 0x2AA, 0x55) => NorState::Unlock2,
            (NorState::Unlock2, 0x555, 0x90) => {
                self.set_mode(lane, NorMode::Autoselect);
                NorState::Idle
            }
            (NorState::Unlock2, 0x555, 0xA0) => NorState::Program,
            (NorState::Unlock2, 0x555, 0x80) => NorState::EraseSetup,
            (NorState::EraseSetup, 0x555, 0xAA) => NorState::EraseUnlock1,
            (NorState::EraseUnlock1, 0x2AA, 0x55) => NorState::EraseUnlock2,
            (NorState::EraseUnlock2, _, 0x30) => {
                let block = self.block_of(cell);
                self.erase_block(lane, block);
                NorState::Idle
            }
            (NorState::Unlock2, _, 0x25) => NorState::BufferCount(self.block_of(cell)),
            _ => NorState::Idle,
        };
        self.set_state(lane, next);
    }

    fn set_status(&mut self, lane: usize, sr: u16) {
        self.chips[lane].sr = sr;
    }

    fn intel_write(&mut self, lane: usize, cell: usize, value: u16) {
        let cmd = value as u8;

        match self.take_state(lane) {
            NorState::Program => {
                if lane == 0 {
                    self.word_programs += 1;
                }
                self.set_mode(lane, NorMode::Status);
                if self.chips[lane].locked.contains(&self.block_of(cell)) {
                    self.set_status(lane, SR_READY | SR_PROGRAM_ERROR | SR_LOCKED);
                } else if !self.program(lane, cell, value) {
                    self.set_status(lane, SR_READY | SR_PROGRAM_ERROR);
                }
                return;
            }
            NorState::EraseSetup => {
                self.set_mode(lane, NorMode::Status);
                let block = self.block_of(cell);
                if cmd != 0xD0 {
                    self.set_status(lane, SR_READY | SR_ERASE_ERROR | SR_PROGRAM_ERROR);
                } else if self.chips[lane].locked.contains(&block) {
                    self.set_status(lane, SR_READY | SR_ERASE_ERROR | SR_LOCKED);
                } else if !self.erase_block(lane, block) {
                    self.set_status(lane, SR_READY | SR_ERASE_ERROR);
                }
                return;
            }
            NorState::LockSetup(block) => {
                self.set_mode(lane, NorMode::Status);
                match cmd {
                    0x01 => {
                        self.chips[lane].locked.insert(block);
                    }
                    0xD0 if self.unlock_fault => {
                        self.set_status(lane, SR_READY | SR_ERASE_ERROR | SR_VPP_ERROR);
                    }
                    0xD0 => {
                        self.chips[lane].locked.remove(&block);
                    }
                    _ => self.set_status(lane, SR_READY | SR_ERASE_ERROR | SR_PROGRAM_ERROR),
                }
                return;
            }
            NorState::BufferCount(block) => {
                self.set_state(
                    lane,
                    NorState::BufferData {
                        block,
                        remaining: usize::from(value) + 1,
                        cells: Vec::new(),
                        outside: false,
                    },
                );
                return;
            }
            NorState::BufferData {
                block,
                remaining,
                cells,
                outside,
            } => {
                let next = self.buffer_cell(block, remaining, cells, outside, cell, value);
                self.set_state(lane, next);
                return;
            }
            NorState::BufferConfirm { block, cells, outside } => {
                self.set_mode(lane, NorMode::Status);
                if cmd != 0xD0 || outside {
                    self.set_status(lane, SR_READY | SR_ERASE_ERROR | SR_PROGRAM_ERROR);
                } else if self.chips[lane].locked.contains(&block) {
                    self.set_status(lane, SR_READY | SR_PROGRAM_ERROR | SR_LOCKED);
                } else {
                    if lane == 0 {
                        self.buffer_programs += 1;
                    }
                    let ok = cells
                        .iter()
                        .all(|(cell, value)| self.program(lane, *cell, *value));
                    if !ok {
                        self.set_status(lane, SR_READY | SR_PROGRAM_ERROR);
                    }
                }
                return;
            }
            _ => {}
        }

        match cmd {
            0xFF | 0xF0 => self.set_mode(lane, NorMode::Array),
            0x90 => self.set_mode(lane, NorMode::Autoselect),
            0x98 if self.register(cell) == 0x55 && !self.cfi_disabled => self.set_mode(lane, NorMode::Cfi),
            0x70 => self.set_mode(lane, NorMode::Status),
            0x50 => self.set_status(lane, SR_READY),
            0x20 => {
                self.set_mode(lane, NorMode::Status);
                self.set_state(lane, NorState::EraseSetup);
            }
            0x40 | 0x10 => self.set_state(lane, NorState::Program),
            0xE8 => {
                self.set_mode(lane, NorMode::Status);
                let block = self.block_of(cell);
                self.set_state(lane, NorState::BufferCount(block));
            }
            0x60 => {
                let block = self.block_of(cell);
                self.set_state(lane, NorState::LockSetup(block));
            }
            _ => {}
        }
    }

    fn chip_write(&mut self, lane: usize, cell: usize, value: u16) {
        match self.family {
            NorFamily::Amd => self.amd_write(lane, cell, value),
            NorFamily::Intel => self.intel_write(lane, cell, value),
        }
    }

    fn expect_width(&self, width: BusWidth) {
        assert_eq!(self.wiring.bus_width(), width, "NOR accessed with the wrong bus width");
    }
}

impl FlashBus for SimNor {
    fn read8(&mut self, addr: u32) -> u8 {
        match self.wiring.bus_width() {
            BusWidth::Bits8 => self.chip_read(0, self.cell(addr)) as u8,
            BusWidth::Bits16 => {
                let word = self.read16(addr & !1);
                if addr & 1 == 0 {
                    word as u8
                } else {
                    (word >> 8) as u8
                }
            }
        }
    }

    fn read16(&mut self, addr: u32) -> u16 {
        self.expect_width(BusWidth::Bits16);
        let cell = self.cell(addr);
        (0..self.chips.len()).fold(0, |word, lane| word | (self.chip_read(lane, cell) << (8 * lane)))
    }

    fn write8(&mut self, addr: u32, value: u8) {
        self.expect_width(BusWidth::Bits8);
        let cell = self.cell(addr);
        self.chip_write(0, cell, u16::from(value));
    }

    fn write16(&mut self, addr: u32, value: u16) {
        self.expect_width(BusWidth::Bits16);
        let cell = self.cell(addr);
        match self.wiring.chips() {
            1 => self.chip_write(0, cell, value),
            chips => {
                for lane in 0..chips {
                    self.chip_write(lane, cell, (value >> (8 * lane)) & 0xFF);
                }
            }
        }
    }
}
