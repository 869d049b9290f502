//! Boot image placement.
//!
//! A NAND image is a header page followed by its payload pages, written into
//! the first block of a reserved range that accepts the whole span: blocks
//! that fail to unlock, erase, program or verify are skipped. A NOR image is
//! a header followed directly by its payload, placed in the erase block after
//! the one holding the end of the UBL.

use crate::bus::FlashBus;
use crate::config::{BlockRange, UBL_IMAGE_SIZE};
use crate::error::Error;
use crate::image::{NandBootHeader, NorBootHeader};
use crate::nand::device::MAX_PAGE_DATA;
use crate::nor::NorFlash;
use crate::traits::PageFlashDevice;

/// Page the header occupies in the first block of an image.
const HEADER_PAGE: u32 = 0;
/// Page the payload starts at in the first block of an image.
const FIRST_DATA_PAGE: u32 = 1;

/// Pages needed to store `bytes` of payload.
pub fn pages_for(bytes: usize, page_size: usize) -> u32 {
    bytes.div_ceil(page_size) as u32
}

/// Payload bytes `header` describes, rejecting counts past the address space.
fn image_bytes(header: &NandBootHeader, page_size: usize) -> Result<usize, Error> {
    let page_size = u32::try_from(page_size).map_err(|_| Error::InvalidImage)?;
    let bytes = header
        .page_count
        .checked_mul(page_size)
        .ok_or(Error::InvalidImage)?;
    usize::try_from(bytes).map_err(|_| Error::InvalidImage)
}

/// Location of a payload page, counted from the header page of `block`.
fn page_location(block: u32, index: u32, pages_per_block: u32) -> (u32, u32) {
    (block + index / pages_per_block, index % pages_per_block)
}

fn write_and_verify<F: PageFlashDevice + ?Sized>(dev: &mut F, block: u32, page: u32, data: &[u8]) -> Result<(), Error> {
    dev.write_page(block, page, data)?;
    dev.verify_page(block, page, data)
}

fn try_block<F: PageFlashDevice + ?Sized>(
    dev: &mut F,
    block: u32,
    blocks_needed: u32,
    header: &NandBootHeader,
    payload: &[u8],
) -> Result<NandBootHeader, Error> {
    let page_size = dev.page_size();
    let pages_per_block = dev.pages_per_block();

    dev.unprotect_blocks(block, blocks_needed)?;
    dev.erase_blocks(block, blocks_needed)?;

    let written = NandBootHeader {
        block,
        page: FIRST_DATA_PAGE,
        ..*header
    };
    let mut scratch = [0xFFu8; MAX_PAGE_DATA];
    let page_buf = &mut scratch[..page_size];
    page_buf[..NandBootHeader::SIZE].copy_from_slice(&written.to_bytes());
    write_and_verify(dev, block, HEADER_PAGE, page_buf)?;

    for index in 0..header.page_count {
        let start = index as usize * page_size;
        let chunk = payload.get(start..).unwrap_or(&[]);
        let chunk = &chunk[..chunk.len().min(page_size)];
        page_buf.fill(0xFF);
        page_buf[..chunk.len()].copy_from_slice(chunk);

        let (data_block, page) = page_location(block, FIRST_DATA_PAGE + index, pages_per_block);
        write_and_verify(dev, data_block, page, page_buf)?;
    }
    Ok(written)
}

/// Write `header` and `payload` into the first usable span of `range`.
///
/// The header's `block` and `page` fields are filled in with the location
/// actually used, and the written header is returned. The device is locked
/// again once the image is in place.
pub fn write_header_and_data<F: PageFlashDevice + ?Sized>(
    dev: &mut F,
    range: BlockRange,
    header: &NandBootHeader,
    payload: &[u8],
) -> Result<NandBootHeader, Error> {
    let page_size = dev.page_size();
    if page_size > MAX_PAGE_DATA {
        return Err(Error::BufferTooSmall);
    }
    if payload.len() > image_bytes(header, page_size)? {
        return Err(Error::InvalidImage);
    }

    let blocks_needed = header
        .page_count
        .checked_add(FIRST_DATA_PAGE)
        .ok_or(Error::InvalidImage)?
        .div_ceil(dev.pages_per_block());
    info!(
        "placing {} page image ({} blocks) in blocks {} through {}",
        header.page_count,
        blocks_needed,
        range.start,
        range.end
    );

    for block in range.start..=range.end {
        debug!("attempting to start in block {}", block);
        match try_block(dev, block, blocks_needed, header, payload) {
            Ok(written) => {
                dev.protect_blocks()?;
                info!("image written starting at block {}", block);
                return Ok(written);
            }
            Err(e) => warn!("block {} unusable: {:?}", block, e),
        }
    }

    error!("no usable block in {} through {}", range.start, range.end);
    Err(Error::NoSpaceAvailable)
}

/// Write a UBL or application image into the reserved range that starts at
/// `header.block`.
pub fn write_boot_image<F: PageFlashDevice + ?Sized>(
    dev: &mut F,
    header: &NandBootHeader,
    payload: &[u8],
) -> Result<NandBootHeader, Error> {
    let range = BlockRange::for_start_block(header.block).ok_or(Error::OutOfRange)?;
    write_header_and_data(dev, range, header, payload)
}

fn find_header<F: PageFlashDevice + ?Sized>(dev: &mut F, range: BlockRange, page_buf: &mut [u8]) -> Option<NandBootHeader> {
    for block in range.start..=range.end {
        if dev.read_page(block, HEADER_PAGE, page_buf).is_err() {
            continue;
        }
        match NandBootHeader::from_bytes(page_buf) {
            Some(header) if header.is_valid() => {
                debug!("boot header found in block {}", block);
                return Some(header);
            }
            _ => {}
        }
    }
    None
}

/// Find the image header in `range` and read its payload into `dst`.
///
/// Each page is tried twice; a page that still fails is looked for at the
/// same page index of the following block.
pub fn read_image<F: PageFlashDevice + ?Sized>(
    dev: &mut F,
    range: BlockRange,
    dst: &mut [u8],
) -> Result<NandBootHeader, Error> {
    let page_size = dev.page_size();
    let pages_per_block = dev.pages_per_block();
    if page_size > MAX_PAGE_DATA {
        return Err(Error::BufferTooSmall);
    }

    let mut scratch = [0u8; MAX_PAGE_DATA];
    let header =
        find_header(dev, range, &mut scratch[..page_size]).ok_or(Error::ImageNotFound)?;
    if !range.contains(header.block) || header.page >= pages_per_block {
        warn!("boot header points at block {} page {}", header.block, header.page);
        return Err(Error::InvalidImage);
    }
    let total = image_bytes(&header, page_size)?;
    let dst = dst.get_mut(..total).ok_or(Error::BufferTooSmall)?;

    let mut block = header.block;
    let mut page = header.page;
    for chunk in dst.chunks_exact_mut(page_size) {
        if page >= pages_per_block {
            page = 0;
            block += 1;
        }
        loop {
            let result = dev
                .read_page(block, page, chunk)
                .or_else(|_| dev.read_page(block, page, chunk));
            match result {
                Ok(()) => break,
                Err(e) if block >= range.end => {
                    error!("page {} unreadable up to block {}", page, block);
                    return Err(e);
                }
                Err(e) => {
                    warn!("block {} page {} unreadable ({:?}), trying next block", block, page, e);
                    block += 1;
                }
            }
        }
        page += 1;
    }
    Ok(header)
}

/// A boot image found in NOR flash.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct NorImage {
    pub header: NorBootHeader,
    /// Address of the first payload byte.
    pub payload_address: u32,
}

/// Address of the NOR image header: the block after the one holding the
/// last UBL byte.
pub fn nor_header_address<B: FlashBus>(nor: &NorFlash<B>) -> Result<u32, Error> {
    let ubl_end = nor.geometry().flash_base + UBL_IMAGE_SIZE;
    let block = nor.discover_block_info(ubl_end)?;
    Ok(block.address + block.size)
}

/// Erase the image area and write `header` followed by `payload`.
pub fn write_nor_image<B: FlashBus>(
    nor: &mut NorFlash<B>,
    header: &NorBootHeader,
    payload: &[u8],
) -> Result<NorImage, Error> {
    if !header.is_valid() || header.app_size as usize != payload.len() {
        return Err(Error::InvalidImage);
    }
    let header_address = nor_header_address(nor)?;
    let payload_address = header_address + NorBootHeader::SIZE as u32;
    let span = u32::try_from(NorBootHeader::SIZE + payload.len()).map_err(|_| Error::OutOfRange)?;
    info!("writing {} byte NOR image at {:#x}", payload.len(), header_address);

    nor.erase(header_address, span)?;
    nor.write_bytes(header_address, &header.to_bytes())?;
    nor.write_bytes(payload_address, payload)?;

    Ok(NorImage {
        header: *header,
        payload_address,
    })
}

/// Read and validate the NOR image header.
pub fn locate_nor_image<B: FlashBus>(nor: &mut NorFlash<B>) -> Result<NorImage, Error> {
    let header_address = nor_header_address(nor)?;
    let mut raw = [0u8; NorBootHeader::SIZE];
    nor.read(header_address, &mut raw)?;

    let header = NorBootHeader::from_bytes(&raw)
        .filter(NorBootHeader::is_valid)
        .ok_or(Error::ImageNotFound)?;
    let payload_address = header_address + NorBootHeader::SIZE as u32;
    match payload_address.checked_add(header.app_size) {
        Some(end) if end <= nor.geometry().end() => Ok(NorImage {
            header,
            payload_address,
        }),
        _ => Err(Error::InvalidImage),
    }
}
