//! Common Flash Interface discovery.

use crate::bus::{BusWidth, FlashBus};
use crate::error::Error;

use super::geometry::{CommandSet, EraseRegion, NorGeometry};
use super::port::NorPort;

const QUERY_CMD: u8 = 0x98;
const EXIT_CMD: u8 = 0xF0;
const QUERY_ADDR: u32 = 0x55;

const Q: u32 = 0x10;
const R: u32 = 0x11;
const Y: u32 = 0x12;
const COMMAND_SET: u32 = 0x13;
const DEVICE_SIZE: u32 = 0x27;
const WRITE_BUFFER_SIZE: u32 = 0x2A;
const REGION_COUNT: u32 = 0x2C;
const REGIONS: u32 = 0x2D;
const REGION_RECORD_SIZE: u32 = 4;

/// Search `base` for a CFI table under every supported wiring.
///
/// Chip widths are tried from x8 up to the bus width, and for each the
/// register stride from the bus width up to twice the bus width. The first
/// wiring that answers "QRY" wins; the array is left in read mode either way.
pub fn query<B: FlashBus + ?Sized>(bus: &mut B, base: u32, bus_width: BusWidth) -> Result<(NorGeometry, NorPort), Error> {
    for chip_width in [BusWidth::Bits8, BusWidth::Bits16] {
        if chip_width.bytes() > bus_width.bytes() {
            break;
        }
        let mut combined_width = bus_width.bytes();
        while combined_width <= 2 * bus_width.bytes() {
            let port = NorPort {
                base,
                bus_width,
                chip_width,
                combined_width,
            };
            port.command(bus, base, 0, EXIT_CMD);
            port.command(bus, base, QUERY_ADDR, QUERY_CMD);

            if port.matches(bus, base, Q, b'Q')
                && port.matches(bus, base, R, b'R')
                && port.matches(bus, base, Y, b'Y')
            {
                let geometry = read_table(bus, &port);
                port.command(bus, base, 0, EXIT_CMD);
                let geometry = geometry?;
                trace!(
                    "CFI answered at {:#x}: chip width {}, stride {}",
                    base,
                    chip_width.bytes(),
                    combined_width
                );
                return Ok((geometry, port));
            }
            combined_width <<= 1;
        }
    }

    let port = NorPort {
        base,
        bus_width,
        chip_width: bus_width,
        combined_width: bus_width.bytes(),
    };
    port.command(bus, base, 0, EXIT_CMD);
    Err(Error::CfiNotFound)
}

/// `2^exponent * devices`, rejecting sizes that do not fit the address space.
fn scaled_power_of_two(exponent: u32, devices: u32) -> Result<u32, Error> {
    1u32.checked_shl(exponent)
        .and_then(|bytes| bytes.checked_mul(devices))
        .ok_or(Error::CfiNotFound)
}

fn read_table<B: FlashBus + ?Sized>(bus: &mut B, port: &NorPort) -> Result<NorGeometry, Error> {
    let base = port.base;
    let devices = port.bus_width.bytes() / port.chip_width.bytes();

    let command_set = CommandSet::from(port.cfi_bytes(bus, base, COMMAND_SET, 2) as u16);
    let size = scaled_power_of_two(port.cfi_bytes(bus, base, DEVICE_SIZE, 1), devices)?;
    let buffer_size = scaled_power_of_two(port.cfi_bytes(bus, base, WRITE_BUFFER_SIZE, 2), devices)?;
    let region_count = port.cfi_bytes(bus, base, REGION_COUNT, 1);

    let mut geometry = NorGeometry::new(
        base,
        port.bus_width,
        port.chip_width,
        port.combined_width,
        devices,
        size,
        buffer_size,
        command_set,
    );

    for i in 0..region_count {
        let record = port.cfi_bytes(bus, base, REGIONS + i * REGION_RECORD_SIZE, 4);
        let size_field = record >> 16;
        let block_size = if size_field == 0 { 128 } else { size_field * 256 };
        let region = EraseRegion {
            block_count: (record & 0xFFFF) + 1,
            block_size: block_size * devices,
        };
        if !geometry.push_region(region) {
            warn!("CFI reports {} erase regions, keeping the first {}", region_count, i);
            break;
        }
    }
    geometry
        .regions_end()
        .inspect_err(|_| warn!("CFI erase regions overflow the address space"))?;
    Ok(geometry)
}
