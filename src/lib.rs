//! NAND and NOR flash drivers for the DaVinci (DM644x) second-stage boot loader.
//!
//! The crate discovers the flash device wired to the asynchronous EMIF, runs
//! the vendor programming algorithms, and places a boot image (header plus
//! payload) into a reserved range of flash blocks, skipping blocks that fail
//! to erase, program or verify.
//!
//! Everything is synchronous and allocation free. Hardware is reached through
//! the [`bus::FlashBus`] and [`nand::NandHardware`] traits; [`dm644x`]
//! provides the memory-mapped implementations used on target.
#![cfg_attr(not(test), no_std)]

#[macro_use]
mod fmt;

pub mod bus;
pub mod config;
pub mod dm644x;
pub mod error;
pub mod image;
pub mod nand;
pub mod nor;
pub mod placement;
pub mod traits;

pub use error::Error;
