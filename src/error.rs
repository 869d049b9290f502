use core::fmt;

/// The error type used by this library.
///
/// Every flash operation reports pass/fail through this type. Only the image
/// placement code and the NOR byte-range writer recover from errors locally;
/// everything else is handed back to the caller.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Error {
    /// A bounded ready/status poll ran out of iterations.
    Timeout,
    /// A NAND sub-page had more bit errors than the ECC can correct.
    EccFailure,
    /// The device reported a program error in its status register.
    ProgramFailure,
    /// The device reported an erase error, or an erased block did not read back as all ones.
    EraseFailure,
    /// Data read back after programming did not match what was written.
    VerifyFailure,
    /// A NOR byte-range write failed even after falling back to word writes.
    WriteFailure,
    /// An Intel block lock or unlock command was rejected.
    LockFailure,
    /// The NAND device id is not in the device table.
    UnknownDevice(u8),
    /// No bus/chip width combination answered the CFI query.
    CfiNotFound,
    /// The NOR command set is neither AMD nor Intel.
    UnsupportedDevice,
    /// The NOR manufacturer id was not recognised.
    IdentifyFailed,
    /// A block, page or address lies outside the device.
    OutOfRange,
    /// No block in the reserved range could hold the image.
    NoSpaceAvailable,
    /// A caller supplied buffer is shorter than the operation needs.
    BufferTooSmall,
    /// No valid boot image header was found.
    ImageNotFound,
    /// The boot image header and payload disagree, or the image does not fit the device.
    InvalidImage,
}

impl Error {
    fn describe(&self) -> &'static str {
        match self {
            Error::Timeout => "timed out waiting for the device",
            Error::EccFailure => "uncorrectable ECC error",
            Error::ProgramFailure => "program operation failed",
            Error::EraseFailure => "erase operation failed",
            Error::VerifyFailure => "read-back verification failed",
            Error::WriteFailure => "write failed after word-write fallback",
            Error::LockFailure => "block lock command failed",
            Error::UnknownDevice(_) => "unknown NAND device",
            Error::CfiNotFound => "CFI query not answered",
            Error::UnsupportedDevice => "unsupported NOR command set",
            Error::IdentifyFailed => "unrecognised NOR manufacturer",
            Error::OutOfRange => "address out of range",
            Error::NoSpaceAvailable => "no usable block in reserved range",
            Error::BufferTooSmall => "buffer too small",
            Error::ImageNotFound => "no boot image found",
            Error::InvalidImage => "invalid boot image",
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::UnknownDevice(id) => write!(f, "{} (id {:#04x})", self.describe(), id),
            _ => f.write_str(self.describe()),
        }
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for Error {
    fn format(&self, fmt: defmt::Formatter) {
        match self {
            Error::UnknownDevice(id) => defmt::write!(fmt, "Error::UnknownDevice({=u8:#x})", *id),
            other => defmt::write!(fmt, "Error::{=str}", other.describe()),
        }
    }
}

impl core::error::Error for Error {}
