use bit::BitIndex;

/// JEDEC manufacturer byte, `0x9D` for ISSI parts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ManufacturerId(pub u8);

/// Memory type byte, `0x60` for the IS25LP family
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct MemoryType(pub u8);

/// Capacity byte, selects the device geometry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Capacity(pub u8);

/// Device id byte returned by the read manufacturer/device id command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DeviceId(pub u8);

/// The 8-bit status register
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusRegister {
    /// Bit 7: writes to the status register are protected
    pub status_write_protect: bool,
    /// Bit 6: quad (QSPI) output enabled
    pub quad_enable: bool,
    /// Bits 2-5: block protection level, 0 = whole array writable
    pub block_protect: u8,
    /// Bit 1: write enable latch
    pub write_enable_latch: bool,
    /// Bit 0: an erase or program cycle is still running
    pub write_in_progress: bool,
}

impl From<u8> for StatusRegister {
    fn from(val: u8) -> StatusRegister {
        StatusRegister {
            status_write_protect: val.bit(7),
            quad_enable: val.bit(6),
            block_protect: val.bit_range(2..6),
            write_enable_latch: val.bit(1),
            write_in_progress: val.bit(0),
        }
    }
}
