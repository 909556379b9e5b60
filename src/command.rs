/// Instruction set of the IS25LPxx family.
///
/// Per the datasheet the parts accept SPI mode 0 or mode 3; the opcodes
/// below are common to both supported capacities.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Command {
    /// Set the write enable latch, required before any mutating command
    WriteEnable = 0x06,
    /// Read manufacturer, memory type and capacity bytes
    ReadIdentification = 0x9F,
    /// Read manufacturer and device id; the address byte selects ordering
    ReadManufacturerDeviceId = 0x90,
    /// Read the status register
    ReadStatus = 0x05,
    /// Write the status register
    WriteStatus = 0x01,
    /// Sequential read
    Read = 0x03,
    /// Program 1-256 bytes within one page
    PageProgram = 0x02,
    /// Erase one 4K sector
    SectorErase = 0x20,
    /// Erase one 32K block
    BlockErase32 = 0x52,
    /// Erase one 64K block
    BlockErase64 = 0xD8,
    /// Erase the whole array
    ChipErase = 0xC7,
    /// Enter deep power-down
    DeepPowerDown = 0xB9,
    /// Release deep power-down
    ReleasePowerDown = 0xAB,
    /// Filler clocked out while a response is read back
    Dummy = 0xA5,
}
