/// All possible errors emitted by the driver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error<SpiError> {
    /// Internal SPI error
    Spi(SpiError),

    /// Identification did not match a supported part; no geometry assumed
    UnknownDevice,

    /// Geometry-dependent operation before a successful identification
    NotIdentified,

    /// The identified geometry does not match what this driver was built for
    UnsupportedGeometry,

    /// Address or length outside the addressable range
    OutOfBounds,

    /// Range not aligned to the required page or sector unit
    NotAligned,

    /// Write-in-progress did not clear within the poll budget
    Timeout,

    /// The chip is in deep power-down
    PoweredDown,
}
