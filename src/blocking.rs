use embedded_hal::delay::DelayNs;
use embedded_hal::spi::{Operation, SpiDevice};

use crate::{
    address::{
        Address, Page, Sector, PAGE_SHIFT, PAGE_SIZE, SECTORS_PER_BLOCK32, SECTORS_PER_BLOCK64,
    },
    check_range,
    command::Command,
    error::Error,
    geometry::{
        DeviceInfo, Geometry, CAPACITY_IS25LP128, DEVICE_ID_IS25LP, MANUFACTURER_ISSI,
        MEMORY_TYPE_IS25LP,
    },
    register::{Capacity, DeviceId, ManufacturerId, MemoryType, StatusRegister},
};

/// Default pause between write-completion polls, 100ms
pub const DEFAULT_POLL_INTERVAL_US: u32 = 100_000;

/// Default poll budget. Two minutes at the default interval, enough for a
/// full chip erase of the 16MiB part.
pub const DEFAULT_MAX_POLLS: u32 = 1200;

/// Power state tracked across deep power-down commands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PowerState {
    Active,
    PoweredDown,
}

/// Blocking driver for the IS25LPxx series.
///
/// The driver owns the SPI device (one chip-select frame per command) and a
/// delay used by the write-completion poll loop. [`IS25LP::identify`] must
/// succeed before any geometry-dependent operation; the supported parts are
/// recognized at runtime from the RDID capacity byte.
pub struct IS25LP<SPI, D> {
    spi: SPI,
    delay: D,
    geometry: Option<Geometry>,
    last_was_write: bool,
    power: PowerState,
    poll_interval_us: u32,
    max_polls: u32,
}

impl<SPI, D, E> IS25LP<SPI, D>
where
    SPI: SpiDevice<Error = E>,
    D: DelayNs,
{
    pub fn new(spi: SPI, delay: D) -> Self {
        Self {
            spi,
            delay,
            geometry: None,
            last_was_write: false,
            power: PowerState::Active,
            poll_interval_us: DEFAULT_POLL_INTERVAL_US,
            max_polls: DEFAULT_MAX_POLLS,
        }
    }

    /// Override the pause between write-completion polls.
    pub fn with_poll_interval_us(mut self, interval: u32) -> Self {
        self.poll_interval_us = interval;
        self
    }

    /// Override the poll budget after which a pending write is declared stuck.
    pub fn with_max_polls(mut self, max_polls: u32) -> Self {
        self.max_polls = max_polls;
        self
    }

    /// Geometry of the identified part, if identification has succeeded.
    pub fn geometry(&self) -> Option<Geometry> {
        self.geometry
    }

    pub fn power_state(&self) -> PowerState {
        self.power
    }

    /// Release the underlying SPI device and delay.
    pub fn release(self) -> (SPI, D) {
        (self.spi, self.delay)
    }

    fn require_active(&self) -> Result<(), Error<E>> {
        match self.power {
            PowerState::Active => Ok(()),
            PowerState::PoweredDown => Err(Error::PoweredDown),
        }
    }

    fn require_geometry(&self) -> Result<Geometry, Error<E>> {
        self.geometry.ok_or(Error::NotIdentified)
    }

    fn command_write(&mut self, bytes: &[u8]) -> Result<(), Error<E>> {
        self.spi.write(bytes).map_err(Error::Spi)
    }

    fn command_transfer(&mut self, bytes: &mut [u8]) -> Result<(), Error<E>> {
        self.spi.transfer_in_place(bytes).map_err(Error::Spi)
    }

    fn addr_command(&mut self, addr: Address, cmd: Command) -> Result<(), Error<E>> {
        let addr_val: u32 = addr.into();
        let cmd: [u8; 4] = [
            cmd as u8,
            (addr_val >> 16) as u8,
            (addr_val >> 8) as u8,
            addr_val as u8,
        ];
        self.spi.write(&cmd).map_err(Error::Spi)
    }

    fn read_base(&mut self, addr: Address, buff: &mut [u8]) -> Result<(), Error<E>> {
        let addr_val: u32 = addr.into();
        let cmd: [u8; 4] = [
            Command::Read as u8,
            (addr_val >> 16) as u8,
            (addr_val >> 8) as u8,
            addr_val as u8,
        ];
        self.spi
            .transaction(&mut [Operation::Write(&cmd), Operation::Read(buff)])
            .map_err(Error::Spi)
    }

    fn write_base(&mut self, addr: Address, buff: &[u8]) -> Result<(), Error<E>> {
        let addr_val: u32 = addr.into();
        let cmd: [u8; 4] = [
            Command::PageProgram as u8,
            (addr_val >> 16) as u8,
            (addr_val >> 8) as u8,
            addr_val as u8,
        ];
        self.spi
            .transaction(&mut [Operation::Write(&cmd), Operation::Write(buff)])
            .map_err(Error::Spi)
    }

    /// Read and validate the chip identification, populating the geometry.
    ///
    /// Manufacturer and memory type must match the IS25LP family and the
    /// capacity byte must name a supported part, otherwise
    /// [`Error::UnknownDevice`] is returned and no geometry is assumed. A
    /// device id or capacity differing from the expected constants is only
    /// reported through the log.
    pub fn identify(&mut self) -> Result<DeviceInfo, Error<E>> {
        self.require_active()?;

        let dummy = Command::Dummy as u8;
        let mut rdid = [Command::ReadIdentification as u8, dummy, dummy, dummy];
        self.command_transfer(&mut rdid)?;
        let (manufacturer, memory_type, capacity) = (rdid[1], rdid[2], rdid[3]);

        // Address byte 1 selects device-id-first ordering in the reply
        let mut rdmdid = [
            Command::ReadManufacturerDeviceId as u8,
            dummy,
            dummy,
            0x01,
            dummy,
            dummy,
        ];
        self.command_transfer(&mut rdmdid)?;
        let device_id = rdmdid[4];

        debug!(
            "is25lp: manufacturer {:02x} memory {:02x} capacity {:02x} device id {:02x}",
            manufacturer, memory_type, capacity, device_id
        );
        if device_id != DEVICE_ID_IS25LP {
            warn!("is25lp: device id is not {:02x}", DEVICE_ID_IS25LP);
        }
        if capacity != CAPACITY_IS25LP128 {
            warn!("is25lp: capacity is not {:02x}", CAPACITY_IS25LP128);
        }

        if manufacturer != MANUFACTURER_ISSI || memory_type != MEMORY_TYPE_IS25LP {
            error!("is25lp: wrong device detected");
            return Err(Error::UnknownDevice);
        }
        let geometry = Geometry::from_capacity(capacity).ok_or(Error::UnknownDevice)?;
        self.geometry = Some(geometry);

        Ok(DeviceInfo {
            manufacturer: ManufacturerId(manufacturer),
            memory_type: MemoryType(memory_type),
            capacity: Capacity(capacity),
            device_id: DeviceId(device_id),
        })
    }

    /// Read the status register.
    pub fn read_status(&mut self) -> Result<StatusRegister, Error<E>> {
        self.require_active()?;
        let mut cmd: [u8; 2] = [Command::ReadStatus as u8, 0];
        self.command_transfer(&mut cmd)?;
        Ok(cmd[1].into())
    }

    /// Poll the status register until write-in-progress clears.
    ///
    /// Sleeps `poll_interval_us` between polls. Erase and program cycles
    /// take tens of milliseconds, so the pause keeps the bus free for other
    /// peripherals instead of hammering RDSR. Gives up with
    /// [`Error::Timeout`] once the poll budget is spent, so an unresponsive
    /// chip cannot hang the caller forever.
    pub fn wait_write_complete(&mut self) -> Result<(), Error<E>> {
        let mut polls: u32 = 0;
        while self.read_status()?.write_in_progress {
            if polls >= self.max_polls {
                error!("is25lp: write-in-progress stuck after {} polls", polls);
                return Err(Error::Timeout);
            }
            self.delay.delay_us(self.poll_interval_us);
            polls += 1;
        }
        self.last_was_write = false;
        if polls > 0 {
            debug!("is25lp: write complete after {} polls", polls);
        }
        Ok(())
    }

    /// Set the write enable latch.
    pub fn write_enable(&mut self) -> Result<(), Error<E>> {
        self.require_active()?;
        self.command_write(&[Command::WriteEnable as u8])
    }

    /// Clear the block-protect bits so the whole array accepts writes.
    pub fn unprotect(&mut self) -> Result<(), Error<E>> {
        self.write_enable()?;
        self.command_write(&[Command::WriteStatus as u8, 0x00])
    }

    /// Erase `count` sectors starting at `start`.
    ///
    /// Picks the largest erase unit legal at each position: a 64kB block
    /// when aligned to 16 sectors with at least 16 left, else a 32kB block
    /// when aligned to 8 with at least 8 left, else a single 4kB sector.
    /// Larger units amortize the fixed command/wait overhead without ever
    /// touching sectors outside the requested range. Returns the number of
    /// sectors erased.
    pub fn erase(&mut self, start: Sector, count: u32) -> Result<u32, Error<E>> {
        self.require_active()?;
        let geometry = self.require_geometry()?;
        let end = start.0.checked_add(count).ok_or(Error::OutOfBounds)?;
        if end > geometry.sector_count {
            return Err(Error::OutOfBounds);
        }

        debug!("is25lp: erase {} sectors from {}", count, start.0);
        let mut sector = start.0;
        let mut left = count;
        while left > 0 {
            if sector % SECTORS_PER_BLOCK64 == 0 && left >= SECTORS_PER_BLOCK64 {
                self.erase_unit(Sector(sector), Command::BlockErase64)?;
                sector += SECTORS_PER_BLOCK64;
                left -= SECTORS_PER_BLOCK64;
            } else if sector % SECTORS_PER_BLOCK32 == 0 && left >= SECTORS_PER_BLOCK32 {
                self.erase_unit(Sector(sector), Command::BlockErase32)?;
                sector += SECTORS_PER_BLOCK32;
                left -= SECTORS_PER_BLOCK32;
            } else {
                self.erase_unit(Sector(sector), Command::SectorErase)?;
                sector += 1;
                left -= 1;
            }
        }
        Ok(count)
    }

    /// Erase a single 4kB sector.
    pub fn erase_sector(&mut self, sector: Sector) -> Result<(), Error<E>> {
        self.require_active()?;
        let geometry = self.require_geometry()?;
        if sector.0 >= geometry.sector_count {
            return Err(Error::OutOfBounds);
        }
        self.erase_unit(sector, Command::SectorErase)
    }

    /// One erase command anchored at `sector`, synchronous to completion.
    fn erase_unit(&mut self, sector: Sector, cmd: Command) -> Result<(), Error<E>> {
        // An erase must not overlap a pending write
        self.wait_write_complete()?;
        self.write_enable()?;
        self.addr_command(Address::from_sector(sector), cmd)?;
        self.last_was_write = true;
        self.wait_write_complete()?;
        trace!("is25lp: erased unit {:02x} at sector {}", cmd as u8, sector.0);
        Ok(())
    }

    /// Erase the entire array.
    pub fn chip_erase(&mut self) -> Result<(), Error<E>> {
        self.require_active()?;
        self.wait_write_complete()?;
        self.write_enable()?;
        self.command_write(&[Command::ChipErase as u8])?;
        self.last_was_write = true;
        self.wait_write_complete()?;
        info!("is25lp: chip erased");
        Ok(())
    }

    /// Program one full page.
    pub fn program_page(
        &mut self,
        page: Page,
        buff: &[u8; PAGE_SIZE as usize],
    ) -> Result<(), Error<E>> {
        self.require_active()?;
        let geometry = self.require_geometry()?;
        if page.0 >= geometry.page_count {
            return Err(Error::OutOfBounds);
        }
        self.program_bytes(Address::from_page(page), buff)
    }

    /// One page-program command. `buff` must stay within the page holding
    /// `addr`; the chip wraps at the page boundary and would corrupt data.
    fn program_bytes(&mut self, addr: Address, buff: &[u8]) -> Result<(), Error<E>> {
        debug_assert!(addr.offset_in_page() as usize + buff.len() <= PAGE_SIZE as usize);
        self.wait_write_complete()?;
        self.write_enable()?;
        self.write_base(addr, buff)?;
        self.last_was_write = true;
        Ok(())
    }

    /// Write an arbitrary byte range.
    ///
    /// The range is decomposed into a leading partial page, full pages and
    /// a trailing partial page so that no single program command crosses a
    /// page boundary. Every sub-write performs the full
    /// wait/write-enable/program sequence.
    pub fn write(&mut self, offset: u32, buff: &[u8]) -> Result<(), Error<E>> {
        self.require_active()?;
        let geometry = self.require_geometry()?;
        check_range(&geometry, offset, buff.len())?;
        if buff.is_empty() {
            return Ok(());
        }

        let page_size = geometry.page_size();
        let start_page = offset / page_size;
        let end_page = (offset + buff.len() as u32) / page_size;
        if start_page == end_page {
            // The whole range fits one programmable page
            return self.program_bytes(Address(offset), buff);
        }

        let lead = (page_size - (offset & (page_size - 1))) as usize;
        let (head, rest) = buff.split_at(lead);
        self.program_bytes(Address(offset), head)?;

        let mut addr = offset + lead as u32;
        for chunk in rest.chunks(page_size as usize) {
            self.program_bytes(Address(addr), chunk)?;
            addr += chunk.len() as u32;
        }
        Ok(())
    }

    /// Read `buff.len()` bytes starting at `offset`.
    ///
    /// A read immediately following an erase or program waits for the chip
    /// to go idle first; back-to-back reads skip the status poll entirely.
    pub fn read(&mut self, offset: u32, buff: &mut [u8]) -> Result<(), Error<E>> {
        self.require_active()?;
        let geometry = self.require_geometry()?;
        check_range(&geometry, offset, buff.len())?;
        if self.last_was_write {
            self.wait_write_complete()?;
        }
        if buff.is_empty() {
            return Ok(());
        }
        self.read_base(Address(offset), buff)
    }

    /// Block read in page units: `buff.len()` must be a whole number of
    /// pages and the range must fit the array.
    pub fn read_pages(&mut self, start: Page, buff: &mut [u8]) -> Result<(), Error<E>> {
        let n_pages = self.check_page_range(start, buff.len())?;
        trace!("is25lp: read {} pages from {}", n_pages, start.0);
        self.read(Address::from_page(start).into(), buff)
    }

    /// Block write in page units, one program command per page.
    pub fn write_pages(&mut self, start: Page, buff: &[u8]) -> Result<(), Error<E>> {
        self.require_active()?;
        let n_pages = self.check_page_range(start, buff.len())?;
        trace!("is25lp: write {} pages from {}", n_pages, start.0);
        for (i, chunk) in buff.chunks_exact(PAGE_SIZE as usize).enumerate() {
            self.program_bytes(Address::from_page(Page(start.0 + i as u32)), chunk)?;
        }
        Ok(())
    }

    fn check_page_range(&self, start: Page, len: usize) -> Result<u32, Error<E>> {
        let geometry = self.require_geometry()?;
        if geometry.page_shift != PAGE_SHIFT {
            // The block API is built for 256-byte pages
            return Err(Error::UnsupportedGeometry);
        }
        if len % geometry.page_size() as usize != 0 {
            return Err(Error::NotAligned);
        }
        let n_pages = (len / geometry.page_size() as usize) as u32;
        let end = start.0.checked_add(n_pages).ok_or(Error::OutOfBounds)?;
        if end > geometry.page_count {
            return Err(Error::OutOfBounds);
        }
        Ok(n_pages)
    }

    /// Enter deep power-down. Until [`IS25LP::release_power_down`] the chip
    /// ignores everything else and the driver rejects operations with
    /// [`Error::PoweredDown`].
    pub fn power_down(&mut self) -> Result<(), Error<E>> {
        self.require_active()?;
        self.command_write(&[Command::DeepPowerDown as u8])?;
        self.power = PowerState::PoweredDown;
        info!("is25lp: deep power-down");
        Ok(())
    }

    /// Release deep power-down. Harmless when already active.
    pub fn release_power_down(&mut self) -> Result<(), Error<E>> {
        self.command_write(&[Command::ReleasePowerDown as u8])?;
        self.power = PowerState::Active;
        Ok(())
    }
}

/// Implementation of the `embedded_storage` NOR flash traits, the
/// block-storage interface consumed by higher-level code. Byte-granular
/// reads and writes, sector-granular erase.
mod es {
    use super::*;
    use core::fmt::Debug;
    use embedded_storage::nor_flash::{
        ErrorType, MultiwriteNorFlash, NorFlash, NorFlashError, NorFlashErrorKind, ReadNorFlash,
    };

    use crate::address::{SECTOR_SHIFT, SECTOR_SIZE};

    impl<SpiError> NorFlashError for Error<SpiError>
    where
        SpiError: Debug,
    {
        fn kind(&self) -> NorFlashErrorKind {
            match self {
                Error::OutOfBounds => NorFlashErrorKind::OutOfBounds,
                Error::NotAligned => NorFlashErrorKind::NotAligned,
                _ => NorFlashErrorKind::Other,
            }
        }
    }

    impl<SPI, D, E> ErrorType for IS25LP<SPI, D>
    where
        SPI: SpiDevice<Error = E>,
        D: DelayNs,
        E: Debug,
    {
        type Error = Error<E>;
    }

    impl<SPI, D, E> ReadNorFlash for IS25LP<SPI, D>
    where
        SPI: SpiDevice<Error = E>,
        D: DelayNs,
        E: Debug,
    {
        const READ_SIZE: usize = 1;

        fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
            IS25LP::read(self, offset, bytes)
        }

        fn capacity(&self) -> usize {
            self.geometry.map(|g| g.capacity() as usize).unwrap_or(0)
        }
    }

    impl<SPI, D, E> NorFlash for IS25LP<SPI, D>
    where
        SPI: SpiDevice<Error = E>,
        D: DelayNs,
        E: Debug,
    {
        const WRITE_SIZE: usize = 1;
        const ERASE_SIZE: usize = SECTOR_SIZE as usize;

        fn erase(&mut self, from: u32, to: u32) -> Result<(), Self::Error> {
            if from > to {
                return Err(Error::OutOfBounds);
            }
            if from % SECTOR_SIZE != 0 || to % SECTOR_SIZE != 0 {
                return Err(Error::NotAligned);
            }
            IS25LP::erase(self, Sector(from >> SECTOR_SHIFT), (to - from) >> SECTOR_SHIFT)
                .map(|_| ())
        }

        fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Self::Error> {
            IS25LP::write(self, offset, bytes)
        }
    }

    // Programming the same word again only clears more bits, which NOR allows
    impl<SPI, D, E> MultiwriteNorFlash for IS25LP<SPI, D>
    where
        SPI: SpiDevice<Error = E>,
        D: DelayNs,
        E: Debug,
    {
    }
}
