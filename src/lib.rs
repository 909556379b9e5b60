#![no_std]
//! This is a platform agnostic driver for the ISSI IS25LPxx SPI NOR flash
//! series using [embedded-hal](https://github.com/rust-embedded/embedded-hal).
//!
//! Two parts are recognized at runtime from the RDID capacity byte:
//! * IS25LP064: 8MiB, 2048 x 4kB sectors, 32768 x 256B pages
//! * IS25LP128: 16MiB, 4096 x 4kB sectors, 65536 x 256B pages
//!
//! The driver is blocking by design: the flash chip is a single-owner
//! resource and every command runs to completion in the calling context.
//! Write-completion is observed by polling the status register with a
//! bounded budget, sleeping through the driver's delay between polls.
//!
//! Byte-granular reads and writes are provided through the
//! `embedded_storage` NOR flash traits; writes are decomposed internally so
//! that no program command ever crosses a 256-byte page boundary, which the
//! hardware does not support.

// Must go first so the other modules see its macros.
pub(crate) mod fmt;

pub mod address;
pub mod blocking;
mod command;
pub mod error;
pub mod geometry;
pub mod register;

#[cfg(test)]
extern crate std;

#[cfg(test)]
mod mock;

use crate::error::Error;
use crate::geometry::Geometry;

pub(crate) fn check_range<E>(
    geometry: &Geometry,
    offset: u32,
    length: usize,
) -> Result<(), Error<E>> {
    let capacity = geometry.capacity();
    let length = length as u32;
    if length > capacity || offset > capacity - length {
        return Err(Error::OutOfBounds);
    }
    Ok(())
}
