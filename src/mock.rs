//! A simulated IS25LP chip for the unit tests.
//!
//! [`SpiSim`] implements [`SpiDevice`] and decodes each chip-select frame
//! the way the part does: opcode first, then address/selector bytes, then
//! data clocked in or out. The simulation enforces the hardware rules the
//! driver must respect: programming wraps within a page and only clears
//! bits, mutating commands need the write-enable latch and are refused
//! while a write is in progress. Rule breaches are recorded in
//! `violations` instead of panicking so tests can assert on them.

use core::convert::Infallible;
use std::cell::RefCell;
use std::rc::Rc;
use std::vec::Vec;

use embedded_hal::delay::DelayNs;
use embedded_hal::spi::{ErrorType, Operation, SpiDevice};

use crate::command::Command;
use crate::geometry::Geometry;

pub type ChipHandle = Rc<RefCell<ChipState>>;

pub struct ChipState {
    pub mem: Vec<u8>,
    pub manufacturer: u8,
    pub memory_type: u8,
    pub capacity: u8,
    pub device_id: u8,
    /// Block-protect/QE/SRWD bits of the status register (bits 2-7)
    pub protect_bits: u8,
    /// Write-enable latch
    pub wel: bool,
    /// Remaining status polls that still report write-in-progress
    pub busy_polls: u32,
    /// Busy polls injected after each program/erase
    pub busy_polls_per_op: u32,
    /// Never clear write-in-progress (for timeout tests)
    pub stuck_busy: bool,
    pub powered_down: bool,
    /// Erase commands seen: (opcode, byte address)
    pub erase_ops: Vec<(u8, u32)>,
    /// Program commands seen: (byte address, length)
    pub program_ops: Vec<(u32, usize)>,
    /// Status-register read frames seen
    pub rdsr_frames: u32,
    /// Time the driver spent in its delay, in microseconds
    pub slept_us: u64,
    /// Protocol rule breaches, empty in a well-behaved run
    pub violations: Vec<&'static str>,
}

impl ChipState {
    fn new(manufacturer: u8, memory_type: u8, capacity: u8, device_id: u8) -> ChipHandle {
        // Unknown capacities still get a backing array so identification
        // failures can be exercised
        let bytes = Geometry::from_capacity(capacity)
            .map(|g| g.capacity() as usize)
            .unwrap_or(1024);
        Rc::new(RefCell::new(ChipState {
            mem: std::vec![0xFF; bytes],
            manufacturer,
            memory_type,
            capacity,
            device_id,
            protect_bits: 0,
            wel: false,
            busy_polls: 0,
            busy_polls_per_op: 1,
            stuck_busy: false,
            powered_down: false,
            erase_ops: Vec::new(),
            program_ops: Vec::new(),
            rdsr_frames: 0,
            slept_us: 0,
            violations: Vec::new(),
        }))
    }

    /// A pristine 8MiB IS25LP064.
    pub fn is25lp064() -> ChipHandle {
        Self::new(0x9D, 0x60, 0x17, 0x17)
    }

    /// A pristine 16MiB IS25LP128.
    pub fn is25lp128() -> ChipHandle {
        Self::new(0x9D, 0x60, 0x18, 0x17)
    }

    /// A chip reporting arbitrary identification bytes.
    pub fn with_ids(manufacturer: u8, memory_type: u8, capacity: u8, device_id: u8) -> ChipHandle {
        Self::new(manufacturer, memory_type, capacity, device_id)
    }

    fn wip(&self) -> bool {
        self.stuck_busy || self.busy_polls > 0
    }

    fn status_byte(&self) -> u8 {
        self.protect_bits | u8::from(self.wel) << 1 | u8::from(self.wip())
    }

    /// Gate for mutating commands: refused while busy or without the latch.
    /// The latch is consumed either way, as on the real part.
    fn take_write_grant(&mut self, what: &'static str) -> bool {
        if self.wip() {
            self.violations.push(what);
            return false;
        }
        if !self.wel {
            self.violations.push(what);
            return false;
        }
        self.wel = false;
        true
    }

    fn start_busy(&mut self) {
        self.busy_polls = self.busy_polls_per_op;
    }
}

/// One chip-select frame in flight.
struct Frame {
    idx: usize,
    op: u8,
    addr: u32,
    selector: u8,
    data: Vec<u8>,
}

impl Frame {
    fn new() -> Self {
        Frame {
            idx: 0,
            op: 0,
            addr: 0,
            selector: 0,
            data: Vec::new(),
        }
    }

    /// Clock one byte in each direction.
    fn clock(&mut self, chip: &mut ChipState, tx: u8) -> u8 {
        let i = self.idx;
        self.idx += 1;
        if i == 0 {
            self.op = tx;
            return 0xFF;
        }

        const RDID: u8 = Command::ReadIdentification as u8;
        const RDMDID: u8 = Command::ReadManufacturerDeviceId as u8;
        const RDSR: u8 = Command::ReadStatus as u8;
        const WRSR: u8 = Command::WriteStatus as u8;
        const READ: u8 = Command::Read as u8;
        const PP: u8 = Command::PageProgram as u8;
        const SE: u8 = Command::SectorErase as u8;
        const BE32: u8 = Command::BlockErase32 as u8;
        const BE64: u8 = Command::BlockErase64 as u8;

        match self.op {
            RDID => match i {
                1 => chip.manufacturer,
                2 => chip.memory_type,
                3 => chip.capacity,
                _ => 0xFF,
            },
            RDMDID => {
                if i == 3 {
                    self.selector = tx;
                }
                match i {
                    4 if self.selector == 1 => chip.device_id,
                    4 => chip.manufacturer,
                    5 if self.selector == 1 => chip.manufacturer,
                    5 => chip.device_id,
                    _ => 0xFF,
                }
            }
            RDSR => chip.status_byte(),
            WRSR => {
                if i == 1 {
                    self.data.push(tx);
                }
                0xFF
            }
            READ | PP | SE | BE32 | BE64 => {
                if i <= 3 {
                    self.addr = self.addr << 8 | u32::from(tx);
                    0xFF
                } else if self.op == READ {
                    let a = self.addr as usize + (i - 4);
                    if a < chip.mem.len() {
                        chip.mem[a]
                    } else {
                        chip.violations.push("read past end of array");
                        0xFF
                    }
                } else if self.op == PP {
                    self.data.push(tx);
                    0xFF
                } else {
                    0xFF
                }
            }
            _ => 0xFF,
        }
    }

    /// Commit the frame's side effects at chip-select deassert.
    fn finish(self, chip: &mut ChipState) {
        const WREN: u8 = Command::WriteEnable as u8;
        const RDID: u8 = Command::ReadIdentification as u8;
        const RDMDID: u8 = Command::ReadManufacturerDeviceId as u8;
        const RDSR: u8 = Command::ReadStatus as u8;
        const WRSR: u8 = Command::WriteStatus as u8;
        const READ: u8 = Command::Read as u8;
        const PP: u8 = Command::PageProgram as u8;
        const SE: u8 = Command::SectorErase as u8;
        const BE32: u8 = Command::BlockErase32 as u8;
        const BE64: u8 = Command::BlockErase64 as u8;
        const CER: u8 = Command::ChipErase as u8;
        const DP: u8 = Command::DeepPowerDown as u8;
        const RDPD: u8 = Command::ReleasePowerDown as u8;

        if chip.powered_down && self.op != RDPD {
            chip.violations.push("command while powered down");
            return;
        }

        match self.op {
            WREN => {
                if chip.wip() {
                    chip.violations.push("write enable while busy");
                } else {
                    chip.wel = true;
                }
            }
            RDSR => {
                chip.rdsr_frames += 1;
                if !chip.stuck_busy && chip.busy_polls > 0 {
                    chip.busy_polls -= 1;
                }
            }
            WRSR => {
                if chip.take_write_grant("status write refused") {
                    chip.protect_bits = self.data.first().copied().unwrap_or(0) & 0b1111_1100;
                }
            }
            PP => {
                if chip.take_write_grant("program refused") {
                    // The part wraps within the 256-byte page
                    let page_base = (self.addr & !0xFF) as usize;
                    let mut off = self.addr & 0xFF;
                    for &b in &self.data {
                        chip.mem[page_base + off as usize] &= b;
                        off = (off + 1) & 0xFF;
                    }
                    chip.program_ops.push((self.addr, self.data.len()));
                    chip.start_busy();
                }
            }
            SE | BE32 | BE64 => {
                if chip.take_write_grant("erase refused") {
                    let size: u32 = match self.op {
                        SE => 4096,
                        BE32 => 32768,
                        _ => 65536,
                    };
                    let base = (self.addr & !(size - 1)) as usize;
                    let end = (base + size as usize).min(chip.mem.len());
                    chip.mem[base..end].fill(0xFF);
                    chip.erase_ops.push((self.op, self.addr));
                    chip.start_busy();
                }
            }
            CER => {
                if chip.take_write_grant("chip erase refused") {
                    chip.mem.fill(0xFF);
                    chip.start_busy();
                }
            }
            DP => {
                if chip.wip() {
                    chip.violations.push("power down while busy");
                } else {
                    chip.powered_down = true;
                }
            }
            RDPD => chip.powered_down = false,
            READ | RDID | RDMDID => {
                if chip.wip() {
                    chip.violations.push("read while busy");
                }
            }
            _ => chip.violations.push("unknown opcode"),
        }
    }
}

pub struct SpiSim {
    chip: ChipHandle,
}

impl SpiSim {
    pub fn new(chip: &ChipHandle) -> Self {
        SpiSim { chip: chip.clone() }
    }
}

impl ErrorType for SpiSim {
    type Error = Infallible;
}

impl SpiDevice for SpiSim {
    fn transaction(&mut self, operations: &mut [Operation<'_, u8>]) -> Result<(), Infallible> {
        let mut chip = self.chip.borrow_mut();
        let mut frame = Frame::new();
        for op in operations {
            match op {
                Operation::Write(tx) => {
                    for &b in tx.iter() {
                        frame.clock(&mut chip, b);
                    }
                }
                Operation::Read(rx) => {
                    for b in rx.iter_mut() {
                        *b = frame.clock(&mut chip, 0x00);
                    }
                }
                Operation::Transfer(rx, tx) => {
                    let n = rx.len().max(tx.len());
                    for i in 0..n {
                        let out = tx.get(i).copied().unwrap_or(0x00);
                        let in_ = frame.clock(&mut chip, out);
                        if let Some(b) = rx.get_mut(i) {
                            *b = in_;
                        }
                    }
                }
                Operation::TransferInPlace(buf) => {
                    for b in buf.iter_mut() {
                        *b = frame.clock(&mut chip, *b);
                    }
                }
                Operation::DelayNs(_) => {}
            }
        }
        frame.finish(&mut chip);
        Ok(())
    }
}

pub struct DelaySim {
    chip: ChipHandle,
}

impl DelaySim {
    pub fn new(chip: &ChipHandle) -> Self {
        DelaySim { chip: chip.clone() }
    }
}

impl DelayNs for DelaySim {
    fn delay_ns(&mut self, ns: u32) {
        self.chip.borrow_mut().slept_us += u64::from(ns) / 1000;
    }
}
