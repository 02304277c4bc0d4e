//! [`embedded-storage`] traits
//!
//! Offsets are relative to the start of the flash memory and cover both
//! banks.
//!
//! [`embedded-storage`]: https://crates.io/crates/embedded-storage

use crate::{
    bus::Bus,
    efc::Error,
    flash::{Bank, Flash, WriteOptions},
    mem,
};
use embedded_storage::nor_flash::{
    ErrorType, NorFlash, NorFlashError, NorFlashErrorKind, ReadNorFlash,
};

impl NorFlashError for Error {
    fn kind(&self) -> NorFlashErrorKind {
        match self {
            Error::InvalidAddress => NorFlashErrorKind::OutOfBounds,
            Error::InvalidArgument | Error::Command(_) | Error::Generic | Error::Timeout => {
                NorFlashErrorKind::Other
            }
        }
    }
}

impl<B: Bus> ErrorType for Flash<B> {
    type Error = Error;
}

fn abs_range(offset: u32, len: usize) -> Result<(u32, u32), Error> {
    let len: u32 = u32::try_from(len).map_err(|_| Error::InvalidAddress)?;
    let start: u32 = offset
        .checked_add(mem::FLASH_START)
        .ok_or(Error::InvalidAddress)?;
    match start.checked_add(len) {
        Some(end) if end <= mem::FLASH_END => Ok((start, end)),
        _ => Err(Error::InvalidAddress),
    }
}

impl<B: Bus> Flash<B> {
    // split writes at the bank boundary
    fn write_banked(
        &mut self,
        start: u32,
        end: u32,
        mut src: impl Iterator<Item = u8>,
        opts: WriteOptions,
    ) -> Result<(), Error> {
        let mut addr: u32 = start;
        while addr < end {
            let bank: Bank = Bank::from_addr(addr).ok_or(Error::InvalidAddress)?;
            let chunk: u32 = core::cmp::min(end, bank.end()) - addr;
            self.write_from(addr, chunk, src.by_ref().take(chunk as usize), opts)?;
            addr += chunk;
        }
        Ok(())
    }
}

impl<B: Bus> ReadNorFlash for Flash<B> {
    const READ_SIZE: usize = 1;

    fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
        let (start, _) = abs_range(offset, bytes.len())?;
        self.read_bytes(start, bytes)
    }

    fn capacity(&self) -> usize {
        (mem::FLASH_END - mem::FLASH_START) as usize
    }
}

impl<B: Bus> NorFlash for Flash<B> {
    const WRITE_SIZE: usize = 4;
    const ERASE_SIZE: usize = mem::PAGE_SIZE as usize;

    fn erase(&mut self, from: u32, to: u32) -> Result<(), Self::Error> {
        if to < from || from % mem::PAGE_SIZE != 0 || to % mem::PAGE_SIZE != 0 {
            return Err(Error::InvalidAddress);
        }
        let (start, end) = abs_range(from, (to - from) as usize)?;
        self.write_banked(start, end, core::iter::repeat(0xFF), WriteOptions::DEFAULT)
    }

    fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Self::Error> {
        if offset % 4 != 0 || bytes.len() % 4 != 0 {
            return Err(Error::InvalidAddress);
        }
        let (start, end) = abs_range(offset, bytes.len())?;
        let opts: WriteOptions = WriteOptions {
            erase: false,
            lock: false,
        };
        self.write_banked(start, end, bytes.iter().copied(), opts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{efc::Cmd, sim::SimBus};

    const BANK1: u32 = mem::FLASH1_START - mem::FLASH_START;

    #[test]
    fn error_kind() {
        assert_eq!(Error::InvalidAddress.kind(), NorFlashErrorKind::OutOfBounds);
        assert_eq!(Error::Timeout.kind(), NorFlashErrorKind::Other);
    }

    #[test]
    fn nor_semantics() {
        let mut sim: SimBus = SimBus::new();
        let mut flash = Flash::new(&mut sim);
        assert_eq!(flash.capacity(), 512 * 1024);

        NorFlash::write(&mut flash, 0x100, &[0xF0, 0x0F, 0xAA, 0x55]).unwrap();
        // programming without erase only clears bits
        NorFlash::write(&mut flash, 0x100, &[0x3C, 0xFF, 0xFF, 0x00]).unwrap();
        let mut buf: [u8; 4] = [0; 4];
        ReadNorFlash::read(&mut flash, 0x100, &mut buf).unwrap();
        assert_eq!(buf, [0x30, 0x0F, 0xAA, 0x00]);

        flash.erase(0x100, 0x200).unwrap();
        ReadNorFlash::read(&mut flash, 0x100, &mut buf).unwrap();
        assert_eq!(buf, [0xFF; 4]);
        drop(flash);

        assert_eq!(sim.count(Cmd::Wp), 2);
        assert_eq!(sim.count(Cmd::Ewp), 1);
    }

    #[test]
    fn spans_both_banks() {
        let mut sim: SimBus = SimBus::new();
        let mut flash = Flash::new(&mut sim);
        NorFlash::write(&mut flash, BANK1 - 4, &[1, 2, 3, 4, 5, 6, 7, 8]).unwrap();
        let mut buf: [u8; 8] = [0; 8];
        ReadNorFlash::read(&mut flash, BANK1 - 4, &mut buf).unwrap();
        assert_eq!(buf, [1, 2, 3, 4, 5, 6, 7, 8]);

        flash.erase(BANK1 - 256, BANK1 + 256).unwrap();
        ReadNorFlash::read(&mut flash, BANK1 - 4, &mut buf).unwrap();
        assert_eq!(buf, [0xFF; 8]);
    }

    #[test]
    fn bounds_and_alignment() {
        let mut sim: SimBus = SimBus::new();
        let mut flash = Flash::new(&mut sim);
        let cap: u32 = flash.capacity() as u32;
        assert_eq!(NorFlash::write(&mut flash, 2, &[0; 4]), Err(Error::InvalidAddress));
        assert_eq!(NorFlash::write(&mut flash, 0, &[0; 3]), Err(Error::InvalidAddress));
        assert_eq!(NorFlash::write(&mut flash, cap, &[0; 4]), Err(Error::InvalidAddress));
        assert_eq!(flash.erase(0x80, 0x100), Err(Error::InvalidAddress));
        assert_eq!(flash.erase(0x200, 0x100), Err(Error::InvalidAddress));
        assert_eq!(flash.erase(cap - 256, cap + 256), Err(Error::InvalidAddress));
        assert_eq!(flash.erase(cap - 256, cap), Ok(()));
        let mut buf: [u8; 2] = [0; 2];
        assert_eq!(ReadNorFlash::read(&mut flash, cap - 1, &mut buf), Err(Error::InvalidAddress));
        assert_eq!(ReadNorFlash::read(&mut flash, u32::MAX, &mut buf), Err(Error::InvalidAddress));
    }
}
