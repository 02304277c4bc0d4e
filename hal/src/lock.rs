//! Lock regions
//!
//! Each bank is split into 16 lock regions of 64 pages. A locked region
//! rejects programming and erasure with a lock error.

use crate::{
    bus::Bus,
    efc::{Cmd, Error},
    flash::{Bank, Flash, Page},
    mem,
};
use core::ops::RangeInclusive;

/// Widen an inclusive address range to lock region boundaries.
///
/// # Example
///
/// ```
/// use sam3x8e_flash::lock::lock_range;
///
/// assert_eq!(lock_range(0x0008_4010, 0x0008_4020), 0x0008_4000..=0x0008_7FFF);
/// assert_eq!(lock_range(0x0008_3FFF, 0x0008_4000), 0x0008_0000..=0x0008_7FFF);
/// ```
pub const fn lock_range(start: u32, end: u32) -> RangeInclusive<u32> {
    const SIZE: u32 = mem::LOCK_REGION_SIZE;
    (start - start % SIZE)..=(end - end % SIZE + (SIZE - 1))
}

fn check_range(start: u32, end: u32) -> Result<(Bank, Bank), Error> {
    let first: Bank = Bank::from_addr(start).ok_or(Error::InvalidAddress)?;
    let last: Bank = Bank::from_addr(end).ok_or(Error::InvalidAddress)?;
    if end < start {
        Err(Error::InvalidAddress)
    } else {
        Ok((first, last))
    }
}

impl<B: Bus> Flash<B> {
    /// Lock every region overlapping `start..=end`.
    ///
    /// Regions are locked in order, the first failure stops the operation
    /// and is returned.
    ///
    /// # Errors
    ///
    /// * [`Error::InvalidAddress`] if either address is not in the flash
    ///   memory, or `end` is before `start`.
    /// * [`Error::Command`] if a set lock bit command fails.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use sam3x8e_flash::{Flash, bus::Mmio};
    ///
    /// let mut flash = Flash::new(unsafe { Mmio::steal() });
    /// flash.lock(0x000F_0000, 0x000F_FFFF)?;
    /// assert_eq!(flash.is_locked(0x000F_0000, 0x000F_FFFF)?, 4);
    /// # Ok::<(), sam3x8e_flash::Error>(())
    /// ```
    pub fn lock(&mut self, start: u32, end: u32) -> Result<(), Error> {
        self.set_lock_bits(start, end, Cmd::Slb)
    }

    /// Unlock every region overlapping `start..=end`.
    ///
    /// # Errors
    ///
    /// Same as [`lock`](Self::lock), with clear lock bit commands.
    pub fn unlock(&mut self, start: u32, end: u32) -> Result<(), Error> {
        self.set_lock_bits(start, end, Cmd::Clb)
    }

    fn set_lock_bits(&mut self, start: u32, end: u32, cmd: Cmd) -> Result<(), Error> {
        check_range(start, end)?;
        let range: RangeInclusive<u32> = lock_range(start, end);
        debug!("{} {:#x}..={:#x}", cmd, *range.start(), *range.end());

        for region in range.step_by(mem::LOCK_REGION_SIZE as usize) {
            let page: Page = Page::from_addr(region).ok_or(Error::InvalidAddress)?;
            self.efc.select(page.bank().efc());
            self.efc.command(cmd, page.index_in_bank())?;
        }
        Ok(())
    }

    /// Number of locked regions overlapping `start..=end`.
    ///
    /// This is a count, compare against zero for a yes or no answer.
    ///
    /// # Errors
    ///
    /// * [`Error::InvalidAddress`] if either address is not in the flash
    ///   memory, or `end` is before `start`.
    /// * [`Error::Command`] if the get lock bits command fails.
    pub fn is_locked(&mut self, start: u32, end: u32) -> Result<u32, Error> {
        let (first, last) = check_range(start, end)?;
        let mut count: u32 = 0;
        for bank in [Bank::Bank0, Bank::Bank1] {
            if bank < first || bank > last {
                continue;
            }
            let lo: u32 = core::cmp::max(start, bank.base());
            let hi: u32 = core::cmp::min(end, bank.end() - 1);
            count += self.count_locked(bank, lo, hi)?;
        }
        Ok(count)
    }

    fn count_locked(&mut self, bank: Bank, start: u32, end: u32) -> Result<u32, Error> {
        let first: u32 = (start - bank.base()) / mem::LOCK_REGION_SIZE;
        let last: u32 = (end - bank.base()) / mem::LOCK_REGION_SIZE;

        self.efc.select(bank.efc());
        self.efc.command(Cmd::Glb, 0)?;

        // one result word per 32 regions, skip those before the start
        let mut word: u32 = 0;
        let mut bits: u32 = self.efc.result();
        while word < first / 32 {
            bits = self.efc.result();
            word += 1;
        }

        let mut count: u32 = 0;
        for region in first..=last {
            if region / 32 != word {
                bits = self.efc.result();
                word += 1;
            }
            if bits & (1 << (region % 32)) != 0 {
                count += 1;
            }
        }
        trace!("bank {} regions {}..={} locked {}", bank as u8, first, last, count);
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        efc::{EfcIdx, Fcr, Status},
        sim::SimBus,
    };

    const R: u32 = mem::LOCK_REGION_SIZE;

    #[test]
    fn widening() {
        assert_eq!(lock_range(mem::FLASH_START, mem::FLASH_START), mem::FLASH_START..=mem::FLASH_START + R - 1);
        assert_eq!(lock_range(mem::FLASH_START + R, mem::FLASH_START + 2 * R), mem::FLASH_START + R..=mem::FLASH_START + 3 * R - 1);
        assert_eq!(lock_range(mem::LAST_PAGE_ADDR, mem::FLASH_END - 1), mem::FLASH_END - R..=mem::FLASH_END - 1);
        assert_eq!(lock_range(u32::MAX, u32::MAX), u32::MAX - (R - 1)..=u32::MAX);
    }

    #[test]
    fn lock_count_unlock() {
        let cases: [(u32, u32); 5] = [
            (mem::FLASH_START, mem::FLASH_START),
            (mem::FLASH_START + 100, mem::FLASH_START + 3 * R + 5),
            (mem::FLASH1_START - 4, mem::FLASH1_START + 4),
            (mem::FLASH1_START + 5 * R, mem::FLASH_END - 1),
            (mem::FLASH_START, mem::FLASH_END - 1),
        ];
        for (a, b) in cases {
            let spanned: u32 = (lock_range(a, b).end() + 1 - lock_range(a, b).start()) / R;
            let mut sim: SimBus = SimBus::new();
            let mut flash = Flash::new(&mut sim);
            flash.lock(a, b).unwrap();
            assert_eq!(flash.is_locked(a, b), Ok(spanned), "{a:#x}..={b:#x}");
            flash.unlock(a, b).unwrap();
            assert_eq!(flash.is_locked(a, b), Ok(0), "{a:#x}..={b:#x}");
        }
    }

    #[test]
    fn controller_follows_region() {
        let mut sim: SimBus = SimBus::new();
        let mut flash = Flash::new(&mut sim);
        flash.lock(mem::FLASH1_START - 1, mem::FLASH1_START).unwrap();
        drop(flash);

        assert_eq!(
            sim.commands(),
            [
                (EfcIdx::Efc0, Fcr::new(Cmd::Slb, 960)),
                (EfcIdx::Efc1, Fcr::new(Cmd::Slb, 0)),
            ]
            .as_slice()
        );
        assert_eq!(sim.locks(EfcIdx::Efc0), 1 << 15);
        assert_eq!(sim.locks(EfcIdx::Efc1), 1);
    }

    #[test]
    fn monotonic() {
        let mut sim: SimBus = SimBus::new();
        let mut flash = Flash::new(&mut sim);
        let (lo, hi) = (mem::FLASH_START, mem::FLASH_START + 8 * R - 1);
        let mut prev: u32 = flash.is_locked(lo, hi).unwrap();
        for n in [3, 0, 7, 3, 5] {
            let region: u32 = mem::FLASH_START + n * R;
            flash.lock(region, region).unwrap();
            let now: u32 = flash.is_locked(lo, hi).unwrap();
            assert!(now >= prev);
            prev = now;
        }
        assert_eq!(prev, 4);
        assert_eq!(flash.is_locked(lo, lo + R - 1), Ok(1));
        assert_eq!(flash.is_locked(lo + R, lo + 3 * R - 1), Ok(0));
    }

    #[test]
    fn count_uses_bitmap_of_the_bank() {
        let mut sim: SimBus = SimBus::new();
        sim.set_locks(EfcIdx::Efc0, 0b1000_0000_0000_0001);
        sim.set_locks(EfcIdx::Efc1, 0b0110);

        let mut flash = Flash::new(&mut sim);
        assert_eq!(flash.is_locked(mem::FLASH_START, mem::FLASH1_START - 1), Ok(2));
        assert_eq!(flash.is_locked(mem::FLASH1_START, mem::FLASH1_START + R), Ok(1));
        assert_eq!(flash.is_locked(mem::FLASH1_START + R, mem::FLASH1_START + 3 * R - 1), Ok(2));
        assert_eq!(flash.is_locked(mem::FLASH_START, mem::FLASH_END - 1), Ok(4));
    }

    #[test]
    fn invalid_ranges() {
        let mut sim: SimBus = SimBus::new();
        let mut flash = Flash::new(&mut sim);
        assert_eq!(flash.lock(0, mem::FLASH_START), Err(Error::InvalidAddress));
        assert_eq!(flash.unlock(mem::FLASH_START, mem::FLASH_END), Err(Error::InvalidAddress));
        assert_eq!(flash.is_locked(mem::FLASH1_START, mem::FLASH_START), Err(Error::InvalidAddress));
        drop(flash);

        assert!(sim.commands().is_empty());
    }

    #[test]
    fn first_failure_stops() {
        let mut sim: SimBus = SimBus::new();
        sim.fail_command(1, Status::FLOCKE);

        let mut flash = Flash::new(&mut sim);
        assert_eq!(
            flash.lock(mem::FLASH_START, mem::FLASH_START + 3 * R),
            Err(Error::Command(Status::from_bits(Status::FLOCKE)))
        );
        drop(flash);

        assert_eq!(sim.count(Cmd::Slb), 2);
        assert_eq!(sim.locks(EfcIdx::Efc0), 1);
    }
}
