//! Flash memory

use crate::{
    bus::Bus,
    descriptor::Descriptor,
    efc::{AccessMode, Cmd, Efc, EfcIdx, Error, ModeSnapshot},
    mem,
    uid::Uid,
};
use core::{num::NonZeroU32, ops::Range};

/// Wait states used while flash commands are running.
///
/// This is the maximum for the chip, restored to the previous value when the
/// operation completes.
pub const PROGRAM_WAIT_STATES: u8 = 6;

/// Flash bank.
#[repr(u8)]
#[derive(Debug, PartialEq, Eq, Clone, Copy, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Bank {
    /// Bank 0, `0x0008_0000` to `0x000B_FFFF`.
    Bank0 = 0,
    /// Bank 1, `0x000C_0000` to `0x000F_FFFF`.
    Bank1 = 1,
}

impl Bank {
    /// Bank containing an address.
    ///
    /// Returns `None` if the address is not in the flash memory.
    ///
    /// # Example
    ///
    /// ```
    /// use sam3x8e_flash::flash::Bank;
    ///
    /// assert_eq!(Bank::from_addr(0x0008_0000), Some(Bank::Bank0));
    /// assert_eq!(Bank::from_addr(0x000C_0000), Some(Bank::Bank1));
    /// assert_eq!(Bank::from_addr(0x0010_0000), None);
    /// ```
    pub const fn from_addr(addr: u32) -> Option<Bank> {
        if addr < mem::FLASH_START || addr >= mem::FLASH_END {
            None
        } else if addr < mem::FLASH1_START {
            Some(Bank::Bank0)
        } else {
            Some(Bank::Bank1)
        }
    }

    /// Starting address of the bank.
    pub const fn base(self) -> u32 {
        match self {
            Bank::Bank0 => mem::FLASH_START,
            Bank::Bank1 => mem::FLASH1_START,
        }
    }

    /// First address past the end of the bank.
    pub const fn end(self) -> u32 {
        self.base() + mem::BANK_SIZE
    }

    /// Controller operating the bank.
    pub const fn efc(self) -> EfcIdx {
        match self {
            Bank::Bank0 => EfcIdx::Efc0,
            Bank::Bank1 => EfcIdx::Efc1,
        }
    }
}

/// 256 byte page address.
#[derive(Debug, PartialEq, Eq, Clone, Copy, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Page(u16);

impl Page {
    /// Page size in bytes.
    pub const SIZE: u32 = mem::PAGE_SIZE;

    /// Create a page address from an index over both banks.
    ///
    /// Returns `None` if the index is greater than 2047.
    ///
    /// # Example
    ///
    /// ```
    /// use sam3x8e_flash::flash::Page;
    ///
    /// assert!(Page::from_index(2047).is_some());
    /// assert!(Page::from_index(2048).is_none());
    /// ```
    pub const fn from_index(idx: u16) -> Option<Self> {
        if (idx as u32) < mem::TOTAL_PAGES {
            Some(Page(idx))
        } else {
            None
        }
    }

    /// Create a page address from an absolute address.
    ///
    /// Returns `None` if the address is out of bounds, or not page aligned.
    ///
    /// # Example
    ///
    /// ```
    /// use sam3x8e_flash::flash::Page;
    ///
    /// assert_eq!(Page::from_addr(0x0008_0000), Page::from_index(0));
    /// assert_eq!(Page::from_addr(0x000C_0100), Page::from_index(1025));
    /// assert!(Page::from_addr(0x0008_0004).is_none());
    /// assert!(Page::from_addr(0x0010_0000).is_none());
    /// ```
    pub const fn from_addr(addr: u32) -> Option<Self> {
        if addr % Self::SIZE == 0 {
            Self::containing(addr)
        } else {
            None
        }
    }

    /// Page containing an absolute address.
    ///
    /// Returns `None` if the address is out of bounds.
    ///
    /// # Example
    ///
    /// ```
    /// use sam3x8e_flash::flash::Page;
    ///
    /// assert_eq!(Page::containing(0x0008_01FF), Page::from_index(1));
    /// assert!(Page::containing(0x0007_FFFF).is_none());
    /// ```
    pub const fn containing(addr: u32) -> Option<Self> {
        if addr < mem::FLASH_START || addr >= mem::FLASH_END {
            None
        } else {
            Some(Page(((addr - mem::FLASH_START) / Self::SIZE) as u16))
        }
    }

    /// Get the page index over both banks.
    pub const fn to_index(self) -> u16 {
        self.0
    }

    /// Get the page address.
    ///
    /// # Example
    ///
    /// ```
    /// use sam3x8e_flash::flash::Page;
    ///
    /// assert_eq!(Page::from_index(0).unwrap().addr(), 0x0008_0000);
    /// assert_eq!(Page::from_index(2047).unwrap().addr(), 0x000F_FF00);
    /// ```
    pub const fn addr(&self) -> u32 {
        (self.0 as u32) * Self::SIZE + mem::FLASH_START
    }

    /// Get the address range of the page.
    ///
    /// # Example
    ///
    /// ```
    /// use sam3x8e_flash::flash::Page;
    ///
    /// assert_eq!(
    ///     Page::from_index(1).unwrap().addr_range(),
    ///     0x0008_0100..0x0008_0200
    /// );
    /// ```
    pub const fn addr_range(&self) -> Range<u32> {
        Range {
            start: self.addr(),
            end: self.addr() + Self::SIZE,
        }
    }

    /// Bank containing the page.
    pub const fn bank(&self) -> Bank {
        if (self.0 as u32) < mem::PAGES_PER_BANK {
            Bank::Bank0
        } else {
            Bank::Bank1
        }
    }

    /// Page number within its bank, this is the argument of page commands.
    ///
    /// # Example
    ///
    /// ```
    /// use sam3x8e_flash::flash::Page;
    ///
    /// assert_eq!(Page::from_index(3).unwrap().index_in_bank(), 3);
    /// assert_eq!(Page::from_index(1027).unwrap().index_in_bank(), 3);
    /// ```
    pub const fn index_in_bank(&self) -> u16 {
        ((self.0 as u32) % mem::PAGES_PER_BANK) as u16
    }
}

/// Page programming options.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct WriteOptions {
    /// Erase each page before programming.
    ///
    /// Without erasure programming can only clear bits.
    pub erase: bool,
    /// Lock the region of each page after programming.
    ///
    /// Only applies together with [`erase`](Self::erase).
    pub lock: bool,
}

impl WriteOptions {
    /// Erase before programming, do not lock.
    pub const DEFAULT: Self = Self {
        erase: true,
        lock: false,
    };

    /// Page command for these options.
    pub const fn cmd(&self) -> Cmd {
        Cmd::write_page(self.erase, self.lock)
    }
}

impl Default for WriteOptions {
    #[inline]
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Flash driver configuration.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Config {
    wait_states: u8,
    access_mode: AccessMode,
    memfault: bool,
    uid_poll_limit: Option<NonZeroU32>,
}

impl Default for Config {
    #[inline]
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl Config {
    /// Default configuration, as a constant.
    ///
    /// * 6 wait states
    /// * 128-bit access mode
    /// * MemManage fault exception enabled
    /// * Unbounded unique identifier polling
    ///
    /// # Example
    ///
    /// ```
    /// use sam3x8e_flash::flash::Config;
    ///
    /// assert_eq!(Config::DEFAULT, Config::default());
    /// ```
    pub const DEFAULT: Self = Self {
        wait_states: PROGRAM_WAIT_STATES,
        access_mode: AccessMode::Bits128,
        memfault: true,
        uid_poll_limit: None,
    };

    /// Set the wait states programmed into both controllers at construction.
    ///
    /// Values greater than 15 are truncated.
    ///
    /// # Example
    ///
    /// ```
    /// use sam3x8e_flash::flash::Config;
    ///
    /// assert_eq!(Config::DEFAULT.set_wait_states(4).wait_states(), 4);
    /// assert_eq!(Config::DEFAULT.set_wait_states(20).wait_states(), 15);
    /// ```
    #[must_use = "set_wait_states returns a modified Config"]
    pub const fn set_wait_states(mut self, ws: u8) -> Self {
        self.wait_states = if ws > 15 { 15 } else { ws };
        self
    }

    /// Wait states programmed at construction.
    #[must_use]
    pub const fn wait_states(&self) -> u8 {
        self.wait_states
    }

    /// Set the access mode programmed into both controllers at construction.
    #[must_use = "set_access_mode returns a modified Config"]
    pub const fn set_access_mode(mut self, mode: AccessMode) -> Self {
        self.access_mode = mode;
        self
    }

    /// Access mode programmed at construction.
    #[must_use]
    pub const fn access_mode(&self) -> AccessMode {
        self.access_mode
    }

    /// Enable the MemManage fault exception at construction.
    #[must_use = "set_memfault returns a modified Config"]
    pub const fn set_memfault(mut self, enable: bool) -> Self {
        self.memfault = enable;
        self
    }

    /// Returns `true` if the MemManage fault exception is enabled at
    /// construction.
    #[must_use]
    pub const fn memfault(&self) -> bool {
        self.memfault
    }

    /// Bound the status register polls of the unique identifier sequence.
    ///
    /// `None` polls forever.
    ///
    /// # Example
    ///
    /// ```
    /// use core::num::NonZeroU32;
    /// use sam3x8e_flash::flash::Config;
    ///
    /// let cfg: Config = Config::DEFAULT.set_uid_poll_limit(NonZeroU32::new(10_000));
    /// assert_eq!(cfg.uid_poll_limit(), NonZeroU32::new(10_000));
    /// ```
    #[must_use = "set_uid_poll_limit returns a modified Config"]
    pub const fn set_uid_poll_limit(mut self, limit: Option<NonZeroU32>) -> Self {
        self.uid_poll_limit = limit;
        self
    }

    /// Poll limit of the unique identifier sequence.
    #[must_use]
    pub const fn uid_poll_limit(&self) -> Option<NonZeroU32> {
        self.uid_poll_limit
    }
}

/// Check that `len` bytes starting at `addr` are within one bank, and that
/// `addr` is word aligned.
pub(crate) fn check_span(addr: u32, len: u32) -> Result<Bank, Error> {
    if addr % 4 != 0 {
        return Err(Error::InvalidAddress);
    }
    let bank: Bank = Bank::from_addr(addr).ok_or(Error::InvalidAddress)?;
    match addr.checked_add(len) {
        Some(end) if end <= bank.end() => Ok(bank),
        _ => Err(Error::InvalidAddress),
    }
}

/// Flash driver.
///
/// Owns the command interface, a one page staging buffer, and the unique
/// identifier and descriptor caches.
///
/// The wait states and access mode of both controllers are captured on
/// creation and restored when this struct is dropped.
#[derive(Debug)]
pub struct Flash<B: Bus> {
    pub(crate) efc: Efc<B>,
    saved: [ModeSnapshot; 2],
    pub(crate) cfg: Config,
    pub(crate) uid: Option<Uid>,
    pub(crate) descriptor: Option<(u32, Descriptor)>,
    page: [u8; mem::PAGE_SIZE as usize],
}

impl<B: Bus> Drop for Flash<B> {
    fn drop(&mut self) {
        for idx in [EfcIdx::Efc0, EfcIdx::Efc1] {
            self.efc.select(idx);
            self.efc.set_fmr(self.saved[idx as usize].to_fmr());
        }
    }
}

impl<B: Bus> Flash<B> {
    /// Create a new flash driver with the default configuration.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use sam3x8e_flash::{Flash, bus::Mmio};
    ///
    /// let mut flash = Flash::new(unsafe { Mmio::steal() });
    /// ```
    pub fn new(bus: B) -> Self {
        Self::with_config(bus, Config::DEFAULT)
    }

    /// Create a new flash driver.
    ///
    /// This saves the mode registers of both controllers, then programs them
    /// with the wait states and access mode from `cfg`.
    pub fn with_config(bus: B, cfg: Config) -> Self {
        let mut efc: Efc<B> = Efc::new(bus);

        let mut saved: [ModeSnapshot; 2] = [ModeSnapshot::from_fmr(0); 2];
        let fmr: u32 = ModeSnapshot {
            wait_states: cfg.wait_states,
            access_mode: cfg.access_mode,
        }
        .to_fmr();
        for idx in [EfcIdx::Efc0, EfcIdx::Efc1] {
            efc.select(idx);
            saved[idx as usize] = efc.snapshot();
            efc.set_fmr(fmr);
        }
        efc.select(EfcIdx::Efc0);

        if cfg.memfault {
            let shcsr: u32 = mem::SCB + mem::scb::SHCSR;
            let val: u32 = efc.bus_mut().read_u32(shcsr);
            efc.bus_mut().write_u32(shcsr, val | mem::scb::SHCSR_MEMFAULTENA);
        }

        debug!("flash saved {} {}", saved[0], saved[1]);

        Flash {
            efc,
            saved,
            cfg,
            uid: None,
            descriptor: None,
            page: [0xFF; mem::PAGE_SIZE as usize],
        }
    }

    /// Configuration in use.
    #[inline]
    pub fn config(&self) -> Config {
        self.cfg
    }

    /// Shared reference to the bus.
    #[inline]
    pub fn bus(&self) -> &B {
        self.efc.bus()
    }

    /// Command interface.
    #[inline]
    pub fn efc(&mut self) -> &mut Efc<B> {
        &mut self.efc
    }

    /// Select the active controller, `0` or `1`.
    ///
    /// Most operations select the controller from their address, this only
    /// matters for [`access_mode`](Self::access_mode),
    /// [`set_access_mode`](Self::set_access_mode), and
    /// [`unique_id`](Self::unique_id).
    pub fn select_controller(&mut self, idx: u8) -> Result<(), Error> {
        self.efc.select(EfcIdx::from_index(idx)?);
        Ok(())
    }

    /// Active controller.
    #[inline]
    pub fn controller(&self) -> EfcIdx {
        self.efc.active()
    }

    /// Access mode of the active controller.
    pub fn access_mode(&mut self) -> AccessMode {
        self.efc.access_mode()
    }

    /// Set the access mode of the active controller.
    pub fn set_access_mode(&mut self, mode: AccessMode) {
        self.efc.set_access_mode(mode)
    }

    /// Run `f` on the controller of `idx` with the program wait states,
    /// restoring the previous wait states afterwards.
    pub(crate) fn with_program_wait_states<T>(
        &mut self,
        idx: EfcIdx,
        f: impl FnOnce(&mut Self) -> Result<T, Error>,
    ) -> Result<T, Error> {
        self.efc.select(idx);
        let ws: u8 = self.efc.wait_states();
        self.efc.set_wait_states(PROGRAM_WAIT_STATES);
        let ret: Result<T, Error> = f(self);
        self.efc.select(idx);
        self.efc.set_wait_states(ws);
        ret
    }

    /// Write bytes to flash.
    ///
    /// Bytes within the affected pages but outside of `addr..addr + data.len()`
    /// keep their contents. Locked regions in the range are unlocked first.
    ///
    /// # Errors
    ///
    /// * [`Error::InvalidAddress`] if `addr` is not 4-byte aligned, not in
    ///   the flash memory, or the range crosses the end of the bank.
    ///   Nothing is written.
    /// * [`Error::Command`] if unlocking or programming a page fails, pages
    ///   before the failing one remain programmed.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use sam3x8e_flash::{Flash, bus::Mmio, flash::WriteOptions};
    ///
    /// let mut flash = Flash::new(unsafe { Mmio::steal() });
    /// flash.write(0x000F_F000, b"hello", WriteOptions::DEFAULT)?;
    /// # Ok::<(), sam3x8e_flash::Error>(())
    /// ```
    pub fn write(&mut self, addr: u32, data: &[u8], opts: WriteOptions) -> Result<(), Error> {
        let len: u32 = u32::try_from(data.len()).map_err(|_| Error::InvalidAddress)?;
        self.write_from(addr, len, data.iter().copied(), opts)
    }

    /// Write `len` bytes produced by `src`.
    ///
    /// Missing bytes are programmed as erased.
    pub(crate) fn write_from(
        &mut self,
        addr: u32,
        len: u32,
        src: impl Iterator<Item = u8>,
        opts: WriteOptions,
    ) -> Result<(), Error> {
        let bank: Bank = check_span(addr, len)?;
        if len == 0 {
            return Ok(());
        }

        let last: u32 = addr + (len - 1);
        let locked: u32 = self.is_locked(addr, last)?;
        if locked > 0 {
            debug!("unlocking {} regions for write at {:#x}", locked, addr);
            self.unlock(addr, last)?;
        }

        self.with_program_wait_states(bank.efc(), |flash| {
            flash.program(addr, len, src, opts.cmd())
        })
    }

    fn program(
        &mut self,
        addr: u32,
        len: u32,
        mut src: impl Iterator<Item = u8>,
        cmd: Cmd,
    ) -> Result<(), Error> {
        let mut page_addr: u32 = addr & !(Page::SIZE - 1);
        let mut offset: usize = (addr - page_addr) as usize;
        let mut remaining: usize = len as usize;

        while remaining > 0 {
            let page: Page = Page::from_addr(page_addr).ok_or(Error::InvalidAddress)?;
            let write_size: usize = core::cmp::min(Page::SIZE as usize - offset, remaining);
            let window: Range<usize> = offset..offset + write_size;

            for n in 0..self.page.len() {
                self.page[n] = if window.contains(&n) {
                    src.next().unwrap_or(0xFF)
                } else {
                    self.efc.bus_mut().read_u8(page_addr + n as u32)
                };
            }

            // fill the latch buffer, any address in the page selects it
            for (n, w) in self.page.chunks_exact(4).enumerate() {
                let word: u32 = u32::from_le_bytes([w[0], w[1], w[2], w[3]]);
                self.efc.bus_mut().write_u32(page_addr + (n as u32) * 4, word);
            }

            trace!(
                "page {} offset {} size {}",
                page.to_index(),
                offset,
                write_size
            );
            self.efc.command(cmd, page.index_in_bank())?;

            remaining -= write_size;
            offset = 0;
            page_addr += Page::SIZE;
        }

        Ok(())
    }

    /// Erase the bank containing `addr`.
    ///
    /// # Errors
    ///
    /// * [`Error::InvalidAddress`] if `addr` is not in the flash memory.
    /// * [`Error::Command`] with the lock error flag if a region of the bank
    ///   is locked.
    pub fn erase_bank(&mut self, addr: u32) -> Result<(), Error> {
        let bank: Bank = Bank::from_addr(addr).ok_or(Error::InvalidAddress)?;
        warn!("erasing bank {}", bank as u8);
        self.with_program_wait_states(bank.efc(), |flash| flash.efc.command(Cmd::Ea, 0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        efc::{Fcr, Status},
        sim::{Event, SimBus},
    };

    const PAGE: u32 = 0x000C_1000;

    #[test]
    fn check_span_bounds() {
        assert_eq!(check_span(mem::FLASH_START, 0), Ok(Bank::Bank0));
        assert_eq!(check_span(mem::FLASH1_START - 4, 4), Ok(Bank::Bank0));
        assert_eq!(check_span(mem::FLASH1_START - 4, 5), Err(Error::InvalidAddress));
        assert_eq!(check_span(mem::LAST_PAGE_ADDR, 256), Ok(Bank::Bank1));
        assert_eq!(check_span(mem::FLASH_END, 0), Err(Error::InvalidAddress));
        assert_eq!(check_span(mem::FLASH_START - 4, 4), Err(Error::InvalidAddress));
        assert_eq!(check_span(mem::FLASH_START + 2, 4), Err(Error::InvalidAddress));
        assert_eq!(check_span(mem::LAST_PAGE_ADDR, u32::MAX), Err(Error::InvalidAddress));
    }

    #[test]
    fn construction_and_drop_restore_mode() {
        let mut sim: SimBus = SimBus::new();
        sim.set_fmr(EfcIdx::Efc0, 0x0100_0300);
        sim.set_fmr(EfcIdx::Efc1, 0x0000_0200);

        let flash = Flash::new(&mut sim);
        assert_eq!(flash.controller(), EfcIdx::Efc0);
        drop(flash);

        assert_eq!(
            &sim.events()[..3],
            [
                Event::ModeWrite {
                    efc: EfcIdx::Efc0,
                    fmr: 0x0000_0600
                },
                Event::ModeWrite {
                    efc: EfcIdx::Efc1,
                    fmr: 0x0000_0600
                },
                Event::RegWrite {
                    addr: 0xE000_ED24,
                    val: 1 << 16
                },
            ]
            .as_slice()
        );
        assert_eq!(sim.fmr(EfcIdx::Efc0), 0x0100_0300);
        assert_eq!(sim.fmr(EfcIdx::Efc1), 0x0000_0200);
    }

    #[test]
    fn config_applied() {
        let mut sim: SimBus = SimBus::new();
        let cfg: Config = Config::DEFAULT
            .set_wait_states(3)
            .set_access_mode(AccessMode::Bits64)
            .set_memfault(false);
        let mut flash = Flash::with_config(&mut sim, cfg);
        flash.select_controller(1).unwrap();
        assert_eq!(flash.access_mode(), AccessMode::Bits64);
        assert_eq!(flash.efc().wait_states(), 3);
        assert_eq!(flash.select_controller(2), Err(Error::InvalidArgument));
        assert_eq!(flash.controller(), EfcIdx::Efc1);
        drop(flash);

        assert!(
            !sim.events()
                .iter()
                .any(|ev| matches!(ev, Event::RegWrite { .. }))
        );
    }

    #[test]
    fn unaligned_write_touches_nothing() {
        let mut sim: SimBus = SimBus::new();
        let mut flash = Flash::new(&mut sim);
        flash.efc().bus_mut().clear_events();
        for addr in (mem::FLASH_START..mem::FLASH_END).step_by(0x1_0001).filter(|a| a % 4 != 0) {
            assert_eq!(
                flash.write(addr, &[0; 8], WriteOptions::DEFAULT),
                Err(Error::InvalidAddress)
            );
        }
        assert!(flash.bus().events().is_empty());
    }

    #[test]
    fn out_of_range_write() {
        let mut sim: SimBus = SimBus::new();
        let mut flash = Flash::new(&mut sim);
        flash.efc().bus_mut().clear_events();
        assert_eq!(flash.write(0x0007_FFFC, &[1], WriteOptions::DEFAULT), Err(Error::InvalidAddress));
        assert_eq!(flash.write(mem::FLASH_END, &[1], WriteOptions::DEFAULT), Err(Error::InvalidAddress));
        assert_eq!(
            flash.write(mem::FLASH1_START - 4, &[1; 8], WriteOptions::DEFAULT),
            Err(Error::InvalidAddress)
        );
        assert_eq!(flash.write(PAGE, &[], WriteOptions::DEFAULT), Ok(()));
        assert!(flash.bus().events().is_empty());
    }

    #[test]
    fn merge_keeps_surrounding_bytes() {
        let mut sim: SimBus = SimBus::new();
        let before: [u8; 256] = core::array::from_fn(|n| n as u8);
        sim.load(PAGE, &before);

        let mut flash = Flash::new(&mut sim);
        flash.write(PAGE + 12, &[0xA0, 0xA1, 0xA2], WriteOptions::DEFAULT).unwrap();
        drop(flash);

        let after: &[u8] = sim.flash(PAGE, 256);
        assert_eq!(&after[..12], &before[..12]);
        assert_eq!(&after[12..15], &[0xA0, 0xA1, 0xA2]);
        assert_eq!(&after[15..], &before[15..]);
    }

    #[test]
    fn merge_across_page_boundary() {
        let mut sim: SimBus = SimBus::new();
        let before: [u8; 512] = core::array::from_fn(|n| !(n as u8));
        sim.load(PAGE, &before);

        let mut flash = Flash::new(&mut sim);
        flash.efc().bus_mut().clear_events();
        flash.write(PAGE + 252, &[0; 8], WriteOptions::DEFAULT).unwrap();
        drop(flash);

        let after: &[u8] = sim.flash(PAGE, 512);
        assert_eq!(&after[..252], &before[..252]);
        assert_eq!(&after[252..260], &[0; 8]);
        assert_eq!(&after[260..], &before[260..]);
        assert_eq!(
            sim.commands(),
            [
                (EfcIdx::Efc1, Fcr::new(Cmd::Glb, 0)),
                (EfcIdx::Efc1, Fcr::new(Cmd::Ewp, 16)),
                (EfcIdx::Efc1, Fcr::new(Cmd::Ewp, 17)),
            ]
            .as_slice()
        );
    }

    #[test]
    fn write_options_select_command() {
        let mut sim: SimBus = SimBus::new();
        let mut flash = Flash::new(&mut sim);
        let opts: WriteOptions = WriteOptions {
            erase: false,
            lock: true,
        };
        flash.write(mem::FLASH_START, &[0; 4], opts).unwrap();
        drop(flash);

        assert_eq!(sim.count(Cmd::Wpl), 0);
        assert_eq!(sim.count(Cmd::Wp), 1);
        assert_eq!(sim.locks(EfcIdx::Efc0), 0);
    }

    #[test]
    fn erase_and_lock_locks_region() {
        let mut sim: SimBus = SimBus::new();
        let mut flash = Flash::new(&mut sim);
        let opts: WriteOptions = WriteOptions {
            erase: true,
            lock: true,
        };
        flash.write(PAGE, &[1, 2, 3, 4], opts).unwrap();
        drop(flash);

        assert_eq!(sim.count(Cmd::Ewpl), 1);
        assert_eq!(sim.locks(EfcIdx::Efc1), 1);
        assert_eq!(sim.flash(PAGE, 4), &[1, 2, 3, 4]);
    }

    #[test]
    fn write_unlocks_locked_region() {
        let mut sim: SimBus = SimBus::new();
        sim.set_locks(EfcIdx::Efc1, 1);

        let mut flash = Flash::new(&mut sim);
        flash.write(PAGE, &[1, 2, 3, 4], WriteOptions::DEFAULT).unwrap();
        drop(flash);

        assert_eq!(sim.locks(EfcIdx::Efc1), 0);
        assert_eq!(sim.count(Cmd::Clb), 1);
        assert_eq!(sim.flash(PAGE, 4), &[1, 2, 3, 4]);
    }

    #[test]
    fn failed_unlock_is_returned() {
        let mut sim: SimBus = SimBus::new();
        sim.set_locks(EfcIdx::Efc1, 1);
        // GLB succeeds, CLB fails
        sim.fail_command(1, Status::FCMDE);

        let mut flash = Flash::new(&mut sim);
        assert_eq!(
            flash.write(PAGE, &[1, 2, 3, 4], WriteOptions::DEFAULT),
            Err(Error::Command(Status::from_bits(Status::FCMDE)))
        );
        drop(flash);

        assert_eq!(sim.count(Cmd::Ewp), 0);
    }

    #[test]
    fn failure_restores_wait_states() {
        let mut sim: SimBus = SimBus::new();
        let cfg: Config = Config::DEFAULT.set_wait_states(2);
        // GLB, first page, second page fails
        sim.fail_command(2, Status::FLOCKE);

        let mut flash = Flash::with_config(&mut sim, cfg);
        assert_eq!(
            flash.write(PAGE, &[0x55; 600], WriteOptions::DEFAULT),
            Err(Error::Command(Status::from_bits(Status::FLOCKE)))
        );
        assert_eq!(flash.efc().wait_states(), 2);
        drop(flash);

        assert_eq!(sim.count(Cmd::Ewp), 2);
        assert_eq!(sim.flash(PAGE, 256), &[0x55; 256]);
        assert_eq!(sim.flash(PAGE + 256, 256), &[0xFF; 256]);
    }

    #[test]
    fn erase_bank() {
        let mut sim: SimBus = SimBus::new();
        sim.load(mem::FLASH1_START, &[0; 16]);
        sim.load(mem::FLASH_START, &[0; 16]);

        let mut flash = Flash::new(&mut sim);
        assert_eq!(flash.erase_bank(0x20), Err(Error::InvalidAddress));
        flash.erase_bank(mem::FLASH1_START + 0x100).unwrap();
        drop(flash);

        assert_eq!(sim.flash(mem::FLASH1_START, 16), &[0xFF; 16]);
        assert_eq!(sim.flash(mem::FLASH_START, 16), &[0; 16]);
    }
}
