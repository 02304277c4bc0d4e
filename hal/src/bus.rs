//! Register and memory access
//!
//! Every hardware access of this crate goes through the [`Bus`] trait.
//! [`Mmio`] is the implementation for the chip, the `sim` feature adds a
//! host simulator.

use crate::{
    efc::{Cmd, Fcr, Status},
    mem,
};

cfg_if::cfg_if! {
    if #[cfg(all(target_arch = "arm", target_os = "none"))] {
        #[inline(always)]
        fn sync() {
            cortex_m::asm::dsb();
            cortex_m::asm::isb();
        }

        #[inline(always)]
        fn critical<R>(f: impl FnOnce() -> R) -> R {
            cortex_m::interrupt::free(|_| f())
        }

        // plain loads and stores, these must not become calls
        #[inline(always)]
        unsafe fn ld(addr: u32) -> u32 {
            let val: u32;
            unsafe {
                core::arch::asm!(
                    "ldr {val}, [{addr}]",
                    addr = in(reg) addr,
                    val = lateout(reg) val,
                    options(nostack, preserves_flags)
                )
            };
            val
        }

        #[inline(always)]
        unsafe fn st(addr: u32, val: u32) {
            unsafe {
                core::arch::asm!(
                    "str {val}, [{addr}]",
                    addr = in(reg) addr,
                    val = in(reg) val,
                    options(nostack, preserves_flags)
                )
            }
        }
    } else {
        // host builds, only used by doc examples that never run
        #[inline(always)]
        fn sync() {
            core::sync::atomic::fence(core::sync::atomic::Ordering::SeqCst)
        }

        #[inline(always)]
        fn critical<R>(f: impl FnOnce() -> R) -> R {
            f()
        }

        #[inline(always)]
        unsafe fn ld(addr: u32) -> u32 {
            unsafe { core::ptr::read_volatile(addr as usize as *const u32) }
        }

        #[inline(always)]
        unsafe fn st(addr: u32, val: u32) {
            unsafe { core::ptr::write_volatile(addr as usize as *mut u32, val) }
        }
    }
}

const STUI: u32 = Fcr::new(Cmd::Stui, 0).bits();
const SPUI: u32 = Fcr::new(Cmd::Spui, 0).bits();

/// Unique identifier window on the chip.
///
/// Between the start and the stop command the bank returns the identifier
/// instead of its contents, so this runs from RAM and only does raw loads
/// and stores. `limit` of zero polls forever.
#[inline(never)]
#[cfg_attr(target_os = "none", unsafe(link_section = ".data.ramfunc"))]
unsafe fn uid_window(efc_base: u32, bank_base: u32, limit: u32) -> Option<[u32; 4]> {
    let fcr: u32 = efc_base + mem::efc::FCR;
    let fsr: u32 = efc_base + mem::efc::FSR;

    unsafe { st(fcr, STUI) };
    let mut polls: u32 = 0;
    let mut started: bool = true;
    while unsafe { ld(fsr) } & Status::FRDY != 0 {
        polls = polls.wrapping_add(1);
        if limit != 0 && polls == limit {
            started = false;
            break;
        }
    }

    let mut words: [u32; 4] = [0; 4];
    if started {
        words[0] = unsafe { ld(bank_base) };
        words[1] = unsafe { ld(bank_base.wrapping_add(4)) };
        words[2] = unsafe { ld(bank_base.wrapping_add(8)) };
        words[3] = unsafe { ld(bank_base.wrapping_add(12)) };
    }

    unsafe { st(fcr, SPUI) };
    let mut polls: u32 = 0;
    let mut stopped: bool = true;
    while unsafe { ld(fsr) } & Status::FRDY == 0 {
        polls = polls.wrapping_add(1);
        if limit != 0 && polls == limit {
            stopped = false;
            break;
        }
    }

    if started && stopped { Some(words) } else { None }
}

/// Signature of the in-application programming routine in ROM.
///
/// Arguments are the controller index and the flash command word, the return
/// value is the controller status register after the command completed.
pub type IapFn = unsafe extern "C" fn(u32, u32) -> u32;

/// Entry point of the in-application programming (IAP) routine.
///
/// This can only be obtained from [`Iap::resolve`], which reads the entry
/// point stored in ROM at [`mem::IAP_ENTRY`].
#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Iap(u32);

impl Iap {
    /// Read the IAP entry point from ROM.
    ///
    /// The value is only meaningful on an ATSAM3X8E, behavior is undefined
    /// on any other chip.
    pub fn resolve<B: Bus>(bus: &mut B) -> Self {
        let entry: u32 = bus.read_u32(mem::IAP_ENTRY);
        trace!("IAP entry {:#x}", entry);
        Iap(entry)
    }

    /// Address of the IAP routine.
    pub const fn addr(&self) -> u32 {
        self.0
    }
}

/// Access to the memory and peripherals used by this crate.
///
/// # Safety
///
/// Implementations must perform the accesses they are asked to, at the
/// addresses they are given. Higher layers rely on this to keep the flash
/// contents and controller state consistent.
pub unsafe trait Bus {
    /// Read a byte.
    fn read_u8(&mut self, addr: u32) -> u8;

    /// Read a word, `addr` must be 4-byte aligned.
    fn read_u32(&mut self, addr: u32) -> u32;

    /// Write a word, `addr` must be 4-byte aligned.
    fn write_u32(&mut self, addr: u32, val: u32);

    /// Run a flash command through the IAP routine and return the status.
    fn call_iap(&mut self, iap: Iap, efc_index: u32, fcr: u32) -> u32;

    /// Data and instruction synchronization barrier.
    fn barrier(&mut self);

    /// Read the unique identifier of the bank at `bank_base` through the
    /// controller at `efc_base`.
    ///
    /// Writes the start command, waits for the ready flag to clear, reads
    /// four words from the bank, writes the stop command, then waits for the
    /// ready flag to set. Each wait gives up after `limit` status reads, zero
    /// waits forever. The stop command is written even if the first wait
    /// gave up.
    ///
    /// Returns `None` if a wait gave up.
    ///
    /// Nothing may be fetched from the bank for the duration of the
    /// sequence, implementations for the chip must not execute from flash.
    fn read_unique_id(&mut self, efc_base: u32, bank_base: u32, limit: u32) -> Option<[u32; 4]> {
        let fcr: u32 = efc_base + mem::efc::FCR;
        let fsr: u32 = efc_base + mem::efc::FSR;
        let wait = |bus: &mut Self, ready: bool| -> bool {
            let mut polls: u32 = 0;
            while Status::from_bits(bus.read_u32(fsr)).ready() != ready {
                polls = polls.wrapping_add(1);
                if limit != 0 && polls == limit {
                    return false;
                }
            }
            true
        };

        self.write_u32(fcr, STUI);
        let words: Option<[u32; 4]> = if wait(self, false) {
            Some(core::array::from_fn(|n| self.read_u32(bank_base + 4 * n as u32)))
        } else {
            None
        };
        self.write_u32(fcr, SPUI);
        let stopped: bool = wait(self, true);
        words.filter(|_| stopped)
    }
}

unsafe impl<B: Bus + ?Sized> Bus for &mut B {
    #[inline(always)]
    fn read_u8(&mut self, addr: u32) -> u8 {
        (**self).read_u8(addr)
    }

    #[inline(always)]
    fn read_u32(&mut self, addr: u32) -> u32 {
        (**self).read_u32(addr)
    }

    #[inline(always)]
    fn write_u32(&mut self, addr: u32, val: u32) {
        (**self).write_u32(addr, val)
    }

    #[inline(always)]
    fn call_iap(&mut self, iap: Iap, efc_index: u32, fcr: u32) -> u32 {
        (**self).call_iap(iap, efc_index, fcr)
    }

    #[inline(always)]
    fn barrier(&mut self) {
        (**self).barrier()
    }

    #[inline(always)]
    fn read_unique_id(&mut self, efc_base: u32, bank_base: u32, limit: u32) -> Option<[u32; 4]> {
        (**self).read_unique_id(efc_base, bank_base, limit)
    }
}

/// Volatile memory mapped access on the chip.
#[derive(Debug)]
pub struct Mmio {
    _priv: (),
}

impl Mmio {
    /// Steal the memory mapped bus.
    ///
    /// # Safety
    ///
    /// 1. This must only be used on an ATSAM3X8E.
    /// 2. Nothing else may operate the flash controllers or the MPU while
    ///    the returned value is in use.
    pub const unsafe fn steal() -> Self {
        Mmio { _priv: () }
    }
}

unsafe impl Bus for Mmio {
    #[inline(always)]
    fn read_u8(&mut self, addr: u32) -> u8 {
        unsafe { core::ptr::read_volatile(addr as usize as *const u8) }
    }

    #[inline(always)]
    fn read_u32(&mut self, addr: u32) -> u32 {
        unsafe { core::ptr::read_volatile(addr as usize as *const u32) }
    }

    #[inline(always)]
    fn write_u32(&mut self, addr: u32, val: u32) {
        unsafe { core::ptr::write_volatile(addr as usize as *mut u32, val) }
    }

    #[inline(always)]
    fn call_iap(&mut self, iap: Iap, efc_index: u32, fcr: u32) -> u32 {
        // the ROM routine polls the controller until the command completes,
        // nothing may fetch from flash in the meantime
        let f: IapFn = unsafe { core::mem::transmute::<usize, IapFn>(iap.addr() as usize) };
        critical(|| unsafe { f(efc_index, fcr) })
    }

    #[inline(always)]
    fn barrier(&mut self) {
        sync()
    }

    fn read_unique_id(&mut self, efc_base: u32, bank_base: u32, limit: u32) -> Option<[u32; 4]> {
        // an interrupt would fetch its handler from flash
        critical(|| unsafe { uid_window(efc_base, bank_base, limit) })
    }
}
