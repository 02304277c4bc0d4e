//! Host simulation of the flash controllers
//!
//! [`SimBus`] implements [`Bus`] on a host, modeling both flash banks and
//! their controllers closely enough to run the driver unmodified. Every
//! command and register access of interest is recorded in an event log.
//!
//! ```
//! use sam3x8e_flash::{Flash, sim::SimBus};
//!
//! let mut sim: SimBus = SimBus::new();
//! let mut flash = Flash::new(&mut sim);
//! flash.write(0x000C_0000, &[1, 2, 3, 4], Default::default())?;
//! drop(flash);
//!
//! assert_eq!(sim.flash(0x000C_0000, 4), &[1, 2, 3, 4]);
//! # Ok::<(), sam3x8e_flash::Error>(())
//! ```

use crate::{
    bus::{Bus, Iap},
    efc::{Cmd, EfcIdx, Fcr, KEY, Status},
    mem,
};
use std::{collections::HashMap, collections::VecDeque, vec::Vec};

/// Recorded bus activity.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash)]
pub enum Event {
    /// Command issued through the IAP routine.
    Command {
        /// Controller index passed to the routine.
        efc: EfcIdx,
        /// Command word.
        fcr: Fcr,
    },
    /// Direct write of a command register.
    FcrWrite {
        /// Controller written.
        efc: EfcIdx,
        /// Command word.
        fcr: Fcr,
    },
    /// Read of a status register.
    StatusRead {
        /// Controller read.
        efc: EfcIdx,
        /// Value of the ready flag returned.
        ready: bool,
    },
    /// Word read from the unique identifier window.
    UidRead {
        /// Word index within the identifier.
        index: usize,
    },
    /// Write of a mode register.
    ModeWrite {
        /// Controller written.
        efc: EfcIdx,
        /// Value written.
        fmr: u32,
    },
    /// Write of a register outside the flash controllers.
    RegWrite {
        /// Register address.
        addr: u32,
        /// Value written.
        val: u32,
    },
    /// Synchronization barrier.
    Barrier,
}

#[derive(Debug, Clone, Copy)]
struct PendingReady {
    ready: bool,
    polls: u32,
}

#[derive(Debug, Default)]
struct Ctrl {
    fmr: u32,
    errors: u32,
    ready: bool,
    pending: Option<PendingReady>,
    results: VecDeque<u32>,
    locks: u32,
    uid_mode: bool,
    latch: Vec<u32>,
}

/// Simulated ATSAM3X8E flash, flash controllers, and system registers.
#[derive(Debug)]
pub struct SimBus {
    flash: Vec<u8>,
    ctrl: [Ctrl; 2],
    gpnvm: u32,
    uid: [u32; 4],
    rom_entry: u32,
    regs: HashMap<u32, u32>,
    events: Vec<Event>,
    fail: Option<(usize, u32)>,
    stall: bool,
    ready_delay: u32,
}

const LATCH_WORDS: usize = (mem::PAGE_SIZE / 4) as usize;

impl Default for SimBus {
    fn default() -> Self {
        Self::new()
    }
}

impl SimBus {
    /// Flash identifier returned by the get descriptor command.
    pub const DESCRIPTOR_ID: u32 = 0x0000_0010;

    /// Unique identifier of a new simulator.
    pub const DEFAULT_UID: [u32; 4] = [0x3334_3550, 0x3531_3031, 0x3832_3030, 0x4431_3438];

    /// Value stored in ROM at the IAP entry word.
    pub const ROM_ENTRY: u32 = 0x0010_0081;

    /// Number of GPNVM bits.
    pub const GPNVM_BITS: u32 = 3;

    /// Create a simulator with erased flash, no locked regions, and all GPNVM
    /// bits clear.
    pub fn new() -> Self {
        let mut regs: HashMap<u32, u32> = HashMap::new();
        // 8 data regions, unified
        regs.insert(mem::MPU + mem::mpu::TYPE, 0x0000_0800);
        SimBus {
            flash: vec![0xFF; (mem::FLASH_END - mem::FLASH_START) as usize],
            ctrl: [Ctrl::new(), Ctrl::new()],
            gpnvm: 0,
            uid: Self::DEFAULT_UID,
            rom_entry: Self::ROM_ENTRY,
            regs,
            events: Vec::new(),
            fail: None,
            stall: false,
            ready_delay: 0,
        }
    }

    /// Set the unique identifier.
    pub fn set_uid(&mut self, uid: [u32; 4]) {
        self.uid = uid;
    }

    /// Recorded events, oldest first.
    pub fn events(&self) -> &[Event] {
        &self.events
    }

    /// Discard the recorded events.
    pub fn clear_events(&mut self) {
        self.events.clear()
    }

    /// Commands issued through the IAP routine, oldest first.
    pub fn commands(&self) -> Vec<(EfcIdx, Fcr)> {
        self.events
            .iter()
            .filter_map(|ev| match ev {
                Event::Command { efc, fcr } => Some((*efc, *fcr)),
                _ => None,
            })
            .collect()
    }

    /// Number of IAP commands with the given opcode.
    pub fn count(&self, cmd: Cmd) -> usize {
        self.commands()
            .iter()
            .filter(|(_, fcr)| fcr.cmd() == Some(cmd))
            .count()
    }

    /// Flash contents.
    ///
    /// # Panics
    ///
    /// Panics if the range is not within the flash memory.
    pub fn flash(&self, addr: u32, len: usize) -> &[u8] {
        let start: usize = Self::flash_offset(addr);
        &self.flash[start..start + len]
    }

    /// Overwrite flash contents without going through a controller.
    ///
    /// # Panics
    ///
    /// Panics if the range is not within the flash memory.
    pub fn load(&mut self, addr: u32, data: &[u8]) {
        let start: usize = Self::flash_offset(addr);
        self.flash[start..start + data.len()].copy_from_slice(data)
    }

    /// Mode register of a controller.
    pub fn fmr(&self, efc: EfcIdx) -> u32 {
        self.ctrl[efc as usize].fmr
    }

    /// Set the mode register of a controller without recording an event.
    pub fn set_fmr(&mut self, efc: EfcIdx, fmr: u32) {
        self.ctrl[efc as usize].fmr = fmr
    }

    /// Lock bits of a bank, bit `n` is region `n` of that bank.
    pub fn locks(&self, efc: EfcIdx) -> u32 {
        self.ctrl[efc as usize].locks
    }

    /// Set the lock bits of a bank.
    pub fn set_locks(&mut self, efc: EfcIdx, locks: u32) {
        self.ctrl[efc as usize].locks = locks
    }

    /// GPNVM bits.
    pub fn gpnvm(&self) -> u32 {
        self.gpnvm
    }

    /// Set the GPNVM bits.
    pub fn set_gpnvm(&mut self, bits: u32) {
        self.gpnvm = bits
    }

    /// Value of a system register, `0` if never written.
    pub fn reg(&self, addr: u32) -> u32 {
        self.regs.get(&addr).copied().unwrap_or(0)
    }

    /// Returns `true` if a controller is in unique identifier mode.
    pub fn uid_mode(&self, efc: EfcIdx) -> bool {
        self.ctrl[efc as usize].uid_mode
    }

    /// Fail an upcoming IAP command.
    ///
    /// `skip` commands execute normally, the following one has no effect and
    /// returns the `errors` status flags.
    pub fn fail_command(&mut self, skip: usize, errors: u32) {
        self.fail = Some((skip, errors))
    }

    /// Keep the ready flag set after a start unique identifier command.
    pub fn stall_ready(&mut self, stall: bool) {
        self.stall = stall
    }

    /// Delay ready flag transitions by `polls` status register reads.
    pub fn set_ready_delay(&mut self, polls: u32) {
        self.ready_delay = polls
    }

    fn flash_offset(addr: u32) -> usize {
        assert!(
            (mem::FLASH_START..mem::FLASH_END).contains(&addr),
            "address {addr:#x} is not in flash"
        );
        (addr - mem::FLASH_START) as usize
    }

    fn ctrl_for_reg(addr: u32) -> Option<(EfcIdx, u32)> {
        [EfcIdx::Efc0, EfcIdx::Efc1]
            .into_iter()
            .find(|idx| (idx.base()..idx.base() + 0x10).contains(&addr))
            .map(|idx| (idx, addr - idx.base()))
    }

    fn is_flash(addr: u32) -> bool {
        (mem::FLASH_START..mem::FLASH_END).contains(&addr)
    }

    fn uid_word(&mut self, addr: u32) -> Option<u32> {
        let efc: EfcIdx = EfcIdx::from_addr(addr);
        if self.ctrl[efc as usize].uid_mode {
            let index: usize = (((addr - efc.bank_base()) / 4) % 4) as usize;
            Some(self.uid[index])
        } else {
            None
        }
    }

    fn read_status(&mut self, efc: EfcIdx) -> u32 {
        let ctrl: &mut Ctrl = &mut self.ctrl[efc as usize];
        if let Some(mut pending) = ctrl.pending.take() {
            if pending.polls == 0 {
                ctrl.ready = pending.ready;
            } else {
                pending.polls -= 1;
                ctrl.pending = Some(pending);
            }
        }
        let ready: bool = ctrl.ready;
        let fsr: u32 = (if ready { Status::FRDY } else { 0 }) | ctrl.errors;
        ctrl.errors = 0;
        self.events.push(Event::StatusRead { efc, ready });
        fsr
    }

    fn write_fcr(&mut self, efc: EfcIdx, fcr: Fcr) {
        self.events.push(Event::FcrWrite { efc, fcr });
        let errors: u32 = if u32::from(fcr.key()) != KEY {
            Status::FCMDE
        } else {
            match fcr.cmd() {
                Some(Cmd::Stui) => {
                    let ctrl: &mut Ctrl = &mut self.ctrl[efc as usize];
                    ctrl.uid_mode = true;
                    if !self.stall {
                        ctrl.pending = Some(PendingReady {
                            ready: false,
                            polls: self.ready_delay,
                        });
                    }
                    0
                }
                Some(Cmd::Spui) => {
                    let ctrl: &mut Ctrl = &mut self.ctrl[efc as usize];
                    ctrl.uid_mode = false;
                    ctrl.pending = Some(PendingReady {
                        ready: true,
                        polls: self.ready_delay,
                    });
                    0
                }
                _ => self.exec(efc, fcr),
            }
        };
        self.ctrl[efc as usize].errors |= errors;
    }

    fn exec(&mut self, efc: EfcIdx, fcr: Fcr) -> u32 {
        if u32::from(fcr.key()) != KEY {
            return Status::FCMDE;
        }
        let Some(cmd) = fcr.cmd() else {
            return Status::FCMDE;
        };
        let arg: u32 = u32::from(fcr.arg());
        let region: u32 = arg / mem::PAGES_PER_LOCK_REGION;
        let idx: usize = efc as usize;

        match cmd {
            Cmd::Getd => {
                let ctrl: &mut Ctrl = &mut self.ctrl[idx];
                ctrl.results.clear();
                ctrl.results.extend([
                    Self::DESCRIPTOR_ID,
                    mem::BANK_SIZE,
                    mem::PAGE_SIZE,
                    1,
                    mem::BANK_SIZE,
                    mem::LOCK_REGIONS_PER_BANK,
                ]);
                ctrl.results.extend(
                    core::iter::repeat(mem::LOCK_REGION_SIZE)
                        .take(mem::LOCK_REGIONS_PER_BANK as usize),
                );
                0
            }
            Cmd::Wp | Cmd::Wpl | Cmd::Ewp | Cmd::Ewpl => {
                if arg >= mem::PAGES_PER_BANK {
                    return Status::FCMDE;
                }
                if self.ctrl[idx].locks & (1 << region) != 0 {
                    return Status::FLOCKE;
                }
                let erase: bool = matches!(cmd, Cmd::Ewp | Cmd::Ewpl);
                let start: usize = Self::flash_offset(efc.bank_base() + arg * mem::PAGE_SIZE);
                let latch: Vec<u32> = core::mem::replace(
                    &mut self.ctrl[idx].latch,
                    vec![mem::ERASED_WORD; LATCH_WORDS],
                );
                for (n, word) in latch.iter().enumerate() {
                    let dst: &mut [u8] = &mut self.flash[start + n * 4..start + n * 4 + 4];
                    for (d, s) in dst.iter_mut().zip(word.to_le_bytes()) {
                        *d = if erase { s } else { *d & s };
                    }
                }
                if matches!(cmd, Cmd::Wpl | Cmd::Ewpl) {
                    self.ctrl[idx].locks |= 1 << region;
                }
                0
            }
            Cmd::Ea => {
                if self.ctrl[idx].locks != 0 {
                    return Status::FLOCKE;
                }
                let start: usize = Self::flash_offset(efc.bank_base());
                self.flash[start..start + mem::BANK_SIZE as usize].fill(0xFF);
                0
            }
            Cmd::Slb | Cmd::Clb => {
                if arg >= mem::PAGES_PER_BANK {
                    return Status::FCMDE;
                }
                if cmd == Cmd::Slb {
                    self.ctrl[idx].locks |= 1 << region;
                } else {
                    self.ctrl[idx].locks &= !(1 << region);
                }
                0
            }
            Cmd::Glb => {
                let ctrl: &mut Ctrl = &mut self.ctrl[idx];
                ctrl.results.clear();
                ctrl.results.push_back(ctrl.locks);
                0
            }
            // GPNVM bits are only reachable through controller 0
            Cmd::Ggpb if efc == EfcIdx::Efc0 => {
                let gpnvm: u32 = self.gpnvm;
                let ctrl: &mut Ctrl = &mut self.ctrl[idx];
                ctrl.results.clear();
                ctrl.results.push_back(gpnvm);
                0
            }
            Cmd::Sgpb | Cmd::Cgpb if efc == EfcIdx::Efc0 => {
                if arg >= Self::GPNVM_BITS {
                    return Status::FCMDE;
                }
                if cmd == Cmd::Sgpb {
                    self.gpnvm |= 1 << arg;
                } else {
                    self.gpnvm &= !(1 << arg);
                }
                0
            }
            Cmd::Gcalb => {
                let ctrl: &mut Ctrl = &mut self.ctrl[idx];
                ctrl.results.clear();
                ctrl.results.push_back(0);
                0
            }
            // the unique identifier sequence cannot run through the IAP routine
            Cmd::Stui | Cmd::Spui | Cmd::Ggpb | Cmd::Sgpb | Cmd::Cgpb => Status::FCMDE,
        }
    }
}

impl Ctrl {
    fn new() -> Self {
        Ctrl {
            ready: true,
            latch: vec![mem::ERASED_WORD; LATCH_WORDS],
            ..Default::default()
        }
    }
}

unsafe impl Bus for SimBus {
    fn read_u8(&mut self, addr: u32) -> u8 {
        if Self::is_flash(addr) {
            match self.uid_word(addr & !0b11) {
                Some(word) => word.to_le_bytes()[(addr & 0b11) as usize],
                None => self.flash[Self::flash_offset(addr)],
            }
        } else {
            self.read_u32(addr & !0b11).to_le_bytes()[(addr & 0b11) as usize]
        }
    }

    fn read_u32(&mut self, addr: u32) -> u32 {
        assert_eq!(addr % 4, 0, "unaligned word read {addr:#x}");
        if addr == mem::IAP_ENTRY {
            self.rom_entry
        } else if Self::is_flash(addr) {
            match self.uid_word(addr) {
                Some(word) => {
                    let index: usize = ((addr / 4) % 4) as usize;
                    self.events.push(Event::UidRead { index });
                    word
                }
                None => {
                    let start: usize = Self::flash_offset(addr);
                    let mut bytes: [u8; 4] = [0; 4];
                    bytes.copy_from_slice(&self.flash[start..start + 4]);
                    u32::from_le_bytes(bytes)
                }
            }
        } else if let Some((efc, offset)) = Self::ctrl_for_reg(addr) {
            match offset {
                mem::efc::FMR => self.ctrl[efc as usize].fmr,
                mem::efc::FSR => self.read_status(efc),
                mem::efc::FRR => self.ctrl[efc as usize].results.pop_front().unwrap_or(0),
                _ => 0,
            }
        } else {
            self.reg(addr)
        }
    }

    fn write_u32(&mut self, addr: u32, val: u32) {
        assert_eq!(addr % 4, 0, "unaligned word write {addr:#x}");
        if Self::is_flash(addr) {
            let efc: EfcIdx = EfcIdx::from_addr(addr);
            let n: usize = ((addr % mem::PAGE_SIZE) / 4) as usize;
            self.ctrl[efc as usize].latch[n] = val;
        } else if let Some((efc, offset)) = Self::ctrl_for_reg(addr) {
            match offset {
                mem::efc::FMR => {
                    self.ctrl[efc as usize].fmr = val;
                    self.events.push(Event::ModeWrite { efc, fmr: val });
                }
                mem::efc::FCR => self.write_fcr(efc, Fcr::from_bits(val)),
                _ => (),
            }
        } else {
            self.regs.insert(addr, val);
            self.events.push(Event::RegWrite { addr, val });
        }
    }

    fn call_iap(&mut self, iap: Iap, efc_index: u32, fcr: u32) -> u32 {
        assert_eq!(iap.addr(), self.rom_entry, "IAP entry not read from ROM");
        let efc: EfcIdx = match efc_index {
            0 => EfcIdx::Efc0,
            1 => EfcIdx::Efc1,
            _ => panic!("IAP called with controller index {efc_index}"),
        };
        let fcr: Fcr = Fcr::from_bits(fcr);
        self.events.push(Event::Command { efc, fcr });

        if let Some((skip, errors)) = self.fail {
            if skip == 0 {
                self.fail = None;
                return Status::FRDY | errors;
            }
            self.fail = Some((skip - 1, errors));
        }

        Status::FRDY | self.exec(efc, fcr)
    }

    fn barrier(&mut self) {
        self.events.push(Event::Barrier)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn iap(sim: &mut SimBus) -> Iap {
        Iap::resolve(sim)
    }

    #[test]
    fn erased_on_creation() {
        let mut sim: SimBus = SimBus::new();
        assert_eq!(sim.read_u32(mem::FLASH_START), mem::ERASED_WORD);
        assert_eq!(sim.read_u32(mem::LAST_PAGE_ADDR + 252), mem::ERASED_WORD);
        assert_eq!(sim.read_u8(mem::FLASH1_START + 3), 0xFF);
    }

    #[test]
    fn write_without_erase_clears_bits() {
        let mut sim: SimBus = SimBus::new();
        let iap: Iap = iap(&mut sim);
        sim.load(mem::FLASH_START, &[0x0F, 0xF0, 0xFF, 0x00]);
        sim.write_u32(mem::FLASH_START, 0x00FF_33FF);
        assert_eq!(sim.call_iap(iap, 0, Fcr::new(Cmd::Wp, 0).bits()), Status::FRDY);
        assert_eq!(sim.flash(mem::FLASH_START, 4), &[0x0F, 0x30, 0xFF, 0x00]);
        // latch is reset after programming
        assert_eq!(sim.flash(mem::FLASH_START + 4, 4), &[0xFF; 4]);
    }

    #[test]
    fn locked_region_rejects_programming() {
        let mut sim: SimBus = SimBus::new();
        let iap: Iap = iap(&mut sim);
        sim.set_locks(EfcIdx::Efc1, 1 << 2);
        assert_eq!(
            sim.call_iap(iap, 1, Fcr::new(Cmd::Ewp, 128).bits()),
            Status::FRDY | Status::FLOCKE
        );
        assert_eq!(sim.call_iap(iap, 1, Fcr::new(Cmd::Ewp, 127).bits()), Status::FRDY);
        assert_eq!(sim.call_iap(iap, 1, Fcr::new(Cmd::Ea, 0).bits()), Status::FRDY | Status::FLOCKE);
    }

    #[test]
    fn bad_key() {
        let mut sim: SimBus = SimBus::new();
        let iap: Iap = iap(&mut sim);
        assert_eq!(sim.call_iap(iap, 0, 0xA500_0008), Status::FRDY | Status::FCMDE);
        assert_eq!(sim.locks(EfcIdx::Efc0), 0);
    }

    #[test]
    fn gpnvm_only_on_controller_0() {
        let mut sim: SimBus = SimBus::new();
        let iap: Iap = iap(&mut sim);
        assert_eq!(sim.call_iap(iap, 1, Fcr::new(Cmd::Sgpb, 1).bits()), Status::FRDY | Status::FCMDE);
        assert_eq!(sim.call_iap(iap, 0, Fcr::new(Cmd::Sgpb, 1).bits()), Status::FRDY);
        assert_eq!(sim.call_iap(iap, 0, Fcr::new(Cmd::Sgpb, 3).bits()), Status::FRDY | Status::FCMDE);
        assert_eq!(sim.gpnvm(), 0b010);
    }

    #[test]
    fn injected_failure() {
        let mut sim: SimBus = SimBus::new();
        let iap: Iap = iap(&mut sim);
        sim.fail_command(1, Status::FLOCKE);
        assert_eq!(sim.call_iap(iap, 0, Fcr::new(Cmd::Slb, 0).bits()), Status::FRDY);
        assert_eq!(sim.call_iap(iap, 0, Fcr::new(Cmd::Slb, 64).bits()), Status::FRDY | Status::FLOCKE);
        assert_eq!(sim.call_iap(iap, 0, Fcr::new(Cmd::Slb, 64).bits()), Status::FRDY);
        assert_eq!(sim.locks(EfcIdx::Efc0), 0b11);
    }

    #[test]
    fn ready_delay() {
        let mut sim: SimBus = SimBus::new();
        sim.set_ready_delay(2);
        sim.write_u32(mem::EFC0 + mem::efc::FCR, Fcr::new(Cmd::Stui, 0).bits());
        let polls: Vec<bool> = (0..4)
            .map(|_| sim.read_u32(mem::EFC0 + mem::efc::FSR) & Status::FRDY != 0)
            .collect();
        assert_eq!(polls, [true, true, false, false]);
        assert!(sim.uid_mode(EfcIdx::Efc0));
        assert_eq!(sim.read_u32(mem::FLASH_START + 4), SimBus::DEFAULT_UID[1]);
        assert_eq!(sim.read_u32(mem::FLASH1_START + 4), mem::ERASED_WORD);
    }
}
