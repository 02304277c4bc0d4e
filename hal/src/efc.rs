//! Enhanced embedded flash controller (EEFC) command layer
//!
//! Each flash bank has its own controller. Commands are issued through the
//! in-application programming routine in ROM, which writes the command
//! register and waits for completion from outside the flash array.

use crate::{
    bus::{Bus, Iap},
    mem,
};

// flash mode register (FMR) fields
mod fmr {
    pub const FWS_SHIFT: u32 = 8;
    pub const FWS_MASK: u32 = 0xF << FWS_SHIFT;
    pub const SCOD: u32 = 1 << 16;
    pub const FAM: u32 = 1 << 24;
}

/// Protection key, must be present in the upper byte of every command.
pub const KEY: u32 = 0x5A;

/// Flash commands.
#[repr(u8)]
#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Cmd {
    /// Get flash descriptor.
    Getd = 0x00,
    /// Write page.
    Wp = 0x01,
    /// Write page and lock.
    Wpl = 0x02,
    /// Erase page and write page.
    Ewp = 0x03,
    /// Erase page, write page, then lock.
    Ewpl = 0x04,
    /// Erase all.
    Ea = 0x05,
    /// Set lock bit.
    Slb = 0x08,
    /// Clear lock bit.
    Clb = 0x09,
    /// Get lock bits.
    Glb = 0x0A,
    /// Set GPNVM bit.
    Sgpb = 0x0B,
    /// Clear GPNVM bit.
    Cgpb = 0x0C,
    /// Get GPNVM bits.
    Ggpb = 0x0D,
    /// Start read unique identifier.
    Stui = 0x0E,
    /// Stop read unique identifier.
    Spui = 0x0F,
    /// Get calibration bits.
    Gcalb = 0x10,
}

impl Cmd {
    /// Command opcode.
    pub const fn opcode(self) -> u8 {
        self as u8
    }

    /// Decode an opcode.
    ///
    /// # Example
    ///
    /// ```
    /// use sam3x8e_flash::efc::Cmd;
    ///
    /// assert_eq!(Cmd::from_opcode(0x03), Some(Cmd::Ewp));
    /// assert_eq!(Cmd::from_opcode(0x06), None);
    /// ```
    pub const fn from_opcode(op: u8) -> Option<Cmd> {
        Some(match op {
            0x00 => Cmd::Getd,
            0x01 => Cmd::Wp,
            0x02 => Cmd::Wpl,
            0x03 => Cmd::Ewp,
            0x04 => Cmd::Ewpl,
            0x05 => Cmd::Ea,
            0x08 => Cmd::Slb,
            0x09 => Cmd::Clb,
            0x0A => Cmd::Glb,
            0x0B => Cmd::Sgpb,
            0x0C => Cmd::Cgpb,
            0x0D => Cmd::Ggpb,
            0x0E => Cmd::Stui,
            0x0F => Cmd::Spui,
            0x10 => Cmd::Gcalb,
            _ => return None,
        })
    }

    /// Page programming command for the given erase and lock options.
    ///
    /// Locking is only combined with erasure, without it the page is
    /// programmed with [`Cmd::Wp`] and its region keeps its lock state.
    pub const fn write_page(erase: bool, lock: bool) -> Cmd {
        match (erase, lock) {
            (true, true) => Cmd::Ewpl,
            (true, false) => Cmd::Ewp,
            (false, _) => Cmd::Wp,
        }
    }
}

/// Flash command register (FCR) value.
///
/// Layout is `[argument:16][key:8][opcode:8]` from the most significant bit,
/// with the key in bits 24 to 31.
///
/// # Example
///
/// ```
/// use sam3x8e_flash::efc::{Cmd, Fcr};
///
/// let fcr: Fcr = Fcr::new(Cmd::Ewp, 3);
/// assert_eq!(fcr.bits(), 0x5A00_0303);
/// assert_eq!(fcr.cmd(), Some(Cmd::Ewp));
/// assert_eq!(fcr.arg(), 3);
/// ```
#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Fcr(u32);

impl Fcr {
    /// Pack a command and its argument with the protection key.
    pub const fn new(cmd: Cmd, arg: u16) -> Fcr {
        Fcr((KEY << 24) | ((arg as u32) << 8) | (cmd.opcode() as u32))
    }

    /// Create from a raw register value.
    pub const fn from_bits(bits: u32) -> Fcr {
        Fcr(bits)
    }

    /// Raw register value.
    pub const fn bits(&self) -> u32 {
        self.0
    }

    /// Protection key field.
    pub const fn key(&self) -> u8 {
        (self.0 >> 24) as u8
    }

    /// Command argument field.
    pub const fn arg(&self) -> u16 {
        (self.0 >> 8) as u16
    }

    /// Command field, `None` for unknown opcodes.
    pub const fn cmd(&self) -> Option<Cmd> {
        Cmd::from_opcode(self.0 as u8)
    }
}

/// Flash status register (FSR) value.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Status(u32);

impl Status {
    /// Flash ready, the controller accepts a new command.
    pub const FRDY: u32 = 1 << 0;
    /// Flash command error, bad key or invalid command.
    pub const FCMDE: u32 = 1 << 1;
    /// Flash lock error, programming or erasure of a locked region.
    pub const FLOCKE: u32 = 1 << 2;

    const ERR_MASK: u32 = Self::FCMDE | Self::FLOCKE;

    /// Create from a raw register value.
    pub const fn from_bits(bits: u32) -> Status {
        Status(bits)
    }

    /// Raw register value.
    pub const fn bits(&self) -> u32 {
        self.0
    }

    /// Returns `true` if the ready flag is set.
    pub const fn ready(&self) -> bool {
        self.0 & Self::FRDY != 0
    }

    /// Only the error flags of this status.
    ///
    /// # Example
    ///
    /// ```
    /// use sam3x8e_flash::efc::Status;
    ///
    /// let st: Status = Status::from_bits(Status::FRDY | Status::FLOCKE);
    /// assert_eq!(st.errors().bits(), Status::FLOCKE);
    /// assert!(st.is_err());
    /// assert!(!Status::from_bits(Status::FRDY).is_err());
    /// ```
    pub const fn errors(&self) -> Status {
        Status(self.0 & Self::ERR_MASK)
    }

    /// Returns `true` if an error flag is set.
    pub const fn is_err(&self) -> bool {
        self.0 & Self::ERR_MASK != 0
    }

    /// Returns `true` if the command error flag is set.
    pub const fn cmd_err(&self) -> bool {
        self.0 & Self::FCMDE != 0
    }

    /// Returns `true` if the lock error flag is set.
    pub const fn lock_err(&self) -> bool {
        self.0 & Self::FLOCKE != 0
    }
}

/// Flash errors.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// Invalid address.
    ///
    /// The address is outside of the flash memory, the range crosses the end
    /// of a bank, or the address does not meet the alignment requirement.
    InvalidAddress,
    /// Invalid argument.
    ///
    /// A controller, MPU region, or size class is out of range.
    InvalidArgument,
    /// The controller rejected a command.
    ///
    /// Contains the error flags of the status register.
    Command(Status),
    /// A command completed but its result is unusable.
    Generic,
    /// The ready flag did not change within the configured poll limit.
    Timeout,
}

impl From<Status> for Error {
    fn from(st: Status) -> Self {
        Error::Command(st.errors())
    }
}

/// Flash controller index.
#[repr(u8)]
#[derive(Debug, PartialEq, Eq, Clone, Copy, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum EfcIdx {
    /// Controller of bank 0.
    Efc0 = 0,
    /// Controller of bank 1.
    Efc1 = 1,
}

impl EfcIdx {
    /// Create from a raw index.
    ///
    /// # Example
    ///
    /// ```
    /// use sam3x8e_flash::{Error, efc::EfcIdx};
    ///
    /// assert_eq!(EfcIdx::from_index(1), Ok(EfcIdx::Efc1));
    /// assert_eq!(EfcIdx::from_index(2), Err(Error::InvalidArgument));
    /// ```
    pub const fn from_index(idx: u8) -> Result<EfcIdx, Error> {
        match idx {
            0 => Ok(EfcIdx::Efc0),
            1 => Ok(EfcIdx::Efc1),
            _ => Err(Error::InvalidArgument),
        }
    }

    /// Controller responsible for a flash address.
    ///
    /// Addresses below bank 1 map to controller 0.
    pub const fn from_addr(addr: u32) -> EfcIdx {
        if addr >= mem::FLASH1_START {
            EfcIdx::Efc1
        } else {
            EfcIdx::Efc0
        }
    }

    /// Raw index.
    pub const fn index(self) -> u8 {
        self as u8
    }

    /// Register block base address.
    pub const fn base(self) -> u32 {
        match self {
            EfcIdx::Efc0 => mem::EFC0,
            EfcIdx::Efc1 => mem::EFC1,
        }
    }

    /// Base address of the flash bank this controller operates.
    pub const fn bank_base(self) -> u32 {
        match self {
            EfcIdx::Efc0 => mem::FLASH_START,
            EfcIdx::Efc1 => mem::FLASH1_START,
        }
    }
}

/// Flash access mode.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AccessMode {
    /// 128-bit access, optimized for performance.
    Bits128,
    /// 64-bit access, optimized for power consumption.
    Bits64,
}

/// Wait states and access mode of one controller.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub(crate) struct ModeSnapshot {
    pub(crate) wait_states: u8,
    pub(crate) access_mode: AccessMode,
}

impl ModeSnapshot {
    pub(crate) const fn from_fmr(fmr: u32) -> ModeSnapshot {
        ModeSnapshot {
            wait_states: ((fmr & fmr::FWS_MASK) >> fmr::FWS_SHIFT) as u8,
            access_mode: if fmr & fmr::FAM != 0 {
                AccessMode::Bits64
            } else {
                AccessMode::Bits128
            },
        }
    }

    /// Mode register value holding only the saved fields.
    pub(crate) const fn to_fmr(self) -> u32 {
        let fam: u32 = match self.access_mode {
            AccessMode::Bits128 => 0,
            AccessMode::Bits64 => fmr::FAM,
        };
        fam | (((self.wait_states as u32) << fmr::FWS_SHIFT) & fmr::FWS_MASK)
    }
}

/// Flash controller command interface.
///
/// Commands go to the *active* controller, which is changed with
/// [`select`](Efc::select).
#[derive(Debug)]
pub struct Efc<B> {
    bus: B,
    iap: Iap,
    active: EfcIdx,
}

impl<B: Bus> Efc<B> {
    /// Create a new command interface.
    ///
    /// This resolves the IAP entry point once, controller 0 is active.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use sam3x8e_flash::{bus::Mmio, efc::Efc};
    ///
    /// let mut efc = Efc::new(unsafe { Mmio::steal() });
    /// ```
    pub fn new(mut bus: B) -> Self {
        let iap: Iap = Iap::resolve(&mut bus);
        Efc {
            bus,
            iap,
            active: EfcIdx::Efc0,
        }
    }

    /// Select the active controller.
    #[inline]
    pub fn select(&mut self, idx: EfcIdx) {
        self.active = idx;
    }

    /// Select the controller responsible for a flash address.
    #[inline]
    pub fn select_for_addr(&mut self, addr: u32) -> EfcIdx {
        self.active = EfcIdx::from_addr(addr);
        self.active
    }

    /// Active controller.
    #[inline]
    pub fn active(&self) -> EfcIdx {
        self.active
    }

    /// IAP entry point resolved at construction.
    #[inline]
    pub fn iap(&self) -> Iap {
        self.iap
    }

    /// Run a command on the active controller.
    ///
    /// Returns the error flags of the resulting status, the ready flag is
    /// masked out. No validation of the command or argument is performed.
    pub fn dispatch(&mut self, cmd: Cmd, arg: u16) -> Status {
        let fcr: Fcr = Fcr::new(cmd, arg);
        let st: Status = Status::from_bits(self.bus.call_iap(
            self.iap,
            u32::from(self.active.index()),
            fcr.bits(),
        ))
        .errors();
        trace!(
            "EFC{} {} arg={} status={:#x}",
            self.active.index(),
            cmd,
            arg,
            st.bits()
        );
        st
    }

    /// Run a command on the active controller, converting error flags into
    /// [`Error::Command`].
    pub fn command(&mut self, cmd: Cmd, arg: u16) -> Result<(), Error> {
        let st: Status = self.dispatch(cmd, arg);
        if st.is_err() {
            debug!("EFC{} {} failed {:#x}", self.active.index(), cmd, st.bits());
            Err(Error::Command(st))
        } else {
            Ok(())
        }
    }

    /// Read the result register of the active controller.
    #[inline]
    pub fn result(&mut self) -> u32 {
        self.bus.read_u32(self.active.base() + mem::efc::FRR)
    }

    /// Read the status register of the active controller.
    ///
    /// Reading clears the error flags in hardware.
    #[inline]
    pub fn status(&mut self) -> Status {
        Status::from_bits(self.bus.read_u32(self.active.base() + mem::efc::FSR))
    }

    /// Write the command register of the active controller directly,
    /// bypassing the IAP routine.
    ///
    /// This does not wait for completion.
    #[inline]
    pub fn write_fcr(&mut self, cmd: Cmd, arg: u16) {
        self.bus
            .write_u32(self.active.base() + mem::efc::FCR, Fcr::new(cmd, arg).bits())
    }

    /// Read the mode register of the active controller.
    #[inline]
    pub fn fmr(&mut self) -> u32 {
        self.bus.read_u32(self.active.base() + mem::efc::FMR)
    }

    /// Write the mode register of the active controller.
    #[inline]
    pub fn set_fmr(&mut self, fmr: u32) {
        self.bus.write_u32(self.active.base() + mem::efc::FMR, fmr)
    }

    /// Flash wait states of the active controller.
    pub fn wait_states(&mut self) -> u8 {
        ModeSnapshot::from_fmr(self.fmr()).wait_states
    }

    /// Set the flash wait states of the active controller.
    ///
    /// Values above 15 are truncated to the 4-bit field.
    #[inline(never)]
    #[cfg_attr(target_os = "none", unsafe(link_section = ".data.ramfunc"))]
    pub fn set_wait_states(&mut self, ws: u8) {
        let fmr: u32 = self.fmr();
        self.set_fmr((fmr & !fmr::FWS_MASK) | ((u32::from(ws) << fmr::FWS_SHIFT) & fmr::FWS_MASK))
    }

    /// Access mode of the active controller.
    pub fn access_mode(&mut self) -> AccessMode {
        ModeSnapshot::from_fmr(self.fmr()).access_mode
    }

    /// Set the access mode of the active controller.
    #[inline(never)]
    #[cfg_attr(target_os = "none", unsafe(link_section = ".data.ramfunc"))]
    pub fn set_access_mode(&mut self, mode: AccessMode) {
        let fmr: u32 = self.fmr();
        self.set_fmr(match mode {
            AccessMode::Bits128 => fmr & !fmr::FAM,
            AccessMode::Bits64 => fmr | fmr::FAM,
        })
    }

    /// Set or clear the sequential code optimization disable bit.
    pub(crate) fn set_scod(&mut self, disable: bool) {
        let fmr: u32 = self.fmr();
        self.set_fmr(if disable {
            fmr | fmr::SCOD
        } else {
            fmr & !fmr::SCOD
        })
    }

    pub(crate) fn snapshot(&mut self) -> ModeSnapshot {
        ModeSnapshot::from_fmr(self.fmr())
    }

    /// Shared reference to the bus.
    #[inline]
    pub fn bus(&self) -> &B {
        &self.bus
    }

    /// Mutable reference to the bus.
    #[inline]
    pub fn bus_mut(&mut self) -> &mut B {
        &mut self.bus
    }
}
