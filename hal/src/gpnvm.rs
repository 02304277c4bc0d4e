//! General purpose non-volatile memory (GPNVM) bits
//!
//! Three bits select security and boot configuration. They are only
//! reachable through controller 0.

use crate::{
    bus::Bus,
    efc::{Cmd, EfcIdx, Error},
    flash::Flash,
};

/// GPNVM bit.
#[repr(u8)]
#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Gpnvm {
    /// Security bit, disables external access to the flash.
    ///
    /// Only a full chip erase clears this bit.
    Security = 0,
    /// Boot mode selection, see [`BootMode`].
    BootMode = 1,
    /// Boot bank selection, see [`BootBank`].
    BootBank = 2,
}

impl Gpnvm {
    /// Bit index, the argument of GPNVM commands.
    pub const fn index(self) -> u8 {
        self as u8
    }
}

/// Boot source.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BootMode {
    /// Boot from ROM into the SAM-BA monitor.
    SamBa,
    /// Boot from flash.
    Flash,
}

/// Flash bank booted from when [`BootMode::Flash`] is selected.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BootBank {
    /// Bank 0.
    Flash0,
    /// Bank 1.
    Flash1,
}

impl<B: Bus> Flash<B> {
    /// Read a GPNVM bit.
    ///
    /// # Errors
    ///
    /// [`Error::Generic`] if the get GPNVM bits command fails.
    pub fn gpnvm(&mut self, bit: Gpnvm) -> Result<bool, Error> {
        self.efc.select(EfcIdx::Efc0);
        self.efc.command(Cmd::Ggpb, 0).map_err(|_| Error::Generic)?;
        Ok(self.efc.result() & (1 << bit.index()) != 0)
    }

    /// Set or clear a GPNVM bit.
    ///
    /// Nothing is written if the bit already has the requested value.
    ///
    /// # Errors
    ///
    /// [`Error::Command`] if the set or clear command fails.
    pub fn set_gpnvm(&mut self, bit: Gpnvm, val: bool) -> Result<(), Error> {
        if self.gpnvm(bit) == Ok(val) {
            return Ok(());
        }
        debug!("GPNVM{} <- {}", bit.index(), val);
        self.efc.select(EfcIdx::Efc0);
        let cmd: Cmd = if val { Cmd::Sgpb } else { Cmd::Cgpb };
        self.efc.command(cmd, u16::from(bit.index()))
    }

    /// Set the security bit.
    ///
    /// This cannot be undone with a GPNVM command.
    pub fn set_security_bit(&mut self) -> Result<(), Error> {
        self.set_gpnvm(Gpnvm::Security, true)
    }

    /// Returns `true` if the security bit is set.
    pub fn security_bit(&mut self) -> Result<bool, Error> {
        self.gpnvm(Gpnvm::Security)
    }

    /// Boot into the SAM-BA monitor on the next reset.
    pub fn set_boot_mode_samba(&mut self) -> Result<(), Error> {
        self.set_gpnvm(Gpnvm::BootMode, false)
    }

    /// Boot from flash on the next reset.
    pub fn set_boot_mode_flash(&mut self) -> Result<(), Error> {
        self.set_gpnvm(Gpnvm::BootMode, true)
    }

    /// Boot source selected for the next reset.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use sam3x8e_flash::{Flash, bus::Mmio, gpnvm::BootMode};
    ///
    /// let mut flash = Flash::new(unsafe { Mmio::steal() });
    /// if flash.boot_mode()? == BootMode::SamBa {
    ///     flash.set_boot_mode_flash()?;
    /// }
    /// # Ok::<(), sam3x8e_flash::Error>(())
    /// ```
    pub fn boot_mode(&mut self) -> Result<BootMode, Error> {
        Ok(if self.gpnvm(Gpnvm::BootMode)? {
            BootMode::Flash
        } else {
            BootMode::SamBa
        })
    }

    /// Boot from bank 0 on the next reset.
    pub fn set_boot_flash0(&mut self) -> Result<(), Error> {
        self.set_gpnvm(Gpnvm::BootBank, false)
    }

    /// Boot from bank 1 on the next reset.
    pub fn set_boot_flash1(&mut self) -> Result<(), Error> {
        self.set_gpnvm(Gpnvm::BootBank, true)
    }

    /// Flash bank selected for the next reset.
    pub fn boot_bank(&mut self) -> Result<BootBank, Error> {
        Ok(if self.gpnvm(Gpnvm::BootBank)? {
            BootBank::Flash1
        } else {
            BootBank::Flash0
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        efc::{Fcr, Status},
        sim::SimBus,
    };

    #[test]
    fn boot_configuration() {
        let mut sim: SimBus = SimBus::new();
        let mut flash = Flash::new(&mut sim);
        assert_eq!(flash.boot_mode(), Ok(BootMode::SamBa));
        assert_eq!(flash.boot_bank(), Ok(BootBank::Flash0));

        flash.set_boot_mode_flash().unwrap();
        flash.set_boot_flash1().unwrap();
        assert_eq!(flash.boot_mode(), Ok(BootMode::Flash));
        assert_eq!(flash.boot_bank(), Ok(BootBank::Flash1));
        assert_eq!(flash.security_bit(), Ok(false));

        flash.set_boot_mode_samba().unwrap();
        flash.set_boot_flash0().unwrap();
        drop(flash);

        assert_eq!(sim.gpnvm(), 0);
    }

    #[test]
    fn security_bit() {
        let mut sim: SimBus = SimBus::new();
        let mut flash = Flash::new(&mut sim);
        flash.set_security_bit().unwrap();
        assert_eq!(flash.security_bit(), Ok(true));
        drop(flash);

        assert_eq!(sim.gpnvm(), 0b001);
    }

    #[test]
    fn unchanged_bit_not_written() {
        let mut sim: SimBus = SimBus::new();
        sim.set_gpnvm(0b010);
        let mut flash = Flash::new(&mut sim);
        flash.set_boot_mode_flash().unwrap();
        flash.set_boot_flash0().unwrap();
        drop(flash);

        assert_eq!(sim.count(Cmd::Ggpb), 2);
        assert_eq!(sim.count(Cmd::Sgpb) + sim.count(Cmd::Cgpb), 0);
    }

    #[test]
    fn always_controller_0() {
        let mut sim: SimBus = SimBus::new();
        let mut flash = Flash::new(&mut sim);
        flash.select_controller(1).unwrap();
        flash.set_boot_flash1().unwrap();
        drop(flash);

        assert_eq!(
            sim.commands(),
            [
                (EfcIdx::Efc0, Fcr::new(Cmd::Ggpb, 0)),
                (EfcIdx::Efc0, Fcr::new(Cmd::Sgpb, 2)),
            ]
            .as_slice()
        );
    }

    #[test]
    fn getter_failure_is_generic() {
        let mut sim: SimBus = SimBus::new();
        sim.fail_command(0, Status::FCMDE);
        let mut flash = Flash::new(&mut sim);
        assert_eq!(flash.boot_bank(), Err(Error::Generic));
    }

    #[test]
    fn setter_after_failed_read() {
        let mut sim: SimBus = SimBus::new();
        // GGPB fails, SGPB still issued
        sim.fail_command(0, Status::FCMDE);
        let mut flash = Flash::new(&mut sim);
        flash.set_boot_mode_flash().unwrap();
        drop(flash);

        assert_eq!(sim.gpnvm(), 0b010);
    }

    #[test]
    fn setter_failure() {
        let mut sim: SimBus = SimBus::new();
        sim.fail_command(1, Status::FLOCKE);
        let mut flash = Flash::new(&mut sim);
        assert_eq!(
            flash.set_boot_flash1(),
            Err(Error::Command(Status::from_bits(Status::FLOCKE)))
        );
    }
}
