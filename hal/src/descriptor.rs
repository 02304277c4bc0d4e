//! Flash descriptor
//!
//! Bank geometry as reported by the get flash descriptor (GETD) command.

use crate::{
    bus::Bus,
    efc::{Cmd, Error},
    flash::{Bank, Flash},
    mem,
};

/// Maximum number of result words read after a GETD command.
pub const MAX_WORDS: usize = 32;

/// Flash descriptor of one bank.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Descriptor {
    id: u32,
    size: u32,
    page_size: u32,
    region_count: u32,
    region_size: u32,
}

impl Descriptor {
    /// Parse the GETD result words.
    ///
    /// The layout is: flash ID, flash size, page size, number of planes,
    /// the size of each plane, number of lock regions, the size of each lock
    /// region.
    ///
    /// # Errors
    ///
    /// [`Error::Generic`] if the words end before the lock region count, or
    /// before the first lock region size when there is at least one region.
    ///
    /// # Example
    ///
    /// ```
    /// use sam3x8e_flash::descriptor::Descriptor;
    ///
    /// let desc: Descriptor =
    ///     Descriptor::from_words(&[0x10, 0x4_0000, 256, 1, 0x4_0000, 16, 0x4000])?;
    /// assert_eq!(desc.region_count(), 16);
    /// assert_eq!(desc.pages_per_region()?, 64);
    /// # Ok::<(), sam3x8e_flash::Error>(())
    /// ```
    pub fn from_words(words: &[u32]) -> Result<Descriptor, Error> {
        let word = |n: usize| words.get(n).copied().ok_or(Error::Generic);

        let planes: usize = word(3)? as usize;
        let locks: usize = 4usize.checked_add(planes).ok_or(Error::Generic)?;
        let region_count: u32 = word(locks)?;

        Ok(Descriptor {
            id: word(0)?,
            size: word(1)?,
            page_size: word(2)?,
            region_count,
            region_size: if region_count == 0 { 0 } else { word(locks + 1)? },
        })
    }

    /// Flash identifier.
    #[inline]
    pub const fn id(&self) -> u32 {
        self.id
    }

    /// Bank size in bytes.
    #[inline]
    pub const fn size(&self) -> u32 {
        self.size
    }

    /// Page size in bytes.
    #[inline]
    pub const fn page_size(&self) -> u32 {
        self.page_size
    }

    /// Number of lock regions.
    #[inline]
    pub const fn region_count(&self) -> u32 {
        self.region_count
    }

    /// Size of the first lock region in bytes.
    #[inline]
    pub const fn region_size(&self) -> u32 {
        self.region_size
    }

    /// Number of pages in the bank.
    ///
    /// Returns [`Error::Generic`] if the page size is zero.
    pub const fn page_count(&self) -> Result<u32, Error> {
        match self.size.checked_div(self.page_size) {
            Some(n) => Ok(n),
            None => Err(Error::Generic),
        }
    }

    /// Number of pages in a lock region.
    ///
    /// Returns [`Error::Generic`] if the page size is zero.
    pub const fn pages_per_region(&self) -> Result<u32, Error> {
        match self.region_size.checked_div(self.page_size) {
            Some(n) => Ok(n),
            None => Err(Error::Generic),
        }
    }
}

impl<B: Bus> Flash<B> {
    /// Flash descriptor of the bank containing `addr`.
    ///
    /// The last descriptor is cached together with the address it was
    /// requested for, asking again with the same address does not issue a
    /// command.
    ///
    /// # Errors
    ///
    /// * [`Error::InvalidAddress`] if `addr` is below the flash memory or
    ///   above the last page address.
    /// * [`Error::Command`] if the GETD command fails.
    /// * [`Error::Generic`] if the result words are truncated.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use sam3x8e_flash::{Flash, bus::Mmio};
    ///
    /// let mut flash = Flash::new(unsafe { Mmio::steal() });
    /// assert_eq!(flash.descriptor(0x0008_0000)?.page_size(), 256);
    /// # Ok::<(), sam3x8e_flash::Error>(())
    /// ```
    pub fn descriptor(&mut self, addr: u32) -> Result<Descriptor, Error> {
        if addr < mem::FLASH_START || addr > mem::LAST_PAGE_ADDR {
            return Err(Error::InvalidAddress);
        }
        if let Some((tag, desc)) = self.descriptor {
            if tag == addr {
                return Ok(desc);
            }
        }

        let bank: Bank = Bank::from_addr(addr).ok_or(Error::InvalidAddress)?;
        self.efc.select(bank.efc());
        self.efc.command(Cmd::Getd, 0)?;

        let mut words: [u32; MAX_WORDS] = [0; MAX_WORDS];
        let mut len: usize = 0;
        while len < MAX_WORDS {
            let word: u32 = self.efc.result();
            if word == 0 {
                break;
            }
            words[len] = word;
            len += 1;
        }

        let desc: Descriptor = Descriptor::from_words(&words[..len])?;
        debug!("descriptor {:#x} {}", addr, desc);
        self.descriptor = Some((addr, desc));
        Ok(desc)
    }

    /// Flash identifier of the bank containing `addr`.
    pub fn flash_id(&mut self, addr: u32) -> Result<u32, Error> {
        Ok(self.descriptor(addr)?.id())
    }

    /// Size in bytes of the bank containing `addr`.
    pub fn flash_size(&mut self, addr: u32) -> Result<u32, Error> {
        Ok(self.descriptor(addr)?.size())
    }

    /// Page size in bytes of the bank containing `addr`.
    pub fn page_size(&mut self, addr: u32) -> Result<u32, Error> {
        Ok(self.descriptor(addr)?.page_size())
    }

    /// Number of lock regions of the bank containing `addr`.
    pub fn region_count(&mut self, addr: u32) -> Result<u32, Error> {
        Ok(self.descriptor(addr)?.region_count())
    }

    /// Lock region size in bytes of the bank containing `addr`.
    pub fn region_size(&mut self, addr: u32) -> Result<u32, Error> {
        Ok(self.descriptor(addr)?.region_size())
    }

    /// Number of pages of the bank containing `addr`.
    pub fn page_count(&mut self, addr: u32) -> Result<u32, Error> {
        self.descriptor(addr)?.page_count()
    }

    /// Number of pages per lock region of the bank containing `addr`.
    pub fn pages_per_region(&mut self, addr: u32) -> Result<u32, Error> {
        self.descriptor(addr)?.pages_per_region()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        efc::{EfcIdx, Fcr, Status},
        sim::SimBus,
    };

    #[test]
    fn geometry() {
        let mut sim: SimBus = SimBus::new();
        let mut flash = Flash::new(&mut sim);
        let addr: u32 = mem::FLASH_START + 0x100;
        assert_eq!(flash.flash_id(addr), Ok(SimBus::DESCRIPTOR_ID));
        assert_eq!(flash.flash_size(addr), Ok(mem::BANK_SIZE));
        assert_eq!(flash.page_size(addr), Ok(mem::PAGE_SIZE));
        assert_eq!(flash.region_count(addr), Ok(mem::LOCK_REGIONS_PER_BANK));
        assert_eq!(flash.region_size(addr), Ok(mem::LOCK_REGION_SIZE));
        assert_eq!(flash.page_count(addr), Ok(mem::PAGES_PER_BANK));
        assert_eq!(flash.pages_per_region(addr), Ok(mem::PAGES_PER_LOCK_REGION));
        drop(flash);

        assert_eq!(sim.count(Cmd::Getd), 1);
    }

    #[test]
    fn single_entry_cache() {
        let mut sim: SimBus = SimBus::new();
        let mut flash = Flash::new(&mut sim);
        let a: u32 = mem::FLASH_START;
        let b: u32 = mem::FLASH1_START;
        flash.descriptor(a).unwrap();
        flash.descriptor(a).unwrap();
        flash.descriptor(b).unwrap();
        flash.descriptor(b).unwrap();
        // same bank, different tag
        flash.descriptor(b + 4).unwrap();
        flash.descriptor(a).unwrap();
        drop(flash);

        assert_eq!(
            sim.commands(),
            [
                (EfcIdx::Efc0, Fcr::new(Cmd::Getd, 0)),
                (EfcIdx::Efc1, Fcr::new(Cmd::Getd, 0)),
                (EfcIdx::Efc1, Fcr::new(Cmd::Getd, 0)),
                (EfcIdx::Efc0, Fcr::new(Cmd::Getd, 0)),
            ]
            .as_slice()
        );
    }

    #[test]
    fn address_bounds() {
        let mut sim: SimBus = SimBus::new();
        let mut flash = Flash::new(&mut sim);
        assert!(flash.descriptor(mem::LAST_PAGE_ADDR).is_ok());
        assert_eq!(flash.descriptor(mem::LAST_PAGE_ADDR + 1), Err(Error::InvalidAddress));
        assert_eq!(flash.descriptor(mem::FLASH_START - 1), Err(Error::InvalidAddress));
        assert_eq!(flash.page_count(mem::FLASH_END), Err(Error::InvalidAddress));
    }

    #[test]
    fn command_failure() {
        let mut sim: SimBus = SimBus::new();
        sim.fail_command(0, Status::FCMDE);
        let mut flash = Flash::new(&mut sim);
        assert_eq!(
            flash.descriptor(mem::FLASH_START),
            Err(Error::Command(Status::from_bits(Status::FCMDE)))
        );
        // failures are not cached
        assert!(flash.descriptor(mem::FLASH_START).is_ok());
    }

    #[test]
    fn parse() {
        assert_eq!(Descriptor::from_words(&[1, 2, 3]), Err(Error::Generic));
        assert_eq!(Descriptor::from_words(&[1, 2, 3, 2, 8, 8]), Err(Error::Generic));
        assert_eq!(Descriptor::from_words(&[1, 2, 3, 1, 2, 4]), Err(Error::Generic));

        let desc: Descriptor = Descriptor::from_words(&[1, 0x100, 0, 1, 0x100, 0]).unwrap();
        assert_eq!(desc.region_count(), 0);
        assert_eq!(desc.region_size(), 0);
        assert_eq!(desc.page_count(), Err(Error::Generic));
        assert_eq!(desc.pages_per_region(), Err(Error::Generic));
    }
}
