//! Memory protection unit (PMSAv7)
//!
//! Region configuration for the Cortex-M3 MPU, 8 regions.

use crate::{bus::Bus, efc::Error, mem};

/// Number of MPU regions.
pub const NUM_REGIONS: u8 = 8;

// RBAR fields
const RBAR_VALID: u32 = 1 << 4;

// RASR fields
const RASR_ENABLE: u32 = 1 << 0;

// CTRL fields
const CTRL_ENABLE: u32 = 1 << 0;
const CTRL_PRIVDEFENA: u32 = 1 << 2;

/// Access permissions.
#[repr(u8)]
#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AccessPermission {
    /// No access.
    NoAccess = 0b000,
    /// Privileged read-write, unprivileged no access.
    PrivilegedReadWrite = 0b001,
    /// Privileged read-write, unprivileged read-only.
    UnprivilegedReadOnly = 0b010,
    /// Full access.
    ReadWrite = 0b011,
    /// Privileged read-only, unprivileged no access.
    PrivilegedReadOnly = 0b101,
    /// Read-only.
    ReadOnly = 0b110,
}

/// Size class of a region `size` bytes large.
///
/// A size class `n` covers `2^(n + 1)` bytes. Returns `None` if `size` is
/// not a power of two, or smaller than 32 bytes.
///
/// # Example
///
/// ```
/// use sam3x8e_flash::mpu::size_class;
///
/// assert_eq!(size_class(32), Some(4));
/// assert_eq!(size_class(256 * 1024), Some(17));
/// assert_eq!(size_class(48), None);
/// ```
pub const fn size_class(size: u32) -> Option<u8> {
    if size < 32 || !size.is_power_of_two() {
        None
    } else {
        Some((size.trailing_zeros() - 1) as u8)
    }
}

/// MPU region settings.
///
/// # Example
///
/// Make the second flash bank read-only and not executable.
///
/// ```
/// use sam3x8e_flash::mpu::{AccessPermission, Region, size_class};
///
/// let region: Region = Region::new(1, 0x000C_0000, 17)
///     .set_ap(AccessPermission::ReadOnly)
///     .set_xn(true);
/// assert_eq!(size_class(256 * 1024), Some(region.size()));
/// assert_eq!(region.rbar(), 0x000C_0011);
/// assert_eq!(region.rasr(), 0x1600_0023);
/// ```
#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Region {
    index: u8,
    base: u32,
    size: u8,
    srd: u8,
    tex: u8,
    c: bool,
    b: bool,
    s: bool,
    ap: AccessPermission,
    xn: bool,
}

impl Region {
    /// Create a region with no access, strongly ordered memory attributes,
    /// and execution allowed.
    ///
    /// `size` is the size class, see [`size_class`].
    pub const fn new(index: u8, base: u32, size: u8) -> Self {
        Region {
            index,
            base,
            size,
            srd: 0,
            tex: 0,
            c: false,
            b: false,
            s: false,
            ap: AccessPermission::NoAccess,
            xn: false,
        }
    }

    /// Region number.
    #[must_use]
    pub const fn index(&self) -> u8 {
        self.index
    }

    /// Base address.
    #[must_use]
    pub const fn base(&self) -> u32 {
        self.base
    }

    /// Size class.
    #[must_use]
    pub const fn size(&self) -> u8 {
        self.size
    }

    /// Set the sub-region disable bits.
    #[must_use = "set_srd returns a modified Region"]
    pub const fn set_srd(mut self, srd: u8) -> Self {
        self.srd = srd;
        self
    }

    /// Set the type extension field, truncated to 3 bits.
    #[must_use = "set_tex returns a modified Region"]
    pub const fn set_tex(mut self, tex: u8) -> Self {
        self.tex = tex & 0b111;
        self
    }

    /// Set the cacheable bit.
    #[must_use = "set_cacheable returns a modified Region"]
    pub const fn set_cacheable(mut self, c: bool) -> Self {
        self.c = c;
        self
    }

    /// Set the bufferable bit.
    #[must_use = "set_bufferable returns a modified Region"]
    pub const fn set_bufferable(mut self, b: bool) -> Self {
        self.b = b;
        self
    }

    /// Set the shareable bit.
    #[must_use = "set_shareable returns a modified Region"]
    pub const fn set_shareable(mut self, s: bool) -> Self {
        self.s = s;
        self
    }

    /// Set the access permissions.
    #[must_use = "set_ap returns a modified Region"]
    pub const fn set_ap(mut self, ap: AccessPermission) -> Self {
        self.ap = ap;
        self
    }

    /// Set the execute never bit.
    #[must_use = "set_xn returns a modified Region"]
    pub const fn set_xn(mut self, xn: bool) -> Self {
        self.xn = xn;
        self
    }

    const fn check(&self) -> Result<(), Error> {
        if self.index >= NUM_REGIONS || self.size < 4 || self.size > 31 {
            Err(Error::InvalidArgument)
        } else {
            Ok(())
        }
    }

    /// Region base address register value.
    ///
    /// The base address is masked to the region size, the region number is
    /// selected with the valid bit.
    ///
    /// Only meaningful for a region accepted by [`Mpu::configure_region`].
    pub const fn rbar(&self) -> u32 {
        let mask: u32 = u32::MAX << (self.size.saturating_sub(4) & 31);
        (((self.base >> 5) & mask) << 5) | RBAR_VALID | (self.index as u32 & 0xF)
    }

    /// Region attribute and size register value, with the region enabled.
    pub const fn rasr(&self) -> u32 {
        RASR_ENABLE
            | ((self.size as u32 & 0x1F) << 1)
            | ((self.srd as u32) << 8)
            | ((self.b as u32) << 16)
            | ((self.c as u32) << 17)
            | ((self.s as u32) << 18)
            | ((self.tex as u32) << 19)
            | ((self.ap as u32) << 24)
            | ((self.xn as u32) << 28)
    }
}

/// Memory protection unit driver.
#[derive(Debug)]
pub struct Mpu<B> {
    bus: B,
}

impl<B: Bus> Mpu<B> {
    /// Create a new MPU driver.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use sam3x8e_flash::{bus::Mmio, mpu::Mpu};
    ///
    /// let mut mpu = Mpu::new(unsafe { Mmio::steal() });
    /// ```
    pub fn new(bus: B) -> Self {
        Mpu { bus }
    }

    /// Free the bus from the MPU driver.
    pub fn free(self) -> B {
        self.bus
    }

    /// Number of data regions reported by the type register.
    pub fn regions(&mut self) -> u8 {
        (self.bus.read_u32(mem::MPU + mem::mpu::TYPE) >> 8) as u8
    }

    /// Configure and enable a region, then enable the MPU with the default
    /// memory map as background region for privileged accesses.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidArgument`] if the region number is greater than 7 or
    /// the size class is outside of `4..=31`. Nothing is written.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use sam3x8e_flash::{
    ///     bus::Mmio,
    ///     mpu::{AccessPermission, Mpu, Region},
    /// };
    ///
    /// let mut mpu = Mpu::new(unsafe { Mmio::steal() });
    /// mpu.configure_region(&Region::new(0, 0x000C_0000, 17).set_ap(AccessPermission::ReadOnly))?;
    /// # Ok::<(), sam3x8e_flash::Error>(())
    /// ```
    pub fn configure_region(&mut self, region: &Region) -> Result<(), Error> {
        region.check()?;
        debug!(
            "MPU region {} base={:#x} size={}",
            region.index, region.base, region.size
        );
        self.bus.barrier();
        self.bus.write_u32(mem::MPU + mem::mpu::RBAR, region.rbar());
        self.bus.write_u32(mem::MPU + mem::mpu::RASR, region.rasr());
        self.bus
            .write_u32(mem::MPU + mem::mpu::CTRL, CTRL_ENABLE | CTRL_PRIVDEFENA);
        Ok(())
    }

    /// Enable the MemManage fault exception.
    pub fn enable_memfault(&mut self) {
        let shcsr: u32 = mem::SCB + mem::scb::SHCSR;
        let val: u32 = self.bus.read_u32(shcsr);
        self.bus.write_u32(shcsr, val | mem::scb::SHCSR_MEMFAULTENA)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{Event, SimBus};

    #[test]
    fn rbar_masks_base_to_size() {
        assert_eq!(Region::new(3, 0x2007_0123, 4).rbar(), 0x2007_0120 | 0x10 | 3);
        assert_eq!(Region::new(0, 0x2007_0123, 9).rbar(), 0x2007_0000 | 0x10);
        assert_eq!(Region::new(7, 0xFFFF_FFFF, 31).rbar(), 0x17);
        assert_eq!(Region::new(2, 0x000C_1234, 17).rbar(), 0x000C_0012);
    }

    #[test]
    fn rasr_fields() {
        let region: Region = Region::new(0, 0, 4)
            .set_srd(0xA5)
            .set_tex(0b1001)
            .set_cacheable(true)
            .set_bufferable(true)
            .set_shareable(true)
            .set_ap(AccessPermission::PrivilegedReadOnly)
            .set_xn(true);
        assert_eq!(
            region.rasr(),
            1 | (4 << 1) | (0xA5 << 8) | (1 << 16) | (1 << 17) | (1 << 18) | (1 << 19) | (0b101 << 24) | (1 << 28)
        );
        assert_eq!(Region::new(0, 0, 31).rasr(), 1 | (31 << 1));
    }

    #[test]
    fn configure_order() {
        let mut sim: SimBus = SimBus::new();
        let mut mpu = Mpu::new(&mut sim);
        assert_eq!(mpu.regions(), 8);
        let region: Region = Region::new(1, 0x000C_0000, 17).set_ap(AccessPermission::ReadOnly);
        mpu.configure_region(&region).unwrap();
        drop(mpu);

        assert_eq!(
            sim.events(),
            [
                Event::Barrier,
                Event::RegWrite {
                    addr: 0xE000_ED9C,
                    val: region.rbar()
                },
                Event::RegWrite {
                    addr: 0xE000_EDA0,
                    val: region.rasr()
                },
                Event::RegWrite {
                    addr: 0xE000_ED94,
                    val: 0b101
                },
            ]
            .as_slice()
        );
    }

    #[test]
    fn invalid_arguments() {
        let mut sim: SimBus = SimBus::new();
        let mut mpu = Mpu::new(&mut sim);
        for region in [
            Region::new(8, 0, 4),
            Region::new(0, 0, 3),
            Region::new(0, 0, 32),
        ] {
            assert_eq!(mpu.configure_region(&region), Err(Error::InvalidArgument));
        }
        drop(mpu);

        assert!(sim.events().is_empty());
    }

    #[test]
    fn memfault() {
        let mut sim: SimBus = SimBus::new();
        let mut mpu = Mpu::new(&mut sim);
        mpu.enable_memfault();
        let sim: &mut SimBus = mpu.free();
        assert_eq!(sim.reg(0xE000_ED24), 1 << 16);
    }

    #[test]
    fn size_classes() {
        assert_eq!(size_class(0), None);
        assert_eq!(size_class(16), None);
        assert_eq!(size_class(64), Some(5));
        assert_eq!(size_class(1 << 31), Some(30));
    }
}
