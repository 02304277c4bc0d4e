//! Typed access
//!
//! Writes and reads of primitive values on top of the byte oriented
//! [`Flash::write`]. Values are stored little endian.

use crate::{
    bus::Bus,
    efc::Error,
    flash::{Flash, WriteOptions},
    mem,
};

mod sealed {
    pub trait Sealed {}
}

/// Primitive value that can be stored in flash.
pub trait Element: Copy + sealed::Sealed {
    /// Size in bytes.
    const SIZE: usize;

    /// Byte `n` of the little endian representation.
    fn le_byte(&self, n: usize) -> u8;

    /// Create from the little endian representation, `bytes` is
    /// [`SIZE`](Self::SIZE) long.
    fn from_le(bytes: &[u8]) -> Self;
}

macro_rules! element {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl sealed::Sealed for $ty {}

            impl Element for $ty {
                const SIZE: usize = core::mem::size_of::<$ty>();

                #[inline]
                fn le_byte(&self, n: usize) -> u8 {
                    self.to_le_bytes()[n]
                }

                #[inline]
                fn from_le(bytes: &[u8]) -> Self {
                    let mut buf: [u8; core::mem::size_of::<$ty>()] = [0; core::mem::size_of::<$ty>()];
                    buf.copy_from_slice(bytes);
                    <$ty>::from_le_bytes(buf)
                }
            }
        )+
    };
}

element!(u8, u16, u32, u64, i8, i16, i32, i64, f32, f64);

fn check_read(addr: u32, len: usize, align: usize) -> Result<(), Error> {
    let len: u32 = u32::try_from(len).map_err(|_| Error::InvalidAddress)?;
    if addr < mem::FLASH_START || addr % (align as u32) != 0 {
        return Err(Error::InvalidAddress);
    }
    match addr.checked_add(len) {
        Some(end) if end <= mem::FLASH_END => Ok(()),
        _ => Err(Error::InvalidAddress),
    }
}

impl<B: Bus> Flash<B> {
    /// Write values to flash.
    ///
    /// In addition to the rules of [`write`](Self::write) the address must
    /// be aligned to `T`.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use sam3x8e_flash::{Flash, bus::Mmio, flash::WriteOptions};
    ///
    /// let mut flash = Flash::new(unsafe { Mmio::steal() });
    /// flash.write_values(0x000F_F000, &[1.5_f64, -2.0], WriteOptions::DEFAULT)?;
    /// assert_eq!(flash.read::<f64>(0x000F_F008)?, -2.0);
    /// # Ok::<(), sam3x8e_flash::Error>(())
    /// ```
    pub fn write_values<T: Element>(
        &mut self,
        addr: u32,
        values: &[T],
        opts: WriteOptions,
    ) -> Result<(), Error> {
        if addr % (core::mem::align_of::<T>() as u32) != 0 {
            return Err(Error::InvalidAddress);
        }
        let len: u32 = values
            .len()
            .checked_mul(T::SIZE)
            .and_then(|len| u32::try_from(len).ok())
            .ok_or(Error::InvalidAddress)?;
        let bytes = values
            .iter()
            .flat_map(|val| (0..T::SIZE).map(move |n| val.le_byte(n)));
        self.write_from(addr, len, bytes, opts)
    }

    /// Read bytes from flash.
    ///
    /// Reads may cross the bank boundary.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidAddress`] if any byte is outside of the flash memory.
    pub fn read_bytes(&mut self, addr: u32, buf: &mut [u8]) -> Result<(), Error> {
        check_read(addr, buf.len(), 1)?;
        let bus: &mut B = self.efc.bus_mut();
        for (n, byte) in buf.iter_mut().enumerate() {
            *byte = bus.read_u8(addr + n as u32);
        }
        Ok(())
    }

    /// Read a value from flash.
    ///
    /// Erased flash reads as all ones, for example
    /// [`ERASED_WORD`](crate::mem::ERASED_WORD) for `u32`.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidAddress`] if the value is outside of the flash memory,
    /// or `addr` is not aligned to `T`.
    pub fn read<T: Element>(&mut self, addr: u32) -> Result<T, Error> {
        let mut buf: [u8; 8] = [0; 8];
        check_read(addr, T::SIZE, core::mem::align_of::<T>())?;
        self.read_bytes(addr, &mut buf[..T::SIZE])?;
        Ok(T::from_le(&buf[..T::SIZE]))
    }

    /// Read consecutive values from flash.
    ///
    /// # Errors
    ///
    /// Same as [`read`](Self::read).
    pub fn read_values<T: Element>(&mut self, addr: u32, out: &mut [T]) -> Result<(), Error> {
        let len: usize = out.len().checked_mul(T::SIZE).ok_or(Error::InvalidAddress)?;
        check_read(addr, len, core::mem::align_of::<T>())?;
        for (n, val) in out.iter_mut().enumerate() {
            *val = self.read(addr + (n * T::SIZE) as u32)?;
        }
        Ok(())
    }
}
