//! Unique identifier
//!
//! The 128-bit unique identifier is only readable while a controller is in
//! unique identifier mode, during which its bank reads back the identifier
//! instead of the array contents.

use crate::{
    bus::Bus,
    efc::{Efc, EfcIdx, Error},
    flash::{Flash, PROGRAM_WAIT_STATES},
};
use core::{fmt::Display, num::NonZeroU32};

/// 128-bit unique device identifier
///
/// Returned by [`Flash::unique_id`].
#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Uid {
    uid: [u32; 4],
}

impl From<[u32; 4]> for Uid {
    fn from(uid: [u32; 4]) -> Self {
        Uid { uid }
    }
}

impl From<Uid> for [u32; 4] {
    fn from(uid: Uid) -> Self {
        uid.uid
    }
}

impl From<Uid> for [u8; 16] {
    fn from(uid: Uid) -> Self {
        let mut bytes: [u8; 16] = [0; 16];
        for (dst, word) in bytes.chunks_exact_mut(4).zip(uid.uid) {
            dst.copy_from_slice(&word.to_le_bytes());
        }
        bytes
    }
}

impl Display for Uid {
    /// Hexadecimal, first word first.
    ///
    /// # Example
    ///
    /// ```
    /// use sam3x8e_flash::uid::Uid;
    ///
    /// let uid: Uid = Uid::from([1, 2, 3, 0xDEAD_BEEF]);
    /// assert_eq!(
    ///     format!("{uid}"),
    ///     "000000010000000200000003DEADBEEF"
    /// );
    /// ```
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        for word in self.uid {
            write!(f, "{word:08X}")?;
        }
        Ok(())
    }
}

impl Uid {
    /// Identifier words in read order.
    pub const fn words(&self) -> [u32; 4] {
        self.uid
    }

    /// Returns `true` if every bit is clear.
    pub const fn is_zero(&self) -> bool {
        self.uid[0] == 0 && self.uid[1] == 0 && self.uid[2] == 0 && self.uid[3] == 0
    }
}

fn read_unique_id<B: Bus>(efc: &mut Efc<B>, limit: Option<NonZeroU32>) -> Result<[u32; 4], Error> {
    let ws: u8 = efc.wait_states();
    efc.set_wait_states(PROGRAM_WAIT_STATES);
    efc.set_scod(true);

    let idx: EfcIdx = efc.active();
    let words: Option<[u32; 4]> = efc.bus_mut().read_unique_id(
        idx.base(),
        idx.bank_base(),
        limit.map_or(0, NonZeroU32::get),
    );

    efc.set_scod(false);
    efc.set_wait_states(ws);

    words.ok_or_else(|| {
        warn!("EFC{} unique ID ready flag stuck", idx.index());
        Error::Timeout
    })
}

impl<B: Bus> Flash<B> {
    /// Read the unique identifier through the active controller.
    ///
    /// The first non-zero identifier read is cached, later calls return it
    /// without accessing the hardware. An all-zero identifier is not cached,
    /// each call reads it again.
    ///
    /// # Errors
    ///
    /// [`Error::Timeout`] if a [poll limit](crate::flash::Config::set_uid_poll_limit)
    /// is configured and the ready flag does not change in time. The
    /// controller is still taken out of unique identifier mode.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use sam3x8e_flash::{Flash, bus::Mmio, uid::Uid};
    ///
    /// let mut flash = Flash::new(unsafe { Mmio::steal() });
    /// let uid: Uid = flash.unique_id()?;
    /// # Ok::<(), sam3x8e_flash::Error>(())
    /// ```
    pub fn unique_id(&mut self) -> Result<Uid, Error> {
        if let Some(uid) = self.uid {
            return Ok(uid);
        }

        let uid: Uid = read_unique_id(&mut self.efc, self.cfg.uid_poll_limit())?.into();
        debug!("unique ID {}", uid);
        if !uid.is_zero() {
            self.uid = Some(uid);
        }
        Ok(uid)
    }
}
