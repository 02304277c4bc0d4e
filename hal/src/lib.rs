//! ATSAM3X8E embedded flash and MPU driver.
//!
//! Programming, locking, and identification of the two flash banks of the
//! ATSAM3X8E (Arduino Due) through the enhanced embedded flash controllers,
//! plus region configuration of the Cortex-M3 memory protection unit.
//!
//! # Example
//!
//! ```no_run
//! use sam3x8e_flash::{Flash, bus::Mmio, flash::WriteOptions};
//!
//! let mut flash = Flash::new(unsafe { Mmio::steal() });
//! let count: u32 = flash.read::<u32>(0x000F_F000)?.wrapping_add(1);
//! flash.write_values(0x000F_F000, &[count], WriteOptions::DEFAULT)?;
//! # Ok::<(), sam3x8e_flash::Error>(())
//! ```
//!
//! # Features
//!
//! * `defmt`: `defmt::Format` for public types, and logging.
//! * `sim`: [`sim::SimBus`], a host simulation of the flash controllers.
#![cfg_attr(not(any(test, feature = "sim")), no_std)]
#![cfg_attr(docsrs, feature(doc_cfg))]

mod macros;

pub mod access;
pub mod bus;
pub mod descriptor;
pub mod efc;
pub mod flash;
pub mod gpnvm;
pub mod lock;
pub mod mem;
pub mod mpu;
mod nor;
pub mod uid;

#[cfg(any(test, feature = "sim"))]
#[cfg_attr(docsrs, doc(cfg(feature = "sim")))]
pub mod sim;

pub use efc::Error;
pub use flash::{Config, Flash, WriteOptions};
