#![no_std]
#![no_main]

use defmt::unwrap;
use defmt_rtt as _; // global logger
use panic_probe as _;
use sam3x8e_flash::{
    Flash,
    bus::Mmio,
    efc::EfcIdx,
    gpnvm::{BootBank, BootMode},
    mem,
    uid::Uid,
};

#[cortex_m_rt::exception]
#[allow(non_snake_case)]
unsafe fn HardFault(ef: &cortex_m_rt::ExceptionFrame) -> ! {
    cortex_m::interrupt::disable();
    defmt::error!("HardFault {:#}", defmt::Debug2Format(ef));
    defmt::flush();
    loop {
        cortex_m::asm::udf()
    }
}

#[defmt_test::tests]
mod tests {
    use super::*;

    #[init]
    fn init() -> Flash<Mmio> {
        Flash::new(unsafe { Mmio::steal() })
    }

    #[test]
    fn unique_id(flash: &mut Flash<Mmio>) {
        let uid: Uid = unwrap!(flash.unique_id());
        defmt::info!("UID: {}", uid);
        defmt::assert!(!uid.is_zero());
        defmt::assert_ne!(uid.words(), [mem::ERASED_WORD; 4]);

        // cached
        defmt::assert_eq!(unwrap!(flash.unique_id()), uid);
    }

    #[test]
    fn unique_id_second_controller(flash: &mut Flash<Mmio>) {
        let first: Uid = unwrap!(flash.unique_id());

        // fresh instance, nothing cached
        let mut other: Flash<Mmio> = Flash::new(unsafe { Mmio::steal() });
        unwrap!(other.select_controller(1));
        defmt::assert_eq!(other.controller(), EfcIdx::Efc1);
        defmt::assert_eq!(unwrap!(other.unique_id()), first);
    }

    #[test]
    fn array_restored(flash: &mut Flash<Mmio>) {
        // vector table, must read back the initial stack pointer once the
        // controller has left unique identifier mode
        let sp: u32 = unwrap!(flash.read::<u32>(mem::FLASH_START));
        defmt::assert_eq!(sp >> 24, 0x20);
    }

    #[test]
    fn gpnvm(flash: &mut Flash<Mmio>) {
        // read only, writing GPNVM bits on CI boards would change how they boot
        let mode: BootMode = unwrap!(flash.boot_mode());
        let bank: BootBank = unwrap!(flash.boot_bank());
        defmt::info!("boot mode {}, boot bank {}", mode, bank);
        defmt::assert_eq!(mode, BootMode::Flash);
        defmt::assert!(!unwrap!(flash.security_bit()));
    }
}
