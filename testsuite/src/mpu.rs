#![no_std]
#![no_main]

use core::sync::atomic::{AtomicBool, Ordering::SeqCst};
use defmt::unwrap;
use defmt_rtt as _; // global logger
use panic_probe as _;
use sam3x8e_flash::{
    bus::Mmio,
    mem,
    mpu::{AccessPermission, Mpu, NUM_REGIONS, Region, size_class},
};

static FAULTED: AtomicBool = AtomicBool::new(false);

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

#[cortex_m_rt::exception]
fn MemoryManagement() {
    FAULTED.store(true, SeqCst);
    // disable the MPU to return to the faulting store
    unsafe { core::ptr::write_volatile((mem::MPU + mem::mpu::CTRL) as *mut u32, 0) };
    cortex_m::asm::dsb();
    cortex_m::asm::isb();
}

#[defmt_test::tests]
mod tests {
    use super::*;

    #[init]
    fn init() -> Mpu<Mmio> {
        let mut mpu: Mpu<Mmio> = Mpu::new(unsafe { Mmio::steal() });
        mpu.enable_memfault();
        mpu
    }

    #[test]
    fn region_count(mpu: &mut Mpu<Mmio>) {
        defmt::assert_eq!(mpu.regions(), NUM_REGIONS);
    }

    #[test]
    fn read_only_ram_faults(mpu: &mut Mpu<Mmio>) {
        #[repr(C, align(32))]
        struct Target([u32; 8]);
        static mut TARGET: Target = Target([0; 8]);
        let addr: u32 = core::ptr::addr_of!(TARGET) as u32;

        let region: Region = Region::new(7, addr, unwrap!(size_class(32)))
            .set_ap(AccessPermission::PrivilegedReadOnly)
            .set_cacheable(true)
            .set_shareable(true)
            .set_xn(true);
        unwrap!(mpu.configure_region(&region));

        defmt::assert!(!FAULTED.load(SeqCst));
        unsafe { core::ptr::write_volatile((addr + 4) as *mut u32, 0xDEAD_BEEF) };
        defmt::assert!(FAULTED.load(SeqCst));
    }

    #[test]
    fn invalid_region(mpu: &mut Mpu<Mmio>) {
        defmt::assert_eq!(
            mpu.configure_region(&Region::new(NUM_REGIONS, 0, 4)),
            Err(sam3x8e_flash::Error::InvalidArgument)
        );
    }
}
