#![no_std]
#![no_main]

use defmt::unwrap;
use defmt_rtt as _; // global logger
use embedded_storage::nor_flash::{NorFlash, ReadNorFlash};
use panic_probe as _;
use rand::Rng as RngTrait;
use rand_chacha::{ChaCha8Rng, rand_core::SeedableRng};
use sam3x8e_flash::{
    Error, Flash,
    bus::Mmio,
    efc::AccessMode,
    flash::{Page, WriteOptions},
    mem,
};

// main RC oscillator after reset
const FREQ: u32 = 4_000_000;
const CYC_PER_MICRO: u32 = FREQ / 1000 / 1000;

// WARNING will wrap-around eventually, use this for relative timing only
defmt::timestamp!(
    "{=u32:us}",
    cortex_m::peripheral::DWT::cycle_count() / CYC_PER_MICRO
);

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

    struct TestArgs {
        flash: Flash<Mmio>,
        page: Page,
        rng: ChaCha8Rng,
    }

    #[init]
    fn init() -> TestArgs {
        let mut cp: cortex_m::Peripherals = unwrap!(cortex_m::Peripherals::take());
        cp.DCB.enable_trace();
        cp.DWT.enable_cycle_counter();

        let mut flash: Flash<Mmio> = Flash::new(unsafe { Mmio::steal() });

        // no hardware RNG driver, spread wear with the identifier and the
        // cycle count at startup
        let uid: [u32; 4] = unwrap!(flash.unique_id()).into();
        let seed: u64 = (u64::from(uid[0] ^ uid[2]) << 32)
            | u64::from(uid[1] ^ uid[3] ^ cortex_m::peripheral::DWT::cycle_count());
        let mut rng: ChaCha8Rng = ChaCha8Rng::seed_from_u64(seed);

        // flash only gets 10k program cycles, and the test binary lives in
        // the first bank; pick a page in the upper half of the second bank
        let page: u16 = rng.gen_range(1536..2048);
        let page: Page = unwrap!(Page::from_index(page));

        defmt::info!("Testing with page {}, {:#08X}", page.to_index(), page.addr());

        TestArgs { flash, page, rng }
    }

    #[test]
    fn geometry(ta: &mut TestArgs) {
        defmt::assert_eq!(unwrap!(ta.flash.flash_size(mem::FLASH_START)), mem::BANK_SIZE);
        defmt::assert_eq!(unwrap!(ta.flash.page_size(mem::FLASH1_START)), mem::PAGE_SIZE);
        defmt::assert_eq!(unwrap!(ta.flash.page_count(mem::FLASH_START)), mem::PAGES_PER_BANK);
        defmt::assert_eq!(
            unwrap!(ta.flash.pages_per_region(mem::FLASH_START)),
            mem::PAGES_PER_LOCK_REGION
        );
        defmt::info!("flash ID {:#010X}", unwrap!(ta.flash.flash_id(mem::FLASH_START)));

        // ensure previous logs are seen before we start executing code that can
        // result in difficult-to-debug situations
        defmt::flush();
    }

    #[test]
    fn erase_page(ta: &mut TestArgs) {
        let start: u32 = cortex_m::peripheral::DWT::cycle_count();
        unwrap!(ta.flash.write(ta.page.addr(), &[0xFF; 256], WriteOptions::DEFAULT));
        let elapsed: u32 = cortex_m::peripheral::DWT::cycle_count().wrapping_sub(start);

        defmt::info!(
            "256B erase and write duration: {=u32:us}",
            elapsed / CYC_PER_MICRO
        );

        let mut words: [u32; 64] = [0; 64];
        unwrap!(ta.flash.read_values(ta.page.addr(), &mut words));
        defmt::assert!(words.iter().all(|&w| w == mem::ERASED_WORD));
    }

    #[test]
    fn merge_write(ta: &mut TestArgs) {
        let base: u32 = ta.page.addr();
        let fill: [u32; 64] = core::array::from_fn(|n| n as u32);
        unwrap!(ta.flash.write_values(base, &fill, WriteOptions::DEFAULT));

        let offset: u32 = ta.rng.gen_range(1..63) * 4;
        let data: u32 = ta.rng.gen_range(1..u32::MAX - 1);
        defmt::info!("Writing {:#010X} to {:#08X}", data, base + offset);
        unwrap!(ta.flash.write_values(base + offset, &[data], WriteOptions::DEFAULT));

        for n in 0..64 {
            let expected: u32 = if n * 4 == offset { data } else { n };
            defmt::assert_eq!(unwrap!(ta.flash.read::<u32>(base + n * 4)), expected);
        }
    }

    #[test]
    fn typed_values(ta: &mut TestArgs) {
        let addr: u32 = ta.page.addr() + 128;
        let values: [f64; 4] = [
            ta.rng.r#gen(),
            -1.5,
            f64::from(ta.rng.gen_range(0..1000_u32)),
            0.0,
        ];
        unwrap!(ta.flash.write_values(addr, &values, WriteOptions::DEFAULT));

        let mut out: [f64; 4] = [f64::NAN; 4];
        unwrap!(ta.flash.read_values(addr, &mut out));
        defmt::assert_eq!(out, values);
    }

    #[test]
    fn lock_and_unlock(ta: &mut TestArgs) {
        let addr: u32 = ta.page.addr();
        unwrap!(ta.flash.lock(addr, addr + 255));
        defmt::assert_eq!(unwrap!(ta.flash.is_locked(addr, addr + 255)), 1);

        // writes unlock the region first
        unwrap!(ta.flash.write_values(addr, &[0x1234_5678_u32], WriteOptions::DEFAULT));
        defmt::assert_eq!(unwrap!(ta.flash.is_locked(addr, addr + 255)), 0);
        defmt::assert_eq!(unwrap!(ta.flash.read::<u32>(addr)), 0x1234_5678);
    }

    #[test]
    fn write_and_lock(ta: &mut TestArgs) {
        let addr: u32 = ta.page.addr();
        let opts: WriteOptions = WriteOptions {
            erase: true,
            lock: true,
        };
        unwrap!(ta.flash.write_values(addr, &[0xCAFE_F00D_u32], opts));
        defmt::assert_eq!(unwrap!(ta.flash.is_locked(addr, addr)), 1);
        unwrap!(ta.flash.unlock(addr, addr));
        defmt::assert_eq!(unwrap!(ta.flash.is_locked(addr, addr)), 0);
    }

    #[test]
    fn storage_traits(ta: &mut TestArgs) {
        let offset: u32 = ta.page.addr() - mem::FLASH_START;
        unwrap!(ta.flash.erase(offset, offset + Page::SIZE));
        unwrap!(NorFlash::write(&mut ta.flash, offset, &[0xA5, 0x5A, 0x0F, 0xF0]));

        let mut buf: [u8; 4] = [0; 4];
        unwrap!(ReadNorFlash::read(&mut ta.flash, offset, &mut buf));
        defmt::assert_eq!(buf, [0xA5, 0x5A, 0x0F, 0xF0]);
    }

    #[test]
    fn access_mode(ta: &mut TestArgs) {
        let word: u32 = unwrap!(ta.flash.read::<u32>(ta.page.addr()));
        ta.flash.set_access_mode(AccessMode::Bits64);
        defmt::assert_eq!(ta.flash.access_mode(), AccessMode::Bits64);
        defmt::assert_eq!(unwrap!(ta.flash.read::<u32>(ta.page.addr())), word);
        ta.flash.set_access_mode(AccessMode::Bits128);
        defmt::assert_eq!(ta.flash.access_mode(), AccessMode::Bits128);
    }

    #[test]
    fn invalid_address(ta: &mut TestArgs) {
        defmt::assert_eq!(
            ta.flash.write(mem::FLASH_END, &[0; 4], WriteOptions::DEFAULT),
            Err(Error::InvalidAddress)
        );
        defmt::assert_eq!(
            ta.flash.write(ta.page.addr() + 2, &[0; 4], WriteOptions::DEFAULT),
            Err(Error::InvalidAddress)
        );
        defmt::assert_eq!(ta.flash.descriptor(mem::FLASH_END), Err(Error::InvalidAddress));
    }
}
