//! Memory map
//!
//! Fixed addresses and sizes of the ATSAM3X8E, see section 9 "Memories" of
//! the datasheet.

/// Starting address of flash bank 0, and of the flash memory as a whole.
pub const FLASH_START: u32 = 0x0008_0000;

/// Starting address of flash bank 1.
pub const FLASH1_START: u32 = 0x000C_0000;

/// Size of a single flash bank in bytes.
pub const BANK_SIZE: u32 = FLASH1_START - FLASH_START;

/// First address past the end of the flash memory.
pub const FLASH_END: u32 = FLASH1_START + BANK_SIZE;

/// Flash page size in bytes.
pub const PAGE_SIZE: u32 = 256;

/// Pages in a single flash bank.
pub const PAGES_PER_BANK: u32 = BANK_SIZE / PAGE_SIZE;

/// Pages in both flash banks.
pub const TOTAL_PAGES: u32 = PAGES_PER_BANK * 2;

/// Pages covered by a single lock bit.
pub const PAGES_PER_LOCK_REGION: u32 = 64;

/// Lock region size in bytes.
pub const LOCK_REGION_SIZE: u32 = PAGE_SIZE * PAGES_PER_LOCK_REGION;

/// Lock regions in a single flash bank.
pub const LOCK_REGIONS_PER_BANK: u32 = BANK_SIZE / LOCK_REGION_SIZE;

/// Address of the last page of the flash memory.
///
/// # Example
///
/// ```
/// use sam3x8e_flash::mem;
///
/// assert_eq!(mem::LAST_PAGE_ADDR, 0x000F_FF00);
/// ```
pub const LAST_PAGE_ADDR: u32 = FLASH_END - PAGE_SIZE;

/// Value of an erased (unprogrammed) flash word.
///
/// Reads of erased flash are successful and return this value, failures are
/// reported through `Err` and never through a sentinel.
pub const ERASED_WORD: u32 = 0xFFFF_FFFF;

/// Internal ROM base address.
pub const ROM_START: u32 = 0x0010_0000;

/// Address of the word holding the entry point of the in-application
/// programming (IAP) routine.
pub const IAP_ENTRY: u32 = ROM_START + 8;

/// Embedded flash controller 0 (bank 0) register block.
pub const EFC0: u32 = 0x400E_0A00;

/// Embedded flash controller 1 (bank 1) register block.
pub const EFC1: u32 = 0x400E_0C00;

/// Register offsets within an EFC register block.
pub mod efc {
    /// Flash mode register.
    pub const FMR: u32 = 0x00;
    /// Flash command register.
    pub const FCR: u32 = 0x04;
    /// Flash status register.
    pub const FSR: u32 = 0x08;
    /// Flash result register.
    pub const FRR: u32 = 0x0C;
}

/// Memory protection unit register block.
pub const MPU: u32 = 0xE000_E000 + 0x0D90;

/// Register offsets within the MPU register block.
pub mod mpu {
    /// Type register.
    pub const TYPE: u32 = 0x00;
    /// Control register.
    pub const CTRL: u32 = 0x04;
    /// Region number register.
    pub const RNR: u32 = 0x08;
    /// Region base address register.
    pub const RBAR: u32 = 0x0C;
    /// Region attribute and size register.
    pub const RASR: u32 = 0x10;
}

/// System control block.
pub const SCB: u32 = 0xE000_E000 + 0x0D00;

/// Register offsets within the system control block.
pub mod scb {
    /// System handler control and state register.
    pub const SHCSR: u32 = 0x24;
    /// MemManage fault exception enable.
    pub const SHCSR_MEMFAULTENA: u32 = 1 << 16;
}
