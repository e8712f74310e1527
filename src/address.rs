//! Address legality for jump and write targets

/// Inclusive address range
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub start: u32,
    pub end: u32,
}

impl Region {
    pub const fn new(start: u32, end: u32) -> Self {
        Self { start, end }
    }

    /// Region covering `size` bytes from `base`, with the upper bound at `base + size`
    pub const fn sized(base: u32, size: u32) -> Self {
        Self {
            start: base,
            end: base + size,
        }
    }

    pub fn contains(&self, address: u32) -> bool {
        address >= self.start && address <= self.end
    }
}

pub const SRAM1_BASE: u32 = 0x2000_0000;
pub const SRAM2_BASE: u32 = 0x2001_C000;
pub const CCMDATARAM_BASE: u32 = 0x1000_0000;
pub const FLASH_BASE: u32 = 0x0800_0000;

/// STM32F407 working memory and program flash
pub const STM32F407_REGIONS: [Region; 4] = [
    Region::sized(SRAM1_BASE, 112 * 1024),
    Region::sized(SRAM2_BASE, 16 * 1024),
    Region::sized(CCMDATARAM_BASE, 64 * 1024),
    Region::sized(FLASH_BASE, 1024 * 1024),
];

/// Decides whether the host may jump to or write at an address.
///
/// Jump and write share one rule, so jumping into RAM resident code is allowed.
#[derive(Debug, Clone, Copy)]
pub struct AddressPolicy {
    regions: &'static [Region],
}

impl AddressPolicy {
    pub const fn new(regions: &'static [Region]) -> Self {
        Self { regions }
    }

    pub fn regions(&self) -> &'static [Region] {
        self.regions
    }

    pub fn is_valid(&self, address: u32) -> bool {
        self.regions.iter().any(|r| r.contains(address))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn region_bounds_are_inclusive() {
        let policy = AddressPolicy::new(&STM32F407_REGIONS);

        for r in STM32F407_REGIONS.iter() {
            assert!(policy.is_valid(r.start), "start of {:x?}", r);
            assert!(policy.is_valid(r.end), "end of {:x?}", r);
        }
    }

    #[test]
    fn just_outside_is_rejected() {
        let policy = AddressPolicy::new(&STM32F407_REGIONS);

        // SRAM1 and SRAM2 are adjacent, so their shared edges stay valid
        assert!(!policy.is_valid(SRAM1_BASE - 1));
        assert!(!policy.is_valid(0x2002_0000 + 1));
        assert!(!policy.is_valid(CCMDATARAM_BASE - 1));
        assert!(!policy.is_valid(0x1001_0000 + 1));
        assert!(!policy.is_valid(FLASH_BASE - 1));
        assert!(!policy.is_valid(0x0810_0000 + 1));
    }

    #[test]
    fn well_known_addresses() {
        let policy = AddressPolicy::new(&STM32F407_REGIONS);

        assert!(policy.is_valid(0x0800_8000));
        assert!(policy.is_valid(0x2000_1000));
        assert!(!policy.is_valid(0x0000_0000));
        assert!(!policy.is_valid(0x4002_3C00));
        assert!(!policy.is_valid(0xFFFF_FFFF));
    }

    #[test]
    fn custom_regions() {
        static REGIONS: [Region; 1] = [Region::new(0x100, 0x1FF)];
        let policy = AddressPolicy::new(&REGIONS);

        assert!(!policy.is_valid(0xFF));
        assert!(policy.is_valid(0x100));
        assert!(policy.is_valid(0x1FF));
        assert!(!policy.is_valid(0x200));
    }
}
