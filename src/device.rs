//! Device identification

/// Access to the debug support unit's identification register
pub trait DebugInfo {
    /// Raw IDCODE register value
    fn id_code(&mut self) -> u32;

    /// Device identifier: the low 12 bits of IDCODE
    fn chip_id(&mut self) -> u16 {
        (self.id_code() & 0x0FFF) as u16
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::FixedDebugInfo;

    #[test]
    fn chip_id_masks_revision() {
        // STM32F407 rev Z
        let mut d = FixedDebugInfo(0x1007_6413);
        assert_eq!(d.chip_id(), 0x413);
    }
}
