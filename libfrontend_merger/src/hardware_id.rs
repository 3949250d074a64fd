/// The geometry used to flatten a hardware address into a single physical channel number.
///
/// Each electronics family numbers its channels differently (64 per chip for USTC V3,
/// 68 per AGET for CoBo/AsAd, 72 per ASIC for FEMINOS cards).
#[derive(PartialEq, Eq, Debug, Clone, Copy)]
pub struct ChannelLayout {
    pub channels_per_chip: u32,
    pub chips_per_board: u32,
}

impl ChannelLayout {
    pub const fn new(channels_per_chip: u32, chips_per_board: u32) -> Self {
        Self {
            channels_per_chip,
            chips_per_board,
        }
    }

    /// Generate the physical channel number for a board, chip, and (already mapped) channel
    pub fn physical_id(&self, board_id: u16, chip_id: u16, channel: u32) -> u32 {
        (board_id as u32) * self.chips_per_board * self.channels_per_chip
            + (chip_id as u32) * self.channels_per_chip
            + channel
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_physical_id() {
        let layout = ChannelLayout::new(64, 4);
        assert_eq!(layout.physical_id(0, 0, 5), 5);
        assert_eq!(layout.physical_id(1, 2, 5), 256 + 128 + 5);
        let layout = ChannelLayout::new(68, 4);
        assert_eq!(layout.physical_id(3, 1, 40), 3 * 272 + 68 + 40);
    }
}
