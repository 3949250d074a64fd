// The AFTER and AGET ASICs interleave non-physical channels (fixed pattern noise and
// reset channels) with the physical ones. The readout numbers every channel, so to get
// the physical channel we drop the excluded ones and close the gaps:
// [raw channel] -> raw channel - (number of excluded channels below it)
// Anything that lands outside of the 72 channel ASIC slot is also dropped.
use bit_set::BitSet;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

use super::constants::FEMINOS_CHANNELS_PER_CHIP;

const AFTER_EXCLUDED: [usize; 7] = [0, 1, 2, 15, 28, 53, 66];
const AGET_EXCLUDED: [usize; 6] = [0, 1, 13, 24, 47, 58];

fn after_table() -> &'static BitSet {
    static TABLE: OnceLock<BitSet> = OnceLock::new();
    TABLE.get_or_init(|| AFTER_EXCLUDED.iter().copied().collect())
}

fn aget_table() -> &'static BitSet {
    static TABLE: OnceLock<BitSet> = OnceLock::new();
    TABLE.get_or_init(|| AGET_EXCLUDED.iter().copied().collect())
}

/// Which ASIC channel numbering a FEMINOS-style readout uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AsicMapping {
    /// Raw DAQ channel numbering, nothing excluded
    #[default]
    Raw,
    After,
    Aget,
}

impl AsicMapping {
    fn table(&self) -> Option<&'static BitSet> {
        match self {
            Self::Raw => None,
            Self::After => Some(after_table()),
            Self::Aget => Some(aget_table()),
        }
    }

    /// Map a raw ASIC channel to its physical channel within the chip.
    ///
    /// Returns None if the channel is not a physical channel.
    pub fn physical_channel(&self, channel: u16) -> Option<u32> {
        let channel = channel as usize;
        match self.table() {
            None => Some(channel as u32),
            Some(excluded) => {
                if excluded.contains(channel) {
                    return None;
                }
                let below = excluded.iter().take_while(|c| *c < channel).count();
                let physical = (channel - below) as u32;
                if physical < FEMINOS_CHANNELS_PER_CHIP {
                    Some(physical)
                } else {
                    None
                }
            }
        }
    }
}
