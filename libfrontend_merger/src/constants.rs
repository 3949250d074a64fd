// Every observed front-end digitizes 512 time buckets per channel
pub const SAMPLES_PER_FRAME: usize = 512;
// Samples are 12-bit ADC values
pub const SAMPLE_MASK: u16 = 0x0FFF;

// USTC electronics
pub const USTC_SYNC_MARKER: u16 = 0xEEEE;
pub const USTC_END_MARKER: u32 = 0xFFFF_FFFF;
pub const USTC_V3_LONG_FRAME_SIZE: usize = 1048;
pub const USTC_V3_LONG_DATA_OFFSET: usize = 20;
pub const USTC_V3_SHORT_FRAME_SIZE: usize = 1040;
pub const USTC_V3_SHORT_DATA_OFFSET: usize = 12;
pub const USTC_V3_CHIP_OFFSET: u8 = 10;
pub const USTC_V3_CHANNELS_PER_CHIP: u32 = 64;
pub const USTC_V4_PROTOCOL: u16 = 0xAC0F;
pub const USTC_V4_PROTOCOL_SIZE: usize = 4;
pub const USTC_V4_HEADER_SIZE: usize = 36;
pub const USTC_V4_ENDING_SIZE: usize = 16;
pub const USTC_V4_DATA_SIZE: usize = 1036;
pub const USTC_V4_DATA_OFFSET: usize = 6;
pub const USTC_V4_CHANNELS_PER_CHIP: u32 = 68;
pub const USTC_CHIPS_PER_BOARD: u32 = 4;

// CoBo/AsAd GRAW frames
pub const COBO_META_TYPE: u8 = 0x08;
pub const COBO_HEADER_SIZE: usize = 256;
pub const COBO_SIZE_UNIT: usize = 256;
pub const COBO_FRAME_TYPE_PARTIAL: u16 = 1;
pub const COBO_FRAME_TYPE_FULL: u16 = 2;
pub const COBO_REVISION: u8 = 5;
pub const COBO_HEADER_UNITS: u16 = 1;
pub const COBO_ITEM_SIZE_PARTIAL: u16 = 4;
pub const COBO_ITEM_SIZE_FULL: u16 = 2;
pub const COBO_FULL_ITEM_COUNT: u32 = 139_264;
pub const COBO_CHANNELS_PER_AGET: u32 = 68;
pub const COBO_CHANNELS_PER_ASAD: u32 = 272;
// Time Stamp Clock is 100 MHz
pub const COBO_NS_PER_TICK: i64 = 10;
// Largest frame we are willing to buffer (a full readout frame plus its header)
pub const COBO_MAX_FRAME_SIZE: usize = COBO_HEADER_SIZE + 2 * COBO_FULL_ITEM_COUNT as usize;

// FEMINOS word prefixes
pub const PFX_14_BIT_CONTENT_MASK: u16 = 0xC000;
pub const PFX_12_BIT_CONTENT_MASK: u16 = 0xF000;
pub const PFX_9_BIT_CONTENT_MASK: u16 = 0xFE00;
pub const PFX_8_BIT_CONTENT_MASK: u16 = 0xFF00;
pub const PFX_4_BIT_CONTENT_MASK: u16 = 0xFFF0;
pub const PFX_CARD_CHIP_CHAN_HIT_IX: u16 = 0xC000;
pub const PFX_ADC_SAMPLE: u16 = 0x3000;
pub const PFX_TIME_BIN_IX: u16 = 0x0E00;
pub const PFX_START_OF_DFRAME: u16 = 0x0800;
pub const PFX_START_OF_MFRAME: u16 = 0x0600;
pub const PFX_START_OF_CFRAME: u16 = 0x0400;
pub const PFX_ASCII_MSG_LEN: u16 = 0x0100;
pub const PFX_START_OF_EVENT: u16 = 0x00F0;
pub const PFX_END_OF_EVENT: u16 = 0x00E0;
pub const PFX_END_OF_FRAME: u16 = 0x000F;
pub const PFX_START_OF_BUILT_EVENT: u16 = 0x0009;
pub const PFX_END_OF_BUILT_EVENT: u16 = 0x0008;
pub const PFX_SOBE_SIZE: u16 = 0x0006;
pub const FEMINOS_CHANNELS_PER_CHIP: u32 = 72;
pub const FEMINOS_CHIPS_PER_CARD: u32 = 4;
// Time Stamp Clock is 50 MHz
pub const FEMINOS_NS_PER_TICK: i64 = 20;
pub const FEMINOS_MAX_FRAME_SIZE: usize = 8192;
// Run UID (26 bytes) and a null word
pub const FEMINOS_FILE_HEADER_SIZE: usize = 28;
// ASCII prefix word and the run start in seconds
pub const MULTI_FEMINOS_FILE_HEADER_SIZE: usize = 6;

// AFTER (T2K DCC) events
pub const AFTER_FILE_HEADER_SIZE: usize = 20;
pub const AFTER_EVENT_HEADER_SIZE: usize = 8;
pub const AFTER_PACKET_HEADER_SIZE: usize = 14;
pub const AFTER_PACKET_TRAILER_SIZE: usize = 4;
pub const AFTER_CELL_INDEX_PREFIX: u16 = 8;
pub const AFTER_LAST_CELL: u16 = 511;
pub const AFTER_MIN_SAMPLES: u16 = 9;
pub const AFTER_MAX_EVENT_SIZE: usize = 24 * 4 * 80 * 512 * 2;
pub const AFTER_NS_PER_TICK: i64 = 20;

// Default pipeline tuning
pub const DEFAULT_WINDOW_SIZE: u32 = 4;
pub const DEFAULT_MAX_RESYNC_BYTES: u64 = 1 << 20;
pub const DEFAULT_MIN_POINTS: usize = 512;
