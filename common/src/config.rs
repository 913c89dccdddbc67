pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// Tendermint block tape length
// Slot i holds height h iff h % BLOCKS_TO_TRACK == i
pub const BLOCKS_TO_TRACK: usize = 512;

// Consensus address hash size used in block signatures (bytes)
pub const CONS_ADDRESS_SIZE: usize = 20;

// Bech32 HRP segments for the staking and consensus layers
pub const VALOPER_SEGMENT: &str = "valoper";
pub const VALCONS_SEGMENT: &str = "valcons";

// Cosmos SDK Dec values are fixed-point strings with 18 decimals
pub const DEC_PRECISION: u32 = 18;

// 1 KB = 1024 bytes
pub const BYTES_PER_KB: usize = 1024;
