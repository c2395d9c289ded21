mod block;
mod config;
mod event;
mod transaction;

pub use block::{Block, BlockHash, BlockNumber, decode_varint, encode_varint};
pub use config::ChainConfig;
pub use event::Event;
pub use transaction::{Transaction, ValidatorTransaction};
