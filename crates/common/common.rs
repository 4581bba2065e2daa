pub mod serde_utils;
#[cfg(test)]
pub(crate) mod test_support;
pub mod types;

pub use ethereum_types::{Address, BigEndianHash, Bloom, H160, H256, U256};
