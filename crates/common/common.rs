pub mod types;

pub use ethereum_types::{Address, Bloom, Signature, H128, H160, H256, H512, H520, U256};
