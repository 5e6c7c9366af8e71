mod block;
pub mod transaction;

pub use block::*;
pub use transaction::*;
