pub mod rlpx;
pub mod sync;

pub use rlpx::connection::RLPxConnection;
pub use sync::body_sequence::BodySequence;
