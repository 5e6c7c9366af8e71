use thiserror::Error;
use wyrm_rlp::error::{RLPDecodeError, RLPEncodeError};

#[derive(Debug, Error)]
pub enum RLPxError {
    /// Opaque failure reported to the caller of the handshake driver.
    /// Decode and crypto errors collapse into this one so no detail about
    /// the failing stage can be observed from the outside.
    #[error("Handshake failed")]
    HandshakeFailed,
    #[error("Handshake timed out")]
    TimeoutExpired,
    #[error("Invalid connection state")]
    InvalidState,
    #[error("ECIES MAC verification failed")]
    EciesAuthFailed,
    #[error("Frame MAC verification failed")]
    InvalidMac,
    #[error("Invalid peer id")]
    InvalidPeerId,
    #[error("Invalid signature recovery id")]
    InvalidRecoveryId,
    #[error("Invalid message length")]
    InvalidMessageLength,
    #[error("Connection error: {0}")]
    ConnectionError(String),
    #[error("Decode Error: {0}")]
    DecodeError(#[from] RLPDecodeError),
    #[error("Encode Error: {0}")]
    EncodeError(#[from] RLPEncodeError),
    #[error("Cryptography Error: {0}")]
    CryptographyError(String),
    #[error("Message not handled")]
    MessageNotHandled,
    #[error("Not found: {0}")]
    NotFound(String),
}

impl From<k256::ecdsa::Error> for RLPxError {
    fn from(err: k256::ecdsa::Error) -> Self {
        RLPxError::CryptographyError(err.to_string())
    }
}

impl From<k256::elliptic_curve::Error> for RLPxError {
    fn from(err: k256::elliptic_curve::Error) -> Self {
        RLPxError::CryptographyError(err.to_string())
    }
}

impl From<aes::cipher::InvalidLength> for RLPxError {
    fn from(err: aes::cipher::InvalidLength) -> Self {
        RLPxError::CryptographyError(err.to_string())
    }
}

impl From<aes::cipher::StreamCipherError> for RLPxError {
    fn from(err: aes::cipher::StreamCipherError) -> Self {
        RLPxError::CryptographyError(err.to_string())
    }
}
