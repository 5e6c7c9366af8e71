//! RLPx framing: every message travels as a 16-byte header (3-byte size +
//! header-data, AES-CTR encrypted) with its 16-byte MAC, followed by the
//! block-padded ciphertext and the 16-byte frame MAC. The running Keccak
//! MAC state is whitened with AES-ECB under the mac-secret between updates.

use aes::{
    cipher::{BlockEncrypt as _, KeyInit as _, StreamCipher as _},
    Aes256Enc,
};
use sha3::{Digest as _, Keccak256};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use wyrm_common::H128;
use wyrm_rlp::encode::RLPEncode as _;

use super::{connection::Established, error::RLPxError};

const FRAME_BLOCK_SIZE: usize = 16;
// the frame size travels in 3 bytes
const MAX_FRAME_SIZE: usize = (1 << 24) - 1;

pub(crate) async fn write<S: AsyncWrite + std::marker::Unpin>(
    mut frame_data: Vec<u8>,
    state: &mut Established,
    stream: &mut S,
) -> Result<(), RLPxError> {
    if frame_data.len() > MAX_FRAME_SIZE {
        return Err(RLPxError::InvalidMessageLength);
    }
    let mac_aes_cipher = Aes256Enc::new_from_slice(&state.mac_key.0)
        .map_err(|err| RLPxError::CryptographyError(err.to_string()))?;

    // header = frame-size || header-data || header-padding
    let mut header = Vec::with_capacity(32);
    let frame_size = frame_data.len().to_be_bytes();
    header.extend_from_slice(&frame_size[5..8]);

    // header-data = [capability-id, context-id]  (both always zero)
    (0_u8, 0_u8).encode(&mut header);

    header.resize(FRAME_BLOCK_SIZE, 0);
    state.egress_aes.apply_keystream(&mut header[..FRAME_BLOCK_SIZE]);

    // header-mac-seed = aes(mac-secret, keccak.digest(egress-mac)[:16]) ^ header-ciphertext
    let header_mac_seed = {
        let mac_digest = digest16(&state.egress_mac);
        let mut seed = mac_digest.into();
        mac_aes_cipher.encrypt_block(&mut seed);
        H128(seed.into()) ^ H128(first16(&header))
    };
    state.egress_mac.update(header_mac_seed);
    let header_mac = digest16(&state.egress_mac);
    header.extend_from_slice(&header_mac);

    stream
        .write_all(&header)
        .await
        .map_err(|err| RLPxError::ConnectionError(err.to_string()))?;

    // pad the frame to the next block boundary before encrypting
    frame_data.resize(frame_data.len().next_multiple_of(FRAME_BLOCK_SIZE), 0);
    state.egress_aes.apply_keystream(&mut frame_data);
    let frame_ciphertext = frame_data;

    stream
        .write_all(&frame_ciphertext)
        .await
        .map_err(|err| RLPxError::ConnectionError(err.to_string()))?;

    // frame-mac-seed = aes(mac-secret, keccak.digest(egress-mac)[:16]) ^ keccak.digest(egress-mac)[:16]
    state.egress_mac.update(&frame_ciphertext);
    let frame_mac_seed = {
        let mac_digest = digest16(&state.egress_mac);
        let mut seed = mac_digest.into();
        mac_aes_cipher.encrypt_block(&mut seed);
        (H128(seed.into()) ^ H128(mac_digest)).0
    };
    state.egress_mac.update(frame_mac_seed);
    let frame_mac = digest16(&state.egress_mac);

    stream
        .write_all(&frame_mac)
        .await
        .map_err(|err| RLPxError::ConnectionError(err.to_string()))?;
    Ok(())
}

pub(crate) async fn read<S: AsyncRead + std::marker::Unpin>(
    state: &mut Established,
    stream: &mut S,
) -> Result<Vec<u8>, RLPxError> {
    let mac_aes_cipher = Aes256Enc::new_from_slice(&state.mac_key.0)
        .map_err(|err| RLPxError::CryptographyError(err.to_string()))?;

    // Receive the message's frame header
    let mut frame_header = [0; 32];
    stream
        .read_exact(&mut frame_header)
        .await
        .map_err(|err| RLPxError::ConnectionError(err.to_string()))?;
    let (header_ciphertext, header_mac) = frame_header.split_at_mut(FRAME_BLOCK_SIZE);

    // header-mac-seed = aes(mac-secret, keccak.digest(ingress-mac)[:16]) ^ header-ciphertext
    let header_mac_seed = {
        let mac_digest = digest16(&state.ingress_mac);
        let mut seed = mac_digest.into();
        mac_aes_cipher.encrypt_block(&mut seed);
        (H128(seed.into()) ^ H128(first16(header_ciphertext))).0
    };
    state.ingress_mac.update(header_mac_seed);

    let expected_header_mac = digest16(&state.ingress_mac);
    if header_mac != expected_header_mac {
        return Err(RLPxError::InvalidMac);
    }

    let header_text = header_ciphertext;
    state.ingress_aes.apply_keystream(header_text);

    // header-data ([capability-id, context-id]) is unused and ignored
    let frame_size =
        u32::from_be_bytes([0, header_text[0], header_text[1], header_text[2]]) as usize;

    // Receive the frame and its MAC
    let padded_size = frame_size.next_multiple_of(FRAME_BLOCK_SIZE);
    let mut frame_data = vec![0; padded_size + FRAME_BLOCK_SIZE];
    stream
        .read_exact(&mut frame_data)
        .await
        .map_err(|err| RLPxError::ConnectionError(err.to_string()))?;
    let (frame_ciphertext, frame_mac) = frame_data.split_at_mut(padded_size);

    state.ingress_mac.update(&*frame_ciphertext);
    let frame_mac_seed = {
        let mac_digest = digest16(&state.ingress_mac);
        let mut seed = mac_digest.into();
        mac_aes_cipher.encrypt_block(&mut seed);
        (H128(seed.into()) ^ H128(mac_digest)).0
    };
    state.ingress_mac.update(frame_mac_seed);
    let expected_frame_mac = digest16(&state.ingress_mac);
    if frame_mac != expected_frame_mac {
        return Err(RLPxError::InvalidMac);
    }

    state.ingress_aes.apply_keystream(frame_ciphertext);
    let (frame_data, _padding) = frame_ciphertext.split_at(frame_size);
    Ok(frame_data.to_vec())
}

// Snapshot of the running MAC, truncated to 16 bytes. Finalizing a clone
// leaves the accumulated state untouched.
fn digest16(mac: &Keccak256) -> [u8; 16] {
    let digest = mac.clone().finalize();
    let mut out = [0; 16];
    out.copy_from_slice(&digest[..16]);
    out
}

fn first16(data: &[u8]) -> [u8; 16] {
    let mut out = [0; 16];
    out.copy_from_slice(&data[..16]);
    out
}
