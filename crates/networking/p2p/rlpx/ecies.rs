//! ECIES as used by the RLPx v4 handshake: AES-128-CTR + HMAC-SHA256 keyed
//! through an ephemeral ECDH exchange. The MAC additionally covers the
//! 2-byte size prefix of the outer envelope, so a truncated or resized
//! message fails authentication.

use aes::cipher::{KeyIvInit, StreamCipher};
use k256::{elliptic_curve::sec1::ToEncodedPoint, PublicKey, SecretKey};
use wyrm_common::H128;

use super::{
    error::RLPxError,
    utils::{ecdh_xchng, kdf, sha256, sha256_hmac},
};

type Aes128Ctr64BE = ctr::Ctr64BE<aes::Aes128>;

pub const AES_BLOCK_SIZE: usize = 16;

const PUBLIC_KEY_SIZE: usize = 65;
const IV_SIZE: usize = 16;
const MAC_FOOTER_SIZE: usize = 32;

/// Fixed per-message overhead: ephemeral public key, IV and MAC footer.
pub const ECIES_OVERHEAD: usize = PUBLIC_KEY_SIZE + IV_SIZE + MAC_FOOTER_SIZE;

/// secp256k1 ECDH between `local_key` and `remote_pubkey`.
pub fn compute_shared_secret(local_key: &SecretKey, remote_pubkey: &PublicKey) -> [u8; 32] {
    ecdh_xchng(local_key, remote_pubkey)
}

/// Pads a length up to the next AES block boundary. Handshake plaintexts
/// are padded before encryption; the receiver recovers the pad implicitly
/// from the outer size prefix.
pub fn round_up_to_block_size(n: usize) -> usize {
    n.next_multiple_of(AES_BLOCK_SIZE)
}

/// Encrypts `plaintext` for `remote_pubkey`.
/// Layout of the result: `ephemeral-pubkey (65) || iv (16) || ciphertext || mac (32)`.
/// `auth_data` is the big-endian size prefix of the outer envelope, bound
/// into the MAC.
pub fn encrypt(
    plaintext: &[u8],
    remote_pubkey: &PublicKey,
    auth_data: &[u8],
) -> Result<Vec<u8>, RLPxError> {
    let mut rng = rand::thread_rng();

    // Generate a keypair just for this message.
    let message_secret_key = SecretKey::random(&mut rng);

    // Derive a shared secret for this message.
    let message_secret = ecdh_xchng(&message_secret_key, remote_pubkey);

    // Derive the AES and MAC keys from the message secret.
    let mut secret_keys = [0; 32];
    kdf(&message_secret, &mut secret_keys);
    let aes_key = &secret_keys[..16];
    let mac_key = sha256(&secret_keys[16..]);

    // Encrypt the message with the AES key.
    let iv = H128::random_using(&mut rng);
    let mut stream_cipher = Aes128Ctr64BE::new_from_slices(aes_key, &iv.0)?;
    let mut ciphertext = plaintext.to_vec();
    stream_cipher.try_apply_keystream(&mut ciphertext)?;

    // Compute the MAC over the IV, the ciphertext and the size prefix.
    let mac_footer = sha256_hmac(&mac_key, &[&iv.0, &ciphertext], auth_data);

    let message_pubkey = message_secret_key.public_key().to_encoded_point(false);
    Ok([
        message_pubkey.as_bytes(),
        &iv.0,
        &ciphertext,
        &mac_footer,
    ]
    .concat())
}

/// Decrypts a message produced by [`encrypt`], addressed to `local_key`.
/// Fails with [`RLPxError::EciesAuthFailed`] if the MAC does not verify.
pub fn decrypt(msg: &[u8], local_key: &SecretKey, auth_data: &[u8]) -> Result<Vec<u8>, RLPxError> {
    if msg.len() < ECIES_OVERHEAD {
        return Err(RLPxError::InvalidMessageLength);
    }

    // Split the message into its components. General layout is:
    // public-key (65) || iv (16) || ciphertext || mac (32)
    let (pk, rest) = msg.split_at(PUBLIC_KEY_SIZE);
    let (iv, rest) = rest.split_at(IV_SIZE);
    let (c, d) = rest.split_at(rest.len() - MAC_FOOTER_SIZE);

    // Derive the message shared secret.
    let remote_pubkey = PublicKey::from_sec1_bytes(pk)?;
    let shared_secret = ecdh_xchng(local_key, &remote_pubkey);

    // Derive the AES and MAC keys from the message shared secret.
    let mut buf = [0; 32];
    kdf(&shared_secret, &mut buf);
    let aes_key = &buf[..16];
    let mac_key = sha256(&buf[16..]);

    // Verify the MAC before touching the ciphertext.
    let expected_d = sha256_hmac(&mac_key, &[iv, c], auth_data);
    if d != expected_d {
        return Err(RLPxError::EciesAuthFailed);
    }

    // Decrypt the message with the AES key.
    let mut stream_cipher = Aes128Ctr64BE::new_from_slices(aes_key, iv)?;
    let mut decoded = c.to_vec();
    stream_cipher.try_apply_keystream(&mut decoded)?;
    Ok(decoded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;

    #[test]
    fn roundtrip() {
        let recipient_key = SecretKey::random(&mut OsRng);
        let plaintext = b"rlpx v4 auth body, padded to a block boundary...";
        let auth_data = [0x01, 0x02];

        let msg = encrypt(plaintext, &recipient_key.public_key(), &auth_data).unwrap();
        let decrypted = decrypt(&msg, &recipient_key, &auth_data).unwrap();
        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn wrong_key_fails_authentication() {
        let recipient_key = SecretKey::random(&mut OsRng);
        let other_key = SecretKey::random(&mut OsRng);
        let auth_data = [0x00, 0x30];

        let msg = encrypt(b"secret", &recipient_key.public_key(), &auth_data).unwrap();
        assert!(matches!(
            decrypt(&msg, &other_key, &auth_data),
            Err(RLPxError::EciesAuthFailed) | Err(RLPxError::CryptographyError(_))
        ));
    }

    #[test]
    fn any_tampered_byte_fails_authentication() {
        let recipient_key = SecretKey::random(&mut OsRng);
        let auth_data = [0x00, 0x40];
        let msg = encrypt(&[0xab; 32], &recipient_key.public_key(), &auth_data).unwrap();

        // every region after the ephemeral key is covered by the MAC;
        // flipping any single byte must be detected
        for position in [PUBLIC_KEY_SIZE, PUBLIC_KEY_SIZE + IV_SIZE, msg.len() - 1] {
            let mut tampered = msg.clone();
            tampered[position] ^= 0x01;
            assert!(decrypt(&tampered, &recipient_key, &auth_data).is_err());
        }
    }

    #[test]
    fn tampered_size_prefix_fails_authentication() {
        let recipient_key = SecretKey::random(&mut OsRng);
        let msg = encrypt(&[0x11; 48], &recipient_key.public_key(), &[0x00, 0x70]).unwrap();
        assert!(matches!(
            decrypt(&msg, &recipient_key, &[0x01, 0x70]),
            Err(RLPxError::EciesAuthFailed)
        ));
    }

    #[test]
    fn block_size_rounding() {
        assert_eq!(round_up_to_block_size(0), 0);
        assert_eq!(round_up_to_block_size(1), 16);
        assert_eq!(round_up_to_block_size(16), 16);
        assert_eq!(round_up_to_block_size(17), 32);
    }
}
