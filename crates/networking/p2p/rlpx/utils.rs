use k256::{
    elliptic_curve::sec1::{FromEncodedPoint, ToEncodedPoint},
    EncodedPoint, PublicKey, SecretKey,
};
use wyrm_common::H512;
use wyrm_rlp::error::{RLPDecodeError, RLPEncodeError};

pub fn sha256(data: &[u8]) -> [u8; 32] {
    use k256::sha2::Digest;
    k256::sha2::Sha256::digest(data).into()
}

pub fn sha256_hmac(key: &[u8], inputs: &[&[u8]], auth_data: &[u8]) -> [u8; 32] {
    use hmac::Mac;
    use k256::sha2::Sha256;

    let mut hasher = hmac::Hmac::<Sha256>::new_from_slice(key).expect("HMAC accepts any key size");
    for input in inputs {
        hasher.update(input);
    }
    hasher.update(auth_data);
    hasher.finalize().into_bytes().into()
}

/// secp256k1 ECDH: the X coordinate of `public_key * secret_key`.
pub fn ecdh_xchng(secret_key: &SecretKey, public_key: &PublicKey) -> [u8; 32] {
    let shared = k256::ecdh::diffie_hellman(secret_key.to_nonzero_scalar(), public_key.as_affine());
    let mut secret = [0; 32];
    secret.copy_from_slice(&shared.raw_secret_bytes()[..32]);
    secret
}

/// NIST SP 800-56 concatenation KDF with SHA-256 (no shared info).
pub fn kdf(secret: &[u8], output: &mut [u8]) {
    concat_kdf::derive_key_into::<k256::sha2::Sha256>(secret, &[], output)
        .expect("output length fits the KDF bound");
}

/// Computes a node id from its public key: the uncompressed point without
/// the 0x04 prefix.
pub fn pubkey2id(pk: &PublicKey) -> H512 {
    let encoded = pk.to_encoded_point(false);
    let bytes = encoded.as_bytes();
    debug_assert_eq!(bytes[0], 4);
    H512::from_slice(&bytes[1..])
}

/// Computes a public key from a node id; `None` if the bytes are not a
/// valid curve point.
pub fn id2pubkey(id: H512) -> Option<PublicKey> {
    let point = EncodedPoint::from_untagged_bytes(&id.0.into());
    PublicKey::from_encoded_point(&point).into_option()
}

pub fn snappy_compress(encoded_data: Vec<u8>) -> Result<Vec<u8>, RLPEncodeError> {
    let mut snappy_encoder = snap::raw::Encoder::new();
    let mut msg_data = vec![0; snap::raw::max_compress_len(encoded_data.len()) + 1];
    let compressed_size = snappy_encoder
        .compress(&encoded_data, &mut msg_data)
        .map_err(|_| RLPEncodeError::InvalidCompression)?;
    msg_data.truncate(compressed_size);
    Ok(msg_data)
}

pub fn snappy_decompress(msg_data: &[u8]) -> Result<Vec<u8>, RLPDecodeError> {
    let mut snappy_decoder = snap::raw::Decoder::new();
    snappy_decoder
        .decompress_vec(msg_data)
        .map_err(|_| RLPDecodeError::InvalidCompression)
}
