use k256::{
    ecdsa::{self, RecoveryId, SigningKey, VerifyingKey},
    PublicKey, SecretKey,
};
use wyrm_common::{Signature, H256, H512};
use wyrm_rlp::{
    decode::RLPDecode,
    encode::RLPEncode,
    error::RLPDecodeError,
    structs::{Decoder, Encoder},
};

use super::{
    ecies,
    error::RLPxError,
    utils::{ecdh_xchng, id2pubkey, pubkey2id},
};

/// RLPx transport protocol version, sent inside Auth and AuthAck.
const RLPX_AUTH_VERSION: u8 = 4;

/// Encodes an Auth message, to start a handshake.
/// The result carries the u16 size prefix followed by the ECIES envelope.
pub(crate) fn encode_auth_message(
    static_key: &SecretKey,
    local_nonce: H256,
    remote_static_pubkey: &PublicKey,
    local_ephemeral_key: &SecretKey,
) -> Result<Vec<u8>, RLPxError> {
    let node_id = pubkey2id(&static_key.public_key());

    // Derive a shared secret from the static keys.
    let static_shared_secret = ecdh_xchng(static_key, remote_static_pubkey);

    // Create the signature included in the message.
    let signature = sign_shared_secret(
        static_shared_secret.into(),
        local_nonce,
        local_ephemeral_key,
    )?;

    // Compose the auth message.
    let auth = AuthMessage::new(signature, node_id, local_nonce);

    seal_handshake_message(auth.encode_to_vec(), remote_static_pubkey)
}

/// Decodes an incoming Auth message (`msg`, sans size prefix), recovering
/// the initiator's ephemeral public key from the signature.
pub(crate) fn decode_auth_message(
    static_key: &SecretKey,
    msg: &[u8],
    size_data: &[u8],
) -> Result<(AuthMessage, PublicKey), RLPxError> {
    let payload = ecies::decrypt(msg, static_key, size_data)?;

    // RLP-decode the message, ignoring the block-size padding behind it.
    let (auth, _padding) = AuthMessage::decode_unfinished(&payload)?;

    // Derive a shared secret from the static keys.
    let peer_pk = id2pubkey(auth.node_id).ok_or(RLPxError::InvalidPeerId)?;
    let static_shared_secret = ecdh_xchng(static_key, &peer_pk);
    let remote_ephemeral_key =
        retrieve_remote_ephemeral_key(static_shared_secret.into(), auth.nonce, auth.signature)?;
    Ok((auth, remote_ephemeral_key))
}

/// Encodes an Ack message, to complete a handshake.
pub(crate) fn encode_ack_message(
    local_ephemeral_key: &SecretKey,
    local_nonce: H256,
    remote_static_pubkey: &PublicKey,
) -> Result<Vec<u8>, RLPxError> {
    let ack = AckMessage::new(pubkey2id(&local_ephemeral_key.public_key()), local_nonce);

    seal_handshake_message(ack.encode_to_vec(), remote_static_pubkey)
}

/// Decodes an Ack message (`msg`, sans size prefix), completing a handshake.
pub(crate) fn decode_ack_message(
    static_key: &SecretKey,
    msg: &[u8],
    size_data: &[u8],
) -> Result<AckMessage, RLPxError> {
    let payload = ecies::decrypt(msg, static_key, size_data)?;

    let (ack, _padding) = AckMessage::decode_unfinished(&payload)?;
    Ok(ack)
}

// Pads the plaintext to an AES block boundary, encrypts it under the
// recipient's static key and prepends the big-endian u16 size that the MAC
// is bound to.
fn seal_handshake_message(
    mut plaintext: Vec<u8>,
    remote_static_pubkey: &PublicKey,
) -> Result<Vec<u8>, RLPxError> {
    plaintext.resize(ecies::round_up_to_block_size(plaintext.len()), 0);

    let size: u16 = (plaintext.len() + ecies::ECIES_OVERHEAD)
        .try_into()
        .map_err(|_| RLPxError::InvalidMessageLength)?;
    let size_bytes = size.to_be_bytes();

    let sealed = ecies::encrypt(&plaintext, remote_static_pubkey, &size_bytes)?;
    Ok([&size_bytes[..], &sealed].concat())
}

fn sign_shared_secret(
    shared_secret: H256,
    local_nonce: H256,
    local_ephemeral_key: &SecretKey,
) -> Result<Signature, RLPxError> {
    let signature_prehash = shared_secret ^ local_nonce;
    let (signature, rid) =
        SigningKey::from(local_ephemeral_key).sign_prehash_recoverable(&signature_prehash.0)?;
    let mut signature_bytes = [0; 65];
    signature_bytes[..64].copy_from_slice(signature.to_bytes().as_slice());
    signature_bytes[64] = rid.to_byte();
    Ok(signature_bytes.into())
}

fn retrieve_remote_ephemeral_key(
    shared_secret: H256,
    remote_nonce: H256,
    signature: Signature,
) -> Result<PublicKey, RLPxError> {
    let signature_prehash = shared_secret ^ remote_nonce;
    let sign = ecdsa::Signature::from_slice(&signature.to_fixed_bytes()[..64])?;
    let rid = RecoveryId::from_byte(signature[64]).ok_or(RLPxError::InvalidRecoveryId)?;
    let ephemeral_key =
        VerifyingKey::recover_from_prehash(signature_prehash.as_bytes(), &sign, rid)?;
    Ok(ephemeral_key.into())
}

#[derive(Debug)]
pub(crate) struct AuthMessage {
    /// The signature of the message.
    /// The signed data is `static-shared-secret ^ initiator-nonce`.
    pub signature: Signature,
    /// The node ID of the initiator.
    pub node_id: H512,
    /// The nonce generated by the initiator.
    pub nonce: H256,
    /// The RLPx transport version in use.
    pub version: u8,
}

impl AuthMessage {
    pub fn new(signature: Signature, node_id: H512, nonce: H256) -> Self {
        Self {
            signature,
            node_id,
            nonce,
            version: RLPX_AUTH_VERSION,
        }
    }
}

impl RLPEncode for AuthMessage {
    fn encode(&self, buf: &mut dyn bytes::BufMut) {
        Encoder::new(buf)
            .encode_field(&self.signature)
            .encode_field(&self.node_id)
            .encode_field(&self.nonce)
            .encode_field(&self.version)
            .finish()
    }
}

impl RLPDecode for AuthMessage {
    // NOTE: discards any extra data in the list after the known fields.
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        let decoder = Decoder::new(rlp)?;
        let (signature, decoder) = decoder.decode_field("signature")?;
        let (node_id, decoder) = decoder.decode_field("node_id")?;
        let (nonce, decoder) = decoder.decode_field("nonce")?;
        let (version, decoder) = decoder.decode_field("version")?;

        let rest = decoder.finish_unchecked();
        let this = Self {
            signature,
            node_id,
            nonce,
            version,
        };
        Ok((this, rest))
    }
}

#[derive(Debug, Clone)]
pub(crate) struct AckMessage {
    /// The recipient's ephemeral public key.
    pub ephemeral_pubkey: H512,
    /// The nonce generated by the recipient.
    pub nonce: H256,
    /// The RLPx transport version in use.
    pub version: u8,
}

impl AckMessage {
    pub fn new(ephemeral_pubkey: H512, nonce: H256) -> Self {
        Self {
            ephemeral_pubkey,
            nonce,
            version: RLPX_AUTH_VERSION,
        }
    }

    pub fn get_ephemeral_pubkey(&self) -> Option<PublicKey> {
        id2pubkey(self.ephemeral_pubkey)
    }
}

impl RLPEncode for AckMessage {
    fn encode(&self, buf: &mut dyn bytes::BufMut) {
        Encoder::new(buf)
            .encode_field(&self.ephemeral_pubkey)
            .encode_field(&self.nonce)
            .encode_field(&self.version)
            .finish()
    }
}

impl RLPDecode for AckMessage {
    // NOTE: discards any extra data in the list after the known fields.
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        let decoder = Decoder::new(rlp)?;
        let (ephemeral_pubkey, decoder) = decoder.decode_field("ephemeral_pubkey")?;
        let (nonce, decoder) = decoder.decode_field("nonce")?;
        let (version, decoder) = decoder.decode_field("version")?;

        let rest = decoder.finish_unchecked();
        let this = Self {
            ephemeral_pubkey,
            nonce,
            version,
        };
        Ok((this, rest))
    }
}
