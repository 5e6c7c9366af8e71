use bytes::BufMut;
use k256::PublicKey;
use wyrm_common::H512;
use wyrm_rlp::{
    decode::RLPDecode,
    encode::RLPEncode,
    error::{RLPDecodeError, RLPEncodeError},
    structs::{Decoder, Encoder},
};

use super::{
    message::RLPxMessage,
    utils::{id2pubkey, pubkey2id, snappy_compress, snappy_decompress},
};

const CLIENT_ID: &str = "wyrm/0.1.0";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    P2p,
    Eth,
}

impl RLPEncode for Capability {
    fn encode(&self, buf: &mut dyn BufMut) {
        match self {
            Self::P2p => "p2p".encode(buf),
            Self::Eth => "eth".encode(buf),
        }
    }
}

impl RLPDecode for Capability {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        let (name, rest) = String::decode_unfinished(rlp)?;
        match name.as_str() {
            "p2p" => Ok((Capability::P2p, rest)),
            "eth" => Ok((Capability::Eth, rest)),
            other => Err(RLPDecodeError::Custom(format!(
                "Unknown capability: {other}"
            ))),
        }
    }
}

#[derive(Debug)]
pub struct HelloMessage {
    pub capabilities: Vec<(Capability, u8)>,
    pub node_id: PublicKey,
}

impl HelloMessage {
    pub fn new(capabilities: Vec<(Capability, u8)>, node_id: PublicKey) -> Self {
        Self {
            capabilities,
            node_id,
        }
    }
}

impl RLPxMessage for HelloMessage {
    fn encode(&self, mut buf: &mut dyn BufMut) -> Result<(), RLPEncodeError> {
        // the Hello is exchanged before compression is negotiated, so it is
        // the one message that is never snappy-compressed
        Encoder::new(&mut buf)
            .encode_field(&5_u8) // protocolVersion
            .encode_field(&CLIENT_ID) // clientId
            .encode_field(&self.capabilities) // capabilities
            .encode_field(&0u8) // listenPort (ignored)
            .encode_field(&pubkey2id(&self.node_id)) // nodeId
            .finish();
        Ok(())
    }

    fn decode(msg_data: &[u8]) -> Result<Self, RLPDecodeError> {
        // decode hello message: [protocolVersion: P, clientId: B, capabilities, listenPort: P, nodeId: B_64, ...]
        let decoder = Decoder::new(msg_data)?;
        let (_protocol_version, decoder): (u64, _) = decoder.decode_field("protocolVersion")?;
        let (_client_id, decoder): (String, _) = decoder.decode_field("clientId")?;

        // [[cap1, capVersion1], [cap2, capVersion2], ...]
        // unknown capability names are dropped rather than failing the hello
        let (capabilities, decoder): (Vec<(String, u8)>, _) =
            decoder.decode_field("capabilities")?;
        let capabilities = capabilities
            .into_iter()
            .filter_map(|(name, version)| match name.as_str() {
                "p2p" => Some((Capability::P2p, version)),
                "eth" => Some((Capability::Eth, version)),
                _ => None,
            })
            .collect();

        // this field should be ignored
        let (_listen_port, decoder): (u16, _) = decoder.decode_field("listenPort")?;

        let (node_id, decoder): (H512, _) = decoder.decode_field("nodeId")?;

        // implementations must ignore any additional list elements
        let _padding = decoder.finish_unchecked();

        Ok(Self::new(
            capabilities,
            id2pubkey(node_id).ok_or(RLPDecodeError::MalformedData)?,
        ))
    }
}

#[derive(Debug)]
pub struct DisconnectMessage {
    pub reason: Option<u8>,
}

impl DisconnectMessage {
    pub fn new(reason: Option<u8>) -> Self {
        Self { reason }
    }
}

impl RLPxMessage for DisconnectMessage {
    fn encode(&self, buf: &mut dyn BufMut) -> Result<(), RLPEncodeError> {
        let mut encoded_data = vec![];
        // disconnect msg_data is reason or none
        match self.reason {
            Some(value) => Encoder::new(&mut encoded_data)
                .encode_field(&value)
                .finish(),
            None => Vec::<u8>::new().encode(&mut encoded_data),
        }
        let msg_data = snappy_compress(encoded_data)?;
        buf.put_slice(&msg_data);
        Ok(())
    }

    fn decode(msg_data: &[u8]) -> Result<Self, RLPDecodeError> {
        // decode disconnect message: [reason (optional)]
        let decompressed_data = snappy_decompress(msg_data)?;
        // disconnect reasons are encoded in different ways in the wild
        let reason = match decompressed_data.len() {
            0 => None,
            // as a single byte
            1 => Some(decompressed_data[0]),
            // as an RLP encoded list
            _ => {
                let decoder = Decoder::new(&decompressed_data)?;
                let (reason, _) = decoder.decode_optional_field();
                reason
            }
        };
        Ok(Self::new(reason))
    }
}

#[derive(Debug)]
pub struct PingMessage {}

impl RLPxMessage for PingMessage {
    fn encode(&self, buf: &mut dyn BufMut) -> Result<(), RLPEncodeError> {
        let mut encoded_data = vec![];
        // ping msg_data is only []
        Vec::<u8>::new().encode(&mut encoded_data);
        let msg_data = snappy_compress(encoded_data)?;
        buf.put_slice(&msg_data);
        Ok(())
    }

    fn decode(msg_data: &[u8]) -> Result<Self, RLPDecodeError> {
        // data is an empty list, snappy compressed; tolerate anything else
        let _decompressed_data = snappy_decompress(msg_data)?;
        Ok(Self {})
    }
}

#[derive(Debug)]
pub struct PongMessage {}

impl RLPxMessage for PongMessage {
    fn encode(&self, buf: &mut dyn BufMut) -> Result<(), RLPEncodeError> {
        let mut encoded_data = vec![];
        // pong msg_data is only []
        Vec::<u8>::new().encode(&mut encoded_data);
        let msg_data = snappy_compress(encoded_data)?;
        buf.put_slice(&msg_data);
        Ok(())
    }

    fn decode(msg_data: &[u8]) -> Result<Self, RLPDecodeError> {
        let _decompressed_data = snappy_decompress(msg_data)?;
        Ok(Self {})
    }
}
