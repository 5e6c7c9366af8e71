use bytes::BufMut;
use std::fmt::Display;
use wyrm_rlp::encode::RLPEncode;
use wyrm_rlp::error::{RLPDecodeError, RLPEncodeError};

use super::eth::blocks::{BlockBodies, GetBlockBodies, NewBlock};
use super::p2p::{DisconnectMessage, HelloMessage, PingMessage, PongMessage};

pub trait RLPxMessage: Sized {
    fn encode(&self, buf: &mut dyn BufMut) -> Result<(), RLPEncodeError>;

    fn decode(msg_data: &[u8]) -> Result<Self, RLPDecodeError>;
}

#[derive(Debug)]
pub enum Message {
    Hello(HelloMessage),
    Disconnect(DisconnectMessage),
    Ping(PingMessage),
    Pong(PongMessage),
    GetBlockBodies(GetBlockBodies),
    BlockBodies(BlockBodies),
    NewBlock(NewBlock),
}

impl Message {
    pub fn decode(msg_id: u8, msg_data: &[u8]) -> Result<Message, RLPDecodeError> {
        match msg_id {
            0x00 => Ok(Message::Hello(HelloMessage::decode(msg_data)?)),
            0x01 => Ok(Message::Disconnect(DisconnectMessage::decode(msg_data)?)),
            0x02 => Ok(Message::Ping(PingMessage::decode(msg_data)?)),
            0x03 => Ok(Message::Pong(PongMessage::decode(msg_data)?)),
            // Subprotocol messages are identified by their offset into the
            // eth capability, which starts at 0x10: GetBlockBodies has
            // offset 5, so it travels as 0x15.
            // https://github.com/ethereum/devp2p/blob/master/caps/eth.md
            0x15 => Ok(Message::GetBlockBodies(GetBlockBodies::decode(msg_data)?)),
            0x16 => Ok(Message::BlockBodies(BlockBodies::decode(msg_data)?)),
            0x17 => Ok(Message::NewBlock(NewBlock::decode(msg_data)?)),
            _ => Err(RLPDecodeError::MalformedData),
        }
    }

    pub fn encode(&self, buf: &mut dyn BufMut) -> Result<(), RLPEncodeError> {
        match self {
            Message::Hello(msg) => {
                0x00_u8.encode(buf);
                msg.encode(buf)
            }
            Message::Disconnect(msg) => {
                0x01_u8.encode(buf);
                msg.encode(buf)
            }
            Message::Ping(msg) => {
                0x02_u8.encode(buf);
                msg.encode(buf)
            }
            Message::Pong(msg) => {
                0x03_u8.encode(buf);
                msg.encode(buf)
            }
            Message::GetBlockBodies(msg) => {
                0x15_u8.encode(buf);
                msg.encode(buf)
            }
            Message::BlockBodies(msg) => {
                0x16_u8.encode(buf);
                msg.encode(buf)
            }
            Message::NewBlock(msg) => {
                0x17_u8.encode(buf);
                msg.encode(buf)
            }
        }
    }
}

impl Display for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Message::Hello(_) => "p2p:Hello".fmt(f),
            Message::Disconnect(_) => "p2p:Disconnect".fmt(f),
            Message::Ping(_) => "p2p:Ping".fmt(f),
            Message::Pong(_) => "p2p:Pong".fmt(f),
            Message::GetBlockBodies(_) => "eth:GetBlockBodies".fmt(f),
            Message::BlockBodies(_) => "eth:BlockBodies".fmt(f),
            Message::NewBlock(_) => "eth:NewBlock".fmt(f),
        }
    }
}
