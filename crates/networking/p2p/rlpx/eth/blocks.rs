use bytes::BufMut;
use wyrm_common::{
    types::{Block, BlockBody, BlockHash},
    U256,
};
use wyrm_rlp::{
    error::{RLPDecodeError, RLPEncodeError},
    structs::{Decoder, Encoder},
};

use crate::rlpx::{
    message::RLPxMessage,
    utils::{snappy_compress, snappy_decompress},
};

// https://github.com/ethereum/devp2p/blob/master/caps/eth.md#getblockbodies-0x05
#[derive(Debug, Clone)]
pub struct GetBlockBodies {
    // id is a u64 chosen by the requesting peer, the responding peer must
    // mirror the value for the response
    // https://github.com/ethereum/devp2p/blob/master/caps/eth.md#protocol-messages
    pub id: u64,
    pub block_hashes: Vec<BlockHash>,
}

impl GetBlockBodies {
    pub fn new(id: u64, block_hashes: Vec<BlockHash>) -> Self {
        Self { block_hashes, id }
    }

    pub fn is_empty(&self) -> bool {
        self.block_hashes.is_empty()
    }
}

impl RLPxMessage for GetBlockBodies {
    fn encode(&self, buf: &mut dyn BufMut) -> Result<(), RLPEncodeError> {
        let mut encoded_data = vec![];
        Encoder::new(&mut encoded_data)
            .encode_field(&self.id)
            .encode_field(&self.block_hashes)
            .finish();

        let msg_data = snappy_compress(encoded_data)?;
        buf.put_slice(&msg_data);
        Ok(())
    }

    fn decode(msg_data: &[u8]) -> Result<Self, RLPDecodeError> {
        let decompressed_data = snappy_decompress(msg_data)?;
        let decoder = Decoder::new(&decompressed_data)?;
        let (id, decoder): (u64, _) = decoder.decode_field("request-id")?;
        let (block_hashes, _): (Vec<BlockHash>, _) = decoder.decode_field("blockHashes")?;

        Ok(Self::new(id, block_hashes))
    }
}

// https://github.com/ethereum/devp2p/blob/master/caps/eth.md#blockbodies-0x06
#[derive(Debug, Clone)]
pub struct BlockBodies {
    // id is a u64 chosen by the requesting peer, the responding peer must
    // mirror the value for the response
    pub id: u64,
    pub block_bodies: Vec<BlockBody>,
}

impl BlockBodies {
    pub fn new(id: u64, block_bodies: Vec<BlockBody>) -> Self {
        Self { block_bodies, id }
    }
}

impl RLPxMessage for BlockBodies {
    fn encode(&self, buf: &mut dyn BufMut) -> Result<(), RLPEncodeError> {
        let mut encoded_data = vec![];
        Encoder::new(&mut encoded_data)
            .encode_field(&self.id)
            .encode_field(&self.block_bodies)
            .finish();

        let msg_data = snappy_compress(encoded_data)?;
        buf.put_slice(&msg_data);
        Ok(())
    }

    fn decode(msg_data: &[u8]) -> Result<Self, RLPDecodeError> {
        let decompressed_data = snappy_decompress(msg_data)?;
        let decoder = Decoder::new(&decompressed_data)?;
        let (id, decoder): (u64, _) = decoder.decode_field("request-id")?;
        let (block_bodies, _): (Vec<BlockBody>, _) = decoder.decode_field("blockBodies")?;

        Ok(Self::new(id, block_bodies))
    }
}

// https://github.com/ethereum/devp2p/blob/master/caps/eth.md#newblock-0x07
#[derive(Debug, Clone)]
pub struct NewBlock {
    pub block: Block,
    pub total_difficulty: U256,
}

impl NewBlock {
    pub fn new(block: Block, total_difficulty: U256) -> Self {
        Self {
            block,
            total_difficulty,
        }
    }
}

impl RLPxMessage for NewBlock {
    fn encode(&self, buf: &mut dyn BufMut) -> Result<(), RLPEncodeError> {
        let mut encoded_data = vec![];
        Encoder::new(&mut encoded_data)
            .encode_field(&self.block)
            .encode_field(&self.total_difficulty)
            .finish();

        let msg_data = snappy_compress(encoded_data)?;
        buf.put_slice(&msg_data);
        Ok(())
    }

    fn decode(msg_data: &[u8]) -> Result<Self, RLPDecodeError> {
        let decompressed_data = snappy_decompress(msg_data)?;
        let decoder = Decoder::new(&decompressed_data)?;
        let (block, decoder): (Block, _) = decoder.decode_field("block")?;
        let (total_difficulty, _): (U256, _) = decoder.decode_field("totalDifficulty")?;

        Ok(Self::new(block, total_difficulty))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wyrm_common::types::{BlockHeader, Withdrawal};
    use wyrm_common::Address;

    #[test]
    fn get_block_bodies_empty_message() {
        let blocks_hash = vec![];
        let get_block_bodies = GetBlockBodies::new(1, blocks_hash.clone());

        let mut buf = Vec::new();
        get_block_bodies.encode(&mut buf).unwrap();

        let decoded = GetBlockBodies::decode(&buf).unwrap();
        assert_eq!(decoded.id, 1);
        assert_eq!(decoded.block_hashes, blocks_hash);
    }

    #[test]
    fn get_block_bodies_not_empty_message() {
        let blocks_hash = vec![
            BlockHash::from([0; 32]),
            BlockHash::from([1; 32]),
            BlockHash::from([2; 32]),
        ];
        let get_block_bodies = GetBlockBodies::new(1, blocks_hash.clone());

        let mut buf = Vec::new();
        get_block_bodies.encode(&mut buf).unwrap();

        let decoded = GetBlockBodies::decode(&buf).unwrap();
        assert_eq!(decoded.id, 1);
        assert_eq!(decoded.block_hashes, blocks_hash);
    }

    #[test]
    fn block_bodies_roundtrip() {
        let bodies = vec![
            BlockBody::empty(),
            BlockBody {
                transactions: vec![],
                ommers: vec![],
                withdrawals: Some(vec![Withdrawal {
                    index: 3,
                    validator_index: 7,
                    address: Address::repeat_byte(0xaa),
                    amount: 64,
                }]),
            },
        ];
        let message = BlockBodies::new(33, bodies.clone());

        let mut buf = Vec::new();
        message.encode(&mut buf).unwrap();

        let decoded = BlockBodies::decode(&buf).unwrap();
        assert_eq!(decoded.id, 33);
        assert_eq!(decoded.block_bodies, bodies);
    }

    #[test]
    fn new_block_roundtrip() {
        let block = Block::new(BlockHeader::default(), BlockBody::empty());
        let announce = NewBlock::new(block.clone(), U256::from(0x8000_u64));

        let mut buf = Vec::new();
        announce.encode(&mut buf).unwrap();

        let decoded = NewBlock::decode(&buf).unwrap();
        assert_eq!(decoded.block, block);
        assert_eq!(decoded.total_difficulty, U256::from(0x8000_u64));
    }
}
