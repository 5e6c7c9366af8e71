use bytes::BufMut;
use bytes::Bytes;
use ethereum_types::{Address, H256, U256};
use wyrm_rlp::{
    constants::{RLP_EMPTY_LIST, RLP_NULL},
    decode::{decode_bytes, RLPDecode},
    encode::RLPEncode,
    error::RLPDecodeError,
    structs::{Decoder, Encoder},
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Transaction {
    LegacyTransaction(LegacyTransaction),
    EIP1559Transaction(EIP1559Transaction),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TxType {
    Legacy = 0x00,
    EIP1559 = 0x02,
}

impl Transaction {
    pub fn tx_type(&self) -> TxType {
        match self {
            Transaction::LegacyTransaction(_) => TxType::Legacy,
            Transaction::EIP1559Transaction(_) => TxType::EIP1559,
        }
    }

    /// Canonical encoding: `type || RLP(fields)` for typed transactions,
    /// plain `RLP(fields)` for legacy ones. This is the form that gets
    /// hashed into the transactions root.
    pub fn encode_canonical(&self, buf: &mut dyn BufMut) {
        match self {
            // legacy transactions have no type prefix
            Transaction::LegacyTransaction(tx) => tx.encode(buf),
            Transaction::EIP1559Transaction(tx) => {
                buf.put_u8(TxType::EIP1559 as u8);
                tx.encode(buf);
            }
        }
    }

    pub fn encode_canonical_to_vec(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.encode_canonical(&mut buf);
        buf
    }

    pub fn decode_canonical(bytes: &[u8]) -> Result<Self, RLPDecodeError> {
        let first_byte = bytes.first().ok_or(RLPDecodeError::InvalidLength)?;
        match first_byte {
            // a leading list prefix means a legacy transaction
            x if *x >= RLP_EMPTY_LIST => {
                LegacyTransaction::decode(bytes).map(Transaction::LegacyTransaction)
            }
            x if *x == TxType::EIP1559 as u8 => {
                EIP1559Transaction::decode(&bytes[1..]).map(Transaction::EIP1559Transaction)
            }
            _ => Err(RLPDecodeError::Custom(format!(
                "Invalid transaction type: {first_byte}"
            ))),
        }
    }
}

// Inside a block body (and on the eth wire) typed transactions travel as RLP
// byte strings wrapping their canonical encoding; legacy ones as plain lists.
impl RLPEncode for Transaction {
    fn encode(&self, buf: &mut dyn BufMut) {
        match self {
            Transaction::LegacyTransaction(tx) => tx.encode(buf),
            tx => tx.encode_canonical_to_vec().as_slice().encode(buf),
        }
    }
}

impl RLPDecode for Transaction {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        let first_byte = rlp.first().ok_or(RLPDecodeError::InvalidLength)?;
        if *first_byte >= RLP_EMPTY_LIST {
            let (tx, rest) = LegacyTransaction::decode_unfinished(rlp)?;
            return Ok((Transaction::LegacyTransaction(tx), rest));
        }
        let (payload, rest) = decode_bytes(rlp)?;
        Ok((Transaction::decode_canonical(payload)?, rest))
    }
}

/// The transaction's recipient: a call to an address or a contract creation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TxKind {
    Call(Address),
    Create,
}

impl RLPEncode for TxKind {
    fn encode(&self, buf: &mut dyn BufMut) {
        match self {
            Self::Call(address) => address.encode(buf),
            Self::Create => buf.put_u8(RLP_NULL),
        }
    }
}

impl RLPDecode for TxKind {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        let first_byte = rlp.first().ok_or(RLPDecodeError::InvalidLength)?;
        if *first_byte == RLP_NULL {
            return Ok((Self::Create, &rlp[1..]));
        }
        Address::decode_unfinished(rlp).map(|(addr, rest)| (Self::Call(addr), rest))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LegacyTransaction {
    pub nonce: u64,
    pub gas_price: U256,
    pub gas: u64,
    pub to: TxKind,
    pub value: U256,
    pub data: Bytes,
    pub v: U256,
    pub r: U256,
    pub s: U256,
}

impl RLPEncode for LegacyTransaction {
    fn encode(&self, buf: &mut dyn BufMut) {
        Encoder::new(buf)
            .encode_field(&self.nonce)
            .encode_field(&self.gas_price)
            .encode_field(&self.gas)
            .encode_field(&self.to)
            .encode_field(&self.value)
            .encode_field(&self.data)
            .encode_field(&self.v)
            .encode_field(&self.r)
            .encode_field(&self.s)
            .finish();
    }
}

impl RLPDecode for LegacyTransaction {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        let decoder = Decoder::new(rlp)?;
        let (nonce, decoder) = decoder.decode_field("nonce")?;
        let (gas_price, decoder) = decoder.decode_field("gas_price")?;
        let (gas, decoder) = decoder.decode_field("gas")?;
        let (to, decoder) = decoder.decode_field("to")?;
        let (value, decoder) = decoder.decode_field("value")?;
        let (data, decoder) = decoder.decode_field("data")?;
        let (v, decoder) = decoder.decode_field("v")?;
        let (r, decoder) = decoder.decode_field("r")?;
        let (s, decoder) = decoder.decode_field("s")?;
        let rest = decoder.finish()?;

        let tx = LegacyTransaction {
            nonce,
            gas_price,
            gas,
            to,
            value,
            data,
            v,
            r,
            s,
        };
        Ok((tx, rest))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EIP1559Transaction {
    pub chain_id: u64,
    pub nonce: u64,
    pub max_priority_fee_per_gas: u64,
    pub max_fee_per_gas: u64,
    pub gas_limit: u64,
    pub to: TxKind,
    pub value: U256,
    pub data: Bytes,
    pub access_list: Vec<(Address, Vec<H256>)>,
    pub signature_y_parity: bool,
    pub signature_r: U256,
    pub signature_s: U256,
}

impl RLPEncode for EIP1559Transaction {
    fn encode(&self, buf: &mut dyn BufMut) {
        Encoder::new(buf)
            .encode_field(&self.chain_id)
            .encode_field(&self.nonce)
            .encode_field(&self.max_priority_fee_per_gas)
            .encode_field(&self.max_fee_per_gas)
            .encode_field(&self.gas_limit)
            .encode_field(&self.to)
            .encode_field(&self.value)
            .encode_field(&self.data)
            .encode_field(&self.access_list)
            .encode_field(&self.signature_y_parity)
            .encode_field(&self.signature_r)
            .encode_field(&self.signature_s)
            .finish();
    }
}

impl RLPDecode for EIP1559Transaction {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        let decoder = Decoder::new(rlp)?;
        let (chain_id, decoder) = decoder.decode_field("chain_id")?;
        let (nonce, decoder) = decoder.decode_field("nonce")?;
        let (max_priority_fee_per_gas, decoder) =
            decoder.decode_field("max_priority_fee_per_gas")?;
        let (max_fee_per_gas, decoder) = decoder.decode_field("max_fee_per_gas")?;
        let (gas_limit, decoder) = decoder.decode_field("gas_limit")?;
        let (to, decoder) = decoder.decode_field("to")?;
        let (value, decoder) = decoder.decode_field("value")?;
        let (data, decoder) = decoder.decode_field("data")?;
        let (access_list, decoder) = decoder.decode_field("access_list")?;
        let (signature_y_parity, decoder) = decoder.decode_field("signature_y_parity")?;
        let (signature_r, decoder) = decoder.decode_field("signature_r")?;
        let (signature_s, decoder) = decoder.decode_field("signature_s")?;
        let rest = decoder.finish()?;

        let tx = EIP1559Transaction {
            chain_id,
            nonce,
            max_priority_fee_per_gas,
            max_fee_per_gas,
            gas_limit,
            to,
            value,
            data,
            access_list,
            signature_y_parity,
            signature_r,
            signature_s,
        };
        Ok((tx, rest))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    fn sample_legacy() -> Transaction {
        Transaction::LegacyTransaction(LegacyTransaction {
            nonce: 0xfa,
            gas_price: U256::from(0x3127_4038_u64),
            gas: 0xf618,
            to: TxKind::Call(Address::from(hex!(
                "db8d964741c53e55df9c2d4e9414c6c96482874e"
            ))),
            value: U256::from(0x0aa8_7bee_5380_00_u64),
            data: Bytes::new(),
            v: U256::from(0x60306c_u64),
            r: U256::from_big_endian(&hex!(
                "3aa421df67a101c45ff9cb06ce28f518a5d8d8dbb76a79361280071909650a27"
            )),
            s: U256::from_big_endian(&hex!(
                "5a447ff053c4ae601cfe81859b58d5603f2d0a73481c50f348089032feb0b073"
            )),
        })
    }

    fn sample_eip1559() -> Transaction {
        Transaction::EIP1559Transaction(EIP1559Transaction {
            chain_id: 0x301824,
            nonce: 0x04,
            max_priority_fee_per_gas: 0x13f157f8,
            max_fee_per_gas: 0x2daf517a,
            gas_limit: 0x0186a0,
            to: TxKind::Call(Address::zero()),
            value: U256::zero(),
            data: Bytes::from_static(&[0x7a, 0x0a, 0x60]),
            access_list: vec![],
            signature_y_parity: false,
            signature_r: U256::from(0x99),
            signature_s: U256::from(0x77),
        })
    }

    #[test]
    fn legacy_roundtrip() {
        let tx = sample_legacy();
        let encoded = tx.encode_to_vec();
        let decoded = Transaction::decode(&encoded).unwrap();
        assert_eq!(tx, decoded);
        // canonical and network encodings coincide for legacy transactions
        assert_eq!(encoded, tx.encode_canonical_to_vec());
    }

    #[test]
    fn eip1559_roundtrip() {
        let tx = sample_eip1559();
        let encoded = tx.encode_to_vec();
        let decoded = Transaction::decode(&encoded).unwrap();
        assert_eq!(tx, decoded);
    }

    #[test]
    fn eip1559_network_form_wraps_canonical_bytes() {
        let tx = sample_eip1559();
        let canonical = tx.encode_canonical_to_vec();
        assert_eq!(canonical[0], TxType::EIP1559 as u8);

        let network = tx.encode_to_vec();
        let (payload, rest) = decode_bytes(&network).unwrap();
        assert!(rest.is_empty());
        assert_eq!(payload, canonical);

        let decoded = Transaction::decode_canonical(&canonical).unwrap();
        assert_eq!(tx, decoded);
    }

    #[test]
    fn mixed_transaction_list_roundtrip() {
        let txs = vec![sample_legacy(), sample_eip1559(), sample_legacy()];
        let encoded = txs.encode_to_vec();
        let decoded: Vec<Transaction> = RLPDecode::decode(&encoded).unwrap();
        assert_eq!(txs, decoded);
    }

    #[test]
    fn unknown_type_byte_is_rejected() {
        assert!(Transaction::decode_canonical(&[0x05, 0xc0]).is_err());
    }
}
