use bytes::{BufMut, Bytes};
use ethereum_types::{Address, Bloom, Signature, H256, H512, U256};
use tinyvec::ArrayVec;

use super::constants::{RLP_EMPTY_LIST, RLP_NULL};

/// Trait for encoding values into RLP.
/// Implementors only need to provide [`RLPEncode::encode`]; the other
/// methods are derived from it.
pub trait RLPEncode {
    fn encode(&self, buf: &mut dyn BufMut);

    fn length(&self) -> usize {
        let mut buf = Vec::new();
        self.encode(&mut buf);
        buf.len()
    }

    fn encode_to_vec(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.encode(&mut buf);
        buf
    }
}

impl RLPEncode for bool {
    #[inline(always)]
    fn encode(&self, buf: &mut dyn BufMut) {
        if *self {
            buf.put_u8(0x01);
        } else {
            buf.put_u8(RLP_NULL);
        }
    }

    #[inline(always)]
    fn length(&self) -> usize {
        1
    }
}

// An unsigned integer is encoded as the shortest big-endian byte string
// holding its value, then as a plain string.
macro_rules! impl_rlp_encode_uint {
    ($t:ty) => {
        impl RLPEncode for $t {
            fn encode(&self, buf: &mut dyn BufMut) {
                match *self {
                    // zero is the empty string
                    0 => buf.put_u8(RLP_NULL),
                    // a single byte in [0x00, 0x7f] is its own encoding
                    n @ 1..=0x7f => buf.put_u8(n as u8),
                    n => {
                        let mut bytes = ArrayVec::<[u8; 16]>::new();
                        bytes.extend_from_slice(&n.to_be_bytes());
                        let start = bytes.iter().position(|&x| x != 0).unwrap_or_default();
                        let len = bytes.len() - start;
                        buf.put_u8(RLP_NULL + len as u8);
                        buf.put_slice(&bytes[start..]);
                    }
                }
            }
        }
    };
}

impl_rlp_encode_uint!(u8);
impl_rlp_encode_uint!(u16);
impl_rlp_encode_uint!(u32);
impl_rlp_encode_uint!(u64);
impl_rlp_encode_uint!(usize);

impl RLPEncode for () {
    fn encode(&self, buf: &mut dyn BufMut) {
        buf.put_u8(RLP_NULL);
    }
}

impl RLPEncode for [u8] {
    #[inline(always)]
    fn encode(&self, buf: &mut dyn BufMut) {
        if self.len() == 1 && self[0] < RLP_NULL {
            buf.put_u8(self[0]);
        } else {
            let len = self.len();
            if len < 56 {
                buf.put_u8(RLP_NULL + len as u8);
            } else {
                let mut bytes = ArrayVec::<[u8; 8]>::new();
                bytes.extend_from_slice(&len.to_be_bytes());
                let start = bytes.iter().position(|&x| x != 0).unwrap_or_default();
                let len_len = bytes.len() - start;
                buf.put_u8(0xb7 + len_len as u8);
                buf.put_slice(&bytes[start..]);
            }
            buf.put_slice(self);
        }
    }
}

impl<const N: usize> RLPEncode for [u8; N] {
    fn encode(&self, buf: &mut dyn BufMut) {
        self.as_ref().encode(buf)
    }
}

impl RLPEncode for str {
    fn encode(&self, buf: &mut dyn BufMut) {
        self.as_bytes().encode(buf)
    }
}

impl RLPEncode for &str {
    fn encode(&self, buf: &mut dyn BufMut) {
        self.as_bytes().encode(buf)
    }
}

impl RLPEncode for String {
    fn encode(&self, buf: &mut dyn BufMut) {
        self.as_bytes().encode(buf)
    }
}

impl RLPEncode for Bytes {
    fn encode(&self, buf: &mut dyn BufMut) {
        self.as_ref().encode(buf)
    }
}

impl RLPEncode for U256 {
    fn encode(&self, buf: &mut dyn BufMut) {
        let leading_zeros_in_bytes = (self.leading_zeros() / 8) as usize;
        let mut bytes = [0u8; 32];
        self.to_big_endian(&mut bytes);
        bytes[leading_zeros_in_bytes..].encode(buf)
    }
}

impl<T: RLPEncode> RLPEncode for Vec<T> {
    fn encode(&self, buf: &mut dyn BufMut) {
        if self.is_empty() {
            buf.put_u8(RLP_EMPTY_LIST);
        } else {
            let total_len: usize = self.iter().map(|item| item.length()).sum();
            encode_length(total_len, buf);
            for item in self {
                item.encode(buf);
            }
        }
    }
}

/// Writes the RLP list prefix for a payload of `total_len` bytes.
pub fn encode_length(total_len: usize, buf: &mut dyn BufMut) {
    if total_len < 56 {
        buf.put_u8(RLP_EMPTY_LIST + total_len as u8);
    } else {
        let mut bytes = ArrayVec::<[u8; 8]>::new();
        bytes.extend_from_slice(&total_len.to_be_bytes());
        let start = bytes.iter().position(|&x| x != 0).unwrap_or_default();
        let len = bytes.len() - start;
        buf.put_u8(0xf7 + len as u8);
        buf.put_slice(&bytes[start..]);
    }
}

impl<S: RLPEncode, T: RLPEncode> RLPEncode for (S, T) {
    fn encode(&self, buf: &mut dyn BufMut) {
        let total_len = self.0.length() + self.1.length();
        encode_length(total_len, buf);
        self.0.encode(buf);
        self.1.encode(buf);
    }
}

impl<S: RLPEncode, T: RLPEncode, U: RLPEncode> RLPEncode for (S, T, U) {
    fn encode(&self, buf: &mut dyn BufMut) {
        let total_len = self.0.length() + self.1.length() + self.2.length();
        encode_length(total_len, buf);
        self.0.encode(buf);
        self.1.encode(buf);
        self.2.encode(buf);
    }
}

// encoding for ethereum-types hashes

impl RLPEncode for ethereum_types::H128 {
    fn encode(&self, buf: &mut dyn BufMut) {
        self.as_bytes().encode(buf)
    }
}

impl RLPEncode for H256 {
    fn encode(&self, buf: &mut dyn BufMut) {
        self.as_bytes().encode(buf)
    }
}

impl RLPEncode for H512 {
    fn encode(&self, buf: &mut dyn BufMut) {
        self.as_bytes().encode(buf)
    }
}

impl RLPEncode for Address {
    fn encode(&self, buf: &mut dyn BufMut) {
        self.as_bytes().encode(buf)
    }
}

impl RLPEncode for Signature {
    fn encode(&self, buf: &mut dyn BufMut) {
        self.as_bytes().encode(buf)
    }
}

impl RLPEncode for Bloom {
    fn encode(&self, buf: &mut dyn BufMut) {
        self.0.encode(buf)
    }
}
