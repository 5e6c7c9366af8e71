use super::{
    constants::{RLP_EMPTY_LIST, RLP_NULL},
    error::RLPDecodeError,
};
use bytes::Bytes;
use ethereum_types::{Address, Bloom, Signature, H128, H160, H256, H512, H520, U256};

/// Trait for decoding RLP encoded slices of data.
/// Implementors provide [`RLPDecode::decode_unfinished`], which decodes a
/// value and returns the remaining input; [`RLPDecode::decode`] additionally
/// requires the input to be fully consumed.
pub trait RLPDecode: Sized {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError>;

    fn decode(rlp: &[u8]) -> Result<Self, RLPDecodeError> {
        let (decoded, remaining) = Self::decode_unfinished(rlp)?;
        if !remaining.is_empty() {
            return Err(RLPDecodeError::InvalidLength);
        }
        Ok(decoded)
    }
}

impl RLPDecode for bool {
    #[inline(always)]
    fn decode_unfinished(buf: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        if buf.is_empty() {
            return Err(RLPDecodeError::InvalidLength);
        }
        let value = match buf[0] {
            RLP_NULL => false,
            0x01 => true,
            _ => return Err(RLPDecodeError::MalformedBoolean),
        };
        Ok((value, &buf[1..]))
    }
}

impl RLPDecode for u8 {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        if rlp.is_empty() {
            return Err(RLPDecodeError::InvalidLength);
        }
        match rlp[0] {
            // single byte in [0x00, 0x7f]
            0..=0x7f => Ok((rlp[0], &rlp[1..])),
            // RLP_NULL represents zero
            RLP_NULL => Ok((0, &rlp[1..])),
            // two bytes, the first being RLP_NULL + 1
            x if rlp.len() >= 2 && x == RLP_NULL + 1 => Ok((rlp[1], &rlp[2..])),
            _ => Err(RLPDecodeError::MalformedData),
        }
    }
}

macro_rules! impl_rlp_decode_uint {
    ($t:ty) => {
        impl RLPDecode for $t {
            fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
                let (bytes, rest) = decode_bytes(rlp)?;
                let padded_bytes = static_left_pad(bytes)?;
                Ok((<$t>::from_be_bytes(padded_bytes), rest))
            }
        }
    };
}

impl_rlp_decode_uint!(u16);
impl_rlp_decode_uint!(u32);
impl_rlp_decode_uint!(u64);
impl_rlp_decode_uint!(usize);

// Decodes a byte string of a fixed size. Lists of elements are decoded via
// the Vec<T> implementation or the tuple implementations.
impl<const N: usize> RLPDecode for [u8; N] {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        let (decoded_bytes, rest) = decode_bytes(rlp)?;
        let value = decoded_bytes
            .try_into()
            .map_err(|_| RLPDecodeError::InvalidLength)?;
        Ok((value, rest))
    }
}

impl RLPDecode for Bytes {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        let (decoded, rest) = decode_bytes(rlp)?;
        Ok((Bytes::copy_from_slice(decoded), rest))
    }
}

impl RLPDecode for String {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        let (str_bytes, rest) = decode_bytes(rlp)?;
        let value =
            String::from_utf8(str_bytes.to_vec()).map_err(|_| RLPDecodeError::MalformedData)?;
        Ok((value, rest))
    }
}

impl RLPDecode for H128 {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        let (value, rest) = RLPDecode::decode_unfinished(rlp)?;
        Ok((H128(value), rest))
    }
}

impl RLPDecode for H256 {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        let (value, rest) = RLPDecode::decode_unfinished(rlp)?;
        Ok((H256(value), rest))
    }
}

impl RLPDecode for H512 {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        let (value, rest) = RLPDecode::decode_unfinished(rlp)?;
        Ok((H512(value), rest))
    }
}

impl RLPDecode for Address {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        let (value, rest) = RLPDecode::decode_unfinished(rlp)?;
        Ok((H160(value), rest))
    }
}

impl RLPDecode for Signature {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        let (value, rest) = RLPDecode::decode_unfinished(rlp)?;
        Ok((H520(value), rest))
    }
}

impl RLPDecode for Bloom {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        let (value, rest) = RLPDecode::decode_unfinished(rlp)?;
        Ok((Bloom(value), rest))
    }
}

impl RLPDecode for U256 {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        let (bytes, rest) = decode_bytes(rlp)?;
        let padded_bytes: [u8; 32] = static_left_pad(bytes)?;
        Ok((U256::from_big_endian(&padded_bytes), rest))
    }
}

// A Vec<T> is interpreted as a list of elements of the same type. Byte
// strings are decoded via the [u8; N] / Bytes implementations instead.
impl<T: RLPDecode> RLPDecode for Vec<T> {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        if rlp.is_empty() {
            return Err(RLPDecodeError::InvalidLength);
        }
        if rlp[0] == RLP_EMPTY_LIST {
            return Ok((Vec::new(), &rlp[1..]));
        }

        let (is_list, payload, input_rest) = decode_rlp_item(rlp)?;
        if !is_list {
            return Err(RLPDecodeError::MalformedData);
        }

        let mut result = Vec::new();
        let mut current_slice = payload;
        while !current_slice.is_empty() {
            let (item, rest) = T::decode_unfinished(current_slice)?;
            result.push(item);
            current_slice = rest;
        }
        Ok((result, input_rest))
    }
}

impl<T1: RLPDecode, T2: RLPDecode> RLPDecode for (T1, T2) {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        if rlp.is_empty() {
            return Err(RLPDecodeError::InvalidLength);
        }
        let (is_list, payload, input_rest) = decode_rlp_item(rlp)?;
        if !is_list {
            return Err(RLPDecodeError::MalformedData);
        }
        let (first, first_rest) = T1::decode_unfinished(payload)?;
        let (second, second_rest) = T2::decode_unfinished(first_rest)?;
        if !second_rest.is_empty() {
            return Err(RLPDecodeError::MalformedData);
        }
        Ok(((first, second), input_rest))
    }
}

impl<T1: RLPDecode, T2: RLPDecode, T3: RLPDecode> RLPDecode for (T1, T2, T3) {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        if rlp.is_empty() {
            return Err(RLPDecodeError::InvalidLength);
        }
        let (is_list, payload, input_rest) = decode_rlp_item(rlp)?;
        if !is_list {
            return Err(RLPDecodeError::MalformedData);
        }
        let (first, first_rest) = T1::decode_unfinished(payload)?;
        let (second, second_rest) = T2::decode_unfinished(first_rest)?;
        let (third, third_rest) = T3::decode_unfinished(second_rest)?;
        if !third_rest.is_empty() {
            return Err(RLPDecodeError::MalformedData);
        }
        Ok(((first, second, third), input_rest))
    }
}

/// Decodes an RLP item from a slice of bytes.
/// Returns whether the item is a list, its payload (prefix stripped), and
/// the remaining bytes after the item.
pub fn decode_rlp_item(data: &[u8]) -> Result<(bool, &[u8], &[u8]), RLPDecodeError> {
    if data.is_empty() {
        return Err(RLPDecodeError::InvalidLength);
    }

    let first_byte = data[0];
    match first_byte {
        0..=0x7f => Ok((false, &data[..1], &data[1..])),
        0x80..=0xb7 => {
            let length = (first_byte - 0x80) as usize;
            if data.len() < length + 1 {
                return Err(RLPDecodeError::InvalidLength);
            }
            Ok((false, &data[1..length + 1], &data[length + 1..]))
        }
        0xb8..=0xbf => {
            let length_of_length = (first_byte - 0xb7) as usize;
            if data.len() < length_of_length + 1 {
                return Err(RLPDecodeError::InvalidLength);
            }
            let length = usize::from_be_bytes(static_left_pad(&data[1..length_of_length + 1])?);
            if data.len() < length_of_length + length + 1 {
                return Err(RLPDecodeError::InvalidLength);
            }
            Ok((
                false,
                &data[length_of_length + 1..length_of_length + length + 1],
                &data[length_of_length + length + 1..],
            ))
        }
        RLP_EMPTY_LIST..=0xf7 => {
            let length = (first_byte - RLP_EMPTY_LIST) as usize;
            if data.len() < length + 1 {
                return Err(RLPDecodeError::InvalidLength);
            }
            Ok((true, &data[1..length + 1], &data[length + 1..]))
        }
        0xf8..=0xff => {
            let length_of_length = (first_byte - 0xf7) as usize;
            if data.len() < length_of_length + 1 {
                return Err(RLPDecodeError::InvalidLength);
            }
            let length = usize::from_be_bytes(static_left_pad(&data[1..length_of_length + 1])?);
            if data.len() < length_of_length + length + 1 {
                return Err(RLPDecodeError::InvalidLength);
            }
            Ok((
                true,
                &data[length_of_length + 1..length_of_length + length + 1],
                &data[length_of_length + length + 1..],
            ))
        }
    }
}

/// Decodes the payload of an RLP string, rejecting lists.
pub fn decode_bytes(data: &[u8]) -> Result<(&[u8], &[u8]), RLPDecodeError> {
    let (is_list, payload, rest) = decode_rlp_item(data)?;
    if is_list {
        return Err(RLPDecodeError::UnexpectedList);
    }
    Ok((payload, rest))
}

/// Left-pads a big-endian byte slice into a fixed-size array.
/// Rejects oversized inputs and leading zeros (non-canonical integers).
pub(crate) fn static_left_pad<const N: usize>(data: &[u8]) -> Result<[u8; N], RLPDecodeError> {
    let mut result = [0; N];
    if data.is_empty() {
        return Ok(result);
    }
    if data[0] == 0 {
        return Err(RLPDecodeError::MalformedData);
    }
    if data.len() > N {
        return Err(RLPDecodeError::InvalidLength);
    }
    result[N - data.len()..].copy_from_slice(data);
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn can_decode_booleans() {
        let (decoded, _) = bool::decode_unfinished(&[0x01]).unwrap();
        assert!(decoded);

        let (decoded, _) = bool::decode_unfinished(&[RLP_NULL]).unwrap();
        assert!(!decoded);

        assert!(bool::decode_unfinished(&[0x02]).is_err());
    }

    #[test]
    fn can_decode_uints() {
        assert_eq!(u64::decode(&[RLP_NULL]).unwrap(), 0);
        assert_eq!(u64::decode(&[0x01]).unwrap(), 1);
        assert_eq!(u64::decode(&[0x7f]).unwrap(), 0x7f);
        assert_eq!(u64::decode(&[RLP_NULL + 1, 0x80]).unwrap(), 0x80);
        assert_eq!(u64::decode(&[RLP_NULL + 2, 0x12, 0x34]).unwrap(), 0x1234);
        // leading zeros are non-canonical
        assert!(u64::decode(&[RLP_NULL + 2, 0x00, 0x34]).is_err());
    }

    #[test]
    fn can_decode_fixed_length_bytes() {
        let encoded = [RLP_NULL + 2, 0x04, 0x00];
        let decoded: [u8; 2] = RLPDecode::decode(&encoded).unwrap();
        assert_eq!(decoded, [0x04, 0x00]);

        // wrong length
        assert!(<[u8; 3]>::decode(&encoded).is_err());
    }

    #[test]
    fn can_decode_strings() {
        let encoded = [RLP_NULL + 3, b'd', b'o', b'g'];
        assert_eq!(String::decode(&encoded).unwrap(), "dog");
    }

    #[test]
    fn can_decode_lists_of_str() {
        let encoded = [0xc8, 0x83, b'c', b'a', b't', 0x83, b'd', b'o', b'g'];
        let decoded: Vec<String> = RLPDecode::decode(&encoded).unwrap();
        assert_eq!(decoded, vec!["cat".to_string(), "dog".to_string()]);

        let decoded: Vec<String> = RLPDecode::decode(&[RLP_EMPTY_LIST]).unwrap();
        assert!(decoded.is_empty());
    }

    #[test]
    fn can_decode_tuples() {
        let encoded = [RLP_EMPTY_LIST + 2, 0x01, 0x02];
        let decoded: (u8, u8) = RLPDecode::decode(&encoded).unwrap();
        assert_eq!(decoded, (0x01, 0x02));
    }

    #[test]
    fn malformed_input_is_rejected() {
        // truncated long string
        assert!(decode_rlp_item(&[0xb8, 0x04, 0x01]).is_err());
        // truncated list
        assert!(decode_rlp_item(&[0xc5, 0x01]).is_err());
        // empty input
        assert!(decode_rlp_item(&[]).is_err());
    }
}
