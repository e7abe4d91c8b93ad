#[cfg(test)]
mod tests {
    use crate::encoding::{EncodingError, decode_from_slice, encode_to_vec};

    #[test]
    fn u8_round_trip() {
        let bytes = encode_to_vec(&0xABu8).unwrap();
        assert_eq!(bytes, vec![0xAB]);
        let (value, consumed) = decode_from_slice::<u8>(&bytes).unwrap();
        assert_eq!(value, 0xAB);
        assert_eq!(consumed, 1);
    }

    #[test]
    fn u16_is_little_endian() {
        let bytes = encode_to_vec(&0x1234u16).unwrap();
        assert_eq!(bytes, vec![0x34, 0x12]);
    }

    #[test]
    fn u32_is_little_endian() {
        let bytes = encode_to_vec(&0xDEADBEEFu32).unwrap();
        assert_eq!(bytes, vec![0xEF, 0xBE, 0xAD, 0xDE]);
        let (value, consumed) = decode_from_slice::<u32>(&bytes).unwrap();
        assert_eq!(value, 0xDEADBEEF);
        assert_eq!(consumed, 4);
    }

    #[test]
    fn u64_round_trip() {
        for value in [0u64, 1, u64::MAX, 0x0102_0304_0506_0708] {
            let bytes = encode_to_vec(&value).unwrap();
            assert_eq!(bytes.len(), 8);
            let (decoded, consumed) = decode_from_slice::<u64>(&bytes).unwrap();
            assert_eq!(decoded, value);
            assert_eq!(consumed, 8);
        }
    }

    #[test]
    fn fixed_array_has_no_length_prefix() {
        let magic = *b"NVKVPOOL";
        let bytes = encode_to_vec(&magic).unwrap();
        assert_eq!(bytes, magic.to_vec());
        let (decoded, consumed) = decode_from_slice::<[u8; 8]>(&bytes).unwrap();
        assert_eq!(decoded, magic);
        assert_eq!(consumed, 8);
    }

    #[test]
    fn truncated_buffer_is_rejected() {
        let err = decode_from_slice::<u64>(&[1, 2, 3]).unwrap_err();
        match err {
            EncodingError::UnexpectedEof { needed, available } => {
                assert_eq!(needed, 8);
                assert_eq!(available, 3);
            }
            other => panic!("expected UnexpectedEof, got {other:?}"),
        }
    }

    #[test]
    fn empty_buffer_is_rejected() {
        assert!(decode_from_slice::<u8>(&[]).is_err());
    }
}
