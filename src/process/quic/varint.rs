//! QUIC variable-length integers (RFC 9000 §16).
//!
//! The two most significant bits of the first byte encode the total
//! length; the remaining bits, big-endian, the value.

/// Parse a varint at the start of `data`.
/// Returns `(value, bytes_consumed)` or `None` when truncated.
pub fn parse_varint(data: &[u8]) -> Option<(u64, usize)> {
    let first = *data.first()?;

    match first >> 6 {
        0 => Some((u64::from(first & 0x3f), 1)),
        1 => {
            if data.len() < 2 {
                return None;
            }
            let v = u64::from(u16::from_be_bytes([data[0], data[1]])) & 0x3fff;
            Some((v, 2))
        }
        2 => {
            if data.len() < 4 {
                return None;
            }
            let v = u64::from(u32::from_be_bytes([data[0], data[1], data[2], data[3]]))
                & 0x3fff_ffff;
            Some((v, 4))
        }
        _ => {
            if data.len() < 8 {
                return None;
            }
            let v = u64::from_be_bytes(data[..8].try_into().unwrap())
                & 0x3fff_ffff_ffff_ffff;
            Some((v, 8))
        }
    }
}

/// Parse a varint at `*pos`, advancing the cursor on success.
pub fn read_varint(data: &[u8], pos: &mut usize) -> Option<u64> {
    let (value, consumed) = parse_varint(data.get(*pos..)?)?;
    *pos += consumed;
    Some(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_one_byte() {
        assert_eq!(parse_varint(&[0x25]), Some((0x25, 1)));
        assert_eq!(parse_varint(&[0x00]), Some((0, 1)));
        assert_eq!(parse_varint(&[0x3f]), Some((63, 1)));
    }

    #[test]
    fn test_two_bytes() {
        assert_eq!(parse_varint(&[0x40, 0x19]), Some((0x19, 2)));
        assert_eq!(parse_varint(&[0x7f, 0xff]), Some((0x3fff, 2)));
        // RFC 9000 example: 0x7bbd = 15293
        assert_eq!(parse_varint(&[0x7b, 0xbd]), Some((15293, 2)));
    }

    #[test]
    fn test_four_bytes() {
        assert_eq!(parse_varint(&[0x80, 0x00, 0x00, 0x01]), Some((1, 4)));
        // RFC 9000 example: 0x9d7f3e7d = 494878333
        assert_eq!(
            parse_varint(&[0x9d, 0x7f, 0x3e, 0x7d]),
            Some((494_878_333, 4))
        );
    }

    #[test]
    fn test_eight_bytes() {
        // RFC 9000 example: 0xc2197c5eff14e88c = 151288809941952652
        assert_eq!(
            parse_varint(&[0xc2, 0x19, 0x7c, 0x5e, 0xff, 0x14, 0xe8, 0x8c]),
            Some((151_288_809_941_952_652, 8))
        );
    }

    #[test]
    fn test_truncated() {
        assert_eq!(parse_varint(&[]), None);
        assert_eq!(parse_varint(&[0x40]), None);
        assert_eq!(parse_varint(&[0x80, 0x00]), None);
        assert_eq!(parse_varint(&[0xc0, 0, 0, 0]), None);
    }

    #[test]
    fn test_cursor_advances() {
        let data = [0x25, 0x40, 0x19, 0x00];
        let mut pos = 0;
        assert_eq!(read_varint(&data, &mut pos), Some(0x25));
        assert_eq!(pos, 1);
        assert_eq!(read_varint(&data, &mut pos), Some(0x19));
        assert_eq!(pos, 3);
        assert_eq!(read_varint(&data, &mut pos), Some(0));
        assert_eq!(pos, 4);
        assert_eq!(read_varint(&data, &mut pos), None);
    }
}
