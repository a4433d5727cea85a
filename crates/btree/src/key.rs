//! Sortable big-endian encoding for `i64` index keys (spec §4.5: "Keys
//! are encoded big-endian for byte-wise order").
//!
//! Plain two's-complement big-endian bytes do not sort negatives
//! correctly under unsigned byte comparison (`-1_i64` has its top bit
//! set, so it would compare greater than `0_i64`). Flipping the sign bit
//! before encoding maps the signed range onto the unsigned range in
//! order, so byte-wise comparison of the encoded form matches numeric
//! comparison of the original `i64`.

const SIGN_BIT: u64 = 1 << 63;

pub fn encode(key: i64) -> [u8; 8] {
    ((key as u64) ^ SIGN_BIT).to_be_bytes()
}

pub fn decode(bytes: &[u8]) -> i64 {
    let bits = u64::from_be_bytes(bytes.try_into().expect("key slice must be 8 bytes"));
    (bits ^ SIGN_BIT) as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips() {
        for key in [i64::MIN, -1, 0, 1, i64::MAX, 42, -42] {
            assert_eq!(decode(&encode(key)), key);
        }
    }

    #[test]
    fn preserves_numeric_order() {
        let mut keys = vec![i64::MIN, -1000, -1, 0, 1, 1000, i64::MAX];
        let mut encoded: Vec<[u8; 8]> = keys.iter().map(|&k| encode(k)).collect();
        encoded.sort();
        let decoded: Vec<i64> = encoded.iter().map(|b| decode(b)).collect();
        keys.sort();
        assert_eq!(decoded, keys);
    }
}
