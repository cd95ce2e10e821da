//! Supported-encodings set carried in the SYN payload.
//!
//! Wire form (4 bytes): big-endian `u16` lowest version, then a big-endian
//! `u16` mask where bit `v - lowest - 1` marks each further version `v`.

use crate::error::{HandshakeError, HandshakeResult};

/// Length of the encoded set.
pub const ENCODED_LENGTH: usize = 4;

/// Most versions a peer can offer at once: the lowest plus 16 mask bits.
pub const MAX_ENCODINGS: usize = 17;

/// A validated, sorted, de-duplicated set of encoding versions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupportedEncodings {
    versions: Vec<u16>,
}

impl SupportedEncodings {
    /// Validate a caller-supplied list of versions.
    pub fn new(versions: &[u32]) -> HandshakeResult<Self> {
        if versions.is_empty() {
            return Err(HandshakeError::NoEncodings);
        }
        if versions.len() > MAX_ENCODINGS {
            return Err(HandshakeError::TooManyEncodings);
        }
        let lowest = versions.iter().copied().min().unwrap_or_default();
        for &version in versions {
            if version > u32::from(u16::MAX) {
                return Err(HandshakeError::EncodingOutOfRange(version));
            }
            if version - lowest > 16 {
                return Err(HandshakeError::EncodingsTooFarApart(join(versions.iter())));
            }
        }

        let mut sorted: Vec<u16> = versions.iter().map(|&v| v as u16).collect();
        sorted.sort_unstable();
        sorted.dedup();
        Ok(Self { versions: sorted })
    }

    /// Reconstruct a set from its 4-byte wire form.
    ///
    /// Fails only when a marked version would exceed 65535.
    pub fn decode(bytes: [u8; ENCODED_LENGTH]) -> HandshakeResult<Self> {
        let lowest = u16::from_be_bytes([bytes[0], bytes[1]]);
        let mask = u16::from_be_bytes([bytes[2], bytes[3]]);

        let mut versions = vec![lowest];
        for bit in 0..16u32 {
            if mask & (1 << bit) == 0 {
                continue;
            }
            let version = u32::from(lowest) + bit + 1;
            if version > u32::from(u16::MAX) {
                return Err(HandshakeError::EncodingOutOfRange(version));
            }
            versions.push(version as u16);
        }
        Ok(Self { versions })
    }

    pub fn encode(&self) -> [u8; ENCODED_LENGTH] {
        let lowest = self.lowest();
        let mask = self
            .versions
            .iter()
            .skip(1)
            .fold(0u16, |mask, &v| mask | (1 << (v - lowest - 1)));
        let mut out = [0u8; ENCODED_LENGTH];
        out[..2].copy_from_slice(&lowest.to_be_bytes());
        out[2..].copy_from_slice(&mask.to_be_bytes());
        out
    }

    pub fn lowest(&self) -> u16 {
        self.versions[0]
    }

    pub fn contains(&self, version: u16) -> bool {
        self.versions.binary_search(&version).is_ok()
    }

    /// Versions in ascending order.
    pub fn as_slice(&self) -> &[u16] {
        &self.versions
    }

    /// Responder-side negotiation: the highest of `initiator`'s versions that
    /// this set also supports.
    pub fn negotiate(&self, initiator: &SupportedEncodings) -> HandshakeResult<u16> {
        initiator
            .versions
            .iter()
            .rev()
            .copied()
            .find(|&v| self.contains(v))
            .ok_or_else(|| HandshakeError::NoMutualEncoding {
                responder: join(self.versions.iter()),
                initiator: join(initiator.versions.iter().rev()),
            })
    }
}

fn join<T: ToString>(values: impl Iterator<Item = T>) -> String {
    values.map(|v| v.to_string()).collect::<Vec<_>>().join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_single_version_has_empty_mask() {
        let set = SupportedEncodings::new(&[7]).unwrap();
        assert_eq!(set.encode(), [0, 7, 0, 0]);
    }

    #[test]
    fn test_mask_bits_are_offsets_above_lowest() {
        let set = SupportedEncodings::new(&[3, 1, 2, 17]).unwrap();
        // lowest 1; 2 -> bit 0, 3 -> bit 1, 17 -> bit 15
        assert_eq!(set.encode(), [0, 1, 0x80, 0x03]);
        assert_eq!(set.as_slice(), &[1, 2, 3, 17]);
    }

    #[test]
    fn test_validation_messages() {
        assert_eq!(
            SupportedEncodings::new(&[]).unwrap_err().to_string(),
            "Must support at least one encoding version"
        );
        let many: Vec<u32> = (0..18).collect();
        assert_eq!(
            SupportedEncodings::new(&many).unwrap_err().to_string(),
            "Cannot support more than 17 encoding versions simultaneously"
        );
        assert_eq!(
            SupportedEncodings::new(&[65536]).unwrap_err().to_string(),
            "Cannot support encoding versions beyond 65535, got 65536"
        );
        assert_eq!(
            SupportedEncodings::new(&[1, 18]).unwrap_err().to_string(),
            "Cannot simultaneously support encodings that are more than 16 versions apart, got 1, 18"
        );
    }

    #[test]
    fn test_top_of_range_is_accepted() {
        let set = SupportedEncodings::new(&[65535, 65534]).unwrap();
        let back = SupportedEncodings::decode(set.encode()).unwrap();
        assert_eq!(back.as_slice(), &[65534, 65535]);
    }

    #[test]
    fn test_decode_rejects_overflowing_mask() {
        let err = SupportedEncodings::decode([0xff, 0xff, 0x00, 0x01]).unwrap_err();
        assert_eq!(err, HandshakeError::EncodingOutOfRange(65536));
    }

    #[test]
    fn test_negotiate_prefers_initiators_highest() {
        let responder = SupportedEncodings::new(&[1, 2, 3]).unwrap();
        let initiator = SupportedEncodings::new(&[2, 3, 4]).unwrap();
        assert_eq!(responder.negotiate(&initiator).unwrap(), 3);
    }

    #[test]
    fn test_negotiate_disjoint_names_both_sets() {
        let responder = SupportedEncodings::new(&[3, 4]).unwrap();
        let initiator = SupportedEncodings::new(&[1, 2]).unwrap();
        assert_eq!(
            responder.negotiate(&initiator).unwrap_err().to_string(),
            "OCapN Noise Protocol no mutually supported encoding versions. Responder supports 3, 4; initiator supports 2, 1"
        );
    }

    proptest! {
        #[test]
        fn decode_encode_yields_sorted_set(
            lowest in 0u32..=65519,
            offsets in proptest::collection::vec(0u32..=16, 0..17),
        ) {
            let mut versions = vec![lowest];
            versions.extend(offsets.iter().map(|o| lowest + o));
            let set = SupportedEncodings::new(&versions).unwrap();
            let decoded = SupportedEncodings::decode(set.encode()).unwrap();

            let mut expected: Vec<u16> = versions.iter().map(|&v| v as u16).collect();
            expected.sort_unstable();
            expected.dedup();
            prop_assert_eq!(decoded.as_slice(), expected.as_slice());
        }
    }
}
