//! HMAC-SHA2 integrity algorithms (RFC 6668).

use crate::crypto::{self, CryptoError, MacSpec};
use ring::{constant_time, hmac};

pub(crate) const HMAC_SHA2_256: &str = "hmac-sha2-256";
pub(crate) const HMAC_SHA2_512: &str = "hmac-sha2-512";

pub(crate) const ALGORITHMS: &[&str] = &[HMAC_SHA2_256, HMAC_SHA2_512];

pub(crate) fn spec(name: &str) -> Option<MacSpec> {
    match name {
        HMAC_SHA2_256 => Some(MacSpec {
            key_len: 32,
            mac_len: 32,
        }),
        HMAC_SHA2_512 => Some(MacSpec {
            key_len: 64,
            mac_len: 64,
        }),
        _ => None,
    }
}

pub struct Hmac {
    key: hmac::Key,
    mac_len: usize,
}

impl Hmac {
    pub fn new(name: &str, key: &[u8]) -> Result<Self, CryptoError> {
        let algorithm = match name {
            HMAC_SHA2_256 => hmac::HMAC_SHA256,
            HMAC_SHA2_512 => hmac::HMAC_SHA512,
            _ => return Err(CryptoError),
        };
        let spec = spec(name).ok_or(CryptoError)?;
        if key.len() != spec.key_len {
            return Err(CryptoError);
        }
        Ok(Self {
            key: hmac::Key::new(algorithm, key),
            mac_len: spec.mac_len,
        })
    }

    fn compute(&self, seqn: u32, packet: &[u8]) -> hmac::Tag {
        let mut ctx = hmac::Context::with_key(&self.key);
        ctx.update(&seqn.to_be_bytes());
        ctx.update(packet);
        ctx.sign()
    }
}

impl crypto::Mac for Hmac {
    #[inline]
    fn mac_len(&self) -> usize {
        self.mac_len
    }

    fn sign(&self, seqn: u32, packet: &[u8], tag_out: &mut [u8]) {
        let tag = self.compute(seqn, packet);
        tag_out.copy_from_slice(&tag.as_ref()[..tag_out.len()]);
    }

    fn verify(&self, seqn: u32, packet: &[u8], tag: &[u8]) -> Result<(), CryptoError> {
        let expected = self.compute(seqn, packet);
        constant_time::verify_slices_are_equal(expected.as_ref(), tag).map_err(|_| CryptoError)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::Mac as _;

    #[test]
    fn sequence_number_is_covered() {
        let mac = Hmac::new(HMAC_SHA2_256, &[1u8; 32]).unwrap();
        let mut tag = [0u8; 32];
        mac.sign(41, b"packet", &mut tag);

        mac.verify(41, b"packet", &tag).unwrap();
        assert!(mac.verify(42, b"packet", &tag).is_err());
        assert!(mac.verify(41, b"packey", &tag).is_err());
    }

    #[test]
    fn truncated_tag_is_rejected() {
        let mac = Hmac::new(HMAC_SHA2_512, &[3u8; 64]).unwrap();
        let mut tag = [0u8; 64];
        mac.sign(0, b"x", &mut tag);
        assert!(mac.verify(0, b"x", &tag[..32]).is_err());
    }
}
