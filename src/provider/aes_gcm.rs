//! AES in GCM mode.

// ref: https://tools.ietf.org/html/rfc5647

use crate::crypto::{self, CipherSpec, CryptoError};
use ring::aead::{self, Aad, LessSafeKey, Nonce, UnboundKey};
use std::convert::TryInto as _;

pub(crate) const AES128_GCM: &str = "aes128-gcm@openssh.com";
pub(crate) const AES256_GCM: &str = "aes256-gcm@openssh.com";

const BLOCK_SIZE: usize = 16;
const TAG_LEN: usize = 16;
const IV_LEN: usize = 12;

pub(crate) fn spec(name: &str) -> Option<CipherSpec> {
    let key_len = match name {
        AES128_GCM => 16,
        AES256_GCM => 32,
        _ => return None,
    };
    Some(CipherSpec {
        key_len,
        iv_len: IV_LEN,
        block_size: BLOCK_SIZE,
        tag_len: TAG_LEN,
    })
}

fn unbound_key(key_material: &[u8]) -> Result<UnboundKey, CryptoError> {
    let algorithm = match key_material.len() {
        16 => &aead::AES_128_GCM,
        32 => &aead::AES_256_GCM,
        _ => return Err(CryptoError),
    };
    UnboundKey::new(algorithm, key_material).map_err(|_| CryptoError)
}

pub struct Opening {
    key: LessSafeKey,
    nonces: NonceSequence,
}
impl Opening {
    pub fn new(key_material: &[u8], iv: &[u8]) -> Result<Self, CryptoError> {
        Ok(Self {
            key: LessSafeKey::new(unbound_key(key_material)?),
            nonces: NonceSequence::new(iv)?,
        })
    }
}
impl crypto::Opening for Opening {
    #[inline]
    fn block_size(&self) -> usize {
        BLOCK_SIZE
    }

    #[inline]
    fn tag_len(&self) -> usize {
        TAG_LEN
    }

    #[inline]
    fn head_len(&self) -> usize {
        4
    }

    #[inline]
    fn decrypt_packet_length(&mut self, _: u32, head: &mut [u8]) -> Result<u32, CryptoError> {
        // The packet length is not encrypted in AES-GCM mode.
        // Ref: https://tools.ietf.org/html/rfc5647#section-7.3
        let head: [u8; 4] = (&*head).try_into().map_err(|_| CryptoError)?;
        Ok(u32::from_be_bytes(head))
    }

    fn open_in_place(&mut self, _: u32, in_out: &mut [u8], _: u32) -> Result<(), CryptoError> {
        let (aad, in_out) = in_out.split_at_mut(4);
        self.key
            .open_in_place(self.nonces.advance(), Aad::from(&*aad), in_out)
            .map_err(|_| CryptoError)?;
        Ok(())
    }
}

pub struct Sealing {
    key: LessSafeKey,
    nonces: NonceSequence,
}
impl Sealing {
    pub fn new(key_material: &[u8], iv: &[u8]) -> Result<Self, CryptoError> {
        Ok(Self {
            key: LessSafeKey::new(unbound_key(key_material)?),
            nonces: NonceSequence::new(iv)?,
        })
    }
}
impl crypto::Sealing for Sealing {
    #[inline]
    fn block_size(&self) -> usize {
        BLOCK_SIZE
    }

    #[inline]
    fn tag_len(&self) -> usize {
        TAG_LEN
    }

    fn seal_in_place(
        &mut self,
        _: u32,
        in_out: &mut [u8],
        tag_out: &mut [u8],
    ) -> Result<(), CryptoError> {
        let (aad, in_out) = in_out.split_at_mut(4);

        let tag = self
            .key
            .seal_in_place_separate_tag(self.nonces.advance(), Aad::from(&*aad), in_out)
            .map_err(|_| CryptoError)?;
        let tag = tag.as_ref();

        let tag_out = tag_out.get_mut(..tag.len()).ok_or(CryptoError)?;
        tag_out.copy_from_slice(tag);

        Ok(())
    }
}

// SSH AES-GCM nonce sequence
// ref: https://tools.ietf.org/html/rfc5647#section-7.1

struct NonceSequence {
    fixed: [u8; 4],
    invocation_counter: u64,
}
impl NonceSequence {
    fn new(iv: &[u8]) -> Result<Self, CryptoError> {
        if iv.len() != IV_LEN {
            return Err(CryptoError);
        }
        let (fixed, counter) = iv.split_at(4);
        Ok(Self {
            fixed: fixed.try_into().map_err(|_| CryptoError)?,
            invocation_counter: u64::from_be_bytes(counter.try_into().map_err(|_| CryptoError)?),
        })
    }

    fn advance(&mut self) -> Nonce {
        let mut nonce = [0u8; IV_LEN];
        nonce[..4].copy_from_slice(&self.fixed);
        nonce[4..].copy_from_slice(&self.invocation_counter.to_be_bytes());
        self.invocation_counter = self.invocation_counter.wrapping_add(1);
        Nonce::assume_unique_for_key(nonce)
    }
}
