//! AES in counter mode, paired with a separately negotiated MAC.

// ref: https://tools.ietf.org/html/rfc4344#section-4

use crate::crypto::{self, CipherSpec, CryptoError};
use aes::cipher::{KeyIvInit, StreamCipher};
use aes::{Aes128, Aes192, Aes256};
use ctr::Ctr128BE;
use std::convert::TryInto as _;

pub(crate) const AES128_CTR: &str = "aes128-ctr";
pub(crate) const AES192_CTR: &str = "aes192-ctr";
pub(crate) const AES256_CTR: &str = "aes256-ctr";

const BLOCK_SIZE: usize = 16;

pub(crate) fn spec(name: &str) -> Option<CipherSpec> {
    let key_len = match name {
        AES128_CTR => 16,
        AES192_CTR => 24,
        AES256_CTR => 32,
        _ => return None,
    };
    Some(CipherSpec {
        key_len,
        iv_len: BLOCK_SIZE,
        block_size: BLOCK_SIZE,
        tag_len: 0,
    })
}

enum Keystream {
    Aes128(Ctr128BE<Aes128>),
    Aes192(Ctr128BE<Aes192>),
    Aes256(Ctr128BE<Aes256>),
}

impl Keystream {
    fn new(key: &[u8], iv: &[u8]) -> Result<Self, CryptoError> {
        let keystream = match key.len() {
            16 => Keystream::Aes128(Ctr128BE::new_from_slices(key, iv).map_err(|_| CryptoError)?),
            24 => Keystream::Aes192(Ctr128BE::new_from_slices(key, iv).map_err(|_| CryptoError)?),
            32 => Keystream::Aes256(Ctr128BE::new_from_slices(key, iv).map_err(|_| CryptoError)?),
            _ => return Err(CryptoError),
        };
        Ok(keystream)
    }

    fn apply(&mut self, buf: &mut [u8]) {
        match self {
            Keystream::Aes128(c) => c.apply_keystream(buf),
            Keystream::Aes192(c) => c.apply_keystream(buf),
            Keystream::Aes256(c) => c.apply_keystream(buf),
        }
    }
}

pub struct Opening {
    keystream: Keystream,
}
impl Opening {
    pub fn new(key: &[u8], iv: &[u8]) -> Result<Self, CryptoError> {
        Ok(Self {
            keystream: Keystream::new(key, iv)?,
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
        0
    }

    #[inline]
    fn head_len(&self) -> usize {
        BLOCK_SIZE
    }

    fn decrypt_packet_length(&mut self, _: u32, head: &mut [u8]) -> Result<u32, CryptoError> {
        if head.len() != BLOCK_SIZE {
            return Err(CryptoError);
        }
        self.keystream.apply(head);
        let length: [u8; 4] = head[..4].try_into().map_err(|_| CryptoError)?;
        Ok(u32::from_be_bytes(length))
    }

    fn open_in_place(&mut self, _: u32, in_out: &mut [u8], _: u32) -> Result<(), CryptoError> {
        // The first block was decrypted along with the packet length.
        let rest = in_out.get_mut(BLOCK_SIZE..).ok_or(CryptoError)?;
        self.keystream.apply(rest);
        Ok(())
    }
}

pub struct Sealing {
    keystream: Keystream,
}
impl Sealing {
    pub fn new(key: &[u8], iv: &[u8]) -> Result<Self, CryptoError> {
        Ok(Self {
            keystream: Keystream::new(key, iv)?,
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
        0
    }

    fn seal_in_place(&mut self, _: u32, in_out: &mut [u8], _: &mut [u8]) -> Result<(), CryptoError> {
        self.keystream.apply(in_out);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{Opening as _, Sealing as _};

    #[test]
    fn keystream_continues_across_packets() {
        for &key_len in &[16usize, 24, 32] {
            let key = vec![0x5au8; key_len];
            let iv = [0xa5u8; BLOCK_SIZE];
            let mut sealing = Sealing::new(&key, &iv).unwrap();
            let mut opening = Opening::new(&key, &iv).unwrap();

            for round in 0..2u8 {
                let mut packet = vec![round; 32];
                packet[..4].copy_from_slice(&28u32.to_be_bytes());
                let plaintext = packet.clone();
                sealing.seal_in_place(0, &mut packet, &mut []).unwrap();
                assert_ne!(packet, plaintext);

                let length = opening
                    .decrypt_packet_length(0, &mut packet[..BLOCK_SIZE])
                    .unwrap();
                assert_eq!(length, 28);
                opening.open_in_place(0, &mut packet, length).unwrap();
                assert_eq!(packet, plaintext);
            }
        }
    }

    #[test]
    fn rejects_bad_key_length() {
        assert!(Sealing::new(&[0u8; 20], &[0u8; BLOCK_SIZE]).is_err());
    }
}
