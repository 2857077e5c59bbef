//! Chacha20-Poly1305.

// defined in http://cvsweb.openbsd.org/cgi-bin/cvsweb/src/usr.bin/ssh/PROTOCOL.chacha20poly1305?rev=1.5&content-type=text/x-cvsweb-markup

use crate::crypto::{self, CipherSpec, CryptoError};
use ring::aead::chacha20_poly1305_openssh as aead;
use std::convert::TryInto as _;

pub(crate) const CHACHA20_POLY1305: &str = "chacha20-poly1305@openssh.com";

pub(crate) const SPEC: CipherSpec = CipherSpec {
    key_len: aead::KEY_LEN,
    iv_len: 0,
    block_size: 8,
    tag_len: aead::TAG_LEN,
};

pub struct Opening {
    key: aead::OpeningKey,
}
impl Opening {
    pub fn new(key_material: &[u8]) -> Result<Self, CryptoError> {
        let key_material = key_material.try_into().map_err(|_| CryptoError)?;
        Ok(Self {
            key: aead::OpeningKey::new(key_material),
        })
    }
}
impl crypto::Opening for Opening {
    #[inline]
    fn block_size(&self) -> usize {
        SPEC.block_size
    }

    #[inline]
    fn tag_len(&self) -> usize {
        aead::TAG_LEN
    }

    #[inline]
    fn head_len(&self) -> usize {
        aead::PACKET_LENGTH_LEN
    }

    #[inline]
    fn decrypt_packet_length(&mut self, seqn: u32, head: &mut [u8]) -> Result<u32, CryptoError> {
        let encrypted: [u8; aead::PACKET_LENGTH_LEN] = (&*head).try_into().map_err(|_| CryptoError)?;
        Ok(u32::from_be_bytes(
            self.key.decrypt_packet_length(seqn, encrypted),
        ))
    }

    fn open_in_place(
        &mut self,
        seqn: u32,
        in_out: &mut [u8],
        packet_length: u32,
    ) -> Result<(), CryptoError> {
        let split = aead::PACKET_LENGTH_LEN + packet_length as usize;
        if in_out.len() != split + aead::TAG_LEN {
            return Err(CryptoError);
        }
        let (in_out, tag) = in_out.split_at_mut(split);
        let tag: &[u8; aead::TAG_LEN] = (&*tag).try_into().map_err(|_| CryptoError)?;

        self.key
            .open_in_place(seqn, in_out, tag)
            .map_err(|_| CryptoError)?;

        Ok(())
    }
}

pub struct Sealing {
    key: aead::SealingKey,
}
impl Sealing {
    pub fn new(key_material: &[u8]) -> Result<Self, CryptoError> {
        let key_material = key_material.try_into().map_err(|_| CryptoError)?;
        Ok(Self {
            key: aead::SealingKey::new(key_material),
        })
    }
}
impl crypto::Sealing for Sealing {
    #[inline]
    fn block_size(&self) -> usize {
        SPEC.block_size
    }

    #[inline]
    fn tag_len(&self) -> usize {
        aead::TAG_LEN
    }

    fn seal_in_place(
        &mut self,
        seqn: u32,
        in_out: &mut [u8],
        tag_out: &mut [u8],
    ) -> Result<(), CryptoError> {
        let tag_out: &mut [u8; aead::TAG_LEN] = tag_out.try_into().map_err(|_| CryptoError)?;
        self.key.seal_in_place(seqn, in_out, tag_out);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{Opening as _, Sealing as _};

    #[test]
    fn seal_then_open() {
        let key = [0x42u8; aead::KEY_LEN];
        let mut sealing = Sealing::new(&key[..]).unwrap();
        let mut opening = Opening::new(&key[..]).unwrap();

        let plaintext = b"\x00\x00\x00\x0c\x06\x05hello\x00\x00\x00\x00\x00\x00".to_vec();
        let mut buf = plaintext.clone();
        buf.resize(plaintext.len() + aead::TAG_LEN, 0);
        let (packet, tag) = buf.split_at_mut(plaintext.len());
        sealing.seal_in_place(7, packet, tag).unwrap();
        assert_ne!(&buf[4..plaintext.len()], &plaintext[4..]);

        let length = opening.decrypt_packet_length(7, &mut buf[..4]).unwrap();
        assert_eq!(length, 12);
        opening.open_in_place(7, &mut buf[..], length).unwrap();
        assert_eq!(&buf[4..plaintext.len()], &plaintext[4..]);
    }

    #[test]
    fn wrong_sequence_number_fails() {
        let key = [0x17u8; aead::KEY_LEN];
        let mut sealing = Sealing::new(&key[..]).unwrap();
        let mut opening = Opening::new(&key[..]).unwrap();

        let mut buf = vec![0u8, 0, 0, 8, 4, 1, 2, 3, 0, 0, 0, 0];
        buf.resize(12 + aead::TAG_LEN, 0);
        let (packet, tag) = buf.split_at_mut(12);
        sealing.seal_in_place(1, packet, tag).unwrap();

        assert!(opening.open_in_place(2, &mut buf[..], 8).is_err());
    }
}
