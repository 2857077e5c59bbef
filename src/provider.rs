//! The bundled algorithm provider backed by `ring`, `aes`/`ctr` and `num-bigint`.

mod aes_ctr;
mod aes_gcm;
mod chacha20_poly1305;
mod hmac;
mod hostkey;
mod kex;

use crate::crypto::{
    AlgorithmProvider, Category, CipherSpec, Compression, CryptoError, Hash, HostKeyVerifier,
    KexMethod, Mac, MacSpec, Opening, Sealing,
};
use ring::{
    digest,
    rand::{SecureRandom, SystemRandom},
};

const CIPHERS: &[&str] = &[
    chacha20_poly1305::CHACHA20_POLY1305,
    aes_gcm::AES256_GCM,
    aes_gcm::AES128_GCM,
    aes_ctr::AES256_CTR,
    aes_ctr::AES192_CTR,
    aes_ctr::AES128_CTR,
];

/// The default [`AlgorithmProvider`].
pub struct DefaultProvider {
    rng: SystemRandom,
}

impl Default for DefaultProvider {
    fn default() -> Self {
        Self {
            rng: SystemRandom::new(),
        }
    }
}

impl std::fmt::Debug for DefaultProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DefaultProvider").finish()
    }
}

impl AlgorithmProvider for DefaultProvider {
    fn supported(&self, category: Category) -> Vec<&'static str> {
        match category {
            Category::Kex => kex::ALGORITHMS.to_vec(),
            Category::HostKey => hostkey::ALGORITHMS.to_vec(),
            Category::Cipher => CIPHERS.to_vec(),
            Category::Mac => hmac::ALGORITHMS.to_vec(),
            Category::Compression => vec!["none"],
        }
    }

    #[inline]
    fn kex(&self, name: &str) -> Result<Box<dyn KexMethod>, CryptoError> {
        kex::start(&self.rng, name)
    }

    #[inline]
    fn host_key(&self, name: &str) -> Result<Box<dyn HostKeyVerifier>, CryptoError> {
        hostkey::verifier(name)
    }

    fn cipher_spec(&self, name: &str) -> Result<CipherSpec, CryptoError> {
        if name == chacha20_poly1305::CHACHA20_POLY1305 {
            return Ok(chacha20_poly1305::SPEC);
        }
        aes_gcm::spec(name)
            .or_else(|| aes_ctr::spec(name))
            .ok_or(CryptoError)
    }

    fn sealing(&self, name: &str, key: &[u8], iv: &[u8]) -> Result<Box<dyn Sealing>, CryptoError> {
        let sealing: Box<dyn Sealing> = match name {
            chacha20_poly1305::CHACHA20_POLY1305 => Box::new(chacha20_poly1305::Sealing::new(key)?),
            aes_gcm::AES128_GCM | aes_gcm::AES256_GCM => Box::new(aes_gcm::Sealing::new(key, iv)?),
            aes_ctr::AES128_CTR | aes_ctr::AES192_CTR | aes_ctr::AES256_CTR => {
                Box::new(aes_ctr::Sealing::new(key, iv)?)
            }
            _ => return Err(CryptoError),
        };
        Ok(sealing)
    }

    fn opening(&self, name: &str, key: &[u8], iv: &[u8]) -> Result<Box<dyn Opening>, CryptoError> {
        let opening: Box<dyn Opening> = match name {
            chacha20_poly1305::CHACHA20_POLY1305 => Box::new(chacha20_poly1305::Opening::new(key)?),
            aes_gcm::AES128_GCM | aes_gcm::AES256_GCM => Box::new(aes_gcm::Opening::new(key, iv)?),
            aes_ctr::AES128_CTR | aes_ctr::AES192_CTR | aes_ctr::AES256_CTR => {
                Box::new(aes_ctr::Opening::new(key, iv)?)
            }
            _ => return Err(CryptoError),
        };
        Ok(opening)
    }

    #[inline]
    fn mac_spec(&self, name: &str) -> Result<MacSpec, CryptoError> {
        hmac::spec(name).ok_or(CryptoError)
    }

    fn mac(&self, name: &str, key: &[u8]) -> Result<Box<dyn Mac>, CryptoError> {
        Ok(Box::new(hmac::Hmac::new(name, key)?))
    }

    fn compression(&self, name: &str) -> Result<Option<Box<dyn Compression>>, CryptoError> {
        match name {
            "none" => Ok(None),
            _ => Err(CryptoError),
        }
    }

    fn hash(&self, name: &str) -> Result<Box<dyn Hash>, CryptoError> {
        let algorithm = match name {
            "sha256" => &digest::SHA256,
            "sha384" => &digest::SHA384,
            "sha512" => &digest::SHA512,
            _ => return Err(CryptoError),
        };
        Ok(Box::new(RingHash(digest::Context::new(algorithm))))
    }

    fn fill_random(&self, buf: &mut [u8]) -> Result<(), CryptoError> {
        self.rng.fill(buf).map_err(|_| CryptoError)
    }
}

struct RingHash(digest::Context);

impl Hash for RingHash {
    #[inline]
    fn update(&mut self, data: &[u8]) {
        self.0.update(data);
    }

    fn finalize(self: Box<Self>) -> Vec<u8> {
        self.0.finish().as_ref().to_vec()
    }
}
