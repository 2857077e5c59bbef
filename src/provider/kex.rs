//! Key agreement methods.

use crate::crypto::{self, CryptoError, PublicValueEncoding};
use num_bigint::BigUint;
use ring::{
    agreement::{self, EphemeralPrivateKey, PublicKey},
    rand::SecureRandom,
};
use zeroize::Zeroizing;

pub(crate) const CURVE25519_SHA256: &str = "curve25519-sha256";
pub(crate) const CURVE25519_SHA256_LIBSSH: &str = "curve25519-sha256@libssh.org";
pub(crate) const ECDH_SHA2_NISTP256: &str = "ecdh-sha2-nistp256";
pub(crate) const ECDH_SHA2_NISTP384: &str = "ecdh-sha2-nistp384";
pub(crate) const DH_GROUP14_SHA256: &str = "diffie-hellman-group14-sha256";

pub(crate) const ALGORITHMS: &[&str] = &[
    CURVE25519_SHA256,
    CURVE25519_SHA256_LIBSSH,
    ECDH_SHA2_NISTP256,
    ECDH_SHA2_NISTP384,
    DH_GROUP14_SHA256,
];

pub(crate) fn start(
    rng: &dyn SecureRandom,
    name: &str,
) -> Result<Box<dyn crypto::KexMethod>, CryptoError> {
    let (agreement, hash) = match name {
        CURVE25519_SHA256 | CURVE25519_SHA256_LIBSSH => (&agreement::X25519, "sha256"),
        ECDH_SHA2_NISTP256 => (&agreement::ECDH_P256, "sha256"),
        ECDH_SHA2_NISTP384 => (&agreement::ECDH_P384, "sha384"),
        DH_GROUP14_SHA256 => return Ok(Box::new(DhGroup14::generate(rng)?)),
        _ => return Err(CryptoError), // unsupported
    };
    Ok(Box::new(Ecdh::generate(rng, agreement, hash)?))
}

// ==== ECDH ====

pub struct Ecdh {
    agreement: &'static agreement::Algorithm,
    hash: &'static str,
    private_key: EphemeralPrivateKey,
    public_key: PublicKey,
}

impl Ecdh {
    fn generate(
        rng: &dyn SecureRandom,
        agreement: &'static agreement::Algorithm,
        hash: &'static str,
    ) -> Result<Self, CryptoError> {
        let private_key = EphemeralPrivateKey::generate(agreement, rng).map_err(|_| CryptoError)?;
        let public_key = private_key.compute_public_key().map_err(|_| CryptoError)?;
        Ok(Self {
            agreement,
            hash,
            private_key,
            public_key,
        })
    }
}

impl crypto::KexMethod for Ecdh {
    fn hash_name(&self) -> &'static str {
        self.hash
    }

    fn public_value_encoding(&self) -> PublicValueEncoding {
        PublicValueEncoding::String
    }

    #[inline]
    fn public_value(&self) -> &[u8] {
        self.public_key.as_ref()
    }

    fn agree(self: Box<Self>, peer_public_value: &[u8]) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        let Self {
            agreement,
            private_key,
            ..
        } = *self;

        let peer_public_key = agreement::UnparsedPublicKey::new(agreement, peer_public_value);
        let secret =
            agreement::agree_ephemeral(private_key, &peer_public_key, CryptoError, |secret| {
                Ok(Zeroizing::new(secret.to_vec()))
            })?;

        // RFC 8731 section 3: abort on an all-zero shared secret.
        if secret.iter().all(|&b| b == 0) {
            return Err(CryptoError);
        }

        Ok(secret)
    }
}

// ==== Diffie-Hellman group 14 ====

// RFC 3526 section 3, 2048-bit MODP group.
const GROUP14_PRIME: &[u8] = b"\
FFFFFFFFFFFFFFFFC90FDAA22168C234C4C6628B80DC1CD1\
29024E088A67CC74020BBEA63B139B22514A08798E3404DD\
EF9519B3CD3A431B302B0A6DF25F14374FE1356D6D51C245\
E485B576625E7EC6F44C42E9A637ED6B0BFF5CB6F406B7ED\
EE386BFB5A899FA5AE9F24117C4B1FE649286651ECE45B3D\
C2007CB8A163BF0598DA48361C55D39A69163FA8FD24CF5F\
83655D23DCA3AD961C62F356208552BB9ED529077096966D\
670C354E4ABC9804F1746C08CA18217C32905E462E36CE3B\
E39E772C180E86039B2783A2EC07A28FB5C55DF06F4C52C9\
DE2BCBF6955817183995497CEA956AE515D2261898FA0510\
15728E5A8AACAA68FFFFFFFFFFFFFFFF";

const GROUP14_GENERATOR: u32 = 2;

const PRIVATE_EXPONENT_LEN: usize = 64;

fn group14_prime() -> Result<BigUint, CryptoError> {
    BigUint::parse_bytes(GROUP14_PRIME, 16).ok_or(CryptoError)
}

pub struct DhGroup14 {
    prime: BigUint,
    exponent: Zeroizing<Vec<u8>>,
    public_value: Vec<u8>,
}

impl DhGroup14 {
    fn generate(rng: &dyn SecureRandom) -> Result<Self, CryptoError> {
        let prime = group14_prime()?;

        let mut exponent = Zeroizing::new(vec![0u8; PRIVATE_EXPONENT_LEN]);
        rng.fill(&mut exponent[..]).map_err(|_| CryptoError)?;
        // keep x > 1
        exponent[0] |= 0x80;

        let x = BigUint::from_bytes_be(&exponent);
        let e = BigUint::from(GROUP14_GENERATOR).modpow(&x, &prime);

        Ok(Self {
            prime,
            exponent,
            public_value: e.to_bytes_be(),
        })
    }
}

impl crypto::KexMethod for DhGroup14 {
    fn hash_name(&self) -> &'static str {
        "sha256"
    }

    fn public_value_encoding(&self) -> PublicValueEncoding {
        PublicValueEncoding::Mpint
    }

    #[inline]
    fn public_value(&self) -> &[u8] {
        &self.public_value
    }

    fn agree(self: Box<Self>, peer_public_value: &[u8]) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        if peer_public_value.first().map_or(false, |b| b & 0x80 != 0) {
            return Err(CryptoError); // negative mpint
        }
        let f = BigUint::from_bytes_be(peer_public_value);

        // RFC 4253 section 8: reject f outside of [2, p-2].
        let one = BigUint::from(1u32);
        if f <= one || f >= &self.prime - &one {
            return Err(CryptoError);
        }

        let x = BigUint::from_bytes_be(&self.exponent);
        let k = f.modpow(&x, &self.prime);
        Ok(Zeroizing::new(k.to_bytes_be()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ring::rand::SystemRandom;

    fn agree_both(name: &str) -> (Zeroizing<Vec<u8>>, Zeroizing<Vec<u8>>) {
        let rng = SystemRandom::new();
        let client = start(&rng, name).unwrap();
        let server = start(&rng, name).unwrap();
        let client_public = client.public_value().to_vec();
        let server_public = server.public_value().to_vec();
        (
            client.agree(&server_public).unwrap(),
            server.agree(&client_public).unwrap(),
        )
    }

    #[test]
    fn every_method_agrees() {
        for name in ALGORITHMS {
            let (a, b) = agree_both(name);
            assert_eq!(a, b, "{}", name);
            assert!(!a.is_empty());
        }
    }

    #[test]
    fn curve25519_rejects_low_order_point() {
        let rng = SystemRandom::new();
        let kex = start(&rng, CURVE25519_SHA256).unwrap();
        assert!(kex.agree(&[0u8; 32]).is_err());
    }

    #[test]
    fn group14_rejects_degenerate_values() {
        let rng = SystemRandom::new();
        let prime = group14_prime().unwrap();
        let p_minus_one = (&prime - BigUint::from(1u32)).to_bytes_be();

        for bad in [vec![1u8], p_minus_one, vec![0xff; 8]].iter() {
            let kex = start(&rng, DH_GROUP14_SHA256).unwrap();
            assert!(kex.agree(bad).is_err());
        }
    }

    #[test]
    fn unknown_method() {
        let rng = SystemRandom::new();
        assert!(start(&rng, "diffie-hellman-group1-sha1").is_err());
    }
}
