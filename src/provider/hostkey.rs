//! Host key signature verification.

use crate::{
    crypto::{self, CryptoError},
    util::{get_ssh_string, strip_leading_zeros},
};
use ring::signature;

pub(crate) const SSH_ED25519: &str = "ssh-ed25519";
pub(crate) const ECDSA_SHA2_NISTP256: &str = "ecdsa-sha2-nistp256";
pub(crate) const ECDSA_SHA2_NISTP384: &str = "ecdsa-sha2-nistp384";
pub(crate) const RSA_SHA2_512: &str = "rsa-sha2-512";
pub(crate) const RSA_SHA2_256: &str = "rsa-sha2-256";

pub(crate) const ALGORITHMS: &[&str] = &[
    SSH_ED25519,
    ECDSA_SHA2_NISTP256,
    ECDSA_SHA2_NISTP384,
    RSA_SHA2_512,
    RSA_SHA2_256,
];

pub(crate) fn verifier(name: &str) -> Result<Box<dyn crypto::HostKeyVerifier>, CryptoError> {
    let verifier: Box<dyn crypto::HostKeyVerifier> = match name {
        SSH_ED25519 => Box::new(Ed25519),
        ECDSA_SHA2_NISTP256 => Box::new(Ecdsa {
            name: ECDSA_SHA2_NISTP256,
            curve: "nistp256",
            scalar_len: 32,
            algorithm: &signature::ECDSA_P256_SHA256_FIXED,
        }),
        ECDSA_SHA2_NISTP384 => Box::new(Ecdsa {
            name: ECDSA_SHA2_NISTP384,
            curve: "nistp384",
            scalar_len: 48,
            algorithm: &signature::ECDSA_P384_SHA384_FIXED,
        }),
        RSA_SHA2_512 => Box::new(Rsa {
            name: RSA_SHA2_512,
            params: &signature::RSA_PKCS1_2048_8192_SHA512,
        }),
        RSA_SHA2_256 => Box::new(Rsa {
            name: RSA_SHA2_256,
            params: &signature::RSA_PKCS1_2048_8192_SHA256,
        }),
        _ => return Err(CryptoError), // unsupported
    };
    Ok(verifier)
}

/// Splits a signature blob into its algorithm name and contents.
fn signature_blob(mut blob: &[u8], expected: &str) -> Result<Vec<u8>, CryptoError> {
    let sig_type = get_ssh_string(&mut blob).map_err(|_| CryptoError)?;
    if sig_type != expected.as_bytes() {
        return Err(CryptoError); // key type mismatched
    }
    get_ssh_string(&mut blob).map_err(|_| CryptoError)
}

struct Ed25519;

impl crypto::HostKeyVerifier for Ed25519 {
    fn verify(&self, host_key: &[u8], message: &[u8], sig: &[u8]) -> Result<(), CryptoError> {
        let mut host_key = host_key;
        let key_type = get_ssh_string(&mut host_key).map_err(|_| CryptoError)?;
        if key_type != SSH_ED25519.as_bytes() {
            return Err(CryptoError);
        }
        let public_key = get_ssh_string(&mut host_key).map_err(|_| CryptoError)?;

        let sig = signature_blob(sig, SSH_ED25519)?;

        signature::UnparsedPublicKey::new(&signature::ED25519, &public_key)
            .verify(message, &sig)
            .map_err(|_| CryptoError) // verification failed
    }
}

struct Ecdsa {
    name: &'static str,
    curve: &'static str,
    scalar_len: usize,
    algorithm: &'static signature::EcdsaVerificationAlgorithm,
}

impl Ecdsa {
    // RFC 5656 section 3.1.2 encodes (r, s) as mpints, ring wants them fixed width.
    fn fixed_signature(&self, mut blob: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let mut fixed = vec![0u8; self.scalar_len * 2];
        for chunk in fixed.chunks_mut(self.scalar_len) {
            let scalar = get_ssh_string(&mut blob).map_err(|_| CryptoError)?;
            let scalar = strip_leading_zeros(&scalar);
            if scalar.len() > self.scalar_len {
                return Err(CryptoError);
            }
            chunk[self.scalar_len - scalar.len()..].copy_from_slice(scalar);
        }
        Ok(fixed)
    }
}

impl crypto::HostKeyVerifier for Ecdsa {
    fn verify(&self, host_key: &[u8], message: &[u8], sig: &[u8]) -> Result<(), CryptoError> {
        let mut host_key = host_key;
        let key_type = get_ssh_string(&mut host_key).map_err(|_| CryptoError)?;
        let curve = get_ssh_string(&mut host_key).map_err(|_| CryptoError)?;
        if key_type != self.name.as_bytes() || curve != self.curve.as_bytes() {
            return Err(CryptoError);
        }
        let point = get_ssh_string(&mut host_key).map_err(|_| CryptoError)?;

        let sig = signature_blob(sig, self.name)?;
        let sig = self.fixed_signature(&sig)?;

        signature::UnparsedPublicKey::new(self.algorithm, &point)
            .verify(message, &sig)
            .map_err(|_| CryptoError)
    }
}

struct Rsa {
    name: &'static str,
    params: &'static signature::RsaParameters,
}

impl crypto::HostKeyVerifier for Rsa {
    fn verify(&self, host_key: &[u8], message: &[u8], sig: &[u8]) -> Result<(), CryptoError> {
        // RFC 8332: the key blob stays "ssh-rsa", only the signature names the hash.
        let mut host_key = host_key;
        let key_type = get_ssh_string(&mut host_key).map_err(|_| CryptoError)?;
        if key_type != b"ssh-rsa" {
            return Err(CryptoError);
        }
        let e = get_ssh_string(&mut host_key).map_err(|_| CryptoError)?;
        let n = get_ssh_string(&mut host_key).map_err(|_| CryptoError)?;

        let sig = signature_blob(sig, self.name)?;

        let public_key = signature::RsaPublicKeyComponents {
            n: strip_leading_zeros(&n),
            e: strip_leading_zeros(&e),
        };
        public_key
            .verify(self.params, message, &sig)
            .map_err(|_| CryptoError)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::put_ssh_string;
    use ring::signature::{Ed25519KeyPair, KeyPair as _};

    fn ed25519_blobs(message: &[u8]) -> (Vec<u8>, Vec<u8>) {
        let key_pair = Ed25519KeyPair::from_seed_unchecked(&[7u8; 32]).unwrap();

        let mut host_key = vec![];
        put_ssh_string(&mut host_key, SSH_ED25519.as_bytes());
        put_ssh_string(&mut host_key, key_pair.public_key().as_ref());

        let mut sig = vec![];
        put_ssh_string(&mut sig, SSH_ED25519.as_bytes());
        put_ssh_string(&mut sig, key_pair.sign(message).as_ref());

        (host_key, sig)
    }

    #[test]
    fn ed25519_signature_verifies() {
        let (host_key, sig) = ed25519_blobs(b"exchange hash");
        let verifier = verifier(SSH_ED25519).unwrap();
        verifier.verify(&host_key, b"exchange hash", &sig).unwrap();
    }

    #[test]
    fn ed25519_signature_over_other_message_fails() {
        let (host_key, sig) = ed25519_blobs(b"exchange hash");
        let verifier = verifier(SSH_ED25519).unwrap();
        assert!(verifier.verify(&host_key, b"another hash", &sig).is_err());
    }

    #[test]
    fn truncated_host_key_fails() {
        let (host_key, sig) = ed25519_blobs(b"h");
        let verifier = verifier(SSH_ED25519).unwrap();
        assert!(verifier.verify(&host_key[..20], b"h", &sig).is_err());
    }

    #[test]
    fn ecdsa_scalars_are_left_padded() {
        let ecdsa = Ecdsa {
            name: ECDSA_SHA2_NISTP256,
            curve: "nistp256",
            scalar_len: 32,
            algorithm: &signature::ECDSA_P256_SHA256_FIXED,
        };
        let mut blob = vec![];
        put_ssh_string(&mut blob, &[0x00, 0x80, 0x01]);
        put_ssh_string(&mut blob, &[0x05]);
        let fixed = ecdsa.fixed_signature(&blob).unwrap();
        assert_eq!(fixed.len(), 64);
        assert_eq!(&fixed[30..32], &[0x80, 0x01]);
        assert_eq!(fixed[63], 0x05);
        assert!(fixed[..30].iter().all(|&b| b == 0));
    }
}
