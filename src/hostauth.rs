//! Host key trust decisions.
//!
//! The signature over the exchange hash is checked by the key exchange
//! itself; whether the presented key belongs to the intended server is left to
//! a [`HostKeyTrust`] policy.

use crate::crypto::AlgorithmProvider;
use base64::Engine as _;
use std::collections::HashSet;

/// The verdict of a [`HostKeyTrust`] policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trust {
    Accept,
    Reject,
}

/// Decides whether a server host key is acceptable.
///
/// This is called at every key exchange, with the SSH encoded public key blob
/// and its OpenSSH style fingerprint (`SHA256:<base64>`).
pub trait HostKeyTrust: Send + Sync {
    fn decide(&self, host_key: &[u8], fingerprint: &str) -> Trust;
}

impl<F> HostKeyTrust for F
where
    F: Fn(&[u8], &str) -> Trust + Send + Sync,
{
    fn decide(&self, host_key: &[u8], fingerprint: &str) -> Trust {
        (self)(host_key, fingerprint)
    }
}

/// Accepts every host key. Only suitable for testing.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAny;

impl HostKeyTrust for AcceptAny {
    fn decide(&self, _: &[u8], fingerprint: &str) -> Trust {
        tracing::warn!("accepting unverified host key {}", fingerprint);
        Trust::Accept
    }
}

/// Accepts host keys whose fingerprint is in a pinned set.
#[derive(Debug, Clone, Default)]
pub struct KnownFingerprints {
    fingerprints: HashSet<String>,
}

impl KnownFingerprints {
    pub fn new<I, S>(fingerprints: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fingerprints: fingerprints.into_iter().map(Into::into).collect(),
        }
    }

    pub fn insert(&mut self, fingerprint: impl Into<String>) {
        self.fingerprints.insert(fingerprint.into());
    }
}

impl HostKeyTrust for KnownFingerprints {
    fn decide(&self, _: &[u8], fingerprint: &str) -> Trust {
        if self.fingerprints.contains(fingerprint) {
            Trust::Accept
        } else {
            tracing::debug!("unknown host key {}", fingerprint);
            Trust::Reject
        }
    }
}

/// Computes the `SHA256:` fingerprint of an SSH encoded public key.
pub fn fingerprint(
    provider: &dyn AlgorithmProvider,
    host_key: &[u8],
) -> Result<String, crate::Error> {
    let mut hash = provider.hash("sha256")?;
    hash.update(host_key);
    let digest = hash.finalize();
    Ok(format!(
        "SHA256:{}",
        base64::engine::general_purpose::STANDARD_NO_PAD.encode(digest)
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::DefaultProvider;

    fn sample_key() -> Vec<u8> {
        let mut blob = b"\x00\x00\x00\x0bssh-ed25519\x00\x00\x00\x20".to_vec();
        blob.extend(0..32u8);
        blob
    }

    #[test]
    fn openssh_fingerprint_format() {
        let provider = DefaultProvider::default();
        assert_eq!(
            fingerprint(&provider, &sample_key()).unwrap(),
            "SHA256:ZkAslGjFiUHdGf/WUL8rQvkib4PTvQatUV0OUQSncCA"
        );
    }

    #[test]
    fn known_fingerprints() {
        let trust = KnownFingerprints::new(vec!["SHA256:ZkAslGjFiUHdGf/WUL8rQvkib4PTvQatUV0OUQSncCA"]);
        assert_eq!(
            trust.decide(&sample_key(), "SHA256:ZkAslGjFiUHdGf/WUL8rQvkib4PTvQatUV0OUQSncCA"),
            Trust::Accept
        );
        assert_eq!(trust.decide(&sample_key(), "SHA256:other"), Trust::Reject);
    }

    #[test]
    fn closure_policy() {
        let trust = |key: &[u8], _: &str| {
            if key.len() == 51 {
                Trust::Accept
            } else {
                Trust::Reject
            }
        };
        assert_eq!(HostKeyTrust::decide(&trust, &sample_key(), ""), Trust::Accept);
        assert_eq!(HostKeyTrust::decide(&trust, b"short", ""), Trust::Reject);
    }
}
