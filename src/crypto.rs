//! Cryptography abstraction in SSH transport layer.
//!
//! The engine never performs raw cryptography itself. Every primitive it needs
//! (key agreement, host key signatures, ciphers, MACs, compression, hashes and
//! randomness) is obtained by name from an [`AlgorithmProvider`]. The bundled
//! ring based implementation lives in [`crate::provider`].

use zeroize::Zeroizing;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("crypto error")]
pub struct CryptoError;

/// The algorithm categories negotiated by `SSH_MSG_KEXINIT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    Kex,
    HostKey,
    Cipher,
    Mac,
    Compression,
}

impl Category {
    pub fn name(self) -> &'static str {
        match self {
            Category::Kex => "key exchange",
            Category::HostKey => "host key",
            Category::Cipher => "cipher",
            Category::Mac => "MAC",
            Category::Compression => "compression",
        }
    }
}

/// A registry of named algorithm implementations.
///
/// The order returned from [`supported`](AlgorithmProvider::supported) is the
/// client preference used when a [`Config`](crate::Config) does not override it.
pub trait AlgorithmProvider: Send + Sync {
    /// Return the names of available algorithms in the category, most preferred first.
    fn supported(&self, category: Category) -> Vec<&'static str>;

    /// Start a key exchange, generating fresh ephemeral key material.
    fn kex(&self, name: &str) -> Result<Box<dyn KexMethod>, CryptoError>;

    /// Return the signature verifier of a host key algorithm.
    fn host_key(&self, name: &str) -> Result<Box<dyn HostKeyVerifier>, CryptoError>;

    /// Return the key, IV and framing parameters of a cipher.
    fn cipher_spec(&self, name: &str) -> Result<CipherSpec, CryptoError>;

    /// Create the encrypting half of a cipher.
    fn sealing(&self, name: &str, key: &[u8], iv: &[u8]) -> Result<Box<dyn Sealing>, CryptoError>;

    /// Create the decrypting half of a cipher.
    fn opening(&self, name: &str, key: &[u8], iv: &[u8]) -> Result<Box<dyn Opening>, CryptoError>;

    /// Return the key and tag lengths of a MAC.
    fn mac_spec(&self, name: &str) -> Result<MacSpec, CryptoError>;

    /// Create a keyed MAC.
    fn mac(&self, name: &str, key: &[u8]) -> Result<Box<dyn Mac>, CryptoError>;

    /// Create a compression context. `None` stands for the `none` method.
    fn compression(&self, name: &str) -> Result<Option<Box<dyn Compression>>, CryptoError>;

    /// Create a hash context by its short name (e.g. `sha256`).
    fn hash(&self, name: &str) -> Result<Box<dyn Hash>, CryptoError>;

    /// Fill the specified buffer with random bytes.
    ///
    /// This is used for the KEXINIT cookie and packet padding.
    fn fill_random(&self, buf: &mut [u8]) -> Result<(), CryptoError>;
}

/// An incremental hash function.
pub trait Hash: Send {
    fn update(&mut self, data: &[u8]);
    fn finalize(self: Box<Self>) -> Vec<u8>;
}

/// How a key exchange method encodes its ephemeral public values, both on the
/// wire and inside the exchange hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublicValueEncoding {
    /// ECDH style `string Q_C` / `string Q_S` (RFC 5656).
    String,
    /// Classic Diffie-Hellman `mpint e` / `mpint f` (RFC 4253).
    Mpint,
}

/// A key exchange context holding one ephemeral key pair.
pub trait KexMethod: Send {
    /// Short name of the hash function the method is defined with.
    fn hash_name(&self) -> &'static str;

    fn public_value_encoding(&self) -> PublicValueEncoding;

    /// Returns the contents of ephemeral public value (`e` or `Q_C`).
    fn public_value(&self) -> &[u8];

    /// Completes the agreement with the server's public value, returning the
    /// shared secret `K` as an unsigned big-endian integer.
    fn agree(self: Box<Self>, peer_public_value: &[u8]) -> Result<Zeroizing<Vec<u8>>, CryptoError>;
}

/// Verifies signatures made with the server host key.
pub trait HostKeyVerifier: Send {
    /// `host_key` and `signature` are the raw SSH encoded blobs.
    fn verify(&self, host_key: &[u8], message: &[u8], signature: &[u8])
        -> Result<(), CryptoError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CipherSpec {
    pub key_len: usize,
    pub iv_len: usize,
    /// The alignment unit of encrypted packets; at least 8.
    pub block_size: usize,
    /// Length of the authentication tag of an AEAD cipher, 0 otherwise.
    pub tag_len: usize,
}

impl CipherSpec {
    /// AEAD ciphers carry their own integrity tag and skip MAC negotiation.
    pub fn is_aead(&self) -> bool {
        self.tag_len > 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MacSpec {
    pub key_len: usize,
    pub mac_len: usize,
}

/// Opening (authentication and decryption) context.
pub trait Opening: Send {
    fn block_size(&self) -> usize;

    /// Returns the length of authentication tag.
    fn tag_len(&self) -> usize;

    /// The number of leading bytes required by
    /// [`decrypt_packet_length`](Opening::decrypt_packet_length).
    fn head_len(&self) -> usize;

    /// Decrypts the length of a packet from its first `head_len` bytes.
    ///
    /// Block ciphers decrypt `head` in place; AEAD constructions leave it
    /// untouched because it takes part in the tag computation.
    fn decrypt_packet_length(&mut self, seqn: u32, head: &mut [u8]) -> Result<u32, CryptoError>;

    /// Opens (authenticates and decrypts) a packet.
    ///
    /// The input data `in_out` must be a concatenation of the packet length, the
    /// ciphertext of packet payload and the authentication tag. Its first
    /// `head_len` bytes already went through `decrypt_packet_length`.
    fn open_in_place(
        &mut self,
        seqn: u32,
        in_out: &mut [u8],
        packet_length: u32,
    ) -> Result<(), CryptoError>;
}

/// Sealing (encryption and signing) context.
pub trait Sealing: Send {
    fn block_size(&self) -> usize;

    /// Returns the length of authentication tag.
    fn tag_len(&self) -> usize;

    /// Seals (encrypts and signs) a packet.
    ///
    /// The input data `in_out` must be a concatenation of packet length and the plaintext of
    /// packet payload with random padding.
    ///
    /// The length of `tag_out` must be equal to `tag_len`.
    fn seal_in_place(&mut self, seqn: u32, in_out: &mut [u8], tag_out: &mut [u8])
        -> Result<(), CryptoError>;
}

/// A keyed message authentication code over `seqn || packet`.
pub trait Mac: Send {
    fn mac_len(&self) -> usize;

    fn sign(&self, seqn: u32, packet: &[u8], tag_out: &mut [u8]);

    /// Verifies `tag` in constant time.
    fn verify(&self, seqn: u32, packet: &[u8], tag: &[u8]) -> Result<(), CryptoError>;
}

/// A payload compression context, one per direction.
pub trait Compression: Send {
    fn compress(&mut self, input: &[u8], out: &mut Vec<u8>) -> Result<(), CryptoError>;
    fn decompress(&mut self, input: &[u8], out: &mut Vec<u8>) -> Result<(), CryptoError>;
}
