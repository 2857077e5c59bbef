//! Key exchange (RFC 4253 sections 7 and 8, RFC 5656 section 4).

use super::codec::{OpeningKeys, SealingKeys};
use crate::{
    config::Config,
    consts,
    crypto::{AlgorithmProvider, Category, KexMethod, PublicValueEncoding},
    hostauth::{self, HostKeyTrust, Trust},
    util::{
        get_bool, get_name_list, get_ssh_string, get_u32, get_u8, put_bool, put_mpint,
        put_name_list, put_ssh_string,
    },
};
use bytes::{Buf as _, BufMut as _};
use std::sync::Arc;
use zeroize::Zeroizing;

const STRICT_KEX_CLIENT: &str = "kex-strict-c-v00@openssh.com";
const STRICT_KEX_SERVER: &str = "kex-strict-s-v00@openssh.com";

// ==== KEXINIT ====

/// The contents of `SSH_MSG_KEXINIT`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct KexInit {
    pub(crate) cookie: [u8; 16],
    pub(crate) kex: Vec<String>,
    pub(crate) host_key: Vec<String>,
    pub(crate) cipher_c2s: Vec<String>,
    pub(crate) cipher_s2c: Vec<String>,
    pub(crate) mac_c2s: Vec<String>,
    pub(crate) mac_s2c: Vec<String>,
    pub(crate) compression_c2s: Vec<String>,
    pub(crate) compression_s2c: Vec<String>,
    pub(crate) first_kex_packet_follows: bool,
}

impl KexInit {
    pub(crate) fn encode(&self) -> Vec<u8> {
        let mut payload = vec![];
        payload.put_u8(consts::SSH_MSG_KEXINIT);
        payload.put_slice(&self.cookie[..]);
        put_name_list(&mut payload, &self.kex);
        put_name_list(&mut payload, &self.host_key);
        put_name_list(&mut payload, &self.cipher_c2s);
        put_name_list(&mut payload, &self.cipher_s2c);
        put_name_list(&mut payload, &self.mac_c2s);
        put_name_list(&mut payload, &self.mac_s2c);
        put_name_list(&mut payload, &self.compression_c2s);
        put_name_list(&mut payload, &self.compression_s2c);
        put_ssh_string(&mut payload, b""); // languages_client_to_server
        put_ssh_string(&mut payload, b""); // languages_server_to_client
        put_bool(&mut payload, self.first_kex_packet_follows);
        payload.put_u32(0); // reserved
        payload
    }

    pub(crate) fn parse(mut payload: &[u8]) -> Result<Self, crate::Error> {
        if get_u8(&mut payload)? != consts::SSH_MSG_KEXINIT {
            return Err(crate::Error::protocol("not a KEXINIT message"));
        }
        if payload.remaining() < 16 {
            return Err(crate::Error::protocol("truncated KEXINIT cookie"));
        }
        let mut cookie = [0u8; 16];
        payload.copy_to_slice(&mut cookie[..]);

        let kex = get_name_list(&mut payload)?;
        let host_key = get_name_list(&mut payload)?;
        let cipher_c2s = get_name_list(&mut payload)?;
        let cipher_s2c = get_name_list(&mut payload)?;
        let mac_c2s = get_name_list(&mut payload)?;
        let mac_s2c = get_name_list(&mut payload)?;
        let compression_c2s = get_name_list(&mut payload)?;
        let compression_s2c = get_name_list(&mut payload)?;
        let _languages_c2s = get_name_list(&mut payload)?;
        let _languages_s2c = get_name_list(&mut payload)?;
        let first_kex_packet_follows = get_bool(&mut payload)?;
        let _reserved = get_u32(&mut payload)?;

        Ok(Self {
            cookie,
            kex,
            host_key,
            cipher_c2s,
            cipher_s2c,
            mac_c2s,
            mac_s2c,
            compression_c2s,
            compression_s2c,
            first_kex_packet_follows,
        })
    }
}

/// Picks the first algorithm of the client's list that the server also supports.
///
/// The client always acts as the initiator of the negotiation (RFC 4253 section 7.1).
pub(crate) fn negotiate(client: &[String], server: &[String]) -> Option<String> {
    client
        .iter()
        .find(|name| server.iter().any(|s| s == *name))
        .cloned()
}

/// The algorithms agreed on by a key exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NegotiatedAlgorithms {
    pub kex: String,
    pub host_key: String,
    pub cipher_client_to_server: String,
    pub cipher_server_to_client: String,
    /// `None` when the cipher is an AEAD construction.
    pub mac_client_to_server: Option<String>,
    pub mac_server_to_client: Option<String>,
    pub compression_client_to_server: String,
    pub compression_server_to_client: String,
}

impl NegotiatedAlgorithms {
    pub(crate) fn negotiate(
        provider: &dyn AlgorithmProvider,
        client: &KexInit,
        server: &KexInit,
    ) -> Result<Self, crate::Error> {
        fn pick(
            category: Category,
            client: &[String],
            server: &[String],
        ) -> Result<String, crate::Error> {
            negotiate(client, server).ok_or(crate::Error::NoCommonAlgorithm {
                category: category.name(),
            })
        }

        let kex = pick(Category::Kex, &client.kex, &server.kex)?;
        let host_key = pick(Category::HostKey, &client.host_key, &server.host_key)?;
        let cipher_c2s = pick(Category::Cipher, &client.cipher_c2s, &server.cipher_c2s)?;
        let cipher_s2c = pick(Category::Cipher, &client.cipher_s2c, &server.cipher_s2c)?;

        // AEAD ciphers authenticate packets by themselves.
        let mac = |cipher: &str, client: &[String], server: &[String]| {
            if provider.cipher_spec(cipher)?.is_aead() {
                Ok(None)
            } else {
                pick(Category::Mac, client, server).map(Some)
            }
        };
        let mac_c2s = mac(&cipher_c2s, &client.mac_c2s, &server.mac_c2s)?;
        let mac_s2c = mac(&cipher_s2c, &client.mac_s2c, &server.mac_s2c)?;

        let compression_c2s = pick(
            Category::Compression,
            &client.compression_c2s,
            &server.compression_c2s,
        )?;
        let compression_s2c = pick(
            Category::Compression,
            &client.compression_s2c,
            &server.compression_s2c,
        )?;

        Ok(Self {
            kex,
            host_key,
            cipher_client_to_server: cipher_c2s,
            cipher_server_to_client: cipher_s2c,
            mac_client_to_server: mac_c2s,
            mac_server_to_client: mac_s2c,
            compression_client_to_server: compression_c2s,
            compression_server_to_client: compression_s2c,
        })
    }
}

/// The client's algorithm lists, resolved against the provider.
#[derive(Debug, Clone)]
pub(crate) struct Preferences {
    kex: Vec<String>,
    host_key: Vec<String>,
    cipher: Vec<String>,
    mac: Vec<String>,
    compression: Vec<String>,
}

impl Preferences {
    pub(crate) fn resolve(provider: &dyn AlgorithmProvider, config: &Config) -> Self {
        let resolve = |category: Category, preferred: &[String]| -> Vec<String> {
            let supported = provider.supported(category);
            if preferred.is_empty() {
                supported.into_iter().map(str::to_owned).collect()
            } else {
                preferred
                    .iter()
                    .filter(|name| supported.contains(&name.as_str()))
                    .cloned()
                    .collect()
            }
        };
        let prefs = &config.algorithms;
        Self {
            kex: resolve(Category::Kex, &prefs.kex),
            host_key: resolve(Category::HostKey, &prefs.host_key),
            cipher: resolve(Category::Cipher, &prefs.cipher),
            mac: resolve(Category::Mac, &prefs.mac),
            compression: resolve(Category::Compression, &prefs.compression),
        }
    }
}

// ==== exchange hash and key derivation ====

/// Inputs of the exchange hash `H` other than the shared secret.
pub(crate) struct ExchangeHashInput<'a> {
    pub(crate) client_id: &'a [u8],
    pub(crate) server_id: &'a [u8],
    pub(crate) client_kexinit: &'a [u8],
    pub(crate) server_kexinit: &'a [u8],
    pub(crate) host_key: &'a [u8],
    pub(crate) encoding: PublicValueEncoding,
    pub(crate) client_public: &'a [u8],
    pub(crate) server_public: &'a [u8],
}

pub(crate) fn exchange_hash(
    provider: &dyn AlgorithmProvider,
    hash_name: &str,
    input: &ExchangeHashInput<'_>,
    secret: &[u8],
) -> Result<Vec<u8>, crate::Error> {
    let mut buf = Zeroizing::new(vec![]);
    put_ssh_string(&mut *buf, input.client_id);
    put_ssh_string(&mut *buf, input.server_id);
    put_ssh_string(&mut *buf, input.client_kexinit);
    put_ssh_string(&mut *buf, input.server_kexinit);
    put_ssh_string(&mut *buf, input.host_key);
    match input.encoding {
        PublicValueEncoding::String => {
            put_ssh_string(&mut *buf, input.client_public);
            put_ssh_string(&mut *buf, input.server_public);
        }
        PublicValueEncoding::Mpint => {
            put_mpint(&mut *buf, input.client_public);
            put_mpint(&mut *buf, input.server_public);
        }
    }
    put_mpint(&mut *buf, secret);

    let mut hash = provider.hash(hash_name)?;
    hash.update(&buf[..]);
    Ok(hash.finalize())
}

/// Derives one key of `len` bytes as described in RFC 4253 section 7.2.
pub(crate) fn derive_key(
    provider: &dyn AlgorithmProvider,
    hash_name: &str,
    secret: &[u8],
    exchange_hash: &[u8],
    letter: u8,
    session_id: &[u8],
    len: usize,
) -> Result<Zeroizing<Vec<u8>>, crate::Error> {
    let mut secret_mpint = Zeroizing::new(vec![]);
    put_mpint(&mut *secret_mpint, secret);

    let mut key = Zeroizing::new(Vec::with_capacity(len));

    // K1 = HASH(K || H || X || session_id)
    let mut hash = provider.hash(hash_name)?;
    hash.update(&secret_mpint[..]);
    hash.update(exchange_hash);
    hash.update(&[letter]);
    hash.update(session_id);
    key.extend_from_slice(&Zeroizing::new(hash.finalize())[..]);

    // Kn = HASH(K || H || K1 || ... || Kn-1)
    while key.len() < len {
        let mut hash = provider.hash(hash_name)?;
        hash.update(&secret_mpint[..]);
        hash.update(exchange_hash);
        hash.update(&key[..]);
        key.extend_from_slice(&Zeroizing::new(hash.finalize())[..]);
    }

    key.truncate(len);
    Ok(key)
}

// ==== KeyExchange ====

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum KexState {
    Idle,
    NegotiatingAlgorithms,
    ExchangingKeys,
    VerifyingHostKey,
    InstallingKeys,
}

/// The result of processing the server's key exchange reply.
pub(crate) struct NewKeys {
    /// `SSH_MSG_NEWKEYS`, to be sent with the old keys.
    pub(crate) payload: Vec<u8>,
    /// Keys for outbound packets, installed right after sending `payload`.
    pub(crate) sealing: SealingKeys,
    pub(crate) reset_seqn: bool,
}

/// The client side of a key exchange, replaying every re-key on the same state machine.
///
/// This type does no I/O: handlers return the payloads to send.
pub(crate) struct KeyExchange {
    provider: Arc<dyn AlgorithmProvider>,
    trust: Arc<dyn HostKeyTrust>,
    prefs: Preferences,
    guess: bool,
    strict_kex: bool,
    client_id: String,
    server_id: String,

    state: KexState,
    session_id: Option<Vec<u8>>,
    strict: bool,
    completed: u64,
    algorithms: Option<NegotiatedAlgorithms>,

    // per exchange
    client_kexinit: Option<(KexInit, Vec<u8>)>,
    server_kexinit: Option<Vec<u8>>,
    negotiated: Option<NegotiatedAlgorithms>,
    method: Option<Box<dyn KexMethod>>,
    method_name: Option<String>,
    ignore_next: bool,
    opening: Option<OpeningKeys>,
}

impl KeyExchange {
    pub(crate) fn new(
        provider: Arc<dyn AlgorithmProvider>,
        trust: Arc<dyn HostKeyTrust>,
        config: &Config,
        server_id: String,
    ) -> Self {
        let prefs = Preferences::resolve(&*provider, config);
        Self {
            provider,
            trust,
            prefs,
            guess: config.kex_guess,
            strict_kex: config.strict_kex,
            client_id: config.client_id.clone(),
            server_id,
            state: KexState::Idle,
            session_id: None,
            strict: false,
            completed: 0,
            algorithms: None,
            client_kexinit: None,
            server_kexinit: None,
            negotiated: None,
            method: None,
            method_name: None,
            ignore_next: false,
            opening: None,
        }
    }

    pub(crate) fn state(&self) -> KexState {
        self.state
    }

    pub(crate) fn session_id(&self) -> Option<&[u8]> {
        self.session_id.as_deref()
    }

    pub(crate) fn algorithms(&self) -> Option<&NegotiatedAlgorithms> {
        self.algorithms.as_ref()
    }

    /// Whether strict key exchange was agreed on the first exchange.
    pub(crate) fn is_strict(&self) -> bool {
        self.strict
    }

    /// Whether the initial exchange is still running.
    pub(crate) fn is_initial(&self) -> bool {
        self.completed == 0
    }

    /// Outbound messages other than key exchange ones must wait while this holds.
    pub(crate) fn blocks_outbound(&self) -> bool {
        matches!(
            self.state,
            KexState::NegotiatingAlgorithms | KexState::ExchangingKeys | KexState::VerifyingHostKey
        )
    }

    /// Starts an exchange by building our KEXINIT, plus a guessed init when enabled.
    ///
    /// Returns nothing if an exchange is already running.
    pub(crate) fn initiate(&mut self) -> Result<Vec<Vec<u8>>, crate::Error> {
        let span = tracing::trace_span!("KeyExchange::initiate");
        let _enter = span.enter();

        if self.state != KexState::Idle {
            return Ok(vec![]);
        }

        let mut cookie = [0u8; 16];
        self.provider.fill_random(&mut cookie[..])?;

        let mut kex = self.prefs.kex.clone();
        if self.strict_kex && self.is_initial() {
            kex.push(STRICT_KEX_CLIENT.into());
        }

        let mut outgoing = vec![];
        let guessed = match (self.guess, self.prefs.kex.first()) {
            (true, Some(name)) => Some(name.clone()),
            _ => None,
        };

        let kexinit = KexInit {
            cookie,
            kex,
            host_key: self.prefs.host_key.clone(),
            cipher_c2s: self.prefs.cipher.clone(),
            cipher_s2c: self.prefs.cipher.clone(),
            mac_c2s: self.prefs.mac.clone(),
            mac_s2c: self.prefs.mac.clone(),
            compression_c2s: self.prefs.compression.clone(),
            compression_s2c: self.prefs.compression.clone(),
            first_kex_packet_follows: guessed.is_some(),
        };
        let payload = kexinit.encode();
        outgoing.push(payload.clone());
        self.client_kexinit = Some((kexinit, payload));

        if let Some(name) = guessed {
            tracing::trace!("send guessed init for {}", name);
            let method = self.provider.kex(&name)?;
            outgoing.push(init_payload(&*method));
            self.method = Some(method);
            self.method_name = Some(name);
        }

        tracing::trace!("--> NegotiatingAlgorithms");
        self.state = KexState::NegotiatingAlgorithms;
        Ok(outgoing)
    }

    /// Handles the server's KEXINIT, answering with our own when the server started.
    pub(crate) fn on_kexinit(&mut self, payload: &[u8]) -> Result<Vec<Vec<u8>>, crate::Error> {
        let span = tracing::trace_span!("KeyExchange::on_kexinit");
        let _enter = span.enter();

        let mut outgoing = match self.state {
            KexState::Idle => self.initiate()?,
            KexState::NegotiatingAlgorithms if self.server_kexinit.is_none() => vec![],
            _ => return Err(crate::Error::protocol("unexpected KEXINIT during key exchange")),
        };

        let server = KexInit::parse(payload)?;
        let client = match self.client_kexinit {
            Some((ref client, _)) => client,
            None => return Err(crate::Error::protocol("KEXINIT was not sent")),
        };

        let negotiated = NegotiatedAlgorithms::negotiate(&*self.provider, client, &server)?;
        tracing::debug!("negotiated algorithms: {:?}", negotiated);

        if self.is_initial() && self.strict_kex {
            self.strict = server.kex.iter().any(|name| name == STRICT_KEX_SERVER);
            tracing::debug!("strict key exchange: {}", self.strict);
        }

        // RFC 4253 section 7: a guess is right only if both sides prefer the
        // same key exchange and host key algorithms.
        let guess_is_right = client.kex.first().is_some()
            && client.kex.first() == server.kex.first()
            && client.host_key.first() == server.host_key.first();
        if server.first_kex_packet_follows && !guess_is_right {
            tracing::debug!("discard the server's guessed key exchange packet");
            self.ignore_next = true;
        }
        let keep_guess =
            guess_is_right && self.method_name.as_deref() == Some(negotiated.kex.as_str());
        if !keep_guess {
            if self.method.is_some() {
                tracing::debug!("our guessed key exchange was wrong");
            }
            let method = self.provider.kex(&negotiated.kex)?;
            outgoing.push(init_payload(&*method));
            self.method = Some(method);
            self.method_name = Some(negotiated.kex.clone());
        }

        self.server_kexinit = Some(payload.to_vec());
        self.negotiated = Some(negotiated);

        tracing::trace!("--> ExchangingKeys");
        self.state = KexState::ExchangingKeys;
        Ok(outgoing)
    }

    /// Handles `SSH_MSG_KEX_ECDH_REPLY` / `SSH_MSG_KEXDH_REPLY`.
    ///
    /// Returns `None` when the message was a wrongly guessed packet of the server.
    pub(crate) fn on_reply(&mut self, payload: &[u8]) -> Result<Option<NewKeys>, crate::Error> {
        let span = tracing::trace_span!("KeyExchange::on_reply");
        let _enter = span.enter();

        if self.state != KexState::ExchangingKeys {
            return Err(crate::Error::protocol("unexpected key exchange reply"));
        }
        if self.ignore_next {
            self.ignore_next = false;
            return Ok(None);
        }

        let mut payload = payload;
        if get_u8(&mut payload)? != consts::SSH_MSG_KEX_ECDH_REPLY {
            return Err(crate::Error::protocol("expected a key exchange reply"));
        }
        let host_key = get_ssh_string(&mut payload)?;
        let server_public = get_ssh_string(&mut payload)?;
        let signature = get_ssh_string(&mut payload)?;

        tracing::trace!("--> VerifyingHostKey");
        self.state = KexState::VerifyingHostKey;

        let (method, negotiated) = match (self.method.take(), self.negotiated.take()) {
            (Some(method), Some(negotiated)) => (method, negotiated),
            _ => return Err(crate::Error::protocol("key exchange is not running")),
        };
        let (client_kexinit, server_kexinit) =
            match (self.client_kexinit.take(), self.server_kexinit.take()) {
                (Some((_, client)), Some(server)) => (client, server),
                _ => return Err(crate::Error::protocol("key exchange is not running")),
            };

        let hash_name = method.hash_name();
        let encoding = method.public_value_encoding();
        let client_public = method.public_value().to_vec();
        let secret = method
            .agree(&server_public)
            .map_err(|_| crate::Error::protocol("invalid ephemeral public value of the server"))?;

        let exchange_hash = exchange_hash(
            &*self.provider,
            hash_name,
            &ExchangeHashInput {
                client_id: self.client_id.as_bytes(),
                server_id: self.server_id.as_bytes(),
                client_kexinit: &client_kexinit,
                server_kexinit: &server_kexinit,
                host_key: &host_key,
                encoding,
                client_public: &client_public,
                server_public: &server_public,
            },
            &secret,
        )?;

        self.provider
            .host_key(&negotiated.host_key)?
            .verify(&host_key, &exchange_hash, &signature)
            .map_err(|_| {
                crate::Error::HostKeyRejected("exchange hash signature does not verify".into())
            })?;

        let fingerprint = hostauth::fingerprint(&*self.provider, &host_key)?;
        if self.trust.decide(&host_key, &fingerprint) == Trust::Reject {
            return Err(crate::Error::HostKeyRejected(format!(
                "{} is not trusted",
                fingerprint
            )));
        }
        tracing::debug!("server host key {} accepted", fingerprint);

        // The first exchange hash is used as 'session id'.
        let session_id = self
            .session_id
            .get_or_insert_with(|| exchange_hash.clone())
            .clone();

        tracing::trace!("--> InstallingKeys");
        self.state = KexState::InstallingKeys;

        let derive = |letter: u8, len: usize| {
            derive_key(
                &*self.provider,
                hash_name,
                &secret,
                &exchange_hash,
                letter,
                &session_id,
                len,
            )
        };

        let provider = &*self.provider;
        let cipher_c2s = provider.cipher_spec(&negotiated.cipher_client_to_server)?;
        let cipher_s2c = provider.cipher_spec(&negotiated.cipher_server_to_client)?;

        let sealing = SealingKeys {
            cipher: provider.sealing(
                &negotiated.cipher_client_to_server,
                &derive(b'C', cipher_c2s.key_len)?,
                &derive(b'A', cipher_c2s.iv_len)?,
            )?,
            mac: match negotiated.mac_client_to_server {
                Some(ref name) => {
                    let spec = provider.mac_spec(name)?;
                    Some(provider.mac(name, &derive(b'E', spec.key_len)?)?)
                }
                None => None,
            },
            compression: provider.compression(&negotiated.compression_client_to_server)?,
        };
        let opening = OpeningKeys {
            cipher: provider.opening(
                &negotiated.cipher_server_to_client,
                &derive(b'D', cipher_s2c.key_len)?,
                &derive(b'B', cipher_s2c.iv_len)?,
            )?,
            mac: match negotiated.mac_server_to_client {
                Some(ref name) => {
                    let spec = provider.mac_spec(name)?;
                    Some(provider.mac(name, &derive(b'F', spec.key_len)?)?)
                }
                None => None,
            },
            compression: provider.compression(&negotiated.compression_server_to_client)?,
        };

        self.opening = Some(opening);
        self.negotiated = Some(negotiated);

        Ok(Some(NewKeys {
            payload: vec![consts::SSH_MSG_NEWKEYS],
            sealing,
            reset_seqn: self.strict,
        }))
    }

    /// Handles the server's `SSH_MSG_NEWKEYS`, returning the inbound keys to install.
    pub(crate) fn on_newkeys(&mut self) -> Result<(OpeningKeys, bool), crate::Error> {
        if self.state != KexState::InstallingKeys {
            return Err(crate::Error::protocol("unexpected NEWKEYS"));
        }
        let opening = self
            .opening
            .take()
            .ok_or_else(|| crate::Error::protocol("unexpected NEWKEYS"))?;

        self.algorithms = self.negotiated.take();
        self.method_name = None;
        self.completed += 1;

        tracing::trace!("--> Idle");
        self.state = KexState::Idle;
        Ok((opening, self.strict))
    }
}

/// `SSH_MSG_KEX_ECDH_INIT` / `SSH_MSG_KEXDH_INIT`, which share the message number.
fn init_payload(method: &dyn KexMethod) -> Vec<u8> {
    let mut payload = vec![];
    payload.put_u8(consts::SSH_MSG_KEX_ECDH_INIT);
    match method.public_value_encoding() {
        PublicValueEncoding::String => put_ssh_string(&mut payload, method.public_value()),
        PublicValueEncoding::Mpint => put_mpint(&mut payload, method.public_value()),
    }
    payload
}

/// Whether the message number belongs to the transport layer's key exchange.
pub(crate) fn is_kex_message(typ: u8) -> bool {
    matches!(typ, consts::SSH_MSG_KEXINIT | consts::SSH_MSG_NEWKEYS | 30..=49)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{hostauth::AcceptAny, provider::DefaultProvider};

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn unhex(s: &str) -> Vec<u8> {
        (0..s.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(&s[i..i + 2], 16).unwrap())
            .collect()
    }

    #[test]
    fn negotiation_prefers_client_order() {
        assert_eq!(
            negotiate(&names(&["a", "b", "c"]), &names(&["c", "b"])),
            Some("b".into())
        );
        assert_eq!(negotiate(&names(&["a"]), &names(&["b"])), None);
    }

    #[test]
    fn kexinit_round_trip() {
        let init = KexInit {
            cookie: [9u8; 16],
            kex: names(&["curve25519-sha256", STRICT_KEX_CLIENT]),
            host_key: names(&["ssh-ed25519"]),
            cipher_c2s: names(&["aes128-ctr"]),
            cipher_s2c: names(&["aes256-ctr"]),
            mac_c2s: names(&["hmac-sha2-256"]),
            mac_s2c: names(&["hmac-sha2-512"]),
            compression_c2s: names(&["none"]),
            compression_s2c: names(&["none"]),
            first_kex_packet_follows: true,
        };
        assert_eq!(KexInit::parse(&init.encode()).unwrap(), init);
    }

    #[test]
    fn truncated_kexinit_is_rejected() {
        let init = KexInit {
            cookie: [0u8; 16],
            kex: names(&["curve25519-sha256"]),
            host_key: vec![],
            cipher_c2s: vec![],
            cipher_s2c: vec![],
            mac_c2s: vec![],
            mac_s2c: vec![],
            compression_c2s: vec![],
            compression_s2c: vec![],
            first_kex_packet_follows: false,
        };
        let payload = init.encode();
        assert!(KexInit::parse(&payload[..payload.len() - 3]).is_err());
    }

    fn server_kexinit(ciphers: &[&str], macs: &[&str]) -> KexInit {
        KexInit {
            cookie: [1u8; 16],
            kex: names(&["ecdh-sha2-nistp256", "curve25519-sha256", STRICT_KEX_SERVER]),
            host_key: names(&["rsa-sha2-512", "ssh-ed25519"]),
            cipher_c2s: names(ciphers),
            cipher_s2c: names(ciphers),
            mac_c2s: names(macs),
            mac_s2c: names(macs),
            compression_c2s: names(&["zlib@openssh.com", "none"]),
            compression_s2c: names(&["none"]),
            first_kex_packet_follows: false,
        }
    }

    fn client_kexinit(provider: &DefaultProvider) -> KexInit {
        let prefs = Preferences::resolve(provider, &Config::default());
        KexInit {
            cookie: [0u8; 16],
            kex: prefs.kex,
            host_key: prefs.host_key,
            cipher_c2s: prefs.cipher.clone(),
            cipher_s2c: prefs.cipher,
            mac_c2s: prefs.mac.clone(),
            mac_s2c: prefs.mac,
            compression_c2s: prefs.compression.clone(),
            compression_s2c: prefs.compression,
            first_kex_packet_follows: false,
        }
    }

    #[test]
    fn aead_cipher_skips_mac() {
        let provider = DefaultProvider::default();
        let client = client_kexinit(&provider);
        let server = server_kexinit(&["aes256-gcm@openssh.com"], &[]);
        let negotiated = NegotiatedAlgorithms::negotiate(&provider, &client, &server).unwrap();
        assert_eq!(negotiated.kex, "curve25519-sha256");
        assert_eq!(negotiated.host_key, "ssh-ed25519");
        assert_eq!(negotiated.cipher_client_to_server, "aes256-gcm@openssh.com");
        assert_eq!(negotiated.mac_client_to_server, None);
        assert_eq!(negotiated.compression_client_to_server, "none");
    }

    #[test]
    fn block_cipher_requires_mac() {
        let provider = DefaultProvider::default();
        let client = client_kexinit(&provider);

        let server = server_kexinit(&["aes128-ctr"], &["hmac-sha2-512"]);
        let negotiated = NegotiatedAlgorithms::negotiate(&provider, &client, &server).unwrap();
        assert_eq!(negotiated.mac_server_to_client.as_deref(), Some("hmac-sha2-512"));

        let server = server_kexinit(&["aes128-ctr"], &["hmac-sha1"]);
        match NegotiatedAlgorithms::negotiate(&provider, &client, &server) {
            Err(crate::Error::NoCommonAlgorithm { category }) => assert_eq!(category, "MAC"),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn configured_preferences_filter_unknown_names() {
        let provider = DefaultProvider::default();
        let mut config = Config::default();
        config.algorithms.cipher = names(&["3des-cbc", "aes128-ctr"]);
        let prefs = Preferences::resolve(&provider, &config);
        assert_eq!(prefs.cipher, names(&["aes128-ctr"]));
        assert_eq!(prefs.kex[0], "curve25519-sha256");
    }

    #[test]
    fn key_derivation_vector() {
        let provider = DefaultProvider::default();
        let secret = {
            let mut k = vec![0x80u8];
            k.extend(1..32u8);
            k
        };
        let sha256 = |data: &[u8]| {
            let mut hash = provider.hash("sha256").unwrap();
            hash.update(data);
            hash.finalize()
        };
        let h = sha256(b"exchange hash");
        let session_id = sha256(b"session");

        let key = derive_key(&provider, "sha256", &secret, &h, b'C', &session_id, 64).unwrap();
        assert_eq!(
            &key[..],
            &unhex(
                "dd7e6fd17696eb9f788faf97b02990f2c14454b41cd66378957ab22477b7d109\
                 0f9e93418a0904e2ce9a74b883bdddf4520fa603f8572c020bd3ec47f8573b77"
            )[..]
        );

        let iv = derive_key(&provider, "sha256", &secret, &h, b'A', &session_id, 12).unwrap();
        assert_eq!(&iv[..], &unhex("8c0801876ecdd4ea210fb2b5")[..]);

        // leading zero bytes of the secret do not change the mpint encoding.
        let mut padded = vec![0u8, 0];
        padded.extend_from_slice(&secret);
        let again = derive_key(&provider, "sha256", &padded, &h, b'C', &session_id, 64).unwrap();
        assert_eq!(key, again);
    }

    fn kex(config: &Config) -> KeyExchange {
        KeyExchange::new(
            Arc::new(DefaultProvider::default()),
            Arc::new(AcceptAny),
            config,
            "SSH-2.0-server".into(),
        )
    }

    #[test]
    fn initiate_is_idempotent_while_running() {
        let mut kex = kex(&Config::default());
        let first = kex.initiate().unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(kex.state(), KexState::NegotiatingAlgorithms);
        assert!(kex.blocks_outbound());
        assert!(kex.initiate().unwrap().is_empty());

        let sent = KexInit::parse(&first[0]).unwrap();
        assert_eq!(sent.kex.last().map(String::as_str), Some(STRICT_KEX_CLIENT));
    }

    #[test]
    fn guessed_init_is_reused_when_right() {
        let config = Config {
            kex_guess: true,
            ..Config::default()
        };
        let mut kex = kex(&config);
        let out = kex.initiate().unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[1][0], consts::SSH_MSG_KEX_ECDH_INIT);

        let provider = DefaultProvider::default();
        let server = client_kexinit(&provider);
        let out = kex.on_kexinit(&server.encode()).unwrap();
        assert!(out.is_empty(), "guess was right");
        assert_eq!(kex.state(), KexState::ExchangingKeys);
    }

    #[test]
    fn wrong_guess_restarts_with_negotiated_method() {
        let config = Config {
            kex_guess: true,
            ..Config::default()
        };
        let mut kex = kex(&config);
        kex.initiate().unwrap();

        let server = server_kexinit(&["aes128-ctr"], &["hmac-sha2-256"]);
        let out = kex.on_kexinit(&server.encode()).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0][0], consts::SSH_MSG_KEX_ECDH_INIT);
        assert_eq!(kex.method_name.as_deref(), Some("curve25519-sha256"));
        assert!(kex.is_strict());
    }

    #[test]
    fn server_initiated_exchange_answers_kexinit() {
        let mut kex = kex(&Config::default());
        let server = server_kexinit(&["aes128-ctr"], &["hmac-sha2-256"]);
        let out = kex.on_kexinit(&server.encode()).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0][0], consts::SSH_MSG_KEXINIT);
        assert_eq!(out[1][0], consts::SSH_MSG_KEX_ECDH_INIT);

        assert!(kex.on_kexinit(&server.encode()).is_err());
    }

    #[test]
    fn servers_wrong_guess_is_ignored() {
        let mut kex = kex(&Config::default());
        let mut server = server_kexinit(&["aes128-ctr"], &["hmac-sha2-256"]);
        server.first_kex_packet_follows = true;
        kex.on_kexinit(&server.encode()).unwrap();

        assert!(kex.on_reply(b"\x1fgarbage").unwrap().is_none());
        assert_eq!(kex.state(), KexState::ExchangingKeys);
    }

    #[test]
    fn kex_message_numbers() {
        assert!(is_kex_message(consts::SSH_MSG_KEXINIT));
        assert!(is_kex_message(consts::SSH_MSG_NEWKEYS));
        assert!(is_kex_message(31));
        assert!(!is_kex_message(consts::SSH_MSG_IGNORE));
        assert!(!is_kex_message(50));
    }
}
