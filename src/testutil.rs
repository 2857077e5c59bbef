//! An in-process SSH server speaking just enough of the protocol to drive a
//! [`Session`](crate::Session) through its tests.

use crate::{
    consts,
    crypto::AlgorithmProvider,
    provider::DefaultProvider,
    transport::{
        codec::{OpeningKeys, RecvPacket, SealingKeys, SendPacket},
        kex::{derive_key, exchange_hash, ExchangeHashInput, KexInit, NegotiatedAlgorithms},
    },
    util::{get_bool, get_ssh_string, get_u32, get_u8, put_bool, put_name_list, put_ssh_string},
};
use bytes::{BufMut as _, Bytes, BytesMut};
use ring::signature::{self, Ed25519KeyPair, KeyPair as _};
use tokio::io::{AsyncReadExt as _, AsyncWriteExt as _, DuplexStream};

const SERVER_ID: &str = "SSH-2.0-MockServer_1.0";
const CHANNEL_OFFSET: u32 = 1000;

pub(crate) fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::TRACE)
        .with_test_writer()
        .try_init();
}

pub(crate) struct ServerOptions {
    pub(crate) cipher: String,
    pub(crate) mac: String,
    pub(crate) strict: bool,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            cipher: "chacha20-poly1305@openssh.com".into(),
            mac: "hmac-sha2-256".into(),
            strict: true,
        }
    }
}

pub(crate) struct MockServer {
    stream: DuplexStream,
    buf: BytesMut,
    send: SendPacket,
    recv: RecvPacket,
    provider: DefaultProvider,
    host_key: Ed25519KeyPair,
    options: ServerOptions,
    client_id: String,
    session_id: Option<Vec<u8>>,
    strict: bool,
    kex_count: u64,
    tamper: bool,
}

impl MockServer {
    /// Exchanges identification strings and runs the initial key exchange.
    pub(crate) async fn accept(stream: DuplexStream, options: ServerOptions) -> Self {
        let mut server = Self {
            stream,
            buf: BytesMut::new(),
            send: SendPacket::new(0),
            recv: RecvPacket::new(256 * 1024),
            provider: DefaultProvider::default(),
            host_key: Ed25519KeyPair::from_seed_unchecked(&[1u8; 32]).unwrap(),
            options,
            client_id: String::new(),
            session_id: None,
            strict: false,
            kex_count: 0,
            tamper: false,
        };

        let mut line = SERVER_ID.as_bytes().to_vec();
        line.extend_from_slice(b"\r\n");
        server.stream.write_all(&line).await.unwrap();
        let client_id = loop {
            if let Some(pos) = server.buf.iter().position(|&b| b == b'\n') {
                let line = server.buf.split_to(pos + 1);
                break String::from_utf8(line.to_vec()).unwrap();
            }
            let n = server.stream.read_buf(&mut server.buf).await.unwrap();
            assert!(n > 0, "client closed during identification");
        };
        server.client_id = client_id.trim_end().to_owned();

        server.kex().await;
        server
    }

    pub(crate) fn server_id(&self) -> &str {
        SERVER_ID
    }

    pub(crate) fn session_id(&self) -> Option<&[u8]> {
        self.session_id.as_deref()
    }

    pub(crate) fn kex_count(&self) -> u64 {
        self.kex_count
    }

    /// Corrupts the next packet after it has been sealed.
    pub(crate) fn tamper_next(&mut self) {
        self.tamper = true;
    }

    /// Sends a payload, returning the sequence number it was sent with.
    pub(crate) async fn send(&mut self, payload: &[u8]) -> u32 {
        let seqn = self.send.seqn();
        let mut buf = vec![];
        self.send.fill_buf(payload, &self.provider, &mut buf).unwrap();
        if std::mem::take(&mut self.tamper) {
            buf[6] ^= 0x01;
        }
        self.stream.write_all(&buf).await.unwrap();
        seqn
    }

    pub(crate) async fn recv(&mut self) -> Bytes {
        self.recv
            .recv(&mut self.stream, &mut self.buf)
            .await
            .unwrap()
            .payload
    }

    /// Receives the next payload, running any key exchange the client starts.
    pub(crate) async fn recv_or_kex(&mut self) -> Bytes {
        loop {
            let payload = self.recv().await;
            if payload[0] == consts::SSH_MSG_KEXINIT {
                self.kex_with(Some(payload)).await;
                continue;
            }
            return payload;
        }
    }

    fn host_key_blob(&self) -> Vec<u8> {
        let mut blob = vec![];
        put_ssh_string(&mut blob, b"ssh-ed25519");
        put_ssh_string(&mut blob, self.host_key.public_key().as_ref());
        blob
    }

    /// Runs a key exchange started by this side.
    pub(crate) async fn kex(&mut self) {
        self.kex_with(None).await
    }

    fn kexinit(&self) -> KexInit {
        let names = |name: &str| vec![name.to_owned()];
        let mut kex = names("curve25519-sha256");
        if self.kex_count == 0 && self.options.strict {
            kex.push("kex-strict-s-v00@openssh.com".into());
        }
        KexInit {
            cookie: [0x5a; 16],
            kex,
            host_key: names("ssh-ed25519"),
            cipher_c2s: names(&self.options.cipher),
            cipher_s2c: names(&self.options.cipher),
            mac_c2s: names(&self.options.mac),
            mac_s2c: names(&self.options.mac),
            compression_c2s: names("none"),
            compression_s2c: names("none"),
            first_kex_packet_follows: false,
        }
    }

    /// Starts a key exchange and never answers the client's part of it.
    pub(crate) async fn stall_kex(&mut self) {
        let kexinit = self.kexinit().encode();
        self.send(&kexinit).await;
    }

    async fn kex_with(&mut self, client_kexinit: Option<Bytes>) {
        let server = self.kexinit();
        let server_kexinit = server.encode();
        self.send(&server_kexinit).await;

        let client_kexinit = match client_kexinit {
            Some(payload) => payload,
            None => self.recv().await,
        };
        let client = KexInit::parse(&client_kexinit).unwrap();
        let negotiated = match NegotiatedAlgorithms::negotiate(&self.provider, &client, &server) {
            Ok(negotiated) => negotiated,
            Err(..) => return,
        };
        if self.kex_count == 0 {
            self.strict = self.options.strict
                && client.kex.iter().any(|name| name == "kex-strict-c-v00@openssh.com");
        }

        let init = self.recv().await;
        let mut buf = &init[..];
        assert_eq!(get_u8(&mut buf).unwrap(), consts::SSH_MSG_KEX_ECDH_INIT);
        let client_public = get_ssh_string(&mut buf).unwrap();

        let method = self.provider.kex(&negotiated.kex).unwrap();
        let hash_name = method.hash_name();
        let encoding = method.public_value_encoding();
        let server_public = method.public_value().to_vec();
        let secret = method.agree(&client_public).unwrap();

        let host_key = self.host_key_blob();
        let hash = exchange_hash(
            &self.provider,
            hash_name,
            &ExchangeHashInput {
                client_id: self.client_id.as_bytes(),
                server_id: SERVER_ID.as_bytes(),
                client_kexinit: &client_kexinit,
                server_kexinit: &server_kexinit,
                host_key: &host_key,
                encoding,
                client_public: &client_public,
                server_public: &server_public,
            },
            &secret,
        )
        .unwrap();
        let session_id = self.session_id.get_or_insert_with(|| hash.clone()).clone();

        let mut signature = vec![];
        put_ssh_string(&mut signature, b"ssh-ed25519");
        put_ssh_string(&mut signature, self.host_key.sign(&hash).as_ref());

        let mut reply = vec![consts::SSH_MSG_KEX_ECDH_REPLY];
        put_ssh_string(&mut reply, &host_key);
        put_ssh_string(&mut reply, &server_public);
        put_ssh_string(&mut reply, &signature);
        self.send(&reply).await;
        self.send(&[consts::SSH_MSG_NEWKEYS]).await;

        let provider = &self.provider;
        let derive = |letter: u8, len: usize| {
            derive_key(provider, hash_name, &secret, &hash, letter, &session_id, len).unwrap()
        };
        let mac = |name: &Option<String>, letter: u8| {
            name.as_ref().map(|name| {
                let spec = provider.mac_spec(name).unwrap();
                provider.mac(name, &derive(letter, spec.key_len)).unwrap()
            })
        };

        let s2c = provider
            .cipher_spec(&negotiated.cipher_server_to_client)
            .unwrap();
        let sealing = SealingKeys {
            cipher: provider
                .sealing(
                    &negotiated.cipher_server_to_client,
                    &derive(b'D', s2c.key_len),
                    &derive(b'B', s2c.iv_len),
                )
                .unwrap(),
            mac: mac(&negotiated.mac_server_to_client, b'F'),
            compression: None,
        };
        let c2s = provider
            .cipher_spec(&negotiated.cipher_client_to_server)
            .unwrap();
        let opening = OpeningKeys {
            cipher: provider
                .opening(
                    &negotiated.cipher_client_to_server,
                    &derive(b'C', c2s.key_len),
                    &derive(b'A', c2s.iv_len),
                )
                .unwrap(),
            mac: mac(&negotiated.mac_client_to_server, b'E'),
            compression: None,
        };
        self.send.install(sealing, self.strict);

        let newkeys = self.recv().await;
        assert_eq!(newkeys[..], [consts::SSH_MSG_NEWKEYS]);
        self.recv.install(opening, self.strict);
        self.kex_count += 1;
    }

    // ==== authentication ====

    async fn accept_service(&mut self) {
        let request = self.recv().await;
        let mut buf = &request[..];
        assert_eq!(get_u8(&mut buf).unwrap(), consts::SSH_MSG_SERVICE_REQUEST);
        assert_eq!(get_ssh_string(&mut buf).unwrap(), b"ssh-userauth");

        let mut accept = vec![consts::SSH_MSG_SERVICE_ACCEPT];
        put_ssh_string(&mut accept, b"ssh-userauth");
        self.send(&accept).await;
    }

    /// Receives a `USERAUTH_REQUEST`, returning its method and the rest of the payload.
    async fn recv_userauth(&mut self) -> (String, Bytes, usize) {
        let request = self.recv().await;
        let mut buf = &request[..];
        assert_eq!(get_u8(&mut buf).unwrap(), consts::SSH_MSG_USERAUTH_REQUEST);
        assert_eq!(get_ssh_string(&mut buf).unwrap(), b"alice");
        assert_eq!(get_ssh_string(&mut buf).unwrap(), b"ssh-connection");
        let method = String::from_utf8(get_ssh_string(&mut buf).unwrap()).unwrap();
        let offset = request.len() - buf.len();
        (method, request, offset)
    }

    async fn send_failure(&mut self, allowed: &[&str], partial_success: bool) {
        let mut failure = vec![consts::SSH_MSG_USERAUTH_FAILURE];
        put_name_list(&mut failure, allowed);
        put_bool(&mut failure, partial_success);
        self.send(&failure).await;
    }

    /// Accepts `password` after the `none` probe.
    pub(crate) async fn accept_auth(&mut self, allowed: &[&str], password: &str) {
        self.accept_service().await;
        let (method, ..) = self.recv_userauth().await;
        assert_eq!(method, "none");
        self.send_failure(allowed, false).await;

        let (method, request, offset) = self.recv_userauth().await;
        assert_eq!(method, "password");
        let mut buf = &request[offset..];
        assert!(!get_bool(&mut buf).unwrap());
        assert_eq!(get_ssh_string(&mut buf).unwrap(), password.as_bytes());
        self.send(&[consts::SSH_MSG_USERAUTH_SUCCESS]).await;
    }

    /// Requires a valid public key signature followed by a password.
    pub(crate) async fn chain_auth(&mut self) {
        self.accept_service().await;
        let mut banner = vec![consts::SSH_MSG_USERAUTH_BANNER];
        put_ssh_string(&mut banner, b"welcome\n");
        put_ssh_string(&mut banner, b"");
        self.send(&banner).await;

        let (method, ..) = self.recv_userauth().await;
        assert_eq!(method, "none");
        self.send_failure(&["publickey", "password"], false).await;

        let (method, request, offset) = self.recv_userauth().await;
        assert_eq!(method, "publickey");
        let mut buf = &request[offset..];
        assert!(get_bool(&mut buf).unwrap());
        assert_eq!(get_ssh_string(&mut buf).unwrap(), b"ssh-ed25519");
        let key_blob = get_ssh_string(&mut buf).unwrap();
        let signed_len = request.len() - buf.len();
        let signature_blob = get_ssh_string(&mut buf).unwrap();

        let mut data = vec![];
        put_ssh_string(&mut data, self.session_id.as_ref().unwrap());
        data.extend_from_slice(&request[..signed_len]);
        let mut key = &key_blob[..];
        let _ = get_ssh_string(&mut key).unwrap();
        let public_key = get_ssh_string(&mut key).unwrap();
        let mut sig = &signature_blob[..];
        let _ = get_ssh_string(&mut sig).unwrap();
        let sig = get_ssh_string(&mut sig).unwrap();
        signature::UnparsedPublicKey::new(&signature::ED25519, &public_key)
            .verify(&data, &sig)
            .unwrap();
        self.send_failure(&["password"], true).await;

        let (method, ..) = self.recv_userauth().await;
        assert_eq!(method, "password");
        self.send(&[consts::SSH_MSG_USERAUTH_SUCCESS]).await;
    }

    /// Only advertises `allowed` after the `none` probe.
    pub(crate) async fn reject_auth(&mut self, allowed: &[&str]) {
        self.accept_service().await;
        let (method, ..) = self.recv_userauth().await;
        assert_eq!(method, "none");
        self.send_failure(allowed, false).await;
    }

    // ==== channels ====

    /// Confirms the next `CHANNEL_OPEN`, returning the client's and our channel numbers.
    pub(crate) async fn accept_channel(&mut self, window: u32, max_packet: u32) -> (u32, u32) {
        let open = self.recv_or_kex().await;
        let mut buf = &open[..];
        assert_eq!(get_u8(&mut buf).unwrap(), consts::SSH_MSG_CHANNEL_OPEN);
        let _channel_type = get_ssh_string(&mut buf).unwrap();
        let client_id = get_u32(&mut buf).unwrap();

        let server_id = client_id + CHANNEL_OFFSET;
        let mut confirmation = vec![consts::SSH_MSG_CHANNEL_OPEN_CONFIRMATION];
        confirmation.put_u32(client_id);
        confirmation.put_u32(server_id);
        confirmation.put_u32(window);
        confirmation.put_u32(max_packet);
        self.send(&confirmation).await;
        (client_id, server_id)
    }

    /// Receives a `CHANNEL_REQUEST` of `request_type` and answers it with success.
    pub(crate) async fn expect_request(&mut self, client_id: u32, request_type: &str, want_reply: bool) {
        let request = self.recv_or_kex().await;
        let mut buf = &request[..];
        assert_eq!(get_u8(&mut buf).unwrap(), consts::SSH_MSG_CHANNEL_REQUEST);
        assert_eq!(get_u32(&mut buf).unwrap(), client_id + CHANNEL_OFFSET);
        assert_eq!(get_ssh_string(&mut buf).unwrap(), request_type.as_bytes());
        assert_eq!(get_bool(&mut buf).unwrap(), want_reply);
        if want_reply {
            let mut success = vec![consts::SSH_MSG_CHANNEL_SUCCESS];
            success.put_u32(client_id);
            self.send(&success).await;
        }
    }

    /// Receives one `CHANNEL_DATA` packet, returning its data.
    pub(crate) async fn recv_data(&mut self, client_id: u32) -> Bytes {
        let payload = self.recv_or_kex().await;
        let mut buf = &payload[..];
        assert_eq!(get_u8(&mut buf).unwrap(), consts::SSH_MSG_CHANNEL_DATA);
        assert_eq!(get_u32(&mut buf).unwrap(), client_id + CHANNEL_OFFSET);
        Bytes::from(get_ssh_string(&mut buf).unwrap())
    }

    pub(crate) async fn channel_data(&mut self, client_id: u32, data: &[u8]) {
        let mut payload = vec![consts::SSH_MSG_CHANNEL_DATA];
        payload.put_u32(client_id);
        put_ssh_string(&mut payload, data);
        self.send(&payload).await;
    }

    pub(crate) async fn channel_stderr(&mut self, client_id: u32, data: &[u8]) {
        let mut payload = vec![consts::SSH_MSG_CHANNEL_EXTENDED_DATA];
        payload.put_u32(client_id);
        payload.put_u32(consts::SSH_EXTENDED_DATA_STDERR);
        put_ssh_string(&mut payload, data);
        self.send(&payload).await;
    }

    /// Sends EOF followed by `exit-status`.
    pub(crate) async fn channel_exit(&mut self, client_id: u32, status: u32) {
        let mut eof = vec![consts::SSH_MSG_CHANNEL_EOF];
        eof.put_u32(client_id);
        self.send(&eof).await;

        let mut request = vec![consts::SSH_MSG_CHANNEL_REQUEST];
        request.put_u32(client_id);
        put_ssh_string(&mut request, b"exit-status");
        put_bool(&mut request, false);
        request.put_u32(status);
        self.send(&request).await;
    }

    pub(crate) async fn channel_close(&mut self, client_id: u32) {
        let mut close = vec![consts::SSH_MSG_CHANNEL_CLOSE];
        close.put_u32(client_id);
        self.send(&close).await;
    }

    pub(crate) async fn window_adjust(&mut self, client_id: u32, additional: u32) {
        let mut adjust = vec![consts::SSH_MSG_CHANNEL_WINDOW_ADJUST];
        adjust.put_u32(client_id);
        adjust.put_u32(additional);
        self.send(&adjust).await;
    }

    pub(crate) async fn global_request(&mut self, name: &str, want_reply: bool) {
        let mut payload = vec![consts::SSH_MSG_GLOBAL_REQUEST];
        put_ssh_string(&mut payload, name.as_bytes());
        put_bool(&mut payload, want_reply);
        self.send(&payload).await;
    }

    pub(crate) async fn disconnect(&mut self, code: u32, description: &str) {
        let mut payload = vec![consts::SSH_MSG_DISCONNECT];
        payload.put_u32(code);
        put_ssh_string(&mut payload, description.as_bytes());
        put_ssh_string(&mut payload, b"");
        self.send(&payload).await;
    }
}
