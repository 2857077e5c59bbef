//! The client session: owns the byte stream and runs the inbound message loop.

use crate::{
    channel::Channel,
    config::Config,
    connection::{Multiplexer, Opening},
    consts,
    crypto::AlgorithmProvider,
    error::{disconnect, DisconnectReason},
    hostauth::HostKeyTrust,
    transport::{
        self,
        codec::{Packet, RecvPacket, SendPacket, Stats},
        kex::{is_kex_message, KexState, KeyExchange, NegotiatedAlgorithms},
    },
    userauth::{self, AuthMethod, AuthSummary, Authenticator, Step},
    util::{get_bool, get_u32, get_u8, get_utf8, put_bool, put_ssh_string},
};
use bytes::{BufMut as _, Bytes, BytesMut};
use std::{
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};
use tokio::{
    io::{AsyncRead, AsyncWrite, AsyncWriteExt as _},
    sync::{mpsc, watch, Notify},
    time::Instant,
};

/// Lifecycle of a [`Session`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    KeyExchanging,
    Authenticating,
    Ready,
    Disconnecting,
    Disconnected,
}

/// A client connection to an SSH server.
///
/// A spawned task is the only reader of the stream. Everything sent goes
/// through a single writer lock, so sequence numbers and cipher state advance
/// in wire order. Dropping the session disconnects it.
pub struct Session {
    shared: Arc<Shared>,
}

impl Session {
    /// Exchanges identification strings and runs the initial key exchange.
    pub async fn connect<T>(
        stream: T,
        config: Config,
        provider: Arc<dyn AlgorithmProvider>,
        trust: Arc<dyn HostKeyTrust>,
    ) -> Result<Self, crate::Error>
    where
        T: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let mut stream = stream;
        let identification =
            transport::exchange_identification(&mut stream, &config.client_id).await?;
        tracing::debug!("server identification: {}", identification.server_id);

        let (reader, writer) = tokio::io::split(stream);
        let kex = KeyExchange::new(
            provider.clone(),
            trust,
            &config,
            identification.server_id.clone(),
        );
        let recv = RecvPacket::new(config.effective_max_packet_len());

        let shared = Arc::new(Shared {
            writer: tokio::sync::Mutex::new(Writer {
                stream: Box::new(writer),
                send: SendPacket::new(config.extra_padding_blocks),
                kex,
                buf: vec![],
                deferred: vec![],
                closed: false,
            }),
            resumed: Notify::new(),
            inner: Mutex::new(Inner {
                mux: Multiplexer::new(config.channel_window_size, config.channel_max_packet),
                auth: None,
                authenticated: false,
                resume: SessionState::Authenticating,
                strict_handshake: false,
                session_id: None,
                algorithms: None,
                disconnect: None,
                error: None,
            }),
            state: watch::channel(SessionState::Connecting).0,
            kex_count: watch::channel(0).0,
            server_id: identification.server_id,
            banner: identification.banner,
            provider,
            config,
        });

        {
            let mut writer = shared.writer.lock().await;
            shared.start_kex(&mut writer).await?;
        }
        tokio::spawn(read_loop(
            shared.clone(),
            reader,
            recv,
            identification.remaining,
        ));
        tokio::spawn(kex_watchdog(shared.clone()));

        let session = Session { shared };
        session.shared.wait_for_kex(0).await?;
        Ok(session)
    }

    /// Authenticates as `username`, trying `methods` in order among those the
    /// server accepts.
    ///
    /// Running out of methods, or waiting longer than `request_timeout` for a
    /// reply, disconnects the session: a reply arriving late could not be told
    /// apart from one to a later attempt.
    pub async fn authenticate(
        &self,
        username: &str,
        methods: Vec<AuthMethod>,
    ) -> Result<AuthSummary, crate::Error> {
        let shared = &*self.shared;
        shared.check()?;

        let (tx, mut rx) = mpsc::unbounded_channel();
        {
            let mut inner = shared.lock_inner();
            if inner.authenticated {
                return Err(crate::Error::userauth("already authenticated"));
            }
            if inner.auth.is_some() {
                return Err(crate::Error::userauth("authentication is already running"));
            }
            inner.auth = Some(tx);
        }
        let session_id = shared.lock_inner().session_id.clone().unwrap_or_default();

        let mut authenticator = Authenticator::new(username, &session_id, methods);
        let result = shared.run_authentication(&mut authenticator, &mut rx).await;
        shared.lock_inner().auth = None;

        match result {
            Ok(()) => {
                tracing::debug!("authenticated as {}", username);
                Ok(authenticator.summary().clone())
            }
            Err(err) => {
                if err.is_fatal() || matches!(err, crate::Error::Timeout) {
                    shared.terminate(err.clone()).await;
                }
                Err(err)
            }
        }
    }

    /// Opens a `session` channel.
    pub async fn open_session(&self) -> Result<Channel, crate::Error> {
        self.open_channel("session", &[]).await
    }

    /// Opens a `direct-tcpip` channel to `host:port` on the server side.
    pub async fn open_direct_tcpip(
        &self,
        host: &str,
        port: u32,
        originator: &str,
        originator_port: u32,
    ) -> Result<Channel, crate::Error> {
        let mut extra = vec![];
        put_ssh_string(&mut extra, host.as_bytes());
        extra.put_u32(port);
        put_ssh_string(&mut extra, originator.as_bytes());
        extra.put_u32(originator_port);
        self.open_channel("direct-tcpip", &extra).await
    }

    /// Opens a channel of any type; `extra` is the type specific part of the request.
    pub async fn open_channel(
        &self,
        channel_type: &str,
        extra: &[u8],
    ) -> Result<Channel, crate::Error> {
        let shared = &self.shared;
        let opening = shared
            .send_with(|inner| {
                if !inner.authenticated {
                    return Err(crate::Error::userauth("session is not authenticated"));
                }
                let opening = inner.mux.open(channel_type, extra)?;
                let payload = opening.payload.clone();
                Ok((Some(payload), opening))
            })
            .await?;
        let Opening {
            local_id,
            confirmed,
            events,
            window,
            ..
        } = opening;

        match tokio::time::timeout(shared.config.request_timeout, confirmed).await {
            Ok(Ok(Ok(()))) => {
                tracing::debug!("channel {} is open", local_id);
                Ok(Channel::new(shared.clone(), local_id, events, window))
            }
            Ok(Ok(Err(err))) => Err(err),
            Ok(Err(..)) => Err(shared.error_or(crate::Error::ChannelClosed)),
            // the confirmation, if it ever shows up, is answered with CLOSE.
            Err(..) => Err(crate::Error::Timeout),
        }
    }

    /// Sends `SSH_MSG_GLOBAL_REQUEST`.
    ///
    /// With `want_reply`, waits for the reply and returns its request specific
    /// data.
    pub async fn global_request(
        &self,
        request_name: &str,
        want_reply: bool,
        data: &[u8],
    ) -> Result<Option<Bytes>, crate::Error> {
        let shared = &self.shared;
        let mut payload = vec![];
        payload.put_u8(consts::SSH_MSG_GLOBAL_REQUEST);
        put_ssh_string(&mut payload, request_name.as_bytes());
        put_bool(&mut payload, want_reply);
        payload.put_slice(data);

        let reply = shared
            .send_with(|inner| {
                if !inner.authenticated {
                    return Err(crate::Error::userauth("session is not authenticated"));
                }
                let reply = if want_reply {
                    Some(inner.mux.global_request()?)
                } else {
                    None
                };
                Ok((Some(payload), reply))
            })
            .await?;

        let reply = match reply {
            Some(reply) => reply,
            None => return Ok(None),
        };
        match tokio::time::timeout(shared.config.request_timeout, reply).await {
            Ok(Ok(Some(data))) => Ok(Some(data)),
            Ok(Ok(None)) => Err(crate::Error::RequestRejected {
                request: request_name.into(),
            }),
            Ok(Err(..)) => Err(shared.error_or(crate::Error::ChannelClosed)),
            Err(..) => Err(crate::Error::Timeout),
        }
    }

    /// Runs a key exchange now and waits for it to complete.
    pub async fn rekey(&self) -> Result<(), crate::Error> {
        let shared = &*self.shared;
        shared.check()?;
        let after = *shared.kex_count.borrow();
        {
            let mut writer = shared.writer.lock().await;
            let started = shared.start_kex(&mut writer).await;
            if let Err(err) = started {
                drop(writer);
                shared.terminate(err.clone()).await;
                return Err(err);
            }
        }
        shared.wait_for_kex(after).await
    }

    /// Sends `SSH_MSG_DISCONNECT` and closes the stream.
    pub async fn disconnect(&self) {
        self.shared
            .terminate(crate::Error::Disconnected(DisconnectReason::local(
                disconnect::BY_APPLICATION,
                "disconnected by application",
            )))
            .await;
    }

    /// Waits until the session is disconnected, returning why.
    pub async fn closed(&self) -> DisconnectReason {
        let mut state = self.shared.state.subscribe();
        loop {
            if *state.borrow() == SessionState::Disconnected {
                break;
            }
            if state.changed().await.is_err() {
                break;
            }
        }
        self.disconnect_reason()
            .unwrap_or_else(|| DisconnectReason::local(disconnect::CONNECTION_LOST, "closed"))
    }

    pub fn state(&self) -> SessionState {
        *self.shared.state.borrow()
    }

    /// The exchange hash of the first key exchange.
    pub fn session_id(&self) -> Option<Vec<u8>> {
        self.shared.lock_inner().session_id.clone()
    }

    pub fn server_id(&self) -> &str {
        &self.shared.server_id
    }

    /// Lines the server sent before its identification string.
    pub fn server_banner(&self) -> &[String] {
        &self.shared.banner
    }

    /// The algorithms of the keys currently in use.
    pub fn algorithms(&self) -> Option<NegotiatedAlgorithms> {
        self.shared.lock_inner().algorithms.clone()
    }

    pub fn disconnect_reason(&self) -> Option<DisconnectReason> {
        self.shared.lock_inner().disconnect.clone()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.state() == SessionState::Disconnected {
            return;
        }
        let shared = self.shared.clone();
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                shared
                    .terminate(crate::Error::Disconnected(DisconnectReason::local(
                        disconnect::BY_APPLICATION,
                        "session dropped",
                    )))
                    .await;
            });
        }
    }
}

// ==== Shared ====

/// The outbound half of the transport.
struct Writer {
    stream: Box<dyn AsyncWrite + Send + Unpin>,
    send: SendPacket,
    kex: KeyExchange,
    buf: Vec<u8>,
    // replies produced by the reader while outbound traffic was paused
    deferred: Vec<Vec<u8>>,
    closed: bool,
}

impl Writer {
    async fn write_packet(
        &mut self,
        provider: &dyn AlgorithmProvider,
        payload: &[u8],
    ) -> Result<(), crate::Error> {
        if self.closed {
            return Err(crate::Error::Disconnected(DisconnectReason::local(
                disconnect::CONNECTION_LOST,
                "transport is closed",
            )));
        }
        if let Some(&typ) = payload.first() {
            tracing::trace!("<-- {}", consts::message_name(typ));
        }
        self.buf.clear();
        self.send.fill_buf(payload, provider, &mut self.buf)?;
        self.stream
            .write_all(&self.buf[..])
            .await
            .map_err(crate::Error::io)?;
        self.stream.flush().await.map_err(crate::Error::io)?;
        Ok(())
    }
}

pub(crate) struct Inner {
    pub(crate) mux: Multiplexer,
    auth: Option<mpsc::UnboundedSender<Bytes>>,
    pub(crate) authenticated: bool,
    // where to go back to when a key exchange completes
    resume: SessionState,
    strict_handshake: bool,
    session_id: Option<Vec<u8>>,
    algorithms: Option<NegotiatedAlgorithms>,
    disconnect: Option<DisconnectReason>,
    error: Option<crate::Error>,
}

pub(crate) struct Shared {
    provider: Arc<dyn AlgorithmProvider>,
    pub(crate) config: Config,
    server_id: String,
    banner: Vec<String>,
    writer: tokio::sync::Mutex<Writer>,
    // wakes senders paused by a key exchange
    resumed: Notify,
    inner: Mutex<Inner>,
    state: watch::Sender<SessionState>,
    kex_count: watch::Sender<u64>,
}

impl Shared {
    fn lock_inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|err| err.into_inner())
    }

    /// Fails with the error that tore the session down, if any.
    fn check(&self) -> Result<(), crate::Error> {
        match self.lock_inner().error {
            Some(ref err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    pub(crate) fn error_or(&self, default: crate::Error) -> crate::Error {
        self.lock_inner().error.clone().unwrap_or(default)
    }

    fn over_limits(&self, stats: Stats) -> bool {
        stats.bytes >= self.config.rekey_bytes_limit
            || stats.packets >= self.config.rekey_packets_limit
    }

    /// Sends an application message, built by `prepare` once the message may go out.
    ///
    /// `prepare` runs while the writer lock is held, so whatever it registers
    /// (a reply slot, a window reservation) is ordered like the wire. Sending
    /// waits up to `request_timeout` while a key exchange has outbound traffic
    /// paused.
    pub(crate) async fn send_with<R, F>(&self, prepare: F) -> Result<R, crate::Error>
    where
        F: FnOnce(&mut Inner) -> Result<(Option<Vec<u8>>, R), crate::Error>,
    {
        self.send_within(self.config.request_timeout, prepare).await
    }

    /// Like [`send_with`](Shared::send_with), failing with `Timeout` if the
    /// message cannot go out within `timeout`.
    ///
    /// Only the waits are bounded; a packet is never cut off halfway.
    pub(crate) async fn send_within<R, F>(
        &self,
        timeout: Duration,
        prepare: F,
    ) -> Result<R, crate::Error>
    where
        F: FnOnce(&mut Inner) -> Result<(Option<Vec<u8>>, R), crate::Error>,
    {
        let deadline = Instant::now() + timeout;
        let mut writer = loop {
            self.check()?;
            let writer = tokio::time::timeout_at(deadline, self.writer.lock())
                .await
                .map_err(|_| crate::Error::Timeout)?;
            if !writer.kex.blocks_outbound() {
                self.check()?;
                break writer;
            }
            let resumed = self.resumed.notified();
            drop(writer);
            tracing::trace!("wait for the key exchange to complete");
            if tokio::time::timeout_at(deadline, resumed).await.is_err() {
                return Err(crate::Error::Timeout);
            }
        };

        let (payload, value) = prepare(&mut *self.lock_inner())?;
        if let Some(payload) = payload {
            let written = match writer.write_packet(&*self.provider, &payload).await {
                Ok(()) => self.rekey_if_needed(&mut writer).await,
                Err(err) => Err(err),
            };
            if let Err(err) = written {
                drop(writer);
                self.terminate(err.clone()).await;
                return Err(err);
            }
        }
        Ok(value)
    }

    async fn send(&self, payload: &[u8]) -> Result<(), crate::Error> {
        self.send_with(|_| Ok((Some(payload.to_vec()), ()))).await
    }

    /// Sends messages produced by the reader, deferring them while outbound
    /// traffic is paused so the reader never waits for itself.
    async fn reply(&self, payloads: Vec<Vec<u8>>) -> Result<(), crate::Error> {
        if payloads.is_empty() {
            return Ok(());
        }
        let mut writer = self.writer.lock().await;
        if writer.kex.blocks_outbound() {
            writer.deferred.extend(payloads);
            return Ok(());
        }
        for payload in payloads {
            writer.write_packet(&*self.provider, &payload).await?;
        }
        self.rekey_if_needed(&mut writer).await
    }

    /// Releases `len` bytes of a channel's inbound window.
    pub(crate) async fn consume(&self, local_id: u32, len: usize) -> Result<(), crate::Error> {
        self.send_with(|inner| Ok((inner.mux.consume(local_id, len), ())))
            .await
    }

    async fn rekey_if_needed(&self, writer: &mut Writer) -> Result<(), crate::Error> {
        if writer.kex.state() == KexState::Idle && self.over_limits(writer.send.stats()) {
            tracing::debug!("outbound re-key threshold reached");
            self.start_kex(writer).await?;
        }
        Ok(())
    }

    async fn start_kex(&self, writer: &mut Writer) -> Result<(), crate::Error> {
        let outgoing = writer.kex.initiate()?;
        if outgoing.is_empty() {
            return Ok(());
        }
        self.enter_kex();
        for payload in outgoing {
            writer.write_packet(&*self.provider, &payload).await?;
        }
        Ok(())
    }

    fn enter_kex(&self) {
        let mut inner = self.lock_inner();
        let current = *self.state.borrow();
        inner.resume = match current {
            SessionState::Connecting => SessionState::Authenticating,
            SessionState::Authenticating | SessionState::Ready => current,
            _ => return,
        };
        tracing::trace!("--> KeyExchanging");
        self.state.send_replace(SessionState::KeyExchanging);
    }

    fn finish_kex(&self, session_id: Option<Vec<u8>>, algorithms: Option<NegotiatedAlgorithms>) {
        {
            let mut inner = self.lock_inner();
            inner.strict_handshake = false;
            if inner.session_id.is_none() {
                inner.session_id = session_id;
            }
            inner.algorithms = algorithms;
            let current = *self.state.borrow();
            if current == SessionState::KeyExchanging {
                self.state.send_replace(inner.resume);
            }
        }
        self.kex_count.send_modify(|count| *count += 1);
        tracing::debug!("key exchange completed");
    }

    fn set_authenticated(&self, inner: &mut Inner) {
        inner.authenticated = true;
        let current = *self.state.borrow();
        match current {
            SessionState::KeyExchanging => inner.resume = SessionState::Ready,
            SessionState::Authenticating => {
                self.state.send_replace(SessionState::Ready);
            }
            _ => {}
        }
    }

    /// Waits until more than `after` key exchanges have completed.
    async fn wait_for_kex(&self, after: u64) -> Result<(), crate::Error> {
        let wait = async {
            let mut count = self.kex_count.subscribe();
            let mut state = self.state.subscribe();
            loop {
                if *count.borrow() > after {
                    return Ok(());
                }
                self.check()?;
                tokio::select! {
                    _ = count.changed() => {}
                    _ = state.changed() => {}
                }
            }
        };
        match tokio::time::timeout(self.config.kex_timeout, wait).await {
            Ok(result) => result,
            Err(..) => {
                tracing::debug!("key exchange timed out");
                self.terminate(crate::Error::Timeout).await;
                Err(crate::Error::Timeout)
            }
        }
    }

    async fn run_authentication(
        &self,
        authenticator: &mut Authenticator,
        rx: &mut mpsc::UnboundedReceiver<Bytes>,
    ) -> Result<(), crate::Error> {
        self.send(&authenticator.start()).await?;
        loop {
            let payload = match tokio::time::timeout(self.config.request_timeout, rx.recv()).await
            {
                Ok(Some(payload)) => payload,
                Ok(None) => return Err(self.error_or(crate::Error::ChannelClosed)),
                Err(..) => return Err(crate::Error::Timeout),
            };
            match authenticator.on_message(&payload)? {
                Step::Send(request) => self.send(&request).await?,
                Step::Sign {
                    signer,
                    data,
                    request,
                } => {
                    let signature = signer.sign(&data).await?;
                    self.send(&userauth::signed_request(request, &signature))
                        .await?;
                }
                Step::Prompt { prompter, request } => {
                    let responses = prompter.respond(&request).await?;
                    self.send(&userauth::info_response(&request, &responses)?)
                        .await?;
                }
                Step::Wait => {}
                Step::Success => return Ok(()),
            }
        }
    }

    /// Tears the session down; later calls are no-ops.
    ///
    /// Every pending and future operation fails with `err`.
    pub(crate) async fn terminate(&self, err: crate::Error) {
        let (reason, notify_peer) = match err {
            crate::Error::Disconnected(ref reason) => (reason.clone(), !reason.by_peer),
            ref err => (
                DisconnectReason::local(err.disconnect_code(), err.to_string()),
                true,
            ),
        };
        {
            let mut inner = self.lock_inner();
            if inner.error.is_some() {
                return;
            }
            inner.error = Some(err.clone());
            inner.disconnect = Some(reason.clone());
            inner.auth = None;
            inner.mux.shutdown();
        }
        match err {
            crate::Error::Disconnected(..) => tracing::debug!("disconnect: {}", reason),
            ref err => tracing::error!("session terminated: {}", err),
        }

        self.state.send_replace(SessionState::Disconnecting);
        self.resumed.notify_waiters();

        match tokio::time::timeout(self.config.request_timeout, self.writer.lock()).await {
            Ok(mut writer) => {
                if notify_peer {
                    let mut payload = vec![];
                    payload.put_u8(consts::SSH_MSG_DISCONNECT);
                    payload.put_u32(reason.code);
                    put_ssh_string(&mut payload, reason.description.as_bytes());
                    put_ssh_string(&mut payload, b"");
                    if let Err(err) = writer.write_packet(&*self.provider, &payload).await {
                        tracing::debug!("failed to send DISCONNECT: {}", err);
                    }
                }
                let _ = writer.stream.shutdown().await;
                writer.closed = true;
            }
            Err(..) => tracing::warn!("writer is stuck; close without DISCONNECT"),
        }

        self.state.send_replace(SessionState::Disconnected);
    }

    // ==== inbound ====

    async fn dispatch(&self, recv: &mut RecvPacket, packet: Packet) -> Result<(), crate::Error> {
        let typ = match packet.message_type() {
            Some(typ) => typ,
            None => return Err(crate::Error::protocol("empty payload")),
        };
        tracing::trace!("--> {}", consts::message_name(typ));

        let strict_handshake = self.lock_inner().strict_handshake;
        if strict_handshake && !is_kex_message(typ) {
            return Err(crate::Error::protocol(format!(
                "unexpected {} during strict key exchange",
                consts::message_name(typ)
            )));
        }

        let mut payload = &packet.payload[1..];
        match typ {
            consts::SSH_MSG_DISCONNECT => {
                let code = get_u32(&mut payload)?;
                let description = get_utf8(&mut payload)?;
                return Err(crate::Error::Disconnected(DisconnectReason {
                    code,
                    description,
                    by_peer: true,
                }));
            }

            consts::SSH_MSG_IGNORE => {}

            consts::SSH_MSG_DEBUG => {
                let _always_display = get_bool(&mut payload)?;
                let message = get_utf8(&mut payload)?;
                tracing::debug!("server debug message: {:?}", message);
            }

            consts::SSH_MSG_UNIMPLEMENTED => {
                let seqn = get_u32(&mut payload)?;
                tracing::warn!("server did not implement our packet #{}", seqn);
            }

            typ if is_kex_message(typ) => self.handle_kex(recv, typ, &packet.payload).await?,

            consts::SSH_MSG_EXT_INFO => tracing::debug!("ignore EXT_INFO"),

            consts::SSH_MSG_SERVICE_ACCEPT | 50..=79 => {
                let mut inner = self.lock_inner();
                let auth = match inner.auth {
                    Some(ref auth) => auth.clone(),
                    None => {
                        return Err(crate::Error::protocol(format!(
                            "unexpected {}",
                            consts::message_name(typ)
                        )))
                    }
                };
                // the server may follow SUCCESS with connection messages at once.
                if typ == consts::SSH_MSG_USERAUTH_SUCCESS {
                    self.set_authenticated(&mut inner);
                }
                if auth.send(packet.payload.clone()).is_err() {
                    return Err(crate::Error::protocol(format!(
                        "unexpected {}",
                        consts::message_name(typ)
                    )));
                }
            }

            80..=127 => {
                let outgoing = {
                    let mut inner = self.lock_inner();
                    if !inner.authenticated {
                        return Err(crate::Error::protocol(
                            "connection message before authentication",
                        ));
                    }
                    inner.mux.handle(&packet.payload)?
                };
                self.reply(outgoing).await?;
            }

            typ => {
                tracing::warn!("unimplemented message type {}", typ);
                let mut reply = vec![];
                reply.put_u8(consts::SSH_MSG_UNIMPLEMENTED);
                reply.put_u32(packet.seqn);
                self.reply(vec![reply]).await?;
            }
        }

        if self.over_limits(recv.stats()) {
            let mut writer = self.writer.lock().await;
            if writer.kex.state() == KexState::Idle {
                tracing::debug!("inbound re-key threshold reached");
                self.start_kex(&mut writer).await?;
            }
        }
        Ok(())
    }

    async fn handle_kex(
        &self,
        recv: &mut RecvPacket,
        typ: u8,
        payload: &[u8],
    ) -> Result<(), crate::Error> {
        let mut writer = self.writer.lock().await;
        match typ {
            consts::SSH_MSG_KEXINIT => {
                self.enter_kex();
                let outgoing = writer.kex.on_kexinit(payload)?;
                if writer.kex.is_initial() && writer.kex.is_strict() {
                    self.lock_inner().strict_handshake = true;
                }
                for payload in outgoing {
                    writer.write_packet(&*self.provider, &payload).await?;
                }
            }

            consts::SSH_MSG_NEWKEYS => {
                let (opening, reset_seqn) = writer.kex.on_newkeys()?;
                recv.install(opening, reset_seqn);
                tracing::debug!("inbound keys installed");
                let session_id = writer.kex.session_id().map(<[u8]>::to_vec);
                let algorithms = writer.kex.algorithms().cloned();
                drop(writer);
                self.finish_kex(session_id, algorithms);
            }

            _ => {
                if let Some(new_keys) = writer.kex.on_reply(payload)? {
                    writer
                        .write_packet(&*self.provider, &new_keys.payload)
                        .await?;
                    writer.send.install(new_keys.sealing, new_keys.reset_seqn);
                    tracing::debug!("outbound keys installed");

                    for payload in std::mem::take(&mut writer.deferred) {
                        writer.write_packet(&*self.provider, &payload).await?;
                    }
                    self.resumed.notify_waiters();
                }
            }
        }
        Ok(())
    }
}

async fn read_loop<R>(shared: Arc<Shared>, mut stream: R, mut recv: RecvPacket, mut buf: BytesMut)
where
    R: AsyncRead + Unpin,
{
    let mut state = shared.state.subscribe();
    let err = loop {
        let packet = tokio::select! {
            packet = recv.recv(&mut stream, &mut buf) => packet,
            _ = disconnected(&mut state) => return,
        };
        let packet = match packet {
            Ok(packet) => packet,
            Err(err) => break err,
        };
        if let Err(err) = shared.dispatch(&mut recv, packet).await {
            break err;
        }
    };
    shared.terminate(err).await;
}

/// Terminates the session when a key exchange, whoever started it, is not
/// completed within `kex_timeout`.
async fn kex_watchdog(shared: Arc<Shared>) {
    let mut state = shared.state.subscribe();
    loop {
        let current = *state.borrow_and_update();
        match current {
            SessionState::Disconnecting | SessionState::Disconnected => return,
            SessionState::KeyExchanging => {
                let finished = async {
                    loop {
                        let current = *state.borrow_and_update();
                        if current != SessionState::KeyExchanging {
                            return;
                        }
                        if state.changed().await.is_err() {
                            return;
                        }
                    }
                };
                if tokio::time::timeout(shared.config.kex_timeout, finished)
                    .await
                    .is_err()
                {
                    tracing::debug!("key exchange timed out");
                    shared.terminate(crate::Error::Timeout).await;
                    return;
                }
                continue;
            }
            _ => {}
        }
        if state.changed().await.is_err() {
            return;
        }
    }
}

async fn disconnected(state: &mut watch::Receiver<SessionState>) {
    loop {
        if *state.borrow() == SessionState::Disconnected {
            return;
        }
        if state.changed().await.is_err() {
            return;
        }
    }
}
