//! The connection protocol: channel bookkeeping and flow control.

// Refs:
// * https://tools.ietf.org/html/rfc4254

use crate::{
    consts,
    error::OpenFailureReason,
    util::{get_bool, get_ssh_string, get_u32, get_u8, get_utf8, put_bool, put_ssh_string},
};
use bytes::{BufMut as _, Bytes};
use std::{
    collections::{HashMap, VecDeque},
    num::Wrapping,
    sync::Arc,
};
use tokio::sync::{mpsc, oneshot, Notify};

/// Something that happened on a channel, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ChannelEvent {
    Data(Bytes),
    /// `SSH_MSG_CHANNEL_EXTENDED_DATA`; code 1 is stderr.
    ExtendedData { code: u32, data: Bytes },
    Eof,
    ExitStatus(u32),
    ExitSignal(ExitSignal),
    Close,
}

/// The payload of an `exit-signal` request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitSignal {
    /// Signal name without the `SIG` prefix.
    pub signal_name: String,
    pub core_dumped: bool,
    pub message: String,
}

/// The receiving ends handed to a channel handle when it is opened.
pub(crate) struct Opening {
    pub(crate) local_id: u32,
    pub(crate) payload: Vec<u8>,
    pub(crate) confirmed: oneshot::Receiver<Result<(), crate::Error>>,
    pub(crate) events: mpsc::UnboundedReceiver<ChannelEvent>,
    pub(crate) window: Arc<Notify>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChannelState {
    Opening,
    Open,
    Closing,
}

struct ChannelSlot {
    remote_id: u32,
    state: ChannelState,
    opened: Option<oneshot::Sender<Result<(), crate::Error>>>,
    events: mpsc::UnboundedSender<ChannelEvent>,

    // inbound: what the peer may still send us
    local_window: u32,
    unadvertised: u32,
    eof_received: bool,

    // outbound: what we may still send the peer
    remote_window: u32,
    remote_max_packet: u32,
    window: Arc<Notify>,
    eof_sent: bool,

    requests: VecDeque<oneshot::Sender<bool>>,
}

impl ChannelSlot {
    fn deliver(&self, event: ChannelEvent) {
        // the handle may be gone already; the data is dropped then.
        let _ = self.events.send(event);
    }
}

/// Tracks every channel of a session and the replies it is waiting for.
///
/// This type does no I/O. Handlers return the payloads that have to be sent.
pub(crate) struct Multiplexer {
    initial_window: u32,
    max_packet: u32,
    channels: HashMap<u32, ChannelSlot>,
    next_channel_id: Wrapping<u32>,
    global_requests: VecDeque<oneshot::Sender<Option<Bytes>>>,
    closed: bool,
}

impl Multiplexer {
    pub(crate) fn new(initial_window: u32, max_packet: u32) -> Self {
        Self {
            initial_window,
            max_packet,
            channels: HashMap::new(),
            next_channel_id: Wrapping(0),
            global_requests: VecDeque::new(),
            closed: false,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.channels.len()
    }

    fn allocate_channel(&mut self) -> Result<u32, crate::Error> {
        for _ in 0..=self.channels.len() {
            let id = self.next_channel_id.0;
            self.next_channel_id += Wrapping(1);
            if !self.channels.contains_key(&id) {
                return Ok(id);
            }
        }
        Err(crate::Error::protocol("no channel number available"))
    }

    /// Registers a channel and builds its `SSH_MSG_CHANNEL_OPEN`.
    ///
    /// `extra` is the type specific part of the request.
    pub(crate) fn open(&mut self, channel_type: &str, extra: &[u8]) -> Result<Opening, crate::Error> {
        if self.closed {
            return Err(crate::Error::ChannelClosed);
        }
        let local_id = self.allocate_channel()?;

        let mut payload = Vec::with_capacity(17 + channel_type.len() + extra.len());
        payload.put_u8(consts::SSH_MSG_CHANNEL_OPEN);
        put_ssh_string(&mut payload, channel_type.as_bytes());
        payload.put_u32(local_id);
        payload.put_u32(self.initial_window);
        payload.put_u32(self.max_packet);
        payload.put_slice(extra);

        let (opened_tx, opened_rx) = oneshot::channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let window = Arc::new(Notify::new());
        self.channels.insert(
            local_id,
            ChannelSlot {
                remote_id: 0,
                state: ChannelState::Opening,
                opened: Some(opened_tx),
                events: events_tx,
                local_window: self.initial_window,
                unadvertised: 0,
                eof_received: false,
                remote_window: 0,
                remote_max_packet: 0,
                window: window.clone(),
                eof_sent: false,
                requests: VecDeque::new(),
            },
        );
        tracing::debug!("open {} channel {}", channel_type, local_id);

        Ok(Opening {
            local_id,
            payload,
            confirmed: opened_rx,
            events: events_rx,
            window,
        })
    }

    fn open_channel(&mut self, local_id: u32) -> Result<&mut ChannelSlot, crate::Error> {
        match self.channels.get_mut(&local_id) {
            Some(slot) if slot.state == ChannelState::Open => Ok(slot),
            _ => Err(crate::Error::ChannelClosed),
        }
    }

    /// Takes up to `len` bytes of the peer's window for outbound data.
    ///
    /// Returns the `SSH_MSG_CHANNEL_DATA` (or `EXTENDED_DATA`) header and the
    /// number of bytes it covers, or `None` when the window is exhausted.
    pub(crate) fn reserve(
        &mut self,
        local_id: u32,
        data_type: Option<u32>,
        len: usize,
    ) -> Result<Option<(Vec<u8>, usize)>, crate::Error> {
        let slot = self.open_channel(local_id)?;
        if slot.eof_sent {
            return Err(crate::Error::ChannelClosed);
        }

        let n = std::cmp::min(
            len,
            std::cmp::min(slot.remote_window, slot.remote_max_packet) as usize,
        );
        if n == 0 {
            tracing::trace!("channel {}: remote window exhausted", local_id);
            return Ok(None);
        }
        slot.remote_window -= n as u32;

        let mut header = Vec::with_capacity(13);
        match data_type {
            Some(code) => {
                header.put_u8(consts::SSH_MSG_CHANNEL_EXTENDED_DATA);
                header.put_u32(slot.remote_id);
                header.put_u32(code);
            }
            None => {
                header.put_u8(consts::SSH_MSG_CHANNEL_DATA);
                header.put_u32(slot.remote_id);
            }
        }
        header.put_u32(n as u32);
        Ok(Some((header, n)))
    }

    /// Records that the application consumed `len` bytes of inbound data.
    ///
    /// Returns a `SSH_MSG_CHANNEL_WINDOW_ADJUST` once half of the initial
    /// window has been consumed.
    pub(crate) fn consume(&mut self, local_id: u32, len: usize) -> Option<Vec<u8>> {
        let threshold = self.initial_window / 2;
        let slot = match self.channels.get_mut(&local_id) {
            Some(slot) if slot.state == ChannelState::Open && !slot.eof_received => slot,
            _ => return None,
        };

        slot.unadvertised = slot.unadvertised.saturating_add(len as u32);
        if slot.unadvertised < threshold.max(1) {
            return None;
        }

        let additional = match slot.local_window.checked_add(slot.unadvertised) {
            Some(..) => slot.unadvertised,
            None => u32::MAX - slot.local_window,
        };
        slot.unadvertised = 0;
        if additional == 0 {
            return None;
        }
        slot.local_window += additional;
        tracing::trace!("channel {}: adjust window by {}", local_id, additional);

        let mut payload = Vec::with_capacity(9);
        payload.put_u8(consts::SSH_MSG_CHANNEL_WINDOW_ADJUST);
        payload.put_u32(slot.remote_id);
        payload.put_u32(additional);
        Some(payload)
    }

    /// Builds a `SSH_MSG_CHANNEL_REQUEST`, queueing a reply slot when one is wanted.
    pub(crate) fn request(
        &mut self,
        local_id: u32,
        request_type: &str,
        want_reply: bool,
        data: &[u8],
    ) -> Result<(Vec<u8>, Option<oneshot::Receiver<bool>>), crate::Error> {
        let slot = self.open_channel(local_id)?;

        let mut payload = Vec::with_capacity(10 + request_type.len() + data.len());
        payload.put_u8(consts::SSH_MSG_CHANNEL_REQUEST);
        payload.put_u32(slot.remote_id);
        put_ssh_string(&mut payload, request_type.as_bytes());
        put_bool(&mut payload, want_reply);
        payload.put_slice(data);

        let reply = if want_reply {
            let (tx, rx) = oneshot::channel();
            slot.requests.push_back(tx);
            Some(rx)
        } else {
            None
        };
        Ok((payload, reply))
    }

    /// Builds a `SSH_MSG_CHANNEL_EOF`, or nothing if it was sent before.
    pub(crate) fn eof(&mut self, local_id: u32) -> Result<Option<Vec<u8>>, crate::Error> {
        let slot = self.open_channel(local_id)?;
        if slot.eof_sent {
            return Ok(None);
        }
        slot.eof_sent = true;
        let mut payload = Vec::with_capacity(5);
        payload.put_u8(consts::SSH_MSG_CHANNEL_EOF);
        payload.put_u32(slot.remote_id);
        Ok(Some(payload))
    }

    /// Builds a `SSH_MSG_CHANNEL_CLOSE`, or nothing if the channel is already closing.
    pub(crate) fn close(&mut self, local_id: u32) -> Option<Vec<u8>> {
        let slot = self.channels.get_mut(&local_id)?;
        match slot.state {
            ChannelState::Open => {
                tracing::debug!("close channel {}", local_id);
                slot.state = ChannelState::Closing;
                slot.window.notify_one();
                let mut payload = Vec::with_capacity(5);
                payload.put_u8(consts::SSH_MSG_CHANNEL_CLOSE);
                payload.put_u32(slot.remote_id);
                Some(payload)
            }
            // a confirmation that shows up later is answered with CLOSE.
            ChannelState::Opening => {
                slot.opened = None;
                None
            }
            ChannelState::Closing => None,
        }
    }

    /// Queues a reply slot for a global request with `want_reply` set.
    pub(crate) fn global_request(&mut self) -> Result<oneshot::Receiver<Option<Bytes>>, crate::Error> {
        if self.closed {
            return Err(crate::Error::ChannelClosed);
        }
        let (tx, rx) = oneshot::channel();
        self.global_requests.push_back(tx);
        Ok(rx)
    }

    /// Fails every pending operation; used when the session goes down.
    pub(crate) fn shutdown(&mut self) {
        if self.closed {
            return;
        }
        tracing::debug!("shut down {} channels", self.channels.len());
        self.closed = true;
        for (_, mut slot) in self.channels.drain() {
            if let Some(opened) = slot.opened.take() {
                let _ = opened.send(Err(crate::Error::ChannelClosed));
            }
            slot.window.notify_one();
            // dropping the reply senders fails the requests.
        }
        self.global_requests.clear();
    }

    /// Handles a connection protocol message from the server.
    pub(crate) fn handle(&mut self, payload: &Bytes) -> Result<Vec<Vec<u8>>, crate::Error> {
        let span = tracing::trace_span!("Multiplexer::handle");
        let _enter = span.enter();

        let mut payload = &payload[..];
        let typ = get_u8(&mut payload)?;
        let mut outgoing = vec![];

        match typ {
            consts::SSH_MSG_GLOBAL_REQUEST => {
                tracing::trace!("--> GLOBAL_REQUEST");
                let request_name = get_utf8(&mut payload)?;
                let want_reply = get_bool(&mut payload)?;
                tracing::debug!("refuse global request {:?}", request_name);
                if want_reply {
                    outgoing.push(vec![consts::SSH_MSG_REQUEST_FAILURE]);
                }
            }

            consts::SSH_MSG_REQUEST_SUCCESS | consts::SSH_MSG_REQUEST_FAILURE => {
                tracing::trace!("--> REQUEST_SUCCESS|REQUEST_FAILURE");
                let reply = match self.global_requests.pop_front() {
                    Some(reply) => reply,
                    None => return Err(crate::Error::protocol("unsolicited global request reply")),
                };
                let response = if typ == consts::SSH_MSG_REQUEST_SUCCESS {
                    Some(Bytes::copy_from_slice(payload))
                } else {
                    None
                };
                let _ = reply.send(response);
            }

            consts::SSH_MSG_CHANNEL_OPEN => {
                tracing::trace!("--> CHANNEL_OPEN");
                let channel_type = get_utf8(&mut payload)?;
                let sender_channel = get_u32(&mut payload)?;
                tracing::debug!("refuse {} channel opened by the server", channel_type);

                let mut reply = vec![];
                reply.put_u8(consts::SSH_MSG_CHANNEL_OPEN_FAILURE);
                reply.put_u32(sender_channel);
                reply.put_u32(OpenFailureReason::ADMINISTRATIVELY_PROHIBITED);
                put_ssh_string(&mut reply, b"channel open is not supported");
                put_ssh_string(&mut reply, b"");
                outgoing.push(reply);
            }

            consts::SSH_MSG_CHANNEL_OPEN_CONFIRMATION => {
                tracing::trace!("--> CHANNEL_OPEN_CONFIRMATION");
                let local_id = get_u32(&mut payload)?; // 'recipient channel' in RFC
                let remote_id = get_u32(&mut payload)?; // 'sender channel' in RFC
                let remote_window = get_u32(&mut payload)?;
                let remote_max_packet = get_u32(&mut payload)?;
                tracing::trace!("    remote_window = {}", remote_window);
                tracing::trace!("    remote_max_packet = {}", remote_max_packet);

                let slot = match self.channels.get_mut(&local_id) {
                    Some(slot) if slot.state == ChannelState::Opening => slot,
                    _ => return Err(crate::Error::protocol("unexpected open confirmation")),
                };
                slot.remote_id = remote_id;
                slot.remote_window = remote_window;
                slot.remote_max_packet = remote_max_packet;
                slot.state = ChannelState::Open;

                let delivered = match slot.opened.take() {
                    Some(opened) => opened.send(Ok(())).is_ok(),
                    None => false,
                };
                if !delivered {
                    tracing::debug!("channel {} was abandoned while opening", local_id);
                    outgoing.extend(self.close(local_id));
                }
            }

            consts::SSH_MSG_CHANNEL_OPEN_FAILURE => {
                tracing::trace!("--> CHANNEL_OPEN_FAILURE");
                let local_id = get_u32(&mut payload)?;
                let reason = OpenFailureReason::from_code(get_u32(&mut payload)?);
                let description = get_utf8(&mut payload)?;

                let mut slot = match self.channels.remove(&local_id) {
                    Some(slot) if slot.state == ChannelState::Opening => slot,
                    _ => return Err(crate::Error::protocol("unexpected open failure")),
                };
                tracing::debug!("channel {} rejected: {} {:?}", local_id, reason, description);
                if let Some(opened) = slot.opened.take() {
                    let _ = opened.send(Err(crate::Error::ChannelOpenRejected {
                        reason,
                        description,
                    }));
                }
            }

            consts::SSH_MSG_CHANNEL_WINDOW_ADJUST => {
                tracing::trace!("--> CHANNEL_WINDOW_ADJUST");
                let local_id = get_u32(&mut payload)?;
                let additional = get_u32(&mut payload)?;
                tracing::trace!("    additional = {}", additional);

                if let Some(slot) = self.channels.get_mut(&local_id) {
                    slot.remote_window = match slot.remote_window.checked_add(additional) {
                        Some(window) => window,
                        None => {
                            tracing::warn!("channel {}: window adjustment overflows", local_id);
                            u32::MAX
                        }
                    };
                    slot.window.notify_one();
                }
            }

            consts::SSH_MSG_CHANNEL_DATA | consts::SSH_MSG_CHANNEL_EXTENDED_DATA => {
                tracing::trace!("--> CHANNEL_DATA|CHANNEL_EXTENDED_DATA");
                let local_id = get_u32(&mut payload)?;
                let code = if typ == consts::SSH_MSG_CHANNEL_EXTENDED_DATA {
                    Some(get_u32(&mut payload)?)
                } else {
                    None
                };
                let data = Bytes::from(get_ssh_string(&mut payload)?);

                let slot = match self.channels.get_mut(&local_id) {
                    Some(slot) => slot,
                    None => return Err(crate::Error::protocol("data for an unknown channel")),
                };
                if data.len() > slot.local_window as usize {
                    return Err(crate::Error::ChannelWindowViolation);
                }
                slot.local_window -= data.len() as u32;

                if slot.eof_received || slot.state != ChannelState::Open {
                    tracing::warn!("channel {}: drop data received after EOF or CLOSE", local_id);
                } else {
                    slot.deliver(match code {
                        Some(code) => ChannelEvent::ExtendedData { code, data },
                        None => ChannelEvent::Data(data),
                    });
                }
            }

            consts::SSH_MSG_CHANNEL_EOF => {
                tracing::trace!("--> CHANNEL_EOF");
                let local_id = get_u32(&mut payload)?;
                if let Some(slot) = self.channels.get_mut(&local_id) {
                    if !slot.eof_received {
                        slot.eof_received = true;
                        slot.deliver(ChannelEvent::Eof);
                    }
                }
            }

            consts::SSH_MSG_CHANNEL_CLOSE => {
                tracing::trace!("--> CHANNEL_CLOSE");
                let local_id = get_u32(&mut payload)?;
                if let Some(mut slot) = self.channels.remove(&local_id) {
                    if slot.state == ChannelState::Open {
                        let mut reply = Vec::with_capacity(5);
                        reply.put_u8(consts::SSH_MSG_CHANNEL_CLOSE);
                        reply.put_u32(slot.remote_id);
                        outgoing.push(reply);
                    }
                    tracing::debug!("channel {} closed", local_id);
                    slot.requests.clear();
                    slot.opened.take();
                    slot.window.notify_one();
                    slot.deliver(ChannelEvent::Close);
                }
            }

            consts::SSH_MSG_CHANNEL_REQUEST => {
                tracing::trace!("--> CHANNEL_REQUEST");
                let local_id = get_u32(&mut payload)?;
                let request_type = get_utf8(&mut payload)?;
                let want_reply = get_bool(&mut payload)?;

                let slot = match self.channels.get_mut(&local_id) {
                    Some(slot) => slot,
                    None => return Err(crate::Error::protocol("request for an unknown channel")),
                };
                let event = match &*request_type {
                    "exit-status" => Some(ChannelEvent::ExitStatus(get_u32(&mut payload)?)),
                    "exit-signal" => {
                        let signal_name = get_utf8(&mut payload)?;
                        let core_dumped = get_bool(&mut payload)?;
                        let message = get_utf8(&mut payload)?;
                        Some(ChannelEvent::ExitSignal(ExitSignal {
                            signal_name,
                            core_dumped,
                            message,
                        }))
                    }
                    _ => None,
                };

                if want_reply {
                    let mut reply = Vec::with_capacity(5);
                    reply.put_u8(if event.is_some() {
                        consts::SSH_MSG_CHANNEL_SUCCESS
                    } else {
                        consts::SSH_MSG_CHANNEL_FAILURE
                    });
                    reply.put_u32(slot.remote_id);
                    outgoing.push(reply);
                }
                match event {
                    Some(event) => slot.deliver(event),
                    None => tracing::debug!("ignore channel request {:?}", request_type),
                }
            }

            consts::SSH_MSG_CHANNEL_SUCCESS | consts::SSH_MSG_CHANNEL_FAILURE => {
                tracing::trace!("--> CHANNEL_SUCCESS|CHANNEL_FAILURE");
                let local_id = get_u32(&mut payload)?;
                let reply = self
                    .channels
                    .get_mut(&local_id)
                    .and_then(|slot| slot.requests.pop_front());
                match reply {
                    Some(reply) => {
                        let _ = reply.send(typ == consts::SSH_MSG_CHANNEL_SUCCESS);
                    }
                    None => return Err(crate::Error::protocol("unsolicited channel request reply")),
                }
            }

            typ => {
                return Err(crate::Error::protocol(format!(
                    "unexpected connection message: {}",
                    consts::message_name(typ)
                )));
            }
        }

        Ok(outgoing)
    }
}
