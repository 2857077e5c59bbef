use crate::{
    connection::{ChannelEvent, ExitSignal},
    consts,
    session::Shared,
    util::put_ssh_string,
};
use bytes::{Buf as _, BufMut as _, Bytes, BytesMut};
use std::{sync::Arc, time::Duration};
use tokio::sync::{mpsc, Notify};

/// A handle to an open channel.
///
/// Dropping the handle without calling [`close`](Channel::close) sends
/// `SSH_MSG_CHANNEL_CLOSE` in the background.
pub struct Channel {
    shared: Arc<Shared>,
    id: u32,
    events: mpsc::UnboundedReceiver<ChannelEvent>,
    window: Arc<Notify>,
    pending: Bytes,
    stderr: BytesMut,
    exit_status: Option<u32>,
    exit_signal: Option<ExitSignal>,
    eof_received: bool,
    close_received: bool,
    closed: bool,
}

impl Channel {
    pub(crate) fn new(
        shared: Arc<Shared>,
        id: u32,
        events: mpsc::UnboundedReceiver<ChannelEvent>,
        window: Arc<Notify>,
    ) -> Self {
        Self {
            shared,
            id,
            events,
            window,
            pending: Bytes::new(),
            stderr: BytesMut::new(),
            exit_status: None,
            exit_signal: None,
            eof_received: false,
            close_received: false,
            closed: false,
        }
    }

    /// The local channel number.
    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn exit_status(&self) -> Option<u32> {
        self.exit_status
    }

    pub fn exit_signal(&self) -> Option<&ExitSignal> {
        self.exit_signal.as_ref()
    }

    /// Takes the stderr output buffered by [`read`](Channel::read).
    pub fn take_stderr(&mut self) -> Bytes {
        self.stderr.split().freeze()
    }

    /// Waits for the next event of the channel.
    ///
    /// Returns `None` once the channel is gone. Received data counts as
    /// consumed when it is returned here.
    pub async fn recv(&mut self) -> Option<ChannelEvent> {
        let event = self.events.recv().await?;
        match event {
            ChannelEvent::Data(ref data) | ChannelEvent::ExtendedData { ref data, .. } => {
                if let Err(err) = self.shared.consume(self.id, data.len()).await {
                    tracing::debug!("channel {}: cannot adjust window: {}", self.id, err);
                }
            }
            ChannelEvent::Eof => self.eof_received = true,
            ChannelEvent::ExitStatus(status) => self.exit_status = Some(status),
            ChannelEvent::ExitSignal(ref signal) => self.exit_signal = Some(signal.clone()),
            ChannelEvent::Close => {
                self.close_received = true;
                self.closed = true;
            }
        }
        Some(event)
    }

    /// Reads channel data into `buf`, returning 0 at EOF.
    ///
    /// Stderr output met on the way is kept for [`take_stderr`](Channel::take_stderr).
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize, crate::Error> {
        loop {
            if !self.pending.is_empty() {
                let n = std::cmp::min(buf.len(), self.pending.len());
                buf[..n].copy_from_slice(&self.pending[..n]);
                self.pending.advance(n);
                return Ok(n);
            }
            if self.eof_received || self.close_received {
                return Ok(0);
            }
            match self.recv().await {
                Some(ChannelEvent::Data(data)) => self.pending = data,
                Some(ChannelEvent::ExtendedData { code, data }) => {
                    if code == consts::SSH_EXTENDED_DATA_STDERR {
                        self.stderr.extend_from_slice(&data[..]);
                    }
                }
                Some(..) => {}
                None => return Err(self.shared.error_or(crate::Error::ChannelClosed)),
            }
        }
    }

    /// Reads until EOF, appending to `out`.
    pub async fn read_to_end(&mut self, out: &mut Vec<u8>) -> Result<usize, crate::Error> {
        let start = out.len();
        let mut buf = [0u8; 8192];
        loop {
            let n = self.read(&mut buf[..]).await?;
            if n == 0 {
                return Ok(out.len() - start);
            }
            out.extend_from_slice(&buf[..n]);
        }
    }

    /// Sends `data`, waiting for window space up to the session's request timeout.
    pub async fn write(&mut self, data: &[u8]) -> Result<(), crate::Error> {
        let timeout = self.shared.config.request_timeout;
        self.write_with_timeout(data, timeout).await
    }

    /// Sends `data`, failing with [`Timeout`](crate::Error::Timeout) if the
    /// window stays exhausted, or a key exchange keeps outbound traffic paused,
    /// longer than `timeout`.
    pub async fn write_with_timeout(
        &mut self,
        data: &[u8],
        timeout: Duration,
    ) -> Result<(), crate::Error> {
        self.write_data(None, data, timeout).await
    }

    /// Sends `data` as extended data of type `code`.
    pub async fn write_extended(&mut self, code: u32, data: &[u8]) -> Result<(), crate::Error> {
        let timeout = self.shared.config.request_timeout;
        self.write_data(Some(code), data, timeout).await
    }

    async fn write_data(
        &mut self,
        code: Option<u32>,
        data: &[u8],
        timeout: Duration,
    ) -> Result<(), crate::Error> {
        if self.closed {
            return Err(crate::Error::ChannelClosed);
        }
        let id = self.id;
        let mut rest = data;
        while !rest.is_empty() {
            let chunk = rest;
            let sent = self
                .shared
                .send_within(timeout, |inner| {
                    match inner.mux.reserve(id, code, chunk.len())? {
                        Some((mut payload, n)) => {
                            payload.extend_from_slice(&chunk[..n]);
                            Ok((Some(payload), n))
                        }
                        None => Ok((None, 0)),
                    }
                })
                .await?;

            if sent == 0 {
                if tokio::time::timeout(timeout, self.window.notified())
                    .await
                    .is_err()
                {
                    return Err(crate::Error::Timeout);
                }
                continue;
            }
            rest = &rest[sent..];
        }
        Ok(())
    }

    /// Sends a channel request; with `want_reply`, waits for the server's answer.
    pub async fn request(
        &mut self,
        request_type: &str,
        want_reply: bool,
        data: &[u8],
    ) -> Result<(), crate::Error> {
        if self.closed {
            return Err(crate::Error::ChannelClosed);
        }
        let id = self.id;
        let reply = self
            .shared
            .send_with(|inner| {
                let (payload, reply) = inner.mux.request(id, request_type, want_reply, data)?;
                Ok((Some(payload), reply))
            })
            .await?;

        let reply = match reply {
            Some(reply) => reply,
            None => return Ok(()),
        };
        match tokio::time::timeout(self.shared.config.request_timeout, reply).await {
            Ok(Ok(true)) => Ok(()),
            Ok(Ok(false)) => Err(crate::Error::RequestRejected {
                request: request_type.into(),
            }),
            Ok(Err(..)) => Err(self.shared.error_or(crate::Error::ChannelClosed)),
            Err(..) => Err(crate::Error::Timeout),
        }
    }

    pub async fn exec(&mut self, command: &str) -> Result<(), crate::Error> {
        let mut data = vec![];
        put_ssh_string(&mut data, command.as_bytes());
        self.request("exec", true, &data).await
    }

    pub async fn shell(&mut self) -> Result<(), crate::Error> {
        self.request("shell", true, &[]).await
    }

    pub async fn subsystem(&mut self, name: &str) -> Result<(), crate::Error> {
        let mut data = vec![];
        put_ssh_string(&mut data, name.as_bytes());
        self.request("subsystem", true, &data).await
    }

    /// Requests a pseudo terminal with no encoded terminal modes.
    pub async fn request_pty(
        &mut self,
        term: &str,
        columns: u32,
        rows: u32,
    ) -> Result<(), crate::Error> {
        let mut data = vec![];
        put_ssh_string(&mut data, term.as_bytes());
        data.put_u32(columns);
        data.put_u32(rows);
        data.put_u32(0); // width in pixels
        data.put_u32(0); // height in pixels
        put_ssh_string(&mut data, &[0]); // TTY_OP_END
        self.request("pty-req", true, &data).await
    }

    pub async fn set_env(&mut self, name: &str, value: &str) -> Result<(), crate::Error> {
        let mut data = vec![];
        put_ssh_string(&mut data, name.as_bytes());
        put_ssh_string(&mut data, value.as_bytes());
        self.request("env", true, &data).await
    }

    pub async fn window_change(&mut self, columns: u32, rows: u32) -> Result<(), crate::Error> {
        let mut data = vec![];
        data.put_u32(columns);
        data.put_u32(rows);
        data.put_u32(0);
        data.put_u32(0);
        self.request("window-change", false, &data).await
    }

    /// Delivers a signal, named without the `SIG` prefix, to the remote process.
    pub async fn signal(&mut self, name: &str) -> Result<(), crate::Error> {
        let mut data = vec![];
        put_ssh_string(&mut data, name.as_bytes());
        self.request("signal", false, &data).await
    }

    /// Sends `SSH_MSG_CHANNEL_EOF`. Data can still be received.
    pub async fn eof(&mut self) -> Result<(), crate::Error> {
        if self.closed {
            return Err(crate::Error::ChannelClosed);
        }
        let id = self.id;
        self.shared
            .send_with(|inner| Ok((inner.mux.eof(id)?, ())))
            .await
    }

    /// Closes the channel and waits for the server to close its side.
    ///
    /// Events arriving meanwhile are consumed; the exit status stays available.
    pub async fn close(&mut self) -> Result<(), crate::Error> {
        if !self.closed {
            self.closed = true;
            let id = self.id;
            self.shared
                .send_with(|inner| Ok((inner.mux.close(id), ())))
                .await?;
        }

        let timeout = self.shared.config.request_timeout;
        let drain = async {
            while !self.close_received {
                if self.recv().await.is_none() {
                    break;
                }
            }
        };
        tokio::time::timeout(timeout, drain)
            .await
            .map_err(|_| crate::Error::Timeout)
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        let shared = self.shared.clone();
        let id = self.id;
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                let closed = shared
                    .send_with(|inner| Ok((inner.mux.close(id), ())))
                    .await;
                if let Err(err) = closed {
                    tracing::debug!("channel {}: close on drop failed: {}", id, err);
                }
            });
        }
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("id", &self.id)
            .field("closed", &self.closed)
            .finish()
    }
}
