use crate::crypto::CryptoError;
use std::{fmt, io, sync::Arc};

/// Errors reported by the SSH engine.
///
/// The type is cheap to clone so that a fatal error can be handed to every
/// caller that was blocked on the session when it went down.
#[derive(Debug, Clone, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The underlying byte stream failed.
    #[error("transport I/O error: {0}")]
    Io(Arc<io::Error>),

    /// A malformed, truncated or out-of-order packet.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// An inbound packet failed integrity verification.
    #[error("message authentication failed")]
    MacMismatch,

    /// Algorithm negotiation found no common entry in a category.
    #[error("no common {category} algorithm")]
    NoCommonAlgorithm { category: &'static str },

    /// The server host key was refused by the trust callback or its
    /// signature over the exchange hash did not verify.
    #[error("host key rejected: {0}")]
    HostKeyRejected(String),

    /// A single authentication method failed.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// Every candidate authentication method was tried without success.
    #[error("no authentication methods left (server allows: {allowed:?})")]
    AuthenticationExhausted { allowed: Vec<String> },

    /// The server refused to open a channel.
    #[error("channel open rejected ({reason}): {description}")]
    ChannelOpenRejected {
        reason: OpenFailureReason,
        description: String,
    },

    /// The server answered a channel or global request with failure.
    #[error("request rejected: {request}")]
    RequestRejected { request: String },

    /// The peer sent more data than the advertised window allowed.
    #[error("channel window exceeded by peer")]
    ChannelWindowViolation,

    /// The channel is closed, or was closed while the operation was pending.
    #[error("channel closed")]
    ChannelClosed,

    /// A blocking operation did not complete within its deadline.
    #[error("operation timed out")]
    Timeout,

    /// The session is gone.
    #[error("session disconnected: {0}")]
    Disconnected(DisconnectReason),

    /// A cryptographic capability failed.
    #[error("crypto error")]
    Crypto(#[from] CryptoError),
}

impl Error {
    pub(crate) fn io(err: io::Error) -> Self {
        Error::Io(Arc::new(err))
    }

    pub(crate) fn protocol(msg: impl Into<String>) -> Self {
        Error::Protocol(msg.into())
    }

    pub(crate) fn userauth(msg: impl Into<String>) -> Self {
        Error::Authentication(msg.into())
    }

    /// Returns `true` if this error terminates the whole session.
    ///
    /// Channel scoped errors, single authentication failures and timeouts of
    /// non-critical operations leave the session usable.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            Error::Authentication(..)
                | Error::ChannelOpenRejected { .. }
                | Error::RequestRejected { .. }
                | Error::ChannelClosed
                | Error::Timeout
        )
    }

    /// The `SSH_MSG_DISCONNECT` reason code to send when this error tears the
    /// session down.
    pub(crate) fn disconnect_code(&self) -> u32 {
        match self {
            Error::MacMismatch => disconnect::MAC_ERROR,
            Error::NoCommonAlgorithm { .. } | Error::Crypto(..) => {
                disconnect::KEY_EXCHANGE_FAILED
            }
            Error::HostKeyRejected(..) => disconnect::HOST_KEY_NOT_VERIFIABLE,
            Error::AuthenticationExhausted { .. } => disconnect::NO_MORE_AUTH_METHODS_AVAILABLE,
            Error::Disconnected(reason) => reason.code,
            _ => disconnect::PROTOCOL_ERROR,
        }
    }
}

/// Reason codes of `SSH_MSG_DISCONNECT`.
///
/// defined in https://tools.ietf.org/html/rfc4253#section-11.1
pub mod disconnect {
    pub const HOST_NOT_ALLOWED_TO_CONNECT: u32 = 1;
    pub const PROTOCOL_ERROR: u32 = 2;
    pub const KEY_EXCHANGE_FAILED: u32 = 3;
    pub const RESERVED: u32 = 4;
    pub const MAC_ERROR: u32 = 5;
    pub const COMPRESSION_ERROR: u32 = 6;
    pub const SERVICE_NOT_AVAILABLE: u32 = 7;
    pub const PROTOCOL_VERSION_NOT_SUPPORTED: u32 = 8;
    pub const HOST_KEY_NOT_VERIFIABLE: u32 = 9;
    pub const CONNECTION_LOST: u32 = 10;
    pub const BY_APPLICATION: u32 = 11;
    pub const TOO_MANY_CONNECTIONS: u32 = 12;
    pub const AUTH_CANCELLED_BY_USER: u32 = 13;
    pub const NO_MORE_AUTH_METHODS_AVAILABLE: u32 = 14;
    pub const ILLEGAL_USER_NAME: u32 = 15;
}

/// Why a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisconnectReason {
    /// One of the codes in [`disconnect`].
    pub code: u32,
    /// Human readable description.
    pub description: String,
    /// `true` if the server sent `SSH_MSG_DISCONNECT`.
    pub by_peer: bool,
}

impl DisconnectReason {
    pub(crate) fn local(code: u32, description: impl Into<String>) -> Self {
        Self {
            code,
            description: description.into(),
            by_peer: false,
        }
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let side = if self.by_peer { "peer" } else { "local" };
        write!(f, "{} (code {}, by {})", self.description, self.code, side)
    }
}

/// Reason codes of `SSH_MSG_CHANNEL_OPEN_FAILURE`.
///
/// defined in https://tools.ietf.org/html/rfc4254#section-5.1
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenFailureReason {
    AdministrativelyProhibited,
    ConnectFailed,
    UnknownChannelType,
    ResourceShortage,
    Other(u32),
}

impl OpenFailureReason {
    pub(crate) const ADMINISTRATIVELY_PROHIBITED: u32 = 1;

    pub(crate) fn from_code(code: u32) -> Self {
        match code {
            1 => Self::AdministrativelyProhibited,
            2 => Self::ConnectFailed,
            3 => Self::UnknownChannelType,
            4 => Self::ResourceShortage,
            code => Self::Other(code),
        }
    }
}

impl fmt::Display for OpenFailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AdministrativelyProhibited => f.write_str("administratively prohibited"),
            Self::ConnectFailed => f.write_str("connect failed"),
            Self::UnknownChannelType => f.write_str("unknown channel type"),
            Self::ResourceShortage => f.write_str("resource shortage"),
            Self::Other(code) => write!(f, "code {}", code),
        }
    }
}
