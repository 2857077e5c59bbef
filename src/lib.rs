//! A client-side SSH2 engine: transport, key exchange, user authentication
//! and multiplexed channels over any async byte stream.

mod channel;
mod config;
mod connection;
mod consts;
mod error;
mod hostauth;
mod provider;
mod session;
mod transport;
mod userauth;
mod util;

pub mod agent;
pub mod crypto;

#[cfg(test)]
mod testutil;

pub use crate::{
    channel::Channel,
    config::{AlgorithmPreferences, Config},
    connection::{ChannelEvent, ExitSignal},
    error::{disconnect, DisconnectReason, Error, OpenFailureReason},
    hostauth::{fingerprint, AcceptAny, HostKeyTrust, KnownFingerprints, Trust},
    provider::DefaultProvider,
    session::{Session, SessionState},
    transport::kex::NegotiatedAlgorithms,
    userauth::{AuthMethod, AuthSummary, Ed25519Signer, InfoRequest, Prompt, Prompter, Signer},
};
