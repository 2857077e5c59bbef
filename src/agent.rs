//! A client of the SSH agent protocol, usable as a public key [`Signer`].

// ref: https://tools.ietf.org/html/draft-miller-ssh-agent-04

use crate::{
    consts,
    userauth::Signer,
    util::{get_ssh_string, get_u32, get_u8, put_ssh_string},
};
use bytes::BufMut as _;
use futures::future::{BoxFuture, FutureExt as _};
use std::{
    env, io,
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::{
    io::{AsyncRead, AsyncReadExt as _, AsyncWrite, AsyncWriteExt as _},
    net::UnixStream,
    sync::Mutex,
};

const SSH_AGENT_PATH_ENV_NAME: &str = "SSH_AUTH_SOCK";
const MAX_MESSAGE_LEN: usize = 256 * 1024;

pub type SignFlag = u32;

/// A key held by the agent.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub struct Identity {
    pub key_blob: Vec<u8>,
    pub comment: String,
}

impl Identity {
    /// The key type recorded in the blob, e.g. `ssh-ed25519`.
    pub fn key_type(&self) -> Result<String, crate::Error> {
        let mut blob = &self.key_blob[..];
        let key_type = get_ssh_string(&mut blob)?;
        Ok(String::from_utf8_lossy(&key_type).into_owned())
    }
}

pub struct Agent<T> {
    stream: T,
}

impl<T> Agent<T>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: T) -> Self {
        Self { stream }
    }

    async fn send_message(&mut self, message: &[u8]) -> Result<(), crate::Error> {
        let mut packet = Vec::with_capacity(4 + message.len());
        packet.put_u32(message.len() as u32);
        packet.put_slice(message);
        self.stream
            .write_all(&packet)
            .await
            .map_err(crate::Error::io)?;
        self.stream.flush().await.map_err(crate::Error::io)?;
        Ok(())
    }

    async fn recv_message(&mut self) -> Result<Vec<u8>, crate::Error> {
        let len = self.stream.read_u32().await.map_err(crate::Error::io)? as usize;
        if len == 0 || len > MAX_MESSAGE_LEN {
            return Err(crate::Error::protocol("invalid agent message length"));
        }
        let mut message = vec![0u8; len];
        self.stream
            .read_exact(&mut message[..])
            .await
            .map_err(crate::Error::io)?;
        Ok(message)
    }

    /// Lists the keys the agent holds.
    pub async fn request_identities(&mut self) -> Result<Vec<Identity>, crate::Error> {
        self.send_message(&[consts::SSH_AGENTC_REQUEST_IDENTITIES])
            .await?;

        let message = self.recv_message().await?;
        let mut buf = &message[..];
        match get_u8(&mut buf)? {
            consts::SSH_AGENT_IDENTITIES_ANSWER => {
                let nkeys = get_u32(&mut buf)?;
                let mut identities = vec![];
                for _ in 0..nkeys {
                    let key_blob = get_ssh_string(&mut buf)?;
                    let comment = get_ssh_string(&mut buf)?;
                    identities.push(Identity {
                        key_blob,
                        comment: String::from_utf8_lossy(&comment).into_owned(),
                    });
                }
                tracing::debug!("agent holds {} identities", identities.len());
                Ok(identities)
            }
            consts::SSH_AGENT_FAILURE => Err(crate::Error::userauth("agent refused to list keys")),
            typ => Err(crate::Error::protocol(format!(
                "unexpected agent message: {}",
                typ
            ))),
        }
    }

    /// Asks the agent to sign `data` with the identity.
    pub async fn sign(
        &mut self,
        identity: &Identity,
        data: &[u8],
        flags: SignFlag,
    ) -> Result<Vec<u8>, crate::Error> {
        let mut message = vec![];
        message.put_u8(consts::SSH_AGENTC_SIGN_REQUEST);
        put_ssh_string(&mut message, &identity.key_blob[..]);
        put_ssh_string(&mut message, data);
        message.put_u32(flags);
        self.send_message(&message).await?;

        let response = self.recv_message().await?;
        let mut buf = &response[..];
        match get_u8(&mut buf)? {
            consts::SSH_AGENT_SIGN_RESPONSE => get_ssh_string(&mut buf),
            consts::SSH_AGENT_FAILURE => Err(crate::Error::userauth("agent refused to sign")),
            typ => Err(crate::Error::protocol(format!(
                "unexpected agent message: {}",
                typ
            ))),
        }
    }
}

impl Agent<UnixStream> {
    /// Connects to the agent listening at `$SSH_AUTH_SOCK`.
    pub async fn connect() -> io::Result<Self> {
        let agent_path = env::var_os(SSH_AGENT_PATH_ENV_NAME)
            .map(PathBuf::from)
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::Other,
                    format!("missing environment variable: {}", SSH_AGENT_PATH_ENV_NAME),
                )
            })?;
        Self::connect_to(agent_path).await
    }

    pub async fn connect_to(agent_path: impl AsRef<Path>) -> io::Result<Self> {
        let stream = UnixStream::connect(agent_path).await?;
        Ok(Self::new(stream))
    }
}

// ==== AgentSigner ====

/// A [`Signer`] delegating to an agent identity.
///
/// RSA keys sign with `rsa-sha2-256`.
pub struct AgentSigner<T> {
    agent: Arc<Mutex<Agent<T>>>,
    identity: Identity,
    algorithm: String,
    flags: SignFlag,
}

impl<T> AgentSigner<T>
where
    T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    pub fn new(agent: Arc<Mutex<Agent<T>>>, identity: Identity) -> Result<Self, crate::Error> {
        let key_type = identity.key_type()?;
        let (algorithm, flags) = match &*key_type {
            "ssh-rsa" => ("rsa-sha2-256".to_owned(), consts::SSH_AGENT_RSA_SHA2_256),
            _ => (key_type, 0),
        };
        Ok(Self {
            agent,
            identity,
            algorithm,
            flags,
        })
    }

    /// Creates a signer for every identity of the agent.
    pub async fn all(agent: Arc<Mutex<Agent<T>>>) -> Result<Vec<Self>, crate::Error> {
        let identities = agent.lock().await.request_identities().await?;
        identities
            .into_iter()
            .map(|identity| Self::new(agent.clone(), identity))
            .collect()
    }

    /// Uses `rsa-sha2-512` instead of `rsa-sha2-256` for an RSA identity.
    pub fn prefer_sha512(mut self) -> Self {
        if self.flags == consts::SSH_AGENT_RSA_SHA2_256 {
            self.algorithm = "rsa-sha2-512".into();
            self.flags = consts::SSH_AGENT_RSA_SHA2_512;
        }
        self
    }
}

impl<T> Signer for AgentSigner<T>
where
    T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    fn algorithm(&self) -> &str {
        &self.algorithm
    }

    fn public_key(&self) -> &[u8] {
        &self.identity.key_blob
    }

    fn sign<'a>(&'a self, data: &'a [u8]) -> BoxFuture<'a, Result<Vec<u8>, crate::Error>> {
        async move {
            let mut agent = self.agent.lock().await;
            agent.sign(&self.identity, data, self.flags).await
        }
        .boxed()
    }
}
