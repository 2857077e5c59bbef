//! Manages authentication process described in RFC4252.

// Refs:
// * https://tools.ietf.org/html/rfc4252
// * https://tools.ietf.org/html/rfc4256

use crate::{
    consts,
    util::{
        get_bool, get_name_list, get_ssh_string, get_u32, get_u8, get_utf8, put_bool,
        put_ssh_string,
    },
};
use bytes::BufMut as _;
use futures::future::{BoxFuture, FutureExt as _};
use ring::signature::{Ed25519KeyPair, KeyPair as _};
use std::{collections::VecDeque, fmt, sync::Arc};

const SERVICE_USERAUTH: &[u8] = b"ssh-userauth";
const SERVICE_CONNECTION: &[u8] = b"ssh-connection";

// ==== capabilities ====

/// Produces signatures for public key authentication.
pub trait Signer: Send + Sync {
    /// The public key algorithm name, e.g. `ssh-ed25519` or `rsa-sha2-256`.
    fn algorithm(&self) -> &str;

    /// The SSH encoded public key blob.
    fn public_key(&self) -> &[u8];

    /// Signs `data`, returning an SSH encoded signature blob.
    fn sign<'a>(&'a self, data: &'a [u8]) -> BoxFuture<'a, Result<Vec<u8>, crate::Error>>;
}

/// A single prompt of a keyboard-interactive round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub text: String,
    pub echo: bool,
}

/// `SSH_MSG_USERAUTH_INFO_REQUEST`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InfoRequest {
    pub name: String,
    pub instruction: String,
    pub prompts: Vec<Prompt>,
}

/// Answers keyboard-interactive challenges.
pub trait Prompter: Send + Sync {
    /// Returns one response per prompt, in order.
    fn respond<'a>(
        &'a self,
        request: &'a InfoRequest,
    ) -> BoxFuture<'a, Result<Vec<String>, crate::Error>>;
}

/// A candidate authentication method.
#[derive(Clone)]
pub enum AuthMethod {
    Password(String),
    PublicKey(Arc<dyn Signer>),
    KeyboardInteractive(Arc<dyn Prompter>),
}

impl AuthMethod {
    pub fn name(&self) -> &'static str {
        match self {
            AuthMethod::Password(..) => "password",
            AuthMethod::PublicKey(..) => "publickey",
            AuthMethod::KeyboardInteractive(..) => "keyboard-interactive",
        }
    }
}

impl fmt::Debug for AuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthMethod::Password(..) => f.write_str("Password(..)"),
            AuthMethod::PublicKey(signer) => {
                f.debug_tuple("PublicKey").field(&signer.algorithm()).finish()
            }
            AuthMethod::KeyboardInteractive(..) => f.write_str("KeyboardInteractive(..)"),
        }
    }
}

/// The outcome of a successful authentication.
#[derive(Debug, Clone, Default)]
pub struct AuthSummary {
    /// Number of method requests sent, not counting the initial `none` probe.
    pub attempts: usize,
    /// Methods that succeeded, in order. Several when the server required a chain.
    pub succeeded: Vec<String>,
    /// `SSH_MSG_USERAUTH_BANNER` messages received along the way.
    pub banners: Vec<String>,
}

// ==== Authenticator ====

/// What the session has to do next for the authentication to proceed.
pub(crate) enum Step {
    Send(Vec<u8>),
    /// Sign `data` and append the signature to `request` before sending it.
    Sign {
        signer: Arc<dyn Signer>,
        data: Vec<u8>,
        request: Vec<u8>,
    },
    Prompt {
        prompter: Arc<dyn Prompter>,
        request: InfoRequest,
    },
    Wait,
    Success,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AuthState {
    Init,
    ServiceRequest,
    AuthRequests,
    Authenticated,
}

/// The client side of the authentication protocol, one method at a time.
///
/// This type does no I/O: the session feeds it the server's messages and
/// carries out the returned [`Step`]s.
pub(crate) struct Authenticator {
    username: String,
    session_id: Vec<u8>,
    state: AuthState,
    candidates: VecDeque<AuthMethod>,
    current: Option<AuthMethod>,
    allowed: Option<Vec<String>>,
    summary: AuthSummary,
}

impl Authenticator {
    pub(crate) fn new(username: &str, session_id: &[u8], methods: Vec<AuthMethod>) -> Self {
        Self {
            username: username.into(),
            session_id: session_id.into(),
            state: AuthState::Init,
            candidates: methods.into(),
            current: None,
            allowed: None,
            summary: AuthSummary::default(),
        }
    }

    pub(crate) fn summary(&self) -> &AuthSummary {
        &self.summary
    }

    /// Returns `SSH_MSG_SERVICE_REQUEST` for `ssh-userauth`.
    pub(crate) fn start(&mut self) -> Vec<u8> {
        debug_assert_eq!(self.state, AuthState::Init);
        let mut payload = vec![];
        payload.put_u8(consts::SSH_MSG_SERVICE_REQUEST);
        put_ssh_string(&mut payload, SERVICE_USERAUTH);
        self.state = AuthState::ServiceRequest;
        payload
    }

    fn request_header(&self, method: &str) -> Vec<u8> {
        let mut payload = vec![];
        payload.put_u8(consts::SSH_MSG_USERAUTH_REQUEST);
        put_ssh_string(&mut payload, self.username.as_bytes());
        put_ssh_string(&mut payload, SERVICE_CONNECTION);
        put_ssh_string(&mut payload, method.as_bytes());
        payload
    }

    pub(crate) fn on_message(&mut self, payload: &[u8]) -> Result<Step, crate::Error> {
        let span = tracing::trace_span!("Authenticator::on_message");
        let _enter = span.enter();

        let mut payload = payload;
        let typ = get_u8(&mut payload)?;

        match self.state {
            AuthState::ServiceRequest => {
                tracing::trace!("--> ServiceRequest");
                if typ != consts::SSH_MSG_SERVICE_ACCEPT {
                    return Err(crate::Error::protocol("expected SERVICE_ACCEPT"));
                }
                let service_name = get_ssh_string(&mut payload)?;
                if service_name != SERVICE_USERAUTH {
                    return Err(crate::Error::protocol("incorrect service name"));
                }

                // Probe the acceptable methods with "none".
                self.state = AuthState::AuthRequests;
                Ok(Step::Send(self.request_header("none")))
            }

            AuthState::AuthRequests => match typ {
                consts::SSH_MSG_USERAUTH_SUCCESS => {
                    tracing::trace!("--> USERAUTH_SUCCESS");
                    if let Some(method) = self.current.take() {
                        self.summary.succeeded.push(method.name().into());
                    }
                    self.state = AuthState::Authenticated;
                    Ok(Step::Success)
                }

                consts::SSH_MSG_USERAUTH_FAILURE => {
                    tracing::trace!("--> USERAUTH_FAILURE");
                    let allowed = get_name_list(&mut payload)?;
                    let partial_success = get_bool(&mut payload)?;

                    if let Some(method) = self.current.take() {
                        if partial_success {
                            tracing::debug!("{} succeeded, more methods required", method.name());
                            self.summary.succeeded.push(method.name().into());
                        } else {
                            tracing::debug!("{} failed", method.name());
                        }
                    }
                    self.allowed = Some(allowed);
                    self.next_request()
                }

                consts::SSH_MSG_USERAUTH_BANNER => {
                    tracing::trace!("--> USERAUTH_BANNER");
                    let message = get_utf8(&mut payload)?;
                    let _language = get_ssh_string(&mut payload)?;
                    self.summary.banners.push(message);
                    Ok(Step::Wait)
                }

                consts::SSH_MSG_USERAUTH_INFO_REQUEST => match self.current {
                    Some(AuthMethod::KeyboardInteractive(ref prompter)) => {
                        tracing::trace!("--> USERAUTH_INFO_REQUEST");
                        let request = parse_info_request(payload)?;
                        Ok(Step::Prompt {
                            prompter: prompter.clone(),
                            request,
                        })
                    }
                    Some(AuthMethod::Password(..)) => {
                        // SSH_MSG_USERAUTH_PASSWD_CHANGEREQ; changing passwords is not supported.
                        tracing::debug!("server requested a password change");
                        self.current = None;
                        self.next_request()
                    }
                    _ => Err(crate::Error::protocol("unexpected method specific message")),
                },

                consts::SSH_MSG_EXT_INFO => Ok(Step::Wait),

                typ => Err(crate::Error::protocol(format!(
                    "unexpected message during authentication: {}",
                    consts::message_name(typ)
                ))),
            },

            AuthState::Init | AuthState::Authenticated => Err(crate::Error::protocol(format!(
                "unexpected authentication message: {}",
                consts::message_name(typ)
            ))),
        }
    }

    /// Picks the first untried candidate that the server still accepts.
    fn next_request(&mut self) -> Result<Step, crate::Error> {
        let allowed = self.allowed.clone().unwrap_or_default();
        let position = self
            .candidates
            .iter()
            .position(|method| allowed.iter().any(|name| name == method.name()));
        let method = match position.and_then(|i| self.candidates.remove(i)) {
            Some(method) => method,
            None => return Err(crate::Error::AuthenticationExhausted { allowed }),
        };
        tracing::debug!("try {} authentication", method.name());
        self.summary.attempts += 1;

        let mut request = self.request_header(method.name());
        let step = match method {
            AuthMethod::Password(ref password) => {
                put_bool(&mut request, false);
                put_ssh_string(&mut request, password.as_bytes());
                Step::Send(request)
            }

            AuthMethod::PublicKey(ref signer) => {
                // ref: https://tools.ietf.org/html/rfc4252#section-7
                put_bool(&mut request, true);
                put_ssh_string(&mut request, signer.algorithm().as_bytes());
                put_ssh_string(&mut request, signer.public_key());

                let mut data = Vec::with_capacity(4 + self.session_id.len() + request.len());
                put_ssh_string(&mut data, &self.session_id);
                data.extend_from_slice(&request);

                Step::Sign {
                    signer: signer.clone(),
                    data,
                    request,
                }
            }

            AuthMethod::KeyboardInteractive(..) => {
                put_ssh_string(&mut request, b""); // language tag
                put_ssh_string(&mut request, b""); // submethods
                Step::Send(request)
            }
        };
        self.current = Some(method);

        Ok(step)
    }
}

/// Completes a public key request with its signature.
pub(crate) fn signed_request(mut request: Vec<u8>, signature: &[u8]) -> Vec<u8> {
    put_ssh_string(&mut request, signature);
    request
}

fn parse_info_request(mut payload: &[u8]) -> Result<InfoRequest, crate::Error> {
    let name = get_utf8(&mut payload)?;
    let instruction = get_utf8(&mut payload)?;
    let _language = get_ssh_string(&mut payload)?;
    let num_prompts = get_u32(&mut payload)?;
    if num_prompts as usize > payload.len() / 5 {
        return Err(crate::Error::protocol("too many prompts"));
    }
    let mut prompts = Vec::with_capacity(num_prompts as usize);
    for _ in 0..num_prompts {
        let text = get_utf8(&mut payload)?;
        let echo = get_bool(&mut payload)?;
        prompts.push(Prompt { text, echo });
    }
    Ok(InfoRequest {
        name,
        instruction,
        prompts,
    })
}

/// `SSH_MSG_USERAUTH_INFO_RESPONSE`.
pub(crate) fn info_response(
    request: &InfoRequest,
    responses: &[String],
) -> Result<Vec<u8>, crate::Error> {
    if responses.len() != request.prompts.len() {
        return Err(crate::Error::userauth(format!(
            "expected {} responses, got {}",
            request.prompts.len(),
            responses.len()
        )));
    }
    let mut payload = vec![];
    payload.put_u8(consts::SSH_MSG_USERAUTH_INFO_RESPONSE);
    payload.put_u32(responses.len() as u32);
    for response in responses {
        put_ssh_string(&mut payload, response.as_bytes());
    }
    Ok(payload)
}

// ==== Ed25519Signer ====

/// Signs with an Ed25519 key held in memory.
pub struct Ed25519Signer {
    key_pair: Ed25519KeyPair,
    public_key: Vec<u8>,
}

impl Ed25519Signer {
    pub fn from_seed(seed: &[u8]) -> Result<Self, crate::Error> {
        let key_pair = Ed25519KeyPair::from_seed_unchecked(seed)
            .map_err(|_| crate::Error::userauth("invalid Ed25519 seed"))?;
        Ok(Self::new(key_pair))
    }

    pub fn from_pkcs8(der: &[u8]) -> Result<Self, crate::Error> {
        let key_pair = Ed25519KeyPair::from_pkcs8_maybe_unchecked(der)
            .map_err(|_| crate::Error::userauth("invalid Ed25519 PKCS#8 document"))?;
        Ok(Self::new(key_pair))
    }

    fn new(key_pair: Ed25519KeyPair) -> Self {
        let mut public_key = vec![];
        put_ssh_string(&mut public_key, b"ssh-ed25519");
        put_ssh_string(&mut public_key, key_pair.public_key().as_ref());
        Self {
            key_pair,
            public_key,
        }
    }
}

impl fmt::Debug for Ed25519Signer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ed25519Signer").finish()
    }
}

impl Signer for Ed25519Signer {
    fn algorithm(&self) -> &str {
        "ssh-ed25519"
    }

    fn public_key(&self) -> &[u8] {
        &self.public_key
    }

    fn sign<'a>(&'a self, data: &'a [u8]) -> BoxFuture<'a, Result<Vec<u8>, crate::Error>> {
        let signature = self.key_pair.sign(data);
        let mut blob = vec![];
        put_ssh_string(&mut blob, b"ssh-ed25519");
        put_ssh_string(&mut blob, signature.as_ref());
        futures::future::ready(Ok(blob)).boxed()
    }
}
