// defined in https://tools.ietf.org/html/rfc4253#section-12
pub(crate) const SSH_MSG_DISCONNECT: u8 = 1;
pub(crate) const SSH_MSG_IGNORE: u8 = 2;
pub(crate) const SSH_MSG_UNIMPLEMENTED: u8 = 3;
pub(crate) const SSH_MSG_DEBUG: u8 = 4;
pub(crate) const SSH_MSG_SERVICE_REQUEST: u8 = 5;
pub(crate) const SSH_MSG_SERVICE_ACCEPT: u8 = 6;
// defined in https://tools.ietf.org/html/rfc8308#section-2.3
pub(crate) const SSH_MSG_EXT_INFO: u8 = 7;
pub(crate) const SSH_MSG_KEXINIT: u8 = 20;
pub(crate) const SSH_MSG_NEWKEYS: u8 = 21;

// defined in https://tools.ietf.org/html/rfc5656#section-7.1
// (shares its numbers with SSH_MSG_KEXDH_INIT / SSH_MSG_KEXDH_REPLY of RFC 4253)
pub(crate) const SSH_MSG_KEX_ECDH_INIT: u8 = 30;
pub(crate) const SSH_MSG_KEX_ECDH_REPLY: u8 = 31;

// defined in https://tools.ietf.org/html/rfc4252#section-6
pub(crate) const SSH_MSG_USERAUTH_REQUEST: u8 = 50;
pub(crate) const SSH_MSG_USERAUTH_FAILURE: u8 = 51;
pub(crate) const SSH_MSG_USERAUTH_SUCCESS: u8 = 52;
pub(crate) const SSH_MSG_USERAUTH_BANNER: u8 = 53;
// method specific; shared with SSH_MSG_USERAUTH_PK_OK and SSH_MSG_USERAUTH_PASSWD_CHANGEREQ
pub(crate) const SSH_MSG_USERAUTH_INFO_REQUEST: u8 = 60;
pub(crate) const SSH_MSG_USERAUTH_INFO_RESPONSE: u8 = 61;

// defined in https://tools.ietf.org/html/rfc4254#section-9
pub(crate) const SSH_MSG_GLOBAL_REQUEST: u8 = 80;
pub(crate) const SSH_MSG_REQUEST_SUCCESS: u8 = 81;
pub(crate) const SSH_MSG_REQUEST_FAILURE: u8 = 82;
pub(crate) const SSH_MSG_CHANNEL_OPEN: u8 = 90;
pub(crate) const SSH_MSG_CHANNEL_OPEN_CONFIRMATION: u8 = 91;
pub(crate) const SSH_MSG_CHANNEL_OPEN_FAILURE: u8 = 92;
pub(crate) const SSH_MSG_CHANNEL_WINDOW_ADJUST: u8 = 93;
pub(crate) const SSH_MSG_CHANNEL_DATA: u8 = 94;
pub(crate) const SSH_MSG_CHANNEL_EXTENDED_DATA: u8 = 95;
pub(crate) const SSH_MSG_CHANNEL_EOF: u8 = 96;
pub(crate) const SSH_MSG_CHANNEL_CLOSE: u8 = 97;
pub(crate) const SSH_MSG_CHANNEL_REQUEST: u8 = 98;
pub(crate) const SSH_MSG_CHANNEL_SUCCESS: u8 = 99;
pub(crate) const SSH_MSG_CHANNEL_FAILURE: u8 = 100;

// defined in https://tools.ietf.org/html/rfc4254#section-5.2
pub(crate) const SSH_EXTENDED_DATA_STDERR: u32 = 1;

// defined in https://tools.ietf.org/html/draft-miller-ssh-agent-04#section-5.1
pub(crate) const SSH_AGENT_FAILURE: u8 = 5;
pub(crate) const SSH_AGENTC_REQUEST_IDENTITIES: u8 = 11;
pub(crate) const SSH_AGENT_IDENTITIES_ANSWER: u8 = 12;
pub(crate) const SSH_AGENTC_SIGN_REQUEST: u8 = 13;
pub(crate) const SSH_AGENT_SIGN_RESPONSE: u8 = 14;
pub(crate) const SSH_AGENT_RSA_SHA2_256: u32 = 0x02;
pub(crate) const SSH_AGENT_RSA_SHA2_512: u32 = 0x04;

/// Returns the symbolic name of a message number, for logging.
pub(crate) fn message_name(typ: u8) -> &'static str {
    match typ {
        SSH_MSG_DISCONNECT => "DISCONNECT",
        SSH_MSG_IGNORE => "IGNORE",
        SSH_MSG_UNIMPLEMENTED => "UNIMPLEMENTED",
        SSH_MSG_DEBUG => "DEBUG",
        SSH_MSG_SERVICE_REQUEST => "SERVICE_REQUEST",
        SSH_MSG_SERVICE_ACCEPT => "SERVICE_ACCEPT",
        SSH_MSG_EXT_INFO => "EXT_INFO",
        SSH_MSG_KEXINIT => "KEXINIT",
        SSH_MSG_NEWKEYS => "NEWKEYS",
        SSH_MSG_KEX_ECDH_INIT => "KEX_ECDH_INIT",
        SSH_MSG_KEX_ECDH_REPLY => "KEX_ECDH_REPLY",
        SSH_MSG_USERAUTH_REQUEST => "USERAUTH_REQUEST",
        SSH_MSG_USERAUTH_FAILURE => "USERAUTH_FAILURE",
        SSH_MSG_USERAUTH_SUCCESS => "USERAUTH_SUCCESS",
        SSH_MSG_USERAUTH_BANNER => "USERAUTH_BANNER",
        SSH_MSG_USERAUTH_INFO_REQUEST => "USERAUTH_INFO_REQUEST",
        SSH_MSG_USERAUTH_INFO_RESPONSE => "USERAUTH_INFO_RESPONSE",
        SSH_MSG_GLOBAL_REQUEST => "GLOBAL_REQUEST",
        SSH_MSG_REQUEST_SUCCESS => "REQUEST_SUCCESS",
        SSH_MSG_REQUEST_FAILURE => "REQUEST_FAILURE",
        SSH_MSG_CHANNEL_OPEN => "CHANNEL_OPEN",
        SSH_MSG_CHANNEL_OPEN_CONFIRMATION => "CHANNEL_OPEN_CONFIRMATION",
        SSH_MSG_CHANNEL_OPEN_FAILURE => "CHANNEL_OPEN_FAILURE",
        SSH_MSG_CHANNEL_WINDOW_ADJUST => "CHANNEL_WINDOW_ADJUST",
        SSH_MSG_CHANNEL_DATA => "CHANNEL_DATA",
        SSH_MSG_CHANNEL_EXTENDED_DATA => "CHANNEL_EXTENDED_DATA",
        SSH_MSG_CHANNEL_EOF => "CHANNEL_EOF",
        SSH_MSG_CHANNEL_CLOSE => "CHANNEL_CLOSE",
        SSH_MSG_CHANNEL_REQUEST => "CHANNEL_REQUEST",
        SSH_MSG_CHANNEL_SUCCESS => "CHANNEL_SUCCESS",
        SSH_MSG_CHANNEL_FAILURE => "CHANNEL_FAILURE",
        _ => "UNKNOWN",
    }
}
