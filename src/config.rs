//! Session configuration.

use std::time::Duration;

/// Algorithm preference lists, most preferred first.
///
/// An empty list falls back to the order reported by the
/// [`AlgorithmProvider`](crate::crypto::AlgorithmProvider). Names the provider
/// does not implement are dropped.
#[derive(Debug, Clone, Default)]
pub struct AlgorithmPreferences {
    pub kex: Vec<String>,
    pub host_key: Vec<String>,
    pub cipher: Vec<String>,
    pub mac: Vec<String>,
    pub compression: Vec<String>,
}

/// Configuration of a client session.
#[derive(Debug, Clone)]
pub struct Config {
    /// The identification string sent to the server, without the trailing CR LF.
    pub client_id: String,

    pub algorithms: AlgorithmPreferences,

    /// Re-key after this many bytes were sent or received under one key set.
    pub rekey_bytes_limit: u64,

    /// Re-key after this many packets were sent or received under one key set.
    pub rekey_packets_limit: u64,

    /// The largest inbound `packet_length` accepted.
    pub max_packet_len: usize,

    /// Initial window size advertised for each channel.
    pub channel_window_size: u32,

    /// Maximum packet size advertised for each channel.
    pub channel_max_packet: u32,

    /// Deadline of a whole key exchange.
    pub kex_timeout: Duration,

    /// Deadline of a request awaiting a reply, and of a write blocked on an
    /// exhausted channel window.
    pub request_timeout: Duration,

    /// Send the key exchange init speculatively along with KEXINIT.
    pub kex_guess: bool,

    /// Advertise `kex-strict-c-v00@openssh.com`.
    pub strict_kex: bool,

    /// Upper bound of random extra padding blocks added to each packet.
    pub extra_padding_blocks: u8,
}

/// RFC 4253 section 6.1: implementations must handle packets of at least this size.
pub(crate) const MIN_MAX_PACKET_LEN: usize = 35000;

impl Default for Config {
    fn default() -> Self {
        Self {
            client_id: concat!("SSH-2.0-sshmux_", env!("CARGO_PKG_VERSION")).into(),
            algorithms: AlgorithmPreferences::default(),
            rekey_bytes_limit: 1 << 30,
            rekey_packets_limit: 1 << 31,
            max_packet_len: 256 * 1024,
            channel_window_size: 2 * 1024 * 1024,
            channel_max_packet: 32 * 1024,
            kex_timeout: Duration::from_secs(60),
            request_timeout: Duration::from_secs(30),
            kex_guess: false,
            strict_kex: true,
            extra_padding_blocks: 0,
        }
    }
}

impl Config {
    pub(crate) fn effective_max_packet_len(&self) -> usize {
        std::cmp::max(self.max_packet_len, MIN_MAX_PACKET_LEN)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_identification() {
        let config = Config::default();
        assert!(config.client_id.starts_with("SSH-2.0-sshmux_"));
        assert!(!config.client_id.contains(' '));
    }

    #[test]
    fn max_packet_len_never_below_rfc_minimum() {
        let config = Config {
            max_packet_len: 1024,
            ..Config::default()
        };
        assert_eq!(config.effective_max_packet_len(), MIN_MAX_PACKET_LEN);
    }
}
