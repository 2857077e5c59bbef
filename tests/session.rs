use sshmux::{AcceptAny, Config, DefaultProvider, Error, Session};
use std::sync::Arc;
use tokio::io::{duplex, AsyncReadExt as _, AsyncWriteExt as _};

#[test]
fn default_config() {
    let config = Config::default();
    assert!(config.client_id.starts_with("SSH-2.0-sshmux_"));
    assert!(config.strict_kex);
    assert!(!config.kex_guess);
    assert_eq!(config.channel_max_packet, 32 * 1024);
    assert!(config.max_packet_len >= 35000);
}

#[tokio::test]
async fn unsupported_protocol_version() -> anyhow::Result<()> {
    let (client, mut server) = duplex(4096);
    let server_task = tokio::spawn(async move {
        server.write_all(b"SSH-1.5-ancient\r\n").await?;
        let mut line = vec![];
        let _ = server.read_to_end(&mut line).await;
        anyhow::Ok(line)
    });

    let err = Session::connect(
        client,
        Config::default(),
        Arc::new(DefaultProvider::default()),
        Arc::new(AcceptAny),
    )
    .await
    .err()
    .expect("connect should fail");
    assert!(matches!(err, Error::Protocol(..)));
    assert!(err.is_fatal());

    let line = server_task.await??;
    assert!(line.starts_with(b"SSH-2.0-sshmux_"));
    Ok(())
}

#[tokio::test]
async fn peer_closing_during_identification() {
    let (client, server) = duplex(4096);
    drop(server);
    let err = Session::connect(
        client,
        Config::default(),
        Arc::new(DefaultProvider::default()),
        Arc::new(AcceptAny),
    )
    .await
    .err()
    .expect("connect should fail");
    assert!(matches!(err, Error::Io(..)));
}

#[test]
fn channel_scoped_errors_are_not_fatal() {
    assert!(!Error::ChannelClosed.is_fatal());
    assert!(!Error::Timeout.is_fatal());
    assert!(Error::MacMismatch.is_fatal());
    assert!(Error::ChannelWindowViolation.is_fatal());
}
