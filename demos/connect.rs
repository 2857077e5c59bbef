//! Usage: connect <host:port> <user> <password> <command>
//!
//! Set `SSHMUX_FINGERPRINT=SHA256:...` to pin the server host key; without it
//! any host key is accepted.

use anyhow::{Context as _, Result};
use sshmux::{
    AcceptAny, AuthMethod, Config, DefaultProvider, HostKeyTrust, KnownFingerprints, Session,
};
use std::{io::Write as _, sync::Arc};
use tokio::net::TcpStream;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let mut args = std::env::args().skip(1);
    let addr = args.next().context("missing address")?;
    let user = args.next().context("missing user name")?;
    let password = args.next().context("missing password")?;
    let command = args.collect::<Vec<_>>().join(" ");

    let trust: Arc<dyn HostKeyTrust> = match std::env::var("SSHMUX_FINGERPRINT") {
        Ok(fingerprint) => Arc::new(KnownFingerprints::new(vec![fingerprint])),
        Err(..) => Arc::new(AcceptAny),
    };

    tracing::debug!("connect to SSH server (addr = {})", addr);
    let stream = TcpStream::connect(&addr).await?;
    let session = Session::connect(
        stream,
        Config::default(),
        Arc::new(DefaultProvider::default()),
        trust,
    )
    .await?;
    tracing::debug!("negotiated {:?}", session.algorithms());

    let summary = session
        .authenticate(&user, vec![AuthMethod::Password(password)])
        .await?;
    for banner in &summary.banners {
        eprint!("{}", banner);
    }

    let mut channel = session.open_session().await?;
    channel.exec(&command).await?;
    let mut output = vec![];
    channel.read_to_end(&mut output).await?;
    std::io::stdout().write_all(&output)?;
    std::io::stderr().write_all(&channel.take_stderr())?;
    channel.close().await?;

    let status = channel.exit_status();
    session.disconnect().await;
    tracing::debug!("exit status: {:?}", status);
    std::process::exit(status.map_or(1, |status| status as i32));
}
