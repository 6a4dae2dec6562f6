//! Sends framed requests to a `framing_server` and pulls the acknowledgments
//! with `Session::read()` instead of a handler callback.
//!
//! ```text
//! cargo run --example pull_client -- 127.0.0.1:9000 100
//! ```

use anyhow::{bail, Context};
use mill_nio::prelude::*;
use std::{net::SocketAddr, time::Duration};

fn frame(payload: &[u8]) -> Vec<u8> {
    let mut frame = (payload.len() as u32).to_be_bytes().to_vec();
    frame.extend_from_slice(payload);
    frame
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let mut args = std::env::args().skip(1);
    let addr: SocketAddr = args
        .next()
        .unwrap_or_else(|| "127.0.0.1:9000".to_string())
        .parse()
        .context("invalid server address")?;
    let requests: usize = args
        .next()
        .map(|n| n.parse())
        .transpose()
        .context("invalid request count")?
        .unwrap_or(10);

    let connector = TcpConnector::new(IoHandlerAdapter)?
        .session_config(SessionConfig::builder().use_read_operation(true).build());
    let session = connector
        .connect(addr)
        .wait()
        .with_context(|| format!("connect to {addr}"))?;
    log::info!("connected as session {}", session.id());

    for n in 0..requests {
        let payload = format!("request #{n}");
        session.write(frame(payload.as_bytes())).wait()?;

        let ack = session.read();
        if !ack.wait_timeout(Duration::from_secs(5)) {
            bail!("no acknowledgment for request #{n}");
        }
        let ack = ack.wait()?;
        if ack[..] != [0] {
            bail!("unexpected acknowledgment {:?}", &ack[..]);
        }
    }

    log::info!(
        "{} requests acknowledged ({} bytes out, {} bytes in)",
        requests,
        session.written_bytes(),
        session.read_bytes()
    );
    session.close().wait()?;
    connector.dispose()?;
    Ok(())
}
