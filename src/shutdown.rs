//! Signal handling for the daemon.
//!
//! The first SIGINT, SIGTERM or SIGHUP cancels the returned token so the
//! processor can stop its transfer and the API can drain. A second signal
//! exits immediately.

use tokio_util::sync::CancellationToken;

#[cfg(unix)]
struct Signals {
    term: tokio::signal::unix::Signal,
    hup: tokio::signal::unix::Signal,
}

#[cfg(unix)]
impl Signals {
    fn register() -> std::io::Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};
        Ok(Self {
            term: signal(SignalKind::terminate())?,
            hup: signal(SignalKind::hangup())?,
        })
    }

    async fn next(&mut self) -> std::io::Result<&'static str> {
        tokio::select! {
            res = tokio::signal::ctrl_c() => res.map(|()| "SIGINT"),
            _ = self.term.recv() => Ok("SIGTERM"),
            _ = self.hup.recv() => Ok("SIGHUP"),
        }
    }
}

#[cfg(not(unix))]
struct Signals;

#[cfg(not(unix))]
impl Signals {
    fn register() -> std::io::Result<Self> {
        Ok(Self)
    }

    async fn next(&mut self) -> std::io::Result<&'static str> {
        tokio::signal::ctrl_c().await.map(|()| "Ctrl+C")
    }
}

pub(crate) fn install_signal_handler() -> anyhow::Result<CancellationToken> {
    let mut signals = Signals::register()?;
    let token = CancellationToken::new();

    let cancel = token.clone();
    tokio::spawn(async move {
        let mut draining = false;
        loop {
            let name = match signals.next().await {
                Ok(name) => name,
                Err(e) => {
                    tracing::error!(error = %e, "Signal listener failed");
                    return;
                }
            };
            if draining {
                tracing::warn!(signal = name, "Second signal, exiting now");
                std::process::exit(130);
            }
            draining = true;
            tracing::info!(
                signal = name,
                "Shutting down after the active transfer stops (signal again to force)"
            );
            cancel.cancel();
        }
    });

    Ok(token)
}
