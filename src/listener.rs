//! Accept loop: binds the frontend address, spawns one session per
//! accepted connection, and stops cleanly on a shutdown signal without
//! forcing in-flight sessions closed.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

use log::{error, info, warn};
use tokio::net::TcpListener;

use crate::config::TunnelConfig;
use crate::pool::BufferPool;
use crate::session::{self, SessionContext};

/// # Run Accept Loop
///
/// Binds the frontend address and accepts connections until shutdown.
///
/// Builds the shared [`SessionContext`] (buffer pool, configuration,
/// live-session counter) once, then repeatedly accepts and spawns an
/// independent session per connection. Races each accept against the
/// shutdown flag so the loop exits promptly once it flips, without forcing
/// any in-flight session closed — those drain under their own pump
/// termination conditions.
///
/// ## Parameters
///
/// * `cfg` - Fully resolved, validated tunnel configuration.
/// * `shutdown` - Flag flipped by [`install_signal_handler`]; checked
///   between accepts and polled while one is in flight.
///
/// ## Returns
///
/// * `std::io::Result<()>` - `Err` only if the initial bind fails; a normal
///   shutdown returns `Ok(())`.
///
/// ## Error Handling
///
/// Accept errors are logged and do not stop the loop; only a bind failure
/// at startup is fatal.
pub async fn run(cfg: Arc<TunnelConfig>, shutdown: Arc<AtomicBool>) -> std::io::Result<()> {
    let listener = TcpListener::bind(cfg.listen).await?;
    info!("listening on {}", cfg.listen);

    let ctx = Arc::new(SessionContext {
        pool: Arc::new(BufferPool::new(cfg.buffer_size, 64)),
        config: cfg,
        live_sessions: Arc::new(AtomicI64::new(0)),
    });

    while !shutdown.load(Ordering::SeqCst) {
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        let ctx = ctx.clone();
                        tokio::spawn(async move {
                            session::run(stream, peer, ctx).await;
                        });
                    }
                    Err(err) => {
                        warn!("accept failed: {err}");
                    }
                }
            }
            _ = wait_for_shutdown(&shutdown) => {
                break;
            }
        }
    }

    info!("shutdown signal received, no longer accepting new connections");
    Ok(())
}

/// Polls the shutdown flag instead of using a notifier, matching the
/// orchestrator's own accept-loop style: cheap, and shutdown is rare enough
/// that the poll interval doesn't matter.
async fn wait_for_shutdown(shutdown: &AtomicBool) {
    loop {
        if shutdown.load(Ordering::SeqCst) {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    }
}

/// Installs a Ctrl-C handler that flips `shutdown`. Installation failure is
/// logged but not fatal — the process can still be killed outright.
pub fn install_signal_handler(shutdown: Arc<AtomicBool>) {
    if let Err(err) = ctrlc::set_handler(move || {
        shutdown.store(true, Ordering::SeqCst);
    }) {
        error!("failed to install shutdown signal handler: {err}");
    }
}
