//! Terminates the platform on CTRL+C or SIGHUP.
//!
//! Once the platform is terminated, the [Server](crate::server::Server) closes its socket and
//! all connections. Replication pushes which are still in flight are dropped.
use std::sync::Arc;

use tokio::signal::unix::SignalKind;

use crate::platform::Platform;

/// Forks a task which awaits either **CTRL+C** or **SIGHUP** and then invokes
/// [Platform::terminate](crate::platform::Platform::terminate).
///
/// Note that this is automatically called by the [Builder](crate::builder::Builder) unless it is
/// disabled.
pub fn install(platform: Arc<Platform>) {
    crate::spawn!(async move {
        let mut sig_hup = match tokio::signal::unix::signal(SignalKind::hangup()) {
            Ok(signal) => signal,
            Err(error) => {
                log::error!("Failed to install a handler for SIGHUP: {}", error);
                return;
            }
        };

        tokio::select! {
            _ = tokio::signal::ctrl_c() => log::info!("Received CTRL-C. Shutting down..."),
            _ = sig_hup.recv() => log::info!("Received SIGHUP. Shutting down..."),
        }

        platform.terminate();
    });
}
