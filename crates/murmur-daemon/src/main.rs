//! # murmurd
//!
//! Headless murmur node. Meant to sit behind a Tor onion service:
//! - the **inbound listener** takes peer requests forwarded by the service;
//! - the **scheduler** introduces, confirms keys and delivers queued text
//!   through the SOCKS proxy;
//! - every core event is written to the log.
//!
//! Configuration comes from the environment, see [`config::DaemonConfig`].

mod config;
mod startup;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, watch};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use murmur_core::{BroadcastSink, CoreEvent, Node, Scheduler};
use murmur_net::{build_router, HttpTransport, InboundHandler, Listener, RateLimiter};
use murmur_shared::types::PeerAddress;

use crate::config::DaemonConfig;

/// How often idle rate-limit buckets are swept, and how idle they must be.
const RATE_LIMIT_SWEEP: Duration = Duration::from_secs(300);
const RATE_LIMIT_IDLE: Duration = Duration::from_secs(600);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Tracing (respects RUST_LOG)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,murmur_core=debug,murmur_net=debug")),
        )
        .init();

    info!("starting murmurd v{}", env!("CARGO_PKG_VERSION"));

    let config = DaemonConfig::from_env();
    info!(?config, "loaded configuration");

    // -----------------------------------------------------------------------
    // 2. Store and identity
    // -----------------------------------------------------------------------
    let db = startup::open_database(&config)?;
    startup::ensure_user(&db, &config)?;

    // -----------------------------------------------------------------------
    // 3. Node
    // -----------------------------------------------------------------------
    let transport = HttpTransport::new(config.socks_proxy.as_deref())?;
    if !transport.is_proxied() {
        warn!("no SOCKS proxy configured, peers are contacted directly");
    }
    let events = BroadcastSink::default();
    let node = Node::new(Arc::new(db), Arc::new(transport), Arc::new(events.clone()))?;

    if let Some(address) = &config.onion_address {
        node.set_own_address(PeerAddress::parse(address)?)?;
    } else if node.own_address().is_none() {
        warn!("own address unknown, introductions will wait for MURMUR_ONION_ADDRESS");
    }

    let status = node.status()?;
    info!(
        name = %status.name,
        key = %status.public_key,
        contacts = status.contacts.len(),
        pending = status.contacts.iter().filter(|c| c.pending).count(),
        "node status"
    );

    // -----------------------------------------------------------------------
    // 4. Background tasks
    // -----------------------------------------------------------------------
    let (stop, shutdown) = watch::channel(false);

    tokio::spawn(log_events(events.subscribe()));

    let limiter = RateLimiter::default();
    let sweeper = limiter.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(RATE_LIMIT_SWEEP);
        loop {
            interval.tick().await;
            sweeper.purge_idle(RATE_LIMIT_IDLE).await;
        }
    });

    let listener = Listener::bind(config.listen_addr).await?;
    let handler: Arc<dyn InboundHandler> = node.clone();
    let mut server = tokio::spawn(listener.serve(build_router(handler, limiter), shutdown.clone()));

    let mut scheduler = tokio::spawn(Scheduler::with_tick(node.clone(), config.tick).run(shutdown));

    // -----------------------------------------------------------------------
    // 5. Run until Ctrl+C or a component gives up
    // -----------------------------------------------------------------------
    tokio::select! {
        result = &mut server => {
            error!(?result, "inbound listener exited");
        }
        result = &mut scheduler => {
            error!(?result, "scheduler exited");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("received Ctrl+C, shutting down");
        }
    }

    // Let running jobs and requests finish.
    let _ = stop.send(true);
    if !server.is_finished() {
        let _ = server.await;
    }
    if !scheduler.is_finished() {
        let _ = scheduler.await;
    }

    info!("murmurd stopped");
    Ok(())
}

async fn log_events(mut rx: broadcast::Receiver<CoreEvent>) {
    loop {
        match rx.recv().await {
            Ok(CoreEvent::Error { message }) => error!(%message, "node error"),
            Ok(event) => info!(?event, "event"),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "event log fell behind");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
