//! venaison-daemon - Authoritative custody server
//!
//! Binds a Unix domain socket, opens the record store, and serves the
//! custody protocol until interrupted. There is exactly one daemon per
//! store: the fiche row inside it is the serialization point for custody
//! transitions.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::net::UnixListener;
use tracing::info;
use tracing_subscriber::EnvFilter;
use venaison_core::catalog::InMemoryCatalog;
use venaison_core::events::{DomainEvent, EventSink};
use venaison_daemon::server::serve;
use venaison_daemon::service::CustodyService;
use venaison_daemon::store::SqliteStore;

/// venaison daemon - wild-game custody server
#[derive(Parser, Debug)]
#[command(name = "venaison-daemon")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the Unix domain socket
    #[arg(long, default_value = "venaison.sock")]
    socket: PathBuf,

    /// Path to the record store database
    #[arg(long, default_value = "venaison.db")]
    db: PathBuf,

    /// Log filter when RUST_LOG is unset (tracing EnvFilter syntax)
    #[arg(long, default_value = "info")]
    log: String,
}

/// Sink that hands domain events to the notification pipeline.
///
/// Delivery itself (email, push) is an external collaborator; the daemon
/// only logs the emission. Consumers tail the log or replace this sink.
struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: DomainEvent) {
        match &event {
            DomainEvent::CustodyChanged {
                fiche_numero,
                new_owner,
                ..
            } => info!(fiche = %fiche_numero, owner = %new_owner, "event: custody changed"),
            DomainEvent::DecisionRecorded {
                fiche_numero,
                bracelet,
                decision,
                ..
            } => info!(
                fiche = %fiche_numero,
                bracelet = %bracelet,
                decision = %decision,
                "event: decision recorded"
            ),
            DomainEvent::FicheClosed { fiche_numero, .. } => {
                info!(fiche = %fiche_numero, "event: fiche closed");
            }
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log)),
        )
        .init();

    let store = SqliteStore::open(&args.db)
        .with_context(|| format!("opening store at {}", args.db.display()))?;
    let service = Arc::new(CustodyService::new(
        store,
        Box::new(InMemoryCatalog::seeded()),
        Arc::new(TracingSink),
    ));

    // A previous run may have left its socket file behind.
    if args.socket.exists() {
        std::fs::remove_file(&args.socket)
            .with_context(|| format!("removing stale socket {}", args.socket.display()))?;
    }
    let listener = UnixListener::bind(&args.socket)
        .with_context(|| format!("binding {}", args.socket.display()))?;
    info!(socket = %args.socket.display(), db = %args.db.display(), "venaison daemon started");

    tokio::select! {
        result = serve(listener, service) => {
            result.context("accept loop failed")?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown requested");
        }
    }

    let _ = std::fs::remove_file(&args.socket);
    Ok(())
}
