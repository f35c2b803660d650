//! The Server Supervisor (spec.md §4.7): binds the listener, wires the
//! shared services together, and propagates a clean shutdown signal to
//! every active connection.

use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, Semaphore};
use tracing::{error, info, warn};

use crate::catalog::{self, Catalog};
use crate::config::ServerConfig;
use crate::connection;
use crate::time_anchor::TimeAnchor;
use crate::vfs::{self, Vfs, VfsOps};

/// Bounded cardinality of simultaneously active connections
/// (spec.md §3, §4.6).
const MAX_CONNS: usize = 2;

const TOO_MANY_CONNECTIONS: &[u8] = b"error:too many connections\n";

/// The process-wide, shared state every connection dispatches against:
/// the read-only Command Catalog, the mutex-guarded Virtual
/// Filesystem, and the `time` command's wall-clock anchor.
pub struct Services {
    pub catalog: Catalog,
    pub vfs: Arc<dyn VfsOps + Send + Sync>,
    pub time_anchor: TimeAnchor,
}

fn load_catalog(config: &ServerConfig) -> Catalog {
    match &config.catalog_path {
        Some(path) => match catalog::load_from_path(path) {
            Ok(catalog) => catalog,
            Err(err) => {
                error!(path = %path.display(), %err, "failed to load command catalog");
                std::process::exit(1);
            }
        },
        None => catalog::load_default(),
    }
}

fn load_vfs(config: &ServerConfig) -> Vfs {
    match &config.vfs_seed_path {
        Some(path) => match vfs::load_seed_from_path(path) {
            Ok(entries) => Vfs::from_entries(entries),
            Err(err) => {
                warn!(path = %path.display(), %err, "failed to load vfs seed, starting with an empty filesystem");
                Vfs::empty()
            }
        },
        None => Vfs::from_entries(vfs::default_layout()),
    }
}

/// Binds `config.addr()`, accepts connections under the `MAX_CONNS`
/// admission gate, and runs until a `SIGINT`/`Ctrl-C` triggers a clean
/// shutdown. Returns `Err` only on bind failure (spec.md §6's "exit
/// non-zero on bind failure").
pub async fn run(config: ServerConfig) -> std::io::Result<()> {
    let catalog = load_catalog(&config);
    let vfs: Arc<dyn VfsOps + Send + Sync> = Arc::new(load_vfs(&config));
    let services = Arc::new(Services { catalog, vfs, time_anchor: TimeAnchor::new() });

    let listener = TcpListener::bind(config.addr()).await.map_err(|err| {
        error!(addr = %config.addr(), %err, "failed to bind listener");
        err
    })?;
    info!(addr = %config.addr(), "listening");

    let admission = Arc::new(Semaphore::new(MAX_CONNS));
    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let ctrl_c_tx = shutdown_tx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            let _ = ctrl_c_tx.send(());
        }
    });

    let mut shutdown_rx = shutdown_tx.subscribe();
    loop {
        tokio::select! {
            biased;
            _ = shutdown_rx.recv() => {
                info!("accept loop stopping");
                break;
            }
            accepted = listener.accept() => {
                let (stream, addr) = match accepted {
                    Ok(pair) => pair,
                    Err(err) => {
                        warn!(%err, "accept failed");
                        continue;
                    }
                };

                match Arc::clone(&admission).try_acquire_owned() {
                    Ok(permit) => {
                        let services = Arc::clone(&services);
                        let conn_shutdown = shutdown_tx.subscribe();
                        tokio::spawn(async move {
                            connection::handle(stream, addr, services, conn_shutdown).await;
                            drop(permit);
                        });
                    }
                    Err(_) => {
                        tokio::spawn(async move {
                            let mut stream = stream;
                            let _ = stream.write_all(TOO_MANY_CONNECTIONS).await;
                            let _ = stream.shutdown().await;
                        });
                    }
                }
            }
        }
    }

    Ok(())
}
