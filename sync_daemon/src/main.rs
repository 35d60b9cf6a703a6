//! Reference host process: wires the engine core in `sync_core` to a real
//! WebSocket transport and a filesystem-backed realm.
//!
//! The top-level wiring — load config, set up logging, spawn the
//! long-running tasks, select on a shutdown signal, then join everything —
//! follows `server_yahoo::main`.

use anyhow::Result;
use std::path::PathBuf;
use std::sync::Arc;
use sync_core::client::SyncClient;
use sync_core::config::{self, EngineConfig};
use sync_core::coordinator::{HistoryProvider, RealmCoordinator};
use sync_core::session_manager::{self, SessionKey, SessionManager};
use tokio::signal;

#[tokio::main]
async fn main() -> Result<()> {
    let engine_config: EngineConfig = config::load_config();
    sync_core::logging::setup_logging(&engine_config.log_dir, &engine_config.log_level)?;

    log::info!(
        "starting sync daemon: base_file_path={:?} multiplex_sessions={}",
        engine_config.base_file_path,
        engine_config.multiplex_sessions,
    );

    let action_queue_path = session_manager::default_action_queue_path(&engine_config.base_file_path);
    let sessions: SessionManager<Arc<RealmCoordinator>> = SessionManager::new(action_queue_path);

    let pending_actions = sessions.drain_pending_actions().await?;
    for action in &pending_actions {
        log::info!("applying pending file action from previous run: {:?}", action);
        apply_pending_action(action).await?;
    }

    let realm_path = engine_config.realm_path();
    let key = SessionKey { user_identity: "default".into(), database_path: realm_path.clone() };
    let coordinator = sessions
        .get_session(key, || open_local_coordinator(realm_path.clone()))
        .await;

    log::info!(
        "connecting to sync server {}:{} for {:?}",
        engine_config.server_host,
        engine_config.server_port,
        realm_path,
    );
    let sync_task = SyncClient::spawn(
        engine_config.endpoint(),
        realm_path,
        1,
        engine_config.clone(),
        coordinator,
        Some(Box::new(|observation| {
            log::info!("client reset observation: {observation:?}");
        })),
    );

    let (shutdown_tx, _) = tokio::sync::broadcast::channel::<()>(1);

    tokio::select! {
        _ = signal::ctrl_c() => {
            log::info!("ctrl-c received, initiating shutdown.");
        }
        _ = wait_for_terminate() => {
            log::info!("terminate signal received, initiating shutdown.");
        }
    }

    let _ = shutdown_tx.send(());
    sync_task.abort();
    log::info!("shutdown complete.");
    Ok(())
}

async fn wait_for_terminate() {
    #[cfg(unix)]
    {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut term_signal) => {
                term_signal.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    }
    #[cfg(not(unix))]
    {
        std::future::pending::<()>().await;
    }
}

async fn apply_pending_action(action: &session_manager::QueuedFileAction) -> Result<()> {
    match action.action {
        session_manager::SerializableFileAction::Delete => {
            let _ = tokio::fs::remove_file(&action.database_path).await;
        }
        session_manager::SerializableFileAction::BackupThenDelete => {
            let backup_path = backup_path_for(&action.database_path);
            if tokio::fs::metadata(&action.database_path).await.is_ok() {
                tokio::fs::copy(&action.database_path, &backup_path).await?;
            }
            let _ = tokio::fs::remove_file(&action.database_path).await;
        }
    }
    Ok(())
}

fn backup_path_for(path: &std::path::Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".bak");
    PathBuf::from(name)
}

fn open_local_coordinator(path: PathBuf) -> Arc<RealmCoordinator> {
    Arc::new(RealmCoordinator::open(path, HistoryProvider::Sync))
}
