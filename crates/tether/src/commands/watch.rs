//! `tether watch`: run a live session and log store changes.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use tether_core::model::record_id;
use tether_core::{ConnectionStatus, Controller, EntityKind, EntityStream, Snapshot};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::cli::WatchArgs;
use crate::context::SessionContext;
use crate::error::CliError;

pub async fn handle(args: &WatchArgs, mut ctx: SessionContext) -> Result<(), CliError> {
    if !args.kinds.is_empty() {
        ctx.sync.kinds.clone_from(&args.kinds);
    }

    let cancel = CancellationToken::new();
    let broker = Arc::new(ctx.realtime_client(cancel.child_token())?);
    let rest = Arc::new(ctx.rest_client()?);
    let kinds = ctx.sync.channel_kinds();

    let controller = Controller::new(ctx.sync.clone(), broker, rest, ctx.preferences()?);
    let session = controller.start()?;
    info!(profile = %ctx.profile_name, session = session.id(), "watching");

    let mut tasks = JoinSet::new();
    for kind in kinds {
        tasks.spawn(log_changes(controller.subscribe(kind), cancel.clone()));
    }
    if let Ok(status) = controller.watch_connection() {
        tasks.spawn(log_connection(status, cancel.clone()));
    }
    tasks.spawn(log_updates(
        "active selection",
        session.bootstrap().watch_selection(),
        |sel: &Option<String>| sel.clone().unwrap_or_else(|| "(none)".into()),
        cancel.clone(),
    ));
    tasks.spawn(log_updates(
        "identity",
        controller.store().subscribe_identity(),
        |identity: &Option<Arc<serde_json::Value>>| {
            identity
                .as_deref()
                .and_then(|v| v.get("id"))
                .map_or_else(|| "(none)".into(), ToString::to_string)
        },
        cancel.clone(),
    ));

    wait_for_exit(args.duration).await;

    if let Ok(Some(selection)) = controller.active_selection() {
        info!(%selection, "active selection at exit");
    }
    controller.stop();
    cancel.cancel();
    while tasks.join_next().await.is_some() {}
    Ok(())
}

async fn wait_for_exit(duration: Option<Duration>) {
    match duration {
        Some(d) => {
            tokio::select! {
                () = tokio::time::sleep(d) => {}
                _ = tokio::signal::ctrl_c() => {}
            }
        }
        None => {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "cannot listen for Ctrl-C; exiting");
            }
        }
    }
}

/// Log adds and removals of one kind by diffing successive snapshots.
async fn log_changes(mut stream: EntityStream, cancel: CancellationToken) {
    let kind: EntityKind = stream.kind();
    let mut known = ids_of(stream.current());

    loop {
        let snapshot = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            snap = stream.changed() => match snap {
                Some(s) => s,
                None => break,
            },
        };

        let next = ids_of(&snapshot);
        for id in next.difference(&known) {
            info!(kind = %kind, %id, "added");
        }
        for id in known.difference(&next) {
            info!(kind = %kind, %id, "removed");
        }
        info!(kind = %kind, count = next.len(), "snapshot");
        known = next;
    }
}

async fn log_connection(
    mut status: watch::Receiver<ConnectionStatus>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            res = status.changed() => {
                if res.is_err() {
                    break;
                }
                let s = status.borrow_and_update().clone();
                info!(
                    connected = s.is_connected,
                    connecting = s.is_connecting,
                    degraded = s.degraded,
                    retries = s.retry_count,
                    error = s.last_error.as_deref().unwrap_or(""),
                    "connection"
                );
            }
        }
    }
}

/// Log `describe(value)` every time a watched value changes.
async fn log_updates<T: Send + Sync + 'static>(
    what: &'static str,
    mut rx: watch::Receiver<T>,
    describe: impl Fn(&T) -> String + Send + 'static,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            res = rx.changed() => {
                if res.is_err() {
                    break;
                }
                let text = describe(&rx.borrow_and_update());
                info!(value = %text, "{what} changed");
            }
        }
    }
}

fn ids_of(snapshot: &Snapshot) -> BTreeSet<String> {
    snapshot.iter().filter_map(|r| record_id(r)).collect()
}
