//! Easy Bluetooth Bridge library
//! Session manager for Bluetooth Classic serial links, driven by JSON commands.

// Module declarations
pub mod commands;
pub mod config;
pub mod core;
pub mod logging;
pub mod state;
pub mod utils;

use log::{debug, info, warn};
use serde::Serialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::core::bluetooth::BridgeError;
use crate::logging::LogMessage;
use crate::state::AppState;

/// A line written to the host
#[derive(Debug, Serialize)]
#[serde(untagged)]
enum Outbound {
    Response(commands::Response),
    Event(crate::core::BridgeEvent),
    Log { log: LogMessage },
}

/// Serve JSON requests from `input`, one per line, until it closes.
///
/// Responses, events and (if `logs` is given) forwarded log records are
/// written to `output` as JSON lines. Each request runs in its own task so
/// a pending `startScan` or `connect` does not block `stopScan` or `disconnect`.
pub async fn run<R, W>(
    app_state: AppState,
    input: R,
    mut output: W,
    logs: Option<mpsc::UnboundedReceiver<LogMessage>>,
) -> anyhow::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let session_manager = app_state.get_session_manager_arc();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Outbound>();

    let writer = tokio::spawn(async move {
        while let Some(message) = out_rx.recv().await {
            let mut line = serde_json::to_vec(&message)?;
            line.push(b'\n');
            output.write_all(&line).await?;
            output.flush().await?;
        }
        anyhow::Ok(())
    });

    // Forwarders drain whatever is queued once `shutdown` fires, then stop.
    let shutdown = CancellationToken::new();

    let mut subscriber = session_manager.subscribe();
    let events_tx = out_tx.clone();
    let events_shutdown = shutdown.clone();
    let event_task = tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                event = subscriber.recv() => match event {
                    Some(event) => {
                        if events_tx.send(Outbound::Event(event)).is_err() {
                            break;
                        }
                    }
                    None => break,
                },
                _ = events_shutdown.cancelled() => subscriber.close(),
            }
        }
    });

    let log_task = logs.map(|mut logs| {
        let logs_tx = out_tx.clone();
        let logs_shutdown = shutdown.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    log = logs.recv() => match log {
                        Some(log) => {
                            if logs_tx.send(Outbound::Log { log }).is_err() {
                                break;
                            }
                        }
                        None => break,
                    },
                    _ = logs_shutdown.cancelled() => logs.close(),
                }
            }
        })
    });

    let requests = TaskTracker::new();
    let mut lines = input.lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim().to_string();
        if line.is_empty() {
            continue;
        }
        let app_state = app_state.clone();
        let out_tx = out_tx.clone();
        requests.spawn(async move {
            let response = commands::handle_line(&app_state, &line).await;
            let _ = out_tx.send(Outbound::Response(response));
        });
    }

    info!("Input closed, stopping session");
    match session_manager.stop_session().await {
        Ok(()) | Err(BridgeError::NotConfigured) => {}
        Err(e) => warn!("Failed to stop session on shutdown: {}", e),
    }
    requests.close();
    requests.wait().await;

    shutdown.cancel();
    if let Err(e) = event_task.await {
        debug!("Event forwarder ended abnormally: {:?}", e);
    }
    if let Some(log_task) = log_task {
        if let Err(e) = log_task.await {
            debug!("Log forwarder ended abnormally: {:?}", e);
        }
    }
    drop(out_tx);
    writer.await??;
    Ok(())
}
