//! Interactive attach loop for the local terminal.

use std::time::Duration;

use anyhow::{Context, Result};
use crossterm::event::{self, Event};
use protocol::SessionKey;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::keys::{translate, KeyAction};
use crate::session::SessionController;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Reads crossterm events on a blocking thread until `shutdown` fires or
/// the receiver is dropped.
pub(crate) fn spawn_event_reader(
    shutdown: CancellationToken,
) -> (JoinHandle<()>, mpsc::Receiver<Event>) {
    let (event_tx, event_rx) = mpsc::channel::<Event>(64);
    let reader = tokio::task::spawn_blocking(move || {
        while !shutdown.is_cancelled() {
            match event::poll(POLL_INTERVAL) {
                Ok(false) => continue,
                Ok(true) => {}
                Err(e) => {
                    tracing::warn!(error = %e, "Terminal event poll failed");
                    break;
                }
            }
            match event::read() {
                Ok(ev) => {
                    if event_tx.blocking_send(ev).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Terminal event read failed");
                    break;
                }
            }
        }
    });
    (reader, event_rx)
}

/// Attaches `key` to the local terminal until the operator presses `Ctrl-]`.
///
/// The controller must have been created with a console surface factory.
pub async fn run_attach(controller: &SessionController, key: &SessionKey) -> Result<()> {
    eprintln!("Attaching to {key}. Press Ctrl-] to detach.");
    if !controller.attach(key).await? {
        anyhow::bail!("{key} is already attached");
    }
    let binding = controller
        .binding(key)
        .with_context(|| format!("binding for {key} disappeared"))?;

    let shutdown = CancellationToken::new();
    let (reader, mut event_rx) = spawn_event_reader(shutdown.clone());

    while let Some(ev) = event_rx.recv().await {
        match ev {
            Event::Key(k) => match translate(k) {
                KeyAction::Input(bytes) => {
                    if let Err(e) = binding.send_input(&bytes).await {
                        tracing::warn!(session = %key, error = %e, "Input not delivered");
                        break;
                    }
                }
                KeyAction::Detach => break,
                KeyAction::Ignore => {}
            },
            Event::Resize(..) => binding.on_viewport_resize(),
            _ => {}
        }
    }

    shutdown.cancel();
    if let Err(e) = reader.await {
        tracing::debug!(error = %e, "Terminal reader ended abnormally");
    }
    controller.detach(key).await;
    eprintln!("\r\nDetached from {key}.");
    Ok(())
}
