//! REPL backend for a connection held by this process

use super::ReplBackend;
use crate::output::console::ConsoleFormatter;
use async_trait::async_trait;
use eye_application::{DirectClient, InboundEvent};
use eye_domain::RelayError;
use std::sync::Arc;
use tokio::sync::mpsc;

pub struct DirectBackend {
    client: Arc<DirectClient>,
}

impl DirectBackend {
    /// Wrap `client` and return the frames the REPL should print.
    pub fn new(client: Arc<DirectClient>) -> (Self, mpsc::UnboundedReceiver<String>) {
        let frames = forward_frames(client.monitor());
        (Self { client }, frames)
    }
}

#[async_trait]
impl ReplBackend for DirectBackend {
    async fn submit(&mut self, line: &str) -> Result<(), String> {
        // Replies are printed from the monitor, so the waiter is not kept.
        self.client
            .submit(line)
            .await
            .map(drop)
            .map_err(|e: RelayError| e.to_string())
    }
}

fn forward_frames(
    mut events: mpsc::UnboundedReceiver<InboundEvent>,
) -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                InboundEvent::Frame(frame) => {
                    if tx.send(frame).is_err() {
                        break;
                    }
                }
                InboundEvent::Disconnected(reason) => {
                    eprintln!("{}", ConsoleFormatter::error(&reason.to_string()));
                    break;
                }
            }
        }
    });
    rx
}
