//! One event loop per client.
//!
//! Commands, realtime batches, the countdown tick and the reconciliation
//! timer all feed the same client, one at a time.

use crate::handlers::{handle_command, Flow};
use crate::protocol::Command;
use crate::state::GameClient;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// Handle to a spawned client loop
pub struct ClientHandle {
    commands: mpsc::UnboundedSender<Command>,
    task: JoinHandle<()>,
}

impl ClientHandle {
    /// Queue a command. Returns false once the loop has stopped.
    pub fn send(&self, command: Command) -> bool {
        self.commands.send(command).is_ok()
    }

    pub fn sender(&self) -> mpsc::UnboundedSender<Command> {
        self.commands.clone()
    }

    /// Wait for the loop to stop on its own
    pub async fn join(self) {
        if let Err(e) = self.task.await {
            tracing::error!("Client task failed: {}", e);
        }
    }

    pub async fn shutdown(self) {
        if self.commands.send(Command::Shutdown).is_err() {
            tracing::warn!("Client loop already stopped before shutdown");
        }
        self.join().await;
    }
}

/// Spawn the loop for `client`
pub fn spawn_client(client: GameClient) -> ClientHandle {
    let (tx, rx) = mpsc::unbounded_channel();
    let task = tokio::spawn(run_client(client, rx));
    ClientHandle { commands: tx, task }
}

/// Create the command channel first, for views that issue commands themselves
pub fn spawn_client_with(
    client: GameClient,
    tx: mpsc::UnboundedSender<Command>,
    rx: mpsc::UnboundedReceiver<Command>,
) -> ClientHandle {
    let task = tokio::spawn(run_client(client, rx));
    ClientHandle { commands: tx, task }
}

pub async fn run_client(mut client: GameClient, mut commands: mpsc::UnboundedReceiver<Command>) {
    let mut tick = tokio::time::interval(client.config().tick);
    tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut next_reconcile = Instant::now() + client.next_reconcile_delay();

    loop {
        tokio::select! {
            command = commands.recv() => {
                let Some(command) = command else {
                    break;
                };
                tracing::debug!("Command: {:?}", command);
                if handle_command(&mut client, command).await == Flow::Stop {
                    break;
                }
                client.note_activity();
                next_reconcile = Instant::now() + client.next_reconcile_delay();
            }

            // Realtime events, handled as one batch
            event = client.subs.recv() => {
                let mut batch = vec![event];
                client.subs.drain_ready(&mut batch);
                client.handle_events(batch).await;
            }

            _ = tick.tick() => {
                client.tick().await;
            }

            _ = tokio::time::sleep_until(next_reconcile) => {
                client.reconcile().await;
                next_reconcile = Instant::now() + client.next_reconcile_delay();
            }
        }
    }

    tracing::info!("Client loop stopped");
}
