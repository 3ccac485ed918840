//! Per-session output pump: turns a session's chunked output subscription
//! into batched frames for the UI loop. Blocking on the first chunk keeps
//! first-byte latency low after idle; the non-blocking drain collapses a
//! burst of refresh frames into a single render.

use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;

use agentmux_core::ProjectId;
use agentmux_runtime::OutputSubscription;

use crate::events::AppEvent;

/// Batch ceiling per delivered frame.
pub const MAX_BATCH_BYTES: usize = 32 * 1024;

/// Spawns the pump task for one session. The task ends by delivering
/// `SessionStopped` once the output channel closes, after flushing whatever
/// the final drain accumulated.
pub fn spawn_output_pump(
    id: ProjectId,
    mut subscription: OutputSubscription,
    tx: UnboundedSender<AppEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let Some(first) = subscription.next_chunk().await else {
                let _ = tx.send(AppEvent::SessionStopped { id });
                return;
            };

            let mut batch = first;
            while batch.len() < MAX_BATCH_BYTES {
                match subscription.try_next_chunk() {
                    Some(next) => batch.extend_from_slice(&next),
                    None => break,
                }
            }

            if tx
                .send(AppEvent::SessionOutput {
                    id: id.clone(),
                    bytes: batch,
                })
                .is_err()
            {
                return;
            }
        }
    })
}
