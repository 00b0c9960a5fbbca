// Mute orchestration
//
// Holds the user's selection and the enable flag, recomputes the active
// target set (selection intersected with running apps) on every relevant
// change, and drives the tap engine. The policy is asymmetric on purpose:
// toggling the enable flag applies immediately, while selection edits and
// snapshot changes are debounced so a burst of UI interaction collapses
// into a single rebuild.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::engine::AudioTapEngine;
use super::platform::AudioHost;
use super::types::{MuteStatus, Pid, RunningApp, TapEngineError};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Coalescing window for selection edits and registry refreshes.
    pub debounce_ms: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self { debounce_ms: 50 }
    }
}

struct OrchestratorState {
    targets: HashSet<String>,
    enabled: bool,
    running: Vec<RunningApp>,
    status: MuteStatus,
    engine: AudioTapEngine,
    /// Single-shot debounced apply; always cancel-and-replace, never two
    /// pending at once.
    pending_apply: Option<JoinHandle<()>>,
}

/// Controller for the mute engine. Cheap to clone; all clones share one
/// serialized state, so recomputation is never concurrent with itself.
#[derive(Clone)]
pub struct MuteOrchestrator {
    state: Arc<Mutex<OrchestratorState>>,
    status_tx: broadcast::Sender<MuteStatus>,
    debounce: Duration,
}

impl MuteOrchestrator {
    pub fn new(host: Arc<dyn AudioHost>) -> Self {
        Self::with_config(host, OrchestratorConfig::default())
    }

    pub fn with_config(host: Arc<dyn AudioHost>, config: OrchestratorConfig) -> Self {
        let (status_tx, _) = broadcast::channel(32);
        Self {
            state: Arc::new(Mutex::new(OrchestratorState {
                targets: HashSet::new(),
                enabled: false,
                running: Vec::new(),
                status: MuteStatus::Disabled,
                engine: AudioTapEngine::new(host),
                pending_apply: None,
            })),
            status_tx,
            debounce: Duration::from_millis(config.debounce_ms),
        }
    }

    /// Toggle the whole feature. Applies immediately: turning muting off
    /// must stop audio interception without delay, and turning it on must
    /// take effect right away. Cancels any pending debounced apply.
    pub async fn set_enabled(&self, enabled: bool) {
        let mut state = self.state.lock().await;
        if let Some(pending) = state.pending_apply.take() {
            pending.abort();
        }
        state.enabled = enabled;
        self.apply(&mut state);
    }

    /// Add or remove one bundle id from the selection. Selection
    /// membership is independent of whether the app is running; stale
    /// entries are kept for future reselection and simply fall out of the
    /// active set. Debounced while enabled.
    pub async fn set_selected(&self, bundle_id: &str, selected: bool) {
        let mut state = self.state.lock().await;
        let changed = if selected {
            state.targets.insert(bundle_id.to_string())
        } else {
            state.targets.remove(bundle_id)
        };
        if changed && state.enabled {
            self.schedule_apply(&mut state);
        }
    }

    /// Replace the running-app snapshot (wired to the registry's
    /// subscription by the embedder). Debounced while enabled.
    pub async fn set_running_apps(&self, apps: Vec<RunningApp>) {
        let mut state = self.state.lock().await;
        if state.running == apps {
            return;
        }
        state.running = apps;
        if state.enabled {
            self.schedule_apply(&mut state);
        }
    }

    /// Explicit refresh: recompute and apply immediately, skipping the
    /// debounce window. Also the way to retry after `enabled-error`.
    pub async fn apply_now(&self) {
        let mut state = self.state.lock().await;
        if let Some(pending) = state.pending_apply.take() {
            pending.abort();
        }
        self.apply(&mut state);
    }

    /// Tear everything down. Called before process exit.
    pub async fn shutdown(&self) {
        let mut state = self.state.lock().await;
        if let Some(pending) = state.pending_apply.take() {
            pending.abort();
        }
        state.engine.stop();
        self.set_status(&mut state, MuteStatus::Disabled);
    }

    pub async fn status(&self) -> MuteStatus {
        self.state.lock().await.status.clone()
    }

    pub async fn is_enabled(&self) -> bool {
        self.state.lock().await.enabled
    }

    pub async fn selected_targets(&self) -> HashSet<String> {
        self.state.lock().await.targets.clone()
    }

    /// Register a status observer. Dropping the receiver unregisters it.
    pub fn subscribe_status(&self) -> broadcast::Receiver<MuteStatus> {
        self.status_tx.subscribe()
    }

    fn schedule_apply(&self, state: &mut OrchestratorState) {
        if let Some(pending) = state.pending_apply.take() {
            pending.abort();
        }
        debug!(delay_ms = self.debounce.as_millis() as u64, "debouncing apply");

        let this = self.clone();
        state.pending_apply = Some(tokio::spawn(async move {
            tokio::time::sleep(this.debounce).await;
            let mut state = this.state.lock().await;
            state.pending_apply = None;
            this.apply(&mut state);
        }));
    }

    /// Recompute the active target set and reconcile the engine with it.
    /// Runs with the state lock held, so it is never concurrent with
    /// itself or with an edit.
    fn apply(&self, state: &mut OrchestratorState) {
        if !state.enabled {
            state.engine.stop();
            self.set_status(state, MuteStatus::Disabled);
            return;
        }

        let pids = active_target_pids(&state.targets, &state.running);
        if pids.is_empty() {
            // Selection has no overlap with running apps. Not an error.
            state.engine.stop();
            self.set_status(state, MuteStatus::EnabledIdle);
            return;
        }

        match state.engine.start(&pids) {
            Ok(()) => self.set_status(state, MuteStatus::EnabledActive),
            Err(TapEngineError::NoTargetProcesses) => {
                // Targets were running but none have a live audio object.
                state.engine.stop();
                self.set_status(state, MuteStatus::EnabledIdle);
            }
            Err(e) => {
                // The engine rolled back to Idle itself; surface the
                // message and wait for the user to trigger a retry.
                warn!(error = %e, "mute session could not be built");
                self.set_status(state, MuteStatus::EnabledError(e.to_string()));
            }
        }
    }

    fn set_status(&self, state: &mut OrchestratorState, status: MuteStatus) {
        if state.status == status {
            return;
        }
        info!(from = ?state.status, to = ?status, "mute status changed");
        state.status = status.clone();
        let _ = self.status_tx.send(status);
    }
}

/// Union of process ids of running apps the selection covers.
fn active_target_pids(targets: &HashSet<String>, running: &[RunningApp]) -> Vec<Pid> {
    let mut pids: Vec<Pid> = running
        .iter()
        .filter(|app| targets.contains(&app.bundle_id))
        .flat_map(|app| app.pids.iter().copied())
        .collect();
    pids.sort_unstable();
    pids.dedup();
    pids
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn app(bundle_id: &str, pids: &[Pid]) -> RunningApp {
        RunningApp {
            bundle_id: bundle_id.to_string(),
            display_name: bundle_id.to_string(),
            pids: pids.iter().copied().collect::<BTreeSet<_>>(),
        }
    }

    #[test]
    fn active_set_is_selection_intersect_running() {
        let targets: HashSet<String> =
            ["com.a".to_string(), "com.gone".to_string()].into_iter().collect();
        let running = vec![app("com.a", &[1, 2]), app("com.b", &[3])];

        assert_eq!(active_target_pids(&targets, &running), vec![1, 2]);
    }

    #[test]
    fn active_set_empty_when_nothing_selected_runs() {
        let targets: HashSet<String> = ["com.gone".to_string()].into_iter().collect();
        let running = vec![app("com.b", &[3])];

        assert!(active_target_pids(&targets, &running).is_empty());
    }
}
