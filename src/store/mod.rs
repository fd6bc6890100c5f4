//! In-memory run state store
//!
//! Single source of truth for sessions and runs, polled by the UI. Mutations
//! are serialized per record through the map's entry locks; reads hand out
//! snapshots.

mod logs;
mod types;

pub use logs::LogBuffer;
pub use types::{Provider, Run, RunPatch, RunStatus, Session};

use chrono::Utc;
use dashmap::DashMap;
use uuid::Uuid;

/// Keyed storage for every session and run
#[derive(Default)]
pub struct StateStore {
    sessions: DashMap<String, Session>,
    runs: DashMap<String, Run>,
}

impl StateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a session with one queued run per model; atomic from the point
    /// of view of readers, which resolve runs only through the session's id
    /// list.
    pub fn create_session(&self, prompt: String, models: Vec<(Provider, String)>) -> Session {
        let now = Utc::now();
        let session_id = Uuid::new_v4().to_string();
        let mut run_ids = Vec::with_capacity(models.len());

        for (provider, model) in models {
            let run_id = Uuid::new_v4().to_string();
            self.runs.insert(
                run_id.clone(),
                Run::new(run_id.clone(), session_id.clone(), provider, model),
            );
            run_ids.push(run_id);
        }

        let session = Session {
            id: session_id.clone(),
            prompt,
            run_ids,
            created_at: now,
            updated_at: now,
        };
        self.sessions.insert(session_id, session.clone());

        session
    }

    /// Snapshot of a session
    pub fn session(&self, id: &str) -> Option<Session> {
        self.sessions.get(id).map(|s| s.clone())
    }

    /// Snapshot of a session joined with its runs' latest state
    pub fn session_view(&self, id: &str) -> Option<(Session, Vec<Run>)> {
        let session = self.session(id)?;
        let runs = session
            .run_ids
            .iter()
            .filter_map(|run_id| self.run(run_id))
            .collect();
        Some((session, runs))
    }

    /// Snapshot of a run
    pub fn run(&self, id: &str) -> Option<Run> {
        self.runs.get(id).map(|r| r.clone())
    }

    /// Advance a run's status, applying `mutate` under the same entry lock.
    ///
    /// Returns the updated snapshot, or `None` when the run is missing or
    /// the transition is not permitted (backwards, or out of a terminal
    /// state). The caller decides whether a rejected advance is a race to
    /// ignore or a reason to stop driving the run.
    pub fn transition<F>(&self, id: &str, next: RunStatus, mutate: F) -> Option<Run>
    where
        F: FnOnce(&mut Run),
    {
        let snapshot = {
            let mut entry = self.runs.get_mut(id)?;
            if !entry.status.allows(next) {
                return None;
            }
            entry.status = next;
            entry.updated_at = Utc::now();
            mutate(&mut entry);
            entry.clone()
        };

        self.touch_session(&snapshot.session_id);
        Some(snapshot)
    }

    /// Merge a partial update into a run; bumps `updated_at` on the run and
    /// its parent session. A status in the patch is subject to the same
    /// transition guard as `transition`; other fields merge regardless.
    pub fn update_run(&self, id: &str, patch: RunPatch) -> Option<Run> {
        let snapshot = {
            let mut entry = self.runs.get_mut(id)?;

            if let Some(status) = patch.status {
                if entry.status.allows(status) {
                    entry.status = status;
                }
            }
            if let Some(error) = patch.error {
                entry.error = Some(error);
            }
            if let Some(port) = patch.port {
                entry.port = Some(port);
            }
            if let Some(container_id) = patch.container_id {
                entry.container_id = Some(container_id);
            }
            if let Some(internal_url) = patch.internal_url {
                entry.internal_url = Some(internal_url);
            }
            if let Some(started_at) = patch.started_at {
                entry.started_at = Some(started_at);
            }
            if let Some(completed_at) = patch.completed_at {
                entry.completed_at = Some(completed_at);
            }

            entry.updated_at = Utc::now();
            entry.clone()
        };

        self.touch_session(&snapshot.session_id);
        Some(snapshot)
    }

    /// Reset a run back to `queued` for a retry, clearing everything a prior
    /// attempt left behind. The engine only re-arms queued or terminal runs.
    pub fn reset_run(&self, id: &str) -> Option<Run> {
        let snapshot = {
            let mut entry = self.runs.get_mut(id)?;
            entry.status = RunStatus::Queued;
            entry.port = None;
            entry.container_id = None;
            entry.internal_url = None;
            entry.error = None;
            entry.started_at = None;
            entry.completed_at = None;
            entry.logs_install.clear();
            entry.logs_build.clear();
            entry.logs_start.clear();
            entry.logs_error.clear();
            entry.updated_at = Utc::now();
            entry.clone()
        };

        self.touch_session(&snapshot.session_id);
        Some(snapshot)
    }

    /// Remove a run; drops the parent session once its last run is gone
    pub fn delete_run(&self, id: &str) -> bool {
        let Some((_, run)) = self.runs.remove(id) else {
            return false;
        };

        let mut drop_session = false;
        if let Some(mut session) = self.sessions.get_mut(&run.session_id) {
            session.run_ids.retain(|run_id| run_id != id);
            session.updated_at = Utc::now();
            drop_session = session.run_ids.is_empty();
        }
        if drop_session {
            self.sessions.remove(&run.session_id);
        }

        true
    }

    /// Remove a session and all of its runs
    pub fn delete_session(&self, id: &str) -> bool {
        let Some((_, session)) = self.sessions.remove(id) else {
            return false;
        };
        for run_id in &session.run_ids {
            self.runs.remove(run_id);
        }
        true
    }

    /// Atomically clear and return a run's allocated port.
    ///
    /// Cleanup paths may race (a failing task against an explicit kill);
    /// taking the port under the entry lock guarantees exactly one caller
    /// releases it back to the allocator.
    pub fn take_port(&self, id: &str) -> Option<u16> {
        let mut entry = self.runs.get_mut(id)?;
        let port = entry.port.take();
        entry.updated_at = Utc::now();
        port
    }

    /// Atomically clear and return a run's container handle
    pub fn take_container(&self, id: &str) -> Option<String> {
        let mut entry = self.runs.get_mut(id)?;
        let container = entry.container_id.take();
        entry.updated_at = Utc::now();
        container
    }

    /// Container ids of every run currently holding a handle
    pub fn active_containers(&self) -> Vec<String> {
        self.runs
            .iter()
            .filter_map(|r| r.container_id.clone())
            .collect()
    }

    /// Number of runs currently holding a container handle
    pub fn active_container_count(&self) -> usize {
        self.runs
            .iter()
            .filter(|r| r.container_id.is_some())
            .count()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn run_count(&self) -> usize {
        self.runs.len()
    }

    fn touch_session(&self, id: &str) {
        if let Some(mut session) = self.sessions.get_mut(id) {
            session.updated_at = Utc::now();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with_run() -> (StateStore, String, String) {
        let store = StateStore::new();
        let session = store.create_session(
            "build a landing page".into(),
            vec![(Provider::Openai, "gpt-4o".into())],
        );
        let run_id = session.run_ids[0].clone();
        (store, session.id, run_id)
    }

    #[test]
    fn test_create_session_with_runs() {
        let store = StateStore::new();
        let session = store.create_session(
            "prompt text here".into(),
            vec![
                (Provider::Openai, "gpt-4o".into()),
                (Provider::Anthropic, "claude-sonnet".into()),
            ],
        );

        assert_eq!(session.run_ids.len(), 2);
        let (joined, runs) = store.session_view(&session.id).unwrap();
        assert_eq!(joined.id, session.id);
        assert_eq!(runs.len(), 2);
        assert!(runs.iter().all(|r| r.status == RunStatus::Queued));
        assert!(runs.iter().all(|r| r.session_id == session.id));
    }

    #[test]
    fn test_transition_guards_regressions() {
        let (store, _, run_id) = store_with_run();

        assert!(store
            .transition(&run_id, RunStatus::Generating, |_| {})
            .is_some());
        assert!(store
            .transition(&run_id, RunStatus::Installing, |_| {})
            .is_some());

        // Backwards is rejected
        assert!(store
            .transition(&run_id, RunStatus::Generating, |_| {})
            .is_none());

        // Terminal sink always reachable
        assert!(store
            .transition(&run_id, RunStatus::Failed, |run| {
                run.error = Some("boom".into());
            })
            .is_some());

        // Nothing escapes a terminal state
        assert!(store
            .transition(&run_id, RunStatus::Starting, |_| {})
            .is_none());
        assert!(store
            .transition(&run_id, RunStatus::Terminated, |_| {})
            .is_none());
    }

    #[test]
    fn test_update_run_bumps_timestamps() {
        let (store, session_id, run_id) = store_with_run();

        let before_session = store.session(&session_id).unwrap().updated_at;
        let before_run = store.run(&run_id).unwrap().updated_at;

        std::thread::sleep(std::time::Duration::from_millis(5));

        let patch = RunPatch {
            internal_url: Some("http://127.0.0.1:3001".into()),
            ..Default::default()
        };
        let updated = store.update_run(&run_id, patch).unwrap();

        assert_eq!(updated.internal_url.as_deref(), Some("http://127.0.0.1:3001"));
        assert!(updated.updated_at > before_run);
        assert!(store.session(&session_id).unwrap().updated_at > before_session);
    }

    #[test]
    fn test_update_run_ignores_bad_status() {
        let (store, _, run_id) = store_with_run();
        store.transition(&run_id, RunStatus::Building, |_| {}).unwrap();

        let patch = RunPatch {
            status: Some(RunStatus::Generating),
            ..Default::default()
        };
        let updated = store.update_run(&run_id, patch).unwrap();
        assert_eq!(updated.status, RunStatus::Building);
    }

    #[test]
    fn test_reset_run_clears_prior_attempt() {
        let (store, _, run_id) = store_with_run();

        store.transition(&run_id, RunStatus::Failed, |run| {
            run.error = Some("build exploded".into());
            run.logs_build.append("error output");
        });

        let reset = store.reset_run(&run_id).unwrap();
        assert_eq!(reset.status, RunStatus::Queued);
        assert!(reset.error.is_none());
        assert!(reset.logs_build.is_empty());
    }

    #[test]
    fn test_take_port_is_single_shot() {
        let (store, _, run_id) = store_with_run();

        store.transition(&run_id, RunStatus::Starting, |run| {
            run.port = Some(3001);
            run.container_id = Some("abc".into());
        });

        assert_eq!(store.take_port(&run_id), Some(3001));
        assert_eq!(store.take_port(&run_id), None);
        assert_eq!(store.take_container(&run_id).as_deref(), Some("abc"));
        assert_eq!(store.take_container(&run_id), None);
        assert_eq!(store.active_container_count(), 0);
    }

    #[test]
    fn test_delete_last_run_drops_session() {
        let (store, session_id, run_id) = store_with_run();

        assert!(store.delete_run(&run_id));
        assert!(store.session(&session_id).is_none());
        assert!(!store.delete_run(&run_id));
    }

    #[test]
    fn test_delete_session_removes_runs() {
        let (store, session_id, run_id) = store_with_run();

        assert!(store.delete_session(&session_id));
        assert!(store.run(&run_id).is_none());
        assert_eq!(store.run_count(), 0);
    }
}
