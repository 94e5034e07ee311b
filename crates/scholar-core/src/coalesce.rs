//! Single-flight request coalescing for concurrent `get_paper` cold fetches
//! of the same id (spec.md §4.8.1).
//!
//! The reference implementation's `task:{id}:status` flag is informational
//! only — its waiter is commented out. This tier turns it into an actual
//! in-process rendezvous: the first caller for an id becomes the leader
//! and fetches; concurrent callers wait on a `Notify` up to a bounded
//! timeout, then re-check the cache, then give up and fetch independently
//! rather than block forever on a leader that might itself be stuck.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::timeout;

#[derive(Default)]
pub struct Coalescer {
    inflight: Mutex<HashMap<String, Arc<Notify>>>,
}

pub enum Role {
    /// No other caller is fetching this id; the caller should fetch and
    /// call [`Coalescer::finish`] when done (success or failure).
    Leader,
    /// Another caller is already fetching; wait on this handle.
    Follower(Arc<Notify>),
}

impl Coalescer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers interest in `id`. Returns `Leader` exactly once per
    /// outstanding fetch; every other concurrent caller gets `Follower`.
    pub fn join(&self, id: &str) -> Role {
        let mut guard = self.inflight.lock().unwrap();
        if let Some(notify) = guard.get(id) {
            return Role::Follower(notify.clone());
        }
        guard.insert(id.to_string(), Arc::new(Notify::new()));
        Role::Leader
    }

    /// Waits up to `poll_timeout` for the leader to finish. Returns `true`
    /// if notified within the timeout, `false` if the wait timed out (the
    /// caller should then proceed to fetch on its own).
    pub async fn wait(&self, notify: &Notify, poll_timeout: Duration) -> bool {
        timeout(poll_timeout, notify.notified()).await.is_ok()
    }

    /// Called by the leader once the fetch completes (success or failure),
    /// waking every waiter and clearing the zombie entry.
    pub fn finish(&self, id: &str) {
        let mut guard = self.inflight.lock().unwrap();
        if let Some(notify) = guard.remove(id) {
            notify.notify_waiters();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn first_caller_leads_second_follows() {
        let c = Coalescer::new();
        assert!(matches!(c.join("p1"), Role::Leader));
        match c.join("p1") {
            Role::Follower(_) => {}
            Role::Leader => panic!("second caller should follow"),
        }
    }

    #[tokio::test]
    async fn follower_is_woken_on_finish() {
        let c = Arc::new(Coalescer::new());
        assert!(matches!(c.join("p1"), Role::Leader));
        let notify = match c.join("p1") {
            Role::Follower(n) => n,
            Role::Leader => panic!("expected follower"),
        };

        let c2 = c.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            c2.finish("p1");
        });

        assert!(c.wait(&notify, Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn follower_gives_up_after_timeout() {
        let c = Coalescer::new();
        assert!(matches!(c.join("p1"), Role::Leader));
        let notify = match c.join("p1") {
            Role::Follower(n) => n,
            Role::Leader => panic!("expected follower"),
        };
        assert!(!c.wait(&notify, Duration::from_millis(20)).await);
    }

    #[tokio::test]
    async fn after_finish_a_new_leader_can_join() {
        let c = Coalescer::new();
        assert!(matches!(c.join("p1"), Role::Leader));
        c.finish("p1");
        assert!(matches!(c.join("p1"), Role::Leader));
    }
}
