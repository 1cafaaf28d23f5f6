//! FileCoordination arbiter: a singleton-per-daemon-process table of
//! path-keyed wait queues plus a token-keyed request index, enforcing
//! reader/writer exclusion and presenter round trips around file access.

pub mod presenter;
pub mod queue;
pub mod request;

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{FcError, FcResult};

pub use presenter::{Presenter, PresenterAck, PresenterNotification, PresenterNotificationKind};
pub use queue::{FileAccessQueue, FileAccessQueueMember, PathQueueTable};
pub use request::{CancellationToken, FileAccessRequest, IntentOptions, RequestKind, RequestState};

/// Registered presenters, keyed by the path they observe.
#[derive(Default)]
struct PresenterRegistry {
    by_path: DashMap<String, Vec<Arc<dyn Presenter>>>,
}

impl PresenterRegistry {
    fn add(&self, path: &str, presenter: Arc<dyn Presenter>) {
        self.by_path.entry(path.to_string()).or_default().push(presenter);
    }

    /// Presenters registered on `path` and every ancestor/descendant that
    /// should hear about this notification. Kept intentionally simple:
    /// exact-path presenters plus ancestors, matching "parents/self/
    /// descendants" from the request lifecycle description closely enough
    /// for a daemon that does not need wildcard descendant presenters.
    fn presenters_for(&self, path: &str) -> Vec<Arc<dyn Presenter>> {
        let mut result = Vec::new();
        if let Some(list) = self.by_path.get(path) {
            result.extend(list.iter().cloned());
        }
        let mut component = path.to_string();
        while let Some(idx) = component.rfind('/') {
            if idx == 0 {
                break;
            }
            component.truncate(idx);
            if let Some(list) = self.by_path.get(&component) {
                result.extend(list.iter().cloned());
            }
        }
        result
    }
}

/// Index from cancellation token to the path/member the request currently
/// lives in, so completion/cancellation lookups don't need a path.
struct TokenIndex {
    path_of: DashMap<CancellationToken, String>,
}

pub struct Arbiter {
    queues: PathQueueTable,
    presenters: PresenterRegistry,
    tokens: TokenIndex,
    /// Serializes the advance-the-queues step; FC queues and members are
    /// mutated only while holding this, matching "the arbiter's single
    /// queue" resource rule.
    advance_lock: Mutex<()>,
}

impl Arbiter {
    pub fn new() -> Arc<Self> {
        Arc::new(Arbiter {
            queues: PathQueueTable::new(),
            presenters: PresenterRegistry::default(),
            tokens: TokenIndex {
                path_of: DashMap::new(),
            },
            advance_lock: Mutex::new(()),
        })
    }

    pub fn add_presenter(&self, path: &str, presenter: Arc<dyn Presenter>) {
        self.presenters.add(path, presenter);
    }

    /// Submits an intent; returns a cancellation token once the request's
    /// queue member reaches the head and every presenter round trip for it
    /// acknowledges `Ok`.
    pub async fn coordinate(
        &self,
        path: &str,
        kind: RequestKind,
        options: IntentOptions,
        purpose_identifier: &str,
    ) -> FcResult<CancellationToken> {
        let request = FileAccessRequest::new(path, kind, options, purpose_identifier);
        let token = request.token;
        self.tokens.path_of.insert(token, path.to_string());

        {
            let mut queue = self.queues.queue_for_path(path);
            queue.enqueue(request);
        }

        // The reply (and the token it carries) is only sent once this
        // request's own member has run its presenter round trip and become
        // ongoing. Elsewhere-triggered `complete`/`cancel` calls drive the
        // queue forward in the meantime, so poll rather than block the
        // whole arbiter on one path.
        const MAX_POLLS: usize = 200;
        for _ in 0..MAX_POLLS {
            self.drive_head(path).await?;

            let queue = self.queues.get(path).ok_or(FcError::InvalidPath)?;
            if let Some(request) = queue
                .members
                .iter()
                .flat_map(|m| m.requests.iter())
                .find(|r| r.token == token)
            {
                match request.state {
                    RequestState::Ongoing | RequestState::Complete => return Ok(token),
                    RequestState::Failed => {
                        return Err(FcError::OperationDenied {
                            reason: "presenter denied access".to_string(),
                        })
                    }
                    RequestState::Queued => {}
                }
            } else {
                // Already popped: completed (or cancelled) before we could
                // observe it ongoing.
                return Ok(token);
            }
            drop(queue);
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }

        warn!("request {token} on {path} never reached the head of its queue after {MAX_POLLS} attempts; failing it");
        self.cancel(token).await.ok();
        Err(FcError::Timeout)
    }

    pub async fn coordinate_read(
        &self,
        path: &str,
        options: IntentOptions,
        purpose_identifier: &str,
    ) -> FcResult<CancellationToken> {
        self.coordinate(path, RequestKind::Read, options, purpose_identifier)
            .await
    }

    pub async fn coordinate_write(
        &self,
        path: &str,
        options: IntentOptions,
        purpose_identifier: &str,
    ) -> FcResult<CancellationToken> {
        self.coordinate(path, RequestKind::Write, options, purpose_identifier)
            .await
    }

    /// If the head member of `path`'s queue is not yet ongoing and nothing
    /// in an ancestor/descendant queue blocks it, starts its presenter
    /// round trip and marks it ongoing.
    async fn drive_head(&self, path: &str) -> FcResult<()> {
        let _guard = self.advance_lock.lock().await;

        let blocked = {
            let queue = self.queues.get(path).ok_or(FcError::InvalidPath)?;
            let head = match queue.head() {
                Some(h) => h,
                None => return Ok(()),
            };
            if head.is_ongoing() {
                return Ok(());
            }
            if head.is_write() {
                self.queues.ancestor_has_ongoing_writer(path)
                    || self.queues.descendant_has_ongoing_writer(path)
                    || self.queues.subtree_has_ongoing_reader(path)
            } else {
                self.queues.ancestor_has_ongoing_writer(path)
                    || self.queues.descendant_has_ongoing_writer(path)
            }
        };

        if blocked {
            debug!("head member for {path} waiting on a conflicting ancestor/descendant");
            return Ok(());
        }

        let notification_kind = {
            let queue = self.queues.get(path).ok_or(FcError::InvalidPath)?;
            let head = queue.head().unwrap();
            if head.is_write() {
                PresenterNotificationKind::RelinquishToWriter
            } else {
                PresenterNotificationKind::RelinquishToReader
            }
        };
        let notification = PresenterNotification {
            kind: notification_kind,
            path: path.to_string(),
            new_path: None,
        };
        let presenters = self.presenters.presenters_for(path);

        match presenter::round_trip(&presenters, &notification).await {
            Ok(()) => {
                let mut queue = self.queues.queue_for_path(path);
                if let Some(head) = queue.head_mut() {
                    head.start();
                }
                info!("request on {path} began (kind={:?})", notification_kind);
                Ok(())
            }
            Err(e) => {
                let mut queue = self.queues.queue_for_path(path);
                if let Some(head) = queue.head_mut() {
                    for r in &mut head.requests {
                        r.fail();
                    }
                }
                drop(queue);
                self.advance_past_head(path).await;
                warn!("request on {path} denied: {e}");
                Err(e)
            }
        }
    }

    /// Client reports the operation finished: notifies presenters of any
    /// reacquire/did-move/did-change follow-up, then pops the member and
    /// advances the queue.
    pub async fn complete(&self, token: CancellationToken) -> FcResult<()> {
        let path = self
            .tokens
            .path_of
            .get(&token)
            .map(|p| p.clone())
            .ok_or(FcError::UnknownToken)?;

        {
            let mut queue = self.queues.queue_for_path(&path);
            if let Some(head) = queue.head_mut() {
                for r in &mut head.requests {
                    if r.token == token {
                        r.complete();
                    }
                }
            }
        }

        let presenters = self.presenters.presenters_for(&path);
        let notification = PresenterNotification {
            kind: PresenterNotificationKind::ReacquireAccess,
            path: path.clone(),
            new_path: None,
        };
        let _ = presenter::round_trip(&presenters, &notification).await;

        self.tokens.path_of.remove(&token);
        self.advance_past_head(&path).await;
        self.drive_head(&path).await
    }

    /// Cancels a request. Before it becomes ongoing this silently removes it
    /// from its queue; afterward it is a best-effort abort that still
    /// triggers the completion presenter round trip.
    pub async fn cancel(&self, token: CancellationToken) -> FcResult<()> {
        let path = self
            .tokens
            .path_of
            .get(&token)
            .map(|p| p.clone())
            .ok_or(FcError::UnknownToken)?;

        let was_ongoing = {
            let mut queue = self.queues.queue_for_path(&path);
            let mut ongoing = false;
            for member in queue.members.iter_mut() {
                if let Some(r) = member.requests.iter().find(|r| r.token == token) {
                    ongoing = r.state == RequestState::Ongoing;
                    break;
                }
            }
            if !ongoing {
                for member in queue.members.iter_mut() {
                    member.remove_by_token(token);
                }
            }
            ongoing
        };

        self.tokens.path_of.remove(&token);

        if was_ongoing {
            self.complete(token).await.ok();
        } else {
            self.advance_past_head(&path).await;
            self.drive_head(&path).await?;
        }
        Ok(())
    }

    async fn advance_past_head(&self, path: &str) {
        let mut queue = self.queues.queue_for_path(path);
        queue.pop_head_if_complete();
    }

    /// Invalidates every in-flight request on the daemon, the way a
    /// connection-wide invalidation cancels every pending reply.
    pub async fn invalidate_all(&self) {
        let tokens: Vec<CancellationToken> = self
            .tokens
            .path_of
            .iter()
            .map(|entry| *entry.key())
            .collect();
        for token in tokens {
            let _ = self.cancel(token).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn writer_then_reader_never_overlap() {
        let arbiter = Arbiter::new();
        let writer_token = arbiter
            .coordinate_write("/x", IntentOptions::default(), "A")
            .await
            .unwrap();

        // Reader enqueues behind the ongoing writer.
        let reader_handle = {
            let arbiter = arbiter.clone();
            tokio::spawn(async move {
                arbiter
                    .coordinate_read("/x", IntentOptions::default(), "B")
                    .await
                    .unwrap()
            })
        };

        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        arbiter.complete(writer_token).await.unwrap();

        let reader_token = reader_handle.await.unwrap();
        arbiter.complete(reader_token).await.unwrap();
    }

    #[tokio::test]
    async fn cancel_before_ongoing_is_silent() {
        let arbiter = Arbiter::new();
        let writer_token = arbiter
            .coordinate_write("/y", IntentOptions::default(), "A")
            .await
            .unwrap();
        let reader_token = arbiter
            .coordinate_read("/y", IntentOptions::default(), "B")
            .await
            .unwrap();

        arbiter.cancel(reader_token).await.unwrap();
        arbiter.complete(writer_token).await.unwrap();
    }

    #[tokio::test]
    async fn cooperating_reads_both_become_ongoing_together() {
        let arbiter = Arbiter::new();
        let r1 = arbiter
            .coordinate_read("/z", IntentOptions::default(), "shared")
            .await
            .unwrap();
        let r2 = arbiter
            .coordinate_read("/z", IntentOptions::default(), "shared")
            .await
            .unwrap();
        arbiter.complete(r1).await.unwrap();
        arbiter.complete(r2).await.unwrap();
    }
}
