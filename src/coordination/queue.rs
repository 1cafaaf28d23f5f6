//! Per-path wait queues. A `FileAccessQueue` holds an ordered list of
//! `FileAccessQueueMember`s; a member groups one or more cooperating
//! requests into a single scheduling unit. Queues form a parent/child
//! hierarchy by path so the arbiter can enforce ancestor/descendant
//! exclusion between readers and writers.

use std::collections::VecDeque;

use dashmap::DashMap;

use crate::coordination::request::{CancellationToken, FileAccessRequest, RequestState};

/// Groups one or more cooperating requests that become ongoing together.
pub struct FileAccessQueueMember {
    pub requests: Vec<FileAccessRequest>,
    /// Once a member becomes the queue head and starts its presenter round
    /// trip, it stops accepting new cooperating requests.
    pub accepting: bool,
}

impl FileAccessQueueMember {
    pub fn new(request: FileAccessRequest) -> Self {
        FileAccessQueueMember {
            requests: vec![request],
            accepting: true,
        }
    }

    pub fn is_write(&self) -> bool {
        self.requests.first().map(|r| r.kind.is_write()).unwrap_or(false)
    }

    pub fn is_read(&self) -> bool {
        self.requests.first().map(|r| r.kind.is_read()).unwrap_or(false)
    }

    /// Tries to add `request` to this member; succeeds only while still
    /// accepting and the request cooperates with the member's existing
    /// requests.
    pub fn try_add(&mut self, request: FileAccessRequest) -> Option<FileAccessRequest> {
        if !self.accepting {
            return Some(request);
        }
        let cooperates = self
            .requests
            .first()
            .map(|first| first.can_cooperate_with(&request))
            .unwrap_or(false);
        if cooperates {
            self.requests.push(request);
            None
        } else {
            Some(request)
        }
    }

    pub fn start(&mut self) {
        self.accepting = false;
        for request in &mut self.requests {
            request.start();
        }
    }

    pub fn is_ongoing(&self) -> bool {
        self.requests
            .iter()
            .any(|r| r.state == RequestState::Ongoing)
    }

    pub fn all_complete(&self) -> bool {
        self.requests
            .iter()
            .all(|r| matches!(r.state, RequestState::Complete | RequestState::Failed))
    }

    pub fn remove_by_token(&mut self, token: CancellationToken) -> Option<FileAccessRequest> {
        if let Some(pos) = self.requests.iter().position(|r| r.token == token) {
            Some(self.requests.remove(pos))
        } else {
            None
        }
    }
}

/// Per-path wait queue.
pub struct FileAccessQueue {
    pub path: String,
    pub members: VecDeque<FileAccessQueueMember>,
}

impl FileAccessQueue {
    pub fn new(path: impl Into<String>) -> Self {
        FileAccessQueue {
            path: path.into(),
            members: VecDeque::new(),
        }
    }

    /// Appends `request`, cooperating with the tail member when possible,
    /// else opening a new member at the tail.
    pub fn enqueue(&mut self, request: FileAccessRequest) {
        if let Some(tail) = self.members.back_mut() {
            if let Some(rejected) = tail.try_add(request) {
                self.members.push_back(FileAccessQueueMember::new(rejected));
            }
            return;
        }
        self.members.push_back(FileAccessQueueMember::new(request));
    }

    pub fn head(&self) -> Option<&FileAccessQueueMember> {
        self.members.front()
    }

    pub fn head_mut(&mut self) -> Option<&mut FileAccessQueueMember> {
        self.members.front_mut()
    }

    pub fn pop_head_if_complete(&mut self) -> Option<FileAccessQueueMember> {
        if self.members.front().map(|m| m.all_complete()).unwrap_or(false) {
            self.members.pop_front()
        } else {
            None
        }
    }

    pub fn has_ongoing_writer(&self) -> bool {
        self.members
            .front()
            .map(|m| m.is_ongoing() && m.is_write())
            .unwrap_or(false)
    }

    pub fn has_ongoing_reader(&self) -> bool {
        self.members
            .front()
            .map(|m| m.is_ongoing() && m.is_read())
            .unwrap_or(false)
    }
}

fn ancestors_of(path: &str) -> Vec<String> {
    let mut result = Vec::new();
    let parts: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    for i in 0..parts.len() {
        let prefix = format!("/{}", parts[..i].join("/"));
        result.push(prefix);
    }
    result
}

/// A get-or-create table of path -> queue, keeping the queue-per-path
/// dedup factory the reference arbiter uses, plus ancestor/descendant
/// lookups used to enforce the cross-path exclusion rules.
#[derive(Default)]
pub struct PathQueueTable {
    queues: DashMap<String, FileAccessQueue>,
}

impl PathQueueTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queue_for_path(&self, path: &str) -> dashmap::mapref::one::RefMut<'_, String, FileAccessQueue> {
        self.queues
            .entry(path.to_string())
            .or_insert_with(|| FileAccessQueue::new(path))
    }

    pub fn get(&self, path: &str) -> Option<dashmap::mapref::one::Ref<'_, String, FileAccessQueue>> {
        self.queues.get(path)
    }

    /// True if any ancestor of `path` has an ongoing writer.
    pub fn ancestor_has_ongoing_writer(&self, path: &str) -> bool {
        ancestors_of(path)
            .iter()
            .filter(|p| p.as_str() != path)
            .any(|ancestor| {
                self.queues
                    .get(ancestor)
                    .map(|q| q.has_ongoing_writer())
                    .unwrap_or(false)
            })
    }

    /// True if any descendant queue (path starting with `path/`) has an
    /// ongoing writer.
    pub fn descendant_has_ongoing_writer(&self, path: &str) -> bool {
        let prefix = format!("{}/", path.trim_end_matches('/'));
        self.queues
            .iter()
            .any(|entry| entry.key().starts_with(&prefix) && entry.value().has_ongoing_writer())
    }

    /// True if any queue in the subtree rooted at `path` (including `path`
    /// itself) has an ongoing reader; used to make writers wait for readers
    /// anywhere beneath them.
    pub fn subtree_has_ongoing_reader(&self, path: &str) -> bool {
        let prefix = format!("{}/", path.trim_end_matches('/'));
        self.queues.iter().any(|entry| {
            (entry.key() == path || entry.key().starts_with(&prefix))
                && entry.value().has_ongoing_reader()
        })
    }

    pub fn ancestor_has_ongoing_reader(&self, path: &str) -> bool {
        ancestors_of(path)
            .iter()
            .filter(|p| p.as_str() != path)
            .any(|ancestor| {
                self.queues
                    .get(ancestor)
                    .map(|q| q.has_ongoing_reader())
                    .unwrap_or(false)
            })
    }
}
