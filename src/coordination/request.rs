//! A single file access request: the arbiter's unit of intent, grounded on
//! the reference `FileAccessRequest` class this module's naming and state
//! machine are modeled on.

use uuid::Uuid;

/// Opaque, server-minted cancellation token handed back to the client that
/// submitted a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CancellationToken(pub Uuid);

impl CancellationToken {
    pub fn new() -> Self {
        CancellationToken(Uuid::new_v4())
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for CancellationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Read,
    Write,
}

impl RequestKind {
    pub fn is_read(self) -> bool {
        matches!(self, RequestKind::Read)
    }

    pub fn is_write(self) -> bool {
        matches!(self, RequestKind::Write)
    }
}

/// Reading/writing option bits carried alongside intent options; modeled
/// after the modifiers `FileAccessRequest.h` consults for cooperation
/// decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IntentOptions {
    pub for_uploading: bool,
    pub immediately_available_metadata_only: bool,
    pub without_changes: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    Queued,
    Ongoing,
    Complete,
    Failed,
}

#[derive(Debug, Clone)]
pub struct FileAccessRequest {
    pub token: CancellationToken,
    pub path: String,
    pub kind: RequestKind,
    pub options: IntentOptions,
    pub purpose_identifier: String,
    pub state: RequestState,
    pub is_directory_operation: bool,
}

impl FileAccessRequest {
    pub fn new(
        path: impl Into<String>,
        kind: RequestKind,
        options: IntentOptions,
        purpose_identifier: impl Into<String>,
    ) -> Self {
        FileAccessRequest {
            token: CancellationToken::new(),
            path: path.into(),
            kind,
            options,
            purpose_identifier: purpose_identifier.into(),
            state: RequestState::Queued,
            is_directory_operation: false,
        }
    }

    pub fn is_read_operation(&self) -> bool {
        self.kind.is_read()
    }

    pub fn is_write_operation(&self) -> bool {
        self.kind.is_write()
    }

    /// A write is always more restrictive than a read; among same-kind
    /// requests neither is more restrictive than the other.
    pub fn is_more_restrictive_than(&self, other: &FileAccessRequest) -> bool {
        self.kind.is_write() && other.kind.is_read()
    }

    /// Two requests may share a queue member iff both are reads, share a
    /// purpose identifier, and carry no conflicting modifier.
    pub fn can_cooperate_with(&self, other: &FileAccessRequest) -> bool {
        if !(self.kind.is_read() && other.kind.is_read()) {
            return false;
        }
        if self.purpose_identifier != other.purpose_identifier {
            return false;
        }
        if self.options.for_uploading != other.options.for_uploading {
            return false;
        }
        if self.options.immediately_available_metadata_only
            != other.options.immediately_available_metadata_only
        {
            return false;
        }
        true
    }

    pub fn start(&mut self) {
        self.state = RequestState::Ongoing;
    }

    pub fn complete(&mut self) {
        self.state = RequestState::Complete;
    }

    pub fn fail(&mut self) {
        self.state = RequestState::Failed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_is_more_restrictive_than_read() {
        let w = FileAccessRequest::new("/x", RequestKind::Write, IntentOptions::default(), "p");
        let r = FileAccessRequest::new("/x", RequestKind::Read, IntentOptions::default(), "p");
        assert!(w.is_more_restrictive_than(&r));
        assert!(!r.is_more_restrictive_than(&w));
    }

    #[test]
    fn reads_with_same_purpose_cooperate() {
        let a = FileAccessRequest::new("/x", RequestKind::Read, IntentOptions::default(), "p");
        let b = FileAccessRequest::new("/x", RequestKind::Read, IntentOptions::default(), "p");
        assert!(a.can_cooperate_with(&b));
    }

    #[test]
    fn reads_with_different_purpose_do_not_cooperate() {
        let a = FileAccessRequest::new("/x", RequestKind::Read, IntentOptions::default(), "p1");
        let b = FileAccessRequest::new("/x", RequestKind::Read, IntentOptions::default(), "p2");
        assert!(!a.can_cooperate_with(&b));
    }

    #[test]
    fn writes_never_cooperate() {
        let a = FileAccessRequest::new("/x", RequestKind::Write, IntentOptions::default(), "p");
        let b = FileAccessRequest::new("/x", RequestKind::Write, IntentOptions::default(), "p");
        assert!(!a.can_cooperate_with(&b));
    }
}
