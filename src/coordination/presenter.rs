//! Presenter round-trip notification protocol: the server tells every
//! registered presenter of a path (and its relevant ancestors/descendants)
//! about a pending access and waits for each to acknowledge before letting
//! the request proceed.

use async_trait::async_trait;

use crate::error::FcResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenterNotificationKind {
    RelinquishToReader,
    RelinquishToWriter,
    ReacquireAccess,
    Save,
    PrepareForDeletion,
    DidMove,
    DidChange,
    DidGainVersion,
    DidLoseVersion,
    DidResolveVersionConflict,
    DidChangeUbiquity,
    NewChildDidAppear,
}

#[derive(Debug, Clone)]
pub struct PresenterNotification {
    pub kind: PresenterNotificationKind,
    pub path: String,
    pub new_path: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenterAck {
    Ok,
    Error,
}

/// A presenter registered for a path. Each registered observer must
/// acknowledge a notification before the arbiter advances the request that
/// triggered it.
#[async_trait]
pub trait Presenter: Send + Sync {
    async fn notify(&self, notification: &PresenterNotification) -> FcResult<PresenterAck>;
}

/// Sends `notification` to every presenter and returns `Ok` only if all of
/// them acknowledged `PresenterAck::Ok`. Any single `Error` fails the whole
/// round trip, matching "each presenter must acknowledge Ok or Error; on any
/// Error, fail the request".
pub async fn round_trip(
    presenters: &[std::sync::Arc<dyn Presenter>],
    notification: &PresenterNotification,
) -> FcResult<()> {
    for presenter in presenters {
        match presenter.notify(notification).await? {
            PresenterAck::Ok => continue,
            PresenterAck::Error => {
                return Err(crate::error::FcError::OperationDenied {
                    reason: "presenter denied access".to_string(),
                })
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    struct AlwaysOk;
    #[async_trait]
    impl Presenter for AlwaysOk {
        async fn notify(&self, _n: &PresenterNotification) -> FcResult<PresenterAck> {
            Ok(PresenterAck::Ok)
        }
    }

    struct AlwaysError;
    #[async_trait]
    impl Presenter for AlwaysError {
        async fn notify(&self, _n: &PresenterNotification) -> FcResult<PresenterAck> {
            Ok(PresenterAck::Error)
        }
    }

    #[tokio::test]
    async fn all_ok_succeeds() {
        let presenters: Vec<Arc<dyn Presenter>> = vec![Arc::new(AlwaysOk), Arc::new(AlwaysOk)];
        let notification = PresenterNotification {
            kind: PresenterNotificationKind::RelinquishToWriter,
            path: "/x".into(),
            new_path: None,
        };
        assert!(round_trip(&presenters, &notification).await.is_ok());
    }

    #[tokio::test]
    async fn one_error_fails_round_trip() {
        let presenters: Vec<Arc<dyn Presenter>> = vec![Arc::new(AlwaysOk), Arc::new(AlwaysError)];
        let notification = PresenterNotification {
            kind: PresenterNotificationKind::RelinquishToReader,
            path: "/x".into(),
            new_path: None,
        };
        assert!(round_trip(&presenters, &notification).await.is_err());
    }
}
