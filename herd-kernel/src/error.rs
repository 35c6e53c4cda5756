//! Error taxonomy for the host lifecycle core.
//!
//! Every mutator returns one of these values instead of logging and carrying
//! on, so the caller always knows whether the in-memory host, the durable copy
//! and the downstream collaborators agree.

use crate::host::{HostEventKind, HostState};
use crate::store::StoreError;

/// Failure raised by a notification sink, membership lookup or event publisher.
#[derive(Debug, thiserror::Error)]
pub enum CollaboratorError {
    #[error("topology sink failed: {0}")]
    Sink(String),
    #[error("cluster membership lookup failed: {0}")]
    Membership(String),
    #[error("config lookup failed: {0}")]
    ConfigLookup(String),
    #[error("event publisher failed: {0}")]
    Publisher(String),
}

#[derive(Debug, thiserror::Error)]
pub enum HostError {
    #[error("invalid event {event} for host {host_name} at state {state}")]
    InvalidTransition {
        host_name: String,
        state: HostState,
        event: HostEventKind,
    },
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("host name of persisted host {host_name} cannot be modified")]
    HostNameFrozen { host_name: String },
    #[error("host not found: {0}")]
    HostNotFound(String),
    #[error("host {0} is not persisted yet, call persist() to create its record")]
    NotPersisted(String),
    #[error("durable store write failed for host {host_name}: {source}")]
    Persistence {
        host_name: String,
        #[source]
        source: StoreError,
    },
    #[error("collaborator call failed for host {host_name}: {source}")]
    Collaborator {
        host_name: String,
        #[source]
        source: CollaboratorError,
    },
}

/// Coarse category of a [`HostError`], for callers mapping failures to
/// status codes or retry policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    InvalidTransition,
    InvalidArgument,
    NotFound,
    Persistence,
    Collaborator,
}

impl HostError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            HostError::InvalidTransition { .. } => ErrorCategory::InvalidTransition,
            HostError::InvalidArgument(_)
            | HostError::HostNameFrozen { .. }
            | HostError::NotPersisted(_) => ErrorCategory::InvalidArgument,
            HostError::HostNotFound(_) => ErrorCategory::NotFound,
            HostError::Persistence { .. } => ErrorCategory::Persistence,
            HostError::Collaborator { .. } => ErrorCategory::Collaborator,
        }
    }

    /// True when the in-memory host moved ahead of its durable copy.
    /// `Host::refresh()` resyncs it: a persisted host is reloaded from the
    /// store, a host whose first write failed gets its record created.
    pub fn needs_resync(&self) -> bool {
        matches!(self, HostError::Persistence { .. })
    }

    pub(crate) fn persistence(host_name: &str, source: StoreError) -> Self {
        HostError::Persistence {
            host_name: host_name.to_string(),
            source,
        }
    }

    pub(crate) fn collaborator(host_name: &str, source: CollaboratorError) -> Self {
        HostError::Collaborator {
            host_name: host_name.to_string(),
            source,
        }
    }
}

pub type HostResult<T> = Result<T, HostError>;
