//! Error types for the SDK bridge.
//!
//! [`BackendFault`] is what the SDK itself raises. [`BridgeError`] is what
//! this layer reports to callers; every variant maps onto one of the five
//! [`ErrorKind`]s that decide how the publish workflow reacts.

use std::fmt;

/// An exception raised inside the SDK.
///
/// Reflective invocation wraps the real exception in an outer
/// "target invocation" fault; `inner` holds the original.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendFault {
    /// Runtime type of the fault (e.g. `HttpRequestException`).
    pub type_name: String,
    pub message: String,
    pub inner: Option<Box<BackendFault>>,
}

impl BackendFault {
    pub fn new(type_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            message: message.into(),
            inner: None,
        }
    }

    /// Wrap `inner` in an outer fault, as the SDK's invocation layer does.
    pub fn wrapping(type_name: impl Into<String>, inner: BackendFault) -> Self {
        Self {
            type_name: type_name.into(),
            message: "Exception has been thrown by the target of an invocation.".to_string(),
            inner: Some(Box::new(inner)),
        }
    }

    /// Peel exactly one wrapper layer; a bare fault is returned unchanged.
    pub fn unwrap_one(self) -> BackendFault {
        match self.inner {
            Some(inner) => *inner,
            None => self,
        }
    }
}

impl fmt::Display for BackendFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.type_name, self.message)?;
        if let Some(inner) = &self.inner {
            write!(f, " ---> {}", inner)?;
        }
        Ok(())
    }
}

impl std::error::Error for BackendFault {}

/// The five failure categories the workflow partitions on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// A required SDK type or member is missing (usually a version mismatch).
    NotFound,
    /// A resolved member was called and failed.
    InvocationError,
    /// A carrier/mapping invariant was broken.
    ContractViolation,
    /// A fulfillment phase failed on the remote side.
    WorkflowFailure,
    Cancelled,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::NotFound => "NotFound",
            ErrorKind::InvocationError => "InvocationError",
            ErrorKind::ContractViolation => "ContractViolation",
            ErrorKind::WorkflowFailure => "WorkflowFailure",
            ErrorKind::Cancelled => "Cancelled",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone)]
pub enum BridgeError {
    /// Type or member could not be resolved.
    NotFound {
        owner: String,
        member: String,
        detail: Option<String>,
    },

    /// Invoking a resolved member raised a fault (already unwrapped one layer).
    Invocation {
        owner: String,
        member: String,
        fault: BackendFault,
    },

    /// A result envelope reported failure.
    Rejected {
        response_type: String,
        payload: String,
    },

    /// No normalization rule produced the requested type.
    Coercion {
        target: String,
        response_type: String,
        value_type: Option<String>,
    },

    ContractViolation { message: String },

    /// Remote service reported a failed or stuck fulfillment.
    Workflow { message: String },

    /// Local I/O failed while preparing a call.
    Io { message: String },

    Cancelled { during: String },
}

impl BridgeError {
    pub fn not_found(owner: impl Into<String>, member: impl Into<String>) -> Self {
        BridgeError::NotFound {
            owner: owner.into(),
            member: member.into(),
            detail: None,
        }
    }

    pub fn contract(message: impl Into<String>) -> Self {
        BridgeError::ContractViolation {
            message: message.into(),
        }
    }

    pub fn workflow(message: impl Into<String>) -> Self {
        BridgeError::Workflow {
            message: message.into(),
        }
    }

    pub fn cancelled(during: impl Into<String>) -> Self {
        BridgeError::Cancelled {
            during: during.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            BridgeError::NotFound { .. } => ErrorKind::NotFound,
            BridgeError::Invocation { .. }
            | BridgeError::Rejected { .. }
            | BridgeError::Coercion { .. }
            | BridgeError::Io { .. } => ErrorKind::InvocationError,
            BridgeError::ContractViolation { .. } => ErrorKind::ContractViolation,
            BridgeError::Workflow { .. } => ErrorKind::WorkflowFailure,
            BridgeError::Cancelled { .. } => ErrorKind::Cancelled,
        }
    }

    /// NotFound and ContractViolation must never be swallowed.
    pub fn must_surface(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::NotFound | ErrorKind::ContractViolation
        )
    }
}

impl fmt::Display for BridgeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BridgeError::NotFound {
                owner,
                member,
                detail,
            } => {
                write!(f, "NotFound: {}::{}", owner, member)?;
                if let Some(d) = detail {
                    write!(f, " ({})", d)?;
                }
                Ok(())
            }
            BridgeError::Invocation {
                owner,
                member,
                fault,
            } => write!(f, "InvocationError: {}::{} failed: {}", owner, member, fault),
            BridgeError::Rejected {
                response_type,
                payload,
            } => write!(f, "InvocationError: {} reported failure: {}", response_type, payload),
            BridgeError::Coercion {
                target,
                response_type,
                value_type,
            } => {
                write!(
                    f,
                    "InvocationError: cannot convert response {} to {}",
                    response_type, target
                )?;
                if let Some(vt) = value_type {
                    write!(f, " (value member is {})", vt)?;
                }
                Ok(())
            }
            BridgeError::ContractViolation { message } => {
                write!(f, "ContractViolation: {}", message)
            }
            BridgeError::Workflow { message } => write!(f, "WorkflowFailure: {}", message),
            BridgeError::Io { message } => write!(f, "InvocationError: local I/O: {}", message),
            BridgeError::Cancelled { during } => write!(f, "Cancelled during {}", during),
        }
    }
}

impl std::error::Error for BridgeError {}

impl From<anyhow::Error> for BridgeError {
    fn from(err: anyhow::Error) -> Self {
        BridgeError::Io {
            message: format!("{:#}", err),
        }
    }
}

impl From<std::io::Error> for BridgeError {
    fn from(err: std::io::Error) -> Self {
        BridgeError::Io {
            message: err.to_string(),
        }
    }
}

pub type BridgeResult<T> = std::result::Result<T, BridgeError>;
