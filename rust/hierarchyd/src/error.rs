use serde_json::json;
use thiserror::Error;

use crate::model::EntityKind;
use crate::path::ListKind;

/// Failures reported by a gateway implementation. Opaque to the core except
/// for `Conflict`, which carries the refused delete's dependents.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GatewayError {
    #[error("{kind} {id} still has {dependents}")]
    Conflict {
        kind: EntityKind,
        id: String,
        dependents: String,
    },
    #[error("{kind} {id} not found")]
    NotFound { kind: EntityKind, id: String },
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("{0}")]
    Failed(String),
}

impl From<rusqlite::Error> for GatewayError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Failed(e.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ScopeViolation {
    #[error("department {requested:?} is outside the bound department {bound}")]
    ForeignDepartment {
        requested: Option<String>,
        bound: String,
    },
    #[error("{operation} is reserved to administrators")]
    AdminOnly { operation: &'static str },
    #[error("refused by the server: {0}")]
    Refused(String),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum HierarchyError {
    #[error("scope violation: {0}")]
    Scope(#[from] ScopeViolation),
    #[error("no department assigned")]
    MissingDepartmentBinding,
    #[error("{field}: {message}")]
    Validation {
        field: &'static str,
        message: String,
    },
    #[error("{kind} cannot be deleted: {message}")]
    Conflict { kind: EntityKind, message: String },
    #[error("failed to load {list}: {message}")]
    Fetch { list: ListKind, message: String },
    #[error("failed to save {kind}: {message}")]
    Rejected { kind: EntityKind, message: String },
}

impl HierarchyError {
    pub fn validation(field: &'static str, message: impl Into<String>) -> Self {
        Self::Validation {
            field,
            message: message.into(),
        }
    }

    pub fn fetch(list: ListKind, e: impl std::fmt::Display) -> Self {
        Self::Fetch {
            list,
            message: e.to_string(),
        }
    }

    /// Maps a refused write or delete. Conflicts get a message telling the
    /// user which children to remove first.
    pub fn from_gateway(kind: EntityKind, e: GatewayError) -> Self {
        match e {
            GatewayError::Conflict { kind, .. } => Self::Conflict {
                kind,
                message: conflict_message(kind).to_string(),
            },
            GatewayError::Forbidden(reason) => Self::Scope(ScopeViolation::Refused(reason)),
            other => Self::Rejected {
                kind,
                message: other.to_string(),
            },
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::Scope(_) => "scope_denied",
            Self::MissingDepartmentBinding => "missing_department",
            Self::Validation { .. } => "validation_failed",
            Self::Conflict { .. } => "conflict",
            Self::Fetch { .. } => "fetch_failed",
            Self::Rejected { .. } => "save_failed",
        }
    }

    pub fn user_message(&self) -> String {
        match self {
            Self::Scope(_) => "This selection is outside your department.".to_string(),
            Self::MissingDepartmentBinding => "No department assigned to your account.".to_string(),
            Self::Validation { message, .. } => message.clone(),
            Self::Conflict { message, .. } => message.clone(),
            Self::Fetch { list, .. } => format!("Could not load {list}. Please try again."),
            Self::Rejected { kind, message } => format!("Could not save the {kind}: {message}"),
        }
    }

    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            Self::Validation { field, .. } => Some(json!({ "field": field })),
            Self::Conflict { kind, .. } => Some(json!({ "kind": kind })),
            Self::Fetch { list, message } => Some(json!({ "list": list, "cause": message })),
            Self::Rejected { kind, .. } => Some(json!({ "kind": kind })),
            Self::Scope(v) => Some(json!({ "cause": v.to_string() })),
            Self::MissingDepartmentBinding => None,
        }
    }
}

fn conflict_message(kind: EntityKind) -> &'static str {
    match kind {
        EntityKind::Department => {
            "This department still has levels. Remove its levels first, then delete it."
        }
        EntityKind::Level => {
            "This level still has classes. Remove its classes first, then delete it."
        }
        EntityKind::Class => {
            "This class still has students. Remove its students first, then delete it."
        }
        EntityKind::Course => {
            "This course still has teacher assignments. Remove them first, then delete it."
        }
        EntityKind::User => "This user is still referenced. Unassign them first.",
    }
}
