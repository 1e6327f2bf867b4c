//! Actor scope: which part of the hierarchy is visible and mutable, and which
//! gateway endpoints (global vs "my department") serve it.

use futures::future;
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{HierarchyError, ScopeViolation};
use crate::gateway::{HierarchyReader, HierarchyWriter};
use crate::model::{Actor, ClassFilter, Department, EntityKind, EntityRequest, Level, Role};
use crate::model::{Class, UserRecord};
use crate::path::{ListKind, SelectionPath};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScopeContext {
    pub role: Role,
    pub bound_department_id: Option<String>,
}

impl ScopeContext {
    pub fn admin() -> Self {
        Self {
            role: Role::Admin,
            bound_department_id: None,
        }
    }

    pub fn chief(department_id: impl Into<String>) -> Self {
        Self {
            role: Role::Chief,
            bound_department_id: Some(department_id.into()),
        }
    }

    pub fn bound(&self) -> Option<&str> {
        self.bound_department_id.as_deref()
    }

    pub fn is_chief(&self) -> bool {
        self.role == Role::Chief
    }

    /// Fails when `department_id` is not the bound department.
    pub fn check_department(&self, department_id: Option<&str>) -> Result<(), ScopeViolation> {
        match self.bound() {
            Some(bound) if department_id != Some(bound) => Err(ScopeViolation::ForeignDepartment {
                requested: department_id.map(str::to_string),
                bound: bound.to_string(),
            }),
            _ => Ok(()),
        }
    }

    fn require_admin(&self, operation: &'static str) -> Result<(), ScopeViolation> {
        if self.role == Role::Admin {
            Ok(())
        } else {
            Err(ScopeViolation::AdminOnly { operation })
        }
    }
}

pub fn resolve_scope(actor: &Actor) -> Result<ScopeContext, HierarchyError> {
    let scope = match actor.role {
        Role::Admin => ScopeContext::admin(),
        Role::Chief => {
            let bound = actor
                .department_id
                .as_deref()
                .map(str::trim)
                .filter(|d| !d.is_empty());
            match bound {
                Some(d) => ScopeContext::chief(d),
                None => {
                    warn!(actor = %actor.id, "chief has no department binding");
                    return Err(HierarchyError::MissingDepartmentBinding);
                }
            }
        }
        Role::Teacher | Role::Student => {
            return Err(ScopeViolation::AdminOnly {
                operation: "hierarchy management",
            }
            .into())
        }
    };
    debug!(actor = %actor.id, role = ?scope.role, bound = ?scope.bound_department_id, "scope resolved");
    Ok(scope)
}

pub fn authorize_selection(scope: &ScopeContext, path: &SelectionPath) -> bool {
    scope.check_department(path.department_id.as_deref()).is_ok()
}

/// Read endpoints picked by scope.
pub struct ScopedReader<'a> {
    reader: &'a dyn HierarchyReader,
    scope: &'a ScopeContext,
}

impl<'a> ScopedReader<'a> {
    pub fn new(reader: &'a dyn HierarchyReader, scope: &'a ScopeContext) -> Self {
        Self { reader, scope }
    }

    pub async fn departments(&self) -> Result<Vec<Department>, HierarchyError> {
        let res = if self.scope.is_chief() {
            self.reader.my_department().await.map(|d| vec![d])
        } else {
            self.reader.list_departments().await
        };
        res.map_err(|e| HierarchyError::fetch(ListKind::Departments, e))
    }

    /// `None` loads the union across every visible department.
    pub async fn levels(&self, department_id: Option<&str>) -> Result<Vec<Level>, HierarchyError> {
        let res = if self.scope.is_chief() {
            if department_id.is_some() {
                self.scope.check_department(department_id)?;
            }
            self.reader.my_levels().await
        } else {
            self.reader.list_levels(department_id).await
        };
        res.map_err(|e| HierarchyError::fetch(ListKind::Levels, e))
    }

    pub async fn classes(
        &self,
        department_id: Option<&str>,
        level_id: Option<&str>,
    ) -> Result<Vec<Class>, HierarchyError> {
        let res = if self.scope.is_chief() {
            if department_id.is_some() {
                self.scope.check_department(department_id)?;
            }
            self.reader.my_classes(level_id).await
        } else {
            let filter = ClassFilter {
                department_id: department_id.map(str::to_string),
                level_id: level_id.map(str::to_string),
            };
            self.reader.list_classes(&filter).await
        };
        res.map_err(|e| HierarchyError::fetch(ListKind::Classes, e))
    }

    /// Students and teachers of a class, fetched concurrently.
    pub async fn roster(
        &self,
        class_id: &str,
    ) -> Result<(Vec<UserRecord>, Vec<UserRecord>), HierarchyError> {
        let (students, teachers) = future::join(
            self.reader.class_students(class_id),
            self.reader.class_teachers(class_id),
        )
        .await;
        let students = students.map_err(|e| HierarchyError::fetch(ListKind::Roster, e))?;
        let teachers = teachers.map_err(|e| HierarchyError::fetch(ListKind::Roster, e))?;
        Ok((students, teachers))
    }
}

/// Write endpoints picked by scope. Chiefs go through the my-* endpoints and
/// may not touch departments.
pub struct ScopedWriter<'a> {
    writer: &'a dyn HierarchyWriter,
    scope: &'a ScopeContext,
}

impl<'a> ScopedWriter<'a> {
    pub fn new(writer: &'a dyn HierarchyWriter, scope: &'a ScopeContext) -> Self {
        Self { writer, scope }
    }

    /// Sends a validated request and returns the id of the written record.
    pub async fn submit(&self, request: &EntityRequest) -> Result<String, HierarchyError> {
        let kind = request.kind();
        let chief = self.scope.is_chief();
        let res = match request {
            EntityRequest::CreateDepartment(draft) => {
                self.scope.require_admin("creating a department")?;
                self.writer.create_department(draft).await.map(|d| d.id)
            }
            EntityRequest::UpdateDepartment { id, draft } => {
                self.scope.require_admin("editing a department")?;
                self.writer.update_department(id, draft).await.map(|d| d.id)
            }
            EntityRequest::CreateLevel(draft) => {
                self.scope.check_department(Some(draft.department_id.as_str()))?;
                let written = if chief {
                    self.writer.create_my_level(draft).await
                } else {
                    self.writer.create_level(draft).await
                };
                written.map(|l| l.id)
            }
            EntityRequest::UpdateLevel { id, draft } => {
                self.scope.check_department(Some(draft.department_id.as_str()))?;
                let written = if chief {
                    self.writer.update_my_level(id, draft).await
                } else {
                    self.writer.update_level(id, draft).await
                };
                written.map(|l| l.id)
            }
            EntityRequest::CreateClass(draft) => {
                self.scope.check_department(Some(draft.department_id.as_str()))?;
                let written = if chief {
                    self.writer.create_my_class(draft).await
                } else {
                    self.writer.create_class(draft).await
                };
                written.map(|c| c.id)
            }
            EntityRequest::UpdateClass { id, draft } => {
                self.scope.check_department(Some(draft.department_id.as_str()))?;
                let written = if chief {
                    self.writer.update_my_class(id, draft).await
                } else {
                    self.writer.update_class(id, draft).await
                };
                written.map(|c| c.id)
            }
        };
        res.map_err(|e| HierarchyError::from_gateway(kind, e))
    }

    pub async fn delete(&self, kind: EntityKind, id: &str) -> Result<(), HierarchyError> {
        let chief = self.scope.is_chief();
        let res = match kind {
            EntityKind::Department => {
                self.scope.require_admin("deleting a department")?;
                self.writer.delete_department(id).await
            }
            EntityKind::Level if chief => self.writer.delete_my_level(id).await,
            EntityKind::Level => self.writer.delete_level(id).await,
            EntityKind::Class if chief => self.writer.delete_my_class(id).await,
            EntityKind::Class => self.writer.delete_class(id).await,
            EntityKind::Course | EntityKind::User => {
                return Err(HierarchyError::validation(
                    "kind",
                    format!("{kind} records are not deleted from the hierarchy browser"),
                ))
            }
        };
        res.map_err(|e| HierarchyError::from_gateway(kind, e))
    }

    pub async fn remove_students(
        &self,
        class_id: &str,
        student_ids: &[String],
    ) -> Result<usize, HierarchyError> {
        let res = match student_ids {
            [single] => self
                .writer
                .remove_student_from_class(class_id, single)
                .await
                .map(|_| 1),
            many => self.writer.remove_students_from_class(class_id, many).await,
        };
        res.map_err(|e| HierarchyError::from_gateway(EntityKind::Class, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn actor(role: Role, department_id: Option<&str>) -> Actor {
        Actor {
            id: "u1".into(),
            role,
            department_id: department_id.map(str::to_string),
        }
    }

    fn path(department_id: Option<&str>) -> SelectionPath {
        SelectionPath {
            department_id: department_id.map(str::to_string),
            level_id: None,
            class_id: None,
        }
    }

    #[test]
    fn chief_without_department_is_missing_binding() {
        let err = resolve_scope(&actor(Role::Chief, None)).unwrap_err();
        assert_eq!(err, HierarchyError::MissingDepartmentBinding);
        let err = resolve_scope(&actor(Role::Chief, Some("  "))).unwrap_err();
        assert_eq!(err.code(), "missing_department");
    }

    #[test]
    fn admin_scope_is_unbound() {
        let scope = resolve_scope(&actor(Role::Admin, Some("CS101"))).expect("scope");
        assert_eq!(scope.bound(), None);
        for d in ["CS101", "EE200", "anything"] {
            assert!(authorize_selection(&scope, &path(Some(d))));
        }
        assert!(authorize_selection(&scope, &path(None)));
    }

    #[test]
    fn chief_scope_rejects_foreign_departments() {
        let scope = resolve_scope(&actor(Role::Chief, Some("CS101"))).expect("scope");
        assert!(authorize_selection(&scope, &path(Some("CS101"))));
        assert!(!authorize_selection(&scope, &path(Some("EE200"))));
        assert!(!authorize_selection(&scope, &path(None)));
    }

    #[test]
    fn students_and_teachers_have_no_management_scope() {
        let err = resolve_scope(&actor(Role::Teacher, Some("CS101"))).unwrap_err();
        assert_eq!(err.code(), "scope_denied");
    }
}
