//! Create/edit form state bound to the hierarchy.
//!
//! Create sessions take their ancestor ids from the browsed path; edit
//! sessions take them from the record's own foreign keys and never follow the
//! browsed path. Ancestor changes in create mode cascade over form-local
//! option lists with their own version stamp.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::HierarchyError;
use crate::gateway::{HierarchyReader, HierarchyWriter};
use crate::model::{
    Class, ClassDraft, Department, DepartmentDraft, EntityKind, EntityRequest, Level, LevelDraft,
};
use crate::path::{Depth, ListKind, SelectionPath};
use crate::scope::{ScopeContext, ScopedReader, ScopedWriter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FormKind {
    Department,
    Level,
    Class,
}

impl FormKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "department" => Some(Self::Department),
            "level" => Some(Self::Level),
            "class" => Some(Self::Class),
            _ => None,
        }
    }

    pub fn entity(self) -> EntityKind {
        match self {
            Self::Department => EntityKind::Department,
            Self::Level => EntityKind::Level,
            Self::Class => EntityKind::Class,
        }
    }

    /// Cached browse list holding records of this kind.
    pub fn list(self) -> ListKind {
        match self {
            Self::Department => ListKind::Departments,
            Self::Level => ListKind::Levels,
            Self::Class => ListKind::Classes,
        }
    }

    fn has_ancestor(self, depth: Depth) -> bool {
        matches!(
            (self, depth),
            (Self::Level, Depth::Department)
                | (Self::Class, Depth::Department)
                | (Self::Class, Depth::Level)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "mode", rename_all = "camelCase")]
pub enum FormMode {
    Create,
    Edit { id: String },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormFields {
    pub name: String,
    pub code: String,
    pub specialty: String,
    pub formation_type: String,
    pub active: bool,
    pub year: Option<u8>,
    pub capacity: Option<i64>,
    pub department_id: Option<String>,
    pub level_id: Option<String>,
}

/// Editable, non-ancestor fields. Ancestors only move through
/// [`FormBindingController::change_ancestor`].
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct FieldsPatch {
    pub name: Option<String>,
    pub code: Option<String>,
    pub specialty: Option<String>,
    pub formation_type: Option<String>,
    pub active: Option<bool>,
    pub year: Option<u8>,
    pub capacity: Option<i64>,
}

#[derive(Debug, Clone)]
pub enum EditTarget {
    Department(Department),
    Level(Level),
    Class(Class),
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FormSession {
    pub kind: FormKind,
    #[serde(flatten)]
    pub mode: FormMode,
    pub fields: FormFields,
    #[serde(skip)]
    pristine: FormFields,
    pub level_options: Vec<Level>,
    pub options_error: Option<String>,
    pub error: Option<String>,
}

impl FormSession {
    pub fn is_dirty(&self) -> bool {
        self.fields != self.pristine
    }

    pub fn is_create(&self) -> bool {
        self.mode == FormMode::Create
    }
}

/// Load request for the level options of one department.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptionsTicket {
    pub version: u64,
    pub department_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitOutcome {
    pub kind: FormKind,
    pub id: String,
    pub created: bool,
    /// Browse list to re-fetch so the change shows up.
    pub refresh: ListKind,
}

pub struct FormBindingController {
    scope: ScopeContext,
    session: Option<FormSession>,
    version: u64,
}

impl FormBindingController {
    pub fn new(scope: ScopeContext) -> Self {
        Self {
            scope,
            session: None,
            version: 0,
        }
    }

    pub fn session(&self) -> Option<&FormSession> {
        self.session.as_ref()
    }

    pub fn is_open(&self) -> bool {
        self.session.is_some()
    }

    pub fn open_create(&mut self, kind: FormKind, defaults: &SelectionPath) -> Option<OptionsTicket> {
        // Only departments carry an active flag.
        let mut fields = FormFields {
            active: kind == FormKind::Department,
            ..FormFields::default()
        };
        self.seed_ancestors(kind, &mut fields, defaults);
        debug!(kind = ?kind, department = ?fields.department_id, level = ?fields.level_id, "create form opened");
        self.open(kind, FormMode::Create, fields)
    }

    pub fn open_edit(&mut self, target: EditTarget) -> Option<OptionsTicket> {
        let (kind, id, fields) = match target {
            EditTarget::Department(d) => (
                FormKind::Department,
                d.id,
                FormFields {
                    name: d.name,
                    code: d.code,
                    specialty: d.specialty,
                    formation_type: d.formation_type,
                    active: d.active,
                    ..FormFields::default()
                },
            ),
            EditTarget::Level(l) => (
                FormKind::Level,
                l.id,
                FormFields {
                    name: l.name,
                    code: l.code,
                    year: Some(l.year),
                    department_id: Some(l.department_id),
                    ..FormFields::default()
                },
            ),
            EditTarget::Class(c) => (
                FormKind::Class,
                c.id,
                FormFields {
                    name: c.name,
                    code: c.code,
                    capacity: Some(c.capacity),
                    department_id: Some(c.department_id),
                    level_id: Some(c.level_id),
                    ..FormFields::default()
                },
            ),
        };
        debug!(kind = ?kind, id = %id, "edit form opened");
        self.open(kind, FormMode::Edit { id }, fields)
    }

    fn open(&mut self, kind: FormKind, mode: FormMode, fields: FormFields) -> Option<OptionsTicket> {
        self.version += 1;
        self.session = Some(FormSession {
            kind,
            mode,
            pristine: fields.clone(),
            fields,
            level_options: Vec::new(),
            options_error: None,
            error: None,
        });
        self.options_ticket()
    }

    pub fn close(&mut self) {
        self.version += 1;
        self.session = None;
    }

    /// Follows a browse-path change. Only create sessions are re-seeded; an
    /// edit session stays on the record's own ancestors.
    pub fn reseed(&mut self, path: &SelectionPath) -> Option<OptionsTicket> {
        let session = self.session.as_ref()?;
        if !session.is_create() {
            return None;
        }
        let kind = session.kind;
        let mut ancestors = FormFields::default();
        self.seed_ancestors(kind, &mut ancestors, path);

        let session = self.session.as_mut()?;
        let department_changed = session.fields.department_id != ancestors.department_id;
        session.fields.department_id = ancestors.department_id.clone();
        session.fields.level_id = ancestors.level_id.clone();
        session.pristine.department_id = ancestors.department_id;
        session.pristine.level_id = ancestors.level_id;
        if !department_changed {
            return None;
        }
        session.level_options.clear();
        session.options_error = None;
        self.version += 1;
        self.options_ticket()
    }

    /// Moves an ancestor of a record being created. Clears the descendant
    /// ancestor and issues a reload of the form-local level options.
    pub fn change_ancestor(
        &mut self,
        depth: Depth,
        id: Option<String>,
    ) -> Result<Option<OptionsTicket>, HierarchyError> {
        let id = id.map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let session = self
            .session
            .as_ref()
            .ok_or_else(|| HierarchyError::validation("form", "no form is open"))?;
        if !session.is_create() {
            return Err(HierarchyError::validation(
                "ancestor",
                "an existing record cannot be moved under another parent",
            ));
        }
        if !session.kind.has_ancestor(depth) {
            return Err(HierarchyError::validation(
                "ancestor",
                format!("a {} has no {:?} parent", session.kind.entity(), depth),
            ));
        }
        if depth == Depth::Department {
            self.scope.check_department(id.as_deref())?;
        }
        if depth == Depth::Level {
            if let Some(level_id) = id.as_deref() {
                if session.fields.department_id.is_none() {
                    return Err(HierarchyError::validation(
                        "departmentId",
                        "Select a department first.",
                    ));
                }
                // Options not loaded yet (or failed): the gateway checks on submit.
                let loaded = !session.level_options.is_empty();
                if loaded && !session.level_options.iter().any(|l| l.id == level_id) {
                    return Err(HierarchyError::validation(
                        "levelId",
                        "level belongs to another department",
                    ));
                }
            }
        }

        let Some(session) = self.session.as_mut() else {
            return Ok(None);
        };
        session.error = None;
        match depth {
            Depth::Department => {
                session.fields.department_id = id;
                session.fields.level_id = None;
                session.level_options.clear();
                session.options_error = None;
                self.version += 1;
                Ok(self.options_ticket())
            }
            Depth::Level => {
                session.fields.level_id = id;
                Ok(None)
            }
            Depth::Class => Ok(None),
        }
    }

    /// Stores loaded level options unless the ticket went stale.
    pub fn apply_options(
        &mut self,
        ticket: &OptionsTicket,
        outcome: Result<Vec<Level>, HierarchyError>,
    ) -> bool {
        if ticket.version != self.version {
            debug!(department = %ticket.department_id, "discarding stale form options");
            return false;
        }
        let Some(session) = self.session.as_mut() else {
            return false;
        };
        if session.fields.department_id.as_deref() != Some(ticket.department_id.as_str()) {
            return false;
        }
        match outcome {
            Ok(levels) => {
                session.level_options = levels;
                session.options_error = None;
            }
            Err(e) => {
                warn!(department = %ticket.department_id, error = %e, "form options failed to load");
                session.level_options.clear();
                session.options_error = Some(e.user_message());
            }
        }
        true
    }

    pub fn patch(&mut self, patch: FieldsPatch) -> Result<(), HierarchyError> {
        let session = self
            .session
            .as_mut()
            .ok_or_else(|| HierarchyError::validation("form", "no form is open"))?;
        let f = &mut session.fields;
        if let Some(v) = patch.name {
            f.name = v;
        }
        if let Some(v) = patch.code {
            f.code = v;
        }
        if let Some(v) = patch.specialty {
            f.specialty = v;
        }
        if let Some(v) = patch.formation_type {
            f.formation_type = v;
        }
        if let Some(v) = patch.active {
            f.active = v;
        }
        if let Some(v) = patch.year {
            f.year = Some(v);
        }
        if let Some(v) = patch.capacity {
            f.capacity = Some(v);
        }
        Ok(())
    }

    /// Restores the fields the session was opened with.
    pub fn reset(&mut self) -> Option<OptionsTicket> {
        let session = self.session.as_mut()?;
        let department_changed = session.fields.department_id != session.pristine.department_id;
        session.fields = session.pristine.clone();
        session.error = None;
        if !department_changed {
            return None;
        }
        session.level_options.clear();
        self.version += 1;
        self.options_ticket()
    }

    /// Checks local preconditions and builds the request. No gateway involved.
    pub fn validate(&self) -> Result<EntityRequest, HierarchyError> {
        let session = self
            .session
            .as_ref()
            .ok_or_else(|| HierarchyError::validation("form", "no form is open"))?;
        let f = &session.fields;
        let name = f.name.trim().to_string();
        if name.is_empty() {
            return Err(HierarchyError::validation("name", "Name is required."));
        }
        let code = f.code.trim().to_string();
        let edit_id = match &session.mode {
            FormMode::Create => None,
            FormMode::Edit { id } => Some(id.clone()),
        };

        let request = match session.kind {
            FormKind::Department => {
                let draft = DepartmentDraft {
                    name,
                    code,
                    specialty: f.specialty.trim().to_string(),
                    formation_type: f.formation_type.trim().to_string(),
                    active: f.active,
                };
                match edit_id {
                    Some(id) => EntityRequest::UpdateDepartment { id, draft },
                    None => EntityRequest::CreateDepartment(draft),
                }
            }
            FormKind::Level => {
                let department_id = required(&f.department_id, "departmentId", "Select a department first.")?;
                let year = match f.year {
                    Some(y @ 1..=5) => y,
                    Some(_) => {
                        return Err(HierarchyError::validation(
                            "year",
                            "Year in program must be between 1 and 5.",
                        ))
                    }
                    None => return Err(HierarchyError::validation("year", "Year in program is required.")),
                };
                let draft = LevelDraft {
                    name,
                    code,
                    year,
                    department_id,
                };
                match edit_id {
                    Some(id) => EntityRequest::UpdateLevel { id, draft },
                    None => EntityRequest::CreateLevel(draft),
                }
            }
            FormKind::Class => {
                let department_id = required(&f.department_id, "departmentId", "Select a department first.")?;
                let level_id = required(&f.level_id, "levelId", "Select a level first.")?;
                if matches!(f.capacity, Some(c) if c <= 0) {
                    return Err(HierarchyError::validation("capacity", "Capacity must be positive."));
                }
                let draft = ClassDraft {
                    name,
                    code,
                    capacity: f.capacity.unwrap_or(0),
                    department_id,
                    level_id,
                };
                match edit_id {
                    Some(id) => EntityRequest::UpdateClass { id, draft },
                    None => EntityRequest::CreateClass(draft),
                }
            }
        };
        Ok(request)
    }

    /// Validates, then writes through the scoped endpoints. On success the
    /// session closes; on failure it stays open with its fields intact.
    pub async fn submit(
        &mut self,
        writer: &dyn HierarchyWriter,
    ) -> Result<SubmitOutcome, HierarchyError> {
        let request = match self.validate() {
            Ok(r) => r,
            Err(e) => {
                self.surface(&e);
                return Err(e);
            }
        };
        let Some(kind) = self.session.as_ref().map(|s| s.kind) else {
            return Err(HierarchyError::validation("form", "no form is open"));
        };
        let created = matches!(
            request,
            EntityRequest::CreateDepartment(_)
                | EntityRequest::CreateLevel(_)
                | EntityRequest::CreateClass(_)
        );

        match ScopedWriter::new(writer, &self.scope).submit(&request).await {
            Ok(id) => {
                info!(kind = ?kind, id = %id, created, "form submitted");
                self.close();
                Ok(SubmitOutcome {
                    kind,
                    id,
                    created,
                    refresh: kind.list(),
                })
            }
            Err(e) => {
                warn!(kind = ?kind, error = %e, "form submission failed");
                self.surface(&e);
                Err(e)
            }
        }
    }

    /// Deletes a record. Dependent-children refusals come back as
    /// `HierarchyError::Conflict`. Returns the browse list to re-fetch.
    pub async fn delete(
        &self,
        writer: &dyn HierarchyWriter,
        kind: FormKind,
        id: &str,
    ) -> Result<ListKind, HierarchyError> {
        match ScopedWriter::new(writer, &self.scope)
            .delete(kind.entity(), id)
            .await
        {
            Ok(()) => {
                info!(kind = ?kind, id = %id, "record deleted");
                Ok(kind.list())
            }
            Err(e) => {
                warn!(kind = ?kind, id = %id, code = e.code(), "delete refused");
                Err(e)
            }
        }
    }

    pub async fn load_options(&mut self, reader: &dyn HierarchyReader, ticket: Option<OptionsTicket>) {
        let Some(ticket) = ticket else {
            return;
        };
        let outcome = ScopedReader::new(reader, &self.scope)
            .levels(Some(ticket.department_id.as_str()))
            .await;
        self.apply_options(&ticket, outcome);
    }

    fn surface(&mut self, e: &HierarchyError) {
        if let Some(session) = self.session.as_mut() {
            session.error = Some(e.user_message());
        }
    }

    fn seed_ancestors(&self, kind: FormKind, fields: &mut FormFields, path: &SelectionPath) {
        let department = self
            .scope
            .bound()
            .map(str::to_string)
            .or_else(|| path.department_id.clone());
        match kind {
            FormKind::Department => {}
            FormKind::Level => fields.department_id = department,
            FormKind::Class => {
                // A level from the path only makes sense under that path's department.
                let same_department = department == path.department_id;
                fields.department_id = department;
                fields.level_id = if same_department {
                    path.level_id.clone()
                } else {
                    None
                };
            }
        }
    }

    fn options_ticket(&self) -> Option<OptionsTicket> {
        let session = self.session.as_ref()?;
        if session.kind != FormKind::Class {
            return None;
        }
        session
            .fields
            .department_id
            .clone()
            .map(|department_id| OptionsTicket {
                version: self.version,
                department_id,
            })
    }
}

fn required(
    value: &Option<String>,
    field: &'static str,
    message: &str,
) -> Result<String, HierarchyError> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or_else(|| HierarchyError::validation(field, message))
}
