//! Browse-mode selection cascade.
//!
//! Changing the selection at depth `d` clears every field and cached list
//! below `d` and issues a [`FetchTicket`] for the list at `d + 1`. A fetched
//! list auto-selects its first element and issues the next ticket, down to the
//! roster. Every path change bumps a version stamp; a ticket whose stamp no
//! longer matches is stale and its outcome is dropped in [`SelectionCascade::apply`].
//!
//! Tickets are plain data so hosts can run fetches however they like. The
//! async driver ([`SelectionCascade::drive`]) fetches them one after another
//! through a [`HierarchyReader`].

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{HierarchyError, ScopeViolation};
use crate::gateway::HierarchyReader;
use crate::model::{Class, Department, Level, UserRecord};
use crate::path::{Depth, ListKind, SelectionPath, Stage};
use crate::scope::{authorize_selection, ScopeContext, ScopedReader};

/// What to select once a list arrives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pick {
    First,
    /// Keep this id if still listed, otherwise fall back to the first element.
    Keep(String),
    /// Union ("show all") loads never drill down.
    Nothing,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchTicket {
    pub version: u64,
    pub list: ListKind,
    pub department_id: Option<String>,
    pub level_id: Option<String>,
    pub class_id: Option<String>,
    pub pick: Pick,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Fetched {
    Departments(Vec<Department>),
    Levels(Vec<Level>),
    Classes(Vec<Class>),
    Roster {
        students: Vec<UserRecord>,
        teachers: Vec<UserRecord>,
    },
}

impl Fetched {
    pub fn list(&self) -> ListKind {
        match self {
            Self::Departments(_) => ListKind::Departments,
            Self::Levels(_) => ListKind::Levels,
            Self::Classes(_) => ListKind::Classes,
            Self::Roster { .. } => ListKind::Roster,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Applied {
    /// The path moved on since the ticket was issued; outcome dropped.
    Stale,
    Settled,
    Next(FetchTicket),
}

/// Per-list load errors. A failure at one depth never touches shallower state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListErrors {
    pub departments_error: Option<String>,
    pub levels_error: Option<String>,
    pub classes_error: Option<String>,
    pub students_error: Option<String>,
}

impl ListErrors {
    fn slot(&mut self, list: ListKind) -> &mut Option<String> {
        match list {
            ListKind::Departments => &mut self.departments_error,
            ListKind::Levels => &mut self.levels_error,
            ListKind::Classes => &mut self.classes_error,
            ListKind::Roster => &mut self.students_error,
        }
    }

    pub fn get(&self, list: ListKind) -> Option<&str> {
        match list {
            ListKind::Departments => self.departments_error.as_deref(),
            ListKind::Levels => self.levels_error.as_deref(),
            ListKind::Classes => self.classes_error.as_deref(),
            ListKind::Roster => self.students_error.as_deref(),
        }
    }

    fn clear_from(&mut self, list: ListKind) {
        for l in [
            ListKind::Departments,
            ListKind::Levels,
            ListKind::Classes,
            ListKind::Roster,
        ] {
            if l >= list {
                *self.slot(l) = None;
            }
        }
    }
}

pub struct SelectionCascade {
    scope: ScopeContext,
    path: SelectionPath,
    version: u64,
    departments: Vec<Department>,
    levels: Vec<Level>,
    classes: Vec<Class>,
    students: Vec<UserRecord>,
    teachers: Vec<UserRecord>,
    roster_loaded: bool,
    errors: ListErrors,
    in_flight: Option<ListKind>,
}

impl SelectionCascade {
    pub fn new(scope: ScopeContext) -> Self {
        Self {
            scope,
            path: SelectionPath::default(),
            version: 0,
            departments: Vec::new(),
            levels: Vec::new(),
            classes: Vec::new(),
            students: Vec::new(),
            teachers: Vec::new(),
            roster_loaded: false,
            errors: ListErrors::default(),
            in_flight: None,
        }
    }

    pub fn scope(&self) -> &ScopeContext {
        &self.scope
    }

    pub fn path(&self) -> &SelectionPath {
        &self.path
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn departments(&self) -> &[Department] {
        &self.departments
    }

    pub fn levels(&self) -> &[Level] {
        &self.levels
    }

    pub fn classes(&self) -> &[Class] {
        &self.classes
    }

    pub fn students(&self) -> &[UserRecord] {
        &self.students
    }

    pub fn teachers(&self) -> &[UserRecord] {
        &self.teachers
    }

    pub fn errors(&self) -> &ListErrors {
        &self.errors
    }

    pub fn loading(&self) -> Option<ListKind> {
        self.in_flight
    }

    pub fn stage(&self) -> Stage {
        match self.path.deepest() {
            None => Stage::D0,
            Some(Depth::Department) => Stage::D1,
            Some(Depth::Level) => Stage::D2,
            Some(Depth::Class) if self.roster_loaded => Stage::D4,
            Some(Depth::Class) => Stage::D3,
        }
    }

    pub fn find_department(&self, id: &str) -> Option<&Department> {
        self.departments.iter().find(|d| d.id == id)
    }

    pub fn find_level(&self, id: &str) -> Option<&Level> {
        self.levels.iter().find(|l| l.id == id)
    }

    pub fn find_class(&self, id: &str) -> Option<&Class> {
        self.classes.iter().find(|c| c.id == id)
    }

    /// Resets everything and issues the root department load. Chiefs land on
    /// their bound department, admins on the first one listed.
    pub fn load_root(&mut self) -> FetchTicket {
        self.version += 1;
        self.path = SelectionPath::default();
        self.departments.clear();
        self.clear_from(ListKind::Levels);
        self.errors = ListErrors::default();
        let pick = match self.scope.bound() {
            Some(bound) => Pick::Keep(bound.to_string()),
            None => Pick::First,
        };
        self.issue(ListKind::Departments, pick)
    }

    /// Selects `id` at `depth` (or clears it with `None`), invalidating every
    /// deeper selection and cached list. Returns the ticket for the list that
    /// now needs loading, if any. The path is untouched on error.
    pub fn select_at(
        &mut self,
        depth: Depth,
        id: Option<String>,
    ) -> Result<Option<FetchTicket>, HierarchyError> {
        let id = id.map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let mut candidate = self.path.with(depth, id.clone());

        // Levels and classes must come from the cached lists and sit under the
        // selected ancestors. After a union load the ancestors may be unset;
        // they are taken from the cached entity.
        if let Some(id) = id.as_deref() {
            match depth {
                Depth::Department => {}
                Depth::Level => {
                    let level = self.find_level(id).ok_or_else(|| {
                        HierarchyError::validation("levelId", format!("unknown level {id}"))
                    })?;
                    match candidate.department_id.as_deref() {
                        None => candidate.department_id = Some(level.department_id.clone()),
                        Some(d) if d != level.department_id => {
                            return Err(HierarchyError::validation(
                                "levelId",
                                format!("level {id} is not part of department {d}"),
                            ))
                        }
                        Some(_) => {}
                    }
                }
                Depth::Class => {
                    let class = self.find_class(id).ok_or_else(|| {
                        HierarchyError::validation("classId", format!("unknown class {id}"))
                    })?;
                    match candidate.level_id.as_deref() {
                        None => {
                            candidate.department_id = Some(class.department_id.clone());
                            candidate.level_id = Some(class.level_id.clone());
                        }
                        Some(l) if l != class.level_id => {
                            return Err(HierarchyError::validation(
                                "classId",
                                format!("class {id} is not part of level {l}"),
                            ))
                        }
                        Some(_) => {}
                    }
                }
            }
        }

        if !authorize_selection(&self.scope, &candidate) {
            warn!(
                depth = ?depth,
                requested = ?candidate.department_id,
                bound = ?self.scope.bound(),
                "selection rejected by scope"
            );
            return Err(ScopeViolation::ForeignDepartment {
                requested: candidate.department_id,
                bound: self.scope.bound().unwrap_or_default().to_string(),
            }
            .into());
        }

        info!(depth = ?depth, id = ?id, "selection changed");
        self.version += 1;
        self.path = candidate;
        self.clear_from(depth.child_list());

        let ticket = match (depth, id.is_some()) {
            (_, true) => Some(self.issue(depth.child_list(), Pick::First)),
            (Depth::Department, false) | (Depth::Level, false) => {
                Some(self.issue(depth.child_list(), Pick::Nothing))
            }
            (Depth::Class, false) => None,
        };
        Ok(ticket)
    }

    /// Re-fetches one cached list after a mutation, keeping the current
    /// selection at that depth when it survived.
    pub fn refresh(&mut self, list: ListKind) -> Option<FetchTicket> {
        let parent_set = match list {
            ListKind::Departments => true,
            ListKind::Levels => self.path.department_id.is_some(),
            ListKind::Classes => self.path.level_id.is_some(),
            ListKind::Roster => self.path.class_id.is_some(),
        };
        if list == ListKind::Roster && !parent_set {
            return None;
        }
        let pick = if !parent_set {
            Pick::Nothing
        } else {
            match list.selects().and_then(|d| self.path.get(d)) {
                Some(current) => Pick::Keep(current.to_string()),
                None => Pick::First,
            }
        };
        self.version += 1;
        *self.errors.slot(list) = None;
        Some(self.issue(list, pick))
    }

    /// Applies a fetch outcome. Stale tickets are dropped without touching state.
    pub fn apply(
        &mut self,
        ticket: &FetchTicket,
        outcome: Result<Fetched, HierarchyError>,
    ) -> Applied {
        if ticket.version != self.version {
            debug!(
                list = %ticket.list,
                ticket_version = ticket.version,
                current_version = self.version,
                "discarding stale response"
            );
            return Applied::Stale;
        }
        self.in_flight = None;

        let fetched = match outcome {
            Ok(fetched) if fetched.list() == ticket.list => fetched,
            Ok(fetched) => {
                warn!(expected = %ticket.list, got = %fetched.list(), "mismatched response dropped");
                return Applied::Stale;
            }
            Err(e) => {
                warn!(list = %ticket.list, error = %e, "list load failed");
                *self.errors.slot(ticket.list) = Some(e.user_message());
                return Applied::Settled;
            }
        };

        *self.errors.slot(ticket.list) = None;
        match fetched {
            Fetched::Departments(items) => self.departments = items,
            Fetched::Levels(items) => self.levels = items,
            Fetched::Classes(items) => self.classes = items,
            Fetched::Roster { students, teachers } => {
                self.students = students;
                self.teachers = teachers;
                self.roster_loaded = true;
                return Applied::Settled;
            }
        }

        match ticket.list.selects() {
            Some(depth) => self.drill(depth, &ticket.pick),
            None => Applied::Settled,
        }
    }

    fn drill(&mut self, depth: Depth, pick: &Pick) -> Applied {
        let ids = self.list_ids(depth);
        let chosen = match pick {
            Pick::Nothing => return Applied::Settled,
            Pick::Keep(id) if ids.iter().any(|i| i == id) => Some(id.clone()),
            Pick::Keep(_) | Pick::First => ids.first().cloned(),
        };

        let Some(chosen) = chosen else {
            // Empty list: whatever was selected here is gone.
            if self.path.get(depth).is_some() {
                self.version += 1;
                self.path = self.path.with(depth, None);
                self.clear_from(depth.child_list());
            }
            return Applied::Settled;
        };

        if matches!(pick, Pick::Keep(_)) && self.path.get(depth) == Some(chosen.as_str()) {
            return Applied::Settled;
        }

        let candidate = self.path.with(depth, Some(chosen.clone()));
        if !authorize_selection(&self.scope, &candidate) {
            warn!(depth = ?depth, id = %chosen, "auto-selection outside scope skipped");
            return Applied::Settled;
        }
        debug!(depth = ?depth, id = %chosen, "auto-selected");
        self.version += 1;
        self.path = candidate;
        self.clear_from(depth.child_list());
        Applied::Next(self.issue(depth.child_list(), Pick::First))
    }

    fn list_ids(&self, depth: Depth) -> Vec<String> {
        match depth {
            Depth::Department => self.departments.iter().map(|d| d.id.clone()).collect(),
            Depth::Level => self.levels.iter().map(|l| l.id.clone()).collect(),
            Depth::Class => self.classes.iter().map(|c| c.id.clone()).collect(),
        }
    }

    fn clear_from(&mut self, list: ListKind) {
        if list <= ListKind::Levels {
            self.levels.clear();
        }
        if list <= ListKind::Classes {
            self.classes.clear();
        }
        if list <= ListKind::Roster {
            self.students.clear();
            self.teachers.clear();
            self.roster_loaded = false;
        }
        self.errors.clear_from(list);
    }

    fn issue(&mut self, list: ListKind, pick: Pick) -> FetchTicket {
        self.in_flight = Some(list);
        FetchTicket {
            version: self.version,
            list,
            department_id: self.path.department_id.clone(),
            level_id: self.path.level_id.clone(),
            class_id: self.path.class_id.clone(),
            pick,
        }
    }

    /// Fetches and applies tickets until the chain settles.
    pub async fn drive(&mut self, reader: &dyn HierarchyReader, ticket: Option<FetchTicket>) {
        let mut next = ticket;
        while let Some(ticket) = next.take() {
            let outcome = fetch(reader, &self.scope, &ticket).await;
            if let Applied::Next(t) = self.apply(&ticket, outcome) {
                next = Some(t);
            }
        }
    }

    pub async fn mount(&mut self, reader: &dyn HierarchyReader) {
        let ticket = self.load_root();
        self.drive(reader, Some(ticket)).await;
    }

    pub async fn select(
        &mut self,
        reader: &dyn HierarchyReader,
        depth: Depth,
        id: Option<String>,
    ) -> Result<(), HierarchyError> {
        let ticket = self.select_at(depth, id)?;
        self.drive(reader, ticket).await;
        Ok(())
    }

    pub async fn reload(&mut self, reader: &dyn HierarchyReader, list: ListKind) {
        let ticket = self.refresh(list);
        self.drive(reader, ticket).await;
    }
}

/// Loads the list a ticket asks for through the endpoints the scope allows.
pub async fn fetch(
    reader: &dyn HierarchyReader,
    scope: &ScopeContext,
    ticket: &FetchTicket,
) -> Result<Fetched, HierarchyError> {
    let scoped = ScopedReader::new(reader, scope);
    match ticket.list {
        ListKind::Departments => scoped.departments().await.map(Fetched::Departments),
        ListKind::Levels => scoped
            .levels(ticket.department_id.as_deref())
            .await
            .map(Fetched::Levels),
        ListKind::Classes => scoped
            .classes(ticket.department_id.as_deref(), ticket.level_id.as_deref())
            .await
            .map(Fetched::Classes),
        ListKind::Roster => {
            let Some(class_id) = ticket.class_id.as_deref() else {
                return Err(HierarchyError::validation("classId", "no class selected"));
            };
            let (students, teachers) = scoped.roster(class_id).await?;
            Ok(Fetched::Roster { students, teachers })
        }
    }
}
