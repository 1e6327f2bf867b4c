//! Display state derived from the cascade's cached lists. Pure; never fetches.

use serde::{Deserialize, Serialize};

use crate::cascade::{ListErrors, SelectionCascade};
use crate::labels::{formation_label, role_label, specialty_label, year_label};
use crate::model::UserRecord;
use crate::path::{Depth, ListKind, SelectionPath, Stage};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectionFilter {
    /// Case-insensitive match on member names and emails.
    #[serde(default)]
    pub search: Option<String>,
    #[serde(default)]
    pub active_only: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Totals {
    pub total_departments: usize,
    pub total_levels: usize,
    pub total_classes: usize,
    pub total_students: usize,
    pub total_teachers: usize,
    /// Sum of enrolled students over the visible classes.
    pub enrolled: i64,
    pub capacity: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DepartmentRow {
    pub id: String,
    pub name: String,
    pub code: String,
    pub specialty: String,
    pub specialty_label: String,
    pub formation_type: String,
    pub formation_label: String,
    pub active: bool,
    pub chief_name: Option<String>,
    pub level_count: i64,
    pub is_active: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LevelRow {
    pub id: String,
    pub name: String,
    pub code: String,
    pub year: u8,
    pub year_label: String,
    pub department_name: String,
    pub class_count: i64,
    pub is_active: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassRow {
    pub id: String,
    pub name: String,
    pub code: String,
    pub capacity: i64,
    pub level_name: String,
    pub student_count: i64,
    pub teacher_count: i64,
    pub is_active: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberRow {
    pub id: String,
    pub name: String,
    pub email: String,
    pub role_label: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewProjection {
    pub stage: Stage,
    pub path: SelectionPath,
    pub totals: Totals,
    pub departments: Vec<DepartmentRow>,
    pub levels: Vec<LevelRow>,
    pub classes: Vec<ClassRow>,
    pub students: Vec<MemberRow>,
    pub teachers: Vec<MemberRow>,
    pub errors: ListErrors,
    pub loading: Option<ListKind>,
}

pub fn is_active(cascade: &SelectionCascade, depth: Depth, id: &str) -> bool {
    cascade.path().get(depth) == Some(id)
}

pub fn project(cascade: &SelectionCascade, filter: &ProjectionFilter) -> ViewProjection {
    let totals = Totals {
        total_departments: cascade.departments().len(),
        total_levels: cascade.levels().len(),
        total_classes: cascade.classes().len(),
        total_students: cascade.students().len(),
        total_teachers: cascade.teachers().len(),
        enrolled: cascade.classes().iter().map(|c| c.student_count).sum(),
        capacity: cascade.classes().iter().map(|c| c.capacity).sum(),
    };

    let departments = cascade
        .departments()
        .iter()
        .filter(|d| !filter.active_only || d.active)
        .map(|d| DepartmentRow {
            id: d.id.clone(),
            name: d.name.clone(),
            code: d.code.clone(),
            specialty: d.specialty.clone(),
            specialty_label: specialty_label(&d.specialty),
            formation_type: d.formation_type.clone(),
            formation_label: formation_label(&d.formation_type),
            active: d.active,
            chief_name: d.chief_name.clone(),
            level_count: d.level_count,
            is_active: is_active(cascade, Depth::Department, &d.id),
        })
        .collect();

    let levels = cascade
        .levels()
        .iter()
        .map(|l| LevelRow {
            id: l.id.clone(),
            name: l.name.clone(),
            code: l.code.clone(),
            year: l.year,
            year_label: year_label(l.year),
            department_name: l.department_name.clone(),
            class_count: l.class_count,
            is_active: is_active(cascade, Depth::Level, &l.id),
        })
        .collect();

    let classes = cascade
        .classes()
        .iter()
        .map(|c| ClassRow {
            id: c.id.clone(),
            name: c.name.clone(),
            code: c.code.clone(),
            capacity: c.capacity,
            level_name: c.level_name.clone(),
            student_count: c.student_count,
            teacher_count: c.teacher_count,
            is_active: is_active(cascade, Depth::Class, &c.id),
        })
        .collect();

    let needle = filter
        .search
        .as_deref()
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty());

    ViewProjection {
        stage: cascade.stage(),
        path: cascade.path().clone(),
        totals,
        departments,
        levels,
        classes,
        students: members(cascade.students(), needle.as_deref()),
        teachers: members(cascade.teachers(), needle.as_deref()),
        errors: cascade.errors().clone(),
        loading: cascade.loading(),
    }
}

fn members(users: &[UserRecord], needle: Option<&str>) -> Vec<MemberRow> {
    users
        .iter()
        .filter(|u| match needle {
            None => true,
            Some(n) => {
                u.display_name().to_lowercase().contains(n) || u.email.to_lowercase().contains(n)
            }
        })
        .map(|u| MemberRow {
            id: u.id.clone(),
            name: u.display_name(),
            email: u.email.clone(),
            role_label: role_label(u.role),
        })
        .collect()
}
