use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Admin,
    Chief,
    Teacher,
    Student,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Admin => "ADMIN",
            Self::Chief => "CHIEF",
            Self::Teacher => "TEACHER",
            Self::Student => "STUDENT",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ADMIN" => Some(Self::Admin),
            "CHIEF" => Some(Self::Chief),
            "TEACHER" => Some(Self::Teacher),
            "STUDENT" => Some(Self::Student),
            _ => None,
        }
    }
}

/// Kinds of records the hierarchy surfaces touch. Used for error reporting,
/// delete targets and form kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EntityKind {
    Department,
    Level,
    Class,
    Course,
    User,
}

impl EntityKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Department => "department",
            Self::Level => "level",
            Self::Class => "class",
            Self::Course => "course",
            Self::User => "user",
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Department {
    pub id: String,
    pub name: String,
    pub code: String,
    pub specialty: String,
    pub formation_type: String,
    pub active: bool,
    pub chief_id: Option<String>,
    pub chief_name: Option<String>,
    pub level_count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Level {
    pub id: String,
    pub name: String,
    pub code: String,
    pub year: u8,
    pub department_id: String,
    pub department_name: String,
    pub class_count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberSummary {
    pub id: String,
    pub first_name: String,
    pub last_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Class {
    pub id: String,
    pub name: String,
    pub code: String,
    pub capacity: i64,
    pub level_id: String,
    pub level_name: String,
    pub department_id: String,
    pub department_name: String,
    pub student_count: i64,
    pub teacher_count: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub students: Option<Vec<MemberSummary>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub teachers: Option<Vec<MemberSummary>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    pub id: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub role: Role,
    pub department_id: Option<String>,
    pub class_id: Option<String>,
}

impl UserRecord {
    pub fn display_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Course {
    pub id: String,
    pub name: String,
    pub code: String,
    pub credits: i64,
    pub level_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseAssignment {
    pub id: String,
    pub course_id: String,
    pub course_name: String,
    pub teacher_id: String,
    pub teacher_name: String,
    pub level_id: String,
    pub class_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: String,
    pub department_id: String,
    pub message: String,
    pub created_at: String,
}

/// The acting user's profile as handed over by the host at session start.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Actor {
    pub id: String,
    pub role: Role,
    #[serde(default)]
    pub department_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassFilter {
    pub department_id: Option<String>,
    pub level_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DepartmentDraft {
    pub name: String,
    pub code: String,
    pub specialty: String,
    pub formation_type: String,
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LevelDraft {
    pub name: String,
    pub code: String,
    pub year: u8,
    pub department_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassDraft {
    pub name: String,
    pub code: String,
    pub capacity: i64,
    pub department_id: String,
    pub level_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseDraft {
    pub name: String,
    pub code: String,
    #[serde(default)]
    pub credits: i64,
    pub level_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseAssignmentDraft {
    pub course_id: String,
    pub teacher_id: String,
    pub level_id: String,
    #[serde(default)]
    pub class_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserDraft {
    pub first_name: String,
    pub last_name: String,
    #[serde(default)]
    pub email: String,
    pub role: Role,
    #[serde(default)]
    pub department_id: Option<String>,
    #[serde(default)]
    pub class_id: Option<String>,
}

/// A validated write produced by a form session.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum EntityRequest {
    CreateDepartment(DepartmentDraft),
    UpdateDepartment { id: String, draft: DepartmentDraft },
    CreateLevel(LevelDraft),
    UpdateLevel { id: String, draft: LevelDraft },
    CreateClass(ClassDraft),
    UpdateClass { id: String, draft: ClassDraft },
}

impl EntityRequest {
    pub fn kind(&self) -> EntityKind {
        match self {
            Self::CreateDepartment(_) | Self::UpdateDepartment { .. } => EntityKind::Department,
            Self::CreateLevel(_) | Self::UpdateLevel { .. } => EntityKind::Level,
            Self::CreateClass(_) | Self::UpdateClass { .. } => EntityKind::Class,
        }
    }
}
