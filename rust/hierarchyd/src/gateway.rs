//! Gateway contracts the core consumes. Implementations own transport and
//! persistence; the core only distinguishes success, conflict and failure.

use async_trait::async_trait;

use crate::error::GatewayError;
use crate::model::{
    Class, ClassDraft, ClassFilter, Course, CourseAssignment, CourseAssignmentDraft, CourseDraft,
    Department, DepartmentDraft, Level, LevelDraft, Notification, Role, UserDraft, UserRecord,
};

pub type GatewayResult<T> = Result<T, GatewayError>;

/// Read side used by the selection cascade and form option lists.
#[async_trait]
pub trait HierarchyReader: Send + Sync {
    async fn list_departments(&self) -> GatewayResult<Vec<Department>>;
    async fn my_department(&self) -> GatewayResult<Department>;

    /// Levels of one department, or of every department when `None`.
    async fn list_levels(&self, department_id: Option<&str>) -> GatewayResult<Vec<Level>>;
    async fn my_levels(&self) -> GatewayResult<Vec<Level>>;

    async fn list_classes(&self, filter: &ClassFilter) -> GatewayResult<Vec<Class>>;
    async fn my_classes(&self, level_id: Option<&str>) -> GatewayResult<Vec<Class>>;

    async fn class_students(&self, class_id: &str) -> GatewayResult<Vec<UserRecord>>;
    async fn class_teachers(&self, class_id: &str) -> GatewayResult<Vec<UserRecord>>;
}

#[async_trait]
pub trait HierarchyWriter: Send + Sync {
    async fn create_department(&self, draft: &DepartmentDraft) -> GatewayResult<Department>;
    async fn update_department(
        &self,
        id: &str,
        draft: &DepartmentDraft,
    ) -> GatewayResult<Department>;
    async fn delete_department(&self, id: &str) -> GatewayResult<()>;

    async fn create_level(&self, draft: &LevelDraft) -> GatewayResult<Level>;
    async fn update_level(&self, id: &str, draft: &LevelDraft) -> GatewayResult<Level>;
    async fn delete_level(&self, id: &str) -> GatewayResult<()>;
    async fn create_my_level(&self, draft: &LevelDraft) -> GatewayResult<Level>;
    async fn update_my_level(&self, id: &str, draft: &LevelDraft) -> GatewayResult<Level>;
    async fn delete_my_level(&self, id: &str) -> GatewayResult<()>;

    async fn create_class(&self, draft: &ClassDraft) -> GatewayResult<Class>;
    async fn update_class(&self, id: &str, draft: &ClassDraft) -> GatewayResult<Class>;
    async fn delete_class(&self, id: &str) -> GatewayResult<()>;
    async fn create_my_class(&self, draft: &ClassDraft) -> GatewayResult<Class>;
    async fn update_my_class(&self, id: &str, draft: &ClassDraft) -> GatewayResult<Class>;
    async fn delete_my_class(&self, id: &str) -> GatewayResult<()>;

    async fn list_users_by_role(&self, role: Role) -> GatewayResult<Vec<UserRecord>>;
    async fn create_user(&self, draft: &UserDraft) -> GatewayResult<UserRecord>;
    async fn assign_chief(&self, department_id: &str, user_id: &str) -> GatewayResult<()>;
    async fn remove_chief(&self, department_id: &str) -> GatewayResult<()>;
    async fn assign_teacher(&self, class_id: &str, teacher_id: &str) -> GatewayResult<()>;

    async fn my_students(&self) -> GatewayResult<Vec<UserRecord>>;
    async fn my_teachers(&self) -> GatewayResult<Vec<UserRecord>>;
    async fn my_notifications(&self) -> GatewayResult<Vec<Notification>>;

    async fn remove_student_from_class(&self, class_id: &str, student_id: &str)
        -> GatewayResult<()>;
    /// All-or-nothing: either every listed student leaves the class or none does.
    async fn remove_students_from_class(
        &self,
        class_id: &str,
        student_ids: &[String],
    ) -> GatewayResult<usize>;
}

/// Course layer hanging off a level.
#[async_trait]
pub trait CourseCatalog: Send + Sync {
    async fn list_courses(&self, level_id: &str) -> GatewayResult<Vec<Course>>;
    async fn create_course(&self, draft: &CourseDraft) -> GatewayResult<Course>;
    async fn update_course(&self, id: &str, draft: &CourseDraft) -> GatewayResult<Course>;
    async fn delete_course(&self, id: &str) -> GatewayResult<()>;

    async fn list_course_assignments(&self, level_id: &str)
        -> GatewayResult<Vec<CourseAssignment>>;
    async fn create_course_assignment(
        &self,
        draft: &CourseAssignmentDraft,
    ) -> GatewayResult<CourseAssignment>;
    async fn delete_course_assignment(&self, id: &str) -> GatewayResult<()>;
}

pub trait HierarchyGateway: HierarchyReader + HierarchyWriter + CourseCatalog {}

impl<T> HierarchyGateway for T where T: HierarchyReader + HierarchyWriter + CourseCatalog {}
