//! SQLite-backed gateway over the schema in `db.rs`.

use async_trait::async_trait;
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, Value, ValueRef};
use rusqlite::{params_from_iter, Connection, OptionalExtension, Row};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tracing::debug;
use uuid::Uuid;

use crate::error::GatewayError;
use crate::gateway::{CourseCatalog, GatewayResult, HierarchyReader, HierarchyWriter};
use crate::model::{
    Actor, Class, ClassDraft, ClassFilter, Course, CourseAssignment, CourseAssignmentDraft,
    CourseDraft, Department, DepartmentDraft, EntityKind, Level, LevelDraft, Notification, Role,
    UserDraft, UserRecord,
};

impl FromSql for Role {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let s = value.as_str()?;
        Role::parse(s).ok_or_else(|| FromSqlError::Other(format!("unknown role {s}").into()))
    }
}

const DEPARTMENT_SELECT: &str = "SELECT
       d.id,
       d.name,
       d.code,
       d.specialty,
       d.formation_type,
       d.active,
       d.chief_id,
       (SELECT u.first_name || ' ' || u.last_name FROM users u WHERE u.id = d.chief_id) AS chief_name,
       (SELECT COUNT(*) FROM levels l WHERE l.department_id = d.id) AS level_count
     FROM departments d";

const LEVEL_SELECT: &str = "SELECT
       l.id,
       l.name,
       l.code,
       l.year,
       l.department_id,
       d.name,
       (SELECT COUNT(*) FROM classes c WHERE c.level_id = l.id) AS class_count
     FROM levels l
     JOIN departments d ON d.id = l.department_id";

const CLASS_SELECT: &str = "SELECT
       c.id,
       c.name,
       c.code,
       c.capacity,
       c.level_id,
       l.name,
       c.department_id,
       d.name,
       (SELECT COUNT(*) FROM users u WHERE u.class_id = c.id AND u.role = 'STUDENT') AS student_count,
       (SELECT COUNT(*) FROM class_teachers ct WHERE ct.class_id = c.id) AS teacher_count
     FROM classes c
     JOIN levels l ON l.id = c.level_id
     JOIN departments d ON d.id = c.department_id";

const USER_SELECT: &str =
    "SELECT u.id, u.first_name, u.last_name, u.email, u.role, u.department_id, u.class_id FROM users u";

fn department_row(row: &Row<'_>) -> rusqlite::Result<Department> {
    Ok(Department {
        id: row.get(0)?,
        name: row.get(1)?,
        code: row.get(2)?,
        specialty: row.get(3)?,
        formation_type: row.get(4)?,
        active: row.get::<_, i64>(5)? != 0,
        chief_id: row.get(6)?,
        chief_name: row.get(7)?,
        level_count: row.get(8)?,
    })
}

fn level_row(row: &Row<'_>) -> rusqlite::Result<Level> {
    Ok(Level {
        id: row.get(0)?,
        name: row.get(1)?,
        code: row.get(2)?,
        year: row.get(3)?,
        department_id: row.get(4)?,
        department_name: row.get(5)?,
        class_count: row.get(6)?,
    })
}

fn class_row(row: &Row<'_>) -> rusqlite::Result<Class> {
    Ok(Class {
        id: row.get(0)?,
        name: row.get(1)?,
        code: row.get(2)?,
        capacity: row.get(3)?,
        level_id: row.get(4)?,
        level_name: row.get(5)?,
        department_id: row.get(6)?,
        department_name: row.get(7)?,
        student_count: row.get(8)?,
        teacher_count: row.get(9)?,
        students: None,
        teachers: None,
    })
}

fn user_row(row: &Row<'_>) -> rusqlite::Result<UserRecord> {
    Ok(UserRecord {
        id: row.get(0)?,
        first_name: row.get(1)?,
        last_name: row.get(2)?,
        email: row.get(3)?,
        role: row.get(4)?,
        department_id: row.get(5)?,
        class_id: row.get(6)?,
    })
}

fn query_list<T>(
    conn: &Connection,
    sql: &str,
    params: Vec<Value>,
    map: fn(&Row<'_>) -> rusqlite::Result<T>,
) -> GatewayResult<Vec<T>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params_from_iter(params), map)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn count(conn: &Connection, sql: &str, id: &str) -> GatewayResult<i64> {
    Ok(conn.query_row(sql, [id], |r| r.get(0))?)
}

fn next_sort_order(conn: &Connection, table: &str) -> GatewayResult<i64> {
    let sql = format!("SELECT COALESCE(MAX(sort_order), -1) + 1 FROM {}", table);
    Ok(conn.query_row(&sql, [], |r| r.get(0))?)
}

fn now() -> String {
    chrono::Utc::now().to_rfc3339()
}

fn require_name(name: &str) -> GatewayResult<()> {
    if name.trim().is_empty() {
        return Err(GatewayError::Failed("name must not be empty".into()));
    }
    Ok(())
}

fn get_department(conn: &Connection, id: &str) -> GatewayResult<Department> {
    conn.query_row(
        &format!("{DEPARTMENT_SELECT} WHERE d.id = ?"),
        [id],
        department_row,
    )
    .optional()?
    .ok_or_else(|| GatewayError::NotFound {
        kind: EntityKind::Department,
        id: id.to_string(),
    })
}

fn get_level(conn: &Connection, id: &str) -> GatewayResult<Level> {
    conn.query_row(&format!("{LEVEL_SELECT} WHERE l.id = ?"), [id], level_row)
        .optional()?
        .ok_or_else(|| GatewayError::NotFound {
            kind: EntityKind::Level,
            id: id.to_string(),
        })
}

fn get_class(conn: &Connection, id: &str) -> GatewayResult<Class> {
    conn.query_row(&format!("{CLASS_SELECT} WHERE c.id = ?"), [id], class_row)
        .optional()?
        .ok_or_else(|| GatewayError::NotFound {
            kind: EntityKind::Class,
            id: id.to_string(),
        })
}

fn get_user(conn: &Connection, id: &str) -> GatewayResult<UserRecord> {
    conn.query_row(&format!("{USER_SELECT} WHERE u.id = ?"), [id], user_row)
        .optional()?
        .ok_or_else(|| GatewayError::NotFound {
            kind: EntityKind::User,
            id: id.to_string(),
        })
}

fn notify(conn: &Connection, department_id: &str, message: String) -> GatewayResult<()> {
    conn.execute(
        "INSERT INTO notifications(id, department_id, message, created_at) VALUES(?, ?, ?, ?)",
        (Uuid::new_v4().to_string(), department_id, message, now()),
    )?;
    Ok(())
}

/// Gateway over one SQLite workspace. Clones share the connection; the actor
/// binding only matters for the my-* endpoints and chief guards.
#[derive(Clone)]
pub struct SqliteGateway {
    conn: Arc<Mutex<Connection>>,
    actor: Option<Actor>,
}

impl SqliteGateway {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn, actor: None }
    }

    pub fn for_actor(&self, actor: &Actor) -> Self {
        Self {
            conn: Arc::clone(&self.conn),
            actor: Some(actor.clone()),
        }
    }

    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> GatewayResult<T>) -> GatewayResult<T> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| GatewayError::Failed("workspace connection poisoned".into()))?;
        f(&conn)
    }

    fn my_department_id(&self) -> GatewayResult<String> {
        self.actor
            .as_ref()
            .and_then(|a| a.department_id.clone())
            .ok_or_else(|| GatewayError::Forbidden("no department bound to this session".into()))
    }

    /// Chief sessions may only touch records of their own department.
    fn chief_department(&self) -> Option<String> {
        match &self.actor {
            Some(a) if a.role == Role::Chief => a.department_id.clone(),
            _ => None,
        }
    }

    fn guard_department(&self, department_id: &str) -> GatewayResult<()> {
        match self.chief_department() {
            Some(mine) if mine != department_id => Err(GatewayError::Forbidden(format!(
                "department {department_id} is not yours"
            ))),
            _ => Ok(()),
        }
    }

    fn guard_level(&self, conn: &Connection, level_id: &str) -> GatewayResult<Level> {
        let level = get_level(conn, level_id)?;
        self.guard_department(&level.department_id)?;
        Ok(level)
    }

    fn guard_class(&self, conn: &Connection, class_id: &str) -> GatewayResult<Class> {
        let class = get_class(conn, class_id)?;
        self.guard_department(&class.department_id)?;
        Ok(class)
    }

    fn levels_where(conn: &Connection, department_id: Option<&str>) -> GatewayResult<Vec<Level>> {
        match department_id {
            Some(d) => query_list(
                conn,
                &format!("{LEVEL_SELECT} WHERE l.department_id = ? ORDER BY l.sort_order"),
                vec![Value::Text(d.to_string())],
                level_row,
            ),
            None => query_list(
                conn,
                &format!("{LEVEL_SELECT} ORDER BY d.sort_order, l.sort_order"),
                vec![],
                level_row,
            ),
        }
    }

    fn classes_where(conn: &Connection, filter: &ClassFilter) -> GatewayResult<Vec<Class>> {
        let mut clauses: Vec<&str> = Vec::new();
        let mut params: Vec<Value> = Vec::new();
        if let Some(d) = &filter.department_id {
            clauses.push("c.department_id = ?");
            params.push(Value::Text(d.clone()));
        }
        if let Some(l) = &filter.level_id {
            clauses.push("c.level_id = ?");
            params.push(Value::Text(l.clone()));
        }
        let where_sql = if clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", clauses.join(" AND "))
        };
        query_list(
            conn,
            &format!("{CLASS_SELECT}{where_sql} ORDER BY d.sort_order, l.sort_order, c.sort_order"),
            params,
            class_row,
        )
    }

    fn insert_level(&self, conn: &Connection, draft: &LevelDraft) -> GatewayResult<Level> {
        require_name(&draft.name)?;
        if !(1..=5).contains(&draft.year) {
            return Err(GatewayError::Failed(format!(
                "year {} out of range 1..5",
                draft.year
            )));
        }
        let department = get_department(conn, &draft.department_id)?;
        let id = Uuid::new_v4().to_string();
        let sort_order = next_sort_order(conn, "levels")?;
        conn.execute(
            "INSERT INTO levels(id, department_id, name, code, year, sort_order) VALUES(?, ?, ?, ?, ?, ?)",
            (
                &id,
                &draft.department_id,
                draft.name.trim(),
                draft.code.trim(),
                draft.year,
                sort_order,
            ),
        )?;
        if self.chief_department().is_none() {
            notify(
                conn,
                &department.id,
                format!("Level {} was added to {}", draft.name.trim(), department.name),
            )?;
        }
        debug!(level = %id, department = %department.id, "level inserted");
        get_level(conn, &id)
    }

    fn write_level(&self, conn: &Connection, id: &str, draft: &LevelDraft) -> GatewayResult<Level> {
        require_name(&draft.name)?;
        get_department(conn, &draft.department_id)?;
        let existing = get_level(conn, id)?;
        self.guard_department(&existing.department_id)?;
        let tx = conn.unchecked_transaction()?;
        tx.execute(
            "UPDATE levels SET department_id = ?, name = ?, code = ?, year = ? WHERE id = ?",
            (
                &draft.department_id,
                draft.name.trim(),
                draft.code.trim(),
                draft.year,
                id,
            ),
        )?;
        // Classes carry their department denormalized; keep them aligned.
        tx.execute(
            "UPDATE classes SET department_id = ? WHERE level_id = ?",
            (&draft.department_id, id),
        )?;
        tx.commit()?;
        get_level(conn, id)
    }

    fn remove_level(&self, conn: &Connection, id: &str) -> GatewayResult<()> {
        let level = get_level(conn, id)?;
        self.guard_department(&level.department_id)?;
        if level.class_count > 0 {
            return Err(GatewayError::Conflict {
                kind: EntityKind::Level,
                id: id.to_string(),
                dependents: format!("{} class(es)", level.class_count),
            });
        }
        let tx = conn.unchecked_transaction()?;
        tx.execute("DELETE FROM course_assignments WHERE level_id = ?", [id])?;
        tx.execute("DELETE FROM courses WHERE level_id = ?", [id])?;
        tx.execute("DELETE FROM levels WHERE id = ?", [id])?;
        tx.commit()?;
        Ok(())
    }

    fn insert_class(&self, conn: &Connection, draft: &ClassDraft) -> GatewayResult<Class> {
        require_name(&draft.name)?;
        let level = get_level(conn, &draft.level_id)?;
        if level.department_id != draft.department_id {
            return Err(GatewayError::Failed(format!(
                "level {} does not belong to department {}",
                level.id, draft.department_id
            )));
        }
        let id = Uuid::new_v4().to_string();
        let sort_order = next_sort_order(conn, "classes")?;
        conn.execute(
            "INSERT INTO classes(id, department_id, level_id, name, code, capacity, sort_order)
             VALUES(?, ?, ?, ?, ?, ?, ?)",
            (
                &id,
                &draft.department_id,
                &draft.level_id,
                draft.name.trim(),
                draft.code.trim(),
                draft.capacity,
                sort_order,
            ),
        )?;
        if self.chief_department().is_none() {
            notify(
                conn,
                &draft.department_id,
                format!("Class {} was added to {}", draft.name.trim(), level.name),
            )?;
        }
        debug!(class = %id, level = %level.id, "class inserted");
        get_class(conn, &id)
    }

    fn write_class(&self, conn: &Connection, id: &str, draft: &ClassDraft) -> GatewayResult<Class> {
        require_name(&draft.name)?;
        let existing = get_class(conn, id)?;
        self.guard_department(&existing.department_id)?;
        let level = get_level(conn, &draft.level_id)?;
        if level.department_id != draft.department_id {
            return Err(GatewayError::Failed(format!(
                "level {} does not belong to department {}",
                level.id, draft.department_id
            )));
        }
        conn.execute(
            "UPDATE classes SET department_id = ?, level_id = ?, name = ?, code = ?, capacity = ? WHERE id = ?",
            (
                &draft.department_id,
                &draft.level_id,
                draft.name.trim(),
                draft.code.trim(),
                draft.capacity,
                id,
            ),
        )?;
        get_class(conn, id)
    }

    fn remove_class(&self, conn: &Connection, id: &str) -> GatewayResult<()> {
        let class = self.guard_class(conn, id)?;
        if class.student_count > 0 {
            return Err(GatewayError::Conflict {
                kind: EntityKind::Class,
                id: id.to_string(),
                dependents: format!("{} student(s)", class.student_count),
            });
        }
        let tx = conn.unchecked_transaction()?;
        tx.execute("DELETE FROM class_teachers WHERE class_id = ?", [id])?;
        tx.execute("DELETE FROM course_assignments WHERE class_id = ?", [id])?;
        tx.execute("DELETE FROM classes WHERE id = ?", [id])?;
        tx.commit()?;
        Ok(())
    }
}

#[async_trait]
impl HierarchyReader for SqliteGateway {
    async fn list_departments(&self) -> GatewayResult<Vec<Department>> {
        self.with_conn(|conn| {
            query_list(
                conn,
                &format!("{DEPARTMENT_SELECT} ORDER BY d.sort_order"),
                vec![],
                department_row,
            )
        })
    }

    async fn my_department(&self) -> GatewayResult<Department> {
        let mine = self.my_department_id()?;
        self.with_conn(|conn| get_department(conn, &mine))
    }

    async fn list_levels(&self, department_id: Option<&str>) -> GatewayResult<Vec<Level>> {
        self.with_conn(|conn| Self::levels_where(conn, department_id))
    }

    async fn my_levels(&self) -> GatewayResult<Vec<Level>> {
        let mine = self.my_department_id()?;
        self.with_conn(|conn| Self::levels_where(conn, Some(mine.as_str())))
    }

    async fn list_classes(&self, filter: &ClassFilter) -> GatewayResult<Vec<Class>> {
        self.with_conn(|conn| Self::classes_where(conn, filter))
    }

    async fn my_classes(&self, level_id: Option<&str>) -> GatewayResult<Vec<Class>> {
        let filter = ClassFilter {
            department_id: Some(self.my_department_id()?),
            level_id: level_id.map(str::to_string),
        };
        self.with_conn(|conn| Self::classes_where(conn, &filter))
    }

    async fn class_students(&self, class_id: &str) -> GatewayResult<Vec<UserRecord>> {
        self.with_conn(|conn| {
            self.guard_class(conn, class_id)?;
            query_list(
                conn,
                &format!(
                    "{USER_SELECT} WHERE u.class_id = ? AND u.role = 'STUDENT'
                     ORDER BY u.last_name, u.first_name"
                ),
                vec![Value::Text(class_id.to_string())],
                user_row,
            )
        })
    }

    async fn class_teachers(&self, class_id: &str) -> GatewayResult<Vec<UserRecord>> {
        self.with_conn(|conn| {
            self.guard_class(conn, class_id)?;
            query_list(
                conn,
                &format!(
                    "{USER_SELECT} JOIN class_teachers ct ON ct.teacher_id = u.id
                     WHERE ct.class_id = ? ORDER BY u.last_name, u.first_name"
                ),
                vec![Value::Text(class_id.to_string())],
                user_row,
            )
        })
    }
}

#[async_trait]
impl HierarchyWriter for SqliteGateway {
    async fn create_department(&self, draft: &DepartmentDraft) -> GatewayResult<Department> {
        require_name(&draft.name)?;
        self.with_conn(|conn| {
            let id = Uuid::new_v4().to_string();
            let sort_order = next_sort_order(conn, "departments")?;
            conn.execute(
                "INSERT INTO departments(id, name, code, specialty, formation_type, active, sort_order)
                 VALUES(?, ?, ?, ?, ?, ?, ?)",
                (
                    &id,
                    draft.name.trim(),
                    draft.code.trim(),
                    &draft.specialty,
                    &draft.formation_type,
                    draft.active as i64,
                    sort_order,
                ),
            )?;
            get_department(conn, &id)
        })
    }

    async fn update_department(
        &self,
        id: &str,
        draft: &DepartmentDraft,
    ) -> GatewayResult<Department> {
        require_name(&draft.name)?;
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE departments SET name = ?, code = ?, specialty = ?, formation_type = ?, active = ?
                 WHERE id = ?",
                (
                    draft.name.trim(),
                    draft.code.trim(),
                    &draft.specialty,
                    &draft.formation_type,
                    draft.active as i64,
                    id,
                ),
            )?;
            if changed == 0 {
                return Err(GatewayError::NotFound {
                    kind: EntityKind::Department,
                    id: id.to_string(),
                });
            }
            get_department(conn, id)
        })
    }

    async fn delete_department(&self, id: &str) -> GatewayResult<()> {
        self.with_conn(|conn| {
            let department = get_department(conn, id)?;
            if department.level_count > 0 {
                return Err(GatewayError::Conflict {
                    kind: EntityKind::Department,
                    id: id.to_string(),
                    dependents: format!("{} level(s)", department.level_count),
                });
            }
            let tx = conn.unchecked_transaction()?;
            tx.execute(
                "UPDATE users SET department_id = NULL WHERE department_id = ?",
                [id],
            )?;
            tx.execute("DELETE FROM notifications WHERE department_id = ?", [id])?;
            tx.execute("DELETE FROM departments WHERE id = ?", [id])?;
            tx.commit()?;
            Ok(())
        })
    }

    async fn create_level(&self, draft: &LevelDraft) -> GatewayResult<Level> {
        self.with_conn(|conn| self.insert_level(conn, draft))
    }

    async fn update_level(&self, id: &str, draft: &LevelDraft) -> GatewayResult<Level> {
        self.with_conn(|conn| self.write_level(conn, id, draft))
    }

    async fn delete_level(&self, id: &str) -> GatewayResult<()> {
        self.with_conn(|conn| self.remove_level(conn, id))
    }

    async fn create_my_level(&self, draft: &LevelDraft) -> GatewayResult<Level> {
        let mine = self.my_department_id()?;
        if draft.department_id != mine {
            return Err(GatewayError::Forbidden(format!(
                "department {} is not yours",
                draft.department_id
            )));
        }
        self.with_conn(|conn| self.insert_level(conn, draft))
    }

    async fn update_my_level(&self, id: &str, draft: &LevelDraft) -> GatewayResult<Level> {
        let mine = self.my_department_id()?;
        if draft.department_id != mine {
            return Err(GatewayError::Forbidden(format!(
                "department {} is not yours",
                draft.department_id
            )));
        }
        self.with_conn(|conn| self.write_level(conn, id, draft))
    }

    async fn delete_my_level(&self, id: &str) -> GatewayResult<()> {
        self.my_department_id()?;
        self.with_conn(|conn| self.remove_level(conn, id))
    }

    async fn create_class(&self, draft: &ClassDraft) -> GatewayResult<Class> {
        self.with_conn(|conn| self.insert_class(conn, draft))
    }

    async fn update_class(&self, id: &str, draft: &ClassDraft) -> GatewayResult<Class> {
        self.with_conn(|conn| self.write_class(conn, id, draft))
    }

    async fn delete_class(&self, id: &str) -> GatewayResult<()> {
        self.with_conn(|conn| self.remove_class(conn, id))
    }

    async fn create_my_class(&self, draft: &ClassDraft) -> GatewayResult<Class> {
        let mine = self.my_department_id()?;
        if draft.department_id != mine {
            return Err(GatewayError::Forbidden(format!(
                "department {} is not yours",
                draft.department_id
            )));
        }
        self.with_conn(|conn| self.insert_class(conn, draft))
    }

    async fn update_my_class(&self, id: &str, draft: &ClassDraft) -> GatewayResult<Class> {
        let mine = self.my_department_id()?;
        if draft.department_id != mine {
            return Err(GatewayError::Forbidden(format!(
                "department {} is not yours",
                draft.department_id
            )));
        }
        self.with_conn(|conn| self.write_class(conn, id, draft))
    }

    async fn delete_my_class(&self, id: &str) -> GatewayResult<()> {
        self.my_department_id()?;
        self.with_conn(|conn| self.remove_class(conn, id))
    }

    async fn list_users_by_role(&self, role: Role) -> GatewayResult<Vec<UserRecord>> {
        self.with_conn(|conn| {
            query_list(
                conn,
                &format!("{USER_SELECT} WHERE u.role = ? ORDER BY u.last_name, u.first_name"),
                vec![Value::Text(role.as_str().to_string())],
                user_row,
            )
        })
    }

    async fn create_user(&self, draft: &UserDraft) -> GatewayResult<UserRecord> {
        if draft.first_name.trim().is_empty() || draft.last_name.trim().is_empty() {
            return Err(GatewayError::Failed("first and last name are required".into()));
        }
        self.with_conn(|conn| {
            let mut department_id = draft.department_id.clone();
            if let Some(class_id) = &draft.class_id {
                if draft.role != Role::Student {
                    return Err(GatewayError::Failed(
                        "only students are bound to a class".into(),
                    ));
                }
                let class = get_class(conn, class_id)?;
                department_id = Some(class.department_id);
            }
            if let Some(d) = &department_id {
                get_department(conn, d)?;
            }
            let id = Uuid::new_v4().to_string();
            conn.execute(
                "INSERT INTO users(id, first_name, last_name, email, role, department_id, class_id, created_at)
                 VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
                (
                    &id,
                    draft.first_name.trim(),
                    draft.last_name.trim(),
                    draft.email.trim(),
                    draft.role.as_str(),
                    &department_id,
                    &draft.class_id,
                    now(),
                ),
            )?;
            get_user(conn, &id)
        })
    }

    async fn assign_chief(&self, department_id: &str, user_id: &str) -> GatewayResult<()> {
        self.with_conn(|conn| {
            let department = get_department(conn, department_id)?;
            let user = get_user(conn, user_id)?;
            if user.role != Role::Chief {
                return Err(GatewayError::Failed(format!(
                    "user {user_id} is not a department chief"
                )));
            }
            let tx = conn.unchecked_transaction()?;
            if let Some(previous) = &department.chief_id {
                tx.execute(
                    "UPDATE users SET department_id = NULL WHERE id = ?",
                    [previous],
                )?;
            }
            tx.execute(
                "UPDATE departments SET chief_id = NULL WHERE chief_id = ?",
                [user_id],
            )?;
            tx.execute(
                "UPDATE departments SET chief_id = ? WHERE id = ?",
                (user_id, department_id),
            )?;
            tx.execute(
                "UPDATE users SET department_id = ? WHERE id = ?",
                (department_id, user_id),
            )?;
            notify(
                &tx,
                department_id,
                format!("{} is now head of {}", user.display_name(), department.name),
            )?;
            tx.commit()?;
            Ok(())
        })
    }

    async fn remove_chief(&self, department_id: &str) -> GatewayResult<()> {
        self.with_conn(|conn| {
            let department = get_department(conn, department_id)?;
            let tx = conn.unchecked_transaction()?;
            if let Some(chief) = &department.chief_id {
                tx.execute("UPDATE users SET department_id = NULL WHERE id = ?", [chief])?;
            }
            tx.execute(
                "UPDATE departments SET chief_id = NULL WHERE id = ?",
                [department_id],
            )?;
            tx.commit()?;
            Ok(())
        })
    }

    async fn assign_teacher(&self, class_id: &str, teacher_id: &str) -> GatewayResult<()> {
        self.with_conn(|conn| {
            self.guard_class(conn, class_id)?;
            let teacher = get_user(conn, teacher_id)?;
            if teacher.role != Role::Teacher {
                return Err(GatewayError::Failed(format!(
                    "user {teacher_id} is not a teacher"
                )));
            }
            conn.execute(
                "INSERT OR IGNORE INTO class_teachers(class_id, teacher_id) VALUES(?, ?)",
                (class_id, teacher_id),
            )?;
            Ok(())
        })
    }

    async fn my_students(&self) -> GatewayResult<Vec<UserRecord>> {
        let mine = self.my_department_id()?;
        self.with_conn(|conn| {
            query_list(
                conn,
                &format!(
                    "{USER_SELECT} WHERE u.role = 'STUDENT' AND (u.department_id = ?1
                       OR u.class_id IN (SELECT id FROM classes WHERE department_id = ?1))
                     ORDER BY u.last_name, u.first_name"
                ),
                vec![Value::Text(mine)],
                user_row,
            )
        })
    }

    async fn my_teachers(&self) -> GatewayResult<Vec<UserRecord>> {
        let mine = self.my_department_id()?;
        self.with_conn(|conn| {
            query_list(
                conn,
                &format!(
                    "{USER_SELECT} WHERE u.role = 'TEACHER' AND (u.department_id = ?1
                       OR u.id IN (
                         SELECT ct.teacher_id FROM class_teachers ct
                         JOIN classes c ON c.id = ct.class_id
                         WHERE c.department_id = ?1))
                     ORDER BY u.last_name, u.first_name"
                ),
                vec![Value::Text(mine)],
                user_row,
            )
        })
    }

    async fn my_notifications(&self) -> GatewayResult<Vec<Notification>> {
        let mine = self.my_department_id()?;
        self.with_conn(|conn| {
            query_list(
                conn,
                "SELECT id, department_id, message, created_at FROM notifications
                 WHERE department_id = ? ORDER BY created_at DESC, rowid DESC",
                vec![Value::Text(mine)],
                |row| {
                    Ok(Notification {
                        id: row.get(0)?,
                        department_id: row.get(1)?,
                        message: row.get(2)?,
                        created_at: row.get(3)?,
                    })
                },
            )
        })
    }

    async fn remove_student_from_class(
        &self,
        class_id: &str,
        student_id: &str,
    ) -> GatewayResult<()> {
        self.with_conn(|conn| {
            self.guard_class(conn, class_id)?;
            let changed = conn.execute(
                "UPDATE users SET class_id = NULL WHERE id = ? AND class_id = ? AND role = 'STUDENT'",
                (student_id, class_id),
            )?;
            if changed == 0 {
                return Err(GatewayError::NotFound {
                    kind: EntityKind::User,
                    id: student_id.to_string(),
                });
            }
            Ok(())
        })
    }

    async fn remove_students_from_class(
        &self,
        class_id: &str,
        student_ids: &[String],
    ) -> GatewayResult<usize> {
        self.with_conn(|conn| {
            self.guard_class(conn, class_id)?;
            // A repeated id is one removal, not a second miss.
            let mut seen = HashSet::new();
            let unique: Vec<&String> = student_ids
                .iter()
                .filter(|id| seen.insert(id.as_str()))
                .collect();
            let tx = conn.unchecked_transaction()?;
            for &student_id in &unique {
                let changed = tx.execute(
                    "UPDATE users SET class_id = NULL WHERE id = ? AND class_id = ? AND role = 'STUDENT'",
                    (student_id, class_id),
                )?;
                if changed == 0 {
                    // Dropping the transaction rolls back the earlier removals.
                    return Err(GatewayError::NotFound {
                        kind: EntityKind::User,
                        id: student_id.to_string(),
                    });
                }
            }
            tx.commit()?;
            Ok(unique.len())
        })
    }
}

fn course_row(row: &Row<'_>) -> rusqlite::Result<Course> {
    Ok(Course {
        id: row.get(0)?,
        name: row.get(1)?,
        code: row.get(2)?,
        credits: row.get(3)?,
        level_id: row.get(4)?,
    })
}

fn get_course(conn: &Connection, id: &str) -> GatewayResult<Course> {
    conn.query_row(
        "SELECT id, name, code, credits, level_id FROM courses WHERE id = ?",
        [id],
        course_row,
    )
    .optional()?
    .ok_or_else(|| GatewayError::NotFound {
        kind: EntityKind::Course,
        id: id.to_string(),
    })
}

const ASSIGNMENT_SELECT: &str = "SELECT
       a.id,
       a.course_id,
       co.name,
       a.teacher_id,
       u.first_name || ' ' || u.last_name,
       a.level_id,
       a.class_id
     FROM course_assignments a
     JOIN courses co ON co.id = a.course_id
     JOIN users u ON u.id = a.teacher_id";

fn assignment_row(row: &Row<'_>) -> rusqlite::Result<CourseAssignment> {
    Ok(CourseAssignment {
        id: row.get(0)?,
        course_id: row.get(1)?,
        course_name: row.get(2)?,
        teacher_id: row.get(3)?,
        teacher_name: row.get(4)?,
        level_id: row.get(5)?,
        class_id: row.get(6)?,
    })
}

#[async_trait]
impl CourseCatalog for SqliteGateway {
    async fn list_courses(&self, level_id: &str) -> GatewayResult<Vec<Course>> {
        self.with_conn(|conn| {
            self.guard_level(conn, level_id)?;
            query_list(
                conn,
                "SELECT id, name, code, credits, level_id FROM courses WHERE level_id = ? ORDER BY sort_order",
                vec![Value::Text(level_id.to_string())],
                course_row,
            )
        })
    }

    async fn create_course(&self, draft: &CourseDraft) -> GatewayResult<Course> {
        require_name(&draft.name)?;
        self.with_conn(|conn| {
            self.guard_level(conn, &draft.level_id)?;
            let id = Uuid::new_v4().to_string();
            let sort_order = next_sort_order(conn, "courses")?;
            conn.execute(
                "INSERT INTO courses(id, level_id, name, code, credits, sort_order) VALUES(?, ?, ?, ?, ?, ?)",
                (
                    &id,
                    &draft.level_id,
                    draft.name.trim(),
                    draft.code.trim(),
                    draft.credits,
                    sort_order,
                ),
            )?;
            get_course(conn, &id)
        })
    }

    async fn update_course(&self, id: &str, draft: &CourseDraft) -> GatewayResult<Course> {
        require_name(&draft.name)?;
        self.with_conn(|conn| {
            let existing = get_course(conn, id)?;
            self.guard_level(conn, &existing.level_id)?;
            self.guard_level(conn, &draft.level_id)?;
            conn.execute(
                "UPDATE courses SET level_id = ?, name = ?, code = ?, credits = ? WHERE id = ?",
                (
                    &draft.level_id,
                    draft.name.trim(),
                    draft.code.trim(),
                    draft.credits,
                    id,
                ),
            )?;
            get_course(conn, id)
        })
    }

    async fn delete_course(&self, id: &str) -> GatewayResult<()> {
        self.with_conn(|conn| {
            let course = get_course(conn, id)?;
            self.guard_level(conn, &course.level_id)?;
            let assigned = count(
                conn,
                "SELECT COUNT(*) FROM course_assignments WHERE course_id = ?",
                id,
            )?;
            if assigned > 0 {
                return Err(GatewayError::Conflict {
                    kind: EntityKind::Course,
                    id: id.to_string(),
                    dependents: format!("{assigned} teacher assignment(s)"),
                });
            }
            conn.execute("DELETE FROM courses WHERE id = ?", [id])?;
            Ok(())
        })
    }

    async fn list_course_assignments(
        &self,
        level_id: &str,
    ) -> GatewayResult<Vec<CourseAssignment>> {
        self.with_conn(|conn| {
            self.guard_level(conn, level_id)?;
            query_list(
                conn,
                &format!("{ASSIGNMENT_SELECT} WHERE a.level_id = ? ORDER BY co.sort_order, u.last_name"),
                vec![Value::Text(level_id.to_string())],
                assignment_row,
            )
        })
    }

    async fn create_course_assignment(
        &self,
        draft: &CourseAssignmentDraft,
    ) -> GatewayResult<CourseAssignment> {
        self.with_conn(|conn| {
            self.guard_level(conn, &draft.level_id)?;
            let course = get_course(conn, &draft.course_id)?;
            if course.level_id != draft.level_id {
                return Err(GatewayError::Failed(format!(
                    "course {} is not taught at level {}",
                    course.id, draft.level_id
                )));
            }
            let teacher = get_user(conn, &draft.teacher_id)?;
            if teacher.role != Role::Teacher {
                return Err(GatewayError::Failed(format!(
                    "user {} is not a teacher",
                    teacher.id
                )));
            }
            if let Some(class_id) = &draft.class_id {
                let class = get_class(conn, class_id)?;
                if class.level_id != draft.level_id {
                    return Err(GatewayError::Failed(format!(
                        "class {class_id} is not part of level {}",
                        draft.level_id
                    )));
                }
            }
            let id = Uuid::new_v4().to_string();
            conn.execute(
                "INSERT INTO course_assignments(id, course_id, teacher_id, level_id, class_id)
                 VALUES(?, ?, ?, ?, ?)",
                (
                    &id,
                    &draft.course_id,
                    &draft.teacher_id,
                    &draft.level_id,
                    &draft.class_id,
                ),
            )?;
            conn.query_row(
                &format!("{ASSIGNMENT_SELECT} WHERE a.id = ?"),
                [&id],
                assignment_row,
            )
            .map_err(GatewayError::from)
        })
    }

    async fn delete_course_assignment(&self, id: &str) -> GatewayResult<()> {
        self.with_conn(|conn| {
            let level_id: Option<String> = conn
                .query_row(
                    "SELECT level_id FROM course_assignments WHERE id = ?",
                    [id],
                    |r| r.get(0),
                )
                .optional()?;
            let Some(level_id) = level_id else {
                return Err(GatewayError::NotFound {
                    kind: EntityKind::Course,
                    id: id.to_string(),
                });
            };
            self.guard_level(conn, &level_id)?;
            conn.execute("DELETE FROM course_assignments WHERE id = ?", [id])?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    fn gateway() -> SqliteGateway {
        let conn = db::open_in_memory().expect("open in-memory db");
        SqliteGateway::new(Arc::new(Mutex::new(conn)))
    }

    fn block_on<F: std::future::Future>(f: F) -> F::Output {
        tokio::runtime::Builder::new_current_thread()
            .build()
            .expect("runtime")
            .block_on(f)
    }

    fn department_draft(name: &str) -> DepartmentDraft {
        DepartmentDraft {
            name: name.into(),
            code: name.into(),
            specialty: "COMPUTER_SCIENCE".into(),
            formation_type: "INITIAL".into(),
            active: true,
        }
    }

    #[test]
    fn delete_level_with_classes_is_a_conflict() {
        let gw = gateway();
        block_on(async {
            let d = gw.create_department(&department_draft("CS101")).await.expect("dept");
            let l = gw
                .create_level(&LevelDraft {
                    name: "L1".into(),
                    code: "L1".into(),
                    year: 1,
                    department_id: d.id.clone(),
                })
                .await
                .expect("level");
            gw.create_class(&ClassDraft {
                name: "C1".into(),
                code: "C1".into(),
                capacity: 30,
                department_id: d.id.clone(),
                level_id: l.id.clone(),
            })
            .await
            .expect("class");

            let err = gw.delete_level(&l.id).await.unwrap_err();
            assert!(matches!(err, GatewayError::Conflict { kind: EntityKind::Level, .. }));

            let levels = gw.list_levels(Some(d.id.as_str())).await.expect("levels");
            assert_eq!(levels.len(), 1);
            assert_eq!(levels[0].class_count, 1);
        });
    }

    #[test]
    fn bulk_student_removal_is_all_or_nothing() {
        let gw = gateway();
        block_on(async {
            let d = gw.create_department(&department_draft("EE200")).await.expect("dept");
            let l = gw
                .create_level(&LevelDraft {
                    name: "L1".into(),
                    code: "L1".into(),
                    year: 2,
                    department_id: d.id.clone(),
                })
                .await
                .expect("level");
            let c = gw
                .create_class(&ClassDraft {
                    name: "C1".into(),
                    code: "C1".into(),
                    capacity: 30,
                    department_id: d.id.clone(),
                    level_id: l.id.clone(),
                })
                .await
                .expect("class");
            let s = gw
                .create_user(&UserDraft {
                    first_name: "Grace".into(),
                    last_name: "Hopper".into(),
                    email: String::new(),
                    role: Role::Student,
                    department_id: None,
                    class_id: Some(c.id.clone()),
                })
                .await
                .expect("student");

            let err = gw
                .remove_students_from_class(&c.id, &[s.id.clone(), "ghost".to_string()])
                .await
                .unwrap_err();
            assert!(matches!(err, GatewayError::NotFound { .. }));
            assert_eq!(gw.class_students(&c.id).await.expect("roster").len(), 1);

            let removed = gw
                .remove_students_from_class(&c.id, &[s.id.clone()])
                .await
                .expect("remove");
            assert_eq!(removed, 1);
            assert!(gw.class_students(&c.id).await.expect("roster").is_empty());
        });
    }

    #[test]
    fn bulk_student_removal_ignores_repeated_ids() {
        let gw = gateway();
        block_on(async {
            let d = gw.create_department(&department_draft("CS101")).await.expect("dept");
            let l = gw
                .create_level(&LevelDraft {
                    name: "L1".into(),
                    code: "L1".into(),
                    year: 1,
                    department_id: d.id.clone(),
                })
                .await
                .expect("level");
            let c = gw
                .create_class(&ClassDraft {
                    name: "C1".into(),
                    code: "C1".into(),
                    capacity: 30,
                    department_id: d.id.clone(),
                    level_id: l.id.clone(),
                })
                .await
                .expect("class");
            let mut ids = Vec::new();
            for first_name in ["Alan", "Barbara"] {
                let s = gw
                    .create_user(&UserDraft {
                        first_name: first_name.into(),
                        last_name: "Student".into(),
                        email: String::new(),
                        role: Role::Student,
                        department_id: None,
                        class_id: Some(c.id.clone()),
                    })
                    .await
                    .expect("student");
                ids.push(s.id);
            }

            let removed = gw
                .remove_students_from_class(&c.id, &[ids[0].clone(), ids[0].clone()])
                .await
                .expect("remove");
            assert_eq!(removed, 1);
            let roster = gw.class_students(&c.id).await.expect("roster");
            assert_eq!(roster.len(), 1);
            assert_eq!(roster[0].id, ids[1]);
        });
    }

    #[test]
    fn chief_endpoints_stay_inside_the_bound_department() {
        let gw = gateway();
        block_on(async {
            let cs = gw.create_department(&department_draft("CS101")).await.expect("cs");
            let ee = gw.create_department(&department_draft("EE200")).await.expect("ee");
            let chief = Actor {
                id: "chief-1".into(),
                role: Role::Chief,
                department_id: Some(cs.id.clone()),
            };
            let scoped = gw.for_actor(&chief);

            assert_eq!(scoped.my_department().await.expect("mine").id, cs.id);
            let err = scoped
                .create_my_level(&LevelDraft {
                    name: "L1".into(),
                    code: "L1".into(),
                    year: 1,
                    department_id: ee.id.clone(),
                })
                .await
                .unwrap_err();
            assert!(matches!(err, GatewayError::Forbidden(_)));

            let other = gw
                .create_level(&LevelDraft {
                    name: "EE-L1".into(),
                    code: "EE-L1".into(),
                    year: 1,
                    department_id: ee.id.clone(),
                })
                .await
                .expect("ee level");
            assert!(matches!(
                scoped.delete_my_level(&other.id).await.unwrap_err(),
                GatewayError::Forbidden(_)
            ));
            assert!(scoped.my_levels().await.expect("my levels").is_empty());
        });
    }
}
