use crate::model::Role;

const ROLE_LABELS: &[(&str, &str)] = &[
    ("ADMIN", "Administrator"),
    ("CHIEF", "Head of department"),
    ("TEACHER", "Teacher"),
    ("STUDENT", "Student"),
];

const SPECIALTY_LABELS: &[(&str, &str)] = &[
    ("COMPUTER_SCIENCE", "Computer Science"),
    ("SOFTWARE_ENGINEERING", "Software Engineering"),
    ("ELECTRICAL_ENGINEERING", "Electrical Engineering"),
    ("MECHANICAL_ENGINEERING", "Mechanical Engineering"),
    ("CIVIL_ENGINEERING", "Civil Engineering"),
    ("TELECOMMUNICATIONS", "Telecommunications"),
    ("MATHEMATICS", "Mathematics"),
    ("MANAGEMENT", "Management"),
];

const FORMATION_LABELS: &[(&str, &str)] = &[
    ("INITIAL", "Initial training"),
    ("CONTINUING", "Continuing education"),
    ("APPRENTICESHIP", "Apprenticeship"),
    ("DISTANCE", "Distance learning"),
];

const YEAR_LABELS: &[&str] = &["1st year", "2nd year", "3rd year", "4th year", "5th year"];

fn lookup(table: &[(&str, &str)], raw: &str) -> String {
    table
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(raw))
        .map(|(_, v)| v.to_string())
        .unwrap_or_else(|| raw.to_string())
}

pub fn role_label(role: Role) -> String {
    lookup(ROLE_LABELS, role.as_str())
}

/// Unmapped values come back unchanged.
pub fn specialty_label(raw: &str) -> String {
    lookup(SPECIALTY_LABELS, raw)
}

pub fn formation_label(raw: &str) -> String {
    lookup(FORMATION_LABELS, raw)
}

pub fn year_label(year: u8) -> String {
    usize::from(year)
        .checked_sub(1)
        .and_then(|i| YEAR_LABELS.get(i))
        .map(|s| s.to_string())
        .unwrap_or_else(|| year.to_string())
}
