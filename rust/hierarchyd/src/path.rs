use serde::{Deserialize, Serialize};

/// Selectable depth in the Department -> Level -> Class chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Depth {
    Department,
    Level,
    Class,
}

impl Depth {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "department" => Some(Self::Department),
            "level" => Some(Self::Level),
            "class" => Some(Self::Class),
            _ => None,
        }
    }

    pub fn ordinal(self) -> u8 {
        match self {
            Self::Department => 1,
            Self::Level => 2,
            Self::Class => 3,
        }
    }

    /// The list that gets loaded once a node at this depth is selected.
    pub fn child_list(self) -> ListKind {
        match self {
            Self::Department => ListKind::Levels,
            Self::Level => ListKind::Classes,
            Self::Class => ListKind::Roster,
        }
    }
}

/// Cached lists owned by the cascade, ordered root to leaf.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ListKind {
    Departments,
    Levels,
    Classes,
    Roster,
}

impl ListKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "departments" => Some(Self::Departments),
            "levels" => Some(Self::Levels),
            "classes" => Some(Self::Classes),
            "roster" => Some(Self::Roster),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Departments => "departments",
            Self::Levels => "levels",
            Self::Classes => "classes",
            Self::Roster => "roster",
        }
    }

    /// Depth whose selection is made from this list. The roster is a leaf.
    pub fn selects(self) -> Option<Depth> {
        match self {
            Self::Departments => Some(Depth::Department),
            Self::Levels => Some(Depth::Level),
            Self::Classes => Some(Depth::Class),
            Self::Roster => None,
        }
    }
}

impl std::fmt::Display for ListKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Browse stage, D0 (nothing selected) through D4 (roster loaded).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum Stage {
    D0,
    D1,
    D2,
    D3,
    D4,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectionPath {
    pub department_id: Option<String>,
    pub level_id: Option<String>,
    pub class_id: Option<String>,
}

impl SelectionPath {
    pub fn get(&self, depth: Depth) -> Option<&str> {
        match depth {
            Depth::Department => self.department_id.as_deref(),
            Depth::Level => self.level_id.as_deref(),
            Depth::Class => self.class_id.as_deref(),
        }
    }

    /// Copy of this path with `depth` set to `id` and every deeper field cleared.
    pub fn with(&self, depth: Depth, id: Option<String>) -> Self {
        match depth {
            Depth::Department => Self {
                department_id: id,
                level_id: None,
                class_id: None,
            },
            Depth::Level => Self {
                department_id: self.department_id.clone(),
                level_id: id,
                class_id: None,
            },
            Depth::Class => Self {
                department_id: self.department_id.clone(),
                level_id: self.level_id.clone(),
                class_id: id,
            },
        }
    }

    /// levelId set => departmentId set; classId set => levelId set.
    pub fn is_consistent(&self) -> bool {
        (self.level_id.is_none() || self.department_id.is_some())
            && (self.class_id.is_none() || self.level_id.is_some())
    }

    pub fn deepest(&self) -> Option<Depth> {
        if self.class_id.is_some() {
            Some(Depth::Class)
        } else if self.level_id.is_some() {
            Some(Depth::Level)
        } else if self.department_id.is_some() {
            Some(Depth::Department)
        } else {
            None
        }
    }
}
