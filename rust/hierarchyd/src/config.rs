use std::path::PathBuf;

pub const WORKSPACE_VAR: &str = "HIERARCHYD_WORKSPACE";
pub const LOG_VAR: &str = "HIERARCHYD_LOG";
const DEFAULT_LOG_FILTER: &str = "info";

/// Daemon settings read from the environment, after an optional `.env`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaemonConfig {
    /// Workspace opened at startup. Hosts can still switch with `workspace.select`.
    pub workspace: Option<PathBuf>,
    pub log_filter: String,
}

impl DaemonConfig {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_blank = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        Self {
            workspace: non_blank(WORKSPACE_VAR).map(PathBuf::from),
            log_filter: non_blank(LOG_VAR).unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_apply_when_unset_or_blank() {
        let vars: HashMap<&str, &str> = HashMap::from([(WORKSPACE_VAR, "   ")]);
        let cfg = DaemonConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string()));
        assert_eq!(cfg.workspace, None);
        assert_eq!(cfg.log_filter, "info");
    }

    #[test]
    fn values_are_read_and_trimmed() {
        let vars: HashMap<&str, &str> = HashMap::from([
            (WORKSPACE_VAR, " /tmp/school "),
            (LOG_VAR, "hierarchyd=debug"),
        ]);
        let cfg = DaemonConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string()));
        assert_eq!(cfg.workspace, Some(PathBuf::from("/tmp/school")));
        assert_eq!(cfg.log_filter, "hierarchyd=debug");
    }
}
