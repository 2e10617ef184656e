use crate::error::{PgQueueError, PgQueueResult};

/// Name and key column of one table
///
/// Both are spliced into SQL text, so they are validated up front:
/// plain identifiers, optionally schema-qualified (`schema.table`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableInfo {
    name: String,
    primary_key: String,
}

impl TableInfo {
    pub fn new(name: impl Into<String>, primary_key: impl Into<String>) -> PgQueueResult<Self> {
        let name = name.into();
        let primary_key = primary_key.into();

        if !name.split('.').all(is_identifier) || name.split('.').count() > 2 {
            return Err(PgQueueError::InvalidIdentifier(name));
        }
        if !is_identifier(&primary_key) {
            return Err(PgQueueError::InvalidIdentifier(primary_key));
        }

        Ok(Self { name, primary_key })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn primary_key(&self) -> &str {
        &self.primary_key
    }

    /// Index name derived from the table, without the schema part
    pub(crate) fn index_name(&self, suffix: &str) -> String {
        let table = self.name.rsplit('.').next().unwrap_or(&self.name);
        format!("{table}_{suffix}")
    }
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    s.len() <= 63 && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// The three tables a queue lives in
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueTables {
    pub items: TableInfo,
    pub completed: TableInfo,
    pub broken: TableInfo,
}

impl QueueTables {
    pub const DEFAULT_PREFIX: &'static str = "mrqueue";
    pub const DEFAULT_PRIMARY_KEY: &'static str = "item_id";

    /// `{prefix}_items`, `{prefix}_completed` and `{prefix}_broken`, keyed by `item_id`
    pub fn with_prefix(prefix: &str) -> PgQueueResult<Self> {
        let pk = Self::DEFAULT_PRIMARY_KEY;
        Ok(Self {
            items: TableInfo::new(format!("{prefix}_items"), pk)?,
            completed: TableInfo::new(format!("{prefix}_completed"), pk)?,
            broken: TableInfo::new(format!("{prefix}_broken"), pk)?,
        })
    }
}

impl Default for QueueTables {
    fn default() -> Self {
        let table = |suffix: &str| TableInfo {
            name: format!("{}_{suffix}", Self::DEFAULT_PREFIX),
            primary_key: Self::DEFAULT_PRIMARY_KEY.to_string(),
        };
        Self {
            items: table("items"),
            completed: table("completed"),
            broken: table("broken"),
        }
    }
}
