//! Job steps (Command pattern).
//!
//! A [`Step`] carries everything needed to run one unit of work against the
//! target store: the databases it needs and the [`Command`] to execute. Steps
//! are plain data, so job files can queue them and the orchestrator can run
//! them later in any order the operator picks.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::core::schema::SourceColumn;

/// One operation on the target store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    /// Create a table from explicit source column metadata.
    CreateTable {
        table: String,
        columns: Vec<SourceColumn>,
    },

    /// Create a table from a catalog export (`system_type_name<TAB>name` lines).
    CreateTableFromCatalog { table: String, catalog: PathBuf },

    /// Load a tab-separated file into an existing table.
    LoadText {
        path: PathBuf,
        table: String,
        /// Overrides `text.has_header` for this file.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        has_header: Option<bool>,
    },

    /// Index the key columns and remove the upper half on duplicates.
    AuditUnique { table: String, keys: Vec<String> },

    /// Create a supporting index.
    CreateIndex {
        table: String,
        keys: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        schema: Option<String>,
    },

    /// Attach another database for the rest of the step.
    Attach {
        database: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        alias: Option<String>,
    },

    /// Run raw SQL.
    Sql { sql: String },

    /// Drop and recreate a table from a query.
    CreateTableAs {
        table: String,
        sql: String,
        #[serde(default)]
        temp: bool,
    },

    /// Write a query's result to a tab-separated file.
    QueryToText {
        sql: String,
        /// File name under the export directory, without extension.
        output: String,
        /// Stop once this many cells were written.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_cells: Option<u64>,
    },
}

impl Command {
    /// Short name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Command::CreateTable { .. } => "create_table",
            Command::CreateTableFromCatalog { .. } => "create_table_from_catalog",
            Command::LoadText { .. } => "load_text",
            Command::AuditUnique { .. } => "audit_unique",
            Command::CreateIndex { .. } => "create_index",
            Command::Attach { .. } => "attach",
            Command::Sql { .. } => "sql",
            Command::CreateTableAs { .. } => "create_table_as",
            Command::QueryToText { .. } => "query_to_text",
        }
    }

    /// Table the command writes to, if any.
    pub fn table(&self) -> Option<&str> {
        match self {
            Command::CreateTable { table, .. }
            | Command::CreateTableFromCatalog { table, .. }
            | Command::LoadText { table, .. }
            | Command::AuditUnique { table, .. }
            | Command::CreateIndex { table, .. }
            | Command::CreateTableAs { table, .. } => Some(table),
            Command::Attach { .. } | Command::Sql { .. } | Command::QueryToText { .. } => None,
        }
    }
}

/// A named, registered unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    /// Unique step name.
    pub name: String,

    /// Menu label (default: the step name).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub menu: Option<String>,

    /// Databases the step needs. The first is opened as main, the rest are
    /// attached under their own names. Empty means the configured store.
    #[serde(default)]
    pub uses: Vec<String>,

    /// What to run.
    pub command: Command,
}

impl Step {
    /// Create a step on the configured store.
    pub fn new(name: impl Into<String>, command: Command) -> Self {
        Self {
            name: name.into(),
            menu: None,
            uses: Vec::new(),
            command,
        }
    }

    /// Set the menu label.
    pub fn with_menu(mut self, menu: impl Into<String>) -> Self {
        self.menu = Some(menu.into());
        self
    }

    /// Set the databases used.
    pub fn with_uses<I, S>(mut self, uses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.uses = uses.into_iter().map(Into::into).collect();
        self
    }

    /// Menu entry for this step.
    pub fn menu_entry(&self) -> MenuEntry {
        MenuEntry {
            name: self.name.clone(),
            menu: self.menu.clone().unwrap_or_else(|| self.name.clone()),
            uses: self.uses.clone(),
        }
    }
}

/// What a menu shows for a step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MenuEntry {
    pub name: String,
    pub menu: String,
    pub uses: Vec<String>,
}

impl MenuEntry {
    /// Label prefixed with the databases used, e.g. `[osf][nfe] Items`.
    pub fn label(&self) -> String {
        let prefix: String = self.uses.iter().map(|u| format!("[{}]", u.trim())).collect();
        if prefix.is_empty() {
            self.menu.clone()
        } else {
            format!("{} {}", prefix, self.menu)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_decorated_with_uses() {
        let step = Step::new("items", Command::Sql { sql: "SELECT 1".into() })
            .with_menu("Items")
            .with_uses(["osf", "nfe", "gia"]);
        assert_eq!(step.menu_entry().label(), "[osf][nfe][gia] Items");
    }

    #[test]
    fn test_label_defaults_to_name() {
        let step = Step::new("items", Command::Sql { sql: "SELECT 1".into() });
        assert_eq!(step.menu_entry().label(), "items");
    }

    #[test]
    fn test_command_yaml_tags() {
        let yaml = "type: create_table_as\ntable: resumo\nsql: SELECT 1 AS x\n";
        let cmd: Command = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(
            cmd,
            Command::CreateTableAs {
                table: "resumo".into(),
                sql: "SELECT 1 AS x".into(),
                temp: false
            }
        );
        assert_eq!(cmd.kind(), "create_table_as");
        assert_eq!(cmd.table(), Some("resumo"));
    }

    #[test]
    fn test_query_to_text_yaml() {
        let yaml = "type: query_to_text\nsql: SELECT * FROM nfe\noutput: relatorios/nfe\n";
        let cmd: Command = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(
            cmd,
            Command::QueryToText {
                sql: "SELECT * FROM nfe".into(),
                output: "relatorios/nfe".into(),
                max_cells: None,
            }
        );
        assert_eq!(cmd.kind(), "query_to_text");
        assert_eq!(cmd.table(), None);
    }

    #[test]
    fn test_create_table_columns_accept_codes_and_names() {
        let yaml = r#"
type: create_table
table: nota
columns:
  - name: id
    source_type: 3
  - name: valor
    source_type: money
"#;
        let cmd: Command = serde_yaml::from_str(yaml).unwrap();
        match cmd {
            Command::CreateTable { columns, .. } => {
                assert_eq!(columns[0], SourceColumn::with_code("id", 3));
                assert_eq!(columns[1], SourceColumn::with_name("valor", "money"));
            }
            other => panic!("unexpected command {:?}", other),
        }
    }
}
