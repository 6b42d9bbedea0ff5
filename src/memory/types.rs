//! Core memory type definitions.
//!
//! [`ItemKind`] names the six memory tables and resolves to a static [`KindSpec`]
//! describing each table's columns, sentiment prior and decay immunity. [`ItemRef`]
//! identifies a single item across kinds, and [`NewItem`] carries the caller-supplied
//! fields for the write path.

use serde::{Deserialize, Serialize};

/// The six kinds of memory item, one table each.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    /// An architectural or implementation choice and its rationale.
    Decision,
    /// An error that was hit, with its solution when known.
    Error,
    /// Corrective knowledge: an anti-pattern and what to do instead.
    Learning,
    /// Free-form scratch note.
    Note,
    /// Open task left for a later session.
    Unfinished,
    /// A working session; the only kind with a string id.
    Session,
}

/// Decay/pruning immunity rule for a kind.
#[derive(Debug, Clone, Copy)]
pub enum Immunity {
    /// Every active item decays.
    None,
    /// Items with any of these integer flag columns set are immune.
    Flags(&'static [&'static str]),
}

impl Immunity {
    /// SQL guard selecting only non-immune rows, e.g. ` AND core_memory = 0 AND auto_block = 0`.
    pub fn sql_guard(&self) -> String {
        match self {
            Self::None => String::new(),
            Self::Flags(cols) => cols
                .iter()
                .map(|c| format!(" AND COALESCE({c}, 0) = 0"))
                .collect(),
        }
    }

    /// Columns this rule depends on.
    pub fn columns(&self) -> &'static [&'static str] {
        match self {
            Self::None => &[],
            Self::Flags(cols) => *cols,
        }
    }
}

/// Static description of one memory table.
#[derive(Debug)]
pub struct KindSpec {
    pub kind: ItemKind,
    pub table: &'static str,
    pub fts_table: &'static str,
    /// Creation timestamp column (`first_seen` for errors).
    pub created_column: &'static str,
    /// Column used as a display title.
    pub title_column: &'static str,
    /// Columns indexed by FTS5 and scanned for snippets, in index order.
    pub text_columns: &'static [&'static str],
    /// Column holding a manual priority/severity label.
    pub impact_column: Option<&'static str>,
    /// Column holding a JSON array of file paths.
    pub files_column: Option<&'static str>,
    /// Column linking the item to the session it was created in.
    pub session_column: Option<&'static str>,
    /// Fixed sentiment prior used by the importance scorer.
    pub sentiment: f64,
    pub immunity: Immunity,
    pub text_id: bool,
}

static SPECS: [KindSpec; 6] = [
    KindSpec {
        kind: ItemKind::Decision,
        table: "decisions",
        fts_table: "decisions_fts",
        created_column: "created_at",
        title_column: "title",
        text_columns: &["title", "description", "rationale"],
        impact_column: Some("priority"),
        files_column: Some("files"),
        session_column: Some("session_id"),
        sentiment: 0.6,
        immunity: Immunity::None,
        text_id: false,
    },
    KindSpec {
        kind: ItemKind::Error,
        table: "errors",
        fts_table: "errors_fts",
        created_column: "first_seen",
        title_column: "message",
        text_columns: &["message", "error_type", "solution", "context"],
        impact_column: Some("severity"),
        files_column: Some("files"),
        session_column: Some("session_id"),
        sentiment: 0.8,
        immunity: Immunity::None,
        text_id: false,
    },
    KindSpec {
        kind: ItemKind::Learning,
        table: "learnings",
        fts_table: "learnings_fts",
        created_column: "created_at",
        title_column: "title",
        text_columns: &["title", "description", "correct_approach"],
        impact_column: Some("severity"),
        files_column: None,
        session_column: Some("session_id"),
        sentiment: 0.8,
        immunity: Immunity::Flags(&["core_memory", "auto_block"]),
        text_id: false,
    },
    KindSpec {
        kind: ItemKind::Note,
        table: "notes",
        fts_table: "notes_fts",
        created_column: "created_at",
        title_column: "title",
        text_columns: &["title", "content"],
        impact_column: Some("priority"),
        files_column: None,
        session_column: Some("session_id"),
        sentiment: 0.3,
        immunity: Immunity::None,
        text_id: false,
    },
    KindSpec {
        kind: ItemKind::Unfinished,
        table: "unfinished",
        fts_table: "unfinished_fts",
        created_column: "created_at",
        title_column: "description",
        text_columns: &["description", "context"],
        impact_column: Some("priority"),
        files_column: None,
        session_column: Some("session_id"),
        sentiment: 0.5,
        immunity: Immunity::None,
        text_id: false,
    },
    KindSpec {
        kind: ItemKind::Session,
        table: "sessions",
        fts_table: "sessions_fts",
        created_column: "created_at",
        title_column: "project",
        text_columns: &["summary", "project"],
        impact_column: None,
        files_column: None,
        session_column: None,
        sentiment: 0.5,
        immunity: Immunity::None,
        text_id: true,
    },
];

impl ItemKind {
    /// Every kind, in registry (and decay round-robin) order.
    pub const ALL: [ItemKind; 6] = [
        Self::Decision,
        Self::Error,
        Self::Learning,
        Self::Note,
        Self::Unfinished,
        Self::Session,
    ];

    /// Registry entry for this kind.
    pub fn spec(&self) -> &'static KindSpec {
        &SPECS[*self as usize]
    }

    /// SQL-compatible string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Decision => "decision",
            Self::Error => "error",
            Self::Learning => "learning",
            Self::Note => "note",
            Self::Unfinished => "unfinished",
            Self::Session => "session",
        }
    }
}

impl std::fmt::Display for ItemKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ItemKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "decision" => Ok(Self::Decision),
            "error" => Ok(Self::Error),
            "learning" => Ok(Self::Learning),
            "note" => Ok(Self::Note),
            "unfinished" | "todo" => Ok(Self::Unfinished),
            "session" => Ok(Self::Session),
            _ => Err(format!("unknown item kind: {s}")),
        }
    }
}

/// Identity of a single memory item across all kinds.
///
/// Integer ids are carried in their decimal text form so that sessions and the
/// association/embedding tables share one representation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ItemRef {
    #[serde(rename = "type")]
    pub kind: ItemKind,
    pub id: String,
}

impl ItemRef {
    pub fn new(kind: ItemKind, id: impl ToString) -> Self {
        Self {
            kind,
            id: id.to_string(),
        }
    }

    /// Key used by the vector index, e.g. `decision:12`.
    pub fn key(&self) -> String {
        format!("{}:{}", self.kind, self.id)
    }

    /// Parse a `kind:id` key.
    pub fn parse_key(key: &str) -> Option<Self> {
        let (kind, id) = key.split_once(':')?;
        let kind = kind.parse().ok()?;
        (!id.is_empty()).then(|| Self::new(kind, id))
    }

    /// The id as a SQL value matching the table's primary key type.
    pub fn sql_id(&self) -> rusqlite::types::Value {
        use rusqlite::types::Value;
        if self.kind.spec().text_id {
            return Value::Text(self.id.clone());
        }
        match self.id.parse::<i64>() {
            Ok(n) => Value::Integer(n),
            Err(_) => Value::Text(self.id.clone()),
        }
    }
}

impl std::fmt::Display for ItemRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

impl std::str::FromStr for ItemRef {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse_key(s).ok_or_else(|| format!("invalid item reference (want kind:id): {s}"))
    }
}

/// Caller-supplied fields for a new memory item.
///
/// Deserializes from JSON tagged by `type`, e.g.
/// `{"type": "decision", "title": "...", "description": "..."}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NewItem {
    Decision(NewDecision),
    Error(NewError),
    Learning(NewLearning),
    Note(NewNote),
    #[serde(alias = "todo")]
    Unfinished(NewUnfinished),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NewDecision {
    pub title: String,
    pub description: String,
    pub rationale: Option<String>,
    pub alternatives: Option<String>,
    pub files: Vec<String>,
    pub tags: Vec<String>,
    pub priority: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NewError {
    pub message: String,
    pub error_type: Option<String>,
    pub solution: Option<String>,
    pub context: Option<String>,
    pub files: Vec<String>,
    pub severity: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NewLearning {
    pub title: String,
    pub description: String,
    pub correct_approach: Option<String>,
    pub severity: Option<String>,
    pub auto_block: bool,
    pub core_memory: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NewNote {
    pub title: String,
    pub content: String,
    pub category: Option<String>,
    pub priority: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NewUnfinished {
    pub description: String,
    pub context: Option<String>,
    pub priority: Option<String>,
}

impl NewItem {
    pub fn kind(&self) -> ItemKind {
        match self {
            Self::Decision(_) => ItemKind::Decision,
            Self::Error(_) => ItemKind::Error,
            Self::Learning(_) => ItemKind::Learning,
            Self::Note(_) => ItemKind::Note,
            Self::Unfinished(_) => ItemKind::Unfinished,
        }
    }

    /// Required text fields as `(name, value)` pairs.
    pub fn required_fields(&self) -> Vec<(&'static str, &str)> {
        match self {
            Self::Decision(d) => vec![
                ("title", d.title.as_str()),
                ("description", d.description.as_str()),
            ],
            Self::Error(e) => vec![("message", e.message.as_str())],
            Self::Learning(l) => vec![
                ("title", l.title.as_str()),
                ("description", l.description.as_str()),
            ],
            Self::Note(n) => vec![("title", n.title.as_str()), ("content", n.content.as_str())],
            Self::Unfinished(u) => vec![("description", u.description.as_str())],
        }
    }

    /// File references used by the same-file association rule.
    pub fn files(&self) -> &[String] {
        match self {
            Self::Decision(d) => &d.files,
            Self::Error(e) => &e.files,
            _ => &[],
        }
    }

    /// The priority/severity label feeding the impact dimension.
    pub fn impact(&self) -> Option<&str> {
        match self {
            Self::Decision(d) => d.priority.as_deref(),
            Self::Error(e) => e.severity.as_deref(),
            Self::Learning(l) => l.severity.as_deref(),
            Self::Note(n) => n.priority.as_deref(),
            Self::Unfinished(u) => u.priority.as_deref(),
        }
    }

    /// Text handed to the embedding provider.
    pub fn embedding_text(&self) -> String {
        let parts: Vec<&str> = match self {
            Self::Decision(d) => vec![d.title.as_str(), d.description.as_str(), opt(&d.rationale)],
            Self::Error(e) => vec![opt(&e.error_type), e.message.as_str(), opt(&e.solution)],
            Self::Learning(l) => vec![
                l.title.as_str(),
                l.description.as_str(),
                opt(&l.correct_approach),
            ],
            Self::Note(n) => vec![n.title.as_str(), n.content.as_str()],
            Self::Unfinished(u) => vec![u.description.as_str(), opt(&u.context)],
        };
        parts
            .into_iter()
            .filter(|p| !p.trim().is_empty())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

fn opt(value: &Option<String>) -> &str {
    value.as_deref().unwrap_or("")
}

/// A stored memory item with its common memory fields and the raw row.
#[derive(Debug, Clone, Serialize)]
pub struct Item {
    #[serde(flatten)]
    pub item: ItemRef,
    pub title: Option<String>,
    pub created_at: String,
    pub session_id: Option<String>,
    pub access_count: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_accessed: Option<String>,
    /// `None` when the item is pinned.
    pub memory_strength: Option<f64>,
    pub importance_score: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archived_at: Option<String>,
    /// Every column of the row, keyed by column name.
    pub fields: serde_json::Map<String, serde_json::Value>,
}
