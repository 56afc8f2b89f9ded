//! Vault record and enum definitions.
//!
//! Enum string forms match the `CHECK` constraints in [`crate::db::schema`].

use serde::{Deserialize, Serialize};

/// Who authored a chat turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            "system" => Ok(Self::System),
            _ => Err(format!("unknown message role: {s}")),
        }
    }
}

/// Policy tag controlling whether a fact may leave the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsentScope {
    #[default]
    Default,
    AnalyticsOff,
    NeverUpload,
}

impl ConsentScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::AnalyticsOff => "analytics_off",
            Self::NeverUpload => "never_upload",
        }
    }
}

impl std::fmt::Display for ConsentScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ConsentScope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "default" => Ok(Self::Default),
            "analytics_off" => Ok(Self::AnalyticsOff),
            "never_upload" => Ok(Self::NeverUpload),
            _ => Err(format!("unknown consent scope: {s}")),
        }
    }
}

/// What a note was derived from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoteKind {
    SessionSummary,
    Profile,
    UserNote,
}

impl NoteKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SessionSummary => "session_summary",
            Self::Profile => "profile",
            Self::UserNote => "user_note",
        }
    }
}

impl std::fmt::Display for NoteKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for NoteKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "session_summary" => Ok(Self::SessionSummary),
            "profile" => Ok(Self::Profile),
            "user_note" => Ok(Self::UserNote),
            _ => Err(format!("unknown note kind: {s}")),
        }
    }
}

/// Kind of row an embedding vector belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefType {
    Message,
    Fact,
    Note,
}

impl RefType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Message => "message",
            Self::Fact => "fact",
            Self::Note => "note",
        }
    }
}

impl std::str::FromStr for RefType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "message" => Ok(Self::Message),
            "fact" => Ok(Self::Fact),
            "note" => Ok(Self::Note),
            _ => Err(format!("unknown embedding ref type: {s}")),
        }
    }
}

/// A local user profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    pub id: String,
    pub display_name: String,
    pub created_at: String,
    pub updated_at: String,
}

/// A conversation thread.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub identity_id: String,
    pub started_at: String,
    /// `None` while the session is still open.
    pub ended_at: Option<String>,
    pub title: Option<String>,
    pub goal: Option<String>,
}

/// One immutable chat turn. `content` is always plaintext here; sealing happens at the
/// storage boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub session_id: String,
    pub role: Role,
    pub content: String,
    pub created_at: String,
}

/// One belief about an identity, keyed by (identity, category, predicate).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fact {
    pub id: String,
    pub identity_id: String,
    /// Free-form tag, e.g. `personal`, `preference`.
    pub category: String,
    /// Relation name, e.g. `lives_in`.
    pub predicate: String,
    /// Value, e.g. `Philadelphia`.
    pub object: String,
    /// Confidence at `last_reinforced_at`, in `[0.0, 1.0]`.
    pub confidence: f64,
    /// PII sensitivity, 0 (none) to 3 (highly sensitive).
    pub pii_level: u8,
    pub consent_scope: ConsentScope,
    pub source_message_id: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    pub last_reinforced_at: String,
    pub decay_halflife_days: f64,
}

/// A derived text artifact: session summary, rolling profile, or user note.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Note {
    pub id: String,
    pub identity_id: String,
    pub kind: NoteKind,
    pub text: String,
    pub created_at: String,
    pub source_session_id: Option<String>,
}

/// A stored vector for a message, fact, or note.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub ref_type: RefType,
    pub ref_id: String,
    pub model: String,
    pub vector: Vec<f32>,
    pub created_at: String,
}

/// Map an enum parse failure onto a rusqlite conversion error for row mappers.
pub(crate) fn parse_column<T>(value: String, index: usize) -> rusqlite::Result<T>
where
    T: std::str::FromStr<Err = String>,
{
    value.parse().map_err(|e: String| {
        rusqlite::Error::FromSqlConversionFailure(
            index,
            rusqlite::types::Type::Text,
            e.into(),
        )
    })
}
