//! Local memory vault and remote-run tracking for a desktop AI assistant.
//!
//! The vault is a single SQLite file holding everything the assistant knows about its user:
//! identities, conversation sessions and their messages, facts, embeddings, and derived notes.
//! It replaces an older store made of four flat JSON files; the first start after an upgrade
//! imports those files once, atomically.
//!
//! | Entity | Notes |
//! |--------|-------|
//! | **Identity** | One per local user profile |
//! | **Session** | Conversation thread; title and goal are full-text searchable |
//! | **Message** | Immutable chat turn; content optionally encrypted, never indexed |
//! | **Fact** | Unique per (identity, category, predicate); a new value replaces the old |
//! | **Embedding** | One vector per message, fact, or note |
//! | **Note** | Session summary, rolling profile, or user note |
//!
//! # Modules
//!
//! - [`config`]: TOML + environment configuration and the on-disk layout
//! - [`db`]: Connection setup, schema, meta table, and health checks
//! - [`vault`]: Typed operations over the schema and context assembly
//! - [`migrate`]: One-shot legacy import with backup, rollback, and a migration log
//! - [`lifecycle`]: Startup state machine that migrates, opens, and exposes the vault
//! - [`handlers`]: `vault:*` request handlers and the registry they are installed on
//! - [`execution`]: Pull-based tracking of multi-step runs on a remote executor
//! - [`crypto`]: Content encryption for message and note text

pub mod config;
pub mod crypto;
pub mod db;
pub mod execution;
pub mod handlers;
pub mod lifecycle;
pub mod migrate;
pub mod vault;
