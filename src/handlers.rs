//! Request/response handlers exposing vault operations to UI collaborators.
//!
//! Each operation is registered under a `vault:*` channel name on a [`HandlerRegistry`].
//! Payloads and results are JSON; failures come back as plain error strings, never panics.
//! Database work runs on the blocking pool behind the shared vault mutex.

use anyhow::{anyhow, bail};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use crate::config::ContextConfig;
use crate::db::{self, Vault};
use crate::vault::facts::{self, NewFact};
use crate::vault::types::{NoteKind, Role};
use crate::vault::{context, messages, notes, preferences, sessions};

pub type HandlerResult = Result<Value, String>;
pub type HandlerFuture = Pin<Box<dyn Future<Output = HandlerResult> + Send>>;
pub type Handler = Arc<dyn Fn(Value) -> HandlerFuture + Send + Sync>;

/// The open vault shared between handlers and the lifecycle manager. `None` once closed.
pub type SharedVault = Arc<Mutex<Option<Vault>>>;

pub const GET_FACT: &str = "vault:get-fact";
pub const SET_FACT: &str = "vault:set-fact";
pub const LIST_FACTS: &str = "vault:list-facts";
pub const GET_PREFERENCE: &str = "vault:get-preference";
pub const SET_PREFERENCE: &str = "vault:set-preference";
pub const START_SESSION: &str = "vault:start-session";
pub const END_SESSION: &str = "vault:end-session";
pub const APPEND_MESSAGE: &str = "vault:append-message";
pub const SEARCH_SESSIONS: &str = "vault:search-sessions";
pub const ADD_NOTE: &str = "vault:add-note";
pub const BUILD_CONTEXT: &str = "vault:build-context";
pub const STATUS: &str = "vault:status";

/// Every channel [`VaultHandlers::register_all`] installs.
pub const CHANNELS: [&str; 12] = [
    GET_FACT,
    SET_FACT,
    LIST_FACTS,
    GET_PREFERENCE,
    SET_PREFERENCE,
    START_SESSION,
    END_SESSION,
    APPEND_MESSAGE,
    SEARCH_SESSIONS,
    ADD_NOTE,
    BUILD_CONTEXT,
    STATUS,
];

/// Where handlers get installed. Implemented in-process by [`LocalRegistry`]; a UI shell
/// would implement it over its own IPC mechanism.
pub trait HandlerRegistry: Send + Sync {
    /// Install `handler` for `channel`, replacing any previous one.
    fn register(&self, channel: &str, handler: Handler);
    /// Returns whether a handler was removed.
    fn unregister(&self, channel: &str) -> bool;
}

/// In-process registry with direct invocation.
#[derive(Clone, Default)]
pub struct LocalRegistry {
    handlers: Arc<Mutex<HashMap<String, Handler>>>,
}

impl LocalRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Call the handler for `channel` with `payload`.
    pub async fn invoke(&self, channel: &str, payload: Value) -> HandlerResult {
        let handler = {
            let handlers = self
                .handlers
                .lock()
                .map_err(|e| format!("registry lock poisoned: {e}"))?;
            handlers.get(channel).cloned()
        };
        match handler {
            Some(handler) => handler(payload).await,
            None => Err(format!("no handler registered for {channel}")),
        }
    }

    pub fn is_registered(&self, channel: &str) -> bool {
        self.handlers
            .lock()
            .map(|h| h.contains_key(channel))
            .unwrap_or(false)
    }

    /// Registered channel names, sorted.
    pub fn channels(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .handlers
            .lock()
            .map(|h| h.keys().cloned().collect())
            .unwrap_or_default();
        names.sort();
        names
    }
}

impl HandlerRegistry for LocalRegistry {
    fn register(&self, channel: &str, handler: Handler) {
        match self.handlers.lock() {
            Ok(mut handlers) => {
                handlers.insert(channel.to_string(), handler);
            }
            Err(e) => tracing::error!(channel, error = %e, "registry lock poisoned"),
        }
    }

    fn unregister(&self, channel: &str) -> bool {
        self.handlers
            .lock()
            .map(|mut h| h.remove(channel).is_some())
            .unwrap_or(false)
    }
}

// --- Payloads ---

#[derive(Debug, Deserialize)]
pub struct EmptyParams {}

#[derive(Debug, Deserialize)]
pub struct FactKeyParams {
    pub category: String,
    pub predicate: String,
}

#[derive(Debug, Deserialize)]
pub struct ListFactsParams {
    #[serde(default)]
    pub category: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct GetPreferenceParams {
    pub key: String,
}

#[derive(Debug, Deserialize)]
pub struct SetPreferenceParams {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Deserialize)]
pub struct StartSessionParams {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub goal: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SessionIdParams {
    pub session_id: String,
}

#[derive(Debug, Deserialize)]
pub struct AppendMessageParams {
    pub session_id: String,
    pub role: Role,
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub struct SearchSessionsParams {
    pub query: String,
    #[serde(default = "default_search_limit")]
    pub limit: usize,
}

fn default_search_limit() -> usize {
    20
}

#[derive(Debug, Deserialize)]
pub struct AddNoteParams {
    #[serde(default = "default_note_kind")]
    pub kind: NoteKind,
    pub text: String,
    #[serde(default)]
    pub source_session_id: Option<String>,
}

fn default_note_kind() -> NoteKind {
    NoteKind::UserNote
}

#[derive(Debug, Serialize)]
struct StatusResponse {
    identity_id: String,
    #[serde(flatten)]
    health: db::HealthReport,
}

/// A null payload is treated as `{}`.
fn parse_payload<P: DeserializeOwned>(channel: &str, payload: Value) -> Result<P, String> {
    let payload = if payload.is_null() { json!({}) } else { payload };
    serde_json::from_value(payload).map_err(|e| format!("{channel}: invalid payload: {e}"))
}

/// Vault operations bound to one identity.
#[derive(Clone)]
pub struct VaultHandlers {
    vault: SharedVault,
    identity_id: String,
    context: ContextConfig,
}

impl VaultHandlers {
    pub fn new(vault: SharedVault, identity_id: &str, context: ContextConfig) -> Self {
        Self {
            vault,
            identity_id: identity_id.to_string(),
            context,
        }
    }

    /// Install a handler for every channel in [`CHANNELS`].
    pub fn register_all(&self, registry: &dyn HandlerRegistry) {
        self.route(registry, GET_FACT, Self::get_fact);
        self.route(registry, SET_FACT, Self::set_fact);
        self.route(registry, LIST_FACTS, Self::list_facts);
        self.route(registry, GET_PREFERENCE, Self::get_preference);
        self.route(registry, SET_PREFERENCE, Self::set_preference);
        self.route(registry, START_SESSION, Self::start_session);
        self.route(registry, END_SESSION, Self::end_session);
        self.route(registry, APPEND_MESSAGE, Self::append_message);
        self.route(registry, SEARCH_SESSIONS, Self::search_sessions);
        self.route(registry, ADD_NOTE, Self::add_note);
        self.route(registry, BUILD_CONTEXT, Self::build_context);
        self.route(registry, STATUS, Self::status);
        tracing::debug!(channels = CHANNELS.len(), "vault handlers registered");
    }

    fn route<P, F, Fut>(&self, registry: &dyn HandlerRegistry, channel: &'static str, handle: F)
    where
        P: DeserializeOwned + 'static,
        F: Fn(VaultHandlers, P) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        let this = self.clone();
        registry.register(
            channel,
            Arc::new(move |payload: Value| -> HandlerFuture {
                let call = parse_payload::<P>(channel, payload).map(|p| handle(this.clone(), p));
                Box::pin(async move { call?.await })
            }),
        );
    }

    /// Run `f` against the open vault on the blocking pool and serialize its result.
    async fn with_vault<T, F>(&self, op: &'static str, f: F) -> HandlerResult
    where
        T: Serialize + Send + 'static,
        F: FnOnce(&Vault, &str) -> anyhow::Result<T> + Send + 'static,
    {
        let vault = Arc::clone(&self.vault);
        let identity_id = self.identity_id.clone();
        let result = tokio::task::spawn_blocking(move || {
            let guard = vault
                .lock()
                .map_err(|e| anyhow!("vault lock poisoned: {e}"))?;
            let Some(vault) = guard.as_ref() else {
                bail!("vault is closed");
            };
            f(vault, &identity_id)
        })
        .await
        .map_err(|e| format!("vault task failed: {e}"))?
        .map_err(|e| format!("{op} failed: {e:#}"))?;

        serde_json::to_value(result).map_err(|e| format!("serialization failed: {e}"))
    }

    async fn get_fact(self, p: FactKeyParams) -> HandlerResult {
        self.with_vault("get-fact", move |v, who| {
            facts::get_fact(&v.conn, who, &p.category, &p.predicate)
        })
        .await
    }

    async fn set_fact(self, p: NewFact) -> HandlerResult {
        tracing::info!(category = %p.category, predicate = %p.predicate, "set-fact");
        self.with_vault("set-fact", move |v, who| facts::upsert_fact(&v.conn, who, &p))
            .await
    }

    async fn list_facts(self, p: ListFactsParams) -> HandlerResult {
        self.with_vault("list-facts", move |v, who| {
            facts::list_facts(&v.conn, who, p.category.as_deref())
        })
        .await
    }

    async fn get_preference(self, p: GetPreferenceParams) -> HandlerResult {
        self.with_vault("get-preference", move |v, who| {
            let value = preferences::get_preference(&v.conn, who, &p.key)?;
            Ok(json!({ "key": p.key, "value": value }))
        })
        .await
    }

    async fn set_preference(self, p: SetPreferenceParams) -> HandlerResult {
        self.with_vault("set-preference", move |v, who| {
            preferences::set_preference(&v.conn, who, &p.key, &p.value)
        })
        .await
    }

    async fn start_session(self, p: StartSessionParams) -> HandlerResult {
        self.with_vault("start-session", move |v, who| {
            sessions::start_session(&v.conn, who, p.title.as_deref(), p.goal.as_deref())
        })
        .await
    }

    async fn end_session(self, p: SessionIdParams) -> HandlerResult {
        self.with_vault("end-session", move |v, _| sessions::end_session(&v.conn, &p.session_id))
            .await
    }

    async fn append_message(self, p: AppendMessageParams) -> HandlerResult {
        self.with_vault("append-message", move |v, _| {
            messages::append_message(&v.conn, v.cipher(), &p.session_id, p.role, &p.content)
        })
        .await
    }

    async fn search_sessions(self, p: SearchSessionsParams) -> HandlerResult {
        self.with_vault("search-sessions", move |v, _| {
            sessions::search_sessions(&v.conn, &p.query, p.limit)
        })
        .await
    }

    async fn add_note(self, p: AddNoteParams) -> HandlerResult {
        self.with_vault("add-note", move |v, who| {
            notes::add_note(
                &v.conn,
                v.cipher(),
                who,
                p.kind,
                &p.text,
                p.source_session_id.as_deref(),
            )
        })
        .await
    }

    async fn build_context(self, _: EmptyParams) -> HandlerResult {
        let config = self.context.clone();
        self.with_vault("build-context", move |v, who| {
            let ctx = context::build_context(&v.conn, v.cipher(), who, &config, chrono::Utc::now())?;
            let prompt = ctx.to_prompt();
            Ok(json!({ "context": ctx, "prompt": prompt }))
        })
        .await
    }

    async fn status(self, _: EmptyParams) -> HandlerResult {
        self.with_vault("status", move |v, who| {
            Ok(StatusResponse {
                identity_id: who.to_string(),
                health: db::check_vault_health(&v.conn)?,
            })
        })
        .await
    }
}
