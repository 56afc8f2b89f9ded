//! Append-only chat messages. Content is sealed when the vault is encrypted.

use anyhow::{Context, Result};
use rusqlite::{params, Connection};

use super::types::{parse_column, Message, Role};
use crate::crypto::{self, ContentCipher};

/// Append a message to a session. Fails if the session does not exist.
pub fn append_message(
    conn: &Connection,
    cipher: Option<&ContentCipher>,
    session_id: &str,
    role: Role,
    content: &str,
) -> Result<Message> {
    let message = Message {
        id: uuid::Uuid::now_v7().to_string(),
        session_id: session_id.to_string(),
        role,
        content: content.to_string(),
        created_at: chrono::Utc::now().to_rfc3339(),
    };
    insert_message(conn, cipher, &message)?;
    Ok(message)
}

/// Insert a fully-specified message row (used by the legacy importer).
pub fn insert_message(
    conn: &Connection,
    cipher: Option<&ContentCipher>,
    message: &Message,
) -> Result<()> {
    let stored = crypto::seal_opt(cipher, &message.content)?;
    conn.execute(
        "INSERT INTO messages (id, session_id, role, content, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            message.id,
            message.session_id,
            message.role.as_str(),
            stored,
            message.created_at,
        ],
    )
    .with_context(|| format!("failed to append message to session {}", message.session_id))?;
    Ok(())
}

/// All messages in a session, oldest first, with content decrypted.
pub fn list_messages(
    conn: &Connection,
    cipher: Option<&ContentCipher>,
    session_id: &str,
) -> Result<Vec<Message>> {
    let mut stmt = conn.prepare(
        "SELECT id, session_id, role, content, created_at FROM messages \
         WHERE session_id = ?1 ORDER BY created_at, rowid",
    )?;
    let rows = stmt
        .query_map(params![session_id], |row| {
            Ok(Message {
                id: row.get(0)?,
                session_id: row.get(1)?,
                role: parse_column(row.get(2)?, 2)?,
                content: row.get(3)?,
                created_at: row.get(4)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    rows.into_iter()
        .map(|mut m| {
            m.content = crypto::open_opt(cipher, m.content)?;
            Ok(m)
        })
        .collect()
}

pub fn count_messages(conn: &Connection, session_id: &str) -> Result<i64> {
    Ok(conn.query_row(
        "SELECT COUNT(*) FROM messages WHERE session_id = ?1",
        params![session_id],
        |row| row.get(0),
    )?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KEY_SIZE;
    use crate::db;
    use crate::vault::{identity, sessions};

    #[test]
    fn append_and_list_in_order() {
        let vault = db::open_memory_vault(None).unwrap();
        let who = identity::ensure_identity(&vault.conn, "Ada").unwrap();
        let s = sessions::start_session(&vault.conn, &who.id, None, None).unwrap();

        append_message(&vault.conn, None, &s.id, Role::User, "hello").unwrap();
        append_message(&vault.conn, None, &s.id, Role::Assistant, "hi there").unwrap();

        let messages = list_messages(&vault.conn, None, &s.id).unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::User);
        assert_eq!(messages[1].content, "hi there");
    }

    #[test]
    fn append_to_missing_session_fails() {
        let vault = db::open_memory_vault(None).unwrap();
        let result = append_message(&vault.conn, None, "no-such-session", Role::User, "hi");
        assert!(result.is_err());
    }

    #[test]
    fn encrypted_content_is_not_stored_in_plaintext() {
        let cipher = ContentCipher::new([9; KEY_SIZE]);
        let vault = db::open_memory_vault(Some(&cipher)).unwrap();
        let who = identity::ensure_identity(&vault.conn, "Ada").unwrap();
        let s = sessions::start_session(&vault.conn, &who.id, None, None).unwrap();

        append_message(&vault.conn, vault.cipher(), &s.id, Role::User, "my secret").unwrap();

        let raw: String = vault
            .conn
            .query_row("SELECT content FROM messages", [], |r| r.get(0))
            .unwrap();
        assert!(!raw.contains("my secret"));

        let messages = list_messages(&vault.conn, vault.cipher(), &s.id).unwrap();
        assert_eq!(messages[0].content, "my secret");
    }
}
