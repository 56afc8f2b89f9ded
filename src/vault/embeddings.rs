//! Stored embedding vectors, one per (ref_type, ref_id).
//!
//! Vectors are stored as little-endian `f32` blobs; the schema checks that the blob
//! length matches `dims`.

use anyhow::{bail, Result};
use rusqlite::{params, Connection, OptionalExtension};

use super::types::{Embedding, RefType};

/// Encode an `f32` vector as a little-endian byte blob.
pub fn vector_to_bytes(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|v| v.to_le_bytes()).collect()
}

/// Decode a little-endian `f32` blob.
pub fn bytes_to_vector(bytes: &[u8]) -> Result<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        bail!("embedding blob length {} is not a multiple of 4", bytes.len());
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

/// Store (or replace) the embedding for a row.
pub fn upsert_embedding(
    conn: &Connection,
    ref_type: RefType,
    ref_id: &str,
    model: &str,
    vector: &[f32],
) -> Result<()> {
    if vector.is_empty() {
        bail!("embedding vector must not be empty");
    }
    conn.execute(
        "INSERT INTO embeddings (id, ref_type, ref_id, model, dims, vector, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            uuid::Uuid::now_v7().to_string(),
            ref_type.as_str(),
            ref_id,
            model,
            vector.len() as i64,
            vector_to_bytes(vector),
            chrono::Utc::now().to_rfc3339(),
        ],
    )?;
    Ok(())
}

pub fn get_embedding(conn: &Connection, ref_type: RefType, ref_id: &str) -> Result<Option<Embedding>> {
    let row: Option<(String, Vec<u8>, String)> = conn
        .query_row(
            "SELECT model, vector, created_at FROM embeddings WHERE ref_type = ?1 AND ref_id = ?2",
            params![ref_type.as_str(), ref_id],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .optional()?;

    row.map(|(model, blob, created_at)| {
        Ok(Embedding {
            ref_type,
            ref_id: ref_id.to_string(),
            model,
            vector: bytes_to_vector(&blob)?,
            created_at,
        })
    })
    .transpose()
}

/// Rows embedded with a model other than `model` (candidates for re-embedding).
pub fn count_stale_embeddings(conn: &Connection, model: &str) -> Result<i64> {
    Ok(conn.query_row(
        "SELECT COUNT(*) FROM embeddings WHERE model != ?1",
        params![model],
        |row| row.get(0),
    )?)
}
