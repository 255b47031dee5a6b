//! Sealed key-state persistence.
//!
//! Sender-key private exports and receiver states are handed to this
//! module as serialized blobs.  Each blob is sealed with
//! XChaCha20-Poly1305 under the caller-supplied vault key before it is
//! written, so a stolen database file exposes no chain or signing keys.

use chrono::Utc;
use rusqlite::params;

use palaver_shared::crypto;
use palaver_shared::types::{GroupId, UserId};

use crate::database::Database;
use crate::error::{Result, StoreError};

impl Database {
    // ------------------------------------------------------------------
    // Sender key (one per group)
    // ------------------------------------------------------------------

    /// Seal and store the local sender key export for a group, replacing
    /// any previous one.
    pub fn save_sender_key(
        &self,
        vault_key: &[u8; 32],
        group_id: GroupId,
        blob: &[u8],
    ) -> Result<()> {
        let sealed = crypto::encrypt(vault_key, blob)?;
        self.conn().execute(
            "INSERT INTO sender_keys (group_id, blob, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT (group_id) DO UPDATE SET
                 blob = excluded.blob,
                 updated_at = excluded.updated_at",
            params![group_id.0.to_string(), sealed, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    /// Load and unseal the local sender key export for a group.
    pub fn load_sender_key(&self, vault_key: &[u8; 32], group_id: GroupId) -> Result<Vec<u8>> {
        let sealed: Vec<u8> = self
            .conn()
            .query_row(
                "SELECT blob FROM sender_keys WHERE group_id = ?1",
                params![group_id.0.to_string()],
                |row| row.get(0),
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })?;
        Ok(crypto::decrypt(vault_key, &sealed)?)
    }

    // ------------------------------------------------------------------
    // Receiver states (one per remote sender per group)
    // ------------------------------------------------------------------

    /// Seal and store a receiver state for one remote sender.
    pub fn save_receiver_state(
        &self,
        vault_key: &[u8; 32],
        group_id: GroupId,
        sender: &UserId,
        blob: &[u8],
    ) -> Result<()> {
        let sealed = crypto::encrypt(vault_key, blob)?;
        self.conn().execute(
            "INSERT INTO receiver_states (group_id, sender, blob, updated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (group_id, sender) DO UPDATE SET
                 blob = excluded.blob,
                 updated_at = excluded.updated_at",
            params![
                group_id.0.to_string(),
                sender.to_hex(),
                sealed,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Load and unseal every receiver state stored for a group.
    pub fn load_receiver_states(
        &self,
        vault_key: &[u8; 32],
        group_id: GroupId,
    ) -> Result<Vec<(UserId, Vec<u8>)>> {
        let mut stmt = self.conn().prepare(
            "SELECT sender, blob FROM receiver_states WHERE group_id = ?1",
        )?;

        let rows = stmt.query_map(params![group_id.0.to_string()], |row| {
            let sender_hex: String = row.get(0)?;
            let sealed: Vec<u8> = row.get(1)?;
            Ok((sender_hex, sealed))
        })?;

        let mut states = Vec::new();
        for row in rows {
            let (sender_hex, sealed) = row?;
            let sender = UserId::from_hex(&sender_hex)?;
            states.push((sender, crypto::decrypt(vault_key, &sealed)?));
        }
        Ok(states)
    }

    /// Drop the receiver state for one sender (removed from the group).
    pub fn delete_receiver_state(&self, group_id: GroupId, sender: &UserId) -> Result<bool> {
        let affected = self.conn().execute(
            "DELETE FROM receiver_states WHERE group_id = ?1 AND sender = ?2",
            params![group_id.0.to_string(), sender.to_hex()],
        )?;
        Ok(affected > 0)
    }

    /// Drop all key state for a group (local leave).
    pub fn delete_group_keys(&self, group_id: GroupId) -> Result<()> {
        self.conn().execute(
            "DELETE FROM sender_keys WHERE group_id = ?1",
            params![group_id.0.to_string()],
        )?;
        self.conn().execute(
            "DELETE FROM receiver_states WHERE group_id = ?1",
            params![group_id.0.to_string()],
        )?;
        Ok(())
    }
}
