use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};

use autosticker_shared::protocol::DeviceSession;

use crate::database::Database;
use crate::error::Result;

/// Persists the linked-device session between runs. The schema is private
/// to the implementation.
pub trait CredentialStore {
    fn load_session(&self) -> Result<Option<DeviceSession>>;

    /// Replace any stored session.
    fn save_session(&self, session: &DeviceSession) -> Result<()>;

    /// Forget the stored session. Returns whether one existed.
    fn clear_session(&self) -> Result<bool>;
}

impl CredentialStore for Database {
    fn load_session(&self) -> Result<Option<DeviceSession>> {
        let row = self
            .conn()
            .query_row(
                "SELECT device_id, push_name, token, paired_at
                 FROM device_session
                 WHERE slot = 1",
                [],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, Option<String>>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                },
            )
            .optional()?;

        let Some((device_id, push_name, token, paired_str)) = row else {
            return Ok(None);
        };

        let paired_at: DateTime<Utc> =
            DateTime::parse_from_rfc3339(&paired_str)?.with_timezone(&Utc);

        Ok(Some(DeviceSession {
            device_id,
            push_name,
            token,
            paired_at,
        }))
    }

    fn save_session(&self, session: &DeviceSession) -> Result<()> {
        self.conn().execute(
            "INSERT INTO device_session (slot, device_id, push_name, token, paired_at, updated_at)
             VALUES (1, ?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(slot) DO UPDATE SET
                 device_id = excluded.device_id,
                 push_name = excluded.push_name,
                 token = excluded.token,
                 paired_at = excluded.paired_at,
                 updated_at = excluded.updated_at",
            params![
                session.device_id,
                session.push_name,
                session.token,
                session.paired_at.to_rfc3339(),
                Utc::now().to_rfc3339(),
            ],
        )?;
        tracing::info!(device = %session.device_id, "stored device session");
        Ok(())
    }

    fn clear_session(&self) -> Result<bool> {
        let affected = self
            .conn()
            .execute("DELETE FROM device_session WHERE slot = 1", [])?;
        Ok(affected > 0)
    }
}
