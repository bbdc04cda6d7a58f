//! SQLite-backed activity repository.
//!
//! Timestamps are stored as RFC 3339 strings with fixed microsecond
//! precision so that lexical order matches chronological order. Dates are
//! stored as `YYYY-MM-DD`.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

use crate::error::{KindredError, KindredResult};
use crate::traits::ActivityRepository;
use crate::types::{
    DailyCounters, EmissionRecord, InteractionLevel, JournalEntry, PersonaId, ResponseKind, Tier,
    UserSettings, UserTierProfile,
};

/// SQLite-backed store for entries, emissions and counters.
pub struct SqliteActivityRepository {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteActivityRepository {
    /// Open (or create) a database at the given path.
    pub fn new<P: AsRef<Path>>(path: P) -> KindredResult<Self> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Create an in-memory database (useful for testing).
    pub fn in_memory() -> KindredResult<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Default on-disk location: `~/.kindred/activity.db`.
    pub fn default_path() -> std::path::PathBuf {
        dirs::home_dir()
            .map(|h| h.join(".kindred"))
            .unwrap_or_else(|| std::path::PathBuf::from(".kindred"))
            .join("activity.db")
    }

    fn lock(&self) -> KindredResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| KindredError::database(e.to_string()))
    }

    fn init_schema(&self) -> KindredResult<()> {
        let conn = self.lock()?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;

            CREATE TABLE IF NOT EXISTS users (
                user_id TEXT PRIMARY KEY,
                tier TEXT NOT NULL DEFAULT 'free',
                interaction_level TEXT NOT NULL DEFAULT 'normal',
                last_active_at TEXT,
                last_engaged_at TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_users_last_active ON users(last_active_at);

            CREATE TABLE IF NOT EXISTS entries (
                entry_id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                created_at TEXT NOT NULL,
                entry_date TEXT NOT NULL,
                daily_sequence_number INTEGER NOT NULL,
                content TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_entries_user_date ON entries(user_id, entry_date);

            CREATE TABLE IF NOT EXISTS emissions (
                emission_id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                persona_id TEXT NOT NULL,
                entry_id TEXT NOT NULL,
                response_kind TEXT NOT NULL,
                content TEXT NOT NULL,
                emitted_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_emissions_user ON emissions(user_id, emitted_at);
            -- At most one reply per entry, whatever the callers do
            CREATE UNIQUE INDEX IF NOT EXISTS idx_emissions_single_reply
                ON emissions(entry_id) WHERE response_kind = 'reply';

            CREATE TABLE IF NOT EXISTS daily_counters (
                user_id TEXT NOT NULL,
                date TEXT NOT NULL,
                emission_count INTEGER NOT NULL DEFAULT 0,
                last_emission_at TEXT,
                PRIMARY KEY (user_id, date)
            );
            ",
        )?;

        Ok(())
    }
}

fn ts(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn parse_opt_ts(idx: usize, raw: Option<String>) -> rusqlite::Result<Option<DateTime<Utc>>> {
    raw.map(|s| parse_ts(idx, &s)).transpose()
}

fn parse_date(idx: usize, raw: &str) -> rusqlite::Result<NaiveDate> {
    NaiveDate::from_str(raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn parse_enum<T>(idx: usize, raw: &str) -> rusqlite::Result<T>
where
    T: FromStr<Err = strum::ParseError>,
{
    T::from_str(raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

/// Maps `user_id, tier, interaction_level, last_active_at`.
fn row_to_profile(row: &Row<'_>, active_since: DateTime<Utc>) -> rusqlite::Result<UserTierProfile> {
    let settings = UserSettings {
        user_id: row.get(0)?,
        tier: parse_enum::<Tier>(1, &row.get::<_, String>(1)?)?,
        interaction_level: parse_enum::<InteractionLevel>(2, &row.get::<_, String>(2)?)?,
    };
    let last_active = parse_opt_ts(3, row.get(3)?)?;
    Ok(UserTierProfile::from_settings(&settings, last_active, active_since))
}

fn row_to_emission(row: &Row<'_>) -> rusqlite::Result<EmissionRecord> {
    let emission_id: String = row.get(0)?;
    Ok(EmissionRecord {
        emission_id: Uuid::parse_str(&emission_id)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, Type::Text, Box::new(e)))?,
        user_id: row.get(1)?,
        persona_id: PersonaId::new(row.get::<_, String>(2)?),
        entry_id: row.get(3)?,
        response_kind: parse_enum::<ResponseKind>(4, &row.get::<_, String>(4)?)?,
        content: row.get(5)?,
        emitted_at: parse_ts(6, &row.get::<_, String>(6)?)?,
    })
}

const EMISSION_COLUMNS: &str =
    "emission_id, user_id, persona_id, entry_id, response_kind, content, emitted_at";

/// Insert a default user row if missing and move `last_active_at` forward.
fn insert_emission(conn: &Connection, record: &EmissionRecord) -> KindredResult<()> {
    let result = conn.execute(
        &format!(
            "INSERT INTO emissions ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            EMISSION_COLUMNS
        ),
        params![
            record.emission_id.to_string(),
            record.user_id,
            record.persona_id.as_str(),
            record.entry_id,
            record.response_kind.to_string(),
            record.content,
            ts(record.emitted_at)
        ],
    );
    match result {
        Ok(_) => Ok(()),
        Err(rusqlite::Error::SqliteFailure(e, _))
            if e.code == rusqlite::ErrorCode::ConstraintViolation
                && record.response_kind == ResponseKind::Reply =>
        {
            Err(KindredError::duplicate_reply(&record.entry_id))
        }
        Err(e) => Err(e.into()),
    }
}

fn select_counter(
    conn: &Connection,
    user_id: &str,
    date: NaiveDate,
) -> rusqlite::Result<Option<DailyCounters>> {
    conn.query_row(
        "SELECT emission_count, last_emission_at FROM daily_counters
         WHERE user_id = ?1 AND date = ?2",
        params![user_id, date.to_string()],
        |row| {
            Ok(DailyCounters {
                user_id: user_id.to_string(),
                date,
                emission_count: row.get(0)?,
                last_emission_at: parse_opt_ts(1, row.get(1)?)?,
            })
        },
    )
    .optional()
}

/// Bump the counter inside the caller's transaction. Returns the previous value.
fn increment_counter(
    conn: &Connection,
    user_id: &str,
    date: NaiveDate,
    at: DateTime<Utc>,
) -> KindredResult<DailyCounters> {
    let previous = select_counter(conn, user_id, date)?
        .unwrap_or_else(|| DailyCounters::empty(user_id, date));
    conn.execute(
        "INSERT INTO daily_counters (user_id, date, emission_count, last_emission_at)
         VALUES (?1, ?2, 1, ?3)
         ON CONFLICT(user_id, date) DO UPDATE SET
             emission_count = emission_count + 1,
             last_emission_at = excluded.last_emission_at",
        params![user_id, date.to_string(), ts(at)],
    )?;
    Ok(previous)
}

fn touch_user(conn: &Connection, user_id: &str, at: DateTime<Utc>) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO users (user_id, last_active_at) VALUES (?1, ?2)
         ON CONFLICT(user_id) DO UPDATE SET last_active_at =
             CASE WHEN last_active_at IS NULL OR last_active_at < excluded.last_active_at
                  THEN excluded.last_active_at ELSE last_active_at END",
        params![user_id, ts(at)],
    )?;
    Ok(())
}

#[async_trait]
impl ActivityRepository for SqliteActivityRepository {
    async fn get_active_users(&self, since: DateTime<Utc>) -> KindredResult<Vec<UserTierProfile>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT user_id, tier, interaction_level, last_active_at FROM users
             WHERE last_active_at >= ?1 ORDER BY user_id",
        )?;
        let rows = stmt.query_map(params![ts(since)], |row| row_to_profile(row, since))?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    async fn get_user_profile(
        &self,
        user_id: &str,
        active_since: DateTime<Utc>,
    ) -> KindredResult<Option<UserTierProfile>> {
        let conn = self.lock()?;
        let profile = conn
            .query_row(
                "SELECT user_id, tier, interaction_level, last_active_at
                 FROM users WHERE user_id = ?1",
                params![user_id],
                |row| row_to_profile(row, active_since),
            )
            .optional()?;
        Ok(profile)
    }

    async fn save_user_settings(&self, settings: &UserSettings) -> KindredResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO users (user_id, tier, interaction_level) VALUES (?1, ?2, ?3)
             ON CONFLICT(user_id) DO UPDATE SET tier = excluded.tier,
                 interaction_level = excluded.interaction_level",
            params![
                settings.user_id,
                settings.tier.to_string(),
                settings.interaction_level.to_string()
            ],
        )?;
        Ok(())
    }

    async fn record_entry(&self, entry: &JournalEntry, content: &str) -> KindredResult<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let inserted = tx.execute(
            "INSERT OR IGNORE INTO entries
                (entry_id, user_id, created_at, entry_date, daily_sequence_number, content)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                entry.entry_id,
                entry.user_id,
                ts(entry.created_at),
                entry.entry_date.to_string(),
                entry.daily_sequence_number,
                content
            ],
        )?;
        if inserted == 0 {
            return Err(KindredError::validation(format!(
                "Entry '{}' already recorded",
                entry.entry_id
            )));
        }
        touch_user(&tx, &entry.user_id, entry.created_at)?;
        tx.commit()?;
        Ok(())
    }

    async fn get_entry_content(&self, entry_id: &str) -> KindredResult<Option<String>> {
        let conn = self.lock()?;
        let content = conn
            .query_row(
                "SELECT content FROM entries WHERE entry_id = ?1",
                params![entry_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(content)
    }

    async fn get_daily_entry_sequence(&self, user_id: &str, date: NaiveDate) -> KindredResult<u32> {
        let conn = self.lock()?;
        let count: u32 = conn.query_row(
            "SELECT COUNT(*) FROM entries WHERE user_id = ?1 AND entry_date = ?2",
            params![user_id, date.to_string()],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    async fn get_existing_reply(&self, entry_id: &str) -> KindredResult<Option<EmissionRecord>> {
        let conn = self.lock()?;
        let record = conn
            .query_row(
                &format!(
                    "SELECT {} FROM emissions WHERE entry_id = ?1 AND response_kind = 'reply'",
                    EMISSION_COLUMNS
                ),
                params![entry_id],
                row_to_emission,
            )
            .optional()?;
        Ok(record)
    }

    async fn persist_emission(&self, record: &EmissionRecord) -> KindredResult<()> {
        let conn = self.lock()?;
        insert_emission(&conn, record)
    }

    async fn persist_emission_and_increment(
        &self,
        record: &EmissionRecord,
        date: NaiveDate,
    ) -> KindredResult<DailyCounters> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        insert_emission(&tx, record)?;
        let previous = increment_counter(&tx, &record.user_id, date, record.emitted_at)?;
        tx.commit()?;
        Ok(previous)
    }

    async fn list_emissions(&self, user_id: &str) -> KindredResult<Vec<EmissionRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM emissions WHERE user_id = ?1 ORDER BY emitted_at",
            EMISSION_COLUMNS
        ))?;
        let rows = stmt.query_map(params![user_id], row_to_emission)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    async fn get_daily_counter(
        &self,
        user_id: &str,
        date: NaiveDate,
    ) -> KindredResult<DailyCounters> {
        let conn = self.lock()?;
        Ok(select_counter(&conn, user_id, date)?
            .unwrap_or_else(|| DailyCounters::empty(user_id, date)))
    }

    async fn get_and_increment_daily_counter(
        &self,
        user_id: &str,
        date: NaiveDate,
        at: DateTime<Utc>,
    ) -> KindredResult<DailyCounters> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let previous = increment_counter(&tx, user_id, date, at)?;
        tx.commit()?;
        Ok(previous)
    }

    async fn record_engagement(&self, user_id: &str, at: DateTime<Utc>) -> KindredResult<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        touch_user(&tx, user_id, at)?;
        tx.execute(
            "UPDATE users SET last_engaged_at = ?2
             WHERE user_id = ?1 AND (last_engaged_at IS NULL OR last_engaged_at < ?2)",
            params![user_id, ts(at)],
        )?;
        tx.commit()?;
        Ok(())
    }

    async fn last_engagement_at(&self, user_id: &str) -> KindredResult<Option<DateTime<Utc>>> {
        let conn = self.lock()?;
        let raw: Option<Option<String>> = conn
            .query_row(
                "SELECT last_engaged_at FROM users WHERE user_id = ?1",
                params![user_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(parse_opt_ts(0, raw.flatten())?)
    }

    async fn purge_daily_counters_before(&self, date: NaiveDate) -> KindredResult<usize> {
        let conn = self.lock()?;
        let removed = conn.execute(
            "DELETE FROM daily_counters WHERE date < ?1",
            params![date.to_string()],
        )?;
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn entry(id: &str, user: &str, at: DateTime<Utc>, seq: u32) -> JournalEntry {
        JournalEntry {
            entry_id: id.to_string(),
            user_id: user.to_string(),
            created_at: at,
            entry_date: at.date_naive(),
            daily_sequence_number: seq,
        }
    }

    fn emission(entry_id: &str, kind: ResponseKind, at: DateTime<Utc>) -> EmissionRecord {
        EmissionRecord {
            emission_id: Uuid::new_v4(),
            user_id: "u1".to_string(),
            persona_id: PersonaId::from("sage"),
            entry_id: entry_id.to_string(),
            response_kind: kind,
            content: "noted".to_string(),
            emitted_at: at,
        }
    }

    #[tokio::test]
    async fn test_settings_round_trip_and_activity() {
        let repo = SqliteActivityRepository::in_memory().unwrap();
        let now = Utc.with_ymd_and_hms(2024, 6, 3, 8, 0, 0).unwrap();

        repo.save_user_settings(&UserSettings::new("u1", Tier::Premium, InteractionLevel::Low))
            .await
            .unwrap();
        let profile = repo.get_user_profile("u1", now - Duration::days(7)).await.unwrap().unwrap();
        assert_eq!(profile.tier, Tier::Premium);
        assert_eq!(profile.interaction_level, InteractionLevel::Low);
        assert!(!profile.is_active);

        repo.record_entry(&entry("e1", "u1", now, 1), "morning pages").await.unwrap();
        let profile = repo.get_user_profile("u1", now - Duration::days(7)).await.unwrap().unwrap();
        assert!(profile.is_active);
        // Recording an entry does not reset saved settings
        assert_eq!(profile.tier, Tier::Premium);

        assert!(repo.get_user_profile("ghost", now).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_entry_sequence_by_local_date() {
        let repo = SqliteActivityRepository::in_memory().unwrap();
        let day = Utc.with_ymd_and_hms(2024, 6, 3, 8, 0, 0).unwrap();
        repo.record_entry(&entry("e1", "u1", day, 1), "a").await.unwrap();
        repo.record_entry(&entry("e2", "u1", day + Duration::hours(2), 2), "b").await.unwrap();
        repo.record_entry(&entry("e3", "u1", day + Duration::days(1), 1), "c").await.unwrap();

        assert_eq!(repo.get_daily_entry_sequence("u1", day.date_naive()).await.unwrap(), 2);
        assert_eq!(
            repo.get_daily_entry_sequence("u1", (day + Duration::days(1)).date_naive())
                .await
                .unwrap(),
            1
        );
        assert!(repo.record_entry(&entry("e1", "u1", day, 3), "dup").await.is_err());
    }

    #[tokio::test]
    async fn test_unique_reply_index() {
        let repo = SqliteActivityRepository::in_memory().unwrap();
        let now = Utc::now();

        repo.persist_emission(&emission("e1", ResponseKind::Reaction, now)).await.unwrap();
        repo.persist_emission(&emission("e1", ResponseKind::Reaction, now)).await.unwrap();
        repo.persist_emission(&emission("e1", ResponseKind::Reply, now)).await.unwrap();

        let err = repo
            .persist_emission(&emission("e1", ResponseKind::Reply, now))
            .await
            .unwrap_err();
        assert!(err.is_duplicate_reply());

        let existing = repo.get_existing_reply("e1").await.unwrap().unwrap();
        assert_eq!(existing.response_kind, ResponseKind::Reply);
        assert_eq!(repo.list_emissions("u1").await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_rejected_reply_rolls_back_counter() {
        let repo = SqliteActivityRepository::in_memory().unwrap();
        let now = Utc.with_ymd_and_hms(2024, 6, 3, 8, 0, 0).unwrap();
        let date = now.date_naive();

        repo.persist_emission_and_increment(&emission("e1", ResponseKind::Reply, now), date)
            .await
            .unwrap();
        let later = now + Duration::hours(1);
        let err = repo
            .persist_emission_and_increment(&emission("e1", ResponseKind::Reply, later), date)
            .await
            .unwrap_err();
        assert!(err.is_duplicate_reply());

        let counter = repo.get_daily_counter("u1", date).await.unwrap();
        assert_eq!(counter.emission_count, 1);
        assert_eq!(counter.last_emission_at, Some(now));
        assert_eq!(repo.list_emissions("u1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_counter_increment_and_purge() {
        let repo = SqliteActivityRepository::in_memory().unwrap();
        let now = Utc.with_ymd_and_hms(2024, 6, 3, 8, 0, 0).unwrap();
        let date = now.date_naive();

        let before = repo.get_and_increment_daily_counter("u1", date, now).await.unwrap();
        assert_eq!(before.emission_count, 0);
        let later = now + Duration::minutes(45);
        let before = repo.get_and_increment_daily_counter("u1", date, later).await.unwrap();
        assert_eq!(before.emission_count, 1);
        assert_eq!(before.last_emission_at, Some(now));

        let current = repo.get_daily_counter("u1", date).await.unwrap();
        assert_eq!(current.emission_count, 2);
        assert_eq!(current.last_emission_at, Some(later));

        assert_eq!(repo.purge_daily_counters_before(date).await.unwrap(), 0);
        assert_eq!(
            repo.purge_daily_counters_before(date + Duration::days(1)).await.unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn test_engagement_tracking() {
        let repo = SqliteActivityRepository::in_memory().unwrap();
        let now = Utc.with_ymd_and_hms(2024, 6, 3, 8, 0, 0).unwrap();

        assert!(repo.last_engagement_at("u1").await.unwrap().is_none());
        repo.record_engagement("u1", now).await.unwrap();
        // Older signals never move the timestamp backwards
        repo.record_engagement("u1", now - Duration::hours(1)).await.unwrap();
        assert_eq!(repo.last_engagement_at("u1").await.unwrap(), Some(now));

        let active = repo.get_active_users(now - Duration::days(7)).await.unwrap();
        assert_eq!(active.len(), 1);
    }

    #[tokio::test]
    async fn test_file_backed_store_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("activity.db");
        let now = Utc::now();

        {
            let repo = SqliteActivityRepository::new(&path).unwrap();
            repo.persist_emission(&emission("e1", ResponseKind::Reply, now)).await.unwrap();
        }

        let reopened = SqliteActivityRepository::new(&path).unwrap();
        assert!(reopened.get_existing_reply("e1").await.unwrap().is_some());
    }
}
