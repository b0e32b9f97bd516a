use chrono::NaiveDate;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use std::path::Path;
use std::str::FromStr;
use tracing::debug;
use uuid::Uuid;

use crate::context::{find_personal_records, HistoryProvider, PersonalRecord};
use crate::error::{DatabaseError, Result};
use crate::models::{ExerciseSetRecord, SessionRecord, TargetType, WeightUnit};

/// SQLite-backed training history
pub struct HistoryStore {
    conn: Connection,
}

impl HistoryStore {
    /// Create or open a history database at the specified path
    pub fn new<P: AsRef<Path>>(db_path: P) -> std::result::Result<Self, DatabaseError> {
        let conn = Connection::open(db_path.as_ref()).map_err(|e| DatabaseError::ConnectionFailed {
            reason: format!("{}: {}", db_path.as_ref().display(), e),
        })?;
        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    /// Open a throwaway in-memory database
    pub fn in_memory() -> std::result::Result<Self, DatabaseError> {
        let store = Self {
            conn: Connection::open_in_memory()?,
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> std::result::Result<(), DatabaseError> {
        self.conn.execute_batch(
            r#"
            PRAGMA foreign_keys=ON;

            CREATE TABLE IF NOT EXISTS sessions (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                template_id TEXT,
                workout_date DATE NOT NULL,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP
            );

            CREATE TABLE IF NOT EXISTS exercise_sets (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id TEXT NOT NULL REFERENCES sessions(id) ON DELETE CASCADE,
                position INTEGER NOT NULL,
                exercise_id TEXT,
                exercise_name TEXT NOT NULL,
                weight REAL,
                reps INTEGER,
                sets INTEGER NOT NULL DEFAULT 1,
                unit TEXT,
                volume_load REAL,
                one_rm_estimate REAL
            );

            CREATE INDEX IF NOT EXISTS idx_sessions_user_date ON sessions(user_id, workout_date);
            CREATE INDEX IF NOT EXISTS idx_sessions_template ON sessions(template_id);
            CREATE INDEX IF NOT EXISTS idx_sets_session ON exercise_sets(session_id);
            CREATE INDEX IF NOT EXISTS idx_sets_exercise ON exercise_sets(exercise_id);
            "#,
        )?;
        Ok(())
    }

    /// Store a logged session. Derived volume load and 1RM are recomputed on
    /// insert; an empty session id is replaced with a fresh uuid.
    pub fn store_session(&mut self, user_id: &str, session: &SessionRecord) -> std::result::Result<String, DatabaseError> {
        let session_id = if session.session_id.trim().is_empty() {
            Uuid::new_v4().to_string()
        } else {
            session.session_id.clone()
        };

        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT INTO sessions (id, user_id, template_id, workout_date) VALUES (?1, ?2, ?3, ?4)",
            params![session_id, user_id, session.template_id, session.workout_date],
        )?;

        for (position, set) in session.sets.iter().enumerate() {
            let mut set = set.clone();
            set.fill_derived();
            tx.execute(
                r#"
                INSERT INTO exercise_sets (
                    session_id, position, exercise_id, exercise_name, weight, reps, sets, unit,
                    volume_load, one_rm_estimate
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                "#,
                params![
                    session_id,
                    position as i64,
                    set.exercise_id,
                    set.exercise_name,
                    set.weight,
                    set.reps,
                    set.sets,
                    set.unit.map(|u| u.to_string()),
                    set.volume_load,
                    set.one_rm_estimate,
                ],
            )?;
        }

        tx.commit()?;
        debug!(session_id = %session_id, sets = session.sets.len(), "Stored session");
        Ok(session_id)
    }

    /// Log a new session performed on `date`
    pub fn log_session(
        &mut self,
        user_id: &str,
        template_id: Option<&str>,
        date: NaiveDate,
        sets: Vec<ExerciseSetRecord>,
    ) -> std::result::Result<SessionRecord, DatabaseError> {
        let mut session = SessionRecord {
            session_id: Uuid::new_v4().to_string(),
            template_id: template_id.map(str::to_string),
            workout_date: date,
            sets,
        };
        for set in &mut session.sets {
            set.workout_date = date;
            set.fill_derived();
        }
        self.store_session(user_id, &session)?;
        Ok(session)
    }

    /// Load one session with its sets
    pub fn load_session(&self, session_id: &str) -> std::result::Result<Option<SessionRecord>, DatabaseError> {
        let header = self
            .conn
            .query_row(
                "SELECT id, template_id, workout_date FROM sessions WHERE id = ?1",
                params![session_id],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, Option<String>>(1)?, row.get::<_, NaiveDate>(2)?)),
            )
            .optional()?;

        match header {
            Some((id, template_id, workout_date)) => {
                let sets = self.load_sets(&id, workout_date)?;
                Ok(Some(SessionRecord {
                    session_id: id,
                    template_id,
                    workout_date,
                    sets,
                }))
            }
            None => Ok(None),
        }
    }

    /// Most recent `limit` sessions for the user, newest first
    pub fn query_recent_sessions(
        &self,
        user_id: &str,
        target_type: TargetType,
        target_ids: &[String],
        limit: usize,
    ) -> std::result::Result<Vec<SessionRecord>, DatabaseError> {
        self.query_sessions(user_id, target_type, target_ids, Some(limit))
    }

    /// Every session the user has logged, newest first
    pub fn query_user_history(&self, user_id: &str) -> std::result::Result<Vec<SessionRecord>, DatabaseError> {
        self.query_sessions(user_id, TargetType::Template, &[], None)
    }

    /// Personal records set by a stored session, judged against all of the
    /// user's other sessions
    pub fn personal_records(
        &self,
        user_id: &str,
        session: &SessionRecord,
        unit: WeightUnit,
    ) -> std::result::Result<Vec<PersonalRecord>, DatabaseError> {
        let history: Vec<SessionRecord> = self
            .query_user_history(user_id)?
            .into_iter()
            .filter(|s| s.session_id != session.session_id)
            .collect();
        Ok(find_personal_records(&history, session, unit))
    }

    fn query_sessions(
        &self,
        user_id: &str,
        target_type: TargetType,
        target_ids: &[String],
        limit: Option<usize>,
    ) -> std::result::Result<Vec<SessionRecord>, DatabaseError> {
        let placeholders = vec!["?"; target_ids.len()].join(", ");
        let scope = match (target_ids.is_empty(), target_type) {
            (true, _) => String::new(),
            (false, TargetType::Template) => format!("AND template_id IN ({})", placeholders),
            (false, TargetType::MasterExercise) => format!(
                "AND id IN (SELECT session_id FROM exercise_sets WHERE exercise_id IN ({}))",
                placeholders
            ),
        };
        let limit_clause = limit.map(|n| format!(" LIMIT {}", n)).unwrap_or_default();
        let query = format!(
            "SELECT id, template_id, workout_date FROM sessions WHERE user_id = ? {} \
             ORDER BY workout_date DESC, created_at DESC, rowid DESC{}",
            scope, limit_clause
        );

        let mut values: Vec<&str> = vec![user_id];
        values.extend(target_ids.iter().map(String::as_str));

        let mut stmt = self.conn.prepare(&query)?;
        let headers = stmt
            .query_map(params_from_iter(values), |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, Option<String>>(1)?, row.get::<_, NaiveDate>(2)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut sessions = Vec::with_capacity(headers.len());
        for (id, template_id, workout_date) in headers {
            let sets = self.load_sets(&id, workout_date)?;
            sessions.push(SessionRecord {
                session_id: id,
                template_id,
                workout_date,
                sets,
            });
        }
        debug!(user_id, sessions = sessions.len(), ?limit, "Loaded sessions");
        Ok(sessions)
    }

    fn load_sets(&self, session_id: &str, workout_date: NaiveDate) -> std::result::Result<Vec<ExerciseSetRecord>, DatabaseError> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT exercise_id, exercise_name, weight, reps, sets, unit, volume_load, one_rm_estimate
            FROM exercise_sets
            WHERE session_id = ?1
            ORDER BY position
            "#,
        )?;
        let rows = stmt
            .query_map(params![session_id], |row| {
                Ok((
                    ExerciseSetRecord {
                        exercise_name: row.get(1)?,
                        exercise_id: row.get(0)?,
                        weight: row.get(2)?,
                        reps: row.get(3)?,
                        sets: row.get(4)?,
                        unit: None,
                        volume_load: row.get(6)?,
                        one_rm_estimate: row.get(7)?,
                        workout_date,
                    },
                    row.get::<_, Option<String>>(5)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        rows.into_iter()
            .map(|(mut set, unit)| {
                set.unit = unit
                    .map(|u| WeightUnit::from_str(&u))
                    .transpose()
                    .map_err(|e| DatabaseError::CorruptRow {
                        table: "exercise_sets".to_string(),
                        reason: e.to_string(),
                    })?;
                Ok(set)
            })
            .collect()
    }

    /// Delete a session and its sets
    pub fn delete_session(&mut self, session_id: &str) -> std::result::Result<(), DatabaseError> {
        let removed = self.conn.execute("DELETE FROM sessions WHERE id = ?1", params![session_id])?;
        if removed == 0 {
            return Err(DatabaseError::NotFound {
                table: "sessions".to_string(),
                id: session_id.to_string(),
            });
        }
        Ok(())
    }

    /// Get database statistics
    pub fn get_stats(&self) -> std::result::Result<HistoryStats, DatabaseError> {
        let session_count: i64 = self.conn.query_row("SELECT COUNT(*) FROM sessions", [], |row| row.get(0))?;
        let set_count: i64 = self.conn.query_row("SELECT COUNT(*) FROM exercise_sets", [], |row| row.get(0))?;
        let exercise_count: i64 = self.conn.query_row(
            "SELECT COUNT(DISTINCT lower(trim(exercise_name))) FROM exercise_sets",
            [],
            |row| row.get(0),
        )?;
        let user_count: i64 = self
            .conn
            .query_row("SELECT COUNT(DISTINCT user_id) FROM sessions", [], |row| row.get(0))?;

        Ok(HistoryStats {
            session_count: session_count as usize,
            set_count: set_count as usize,
            exercise_count: exercise_count as usize,
            user_count: user_count as usize,
        })
    }
}

impl HistoryProvider for HistoryStore {
    fn recent_sessions(
        &self,
        user_id: &str,
        target_type: TargetType,
        target_ids: &[String],
        limit: usize,
    ) -> Result<Vec<SessionRecord>> {
        Ok(self.query_recent_sessions(user_id, target_type, target_ids, limit)?)
    }
}

/// Database statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryStats {
    pub session_count: usize,
    pub set_count: usize,
    pub exercise_count: usize,
    pub user_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
    }

    fn bench(weight: f64, reps: u32) -> ExerciseSetRecord {
        ExerciseSetRecord::new("Bench Press", Some(weight), Some(reps), 3, Some(WeightUnit::Kg), date(1))
            .with_exercise_id("ex-bench")
    }

    #[test]
    fn test_log_and_load_session() {
        let mut store = HistoryStore::in_memory().unwrap();
        let logged = store
            .log_session("u1", Some("t1"), date(4), vec![bench(80.0, 5), bench(85.0, 3)])
            .unwrap();

        let loaded = store.load_session(&logged.session_id).unwrap().unwrap();
        assert_eq!(loaded.template_id.as_deref(), Some("t1"));
        assert_eq!(loaded.workout_date, date(4));
        assert_eq!(loaded.sets.len(), 2);
        assert_eq!(loaded.sets[0].volume_load, Some(1200.0));
        assert_eq!(loaded.sets[1].unit, Some(WeightUnit::Kg));
        assert!(loaded.sets.iter().all(|s| s.workout_date == date(4)));

        assert!(store.load_session("missing").unwrap().is_none());
    }

    #[test]
    fn test_recent_sessions_order_and_limit() {
        let mut store = HistoryStore::in_memory().unwrap();
        for day in [1, 8, 4] {
            store.log_session("u1", Some("t1"), date(day), vec![bench(80.0, 5)]).unwrap();
        }
        store.log_session("u2", Some("t1"), date(9), vec![bench(60.0, 5)]).unwrap();

        let sessions = store.query_recent_sessions("u1", TargetType::Template, &[], 2).unwrap();
        let dates: Vec<NaiveDate> = sessions.iter().map(|s| s.workout_date).collect();
        assert_eq!(dates, vec![date(8), date(4)]);
    }

    #[test]
    fn test_recent_sessions_scoped_by_ids() {
        let mut store = HistoryStore::in_memory().unwrap();
        store.log_session("u1", Some("push"), date(1), vec![bench(80.0, 5)]).unwrap();
        store
            .log_session(
                "u1",
                Some("legs"),
                date(2),
                vec![ExerciseSetRecord::new("Squat", Some(120.0), Some(5), 3, None, date(2)).with_exercise_id("ex-squat")],
            )
            .unwrap();

        let by_template = store
            .query_recent_sessions("u1", TargetType::Template, &["legs".to_string()], 20)
            .unwrap();
        assert_eq!(by_template.len(), 1);
        assert_eq!(by_template[0].sets[0].exercise_name, "Squat");

        let by_exercise = store
            .query_recent_sessions("u1", TargetType::MasterExercise, &["ex-bench".to_string(), "ex-row".to_string()], 20)
            .unwrap();
        assert_eq!(by_exercise.len(), 1);
        assert_eq!(by_exercise[0].template_id.as_deref(), Some("push"));
    }

    #[test]
    fn test_personal_records_use_full_history() {
        let mut store = HistoryStore::in_memory().unwrap();
        store.log_session("u1", None, date(1), vec![bench(150.0, 5)]).unwrap();
        for day in 2..=21 {
            store.log_session("u1", None, date(day), vec![bench(100.0, 5)]).unwrap();
        }
        // The all-time best is outside a 20-session batch
        let batch = store.query_recent_sessions("u1", TargetType::Template, &[], 20).unwrap();
        assert!(batch.iter().all(|s| s.workout_date != date(1)));
        assert_eq!(store.query_user_history("u1").unwrap().len(), 21);

        let heavy = store.log_session("u1", None, date(25), vec![bench(140.0, 5)]).unwrap();
        assert!(store.personal_records("u1", &heavy, WeightUnit::Kg).unwrap().is_empty());

        let heavier = store.log_session("u1", None, date(28), vec![bench(155.0, 5)]).unwrap();
        let records = store.personal_records("u1", &heavier, WeightUnit::Kg).unwrap();
        let weight = records
            .iter()
            .find(|r| r.metric == crate::formulas::PrMetric::Weight)
            .unwrap();
        assert_eq!(weight.value, 155.0);
        assert_eq!(weight.previous_best, Some(150.0));
    }

    #[test]
    fn test_delete_and_stats() {
        let mut store = HistoryStore::in_memory().unwrap();
        let session = store.log_session("u1", None, date(1), vec![bench(80.0, 5), bench(80.0, 5)]).unwrap();

        let stats = store.get_stats().unwrap();
        assert_eq!(stats.session_count, 1);
        assert_eq!(stats.set_count, 2);
        assert_eq!(stats.exercise_count, 1);

        store.delete_session(&session.session_id).unwrap();
        assert_eq!(store.get_stats().unwrap().set_count, 0);
        assert!(matches!(
            store.delete_session(&session.session_id),
            Err(DatabaseError::NotFound { .. })
        ));
    }

    #[test]
    fn test_persists_to_disk() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("history.db");
        {
            let mut store = HistoryStore::new(&path).unwrap();
            store.log_session("u1", None, date(1), vec![bench(100.0, 1)]).unwrap();
        }
        let store = HistoryStore::new(&path).unwrap();
        let sessions = store.recent_sessions("u1", TargetType::Template, &[], 20).unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].sets[0].one_rm_estimate, Some(100.0));
    }
}
