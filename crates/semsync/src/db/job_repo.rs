//! Job repository: CRUD and lifecycle transitions for the `jobs` table.
//!
//! Lifecycle writes are guarded by the current status in the `WHERE`
//! clause, so a transition that lost a race simply affects zero rows.

use rusqlite::{params, Row};

use super::{Database, DatabaseError};

/// A raw job row from the database.
#[derive(Debug, Clone)]
pub struct JobRow {
    pub id: String,
    pub job_type: String,
    pub partition_key: Option<String>,
    pub target_type: Option<String>,
    pub target_id: Option<String>,
    pub parameters: String,
    pub status: String,
    pub progress: f64,
    pub current_step: Option<String>,
    pub results: Option<String>,
    pub error_message: Option<String>,
    pub created_at: String,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
    pub updated_at: String,
    pub cancel_requested: bool,
}

impl JobRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            job_type: row.get("job_type")?,
            partition_key: row.get("partition_key")?,
            target_type: row.get("target_type")?,
            target_id: row.get("target_id")?,
            parameters: row.get("parameters")?,
            status: row.get("status")?,
            progress: row.get("progress")?,
            current_step: row.get("current_step")?,
            results: row.get("results")?,
            error_message: row.get("error_message")?,
            created_at: row.get("created_at")?,
            started_at: row.get("started_at")?,
            completed_at: row.get("completed_at")?,
            updated_at: row.get("updated_at")?,
            cancel_requested: row.get::<_, i64>("cancel_requested")? != 0,
        })
    }
}

/// Query filter parameters for job listing.
#[derive(Debug, Default, Clone)]
pub struct JobFilter {
    pub status: Option<String>,
    pub partition_key: Option<String>,
    pub job_type: Option<String>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

/// Values written when a job leaves the `running` state.
#[derive(Debug, Clone)]
pub struct JobCompletion<'a> {
    pub status: &'a str,
    /// `None` keeps the last checkpointed progress.
    pub progress: Option<f64>,
    pub current_step: &'a str,
    pub results: Option<String>,
    pub error_message: Option<String>,
}

/// Inserts a new job row.
pub fn insert(db: &Database, job: &JobRow) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO jobs (id, job_type, partition_key, target_type, target_id, parameters,
             status, progress, current_step, results, error_message, created_at, started_at,
             completed_at, updated_at, cancel_requested)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
            params![
                job.id,
                job.job_type,
                job.partition_key,
                job.target_type,
                job.target_id,
                job.parameters,
                job.status,
                job.progress,
                job.current_step,
                job.results,
                job.error_message,
                job.created_at,
                job.started_at,
                job.completed_at,
                job.updated_at,
                job.cancel_requested as i64,
            ],
        )?;
        Ok(())
    })
}

/// Finds a job by its ID.
pub fn find_by_id(db: &Database, id: &str) -> Result<Option<JobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM jobs WHERE id = ?1")?;
        let mut rows = stmt.query_map(params![id], JobRow::from_row)?;
        match rows.next() {
            Some(Ok(row)) => Ok(Some(row)),
            Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
            None => Ok(None),
        }
    })
}

/// Queries jobs with filters, returning (rows, total_count).
pub fn query(db: &Database, filter: &JobFilter) -> Result<(Vec<JobRow>, u64), DatabaseError> {
    db.with_conn(|conn| {
        let mut conditions = Vec::new();
        let mut param_values: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

        if let Some(ref status) = filter.status {
            conditions.push(format!("status = ?{}", param_values.len() + 1));
            param_values.push(Box::new(status.clone()));
        }
        if let Some(ref partition_key) = filter.partition_key {
            conditions.push(format!("partition_key = ?{}", param_values.len() + 1));
            param_values.push(Box::new(partition_key.clone()));
        }
        if let Some(ref job_type) = filter.job_type {
            conditions.push(format!("job_type = ?{}", param_values.len() + 1));
            param_values.push(Box::new(job_type.clone()));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        let count_sql = format!("SELECT COUNT(*) FROM jobs {}", where_clause);
        let params_ref: Vec<&dyn rusqlite::types::ToSql> =
            param_values.iter().map(|p| p.as_ref()).collect();
        let total: u64 = conn.query_row(&count_sql, params_ref.as_slice(), |r| r.get(0))?;

        let limit = filter.limit.unwrap_or(100) as i64;
        let offset = filter.offset.unwrap_or(0) as i64;
        param_values.push(Box::new(limit));
        param_values.push(Box::new(offset));
        let query_sql = format!(
            "SELECT * FROM jobs {} ORDER BY created_at DESC, id DESC LIMIT ?{} OFFSET ?{}",
            where_clause,
            param_values.len() - 1,
            param_values.len()
        );

        let params_ref: Vec<&dyn rusqlite::types::ToSql> =
            param_values.iter().map(|p| p.as_ref()).collect();
        let mut stmt = conn.prepare(&query_sql)?;
        let rows: Vec<JobRow> = stmt
            .query_map(params_ref.as_slice(), JobRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok((rows, total))
    })
}

/// Atomically moves a job from `pending` to `running`.
///
/// Returns `false` if the job does not exist or was not pending; only one
/// caller can ever observe `true` for a given job id.
pub fn claim(db: &Database, id: &str, step: &str, now: &str) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE jobs SET status = 'running', started_at = ?2, current_step = ?3,
             updated_at = ?2
             WHERE id = ?1 AND status = 'pending'",
            params![id, now, step],
        )?;
        Ok(changed == 1)
    })
}

/// Persists progress for a running job. Progress is never lowered.
pub fn checkpoint(
    db: &Database,
    id: &str,
    progress: f64,
    step: &str,
    now: &str,
) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE jobs SET progress = MAX(progress, ?2), current_step = ?3, updated_at = ?4
             WHERE id = ?1 AND status = 'running'",
            params![id, progress, step, now],
        )?;
        Ok(changed == 1)
    })
}

/// Moves a running job into a terminal state.
pub fn finish(
    db: &Database,
    id: &str,
    completion: &JobCompletion<'_>,
    now: &str,
) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE jobs SET status = ?2, progress = COALESCE(?3, progress), current_step = ?4,
             results = ?5, error_message = ?6, completed_at = ?7, updated_at = ?7
             WHERE id = ?1 AND status = 'running'",
            params![
                id,
                completion.status,
                completion.progress,
                completion.current_step,
                completion.results,
                completion.error_message,
                now,
            ],
        )?;
        Ok(changed == 1)
    })
}

/// Sets the cancellation flag on a non-terminal job.
pub fn request_cancel(db: &Database, id: &str, now: &str) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE jobs SET cancel_requested = 1, updated_at = ?2
             WHERE id = ?1 AND status IN ('pending', 'running')",
            params![id, now],
        )?;
        Ok(changed == 1)
    })
}

/// Returns whether cancellation has been requested for a job.
pub fn is_cancel_requested(db: &Database, id: &str) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let flag: Option<i64> = conn
            .query_row(
                "SELECT cancel_requested FROM jobs WHERE id = ?1",
                params![id],
                |r| r.get(0),
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;
        Ok(flag.unwrap_or(0) != 0)
    })
}

/// Fails every job still marked `running`. Returns the number of rows touched.
pub fn fail_running(db: &Database, message: &str, now: &str) -> Result<u64, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE jobs SET status = 'failed', error_message = ?1, completed_at = ?2,
             updated_at = ?2
             WHERE status = 'running'",
            params![message, now],
        )?;
        Ok(changed as u64)
    })
}

/// Counts jobs with the given status.
pub fn count_by_status(db: &Database, status: &str) -> Result<u64, DatabaseError> {
    db.with_conn(|conn| {
        let count: u64 = conn.query_row(
            "SELECT COUNT(*) FROM jobs WHERE status = ?1",
            params![status],
            |r| r.get(0),
        )?;
        Ok(count)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> Database {
        Database::open_in_memory().expect("Failed to create test database")
    }

    fn sample_job(id: &str) -> JobRow {
        JobRow {
            id: id.to_string(),
            job_type: "full_sync".to_string(),
            partition_key: Some("sales_db".to_string()),
            target_type: None,
            target_id: None,
            parameters: "{}".to_string(),
            status: "pending".to_string(),
            progress: 0.0,
            current_step: None,
            results: None,
            error_message: None,
            created_at: "2026-01-01T00:00:00Z".to_string(),
            started_at: None,
            completed_at: None,
            updated_at: "2026-01-01T00:00:00Z".to_string(),
            cancel_requested: false,
        }
    }

    fn completed(progress: Option<f64>) -> JobCompletion<'static> {
        JobCompletion {
            status: "completed",
            progress,
            current_step: "completed",
            results: Some("{}".to_string()),
            error_message: None,
        }
    }

    #[test]
    fn test_insert_and_find() {
        let db = test_db();
        insert(&db, &sample_job("job-1")).unwrap();

        let found = find_by_id(&db, "job-1").unwrap().unwrap();
        assert_eq!(found.job_type, "full_sync");
        assert_eq!(found.status, "pending");
        assert_eq!(found.partition_key.as_deref(), Some("sales_db"));
        assert!(!found.cancel_requested);
    }

    #[test]
    fn test_find_nonexistent() {
        let db = test_db();
        assert!(find_by_id(&db, "nonexistent").unwrap().is_none());
    }

    #[test]
    fn test_claim_is_at_most_once() {
        let db = test_db();
        insert(&db, &sample_job("c1")).unwrap();

        assert!(claim(&db, "c1", "discover targets", "2026-01-01T00:01:00Z").unwrap());
        assert!(!claim(&db, "c1", "discover targets", "2026-01-01T00:02:00Z").unwrap());

        let found = find_by_id(&db, "c1").unwrap().unwrap();
        assert_eq!(found.status, "running");
        assert_eq!(found.started_at.as_deref(), Some("2026-01-01T00:01:00Z"));
        assert_eq!(found.current_step.as_deref(), Some("discover targets"));
    }

    #[test]
    fn test_claim_missing_job() {
        let db = test_db();
        assert!(!claim(&db, "ghost", "discover targets", "now").unwrap());
    }

    #[test]
    fn test_checkpoint_never_lowers_progress() {
        let db = test_db();
        insert(&db, &sample_job("p1")).unwrap();
        claim(&db, "p1", "discover targets", "t1").unwrap();

        assert!(checkpoint(&db, "p1", 0.5, "build documents", "t2").unwrap());
        assert!(checkpoint(&db, "p1", 0.25, "embed documents", "t3").unwrap());

        let found = find_by_id(&db, "p1").unwrap().unwrap();
        assert!((found.progress - 0.5).abs() < f64::EPSILON);
        assert_eq!(found.current_step.as_deref(), Some("embed documents"));
    }

    #[test]
    fn test_checkpoint_ignored_unless_running() {
        let db = test_db();
        insert(&db, &sample_job("p2")).unwrap();
        assert!(!checkpoint(&db, "p2", 0.5, "build documents", "t1").unwrap());

        let found = find_by_id(&db, "p2").unwrap().unwrap();
        assert_eq!(found.progress, 0.0);
    }

    #[test]
    fn test_finish_only_from_running() {
        let db = test_db();
        insert(&db, &sample_job("f1")).unwrap();
        assert!(!finish(&db, "f1", &completed(Some(1.0)), "t1").unwrap());

        claim(&db, "f1", "discover targets", "t1").unwrap();
        assert!(finish(&db, "f1", &completed(Some(1.0)), "t2").unwrap());

        // A second terminal transition must not overwrite the first.
        let failed = JobCompletion {
            status: "failed",
            progress: None,
            current_step: "embed documents",
            results: None,
            error_message: Some("boom".to_string()),
        };
        assert!(!finish(&db, "f1", &failed, "t3").unwrap());

        let found = find_by_id(&db, "f1").unwrap().unwrap();
        assert_eq!(found.status, "completed");
        assert_eq!(found.progress, 1.0);
        assert_eq!(found.completed_at.as_deref(), Some("t2"));
        assert!(found.error_message.is_none());
    }

    #[test]
    fn test_finish_keeps_progress_when_none() {
        let db = test_db();
        insert(&db, &sample_job("f2")).unwrap();
        claim(&db, "f2", "discover targets", "t1").unwrap();
        checkpoint(&db, "f2", 0.4, "embed documents", "t2").unwrap();

        let failed = JobCompletion {
            status: "failed",
            progress: None,
            current_step: "embed documents",
            results: None,
            error_message: Some("provider down".to_string()),
        };
        finish(&db, "f2", &failed, "t3").unwrap();

        let found = find_by_id(&db, "f2").unwrap().unwrap();
        assert_eq!(found.status, "failed");
        assert!((found.progress - 0.4).abs() < f64::EPSILON);
        assert_eq!(found.error_message.as_deref(), Some("provider down"));
    }

    #[test]
    fn test_request_cancel() {
        let db = test_db();
        insert(&db, &sample_job("x1")).unwrap();
        assert!(!is_cancel_requested(&db, "x1").unwrap());

        assert!(request_cancel(&db, "x1", "t1").unwrap());
        assert!(is_cancel_requested(&db, "x1").unwrap());
        assert!(!is_cancel_requested(&db, "missing").unwrap());
    }

    #[test]
    fn test_request_cancel_terminal_job_is_noop() {
        let db = test_db();
        insert(&db, &sample_job("x2")).unwrap();
        claim(&db, "x2", "discover targets", "t1").unwrap();
        finish(&db, "x2", &completed(Some(1.0)), "t2").unwrap();

        assert!(!request_cancel(&db, "x2", "t3").unwrap());
        assert!(!is_cancel_requested(&db, "x2").unwrap());
    }

    #[test]
    fn test_fail_running() {
        let db = test_db();
        insert(&db, &sample_job("r1")).unwrap();
        insert(&db, &sample_job("r2")).unwrap();
        claim(&db, "r1", "discover targets", "t1").unwrap();

        assert_eq!(fail_running(&db, "interrupted", "t2").unwrap(), 1);
        let found = find_by_id(&db, "r1").unwrap().unwrap();
        assert_eq!(found.status, "failed");
        assert_eq!(found.error_message.as_deref(), Some("interrupted"));
        assert_eq!(find_by_id(&db, "r2").unwrap().unwrap().status, "pending");
    }

    #[test]
    fn test_query_with_filters() {
        let db = test_db();
        insert(&db, &sample_job("q1")).unwrap();

        let mut other = sample_job("q2");
        other.partition_key = Some("hr_db".to_string());
        other.job_type = "incremental".to_string();
        insert(&db, &other).unwrap();

        let (rows, total) = query(
            &db,
            &JobFilter {
                partition_key: Some("hr_db".to_string()),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(total, 1);
        assert_eq!(rows[0].id, "q2");

        let (rows, _) = query(
            &db,
            &JobFilter {
                job_type: Some("full_sync".to_string()),
                status: Some("pending".to_string()),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, "q1");
    }

    #[test]
    fn test_query_pagination() {
        let db = test_db();
        for i in 0..10 {
            let mut job = sample_job(&format!("p{}", i));
            job.created_at = format!("2026-01-{:02}T00:00:00Z", i + 1);
            insert(&db, &job).unwrap();
        }

        let (rows, total) = query(
            &db,
            &JobFilter {
                limit: Some(3),
                offset: Some(0),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(total, 10);
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].id, "p9");
    }

    #[test]
    fn test_count_by_status() {
        let db = test_db();
        insert(&db, &sample_job("c1")).unwrap();
        insert(&db, &sample_job("c2")).unwrap();
        claim(&db, "c2", "discover targets", "t1").unwrap();

        assert_eq!(count_by_status(&db, "pending").unwrap(), 1);
        assert_eq!(count_by_status(&db, "running").unwrap(), 1);
        assert_eq!(count_by_status(&db, "completed").unwrap(), 0);
    }
}
