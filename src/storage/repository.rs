use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;

use crate::email::OutgoingEmail;
use crate::error::Result;
use crate::models::{Credentials, Report, ReportType, UserProfile};
use crate::queue::{QueueMessage, QueueName};

fn now_str() -> String {
    Utc::now().to_rfc3339()
}

fn parse_utc(idx: usize, s: &str) -> std::result::Result<DateTime<Utc>, rusqlite::Error> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn parse_date(idx: usize, s: &str) -> std::result::Result<NaiveDate, rusqlite::Error> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn parse_json<T: serde::de::DeserializeOwned>(
    idx: usize,
    s: &str,
) -> std::result::Result<T, rusqlite::Error> {
    serde_json::from_str(s)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

// ── Config ─────────────────────────────────────────────────────────

pub fn get_config(conn: &Connection, key: &str) -> std::result::Result<Option<String>, rusqlite::Error> {
    conn.query_row(
        "SELECT value FROM app_config WHERE key = ?1",
        params![key],
        |row| row.get(0),
    )
    .optional()
}

pub fn set_config(conn: &Connection, key: &str, value: &str) -> std::result::Result<(), rusqlite::Error> {
    conn.execute(
        "INSERT OR REPLACE INTO app_config (key, value, updated_at)
         VALUES (?1, ?2, ?3)",
        params![key, value, now_str()],
    )?;
    Ok(())
}

pub fn list_config(conn: &Connection) -> std::result::Result<Vec<(String, String)>, rusqlite::Error> {
    let mut stmt = conn.prepare("SELECT key, value FROM app_config ORDER BY key")?;
    let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
    rows.collect()
}

// ── Users ──────────────────────────────────────────────────────────

pub fn upsert_user(conn: &Connection, user: &UserProfile) -> std::result::Result<(), rusqlite::Error> {
    let now = now_str();
    conn.execute(
        "INSERT INTO users (user_id, email, first_name, is_active, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?5)
         ON CONFLICT(user_id) DO UPDATE SET
           email = excluded.email,
           first_name = excluded.first_name,
           is_active = excluded.is_active,
           updated_at = excluded.updated_at",
        params![user.user_id, user.email, user.first_name, user.is_active, now],
    )?;
    Ok(())
}

/// Returns `false` when the user does not exist.
pub fn set_user_active(
    conn: &Connection,
    user_id: &str,
    active: bool,
) -> std::result::Result<bool, rusqlite::Error> {
    let changed = conn.execute(
        "UPDATE users SET is_active = ?2, updated_at = ?3 WHERE user_id = ?1",
        params![user_id, active, now_str()],
    )?;
    Ok(changed > 0)
}

fn user_from_row(row: &Row<'_>) -> std::result::Result<UserProfile, rusqlite::Error> {
    Ok(UserProfile {
        user_id: row.get(0)?,
        email: row.get(1)?,
        first_name: row.get(2)?,
        is_active: row.get(3)?,
    })
}

pub fn get_user(conn: &Connection, user_id: &str) -> std::result::Result<Option<UserProfile>, rusqlite::Error> {
    conn.query_row(
        "SELECT user_id, email, first_name, is_active FROM users WHERE user_id = ?1",
        params![user_id],
        user_from_row,
    )
    .optional()
}

pub fn list_users(
    conn: &Connection,
    active_only: bool,
) -> std::result::Result<Vec<UserProfile>, rusqlite::Error> {
    let mut stmt = conn.prepare(
        "SELECT user_id, email, first_name, is_active FROM users
         WHERE (?1 = 0 OR is_active = 1)
         ORDER BY user_id",
    )?;
    let rows = stmt.query_map(params![active_only], user_from_row)?;
    rows.collect()
}

// ── Credentials ────────────────────────────────────────────────────

pub fn upsert_credentials(
    conn: &Connection,
    creds: &Credentials,
) -> std::result::Result<(), rusqlite::Error> {
    conn.execute(
        "INSERT INTO cgm_credentials (user_id, access_token, refresh_token, expires_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(user_id) DO UPDATE SET
           access_token = excluded.access_token,
           refresh_token = excluded.refresh_token,
           expires_at = excluded.expires_at,
           updated_at = excluded.updated_at",
        params![
            creds.user_id,
            creds.access_token,
            creds.refresh_token,
            creds.expires_at.to_rfc3339(),
            now_str(),
        ],
    )?;
    Ok(())
}

fn credentials_from_row(row: &Row<'_>) -> std::result::Result<Credentials, rusqlite::Error> {
    let expires_at: String = row.get(3)?;
    Ok(Credentials {
        user_id: row.get(0)?,
        access_token: row.get(1)?,
        refresh_token: row.get(2)?,
        expires_at: parse_utc(3, &expires_at)?,
    })
}

pub fn get_credentials(
    conn: &Connection,
    user_id: &str,
) -> std::result::Result<Option<Credentials>, rusqlite::Error> {
    conn.query_row(
        "SELECT user_id, access_token, refresh_token, expires_at
         FROM cgm_credentials WHERE user_id = ?1",
        params![user_id],
        credentials_from_row,
    )
    .optional()
}

pub fn list_credentials(conn: &Connection) -> std::result::Result<Vec<Credentials>, rusqlite::Error> {
    let mut stmt = conn.prepare(
        "SELECT user_id, access_token, refresh_token, expires_at
         FROM cgm_credentials ORDER BY user_id",
    )?;
    let rows = stmt.query_map([], credentials_from_row)?;
    rows.collect()
}

/// Store a refreshed access token. The refresh token is only replaced when
/// the vendor rotated it. Returns the number of rows updated.
pub fn update_access_token(
    conn: &Connection,
    user_id: &str,
    access_token: &str,
    refresh_token: Option<&str>,
    expires_at: DateTime<Utc>,
) -> std::result::Result<usize, rusqlite::Error> {
    conn.execute(
        "UPDATE cgm_credentials SET
           access_token = ?2,
           refresh_token = COALESCE(?3, refresh_token),
           expires_at = ?4,
           updated_at = ?5
         WHERE user_id = ?1",
        params![
            user_id,
            access_token,
            refresh_token,
            expires_at.to_rfc3339(),
            now_str()
        ],
    )
}

// ── Blobs ──────────────────────────────────────────────────────────

pub fn put_blob(
    conn: &Connection,
    key: &str,
    body: &str,
    content_type: &str,
) -> std::result::Result<(), rusqlite::Error> {
    conn.execute(
        "INSERT INTO blobs (key, body, content_type, updated_at)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(key) DO UPDATE SET
           body = excluded.body,
           content_type = excluded.content_type,
           updated_at = excluded.updated_at",
        params![key, body, content_type, now_str()],
    )?;
    Ok(())
}

pub fn get_blob(conn: &Connection, key: &str) -> std::result::Result<Option<String>, rusqlite::Error> {
    conn.query_row(
        "SELECT body FROM blobs WHERE key = ?1",
        params![key],
        |row| row.get(0),
    )
    .optional()
}

pub fn list_blob_keys(conn: &Connection, prefix: &str) -> std::result::Result<Vec<String>, rusqlite::Error> {
    let mut stmt = conn.prepare(
        "SELECT key FROM blobs WHERE substr(key, 1, length(?1)) = ?1 ORDER BY key",
    )?;
    let rows = stmt.query_map(params![prefix], |row| row.get(0))?;
    rows.collect()
}

// ── Reports ────────────────────────────────────────────────────────

fn to_json<T: Serialize>(value: &T) -> Result<String> {
    Ok(serde_json::to_string(value)?)
}

/// Write a report, replacing any report with the same key.
pub fn put_report(conn: &Connection, report: &Report) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO glucose_reports (
            user_id, report_key, report_type, period_start, period_end, days_included,
            aggregates, graph_data, insights, insights_version, created_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        params![
            report.user_id,
            report.report_key,
            report.report_type.as_str(),
            report.period_start.to_string(),
            report.period_end.to_string(),
            report.days_included,
            to_json(&report.aggregates)?,
            to_json(&report.graph_data)?,
            to_json(&report.insights)?,
            report.insights_version,
            report.created_at.to_rfc3339(),
        ],
    )?;
    Ok(())
}

const REPORT_COLUMNS: &str = "user_id, report_key, report_type, period_start, period_end, \
     days_included, aggregates, graph_data, insights, insights_version, created_at";

fn report_from_row(row: &Row<'_>) -> std::result::Result<Report, rusqlite::Error> {
    let report_type: String = row.get(2)?;
    let report_type = ReportType::parse(&report_type).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            2,
            Type::Text,
            format!("unknown report type {report_type:?}").into(),
        )
    })?;
    let period_start: String = row.get(3)?;
    let period_end: String = row.get(4)?;
    let aggregates: String = row.get(6)?;
    let graph_data: String = row.get(7)?;
    let insights: String = row.get(8)?;
    let created_at: String = row.get(10)?;
    Ok(Report {
        user_id: row.get(0)?,
        report_key: row.get(1)?,
        report_type,
        period_start: parse_date(3, &period_start)?,
        period_end: parse_date(4, &period_end)?,
        days_included: row.get(5)?,
        aggregates: parse_json(6, &aggregates)?,
        graph_data: parse_json(7, &graph_data)?,
        insights: parse_json(8, &insights)?,
        insights_version: row.get(9)?,
        created_at: parse_utc(10, &created_at)?,
    })
}

pub fn get_report(
    conn: &Connection,
    user_id: &str,
    report_key: &str,
) -> std::result::Result<Option<Report>, rusqlite::Error> {
    conn.query_row(
        &format!("SELECT {REPORT_COLUMNS} FROM glucose_reports WHERE user_id = ?1 AND report_key = ?2"),
        params![user_id, report_key],
        report_from_row,
    )
    .optional()
}

/// Most recent report for a user. Report keys start with the period end, so
/// they sort chronologically.
pub fn latest_report(conn: &Connection, user_id: &str) -> std::result::Result<Option<Report>, rusqlite::Error> {
    conn.query_row(
        &format!(
            "SELECT {REPORT_COLUMNS} FROM glucose_reports WHERE user_id = ?1
             ORDER BY report_key DESC LIMIT 1"
        ),
        params![user_id],
        report_from_row,
    )
    .optional()
}

// ── Queue ──────────────────────────────────────────────────────────

pub fn enqueue(conn: &Connection, queue: QueueName, body: &str) -> std::result::Result<i64, rusqlite::Error> {
    let now = now_str();
    conn.execute(
        "INSERT INTO queue_messages (queue, body, status, receive_count, enqueued_at, updated_at)
         VALUES (?1, ?2, 'pending', 0, ?3, ?3)",
        params![queue.as_str(), body, now],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Claim up to `max` pending messages, oldest first, marking them in flight.
pub fn receive(
    conn: &Connection,
    queue: QueueName,
    max: usize,
) -> std::result::Result<Vec<QueueMessage>, rusqlite::Error> {
    let mut stmt = conn.prepare(
        "UPDATE queue_messages
         SET status = 'in_flight', receive_count = receive_count + 1, updated_at = ?3
         WHERE id IN (
             SELECT id FROM queue_messages
             WHERE queue = ?1 AND status = 'pending'
             ORDER BY id LIMIT ?2
         )
         RETURNING id, body, receive_count",
    )?;
    let rows = stmt.query_map(params![queue.as_str(), max as i64, now_str()], |row| {
        Ok(QueueMessage {
            id: row.get(0)?,
            body: row.get(1)?,
            receive_count: row.get(2)?,
        })
    })?;
    let mut messages = rows.collect::<std::result::Result<Vec<_>, _>>()?;
    messages.sort_by_key(|m| m.id);
    Ok(messages)
}

pub fn ack(conn: &Connection, id: i64) -> std::result::Result<(), rusqlite::Error> {
    conn.execute("DELETE FROM queue_messages WHERE id = ?1", params![id])?;
    Ok(())
}

/// Return an in-flight message to the queue for redelivery.
pub fn release(conn: &Connection, id: i64, error: Option<&str>) -> std::result::Result<(), rusqlite::Error> {
    conn.execute(
        "UPDATE queue_messages
         SET status = 'pending', last_error = COALESCE(?2, last_error), updated_at = ?3
         WHERE id = ?1",
        params![id, error, now_str()],
    )?;
    Ok(())
}

pub fn dead_letter(conn: &Connection, id: i64, error: &str) -> std::result::Result<(), rusqlite::Error> {
    conn.execute(
        "UPDATE queue_messages SET status = 'dead', last_error = ?2, updated_at = ?3 WHERE id = ?1",
        params![id, error, now_str()],
    )?;
    Ok(())
}

/// Put messages left in flight by an interrupted run back in the queue.
pub fn reset_in_flight(conn: &Connection, queue: QueueName) -> std::result::Result<usize, rusqlite::Error> {
    conn.execute(
        "UPDATE queue_messages SET status = 'pending', updated_at = ?2
         WHERE queue = ?1 AND status = 'in_flight'",
        params![queue.as_str(), now_str()],
    )
}

pub fn count_messages(
    conn: &Connection,
    queue: QueueName,
    status: &str,
) -> std::result::Result<u64, rusqlite::Error> {
    conn.query_row(
        "SELECT COUNT(*) FROM queue_messages WHERE queue = ?1 AND status = ?2",
        params![queue.as_str(), status],
        |row| row.get(0),
    )
}

/// A message that exhausted its deliveries or failed fatally.
#[derive(Debug, Clone, Serialize)]
pub struct DeadLetter {
    pub id: i64,
    pub queue: String,
    pub body: String,
    pub receive_count: u32,
    pub last_error: Option<String>,
}

pub fn list_dead_letters(conn: &Connection) -> std::result::Result<Vec<DeadLetter>, rusqlite::Error> {
    let mut stmt = conn.prepare(
        "SELECT id, queue, body, receive_count, last_error FROM queue_messages
         WHERE status = 'dead' ORDER BY id",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok(DeadLetter {
            id: row.get(0)?,
            queue: row.get(1)?,
            body: row.get(2)?,
            receive_count: row.get(3)?,
            last_error: row.get(4)?,
        })
    })?;
    rows.collect()
}

// ── Email outbox ───────────────────────────────────────────────────

pub fn insert_email(conn: &Connection, email: &OutgoingEmail) -> std::result::Result<i64, rusqlite::Error> {
    conn.execute(
        "INSERT INTO email_outbox (sender, recipient, subject, body, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![email.sender, email.recipient, email.subject, email.body, now_str()],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn list_outbox(conn: &Connection, limit: usize) -> std::result::Result<Vec<OutgoingEmail>, rusqlite::Error> {
    let mut stmt = conn.prepare(
        "SELECT sender, recipient, subject, body FROM email_outbox ORDER BY id DESC LIMIT ?1",
    )?;
    let rows = stmt.query_map(params![limit as i64], |row| {
        Ok(OutgoingEmail {
            sender: row.get(0)?,
            recipient: row.get(1)?,
            subject: row.get(2)?,
            body: row.get(3)?,
        })
    })?;
    rows.collect()
}

// ── Status ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize)]
pub struct StatusCounts {
    pub users: u64,
    pub active_users: u64,
    pub credentials: u64,
    pub datasets: u64,
    pub reports: u64,
    pub pending_messages: u64,
    pub in_flight_messages: u64,
    pub dead_messages: u64,
    pub outbox: u64,
}

pub fn status_counts(conn: &Connection) -> std::result::Result<StatusCounts, rusqlite::Error> {
    let count = |sql: &str| conn.query_row(sql, [], |row| row.get::<_, u64>(0));
    Ok(StatusCounts {
        users: count("SELECT COUNT(*) FROM users")?,
        active_users: count("SELECT COUNT(*) FROM users WHERE is_active = 1")?,
        credentials: count("SELECT COUNT(*) FROM cgm_credentials")?,
        datasets: count("SELECT COUNT(*) FROM blobs WHERE key LIKE 'normalized/%'")?,
        reports: count("SELECT COUNT(*) FROM glucose_reports")?,
        pending_messages: count("SELECT COUNT(*) FROM queue_messages WHERE status = 'pending'")?,
        in_flight_messages: count("SELECT COUNT(*) FROM queue_messages WHERE status = 'in_flight'")?,
        dead_messages: count("SELECT COUNT(*) FROM queue_messages WHERE status = 'dead'")?,
        outbox: count("SELECT COUNT(*) FROM email_outbox")?,
    })
}
