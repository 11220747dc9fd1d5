//! Aggregate counters over the outbound message history.

use crate::database::{map_tr_err, Database};
use crate::store::SmsStats;
use crate::StoreError;

/// Compute delivery totals plus day/month windows. `today` is a `YYYY-MM-DD`
/// prefix and `month` a `YYYY-MM` prefix of the stored RFC 3339 timestamps.
pub async fn gather(db: &Database, today: String, month: String) -> Result<SmsStats, StoreError> {
    db.connection()
        .call(move |conn| {
            let count = |sql: &str, binds: &[&dyn rusqlite::ToSql]| -> Result<i64, rusqlite::Error> {
                conn.query_row(sql, binds, |row| row.get(0))
            };

            let total_sent = count(
                "SELECT COUNT(*) FROM sms_messages WHERE direction = 'outbound'",
                &[],
            )?;
            let total_delivered = count(
                "SELECT COUNT(*) FROM sms_messages WHERE direction = 'outbound' AND status = 'delivered'",
                &[],
            )?;
            let total_failed = count(
                "SELECT COUNT(*) FROM sms_messages WHERE direction = 'outbound' AND status IN ('failed', 'undelivered')",
                &[],
            )?;
            let total_cost: f64 = conn.query_row(
                "SELECT COALESCE(SUM(cost), 0.0) FROM sms_messages WHERE direction = 'outbound'",
                [],
                |row| row.get(0),
            )?;
            let today_sent = count(
                "SELECT COUNT(*) FROM sms_messages
                 WHERE direction = 'outbound' AND substr(created_at, 1, 10) = ?1",
                &[&today],
            )?;
            let this_month_sent = count(
                "SELECT COUNT(*) FROM sms_messages
                 WHERE direction = 'outbound' AND substr(created_at, 1, 7) = ?1",
                &[&month],
            )?;

            Ok(SmsStats {
                total_sent,
                total_delivered,
                total_failed,
                total_cost,
                today_sent,
                this_month_sent,
            })
        })
        .await
        .map_err(map_tr_err)
}
