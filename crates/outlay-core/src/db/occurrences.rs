//! Occurrence persistence

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};

use super::{format_datetime, parse_date_column, parse_datetime, Database};
use crate::error::{Error, Result};
use crate::models::{DateRange, NewOccurrence, Occurrence, OccurrenceFilter, OccurrenceStatus};
use crate::store::{ClaimOutcome, OccurrenceStore};

const OCCURRENCE_COLUMNS: &str = "id, parent_expense_id, occurrence_date, status, linked_expense_id, completed_date, created_at";

fn occurrence_from_row(row: &rusqlite::Row) -> rusqlite::Result<Occurrence> {
    let date_str: String = row.get(2)?;
    let status_str: String = row.get(3)?;
    let completed_str: Option<String> = row.get(5)?;
    let created_at_str: String = row.get(6)?;

    let status = status_str.parse::<OccurrenceStatus>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(
            3,
            rusqlite::types::Type::Text,
            Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, e)),
        )
    })?;

    Ok(Occurrence {
        id: row.get(0)?,
        parent_expense_id: row.get(1)?,
        occurrence_date: parse_date_column(2, &date_str)?,
        status,
        linked_expense_id: row.get(4)?,
        completed_date: completed_str.map(|s| parse_datetime(&s)),
        created_at: parse_datetime(&created_at_str),
    })
}

fn load(conn: &Connection, id: i64) -> Result<Option<Occurrence>> {
    let occurrence = conn
        .query_row(
            &format!(
                "SELECT {} FROM expense_occurrences WHERE id = ?",
                OCCURRENCE_COLUMNS
            ),
            params![id],
            occurrence_from_row,
        )
        .optional()?;
    Ok(occurrence)
}

fn not_found(id: i64) -> Error {
    Error::NotFound(format!("Occurrence {}", id))
}

impl OccurrenceStore for Database {
    fn get(&self, id: i64) -> Result<Option<Occurrence>> {
        let conn = self.conn()?;
        load(&conn, id)
    }

    fn find(
        &self,
        parent_expense_id: i64,
        occurrence_date: NaiveDate,
    ) -> Result<Option<Occurrence>> {
        let conn = self.conn()?;

        let occurrence = conn
            .query_row(
                &format!(
                    "SELECT {} FROM expense_occurrences WHERE parent_expense_id = ? AND occurrence_date = ?",
                    OCCURRENCE_COLUMNS
                ),
                params![parent_expense_id, occurrence_date.to_string()],
                occurrence_from_row,
            )
            .optional()?;

        Ok(occurrence)
    }

    fn insert(&self, occurrence: NewOccurrence) -> Result<Option<Occurrence>> {
        let conn = self.conn()?;

        // The UNIQUE key makes concurrent generation runs converge
        let inserted = conn.execute(
            r#"
            INSERT INTO expense_occurrences (parent_expense_id, occurrence_date, status)
            VALUES (?, ?, 'pending')
            ON CONFLICT(parent_expense_id, occurrence_date) DO NOTHING
            "#,
            params![
                occurrence.parent_expense_id,
                occurrence.occurrence_date.to_string()
            ],
        )?;

        if inserted == 0 {
            return Ok(None);
        }
        load(&conn, conn.last_insert_rowid())
    }

    fn update_status(
        &self,
        id: i64,
        expected: OccurrenceStatus,
        status: OccurrenceStatus,
        completed_date: Option<DateTime<Utc>>,
    ) -> Result<bool> {
        let conn = self.conn()?;

        let updated = conn.execute(
            r#"
            UPDATE expense_occurrences
            SET status = ?, completed_date = ?
            WHERE id = ? AND status = ?
            "#,
            params![
                status.as_str(),
                completed_date.map(format_datetime),
                id,
                expected.as_str()
            ],
        )?;

        Ok(updated == 1)
    }

    fn list_by_date_range(
        &self,
        window: DateRange,
        filter: OccurrenceFilter,
    ) -> Result<Vec<Occurrence>> {
        let conn = self.conn()?;

        let mut conditions = vec!["occurrence_date >= ?", "occurrence_date <= ?"];
        let mut params_vec: Vec<Box<dyn rusqlite::ToSql>> = vec![
            Box::new(window.start.to_string()),
            Box::new(window.end.to_string()),
        ];

        if let Some(status) = filter.status {
            conditions.push("status = ?");
            params_vec.push(Box::new(status.as_str()));
        }
        if let Some(parent_id) = filter.parent_expense_id {
            conditions.push("parent_expense_id = ?");
            params_vec.push(Box::new(parent_id));
        }

        let query = format!(
            "SELECT {} FROM expense_occurrences WHERE {} ORDER BY occurrence_date, parent_expense_id",
            OCCURRENCE_COLUMNS,
            conditions.join(" AND ")
        );

        let mut stmt = conn.prepare(&query)?;
        let params_refs: Vec<&dyn rusqlite::ToSql> =
            params_vec.iter().map(|p| p.as_ref()).collect();

        let occurrences = stmt
            .query_map(params_refs.as_slice(), occurrence_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(occurrences)
    }

    fn claim_completion(&self, id: i64, completed_at: DateTime<Utc>) -> Result<ClaimOutcome> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let current = load(&tx, id)?.ok_or_else(|| not_found(id))?;

        let outcome = match (current.status, current.linked_expense_id) {
            (OccurrenceStatus::Pending, linked) => {
                tx.execute(
                    r#"
                    UPDATE expense_occurrences
                    SET status = 'completed', completed_date = ?
                    WHERE id = ? AND status = 'pending'
                    "#,
                    params![format_datetime(completed_at), id],
                )?;
                let claimed = load(&tx, id)?.ok_or_else(|| not_found(id))?;
                // A reset occurrence keeps its link; completing it again only
                // flips the status back
                if linked.is_some() {
                    ClaimOutcome::AlreadyLinked(claimed)
                } else {
                    ClaimOutcome::Claimed(claimed)
                }
            }
            (OccurrenceStatus::Completed, Some(_)) => ClaimOutcome::AlreadyLinked(current),
            _ => ClaimOutcome::Unavailable(current),
        };

        tx.commit()?;
        Ok(outcome)
    }

    fn attach_linked_expense(&self, id: i64, expense_id: i64) -> Result<Occurrence> {
        let conn = self.conn()?;

        // First writer wins; the link never changes afterwards
        conn.execute(
            r#"
            UPDATE expense_occurrences SET linked_expense_id = ?
            WHERE id = ? AND linked_expense_id IS NULL
            "#,
            params![expense_id, id],
        )?;

        load(&conn, id)?.ok_or_else(|| not_found(id))
    }

    fn release_claim(&self, id: i64) -> Result<()> {
        let conn = self.conn()?;

        conn.execute(
            r#"
            UPDATE expense_occurrences
            SET status = 'pending', completed_date = NULL
            WHERE id = ? AND status = 'completed' AND linked_expense_id IS NULL
            "#,
            params![id],
        )?;

        Ok(())
    }
}
