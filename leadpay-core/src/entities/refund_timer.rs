use time::OffsetDateTime;
use uuid::Uuid;

/// Money-back timer of one successful purchase.
///
/// A timer is either cancelled (the customer responded) or fired (the
/// deadline passed first), never both. A fired timer is settled once its
/// refund credit has been written.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct RefundTimer {
    pub purchase_id: Uuid,
    pub armed_at: OffsetDateTime,
    pub deadline: OffsetDateTime,
    pub fired: bool,
    pub fired_at: Option<OffsetDateTime>,
    pub cancelled_at: Option<OffsetDateTime>,
    pub settled_at: Option<OffsetDateTime>,
}

impl RefundTimer {
    pub fn armed(purchase_id: Uuid, armed_at: OffsetDateTime, deadline: OffsetDateTime) -> Self {
        Self {
            purchase_id,
            armed_at,
            deadline,
            fired: false,
            fired_at: None,
            cancelled_at: None,
            settled_at: None,
        }
    }

    pub fn is_due(&self, now: OffsetDateTime) -> bool {
        !self.fired && self.cancelled_at.is_none() && self.deadline <= now
    }

    pub fn awaits_settlement(&self) -> bool {
        self.fired && self.settled_at.is_none()
    }
}

const TIMER_COLUMNS: &str =
    "purchase_id, armed_at, deadline, fired, fired_at, cancelled_at, settled_at";

impl RefundTimer {
    /// Insert the timer unless one already exists. Returns whether a row was written.
    pub async fn insert_if_absent(
        conn: &mut sqlx::PgConnection,
        timer: &RefundTimer,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            INSERT INTO refund_timers (purchase_id, armed_at, deadline)
            VALUES ($1, $2, $3)
            ON CONFLICT (purchase_id) DO NOTHING
            "#,
        )
        .bind(timer.purchase_id)
        .bind(timer.armed_at)
        .bind(timer.deadline)
        .execute(conn)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    pub async fn find(
        pool: &sqlx::PgPool,
        purchase_id: Uuid,
    ) -> Result<Option<RefundTimer>, sqlx::Error> {
        sqlx::query_as::<_, RefundTimer>(&format!(
            "SELECT {TIMER_COLUMNS} FROM refund_timers WHERE purchase_id = $1"
        ))
        .bind(purchase_id)
        .fetch_optional(pool)
        .await
    }

    /// Cancel an unfired timer. Returns whether this call cancelled it.
    pub async fn cancel(
        pool: &sqlx::PgPool,
        purchase_id: Uuid,
        now: OffsetDateTime,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE refund_timers SET cancelled_at = $2
            WHERE purchase_id = $1 AND NOT fired AND cancelled_at IS NULL
            "#,
        )
        .bind(purchase_id)
        .bind(now)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Flip `fired` on an unfired, uncancelled timer. Returns whether this call fired it.
    pub async fn mark_fired(
        pool: &sqlx::PgPool,
        purchase_id: Uuid,
        now: OffsetDateTime,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE refund_timers SET fired = TRUE, fired_at = $2
            WHERE purchase_id = $1 AND NOT fired AND cancelled_at IS NULL
            "#,
        )
        .bind(purchase_id)
        .bind(now)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    pub async fn mark_settled(
        conn: &mut sqlx::PgConnection,
        purchase_id: Uuid,
        now: OffsetDateTime,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE refund_timers SET settled_at = $2
            WHERE purchase_id = $1 AND fired AND settled_at IS NULL
            "#,
        )
        .bind(purchase_id)
        .bind(now)
        .execute(conn)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    pub async fn list_due(
        pool: &sqlx::PgPool,
        now: OffsetDateTime,
        limit: i64,
    ) -> Result<Vec<RefundTimer>, sqlx::Error> {
        sqlx::query_as::<_, RefundTimer>(&format!(
            r#"
            SELECT {TIMER_COLUMNS} FROM refund_timers
            WHERE NOT fired AND cancelled_at IS NULL AND deadline <= $1
            ORDER BY deadline
            LIMIT $2
            "#
        ))
        .bind(now)
        .bind(limit)
        .fetch_all(pool)
        .await
    }

    pub async fn list_unsettled(
        pool: &sqlx::PgPool,
        limit: i64,
    ) -> Result<Vec<RefundTimer>, sqlx::Error> {
        sqlx::query_as::<_, RefundTimer>(&format!(
            r#"
            SELECT {TIMER_COLUMNS} FROM refund_timers
            WHERE fired AND settled_at IS NULL
            ORDER BY fired_at
            LIMIT $1
            "#
        ))
        .bind(limit)
        .fetch_all(pool)
        .await
    }
}
