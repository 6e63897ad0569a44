use super::PurchaseStatus;
use crate::pricing::PriceBreakdown;
use time::OffsetDateTime;
use uuid::Uuid;

/// One attempt by a pro to unlock one job's lead.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct Purchase {
    pub id: Uuid,
    pub job_id: Uuid,
    pub pro_id: Uuid,
    #[sqlx(json)]
    pub price_breakdown: PriceBreakdown,
    pub amount_from_balance: i64,
    pub amount_from_gateway: i64,
    pub gateway_reference: Option<String>,
    /// Confirmation handle for the open gateway intent, if any.
    pub client_secret: Option<String>,
    pub status: PurchaseStatus,
    pub gateway_attempts: i32,
    /// Retries of a timed out attempt; they reuse its idempotency key but
    /// still count toward the attempt limit.
    pub timeout_retries: i32,
    pub charge_in_flight: bool,
    pub last_attempt_timed_out: bool,
    pub failure_reason: Option<String>,
    pub awaiting_since: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
    pub version: i64,
}

/// Identity and price of a purchase about to be opened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPurchase {
    pub id: Uuid,
    pub job_id: Uuid,
    pub pro_id: Uuid,
    pub price_breakdown: PriceBreakdown,
}

impl Purchase {
    pub fn pending(new: NewPurchase, now: OffsetDateTime) -> Self {
        Self {
            id: new.id,
            job_id: new.job_id,
            pro_id: new.pro_id,
            price_breakdown: new.price_breakdown,
            amount_from_balance: 0,
            amount_from_gateway: 0,
            gateway_reference: None,
            client_secret: None,
            status: PurchaseStatus::Pending,
            gateway_attempts: 0,
            timeout_retries: 0,
            charge_in_flight: false,
            last_attempt_timed_out: false,
            failure_reason: None,
            awaiting_since: None,
            created_at: now,
            updated_at: now,
            version: 0,
        }
    }

    pub fn final_price(&self) -> i64 {
        self.price_breakdown.final_price
    }

    /// Everything the pro paid for this lead.
    pub fn amount_charged(&self) -> i64 {
        self.amount_from_balance + self.amount_from_gateway
    }

    /// Gateway calls made so far, counting retries of timed out attempts.
    pub fn gateway_tries(&self) -> i32 {
        self.gateway_attempts + self.timeout_retries
    }

    /// Gateway idempotency key of the given attempt.
    pub fn idempotency_key(&self, attempt: i32) -> String {
        format!("lead-purchase:{}:{}", self.id, attempt)
    }
}

const PURCHASE_COLUMNS: &str = r#"
    id, job_id, pro_id, price_breakdown, amount_from_balance, amount_from_gateway,
    gateway_reference, client_secret, status, gateway_attempts, timeout_retries,
    charge_in_flight, last_attempt_timed_out, failure_reason, awaiting_since, created_at,
    updated_at, version
"#;

impl Purchase {
    pub async fn insert(
        conn: &mut sqlx::PgConnection,
        purchase: &Purchase,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(&format!(
            r#"
            INSERT INTO purchases ({PURCHASE_COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17,
                    $18)
            "#
        ))
        .bind(purchase.id)
        .bind(purchase.job_id)
        .bind(purchase.pro_id)
        .bind(sqlx::types::Json(&purchase.price_breakdown))
        .bind(purchase.amount_from_balance)
        .bind(purchase.amount_from_gateway)
        .bind(purchase.gateway_reference.as_deref())
        .bind(purchase.client_secret.as_deref())
        .bind(purchase.status)
        .bind(purchase.gateway_attempts)
        .bind(purchase.timeout_retries)
        .bind(purchase.charge_in_flight)
        .bind(purchase.last_attempt_timed_out)
        .bind(purchase.failure_reason.as_deref())
        .bind(purchase.awaiting_since)
        .bind(purchase.created_at)
        .bind(purchase.updated_at)
        .bind(purchase.version)
        .execute(conn)
        .await?;
        Ok(())
    }

    /// Write every mutable column of `purchase` if the stored row still has
    /// `purchase.version`. Returns the stored row with the bumped version, or
    /// `None` when the version no longer matches.
    pub async fn update_versioned(
        conn: &mut sqlx::PgConnection,
        purchase: &Purchase,
        now: OffsetDateTime,
    ) -> Result<Option<Purchase>, sqlx::Error> {
        sqlx::query_as::<_, Purchase>(&format!(
            r#"
            UPDATE purchases
            SET amount_from_balance = $3,
                amount_from_gateway = $4,
                gateway_reference = $5,
                client_secret = $6,
                status = $7,
                gateway_attempts = $8,
                timeout_retries = $9,
                charge_in_flight = $10,
                last_attempt_timed_out = $11,
                failure_reason = $12,
                awaiting_since = $13,
                updated_at = $14,
                version = version + 1
            WHERE id = $1 AND version = $2
            RETURNING {PURCHASE_COLUMNS}
            "#
        ))
        .bind(purchase.id)
        .bind(purchase.version)
        .bind(purchase.amount_from_balance)
        .bind(purchase.amount_from_gateway)
        .bind(purchase.gateway_reference.as_deref())
        .bind(purchase.client_secret.as_deref())
        .bind(purchase.status)
        .bind(purchase.gateway_attempts)
        .bind(purchase.timeout_retries)
        .bind(purchase.charge_in_flight)
        .bind(purchase.last_attempt_timed_out)
        .bind(purchase.failure_reason.as_deref())
        .bind(purchase.awaiting_since)
        .bind(now)
        .fetch_optional(conn)
        .await
    }

    pub async fn find_by_id(
        pool: &sqlx::PgPool,
        id: Uuid,
    ) -> Result<Option<Purchase>, sqlx::Error> {
        sqlx::query_as::<_, Purchase>(&format!(
            "SELECT {PURCHASE_COLUMNS} FROM purchases WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(pool)
        .await
    }

    pub async fn find_active(
        pool: &sqlx::PgPool,
        job_id: Uuid,
        pro_id: Uuid,
    ) -> Result<Option<Purchase>, sqlx::Error> {
        sqlx::query_as::<_, Purchase>(&format!(
            r#"
            SELECT {PURCHASE_COLUMNS} FROM purchases
            WHERE job_id = $1 AND pro_id = $2 AND status NOT IN ('refunded', 'failed')
            "#
        ))
        .bind(job_id)
        .bind(pro_id)
        .fetch_optional(pool)
        .await
    }

    /// Purchases in `status` whose last write is older than `before`,
    /// optionally narrowed to those with a charge in flight.
    pub async fn list_stale(
        pool: &sqlx::PgPool,
        status: PurchaseStatus,
        before: OffsetDateTime,
        charge_in_flight: Option<bool>,
        limit: i64,
    ) -> Result<Vec<Purchase>, sqlx::Error> {
        sqlx::query_as::<_, Purchase>(&format!(
            r#"
            SELECT {PURCHASE_COLUMNS} FROM purchases
            WHERE status = $1
              AND updated_at < $2
              AND ($3::BOOLEAN IS NULL OR charge_in_flight = $3)
            ORDER BY updated_at
            LIMIT $4
            "#
        ))
        .bind(status)
        .bind(before)
        .bind(charge_in_flight)
        .bind(limit)
        .fetch_all(pool)
        .await
    }
}
