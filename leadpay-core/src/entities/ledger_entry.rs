use super::{EntryKind, LedgerReason};
use time::OffsetDateTime;
use uuid::Uuid;

/// One append-only balance movement. `amount` is signed: credits are
/// positive, debits negative, so a pro's balance is the plain sum.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct LedgerEntry {
    pub id: i64,
    pub pro_id: Uuid,
    pub amount: i64,
    pub kind: EntryKind,
    pub reason: LedgerReason,
    pub purchase_id: Option<Uuid>,
    pub reference: Option<String>,
    pub created_at: OffsetDateTime,
}

/// A ledger entry about to be appended. `amount` is the unsigned magnitude.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewLedgerEntry {
    pub pro_id: Uuid,
    pub amount: i64,
    pub kind: EntryKind,
    pub reason: LedgerReason,
    pub purchase_id: Option<Uuid>,
    pub reference: Option<String>,
}

impl NewLedgerEntry {
    pub fn credit(pro_id: Uuid, amount: i64, reason: LedgerReason) -> Self {
        Self {
            pro_id,
            amount,
            kind: EntryKind::Credit,
            reason,
            purchase_id: None,
            reference: None,
        }
    }

    pub fn debit(pro_id: Uuid, amount: i64, reason: LedgerReason) -> Self {
        Self {
            pro_id,
            amount,
            kind: EntryKind::Debit,
            reason,
            purchase_id: None,
            reference: None,
        }
    }

    pub fn for_purchase(mut self, purchase_id: Uuid) -> Self {
        self.purchase_id = Some(purchase_id);
        self
    }

    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }

    /// The amount as it is stored: negative for debits.
    pub fn signed_amount(&self) -> i64 {
        match self.kind {
            EntryKind::Credit => self.amount,
            EntryKind::Debit => -self.amount,
        }
    }
}

const ENTRY_COLUMNS: &str = "id, pro_id, amount, kind, reason, purchase_id, reference, created_at";

impl LedgerEntry {
    pub async fn insert(
        conn: &mut sqlx::PgConnection,
        entry: &NewLedgerEntry,
        now: OffsetDateTime,
    ) -> Result<LedgerEntry, sqlx::Error> {
        let sql = format!(
            r#"
            INSERT INTO ledger_entries
                (pro_id, amount, kind, reason, purchase_id, reference, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {ENTRY_COLUMNS}
            "#
        );
        sqlx::query_as::<_, LedgerEntry>(&sql)
            .bind(entry.pro_id)
            .bind(entry.signed_amount())
            .bind(entry.kind)
            .bind(entry.reason)
            .bind(entry.purchase_id)
            .bind(entry.reference.as_deref())
            .bind(now)
            .fetch_one(conn)
            .await
    }

    /// Serialize balance-changing writes for one pro until the transaction ends.
    pub async fn lock_account(
        conn: &mut sqlx::PgConnection,
        pro_id: Uuid,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1::text, 0))")
            .bind(pro_id)
            .execute(conn)
            .await?;
        Ok(())
    }

    pub async fn balance_of(
        conn: &mut sqlx::PgConnection,
        pro_id: Uuid,
    ) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar::<_, i64>(
            "SELECT COALESCE(SUM(amount), 0)::BIGINT FROM ledger_entries WHERE pro_id = $1",
        )
        .bind(pro_id)
        .fetch_one(conn)
        .await
    }

    /// Entries of one pro, newest first.
    pub async fn list_for_pro(
        pool: &sqlx::PgPool,
        pro_id: Uuid,
    ) -> Result<Vec<LedgerEntry>, sqlx::Error> {
        let sql = format!(
            "SELECT {ENTRY_COLUMNS} FROM ledger_entries WHERE pro_id = $1 ORDER BY id DESC"
        );
        sqlx::query_as::<_, LedgerEntry>(&sql)
            .bind(pro_id)
            .fetch_all(pool)
            .await
    }
}
