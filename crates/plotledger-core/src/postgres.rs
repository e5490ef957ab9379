//! PostgreSQL adapter for the billing store.
//!
//! Every `BillingTx` wraps one database transaction. `lock_*` reads use
//! `SELECT ... FOR UPDATE` so concurrent publish, payment and webhook
//! requests against the same rows serialize at the database.

use crate::ledger::{LedgerEntry, LedgerEntryKind, LedgerFilter};
use crate::store::{BillingStore, BillingTx, StoreError, StoreResult};
use crate::types::{
    Charge, ChargeLine, ChargeStatus, ChargeType, Invoice, InvoiceStatus, Payment, PaymentStatus,
    PaymentWebhookEvent, PlotId, TenantId, UserId,
};
use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Postgres, Row, Transaction};
use uuid::Uuid;

const CHARGE_COLUMNS: &str = "id, tenant_id, title, charge_type, unit_amount_cents, due_date, \
     status, created_by, created_at, published_at, closed_at";
const INVOICE_COLUMNS: &str = "id, tenant_id, number, charge_id, plot_id, user_id, total_cents, \
     paid_cents, status, due_date, issued_at, closed_at, updated_at";
const PAYMENT_COLUMNS: &str = "id, tenant_id, invoice_id, payer_id, provider, idempotency_key, \
     amount_cents, status, created_at, updated_at";
const LEDGER_COLUMNS: &str = "id, tenant_id, plot_id, charge_id, invoice_id, payment_id, kind, \
     amount_cents, memo, created_at";

/// PostgreSQL-backed billing store.
#[derive(Clone)]
pub struct PostgresBillingStore {
    pool: PgPool,
}

impl PostgresBillingStore {
    /// Connect to PostgreSQL and initialize required schema.
    pub async fn connect(database_url: &str, max_connections: u32) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(std::time::Duration::from_secs(5))
            .connect(database_url)
            .await
            .map_err(|e| StoreError::Backend(format!("failed to connect postgres: {e}")))?;
        Self::from_pool(pool).await
    }

    /// Create adapter from an existing pool.
    pub async fn from_pool(pool: PgPool) -> StoreResult<Self> {
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn init_schema(&self) -> StoreResult<()> {
        let ddl = [
            r#"
            CREATE TABLE IF NOT EXISTS billing_charges (
                id UUID NOT NULL,
                tenant_id TEXT NOT NULL,
                title TEXT NOT NULL,
                charge_type TEXT NOT NULL,
                unit_amount_cents BIGINT NOT NULL CHECK (unit_amount_cents > 0),
                due_date DATE NOT NULL,
                status TEXT NOT NULL,
                created_by BIGINT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL,
                published_at TIMESTAMPTZ,
                closed_at TIMESTAMPTZ,
                PRIMARY KEY (tenant_id, id)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS billing_charge_lines (
                tenant_id TEXT NOT NULL,
                charge_id UUID NOT NULL,
                plot_id BIGINT NOT NULL,
                amount_cents BIGINT NOT NULL,
                PRIMARY KEY (tenant_id, charge_id, plot_id)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS billing_invoices (
                id UUID NOT NULL,
                tenant_id TEXT NOT NULL,
                number TEXT NOT NULL,
                charge_id UUID NOT NULL,
                plot_id BIGINT NOT NULL,
                user_id BIGINT,
                total_cents BIGINT NOT NULL,
                paid_cents BIGINT NOT NULL DEFAULT 0,
                status TEXT NOT NULL,
                due_date DATE NOT NULL,
                issued_at TIMESTAMPTZ NOT NULL,
                closed_at TIMESTAMPTZ,
                updated_at TIMESTAMPTZ NOT NULL,
                PRIMARY KEY (tenant_id, id),
                UNIQUE (tenant_id, charge_id, plot_id),
                UNIQUE (tenant_id, number)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS billing_payments (
                id UUID NOT NULL,
                tenant_id TEXT NOT NULL,
                invoice_id UUID NOT NULL,
                payer_id BIGINT NOT NULL,
                provider TEXT NOT NULL,
                idempotency_key TEXT NOT NULL,
                amount_cents BIGINT NOT NULL,
                status TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL,
                PRIMARY KEY (tenant_id, id),
                UNIQUE (tenant_id, idempotency_key)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS billing_payment_webhook_events (
                tenant_id TEXT NOT NULL,
                provider TEXT NOT NULL,
                provider_event_id TEXT NOT NULL,
                payment_id UUID NOT NULL,
                status_raw TEXT NOT NULL,
                received_at TIMESTAMPTZ NOT NULL,
                PRIMARY KEY (tenant_id, provider, provider_event_id)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS billing_ledger_entries (
                seq BIGSERIAL PRIMARY KEY,
                id UUID NOT NULL UNIQUE,
                tenant_id TEXT NOT NULL,
                plot_id BIGINT NOT NULL,
                charge_id UUID,
                invoice_id UUID,
                payment_id UUID,
                kind TEXT NOT NULL,
                amount_cents BIGINT NOT NULL,
                memo TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL
            )
            "#,
            "CREATE INDEX IF NOT EXISTS billing_ledger_entries_charge_idx \
             ON billing_ledger_entries (tenant_id, charge_id)",
            "CREATE INDEX IF NOT EXISTS billing_invoices_user_idx \
             ON billing_invoices (tenant_id, user_id)",
        ];

        for stmt in ddl {
            sqlx::query(stmt)
                .execute(&self.pool)
                .await
                .map_err(|e| StoreError::Backend(format!("schema init failed: {e}")))?;
        }
        Ok(())
    }
}

#[async_trait]
impl BillingStore for PostgresBillingStore {
    fn backend_label(&self) -> &'static str {
        "postgres"
    }

    async fn begin(&self) -> StoreResult<Box<dyn BillingTx>> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::Backend(format!("failed to begin transaction: {e}")))?;
        Ok(Box::new(PostgresBillingTx { tx }))
    }
}

struct PostgresBillingTx {
    tx: Transaction<'static, Postgres>,
}

impl PostgresBillingTx {
    async fn select_charge(
        &mut self,
        tenant: &TenantId,
        charge_id: Uuid,
        for_update: bool,
    ) -> StoreResult<Option<Charge>> {
        let sql = format!(
            "SELECT {CHARGE_COLUMNS} FROM billing_charges WHERE tenant_id = $1 AND id = $2{}",
            lock_suffix(for_update)
        );
        let row = sqlx::query(&sql)
            .bind(tenant.as_str())
            .bind(charge_id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(backend)?;
        row.map(charge_from_row).transpose()
    }

    async fn select_invoice(
        &mut self,
        tenant: &TenantId,
        invoice_id: Uuid,
        for_update: bool,
    ) -> StoreResult<Option<Invoice>> {
        let sql = format!(
            "SELECT {INVOICE_COLUMNS} FROM billing_invoices WHERE tenant_id = $1 AND id = $2{}",
            lock_suffix(for_update)
        );
        let row = sqlx::query(&sql)
            .bind(tenant.as_str())
            .bind(invoice_id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(backend)?;
        row.map(invoice_from_row).transpose()
    }
}

#[async_trait]
impl BillingTx for PostgresBillingTx {
    async fn insert_charge(&mut self, charge: &Charge) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO billing_charges
                (id, tenant_id, title, charge_type, unit_amount_cents, due_date, status,
                 created_by, created_at, published_at, closed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(charge.id)
        .bind(charge.tenant_id.as_str())
        .bind(&charge.title)
        .bind(charge.charge_type.as_str())
        .bind(charge.unit_amount_cents)
        .bind(charge.due_date)
        .bind(charge.status.as_str())
        .bind(charge.created_by)
        .bind(charge.created_at)
        .bind(charge.published_at)
        .bind(charge.closed_at)
        .execute(&mut *self.tx)
        .await
        .map_err(map_sqlx_conflict)?;
        Ok(())
    }

    async fn find_charge(
        &mut self,
        tenant: &TenantId,
        charge_id: Uuid,
    ) -> StoreResult<Option<Charge>> {
        self.select_charge(tenant, charge_id, false).await
    }

    async fn lock_charge(
        &mut self,
        tenant: &TenantId,
        charge_id: Uuid,
    ) -> StoreResult<Option<Charge>> {
        self.select_charge(tenant, charge_id, true).await
    }

    async fn update_charge(&mut self, charge: &Charge) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE billing_charges
               SET title = $3, status = $4, published_at = $5, closed_at = $6
             WHERE tenant_id = $1 AND id = $2
            "#,
        )
        .bind(charge.tenant_id.as_str())
        .bind(charge.id)
        .bind(&charge.title)
        .bind(charge.status.as_str())
        .bind(charge.published_at)
        .bind(charge.closed_at)
        .execute(&mut *self.tx)
        .await
        .map_err(backend)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!(
                "charge {} not found",
                charge.id
            )));
        }
        Ok(())
    }

    async fn charge_lines(
        &mut self,
        tenant: &TenantId,
        charge_id: Uuid,
    ) -> StoreResult<Vec<ChargeLine>> {
        let rows = sqlx::query(
            r#"
            SELECT tenant_id, charge_id, plot_id, amount_cents
              FROM billing_charge_lines
             WHERE tenant_id = $1 AND charge_id = $2
             ORDER BY plot_id
            "#,
        )
        .bind(tenant.as_str())
        .bind(charge_id)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(backend)?;
        rows.into_iter().map(line_from_row).collect()
    }

    async fn insert_charge_line(&mut self, line: &ChargeLine) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO billing_charge_lines (tenant_id, charge_id, plot_id, amount_cents)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(line.tenant_id.as_str())
        .bind(line.charge_id)
        .bind(line.plot_id)
        .bind(line.amount_cents)
        .execute(&mut *self.tx)
        .await
        .map_err(map_sqlx_conflict)?;
        Ok(())
    }

    async fn delete_charge_line(
        &mut self,
        tenant: &TenantId,
        charge_id: Uuid,
        plot_id: PlotId,
    ) -> StoreResult<()> {
        sqlx::query(
            "DELETE FROM billing_charge_lines WHERE tenant_id = $1 AND charge_id = $2 AND plot_id = $3",
        )
        .bind(tenant.as_str())
        .bind(charge_id)
        .bind(plot_id)
        .execute(&mut *self.tx)
        .await
        .map_err(backend)?;
        Ok(())
    }

    async fn find_invoice(
        &mut self,
        tenant: &TenantId,
        invoice_id: Uuid,
    ) -> StoreResult<Option<Invoice>> {
        self.select_invoice(tenant, invoice_id, false).await
    }

    async fn lock_invoice(
        &mut self,
        tenant: &TenantId,
        invoice_id: Uuid,
    ) -> StoreResult<Option<Invoice>> {
        self.select_invoice(tenant, invoice_id, true).await
    }

    async fn insert_invoice(&mut self, invoice: &Invoice) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO billing_invoices
                (id, tenant_id, number, charge_id, plot_id, user_id, total_cents, paid_cents,
                 status, due_date, issued_at, closed_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(invoice.id)
        .bind(invoice.tenant_id.as_str())
        .bind(&invoice.number)
        .bind(invoice.charge_id)
        .bind(invoice.plot_id)
        .bind(invoice.user_id)
        .bind(invoice.total_cents)
        .bind(invoice.paid_cents)
        .bind(invoice.status.as_str())
        .bind(invoice.due_date)
        .bind(invoice.issued_at)
        .bind(invoice.closed_at)
        .bind(invoice.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(map_sqlx_conflict)?;
        Ok(())
    }

    async fn update_invoice(&mut self, invoice: &Invoice) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE billing_invoices
               SET user_id = $3, total_cents = $4, paid_cents = $5, status = $6,
                   closed_at = $7, updated_at = $8
             WHERE tenant_id = $1 AND id = $2
            "#,
        )
        .bind(invoice.tenant_id.as_str())
        .bind(invoice.id)
        .bind(invoice.user_id)
        .bind(invoice.total_cents)
        .bind(invoice.paid_cents)
        .bind(invoice.status.as_str())
        .bind(invoice.closed_at)
        .bind(invoice.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(backend)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!(
                "invoice {} not found",
                invoice.id
            )));
        }
        Ok(())
    }

    async fn invoices_for_charge(
        &mut self,
        tenant: &TenantId,
        charge_id: Uuid,
    ) -> StoreResult<Vec<Invoice>> {
        let sql = format!(
            "SELECT {INVOICE_COLUMNS} FROM billing_invoices \
             WHERE tenant_id = $1 AND charge_id = $2 ORDER BY plot_id"
        );
        let rows = sqlx::query(&sql)
            .bind(tenant.as_str())
            .bind(charge_id)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(backend)?;
        rows.into_iter().map(invoice_from_row).collect()
    }

    async fn invoices_for_user(
        &mut self,
        tenant: &TenantId,
        user_id: UserId,
    ) -> StoreResult<Vec<Invoice>> {
        let sql = format!(
            "SELECT {INVOICE_COLUMNS} FROM billing_invoices \
             WHERE tenant_id = $1 AND user_id = $2 ORDER BY issued_at, number"
        );
        let rows = sqlx::query(&sql)
            .bind(tenant.as_str())
            .bind(user_id)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(backend)?;
        rows.into_iter().map(invoice_from_row).collect()
    }

    async fn find_payment_by_key(
        &mut self,
        tenant: &TenantId,
        idempotency_key: &str,
    ) -> StoreResult<Option<Payment>> {
        let sql = format!(
            "SELECT {PAYMENT_COLUMNS} FROM billing_payments \
             WHERE tenant_id = $1 AND idempotency_key = $2"
        );
        let row = sqlx::query(&sql)
            .bind(tenant.as_str())
            .bind(idempotency_key)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(backend)?;
        row.map(payment_from_row).transpose()
    }

    async fn lock_payment(
        &mut self,
        tenant: &TenantId,
        payment_id: Uuid,
    ) -> StoreResult<Option<Payment>> {
        let sql = format!(
            "SELECT {PAYMENT_COLUMNS} FROM billing_payments \
             WHERE tenant_id = $1 AND id = $2 FOR UPDATE"
        );
        let row = sqlx::query(&sql)
            .bind(tenant.as_str())
            .bind(payment_id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(backend)?;
        row.map(payment_from_row).transpose()
    }

    async fn insert_payment(&mut self, payment: &Payment) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO billing_payments
                (id, tenant_id, invoice_id, payer_id, provider, idempotency_key, amount_cents,
                 status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(payment.id)
        .bind(payment.tenant_id.as_str())
        .bind(payment.invoice_id)
        .bind(payment.payer_id)
        .bind(&payment.provider)
        .bind(&payment.idempotency_key)
        .bind(payment.amount_cents)
        .bind(payment.status.as_str())
        .bind(payment.created_at)
        .bind(payment.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(map_sqlx_conflict)?;
        Ok(())
    }

    async fn update_payment(&mut self, payment: &Payment) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE billing_payments
               SET status = $3, updated_at = $4
             WHERE tenant_id = $1 AND id = $2
            "#,
        )
        .bind(payment.tenant_id.as_str())
        .bind(payment.id)
        .bind(payment.status.as_str())
        .bind(payment.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(backend)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!(
                "payment {} not found",
                payment.id
            )));
        }
        Ok(())
    }

    async fn payments_for_invoice(
        &mut self,
        tenant: &TenantId,
        invoice_id: Uuid,
    ) -> StoreResult<Vec<Payment>> {
        let sql = format!(
            "SELECT {PAYMENT_COLUMNS} FROM billing_payments \
             WHERE tenant_id = $1 AND invoice_id = $2 ORDER BY created_at"
        );
        let rows = sqlx::query(&sql)
            .bind(tenant.as_str())
            .bind(invoice_id)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(backend)?;
        rows.into_iter().map(payment_from_row).collect()
    }

    async fn webhook_event_exists(
        &mut self,
        tenant: &TenantId,
        provider: &str,
        provider_event_id: &str,
    ) -> StoreResult<bool> {
        let row = sqlx::query(
            r#"
            SELECT 1 AS present FROM billing_payment_webhook_events
             WHERE tenant_id = $1 AND provider = $2 AND provider_event_id = $3
            "#,
        )
        .bind(tenant.as_str())
        .bind(provider)
        .bind(provider_event_id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(backend)?;
        Ok(row.is_some())
    }

    async fn insert_webhook_event(&mut self, event: &PaymentWebhookEvent) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO billing_payment_webhook_events
                (tenant_id, provider, provider_event_id, payment_id, status_raw, received_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(event.tenant_id.as_str())
        .bind(&event.provider)
        .bind(&event.provider_event_id)
        .bind(event.payment_id)
        .bind(&event.status_raw)
        .bind(event.received_at)
        .execute(&mut *self.tx)
        .await
        .map_err(map_sqlx_conflict)?;
        Ok(())
    }

    async fn append_ledger_entry(&mut self, entry: &LedgerEntry) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO billing_ledger_entries
                (id, tenant_id, plot_id, charge_id, invoice_id, payment_id, kind, amount_cents,
                 memo, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(entry.id)
        .bind(entry.tenant_id.as_str())
        .bind(entry.plot_id)
        .bind(entry.charge_id)
        .bind(entry.invoice_id)
        .bind(entry.payment_id)
        .bind(entry.kind.as_str())
        .bind(entry.amount_cents)
        .bind(&entry.memo)
        .bind(entry.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(map_sqlx_conflict)?;
        Ok(())
    }

    async fn ledger_entries(
        &mut self,
        tenant: &TenantId,
        filter: &LedgerFilter,
    ) -> StoreResult<Vec<LedgerEntry>> {
        let sql = format!(
            r#"
            SELECT {LEDGER_COLUMNS} FROM billing_ledger_entries
             WHERE tenant_id = $1
               AND ($2::UUID IS NULL OR charge_id = $2)
               AND ($3::UUID IS NULL OR invoice_id = $3)
               AND ($4::BIGINT IS NULL OR plot_id = $4)
               AND ($5::TEXT IS NULL OR kind = $5)
             ORDER BY seq
            "#
        );
        let rows = sqlx::query(&sql)
            .bind(tenant.as_str())
            .bind(filter.charge_id)
            .bind(filter.invoice_id)
            .bind(filter.plot_id)
            .bind(filter.kind.map(LedgerEntryKind::as_str))
            .fetch_all(&mut *self.tx)
            .await
            .map_err(backend)?;
        rows.into_iter().map(ledger_from_row).collect()
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        self.tx
            .commit()
            .await
            .map_err(|e| StoreError::Backend(format!("commit failed: {e}")))
    }

    async fn rollback(self: Box<Self>) -> StoreResult<()> {
        self.tx
            .rollback()
            .await
            .map_err(|e| StoreError::Backend(format!("rollback failed: {e}")))
    }
}

fn lock_suffix(for_update: bool) -> &'static str {
    if for_update {
        " FOR UPDATE"
    } else {
        ""
    }
}

fn get<'r, T>(row: &'r PgRow, column: &str) -> StoreResult<T>
where
    T: sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
{
    row.try_get(column)
        .map_err(|e| StoreError::Backend(format!("column {column}: {e}")))
}

fn parse_label<T>(raw: &str, parse: fn(&str) -> Option<T>, what: &str) -> StoreResult<T> {
    parse(raw).ok_or_else(|| StoreError::Serialization(format!("unknown {what} '{raw}'")))
}

fn charge_from_row(row: PgRow) -> StoreResult<Charge> {
    let charge_type: String = get(&row, "charge_type")?;
    let status: String = get(&row, "status")?;
    Ok(Charge {
        id: get(&row, "id")?,
        tenant_id: TenantId::new(get::<String>(&row, "tenant_id")?),
        title: get(&row, "title")?,
        charge_type: parse_label(&charge_type, ChargeType::parse, "charge type")?,
        unit_amount_cents: get(&row, "unit_amount_cents")?,
        due_date: get(&row, "due_date")?,
        status: parse_label(&status, ChargeStatus::parse, "charge status")?,
        created_by: get(&row, "created_by")?,
        created_at: get(&row, "created_at")?,
        published_at: get(&row, "published_at")?,
        closed_at: get(&row, "closed_at")?,
    })
}

fn line_from_row(row: PgRow) -> StoreResult<ChargeLine> {
    Ok(ChargeLine {
        tenant_id: TenantId::new(get::<String>(&row, "tenant_id")?),
        charge_id: get(&row, "charge_id")?,
        plot_id: get(&row, "plot_id")?,
        amount_cents: get(&row, "amount_cents")?,
    })
}

fn invoice_from_row(row: PgRow) -> StoreResult<Invoice> {
    let status: String = get(&row, "status")?;
    Ok(Invoice {
        id: get(&row, "id")?,
        tenant_id: TenantId::new(get::<String>(&row, "tenant_id")?),
        number: get(&row, "number")?,
        charge_id: get(&row, "charge_id")?,
        plot_id: get(&row, "plot_id")?,
        user_id: get(&row, "user_id")?,
        total_cents: get(&row, "total_cents")?,
        paid_cents: get(&row, "paid_cents")?,
        status: parse_label(&status, InvoiceStatus::parse, "invoice status")?,
        due_date: get(&row, "due_date")?,
        issued_at: get(&row, "issued_at")?,
        closed_at: get(&row, "closed_at")?,
        updated_at: get(&row, "updated_at")?,
    })
}

fn payment_from_row(row: PgRow) -> StoreResult<Payment> {
    let status: String = get(&row, "status")?;
    Ok(Payment {
        id: get(&row, "id")?,
        tenant_id: TenantId::new(get::<String>(&row, "tenant_id")?),
        invoice_id: get(&row, "invoice_id")?,
        payer_id: get(&row, "payer_id")?,
        provider: get(&row, "provider")?,
        idempotency_key: get(&row, "idempotency_key")?,
        amount_cents: get(&row, "amount_cents")?,
        status: parse_label(&status, PaymentStatus::parse, "payment status")?,
        created_at: get(&row, "created_at")?,
        updated_at: get(&row, "updated_at")?,
    })
}

fn ledger_from_row(row: PgRow) -> StoreResult<LedgerEntry> {
    let kind: String = get(&row, "kind")?;
    Ok(LedgerEntry {
        id: get(&row, "id")?,
        tenant_id: TenantId::new(get::<String>(&row, "tenant_id")?),
        plot_id: get(&row, "plot_id")?,
        charge_id: get(&row, "charge_id")?,
        invoice_id: get(&row, "invoice_id")?,
        payment_id: get(&row, "payment_id")?,
        kind: parse_label(&kind, LedgerEntryKind::parse, "ledger entry kind")?,
        amount_cents: get(&row, "amount_cents")?,
        memo: get(&row, "memo")?,
        created_at: get(&row, "created_at")?,
    })
}

fn backend(err: sqlx::Error) -> StoreError {
    StoreError::Backend(err.to_string())
}

fn map_sqlx_conflict(err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.code().as_deref() == Some("23505") {
            return StoreError::UniqueViolation(db_err.message().to_string());
        }
    }
    StoreError::Backend(err.to_string())
}
