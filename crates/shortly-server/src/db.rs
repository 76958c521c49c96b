use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::ServerError;

/// Delay before a freshly enqueued or failed fulfillment job becomes due for
/// the background worker. The settlement path attempts the job inline first;
/// the worker only picks it up if that attempt did not complete.
pub const FULFILLMENT_RETRY_DELAY_SECS: i64 = 60;

/// Order lifecycle status. An order leaves `pending` exactly once, through
/// [`Database::settle_order`]; `cancelled` is only written by flows outside
/// this service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Paid,
    Failed,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Paid => "paid",
            OrderStatus::Failed => "failed",
            OrderStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(OrderStatus::Pending),
            "paid" => Some(OrderStatus::Paid),
            "failed" => Some(OrderStatus::Failed),
            "cancelled" => Some(OrderStatus::Cancelled),
            _ => None,
        }
    }
}

impl FromSql for OrderStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        Self::parse(value.as_str()?).ok_or(FromSqlError::InvalidType)
    }
}

impl ToSql for OrderStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(self.as_str().into())
    }
}

/// Subscription lifecycle status. This service only writes `active`;
/// expiry is handled by the subscription sweep outside this service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    Expired,
    Cancelled,
}

impl SubscriptionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::Expired => "expired",
            SubscriptionStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(SubscriptionStatus::Active),
            "expired" => Some(SubscriptionStatus::Expired),
            "cancelled" => Some(SubscriptionStatus::Cancelled),
            _ => None,
        }
    }
}

impl FromSql for SubscriptionStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        Self::parse(value.as_str()?).ok_or(FromSqlError::InvalidType)
    }
}

impl ToSql for SubscriptionStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(self.as_str().into())
    }
}

/// Catalog product kind; decides the fulfillment effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProductType {
    Quota,
    CustomDomain,
    CustomDomainYearly,
}

impl ProductType {
    pub fn as_str(self) -> &'static str {
        match self {
            ProductType::Quota => "quota",
            ProductType::CustomDomain => "custom_domain",
            ProductType::CustomDomainYearly => "custom_domain_yearly",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "quota" => Some(ProductType::Quota),
            "custom_domain" => Some(ProductType::CustomDomain),
            "custom_domain_yearly" => Some(ProductType::CustomDomainYearly),
            _ => None,
        }
    }
}

/// Catalog item, read-only for this service.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub id: i64,
    pub name: String,
    pub description: String,
    pub quota_amount: i64,
    /// Minor currency units.
    pub price: i64,
    /// Raw catalog value; parse with [`ProductType::parse`]. Unknown types
    /// are tolerated and fulfilled as a no-op.
    pub product_type: String,
    pub is_active: bool,
    pub subscription_duration_days: Option<i64>,
}

/// One purchase attempt. Never physically deleted.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: i64,
    pub user_id: i64,
    pub product_id: i64,
    /// Merchant trade number echoed back by the gateway; immutable.
    pub order_number: String,
    /// Price snapshot taken at creation; never re-read from the product.
    pub price: i64,
    pub order_status: OrderStatus,
    /// Gateway trade number; set if and only if the order is paid.
    pub ecpay_trade_no: Option<String>,
    pub ecpay_payment_date: Option<String>,
    pub ecpay_simulate_paid: bool,
    /// Audit copy of the integrity code from the settling callback.
    pub ecpay_check_mac_value: Option<String>,
    pub failure_reason: Option<String>,
    pub paid_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Per-user short-URL counters. Invariant: `total = used + remaining`.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserQuota {
    pub user_id: i64,
    pub total_quota: i64,
    pub used_quota: i64,
    pub remaining_quota: i64,
}

#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    pub id: i64,
    pub user_id: i64,
    pub subscription_type: String,
    pub subscription_status: SubscriptionStatus,
    pub start_date: i64,
    pub end_date: i64,
}

/// Durable record of a pending fulfillment effect (the settlement outbox).
#[derive(Debug, Clone)]
pub struct FulfillmentJob {
    pub id: i64,
    pub order_id: i64,
    pub attempts: i64,
    pub next_attempt_at: i64,
    pub created_at: i64,
    pub completed_at: Option<i64>,
}

/// The write applied by [`Database::settle_order`].
#[derive(Debug, Clone)]
pub struct SettlementUpdate {
    /// `Paid` or `Failed`; the only terminal states this service writes.
    pub status: OrderStatus,
    /// Gateway trade number; recorded only on paid transitions, so the
    /// column stays set if and only if the order is paid.
    pub trade_no: Option<String>,
    pub payment_date: Option<String>,
    pub simulate_paid: bool,
    pub check_mac_value: String,
    pub failure_reason: Option<String>,
}

/// Result of the conditional settlement write.
#[derive(Debug)]
pub enum SettleWrite {
    /// The pending→terminal transition was written by this call.
    Applied(Order),
    /// The order had already left `pending`; nothing was written.
    AlreadySettled(Order),
    /// No order carries this order number.
    NotFound,
}

const ORDER_COLUMNS: &str = "id, user_id, product_id, order_number, price, order_status, \
     ecpay_trade_no, ecpay_payment_date, ecpay_simulate_paid, ecpay_check_mac_value, \
     failure_reason, paid_at, created_at, updated_at";

const PRODUCT_COLUMNS: &str =
    "id, name, description, quota_amount, price, product_type, is_active, subscription_duration_days";

/// SQLite database wrapper
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    pub fn new(path: &str) -> Result<Self, ServerError> {
        let conn = Connection::open(path)?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.init_schema()?;
        Ok(db)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, ServerError> {
        self.conn
            .lock()
            .map_err(|_| ServerError::Internal("database lock poisoned".to_string()))
    }

    fn init_schema(&self) -> Result<(), ServerError> {
        let conn = self.conn()?;
        conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;

            CREATE TABLE IF NOT EXISTS products (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                description TEXT NOT NULL,
                quota_amount INTEGER NOT NULL DEFAULT 0,
                price INTEGER NOT NULL,
                product_type TEXT NOT NULL,
                is_active INTEGER NOT NULL DEFAULT 1,
                subscription_duration_days INTEGER,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS orders (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                product_id INTEGER NOT NULL,
                order_number TEXT UNIQUE NOT NULL,
                price INTEGER NOT NULL,
                order_status TEXT NOT NULL DEFAULT 'pending',
                ecpay_trade_no TEXT UNIQUE,
                ecpay_payment_date TEXT,
                ecpay_simulate_paid INTEGER NOT NULL DEFAULT 0,
                ecpay_check_mac_value TEXT,
                failure_reason TEXT,
                paid_at INTEGER,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_orders_user ON orders(user_id);

            CREATE TABLE IF NOT EXISTS user_quotas (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER UNIQUE NOT NULL,
                total_quota INTEGER NOT NULL DEFAULT 20,
                used_quota INTEGER NOT NULL DEFAULT 0,
                remaining_quota INTEGER NOT NULL DEFAULT 20,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS user_subscriptions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                subscription_type TEXT NOT NULL,
                subscription_status TEXT NOT NULL DEFAULT 'active',
                start_date INTEGER NOT NULL,
                end_date INTEGER NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_subscriptions_user ON user_subscriptions(user_id);

            CREATE TABLE IF NOT EXISTS fulfillment_jobs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                order_id INTEGER UNIQUE NOT NULL,
                attempts INTEGER NOT NULL DEFAULT 0,
                next_attempt_at INTEGER NOT NULL,
                created_at INTEGER NOT NULL,
                completed_at INTEGER
            );
            CREATE INDEX IF NOT EXISTS idx_jobs_due ON fulfillment_jobs(completed_at, next_attempt_at);
            "#,
        )?;
        Ok(())
    }

    // ---- products -------------------------------------------------------

    pub fn insert_product(
        &self,
        name: &str,
        description: &str,
        quota_amount: i64,
        price: i64,
        product_type: &str,
        subscription_duration_days: Option<i64>,
    ) -> Result<Product, ServerError> {
        let conn = self.conn()?;
        let now = chrono::Utc::now().timestamp();

        conn.execute(
            r#"
            INSERT INTO products (name, description, quota_amount, price, product_type,
                                  is_active, subscription_duration_days, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6, ?7, ?7)
            "#,
            params![name, description, quota_amount, price, product_type, subscription_duration_days, now],
        )?;

        let id = conn.last_insert_rowid();
        Ok(Product {
            id,
            name: name.to_string(),
            description: description.to_string(),
            quota_amount,
            price,
            product_type: product_type.to_string(),
            is_active: true,
            subscription_duration_days,
        })
    }

    /// Insert the default catalog when the products table is empty.
    /// Returns the number of products seeded (0 when already populated).
    pub fn seed_default_products(&self) -> Result<usize, ServerError> {
        {
            let conn = self.conn()?;
            let count: i64 =
                conn.query_row("SELECT COUNT(*) FROM products", [], |row| row.get(0))?;
            if count > 0 {
                return Ok(0);
            }
        }

        let defaults: &[(&str, &str, i64, i64, &str, Option<i64>)] = &[
            ("Starter pack", "Adds 10 short-URL credits", 10, 1000, "quota", None),
            ("Value pack", "Adds 100 short-URL credits", 100, 9000, "quota", None),
            (
                "Custom domain (monthly)",
                "Enables a custom domain for 30 days",
                0,
                9900,
                "custom_domain",
                Some(30),
            ),
            (
                "Custom domain (yearly)",
                "Enables a custom domain for a year",
                0,
                99900,
                "custom_domain_yearly",
                Some(365),
            ),
        ];

        for (name, description, quota, price, product_type, days) in defaults {
            self.insert_product(name, description, *quota, *price, product_type, *days)?;
        }
        Ok(defaults.len())
    }

    pub fn get_product(&self, id: i64) -> Result<Option<Product>, ServerError> {
        let conn = self.conn()?;
        let product = conn
            .query_row(
                &format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE id = ?1"),
                params![id],
                product_from_row,
            )
            .optional()?;
        Ok(product)
    }

    /// Product lookup for order creation: the product must still be on sale.
    pub fn get_active_product(&self, id: i64) -> Result<Option<Product>, ServerError> {
        let conn = self.conn()?;
        let product = conn
            .query_row(
                &format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE id = ?1 AND is_active = 1"),
                params![id],
                product_from_row,
            )
            .optional()?;
        Ok(product)
    }

    // ---- orders ---------------------------------------------------------

    pub fn insert_order(
        &self,
        user_id: i64,
        product_id: i64,
        order_number: &str,
        price: i64,
    ) -> Result<Order, ServerError> {
        let conn = self.conn()?;
        let now = chrono::Utc::now().timestamp();

        conn.execute(
            r#"
            INSERT INTO orders (user_id, product_id, order_number, price, order_status, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, 'pending', ?5, ?5)
            "#,
            params![user_id, product_id, order_number, price, now],
        )?;

        let id = conn.last_insert_rowid();
        Self::order_by_id(&conn, id)?
            .ok_or_else(|| ServerError::Internal("inserted order not found".to_string()))
    }

    pub fn get_order(&self, id: i64) -> Result<Option<Order>, ServerError> {
        let conn = self.conn()?;
        Self::order_by_id(&conn, id)
    }

    /// Order lookup scoped to its owner.
    pub fn get_order_for_user(&self, id: i64, user_id: i64) -> Result<Option<Order>, ServerError> {
        let conn = self.conn()?;
        let order = conn
            .query_row(
                &format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = ?1 AND user_id = ?2"),
                params![id, user_id],
                order_from_row,
            )
            .optional()?;
        Ok(order)
    }

    pub fn get_order_by_number(&self, order_number: &str) -> Result<Option<Order>, ServerError> {
        let conn = self.conn()?;
        Self::order_by_number(&conn, order_number)
    }

    pub fn list_orders_for_user(&self, user_id: i64) -> Result<Vec<Order>, ServerError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE user_id = ?1 ORDER BY created_at DESC"
        ))?;
        let orders = stmt
            .query_map(params![user_id], order_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(orders)
    }

    /// Apply a settlement to a pending order.
    ///
    /// The "still pending" check and the write are one conditional UPDATE, so
    /// concurrent deliveries of the same callback cannot both transition the
    /// order: exactly one caller gets [`SettleWrite::Applied`]. For a paid
    /// transition, the fulfillment job is enqueued in the same transaction.
    pub fn settle_order(
        &self,
        order_number: &str,
        update: &SettlementUpdate,
    ) -> Result<SettleWrite, ServerError> {
        let conn = self.conn()?;
        let now = chrono::Utc::now().timestamp();
        let paid = update.status == OrderStatus::Paid;

        let tx = conn.unchecked_transaction()?;
        let rows = tx.execute(
            r#"
            UPDATE orders
            SET order_status = ?2, ecpay_trade_no = ?3, ecpay_payment_date = ?4,
                ecpay_simulate_paid = ?5, ecpay_check_mac_value = ?6,
                failure_reason = ?7, paid_at = ?8, updated_at = ?9
            WHERE order_number = ?1 AND order_status = 'pending'
            "#,
            params![
                order_number,
                update.status,
                update.trade_no,
                update.payment_date,
                update.simulate_paid as i64,
                update.check_mac_value,
                update.failure_reason,
                if paid { Some(now) } else { None },
                now
            ],
        )?;

        if rows == 0 {
            drop(tx);
            return Ok(match Self::order_by_number(&conn, order_number)? {
                Some(order) => SettleWrite::AlreadySettled(order),
                None => SettleWrite::NotFound,
            });
        }

        if paid {
            tx.execute(
                r#"
                INSERT INTO fulfillment_jobs (order_id, attempts, next_attempt_at, created_at)
                SELECT id, 0, ?2, ?3 FROM orders WHERE order_number = ?1
                "#,
                params![order_number, now + FULFILLMENT_RETRY_DELAY_SECS, now],
            )?;
        }
        tx.commit()?;

        let order = Self::order_by_number(&conn, order_number)?
            .ok_or_else(|| ServerError::Internal("settled order disappeared".to_string()))?;
        Ok(SettleWrite::Applied(order))
    }

    fn order_by_id(conn: &Connection, id: i64) -> Result<Option<Order>, ServerError> {
        let order = conn
            .query_row(
                &format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = ?1"),
                params![id],
                order_from_row,
            )
            .optional()?;
        Ok(order)
    }

    fn order_by_number(conn: &Connection, order_number: &str) -> Result<Option<Order>, ServerError> {
        let order = conn
            .query_row(
                &format!("SELECT {ORDER_COLUMNS} FROM orders WHERE order_number = ?1"),
                params![order_number],
                order_from_row,
            )
            .optional()?;
        Ok(order)
    }

    // ---- quotas ---------------------------------------------------------

    /// Credit purchased quota. Relative increments against the stored row,
    /// so interleaved consumption never sees a stale snapshot.
    pub fn credit_quota(&self, user_id: i64, amount: i64) -> Result<(), ServerError> {
        let conn = self.conn()?;
        let now = chrono::Utc::now().timestamp();
        conn.execute(
            r#"
            INSERT INTO user_quotas (user_id, total_quota, used_quota, remaining_quota, created_at, updated_at)
            VALUES (?1, ?2, 0, ?2, ?3, ?3)
            ON CONFLICT(user_id) DO UPDATE SET
                total_quota = total_quota + ?2,
                remaining_quota = remaining_quota + ?2,
                updated_at = ?3
            "#,
            params![user_id, amount, now],
        )?;
        Ok(())
    }

    /// Consume one unit of quota; backs the short-URL creation flow.
    /// Returns `false` when no quota remains (nothing is written).
    pub fn consume_quota(&self, user_id: i64) -> Result<bool, ServerError> {
        let conn = self.conn()?;
        let now = chrono::Utc::now().timestamp();
        let rows = conn.execute(
            r#"
            UPDATE user_quotas
            SET used_quota = used_quota + 1, remaining_quota = remaining_quota - 1, updated_at = ?2
            WHERE user_id = ?1 AND remaining_quota > 0
            "#,
            params![user_id, now],
        )?;
        Ok(rows == 1)
    }

    pub fn get_quota(&self, user_id: i64) -> Result<Option<UserQuota>, ServerError> {
        let conn = self.conn()?;
        let quota = conn
            .query_row(
                "SELECT user_id, total_quota, used_quota, remaining_quota FROM user_quotas WHERE user_id = ?1",
                params![user_id],
                |row| {
                    Ok(UserQuota {
                        user_id: row.get(0)?,
                        total_quota: row.get(1)?,
                        used_quota: row.get(2)?,
                        remaining_quota: row.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(quota)
    }

    // ---- subscriptions --------------------------------------------------

    pub fn insert_subscription(
        &self,
        user_id: i64,
        subscription_type: &str,
        start_date: i64,
        end_date: i64,
    ) -> Result<Subscription, ServerError> {
        let conn = self.conn()?;
        let now = chrono::Utc::now().timestamp();

        conn.execute(
            r#"
            INSERT INTO user_subscriptions (user_id, subscription_type, subscription_status,
                                            start_date, end_date, created_at, updated_at)
            VALUES (?1, ?2, 'active', ?3, ?4, ?5, ?5)
            "#,
            params![user_id, subscription_type, start_date, end_date, now],
        )?;

        let id = conn.last_insert_rowid();
        Ok(Subscription {
            id,
            user_id,
            subscription_type: subscription_type.to_string(),
            subscription_status: SubscriptionStatus::Active,
            start_date,
            end_date,
        })
    }

    pub fn list_subscriptions_for_user(
        &self,
        user_id: i64,
    ) -> Result<Vec<Subscription>, ServerError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT id, user_id, subscription_type, subscription_status, start_date, end_date
            FROM user_subscriptions
            WHERE user_id = ?1
            ORDER BY created_at DESC
            "#,
        )?;
        let subscriptions = stmt
            .query_map(params![user_id], |row| {
                Ok(Subscription {
                    id: row.get(0)?,
                    user_id: row.get(1)?,
                    subscription_type: row.get(2)?,
                    subscription_status: row.get(3)?,
                    start_date: row.get(4)?,
                    end_date: row.get(5)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(subscriptions)
    }

    // ---- fulfillment outbox ---------------------------------------------

    pub fn job_for_order(&self, order_id: i64) -> Result<Option<FulfillmentJob>, ServerError> {
        let conn = self.conn()?;
        let job = conn
            .query_row(
                "SELECT id, order_id, attempts, next_attempt_at, created_at, completed_at
                 FROM fulfillment_jobs WHERE order_id = ?1",
                params![order_id],
                job_from_row,
            )
            .optional()?;
        Ok(job)
    }

    /// Incomplete jobs whose retry time has passed, oldest first.
    pub fn due_fulfillment_jobs(
        &self,
        now: i64,
        limit: u32,
    ) -> Result<Vec<FulfillmentJob>, ServerError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT id, order_id, attempts, next_attempt_at, created_at, completed_at
            FROM fulfillment_jobs
            WHERE completed_at IS NULL AND next_attempt_at <= ?1
            ORDER BY next_attempt_at
            LIMIT ?2
            "#,
        )?;
        let jobs = stmt
            .query_map(params![now, limit], job_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(jobs)
    }

    pub fn mark_job_done(&self, job_id: i64) -> Result<(), ServerError> {
        let conn = self.conn()?;
        let now = chrono::Utc::now().timestamp();
        conn.execute(
            "UPDATE fulfillment_jobs SET completed_at = ?2 WHERE id = ?1",
            params![job_id, now],
        )?;
        Ok(())
    }

    pub fn reschedule_job(&self, job_id: i64, next_attempt_at: i64) -> Result<(), ServerError> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE fulfillment_jobs SET attempts = attempts + 1, next_attempt_at = ?2 WHERE id = ?1",
            params![job_id, next_attempt_at],
        )?;
        Ok(())
    }

    /// Count of incomplete jobs; logged at startup as the reconciliation signal.
    pub fn pending_fulfillment_jobs(&self) -> Result<i64, ServerError> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM fulfillment_jobs WHERE completed_at IS NULL",
            [],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}

fn product_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Product> {
    Ok(Product {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        quota_amount: row.get(3)?,
        price: row.get(4)?,
        product_type: row.get(5)?,
        is_active: row.get::<_, i64>(6)? == 1,
        subscription_duration_days: row.get(7)?,
    })
}

fn order_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Order> {
    Ok(Order {
        id: row.get(0)?,
        user_id: row.get(1)?,
        product_id: row.get(2)?,
        order_number: row.get(3)?,
        price: row.get(4)?,
        order_status: row.get(5)?,
        ecpay_trade_no: row.get(6)?,
        ecpay_payment_date: row.get(7)?,
        ecpay_simulate_paid: row.get::<_, i64>(8)? == 1,
        ecpay_check_mac_value: row.get(9)?,
        failure_reason: row.get(10)?,
        paid_at: row.get(11)?,
        created_at: row.get(12)?,
        updated_at: row.get(13)?,
    })
}

fn job_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<FulfillmentJob> {
    Ok(FulfillmentJob {
        id: row.get(0)?,
        order_id: row.get(1)?,
        attempts: row.get(2)?,
        next_attempt_at: row.get(3)?,
        created_at: row.get(4)?,
        completed_at: row.get(5)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paid_update() -> SettlementUpdate {
        SettlementUpdate {
            status: OrderStatus::Paid,
            trade_no: Some("2503011200000001".to_string()),
            payment_date: Some("2025-03-01 12:05:33".to_string()),
            simulate_paid: false,
            check_mac_value: "5C7C1C26339F455F0D8786627A330624".to_string(),
            failure_reason: None,
        }
    }

    fn failed_update() -> SettlementUpdate {
        SettlementUpdate {
            status: OrderStatus::Failed,
            trade_no: None,
            payment_date: None,
            simulate_paid: false,
            check_mac_value: "5C7C1C26339F455F0D8786627A330624".to_string(),
            failure_reason: Some("card declined".to_string()),
        }
    }

    #[test]
    fn test_insert_and_get_product() {
        let db = Database::new(":memory:").unwrap();
        let product = db
            .insert_product("Starter pack", "Adds 10 credits", 10, 1000, "quota", None)
            .unwrap();

        let fetched = db.get_active_product(product.id).unwrap().unwrap();
        assert_eq!(fetched.name, "Starter pack");
        assert_eq!(fetched.price, 1000);
        assert!(fetched.is_active);
    }

    #[test]
    fn test_seed_is_idempotent() {
        let db = Database::new(":memory:").unwrap();
        assert_eq!(db.seed_default_products().unwrap(), 4);
        assert_eq!(db.seed_default_products().unwrap(), 0);
    }

    #[test]
    fn test_insert_order_starts_pending() {
        let db = Database::new(":memory:").unwrap();
        let order = db.insert_order(7, 1, "ord-1", 9900).unwrap();
        assert_eq!(order.order_status, OrderStatus::Pending);
        assert_eq!(order.price, 9900);
        assert!(order.ecpay_trade_no.is_none());
        assert!(order.paid_at.is_none());
    }

    #[test]
    fn test_order_user_scoping() {
        let db = Database::new(":memory:").unwrap();
        let order = db.insert_order(7, 1, "ord-1", 9900).unwrap();

        assert!(db.get_order_for_user(order.id, 7).unwrap().is_some());
        assert!(db.get_order_for_user(order.id, 8).unwrap().is_none());
        assert_eq!(db.list_orders_for_user(7).unwrap().len(), 1);
        assert!(db.list_orders_for_user(8).unwrap().is_empty());
    }

    #[test]
    fn test_settle_paid_sets_fields_and_enqueues_job() {
        let db = Database::new(":memory:").unwrap();
        let order = db.insert_order(7, 1, "ord-1", 9900).unwrap();

        let result = db.settle_order("ord-1", &paid_update()).unwrap();
        let settled = match result {
            SettleWrite::Applied(order) => order,
            other => panic!("expected Applied, got {other:?}"),
        };
        assert_eq!(settled.order_status, OrderStatus::Paid);
        assert_eq!(settled.ecpay_trade_no.as_deref(), Some("2503011200000001"));
        assert!(settled.paid_at.is_some());
        assert!(settled.failure_reason.is_none());

        let job = db.job_for_order(order.id).unwrap().unwrap();
        assert_eq!(job.attempts, 0);
        assert!(job.completed_at.is_none());
    }

    #[test]
    fn test_settle_failed_records_reason_without_job() {
        let db = Database::new(":memory:").unwrap();
        let order = db.insert_order(7, 1, "ord-1", 9900).unwrap();

        let result = db.settle_order("ord-1", &failed_update()).unwrap();
        let settled = match result {
            SettleWrite::Applied(order) => order,
            other => panic!("expected Applied, got {other:?}"),
        };
        assert_eq!(settled.order_status, OrderStatus::Failed);
        assert_eq!(settled.failure_reason.as_deref(), Some("card declined"));
        assert!(settled.ecpay_trade_no.is_none());
        assert!(settled.paid_at.is_none());
        assert!(db.job_for_order(order.id).unwrap().is_none());
    }

    #[test]
    fn test_settle_replay_is_a_noop() {
        let db = Database::new(":memory:").unwrap();
        db.insert_order(7, 1, "ord-1", 9900).unwrap();

        assert!(matches!(
            db.settle_order("ord-1", &paid_update()).unwrap(),
            SettleWrite::Applied(_)
        ));

        // A second delivery must not re-transition or re-enqueue.
        let replay = db.settle_order("ord-1", &failed_update()).unwrap();
        let order = match replay {
            SettleWrite::AlreadySettled(order) => order,
            other => panic!("expected AlreadySettled, got {other:?}"),
        };
        assert_eq!(order.order_status, OrderStatus::Paid);
        assert!(order.failure_reason.is_none());
    }

    #[test]
    fn test_settle_unknown_order() {
        let db = Database::new(":memory:").unwrap();
        assert!(matches!(
            db.settle_order("missing", &paid_update()).unwrap(),
            SettleWrite::NotFound
        ));
    }

    #[test]
    fn test_concurrent_settles_apply_once() {
        let db = Database::new(":memory:").unwrap();
        db.insert_order(7, 1, "ord-1", 9900).unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let db = db.clone();
                std::thread::spawn(move || {
                    matches!(
                        db.settle_order("ord-1", &paid_update()).unwrap(),
                        SettleWrite::Applied(_)
                    )
                })
            })
            .collect();

        let applied = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|&applied| applied)
            .count();
        assert_eq!(applied, 1);
    }

    #[test]
    fn test_quota_credit_and_invariant() {
        let db = Database::new(":memory:").unwrap();

        db.credit_quota(7, 50).unwrap();
        let quota = db.get_quota(7).unwrap().unwrap();
        assert_eq!(quota.total_quota, 50);
        assert_eq!(quota.remaining_quota, 50);

        // Interleave consumption with further credits.
        assert!(db.consume_quota(7).unwrap());
        db.credit_quota(7, 50).unwrap();
        assert!(db.consume_quota(7).unwrap());

        let quota = db.get_quota(7).unwrap().unwrap();
        assert_eq!(quota.total_quota, 100);
        assert_eq!(quota.used_quota, 2);
        assert_eq!(quota.remaining_quota, 98);
        assert_eq!(
            quota.total_quota,
            quota.used_quota + quota.remaining_quota
        );
    }

    #[test]
    fn test_consume_quota_stops_at_zero() {
        let db = Database::new(":memory:").unwrap();
        db.credit_quota(7, 1).unwrap();
        assert!(db.consume_quota(7).unwrap());
        assert!(!db.consume_quota(7).unwrap());

        let quota = db.get_quota(7).unwrap().unwrap();
        assert_eq!(quota.remaining_quota, 0);
        assert_eq!(quota.used_quota, 1);
    }

    #[test]
    fn test_subscriptions_accumulate_per_purchase() {
        let db = Database::new(":memory:").unwrap();
        db.insert_subscription(7, "custom_domain", 1000, 1000 + 30 * 86400)
            .unwrap();
        db.insert_subscription(7, "custom_domain", 2000, 2000 + 30 * 86400)
            .unwrap();

        let subscriptions = db.list_subscriptions_for_user(7).unwrap();
        assert_eq!(subscriptions.len(), 2);
        assert!(subscriptions
            .iter()
            .all(|s| s.subscription_status == SubscriptionStatus::Active));
    }

    #[test]
    fn test_job_scheduling() {
        let db = Database::new(":memory:").unwrap();
        let order = db.insert_order(7, 1, "ord-1", 9900).unwrap();
        db.settle_order("ord-1", &paid_update()).unwrap();
        let job = db.job_for_order(order.id).unwrap().unwrap();

        // Not due until the retry delay elapses.
        assert!(db
            .due_fulfillment_jobs(job.next_attempt_at - 1, 10)
            .unwrap()
            .is_empty());
        assert_eq!(
            db.due_fulfillment_jobs(job.next_attempt_at, 10).unwrap().len(),
            1
        );

        db.reschedule_job(job.id, job.next_attempt_at + 60).unwrap();
        let rescheduled = db.job_for_order(order.id).unwrap().unwrap();
        assert_eq!(rescheduled.attempts, 1);

        db.mark_job_done(job.id).unwrap();
        assert!(db
            .due_fulfillment_jobs(i64::MAX, 10)
            .unwrap()
            .is_empty());
        assert_eq!(db.pending_fulfillment_jobs().unwrap(), 0);
    }
}
