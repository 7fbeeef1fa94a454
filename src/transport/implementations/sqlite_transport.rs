use async_trait::async_trait;
use log::{debug, info};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Row, Sqlite};
use std::str::FromStr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use uuid::Uuid;

use crate::error::TransportError;
use crate::transport::{Attributes, Delivery, QueueTransport};

/// Durable queue kept in a single SQLite table.
///
/// Messages move `ready -> in_flight` when received and are deleted when
/// acknowledged. Claiming is one `UPDATE .. RETURNING` statement, so
/// consumers sharing a database file never receive the same row. Every
/// claim records the owning instance and the time it was taken; an
/// instance can only settle, release or recover rows it is entitled to.
pub struct SqliteTransport {
    pub pool: Pool<Sqlite>,
    owner: String,
}

impl SqliteTransport {
    pub async fn new(database_url: &str) -> Result<Self, TransportError> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;
        Ok(Self::from_pool(pool))
    }

    /// A private queue living in one in-memory connection.
    pub async fn in_memory() -> Result<Self, TransportError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None::<Duration>)
            .max_lifetime(None::<Duration>)
            .connect_with(options)
            .await?;
        Ok(Self::from_pool(pool))
    }

    fn from_pool(pool: Pool<Sqlite>) -> Self {
        Self {
            pool,
            owner: Uuid::new_v4().to_string(),
        }
    }

    /// Identifier stamped on the rows this instance claims.
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Creates the queue table.
    pub async fn init(&self) -> Result<(), TransportError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS queue_messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                topic TEXT NOT NULL,
                payload BLOB NOT NULL,
                attributes TEXT NOT NULL,
                durable INTEGER NOT NULL,
                state TEXT NOT NULL DEFAULT 'ready',
                owner TEXT,
                claimed_at INTEGER,
                enqueued_at DATETIME DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS queue_messages_ready
            ON queue_messages (topic, state, id)
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Crash recovery. In-flight rows claimed by another instance more than
    /// `lease` ago are made ready again; stale transient (non-durable) claims
    /// are dropped instead. Claims younger than the lease are left alone, so
    /// this is safe to run while other consumers are attached as long as the
    /// lease exceeds the longest attempt.
    pub async fn recover(&self, lease: Duration) -> Result<u64, TransportError> {
        let lease_ms = i64::try_from(lease.as_millis()).unwrap_or(i64::MAX);
        let cutoff = now_millis().saturating_sub(lease_ms);

        let dropped = sqlx::query(
            r#"
            DELETE FROM queue_messages
            WHERE state = 'in_flight' AND durable = 0
              AND claimed_at <= ? AND owner IS NOT ?
            "#,
        )
        .bind(cutoff)
        .bind(self.owner.as_str())
        .execute(&self.pool)
        .await?
        .rows_affected();

        let recovered = sqlx::query(
            r#"
            UPDATE queue_messages
            SET state = 'ready', owner = NULL, claimed_at = NULL
            WHERE state = 'in_flight' AND claimed_at <= ? AND owner IS NOT ?
            "#,
        )
        .bind(cutoff)
        .bind(self.owner.as_str())
        .execute(&self.pool)
        .await?
        .rows_affected();

        if dropped > 0 || recovered > 0 {
            info!(
                "Queue recovery: {} stale claim(s) made ready, {} transient message(s) dropped",
                recovered, dropped
            );
        }
        Ok(recovered)
    }

    /// Number of ready messages waiting on `topic`.
    pub async fn pending(&self, topic: &str) -> Result<u64, TransportError> {
        let count: i64 = sqlx::query(
            "SELECT COUNT(*) FROM queue_messages WHERE topic = ? AND state = 'ready'",
        )
        .bind(topic)
        .fetch_one(&self.pool)
        .await?
        .try_get(0)?;
        Ok(count.max(0) as u64)
    }

    /// Runs a settle statement taking `(id, owner)`; a row that is not in
    /// flight under this owner is an unknown delivery.
    async fn settle(&self, tag: u64, sql: &str) -> Result<(), TransportError> {
        let affected = sqlx::query(sql)
            .bind(tag as i64)
            .bind(self.owner.as_str())
            .execute(&self.pool)
            .await?
            .rows_affected();
        if affected == 0 {
            return Err(TransportError::UnknownDelivery(tag));
        }
        Ok(())
    }
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

#[async_trait]
impl QueueTransport for SqliteTransport {
    async fn publish(
        &self,
        topic: &str,
        payload: &[u8],
        attributes: &Attributes,
        durable: bool,
    ) -> Result<(), TransportError> {
        let attributes = serde_json::to_string(attributes)?;
        sqlx::query(
            r#"
            INSERT INTO queue_messages (topic, payload, attributes, durable)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(topic)
        .bind(payload)
        .bind(attributes)
        .bind(durable)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn receive(&self, topic: &str) -> Result<Option<Delivery>, TransportError> {
        let row = sqlx::query(
            r#"
            UPDATE queue_messages
            SET state = 'in_flight', owner = ?, claimed_at = ?
            WHERE id = (
                SELECT id FROM queue_messages
                WHERE topic = ? AND state = 'ready'
                ORDER BY id
                LIMIT 1
            )
            RETURNING id, payload, attributes
            "#,
        )
        .bind(self.owner.as_str())
        .bind(now_millis())
        .bind(topic)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let id: i64 = row.try_get("id")?;
        let payload: Vec<u8> = row.try_get("payload")?;
        let attributes: String = row.try_get("attributes")?;
        debug!("Claimed message {} on '{}'", id, topic);

        Ok(Some(Delivery {
            tag: id as u64,
            topic: topic.to_string(),
            payload,
            attributes: serde_json::from_str(&attributes)?,
        }))
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), TransportError> {
        self.settle(
            delivery.tag,
            "DELETE FROM queue_messages WHERE id = ? AND state = 'in_flight' AND owner = ?",
        )
        .await
    }

    async fn nack(&self, delivery: &Delivery, requeue: bool) -> Result<(), TransportError> {
        let sql = if requeue {
            r#"
            UPDATE queue_messages
            SET state = 'ready', owner = NULL, claimed_at = NULL
            WHERE id = ? AND state = 'in_flight' AND owner = ?
            "#
        } else {
            "DELETE FROM queue_messages WHERE id = ? AND state = 'in_flight' AND owner = ?"
        };
        self.settle(delivery.tag, sql).await
    }

    async fn close(&self) -> Result<(), TransportError> {
        if self.pool.is_closed() {
            return Ok(());
        }
        let returned = sqlx::query(
            r#"
            UPDATE queue_messages
            SET state = 'ready', owner = NULL, claimed_at = NULL
            WHERE state = 'in_flight' AND owner = ?
            "#,
        )
        .bind(self.owner.as_str())
        .execute(&self.pool)
        .await?
        .rows_affected();
        if returned > 0 {
            info!("Returned {} unsettled message(s) to the queue", returned);
        }
        self.pool.close().await;
        Ok(())
    }
}
