//! PostgreSQL destination operations.
//!
//! Everything runs over one dedicated session: the replication role and
//! read-only settings are session-scoped, so pooling would silently lose them.

mod tls;

#[cfg(test)]
pub(crate) mod mock;

pub use tls::{make_connector, SslMode};

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::{SinkExt, StreamExt};
use tokio::sync::Mutex;
use tokio_postgres::error::SqlState;
use tokio_postgres::tls::{MakeTlsConnect, TlsConnect};
use tokio_postgres::{Client, NoTls, Socket};
use tracing::{debug, error, info};

use crate::config::{redact_connection_string, TargetConfig};
use crate::core::identifier::qualify_pg;
use crate::core::schema::{ColumnTypeMap, ForeignKey};
use crate::core::traits::{LoadStatements, SessionSetting, TargetWriter};
use crate::error::{MigrateError, Result};

/// Destination column types for one table.
pub const COLUMN_TYPES_SQL: &str = "SELECT column_name::text, data_type::text \
     FROM information_schema.columns \
     WHERE table_schema::text = $1 AND table_name::text = $2";

/// Every foreign key outside the system schemas, with key columns in order.
pub const FOREIGN_KEYS_SQL: &str = r#"
SELECT con.conname::text,
       ns.nspname::text,
       cl.relname::text,
       ARRAY(SELECT att.attname::text
             FROM unnest(con.conkey) WITH ORDINALITY AS k(attnum, ord)
             JOIN pg_attribute att ON att.attrelid = con.conrelid AND att.attnum = k.attnum
             ORDER BY k.ord),
       rns.nspname::text,
       rcl.relname::text,
       ARRAY(SELECT att.attname::text
             FROM unnest(con.confkey) WITH ORDINALITY AS k(attnum, ord)
             JOIN pg_attribute att ON att.attrelid = con.confrelid AND att.attnum = k.attnum
             ORDER BY k.ord),
       con.convalidated,
       con.confmatchtype = 'f'
FROM pg_constraint con
JOIN pg_class cl ON cl.oid = con.conrelid
JOIN pg_namespace ns ON ns.oid = cl.relnamespace
JOIN pg_class rcl ON rcl.oid = con.confrelid
JOIN pg_namespace rns ON rns.oid = rcl.relnamespace
WHERE con.contype = 'f'
  AND ns.nspname NOT IN ('pg_catalog', 'information_schema')
  AND ns.nspname NOT LIKE 'pg_toast%'
ORDER BY ns.nspname, cl.relname, con.conname
"#;

/// PostgreSQL writer over a single session.
pub struct PgWriter {
    client: Mutex<Client>,
    ssl_mode: SslMode,
}

impl PgWriter {
    /// Connect to the destination described by the configuration.
    pub async fn connect(config: &TargetConfig) -> Result<Self> {
        let mut pg_config: tokio_postgres::Config = config.url.parse().map_err(|e| {
            MigrateError::Config(format!(
                "Invalid destination URL '{}': {}",
                redact_connection_string(&config.url),
                e
            ))
        })?;

        let ssl_mode = SslMode::resolve(config.ssl_mode.as_deref(), &pg_config)?;
        pg_config.ssl_mode(ssl_mode.wire_mode());

        let client = match make_connector(ssl_mode)? {
            Some(tls) => spawn_session(&pg_config, tls).await?,
            None => spawn_session(&pg_config, NoTls).await?,
        };

        info!(
            "Connected to PostgreSQL destination: {} (ssl_mode={:?})",
            redact_connection_string(&config.url),
            ssl_mode
        );

        Ok(Self {
            client: Mutex::new(client),
            ssl_mode,
        })
    }

    /// The negotiated SSL mode.
    pub fn ssl_mode(&self) -> SslMode {
        self.ssl_mode
    }
}

/// Open the session and drive its connection on a background task.
async fn spawn_session<T>(pg_config: &tokio_postgres::Config, tls: T) -> Result<Client>
where
    T: MakeTlsConnect<Socket> + Send + 'static,
    T::Stream: Send + 'static,
    T::TlsConnect: Send,
    <T::TlsConnect as TlsConnect<Socket>>::Future: Send,
{
    let (client, connection) = pg_config
        .connect(tls)
        .await
        .map_err(|e| MigrateError::DestinationUnavailable(describe(&e)))?;

    tokio::spawn(async move {
        if let Err(e) = connection.await {
            error!("PostgreSQL connection error: {}", e);
        }
    });

    Ok(client)
}

/// Driver errors print only their outer layer; include the cause.
fn describe(e: &tokio_postgres::Error) -> String {
    match std::error::Error::source(e) {
        Some(cause) => format!("{}: {}", e, cause),
        None => e.to_string(),
    }
}

#[async_trait]
impl TargetWriter for PgWriter {
    async fn ping(&self) -> Result<()> {
        let client = self.client.lock().await;
        client
            .simple_query("SELECT 1")
            .await
            .map_err(|e| MigrateError::DestinationUnavailable(describe(&e)))?;
        Ok(())
    }

    async fn column_types(&self, schema: &str, table: &str) -> Result<ColumnTypeMap> {
        let client = self.client.lock().await;
        let rows = client.query(COLUMN_TYPES_SQL, &[&schema, &table]).await?;
        Ok(rows
            .iter()
            .map(|row| (row.get::<_, String>(0), row.get::<_, String>(1)))
            .collect())
    }

    async fn set_session(&self, setting: SessionSetting) -> Result<()> {
        debug!("{}", setting.to_sql());
        let client = self.client.lock().await;
        client.batch_execute(setting.to_sql()).await?;
        Ok(())
    }

    async fn replace_table(
        &self,
        statements: &LoadStatements,
        mut data: BoxStream<'_, Result<Bytes>>,
    ) -> Result<u64> {
        let mut client = self.client.lock().await;
        let tx = client.transaction().await?;

        if let Err(e) = tx.batch_execute(&statements.truncate).await {
            if e.code() == Some(&SqlState::UNDEFINED_TABLE) {
                return Err(MigrateError::DestinationTableMissing {
                    table: statements.table.clone(),
                });
            }
            return Err(e.into());
        }

        // Dropping the sink or the transaction early aborts the copy and rolls back.
        let sink = tx.copy_in::<str, Bytes>(statements.copy.as_str()).await?;
        tokio::pin!(sink);
        while let Some(chunk) = data.next().await {
            sink.send(chunk?).await?;
        }
        let copied = sink.finish().await?;

        tx.commit().await?;
        Ok(copied)
    }

    async fn foreign_keys(&self) -> Result<Vec<ForeignKey>> {
        let client = self.client.lock().await;
        let rows = client.query(FOREIGN_KEYS_SQL, &[]).await?;
        Ok(rows
            .iter()
            .map(|row| ForeignKey {
                name: row.get(0),
                schema: row.get(1),
                table: row.get(2),
                columns: row.get(3),
                ref_schema: row.get(4),
                ref_table: row.get(5),
                ref_columns: row.get(6),
                validated: row.get(7),
                match_full: row.get(8),
            })
            .collect())
    }

    async fn execute(&self, sql: &str) -> Result<()> {
        let client = self.client.lock().await;
        client.batch_execute(sql).await?;
        Ok(())
    }

    async fn exists(&self, sql: &str) -> Result<bool> {
        let client = self.client.lock().await;
        let row = client.query_one(sql, &[]).await?;
        Ok(row.get(0))
    }

    async fn get_row_count(&self, schema: &str, table: &str) -> Result<i64> {
        let sql = format!("SELECT COUNT(*) FROM {}", qualify_pg(schema, table)?);
        let client = self.client.lock().await;
        let row = client.query_one(sql.as_str(), &[]).await?;
        Ok(row.get(0))
    }

    fn db_type(&self) -> &str {
        "postgres"
    }
}
