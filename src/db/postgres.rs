use std::error::Error;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, error, warn};
use tokio::task::JoinHandle;
use tokio_postgres::types::{FromSql, Kind, Type};
use tokio_postgres::{Client, NoTls};

use crate::db::{Connection, ConnectionError, ExecutionOutcome, QueryOutput, Row, RowSet, StatementError};
use crate::suite::Value;

const NUMERIC_POS: u16 = 0x0000;
const NUMERIC_NEG: u16 = 0x4000;
const NUMERIC_NAN: u16 = 0xC000;
const NUMERIC_PINF: u16 = 0xD000;
const NUMERIC_NINF: u16 = 0xF000;

pub struct PostgresConnection {
    client: Client,
    connection_task: JoinHandle<()>,
}

impl PostgresConnection {
    /// `target` is the redacted form of `conn_str`, used in errors and logs.
    pub async fn connect(conn_str: &str, target: &str) -> Result<Self, ConnectionError> {
        let (client, connection) = tokio_postgres::connect(conn_str, NoTls)
            .await
            .map_err(|err| ConnectionError::Unreachable {
                target: target.to_string(),
                reason: describe(&err),
            })?;

        let target_name = target.to_string();
        let connection_task = tokio::spawn(async move {
            if let Err(err) = connection.await {
                error!("postgres connection to '{}' failed: {}", target_name, err);
            }
        });

        debug!("connected to postgres: {}", target);

        Ok(Self {
            client,
            connection_task,
        })
    }

    async fn run(&self, sql: &str) -> ExecutionOutcome {
        let stmt = self.client.prepare(sql).await.map_err(statement_error)?;

        if stmt.columns().is_empty() {
            let affected = self
                .client
                .execute(&stmt, &[])
                .await
                .map_err(statement_error)?;
            return Ok(QueryOutput::RowCount(affected));
        }

        let columns: Vec<String> = stmt.columns().iter().map(|c| c.name().to_string()).collect();
        let rows = self
            .client
            .query(&stmt, &[])
            .await
            .map_err(statement_error)?
            .iter()
            .map(decode_row)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(QueryOutput::Rows(RowSet::new(columns, rows)))
    }

    /// Cancel the timed out statement server-side.
    ///
    /// The statement may have finished before the cancel request arrives. The
    /// server ignores a cancel for an idle session, but one that lands while the
    /// next statement runs would fail that statement, so a throwaway round-trip
    /// is queued behind the cancelled statement to absorb it. A cancel delayed
    /// past that round-trip can still hit the next test.
    async fn cancel(&self) {
        if let Err(err) = self.client.cancel_token().cancel_query(NoTls).await {
            warn!("failed to cancel timed out postgres statement: {}", err);
            return;
        }

        if let Err(err) = self.client.simple_query("SELECT 1").await {
            debug!("round-trip after cancel failed: {}", err);
        }
    }
}

#[async_trait]
impl Connection for PostgresConnection {
    async fn execute(&mut self, sql: &str, timeout: Option<Duration>) -> ExecutionOutcome {
        let Some(limit) = timeout else {
            return self.run(sql).await;
        };

        match tokio::time::timeout(limit, self.run(sql)).await {
            Ok(outcome) => outcome,
            Err(_) => {
                self.cancel().await;
                Err(StatementError::Timeout(limit))
            }
        }
    }

    async fn close(self: Box<Self>) {
        let Self {
            client,
            connection_task,
        } = *self;
        drop(client);
        if let Err(err) = connection_task.await {
            warn!("postgres connection task did not shut down cleanly: {}", err);
        }
    }
}

/// Driver errors carry their useful part in the source chain.
fn describe(err: &tokio_postgres::Error) -> String {
    match err.source() {
        Some(source) => format!("{}: {}", err, source),
        None => err.to_string(),
    }
}

fn statement_error(err: tokio_postgres::Error) -> StatementError {
    if err.is_closed() {
        return StatementError::ConnectionLost(describe(&err));
    }

    match err.as_db_error() {
        Some(db_err) => StatementError::Backend {
            message: db_err.message().to_string(),
            code: Some(db_err.code().code().to_string()),
        },
        None => StatementError::backend(describe(&err)),
    }
}

fn decode_row(row: &tokio_postgres::Row) -> Result<Row, StatementError> {
    let mut values = Vec::with_capacity(row.len());
    for (i, col) in row.columns().iter().enumerate() {
        let value = decode_value(row, i, col.type_()).map_err(|reason| StatementError::Decode {
            column: col.name().to_string(),
            reason,
        })?;
        values.push((col.name().to_string(), value));
    }
    Ok(Row::new(values))
}

fn get<'a, T: FromSql<'a>>(row: &'a tokio_postgres::Row, i: usize) -> Result<Option<T>, String> {
    row.try_get::<_, Option<T>>(i).map_err(|err| err.to_string())
}

fn decode_value(row: &tokio_postgres::Row, i: usize, ty: &Type) -> Result<Value, String> {
    let value = match *ty {
        Type::BOOL => get::<bool>(row, i)?.map(Value::Bool),
        Type::INT2 => get::<i16>(row, i)?.map(|v| Value::Int(v.into())),
        Type::INT4 => get::<i32>(row, i)?.map(|v| Value::Int(v.into())),
        Type::INT8 => get::<i64>(row, i)?.map(Value::Int),
        Type::OID => get::<u32>(row, i)?.map(|v| Value::Int(v.into())),
        // widen through the shortest decimal form so 0.1::real compares equal to 0.1
        Type::FLOAT4 => get::<f32>(row, i)?.map(|v| {
            Value::Float(v.to_string().parse::<f64>().unwrap_or(f64::from(v)))
        }),
        Type::FLOAT8 => get::<f64>(row, i)?.map(Value::Float),
        Type::NUMERIC => get::<Numeric>(row, i)?
            .map(|n| Value::from_decimal_str(&n.0).unwrap_or(Value::Text(n.0))),
        Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME | Type::UNKNOWN => {
            get::<String>(row, i)?.map(Value::Text)
        }
        Type::JSON | Type::JSONB => {
            get::<serde_json::Value>(row, i)?.map(|v| Value::Text(v.to_string()))
        }
        Type::UUID => get::<uuid::Uuid>(row, i)?.map(|v| Value::Text(v.to_string())),
        Type::DATE => get::<chrono::NaiveDate>(row, i)?.map(|v| Value::Text(v.to_string())),
        Type::TIME => get::<chrono::NaiveTime>(row, i)?.map(|v| Value::Text(v.to_string())),
        Type::TIMESTAMP => get::<chrono::NaiveDateTime>(row, i)?
            .map(|v| Value::Text(v.format("%Y-%m-%d %H:%M:%S%.f").to_string())),
        Type::TIMESTAMPTZ => get::<chrono::DateTime<chrono::Utc>>(row, i)?
            .map(|v| Value::Text(v.to_rfc3339())),
        Type::BYTEA => get::<Vec<u8>>(row, i)?.map(|v| Value::Text(hex::encode(v))),
        _ => get::<Raw>(row, i)?.map(|raw| raw.0),
    };
    Ok(value.unwrap_or(Value::Null))
}

/// Any other type (enums, intervals, arrays, network types, ...) is kept as
/// text so a query selecting it still succeeds. Enums and other text-like
/// types arrive as UTF-8, everything else is rendered as hex.
struct Raw(Value);

impl<'a> FromSql<'a> for Raw {
    fn from_sql(ty: &Type, raw: &'a [u8]) -> Result<Self, Box<dyn Error + Sync + Send>> {
        Ok(Raw(raw_value(ty.kind(), raw)))
    }

    fn accepts(_: &Type) -> bool {
        true
    }
}

fn raw_value(kind: &Kind, raw: &[u8]) -> Value {
    match std::str::from_utf8(raw) {
        Ok(text) if matches!(kind, Kind::Enum(_)) || !text.chars().any(|c| c.is_control() && !c.is_whitespace()) => {
            Value::Text(text.to_string())
        }
        _ => Value::Text(hex::encode(raw)),
    }
}

/// NUMERIC in its plain decimal notation.
struct Numeric(String);

impl<'a> FromSql<'a> for Numeric {
    fn from_sql(_: &Type, raw: &'a [u8]) -> Result<Self, Box<dyn Error + Sync + Send>> {
        decode_numeric(raw).map(Numeric)
    }

    fn accepts(ty: &Type) -> bool {
        *ty == Type::NUMERIC
    }
}

/// Decode the binary NUMERIC wire format: a header of ndigits, weight, sign and
/// display scale, followed by ndigits base-10000 digits.
fn decode_numeric(raw: &[u8]) -> Result<String, Box<dyn Error + Sync + Send>> {
    if raw.len() < 8 {
        return Err("numeric value is shorter than its header".into());
    }

    let ndigits = i16::from_be_bytes([raw[0], raw[1]]);
    let weight = i16::from_be_bytes([raw[2], raw[3]]);
    let sign = u16::from_be_bytes([raw[4], raw[5]]);
    let dscale = u16::from_be_bytes([raw[6], raw[7]]) as usize;

    let ndigits = usize::try_from(ndigits).map_err(|_| "negative numeric digit count")?;
    if raw.len() != 8 + ndigits * 2 {
        return Err(format!(
            "numeric value has {} bytes, expected {}",
            raw.len(),
            8 + ndigits * 2
        )
        .into());
    }

    match sign {
        NUMERIC_NAN => return Ok("NaN".to_string()),
        NUMERIC_PINF => return Ok("Infinity".to_string()),
        NUMERIC_NINF => return Ok("-Infinity".to_string()),
        NUMERIC_POS | NUMERIC_NEG => {}
        other => return Err(format!("invalid numeric sign {:#06x}", other).into()),
    }

    let digits: Vec<i16> = raw[8..]
        .chunks_exact(2)
        .map(|c| i16::from_be_bytes([c[0], c[1]]))
        .collect();
    let digit_at = |pos: i32| -> i16 {
        if pos < 0 {
            0
        } else {
            digits.get(pos as usize).copied().unwrap_or(0)
        }
    };

    let mut out = String::new();
    if sign == NUMERIC_NEG {
        out.push('-');
    }

    if weight < 0 {
        out.push('0');
    } else {
        for pos in 0..=weight as i32 {
            if pos == 0 {
                out.push_str(&digit_at(pos).to_string());
            } else {
                out.push_str(&format!("{:04}", digit_at(pos)));
            }
        }
    }

    if dscale > 0 {
        let mut frac = String::with_capacity(dscale + 4);
        let mut pos = weight as i32 + 1;
        while frac.len() < dscale {
            frac.push_str(&format!("{:04}", digit_at(pos)));
            pos += 1;
        }
        frac.truncate(dscale);
        out.push('.');
        out.push_str(&frac);
    }

    Ok(out)
}
