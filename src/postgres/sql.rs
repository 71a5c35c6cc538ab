// ABOUTME: SQL text builders for reading, estimating, windowing and upserting a table
// ABOUTME: Watermark values cross the wire as bigint in the engine's integer domain

use crate::engine::descriptor::TableDescriptor;
use crate::engine::watermark::{Watermark, WatermarkKind};
use crate::utils::{qualified_name, quote_ident};

/// PostgreSQL accepts at most 65535 bind parameters per statement.
pub const MAX_BIND_PARAMS: usize = 65_000;

/// Convert a watermark-typed SQL expression to its bigint domain value.
pub fn watermark_to_bigint(kind: WatermarkKind, expr: &str) -> String {
    match kind {
        WatermarkKind::Integer => format!("({})::bigint", expr),
        WatermarkKind::Timestamp | WatermarkKind::TimestampTz => {
            format!("(EXTRACT(EPOCH FROM {}) * 1000000)::bigint", expr)
        }
    }
}

/// Convert a bigint SQL expression back to the column's type, so comparisons
/// run against the column itself and can use its index.
pub fn watermark_from_bigint(kind: WatermarkKind, expr: &str) -> String {
    match kind {
        WatermarkKind::Integer => format!("({})::bigint", expr),
        WatermarkKind::Timestamp => {
            format!("(TIMESTAMP 'epoch' + ({}) * INTERVAL '1 microsecond')", expr)
        }
        WatermarkKind::TimestampTz => {
            format!(
                "(TIMESTAMPTZ 'epoch' + ({}) * INTERVAL '1 microsecond')",
                expr
            )
        }
    }
}

/// Bind parameter `$n` carrying a watermark value.
pub fn watermark_param(kind: WatermarkKind, n: usize) -> String {
    watermark_from_bigint(kind, &format!("${}::bigint", n))
}

/// Inline watermark literal, for statements that cannot take parameters.
pub fn watermark_literal(kind: WatermarkKind, value: Watermark) -> String {
    watermark_from_bigint(kind, &value.0.to_string())
}

/// `SELECT MIN(...)` or `SELECT MAX(...)` of the watermark, as bigint.
pub fn watermark_aggregate_query(table: &TableDescriptor, aggregate: &str) -> String {
    let column = quote_ident(&table.watermark_column);
    format!(
        "SELECT {} FROM {}",
        watermark_to_bigint(
            table.watermark_kind,
            &format!("{}({})", aggregate, column)
        ),
        table.qualified_name()
    )
}

/// The server clock in the watermark domain, for timestamp kinds.
///
/// `timestamp` columns are compared against the session's local time,
/// `timestamptz` columns against `now()`.
pub fn server_clock_query(kind: WatermarkKind) -> Option<String> {
    match kind {
        WatermarkKind::Integer => None,
        WatermarkKind::Timestamp => Some(format!(
            "SELECT {}",
            watermark_to_bigint(kind, "LOCALTIMESTAMP")
        )),
        WatermarkKind::TimestampTz => {
            Some(format!("SELECT {}", watermark_to_bigint(kind, "now()")))
        }
    }
}

/// Planner estimate for rows in `[lower, upper]`.
///
/// EXPLAIN takes no bind parameters, so the bounds are inlined. They are
/// integers produced by the engine, never user text.
pub fn explain_query(table: &TableDescriptor, lower: Watermark, upper: Watermark) -> String {
    let column = quote_ident(&table.watermark_column);
    format!(
        "EXPLAIN (FORMAT JSON) SELECT * FROM {} WHERE {} BETWEEN {} AND {} ORDER BY {} ASC",
        table.qualified_name(),
        column,
        watermark_literal(table.watermark_kind, lower),
        watermark_literal(table.watermark_kind, upper),
        column
    )
}

/// Every `chunk_size`-th watermark in the slice `[$1, $2]`, in order.
///
/// Row numbers start at 1, so the first row of each chunk satisfies
/// `rownum % chunk_size = 1`; with a chunk of one every row is a boundary.
pub fn window_boundaries_query(table: &TableDescriptor, chunk_size: usize) -> String {
    let kind = table.watermark_kind;
    let column = quote_ident(&table.watermark_column);
    let filter = if chunk_size > 1 {
        format!(" WHERE rownum % {} = 1", chunk_size)
    } else {
        String::new()
    };

    format!(
        "SELECT watermark FROM (\
             SELECT {} AS watermark, row_number() OVER (ORDER BY {}) AS rownum \
             FROM {} WHERE {} >= {} AND {} <= {}\
         ) AS boundaries{} ORDER BY watermark",
        watermark_to_bigint(kind, &column),
        column,
        table.qualified_name(),
        column,
        watermark_param(kind, 1),
        column,
        watermark_param(kind, 2),
        filter
    )
}

/// Rows of one window, every column rendered as text.
///
/// Parameters: `$1`/`$2` are the slice bounds, `$3` the window start and,
/// unless this is the slice's last window, `$4` the next window's start.
pub fn fetch_window_query(table: &TableDescriptor, bounded: bool) -> String {
    let kind = table.watermark_kind;
    let column = quote_ident(&table.watermark_column);
    let select_list: Vec<String> = table
        .columns
        .iter()
        .map(|c| format!("{}::text", quote_ident(&c.name)))
        .collect();

    let mut query = format!(
        "SELECT {} FROM {} WHERE {} >= {} AND {} <= {} AND {} >= {}",
        select_list.join(", "),
        table.qualified_name(),
        column,
        watermark_param(kind, 1),
        column,
        watermark_param(kind, 2),
        column,
        watermark_param(kind, 3)
    );
    if bounded {
        query.push_str(&format!(" AND {} < {}", column, watermark_param(kind, 4)));
    }
    query.push_str(&format!(" ORDER BY {} ASC", column));
    query
}

/// Rows per upsert statement for this table, within the bind parameter limit.
pub fn upsert_batch_size(table: &TableDescriptor) -> usize {
    std::cmp::max(1, MAX_BIND_PARAMS / table.columns.len().max(1))
}

/// Build an upsert for `num_rows` rows of text values.
///
/// Generates a query like:
/// ```sql
/// INSERT INTO "schema"."table" ("id", "name")
/// VALUES ($1::text::bigint, $2::text::text), ...
/// ON CONFLICT ("id") DO UPDATE SET "name" = EXCLUDED."name"
/// ```
pub fn upsert_query(table: &TableDescriptor, num_rows: usize) -> String {
    let quoted_columns: Vec<String> = table.columns.iter().map(|c| quote_ident(&c.name)).collect();
    let quoted_pk_columns: Vec<String> = table.primary_key.iter().map(|c| quote_ident(c)).collect();

    let num_cols = table.columns.len();
    let value_rows: Vec<String> = (0..num_rows)
        .map(|row_idx| {
            let placeholders: Vec<String> = table
                .columns
                .iter()
                .enumerate()
                .map(|(col_idx, column)| {
                    format!(
                        "${}::text::{}",
                        row_idx * num_cols + col_idx + 1,
                        column.data_type
                    )
                })
                .collect();
            format!("({})", placeholders.join(", "))
        })
        .collect();

    let update_columns: Vec<String> = table
        .columns
        .iter()
        .filter(|c| !table.is_primary_key(&c.name))
        .map(|c| {
            let quoted = quote_ident(&c.name);
            format!("{} = EXCLUDED.{}", quoted, quoted)
        })
        .collect();

    let update_clause = if update_columns.is_empty() {
        // All columns are PKs - use DO NOTHING
        "DO NOTHING".to_string()
    } else {
        format!("DO UPDATE SET {}", update_columns.join(", "))
    };

    format!(
        "INSERT INTO {} ({}) VALUES {} ON CONFLICT ({}) {}",
        table.qualified_name(),
        quoted_columns.join(", "),
        value_rows.join(", "),
        quoted_pk_columns.join(", "),
        update_clause
    )
}

/// `CREATE TABLE` with the same columns, types and primary key as `table`.
pub fn create_table_query(table: &TableDescriptor) -> String {
    let mut definitions: Vec<String> = table
        .columns
        .iter()
        .map(|c| {
            let mut definition = format!("{} {}", quote_ident(&c.name), c.data_type);
            if c.not_null {
                definition.push_str(" NOT NULL");
            }
            definition
        })
        .collect();

    let pk: Vec<String> = table.primary_key.iter().map(|c| quote_ident(c)).collect();
    definitions.push(format!("PRIMARY KEY ({})", pk.join(", ")));

    format!(
        "CREATE TABLE {} ({})",
        table.qualified_name(),
        definitions.join(", ")
    )
}

/// Index on the watermark column, so resuming from `MAX(watermark)` is cheap.
pub fn create_watermark_index_query(table: &TableDescriptor) -> String {
    format!(
        "CREATE INDEX IF NOT EXISTS {} ON {} ({})",
        quote_ident(&watermark_index_name(table)),
        qualified_name(&table.schema, &table.name),
        quote_ident(&table.watermark_column)
    )
}

/// `<table>_<column>_idx`, truncated to PostgreSQL's 63-byte identifier limit.
pub fn watermark_index_name(table: &TableDescriptor) -> String {
    let mut name = format!("{}_{}_idx", table.name, table.watermark_column);
    while name.len() > 63 {
        name.pop();
    }
    name
}
