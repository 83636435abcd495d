//! Schema creation and forward-only migrations.
//!
//! Migrations are additive: on startup we inspect each table's columns and
//! issue ADD COLUMN for anything a newer revision introduced. Nothing is
//! ever dropped or rewritten in place.

use super::StoreError;
use rusqlite::Connection;
use tracing::info;

pub(crate) fn init(conn: &Connection) -> Result<(), StoreError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS portfolios (
            firm TEXT PRIMARY KEY,
            balance REAL NOT NULL,
            initial_balance REAL NOT NULL,
            peak_balance REAL NOT NULL,
            consecutive_wins INTEGER NOT NULL DEFAULT 0,
            consecutive_losses INTEGER NOT NULL DEFAULT 0,
            last_update TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS predictions (
            id TEXT PRIMARY KEY,
            firm TEXT NOT NULL,
            market_id TEXT NOT NULL,
            probability REAL NOT NULL,
            confidence REAL NOT NULL,
            score_sentiment REAL NOT NULL,
            score_news REAL NOT NULL,
            score_technical REAL NOT NULL,
            score_fundamental REAL NOT NULL,
            score_volatility REAL NOT NULL,
            analysis_sentiment TEXT NOT NULL DEFAULT '',
            analysis_news TEXT NOT NULL DEFAULT '',
            analysis_technical TEXT NOT NULL DEFAULT '',
            analysis_fundamental TEXT NOT NULL DEFAULT '',
            analysis_volatility TEXT NOT NULL DEFAULT '',
            probability_reasoning TEXT NOT NULL DEFAULT '',
            skip_reason TEXT,
            created_at TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_predictions_firm_created
         ON predictions(firm, created_at DESC)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_predictions_market
         ON predictions(market_id, firm)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS bets (
            id TEXT PRIMARY KEY,
            prediction_id TEXT NOT NULL,
            firm TEXT NOT NULL,
            market_id TEXT NOT NULL,
            category TEXT NOT NULL,
            token_id TEXT NOT NULL,
            side TEXT NOT NULL,
            size REAL NOT NULL,
            limit_price REAL NOT NULL,
            status TEXT NOT NULL,
            order_id TEXT,
            execution_timestamp TEXT,
            expected_value REAL NOT NULL DEFAULT 0,
            actual_result INTEGER,
            profit_loss REAL,
            consecutive_strikes INTEGER NOT NULL DEFAULT 0,
            reviews TEXT NOT NULL DEFAULT '[]',
            error_text TEXT,
            redeemed INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_bets_status ON bets(status)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_bets_firm_created ON bets(firm, created_at DESC)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS daily_counters (
            firm TEXT NOT NULL,
            date TEXT NOT NULL,
            bets_count INTEGER NOT NULL DEFAULT 0,
            spent REAL NOT NULL DEFAULT 0,
            realized_loss REAL NOT NULL DEFAULT 0,
            PRIMARY KEY (firm, date)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS cycles (
            id TEXT PRIMARY KEY,
            started_at TEXT NOT NULL,
            finished_at TEXT,
            status TEXT NOT NULL,
            markets_fetched INTEGER NOT NULL DEFAULT 0,
            markets_tradable INTEGER NOT NULL DEFAULT 0,
            bets_approved INTEGER NOT NULL DEFAULT 0,
            bets_executed INTEGER NOT NULL DEFAULT 0,
            bets_failed INTEGER NOT NULL DEFAULT 0,
            per_category_counts TEXT NOT NULL DEFAULT '{}'
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS cancelled_orders (
            order_id TEXT PRIMARY KEY,
            firm TEXT NOT NULL,
            market_id TEXT NOT NULL,
            strikes_history TEXT NOT NULL DEFAULT '[]',
            cancel_reason TEXT NOT NULL,
            cancelled_at TEXT NOT NULL
        )",
        [],
    )?;

    Ok(())
}

/// Columns introduced after the initial schema shipped. Databases created
/// by older revisions pick them up here.
pub(crate) fn migrate(conn: &Connection) -> Result<(), StoreError> {
    ensure_column(conn, "predictions", "skip_reason", "TEXT")?;
    ensure_column(conn, "bets", "consecutive_strikes", "INTEGER NOT NULL DEFAULT 0")?;
    ensure_column(conn, "bets", "reviews", "TEXT NOT NULL DEFAULT '[]'")?;
    ensure_column(conn, "bets", "redeemed", "INTEGER NOT NULL DEFAULT 0")?;
    ensure_column(conn, "bets", "error_text", "TEXT")?;
    Ok(())
}

fn ensure_column(
    conn: &Connection,
    table: &str,
    column: &str,
    decl: &str,
) -> Result<(), StoreError> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
    let existing: Vec<String> = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .filter_map(|r| r.ok())
        .collect();

    if !existing.iter().any(|c| c == column) {
        info!(table, column, "adding missing column");
        conn.execute(&format!("ALTER TABLE {table} ADD COLUMN {column} {decl}"), [])?;
    }
    Ok(())
}
