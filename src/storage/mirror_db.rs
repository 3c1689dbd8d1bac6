use crate::bundle::TxBundle;
use crate::model::{AnswerEvent, Lookup, Proposal, QuestionState, SyncWatermark};
use alloy::primitives::{Address, B256, U256};
use anyhow::Context;
use rusqlite::ffi::ErrorCode;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

pub const KEY_LAST_PROCESSED_BLOCK: &str = "sync.last_processed_block";
pub const KEY_EARLIEST_INDEXED_BLOCK: &str = "sync.earliest_indexed_block";
pub const KEY_ANSWER_CACHE_READY: &str = "sync.answer_cache_ready";
pub const KEY_LOOKBACK_DAYS: &str = "prefs.lookback_days";
pub const KEY_POLL_INTERVAL_MS: &str = "prefs.poll_interval_ms";

const WATERMARK_KEYS: [&str; 3] = [
    KEY_LAST_PROCESSED_BLOCK,
    KEY_EARLIEST_INDEXED_BLOCK,
    KEY_ANSWER_CACHE_READY,
];

/// SQLite-backed mirror of proposals, question states, answers, bundles and settings.
///
/// Cheap to clone: every operation opens its own connection.
#[derive(Debug, Clone)]
pub struct MirrorDb {
    path: PathBuf,
}

impl MirrorDb {
    pub fn open(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let db = Self {
            path: path.as_ref().to_path_buf(),
        };
        db.ensure_schema()?;
        Ok(db)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn ensure_schema(&self) -> anyhow::Result<()> {
        self.with_connection("ensure_schema", |conn| {
            conn.execute_batch(
                r#"
                PRAGMA journal_mode = WAL;

                CREATE TABLE IF NOT EXISTS proposals (
                    question_id TEXT PRIMARY KEY NOT NULL,
                    proposal_id TEXT,
                    proposal_id_lookup TEXT NOT NULL,
                    tx_hashes TEXT NOT NULL,
                    question_text TEXT NOT NULL,
                    created_block INTEGER NOT NULL,
                    created_log_index INTEGER NOT NULL,
                    created_tx_hash TEXT NOT NULL,
                    created_timestamp TEXT NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_proposals_proposal_id ON proposals(proposal_id);
                CREATE INDEX IF NOT EXISTS idx_proposals_created_block ON proposals(created_block);

                CREATE TABLE IF NOT EXISTS question_states (
                    question_id TEXT PRIMARY KEY NOT NULL,
                    best_answer TEXT NOT NULL,
                    bond TEXT NOT NULL,
                    min_bond TEXT NOT NULL,
                    finalize_ts INTEGER NOT NULL,
                    is_finalized INTEGER NOT NULL,
                    final_answer TEXT,
                    is_pending_arbitration INTEGER NOT NULL,
                    history_hash TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS answers (
                    question_id TEXT NOT NULL,
                    block_number INTEGER NOT NULL,
                    log_index INTEGER NOT NULL,
                    transaction_index INTEGER NOT NULL,
                    answer TEXT NOT NULL,
                    user TEXT NOT NULL,
                    bond TEXT NOT NULL,
                    history_hash TEXT NOT NULL,
                    timestamp INTEGER NOT NULL,
                    is_commitment INTEGER NOT NULL,
                    PRIMARY KEY (question_id, block_number, log_index)
                );
                CREATE INDEX IF NOT EXISTS idx_answers_question_id ON answers(question_id);

                CREATE TABLE IF NOT EXISTS tx_bundles (
                    proposal_id TEXT PRIMARY KEY NOT NULL,
                    bundle TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS settings (
                    key TEXT PRIMARY KEY NOT NULL,
                    value TEXT NOT NULL
                );
                "#,
            )
        })
    }

    /// Returns `false` when the question was already mirrored. Proposals are never mutated.
    pub fn insert_proposal(&self, proposal: &Proposal) -> anyhow::Result<bool> {
        let proposal_id_lookup = serde_json::to_string(&proposal.proposal_id)?;
        let tx_hashes = serde_json::to_string(&proposal.tx_hashes)?;
        let question_text = serde_json::to_string(&proposal.question_text)?;
        let created_timestamp = serde_json::to_string(&proposal.created_timestamp)?;
        let proposal_id = proposal.proposal_id.found().cloned();
        let inserted = self.with_connection("insert_proposal", |conn| {
            conn.execute(
                r#"
                INSERT OR IGNORE INTO proposals (
                    question_id, proposal_id, proposal_id_lookup, tx_hashes, question_text,
                    created_block, created_log_index, created_tx_hash, created_timestamp
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                "#,
                params![
                    hex_b256(proposal.question_id),
                    proposal_id,
                    proposal_id_lookup,
                    tx_hashes,
                    question_text,
                    to_i64(proposal.created_block),
                    to_i64(proposal.created_log_index),
                    hex_b256(proposal.created_tx_hash),
                    created_timestamp,
                ],
            )
        })?;
        Ok(inserted > 0)
    }

    pub fn proposal(&self, question_id: B256) -> anyhow::Result<Option<Proposal>> {
        self.with_connection("proposal", |conn| {
            conn.query_row(
                &format!("{PROPOSAL_SELECT} WHERE question_id = ?1"),
                params![hex_b256(question_id)],
                proposal_from_row,
            )
            .optional()
        })
    }

    pub fn proposal_by_id(&self, proposal_id: &str) -> anyhow::Result<Option<Proposal>> {
        self.with_connection("proposal_by_id", |conn| {
            conn.query_row(
                &format!(
                    "{PROPOSAL_SELECT} WHERE proposal_id = ?1 ORDER BY created_block DESC, created_log_index DESC LIMIT 1"
                ),
                params![proposal_id],
                proposal_from_row,
            )
            .optional()
        })
    }

    /// Oldest first.
    pub fn proposals(&self) -> anyhow::Result<Vec<Proposal>> {
        self.with_connection("proposals", |conn| {
            let mut stmt = conn.prepare(&format!(
                "{PROPOSAL_SELECT} ORDER BY created_block ASC, created_log_index ASC"
            ))?;
            let rows = stmt.query_map([], proposal_from_row)?;
            rows.collect()
        })
    }

    pub fn proposal_question_ids(&self) -> anyhow::Result<HashSet<B256>> {
        self.with_connection("proposal_question_ids", |conn| {
            let mut stmt = conn.prepare("SELECT question_id FROM proposals")?;
            let rows = stmt.query_map([], |row| parse_col::<B256>(row, 0))?;
            rows.collect()
        })
    }

    /// Full replace keyed by question id.
    pub fn replace_question_state(&self, state: &QuestionState) -> anyhow::Result<()> {
        self.with_connection("replace_question_state", |conn| {
            conn.execute(
                r#"
                INSERT OR REPLACE INTO question_states (
                    question_id, best_answer, bond, min_bond, finalize_ts, is_finalized,
                    final_answer, is_pending_arbitration, history_hash
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                "#,
                params![
                    hex_b256(state.question_id),
                    hex_b256(state.best_answer),
                    state.bond.to_string(),
                    state.min_bond.to_string(),
                    to_i64(state.finalize_ts),
                    state.is_finalized,
                    state.final_answer.map(hex_b256),
                    state.is_pending_arbitration,
                    hex_b256(state.history_hash),
                ],
            )
            .map(|_| ())
        })
    }

    pub fn question_state(&self, question_id: B256) -> anyhow::Result<Option<QuestionState>> {
        self.with_connection("question_state", |conn| {
            conn.query_row(
                &format!("{STATE_SELECT} WHERE question_id = ?1"),
                params![hex_b256(question_id)],
                state_from_row,
            )
            .optional()
        })
    }

    pub fn question_states(&self) -> anyhow::Result<Vec<QuestionState>> {
        self.with_connection("question_states", |conn| {
            let mut stmt = conn.prepare(STATE_SELECT)?;
            let rows = stmt.query_map([], state_from_row)?;
            rows.collect()
        })
    }

    /// Upserts by `(question_id, block_number, log_index)` in one transaction. Returns the
    /// number of answers not seen before.
    pub fn upsert_answers(&self, answers: &[AnswerEvent]) -> anyhow::Result<usize> {
        if answers.is_empty() {
            return Ok(0);
        }
        self.with_connection("upsert_answers", |conn| {
            let tx = conn.unchecked_transaction()?;
            let mut fresh = 0usize;
            {
                let mut exists = tx.prepare(
                    "SELECT 1 FROM answers WHERE question_id = ?1 AND block_number = ?2 AND log_index = ?3",
                )?;
                let mut upsert = tx.prepare(
                    r#"
                    INSERT OR REPLACE INTO answers (
                        question_id, block_number, log_index, transaction_index, answer, user,
                        bond, history_hash, timestamp, is_commitment
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                    "#,
                )?;
                for answer in answers {
                    let key = (
                        hex_b256(answer.question_id),
                        to_i64(answer.block_number),
                        to_i64(answer.log_index),
                    );
                    if !exists.exists(params![key.0, key.1, key.2])? {
                        fresh += 1;
                    }
                    upsert.execute(params![
                        key.0,
                        key.1,
                        key.2,
                        to_i64(answer.transaction_index),
                        hex_b256(answer.answer),
                        hex_address(answer.user),
                        answer.bond.to_string(),
                        hex_b256(answer.history_hash),
                        to_i64(answer.timestamp),
                        answer.is_commitment,
                    ])?;
                }
            }
            tx.commit()?;
            Ok(fresh)
        })
    }

    /// Chronological: ascending `(block_number, log_index)`.
    pub fn answers_for(&self, question_id: B256) -> anyhow::Result<Vec<AnswerEvent>> {
        self.with_connection("answers_for", |conn| {
            let mut stmt = conn.prepare(&format!(
                "{ANSWER_SELECT} WHERE question_id = ?1 ORDER BY block_number ASC, log_index ASC"
            ))?;
            let rows = stmt.query_map(params![hex_b256(question_id)], answer_from_row)?;
            rows.collect()
        })
    }

    pub fn answer_count(&self) -> anyhow::Result<u64> {
        self.with_connection("answer_count", |conn| {
            conn.query_row("SELECT COUNT(*) FROM answers", [], |row| row.get::<_, i64>(0))
                .map(|n| n.max(0) as u64)
        })
    }

    pub fn save_bundle(&self, bundle: &TxBundle) -> anyhow::Result<()> {
        let encoded = serde_json::to_string(bundle)?;
        self.with_connection("save_bundle", |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO tx_bundles (proposal_id, bundle) VALUES (?1, ?2)",
                params![bundle.proposal_id, encoded],
            )
            .map(|_| ())
        })
    }

    pub fn bundle(&self, proposal_id: &str) -> anyhow::Result<Option<TxBundle>> {
        let raw = self.with_connection("bundle", |conn| {
            conn.query_row(
                "SELECT bundle FROM tx_bundles WHERE proposal_id = ?1",
                params![proposal_id],
                |row| row.get::<_, String>(0),
            )
            .optional()
        })?;
        raw.map(|raw| {
            serde_json::from_str(&raw)
                .with_context(|| format!("stored bundle for `{proposal_id}` is corrupt"))
        })
        .transpose()
    }

    pub fn setting(&self, key: &str) -> anyhow::Result<Option<String>> {
        self.with_connection("setting", |conn| {
            conn.query_row(
                "SELECT value FROM settings WHERE key = ?1",
                params![key],
                |row| row.get::<_, String>(0),
            )
            .optional()
        })
    }

    pub fn set_setting(&self, key: &str, value: &str) -> anyhow::Result<()> {
        self.with_connection("set_setting", |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO settings (key, value) VALUES (?1, ?2)",
                params![key, value],
            )
            .map(|_| ())
        })
    }

    pub fn load_watermark(&self) -> anyhow::Result<SyncWatermark> {
        let parse_block = |key: &str| -> anyhow::Result<Option<u64>> {
            self.setting(key)?
                .map(|raw| {
                    raw.parse::<u64>()
                        .with_context(|| format!("setting {key} is not a block number: {raw}"))
                })
                .transpose()
        };
        Ok(SyncWatermark {
            last_processed_block: parse_block(KEY_LAST_PROCESSED_BLOCK)?,
            earliest_indexed_block: parse_block(KEY_EARLIEST_INDEXED_BLOCK)?,
            answer_cache_ready: self
                .setting(KEY_ANSWER_CACHE_READY)?
                .map(|raw| raw == "true")
                .unwrap_or(false),
        })
    }

    pub fn save_watermark(&self, watermark: &SyncWatermark) -> anyhow::Result<()> {
        let last = watermark.last_processed_block.map(|b| b.to_string());
        let earliest = watermark.earliest_indexed_block.map(|b| b.to_string());
        let ready = watermark.answer_cache_ready.to_string();
        self.with_connection("save_watermark", |conn| {
            let tx = conn.unchecked_transaction()?;
            for (key, value) in [
                (KEY_LAST_PROCESSED_BLOCK, last.as_deref()),
                (KEY_EARLIEST_INDEXED_BLOCK, earliest.as_deref()),
                (KEY_ANSWER_CACHE_READY, Some(ready.as_str())),
            ] {
                match value {
                    Some(value) => tx.execute(
                        "INSERT OR REPLACE INTO settings (key, value) VALUES (?1, ?2)",
                        params![key, value],
                    )?,
                    None => tx.execute("DELETE FROM settings WHERE key = ?1", params![key])?,
                };
            }
            tx.commit()
        })
    }

    /// Drops every chain-derived record and the watermark. Bundles and preferences survive.
    pub fn reset_cache(&self) -> anyhow::Result<()> {
        self.with_connection("reset_cache", |conn| {
            let tx = conn.unchecked_transaction()?;
            tx.execute("DELETE FROM proposals", [])?;
            tx.execute("DELETE FROM question_states", [])?;
            tx.execute("DELETE FROM answers", [])?;
            for key in WATERMARK_KEYS {
                tx.execute("DELETE FROM settings WHERE key = ?1", params![key])?;
            }
            tx.commit()
        })?;
        tracing::info!("[DB] Cache reset for {}", self.path.display());
        Ok(())
    }

    fn with_connection<T, F>(&self, context: &str, op: F) -> anyhow::Result<T>
    where
        F: Fn(&Connection) -> rusqlite::Result<T>,
    {
        let max_attempts = 6u32;
        let mut last_err = String::new();

        for attempt in 1..=max_attempts {
            let conn = Connection::open(&self.path).with_context(|| {
                format!("failed to open sqlite database {}", self.path.display())
            })?;
            conn.busy_timeout(Duration::from_millis(5_000))
                .context("failed to configure sqlite busy timeout")?;

            match op(&conn) {
                Ok(value) => return Ok(value),
                Err(err) => {
                    last_err = err.to_string();
                    if is_sqlite_locked_error(&err) && attempt < max_attempts {
                        tracing::debug!(
                            "[DB] {} hit a locked database (attempt {}/{})",
                            context,
                            attempt,
                            max_attempts
                        );
                        continue;
                    }
                    return Err(anyhow::anyhow!(
                        "{} failed for {}: {}",
                        context,
                        self.path.display(),
                        last_err
                    ));
                }
            }
        }

        Err(anyhow::anyhow!(
            "{} failed for {} after {} attempt(s): {}",
            context,
            self.path.display(),
            max_attempts,
            last_err
        ))
    }
}

const PROPOSAL_SELECT: &str = "SELECT question_id, proposal_id_lookup, tx_hashes, question_text, created_block, created_log_index, created_tx_hash, created_timestamp FROM proposals";
const STATE_SELECT: &str = "SELECT question_id, best_answer, bond, min_bond, finalize_ts, is_finalized, final_answer, is_pending_arbitration, history_hash FROM question_states";
const ANSWER_SELECT: &str = "SELECT question_id, block_number, log_index, transaction_index, answer, user, bond, history_hash, timestamp, is_commitment FROM answers";

fn proposal_from_row(row: &Row<'_>) -> rusqlite::Result<Proposal> {
    Ok(Proposal {
        question_id: parse_col(row, 0)?,
        proposal_id: json_col::<Lookup<String>>(row, 1)?,
        tx_hashes: json_col::<Lookup<Vec<B256>>>(row, 2)?,
        question_text: json_col::<Lookup<String>>(row, 3)?,
        created_block: from_i64(row.get(4)?),
        created_log_index: from_i64(row.get(5)?),
        created_tx_hash: parse_col(row, 6)?,
        created_timestamp: json_col::<Lookup<u64>>(row, 7)?,
    })
}

fn state_from_row(row: &Row<'_>) -> rusqlite::Result<QuestionState> {
    let final_answer: Option<String> = row.get(6)?;
    Ok(QuestionState {
        question_id: parse_col(row, 0)?,
        best_answer: parse_col(row, 1)?,
        bond: parse_col::<U256>(row, 2)?,
        min_bond: parse_col::<U256>(row, 3)?,
        finalize_ts: from_i64(row.get(4)?),
        is_finalized: row.get(5)?,
        final_answer: final_answer
            .map(|raw| parse_text::<B256>(6, &raw))
            .transpose()?,
        is_pending_arbitration: row.get(7)?,
        history_hash: parse_col(row, 8)?,
    })
}

fn answer_from_row(row: &Row<'_>) -> rusqlite::Result<AnswerEvent> {
    Ok(AnswerEvent {
        question_id: parse_col(row, 0)?,
        block_number: from_i64(row.get(1)?),
        log_index: from_i64(row.get(2)?),
        transaction_index: from_i64(row.get(3)?),
        answer: parse_col(row, 4)?,
        user: parse_col::<Address>(row, 5)?,
        bond: parse_col::<U256>(row, 6)?,
        history_hash: parse_col(row, 7)?,
        timestamp: from_i64(row.get(8)?),
        is_commitment: row.get(9)?,
    })
}

fn conversion_error(idx: usize, reason: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, reason.into())
}

fn parse_text<T>(idx: usize, raw: &str) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    T::from_str(raw).map_err(|e| conversion_error(idx, format!("`{raw}`: {e}")))
}

fn parse_col<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let raw: String = row.get(idx)?;
    parse_text(idx, &raw)
}

fn json_col<T: serde::de::DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw).map_err(|e| conversion_error(idx, e.to_string()))
}

fn is_sqlite_locked_error(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(code, _) => {
            matches!(
                code.code,
                ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked
            )
        }
        _ => {
            let msg = err.to_string().to_ascii_lowercase();
            msg.contains("database is locked") || msg.contains("database is busy")
        }
    }
}

fn hex_b256(value: B256) -> String {
    format!("{value:#x}")
}

fn hex_address(value: Address) -> String {
    format!("{value:#x}")
}

fn to_i64(value: u64) -> i64 {
    if value > i64::MAX as u64 {
        i64::MAX
    } else {
        value as i64
    }
}

fn from_i64(value: i64) -> u64 {
    value.max(0) as u64
}
