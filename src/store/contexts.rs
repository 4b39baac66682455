//! Immutable target context versions

use deadpool_postgres::Pool;
use serde::Serialize;
use uuid::Uuid;

use crate::store::is_unique_violation;
use crate::store::models::{ContextAuthor, ContextChangeType, TargetContext};
use crate::{Error, Result};

const CONTEXT_COLUMNS: &str = "id, target_id, version, user_context, agent_context, \
     parent_version_id, change_type, change_summary, created_by, created_at";

/// Line-oriented diff of one context field.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FieldDiff {
    pub added: Vec<String>,
    pub removed: Vec<String>,
}

/// Diff between two context versions, per field.
#[derive(Debug, Clone, Serialize)]
pub struct ContextDiff {
    pub from_version: i32,
    pub to_version: i32,
    pub user_context: FieldDiff,
    pub agent_context: FieldDiff,
}

pub struct ContextRepo {
    pool: Pool,
}

impl ContextRepo {
    pub(crate) fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// Append a new version to the target's chain.
    ///
    /// Runs in one transaction: the owning target row is locked, the next
    /// version number is assigned from the current head, and the head
    /// pointer is advanced. `expected_head` is the head the caller observed
    /// when it prepared the new content; if a concurrent append moved the
    /// head in the meantime this fails with `conflict` and the caller must
    /// re-read and retry. The unique `(target_id, version)` constraint
    /// backstops the same guarantee.
    #[allow(clippy::too_many_arguments)]
    pub async fn append(
        &self,
        target_id: Uuid,
        expected_head: Option<Uuid>,
        user_context: Option<String>,
        agent_context: Option<String>,
        created_by: ContextAuthor,
        change_summary: Option<String>,
        change_type: ContextChangeType,
    ) -> Result<TargetContext> {
        if blank(&user_context) && blank(&agent_context) {
            return Err(Error::validation_msg(
                "user_context",
                "either user_context or agent_context must be provided",
            ));
        }

        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;

        let target_row = tx
            .query_opt(
                "SELECT current_context_id FROM targets WHERE id = $1 FOR UPDATE",
                &[&target_id],
            )
            .await?;
        let Some(target_row) = target_row else {
            return Err(Error::NotFound(format!("target {target_id}")));
        };
        let parent_version_id: Option<Uuid> = target_row.get("current_context_id");

        if parent_version_id != expected_head {
            return Err(Error::Conflict(format!(
                "concurrent context update on target {target_id}, retry"
            )));
        }

        let max_version: i32 = tx
            .query_one(
                "SELECT COALESCE(MAX(version), 0) FROM target_contexts WHERE target_id = $1",
                &[&target_id],
            )
            .await?
            .get(0);
        let version = max_version + 1;

        let inserted = tx
            .query_one(
                &format!(
                    "INSERT INTO target_contexts
                         (target_id, version, user_context, agent_context,
                          parent_version_id, change_type, change_summary, created_by)
                     VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                     RETURNING {CONTEXT_COLUMNS}"
                ),
                &[
                    &target_id,
                    &version,
                    &user_context,
                    &agent_context,
                    &parent_version_id,
                    &change_type.as_str(),
                    &change_summary,
                    &created_by.as_str(),
                ],
            )
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    Error::Conflict(format!(
                        "concurrent context update on target {target_id}, retry"
                    ))
                } else {
                    Error::Database(e)
                }
            })?;
        let context = TargetContext::from_row(&inserted)?;

        tx.execute(
            "UPDATE targets SET current_context_id = $2, updated_at = now() WHERE id = $1",
            &[&target_id, &context.id],
        )
        .await?;

        tx.commit().await?;
        Ok(context)
    }

    /// The version the target's head pointer designates, if any.
    pub async fn current(&self, target_id: Uuid) -> Result<Option<TargetContext>> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                &format!(
                    "SELECT {CONTEXT_COLUMNS} FROM target_contexts
                     WHERE id = (SELECT current_context_id FROM targets WHERE id = $1)"
                ),
                &[&target_id],
            )
            .await?;
        row.map(|r| TargetContext::from_row(&r)).transpose()
    }

    pub async fn get(&self, context_id: Uuid) -> Result<Option<TargetContext>> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                &format!("SELECT {CONTEXT_COLUMNS} FROM target_contexts WHERE id = $1"),
                &[&context_id],
            )
            .await?;
        row.map(|r| TargetContext::from_row(&r)).transpose()
    }

    pub async fn get_by_number(
        &self,
        target_id: Uuid,
        version: i32,
    ) -> Result<Option<TargetContext>> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                &format!(
                    "SELECT {CONTEXT_COLUMNS} FROM target_contexts
                     WHERE target_id = $1 AND version = $2"
                ),
                &[&target_id, &version],
            )
            .await?;
        row.map(|r| TargetContext::from_row(&r)).transpose()
    }

    /// Version history, newest first.
    pub async fn history(&self, target_id: Uuid, limit: i64) -> Result<Vec<TargetContext>> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                &format!(
                    "SELECT {CONTEXT_COLUMNS} FROM target_contexts
                     WHERE target_id = $1 ORDER BY version DESC LIMIT $2"
                ),
                &[&target_id, &limit],
            )
            .await?;
        rows.iter().map(TargetContext::from_row).collect()
    }

    /// Line-oriented additions/removals between two versions, per field.
    pub async fn diff(&self, from_id: Uuid, to_id: Uuid) -> Result<ContextDiff> {
        let from = self
            .get(from_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("context version {from_id}")))?;
        let to = self
            .get(to_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("context version {to_id}")))?;

        Ok(ContextDiff {
            from_version: from.version,
            to_version: to.version,
            user_context: diff_lines(
                from.user_context.as_deref().unwrap_or(""),
                to.user_context.as_deref().unwrap_or(""),
            ),
            agent_context: diff_lines(
                from.agent_context.as_deref().unwrap_or(""),
                to.agent_context.as_deref().unwrap_or(""),
            ),
        })
    }
}

fn blank(value: &Option<String>) -> bool {
    value.as_deref().map_or(true, |v| v.trim().is_empty())
}

/// Minimal LCS-based line diff; context texts are small.
fn diff_lines(old: &str, new: &str) -> FieldDiff {
    let old_lines: Vec<&str> = if old.is_empty() { vec![] } else { old.lines().collect() };
    let new_lines: Vec<&str> = if new.is_empty() { vec![] } else { new.lines().collect() };

    let n = old_lines.len();
    let m = new_lines.len();
    let mut lcs = vec![vec![0usize; m + 1]; n + 1];
    for i in (0..n).rev() {
        for j in (0..m).rev() {
            lcs[i][j] = if old_lines[i] == new_lines[j] {
                lcs[i + 1][j + 1] + 1
            } else {
                lcs[i + 1][j].max(lcs[i][j + 1])
            };
        }
    }

    let mut diff = FieldDiff::default();
    let (mut i, mut j) = (0, 0);
    while i < n && j < m {
        if old_lines[i] == new_lines[j] {
            i += 1;
            j += 1;
        } else if lcs[i + 1][j] >= lcs[i][j + 1] {
            diff.removed.push(old_lines[i].to_string());
            i += 1;
        } else {
            diff.added.push(new_lines[j].to_string());
            j += 1;
        }
    }
    diff.removed
        .extend(old_lines[i..].iter().map(|l| l.to_string()));
    diff.added.extend(new_lines[j..].iter().map(|l| l.to_string()));
    diff
}
