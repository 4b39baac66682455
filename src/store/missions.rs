//! Mission and mission-action repositories

use chrono::{DateTime, Utc};
use deadpool_postgres::Pool;
use serde::Serialize;
use uuid::Uuid;

use crate::store::models::{Mission, MissionAction, MissionScope, MissionStatus};
use crate::{Error, Result};

const MISSION_COLUMNS: &str = "id, name, goal, hypothesis, mission_type, scope, status, \
     extra_data, created_at, completed_at";

const ACTION_COLUMNS: &str =
    "id, mission_id, technique, hypothesis, result, success, learning, created_at";

/// Partial update for a mission; `status` drives the state machine.
#[derive(Debug, Clone, Default)]
pub struct MissionUpdate {
    pub name: Option<String>,
    pub goal: Option<String>,
    pub hypothesis: Option<String>,
    pub status: Option<MissionStatus>,
}

/// Aggregated effectiveness of one technique across actions.
#[derive(Debug, Clone, Serialize)]
pub struct TechniqueAggregate {
    pub technique: String,
    pub usage_count: i64,
    pub success_count: i64,
    pub success_rate: f64,
    pub mission_count: i64,
}

/// Detailed statistics for a single technique.
#[derive(Debug, Clone, Serialize)]
pub struct TechniqueStats {
    pub technique: String,
    pub usage_count: i64,
    pub success_count: i64,
    pub success_rate: f64,
    pub last_used: Option<DateTime<Utc>>,
    /// Learnings recorded on failed uses, most frequent first.
    pub failed_contexts: Vec<String>,
}

pub struct MissionRepo {
    pool: Pool,
}

impl MissionRepo {
    pub(crate) fn new(pool: Pool) -> Self {
        Self { pool }
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn create(
        &self,
        name: &str,
        goal: &str,
        hypothesis: Option<&str>,
        mission_type: Option<&str>,
        scope: Option<&MissionScope>,
        goal_embedding: Option<&[f32]>,
        hypothesis_embedding: Option<&[f32]>,
    ) -> Result<Mission> {
        let scope_json = scope.map(serde_json::to_value).transpose()?;

        let client = self.pool.get().await?;
        let row = client
            .query_one(
                &format!(
                    "INSERT INTO missions
                         (name, goal, hypothesis, mission_type, scope,
                          goal_embedding, hypothesis_embedding)
                     VALUES ($1, $2, $3, $4, $5,
                             $6::real[]::vector, $7::real[]::vector)
                     RETURNING {MISSION_COLUMNS}"
                ),
                &[
                    &name,
                    &goal,
                    &hypothesis,
                    &mission_type,
                    &scope_json,
                    &goal_embedding,
                    &hypothesis_embedding,
                ],
            )
            .await?;
        Mission::from_row(&row)
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<Mission>> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                &format!("SELECT {MISSION_COLUMNS} FROM missions WHERE id = $1"),
                &[&id],
            )
            .await?;
        row.map(|r| Mission::from_row(&r)).transpose()
    }

    /// Apply a partial update, enforcing the mission state machine.
    ///
    /// `active <-> paused`; any non-terminal state may move to `completed`
    /// or `failed`; terminal states are frozen. Entering a terminal state
    /// stamps `completed_at`.
    pub async fn update(&self, id: Uuid, update: MissionUpdate) -> Result<Mission> {
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;

        let row = tx
            .query_opt(
                &format!("SELECT {MISSION_COLUMNS} FROM missions WHERE id = $1 FOR UPDATE"),
                &[&id],
            )
            .await?;
        let Some(row) = row else {
            return Err(Error::NotFound(format!("mission {id}")));
        };
        let current = Mission::from_row(&row)?;

        if let Some(next) = update.status {
            if !current.status.can_transition_to(next) {
                return Err(Error::Conflict(format!(
                    "mission {id} cannot move from {} to {}",
                    current.status, next
                )));
            }
        }
        let entering_terminal = update
            .status
            .map(|s| s.is_terminal() && !current.status.is_terminal())
            .unwrap_or(false);

        let updated = tx
            .query_one(
                &format!(
                    "UPDATE missions SET
                         name = COALESCE($2, name),
                         goal = COALESCE($3, goal),
                         hypothesis = COALESCE($4, hypothesis),
                         status = COALESCE($5, status),
                         completed_at = CASE WHEN $6 THEN now() ELSE completed_at END
                     WHERE id = $1
                     RETURNING {MISSION_COLUMNS}"
                ),
                &[
                    &id,
                    &update.name,
                    &update.goal,
                    &update.hypothesis,
                    &update.status.map(|s| s.as_str()),
                    &entering_terminal,
                ],
            )
            .await?;
        tx.commit().await?;
        Mission::from_row(&updated)
    }

    pub async fn list(&self, status: Option<MissionStatus>, limit: i64) -> Result<Vec<Mission>> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                &format!(
                    "SELECT {MISSION_COLUMNS} FROM missions
                     WHERE ($1::text IS NULL OR status = $1)
                     ORDER BY created_at DESC LIMIT $2"
                ),
                &[&status.map(|s| s.as_str()), &limit],
            )
            .await?;
        rows.iter().map(Mission::from_row).collect()
    }

    /// Idempotent mission-target association.
    pub async fn associate_target(&self, mission_id: Uuid, target_id: Uuid) -> Result<()> {
        let client = self.pool.get().await?;
        client
            .execute(
                "INSERT INTO mission_targets (mission_id, target_id)
                 VALUES ($1, $2) ON CONFLICT DO NOTHING",
                &[&mission_id, &target_id],
            )
            .await?;
        Ok(())
    }

    pub async fn dissociate_target(&self, mission_id: Uuid, target_id: Uuid) -> Result<bool> {
        let client = self.pool.get().await?;
        let affected = client
            .execute(
                "DELETE FROM mission_targets WHERE mission_id = $1 AND target_id = $2",
                &[&mission_id, &target_id],
            )
            .await?;
        Ok(affected > 0)
    }

    /// Delete a mission; actions and link rows cascade, request rows stay.
    pub async fn delete(&self, id: Uuid) -> Result<bool> {
        let client = self.pool.get().await?;
        let affected = client
            .execute("DELETE FROM missions WHERE id = $1", &[&id])
            .await?;
        Ok(affected > 0)
    }
}

pub struct ActionRepo {
    pool: Pool,
}

impl ActionRepo {
    pub(crate) fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// Insert an immutable action record with optional embeddings.
    #[allow(clippy::too_many_arguments)]
    pub async fn append(
        &self,
        mission_id: Uuid,
        technique: &str,
        hypothesis: Option<&str>,
        result: &str,
        success: Option<bool>,
        learning: Option<&str>,
        action_embedding: Option<&[f32]>,
        result_embedding: Option<&[f32]>,
    ) -> Result<MissionAction> {
        let client = self.pool.get().await?;
        let row = client
            .query_one(
                &format!(
                    "INSERT INTO mission_actions
                         (mission_id, technique, hypothesis, result, success, learning,
                          action_embedding, result_embedding)
                     VALUES ($1, $2, $3, $4, $5, $6,
                             $7::real[]::vector, $8::real[]::vector)
                     RETURNING {ACTION_COLUMNS}"
                ),
                &[
                    &mission_id,
                    &technique,
                    &hypothesis,
                    &result,
                    &success,
                    &learning,
                    &action_embedding,
                    &result_embedding,
                ],
            )
            .await?;
        MissionAction::from_row(&row)
    }

    /// Most recent action for the mission; ties broken by id.
    pub async fn latest(&self, mission_id: Uuid) -> Result<Option<MissionAction>> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                &format!(
                    "SELECT {ACTION_COLUMNS} FROM mission_actions
                     WHERE mission_id = $1
                     ORDER BY created_at DESC, id DESC LIMIT 1"
                ),
                &[&mission_id],
            )
            .await?;
        row.map(|r| MissionAction::from_row(&r)).transpose()
    }

    /// Actions for a mission, newest first.
    pub async fn for_mission(&self, mission_id: Uuid, limit: i64) -> Result<Vec<MissionAction>> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                &format!(
                    "SELECT {ACTION_COLUMNS} FROM mission_actions
                     WHERE mission_id = $1
                     ORDER BY created_at DESC, id DESC LIMIT $2"
                ),
                &[&mission_id, &limit],
            )
            .await?;
        rows.iter().map(MissionAction::from_row).collect()
    }

    /// Cosine k-NN over action embeddings; scores are `1 - distance`.
    pub async fn find_similar(
        &self,
        query_vector: &[f32],
        mission_id: Option<Uuid>,
        k: i64,
        min_similarity: f64,
    ) -> Result<Vec<(MissionAction, f64)>> {
        let max_distance = 1.0 - min_similarity;
        let client = self.pool.get().await?;
        let rows = client
            .query(
                &format!(
                    "SELECT {ACTION_COLUMNS},
                            1 - (action_embedding <=> $1::real[]::vector) AS similarity
                     FROM mission_actions
                     WHERE action_embedding IS NOT NULL
                       AND ($2::uuid IS NULL OR mission_id = $2)
                       AND (action_embedding <=> $1::real[]::vector) < $3
                     ORDER BY action_embedding <=> $1::real[]::vector
                     LIMIT $4"
                ),
                &[&query_vector, &mission_id, &max_distance, &k],
            )
            .await?;
        rows.iter()
            .map(|row| {
                let action = MissionAction::from_row(row)?;
                let similarity: f64 = row.try_get("similarity")?;
                Ok((action, similarity))
            })
            .collect()
    }

    /// Aggregate technique effectiveness with optional filters.
    pub async fn search_techniques(
        &self,
        success_only: bool,
        mission_type: Option<&str>,
        min_success_rate: Option<f64>,
        technique_substring: Option<&str>,
        limit: i64,
    ) -> Result<Vec<TechniqueAggregate>> {
        let pattern = technique_substring.map(|t| format!("%{t}%"));
        let client = self.pool.get().await?;
        let rows = client
            .query(
                "SELECT ma.technique,
                        COUNT(*) AS usage_count,
                        COUNT(*) FILTER (WHERE ma.success) AS success_count,
                        AVG(CASE WHEN ma.success THEN 1.0 ELSE 0.0 END)::float8 AS success_rate,
                        COUNT(DISTINCT ma.mission_id) AS mission_count
                 FROM mission_actions ma
                 JOIN missions m ON m.id = ma.mission_id
                 WHERE ($1::bool = false OR ma.success = true)
                   AND ($2::text IS NULL OR m.mission_type = $2)
                   AND ($3::text IS NULL OR ma.technique ILIKE $3)
                 GROUP BY ma.technique
                 HAVING ($4::float8 IS NULL
                         OR AVG(CASE WHEN ma.success THEN 1.0 ELSE 0.0 END)::float8 >= $4)
                 ORDER BY success_rate DESC, usage_count DESC
                 LIMIT $5",
                &[
                    &success_only,
                    &mission_type,
                    &pattern,
                    &min_success_rate,
                    &limit,
                ],
            )
            .await?;
        Ok(rows
            .iter()
            .map(|row| TechniqueAggregate {
                technique: row.get("technique"),
                usage_count: row.get("usage_count"),
                success_count: row.get("success_count"),
                success_rate: row.get::<_, Option<f64>>("success_rate").unwrap_or(0.0),
                mission_count: row.get("mission_count"),
            })
            .collect())
    }

    /// Usage statistics for an exact technique name.
    pub async fn technique_stats(&self, technique: &str) -> Result<Option<TechniqueStats>> {
        let client = self.pool.get().await?;
        let row = client
            .query_one(
                "SELECT COUNT(*) AS usage_count,
                        COUNT(*) FILTER (WHERE success) AS success_count,
                        MAX(created_at) AS last_used
                 FROM mission_actions WHERE technique = $1",
                &[&technique],
            )
            .await?;
        let usage_count: i64 = row.get("usage_count");
        if usage_count == 0 {
            return Ok(None);
        }
        let success_count: i64 = row.get("success_count");
        let last_used: Option<DateTime<Utc>> = row.get("last_used");

        let failures = client
            .query(
                "SELECT learning, COUNT(*) AS failure_count
                 FROM mission_actions
                 WHERE technique = $1 AND success = false AND learning IS NOT NULL
                 GROUP BY learning
                 ORDER BY failure_count DESC
                 LIMIT 5",
                &[&technique],
            )
            .await?;

        #[allow(clippy::cast_precision_loss)]
        let success_rate = success_count as f64 / usage_count as f64;
        Ok(Some(TechniqueStats {
            technique: technique.to_string(),
            usage_count,
            success_count,
            success_rate,
            last_used,
            failed_contexts: failures.iter().map(|r| r.get("learning")).collect(),
        }))
    }

    /// Embedding columns of one action, parsed back to floats.
    pub async fn embeddings(&self, action_id: Uuid) -> Result<Option<(Option<Vec<f32>>, Option<Vec<f32>>)>> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                "SELECT action_embedding::text AS action_vec,
                        result_embedding::text AS result_vec
                 FROM mission_actions WHERE id = $1",
                &[&action_id],
            )
            .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let action_vec: Option<String> = row.try_get("action_vec")?;
        let result_vec: Option<String> = row.try_get("result_vec")?;
        Ok(Some((
            action_vec
                .map(|v| crate::store::parse_vector_literal(&v))
                .transpose()?,
            result_vec
                .map(|v| crate::store::parse_vector_literal(&v))
                .transpose()?,
        )))
    }
}
