//! Target repository

use deadpool_postgres::Pool;
use serde_json::Value;
use uuid::Uuid;

use crate::store::models::{Protocol, RiskLevel, Target, TargetStatus, TargetSummary};
use crate::{Error, Result};

/// Defaults applied when upsert has to create the row.
#[derive(Debug, Clone)]
pub struct TargetDefaults {
    pub status: TargetStatus,
    pub risk_level: RiskLevel,
    pub title: Option<String>,
}

impl Default for TargetDefaults {
    fn default() -> Self {
        Self {
            status: TargetStatus::Active,
            risk_level: RiskLevel::Medium,
            title: None,
        }
    }
}

const TARGET_COLUMNS: &str = "id, host, port, protocol, title, status, risk_level, extra_data, \
     current_context_id, discovery_date, last_activity, created_at, updated_at";

pub struct TargetRepo {
    pool: Pool,
}

impl TargetRepo {
    pub(crate) fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// Atomic get-or-create on the endpoint triple.
    ///
    /// The host is lowercased and a port equal to the scheme default is
    /// normalised to absent before the triple is looked up, so
    /// `https://x:443` and `https://x` land on the same row. On conflict the
    /// existing row is returned unchanged.
    pub async fn upsert(
        &self,
        host: &str,
        port: Option<u16>,
        protocol: Protocol,
        defaults: TargetDefaults,
    ) -> Result<(Target, bool)> {
        let host = host.to_lowercase();
        let port = normalize_port(port, protocol);

        let client = self.pool.get().await?;
        let inserted = client
            .query_opt(
                &format!(
                    "INSERT INTO targets (host, port, protocol, title, status, risk_level)
                     VALUES ($1, $2, $3, $4, $5, $6)
                     ON CONFLICT (host, COALESCE(port, -1), protocol) DO NOTHING
                     RETURNING {TARGET_COLUMNS}"
                ),
                &[
                    &host,
                    &port,
                    &protocol.as_str(),
                    &defaults.title,
                    &defaults.status.as_str(),
                    &defaults.risk_level.as_str(),
                ],
            )
            .await?;

        if let Some(row) = inserted {
            return Ok((Target::from_row(&row)?, true));
        }

        let existing = client
            .query_one(
                &format!(
                    "SELECT {TARGET_COLUMNS} FROM targets
                     WHERE host = $1 AND COALESCE(port, -1) = COALESCE($2, -1) AND protocol = $3"
                ),
                &[&host, &port, &protocol.as_str()],
            )
            .await?;
        Ok((Target::from_row(&existing)?, false))
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<Target>> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                &format!("SELECT {TARGET_COLUMNS} FROM targets WHERE id = $1"),
                &[&id],
            )
            .await?;
        row.map(|r| Target::from_row(&r)).transpose()
    }

    pub async fn get_by_endpoint(
        &self,
        host: &str,
        port: Option<u16>,
        protocol: Protocol,
    ) -> Result<Option<Target>> {
        let host = host.to_lowercase();
        let port = normalize_port(port, protocol);
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                &format!(
                    "SELECT {TARGET_COLUMNS} FROM targets
                     WHERE host = $1 AND COALESCE(port, -1) = COALESCE($2, -1) AND protocol = $3"
                ),
                &[&host, &port, &protocol.as_str()],
            )
            .await?;
        row.map(|r| Target::from_row(&r)).transpose()
    }

    /// Update mutable fields; absent arguments leave the column untouched.
    pub async fn update_fields(
        &self,
        id: Uuid,
        status: Option<TargetStatus>,
        risk_level: Option<RiskLevel>,
        title: Option<String>,
        extra_data: Option<Value>,
    ) -> Result<Target> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                &format!(
                    "UPDATE targets SET
                         status = COALESCE($2, status),
                         risk_level = COALESCE($3, risk_level),
                         title = COALESCE($4, title),
                         extra_data = COALESCE($5, extra_data),
                         updated_at = now()
                     WHERE id = $1
                     RETURNING {TARGET_COLUMNS}"
                ),
                &[
                    &id,
                    &status.map(|s| s.as_str()),
                    &risk_level.map(|r| r.as_str()),
                    &title,
                    &extra_data,
                ],
            )
            .await?;
        match row {
            Some(row) => Target::from_row(&row),
            None => Err(Error::NotFound(format!("target {id}"))),
        }
    }

    /// Case-insensitive substring search over host and title.
    pub async fn search(
        &self,
        query: Option<&str>,
        status: Option<TargetStatus>,
        risk_level: Option<RiskLevel>,
        protocol: Option<Protocol>,
        limit: i64,
    ) -> Result<Vec<Target>> {
        let pattern = query.map(|q| format!("%{}%", q.to_lowercase()));
        let client = self.pool.get().await?;
        let rows = client
            .query(
                &format!(
                    "SELECT {TARGET_COLUMNS} FROM targets
                     WHERE ($1::text IS NULL OR host ILIKE $1 OR title ILIKE $1)
                       AND ($2::text IS NULL OR status = $2)
                       AND ($3::text IS NULL OR risk_level = $3)
                       AND ($4::text IS NULL OR protocol = $4)
                     ORDER BY last_activity DESC
                     LIMIT $5"
                ),
                &[
                    &pattern,
                    &status.map(|s| s.as_str()),
                    &risk_level.map(|r| r.as_str()),
                    &protocol.map(|p| p.as_str()),
                    &limit,
                ],
            )
            .await?;
        rows.iter().map(Target::from_row).collect()
    }

    /// Target plus request count and an excerpt of the current context.
    pub async fn summary(&self, id: Uuid) -> Result<Option<TargetSummary>> {
        let Some(target) = self.get(id).await? else {
            return Ok(None);
        };
        let client = self.pool.get().await?;
        let request_count: i64 = client
            .query_one(
                "SELECT COUNT(*) FROM target_requests WHERE target_id = $1",
                &[&id],
            )
            .await?
            .get(0);

        let context_excerpt = match target.current_context_id {
            Some(context_id) => client
                .query_opt(
                    "SELECT COALESCE(agent_context, user_context, '') AS excerpt
                     FROM target_contexts WHERE id = $1",
                    &[&context_id],
                )
                .await?
                .map(|row| {
                    let text: String = row.get("excerpt");
                    excerpt(&text, 400)
                }),
            None => None,
        };

        Ok(Some(TargetSummary {
            target,
            request_count,
            context_excerpt,
        }))
    }

    pub async fn bump_activity(&self, id: Uuid) -> Result<()> {
        let client = self.pool.get().await?;
        client
            .execute(
                "UPDATE targets SET last_activity = now() WHERE id = $1",
                &[&id],
            )
            .await?;
        Ok(())
    }

    /// Align `last_activity` with a specific request timestamp.
    pub async fn set_activity(&self, id: Uuid, at: chrono::DateTime<chrono::Utc>) -> Result<()> {
        let client = self.pool.get().await?;
        client
            .execute(
                "UPDATE targets SET last_activity = $2
                 WHERE id = $1 AND last_activity < $2",
                &[&id, &at],
            )
            .await?;
        Ok(())
    }

    /// Delete a target; contexts and link rows cascade, request rows remain.
    pub async fn delete(&self, id: Uuid) -> Result<bool> {
        let client = self.pool.get().await?;
        let affected = client
            .execute("DELETE FROM targets WHERE id = $1", &[&id])
            .await?;
        Ok(affected > 0)
    }
}

fn normalize_port(port: Option<u16>, protocol: Protocol) -> Option<i32> {
    match port {
        Some(p) if p == protocol.default_port() => None,
        Some(p) => Some(i32::from(p)),
        None => None,
    }
}

fn excerpt(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let mut out: String = text.chars().take(max_chars).collect();
        out.push('…');
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_port_is_normalised_away() {
        assert_eq!(normalize_port(Some(443), Protocol::Https), None);
        assert_eq!(normalize_port(Some(80), Protocol::Http), None);
        assert_eq!(normalize_port(Some(8443), Protocol::Https), Some(8443));
        assert_eq!(normalize_port(None, Protocol::Http), None);
    }

    #[test]
    fn test_excerpt_truncates_on_char_boundary() {
        let text = "é".repeat(500);
        let cut = excerpt(&text, 400);
        assert_eq!(cut.chars().count(), 401);
        assert!(cut.ends_with('…'));
        assert_eq!(excerpt("short", 400), "short");
    }
}
