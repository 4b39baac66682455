//! HTTP request log repository

use deadpool_postgres::Pool;
use uuid::Uuid;

use crate::store::models::{HttpRequestRecord, NewHttpRequest};
use crate::Result;

const REQUEST_COLUMNS: &str = "id, mission_id, method, url, host, path, query_params, headers, \
     cookies, request_body, request_body_size, status_code, response_headers, response_body, \
     response_size, elapsed_ms, error_message, created_at";

pub struct RequestRepo {
    pool: Pool,
}

impl RequestRepo {
    pub(crate) fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// Insert one request record. The id is generated server-side, so a
    /// unique-constraint surprise cannot reach the caller.
    pub async fn insert(&self, record: NewHttpRequest) -> Result<HttpRequestRecord> {
        let client = self.pool.get().await?;
        let row = client
            .query_one(
                &format!(
                    "INSERT INTO http_requests
                         (mission_id, method, url, host, path, query_params, headers, cookies,
                          request_body, request_body_size, status_code, response_headers,
                          response_body, response_size, elapsed_ms, error_message)
                     VALUES ($1, $2, $3, $4, $5, $6, $7, $8,
                             $9, $10, $11, $12, $13, $14, $15, $16)
                     RETURNING {REQUEST_COLUMNS}"
                ),
                &[
                    &record.mission_id,
                    &record.method,
                    &record.url,
                    &record.host,
                    &record.path,
                    &record.query_params,
                    &record.headers,
                    &record.cookies,
                    &record.request_body,
                    &record.request_body_size,
                    &record.status_code,
                    &record.response_headers,
                    &record.response_body,
                    &record.response_size,
                    &record.elapsed_ms,
                    &record.error_message,
                ],
            )
            .await?;
        HttpRequestRecord::from_row(&row)
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<HttpRequestRecord>> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                &format!("SELECT {REQUEST_COLUMNS} FROM http_requests WHERE id = $1"),
                &[&id],
            )
            .await?;
        row.map(|r| HttpRequestRecord::from_row(&r)).transpose()
    }

    /// Idempotent request-to-action link; a duplicate insert is a no-op.
    pub async fn link_to_action(&self, request_id: Uuid, action_id: Uuid) -> Result<()> {
        let client = self.pool.get().await?;
        client
            .execute(
                "INSERT INTO action_requests (action_id, request_id)
                 VALUES ($1, $2) ON CONFLICT DO NOTHING",
                &[&action_id, &request_id],
            )
            .await?;
        Ok(())
    }

    /// Idempotent request-to-target link.
    pub async fn link_to_target(&self, request_id: Uuid, target_id: Uuid) -> Result<()> {
        let client = self.pool.get().await?;
        client
            .execute(
                "INSERT INTO target_requests (target_id, request_id)
                 VALUES ($1, $2) ON CONFLICT DO NOTHING",
                &[&target_id, &request_id],
            )
            .await?;
        Ok(())
    }

    /// The mission's most recent requests, whether linked directly or
    /// transitively through an action.
    pub async fn recent_for_mission(
        &self,
        mission_id: Uuid,
        count: i64,
    ) -> Result<Vec<HttpRequestRecord>> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                &format!(
                    "SELECT {REQUEST_COLUMNS} FROM http_requests hr
                     WHERE hr.mission_id = $1
                        OR EXISTS (
                            SELECT 1 FROM action_requests ar
                            JOIN mission_actions ma ON ma.id = ar.action_id
                            WHERE ar.request_id = hr.id AND ma.mission_id = $1)
                     ORDER BY hr.created_at DESC, hr.id DESC
                     LIMIT $2"
                ),
                &[&mission_id, &count],
            )
            .await?;
        rows.iter().map(HttpRequestRecord::from_row).collect()
    }

    /// Most recent requests against one host.
    pub async fn recent_for_host(&self, host: &str, count: i64) -> Result<Vec<HttpRequestRecord>> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                &format!(
                    "SELECT {REQUEST_COLUMNS} FROM http_requests
                     WHERE host = $1
                     ORDER BY created_at DESC, id DESC
                     LIMIT $2"
                ),
                &[&host, &count],
            )
            .await?;
        rows.iter().map(HttpRequestRecord::from_row).collect()
    }

    /// Ids of the actions a request is linked to.
    pub async fn linked_actions(&self, request_id: Uuid) -> Result<Vec<Uuid>> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                "SELECT action_id FROM action_requests WHERE request_id = $1",
                &[&request_id],
            )
            .await?;
        Ok(rows.iter().map(|r| r.get("action_id")).collect())
    }
}
