//! Curated technique library repository

use deadpool_postgres::Pool;
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use crate::store::models::LibraryEntry;
use crate::Result;

const LIBRARY_COLUMNS: &str =
    "id, category, title, content, tags, extra_data, usage_count, last_used, created_at";

/// Library-wide statistics.
#[derive(Debug, Clone, Serialize)]
pub struct LibraryStats {
    pub entry_count: i64,
    pub by_category: Vec<(String, i64)>,
    pub top_tags: Vec<(String, i64)>,
}

pub struct LibraryRepo {
    pool: Pool,
}

impl LibraryRepo {
    pub(crate) fn new(pool: Pool) -> Self {
        Self { pool }
    }

    pub async fn add(
        &self,
        title: &str,
        content: &str,
        category: &str,
        tags: &[String],
        metadata: Option<Value>,
        embedding: Option<&[f32]>,
    ) -> Result<LibraryEntry> {
        let extra_data = metadata.unwrap_or_else(|| Value::Object(Default::default()));
        let client = self.pool.get().await?;
        let row = client
            .query_one(
                &format!(
                    "INSERT INTO technique_library
                         (category, title, content, tags, extra_data, content_embedding)
                     VALUES ($1, $2, $3, $4, $5, $6::real[]::vector)
                     RETURNING {LIBRARY_COLUMNS}"
                ),
                &[&category, &title, &content, &tags, &extra_data, &embedding],
            )
            .await?;
        LibraryEntry::from_row(&row)
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<LibraryEntry>> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                &format!("SELECT {LIBRARY_COLUMNS} FROM technique_library WHERE id = $1"),
                &[&id],
            )
            .await?;
        row.map(|r| LibraryEntry::from_row(&r)).transpose()
    }

    /// Nearest existing entry at or above the similarity threshold, if any.
    pub async fn find_duplicate(
        &self,
        embedding: &[f32],
        threshold: f64,
    ) -> Result<Option<(Uuid, String, f64)>> {
        let max_distance = 1.0 - threshold;
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                "SELECT id, title,
                        1 - (content_embedding <=> $1::real[]::vector) AS similarity
                 FROM technique_library
                 WHERE content_embedding IS NOT NULL
                   AND (content_embedding <=> $1::real[]::vector) <= $2
                 ORDER BY content_embedding <=> $1::real[]::vector
                 LIMIT 1",
                &[&embedding, &max_distance],
            )
            .await?;
        Ok(row.map(|r| (r.get("id"), r.get("title"), r.get("similarity"))))
    }

    /// Cosine k-NN over entry content; bumps usage stats on the hits.
    pub async fn search_by_text(
        &self,
        query_vector: &[f32],
        k: i64,
        min_similarity: f64,
        category: Option<&str>,
    ) -> Result<Vec<(LibraryEntry, f64)>> {
        let max_distance = 1.0 - min_similarity;
        let client = self.pool.get().await?;
        let rows = client
            .query(
                &format!(
                    "SELECT {LIBRARY_COLUMNS},
                            1 - (content_embedding <=> $1::real[]::vector) AS similarity
                     FROM technique_library
                     WHERE content_embedding IS NOT NULL
                       AND ($2::text IS NULL OR category = $2)
                       AND (content_embedding <=> $1::real[]::vector) < $3
                     ORDER BY content_embedding <=> $1::real[]::vector
                     LIMIT $4"
                ),
                &[&query_vector, &category, &max_distance, &k],
            )
            .await?;
        let results: Vec<(LibraryEntry, f64)> = rows
            .iter()
            .map(|row| {
                let entry = LibraryEntry::from_row(row)?;
                let similarity: f64 = row.try_get("similarity")?;
                Ok((entry, similarity))
            })
            .collect::<Result<_>>()?;

        let hit_ids: Vec<Uuid> = results.iter().map(|(e, _)| e.id).collect();
        if !hit_ids.is_empty() {
            client
                .execute(
                    "UPDATE technique_library
                     SET usage_count = usage_count + 1, last_used = now()
                     WHERE id = ANY($1)",
                    &[&hit_ids],
                )
                .await?;
        }
        Ok(results)
    }

    pub async fn stats(&self) -> Result<LibraryStats> {
        let client = self.pool.get().await?;
        let entry_count: i64 = client
            .query_one("SELECT COUNT(*) FROM technique_library", &[])
            .await?
            .get(0);

        let by_category = client
            .query(
                "SELECT category, COUNT(*) AS count
                 FROM technique_library GROUP BY category ORDER BY count DESC",
                &[],
            )
            .await?
            .iter()
            .map(|r| (r.get("category"), r.get("count")))
            .collect();

        let top_tags = client
            .query(
                "SELECT tag, COUNT(*) AS count
                 FROM technique_library, unnest(tags) AS tag
                 GROUP BY tag ORDER BY count DESC LIMIT 10",
                &[],
            )
            .await?
            .iter()
            .map(|r| (r.get("tag"), r.get("count")))
            .collect();

        Ok(LibraryStats {
            entry_count,
            by_category,
            top_tags,
        })
    }
}
