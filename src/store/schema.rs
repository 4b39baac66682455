//! Database schema definitions

/// SQL to create all tables and indexes.
///
/// Vector columns are fixed at 384 dimensions; the unique endpoint index
/// folds an absent port to -1 so NULL ports still collide.
pub const SCHEMA: &str = r#"
-- Core entities
CREATE TABLE IF NOT EXISTS targets (
    id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
    host VARCHAR(255) NOT NULL,
    port INTEGER,
    protocol VARCHAR(10) NOT NULL,
    title VARCHAR(255),
    status VARCHAR(20) NOT NULL DEFAULT 'active',
    risk_level VARCHAR(10) NOT NULL DEFAULT 'medium',
    extra_data JSONB NOT NULL DEFAULT '{}'::jsonb,
    current_context_id UUID,
    discovery_date TIMESTAMPTZ NOT NULL DEFAULT now(),
    last_activity TIMESTAMPTZ NOT NULL DEFAULT now(),
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE UNIQUE INDEX IF NOT EXISTS uq_target_endpoint
    ON targets (host, COALESCE(port, -1), protocol);
CREATE INDEX IF NOT EXISTS ix_target_status_risk ON targets (status, risk_level);

CREATE TABLE IF NOT EXISTS target_contexts (
    id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
    target_id UUID NOT NULL REFERENCES targets(id) ON DELETE CASCADE,
    version INTEGER NOT NULL,
    user_context TEXT,
    agent_context TEXT,
    parent_version_id UUID REFERENCES target_contexts(id),
    change_type VARCHAR(20) NOT NULL,
    change_summary TEXT,
    created_by VARCHAR(20) NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    CONSTRAINT uq_target_context_version UNIQUE (target_id, version)
);

CREATE INDEX IF NOT EXISTS ix_target_context_target_created
    ON target_contexts (target_id, created_at DESC);

ALTER TABLE targets DROP CONSTRAINT IF EXISTS fk_targets_current_context;
ALTER TABLE targets ADD CONSTRAINT fk_targets_current_context
    FOREIGN KEY (current_context_id) REFERENCES target_contexts(id) ON DELETE SET NULL;

CREATE TABLE IF NOT EXISTS missions (
    id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
    name VARCHAR(255) NOT NULL,
    goal TEXT NOT NULL,
    hypothesis TEXT,
    mission_type VARCHAR(50),
    scope JSONB,
    status VARCHAR(20) NOT NULL DEFAULT 'active',
    extra_data JSONB NOT NULL DEFAULT '{}'::jsonb,
    goal_embedding vector(384),
    hypothesis_embedding vector(384),
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    completed_at TIMESTAMPTZ
);

CREATE INDEX IF NOT EXISTS ix_mission_status_created ON missions (status, created_at);

CREATE TABLE IF NOT EXISTS mission_actions (
    id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
    mission_id UUID NOT NULL REFERENCES missions(id) ON DELETE CASCADE,
    technique VARCHAR(255) NOT NULL,
    hypothesis TEXT,
    result TEXT NOT NULL,
    success BOOLEAN,
    learning TEXT,
    action_embedding vector(384),
    result_embedding vector(384),
    created_at TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE INDEX IF NOT EXISTS ix_mission_action_mission_created
    ON mission_actions (mission_id, created_at);
CREATE INDEX IF NOT EXISTS ix_mission_action_technique ON mission_actions (technique);

CREATE TABLE IF NOT EXISTS http_requests (
    id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
    mission_id UUID REFERENCES missions(id) ON DELETE SET NULL,
    method VARCHAR(10) NOT NULL,
    url TEXT NOT NULL,
    host VARCHAR(255) NOT NULL,
    path TEXT NOT NULL,
    query_params JSONB,
    headers JSONB NOT NULL DEFAULT '{}'::jsonb,
    cookies JSONB,
    request_body TEXT,
    request_body_size BIGINT,
    status_code INTEGER,
    response_headers JSONB,
    response_body TEXT,
    response_size BIGINT,
    elapsed_ms DOUBLE PRECISION,
    error_message TEXT,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE INDEX IF NOT EXISTS ix_http_request_host_created
    ON http_requests (host, created_at);
CREATE INDEX IF NOT EXISTS ix_http_request_mission ON http_requests (mission_id);

CREATE TABLE IF NOT EXISTS technique_library (
    id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
    category VARCHAR(50) NOT NULL,
    title VARCHAR(255) NOT NULL,
    content TEXT NOT NULL,
    tags TEXT[] NOT NULL DEFAULT '{}',
    extra_data JSONB NOT NULL DEFAULT '{}'::jsonb,
    content_embedding vector(384),
    usage_count BIGINT NOT NULL DEFAULT 0,
    last_used TIMESTAMPTZ,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE INDEX IF NOT EXISTS ix_technique_library_category ON technique_library (category);

-- Association tables
CREATE TABLE IF NOT EXISTS target_requests (
    target_id UUID NOT NULL REFERENCES targets(id) ON DELETE CASCADE,
    request_id UUID NOT NULL REFERENCES http_requests(id) ON DELETE CASCADE,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    PRIMARY KEY (target_id, request_id)
);

CREATE TABLE IF NOT EXISTS action_requests (
    action_id UUID NOT NULL REFERENCES mission_actions(id) ON DELETE CASCADE,
    request_id UUID NOT NULL REFERENCES http_requests(id) ON DELETE CASCADE,
    PRIMARY KEY (action_id, request_id)
);

CREATE TABLE IF NOT EXISTS mission_targets (
    mission_id UUID NOT NULL REFERENCES missions(id) ON DELETE CASCADE,
    target_id UUID NOT NULL REFERENCES targets(id) ON DELETE CASCADE,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    PRIMARY KEY (mission_id, target_id)
);

-- Approximate-NN indexes for cosine search
CREATE INDEX IF NOT EXISTS ix_mission_goal_embedding
    ON missions USING ivfflat (goal_embedding vector_cosine_ops) WITH (lists = 100);
CREATE INDEX IF NOT EXISTS ix_mission_hypothesis_embedding
    ON missions USING ivfflat (hypothesis_embedding vector_cosine_ops) WITH (lists = 100);
CREATE INDEX IF NOT EXISTS ix_action_embedding
    ON mission_actions USING ivfflat (action_embedding vector_cosine_ops) WITH (lists = 100);
CREATE INDEX IF NOT EXISTS ix_action_result_embedding
    ON mission_actions USING ivfflat (result_embedding vector_cosine_ops) WITH (lists = 100);
CREATE INDEX IF NOT EXISTS ix_library_content_embedding
    ON technique_library USING ivfflat (content_embedding vector_cosine_ops) WITH (lists = 100);
"#;
