use anyhow::Result;
use sqlx::PgPool;

const STATEMENTS: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS suppliers (
        id BIGSERIAL PRIMARY KEY,
        name VARCHAR(255) NOT NULL,
        code VARCHAR(50),
        status VARCHAR(20) NOT NULL DEFAULT 'active',
        lead_time_days INTEGER,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS parts (
        id BIGSERIAL PRIMARY KEY,
        part_number VARCHAR(100) NOT NULL,
        name VARCHAR(255) NOT NULL,
        description TEXT,
        category VARCHAR(100),
        unit_of_measure VARCHAR(20) NOT NULL DEFAULT 'EA',
        description_embedding JSONB
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS supplier_parts (
        id BIGSERIAL PRIMARY KEY,
        supplier_id BIGINT NOT NULL REFERENCES suppliers(id),
        part_id BIGINT NOT NULL REFERENCES parts(id),
        supplier_part_number VARCHAR(100),
        unit_price NUMERIC(14, 4),
        lead_time_days INTEGER,
        min_order_qty INTEGER NOT NULL DEFAULT 1,
        is_preferred BOOLEAN NOT NULL DEFAULT FALSE
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS boms (
        id BIGSERIAL PRIMARY KEY,
        name VARCHAR(255) NOT NULL,
        processing_status VARCHAR(30) NOT NULL DEFAULT 'parsing',
        processing_progress DOUBLE PRECISION NOT NULL DEFAULT 0,
        processing_step TEXT,
        processing_error TEXT,
        total_items INTEGER NOT NULL DEFAULT 0,
        matched_items INTEGER NOT NULL DEFAULT 0,
        total_cost NUMERIC(16, 4) NOT NULL DEFAULT 0,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS procurement_runs (
        run_id UUID PRIMARY KEY,
        bom_id BIGINT NOT NULL REFERENCES boms(id),
        bom_name VARCHAR(255) NOT NULL,
        stage VARCHAR(30) NOT NULL,
        progress DOUBLE PRECISION NOT NULL,
        step TEXT NOT NULL,
        error TEXT,
        summary JSONB NOT NULL DEFAULT '{}',
        started_at TIMESTAMPTZ NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS agent_tasks (
        run_id UUID PRIMARY KEY REFERENCES procurement_runs(run_id),
        status VARCHAR(20) NOT NULL,
        progress DOUBLE PRECISION NOT NULL,
        current_step TEXT NOT NULL,
        current_agent VARCHAR(30) NOT NULL,
        error_message TEXT,
        output JSONB,
        started_at TIMESTAMPTZ,
        completed_at TIMESTAMPTZ
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS bom_items (
        run_id UUID NOT NULL REFERENCES procurement_runs(run_id),
        line_number INTEGER NOT NULL,
        part_number_raw VARCHAR(255),
        description_raw TEXT,
        quantity NUMERIC(14, 4) NOT NULL,
        unit_of_measure VARCHAR(20) NOT NULL,
        status VARCHAR(20) NOT NULL,
        match_result JSONB NOT NULL DEFAULT '{}',
        review_reason TEXT,
        PRIMARY KEY (run_id, line_number)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS approval_requests (
        id UUID PRIMARY KEY,
        run_id UUID NOT NULL REFERENCES procurement_runs(run_id),
        bom_id BIGINT NOT NULL,
        line_number INTEGER NOT NULL,
        title TEXT NOT NULL,
        description TEXT NOT NULL,
        reason TEXT NOT NULL,
        confidence DOUBLE PRECISION NOT NULL,
        alternatives JSONB NOT NULL DEFAULT '[]',
        status VARCHAR(20) NOT NULL,
        selected_option INTEGER,
        review_notes TEXT,
        created_at TIMESTAMPTZ NOT NULL,
        reviewed_at TIMESTAMPTZ,
        UNIQUE (run_id, line_number)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS purchase_orders (
        id UUID PRIMARY KEY,
        po_number VARCHAR(50) NOT NULL UNIQUE,
        run_id UUID NOT NULL REFERENCES procurement_runs(run_id),
        bom_id BIGINT NOT NULL,
        source_bom_name VARCHAR(255) NOT NULL,
        supplier_id BIGINT NOT NULL,
        supplier_name VARCHAR(255) NOT NULL,
        status VARCHAR(30) NOT NULL,
        auto_generated BOOLEAN NOT NULL DEFAULT TRUE,
        lines JSONB NOT NULL DEFAULT '[]',
        subtotal NUMERIC(16, 4) NOT NULL,
        total NUMERIC(16, 4) NOT NULL,
        requires_approval BOOLEAN NOT NULL,
        price_warnings JSONB NOT NULL DEFAULT '[]',
        created_at TIMESTAMPTZ NOT NULL,
        UNIQUE (run_id, supplier_id)
    )
    "#,
    "CREATE SEQUENCE IF NOT EXISTS po_number_seq",
    "CREATE INDEX IF NOT EXISTS idx_supplier_parts_part ON supplier_parts(part_id)",
    "CREATE INDEX IF NOT EXISTS idx_approval_requests_run ON approval_requests(run_id)",
];

pub async fn run_postgres_migrations(pool: &PgPool) -> Result<()> {
    tracing::info!("Running PostgreSQL migrations");

    for statement in STATEMENTS {
        sqlx::query(statement).execute(pool).await?;
    }

    tracing::info!(statements = STATEMENTS.len(), "PostgreSQL migrations completed");
    Ok(())
}
