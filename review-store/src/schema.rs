//! SQL DDL and forward migrations.
//!
//! A single `schema_meta` row records the version. On open the store applies
//! any migrations newer than the stored version; a database written by a
//! newer build is refused.

/// Current schema version written by this build.
pub const SCHEMA_VERSION: i64 = 1;

/// Version 1: full initial schema.
pub const SCHEMA_V1: &str = "
    CREATE TABLE IF NOT EXISTS schema_meta (
        version        INTEGER NOT NULL
    ) STRICT;

    CREATE TABLE IF NOT EXISTS repos (
        repo_id                  TEXT    PRIMARY KEY,
        name                     TEXT    NOT NULL,
        clone_url                TEXT    NOT NULL,
        branch                   TEXT    NOT NULL DEFAULT 'main',
        platform                 TEXT    NOT NULL
                                         CHECK(platform IN ('gitlab','gitea','github')),
        auth                     TEXT    NOT NULL DEFAULT '{\"type\":\"none\"}',
        trigger_mode             TEXT    NOT NULL DEFAULT 'polling'
                                         CHECK(trigger_mode IN ('webhook','polling','both')),
        polling_interval_minutes INTEGER NOT NULL DEFAULT 5,
        effective_from           INTEGER,
        poll_commits             INTEGER NOT NULL DEFAULT 1,
        poll_mrs                 INTEGER NOT NULL DEFAULT 0,
        enable_comment           INTEGER NOT NULL DEFAULT 1,
        enabled                  INTEGER NOT NULL DEFAULT 1,
        local_path               TEXT,
        webhook_secret           TEXT,
        api_base                 TEXT,
        clone_status             TEXT    NOT NULL DEFAULT 'absent'
                                         CHECK(clone_status IN ('absent','cloning','cloned','failed')),
        last_check_time          INTEGER
    ) STRICT;

    CREATE TABLE IF NOT EXISTS tasks (
        task_id                  TEXT    PRIMARY KEY,
        repo_id                  TEXT    NOT NULL,
        project_name             TEXT    NOT NULL DEFAULT '',
        strategy                 TEXT    NOT NULL
                                         CHECK(strategy IN ('commit','merge_request')),
        revision_ref             TEXT    NOT NULL,
        base_ref                 TEXT,
        branch                   TEXT    NOT NULL DEFAULT '',
        author_name              TEXT,
        author_email             TEXT,
        status                   TEXT    NOT NULL DEFAULT 'pending'
                                         CHECK(status IN ('pending','processing','completed','failed','cancelled')),
        batch_total              INTEGER NOT NULL DEFAULT 0,
        batch_current            INTEGER NOT NULL DEFAULT 0,
        batch_results            TEXT    NOT NULL DEFAULT '[]',
        issues_count             INTEGER NOT NULL DEFAULT 0,
        critical_count           INTEGER NOT NULL DEFAULT 0,
        warning_count            INTEGER NOT NULL DEFAULT 0,
        suggestion_count         INTEGER NOT NULL DEFAULT 0,
        quality_score            INTEGER,
        files_reviewed           TEXT    NOT NULL DEFAULT '[]',
        report                   TEXT,
        summary                  TEXT,
        error_message            TEXT,
        poll_kind                TEXT    CHECK(poll_kind IN ('commit','mr')),
        marker_prev              TEXT,
        created_at               INTEGER NOT NULL,
        started_at               INTEGER,
        finished_at              INTEGER,
        processing_time_seconds  REAL
    ) STRICT;

    CREATE INDEX IF NOT EXISTS idx_tasks_repo    ON tasks(repo_id);
    CREATE INDEX IF NOT EXISTS idx_tasks_status  ON tasks(status);
    CREATE INDEX IF NOT EXISTS idx_tasks_created ON tasks(created_at);
    CREATE UNIQUE INDEX IF NOT EXISTS idx_tasks_active
        ON tasks(repo_id, strategy, revision_ref)
        WHERE status IN ('pending','processing');

    CREATE TABLE IF NOT EXISTS issues (
        id             INTEGER PRIMARY KEY AUTOINCREMENT,
        task_id        TEXT    NOT NULL REFERENCES tasks(task_id) ON DELETE CASCADE,
        ord            INTEGER NOT NULL,
        severity       TEXT    NOT NULL
                               CHECK(severity IN ('critical','warning','suggestion','info')),
        title          TEXT    NOT NULL,
        description    TEXT    NOT NULL DEFAULT '',
        file_path      TEXT,
        line_number    INTEGER,
        code_snippet   TEXT,
        suggestion     TEXT,
        category       TEXT
    ) STRICT;

    CREATE INDEX IF NOT EXISTS idx_issues_task ON issues(task_id);
    CREATE INDEX IF NOT EXISTS idx_issues_file ON issues(file_path);

    CREATE TABLE IF NOT EXISTS revision_markers (
        repo_id        TEXT    NOT NULL,
        branch         TEXT    NOT NULL,
        kind           TEXT    NOT NULL CHECK(kind IN ('commit','mr')),
        last_seen_id   TEXT    NOT NULL,
        last_seen_at   INTEGER NOT NULL,
        PRIMARY KEY (repo_id, branch, kind)
    ) STRICT;

    CREATE TABLE IF NOT EXISTS settings (
        key            TEXT    PRIMARY KEY,
        value          TEXT    NOT NULL DEFAULT '',
        category       TEXT    NOT NULL DEFAULT 'other',
        description    TEXT    NOT NULL DEFAULT '',
        updated_at     INTEGER NOT NULL
    ) STRICT;
";
