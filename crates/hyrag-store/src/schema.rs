//! Database schema definitions.

/// Schema for the sparse (BM25) index.
pub const SPARSE_SCHEMA: &str = r#"
-- Index-level metadata (analyzer, corpus statistics, fingerprint)
CREATE TABLE IF NOT EXISTS index_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

-- Stored payload envelopes, one per document
CREATE TABLE IF NOT EXISTS documents (
    ordinal INTEGER PRIMARY KEY,
    id TEXT NOT NULL UNIQUE,
    raw TEXT NOT NULL,
    length INTEGER NOT NULL
);

-- Document frequency per term
CREATE TABLE IF NOT EXISTS terms (
    term TEXT PRIMARY KEY,
    df INTEGER NOT NULL
) WITHOUT ROWID;

-- Inverted index
CREATE TABLE IF NOT EXISTS postings (
    term TEXT NOT NULL,
    ordinal INTEGER NOT NULL REFERENCES documents(ordinal),
    tf INTEGER NOT NULL,
    PRIMARY KEY (term, ordinal)
) WITHOUT ROWID;
"#;

/// Schema for the dense (flat vector) index.
pub const DENSE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS index_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

-- Vectors are little-endian f32 blobs; raw holds the payload envelope
CREATE TABLE IF NOT EXISTS vectors (
    ordinal INTEGER PRIMARY KEY,
    id TEXT NOT NULL UNIQUE,
    embedding BLOB NOT NULL,
    raw TEXT NOT NULL
);
"#;

/// Schema version for migrations.
pub const SCHEMA_VERSION: u32 = 1;
