use std::path::{Path, PathBuf};

use serde_json::{Value, json};

pub const MEMORY_DB: &str = "sqlite::memory:";

/// Writes a suite file under `dir` and returns its path.
pub fn write_suite(dir: &Path, rel: &str, suite: Value) -> PathBuf {
    let path = dir.join(rel);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(&path, serde_json::to_string_pretty(&suite).unwrap()).unwrap();
    path
}

pub fn memory_suite(tests: Value) -> Value {
    json!({
        "connection": { "connectionString": MEMORY_DB },
        "tests": tests
    })
}

/// A suite covering every expectation kind, all of which pass.
pub fn people_suite() -> Value {
    memory_suite(json!([
        {
            "name": "create table",
            "sql": "CREATE TABLE people (id INTEGER PRIMARY KEY, name TEXT NOT NULL, score REAL)",
            "expect": "success"
        },
        {
            "name": "insert rows",
            "sql": "INSERT INTO people (id, name, score) VALUES (1, 'ada', 9.5), (2, 'grace', NULL)",
            "expect": "success"
        },
        {
            "name": "select rows",
            "sql": "SELECT id, name, score FROM people ORDER BY id",
            "expect": { "rows": [
                { "id": 1, "name": "ada", "score": 9.5 },
                { "id": 2, "name": "grace", "score": null }
            ]}
        },
        {
            "name": "partial columns",
            "sql": "SELECT id, name FROM people WHERE id = 2",
            "expect": { "rows": [ { "name": "grace" } ] }
        },
        {
            "name": "duplicate key",
            "sql": "INSERT INTO people (id, name) VALUES (1, 'again')",
            "expect": { "error": { "contains": "UNIQUE constraint failed" } }
        },
        {
            "name": "any error",
            "sql": "SELECT * FROM missing_table",
            "expect": { "error": null }
        },
        {
            "name": "regex error",
            "sql": "INSERT INTO people (id) VALUES (3)",
            "expect": { "error": { "regex": "NOT NULL constraint failed: people\\.name" } }
        }
    ]))
}
