//! Canonical migration list, applied in order by the server at startup.

/// A named migration: `(name, sql)`.
pub type Migration = (&'static str, &'static str);

pub const MIGRATIONS: &[Migration] = &[(
    "0001_schema",
    include_str!("../../migrations/0001_schema.sql"),
)];
