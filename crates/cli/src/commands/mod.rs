//! CLI subcommands.

pub mod migrate;
pub mod publish;
pub mod sign;

/// Read a non-empty environment variable, loading `.env` first.
fn env_var(key: &'static str) -> Option<String> {
    let _ = dotenvy::dotenv();
    std::env::var(key).ok().filter(|v| !v.is_empty())
}
