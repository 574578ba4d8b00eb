//! Configuration management for the docindex CLI.
//!
//! Settings come from a TOML file, with environment overrides for the
//! document root and the server bind address.

mod app;


pub use app::AppConfig;

pub const DOCINDEX_CONFIG_PATH: &str = ".docindex/config.toml";
pub const DEFAULT_BIND: &str = "127.0.0.1:4780";
pub const ROOT_ENV: &str = "DOCINDEX_ROOT";
pub const BIND_ENV: &str = "DOCINDEX_BIND";

pub const SAMPLE_CONFIG: &str = r#"# docindex configuration file

# Directory whose documents are indexed
root = "/srv/notes"

# Address the HTTP server listens on
bind = "127.0.0.1:4780"

# File extensions picked up by a rebuild (without the leading dot)
extensions = ["md", "txt"]

# Write logs to a daily rotating file in this directory (optional)
# log_dir = "/var/log/docindex"

[rebuild]
# Publish progress at least every N processed documents
progress_every = 10
# ...or once this much time has passed since the last update
progress_interval = "250ms"
# Events buffered per observer before older progress is superseded
subscriber_capacity = 32
"#;
