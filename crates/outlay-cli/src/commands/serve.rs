//! Web server command

use std::path::Path;

use anyhow::Result;
use outlay_server::ServerConfig;

use super::open_db;

pub async fn cmd_serve(
    db_path: &Path,
    host: &str,
    port: u16,
    no_auth: bool,
    no_encrypt: bool,
) -> Result<()> {
    let db = open_db(db_path, no_encrypt)?;

    let api_keys = ServerConfig::api_keys_from_env();
    if no_auth {
        println!("⚠️  Authentication DISABLED (--no-auth). Do not expose this server to a network.");
    } else if api_keys.is_empty() {
        println!("⚠️  OUTLAY_API_KEYS is not set: every API request will be rejected.");
        println!("   Set OUTLAY_API_KEYS=key1,key2 or use --no-auth for local development.");
    }

    let config = ServerConfig {
        require_auth: !no_auth,
        api_keys,
        ..ServerConfig::default()
    };

    println!("🚀 Starting Outlay server on http://{}:{}", host, port);
    outlay_server::serve_with_config(db, host, port, config).await
}
