use std::env;

#[derive(Clone)]
pub struct ServerConfig {
    pub listen_addr: String,
    pub database_url: String,
    pub admin_username: String,
    pub admin_password: String,
    pub token_secret: String,
    /// Root directory of the backup store. Backups are disabled (503)
    /// when unset.
    pub backup_dir: Option<String>,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, String> {
        let listen_addr =
            env::var("LISTEN_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string());

        let database_url = env::var("DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://marknest.db?mode=rwc".to_string());

        let admin_username =
            env::var("ADMIN_USERNAME").map_err(|_| "ADMIN_USERNAME must be set".to_string())?;

        let admin_password =
            env::var("ADMIN_PASSWORD").map_err(|_| "ADMIN_PASSWORD must be set".to_string())?;

        let token_secret =
            env::var("TOKEN_SECRET").map_err(|_| "TOKEN_SECRET must be set".to_string())?;

        let backup_dir = env::var("BACKUP_DIR").ok().filter(|v| !v.is_empty());

        Ok(ServerConfig {
            listen_addr,
            database_url,
            admin_username,
            admin_password,
            token_secret,
            backup_dir,
        })
    }
}
