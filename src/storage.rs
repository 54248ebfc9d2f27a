use crate::config::Config;
use std::fs;
use std::io;
use std::path::Path;

impl Config {
    pub fn create_storage_dirs(&self) -> io::Result<()> {
        // We only need to create the database's parent directories,
        // as SQLite3 will otherwise manage that for us.
        let database_path = &self.storage.database_path;
        if database_path == ":memory:" {
            return Ok(());
        }

        let database_path = Path::new(database_path);
        if !database_path.exists() {
            if let Some(parents) = database_path.parent() {
                fs::create_dir_all(parents)?;
            }
        }

        // TLS material is provisioned externally, but warn early if it has gone missing.
        let tls_paths = [&self.service.tls_cert_path, &self.service.tls_key_path];
        for path in tls_paths.into_iter().flatten() {
            if !Path::new(path).exists() {
                tracing::warn!(%path, "configured TLS file does not exist");
            }
        }

        Ok(())
    }
}
