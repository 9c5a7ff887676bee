//! Executors built from `sluice.toml`.

use crate::common::*;
use sluice::{ConfigError, EngineConfig, Executor, CONFIG_FILE_NAME};
use tempfile::TempDir;

#[tokio::test]
async fn executor_from_config_file() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("app.db");
    let path = dir.path().join(CONFIG_FILE_NAME);
    std::fs::write(
        &path,
        format!(
            "[datasource]\nurl = \"sqlite:{}\"\n\n[pool]\nmax_connections = 2\n",
            db.display()
        ),
    )
    .unwrap();

    let config = EngineConfig::from_file(&path).unwrap();
    let executor = Executor::from_config(&config).unwrap();
    assert_eq!(executor.pool_status().max_connections, 2);

    exec(&executor, "CREATE TABLE t (v TEXT)", vec![]).await;
    exec(&executor, "INSERT INTO t VALUES ('kept')", vec![]).await;
    executor.shutdown().await;

    let reopened = Executor::from_config(&config).unwrap();
    assert_eq!(query(&reopened, "SELECT v FROM t", vec![]).await.len(), 1);
}

#[test]
fn unsupported_scheme_is_a_config_error() {
    let config = EngineConfig::parse("[datasource]\nurl = \"postgres://localhost/app\"\n").unwrap();
    assert!(matches!(
        Executor::from_config(&config),
        Err(ConfigError::Datasource { .. })
    ));
}
