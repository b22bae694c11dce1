use std::time::Duration;

use eadsync_db::Database;
use sqlx::postgres::PgPoolOptions;
use testcontainers::core::{ContainerPort, WaitFor};
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, GenericImage, ImageExt};

const CONNECT_ATTEMPTS: u32 = 30;

/// Start PostgreSQL in a container and return a migrated database.
///
/// Keep the returned `ContainerAsync` alive for the whole test; dropping it
/// stops the container.
pub async fn setup_test_db() -> (Database, ContainerAsync<GenericImage>) {
    let container = GenericImage::new("postgres", "16")
        .with_exposed_port(ContainerPort::Tcp(5432))
        .with_wait_for(WaitFor::message_on_stderr(
            "database system is ready to accept connections",
        ))
        .with_env_var("POSTGRES_PASSWORD", "postgres")
        .with_env_var("POSTGRES_DB", "eadsync_test")
        .start()
        .await
        .expect("Failed to start PostgreSQL container");

    let host = container.get_host().await.expect("Failed to get host");
    let port = container
        .get_host_port_ipv4(5432)
        .await
        .expect("Failed to get port");
    let url = format!("postgresql://postgres:postgres@{host}:{port}/eadsync_test");

    // The server restarts once after init, so early connects can fail.
    let mut attempt = 0;
    let pool = loop {
        match PgPoolOptions::new().max_connections(2).connect(&url).await {
            Ok(pool) => break pool,
            Err(e) if attempt + 1 >= CONNECT_ATTEMPTS => {
                panic!("Failed to connect after {CONNECT_ATTEMPTS} attempts: {e}")
            }
            Err(_) => {
                attempt += 1;
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }
    };

    let db = Database::from_pool(pool);
    db.migrate().await.expect("Failed to run migrations");
    (db, container)
}
