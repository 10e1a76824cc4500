//! End-to-end tests against a live server.
//!
//! These run only when `MANXSERVER` is set, e.g.:
//!
//! ```sh
//! MANXSERVER=localhost MANXUSER=sa MANXPASSWORD='TestPass123!' cargo test
//! ```

use manx::{AuthMethod, Client, Config};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};

struct TestServer {
    host: String,
    port: u16,
    user: String,
    password: String,
}

fn test_server() -> Option<TestServer> {
    let host = match std::env::var("MANXSERVER") {
        Ok(host) => host,
        Err(_) => {
            eprintln!("MANXSERVER not set, skipping live-server test");
            return None;
        }
    };

    Some(TestServer {
        host,
        port: std::env::var("MANXPORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(1433),
        user: std::env::var("MANXUSER").unwrap_or_else(|_| "sa".to_string()),
        password: std::env::var("MANXPASSWORD").unwrap_or_else(|_| "TestPass123!".to_string()),
    })
}

fn base_config(server: &TestServer) -> Config {
    let mut config = Config::new();
    config.host(&server.host);
    config.port(server.port);
    config.database("master");
    config.authentication(AuthMethod::sql_server(&server.user, &server.password));
    config.trust_cert();
    config
}

async fn connect(config: Config) -> manx::Result<Client<Compat<TcpStream>>> {
    let tcp = TcpStream::connect(config.get_addr())
        .await
        .map_err(manx::error::Error::from)?;
    tcp.set_nodelay(true).unwrap();
    Client::connect(config, tcp.compat_write()).await
}

#[tokio::test]
async fn connect_and_select_one() {
    let Some(server) = test_server() else { return };

    let mut client = connect(base_config(&server)).await.unwrap();

    client.execute("SELECT 1").await.unwrap();
    client.ensure_single_packet().await.unwrap();

    let payload = client.read_packet().unwrap();
    assert!(!payload.is_empty());

    client.close().await.unwrap();
}

#[tokio::test]
async fn sequential_batches_on_one_connection() {
    let Some(server) = test_server() else { return };

    let mut client = connect(base_config(&server)).await.unwrap();

    for _ in 0..3 {
        client.execute("SELECT 1").await.unwrap();
        client.ensure_single_packet().await.unwrap();
        let payload = client.read_packet().unwrap();
        assert!(!payload.is_empty());
    }
}

#[tokio::test]
async fn double_ensure_is_reported_as_misuse() {
    let Some(server) = test_server() else { return };

    let mut client = connect(base_config(&server)).await.unwrap();

    client.execute("SELECT 1").await.unwrap();
    client.ensure_single_packet().await.unwrap();

    let err = client.ensure_single_packet().await.unwrap_err();
    assert!(matches!(err, manx::error::Error::Misuse(_)));
}

#[tokio::test]
async fn wrong_password_is_an_auth_failure() {
    let Some(server) = test_server() else { return };

    let mut config = base_config(&server);
    config.authentication(AuthMethod::sql_server(&server.user, "definitely-wrong"));

    let err = connect(config).await.unwrap_err();
    assert!(matches!(err, manx::error::Error::Auth(_)));
}

#[tokio::test]
async fn no_auth_method_fails_without_credentials_on_the_wire() {
    let Some(server) = test_server() else { return };

    let mut config = base_config(&server);
    config.authentication(AuthMethod::None);

    let err = connect(config).await.unwrap_err();
    assert!(matches!(err, manx::error::Error::Auth(_)));
}
