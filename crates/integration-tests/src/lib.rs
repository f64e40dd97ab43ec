use std::net::SocketAddr;
use std::sync::Once;
use std::time::Duration;

use config::Config;
use reqwest::Method;
use server::ServeConfig;
use tokio::net::{TcpListener, TcpStream};

static INIT: Once = Once::new();

fn init_crypto_provider() {
    INIT.call_once(|| {
        rustls::crypto::aws_lc_rs::default_provider()
            .install_default()
            .expect("Failed to install default crypto provider");
    });
}

/// Test client for making HTTP requests to the test server
pub struct TestClient {
    base_url: String,
    client: reqwest::Client,
    client_header: String,
}

impl TestClient {
    /// Create a new test client for the given base URL
    pub fn new(base_url: String, client_header: String) -> Self {
        Self {
            base_url,
            client: reqwest::Client::new(),
            client_header,
        }
    }

    /// Create a new test client that accepts invalid TLS certificates
    pub fn new_with_tls(base_url: String, client_header: String) -> Self {
        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(true)
            .build()
            .expect("Failed to create client with invalid cert acceptance");

        Self {
            base_url,
            client,
            client_header,
        }
    }

    /// Send an anonymous GET request to the given path
    pub async fn get(&self, path: &str) -> reqwest::Response {
        self.request(Method::GET, path, None).await
    }

    /// Send a GET request on behalf of the named client
    pub async fn get_as(&self, client: &str, path: &str) -> reqwest::Response {
        self.request(Method::GET, path, Some(client)).await
    }

    /// Send a request with any method, optionally identifying the client
    pub async fn request(&self, method: Method, path: &str, client: Option<&str>) -> reqwest::Response {
        let mut request = self.client.request(method, format!("{}{}", self.base_url, path));

        if let Some(client) = client {
            request = request.header(self.client_header.as_str(), client);
        }

        request.send().await.unwrap()
    }

    /// Send `count` GET requests for the client and return their status codes
    pub async fn statuses(&self, client: &str, path: &str, count: usize) -> Vec<u16> {
        let mut statuses = Vec::with_capacity(count);

        for _ in 0..count {
            statuses.push(self.get_as(client, path).await.status().as_u16());
        }

        statuses
    }
}

/// Test server that manages the lifecycle of a server instance
pub struct TestServer {
    pub client: TestClient,
    pub address: SocketAddr,
    _handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    /// Start a new test server with the given TOML configuration
    pub async fn start(config_toml: &str) -> Self {
        init_crypto_provider();

        let config: Config = toml::from_str(config_toml).unwrap();

        // Find an available port
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();

        let has_tls = config.server.tls.is_some();
        let client_header = config.server.client_identification.http_header.clone();

        let serve_config = ServeConfig {
            listen_address: address,
            config,
        };

        let (tx, mut rx) = tokio::sync::oneshot::channel();
        let handle = tokio::spawn(async move {
            // Drop the listener so the server can bind to the address
            drop(listener);

            let _ = tx.send(server::serve(serve_config).await);
        });

        // Wait until the socket accepts connections. Probing over HTTP would count
        // against the quotas under test.
        let mut retries = 50;
        while retries > 0 {
            if let Ok(Err(e)) = rx.try_recv() {
                eprintln!("Server failed to start: {e}");
                std::process::exit(1);
            }

            if TcpStream::connect(address).await.is_ok() {
                break;
            }

            retries -= 1;
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        let protocol = if has_tls { "https" } else { "http" };
        let base_url = format!("{protocol}://{address}");

        let client = if has_tls {
            TestClient::new_with_tls(base_url, client_header)
        } else {
            TestClient::new(base_url, client_header)
        };

        TestServer {
            client,
            address,
            _handle: handle,
        }
    }
}
