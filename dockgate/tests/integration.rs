use std::io::Write;
use std::path::PathBuf;
use std::process::{Child, Command};
use std::time::Duration;

const HTTP_ADDR: &str = "127.0.0.1:39080";
const HTTPS_ADDR: &str = "127.0.0.1:39443";
const METRICS_ADDR: &str = "127.0.0.1:39090";

struct TestServer {
    process: Child,
    config_path: PathBuf,
}

impl TestServer {
    fn new(config_body: &str) -> Self {
        let mut config_path = std::env::temp_dir();
        config_path.push(format!("dockgate-test-{}.json", uuid::Uuid::new_v4()));

        let mut file = std::fs::File::create(&config_path).unwrap();
        file.write_all(config_body.as_bytes()).unwrap();

        // Keep the certificate cache away from the user's real one
        let mut cache_path = std::env::temp_dir();
        cache_path.push(format!("dockgate-cache-{}.lecache", uuid::Uuid::new_v4()));

        let bin_path = env!("CARGO_BIN_EXE_dockgate");

        let process = Command::new(bin_path)
            .arg("--configfile")
            .arg(config_path.to_str().unwrap())
            .env("DOCKGATE_LECACHE", cache_path.to_str().unwrap())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .spawn()
            .expect("Failed to start server");

        Self {
            process,
            config_path,
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        let _ = self.process.kill();
        let _ = std::fs::remove_file(&self.config_path);
    }
}

async fn wait_for_server(url: &str, server: &mut TestServer) -> bool {
    let client = reqwest::Client::new();
    for _ in 0..50 {
        if let Ok(Some(status)) = server.process.try_wait() {
            eprintln!("Server exited unexpectedly with status: {}", status);
            if let Some(mut stderr) = server.process.stderr.take() {
                use std::io::Read;
                let mut output = String::new();
                let _ = stderr.read_to_string(&mut output);
                eprintln!("stderr:\n{}", output);
            }
            return false;
        }

        if client.get(url).send().await.is_ok() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    false
}

fn test_config() -> String {
    serde_json::json!({
        "domains": {
            "force.example.com": {"slug": "web", "force_ssl": true}
        },
        "generic": "",
        "docker": {"hosts": {}, "port": 2375},
        "listenHTTP": HTTP_ADDR,
        "listenHTTPS": HTTPS_ADDR,
        "listenMetrics": METRICS_ADDR
    })
    .to_string()
}

#[tokio::test]
async fn proxy_end_to_end() {
    let mut server = TestServer::new(&test_config());

    let base = format!("http://{}", HTTP_ADDR);
    assert!(
        wait_for_server(&base, &mut server).await,
        "server did not come up"
    );
    assert!(
        wait_for_server(&format!("http://{}/metrics", METRICS_ADDR), &mut server).await,
        "metrics listener did not come up"
    );

    let client = reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .unwrap();

    // Unknown host, no generic suffix: nothing to route to
    let response = client.get(format!("{}/foo", base)).send().await.unwrap();
    assert_eq!(response.status(), 503);
    assert_eq!(
        response.text().await.unwrap(),
        "This host is currently not available"
    );

    // Stray ACME probes are answered locally, never forwarded
    let response = client
        .get(format!("{}/.well-known/acme-challenge/unknown", base))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);
    assert_eq!(response.text().await.unwrap(), "Invalid acme-challenge");

    // Plaintext request to a force-TLS domain redirects before any
    // backend lookup
    let response = client
        .get(format!("{}/bar", base))
        .header("Host", "force.example.com")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 301);
    assert_eq!(
        response.headers().get("location").unwrap(),
        "https://force.example.com/bar"
    );

    // CONNECT is never tunnelled
    {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        let mut stream = tokio::net::TcpStream::connect(HTTP_ADDR).await.unwrap();
        stream
            .write_all(b"CONNECT backend.example.com:443 HTTP/1.1\r\nHost: backend.example.com\r\n\r\n")
            .await
            .unwrap();
        let mut buf = vec![0u8; 1024];
        let n = stream.read(&mut buf).await.unwrap();
        let head = String::from_utf8_lossy(&buf[..n]).to_string();
        assert!(
            head.starts_with("HTTP/1.1 405"),
            "CONNECT was not rejected: {}",
            head
        );
    }

    // The requests above are visible on the metrics listener
    let response = client
        .get(format!("http://{}/metrics", METRICS_ADDR))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body = response.text().await.unwrap();
    assert!(body.contains("http_requests_total"));
    assert!(body.contains("handler=\"dockerproxy\""));
    assert!(body.contains("handler=\"acme\""));
}
