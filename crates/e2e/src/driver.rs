//! WebDriver server management - spawning and health checking the driver

use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::time::Duration;
use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use tracing::{info, warn};

use crate::error::{E2eError, E2eResult};

/// Browser engine to drive
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Browser {
    #[default]
    Chromium,
    Firefox,
    Webkit,
}

impl Browser {
    pub fn as_str(&self) -> &'static str {
        match self {
            Browser::Chromium => "chromium",
            Browser::Firefox => "firefox",
            Browser::Webkit => "webkit",
        }
    }

    /// WebDriver server binary that speaks for this browser
    pub fn default_driver_binary(&self) -> &'static str {
        match self {
            Browser::Chromium => "chromedriver",
            Browser::Firefox => "geckodriver",
            Browser::Webkit => "safaridriver",
        }
    }

    fn port_args(&self, port: u16) -> Vec<String> {
        match self {
            Browser::Chromium => vec![format!("--port={}", port)],
            Browser::Firefox => vec!["--port".to_string(), port.to_string()],
            Browser::Webkit => vec!["-p".to_string(), port.to_string()],
        }
    }
}

impl std::str::FromStr for Browser {
    type Err = E2eError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "chromium" | "chrome" => Ok(Browser::Chromium),
            "firefox" => Ok(Browser::Firefox),
            "webkit" | "safari" => Ok(Browser::Webkit),
            other => Err(E2eError::Config(format!("unknown browser: {}", other))),
        }
    }
}

/// Handle to a WebDriver endpoint, spawned by us or already running
pub struct DriverHandle {
    child: Option<Child>,
    url: String,
}

impl DriverHandle {
    /// Spawn the driver for `browser`, or attach to `config.url` when set
    pub async fn start(config: &DriverConfig, browser: Browser) -> E2eResult<Self> {
        if let Some(url) = &config.url {
            info!("Using WebDriver at {}", url);
            let handle = DriverHandle {
                child: None,
                url: url.trim_end_matches('/').to_string(),
            };
            handle.wait_for_ready(config.startup_timeout()).await?;
            return Ok(handle);
        }

        let port = match config.port {
            Some(port) => port,
            None => find_free_port()?,
        };
        let url = format!("http://127.0.0.1:{}", port);
        let binary = config
            .binary_path
            .clone()
            .unwrap_or_else(|| PathBuf::from(browser.default_driver_binary()));

        info!("Spawning {} on port {}", binary.display(), port);

        let child = Command::new(&binary)
            .args(browser.port_args(port))
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => {
                    E2eError::DriverNotFound(binary.display().to_string())
                }
                _ => E2eError::DriverStartup(format!("Failed to spawn {}: {}", binary.display(), e)),
            })?;

        let handle = DriverHandle {
            child: Some(child),
            url,
        };

        handle.wait_for_ready(config.startup_timeout()).await?;

        info!("WebDriver is ready at {}", handle.url);
        Ok(handle)
    }

    /// Poll `GET /status` until the driver reports ready
    async fn wait_for_ready(&self, timeout_duration: Duration) -> E2eResult<()> {
        let status_url = format!("{}/status", self.url);
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(2))
            .build()?;

        let start = std::time::Instant::now();
        let mut attempts = 0;

        while start.elapsed() < timeout_duration {
            attempts += 1;

            match client.get(&status_url).send().await {
                Ok(resp) if resp.status().is_success() => {
                    let body: serde_json::Value = resp.json().await?;
                    if is_ready(&body) {
                        return Ok(());
                    }
                }
                Ok(resp) => {
                    warn!("WebDriver status returned {}", resp.status());
                }
                Err(e) => {
                    if attempts == 1 {
                        info!("Waiting for WebDriver to start...");
                    }
                    // Connection refused is expected while the driver boots
                    if !e.is_connect() {
                        warn!("WebDriver status error: {}", e);
                    }
                }
            }

            sleep(Duration::from_millis(100)).await;
        }

        Err(E2eError::DriverHealthCheck(attempts))
    }

    /// Endpoint sessions are created against
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Stop the driver if we spawned it
    pub fn stop(&mut self) -> E2eResult<()> {
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };

        info!("Stopping WebDriver (pid: {})", child.id());

        #[cfg(unix)]
        {
            use nix::sys::signal::{kill, Signal};
            use nix::unistd::Pid;

            let pid = Pid::from_raw(child.id() as i32);
            if kill(pid, Signal::SIGTERM).is_ok() {
                std::thread::sleep(Duration::from_millis(200));
            }
        }

        let _ = child.kill();
        let _ = child.wait();

        Ok(())
    }
}

impl Drop for DriverHandle {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

/// W3C drivers answer `{"value": {"ready": true, ...}}`
fn is_ready(body: &serde_json::Value) -> bool {
    body.pointer("/value/ready")
        .and_then(|ready| ready.as_bool())
        .unwrap_or(false)
}

/// How to reach a WebDriver endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    /// Driver binary (None = the browser's default driver on PATH)
    pub binary_path: Option<PathBuf>,

    /// Already running endpoint; nothing is spawned when set
    pub url: Option<String>,

    /// Port to spawn on (None = find free port)
    pub port: Option<u16>,

    pub startup_timeout_ms: u64,
}

impl DriverConfig {
    pub fn startup_timeout(&self) -> Duration {
        Duration::from_millis(self.startup_timeout_ms)
    }
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            binary_path: None,
            url: None,
            port: None,
            startup_timeout_ms: 30_000,
        }
    }
}

/// Find a free port to use
fn find_free_port() -> E2eResult<u16> {
    use std::net::TcpListener;

    let listener = TcpListener::bind("127.0.0.1:0")?;
    Ok(listener.local_addr()?.port())
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test]
    fn test_find_free_port() {
        let port = find_free_port().unwrap();
        assert!(port > 1024);
    }

    #[test_case("chromium", Browser::Chromium)]
    #[test_case("chrome", Browser::Chromium)]
    #[test_case("firefox", Browser::Firefox)]
    #[test_case("safari", Browser::Webkit)]
    fn parses_browser_names(name: &str, expected: Browser) {
        assert_eq!(name.parse::<Browser>().unwrap(), expected);
    }

    #[test]
    fn rejects_unknown_browser() {
        assert!(matches!("lynx".parse::<Browser>(), Err(E2eError::Config(_))));
    }

    #[test]
    fn port_flags_follow_driver_conventions() {
        assert_eq!(Browser::Chromium.port_args(9515), vec!["--port=9515"]);
        assert_eq!(Browser::Firefox.port_args(4444), vec!["--port", "4444"]);
        assert_eq!(Browser::Webkit.port_args(4445), vec!["-p", "4445"]);
    }

    #[test]
    fn reads_ready_flag() {
        assert!(is_ready(&serde_json::json!({"value": {"ready": true, "message": "ok"}})));
        assert!(!is_ready(&serde_json::json!({"value": {"ready": false}})));
        assert!(!is_ready(&serde_json::json!({})));
    }

    #[tokio::test]
    async fn missing_binary_is_reported() {
        let config = DriverConfig {
            binary_path: Some(PathBuf::from("/nonexistent/chromedriver-for-tests")),
            startup_timeout_ms: 100,
            ..Default::default()
        };
        let err = DriverHandle::start(&config, Browser::Chromium).await.err().unwrap();
        assert!(matches!(err, E2eError::DriverNotFound(_)));
    }
}
