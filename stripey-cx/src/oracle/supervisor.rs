//! Oracle process supervision
//!
//! [`OracleSupervisor`] owns the CollateX child process and gates queries on
//! its readiness. A restart first closes the gate, then waits for every
//! in-flight call to finish before tearing the process down.

use super::{smoke_test_request, AlignmentOracle, AlignmentRequest, AlignmentResponse, OracleError, OracleTransport};
use std::path::PathBuf;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::process::{Child, Command};
use tokio::sync::{watch, Mutex};
use tracing::{debug, error, info, warn};

const PORT_PROBE_ATTEMPTS: u32 = 10;
const PORT_PROBE_INTERVAL: Duration = Duration::from_secs(1);
const TERMINATE_WAIT: Duration = Duration::from_secs(10);

/// Lifecycle of the external oracle process
#[async_trait::async_trait]
pub trait OracleProcess: Send {
    /// Launch the process; returns once it is expected to accept requests
    async fn launch(&mut self) -> Result<(), OracleError>;

    fn is_running(&mut self) -> bool;

    async fn terminate(&mut self) -> Result<(), OracleError>;
}

// ============================================================================
// CollateX child process
// ============================================================================

/// `java -jar collatex-tools.jar --http` as a child process
///
/// The child is killed when this value is dropped, so an aborted run never
/// leaves the service behind.
pub struct CollatexProcess {
    java: String,
    jar_path: PathBuf,
    port: u16,
    max_parallel: usize,
    startup_grace: Duration,
    probe_attempts: u32,
    probe_interval: Duration,
    child: Option<Child>,
}

impl CollatexProcess {
    pub fn new(
        java: impl Into<String>,
        jar_path: impl Into<PathBuf>,
        port: u16,
        max_parallel: usize,
        startup_grace: Duration,
    ) -> Self {
        Self {
            java: java.into(),
            jar_path: jar_path.into(),
            port,
            max_parallel,
            startup_grace,
            probe_attempts: PORT_PROBE_ATTEMPTS,
            probe_interval: PORT_PROBE_INTERVAL,
            child: None,
        }
    }

    fn args(&self) -> Vec<String> {
        vec![
            "-jar".to_string(),
            self.jar_path.display().to_string(),
            "--http".to_string(),
            "--max-parallel-collations".to_string(),
            self.max_parallel.to_string(),
            "-p".to_string(),
            self.port.to_string(),
        ]
    }

    /// Wait for a previous service to release the port
    async fn wait_for_free_port(&self) -> Result<(), OracleError> {
        for _ in 0..self.probe_attempts {
            if TcpStream::connect(("127.0.0.1", self.port)).await.is_err() {
                return Ok(());
            }
            warn!(port = self.port, "Something is already listening on the oracle port");
            tokio::time::sleep(self.probe_interval).await;
        }
        Err(OracleError::PortInUse(self.port))
    }
}

#[async_trait::async_trait]
impl OracleProcess for CollatexProcess {
    async fn launch(&mut self) -> Result<(), OracleError> {
        if self.is_running() {
            return Ok(());
        }

        self.wait_for_free_port().await?;

        let args = self.args();
        info!(port = self.port, "Starting CollateX service");
        debug!("Launching: {} {}", self.java, args.join(" "));

        let child = Command::new(&self.java)
            .args(&args)
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| OracleError::SpawnFailed(e.to_string()))?;
        self.child = Some(child);

        tokio::time::sleep(self.startup_grace).await;

        if self.is_running() {
            debug!("CollateX process is running");
            Ok(())
        } else {
            error!("CollateX process exited during start-up");
            self.child = None;
            Err(OracleError::ExitedEarly)
        }
    }

    fn is_running(&mut self) -> bool {
        match self.child.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }

    async fn terminate(&mut self) -> Result<(), OracleError> {
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };

        info!(pid = ?child.id(), "Terminating CollateX service");
        if let Err(e) = child.start_kill() {
            // Already exited
            debug!("Kill failed: {}", e);
        }
        match tokio::time::timeout(TERMINATE_WAIT, child.wait()).await {
            Ok(Ok(status)) => debug!(%status, "CollateX stopped"),
            Ok(Err(e)) => warn!("Failed to reap CollateX process: {}", e),
            Err(_) => warn!("CollateX did not exit within {:?}", TERMINATE_WAIT),
        }
        Ok(())
    }
}

// ============================================================================
// Supervisor
// ============================================================================

/// Decrements the active-call counter when the call ends, however it ends
struct ActiveCall<'a>(&'a watch::Sender<usize>);

impl<'a> ActiveCall<'a> {
    fn enter(counter: &'a watch::Sender<usize>) -> Self {
        counter.send_modify(|n| *n += 1);
        Self(counter)
    }
}

impl Drop for ActiveCall<'_> {
    fn drop(&mut self) {
        self.0.send_modify(|n| *n = n.saturating_sub(1));
    }
}

/// Query gate
///
/// Queries wait while `Starting` and fail fast once `Down`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Gate {
    Starting,
    Ready,
    Down,
}

/// Supervised oracle: process lifecycle plus a readiness gate for queries
pub struct OracleSupervisor {
    process: Mutex<Box<dyn OracleProcess>>,
    transport: Box<dyn OracleTransport>,
    gate: watch::Sender<Gate>,
    active: watch::Sender<usize>,
}

impl OracleSupervisor {
    pub fn new(process: Box<dyn OracleProcess>, transport: Box<dyn OracleTransport>) -> Self {
        let (gate, _) = watch::channel(Gate::Starting);
        let (active, _) = watch::channel(0);
        Self {
            process: Mutex::new(process),
            transport,
            gate,
            active,
        }
    }

    pub fn is_ready(&self) -> bool {
        *self.gate.borrow() == Gate::Ready
    }

    pub fn active_calls(&self) -> usize {
        *self.active.borrow()
    }

    /// Send a query; `force` bypasses the readiness gate (used by the smoke test)
    pub async fn query(&self, request: &AlignmentRequest, force: bool) -> Result<AlignmentResponse, OracleError> {
        let _call = loop {
            if !force {
                let mut gate = self.gate.subscribe();
                let state = *gate
                    .wait_for(|g| *g != Gate::Starting)
                    .await
                    .map_err(|e| OracleError::Unavailable(e.to_string()))?;
                if state == Gate::Down {
                    return Err(OracleError::Unavailable("CollateX is not running".to_string()));
                }
            }
            let call = ActiveCall::enter(&self.active);
            // A restart may have closed the gate between the wait and the increment
            if force || self.is_ready() {
                break call;
            }
        };

        self.transport.collate(request).await
    }

    async fn smoke_test(&self) -> Result<(), OracleError> {
        self.query(&smoke_test_request(), true).await.map(|_| ())
    }

    /// Launch if needed, smoke-test, and relaunch once on failure
    async fn launch_checked(&self, process: &mut Box<dyn OracleProcess>) -> Result<(), OracleError> {
        let result = self.launch_and_test(process).await;
        self.gate
            .send_replace(if result.is_ok() { Gate::Ready } else { Gate::Down });
        result
    }

    async fn launch_and_test(&self, process: &mut Box<dyn OracleProcess>) -> Result<(), OracleError> {
        if !process.is_running() {
            process.launch().await?;
        }

        if let Err(e) = self.smoke_test().await {
            warn!(error = %e, "CollateX failed the smoke test - restarting it");
            process.terminate().await?;
            process.launch().await?;
            if let Err(e) = self.smoke_test().await {
                error!(error = %e, "CollateX failed the smoke test after a restart");
                return Err(OracleError::SmokeTestFailed(e.to_string()));
            }
        }

        info!("CollateX is ready");
        Ok(())
    }
}

#[async_trait::async_trait]
impl AlignmentOracle for OracleSupervisor {
    async fn start(&self) -> Result<(), OracleError> {
        let mut process = self.process.lock().await;
        self.launch_checked(&mut process).await
    }

    async fn health_check(&self) -> Result<(), OracleError> {
        self.smoke_test().await
    }

    async fn restart(&self) -> Result<(), OracleError> {
        debug!("Restart requested, waiting for in-flight calls");
        self.gate.send_replace(Gate::Starting);

        let mut process = self.process.lock().await;
        let mut active = self.active.subscribe();
        active
            .wait_for(|n| *n == 0)
            .await
            .map(|_| ())
            .map_err(|e| OracleError::Unavailable(e.to_string()))?;

        info!("Restarting CollateX");
        if let Err(e) = process.terminate().await {
            self.gate.send_replace(Gate::Down);
            return Err(e);
        }
        self.launch_checked(&mut process).await
    }

    async fn stop(&self) -> Result<(), OracleError> {
        info!("Stopping CollateX");
        self.gate.send_replace(Gate::Down);
        let mut process = self.process.lock().await;
        process.terminate().await
    }

    async fn align(&self, request: &AlignmentRequest) -> Result<AlignmentResponse, OracleError> {
        self.query(request, false).await
    }
}
