//! Local command execution

use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{info, warn};

/// Combined output is capped at 10 MiB; anything beyond is truncated.
const MAX_OUTPUT_BYTES: usize = 10 * 1024 * 1024;

const TRUNCATION_MARKER: &str = "\n[output truncated]";

/// How long to keep reading the pipes after the child is gone. Orphaned
/// grandchildren can hold the write ends open indefinitely, so the drain
/// must not wait for EOF.
const DRAIN_GRACE: Duration = Duration::from_millis(500);

/// Recognized tool names for the local fast-fail check.
///
/// Advisory only: presence here does not guarantee the tool is installed,
/// and the check is not a security boundary.
const KALI_TOOLS: &[&str] = &[
    "nmap", "netcat", "nc", "whois", "dig", "nslookup", "nikto",
    "sqlmap", "metasploit", "msfconsole", "hydra", "john",
    "aircrack-ng", "wireshark", "tcpdump", "ettercap",
    "ping", "traceroute", "curl", "wget", "host", "arp-scan",
];

/// Outcome of one local execution.
///
/// `timed_out` is a distinct sentinel: a command killed for exceeding its
/// deadline is never reported through `exit_code`, which only ever carries a
/// genuine process exit status.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub output: String,
    pub exit_code: i32,
    pub timed_out: bool,
}

#[derive(Default)]
struct CaptureBuf {
    data: Vec<u8>,
    truncated: bool,
}

/// Runs command strings as `sh -c` subprocesses with bounded output capture
pub struct LocalExecutor {
    allowed_tools: Vec<String>,
    max_output_bytes: usize,
}

impl LocalExecutor {
    pub fn new() -> Self {
        Self {
            allowed_tools: KALI_TOOLS.iter().map(|s| s.to_string()).collect(),
            max_output_bytes: MAX_OUTPUT_BYTES,
        }
    }

    /// Executor with a custom allow-list (used by tests)
    pub fn with_tools(tools: &[&str]) -> Self {
        Self {
            allowed_tools: tools.iter().map(|s| s.to_string()).collect(),
            max_output_bytes: MAX_OUTPUT_BYTES,
        }
    }

    /// The base command token: the substring before the first space
    pub fn base_command(command: &str) -> &str {
        command.split_whitespace().next().unwrap_or(command)
    }

    /// Whether the base token is on the allow-list
    pub fn is_tool_available(&self, command: &str) -> bool {
        let base = Self::base_command(command);
        self.allowed_tools.iter().any(|t| t == base)
    }

    /// Run a command string under the shell with a deadline.
    ///
    /// Never returns an error: spawn failures and timeouts fold into the
    /// result so the caller always gets a single terminal outcome.
    pub async fn run(&self, command: &str, timeout_secs: u64) -> ExecutionResult {
        info!("Executing locally: {}", command);

        let mut child = match Command::new("sh")
            .arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                return ExecutionResult {
                    output: format!("Failed to spawn command: {}", e),
                    exit_code: 1,
                    timed_out: false,
                }
            }
        };

        let cap = self.max_output_bytes;
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let stdout_buf = Arc::new(Mutex::new(CaptureBuf::default()));
        let stderr_buf = Arc::new(Mutex::new(CaptureBuf::default()));
        let mut stdout_task = tokio::spawn(read_capped(stdout, cap, stdout_buf.clone()));
        let mut stderr_task = tokio::spawn(read_capped(stderr, cap, stderr_buf.clone()));

        let (exit_code, timed_out) = match timeout(Duration::from_secs(timeout_secs), child.wait())
            .await
        {
            Ok(Ok(status)) => (status.code().unwrap_or(1), false),
            Ok(Err(e)) => {
                warn!("Failed to wait for child: {}", e);
                (1, false)
            }
            Err(_) => {
                warn!("Command exceeded {}s deadline, killing", timeout_secs);
                let _ = child.start_kill();
                let _ = child.wait().await;
                (1, true)
            }
        };

        // The readers normally end at EOF, but a backgrounded grandchild can
        // inherit the pipes and keep them open after the shell itself is
        // gone. The drain gets its own deadline so run() always returns.
        let drain = async {
            let _ = (&mut stdout_task).await;
            let _ = (&mut stderr_task).await;
        };
        if timeout(DRAIN_GRACE, drain).await.is_err() {
            stdout_task.abort();
            stderr_task.abort();
        }

        let stdout = take_capture(&stdout_buf);
        let stderr = take_capture(&stderr_buf);

        let mut output = stdout;
        if !stderr.is_empty() {
            if !output.is_empty() {
                output.push('\n');
            }
            output.push_str(&stderr);
        }
        let mut output = output.trim().to_string();
        if output.is_empty() && exit_code == 0 && !timed_out {
            output = "Command executed successfully with no output".to_string();
        }

        ExecutionResult {
            output,
            exit_code,
            timed_out,
        }
    }
}

impl Default for LocalExecutor {
    fn default() -> Self {
        Self::new()
    }
}

/// Read a stream into the shared buffer, keeping at most `cap` bytes
async fn read_capped<R: AsyncRead + Unpin>(
    reader: Option<R>,
    cap: usize,
    sink: Arc<Mutex<CaptureBuf>>,
) {
    let Some(mut reader) = reader else {
        return;
    };

    let mut chunk = [0u8; 8192];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => {
                let Ok(mut buf) = sink.lock() else { break };
                if buf.data.len() < cap {
                    let take = n.min(cap - buf.data.len());
                    buf.data.extend_from_slice(&chunk[..take]);
                    if take < n {
                        buf.truncated = true;
                    }
                } else {
                    // Keep draining so the child is not blocked on a full pipe
                    buf.truncated = true;
                }
            }
            Err(_) => break,
        }
    }
}

fn take_capture(sink: &Arc<Mutex<CaptureBuf>>) -> String {
    let Ok(buf) = sink.lock() else {
        return String::new();
    };
    let mut text = String::from_utf8_lossy(&buf.data).into_owned();
    if buf.truncated {
        text.push_str(TRUNCATION_MARKER);
    }
    text
}
