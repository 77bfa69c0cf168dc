//! Local command execution

use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::warn;

/// Safety-net deadline; the server enforces its own remote timeout and
/// discards results that arrive after it.
const EXEC_TIMEOUT: Duration = Duration::from_secs(300);

const MAX_OUTPUT_BYTES: usize = 10 * 1024 * 1024;
const TRUNCATION_MARKER: &str = "\n... [output truncated]";

/// How long to keep reading the pipes once the child is gone. Orphaned
/// grandchildren can hold the write ends open indefinitely.
const DRAIN_GRACE: Duration = Duration::from_millis(500);

#[derive(Default)]
struct CaptureBuf {
    data: Vec<u8>,
    truncated: bool,
}

/// Run a shell command, returning combined output and an exit code.
pub async fn run(command: &str) -> (String, i32) {
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
            warn!("Failed to spawn command: {}", e);
            return (format!("Failed to execute command: {}", e), 1);
        }
    };

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let stdout_buf = Arc::new(Mutex::new(CaptureBuf::default()));
    let stderr_buf = Arc::new(Mutex::new(CaptureBuf::default()));
    let mut stdout_task = tokio::spawn(read_capped(stdout, stdout_buf.clone()));
    let mut stderr_task = tokio::spawn(read_capped(stderr, stderr_buf.clone()));

    let status = match timeout(EXEC_TIMEOUT, child.wait()).await {
        Ok(Ok(status)) => Some(status),
        Ok(Err(e)) => {
            warn!("Failed to wait on command: {}", e);
            None
        }
        Err(_) => {
            let _ = child.start_kill();
            let _ = child.wait().await;
            stdout_task.abort();
            stderr_task.abort();
            return (
                format!("Command execution timeout ({}s)", EXEC_TIMEOUT.as_secs()),
                124,
            );
        }
    };

    // Bound the drain: a backgrounded grandchild can keep the pipes open
    // after the shell itself exited
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
    if output.is_empty() {
        output = "Command executed successfully with no output".to_string();
    }

    let exit_code = status.and_then(|s| s.code()).unwrap_or(1);
    (output, exit_code)
}

async fn read_capped<R>(reader: Option<R>, sink: Arc<Mutex<CaptureBuf>>)
where
    R: tokio::io::AsyncRead + Unpin,
{
    let Some(mut reader) = reader else {
        return;
    };

    let mut buf = [0u8; 8192];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                let Ok(mut capture) = sink.lock() else { break };
                if capture.data.len() < MAX_OUTPUT_BYTES {
                    let room = MAX_OUTPUT_BYTES - capture.data.len();
                    capture.data.extend_from_slice(&buf[..n.min(room)]);
                    if n > room {
                        capture.truncated = true;
                    }
                } else {
                    // Keep draining so the child never blocks on a full pipe
                    capture.truncated = true;
                }
            }
            Err(_) => break,
        }
    }
}

fn take_capture(sink: &Arc<Mutex<CaptureBuf>>) -> String {
    let Ok(capture) = sink.lock() else {
        return String::new();
    };
    let mut text = String::from_utf8_lossy(&capture.data).into_owned();
    if capture.truncated {
        text.push_str(TRUNCATION_MARKER);
    }
    text
}
