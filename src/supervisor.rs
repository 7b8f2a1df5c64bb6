use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProcId(u64);

/// Captured combined stdout/stderr of one subprocess. Appended to by the
/// stream reader tasks only; everyone else just reads.
#[derive(Clone, Default)]
pub struct OutputBuffer(Arc<Mutex<String>>);

impl OutputBuffer {
    fn append_line(&self, line: &str) {
        let mut text = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        text.push_str(line);
        text.push('\n');
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(needle)
    }

    /// Remainder of the first line starting with `prefix`, trimmed.
    pub fn line_with_prefix(&self, prefix: &str) -> Option<String> {
        let text = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        text.lines()
            .find_map(|line| line.strip_prefix(prefix))
            .map(|rest| rest.trim().to_string())
    }

    pub fn snapshot(&self) -> String {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

pub struct LaunchedProcess {
    pub id: ProcId,
    pub output: OutputBuffer,
}

/// Owns every subprocess the agent starts. All children are killed on
/// shutdown and additionally carry `kill_on_drop`, so no orphans survive
/// the agent.
pub struct Supervisor {
    children: Mutex<HashMap<ProcId, Child>>,
    next_id: AtomicU64,
}

impl Supervisor {
    pub fn new() -> Self {
        Self {
            children: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn launch(&self, name: &str, mut command: Command) -> std::io::Result<LaunchedProcess> {
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        let mut child = command.spawn()?;

        let output = OutputBuffer::default();
        if let Some(stdout) = child.stdout.take() {
            pump_stream(name.to_string(), stdout, output.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            pump_stream(name.to_string(), stderr, output.clone());
        }

        let id = ProcId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.children
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, child);
        debug!(process = %name, id = id.0, "subprocess launched");
        Ok(LaunchedProcess { id, output })
    }

    pub fn is_alive(&self, id: ProcId) -> bool {
        let mut children = self.children.lock().unwrap_or_else(PoisonError::into_inner);
        match children.get_mut(&id) {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }

    pub async fn terminate(&self, id: ProcId) {
        let child = self
            .children
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
        if let Some(mut child) = child {
            let _ = child.kill().await;
            debug!(id = id.0, "subprocess terminated");
        }
    }

    pub async fn shutdown(&self) {
        let children: Vec<(ProcId, Child)> = self
            .children
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .collect();
        for (id, mut child) in children {
            let _ = child.kill().await;
            debug!(id = id.0, "subprocess terminated at shutdown");
        }
    }
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new()
    }
}

/// The reader finishes on its own once the pipe closes, so shutdown never
/// has to chase it.
fn pump_stream(
    name: String,
    stream: impl AsyncRead + Unpin + Send + 'static,
    output: OutputBuffer,
) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stream).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            debug!(process = %name, line = %line, "subprocess output");
            output.append_line(&line);
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn sh(script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script);
        cmd
    }

    async fn wait_for(buffer: &OutputBuffer, needle: &str) -> bool {
        for _ in 0..100 {
            if buffer.contains(needle) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        false
    }

    #[tokio::test]
    async fn launch_captures_both_streams() {
        let supervisor = Supervisor::new();
        let proc = supervisor
            .launch("echoer", sh("echo out-line; echo err-line >&2"))
            .expect("spawn sh");

        assert!(wait_for(&proc.output, "out-line").await);
        assert!(wait_for(&proc.output, "err-line").await);
    }

    #[tokio::test]
    async fn is_alive_tracks_lifecycle() {
        let supervisor = Supervisor::new();
        let proc = supervisor.launch("sleeper", sh("sleep 30")).expect("spawn");
        assert!(supervisor.is_alive(proc.id));

        supervisor.terminate(proc.id).await;
        assert!(!supervisor.is_alive(proc.id));
    }

    #[tokio::test]
    async fn exited_process_is_not_alive() {
        let supervisor = Supervisor::new();
        let proc = supervisor.launch("oneshot", sh("true")).expect("spawn");
        // Give the child a moment to exit and be reaped.
        for _ in 0..100 {
            if !supervisor.is_alive(proc.id) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("process still reported alive after exit");
    }

    #[tokio::test]
    async fn shutdown_kills_everything() {
        let supervisor = Supervisor::new();
        let a = supervisor.launch("a", sh("sleep 30")).expect("spawn");
        let b = supervisor.launch("b", sh("sleep 30")).expect("spawn");

        supervisor.shutdown().await;
        assert!(!supervisor.is_alive(a.id));
        assert!(!supervisor.is_alive(b.id));
    }

    #[tokio::test]
    async fn missing_binary_fails_to_launch() {
        let supervisor = Supervisor::new();
        let result = supervisor.launch(
            "ghost",
            Command::new("/nonexistent/definitely-not-a-binary"),
        );
        assert!(result.is_err());
    }

    #[test]
    fn line_with_prefix_extracts_remainder() {
        let buffer = OutputBuffer::default();
        buffer.append_line("starting up");
        buffer.append_line("your url is: https://wild-cat-12.loca.lt");
        assert_eq!(
            buffer.line_with_prefix("your url is: ").as_deref(),
            Some("https://wild-cat-12.loca.lt")
        );
        assert!(buffer.line_with_prefix("no such prefix").is_none());
    }
}
