use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};

use crate::config::{BackendDefaults, NotebookConfig};
use crate::launcher::{LaunchError, LaunchSpec, ProcessHandle, ProcessLauncher};

/// Program plus argument template.
///
/// `{port}` and `{logdir}` inside any argument are replaced at launch time.
#[derive(Debug, Clone)]
pub struct CommandTemplate {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandTemplate {
    pub fn render(&self, spec: &LaunchSpec) -> Vec<String> {
        let port = spec.port.to_string();
        let logdir = spec
            .logdir
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_default();

        self.args
            .iter()
            .map(|arg| arg.replace("{port}", &port).replace("{logdir}", &logdir))
            .collect()
    }
}

impl From<&BackendDefaults> for CommandTemplate {
    fn from(defaults: &BackendDefaults) -> Self {
        Self {
            program: defaults.program.clone(),
            args: defaults.args.clone(),
        }
    }
}

impl From<&NotebookConfig> for CommandTemplate {
    fn from(notebook: &NotebookConfig) -> Self {
        Self {
            program: notebook.program.clone(),
            args: notebook.args.clone(),
        }
    }
}

/// Launches processes on the local host.
pub struct LocalLauncher {
    template: CommandTemplate,
    grace: Duration,
}

impl LocalLauncher {
    pub fn new(template: CommandTemplate, grace: Duration) -> Self {
        Self { template, grace }
    }
}

#[async_trait]
impl ProcessLauncher for LocalLauncher {
    async fn launch(&self, spec: &LaunchSpec) -> Result<Box<dyn ProcessHandle>, LaunchError> {
        let args = self.template.render(spec);

        // Image and resource limits only mean something to a container platform.
        tracing::debug!(
            name = %spec.name,
            image = ?spec.resources.image,
            cpu = spec.resources.cpu,
            memory_mb = spec.resources.memory_mb,
            gpu = ?spec.resources.gpu,
            "Launching local process"
        );

        let mut child = Command::new(&self.template.program)
            .args(&args)
            .envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| LaunchError::Spawn {
                program: self.template.program.clone(),
                source,
            })?;

        if let Some(stdout) = child.stdout.take() {
            forward_output(spec.name.clone(), stdout);
        }
        if let Some(stderr) = child.stderr.take() {
            forward_output(spec.name.clone(), stderr);
        }

        let pid = child.id().unwrap_or_default();
        tracing::info!(name = %spec.name, pid, port = spec.port, "Process started");

        Ok(Box::new(LocalProcess {
            name: spec.name.clone(),
            pid,
            child,
            grace: self.grace,
        }))
    }
}

/// Relay a child's output into the log, line by line.
fn forward_output<R>(name: String, stream: R)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(stream).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            tracing::debug!(target: "boardmux::backend_output", name = %name, "{}", line);
        }
    });
}

#[derive(Debug)]
struct LocalProcess {
    name: String,
    pid: u32,
    child: Child,
    grace: Duration,
}

impl LocalProcess {
    fn io_error(&self, source: std::io::Error) -> LaunchError {
        LaunchError::Terminate {
            id: self.id(),
            source,
        }
    }
}

#[async_trait]
impl ProcessHandle for LocalProcess {
    fn id(&self) -> String {
        format!("{}[{}]", self.name, self.pid)
    }

    fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    async fn terminate(&mut self) -> Result<(), LaunchError> {
        if !self.is_alive() {
            return Ok(());
        }

        #[cfg(unix)]
        if let Ok(pid) = libc::pid_t::try_from(self.pid) {
            // SAFETY: plain kill(2) on a child we spawned and have not reaped.
            unsafe {
                libc::kill(pid, libc::SIGTERM);
            }
        }

        match tokio::time::timeout(self.grace, self.child.wait()).await {
            Ok(Ok(status)) => {
                tracing::info!(id = %self.id(), %status, "Process exited");
                Ok(())
            }
            Ok(Err(e)) => Err(self.io_error(e)),
            Err(_) => {
                tracing::warn!(id = %self.id(), grace_secs = self.grace.as_secs(), "Process ignored SIGTERM, killing");
                match self.child.kill().await {
                    Ok(()) => Ok(()),
                    Err(e) => Err(self.io_error(e)),
                }
            }
        }
    }
}
