//! OpenSSH-backed [`RemoteHost`].
//!
//! Commands run through one-shot `ssh` invocations. Interactive
//! connections are `ssh -tt` processes inside a local PTY whose output is
//! pumped into a broadcast channel tagged with the connection id.

use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use dashmap::DashMap;
use portable_pty::{native_pty_system, Child, CommandBuilder, ExitStatus, MasterPty, PtySize};
use protocol::{
    AuthMethod, ConnectionSpec, HostFuture, MuxError, RemoteHost, Result, TerminalOutput,
    TerminalSize,
};
use tokio::sync::broadcast;

/// Buffer size for reading from the PTY.
const READ_BUFFER_SIZE: usize = 4096;

/// Channel capacity for broadcast output.
const BROADCAST_CAPACITY: usize = 1024;

/// Environment variable `sshpass -e` reads the password from.
const SSHPASS_ENV: &str = "SSHPASS";

/// How `ssh` is invoked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshOptions {
    /// The `ssh` executable.
    pub ssh_binary: PathBuf,
    /// Passed as `-o ConnectTimeout`.
    pub connect_timeout: Duration,
}

impl Default for SshOptions {
    fn default() -> Self {
        Self {
            ssh_binary: PathBuf::from("ssh"),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// Program, arguments and environment for one ssh invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    /// Executable to run.
    pub program: PathBuf,
    /// Arguments.
    pub args: Vec<String>,
    /// Extra environment.
    pub env: Vec<(String, String)>,
}

impl Invocation {
    /// Builds the invocation for `spec`.
    ///
    /// `remote_command` of `None` requests an interactive login with a
    /// forced TTY.
    pub fn build(
        options: &SshOptions,
        spec: &ConnectionSpec,
        remote_command: Option<&str>,
    ) -> Result<Self> {
        let mut args = Vec::new();
        let batch_mode = !matches!(spec.auth, AuthMethod::Password { .. });

        if remote_command.is_some() {
            args.push("-T".to_string());
        } else {
            args.push("-tt".to_string());
        }
        args.extend([
            "-o".to_string(),
            format!("BatchMode={}", if batch_mode { "yes" } else { "no" }),
            "-o".to_string(),
            format!("ConnectTimeout={}", options.connect_timeout.as_secs().max(1)),
            "-p".to_string(),
            spec.port.to_string(),
        ]);
        if let AuthMethod::Key { path } = &spec.auth {
            args.extend([
                "-i".to_string(),
                path.display().to_string(),
                "-o".to_string(),
                "IdentitiesOnly=yes".to_string(),
            ]);
        }
        args.push(format!("{}@{}", spec.user, spec.host));
        if let Some(command) = remote_command {
            args.push("--".to_string());
            args.push(command.to_string());
        }

        match &spec.auth {
            AuthMethod::Password { credential_ref } => {
                let password = std::env::var(credential_ref).map_err(|_| {
                    MuxError::transport(format!(
                        "password variable {credential_ref} is not set"
                    ))
                })?;
                let sshpass = which::which("sshpass")
                    .map_err(|_| MuxError::ToolUnavailable("sshpass".to_string()))?;
                let mut full = vec!["-e".to_string(), options.ssh_binary.display().to_string()];
                full.extend(args);
                Ok(Self {
                    program: sshpass,
                    args: full,
                    env: vec![(SSHPASS_ENV.to_string(), password)],
                })
            }
            AuthMethod::Agent | AuthMethod::Key { .. } => Ok(Self {
                program: options.ssh_binary.clone(),
                args,
                env: Vec::new(),
            }),
        }
    }
}

struct PtyConnection {
    master: Mutex<Box<dyn MasterPty + Send>>,
    writer: Mutex<Box<dyn Write + Send>>,
    child: Mutex<Box<dyn Child + Send + Sync>>,
    running: Arc<AtomicBool>,
}

fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// [`RemoteHost`] over the system `ssh` client.
pub struct SshHost {
    options: SshOptions,
    specs: DashMap<String, ConnectionSpec>,
    ptys: DashMap<String, Arc<PtyConnection>>,
    output_tx: broadcast::Sender<TerminalOutput>,
}

impl SshHost {
    /// Creates a host with no registered connections.
    pub fn new(options: SshOptions) -> Self {
        let (output_tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            options,
            specs: DashMap::new(),
            ptys: DashMap::new(),
            output_tx,
        }
    }

    /// Registers a base connection that `execute` can run commands over.
    pub fn register(&self, spec: ConnectionSpec) {
        tracing::debug!(connection_id = %spec.id, host = %spec.host, "Registered connection");
        self.specs.insert(spec.id.clone(), spec);
    }

    fn spec(&self, connection_id: &str) -> Result<ConnectionSpec> {
        self.specs
            .get(connection_id)
            .map(|s| s.value().clone())
            .ok_or_else(|| MuxError::ConnectionClosed(connection_id.to_string()))
    }

    fn pty(&self, connection_id: &str) -> Result<Arc<PtyConnection>> {
        self.ptys
            .get(connection_id)
            .map(|p| Arc::clone(p.value()))
            .filter(|p| p.running.load(Ordering::SeqCst))
            .ok_or_else(|| MuxError::ConnectionClosed(connection_id.to_string()))
    }

    async fn run(&self, connection_id: &str, command: &str) -> Result<String> {
        let spec = self.spec(connection_id)?;
        let invocation = Invocation::build(&self.options, &spec, Some(command))?;

        tracing::debug!(connection_id = %connection_id, command = %command, "Executing remote command");
        let output = tokio::process::Command::new(&invocation.program)
            .args(&invocation.args)
            .envs(invocation.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(std::process::Stdio::null())
            .kill_on_drop(true)
            .output()
            .await?;

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));

        if !output.status.success() && combined.trim().is_empty() {
            return Err(MuxError::transport(format!(
                "ssh to {} failed: {}",
                spec.host, output.status
            )));
        }
        Ok(combined)
    }

    fn spawn_pty(&self, spec: &ConnectionSpec) -> Result<String> {
        let invocation = Invocation::build(&self.options, spec, None)?;

        let pair = native_pty_system()
            .openpty(PtySize {
                rows: 24,
                cols: 80,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(MuxError::transport)?;

        let mut cmd = CommandBuilder::new(&invocation.program);
        cmd.args(&invocation.args);
        cmd.env("TERM", "xterm-256color");
        for (key, value) in &invocation.env {
            cmd.env(key, value);
        }

        let child = pair.slave.spawn_command(cmd).map_err(MuxError::transport)?;
        let writer = pair.master.take_writer().map_err(MuxError::transport)?;
        let reader = pair.master.try_clone_reader().map_err(MuxError::transport)?;

        let running = Arc::new(AtomicBool::new(true));
        let connection = Arc::new(PtyConnection {
            master: Mutex::new(pair.master),
            writer: Mutex::new(writer),
            child: Mutex::new(child),
            running: Arc::clone(&running),
        });

        // Replacing an id closes whatever was there before.
        if let Some(old) = self.ptys.insert(spec.id.clone(), connection) {
            terminate(&spec.id, old);
        }
        self.specs.insert(spec.id.clone(), spec.clone());
        start_read_loop(reader, spec.id.clone(), running, self.output_tx.clone());

        tracing::info!(connection_id = %spec.id, host = %spec.host, "Opened interactive connection");
        Ok(spec.id.clone())
    }
}

fn start_read_loop(
    mut reader: Box<dyn Read + Send>,
    connection_id: String,
    running: Arc<AtomicBool>,
    output_tx: broadcast::Sender<TerminalOutput>,
) {
    tokio::task::spawn_blocking(move || {
        let mut buffer = vec![0u8; READ_BUFFER_SIZE];
        while running.load(Ordering::SeqCst) {
            match reader.read(&mut buffer) {
                Ok(0) => {
                    tracing::info!(connection_id = %connection_id, "PTY EOF - ssh exited");
                    break;
                }
                Ok(n) => {
                    let _ = output_tx.send(TerminalOutput {
                        connection_id: connection_id.clone(),
                        data: buffer[..n].to_vec(),
                    });
                }
                Err(e) => {
                    if running.load(Ordering::SeqCst) {
                        tracing::error!(connection_id = %connection_id, error = %e, "Error reading from PTY");
                    }
                    break;
                }
            }
        }
        running.store(false, Ordering::SeqCst);
    });
}

/// Kills the ssh child and reaps it off the async runtime.
fn terminate(connection_id: &str, connection: Arc<PtyConnection>) {
    connection.running.store(false, Ordering::SeqCst);
    let connection_id = connection_id.to_string();
    tokio::task::spawn_blocking(move || {
        reap(&connection_id, &connection);
    });
}

fn reap(connection_id: &str, connection: &PtyConnection) -> Option<ExitStatus> {
    let mut child = lock(&connection.child);
    if let Err(e) = child.kill() {
        tracing::debug!(connection_id = %connection_id, error = %e, "ssh already exited");
    }
    match child.wait() {
        Ok(status) => {
            tracing::debug!(connection_id = %connection_id, ?status, "Reaped ssh process");
            Some(status)
        }
        Err(e) => {
            tracing::warn!(connection_id = %connection_id, error = %e, "Failed to reap ssh process");
            None
        }
    }
}

impl RemoteHost for SshHost {
    fn execute<'a>(&'a self, connection_id: &'a str, command: &'a str) -> HostFuture<'a, String> {
        Box::pin(self.run(connection_id, command))
    }

    fn open_connection<'a>(&'a self, spec: &'a ConnectionSpec) -> HostFuture<'a, String> {
        Box::pin(async move { self.spawn_pty(spec) })
    }

    fn close_connection<'a>(&'a self, connection_id: &'a str) -> HostFuture<'a, ()> {
        Box::pin(async move {
            if let Some((_, connection)) = self.ptys.remove(connection_id) {
                terminate(connection_id, connection);
                self.specs.remove(connection_id);
                tracing::info!(connection_id = %connection_id, "Closed interactive connection");
            }
            Ok(())
        })
    }

    fn write<'a>(&'a self, connection_id: &'a str, data: &'a [u8]) -> HostFuture<'a, ()> {
        Box::pin(async move {
            let connection = self.pty(connection_id)?;
            let mut writer = lock(&connection.writer);
            writer.write_all(data)?;
            writer.flush()?;
            Ok(())
        })
    }

    fn resize<'a>(&'a self, connection_id: &'a str, size: TerminalSize) -> HostFuture<'a, ()> {
        Box::pin(async move {
            let connection = self.pty(connection_id)?;
            let resized = lock(&connection.master)
                .resize(PtySize {
                    rows: size.rows,
                    cols: size.cols,
                    pixel_width: 0,
                    pixel_height: 0,
                })
                .map_err(MuxError::transport);
            resized
        })
    }

    fn subscribe_output(&self) -> broadcast::Receiver<TerminalOutput> {
        self.output_tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn spec(auth: AuthMethod) -> ConnectionSpec {
        ConnectionSpec {
            id: "prod".into(),
            host: "10.0.0.5".into(),
            port: 2222,
            user: "ops".into(),
            auth,
        }
    }

    #[test]
    fn test_agent_invocation() {
        let inv = Invocation::build(&SshOptions::default(), &spec(AuthMethod::Agent), Some("screen -ls"))
            .unwrap();
        assert_eq!(inv.program, PathBuf::from("ssh"));
        assert_eq!(
            inv.args,
            vec![
                "-T",
                "-o",
                "BatchMode=yes",
                "-o",
                "ConnectTimeout=10",
                "-p",
                "2222",
                "ops@10.0.0.5",
                "--",
                "screen -ls"
            ]
        );
        assert!(inv.env.is_empty());
    }

    #[test]
    fn test_interactive_key_invocation() {
        let auth = AuthMethod::Key {
            path: PathBuf::from("/keys/id_ed25519"),
        };
        let inv = Invocation::build(&SshOptions::default(), &spec(auth), None).unwrap();
        assert_eq!(inv.args[0], "-tt");
        assert!(inv.args.windows(2).any(|w| w == ["-i", "/keys/id_ed25519"]));
        assert_eq!(inv.args.last().unwrap(), "ops@10.0.0.5");
    }

    #[test]
    #[serial]
    fn test_password_requires_variable() {
        std::env::remove_var("MUXDECK_TEST_PW");
        let auth = AuthMethod::Password {
            credential_ref: "MUXDECK_TEST_PW".into(),
        };
        let err = Invocation::build(&SshOptions::default(), &spec(auth), Some("true")).unwrap_err();
        assert!(err.to_string().contains("MUXDECK_TEST_PW"));
    }

    #[test]
    #[serial]
    fn test_password_uses_sshpass_when_present() {
        std::env::set_var("MUXDECK_TEST_PW", "hunter2");
        let auth = AuthMethod::Password {
            credential_ref: "MUXDECK_TEST_PW".into(),
        };
        let result = Invocation::build(&SshOptions::default(), &spec(auth), Some("true"));
        std::env::remove_var("MUXDECK_TEST_PW");

        match result {
            Ok(inv) => {
                assert!(inv.program.ends_with("sshpass"));
                assert_eq!(inv.args[0], "-e");
                assert_eq!(inv.args[1], "ssh");
                assert!(inv.args.contains(&"BatchMode=no".to_string()));
                assert_eq!(inv.env, vec![("SSHPASS".to_string(), "hunter2".to_string())]);
            }
            Err(e) => assert!(matches!(e, MuxError::ToolUnavailable(_))),
        }
    }

    #[tokio::test]
    async fn test_unregistered_connection_is_closed() {
        let host = SshHost::new(SshOptions::default());
        let err = host.execute("nope", "true").await.unwrap_err();
        assert!(matches!(err, MuxError::ConnectionClosed(_)));
        assert!(host.write("nope", b"x").await.is_err());
        assert!(matches!(
            host.resize("nope", TerminalSize::new(24, 80)).await,
            Err(MuxError::ConnectionClosed(_))
        ));
        host.close_connection("nope").await.unwrap();
    }

    #[tokio::test]
    async fn test_terminated_process_is_reaped() {
        let options = SshOptions {
            ssh_binary: PathBuf::from("true"),
            ..SshOptions::default()
        };
        let host = SshHost::new(options);
        // Hosts without a usable PTY device cannot run this.
        let Ok(id) = host.open_connection(&spec(AuthMethod::Agent)).await else {
            return;
        };

        let (_, connection) = host.ptys.remove(&id).unwrap();
        connection.running.store(false, Ordering::SeqCst);
        let status = reap(&id, &connection);
        assert!(status.is_some());

        host.close_connection(&id).await.unwrap();
        assert!(host.ptys.is_empty());
    }
}
