use crate::auth::authorize_exec;
use crate::error::GitsError;
use crate::model::sshkey::SshKey;
use crate::serve::AppCore;
use crate::ssh::command::parse_command;
use async_trait::async_trait;
use bytes::Bytes;
use russh::keys::{PublicKey, PublicKeyBase64};
use russh::server::{Auth, Handle, Msg, Session};
use russh::{Channel, ChannelId, CryptoVec};
use std::collections::HashMap;
use std::net::SocketAddr;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// One command per channel. Client data is queued to a background task
/// that owns the child's stdin, so a slow process never stalls the session.
#[derive(Default)]
struct ChannelState {
    started: bool,
    input: Option<mpsc::UnboundedSender<Bytes>>,
}

impl ChannelState {
    fn feed(&self, data: &[u8]) {
        if let Some(input) = &self.input {
            if input.send(Bytes::copy_from_slice(data)).is_err() {
                debug!("Git stdin already closed");
            }
        }
    }

    /// Dropping the sender closes the child's stdin once the queue drains.
    fn end_input(&mut self) {
        self.input.take();
    }
}

/// Outcome of an exec request on a channel.
enum Exec {
    /// The channel already runs a command.
    Repeated,
    /// Parse, authorization or spawn failed. Nothing was started.
    Refused,
    Started(Child),
}

pub struct SshHandler {
    pub core: AppCore,
    pub addr: Option<SocketAddr>,
    /// Users the client's public key resolved to.
    pub users: Vec<String>,
    channels: HashMap<ChannelId, ChannelState>,
}

impl SshHandler {
    pub fn new(core: AppCore, addr: Option<SocketAddr>) -> Self {
        Self {
            core,
            addr,
            users: Vec::new(),
            channels: HashMap::new(),
        }
    }
}

/// Parses, authorizes and spawns an exec command. Nothing is spawned unless
/// the connection's users are granted the verb on the repository.
pub async fn spawn_exec(core: &AppCore, users: &[String], command: &str) -> Result<Child, GitsError> {
    let command = parse_command(command)?;
    debug!("Git command parsed: {} {}", command.service, command.repo);
    if !authorize_exec(core, users, &command.repo, command.service).await {
        return Err(GitsError::Unauthorized(format!(
            "{:?} have no access to `{}`",
            users, command.repo
        )));
    }
    core.repos.serve(&command.repo, command.service).await
}

async fn start_exec(core: &AppCore, users: &[String], state: &mut ChannelState, command: &str) -> Exec {
    if state.started {
        return Exec::Repeated;
    }
    state.started = true;
    let mut child = match spawn_exec(core, users, command).await {
        Ok(child) => child,
        Err(e) => {
            info!("Failed to start Git server: {}", e);
            return Exec::Refused;
        }
    };
    if let Some(stdin) = child.stdin.take() {
        let (tx, rx) = mpsc::unbounded_channel();
        copy_input(rx, stdin);
        state.input = Some(tx);
    }
    Exec::Started(child)
}

fn copy_input(mut rx: mpsc::UnboundedReceiver<Bytes>, mut stdin: ChildStdin) {
    tokio::spawn(async move {
        while let Some(chunk) = rx.recv().await {
            if let Err(e) = stdin.write_all(&chunk).await {
                debug!("Writing to git stdin: {}", e);
                break;
            }
        }
    });
}

/// Where a running command's output goes.
#[async_trait]
pub trait ChannelSink: Send + Sync {
    /// `ext` selects an extended data stream. False once the client is gone.
    async fn data(&self, ext: Option<u32>, data: &[u8]) -> bool;
    async fn exit_status(&self, status: u32);
    async fn eof(&self);
    async fn close(&self);
}

pub struct SessionChannel {
    handle: Handle,
    channel: ChannelId,
}

#[async_trait]
impl ChannelSink for SessionChannel {
    async fn data(&self, ext: Option<u32>, data: &[u8]) -> bool {
        let data = CryptoVec::from_slice(data);
        match ext {
            Some(ext) => self.handle.extended_data(self.channel, ext, data).await.is_ok(),
            None => self.handle.data(self.channel, data).await.is_ok(),
        }
    }

    async fn exit_status(&self, status: u32) {
        let _ = self.handle.exit_status_request(self.channel, status).await;
    }

    async fn eof(&self) {
        let _ = self.handle.eof(self.channel).await;
    }

    async fn close(&self) {
        let _ = self.handle.close(self.channel).await;
    }
}

async fn pump<R: AsyncRead + Unpin, S: ChannelSink>(mut reader: R, sink: &S, ext: Option<u32>) {
    let mut buf = vec![0u8; 32 * 1024];
    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                debug!("Reading git output: {}", e);
                break;
            }
        };
        if !sink.data(ext, &buf[..n]).await {
            break;
        }
    }
}

/// Streams the child's output to the channel, then reports
/// exit-status, EOF and close in that order.
async fn finish_channel<S: ChannelSink>(mut child: Child, sink: S) {
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let out = async {
        if let Some(stdout) = stdout {
            pump(stdout, &sink, None).await;
        }
    };
    let err = async {
        if let Some(stderr) = stderr {
            pump(stderr, &sink, Some(1)).await;
        }
    };
    tokio::join!(out, err);
    let status = match child.wait().await {
        Ok(status) if status.success() => {
            debug!("Git server exited successfully");
            0
        }
        Ok(status) => {
            info!("Git server failed: {}", status);
            1
        }
        Err(e) => {
            warn!("Waiting for git server: {}", e);
            1
        }
    };
    sink.exit_status(status).await;
    sink.eof().await;
    sink.close().await;
}

impl russh::server::Handler for SshHandler {
    type Error = GitsError;

    async fn auth_publickey(&mut self, user: &str, public_key: &PublicKey) -> Result<Auth, Self::Error> {
        let key = SshKey::from_wire(&public_key.public_key_bytes());
        let reject = Auth::Reject {
            proceed_with_methods: None,
            partial_success: false,
        };
        match self.core.directory.users_by_ssh_key(&key).await {
            Ok(users) if !users.is_empty() => {
                info!("SSH {} from {:?} authenticated as {:?} by `{}`", user, self.addr, users, key.fingerprint);
                self.users = users;
                Ok(Auth::Accept)
            }
            Ok(_) => {
                info!("No users matching SSH key `{}`", key.fingerprint);
                Ok(reject)
            }
            Err(e) => {
                warn!("Unable to search for users by SSH key `{}`: {}", key.fingerprint, e);
                Ok(reject)
            }
        }
    }

    async fn channel_open_session(
        &mut self,
        channel: Channel<Msg>,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        let (maintenance, message) = self.core.maintenance.check();
        if maintenance {
            info!("Rejecting SSH channel from {:?}: maintenance {}", self.addr, message.trim());
            return Ok(false);
        }
        self.channels.insert(channel.id(), ChannelState::default());
        Ok(true)
    }

    async fn env_request(
        &mut self,
        _channel: ChannelId,
        variable_name: &str,
        variable_value: &str,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        debug!("SSH client requested env setup {}={:?}", variable_name, variable_value);
        Ok(())
    }

    async fn exec_request(
        &mut self,
        channel: ChannelId,
        data: &[u8],
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        let command = String::from_utf8_lossy(data).to_string();
        debug!("Git command requested by {:?}: {:?}", self.users, command);
        let state = self.channels.entry(channel).or_default();
        match start_exec(&self.core, &self.users, state, &command).await {
            Exec::Repeated => session.channel_failure(channel)?,
            Exec::Refused => {
                session.channel_failure(channel)?;
                session.close(channel)?;
            }
            Exec::Started(child) => {
                session.channel_success(channel)?;
                let sink = SessionChannel {
                    handle: session.handle(),
                    channel,
                };
                tokio::spawn(finish_channel(child, sink));
            }
        }
        Ok(())
    }

    async fn data(&mut self, channel: ChannelId, data: &[u8], _session: &mut Session) -> Result<(), Self::Error> {
        if let Some(state) = self.channels.get(&channel) {
            state.feed(data);
        }
        Ok(())
    }

    async fn channel_eof(&mut self, channel: ChannelId, _session: &mut Session) -> Result<(), Self::Error> {
        if let Some(state) = self.channels.get_mut(&channel) {
            state.end_input();
        }
        Ok(())
    }

    async fn channel_close(&mut self, channel: ChannelId, _session: &mut Session) -> Result<(), Self::Error> {
        self.channels.remove(&channel);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extapi::stub::StubDirectory;
    use crate::model::template::{Organization, Template};
    use crate::serve::testing::{MemoryRepos, core_with};
    use crate::token::DeploymentKeys;
    use std::process::Stdio;
    use std::sync::atomic::Ordering;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tokio::process::Command;
    use tokio::time::timeout;

    const DEADLINE: Duration = Duration::from_secs(10);

    #[derive(Clone, Debug, PartialEq)]
    enum Event {
        Out(Vec<u8>),
        Err(Vec<u8>),
        Exit(u32),
        Eof,
        Close,
    }

    #[derive(Clone, Default)]
    struct Recorder {
        events: Arc<Mutex<Vec<Event>>>,
    }

    impl Recorder {
        fn events(&self) -> Vec<Event> {
            self.events.lock().unwrap().clone()
        }

        fn stdout(&self) -> Vec<u8> {
            self.events()
                .into_iter()
                .filter_map(|e| match e {
                    Event::Out(data) => Some(data),
                    _ => None,
                })
                .flatten()
                .collect()
        }

        fn stderr(&self) -> Vec<u8> {
            self.events()
                .into_iter()
                .filter_map(|e| match e {
                    Event::Err(data) => Some(data),
                    _ => None,
                })
                .flatten()
                .collect()
        }

        /// The closing events, which must come last and in this order.
        fn assert_finished_with(&self, status: u32) {
            let events = self.events();
            assert!(events.len() >= 3, "{:?}", events);
            let (data, tail) = events.split_at(events.len() - 3);
            assert_eq!(tail, [Event::Exit(status), Event::Eof, Event::Close]);
            assert!(data.iter().all(|e| matches!(e, Event::Out(_) | Event::Err(_))), "{:?}", events);
        }
    }

    #[async_trait]
    impl ChannelSink for Recorder {
        async fn data(&self, ext: Option<u32>, data: &[u8]) -> bool {
            let event = match ext {
                Some(_) => Event::Err(data.to_vec()),
                None => Event::Out(data.to_vec()),
            };
            self.events.lock().unwrap().push(event);
            true
        }

        async fn exit_status(&self, status: u32) {
            self.events.lock().unwrap().push(Event::Exit(status));
        }

        async fn eof(&self) {
            self.events.lock().unwrap().push(Event::Eof);
        }

        async fn close(&self) {
            self.events.lock().unwrap().push(Event::Close);
        }
    }

    async fn setup() -> (AppCore, Arc<MemoryRepos>) {
        let directory = Arc::new(StubDirectory::new());
        directory
            .put_org(Organization {
                id: "ACME".to_string(),
                show_source: true,
            })
            .await;
        directory
            .put_template(
                "t1",
                Template {
                    owner_user_id: "owner".to_string(),
                    teams: vec![],
                },
            )
            .await;
        let repos = Arc::new(MemoryRepos::new().with_repo("acme", "app-t1"));
        let core = core_with(repos.clone(), directory, DeploymentKeys::disabled(), Some("s3cret"));
        (core, repos)
    }

    #[tokio::test]
    async fn test_denied_exec_spawns_nothing() {
        let (core, repos) = setup().await;
        let users = vec!["stranger".to_string()];
        let result = spawn_exec(&core, &users, "git-upload-pack 'acme/app-t1'").await;
        assert!(matches!(result, Err(GitsError::Unauthorized(_))));
        assert_eq!(repos.served.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_malformed_exec_spawns_nothing() {
        let (core, repos) = setup().await;
        let users = vec!["owner".to_string()];
        assert!(spawn_exec(&core, &users, "git-upload-pack").await.is_err());
        assert!(spawn_exec(&core, &users, "sh -c 'id'").await.is_err());
        assert_eq!(repos.served.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_granted_exec_reaches_store() {
        let (core, repos) = setup().await;
        let users = vec!["nobody".to_string(), "owner".to_string()];
        let _ = spawn_exec(&core, &users, "git-receive-pack '/acme/app-t1.git'").await;
        assert_eq!(repos.served.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_denied_exec_is_refused_without_process() {
        let (core, repos) = setup().await;
        let users = vec!["stranger".to_string()];
        let mut state = ChannelState::default();
        let exec = start_exec(&core, &users, &mut state, "git-upload-pack 'acme/app-t1'").await;
        assert!(matches!(exec, Exec::Refused));
        assert!(state.input.is_none());

        let again = start_exec(&core, &users, &mut state, "git-upload-pack 'acme/app-t1'").await;
        assert!(matches!(again, Exec::Repeated));
        assert_eq!(repos.served.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_stdin_reaches_process_until_eof() {
        let (core, repos) = setup().await;
        let users = vec!["owner".to_string()];
        let mut state = ChannelState::default();
        let Exec::Started(child) = start_exec(&core, &users, &mut state, "git-receive-pack 'acme/app-t1'").await else {
            panic!("exec was not started");
        };
        state.feed(b"0009done\n");
        state.feed(b"0000");
        state.end_input();

        let recorder = Recorder::default();
        timeout(DEADLINE, finish_channel(child, recorder.clone())).await.unwrap();
        assert_eq!(recorder.stdout(), b"0009done\n0000");
        recorder.assert_finished_with(0);

        let again = start_exec(&core, &users, &mut state, "git-receive-pack 'acme/app-t1'").await;
        assert!(matches!(again, Exec::Repeated));
        assert_eq!(repos.served.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_process_reports_status_one() {
        let child = Command::new("sh")
            .args(["-c", "echo refused >&2; exit 3"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .unwrap();
        let recorder = Recorder::default();
        timeout(DEADLINE, finish_channel(child, recorder.clone())).await.unwrap();
        assert_eq!(recorder.stderr(), b"refused\n");
        assert!(recorder.stdout().is_empty());
        recorder.assert_finished_with(1);
    }
}
