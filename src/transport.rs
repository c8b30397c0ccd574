//! Network transport
//!
//! Thin seam over TCP liveness checks, SSH command execution and SNMP
//! gets. The prober only sees the `Transport`/`CliSession` traits, so
//! everything above this module is testable without touching the
//! network.

use crate::config::Credential;
use async_trait::async_trait;
use csnmp::{ObjectIdentifier, ObjectValue, Snmp2cClient};
use russh::client::{self, Handle};
use russh::{ChannelMsg, Disconnect};
use russh_keys::key;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

/// Transport-level failure, mapped to a probe outcome by the caller
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("authentication failed")]
    AuthFailed,
    #[error("timed out")]
    Timeout,
    #[error("connection refused")]
    Refused,
    #[error("network error: {0}")]
    Network(String),
    #[error("protocol error: {0}")]
    Protocol(String),
}

/// Authenticated CLI session against one device
#[async_trait]
pub trait CliSession: Send {
    /// Run one command and return its combined output
    async fn exec(&mut self, command: &str) -> Result<String, SessionError>;

    /// Tear the session down; errors here are not interesting
    async fn close(&mut self);
}

/// Raw network operations the prober needs
#[async_trait]
pub trait Transport: Send + Sync {
    /// TCP connect to `ip:port` within `deadline`; the error says why
    /// the host did not answer
    async fn tcp_probe(&self, ip: &str, port: u16, deadline: Duration)
        -> Result<(), SessionError>;

    /// Open an authenticated SSH session
    async fn ssh_session(
        &self,
        ip: &str,
        credential: &Credential,
        deadline: Duration,
    ) -> Result<Box<dyn CliSession>, SessionError>;

    /// SNMP v2c GET of one OID, rendered to a display string
    async fn snmp_get(
        &self,
        ip: &str,
        community: &str,
        oid: &str,
        deadline: Duration,
    ) -> Result<String, SessionError>;
}

/// Production transport over tokio TCP, russh and csnmp
pub struct NetTransport {
    ssh_config: Arc<client::Config>,
}

impl NetTransport {
    pub fn new() -> Self {
        Self {
            ssh_config: Arc::new(client::Config::default()),
        }
    }
}

impl Default for NetTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for NetTransport {
    async fn tcp_probe(
        &self,
        ip: &str,
        port: u16,
        deadline: Duration,
    ) -> Result<(), SessionError> {
        match timeout(deadline, TcpStream::connect((ip, port))).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::ConnectionRefused => {
                Err(SessionError::Refused)
            }
            Ok(Err(e)) => Err(SessionError::Network(e.to_string())),
            Err(_) => Err(SessionError::Timeout),
        }
    }

    async fn ssh_session(
        &self,
        ip: &str,
        credential: &Credential,
        deadline: Duration,
    ) -> Result<Box<dyn CliSession>, SessionError> {
        let connect = client::connect(self.ssh_config.clone(), (ip, 22), AcceptAllKeys);
        let mut handle = match timeout(deadline, connect).await {
            Ok(Ok(handle)) => handle,
            Ok(Err(e)) => return Err(map_ssh_error(e)),
            Err(_) => return Err(SessionError::Timeout),
        };

        let authed = timeout(
            deadline,
            handle.authenticate_password(&credential.username, &credential.password),
        )
        .await
        .map_err(|_| SessionError::Timeout)?
        .map_err(map_ssh_error)?;

        if !authed {
            debug!(ip = %ip, user = %credential.username, "ssh password rejected");
            return Err(SessionError::AuthFailed);
        }

        Ok(Box::new(SshCliSession {
            handle,
            deadline,
        }))
    }

    async fn snmp_get(
        &self,
        ip: &str,
        community: &str,
        oid: &str,
        deadline: Duration,
    ) -> Result<String, SessionError> {
        let target: SocketAddr = format!("{}:161", ip)
            .parse()
            .map_err(|_| SessionError::Network(format!("invalid address {}", ip)))?;
        let oid: ObjectIdentifier = oid
            .parse()
            .map_err(|_| SessionError::Protocol(format!("invalid OID {}", oid)))?;

        let client = Snmp2cClient::new(
            target,
            community.as_bytes().to_vec(),
            Some(SocketAddr::from(([0, 0, 0, 0], 0))),
            Some(deadline),
        )
        .await
        .map_err(|e| SessionError::Network(e.to_string()))?;

        match timeout(deadline, client.get(oid)).await {
            Ok(Ok(value)) => Ok(render_value(&value)),
            Ok(Err(e)) => Err(SessionError::Network(e.to_string())),
            Err(_) => Err(SessionError::Timeout),
        }
    }
}

fn render_value(value: &ObjectValue) -> String {
    match value {
        ObjectValue::Integer(i) => i.to_string(),
        ObjectValue::String(bytes) => String::from_utf8_lossy(bytes).to_string(),
        ObjectValue::IpAddress(addr) => addr.to_string(),
        ObjectValue::Counter32(c) => c.to_string(),
        ObjectValue::Unsigned32(u) => u.to_string(),
        ObjectValue::TimeTicks(t) => t.to_string(),
        ObjectValue::Counter64(c) => c.to_string(),
        other => format!("{:?}", other),
    }
}

fn map_ssh_error(e: russh::Error) -> SessionError {
    match e {
        russh::Error::IO(ref io) if io.kind() == std::io::ErrorKind::ConnectionRefused => {
            SessionError::Refused
        }
        russh::Error::IO(ref io) if io.kind() == std::io::ErrorKind::TimedOut => {
            SessionError::Timeout
        }
        other => SessionError::Network(other.to_string()),
    }
}

/// OLTs ship self-signed host keys that change across firmware resets,
/// so host key pinning is not practical here
struct AcceptAllKeys;

#[async_trait]
impl client::Handler for AcceptAllKeys {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &key::PublicKey,
    ) -> Result<bool, Self::Error> {
        Ok(true)
    }
}

struct SshCliSession {
    handle: Handle<AcceptAllKeys>,
    deadline: Duration,
}

#[async_trait]
impl CliSession for SshCliSession {
    async fn exec(&mut self, command: &str) -> Result<String, SessionError> {
        let run = async {
            let mut channel = self
                .handle
                .channel_open_session()
                .await
                .map_err(map_ssh_error)?;
            channel
                .exec(true, command)
                .await
                .map_err(map_ssh_error)?;

            let mut output = String::new();
            while let Some(msg) = channel.wait().await {
                match msg {
                    ChannelMsg::Data { ref data } => {
                        output.push_str(&String::from_utf8_lossy(data));
                    }
                    ChannelMsg::ExtendedData { ref data, .. } => {
                        output.push_str(&String::from_utf8_lossy(data));
                    }
                    _ => {}
                }
            }
            Ok(output)
        };

        timeout(self.deadline, run)
            .await
            .map_err(|_| SessionError::Timeout)?
    }

    async fn close(&mut self) {
        let _ = self
            .handle
            .disconnect(Disconnect::ByApplication, "", "en")
            .await;
    }
}
