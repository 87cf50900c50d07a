//! [`ClusterClient`] implementation on top of the `redis` crate.
//!
//! One multiplexed tokio connection per node. Every primitive is bounded
//! by the configured command timeout; key relocation carries its own
//! server-side timeout and gets a slightly longer client-side bound.

use super::{ClusterClient, Connector, NodesListing};
use crate::config::ConnectionConfig;
use crate::error::{RcctlError, Result};
use crate::topology::NodeAddress;
use async_trait::async_trait;
use bytes::Bytes;
use redis::aio::MultiplexedConnection;
use redis::{ConnectionAddr, ConnectionInfo, FromRedisValue, RedisConnectionInfo};
use std::time::Duration;
use tracing::{debug, instrument};

/// Extra client-side allowance on top of the MIGRATE server timeout.
const MIGRATE_GRACE: Duration = Duration::from_secs(1);

/// Opens [`RedisNodeClient`]s with shared credentials and timeouts.
#[derive(Debug, Clone)]
pub struct RedisConnector {
    config: ConnectionConfig,
}

impl RedisConnector {
    pub fn new(config: ConnectionConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Connector for RedisConnector {
    async fn connect(&self, addr: &NodeAddress) -> Result<Box<dyn ClusterClient>> {
        let client = RedisNodeClient::connect(addr, &self.config).await?;
        Ok(Box::new(client))
    }
}

/// Connection to a single store node.
pub struct RedisNodeClient {
    addr: NodeAddress,
    conn: MultiplexedConnection,
    command_timeout: Duration,
    username: Option<String>,
    password: Option<String>,
}

impl RedisNodeClient {
    /// Connect to `addr` and verify the connection with a PING.
    #[instrument(skip(config), fields(addr = %addr))]
    pub async fn connect(addr: &NodeAddress, config: &ConnectionConfig) -> Result<Self> {
        let username = match config.user.as_str() {
            "" | "default" => None,
            user => Some(user.to_string()),
        };
        let info = ConnectionInfo {
            addr: ConnectionAddr::Tcp(addr.host.clone(), addr.port),
            redis: RedisConnectionInfo {
                username: username.clone(),
                password: config.password.clone(),
                ..Default::default()
            },
        };

        let client =
            redis::Client::open(info).map_err(|e| RcctlError::remote(addr, "CONNECT", e))?;
        let conn = match tokio::time::timeout(
            config.connect_timeout(),
            client.get_multiplexed_tokio_connection(),
        )
        .await
        {
            Ok(Ok(conn)) => conn,
            Ok(Err(e)) => return Err(RcctlError::remote(addr, "CONNECT", e)),
            Err(_) => {
                return Err(RcctlError::Timeout {
                    addr: addr.to_string(),
                    operation: "CONNECT",
                    duration: config.connect_timeout(),
                })
            }
        };

        let mut node = Self {
            addr: addr.clone(),
            conn,
            command_timeout: config.command_timeout(),
            username,
            password: config.password.clone(),
        };
        node.ping().await?;
        debug!("Connected");
        Ok(node)
    }

    async fn run<T: FromRedisValue>(
        &mut self,
        operation: &'static str,
        cmd: redis::Cmd,
    ) -> Result<T> {
        let timeout = self.command_timeout;
        self.run_with_timeout(operation, cmd, timeout).await
    }

    async fn run_with_timeout<T: FromRedisValue>(
        &mut self,
        operation: &'static str,
        cmd: redis::Cmd,
        timeout: Duration,
    ) -> Result<T> {
        debug!(addr = %self.addr, operation, "Executing");
        match tokio::time::timeout(timeout, cmd.query_async::<_, T>(&mut self.conn)).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(RcctlError::remote(&self.addr, operation, e)),
            Err(_) => Err(RcctlError::Timeout {
                addr: self.addr.to_string(),
                operation,
                duration: timeout,
            }),
        }
    }
}

fn cluster(subcommand: &str) -> redis::Cmd {
    let mut cmd = redis::cmd("CLUSTER");
    cmd.arg(subcommand);
    cmd
}

#[async_trait]
impl ClusterClient for RedisNodeClient {
    fn address(&self) -> &NodeAddress {
        &self.addr
    }

    async fn ping(&mut self) -> Result<()> {
        let _: String = self.run("PING", redis::cmd("PING")).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn introduce(&mut self, host: &str, port: u16) -> Result<()> {
        let mut cmd = cluster("MEET");
        cmd.arg(host).arg(port);
        self.run("CLUSTER MEET", cmd).await
    }

    #[instrument(skip(self, slots), fields(slot_count = slots.len()))]
    async fn add_slots(&mut self, slots: &[u16]) -> Result<()> {
        let mut cmd = cluster("ADDSLOTS");
        for slot in slots {
            cmd.arg(*slot);
        }
        self.run("CLUSTER ADDSLOTS", cmd).await
    }

    async fn my_id(&mut self) -> Result<String> {
        self.run("CLUSTER MYID", cluster("MYID")).await
    }

    #[instrument(skip(self))]
    async fn attach_replica(&mut self, master_id: &str) -> Result<()> {
        let mut cmd = cluster("REPLICATE");
        cmd.arg(master_id);
        self.run("CLUSTER REPLICATE", cmd).await
    }

    async fn list_nodes(&mut self) -> Result<NodesListing> {
        let text: String = self.run("CLUSTER NODES", cluster("NODES")).await?;
        Ok(NodesListing::Raw(text))
    }

    #[instrument(skip(self))]
    async fn forget(&mut self, node_id: &str) -> Result<()> {
        let mut cmd = cluster("FORGET");
        cmd.arg(node_id);
        self.run("CLUSTER FORGET", cmd).await
    }

    #[instrument(skip(self))]
    async fn reset(&mut self) -> Result<()> {
        self.run("CLUSTER RESET", cluster("RESET")).await
    }

    async fn set_slot_importing(&mut self, slot: u16, from_node_id: &str) -> Result<()> {
        let mut cmd = cluster("SETSLOT");
        cmd.arg(slot).arg("IMPORTING").arg(from_node_id);
        self.run("CLUSTER SETSLOT IMPORTING", cmd).await
    }

    async fn set_slot_migrating(&mut self, slot: u16, to_node_id: &str) -> Result<()> {
        let mut cmd = cluster("SETSLOT");
        cmd.arg(slot).arg("MIGRATING").arg(to_node_id);
        self.run("CLUSTER SETSLOT MIGRATING", cmd).await
    }

    async fn set_slot_owner(&mut self, slot: u16, node_id: &str) -> Result<()> {
        let mut cmd = cluster("SETSLOT");
        cmd.arg(slot).arg("NODE").arg(node_id);
        self.run("CLUSTER SETSLOT NODE", cmd).await
    }

    async fn keys_in_slot(&mut self, slot: u16, limit: usize) -> Result<Vec<Bytes>> {
        let mut cmd = cluster("GETKEYSINSLOT");
        cmd.arg(slot).arg(limit);
        let keys: Vec<Vec<u8>> = self.run("CLUSTER GETKEYSINSLOT", cmd).await?;
        Ok(keys.into_iter().map(Bytes::from).collect())
    }

    async fn relocate_key(
        &mut self,
        to: &NodeAddress,
        key: &[u8],
        timeout: Duration,
    ) -> Result<()> {
        // MIGRATE host port key destination-db timeout [AUTH pw | AUTH2 user pw]
        let mut cmd = redis::cmd("MIGRATE");
        cmd.arg(&to.host)
            .arg(to.port)
            .arg(key)
            .arg(0)
            .arg(timeout.as_millis() as u64);
        match (&self.username, &self.password) {
            (Some(user), Some(password)) => {
                cmd.arg("AUTH2").arg(user).arg(password);
            }
            (None, Some(password)) => {
                cmd.arg("AUTH").arg(password);
            }
            _ => {}
        }
        let _: redis::Value = self
            .run_with_timeout("MIGRATE", cmd, timeout + MIGRATE_GRACE)
            .await?;
        Ok(())
    }

    async fn set(&mut self, key: &str, value: &str) -> Result<()> {
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        self.run("SET", cmd).await
    }
}
