//! Kernel networking through the gtp5g and iproute2 command-line tools.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::process::{Output, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use nextgsim_common::{format_command, log_command, Ipv4Prefix, TunnelSection};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::kernel::{KernelError, KernelNetworking, LinkHandle, PolicyRule, Route};
use crate::tunnel::{Far, Pdr};

/// Interval between checks for a freshly created interface.
const LINK_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// [`KernelNetworking`] backend that shells out to `gtp5g-link`,
/// `gtp5g-tunnel` and `ip`.
///
/// `gtp5g-link add` keeps running for as long as the interface lives, so
/// the child process is kept here and killed when the link is deleted.
pub struct CommandNetworking {
    gtp5g_link: String,
    gtp5g_tunnel: String,
    ip: String,
    links: Mutex<HashMap<String, Child>>,
}

impl Default for CommandNetworking {
    fn default() -> Self {
        Self::new("gtp5g-link", "gtp5g-tunnel", "ip")
    }
}

impl CommandNetworking {
    /// Creates a backend using the given tool paths.
    pub fn new(
        gtp5g_link: impl Into<String>,
        gtp5g_tunnel: impl Into<String>,
        ip: impl Into<String>,
    ) -> Self {
        Self {
            gtp5g_link: gtp5g_link.into(),
            gtp5g_tunnel: gtp5g_tunnel.into(),
            ip: ip.into(),
            links: Mutex::new(HashMap::new()),
        }
    }

    /// Creates a backend from the `tunnel` configuration section.
    pub fn from_config(config: &TunnelSection) -> Self {
        Self::new(&config.gtp5g_link, &config.gtp5g_tunnel, &config.ip)
    }

    async fn output(&self, program: &str, args: &[String]) -> Result<Output, KernelError> {
        Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|source| KernelError::Spawn {
                program: program.to_string(),
                source,
            })
    }

    /// Runs a command, logging it first and failing on a non-zero exit.
    async fn run(&self, component: &str, program: &str, args: Vec<String>) -> Result<Output, KernelError> {
        log_command(component, program, &args);
        let output = self.output(program, &args).await?;
        if !output.status.success() {
            return Err(KernelError::CommandFailed {
                command: format_command(program, &args),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(output)
    }

    async fn ip(&self, args: Vec<String>) -> Result<Output, KernelError> {
        self.run("iproute", &self.ip, args).await
    }

    async fn gtp5g_tunnel(&self, kind: &str, ifname: &str, rule_args: Vec<String>) -> Result<(), KernelError> {
        let mut args = vec!["add".to_string(), kind.to_string(), ifname.to_string()];
        args.extend(rule_args);
        self.run("gtp5g", &self.gtp5g_tunnel, args).await.map(|_| ())
    }

    /// Quiet lookup used while waiting for a link to appear.
    async fn show_link(&self, name: &str) -> Result<Option<LinkHandle>, KernelError> {
        let args = to_args(["-o", "link", "show", "dev", name]);
        let output = self.output(&self.ip, &args).await?;
        if !output.status.success() {
            return Ok(None);
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        let index = parse_link_index(&stdout)?;
        Ok(Some(LinkHandle {
            name: name.to_string(),
            index,
        }))
    }
}

#[async_trait]
impl KernelNetworking for CommandNetworking {
    async fn link_add_gtp(&self, name: &str, local: Ipv4Addr) -> Result<(), KernelError> {
        let args = to_args(["add", name, "--ran", &local.to_string()]);
        log_command("gtp5g", &self.gtp5g_link, &args);

        let child = Command::new(&self.gtp5g_link)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| KernelError::Spawn {
                program: self.gtp5g_link.clone(),
                source,
            })?;
        self.links.lock().await.insert(name.to_string(), child);

        loop {
            if self.show_link(name).await?.is_some() {
                debug!(ifname = name, "gtp5g interface is up");
                return Ok(());
            }

            let mut links = self.links.lock().await;
            if let Some(child) = links.get_mut(name) {
                if let Ok(Some(status)) = child.try_wait() {
                    let child = links.remove(name);
                    drop(links);
                    let stderr = match child {
                        Some(child) => child
                            .wait_with_output()
                            .await
                            .map(|o| String::from_utf8_lossy(&o.stderr).trim().to_string())
                            .unwrap_or_default(),
                        None => String::new(),
                    };
                    return Err(KernelError::CommandFailed {
                        command: format_command(&self.gtp5g_link, &args),
                        stderr: format!("exited with {status}: {stderr}"),
                    });
                }
            }
            drop(links);
            tokio::time::sleep(LINK_POLL_INTERVAL).await;
        }
    }

    async fn link_del(&self, name: &str) -> Result<(), KernelError> {
        let result = self.ip(to_args(["link", "del", name])).await.map(|_| ());
        if let Some(mut child) = self.links.lock().await.remove(name) {
            if let Err(e) = child.kill().await {
                warn!(ifname = name, "failed to stop gtp5g-link: {e}");
            }
        }
        result
    }

    async fn link_by_name(&self, name: &str) -> Result<LinkHandle, KernelError> {
        self.show_link(name)
            .await?
            .ok_or_else(|| KernelError::NotFound(format!("link {name}")))
    }

    async fn add_far(&self, ifname: &str, far: &Far) -> Result<(), KernelError> {
        self.gtp5g_tunnel("far", ifname, far.to_args()).await
    }

    async fn add_pdr(&self, ifname: &str, pdr: &Pdr) -> Result<(), KernelError> {
        self.gtp5g_tunnel("pdr", ifname, pdr.to_args()).await
    }

    async fn addr_add(&self, link: &LinkHandle, addr: Ipv4Prefix) -> Result<(), KernelError> {
        let result = self
            .ip(to_args(["addr", "add", &addr.to_string(), "dev", &link.name]))
            .await;
        match result {
            // Ignore "File exists" error - address may already be configured
            Err(KernelError::CommandFailed { stderr, .. }) if stderr.contains("File exists") => {
                warn!(ifname = %link.name, "IP address already configured");
                Ok(())
            }
            other => other.map(|_| ()),
        }
    }

    async fn route_replace(&self, route: &Route) -> Result<(), KernelError> {
        self.ip(route_args("replace", route)).await.map(|_| ())
    }

    async fn route_del(&self, route: &Route) -> Result<(), KernelError> {
        self.ip(route_args("del", route)).await.map(|_| ())
    }

    async fn rule_add(&self, rule: &PolicyRule) -> Result<(), KernelError> {
        self.ip(rule_args("add", rule)).await.map(|_| ())
    }

    async fn rule_del(&self, rule: &PolicyRule) -> Result<(), KernelError> {
        self.ip(rule_args("del", rule)).await.map(|_| ())
    }
}

fn to_args<const N: usize>(args: [&str; N]) -> Vec<String> {
    args.iter().map(|s| s.to_string()).collect()
}

fn route_args(verb: &str, route: &Route) -> Vec<String> {
    to_args([
        "route",
        verb,
        &route.dst.to_string(),
        "dev",
        &route.dev,
        "scope",
        &route.scope.to_string(),
        "proto",
        &route.protocol.to_string(),
        "metric",
        &route.priority.to_string(),
        "table",
        &route.table.to_string(),
    ])
}

fn rule_args(verb: &str, rule: &PolicyRule) -> Vec<String> {
    let mut args = to_args(["rule", verb, "iif", &rule.iif]);
    if let Some(src) = &rule.src {
        args.extend(to_args(["from", &src.to_string()]));
    }
    args.extend(to_args(["table", &rule.table.to_string()]));
    args
}

/// Extracts the interface index from `ip -o link show` output
/// (`"12: val0000000120: <POINTOPOINT,...> ..."`).
fn parse_link_index(output: &str) -> Result<u32, KernelError> {
    output
        .split(':')
        .next()
        .and_then(|index| index.trim().parse().ok())
        .ok_or_else(|| KernelError::Parse(output.trim().to_string()))
}
