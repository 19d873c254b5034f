//! In-memory kernel networking backend
//!
//! Models just enough of the kernel for tunnel tests: links own their
//! FARs, PDRs, addresses and routes; policy rules live apart from links and
//! survive link deletion.

use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::time::Duration;

use async_trait::async_trait;
use nextgsim_common::Ipv4Prefix;
use nextgsim_gtp::{Far, KernelError, KernelNetworking, LinkHandle, Pdr, PolicyRule, Route};
use tokio::sync::{Mutex, MutexGuard};

/// State of one mock link
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MockLink {
    /// Interface index
    pub index: u32,
    /// Local (gNB) address the link was created with
    pub local: Option<Ipv4Addr>,
    /// Installed FARs
    pub fars: Vec<Far>,
    /// Installed PDRs
    pub pdrs: Vec<Pdr>,
    /// Assigned addresses
    pub addrs: Vec<Ipv4Prefix>,
}

#[derive(Debug, Default)]
struct KernelState {
    links: BTreeMap<String, MockLink>,
    routes: Vec<Route>,
    rules: Vec<PolicyRule>,
    next_index: u32,
    calls: Vec<String>,
}

/// In-memory [`KernelNetworking`] implementation
#[derive(Debug, Default)]
pub struct MockKernel {
    state: Mutex<KernelState>,
    fail_on: Option<&'static str>,
    link_delay: Option<Duration>,
}

impl MockKernel {
    /// Creates an empty kernel
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every call of the operation `op` fail
    pub fn failing_on(op: &'static str) -> Self {
        Self {
            fail_on: Some(op),
            ..Default::default()
        }
    }

    /// Makes link creation take `delay`
    pub fn with_link_delay(delay: Duration) -> Self {
        Self {
            link_delay: Some(delay),
            ..Default::default()
        }
    }

    /// Names of the existing links
    pub async fn link_names(&self) -> Vec<String> {
        self.state.lock().await.links.keys().cloned().collect()
    }

    /// State of one link
    pub async fn link(&self, name: &str) -> Option<MockLink> {
        self.state.lock().await.links.get(name).cloned()
    }

    /// Installed routes
    pub async fn routes(&self) -> Vec<Route> {
        self.state.lock().await.routes.clone()
    }

    /// Installed policy rules
    pub async fn rules(&self) -> Vec<PolicyRule> {
        self.state.lock().await.rules.clone()
    }

    /// Every call, as `op ifname`
    pub async fn calls(&self) -> Vec<String> {
        self.state.lock().await.calls.clone()
    }

    async fn enter(
        &self,
        op: &str,
        target: &str,
    ) -> Result<MutexGuard<'_, KernelState>, KernelError> {
        let mut state = self.state.lock().await;
        state.calls.push(format!("{op} {target}"));
        if self.fail_on == Some(op) {
            return Err(KernelError::CommandFailed {
                command: format!("{op} {target}"),
                stderr: "Operation not permitted".to_string(),
            });
        }
        Ok(state)
    }
}

#[async_trait]
impl KernelNetworking for MockKernel {
    async fn link_add_gtp(&self, name: &str, local: Ipv4Addr) -> Result<(), KernelError> {
        if let Some(delay) = self.link_delay {
            tokio::time::sleep(delay).await;
        }
        let mut state = self.enter("link_add_gtp", name).await?;
        if state.links.contains_key(name) {
            return Err(KernelError::CommandFailed {
                command: format!("link_add_gtp {name}"),
                stderr: "File exists".to_string(),
            });
        }
        state.next_index += 1;
        let link = MockLink {
            index: state.next_index,
            local: Some(local),
            ..Default::default()
        };
        state.links.insert(name.to_string(), link);
        Ok(())
    }

    async fn link_del(&self, name: &str) -> Result<(), KernelError> {
        let mut state = self.enter("link_del", name).await?;
        if state.links.remove(name).is_none() {
            return Err(KernelError::NotFound(format!("link {name}")));
        }
        state.routes.retain(|r| r.dev != name);
        Ok(())
    }

    async fn link_by_name(&self, name: &str) -> Result<LinkHandle, KernelError> {
        let state = self.enter("link_by_name", name).await?;
        state
            .links
            .get(name)
            .map(|link| LinkHandle {
                name: name.to_string(),
                index: link.index,
            })
            .ok_or_else(|| KernelError::NotFound(format!("link {name}")))
    }

    async fn add_far(&self, ifname: &str, far: &Far) -> Result<(), KernelError> {
        let mut state = self.enter("add_far", ifname).await?;
        let link = state
            .links
            .get_mut(ifname)
            .ok_or_else(|| KernelError::NotFound(format!("link {ifname}")))?;
        link.fars.push(far.clone());
        Ok(())
    }

    async fn add_pdr(&self, ifname: &str, pdr: &Pdr) -> Result<(), KernelError> {
        let mut state = self.enter("add_pdr", ifname).await?;
        let link = state
            .links
            .get_mut(ifname)
            .ok_or_else(|| KernelError::NotFound(format!("link {ifname}")))?;
        if !link.fars.iter().any(|far| far.id == pdr.far_id) {
            return Err(KernelError::NotFound(format!("FAR {}", pdr.far_id)));
        }
        link.pdrs.push(pdr.clone());
        Ok(())
    }

    async fn addr_add(&self, link: &LinkHandle, addr: Ipv4Prefix) -> Result<(), KernelError> {
        let mut state = self.enter("addr_add", &link.name).await?;
        let entry = state
            .links
            .get_mut(&link.name)
            .ok_or_else(|| KernelError::NotFound(format!("link {}", link.name)))?;
        if !entry.addrs.contains(&addr) {
            entry.addrs.push(addr);
        }
        Ok(())
    }

    async fn route_replace(&self, route: &Route) -> Result<(), KernelError> {
        let mut state = self.enter("route_replace", &route.dev).await?;
        if !state.links.contains_key(&route.dev) {
            return Err(KernelError::NotFound(format!("link {}", route.dev)));
        }
        state
            .routes
            .retain(|r| !(r.dst == route.dst && r.table == route.table));
        state.routes.push(route.clone());
        Ok(())
    }

    async fn route_del(&self, route: &Route) -> Result<(), KernelError> {
        let mut state = self.enter("route_del", &route.dev).await?;
        let before = state.routes.len();
        state.routes.retain(|r| r != route);
        if state.routes.len() == before {
            return Err(KernelError::NotFound(format!("route {}", route.dst)));
        }
        Ok(())
    }

    async fn rule_add(&self, rule: &PolicyRule) -> Result<(), KernelError> {
        let mut state = self.enter("rule_add", &rule.iif).await?;
        state.rules.push(rule.clone());
        Ok(())
    }

    async fn rule_del(&self, rule: &PolicyRule) -> Result<(), KernelError> {
        let mut state = self.enter("rule_del", &rule.iif).await?;
        match state.rules.iter().position(|r| r == rule) {
            Some(pos) => {
                state.rules.remove(pos);
                Ok(())
            }
            None => Err(KernelError::NotFound(format!("rule iif {}", rule.iif))),
        }
    }
}
