// RPC endpoint fleet for one chain.
//
// Endpoints are probed on a fixed cadence with a Tendermint /status
// call. An endpoint advertising the wrong chain id is poisoned for the
// rest of the session; everything else transitions down and up freely.

use std::collections::HashMap;

use reqwest::Client;
use serde::Deserialize;
use tokio::sync::RwLock;
use vigil_common::{
    api::tendermint::{RpcResponse, StatusResult},
    time::TimestampMillis,
};

use crate::{config::NodeConfig, core::alerts::EndpointSnapshot};

#[derive(Debug, Clone)]
pub struct NodeEndpoint {
    pub url: String,
    pub alert_if_down: bool,
    pub down: bool,
    // a node that was down at least once keeps the flag for display
    pub was_down: bool,
    pub syncing: bool,
    pub down_since: Option<TimestampMillis>,
    pub last_error: Option<String>,
    // advertised a foreign chain id, never selected again
    pub wrong_chain: bool,
    // discovered through the public registry, dropped on refresh
    pub transient: bool,
}

impl NodeEndpoint {
    fn new(url: String, alert_if_down: bool, transient: bool) -> Self {
        Self {
            url,
            alert_if_down,
            // endpoints start down until the first successful probe
            down: true,
            was_down: false,
            syncing: false,
            down_since: None,
            last_error: None,
            wrong_chain: false,
            transient,
        }
    }

    pub fn selectable(&self) -> bool {
        !self.down && !self.wrong_chain
    }
}

// What a single /status probe reported
#[derive(Debug)]
pub enum ProbeResult {
    Ok {
        chain_id: String,
        catching_up: bool,
        latest_height: u64,
    },
    Failed(String),
}

pub struct Fleet {
    chain_id: String,
    client: Client,
    endpoints: RwLock<Vec<NodeEndpoint>>,
    no_endpoints_since: RwLock<Option<TimestampMillis>>,
}

impl Fleet {
    pub fn new(chain_id: &str, nodes: &[NodeConfig], client: Client) -> Self {
        let endpoints = nodes
            .iter()
            .map(|node| NodeEndpoint::new(node.url.clone(), node.alert_if_down, false))
            .collect();
        Self {
            chain_id: chain_id.to_string(),
            client,
            endpoints: RwLock::new(endpoints),
            no_endpoints_since: RwLock::new(None),
        }
    }

    // Probe every endpoint once and update its state
    pub async fn probe_all(&self, now: TimestampMillis) {
        let urls: Vec<String> = {
            let endpoints = self.endpoints.read().await;
            endpoints
                .iter()
                .filter(|endpoint| !endpoint.wrong_chain)
                .map(|endpoint| endpoint.url.clone())
                .collect()
        };

        for url in urls {
            let result = probe_status(&self.client, &url).await;
            let mut endpoints = self.endpoints.write().await;
            if let Some(endpoint) = endpoints.iter_mut().find(|endpoint| endpoint.url == url) {
                apply_probe(endpoint, &result, &self.chain_id, now);
            }
        }

        self.refresh_no_endpoints(now).await;
    }

    async fn refresh_no_endpoints(&self, now: TimestampMillis) {
        let any_selectable = self
            .endpoints
            .read()
            .await
            .iter()
            .any(|endpoint| endpoint.selectable());
        let mut since = self.no_endpoints_since.write().await;
        if any_selectable {
            *since = None;
        } else if since.is_none() {
            *since = Some(now);
        }
    }

    // First healthy endpoint, synced ones preferred. A syncing node is
    // better than nothing but flagged on the dashboard.
    pub async fn pick(&self) -> Option<String> {
        let endpoints = self.endpoints.read().await;
        endpoints
            .iter()
            .find(|endpoint| endpoint.selectable() && !endpoint.syncing)
            .or_else(|| endpoints.iter().find(|endpoint| endpoint.selectable()))
            .map(|endpoint| endpoint.url.clone())
    }

    pub async fn mark_down(&self, url: &str, error: &str, now: TimestampMillis) {
        {
            let mut endpoints = self.endpoints.write().await;
            if let Some(endpoint) = endpoints.iter_mut().find(|endpoint| endpoint.url == url) {
                if !endpoint.down {
                    debug!("endpoint {} marked down: {}", url, error);
                    endpoint.down_since = Some(now);
                }
                endpoint.down = true;
                endpoint.was_down = true;
                endpoint.last_error = Some(error.to_string());
            }
        }
        self.refresh_no_endpoints(now).await;
    }

    pub async fn mark_up(&self, url: &str) {
        let mut endpoints = self.endpoints.write().await;
        if let Some(endpoint) = endpoints.iter_mut().find(|endpoint| endpoint.url == url) {
            endpoint.down = false;
            endpoint.down_since = None;
            endpoint.last_error = None;
        }
    }

    // Endpoints usable for one-shot queries, best first
    pub async fn healthy_urls(&self) -> Vec<String> {
        let endpoints = self.endpoints.read().await;
        let mut urls: Vec<String> = endpoints
            .iter()
            .filter(|endpoint| endpoint.selectable() && !endpoint.syncing)
            .map(|endpoint| endpoint.url.clone())
            .collect();
        urls.extend(
            endpoints
                .iter()
                .filter(|endpoint| endpoint.selectable() && endpoint.syncing)
                .map(|endpoint| endpoint.url.clone()),
        );
        urls
    }

    pub async fn no_endpoints_since(&self) -> Option<TimestampMillis> {
        *self.no_endpoints_since.read().await
    }

    pub async fn snapshot(&self) -> Vec<EndpointSnapshot> {
        self.endpoints
            .read()
            .await
            .iter()
            .map(|endpoint| EndpointSnapshot {
                url: endpoint.url.clone(),
                alert_if_down: endpoint.alert_if_down,
                down_since: if endpoint.down { endpoint.down_since } else { None },
            })
            .collect()
    }

    pub async fn counts(&self) -> (usize, usize) {
        let endpoints = self.endpoints.read().await;
        let healthy = endpoints.iter().filter(|endpoint| endpoint.selectable()).count();
        (endpoints.len(), healthy)
    }

    // Reapply persisted down-since timestamps so node-down alerts do
    // not reset across restarts
    pub async fn restore_down_since(&self, down: &HashMap<String, TimestampMillis>) {
        let mut endpoints = self.endpoints.write().await;
        for endpoint in endpoints.iter_mut() {
            if let Some(since) = down.get(&endpoint.url) {
                endpoint.down = true;
                endpoint.was_down = true;
                endpoint.down_since = Some(*since);
            }
        }
    }

    pub async fn export_down(&self) -> HashMap<String, TimestampMillis> {
        self.endpoints
            .read()
            .await
            .iter()
            .filter(|endpoint| endpoint.down)
            .filter_map(|endpoint| {
                endpoint
                    .down_since
                    .map(|since| (endpoint.url.clone(), since))
            })
            .collect()
    }

    // Merge registry-discovered endpoints into the pool
    pub async fn add_public_endpoints(&self, urls: Vec<String>) {
        let mut endpoints = self.endpoints.write().await;
        for url in urls {
            if endpoints.iter().any(|endpoint| endpoint.url == url) {
                continue;
            }
            info!("adding public fallback endpoint {}", url);
            endpoints.push(NodeEndpoint::new(url, false, true));
        }
    }
}

// Apply one probe result to an endpoint
fn apply_probe(
    endpoint: &mut NodeEndpoint,
    result: &ProbeResult,
    chain_id: &str,
    now: TimestampMillis,
) {
    match result {
        ProbeResult::Ok {
            chain_id: advertised,
            catching_up,
            ..
        } => {
            if advertised != chain_id {
                if !endpoint.wrong_chain {
                    warn!(
                        "endpoint {} advertises chain '{}', expected '{}'; excluding it",
                        endpoint.url, advertised, chain_id
                    );
                }
                if !endpoint.down {
                    endpoint.down_since = Some(now);
                }
                endpoint.wrong_chain = true;
                endpoint.down = true;
                endpoint.was_down = true;
                endpoint.last_error = Some(format!("wrong chain id '{}'", advertised));
                return;
            }
            if endpoint.down {
                info!("endpoint {} is back up", endpoint.url);
            }
            endpoint.down = false;
            endpoint.down_since = None;
            endpoint.syncing = *catching_up;
            endpoint.last_error = None;
        }
        ProbeResult::Failed(error) => {
            if !endpoint.down {
                warn!("endpoint {} went down: {}", endpoint.url, error);
                endpoint.down_since = Some(now);
            }
            endpoint.down = true;
            endpoint.was_down = true;
            endpoint.last_error = Some(error.clone());
        }
    }
}

// One Tendermint /status call
pub async fn probe_status(client: &Client, url: &str) -> ProbeResult {
    let status_url = format!("{}/status", http_base(url));
    let response = match client.get(&status_url).send().await {
        Ok(response) => response,
        Err(e) => return ProbeResult::Failed(e.to_string()),
    };
    if !response.status().is_success() {
        return ProbeResult::Failed(format!("status {}", response.status()));
    }
    let body: RpcResponse<StatusResult> = match response.json().await {
        Ok(body) => body,
        Err(e) => return ProbeResult::Failed(format!("invalid status response: {}", e)),
    };
    match body.result {
        Some(status) => ProbeResult::Ok {
            chain_id: status.node_info.network,
            catching_up: status.sync_info.catching_up,
            latest_height: status
                .sync_info
                .latest_block_height
                .parse()
                .unwrap_or_default(),
        },
        None => ProbeResult::Failed("empty status result".to_string()),
    }
}

// Normalize a configured node url to its http base.
// Tendermint configs commonly use tcp:// for the RPC laddr.
pub fn http_base(url: &str) -> String {
    let trimmed = url.trim_end_matches('/');
    if let Some(rest) = trimmed.strip_prefix("tcp://") {
        format!("http://{}", rest)
    } else {
        trimmed.to_string()
    }
}

// Websocket endpoint for a node url
pub fn ws_endpoint(url: &str) -> String {
    let base = http_base(url);
    let ws = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{}", rest)
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{}", rest)
    } else {
        format!("ws://{}", base)
    };
    format!("{}/websocket", ws)
}

// The public chain registry serves one chain.json per chain slug
const CHAIN_REGISTRY_BASE: &str =
    "https://raw.githubusercontent.com/cosmos/chain-registry/master";

#[derive(Deserialize)]
struct RegistryChain {
    apis: Option<RegistryApis>,
}

#[derive(Deserialize)]
struct RegistryApis {
    #[serde(default)]
    rpc: Vec<RegistryEndpoint>,
}

#[derive(Deserialize)]
struct RegistryEndpoint {
    address: String,
}

pub async fn fetch_public_endpoints(client: &Client, slug: &str) -> anyhow::Result<Vec<String>> {
    let url = format!("{}/{}/chain.json", CHAIN_REGISTRY_BASE, slug);
    let chain: RegistryChain = client.get(&url).send().await?.json().await?;
    Ok(chain
        .apis
        .map(|apis| apis.rpc.into_iter().map(|endpoint| endpoint.address).collect())
        .unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nodes(urls: &[&str]) -> Vec<NodeConfig> {
        urls.iter()
            .map(|url| NodeConfig {
                url: url.to_string(),
                alert_if_down: true,
            })
            .collect()
    }

    fn ok_probe(chain_id: &str) -> ProbeResult {
        ProbeResult::Ok {
            chain_id: chain_id.to_string(),
            catching_up: false,
            latest_height: 100,
        }
    }

    #[tokio::test]
    async fn test_wrong_chain_excluded_for_session() {
        let fleet = Fleet::new("foo-1", &nodes(&["http://a", "http://b"]), Client::new());

        // simulate one probe round: a is right, b is on another chain
        {
            let mut endpoints = fleet.endpoints.write().await;
            apply_probe(&mut endpoints[0], &ok_probe("foo-1"), "foo-1", 1_000);
            apply_probe(&mut endpoints[1], &ok_probe("bar-2"), "foo-1", 1_000);
        }
        fleet.refresh_no_endpoints(1_000).await;

        assert_eq!(fleet.pick().await, Some("http://a".to_string()));
        // the wrong-chain endpoint is excluded from selection for the
        // rest of the session
        {
            let endpoints = fleet.endpoints.read().await;
            assert!(endpoints[1].wrong_chain);
            assert!(!endpoints[1].selectable());
        }
        assert_eq!(fleet.healthy_urls().await, vec!["http://a".to_string()]);
        // NoRPCEndpoints is not raised while a is healthy
        assert!(fleet.no_endpoints_since().await.is_none());
    }

    #[tokio::test]
    async fn test_no_endpoints_flag_lifecycle() {
        let fleet = Fleet::new("foo-1", &nodes(&["http://a"]), Client::new());
        fleet.refresh_no_endpoints(500).await;
        // never probed successfully: all endpoints are down
        assert_eq!(fleet.no_endpoints_since().await, Some(500));

        {
            let mut endpoints = fleet.endpoints.write().await;
            apply_probe(&mut endpoints[0], &ok_probe("foo-1"), "foo-1", 1_000);
        }
        fleet.refresh_no_endpoints(1_000).await;
        assert!(fleet.no_endpoints_since().await.is_none());

        fleet.mark_down("http://a", "connection refused", 2_000).await;
        assert_eq!(fleet.no_endpoints_since().await, Some(2_000));
        // the original timestamp is kept while the outage lasts
        fleet.mark_down("http://a", "connection refused", 3_000).await;
        assert_eq!(fleet.no_endpoints_since().await, Some(2_000));
    }

    #[tokio::test]
    async fn test_pick_prefers_synced_endpoints() {
        let fleet = Fleet::new("foo-1", &nodes(&["http://a", "http://b"]), Client::new());
        {
            let mut endpoints = fleet.endpoints.write().await;
            apply_probe(
                &mut endpoints[0],
                &ProbeResult::Ok {
                    chain_id: "foo-1".to_string(),
                    catching_up: true,
                    latest_height: 10,
                },
                "foo-1",
                1_000,
            );
            apply_probe(&mut endpoints[1], &ok_probe("foo-1"), "foo-1", 1_000);
        }
        assert_eq!(fleet.pick().await, Some("http://b".to_string()));

        fleet.mark_down("http://b", "gone", 2_000).await;
        // syncing endpoint is the last resort
        assert_eq!(fleet.pick().await, Some("http://a".to_string()));
    }

    #[tokio::test]
    async fn test_down_since_survives_restore() {
        let fleet = Fleet::new("foo-1", &nodes(&["http://a"]), Client::new());
        let mut down = HashMap::new();
        down.insert("http://a".to_string(), 1_234u64);
        fleet.restore_down_since(&down).await;

        let snapshot = fleet.snapshot().await;
        assert_eq!(snapshot[0].down_since, Some(1_234));
        assert_eq!(fleet.export_down().await.get("http://a"), Some(&1_234));
    }

    #[test]
    fn test_url_helpers() {
        assert_eq!(http_base("tcp://localhost:26657"), "http://localhost:26657");
        assert_eq!(http_base("https://rpc.example.com/"), "https://rpc.example.com");
        assert_eq!(
            ws_endpoint("tcp://localhost:26657"),
            "ws://localhost:26657/websocket"
        );
        assert_eq!(
            ws_endpoint("https://rpc.example.com"),
            "wss://rpc.example.com/websocket"
        );
    }

    #[tokio::test]
    async fn test_public_endpoints_deduplicate() {
        let fleet = Fleet::new("foo-1", &nodes(&["http://a"]), Client::new());
        fleet
            .add_public_endpoints(vec!["http://a".to_string(), "http://c".to_string()])
            .await;
        let (total, _) = fleet.counts().await;
        assert_eq!(total, 2);
    }
}
