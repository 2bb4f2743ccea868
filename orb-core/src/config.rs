//! Process configuration, read from the environment variables enumerated
//! in spec.md §6. Populated once at startup the way the teacher's
//! `main.rs` reads `std::env::var(...)` — explicit defaults where the spec
//! gives one, a hard failure where it doesn't.

use crate::model::AcceptListName;
use orb_types::AcceptListPolicy;
use std::collections::BTreeMap;
use std::time::Duration;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CasType {
    Local,
    Ipfs,
}

#[derive(Clone, Debug)]
pub struct Config {
    /// Base IRI used in all generated IDs (actor IRIs, activity IRIs).
    pub external_endpoint: String,
    /// Bind address for the HTTP listener.
    pub host_url: String,
    /// C2's batch-cut interval.
    pub batch_writer_timeout: Duration,
    pub cas_type: CasType,
    pub mq_url: String,
    pub mq_op_pool: usize,
    pub anchor_credential_domain: String,
    /// Bearer token -> principal name, from `ORB_AUTH_TOKENS_DEF`/`ORB_AUTH_TOKENS`.
    pub auth_tokens: BTreeMap<String, String>,
    pub http_signatures_enabled: bool,
    pub follow_auth_policy: AcceptListPolicy,
    pub invite_witness_auth_policy: AcceptListPolicy,
    pub task_manager_check_interval: Duration,
    pub anchor_event_sync_interval: Duration,
    pub vct_monitoring_interval: Duration,
    /// Anchor origins accepted from clients.
    pub allowed_origins: Vec<String>,
    pub did_namespace: String,
    /// Resolved per the open question in spec.md §9: gates C1 admission
    /// only.
    pub maintenance_mode_enabled: bool,
    pub witness_timeout: Duration,
    pub collection_page_size: usize,
}

impl Config {
    /// Load from the process environment, matching spec.md §6's variable
    /// names exactly. Values with no natural default in the spec get a
    /// conservative one suited to local/single-node operation.
    pub fn from_env() -> Self {
        Self {
            external_endpoint: env_or("ORB_EXTERNAL_ENDPOINT", "https://localhost"),
            host_url: env_or("ORB_HOST_URL", "0.0.0.0:8080"),
            batch_writer_timeout: Duration::from_millis(env_parse_or(
                "BATCH_WRITER_TIMEOUT_MS",
                1000,
            )),
            cas_type: match env_or("CAS_TYPE", "local").as_str() {
                "ipfs" => CasType::Ipfs,
                _ => CasType::Local,
            },
            mq_url: env_or("MQ_URL", "memory://"),
            mq_op_pool: env_parse_or("MQ_OP_POOL", 4),
            anchor_credential_domain: env_or("ANCHOR_CREDENTIAL_DOMAIN", "https://localhost"),
            auth_tokens: parse_auth_tokens(&env_or("ORB_AUTH_TOKENS_DEF", "")),
            http_signatures_enabled: env_parse_or("HTTP_SIGNATURES_ENABLED", true),
            follow_auth_policy: AcceptListPolicy::from_env_str(&env_or(
                "FOLLOW_AUTH_POLICY",
                "accept-list",
            )),
            invite_witness_auth_policy: AcceptListPolicy::from_env_str(&env_or(
                "INVITE_WITNESS_AUTH_POLICY",
                "accept-list",
            )),
            task_manager_check_interval: Duration::from_millis(env_parse_or(
                "TASK_MANAGER_CHECK_INTERVAL_MS",
                5000,
            )),
            anchor_event_sync_interval: Duration::from_millis(env_parse_or(
                "ANCHOR_EVENT_SYNC_INTERVAL_MS",
                60_000,
            )),
            vct_monitoring_interval: Duration::from_millis(env_parse_or(
                "VCT_MONITORING_INTERVAL_MS",
                300_000,
            )),
            allowed_origins: env_or("ALLOWED_ORIGINS", "")
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
            did_namespace: env_or("DID_NAMESPACE", "orb"),
            maintenance_mode_enabled: env_parse_or("MAINTENANCE_MODE_ENABLED", false),
            witness_timeout: Duration::from_millis(env_parse_or("WITNESS_TIMEOUT_MS", 30_000)),
            collection_page_size: env_parse_or(
                "COLLECTION_PAGE_SIZE",
                orb_types::DEFAULT_COLLECTION_PAGE_SIZE,
            ),
        }
    }

    /// A configuration suited to in-process tests: short intervals, no
    /// external origins restriction, memory everything.
    pub fn for_tests() -> Self {
        Self {
            external_endpoint: "https://node.test".to_string(),
            host_url: "127.0.0.1:0".to_string(),
            batch_writer_timeout: Duration::from_millis(50),
            cas_type: CasType::Local,
            mq_url: "memory://".to_string(),
            mq_op_pool: 2,
            anchor_credential_domain: "https://node.test".to_string(),
            auth_tokens: BTreeMap::new(),
            http_signatures_enabled: true,
            follow_auth_policy: AcceptListPolicy::AcceptList,
            invite_witness_auth_policy: AcceptListPolicy::AcceptList,
            task_manager_check_interval: Duration::from_millis(20),
            anchor_event_sync_interval: Duration::from_millis(50),
            vct_monitoring_interval: Duration::from_millis(50),
            allowed_origins: vec![],
            did_namespace: "orb".to_string(),
            maintenance_mode_enabled: false,
            witness_timeout: Duration::from_millis(200),
            collection_page_size: 100,
        }
    }

    pub fn accept_list_policy(&self, list: AcceptListName) -> AcceptListPolicy {
        match list {
            AcceptListName::Follow => self.follow_auth_policy,
            AcceptListName::Witness => self.invite_witness_auth_policy,
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// `ORB_AUTH_TOKENS_DEF` format: `name=token,name=token`.
fn parse_auth_tokens(s: &str) -> BTreeMap<String, String> {
    s.split(',')
        .filter_map(|pair| {
            let mut it = pair.splitn(2, '=');
            let name = it.next()?.trim();
            let token = it.next()?.trim();
            if name.is_empty() || token.is_empty() {
                None
            } else {
                Some((token.to_string(), name.to_string()))
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_auth_tokens() {
        let map = parse_auth_tokens("admin=abc123,witness=def456");
        assert_eq!(map.get("abc123"), Some(&"admin".to_string()));
        assert_eq!(map.get("def456"), Some(&"witness".to_string()));
    }
}
