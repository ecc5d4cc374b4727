// Remote server registry
// One credentialed pipeline per REMOTE_<NAME>_URL/_USER/_PASS triple

use std::collections::BTreeMap;

use crate::config::PipelineConfig;
use crate::error::{ApiError, Result};
use crate::http_client::AuthenticatedClient;

/// A remote server discovered from the environment
#[derive(Clone, PartialEq, Eq)]
pub struct RemoteServer {
    pub name: String,
    pub url: String,
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for RemoteServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteServer")
            .field("name", &self.name)
            .field("url", &self.url)
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

/// Find remote servers in a set of environment variables
///
/// Only names with non-empty URL, user and password are kept. Keys are
/// lower-cased names; when two spellings collide, the first in byte order
/// of the variable name wins.
pub fn discover_remote_servers<I>(vars: I) -> BTreeMap<String, RemoteServer>
where
    I: IntoIterator<Item = (String, String)>,
{
    let vars: BTreeMap<String, String> = vars.into_iter().collect();
    let mut servers = BTreeMap::new();

    for key in vars.keys() {
        let Some(name) = key
            .strip_prefix("REMOTE_")
            .and_then(|rest| rest.strip_suffix("_URL"))
        else {
            continue;
        };
        if name.is_empty() {
            continue;
        }

        let get = |suffix: &str| {
            vars.get(&format!("REMOTE_{}_{}", name, suffix))
                .filter(|v| !v.is_empty())
                .cloned()
        };

        match (get("URL"), get("USER"), get("PASS")) {
            (Some(url), Some(username), Some(password)) => {
                let key = name.to_lowercase();
                if servers.contains_key(&key) {
                    tracing::warn!(
                        remote = %key,
                        "Ignoring REMOTE_{}_URL, remote server '{}' already configured",
                        name,
                        key
                    );
                    continue;
                }
                servers.insert(
                    key.clone(),
                    RemoteServer {
                        name: key,
                        url,
                        username,
                        password,
                    },
                );
            }
            _ => {
                tracing::warn!(
                    remote = %name,
                    "Ignoring remote server with incomplete REMOTE_{}_URL/_USER/_PASS",
                    name
                );
            }
        }
    }

    servers
}

/// Named pipelines, each caching its own tokens
pub struct RemoteRegistry {
    clients: BTreeMap<String, AuthenticatedClient>,
}

impl RemoteRegistry {
    /// Build from the process environment
    ///
    /// Timeouts, token path and refresh threshold come from `template`.
    pub fn from_env(template: &PipelineConfig) -> Result<Self> {
        Self::from_servers(discover_remote_servers(std::env::vars()).into_values(), template)
    }

    pub fn from_servers<I>(servers: I, template: &PipelineConfig) -> Result<Self>
    where
        I: IntoIterator<Item = RemoteServer>,
    {
        let mut clients = BTreeMap::new();
        for server in servers {
            let config = PipelineConfig {
                base_url: server.url,
                access_token: None,
                refresh_token: None,
                username: Some(server.username),
                password: Some(server.password),
                ..template.clone()
            };
            tracing::info!(remote = %server.name, url = %config.base_url, "Registered remote server");
            clients.insert(server.name, AuthenticatedClient::new(&config)?);
        }
        Ok(Self { clients })
    }

    /// Client for the named server, case-insensitive
    pub fn get(&self, name: &str) -> Result<&AuthenticatedClient> {
        self.clients.get(&name.to_lowercase()).ok_or_else(|| {
            let available = if self.clients.is_empty() {
                "(none)".to_string()
            } else {
                self.names().join(", ")
            };
            ApiError::ConfigError(format!(
                "No remote server '{}' configured. Available: {}",
                name, available
            ))
        })
    }

    /// Names of all configured servers, sorted
    pub fn names(&self) -> Vec<String> {
        self.clients.keys().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_discover_complete_servers() {
        let servers = discover_remote_servers(vars(&[
            ("REMOTE_AI_URL", "http://ai:8001"),
            ("REMOTE_AI_USER", "backend"),
            ("REMOTE_AI_PASS", "secret"),
            ("REMOTE_NEO4J_URL", "http://neo4j:7474"),
            ("REMOTE_NEO4J_USER", "neo"),
            ("REMOTE_NEO4J_PASS", "pw"),
            ("PATH", "/usr/bin"),
        ]));

        assert_eq!(servers.keys().collect::<Vec<_>>(), vec!["ai", "neo4j"]);
        let ai = &servers["ai"];
        assert_eq!(ai.url, "http://ai:8001");
        assert_eq!(ai.username, "backend");
        assert_eq!(ai.password, "secret");
    }

    #[test]
    fn test_discover_skips_incomplete() {
        let servers = discover_remote_servers(vars(&[
            ("REMOTE_AI_URL", "http://ai:8001"),
            ("REMOTE_AI_USER", "backend"),
            ("REMOTE_DB_URL", "http://db"),
            ("REMOTE_DB_USER", "u"),
            ("REMOTE_DB_PASS", ""),
            ("REMOTE__URL", "http://nameless"),
        ]));
        assert!(servers.is_empty());
    }

    #[test]
    fn test_discover_case_collision_keeps_first_spelling() {
        let servers = discover_remote_servers(vars(&[
            ("REMOTE_ai_URL", "http://lower"),
            ("REMOTE_ai_USER", "lower"),
            ("REMOTE_ai_PASS", "lower"),
            ("REMOTE_AI_URL", "http://upper"),
            ("REMOTE_AI_USER", "upper"),
            ("REMOTE_AI_PASS", "upper"),
        ]));
        assert_eq!(servers.len(), 1);
        assert_eq!(servers["ai"].url, "http://upper");
        assert_eq!(servers["ai"].username, "upper");
    }

    #[test]
    fn test_debug_hides_password() {
        let server = RemoteServer {
            name: "ai".into(),
            url: "http://ai".into(),
            username: "u".into(),
            password: "hunter2".into(),
        };
        assert!(!format!("{:?}", server).contains("hunter2"));
    }

    #[test]
    fn test_registry_lookup() {
        let servers = discover_remote_servers(vars(&[
            ("REMOTE_AI_URL", "http://ai:8001/"),
            ("REMOTE_AI_USER", "backend"),
            ("REMOTE_AI_PASS", "secret"),
        ]));
        let registry =
            RemoteRegistry::from_servers(servers.into_values(), &PipelineConfig::default()).unwrap();

        assert_eq!(registry.names(), vec!["ai".to_string()]);
        assert_eq!(registry.get("AI").unwrap().base_url(), "http://ai:8001");

        let err = registry.get("search").err().unwrap();
        assert_eq!(
            err.to_string(),
            "Configuration error: No remote server 'search' configured. Available: ai"
        );
    }

    #[test]
    fn test_empty_registry_lookup() {
        let registry = RemoteRegistry::from_servers(Vec::new(), &PipelineConfig::default()).unwrap();
        assert!(registry.is_empty());
        let err = registry.get("ai").err().unwrap();
        assert!(err.to_string().ends_with("Available: (none)"));
    }
}
