use serde::{Deserialize, Serialize};

/// Final, merged gateway configuration used by the running process.
///
/// Merge order: CLI > ENV > config.json, seeded with defaults when the file
/// does not exist yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayConfig {
    pub server: ServerConfig,
    pub api: ApiConfig,
    pub oauth: OAuthConfig,
    pub defaults: GenerationDefaults,
    pub security: SecurityConfig,
    #[serde(rename = "systemInstruction")]
    pub system_instruction: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Streaming generation endpoint.
    pub url: String,
    #[serde(rename = "modelsUrl")]
    pub models_url: String,
    /// Identity provider token endpoint.
    pub host: String,
    #[serde(rename = "userAgent")]
    pub user_agent: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OAuthConfig {
    #[serde(rename = "clientId")]
    pub client_id: String,
    #[serde(rename = "clientSecret")]
    pub client_secret: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationDefaults {
    pub temperature: f64,
    pub top_p: f64,
    pub top_k: u32,
    pub max_tokens: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityConfig {
    #[serde(rename = "maxRequestSize")]
    pub max_request_size: usize,
    /// Admin-wide key that bypasses the per-key limiter. Empty disables it.
    #[serde(rename = "apiKey")]
    pub api_key: String,
    #[serde(rename = "adminPassword")]
    pub admin_password: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                port: 8045,
                host: "0.0.0.0".to_string(),
            },
            api: ApiConfig {
                url: String::new(),
                models_url: String::new(),
                host: String::new(),
                user_agent: String::new(),
            },
            oauth: OAuthConfig {
                client_id: String::new(),
                client_secret: String::new(),
            },
            defaults: GenerationDefaults {
                temperature: 1.0,
                top_p: 0.95,
                top_k: 64,
                max_tokens: 65536,
            },
            security: SecurityConfig {
                max_request_size: 50 * 1024 * 1024,
                api_key: String::new(),
                admin_password: String::new(),
            },
            system_instruction: String::new(),
        }
    }
}

/// Optional layer used when merging CLI and environment over the file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GatewayConfigPatch {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub oauth_client_id: Option<String>,
    pub oauth_client_secret: Option<String>,
}

impl GatewayConfigPatch {
    pub fn overlay(&mut self, other: GatewayConfigPatch) {
        if other.host.is_some() {
            self.host = other.host;
        }
        if other.port.is_some() {
            self.port = other.port;
        }
        if other.oauth_client_id.is_some() {
            self.oauth_client_id = other.oauth_client_id;
        }
        if other.oauth_client_secret.is_some() {
            self.oauth_client_secret = other.oauth_client_secret;
        }
    }

    pub fn apply(self, config: &mut GatewayConfig) {
        if let Some(host) = self.host {
            config.server.host = host;
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(client_id) = self.oauth_client_id {
            config.oauth.client_id = client_id;
        }
        if let Some(client_secret) = self.oauth_client_secret {
            config.oauth.client_secret = client_secret;
        }
    }

    pub fn from_env() -> Self {
        Self {
            host: None,
            port: None,
            oauth_client_id: std::env::var("OAUTH_CLIENT_ID")
                .ok()
                .filter(|value| !value.trim().is_empty()),
            oauth_client_secret: std::env::var("OAUTH_CLIENT_SECRET")
                .ok()
                .filter(|value| !value.trim().is_empty()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn patch_overlay_prefers_newer_values() {
        let mut base = GatewayConfigPatch {
            host: Some("127.0.0.1".to_string()),
            port: Some(8045),
            ..Default::default()
        };
        base.overlay(GatewayConfigPatch {
            port: Some(9000),
            ..Default::default()
        });
        assert_eq!(base.host.as_deref(), Some("127.0.0.1"));
        assert_eq!(base.port, Some(9000));
    }

    #[test]
    fn apply_only_touches_present_fields() {
        let mut config = GatewayConfig::default();
        config.oauth.client_id = "file-id".to_string();
        GatewayConfigPatch {
            oauth_client_secret: Some("env-secret".to_string()),
            ..Default::default()
        }
        .apply(&mut config);
        assert_eq!(config.oauth.client_id, "file-id");
        assert_eq!(config.oauth.client_secret, "env-secret");
    }

    #[test]
    fn config_json_field_names_are_stable() {
        let json = serde_json::to_value(GatewayConfig::default()).unwrap();
        assert!(json.get("systemInstruction").is_some());
        assert!(json["api"].get("modelsUrl").is_some());
        assert!(json["security"].get("maxRequestSize").is_some());
        assert!(json["oauth"].get("clientId").is_some());
    }
}
