use std::env;
use std::fs;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use reqwest::Url;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::swap::Commitment;

pub const JUPITER_ULTRA_URL: &str = "https://api.jup.ag/ultra/v1";
pub const JUPITER_PRICE_URL: &str = "https://api.jup.ag/price/v3";
pub const MAX_SLIPPAGE_BPS: u16 = 10_000;

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Config {
    pub account: AccountConfig,
    #[serde(default)]
    pub jupiter: JupiterConfig,
    #[serde(default)]
    pub sell: SellConfig,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct AccountConfig {
    #[serde(
        default = "default_secret_string",
        deserialize_with = "deserialize_secret_string",
        serialize_with = "serialize_secret_string"
    )]
    pub rpc_url: SecretString,
    #[serde(
        default = "default_secret_string",
        deserialize_with = "deserialize_secret_string",
        serialize_with = "serialize_secret_string"
    )]
    pub jupiter_api_key: SecretString,
    /// Vault passphrase for the users' key blobs.
    #[serde(
        default = "default_secret_string",
        deserialize_with = "deserialize_secret_string",
        serialize_with = "serialize_secret_string"
    )]
    pub encryption_key: SecretString,
    #[serde(default)]
    pub users_path: String,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct JupiterConfig {
    #[serde(default = "default_ultra_url")]
    pub ultra_url: String,
    #[serde(default = "default_price_url")]
    pub price_url: String,
    #[serde(default = "default_request_timeout_sec")]
    pub request_timeout_sec: u64,
    #[serde(default = "default_swap_timeout_sec")]
    pub swap_timeout_sec: u64,
}

impl Default for JupiterConfig {
    fn default() -> Self {
        Self {
            ultra_url: default_ultra_url(),
            price_url: default_price_url(),
            request_timeout_sec: default_request_timeout_sec(),
            swap_timeout_sec: default_swap_timeout_sec(),
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SellConfig {
    #[serde(default = "default_slippage_bps")]
    pub slippage_bps: u16,
    #[serde(default = "default_confirm_timeout_sec")]
    pub confirm_timeout_sec: u64,
    #[serde(default = "default_pending_ttl_sec")]
    pub pending_ttl_sec: u64,
    #[serde(default)]
    pub commitment: Commitment,
}

impl Default for SellConfig {
    fn default() -> Self {
        Self {
            slippage_bps: default_slippage_bps(),
            confirm_timeout_sec: default_confirm_timeout_sec(),
            pending_ttl_sec: default_pending_ttl_sec(),
            commitment: Commitment::default(),
        }
    }
}

fn default_ultra_url() -> String {
    JUPITER_ULTRA_URL.to_string()
}

fn default_price_url() -> String {
    JUPITER_PRICE_URL.to_string()
}

fn default_request_timeout_sec() -> u64 {
    15
}

fn default_swap_timeout_sec() -> u64 {
    30
}

fn default_slippage_bps() -> u16 {
    50
}

fn default_confirm_timeout_sec() -> u64 {
    30
}

fn default_pending_ttl_sec() -> u64 {
    600
}

fn default_secret_string() -> SecretString {
    SecretString::new(String::new())
}

fn env_nonempty(var: &str) -> Option<String> {
    match env::var(var) {
        Ok(value) => {
            let trimmed = value.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        }
        Err(_) => None,
    }
}

fn deserialize_secret_string<'de, D>(deserializer: D) -> Result<SecretString, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(SecretString::new(value.unwrap_or_default()))
}

fn serialize_secret_string<S>(value: &SecretString, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(value.expose_secret())
}

impl Config {
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("read config file {}", path.display()))?;
        let mut cfg = Self::parse_yaml(&raw)
            .with_context(|| format!("parse yaml config {}", path.display()))?;
        cfg.apply_env_overrides();
        cfg.validate()?;
        Ok(cfg)
    }

    fn parse_yaml(raw: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(raw)?)
    }

    fn apply_env_overrides(&mut self) {
        if let Some(value) = env_nonempty("SELLFLOW_RPC_URL") {
            self.account.rpc_url = SecretString::new(value);
        }
        if let Some(value) =
            env_nonempty("SELLFLOW_JUPITER_API_KEY").or_else(|| env_nonempty("JUPITER_API_KEY"))
        {
            self.account.jupiter_api_key = SecretString::new(value);
        }
        if let Some(value) = env_nonempty("SELLFLOW_ENCRYPTION_KEY") {
            self.account.encryption_key = SecretString::new(value);
        }
        if let Some(path) = env_nonempty("SELLFLOW_USERS_PATH") {
            self.account.users_path = path;
        }
    }

    pub fn http_rpc_url(&self) -> String {
        self.account.rpc_url.expose_secret().trim().to_string()
    }

    pub fn jupiter_api_key(&self) -> Option<SecretString> {
        let key = self.account.jupiter_api_key.expose_secret().trim();
        if key.is_empty() {
            None
        } else {
            Some(SecretString::new(key.to_string()))
        }
    }

    pub fn users_path(&self) -> Result<PathBuf> {
        let configured = self.account.users_path.trim();
        if configured.is_empty() {
            crate::util::paths::default_users_path()
        } else {
            Ok(PathBuf::from(configured))
        }
    }

    /// Values the log writer must never print.
    pub fn secret_values(&self) -> Vec<String> {
        vec![
            self.account.rpc_url.expose_secret().to_string(),
            self.account.jupiter_api_key.expose_secret().to_string(),
            self.account.encryption_key.expose_secret().to_string(),
        ]
    }

    pub fn rpc_connect_timeout(&self) -> Duration {
        Duration::from_secs(5)
    }

    pub fn rpc_request_timeout(&self) -> Duration {
        Duration::from_secs(10)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.jupiter.request_timeout_sec)
    }

    pub fn swap_timeout(&self) -> Duration {
        Duration::from_secs(self.jupiter.swap_timeout_sec)
    }

    pub fn confirm_timeout(&self) -> Duration {
        Duration::from_secs(self.sell.confirm_timeout_sec)
    }

    pub fn pending_ttl(&self) -> Duration {
        Duration::from_secs(self.sell.pending_ttl_sec)
    }

    pub fn validate(&self) -> Result<()> {
        let raw = self.account.rpc_url.expose_secret().trim();
        if raw.is_empty() {
            return Err(anyhow!("account.rpc_url must not be empty"));
        }
        let url = Url::parse(raw).map_err(|_| anyhow!("account.rpc_url must be a valid URL"))?;
        match url.scheme() {
            "https" => {}
            "http" => {
                let host = url
                    .host_str()
                    .ok_or_else(|| anyhow!("account.rpc_url host is missing"))?;
                if !is_local_or_private_host(host) {
                    return Err(anyhow!(
                        "account.rpc_url http:// is allowed only for localhost/private endpoints"
                    ));
                }
                if !config_warnings_suppressed() {
                    eprintln!(
                        "Warning: account.rpc_url uses http:// for local/private endpoint ({host}); use https:// in production."
                    );
                }
            }
            _ => {
                return Err(anyhow!(
                    "account.rpc_url must start with https:// (or http:// for local/private endpoints)"
                ));
            }
        }
        if self.account.encryption_key.expose_secret().trim().is_empty() {
            return Err(anyhow!("account.encryption_key must not be empty"));
        }
        for (field, value) in [
            ("jupiter.ultra_url", &self.jupiter.ultra_url),
            ("jupiter.price_url", &self.jupiter.price_url),
        ] {
            let url = Url::parse(value.trim())
                .map_err(|_| anyhow!("{field} must be a valid URL"))?;
            if !matches!(url.scheme(), "https" | "http") {
                return Err(anyhow!("{field} must be an http(s) URL"));
            }
        }
        if self.jupiter.request_timeout_sec == 0 || self.jupiter.swap_timeout_sec == 0 {
            return Err(anyhow!("jupiter timeouts must be > 0"));
        }
        if self.sell.slippage_bps > MAX_SLIPPAGE_BPS {
            return Err(anyhow!(
                "sell.slippage_bps must be <= {MAX_SLIPPAGE_BPS}, got {}",
                self.sell.slippage_bps
            ));
        }
        if self.sell.confirm_timeout_sec == 0 {
            return Err(anyhow!("sell.confirm_timeout_sec must be > 0"));
        }
        if self.sell.pending_ttl_sec == 0 {
            return Err(anyhow!("sell.pending_ttl_sec must be > 0"));
        }
        Ok(())
    }
}

fn is_local_or_private_host(host: &str) -> bool {
    let host = host.trim().to_ascii_lowercase();
    if host == "localhost" || host.ends_with(".localhost") || host.ends_with(".local") {
        return true;
    }

    let Ok(ip) = host.parse::<IpAddr>() else {
        return false;
    };

    match ip {
        IpAddr::V4(ip) => ip.is_loopback() || ip.is_private(),
        IpAddr::V6(ip) => ip.is_loopback() || ip.is_unique_local(),
    }
}

fn config_warnings_suppressed() -> bool {
    env_nonempty("SELLFLOW_SUPPRESS_CONFIG_WARNINGS")
        .map(|value| matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
account:
  rpc_url: "https://rpc.example.com/?api-key=abc"
  encryption_key: "vault-pass"
"#;

    #[test]
    fn minimal_config_gets_defaults() {
        let cfg = Config::parse_yaml(MINIMAL).unwrap();
        cfg.validate().unwrap();
        assert_eq!(cfg.sell.slippage_bps, 50);
        assert_eq!(cfg.sell.pending_ttl_sec, 600);
        assert_eq!(cfg.sell.commitment, Commitment::Confirmed);
        assert_eq!(cfg.jupiter.ultra_url, JUPITER_ULTRA_URL);
        assert_eq!(cfg.request_timeout(), Duration::from_secs(15));
        assert!(cfg.jupiter_api_key().is_none());
    }

    #[test]
    fn full_config_parses() {
        let raw = r#"
account:
  rpc_url: "http://127.0.0.1:8899"
  jupiter_api_key: "jup-key"
  encryption_key: "vault-pass"
  users_path: "/tmp/users.yml"
jupiter:
  ultra_url: "http://localhost:9000/ultra/v1"
  price_url: "http://localhost:9000/price/v3"
  request_timeout_sec: 5
  swap_timeout_sec: 20
sell:
  slippage_bps: 100
  confirm_timeout_sec: 45
  pending_ttl_sec: 120
  commitment: finalized
"#;
        let cfg = Config::parse_yaml(raw).unwrap();
        cfg.validate().unwrap();
        assert_eq!(cfg.sell.commitment, Commitment::Finalized);
        assert_eq!(cfg.users_path().unwrap(), PathBuf::from("/tmp/users.yml"));
        assert_eq!(
            cfg.jupiter_api_key().map(|key| key.expose_secret().clone()),
            Some("jup-key".to_string())
        );
    }

    #[test]
    fn rejects_public_http_rpc_and_bad_values() {
        let mut cfg = Config::parse_yaml(MINIMAL).unwrap();
        cfg.account.rpc_url = SecretString::new("http://rpc.example.com".to_string());
        assert!(cfg.validate().is_err());

        let mut cfg = Config::parse_yaml(MINIMAL).unwrap();
        cfg.account.encryption_key = SecretString::new("  ".to_string());
        assert!(cfg.validate().is_err());

        let mut cfg = Config::parse_yaml(MINIMAL).unwrap();
        cfg.sell.slippage_bps = 10_001;
        assert!(cfg.validate().is_err());

        let mut cfg = Config::parse_yaml(MINIMAL).unwrap();
        cfg.sell.pending_ttl_sec = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn unknown_sell_fields_are_rejected() {
        let raw = format!("{MINIMAL}sell:\n  slippage_pad_bps: 10\n");
        assert!(Config::parse_yaml(&raw).is_err());
    }
}
