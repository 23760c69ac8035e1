// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Runtime Configuration
//!
//! This module defines environment variable names and default values used
//! by the three roles of the binary. Configuration is loaded from the
//! environment at startup and parsed into one typed struct per role.
//!
//! ## Environment Variables
//!
//! | Variable | Role | Description | Default |
//! |----------|------|-------------|---------|
//! | `HOST` | enclave, host | Bind address for every listener | `0.0.0.0` |
//! | `ENCLAVE_PORT` | enclave | Channel API port | `9982` |
//! | `LOOPBACK_LISTEN_PORT` | enclave | Port of the outbound loopback relay | `443` |
//! | `HOST_PROXY_ADDR` | enclave | Where the outbound relay forwards | `127.0.0.1:9981` |
//! | `ATTESTATION_MODE` | enclave | `mock` or `authority` | `mock` if built with `mock-attestation` |
//! | `ATTESTATION_CA_KEY_PATH` | enclave | PKCS#8 PEM key of the local authority | Required for `authority` |
//! | `ATTESTATION_CA_CERT_PATH` | enclave | Root certificate JSON of the local authority | Required for `authority` |
//! | `ENCLAVE_MODULE_ID` | enclave | Module id written into the document | `enclave-bridge` |
//! | `ENCLAVE_PCRS` | enclave | Measurements reported in the document (`0=hex,1=hex`) | none |
//! | `OPENAI_BASE_URL` | enclave | OpenAI API base URL | `https://api.openai.com` |
//! | `ANTHROPIC_BASE_URL` | enclave | Anthropic API base URL | `https://api.anthropic.com` |
//! | `GEMINI_BASE_URL` | enclave | Gemini API base URL | `https://generativelanguage.googleapis.com` |
//! | `UPSTREAM_TEE_ENDPOINT` | enclave | Chain requests to this enclave instead of calling a model | none |
//! | `UPSTREAM_ROOT_CA_PATH` | enclave | Root certificate JSON pinned for the upstream | Required with an upstream, without `mock-attestation` |
//! | `UPSTREAM_TIMEOUT_SECS` | enclave | HTTP timeout per upstream request | `30` |
//! | `HOST_PROXY_PORT` | host | SNI relay port | `9981` |
//! | `HOST_SERVER_PORT` | host | Inbound relay port | `8000` |
//! | `ENCLAVE_ADDR` | host | Where the inbound relay forwards | `127.0.0.1:9982` |
//! | `RELAY_PEEK_BUDGET` | host | Bytes read while looking for a ClientHello | `4096` |
//! | `RELAY_UPSTREAM_PORT` | host | Port dialed on the SNI host | `443` |
//! | `RELAY_CONNECT_TIMEOUT_SECS` | enclave, host | Upstream connect timeout, `0` disables | `10` |
//! | `TEE_ENDPOINT` | client | Base URL of the enclave API | `http://127.0.0.1:8000` |
//! | `ROOT_CA_PATH` | client | Pinned root certificate JSON | Required without `mock-attestation` |
//! | `EXPECTED_PCRS` | client | Measurements the document must carry (`0=hex`) | none |
//! | `ATTESTATION_MAX_AGE_SECS` | client | Oldest accepted document | no limit |
//! | `PLATFORM_API_KEY` | client | API key forwarded to the model platform | Required |
//! | `PLATFORM` | client | Model platform | `openai` |
//! | `MODEL` | client | Model name | `gpt-4` |
//! | `CLIENT_TIMEOUT_SECS` | client | HTTP timeout per request | `30` |
//! | `LOG_FORMAT` | all | Logging format (`json` or `pretty`) | `pretty` |
//! | `RUST_LOG` | all | Log level filter | `info,tower_http=debug` |

use std::collections::BTreeMap;
use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use url::Url;

use crate::attestation::MeasurementPolicy;
use crate::providers::ProviderEndpoints;
use crate::relay::network::NetworkRelayConfig;

/// Environment variable name for the listener bind address.
///
/// # Default
/// `0.0.0.0`
pub const HOST_ENV: &str = "HOST";

pub const ENCLAVE_PORT_ENV: &str = "ENCLAVE_PORT";
pub const LOOPBACK_LISTEN_PORT_ENV: &str = "LOOPBACK_LISTEN_PORT";
pub const HOST_PROXY_ADDR_ENV: &str = "HOST_PROXY_ADDR";

/// Selects how the enclave attests its channel key.
///
/// `mock` publishes the bare public key and is only accepted by clients
/// built with the `mock-attestation` feature. `authority` issues a signed
/// document from the local authority whose key and root certificate are
/// given by [`ATTESTATION_CA_KEY_PATH_ENV`] and [`ATTESTATION_CA_CERT_PATH_ENV`].
pub const ATTESTATION_MODE_ENV: &str = "ATTESTATION_MODE";
pub const ATTESTATION_CA_KEY_PATH_ENV: &str = "ATTESTATION_CA_KEY_PATH";
pub const ATTESTATION_CA_CERT_PATH_ENV: &str = "ATTESTATION_CA_CERT_PATH";
pub const ENCLAVE_MODULE_ID_ENV: &str = "ENCLAVE_MODULE_ID";
pub const ENCLAVE_PCRS_ENV: &str = "ENCLAVE_PCRS";

pub const OPENAI_BASE_URL_ENV: &str = "OPENAI_BASE_URL";
pub const ANTHROPIC_BASE_URL_ENV: &str = "ANTHROPIC_BASE_URL";
pub const GEMINI_BASE_URL_ENV: &str = "GEMINI_BASE_URL";

/// Base URL of an upstream enclave.
///
/// When set, the enclave answers `/talk` by running the research flow
/// against this upstream and returning its signed stage replies.
pub const UPSTREAM_TEE_ENDPOINT_ENV: &str = "UPSTREAM_TEE_ENDPOINT";
pub const UPSTREAM_ROOT_CA_PATH_ENV: &str = "UPSTREAM_ROOT_CA_PATH";
pub const UPSTREAM_TIMEOUT_SECS_ENV: &str = "UPSTREAM_TIMEOUT_SECS";

pub const HOST_PROXY_PORT_ENV: &str = "HOST_PROXY_PORT";
pub const HOST_SERVER_PORT_ENV: &str = "HOST_SERVER_PORT";
pub const ENCLAVE_ADDR_ENV: &str = "ENCLAVE_ADDR";
pub const RELAY_PEEK_BUDGET_ENV: &str = "RELAY_PEEK_BUDGET";
pub const RELAY_UPSTREAM_PORT_ENV: &str = "RELAY_UPSTREAM_PORT";

/// Timeout in seconds for upstream connects made by either relay.
///
/// # Default
/// `10`. A value of `0` waits indefinitely.
pub const RELAY_CONNECT_TIMEOUT_SECS_ENV: &str = "RELAY_CONNECT_TIMEOUT_SECS";

pub const TEE_ENDPOINT_ENV: &str = "TEE_ENDPOINT";

/// Path of the root certificate JSON the client pins.
///
/// Produced by `enclave-bridge issue-root`. Without it, a client built with
/// `mock-attestation` accepts only mock responses and any other build
/// refuses to start.
pub const ROOT_CA_PATH_ENV: &str = "ROOT_CA_PATH";
pub const EXPECTED_PCRS_ENV: &str = "EXPECTED_PCRS";
pub const ATTESTATION_MAX_AGE_SECS_ENV: &str = "ATTESTATION_MAX_AGE_SECS";
pub const PLATFORM_API_KEY_ENV: &str = "PLATFORM_API_KEY";
pub const PLATFORM_ENV: &str = "PLATFORM";
pub const MODEL_ENV: &str = "MODEL";
pub const CLIENT_TIMEOUT_SECS_ENV: &str = "CLIENT_TIMEOUT_SECS";

/// Environment variable name for the log output format.
///
/// # Default
/// `pretty`
pub const LOG_FORMAT_ENV: &str = "LOG_FORMAT";

pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_ENCLAVE_PORT: u16 = 9982;
pub const DEFAULT_LOOPBACK_LISTEN_PORT: u16 = 443;
pub const DEFAULT_HOST_PROXY_ADDR: &str = "127.0.0.1:9981";
pub const DEFAULT_MODULE_ID: &str = "enclave-bridge";
pub const DEFAULT_HOST_PROXY_PORT: u16 = 9981;
pub const DEFAULT_HOST_SERVER_PORT: u16 = 8000;
pub const DEFAULT_ENCLAVE_ADDR: &str = "127.0.0.1:9982";
pub const DEFAULT_TEE_ENDPOINT: &str = "http://127.0.0.1:8000";
pub const DEFAULT_PLATFORM: &str = "openai";
pub const DEFAULT_MODEL: &str = "gpt-4";
pub const DEFAULT_CLIENT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_RELAY_CONNECT_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("invalid {var}={value:?}: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },

    #[error("mock attestation is not available in this build")]
    MockDisabled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttestationMode {
    Mock,
    Authority { key_path: PathBuf, cert_path: PathBuf },
}

/// Where a chaining enclave sends its stages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamConfig {
    pub endpoint: Url,
    pub root_ca_path: Option<PathBuf>,
    pub timeout: Duration,
}

/// Configuration of the `enclave` role.
#[derive(Debug, Clone)]
pub struct EnclaveConfig {
    pub host: String,
    pub port: u16,
    pub loopback_port: u16,
    pub host_proxy_addr: String,
    pub connect_timeout: Option<Duration>,
    pub attestation: AttestationMode,
    pub module_id: String,
    pub pcrs: BTreeMap<u8, String>,
    pub providers: ProviderEndpoints,
    pub upstream: Option<UpstreamConfig>,
}

impl EnclaveConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(env_lookup)
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = ProviderEndpoints::default();
        Ok(Self {
            host: string_or(&lookup, HOST_ENV, DEFAULT_HOST),
            port: parse_or(&lookup, ENCLAVE_PORT_ENV, DEFAULT_ENCLAVE_PORT)?,
            loopback_port: parse_or(&lookup, LOOPBACK_LISTEN_PORT_ENV, DEFAULT_LOOPBACK_LISTEN_PORT)?,
            host_proxy_addr: string_or(&lookup, HOST_PROXY_ADDR_ENV, DEFAULT_HOST_PROXY_ADDR),
            connect_timeout: connect_timeout(&lookup)?,
            attestation: attestation_mode(&lookup)?,
            module_id: string_or(&lookup, ENCLAVE_MODULE_ID_ENV, DEFAULT_MODULE_ID),
            pcrs: pcrs(&lookup, ENCLAVE_PCRS_ENV)?,
            providers: ProviderEndpoints {
                openai: string_or(&lookup, OPENAI_BASE_URL_ENV, &defaults.openai),
                anthropic: string_or(&lookup, ANTHROPIC_BASE_URL_ENV, &defaults.anthropic),
                gemini: string_or(&lookup, GEMINI_BASE_URL_ENV, &defaults.gemini),
            },
            upstream: upstream(&lookup)?,
        })
    }

    pub fn api_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn loopback_addr(&self) -> String {
        format!("{}:{}", self.host, self.loopback_port)
    }
}

/// Configuration of the `host` role.
#[derive(Debug, Clone)]
pub struct HostConfig {
    pub host: String,
    pub proxy_port: u16,
    pub server_port: u16,
    pub enclave_addr: String,
    pub relay: NetworkRelayConfig,
}

impl HostConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(env_lookup)
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = NetworkRelayConfig::default();
        let peek_budget = parse_or(&lookup, RELAY_PEEK_BUDGET_ENV, defaults.peek_budget)?;
        if peek_budget == 0 {
            return Err(ConfigError::Invalid {
                var: RELAY_PEEK_BUDGET_ENV,
                value: "0".to_string(),
                reason: "must be positive".to_string(),
            });
        }

        Ok(Self {
            host: string_or(&lookup, HOST_ENV, DEFAULT_HOST),
            proxy_port: parse_or(&lookup, HOST_PROXY_PORT_ENV, DEFAULT_HOST_PROXY_PORT)?,
            server_port: parse_or(&lookup, HOST_SERVER_PORT_ENV, DEFAULT_HOST_SERVER_PORT)?,
            enclave_addr: string_or(&lookup, ENCLAVE_ADDR_ENV, DEFAULT_ENCLAVE_ADDR),
            relay: NetworkRelayConfig {
                peek_budget,
                upstream_port: parse_or(&lookup, RELAY_UPSTREAM_PORT_ENV, defaults.upstream_port)?,
                connect_timeout: connect_timeout(&lookup)?,
            },
        })
    }

    pub fn proxy_addr(&self) -> String {
        format!("{}:{}", self.host, self.proxy_port)
    }

    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.host, self.server_port)
    }
}

/// Configuration of the `client` role.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub endpoint: Url,
    pub root_ca_path: Option<PathBuf>,
    pub policy: MeasurementPolicy,
    pub max_age: Option<chrono::Duration>,
    pub api_key: String,
    pub platform: String,
    pub model: String,
    pub timeout: Duration,
}

impl ClientConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(env_lookup)
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let endpoint = parse_or(
            &lookup,
            TEE_ENDPOINT_ENV,
            Url::parse(DEFAULT_TEE_ENDPOINT).map_err(|e| ConfigError::Invalid {
                var: TEE_ENDPOINT_ENV,
                value: DEFAULT_TEE_ENDPOINT.to_string(),
                reason: e.to_string(),
            })?,
        )?;

        let root_ca_path = non_empty(&lookup, ROOT_CA_PATH_ENV).map(PathBuf::from);
        #[cfg(not(feature = "mock-attestation"))]
        if root_ca_path.is_none() {
            return Err(ConfigError::Missing(ROOT_CA_PATH_ENV));
        }

        let policy = pcrs(&lookup, EXPECTED_PCRS_ENV)?
            .into_iter()
            .fold(MeasurementPolicy::any(), |policy, (index, value)| {
                policy.require(index, value)
            });

        let max_age = match non_empty(&lookup, ATTESTATION_MAX_AGE_SECS_ENV) {
            Some(_) => {
                let secs: i64 = parse_or(&lookup, ATTESTATION_MAX_AGE_SECS_ENV, 0)?;
                Some(chrono::Duration::seconds(secs))
            }
            None => None,
        };

        let api_key = non_empty(&lookup, PLATFORM_API_KEY_ENV)
            .ok_or(ConfigError::Missing(PLATFORM_API_KEY_ENV))?;
        let timeout = parse_or(&lookup, CLIENT_TIMEOUT_SECS_ENV, DEFAULT_CLIENT_TIMEOUT_SECS)?;

        Ok(Self {
            endpoint,
            root_ca_path,
            policy,
            max_age,
            api_key,
            platform: string_or(&lookup, PLATFORM_ENV, DEFAULT_PLATFORM),
            model: string_or(&lookup, MODEL_ENV, DEFAULT_MODEL),
            timeout: Duration::from_secs(timeout),
        })
    }
}

fn env_lookup(var: &str) -> Option<String> {
    std::env::var(var).ok()
}

fn non_empty(lookup: &impl Fn(&str) -> Option<String>, var: &str) -> Option<String> {
    lookup(var)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn string_or(lookup: &impl Fn(&str) -> Option<String>, var: &str, default: &str) -> String {
    non_empty(lookup, var).unwrap_or_else(|| default.to_string())
}

fn parse_or<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: T,
) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    match non_empty(lookup, var) {
        Some(value) => value.parse().map_err(|e: T::Err| ConfigError::Invalid {
            var,
            reason: e.to_string(),
            value,
        }),
        None => Ok(default),
    }
}

fn connect_timeout(lookup: &impl Fn(&str) -> Option<String>) -> Result<Option<Duration>, ConfigError> {
    let secs = parse_or(
        lookup,
        RELAY_CONNECT_TIMEOUT_SECS_ENV,
        DEFAULT_RELAY_CONNECT_TIMEOUT_SECS,
    )?;
    Ok((secs > 0).then(|| Duration::from_secs(secs)))
}

fn upstream(lookup: &impl Fn(&str) -> Option<String>) -> Result<Option<UpstreamConfig>, ConfigError> {
    let Some(raw) = non_empty(lookup, UPSTREAM_TEE_ENDPOINT_ENV) else {
        return Ok(None);
    };
    let endpoint = Url::parse(&raw).map_err(|e| ConfigError::Invalid {
        var: UPSTREAM_TEE_ENDPOINT_ENV,
        value: raw.clone(),
        reason: e.to_string(),
    })?;

    let root_ca_path = non_empty(lookup, UPSTREAM_ROOT_CA_PATH_ENV).map(PathBuf::from);
    #[cfg(not(feature = "mock-attestation"))]
    if root_ca_path.is_none() {
        return Err(ConfigError::Missing(UPSTREAM_ROOT_CA_PATH_ENV));
    }

    let timeout = parse_or(lookup, UPSTREAM_TIMEOUT_SECS_ENV, DEFAULT_CLIENT_TIMEOUT_SECS)?;
    Ok(Some(UpstreamConfig {
        endpoint,
        root_ca_path,
        timeout: Duration::from_secs(timeout),
    }))
}

fn attestation_mode(lookup: &impl Fn(&str) -> Option<String>) -> Result<AttestationMode, ConfigError> {
    let default_mode = if cfg!(feature = "mock-attestation") {
        "mock"
    } else {
        "authority"
    };
    let mode = string_or(lookup, ATTESTATION_MODE_ENV, default_mode).to_lowercase();

    match mode.as_str() {
        "mock" if cfg!(feature = "mock-attestation") => Ok(AttestationMode::Mock),
        "mock" => Err(ConfigError::MockDisabled),
        "authority" => Ok(AttestationMode::Authority {
            key_path: non_empty(lookup, ATTESTATION_CA_KEY_PATH_ENV)
                .map(PathBuf::from)
                .ok_or(ConfigError::Missing(ATTESTATION_CA_KEY_PATH_ENV))?,
            cert_path: non_empty(lookup, ATTESTATION_CA_CERT_PATH_ENV)
                .map(PathBuf::from)
                .ok_or(ConfigError::Missing(ATTESTATION_CA_CERT_PATH_ENV))?,
        }),
        _ => Err(ConfigError::Invalid {
            var: ATTESTATION_MODE_ENV,
            value: mode,
            reason: "expected `mock` or `authority`".to_string(),
        }),
    }
}

/// Parse `0=hex,1=hex` into a measurement map. Values are lowercased.
fn pcrs(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<BTreeMap<u8, String>, ConfigError> {
    let Some(raw) = non_empty(lookup, var) else {
        return Ok(BTreeMap::new());
    };

    let invalid = |reason: &str| ConfigError::Invalid {
        var,
        value: raw.clone(),
        reason: reason.to_string(),
    };

    let mut pcrs = BTreeMap::new();
    for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let (index, value) = entry
            .split_once('=')
            .ok_or_else(|| invalid("expected index=hex"))?;
        let index: u8 = index
            .trim()
            .parse()
            .map_err(|_| invalid("index must be 0-255"))?;
        let value = value.trim().to_lowercase();
        if value.is_empty() || hex::decode(&value).is_err() {
            return Err(invalid("value must be hex"));
        }
        pcrs.insert(index, value);
    }
    Ok(pcrs)
}
