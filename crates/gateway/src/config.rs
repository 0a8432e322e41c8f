use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use portal_auth::OidcConfig;
use portal_directory::PgDirectoryOptions;
use portal_policy::OrganizationScopeMode;

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub bind_addr: SocketAddr,
    pub db_url: String,
    pub db_max_connections: u32,
    pub db_connect_timeout_ms: u64,
    pub db_query_timeout_ms: u64,
    pub auth_mode: AuthMode,
    pub local_auth_shared_secret: Option<String>,
    pub oidc: Option<OidcConfig>,
    pub metrics_require_auth: bool,
    pub org_scope_mode: OrganizationScopeMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMode {
    Local,
    Oidc,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartupError {
    pub code: &'static str,
    pub message: String,
}

impl std::fmt::Display for StartupError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for StartupError {}

impl GatewayConfig {
    pub fn load() -> Result<Self, StartupError> {
        let mut merged = HashMap::new();

        if let Ok(config_path) = std::env::var("PORTAL_CONFIG_PATH") {
            let config_path = config_path.trim();
            if !config_path.is_empty() {
                let file_kv = parse_env_file(config_path)?;
                merged.extend(file_kv);
            }
        }

        merged.extend(std::env::vars());

        Self::from_kv(&merged)
    }

    pub fn from_kv(kv: &HashMap<String, String>) -> Result<Self, StartupError> {
        let bind_addr = parse_socket_addr(
            kv.get("PORTAL_BIND_ADDR"),
            SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 8080),
            "PORTAL_BIND_ADDR",
        )?;

        let auth_mode = parse_auth_mode(kv.get("PORTAL_AUTH_MODE"))?;

        let dev_allow_nonlocal_bind =
            parse_bool(kv.get("PORTAL_DEV_ALLOW_NONLOCAL_BIND")).unwrap_or(false);

        if !bind_addr.ip().is_loopback() && auth_mode != AuthMode::Oidc {
            if dev_allow_nonlocal_bind && is_unspecified_ip(bind_addr.ip()) {
                // Local containers publish on 0.0.0.0 with header auth.
            } else {
                return Err(StartupError {
                    code: "ERR_NONLOCAL_BIND_REQUIRES_AUTH",
                    message: "non-local bind requires oidc auth mode; refuse startup".to_string(),
                });
            }
        }

        let db_url = require_nonempty(kv, "PORTAL_DB_URL")?;

        let db_max_connections = parse_u32(
            kv.get("PORTAL_DB_MAX_CONNECTIONS"),
            8,
            "PORTAL_DB_MAX_CONNECTIONS",
        )?;
        if db_max_connections == 0 {
            return Err(StartupError {
                code: "ERR_INVALID_CONFIG",
                message: "PORTAL_DB_MAX_CONNECTIONS must be >= 1".to_string(),
            });
        }

        let db_connect_timeout_ms = parse_u64(
            kv.get("PORTAL_DB_CONNECT_TIMEOUT_MS"),
            2000,
            "PORTAL_DB_CONNECT_TIMEOUT_MS",
        )?;
        let db_query_timeout_ms = parse_u64(
            kv.get("PORTAL_DB_QUERY_TIMEOUT_MS"),
            2000,
            "PORTAL_DB_QUERY_TIMEOUT_MS",
        )?;

        let local_auth_shared_secret = kv
            .get("PORTAL_LOCAL_AUTH_SHARED_SECRET")
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string());

        let oidc = if auth_mode == AuthMode::Oidc {
            Some(parse_oidc_config(kv)?)
        } else {
            None
        };

        let metrics_require_auth = match kv.get("PORTAL_METRICS_REQUIRE_AUTH") {
            None => false,
            Some(raw) if raw.trim().is_empty() => false,
            Some(raw) => parse_bool(Some(raw)).ok_or_else(|| StartupError {
                code: "ERR_INVALID_CONFIG",
                message: "PORTAL_METRICS_REQUIRE_AUTH must be a boolean".to_string(),
            })?,
        };

        let org_scope_mode = match kv
            .get("PORTAL_ORG_SCOPE_MODE")
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
        {
            None => OrganizationScopeMode::default(),
            Some(raw) => OrganizationScopeMode::parse(raw).map_err(|err| StartupError {
                code: "ERR_INVALID_CONFIG",
                message: format!("PORTAL_ORG_SCOPE_MODE: {}", err),
            })?,
        };

        Ok(Self {
            bind_addr,
            db_url,
            db_max_connections,
            db_connect_timeout_ms,
            db_query_timeout_ms,
            auth_mode,
            local_auth_shared_secret,
            oidc,
            metrics_require_auth,
            org_scope_mode,
        })
    }

    pub fn directory_options(&self) -> PgDirectoryOptions {
        PgDirectoryOptions {
            max_connections: self.db_max_connections,
            connect_timeout: Duration::from_millis(self.db_connect_timeout_ms),
            query_timeout: Duration::from_millis(self.db_query_timeout_ms),
        }
    }
}

fn parse_env_file(path: &str) -> Result<HashMap<String, String>, StartupError> {
    let contents = std::fs::read_to_string(path).map_err(|_| StartupError {
        code: "ERR_CONFIG_FILE_READ",
        message: format!("failed to read config file at {}", path),
    })?;

    parse_env_lines(&contents)
}

fn parse_env_lines(contents: &str) -> Result<HashMap<String, String>, StartupError> {
    let mut kv = HashMap::new();

    for (idx, raw_line) in contents.lines().enumerate() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let (key, value) = line.split_once('=').ok_or_else(|| StartupError {
            code: "ERR_CONFIG_FILE_PARSE",
            message: format!("invalid config line {} (expected KEY=VALUE)", idx + 1),
        })?;

        let key = key.trim();
        if key.is_empty() {
            return Err(StartupError {
                code: "ERR_CONFIG_FILE_PARSE",
                message: format!("invalid config line {} (empty key)", idx + 1),
            });
        }

        kv.insert(key.to_string(), strip_quotes(value.trim()));
    }

    Ok(kv)
}

fn strip_quotes(s: &str) -> String {
    let bytes = s.as_bytes();
    if bytes.len() >= 2 {
        let first = bytes[0];
        let last = bytes[bytes.len() - 1];
        if (first == b'"' && last == b'"') || (first == b'\'' && last == b'\'') {
            return s[1..bytes.len() - 1].to_string();
        }
    }
    s.to_string()
}

fn require_nonempty(
    kv: &HashMap<String, String>,
    key: &'static str,
) -> Result<String, StartupError> {
    kv.get(key)
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .map(|v| v.to_string())
        .ok_or_else(|| StartupError {
            code: "ERR_MISSING_CONFIG",
            message: format!("missing required config key {}", key),
        })
}

fn optional_nonempty(kv: &HashMap<String, String>, key: &str) -> Option<String> {
    kv.get(key)
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
}

fn parse_socket_addr(
    value: Option<&String>,
    default: SocketAddr,
    key: &'static str,
) -> Result<SocketAddr, StartupError> {
    match value {
        None => Ok(default),
        Some(v) if v.trim().is_empty() => Ok(default),
        Some(v) => v.trim().parse::<SocketAddr>().map_err(|_| StartupError {
            code: "ERR_INVALID_CONFIG",
            message: format!("{} must be a valid host:port socket address", key),
        }),
    }
}

fn parse_u64(value: Option<&String>, default: u64, key: &'static str) -> Result<u64, StartupError> {
    match value {
        None => Ok(default),
        Some(v) if v.trim().is_empty() => Ok(default),
        Some(v) => v.trim().parse::<u64>().map_err(|_| StartupError {
            code: "ERR_INVALID_CONFIG",
            message: format!("{} must be an integer", key),
        }),
    }
}

fn parse_u32(value: Option<&String>, default: u32, key: &'static str) -> Result<u32, StartupError> {
    match value {
        None => Ok(default),
        Some(v) if v.trim().is_empty() => Ok(default),
        Some(v) => v.trim().parse::<u32>().map_err(|_| StartupError {
            code: "ERR_INVALID_CONFIG",
            message: format!("{} must be an integer", key),
        }),
    }
}

fn parse_auth_mode(value: Option<&String>) -> Result<AuthMode, StartupError> {
    let mode = value
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .unwrap_or("local");

    match mode {
        "local" => Ok(AuthMode::Local),
        "oidc" => Ok(AuthMode::Oidc),
        _ => Err(StartupError {
            code: "ERR_INVALID_CONFIG",
            message: "PORTAL_AUTH_MODE must be local or oidc".to_string(),
        }),
    }
}

fn parse_oidc_config(kv: &HashMap<String, String>) -> Result<OidcConfig, StartupError> {
    let issuer = require_nonempty(kv, "PORTAL_OIDC_ISSUER")?;

    let jwks_json = optional_nonempty(kv, "PORTAL_OIDC_JWKS_JSON");
    let jwks_url = optional_nonempty(kv, "PORTAL_OIDC_JWKS_URL");
    if jwks_json.is_none() && jwks_url.is_none() {
        return Err(StartupError {
            code: "ERR_INVALID_CONFIG",
            message: "oidc requires PORTAL_OIDC_JWKS_URL or PORTAL_OIDC_JWKS_JSON".to_string(),
        });
    }

    let identity_claim =
        optional_nonempty(kv, "PORTAL_OIDC_IDENTITY_CLAIM").unwrap_or_else(|| "sub".to_string());

    let jwks_timeout_ms = parse_u64(
        kv.get("PORTAL_OIDC_JWKS_TIMEOUT_MS"),
        2000,
        "PORTAL_OIDC_JWKS_TIMEOUT_MS",
    )?;
    let jwks_refresh_ttl_secs = parse_u64(
        kv.get("PORTAL_OIDC_JWKS_REFRESH_TTL_SECS"),
        300,
        "PORTAL_OIDC_JWKS_REFRESH_TTL_SECS",
    )?;
    let clock_skew_secs = parse_u64(
        kv.get("PORTAL_OIDC_CLOCK_SKEW_SECS"),
        60,
        "PORTAL_OIDC_CLOCK_SKEW_SECS",
    )?;

    Ok(OidcConfig {
        issuer,
        audience: optional_nonempty(kv, "PORTAL_OIDC_AUDIENCE"),
        jwks_url,
        jwks_json,
        jwks_timeout: Duration::from_millis(jwks_timeout_ms),
        jwks_refresh_ttl: Duration::from_secs(jwks_refresh_ttl_secs),
        clock_skew: Duration::from_secs(clock_skew_secs),
        identity_claim,
        session_cookie: optional_nonempty(kv, "PORTAL_OIDC_SESSION_COOKIE"),
    })
}

fn parse_bool(value: Option<&String>) -> Option<bool> {
    let value = value.map(|v| v.trim()).filter(|v| !v.is_empty())?;

    match value {
        "1" | "true" | "TRUE" | "yes" | "YES" => Some(true),
        "0" | "false" | "FALSE" | "no" | "NO" => Some(false),
        _ => None,
    }
}

fn is_unspecified_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_unspecified(),
        IpAddr::V6(v6) => v6.is_unspecified(),
    }
}
