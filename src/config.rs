use anyhow::{bail, Context};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub access_secret: String,
    pub refresh_secret: String,
    pub issuer: String,
    pub audience: String,
    pub access_ttl_seconds: i64,
    pub refresh_ttl_seconds: i64,
}

/// S3 / MinIO bucket used as the media store.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    pub endpoint: String,
    pub bucket: String,
    pub access_key: String,
    pub secret_key: String,
    pub region: String,
    pub public_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    pub jwt: JwtConfig,
    pub storage: StorageConfig,
    pub cookie_path: String,
    pub cors_origin: Option<String>,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from any key/value source. Missing required keys are fatal.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| -> anyhow::Result<String> {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .with_context(|| format!("missing required environment variable {key}"))
        };
        let expiry = |key: &str, default: &str| -> anyhow::Result<i64> {
            let raw = lookup(key).unwrap_or_else(|| default.to_string());
            parse_expiry(&raw).with_context(|| format!("invalid {key}: {raw:?}"))
        };

        let jwt = JwtConfig {
            access_secret: required("ACCESS_TOKEN_SECRET")?,
            refresh_secret: required("REFRESH_TOKEN_SECRET")?,
            issuer: lookup("JWT_ISSUER").unwrap_or_else(|| "vidtube".into()),
            audience: lookup("JWT_AUDIENCE").unwrap_or_else(|| "vidtube-users".into()),
            access_ttl_seconds: expiry("ACCESS_TOKEN_EXPIRY", "1d")?,
            refresh_ttl_seconds: expiry("REFRESH_TOKEN_EXPIRY", "10d")?,
        };
        if jwt.access_secret == jwt.refresh_secret {
            bail!("ACCESS_TOKEN_SECRET and REFRESH_TOKEN_SECRET must differ");
        }

        let endpoint = required("MINIO_ENDPOINT")?;
        let bucket = required("MINIO_BUCKET")?;
        let storage = StorageConfig {
            public_url: lookup("MINIO_PUBLIC_URL").unwrap_or_else(|| endpoint.clone()),
            endpoint,
            bucket,
            access_key: required("MINIO_ACCESS_KEY")?,
            secret_key: required("MINIO_SECRET_KEY")?,
            region: lookup("MINIO_REGION").unwrap_or_else(|| "us-east-1".into()),
        };

        Ok(Self {
            database_url: required("DATABASE_URL")?,
            jwt,
            storage,
            cookie_path: lookup("COOKIE_PATH").unwrap_or_else(|| "/api/v1".into()),
            cors_origin: lookup("CORS_ORIGIN").filter(|v| !v.trim().is_empty()),
        })
    }
}

/// Longest lifetime a token may be configured with: ten years.
pub const MAX_EXPIRY_SECONDS: i64 = 10 * 365 * 24 * 60 * 60;

/// Parses `"3600"`, `"30s"`, `"15m"`, `"2h"`, `"1d"`, `"1w"` into seconds.
pub fn parse_expiry(raw: &str) -> anyhow::Result<i64> {
    let raw = raw.trim();
    let split = raw
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(raw.len());
    let (digits, unit) = raw.split_at(split);
    let value: i64 = digits.parse().context("expiry must start with a number")?;
    let multiplier = match unit.trim() {
        "" | "s" => 1,
        "m" => 60,
        "h" => 60 * 60,
        "d" => 60 * 60 * 24,
        "w" => 60 * 60 * 24 * 7,
        other => bail!("unknown expiry unit {other:?}"),
    };
    if value <= 0 {
        bail!("expiry must be positive");
    }
    match value.checked_mul(multiplier) {
        Some(seconds) if seconds <= MAX_EXPIRY_SECONDS => Ok(seconds),
        _ => bail!("expiry must not exceed {MAX_EXPIRY_SECONDS} seconds"),
    }
}
