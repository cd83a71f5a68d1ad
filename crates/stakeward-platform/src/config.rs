use anyhow::{Context, Result};

#[derive(Clone, Debug)]
pub struct ServiceConfig {
    pub database_url: String,
    pub db_max_connections: u32,
    pub redis_url: String,
    pub http_addr: String,
    /// Shared secret for verifying payment gateway webhook signatures.
    pub webhook_secret: String,
    /// Bearer secret for the internal reconcile endpoint.
    pub reconcile_secret: String,
    /// Pricing model applied to new commitments that do not pick one.
    pub default_pricing_model: String,
    pub gateway_timeout_ms: u64,
}

impl ServiceConfig {
    pub fn from_env(default_http_addr: &str) -> Result<Self> {
        let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL is required")?;
        let db_max_connections = parse_db_max_connections()?;
        let redis_url = std::env::var("REDIS_URL").context("REDIS_URL is required")?;
        let http_addr =
            std::env::var("HTTP_ADDR").unwrap_or_else(|_| default_http_addr.to_string());
        let webhook_secret =
            std::env::var("WEBHOOK_SECRET").context("WEBHOOK_SECRET is required")?;
        let reconcile_secret =
            std::env::var("RECONCILE_SECRET").context("RECONCILE_SECRET is required")?;
        let default_pricing_model =
            std::env::var("PRICING_MODEL").unwrap_or_else(|_| "percentage".to_string());
        let gateway_timeout_ms = std::env::var("GATEWAY_TIMEOUT_MS")
            .ok()
            .map(|raw| raw.parse::<u64>())
            .transpose()
            .context("GATEWAY_TIMEOUT_MS must be an integer")?
            .unwrap_or(10_000);

        Ok(Self {
            database_url,
            db_max_connections,
            redis_url,
            http_addr,
            webhook_secret,
            reconcile_secret,
            default_pricing_model,
            gateway_timeout_ms,
        })
    }

    pub fn worker_from_env() -> Result<Self> {
        let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL is required")?;
        let db_max_connections = parse_db_max_connections()?;
        let redis_url = std::env::var("REDIS_URL").context("REDIS_URL is required")?;

        Ok(Self {
            database_url,
            db_max_connections,
            redis_url,
            http_addr: String::new(),
            webhook_secret: String::new(),
            reconcile_secret: String::new(),
            default_pricing_model: "percentage".to_string(),
            gateway_timeout_ms: 10_000,
        })
    }
}

fn parse_db_max_connections() -> Result<u32> {
    db_max_connections_from(std::env::var("DATABASE_MAX_CONNECTIONS").ok().as_deref())
}

fn db_max_connections_from(raw: Option<&str>) -> Result<u32> {
    let Some(raw) = raw else {
        return Ok(10);
    };
    let parsed = raw
        .parse::<u32>()
        .context("DATABASE_MAX_CONNECTIONS must be an integer")?;
    anyhow::ensure!(parsed > 0, "DATABASE_MAX_CONNECTIONS must be positive");
    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_size_defaults_to_ten() {
        assert_eq!(db_max_connections_from(None).unwrap(), 10);
    }

    #[test]
    fn pool_size_is_parsed_and_validated() {
        assert_eq!(db_max_connections_from(Some("25")).unwrap(), 25);
        assert!(db_max_connections_from(Some("0")).is_err());
        assert!(db_max_connections_from(Some("lots")).is_err());
    }
}
