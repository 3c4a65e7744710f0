use std::{env, str::FromStr, time::Duration};

use anyhow::{Context, Result, ensure};

use crate::models::ActorRole;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
}

#[derive(Debug, Clone)]
pub struct AmqpConfig {
    pub url: String,
    pub exchange: String,
}

#[derive(Debug, Clone)]
pub struct PaymentGatewayConfig {
    pub url: String,
}

/// Pricing knobs applied at checkout and claim time.
#[derive(Debug, Clone, PartialEq)]
pub struct FeeConfig {
    pub delivery_fee_cents: i64,
    pub platform_fee_percent: i64,
    pub driver_payout_percent: i64,
    pub default_distance_miles: f64,
}

impl Default for FeeConfig {
    fn default() -> Self {
        Self {
            delivery_fee_cents: 500,
            platform_fee_percent: 5,
            driver_payout_percent: 85,
            default_distance_miles: 3.0,
        }
    }
}

impl FeeConfig {
    pub fn platform_fee(&self, subtotal_cents: i64) -> i64 {
        subtotal_cents * self.platform_fee_percent / 100
    }

    pub fn driver_payout(&self, delivery_fee_cents: i64) -> i64 {
        delivery_fee_cents * self.driver_payout_percent / 100
    }
}

/// Per-role cadence of the pull path and the driver alert repeat.
#[derive(Debug, Clone, PartialEq)]
pub struct PollingConfig {
    pub customer: Duration,
    pub owner: Duration,
    pub driver: Duration,
    pub alert_repeat: Duration,
    pub outbox_relay: Duration,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            customer: Duration::from_secs(30),
            owner: Duration::from_secs(30),
            driver: Duration::from_secs(10),
            alert_repeat: Duration::from_secs(5),
            outbox_relay: Duration::from_secs(2),
        }
    }
}

impl PollingConfig {
    pub fn interval_for(&self, role: ActorRole) -> Duration {
        match role {
            ActorRole::Customer => self.customer,
            ActorRole::Owner | ActorRole::Admin => self.owner,
            ActorRole::Driver => self.driver,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub amqp: Option<AmqpConfig>,
    pub payment_gateway: PaymentGatewayConfig,
    pub fees: FeeConfig,
    pub polling: PollingConfig,
}

fn parse_or<T: FromStr>(key: &str, default: T) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse()
            .with_context(|| format!("{key} has an invalid value `{raw}`")),
        Err(_) => Ok(default),
    }
}

fn positive_secs(key: &str, secs: u64) -> Result<Duration> {
    ensure!(secs > 0, "{key} must be at least one second");
    Ok(Duration::from_secs(secs))
}

fn percent(key: &str, value: i64) -> Result<i64> {
    ensure!((0..=100).contains(&value), "{key} must be between 0 and 100, got {value}");
    Ok(value)
}

fn non_negative<T: PartialOrd + Default + std::fmt::Display>(key: &str, value: T) -> Result<T> {
    ensure!(value >= T::default(), "{key} must not be negative, got {value}");
    Ok(value)
}

fn secs_or(key: &str, default: Duration) -> Result<Duration> {
    positive_secs(key, parse_or(key, default.as_secs())?)
}

fn percent_or(key: &str, default: i64) -> Result<i64> {
    percent(key, parse_or(key, default)?)
}

/// Reads configuration from the environment (after `.env` has been loaded).
pub fn load() -> Result<Config> {
    let fee_defaults = FeeConfig::default();
    let poll_defaults = PollingConfig::default();

    Ok(Config {
        server: ServerConfig {
            port: parse_or("PORT", 3000)?,
        },
        database: DatabaseConfig {
            url: env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
        },
        amqp: env::var("AMQP_URL").ok().map(|url| AmqpConfig {
            url,
            exchange: env::var("AMQP_EXCHANGE").unwrap_or("foodhub".to_string()),
        }),
        payment_gateway: PaymentGatewayConfig {
            url: env::var("PAYMENT_GATEWAY_URL")
                .unwrap_or("http://localhost:3000/payment-gateway".to_string()),
        },
        fees: FeeConfig {
            delivery_fee_cents: non_negative(
                "DELIVERY_FEE_CENTS",
                parse_or("DELIVERY_FEE_CENTS", fee_defaults.delivery_fee_cents)?,
            )?,
            platform_fee_percent: percent_or(
                "PLATFORM_FEE_PERCENT",
                fee_defaults.platform_fee_percent,
            )?,
            driver_payout_percent: percent_or(
                "DRIVER_PAYOUT_PERCENT",
                fee_defaults.driver_payout_percent,
            )?,
            default_distance_miles: non_negative(
                "DEFAULT_DISTANCE_MILES",
                parse_or("DEFAULT_DISTANCE_MILES", fee_defaults.default_distance_miles)?,
            )?,
        },
        polling: PollingConfig {
            customer: secs_or("CUSTOMER_POLL_SECS", poll_defaults.customer)?,
            owner: secs_or("OWNER_POLL_SECS", poll_defaults.owner)?,
            driver: secs_or("DRIVER_POLL_SECS", poll_defaults.driver)?,
            alert_repeat: secs_or("ALERT_REPEAT_SECS", poll_defaults.alert_repeat)?,
            outbox_relay: secs_or("OUTBOX_RELAY_SECS", poll_defaults.outbox_relay)?,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payout_is_share_of_delivery_fee() {
        let fees = FeeConfig::default();
        assert_eq!(fees.driver_payout(500), 425);
        assert_eq!(fees.platform_fee(1_000), 50);
    }

    #[test]
    fn drivers_poll_faster_than_customers() {
        let polling = PollingConfig::default();
        assert_eq!(polling.interval_for(ActorRole::Driver), Duration::from_secs(10));
        assert_eq!(polling.interval_for(ActorRole::Customer), Duration::from_secs(30));
        assert_eq!(polling.interval_for(ActorRole::Owner), Duration::from_secs(30));
    }

    #[test]
    fn zero_second_intervals_are_rejected() {
        let err = positive_secs("DRIVER_POLL_SECS", 0).unwrap_err();
        assert!(err.to_string().contains("DRIVER_POLL_SECS"));
        assert_eq!(positive_secs("DRIVER_POLL_SECS", 1).unwrap(), Duration::from_secs(1));
    }

    #[test]
    fn percents_stay_within_bounds() {
        assert_eq!(percent("PLATFORM_FEE_PERCENT", 0).unwrap(), 0);
        assert_eq!(percent("PLATFORM_FEE_PERCENT", 100).unwrap(), 100);
        assert!(percent("DRIVER_PAYOUT_PERCENT", 250).is_err());
        assert!(percent("DRIVER_PAYOUT_PERCENT", -1).is_err());
    }

    #[test]
    fn negative_fees_and_distances_are_rejected() {
        assert!(non_negative("DELIVERY_FEE_CENTS", -5_i64).is_err());
        assert_eq!(non_negative("DELIVERY_FEE_CENTS", 0_i64).unwrap(), 0);
        assert!(non_negative("DEFAULT_DISTANCE_MILES", -0.5_f64).is_err());
    }
}
