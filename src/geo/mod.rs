//! Geolocation enrichment.
//!
//! # Responsibilities
//! - Define the pluggable resolver interface (IP → coarse location)
//! - Run enrichment under a short deadline and record how it went
//!
//! # Design Decisions
//! - Enrichment is explicitly fallible: the caller gets an [`Enrichment`]
//!   with the outcome, never a silently missing location
//! - A failure or timeout yields an absent location and never blocks the
//!   request
//! - Resolvers are never retried; the deadline is the whole budget

pub mod providers;

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::{GeoProvider, GeolocationConfig};
use crate::device::Location;
use crate::resilience::with_deadline;

pub use providers::{HttpGeoResolver, NoopResolver, StaticGeoResolver};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GeoError {
    #[error("geolocation disabled")]
    Disabled,

    #[error("no location data for {0}")]
    NoData(IpAddr),

    #[error("geolocation lookup failed: {0}")]
    Lookup(String),
}

#[async_trait]
pub trait GeoResolver: Send + Sync {
    async fn resolve(&self, ip: IpAddr) -> Result<Location, GeoError>;

    fn name(&self) -> &'static str;
}

pub type SharedGeoResolver = Arc<dyn GeoResolver>;

/// How an enrichment attempt ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnrichmentOutcome {
    Resolved,
    /// Resolver disabled or had nothing for this address.
    Skipped,
    Failed(String),
    TimedOut,
}

impl EnrichmentOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            EnrichmentOutcome::Resolved => "resolved",
            EnrichmentOutcome::Skipped => "skipped",
            EnrichmentOutcome::Failed(_) => "failed",
            EnrichmentOutcome::TimedOut => "timed_out",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Enrichment {
    pub location: Option<Location>,
    pub outcome: EnrichmentOutcome,
}

/// Resolve `ip` within `deadline`.
pub async fn enrich(resolver: &dyn GeoResolver, ip: IpAddr, deadline: Duration) -> Enrichment {
    let (location, outcome) = match with_deadline("geolocation", deadline, resolver.resolve(ip)).await {
        Ok(Ok(mut location)) => {
            location.country = location.country.to_ascii_uppercase();
            (Some(location), EnrichmentOutcome::Resolved)
        }
        Ok(Err(GeoError::Disabled | GeoError::NoData(_))) => (None, EnrichmentOutcome::Skipped),
        Ok(Err(err)) => (None, EnrichmentOutcome::Failed(err.to_string())),
        Err(_) => (None, EnrichmentOutcome::TimedOut),
    };

    match &outcome {
        EnrichmentOutcome::Failed(reason) => tracing::warn!(
            resolver = resolver.name(),
            ip = %ip,
            error = %reason,
            "geolocation enrichment failed, continuing without location"
        ),
        EnrichmentOutcome::TimedOut => tracing::warn!(
            resolver = resolver.name(),
            ip = %ip,
            deadline_ms = deadline.as_millis() as u64,
            "geolocation enrichment timed out, continuing without location"
        ),
        _ => tracing::debug!(resolver = resolver.name(), ip = %ip, outcome = outcome.label(), "geolocation enrichment"),
    }

    Enrichment { location, outcome }
}

/// Build the resolver named by the configuration.
pub fn build_resolver(config: &GeolocationConfig, timeout: Duration) -> Result<SharedGeoResolver, GeoError> {
    Ok(match config.provider {
        GeoProvider::None => Arc::new(NoopResolver),
        GeoProvider::Static => Arc::new(StaticGeoResolver::from_entries(&config.static_entries)),
        GeoProvider::Http => Arc::new(HttpGeoResolver::new(&config.endpoint, timeout)?),
    })
}
