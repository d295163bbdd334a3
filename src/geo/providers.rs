//! Resolver implementations.

use std::collections::HashMap;
use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::config::StaticGeoEntry;
use crate::device::Location;
use crate::geo::{GeoError, GeoResolver};

/// Always reports geolocation as disabled.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopResolver;

#[async_trait]
impl GeoResolver for NoopResolver {
    async fn resolve(&self, _ip: IpAddr) -> Result<Location, GeoError> {
        Err(GeoError::Disabled)
    }

    fn name(&self) -> &'static str {
        "none"
    }
}

/// Fixed address table, for tests and air-gapped deployments.
#[derive(Debug, Clone, Default)]
pub struct StaticGeoResolver {
    table: HashMap<IpAddr, Location>,
}

impl StaticGeoResolver {
    pub fn from_entries(entries: &[StaticGeoEntry]) -> Self {
        let table = entries
            .iter()
            .map(|e| {
                (
                    e.ip,
                    Location {
                        latitude: e.latitude,
                        longitude: e.longitude,
                        country: e.country.clone(),
                        city: e.city.clone(),
                    },
                )
            })
            .collect();
        Self { table }
    }

    pub fn with(mut self, ip: IpAddr, location: Location) -> Self {
        self.table.insert(ip, location);
        self
    }
}

#[async_trait]
impl GeoResolver for StaticGeoResolver {
    async fn resolve(&self, ip: IpAddr) -> Result<Location, GeoError> {
        self.table.get(&ip).cloned().ok_or(GeoError::NoData(ip))
    }

    fn name(&self) -> &'static str {
        "static"
    }
}

/// JSON-over-HTTP lookup service (`{ip}` in the endpoint is substituted).
///
/// Understands the common field spellings (`country_code`/`countryCode`,
/// `latitude`/`lat`, `longitude`/`lon`).
#[derive(Debug, Clone)]
pub struct HttpGeoResolver {
    client: reqwest::Client,
    endpoint: String,
}

#[derive(Debug, Deserialize)]
struct LookupResponse {
    country_code: Option<String>,
    #[serde(rename = "countryCode")]
    country_code_camel: Option<String>,
    city: Option<String>,
    latitude: Option<f64>,
    lat: Option<f64>,
    longitude: Option<f64>,
    lon: Option<f64>,
    #[serde(default)]
    error: bool,
    reason: Option<String>,
}

impl HttpGeoResolver {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self, GeoError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GeoError::Lookup(e.to_string()))?;
        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
        })
    }

    fn is_public(ip: IpAddr) -> bool {
        match ip {
            IpAddr::V4(v4) => {
                !(v4.is_private()
                    || v4.is_loopback()
                    || v4.is_link_local()
                    || v4.is_unspecified()
                    || v4.is_broadcast())
            }
            IpAddr::V6(v6) => !(v6.is_loopback() || v6.is_unspecified()),
        }
    }
}

#[async_trait]
impl GeoResolver for HttpGeoResolver {
    async fn resolve(&self, ip: IpAddr) -> Result<Location, GeoError> {
        if !Self::is_public(ip) {
            return Err(GeoError::NoData(ip));
        }

        let url = self.endpoint.replace("{ip}", &ip.to_string());
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| GeoError::Lookup(e.to_string()))?;
        if !response.status().is_success() {
            return Err(GeoError::Lookup(format!("resolver returned {}", response.status())));
        }
        let body: LookupResponse = response
            .json()
            .await
            .map_err(|e| GeoError::Lookup(e.to_string()))?;

        if body.error {
            return Err(GeoError::Lookup(
                body.reason.unwrap_or_else(|| "resolver reported an error".into()),
            ));
        }
        let country = body
            .country_code
            .or(body.country_code_camel)
            .filter(|c| !c.is_empty())
            .ok_or(GeoError::NoData(ip))?;

        Ok(Location {
            latitude: body.latitude.or(body.lat).unwrap_or_default(),
            longitude: body.longitude.or(body.lon).unwrap_or_default(),
            country,
            city: body.city.unwrap_or_default(),
        })
    }

    fn name(&self) -> &'static str {
        "http"
    }
}
