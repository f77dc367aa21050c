//! ip-api.com JSON lookup

use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

use super::{format_label, GeoError, GeoLookup};

/// The subset of the ip-api.com response we use
#[derive(Debug, Deserialize)]
struct IpApiResponse {
    status: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    country: Option<String>,
    #[serde(default, rename = "regionName")]
    region_name: Option<String>,
    #[serde(default)]
    city: Option<String>,
}

/// Looks addresses up against `GET <endpoint>/json/<address>?lang=<lang>`
pub struct IpApiLookup {
    client: Client,
    endpoint: String,
    lang: String,
}

impl IpApiLookup {
    /// Create a lookup whose requests give up after `timeout`
    pub fn new(endpoint: &str, lang: &str, timeout: Duration) -> Result<Self, GeoError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(IpApiLookup {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            lang: lang.to_string(),
        })
    }

    pub fn url(&self, address: &str) -> String {
        format!("{}/json/{}?lang={}", self.endpoint, address, self.lang)
    }
}

impl GeoLookup for IpApiLookup {
    async fn lookup(&self, address: &str) -> Result<String, GeoError> {
        let response = self.client.get(self.url(address)).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(GeoError::Status(status.as_u16()));
        }

        let body = response.text().await?;
        parse_response(&body)
    }
}

/// Turn a response body into a location label
///
/// Only `"status": "success"` bodies with a country and a region or city
/// count as an answer.
pub fn parse_response(body: &str) -> Result<String, GeoError> {
    let response: IpApiResponse =
        serde_json::from_str(body).map_err(|e| GeoError::Malformed(e.to_string()))?;

    if response.status != "success" {
        return Err(GeoError::Failed(
            response.message.unwrap_or_else(|| response.status.clone()),
        ));
    }

    let country = response
        .country
        .filter(|c| !c.is_empty())
        .ok_or_else(|| GeoError::Malformed("missing country".to_string()))?;
    let region = response
        .region_name
        .filter(|r| !r.is_empty())
        .or(response.city.filter(|c| !c.is_empty()))
        .ok_or_else(|| GeoError::Malformed("missing region and city".to_string()))?;

    Ok(format_label(&country, &region))
}
