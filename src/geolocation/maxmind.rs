//! Offline lookups against a MaxMind GeoLite2-City database
//!
//! Users must download the database file separately from MaxMind (free with
//! registration) and point `geo.database_path` at it.

use maxminddb::{geoip2, Reader};
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::path::Path;
use std::sync::Arc;

use super::{format_label, GeoError, GeoLookup};

/// GeoIP lookup backed by a GeoLite2-City database
pub struct MaxMindLookup {
    reader: Arc<Reader<Vec<u8>>>,
    locale: String,
}

impl MaxMindLookup {
    /// Open the database at `db_path`
    ///
    /// `lang` uses ip-api.com spelling (`zh-cn`); names are taken in that
    /// locale when the database has them and in English otherwise.
    pub fn new<P: AsRef<Path>>(db_path: P, lang: &str) -> Result<Self, GeoError> {
        let path = db_path.as_ref();
        if !path.exists() {
            return Err(GeoError::FileNotFound(path.display().to_string()));
        }

        let reader = Reader::open_readfile(path)?;
        Ok(MaxMindLookup {
            reader: Arc::new(reader),
            locale: maxmind_locale(lang),
        })
    }

    fn locate(&self, ip: IpAddr) -> Result<String, GeoError> {
        let city: geoip2::City = self.reader.lookup(ip).map_err(|e| match e {
            maxminddb::MaxMindDBError::AddressNotFoundError(_) => GeoError::NotFound,
            other => GeoError::Database(other),
        })?;

        let country = city
            .country
            .as_ref()
            .and_then(|c| pick_name(c.names.as_ref(), &self.locale))
            .ok_or(GeoError::NotFound)?;

        let region = city
            .subdivisions
            .as_ref()
            .and_then(|subdivisions| subdivisions.first())
            .and_then(|s| pick_name(s.names.as_ref(), &self.locale))
            .or_else(|| {
                city.city
                    .as_ref()
                    .and_then(|c| pick_name(c.names.as_ref(), &self.locale))
            })
            .unwrap_or_else(|| country.clone());

        Ok(format_label(&country, &region))
    }
}

impl Clone for MaxMindLookup {
    fn clone(&self) -> Self {
        MaxMindLookup {
            reader: Arc::clone(&self.reader),
            locale: self.locale.clone(),
        }
    }
}

impl GeoLookup for MaxMindLookup {
    async fn lookup(&self, address: &str) -> Result<String, GeoError> {
        let ip: IpAddr = address
            .parse()
            .map_err(|_| GeoError::InvalidAddress(address.to_string()))?;
        self.locate(ip)
    }
}

/// `zh-cn` -> `zh-CN`, `pt-br` -> `pt-BR`, `en` -> `en`
fn maxmind_locale(lang: &str) -> String {
    match lang.split_once('-') {
        Some((language, region)) => format!("{}-{}", language, region.to_uppercase()),
        None => lang.to_string(),
    }
}

fn pick_name(names: Option<&BTreeMap<&str, &str>>, locale: &str) -> Option<String> {
    let names = names?;
    names
        .get(locale)
        .or_else(|| names.get("en"))
        .map(|name| name.to_string())
}
