//! Location enrichment: reverse geocoding and Maps-URL extraction.
//!
//! WhatsApp customers share locations two ways: a native location message
//! (latitude/longitude) and a pasted Google Maps link in text. Both are
//! resolved to a human-readable address and attached to the message
//! metadata before buffering, so the agent can talk about delivery without
//! another round trip.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Value};
use tracing::{debug, warn};

/// `@lat,lng` (maps URL path) or `q=lat,lng` / `ll=lat,lng` query forms.
static MAPS_COORDS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:@|[?&](?:q|ll)=)(-?\d{1,2}\.\d+),(-?\d{1,3}\.\d+)").expect("static pattern")
});

pub struct GeocodingClient {
    http: reqwest::Client,
    api_key: Option<String>,
    base_url: String,
}

impl GeocodingClient {
    pub fn new(api_key: Option<String>, base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key,
            base_url: base_url.into(),
        }
    }

    /// Coordinates from a Google Maps link in free text, if any.
    pub fn extract_maps_coords(text: &str) -> Option<(f64, f64)> {
        if !text.contains("maps.google") && !text.contains("goo.gl/maps")
            && !text.contains("google.com/maps")
        {
            return None;
        }
        let captures = MAPS_COORDS.captures(text)?;
        let lat: f64 = captures.get(1)?.as_str().parse().ok()?;
        let lng: f64 = captures.get(2)?.as_str().parse().ok()?;
        if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lng) {
            return None;
        }
        Some((lat, lng))
    }

    /// Reverse-geocode coordinates to a formatted address. Returns `None`
    /// when no key is configured or the lookup fails; enrichment is best
    /// effort and never blocks the pipeline.
    pub async fn reverse(&self, lat: f64, lng: f64) -> Option<String> {
        let api_key = self.api_key.as_ref()?;
        let url = format!(
            "{}?latlng={lat},{lng}&key={api_key}",
            self.base_url.trim_end_matches('/')
        );

        let response = match self.http.get(&url).send().await {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "reverse geocoding request failed");
                return None;
            }
        };

        let body: Value = response.json().await.ok()?;
        let address = body["results"][0]["formatted_address"]
            .as_str()
            .map(str::to_string);
        debug!(lat, lng, found = address.is_some(), "reverse geocoded");
        address
    }

    /// Location context for a message: explicit coordinates win, then a
    /// Maps link in the text.
    pub async fn enrich(
        &self,
        text: &str,
        location: Option<(f64, f64)>,
    ) -> Option<Value> {
        let (lat, lng) = location.or_else(|| Self::extract_maps_coords(text))?;
        let address = self.reverse(lat, lng).await;
        Some(json!({
            "latitude": lat,
            "longitude": lng,
            "address": address,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_at_form_coords() {
        let text = "lokasi saya https://www.google.com/maps/place/X/@-6.2087634,106.845599,17z";
        let (lat, lng) = GeocodingClient::extract_maps_coords(text).unwrap();
        assert!((lat - -6.2087634).abs() < 1e-6);
        assert!((lng - 106.845599).abs() < 1e-6);
    }

    #[test]
    fn extracts_query_form_coords() {
        let text = "ini ya https://maps.google.com/?q=-7.797068,110.370529";
        let (lat, lng) = GeocodingClient::extract_maps_coords(text).unwrap();
        assert!((lat - -7.797068).abs() < 1e-6);
        assert!((lng - 110.370529).abs() < 1e-6);
    }

    #[test]
    fn plain_text_has_no_coords() {
        assert!(GeocodingClient::extract_maps_coords("kirim ke rumah saya ya").is_none());
        // Coordinates without a maps link are not treated as a location.
        assert!(GeocodingClient::extract_maps_coords("angka -6.2,106.8 saja").is_none());
    }

    #[test]
    fn out_of_range_coords_rejected() {
        let text = "https://maps.google.com/?q=95.0,200.0";
        assert!(GeocodingClient::extract_maps_coords(text).is_none());
    }

    #[tokio::test]
    async fn reverse_without_key_is_none() {
        let client = GeocodingClient::new(None, "https://maps.googleapis.com/maps/api/geocode/json");
        assert_eq!(client.reverse(-6.2, 106.8).await, None);
    }
}
