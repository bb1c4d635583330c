use std::sync::Arc;

use reqwest::{
    StatusCode,
    Url,
};
use serde::{
    Deserialize,
    Serialize,
    de::DeserializeOwned,
};
use serde_json::Value;

use crate::{
    config::MapsConfig,
    error::{AppError, AppResult},
    quota::QuotaTracker,
    services::http_client,
    validators::{
        PlaceSearch,
        TravelMode,
    },
};

const DETAIL_FIELDS: &str = "place_id,name,formatted_address,formatted_phone_number,website,\
geometry,rating,user_ratings_total,price_level,opening_hours,reviews,photos,types,url";
const DETAIL_PHOTOS: usize = 5;
const DETAIL_REVIEWS: usize = 3;
const DEFAULT_ZOOM: u8 = 13;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLng {
    pub lat: f64,
    pub lng: f64,
}

impl From<(f64, f64)> for LatLng {
    fn from((lat, lng): (f64, f64)) -> Self {
        Self { lat, lng }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlaceResult {
    pub place_id: String,
    pub name: String,
    pub address: String,
    pub location: Option<LatLng>,
    pub rating: Option<f64>,
    pub total_ratings: Option<u64>,
    pub price_level: Option<u8>,
    pub types: Vec<String>,
    pub is_open: Option<bool>,
    pub photo_reference: Option<String>,
    pub icon: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlaceDetails {
    pub place_id: String,
    pub name: String,
    pub address: String,
    pub formatted_phone: Option<String>,
    pub website: Option<String>,
    pub location: Option<LatLng>,
    pub rating: Option<f64>,
    pub total_ratings: Option<u64>,
    pub price_level: Option<u8>,
    pub opening_hours: Option<Value>,
    pub reviews: Vec<Value>,
    pub photos: Vec<String>,
    pub types: Vec<String>,
    pub url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DirectionStep {
    pub instruction: String,
    pub distance: String,
    pub duration: String,
    pub travel_mode: String,
    pub start_location: Option<LatLng>,
    pub end_location: Option<LatLng>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DirectionsResult {
    pub origin: LatLng,
    pub destination: LatLng,
    pub distance: String,
    pub duration: String,
    pub steps: Vec<DirectionStep>,
    pub polyline: String,
    pub bounds: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GeocodeResult {
    pub lat: f64,
    pub lng: f64,
    pub formatted_address: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResults {
    pub places: Vec<PlaceResult>,
    pub quota_remaining: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FrontendConfig {
    pub api_key: String,
    pub default_center: LatLng,
    pub default_zoom: u8,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ApiStatus {
    status: String,
    error_message: Option<String>,
}

impl ApiStatus {
    fn ensure(&self, accepted: &[&str]) -> AppResult<()> {
        if accepted.contains(&self.status.as_str()) {
            return Ok(());
        }
        let message = self
            .error_message
            .clone()
            .unwrap_or_else(|| self.status.clone());
        Err(AppError::Upstream(message))
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct TextSearchResponse {
    #[serde(flatten)]
    meta: ApiStatus,
    results: Vec<RawPlace>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct DetailsResponse {
    #[serde(flatten)]
    meta: ApiStatus,
    result: Option<RawPlace>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct DirectionsResponse {
    #[serde(flatten)]
    meta: ApiStatus,
    routes: Vec<RawRoute>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct GeocodeResponse {
    #[serde(flatten)]
    meta: ApiStatus,
    results: Vec<RawGeocode>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawPlace {
    place_id: Option<String>,
    name: Option<String>,
    formatted_address: String,
    geometry: Option<Geometry>,
    rating: Option<f64>,
    user_ratings_total: Option<u64>,
    price_level: Option<u8>,
    types: Vec<String>,
    opening_hours: Option<Value>,
    photos: Vec<RawPhoto>,
    icon: Option<String>,
    formatted_phone_number: Option<String>,
    website: Option<String>,
    reviews: Vec<Value>,
    url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Geometry {
    location: Option<LatLng>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawPhoto {
    photo_reference: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawRoute {
    legs: Vec<RawLeg>,
    overview_polyline: Option<Polyline>,
    bounds: Value,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Polyline {
    points: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawLeg {
    distance: Option<TextValue>,
    duration: Option<TextValue>,
    steps: Vec<RawStep>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawStep {
    html_instructions: String,
    distance: Option<TextValue>,
    duration: Option<TextValue>,
    travel_mode: String,
    start_location: Option<LatLng>,
    end_location: Option<LatLng>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct TextValue {
    text: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawGeocode {
    formatted_address: String,
    geometry: Option<Geometry>,
}

fn text_of(value: Option<TextValue>) -> String {
    value.map(|v| v.text).unwrap_or_default()
}

impl From<RawPlace> for PlaceResult {
    fn from(raw: RawPlace) -> Self {
        let is_open = raw
            .opening_hours
            .as_ref()
            .and_then(|hours| hours.get("open_now"))
            .and_then(Value::as_bool);

        Self {
            place_id: raw.place_id.unwrap_or_default(),
            name: raw.name.unwrap_or_else(|| "Unknown".to_string()),
            address: raw.formatted_address,
            location: raw.geometry.and_then(|g| g.location),
            rating: raw.rating,
            total_ratings: raw.user_ratings_total,
            price_level: raw.price_level,
            types: raw.types,
            is_open,
            photo_reference: raw.photos.into_iter().next().and_then(|p| p.photo_reference),
            icon: raw.icon,
        }
    }
}

/// Google Maps web services, metered per client by the daily quota.
///
/// Every call checks the caller's quota first. Once a request has been sent,
/// it is charged whether or not it succeeded.
pub struct MapsClient {
    client: reqwest::Client,
    cfg: MapsConfig,
    quota: Arc<QuotaTracker>,
}

impl MapsClient {
    pub fn new(cfg: MapsConfig, quota: Arc<QuotaTracker>) -> AppResult<Self> {
        if cfg.api_key.is_empty() {
            tracing::warn!("Google Maps API key not configured");
        }

        Ok(Self {
            client: http_client(cfg.timeout_secs)?,
            cfg,
            quota,
        })
    }

    pub fn is_configured(&self) -> bool {
        !self.cfg.api_key.is_empty()
    }

    pub fn default_location(&self) -> (f64, f64) {
        self.cfg.default_location
    }

    pub async fn search_places(
        &self,
        client_key: &str,
        search: &PlaceSearch,
    ) -> AppResult<SearchResults> {
        let mut params = vec![("query", search.query.clone())];
        if let Some((lat, lng)) = search.location {
            params.push(("location", format!("{lat},{lng}")));
            let radius = search.radius.unwrap_or(self.cfg.default_search_radius);
            params.push(("radius", radius.to_string()));
        }
        if let Some(place_type) = &search.place_type {
            params.push(("type", place_type.clone()));
        }

        let response: TextSearchResponse = self
            .get_json(client_key, "place/textsearch/json", params)
            .await?;
        response.meta.ensure(&["OK", "ZERO_RESULTS"])?;

        let places = response
            .results
            .into_iter()
            .take(self.cfg.max_search_results)
            .map(PlaceResult::from)
            .collect();

        Ok(SearchResults {
            places,
            quota_remaining: self.quota.get_remaining(client_key),
        })
    }

    pub async fn place_details(&self, client_key: &str, place_id: &str) -> AppResult<PlaceDetails> {
        let params = vec![
            ("place_id", place_id.to_string()),
            ("fields", DETAIL_FIELDS.to_string()),
        ];

        let response: DetailsResponse = self
            .get_json(client_key, "place/details/json", params)
            .await?;
        response.meta.ensure(&["OK"])?;
        let raw = response
            .result
            .ok_or_else(|| AppError::NotFound("Place not found".to_string()))?;

        let photos = raw
            .photos
            .iter()
            .filter_map(|p| p.photo_reference.as_deref())
            .take(DETAIL_PHOTOS)
            .map(|reference| self.photo_url(reference, 400))
            .collect::<AppResult<Vec<_>>>()?;

        Ok(PlaceDetails {
            place_id: raw.place_id.unwrap_or_else(|| place_id.to_string()),
            name: raw.name.unwrap_or_default(),
            address: raw.formatted_address,
            formatted_phone: raw.formatted_phone_number,
            website: raw.website,
            location: raw.geometry.and_then(|g| g.location),
            rating: raw.rating,
            total_ratings: raw.user_ratings_total,
            price_level: raw.price_level,
            opening_hours: raw.opening_hours,
            reviews: raw.reviews.into_iter().take(DETAIL_REVIEWS).collect(),
            photos,
            types: raw.types,
            url: raw.url,
        })
    }

    pub async fn directions(
        &self,
        client_key: &str,
        origin: (f64, f64),
        destination: (f64, f64),
        mode: TravelMode,
    ) -> AppResult<DirectionsResult> {
        let params = vec![
            ("origin", format!("{},{}", origin.0, origin.1)),
            ("destination", format!("{},{}", destination.0, destination.1)),
            ("mode", mode.as_str().to_string()),
        ];

        let response: DirectionsResponse = self
            .get_json(client_key, "directions/json", params)
            .await?;
        response.meta.ensure(&["OK"])?;

        let route = response
            .routes
            .into_iter()
            .next()
            .ok_or_else(|| AppError::NotFound("No route found".to_string()))?;
        let leg = route
            .legs
            .into_iter()
            .next()
            .ok_or_else(|| AppError::NotFound("No route found".to_string()))?;

        let steps = leg
            .steps
            .into_iter()
            .map(|step| DirectionStep {
                instruction: step.html_instructions,
                distance: text_of(step.distance),
                duration: text_of(step.duration),
                travel_mode: step.travel_mode,
                start_location: step.start_location,
                end_location: step.end_location,
            })
            .collect();

        Ok(DirectionsResult {
            origin: origin.into(),
            destination: destination.into(),
            distance: text_of(leg.distance),
            duration: text_of(leg.duration),
            steps,
            polyline: route.overview_polyline.map(|p| p.points).unwrap_or_default(),
            bounds: route.bounds,
        })
    }

    pub async fn geocode(&self, client_key: &str, address: &str) -> AppResult<GeocodeResult> {
        let params = vec![("address", address.to_string())];

        let response: GeocodeResponse = self.get_json(client_key, "geocode/json", params).await?;
        response.meta.ensure(&["OK"])?;

        let result = response
            .results
            .into_iter()
            .next()
            .ok_or_else(|| AppError::NotFound("Address not found".to_string()))?;
        let location = result
            .geometry
            .and_then(|g| g.location)
            .ok_or_else(|| AppError::Upstream("geocode result has no coordinates".to_string()))?;

        Ok(GeocodeResult {
            lat: location.lat,
            lng: location.lng,
            formatted_address: result.formatted_address,
        })
    }

    pub fn frontend_config(&self) -> FrontendConfig {
        let api_key = if self.cfg.frontend_key.is_empty() {
            tracing::warn!("frontend maps key not configured, falling back to backend key");
            self.cfg.api_key.clone()
        } else {
            self.cfg.frontend_key.clone()
        };

        FrontendConfig {
            api_key,
            default_center: self.cfg.default_location.into(),
            default_zoom: DEFAULT_ZOOM,
        }
    }

    pub fn photo_url(&self, photo_reference: &str, max_width: u32) -> AppResult<String> {
        let url = Url::parse_with_params(
            &format!("{}/place/photo", self.cfg.base_url),
            &[
                ("maxwidth", max_width.to_string()),
                ("photo_reference", photo_reference.to_string()),
                ("key", self.cfg.api_key.clone()),
            ],
        )
        .map_err(|e| AppError::Internal(format!("invalid maps base url: {e}")))?;
        Ok(url.to_string())
    }

    async fn get_json<T>(
        &self,
        client_key: &str,
        endpoint: &str,
        mut params: Vec<(&'static str, String)>,
    ) -> AppResult<T>
    where
        T: DeserializeOwned,
    {
        if !self.quota.check_quota(client_key) {
            tracing::warn!(client_key, endpoint, "daily maps quota exhausted");
            return Err(AppError::QuotaExceeded);
        }

        params.push(("key", self.cfg.api_key.clone()));
        let url = format!("{}/{endpoint}", self.cfg.base_url);
        let sent = self.client.get(&url).query(&params).send().await;

        let used = self.quota.increment_usage(client_key, 1);
        tracing::debug!(client_key, endpoint, used, "maps call charged to quota");

        let response = sent?;
        let status = response.status();
        if status != StatusCode::OK {
            tracing::error!(endpoint, status = %status, "maps api error");
            return Err(AppError::Upstream(format!(
                "API request failed: {}",
                status.as_u16()
            )));
        }

        Ok(response.json::<T>().await?)
    }
}
