use axum::{
    Json,
    Router,
    extract::{Path, Query, State, rejection::QueryRejection},
    routing::get,
};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::{
    context::ClientKey,
    error::{AppError, AppResult},
    routes::AppState,
    validators::{
        PlaceSearch,
        TravelMode,
        require_coordinates,
        validate_address,
        validate_place_id,
    },
};

const MAP_ID: &str = "DEMO_MAP_ID";
const DEFAULT_PHOTO_WIDTH: u32 = 400;
const MAX_PHOTO_WIDTH: u32 = 1600;
const MIN_PHOTO_REFERENCE: usize = 10;

#[derive(Debug, Deserialize)]
struct SearchParams {
    query: String,
    lat: Option<f64>,
    lng: Option<f64>,
    radius: Option<u32>,
    #[serde(rename = "type")]
    place_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DirectionsParams {
    origin_lat: f64,
    origin_lng: f64,
    dest_lat: f64,
    dest_lng: f64,
    mode: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeocodeParams {
    address: String,
}

#[derive(Debug, Deserialize)]
struct PhotoParams {
    photo_reference: String,
    max_width: Option<u32>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/maps/places/search", get(search_places))
        .route("/api/maps/places/{place_id}", get(place_details))
        .route("/api/maps/directions", get(directions))
        .route("/api/maps/geocode", get(geocode))
        .route("/api/maps/config", get(frontend_config))
        .route("/api/maps/photo", get(photo))
}

fn invalid_query(rejection: QueryRejection) -> AppError {
    AppError::Validation(rejection.body_text())
}

async fn search_places(
    State(state): State<AppState>,
    client: ClientKey,
    params: Result<Query<SearchParams>, QueryRejection>,
) -> AppResult<Json<Value>> {
    let Query(params) = params.map_err(invalid_query)?;
    let search = PlaceSearch::validate(
        &params.query,
        params.lat,
        params.lng,
        params.radius,
        params.place_type.as_deref(),
    )?;

    let results = state
        .maps
        .search_places(client.as_str(), &search)
        .await
        .map_err(|err| {
            tracing::warn!(client_key = %client.as_str(), error = %err, "place search failed");
            AppError::ServiceUnavailable(err.public_message())
        })?;

    Ok(Json(json!({
        "success": true,
        "count": results.places.len(),
        "places": results.places,
        "quota_remaining": results.quota_remaining,
    })))
}

async fn place_details(
    State(state): State<AppState>,
    client: ClientKey,
    Path(place_id): Path<String>,
) -> AppResult<Json<Value>> {
    let place_id = validate_place_id(&place_id)
        .map_err(|err| AppError::Validation(format!("Invalid place ID: {err}")))?;

    let place = state
        .maps
        .place_details(client.as_str(), &place_id)
        .await
        .map_err(|err| {
            tracing::warn!(place_id = %place_id, error = %err, "place details failed");
            AppError::NotFound("Place not found or quota exceeded".to_string())
        })?;

    Ok(Json(json!({ "success": true, "place": place })))
}

async fn directions(
    State(state): State<AppState>,
    client: ClientKey,
    params: Result<Query<DirectionsParams>, QueryRejection>,
) -> AppResult<Json<Value>> {
    let Query(params) = params.map_err(invalid_query)?;
    let origin = require_coordinates("origin", params.origin_lat, params.origin_lng)?;
    let destination = require_coordinates("destination", params.dest_lat, params.dest_lng)?;
    let mode = match params.mode.as_deref() {
        Some(raw) => raw.parse::<TravelMode>()?,
        None => TravelMode::default(),
    };

    let directions = state
        .maps
        .directions(client.as_str(), origin, destination, mode)
        .await
        .map_err(|err| {
            tracing::warn!(mode = %mode, error = %err, "directions lookup failed");
            AppError::NotFound("Could not find directions or quota exceeded".to_string())
        })?;

    Ok(Json(json!({ "success": true, "directions": directions })))
}

async fn geocode(
    State(state): State<AppState>,
    client: ClientKey,
    params: Result<Query<GeocodeParams>, QueryRejection>,
) -> AppResult<Json<Value>> {
    let Query(params) = params.map_err(invalid_query)?;
    let address = validate_address(&params.address)?;

    let location = state
        .maps
        .geocode(client.as_str(), &address)
        .await
        .map_err(|err| {
            tracing::warn!(error = %err, "geocode failed");
            AppError::NotFound("Could not geocode address".to_string())
        })?;

    Ok(Json(json!({ "success": true, "location": location })))
}

async fn frontend_config(State(state): State<AppState>) -> Json<Value> {
    let cfg = state.maps.frontend_config();
    Json(json!({
        "api_key": cfg.api_key,
        "default_center": cfg.default_center,
        "default_zoom": cfg.default_zoom,
        "map_id": MAP_ID,
    }))
}

async fn photo(
    State(state): State<AppState>,
    params: Result<Query<PhotoParams>, QueryRejection>,
) -> AppResult<Json<Value>> {
    let Query(params) = params.map_err(invalid_query)?;

    let reference = params.photo_reference.trim();
    if reference.chars().count() < MIN_PHOTO_REFERENCE {
        return Err(AppError::Validation(format!(
            "photo_reference must be at least {MIN_PHOTO_REFERENCE} characters"
        )));
    }
    let max_width = params.max_width.unwrap_or(DEFAULT_PHOTO_WIDTH);
    if !(1..=MAX_PHOTO_WIDTH).contains(&max_width) {
        return Err(AppError::Validation(format!(
            "max_width must be between 1 and {MAX_PHOTO_WIDTH}"
        )));
    }

    let photo_url = state.maps.photo_url(reference, max_width)?;
    Ok(Json(json!({ "photo_url": photo_url })))
}
