use std::{
    fmt,
    str::FromStr,
};

use crate::error::{AppError, AppResult};

const PLACE_TYPES: &[&str] = &[
    "restaurant",
    "cafe",
    "bar",
    "food",
    "lodging",
    "hotel",
    "parking",
    "gas_station",
    "shopping_mall",
    "store",
    "tourist_attraction",
    "museum",
    "park",
    "hospital",
    "pharmacy",
    "bank",
    "atm",
    "airport",
    "train_station",
    "bus_station",
    "subway_station",
    "point_of_interest",
];

#[derive(Debug, Clone, PartialEq)]
pub struct ChatInput {
    pub message: String,
    pub location: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlaceSearch {
    pub query: String,
    pub location: Option<(f64, f64)>,
    pub radius: Option<u32>,
    pub place_type: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TravelMode {
    #[default]
    Driving,
    Walking,
    Bicycling,
    Transit,
}

impl TravelMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Driving => "driving",
            Self::Walking => "walking",
            Self::Bicycling => "bicycling",
            Self::Transit => "transit",
        }
    }
}

impl fmt::Display for TravelMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TravelMode {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "driving" => Ok(Self::Driving),
            "walking" => Ok(Self::Walking),
            "bicycling" => Ok(Self::Bicycling),
            "transit" => Ok(Self::Transit),
            other => Err(AppError::Validation(format!("Unsupported travel mode: {other}"))),
        }
    }
}

impl ChatInput {
    pub fn validate(message: &str, location: Option<&str>) -> AppResult<Self> {
        check_len("message", message, 1, 1000)?;
        let message = sanitize(message);
        if message.is_empty() {
            return Err(AppError::Validation("Message cannot be empty".to_string()));
        }

        let location = match location {
            Some(raw) => {
                check_len("location", raw, 0, 200)?;
                Some(sanitize(raw)).filter(|l| !l.is_empty())
            }
            None => None,
        };

        Ok(Self { message, location })
    }
}

impl PlaceSearch {
    pub fn validate(
        query: &str,
        lat: Option<f64>,
        lng: Option<f64>,
        radius: Option<u32>,
        place_type: Option<&str>,
    ) -> AppResult<Self> {
        check_len("query", query, 1, 500)?;
        let query = sanitize(query);
        if query.is_empty() {
            return Err(AppError::Validation("Query cannot be empty".to_string()));
        }

        if let Some(lat) = lat
            && !(-90.0..=90.0).contains(&lat)
        {
            return Err(AppError::Validation("lat must be between -90 and 90".to_string()));
        }
        if let Some(lng) = lng
            && !(-180.0..=180.0).contains(&lng)
        {
            return Err(AppError::Validation("lng must be between -180 and 180".to_string()));
        }
        if let Some(radius) = radius
            && !(100..=50_000).contains(&radius)
        {
            return Err(AppError::Validation(
                "radius must be between 100 and 50000 meters".to_string(),
            ));
        }

        let location = lat.zip(lng);

        Ok(Self {
            query,
            location,
            radius,
            place_type: place_type.and_then(normalize_place_type),
        })
    }
}

/// Unknown place types are dropped rather than rejected.
pub fn normalize_place_type(raw: &str) -> Option<String> {
    let lowered = raw.trim().to_ascii_lowercase();
    PLACE_TYPES
        .contains(&lowered.as_str())
        .then_some(lowered)
}

pub fn validate_place_id(raw: &str) -> AppResult<String> {
    let place_id = raw.trim();
    check_len("place_id", place_id, 10, 300)?;
    if !place_id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(AppError::Validation("Invalid place ID format".to_string()));
    }
    Ok(place_id.to_string())
}

pub fn validate_address(raw: &str) -> AppResult<String> {
    check_len("address", raw, 3, 500)?;
    let address = sanitize(raw);
    if address.chars().count() < 3 {
        return Err(AppError::Validation("Address too short".to_string()));
    }
    Ok(address)
}

pub fn validate_coordinates(lat: f64, lng: f64) -> bool {
    (-90.0..=90.0).contains(&lat) && (-180.0..=180.0).contains(&lng)
}

pub fn require_coordinates(name: &str, lat: f64, lng: f64) -> AppResult<(f64, f64)> {
    if validate_coordinates(lat, lng) {
        Ok((lat, lng))
    } else {
        Err(AppError::Validation(format!("{name} coordinates are out of range")))
    }
}

/// Parses `"lat,lng"` (spaces allowed around either number).
pub fn parse_location_string(raw: &str) -> Option<(f64, f64)> {
    let (lat, lng) = raw.split_once(',')?;
    if lng.contains(',') {
        return None;
    }
    let lat = lat.trim().parse::<f64>().ok()?;
    let lng = lng.trim().parse::<f64>().ok()?;
    validate_coordinates(lat, lng).then_some((lat, lng))
}

/// Removes markup tags and trims surrounding whitespace.
pub fn sanitize(raw: &str) -> String {
    strip_tags(raw).trim().to_string()
}

fn strip_tags(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;

    while let Some(open) = rest.find('<') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        match after.find('>') {
            Some(close) if close > 0 => rest = &after[close + 1..],
            _ => {
                out.push('<');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

fn check_len(field: &str, value: &str, min: usize, max: usize) -> AppResult<()> {
    let len = value.chars().count();
    if len < min || len > max {
        return Err(AppError::Validation(format!(
            "{field} must be between {min} and {max} characters"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_markup_from_messages() {
        let input = ChatInput::validate("  <script>alert(1)</script>sushi near me ", None).unwrap();
        assert_eq!(input.message, "alert(1)sushi near me");
    }

    #[test]
    fn keeps_lone_angle_brackets() {
        assert_eq!(sanitize("a <> b"), "a <> b");
        assert_eq!(sanitize("x < y"), "x < y");
        assert_eq!(sanitize("<b>bold</b> <i"), "bold <i");
    }

    #[test]
    fn message_that_is_only_markup_is_rejected() {
        assert!(ChatInput::validate("<p></p>", None).is_err());
        assert!(ChatInput::validate("", None).is_err());
        assert!(ChatInput::validate(&"x".repeat(1001), None).is_err());
    }

    #[test]
    fn blank_location_becomes_none() {
        let input = ChatInput::validate("coffee", Some("   ")).unwrap();
        assert_eq!(input.location, None);
        assert!(ChatInput::validate("coffee", Some(&"y".repeat(201))).is_err());
    }

    #[test]
    fn search_requires_both_coordinates_for_a_location() {
        let search = PlaceSearch::validate("ramen", Some(1.0), None, None, None).unwrap();
        assert_eq!(search.location, None);

        let search = PlaceSearch::validate("ramen", Some(1.0), Some(2.0), Some(500), None).unwrap();
        assert_eq!(search.location, Some((1.0, 2.0)));
        assert_eq!(search.radius, Some(500));
    }

    #[test]
    fn search_rejects_out_of_range_values() {
        assert!(PlaceSearch::validate("ramen", Some(91.0), Some(0.0), None, None).is_err());
        assert!(PlaceSearch::validate("ramen", Some(0.0), Some(-181.0), None, None).is_err());
        assert!(PlaceSearch::validate("ramen", None, None, Some(50), None).is_err());
        assert!(PlaceSearch::validate("<br>", None, None, None, None).is_err());
    }

    #[test]
    fn unknown_place_types_are_dropped() {
        assert_eq!(normalize_place_type(" Cafe "), Some("cafe".to_string()));
        assert_eq!(normalize_place_type("spaceport"), None);
    }

    #[test]
    fn place_ids_must_be_url_safe() {
        assert_eq!(
            validate_place_id(" ChIJN1t_tDeuEmsRUsoyG83frY4 ").unwrap(),
            "ChIJN1t_tDeuEmsRUsoyG83frY4"
        );
        assert!(validate_place_id("short").is_err());
        assert!(validate_place_id("ChIJN1t/../etc/passwd").is_err());
    }

    #[test]
    fn travel_mode_whitelist() {
        assert_eq!("Walking".parse::<TravelMode>().unwrap(), TravelMode::Walking);
        assert!("teleport".parse::<TravelMode>().is_err());
        assert_eq!(TravelMode::default().as_str(), "driving");
    }

    #[test]
    fn parses_lat_lng_pairs() {
        assert_eq!(parse_location_string("-7.77, 110.37"), Some((-7.77, 110.37)));
        assert_eq!(parse_location_string("1,2,3"), None);
        assert_eq!(parse_location_string("100,0"), None);
        assert_eq!(parse_location_string("Jakarta"), None);
    }

    #[test]
    fn addresses_are_sanitized_before_length_check() {
        assert!(validate_address("<b>a</b>").is_err());
        assert_eq!(validate_address(" Jalan Malioboro ").unwrap(), "Jalan Malioboro");
    }
}
