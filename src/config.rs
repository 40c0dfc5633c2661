use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::error::TrackError;
use crate::models::position::GeoPoint;
use crate::push::transport::TransportKind;
use crate::tracking::reconciler::StalenessPolicy;

#[derive(Debug, Clone)]
pub struct Config {
    pub api_base_url: String,
    pub push_url: String,
    pub push_transports: Vec<TransportKind>,
    pub session_token: Option<String>,
    pub log_level: String,
    pub request_timeout: Duration,
    pub poll_timeout: Duration,
    pub map_zoom: u8,
    pub default_center: GeoPoint,
    pub staleness_policy: StalenessPolicy,
}

impl Config {
    pub fn from_env() -> Result<Self, TrackError> {
        let _ = dotenvy::dotenv();

        let api_base_url =
            env::var("API_BASE_URL").unwrap_or_else(|_| "http://localhost:3000".to_string());
        let push_url = env::var("PUSH_URL").unwrap_or_else(|_| api_base_url.clone());

        Ok(Self {
            push_transports: parse_transports(
                &env::var("PUSH_TRANSPORTS").unwrap_or_else(|_| "websocket,polling".to_string()),
            )?,
            session_token: env::var("SESSION_TOKEN").ok().filter(|t| !t.is_empty()),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            request_timeout: Duration::from_millis(parse_or_default("REQUEST_TIMEOUT_MS", 10_000)?),
            poll_timeout: Duration::from_millis(parse_or_default("POLL_TIMEOUT_MS", 25_000)?),
            map_zoom: parse_or_default("MAP_ZOOM", 15)?,
            default_center: GeoPoint {
                lat: parse_or_default("DEFAULT_CENTER_LAT", 30.0444)?,
                lng: parse_or_default("DEFAULT_CENTER_LNG", 31.2357)?,
            },
            staleness_policy: parse_or_default("STALENESS_POLICY", StalenessPolicy::default())?,
            api_base_url: trim_slash(api_base_url),
            push_url: trim_slash(push_url),
        })
    }
}

fn trim_slash(url: String) -> String {
    url.trim_end_matches('/').to_string()
}

fn parse_transports(raw: &str) -> Result<Vec<TransportKind>, TrackError> {
    let transports = raw
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<TransportKind>()
                .map_err(|err| TrackError::Config(format!("invalid PUSH_TRANSPORTS: {err}")))
        })
        .collect::<Result<Vec<_>, _>>()?;

    if transports.is_empty() {
        return Err(TrackError::Config(
            "PUSH_TRANSPORTS must name at least one transport".to_string(),
        ));
    }

    Ok(transports)
}

fn parse_or_default<T>(key: &str, default: T) -> Result<T, TrackError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|err| TrackError::Config(format!("invalid {key}: {err}"))),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::parse_transports;
    use crate::push::transport::TransportKind;

    #[test]
    fn transports_keep_configured_order() {
        let transports = parse_transports("polling, websocket").unwrap();
        assert_eq!(transports, vec![TransportKind::Polling, TransportKind::WebSocket]);
    }

    #[test]
    fn empty_transport_list_is_rejected() {
        assert!(parse_transports(" , ").is_err());
        assert!(parse_transports("carrier-pigeon").is_err());
    }
}
