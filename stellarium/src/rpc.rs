//! Stellarium Remote Control client
//!
//! Thin HTTP client for the Remote Control plugin's JSON API. Used for
//! introspection only (what is selected, what time Stellarium thinks it is);
//! the push-to pipeline never depends on it.

use crate::error::{StellariumError, StellariumResult};
use chrono::{DateTime, NaiveDateTime, Utc};
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

/// Default Remote Control API endpoint
pub const DEFAULT_API_URL: &str = "http://localhost:8090/api";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);
const RETURN_TO_CURRENT_TIME: &str = "actionReturn_To_Current_Time";

/// Remote Control plugin client
#[derive(Debug, Clone)]
pub struct StellariumRpc {
    http_client: Client,
    api_url: String,
    /// Last seen property change id, -2 asks for everything
    prop_id: i64,
    /// Last seen action change id, -2 asks for everything
    action_id: i64,
}

impl StellariumRpc {
    pub fn new(api_url: impl Into<String>) -> StellariumResult<Self> {
        let http_client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .connect_timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| StellariumError::RequestFailed(e.to_string()))?;

        Ok(Self {
            http_client,
            api_url: api_url.into().trim_end_matches('/').to_string(),
            prop_id: -2,
            action_id: -2,
        })
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    fn build_url(&self, endpoint: &str) -> String {
        format!("{}/{}", self.api_url, endpoint)
    }

    fn status_url(&self) -> String {
        format!(
            "{}?propId={}&actionId={}",
            self.build_url("main/status"),
            self.prop_id,
            self.action_id
        )
    }

    async fn get_json(&self, url: &str) -> StellariumResult<Value> {
        debug!("GET {}", url);
        let response = self.http_client.get(url).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StellariumError::HttpError {
                status: status.as_u16(),
                message: body,
            });
        }

        Ok(response.json().await?)
    }

    async fn post_form(&self, endpoint: &str, params: &[(&str, &str)]) -> StellariumResult<String> {
        let url = self.build_url(endpoint);
        debug!("POST {} {:?}", url, params);
        let response = self.http_client.post(&url).form(params).send().await?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(StellariumError::HttpError {
                status: status.as_u16(),
                message: body,
            });
        }
        Ok(body)
    }

    /// Remember the change ids so the next status only carries what changed
    fn track_changes(&mut self, status: &Value) {
        if let Some(id) = status["propertyChanges"]["id"].as_i64() {
            self.prop_id = id;
        }
        if let Some(id) = status["actionChanges"]["id"].as_i64() {
            self.action_id = id;
        }
    }

    /// Main status
    pub async fn status(&mut self) -> StellariumResult<Value> {
        let status = self.get_json(&self.status_url()).await?;
        self.track_changes(&status);
        Ok(status)
    }

    /// Everything Stellarium knows about the selected object
    pub async fn selected_info(&self) -> StellariumResult<Value> {
        let url = format!("{}?format=json", self.build_url("objects/info"));
        self.get_json(&url).await
    }

    /// Stellarium's simulation time
    pub async fn utc(&mut self) -> StellariumResult<DateTime<Utc>> {
        let status = self.status().await?;
        let utc = status["time"]["utc"]
            .as_str()
            .ok_or_else(|| StellariumError::ParseError("status has no time.utc".to_string()))?;
        parse_utc(utc)
    }

    /// Altitude and azimuth of the selected object in degrees.
    ///
    /// Stellarium only refreshes these while its window has focus.
    pub async fn selected_alt_az(&self) -> StellariumResult<(f64, f64)> {
        let info = self.selected_info().await?;
        Ok((field(&info, "altitude")?, field(&info, "azimuth")?))
    }

    /// Right ascension and declination of the selected object in degrees
    pub async fn selected_ra_dec(&self) -> StellariumResult<(f64, f64)> {
        let info = self.selected_info().await?;
        Ok((field(&info, "ra")?, field(&info, "dec")?))
    }

    /// Select and center an object by name
    pub async fn focus(&self, target: &str) -> StellariumResult<String> {
        self.post_form("main/focus", &[("target", target)]).await
    }

    /// Reset Stellarium's clock to the current time
    pub async fn set_time_to_now(&self) -> StellariumResult<String> {
        self.post_form("stelaction/do", &[("id", RETURN_TO_CURRENT_TIME)]).await
    }

    pub async fn list_actions(&self) -> StellariumResult<Value> {
        self.get_json(&self.build_url("stelaction/list")).await
    }
}

fn field(info: &Value, key: &str) -> StellariumResult<f64> {
    info[key]
        .as_f64()
        .ok_or_else(|| StellariumError::ParseError(format!("object info has no numeric '{}'", key)))
}

/// Parse Stellarium's UTC string, with or without the trailing `Z`
pub fn parse_utc(text: &str) -> StellariumResult<DateTime<Utc>> {
    if let Ok(time) = DateTime::parse_from_rfc3339(text) {
        return Ok(time.with_timezone(&Utc));
    }

    let naive = text.trim_end_matches('Z');
    NaiveDateTime::parse_from_str(naive, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(naive, "%Y-%m-%d %H:%M:%S%.f"))
        .map(|time| time.and_utc())
        .map_err(|e| StellariumError::ParseError(format!("bad utc '{}': {}", text, e)))
}
