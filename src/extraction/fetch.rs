//! Fetch functions - authenticated access to the Lizard building and label endpoints

use crate::extraction::types::{BuildingQuery, BuildingRecord, LabelQuery, LabelRecord, Page};
use async_trait::async_trait;
use reqwest::cookie::{CookieStore, Jar};
use reqwest::{Client, Url};
use std::sync::Arc;
use tracing::{debug, info};

pub const DEFAULT_BASE_URL: &str = "https://bluelabel.lizard.net";
pub const USER_AGENT: &str = "Nelen-Schuurmans/labelextract";

const BUILDINGS_PATH: &str = "/api/v3/buildings/";
const LABELS_PATH: &str = "/api/v3/labels/";
const LOGIN_PATH: &str = "/api-auth/login/";
const SESSION_COOKIE: &str = "sessionid";

/// Errors from the Lizard API layer
#[derive(Debug, thiserror::Error)]
pub enum LizardError {
    /// Network, DNS, TLS or body decoding failure
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// Lizard returned a non-2xx status code
    #[error("Lizard API error ({status}): {body}")]
    Api { status: u16, body: String },

    #[error("Invalid URL {0}")]
    Url(String),

    #[error("Login failed for {0}")]
    Login(String),
}

/// The two remote lookups the resolver needs
#[async_trait]
pub trait LabelService: Send + Sync {
    /// Buildings matching an address, in the service's order (oldest first)
    async fn search_buildings(&self, query: &BuildingQuery)
        -> Result<Vec<BuildingRecord>, LizardError>;

    /// Label records for one building and label type as of `query.as_of`
    async fn fetch_labels(&self, query: &LabelQuery) -> Result<Vec<LabelRecord>, LizardError>;
}

/// HTTP client holding an authenticated Lizard session
pub struct LizardClient {
    http: Client,
    base_url: String,
}

impl LizardClient {
    /// Log in with username/password; the session cookie is kept for every later call
    pub async fn login(base_url: &str, username: &str, password: &str) -> Result<Self, LizardError> {
        let base_url = base_url.trim_end_matches('/').to_string();
        let login_url = Url::parse(&format!("{}{}", base_url, LOGIN_PATH))
            .map_err(|_| LizardError::Url(format!("{}{}", base_url, LOGIN_PATH)))?;

        let jar = Arc::new(Jar::default());
        let http = Client::builder()
            .user_agent(USER_AGENT)
            .cookie_provider(jar.clone())
            .build()?;

        info!("Logging in to {} as {}", base_url, username);
        let response = http
            .post(login_url.clone())
            .form(&[("username", username), ("password", password)])
            .send()
            .await?;
        debug!("Login responded with {}", response.status());

        if !has_session_cookie(jar.as_ref(), &login_url) {
            return Err(LizardError::Login(username.to_string()));
        }

        info!("Logged in as {}", username);
        Ok(Self::with_client(http, base_url))
    }

    /// Wrap a pre-configured [`reqwest::Client`]
    pub fn with_client(http: Client, base_url: String) -> Self {
        Self { http, base_url }
    }

    async fn get_page<Q, T>(&self, path: &str, query: &Q) -> Result<Vec<T>, LizardError>
    where
        Q: serde::Serialize + ?Sized,
        T: serde::de::DeserializeOwned,
    {
        let response = self
            .http
            .get(format!("{}{}", self.base_url, path))
            .query(query)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LizardError::Api {
                status: status.as_u16(),
                body: body.chars().take(200).collect(),
            });
        }

        let page: Page<T> = response.json().await?;
        Ok(page.results)
    }
}

#[async_trait]
impl LabelService for LizardClient {
    async fn search_buildings(
        &self,
        query: &BuildingQuery,
    ) -> Result<Vec<BuildingRecord>, LizardError> {
        self.get_page(BUILDINGS_PATH, query).await
    }

    async fn fetch_labels(&self, query: &LabelQuery) -> Result<Vec<LabelRecord>, LizardError> {
        self.get_page(LABELS_PATH, query).await
    }
}

fn has_session_cookie(jar: &Jar, url: &Url) -> bool {
    jar.cookies(url)
        .and_then(|header| header.to_str().map(str::to_string).ok())
        .map(|cookies| {
            cookies
                .split(';')
                .any(|c| c.trim().starts_with(&format!("{}=", SESSION_COOKIE)))
        })
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extraction::types::{HouseNumber, LabelType};
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_session_cookie_detection() {
        let url = Url::parse("https://bluelabel.lizard.net/api-auth/login/").unwrap();

        let jar = Jar::default();
        assert!(!has_session_cookie(&jar, &url));

        jar.add_cookie_str("csrftoken=abc; Path=/", &url);
        assert!(!has_session_cookie(&jar, &url));

        jar.add_cookie_str("sessionid=xyz; Path=/", &url);
        assert!(has_session_cookie(&jar, &url));
    }

    #[test]
    fn test_building_page_deserialization() {
        let body = r#"{
            "count": 2,
            "next": null,
            "results": [
                {"id": 11, "start": "2010-01-01T00:00:00Z", "end": "2020-01-01T00:00:00Z"},
                {"id": 12, "start": "2020-01-01T00:00:00Z", "end": null}
            ]
        }"#;
        let page: Page<BuildingRecord> = serde_json::from_str(body).unwrap();

        assert_eq!(page.results.len(), 2);
        assert!(page.results[0].end.is_some());
        assert!(page.results[1].end.is_none());
    }

    #[test]
    fn test_label_page_deserialization() {
        let body = r#"{"results": [{"label_value": "A", "object_id": 12}]}"#;
        let page: Page<LabelRecord> = serde_json::from_str(body).unwrap();
        assert_eq!(page.results[0].value(), Some("A".to_string()));
    }

    #[test]
    fn test_query_encoding() {
        let house_number = HouseNumber {
            number: "10".to_string(),
            letter: None,
        };
        let query = BuildingQuery::new("1234AB", &house_number);
        let request = Client::new()
            .get("https://example.org/api/v3/buildings/")
            .query(&query)
            .build()
            .unwrap();
        let encoded = request.url().query().unwrap_or_default().to_string();

        assert!(encoded.contains("addresses__postalcode=1234AB"));
        assert!(encoded.contains("addresses__house_number=10"));
        assert!(encoded.contains("format=json"));
        assert!(!encoded.contains("house_letter"));
        assert!(!encoded.contains("valid_at"));

        let as_of = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        let query = LabelQuery::new(LabelType::Drought, 12, as_of);
        let request = Client::new()
            .get("https://example.org/api/v3/labels/")
            .query(&query)
            .build()
            .unwrap();
        let encoded = request.url().query().unwrap_or_default().to_string();

        assert!(encoded.contains("object_id=12"));
        assert!(encoded.contains("label_type__uuid=8e979623-4022-4dbc-96f7-9492d2c84b8b"));
        assert!(encoded.contains("valid_at=2024-01-02T03%3A04%3A05Z"));
    }

    #[tokio::test]
    #[ignore] // Ignore by default since it hits the real API
    async fn test_login_rejects_bad_credentials() {
        let result = LizardClient::login(DEFAULT_BASE_URL, "nobody", "wrong").await;
        assert!(matches!(result, Err(LizardError::Login(_))));
    }
}
