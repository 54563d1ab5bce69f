use std::time::Duration;

use crate::error::{Provider, ProviderError};
use crate::{Error, Result};

const EVERYTHING_URL: &str = "https://newsapi.org/v2/everything";

#[derive(serde::Deserialize, Debug)]
struct NewsResponse {
    articles: Option<Vec<serde_json::Value>>,
}

/// Music headlines from newsapi.org, passed through as-is.
pub struct NewsClient {
    api_key: Option<String>,
    timeout: Duration,
}

fn query(genre: Option<&str>) -> String {
    match genre.map(str::trim).filter(|g| !g.is_empty()) {
        Some(genre) => format!("music {}", genre),
        None => "music".to_string(),
    }
}

impl NewsClient {
    pub fn new(api_key: Option<String>, timeout: Duration) -> Self {
        Self { api_key, timeout }
    }

    fn url(&self, genre: Option<&str>) -> Result<surf::Url> {
        let key = self
            .api_key
            .as_deref()
            .ok_or_else(|| Error::Configuration("NEWS_API_KEY is not set".to_string()))?;
        let q = query(genre);
        surf::Url::parse_with_params(
            EVERYTHING_URL,
            &[("q", q.as_str()), ("sortBy", "publishedAt"), ("apiKey", key)],
        )
        .map_err(|e| Error::Internal(format!("news url error {}", e)))
    }

    pub async fn articles(&self, genre: Option<&str>) -> Result<Vec<serde_json::Value>> {
        let url = self.url(genre)?;
        let transport = |message: String| ProviderError::Transport {
            provider: Provider::News,
            message,
        };
        let mut resp = async_std::future::timeout(self.timeout, surf::get(url).send())
            .await
            .map_err(|_| ProviderError::Timeout {
                provider: Provider::News,
                seconds: self.timeout.as_secs(),
            })?
            .map_err(|e| transport(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            let message = resp.body_string().await.unwrap_or_default();
            return Err(ProviderError::Rejected {
                provider: Provider::News,
                status: status.into(),
                message,
            }
            .into());
        }
        let body: NewsResponse = resp
            .body_json()
            .await
            .map_err(|e| transport(e.to_string()))?;
        body.articles
            .ok_or_else(|| transport("Invalid API response".to_string()).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn genre_is_appended_to_the_query() {
        assert_eq!(query(Some("jazz")), "music jazz");
        assert_eq!(query(Some(" ")), "music");
        assert_eq!(query(None), "music");
    }

    #[test]
    fn url_carries_sort_and_key() {
        let news = NewsClient::new(Some("k".into()), Duration::from_secs(1));
        let url = news.url(Some("hip hop")).unwrap();
        let params: std::collections::HashMap<_, _> = url.query_pairs().into_owned().collect();
        assert_eq!(params["q"], "music hip hop");
        assert_eq!(params["sortBy"], "publishedAt");
        assert_eq!(params["apiKey"], "k");
    }

    #[test]
    fn missing_key_is_a_configuration_error() {
        let news = NewsClient::new(None, Duration::from_secs(1));
        assert!(matches!(news.url(None), Err(Error::Configuration(_))));
    }
}
