use crate::config::TwitterConfig;
use reqwest::header::HeaderMap;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashSet;
use std::time::Duration;
use thiserror::Error;
use url::Url;

pub const STREAM_EXPANSIONS: &str = "author_id,attachments.media_keys";
pub const STREAM_TWEET_FIELDS: &str =
    "author_id,created_at,entities,public_metrics,possibly_sensitive";
pub const STREAM_USER_FIELDS: &str = "created_at,public_metrics,username,verified,verified_type";
pub const STREAM_MEDIA_FIELDS: &str = "media_key,type";

pub const STREAM_RULE: &str =
    "(#FursuitFriday OR @FurRetweet) has:media -is:retweet -is:reply -is:nullcast";
pub const STREAM_RULE_TAG: &str = "FurretweetRules";

#[derive(Debug, Error)]
pub enum TwitterError {
    #[error("http transport error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("twitter api error {status}: {message}")]
    Api { status: u16, message: String },
    #[error("429 Too Many Requests")]
    TooManyRequests { headers: RateLimitHeaders },
    #[error("invalid api url: {0}")]
    BadUrl(#[from] url::ParseError),
}

/// Quota state parsed from the `x-rate-limit-*` response headers. Any
/// header may be absent; absent fields are reported as `None` so the limit
/// handler can leave its previous values in place.
#[derive(Debug, Clone, Default)]
pub struct RateLimitHeaders {
    pub limit: Option<i64>,
    pub remaining: Option<i64>,
    pub reset: Option<i64>,
}

impl RateLimitHeaders {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        fn parse(headers: &HeaderMap, name: &str) -> Option<i64> {
            headers.get(name)?.to_str().ok()?.parse().ok()
        }
        RateLimitHeaders {
            limit: parse(headers, "x-rate-limit-limit"),
            remaining: parse(headers, "x-rate-limit-remaining"),
            reset: parse(headers, "x-rate-limit-reset"),
        }
    }
}

pub struct RetweetResponse {
    pub retweeted: bool,
    pub headers: RateLimitHeaders,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamRule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
}

/// Thin client over the Twitter API v2 endpoints the bot uses. The app-only
/// bearer token drives the filtered stream and its rules; the user-context
/// access token drives retweets and list reads.
pub struct TwitterClient {
    http: reqwest::Client,
    stream_http: reqwest::Client,
    base_url: Url,
    bearer_token: String,
    access_token: String,
    bot_user_id: String,
}

impl TwitterClient {
    pub fn new(config: &TwitterConfig) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(format!("furretweet/{}", env!("CARGO_PKG_VERSION")))
            .build()?;
        // No total-request timeout here: it would sever the long-lived
        // stream response mid-flight.
        let stream_http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .user_agent(format!("furretweet/{}", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(TwitterClient {
            http,
            stream_http,
            base_url: Url::parse(&config.api_url)?,
            bearer_token: config.bearer_token.clone(),
            access_token: config.access_token.clone(),
            bot_user_id: config.bot_user_id.clone(),
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, TwitterError> {
        Ok(self.base_url.join(path)?)
    }

    /// Retweet one tweet as the bot account. Returns the acknowledgement
    /// flag and the quota headers from the response; a 429 is surfaced as
    /// its own error variant still carrying those headers.
    pub async fn retweet(&self, tweet_id: &str) -> Result<RetweetResponse, TwitterError> {
        let url = self.endpoint(&format!("/2/users/{}/retweets", self.bot_user_id))?;
        let response = self
            .http
            .post(url)
            .bearer_auth(&self.access_token)
            .json(&json!({ "tweet_id": tweet_id }))
            .send()
            .await?;

        let headers = RateLimitHeaders::from_headers(response.headers());
        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(TwitterError::TooManyRequests { headers });
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(TwitterError::Api {
                status: status.as_u16(),
                message,
            });
        }

        #[derive(Deserialize)]
        struct Body {
            #[serde(default)]
            data: Option<BodyData>,
        }
        #[derive(Deserialize)]
        struct BodyData {
            #[serde(default)]
            retweeted: bool,
        }
        let body: Body = response.json().await?;
        Ok(RetweetResponse {
            retweeted: body.data.map(|data| data.retweeted).unwrap_or(false),
            headers,
        })
    }

    /// Fetch the full membership of a list, following `next_token`
    /// pagination until exhausted. Deliberately uncached: staleness here
    /// would let a freshly blacklisted author through.
    pub async fn list_members(&self, list_id: &str) -> Result<HashSet<String>, TwitterError> {
        #[derive(Deserialize)]
        struct Page {
            #[serde(default)]
            data: Vec<Member>,
            #[serde(default)]
            meta: Option<Meta>,
        }
        #[derive(Deserialize)]
        struct Member {
            id: String,
        }
        #[derive(Deserialize)]
        struct Meta {
            #[serde(default)]
            next_token: Option<String>,
        }

        let mut members = HashSet::new();
        let mut pagination_token: Option<String> = None;
        loop {
            let mut url = self.endpoint(&format!("/2/lists/{list_id}/members"))?;
            url.query_pairs_mut().append_pair("max_results", "100");
            if let Some(token) = &pagination_token {
                url.query_pairs_mut().append_pair("pagination_token", token);
            }

            let response = self
                .http
                .get(url)
                .bearer_auth(&self.access_token)
                .send()
                .await?;
            let response = check_status(response).await?;
            let page: Page = response.json().await?;

            members.extend(page.data.into_iter().map(|member| member.id));
            match page.meta.and_then(|meta| meta.next_token) {
                Some(token) => pagination_token = Some(token),
                None => break,
            }
        }
        Ok(members)
    }

    pub async fn stream_rules(&self) -> Result<Vec<StreamRule>, TwitterError> {
        #[derive(Deserialize)]
        struct Rules {
            #[serde(default)]
            data: Vec<StreamRule>,
        }

        let url = self.endpoint("/2/tweets/search/stream/rules")?;
        let response = self
            .http
            .get(url)
            .bearer_auth(&self.bearer_token)
            .send()
            .await?;
        let response = check_status(response).await?;
        let rules: Rules = response.json().await?;
        Ok(rules.data)
    }

    pub async fn add_stream_rule(&self, value: &str, tag: &str) -> Result<(), TwitterError> {
        let url = self.endpoint("/2/tweets/search/stream/rules")?;
        let body = json!({
            "add": [StreamRule {
                id: None,
                value: value.to_string(),
                tag: Some(tag.to_string()),
            }]
        });
        let response = self
            .http
            .post(url)
            .bearer_auth(&self.bearer_token)
            .json(&body)
            .send()
            .await?;
        check_status(response).await?;
        Ok(())
    }

    /// Open the filtered stream with the expansions the filters need. The
    /// returned response body is a long-lived newline-delimited JSON feed.
    pub async fn connect_stream(&self) -> Result<reqwest::Response, TwitterError> {
        let mut url = self.endpoint("/2/tweets/search/stream")?;
        url.query_pairs_mut()
            .append_pair("expansions", STREAM_EXPANSIONS)
            .append_pair("tweet.fields", STREAM_TWEET_FIELDS)
            .append_pair("user.fields", STREAM_USER_FIELDS)
            .append_pair("media.fields", STREAM_MEDIA_FIELDS);

        let response = self
            .stream_http
            .get(url)
            .bearer_auth(&self.bearer_token)
            .send()
            .await?;
        check_status(response).await
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, TwitterError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let headers = RateLimitHeaders::from_headers(response.headers());
    if status == StatusCode::TOO_MANY_REQUESTS {
        return Err(TwitterError::TooManyRequests { headers });
    }
    let message = response.text().await.unwrap_or_default();
    Err(TwitterError::Api {
        status: status.as_u16(),
        message,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn test_rate_limit_headers_parse_all_fields() {
        let mut headers = HeaderMap::new();
        headers.insert("x-rate-limit-limit", HeaderValue::from_static("50"));
        headers.insert("x-rate-limit-remaining", HeaderValue::from_static("0"));
        headers.insert(
            "x-rate-limit-reset",
            HeaderValue::from_static("1700000000"),
        );

        let parsed = RateLimitHeaders::from_headers(&headers);
        assert_eq!(parsed.limit, Some(50));
        assert_eq!(parsed.remaining, Some(0));
        assert_eq!(parsed.reset, Some(1_700_000_000));
    }

    #[test]
    fn test_rate_limit_headers_missing_and_garbage_fields() {
        let mut headers = HeaderMap::new();
        headers.insert("x-rate-limit-remaining", HeaderValue::from_static("12"));
        headers.insert(
            "x-rate-limit-reset",
            HeaderValue::from_static("not-a-number"),
        );

        let parsed = RateLimitHeaders::from_headers(&headers);
        assert_eq!(parsed.limit, None);
        assert_eq!(parsed.remaining, Some(12));
        assert_eq!(parsed.reset, None);
    }

    #[test]
    fn test_stream_rule_serialization_skips_empty_fields() {
        let rule = StreamRule {
            id: None,
            value: STREAM_RULE.to_string(),
            tag: Some(STREAM_RULE_TAG.to_string()),
        };
        let value = serde_json::to_value(&rule).unwrap();
        assert!(value.get("id").is_none());
        assert_eq!(value["value"], STREAM_RULE);
        assert_eq!(value["tag"], STREAM_RULE_TAG);
    }
}
