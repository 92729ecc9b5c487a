use crate::filters::Filter;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublicMetricsUser {
    pub followers_count: u64,
    pub following_count: u64,
    pub tweet_count: u64,
    pub listed_count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub username: String,
    pub name: String,
    #[serde(default)]
    pub verified: bool,
    #[serde(default)]
    pub verified_type: Option<String>,
    pub public_metrics: PublicMetricsUser,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Media {
    pub media_key: String,
    #[serde(rename = "type")]
    pub media_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublicMetrics {
    pub retweet_count: u64,
    pub reply_count: u64,
    pub like_count: u64,
    pub quote_count: u64,
    #[serde(default)]
    pub impression_count: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Includes {
    #[serde(default)]
    pub users: Vec<User>,
    #[serde(default)]
    pub media: Vec<Media>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attachments {
    #[serde(default)]
    pub media_keys: Vec<String>,
}

/// Tweet entities as delivered by the v2 API. Only the keys the filters look
/// at are modeled; everything else is ignored on deserialization.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Entities {
    #[serde(default)]
    pub hashtags: Option<Vec<Hashtag>>,
    #[serde(default)]
    pub urls: Option<Vec<UrlEntity>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hashtag {
    pub tag: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UrlEntity {
    pub url: String,
    #[serde(default)]
    pub expanded_url: Option<String>,
    #[serde(default)]
    pub display_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tweet {
    pub id: String,
    pub text: String,
    pub author_id: String,
    pub created_at: DateTime<Utc>,
    pub public_metrics: PublicMetrics,
    #[serde(default)]
    pub attachments: Option<Attachments>,
    #[serde(default)]
    pub entities: Option<Entities>,
    #[serde(default)]
    pub possibly_sensitive: Option<bool>,
}

/// One filter that rejected a tweet, with whatever diagnostics it captured.
/// These are what the review channel and the audit collection receive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureRecord {
    pub filter_name: String,
    pub details: serde_json::Value,
}

#[derive(Debug, Error)]
pub enum NormalizeError {
    #[error("stream payload has no data field")]
    MissingData,
    #[error("stream payload has no includes field")]
    MissingIncludes,
    #[error("includes carried no users, cannot resolve author")]
    NoAuthor,
    #[error("malformed stream payload: {0}")]
    Json(#[from] serde_json::Error),
}

/// One normalized stream event: the tweet, its expansions, any partial
/// errors Twitter reported alongside it, and the filter verdicts collected
/// while it moves through the pipeline.
#[derive(Debug, Clone)]
pub struct StreamResponse {
    pub tweet: Tweet,
    pub includes: Includes,
    pub errors: Vec<serde_json::Value>,
    pub failed_filters: Vec<FailureRecord>,
    pub limit_reached: bool,
}

impl StreamResponse {
    /// Parse one line of the filtered stream. `data` and `includes` are both
    /// required; partial `errors` are carried along without failing.
    pub fn parse(raw: &str) -> Result<StreamResponse, NormalizeError> {
        let value: serde_json::Value = serde_json::from_str(raw)?;
        let Some(map) = value.as_object() else {
            return Err(NormalizeError::MissingData);
        };
        let Some(data) = map.get("data") else {
            return Err(NormalizeError::MissingData);
        };
        let Some(includes) = map.get("includes") else {
            return Err(NormalizeError::MissingIncludes);
        };
        let errors = map
            .get("errors")
            .and_then(|e| e.as_array())
            .cloned()
            .unwrap_or_default();

        let tweet: Tweet = serde_json::from_value(data.clone())?;
        let includes: Includes = serde_json::from_value(includes.clone())?;
        if includes.users.is_empty() {
            return Err(NormalizeError::NoAuthor);
        }

        Ok(StreamResponse {
            tweet,
            includes,
            errors,
            failed_filters: Vec::new(),
            limit_reached: false,
        })
    }

    /// The tweet's author. Always the first expanded user; `parse` rejects
    /// payloads where the user list is empty, so this cannot panic on a
    /// normalized response.
    pub fn author(&self) -> &User {
        &self.includes.users[0]
    }

    pub fn url(&self) -> String {
        format!("https://twitter.com/_/status/{}", self.tweet.id)
    }

    /// Run every filter in order and record each failure. Filters are never
    /// short-circuited: the full failure list is what the human reviewer
    /// sees, so later filters must run even when an earlier one already
    /// rejected the tweet. Returns true when all filters passed.
    pub fn process_filters(&mut self, filters: &[Box<dyn Filter>]) -> bool {
        for filter in filters {
            let outcome = filter.check(self);
            if !outcome.passed {
                self.failed_filters.push(FailureRecord {
                    filter_name: filter.name().to_string(),
                    details: outcome.details,
                });
            }
        }
        self.failed_filters.is_empty()
    }

    pub fn describe(&self) -> String {
        format!(
            "({}) @{}: {}",
            self.url(),
            self.author().username,
            self.tweet.text
        )
    }
}

#[cfg(test)]
pub(crate) mod test_fixtures {
    use super::StreamResponse;

    pub const RAW_STREAM_PAYLOAD: &str = r#"{
        "data": {
            "id": "1517533170840838144",
            "possibly_sensitive": false,
            "created_at": "2022-04-22T15:57:56.000Z",
            "author_id": "166643730",
            "entities": {
                "urls": [
                    {
                        "start": 0,
                        "end": 23,
                        "url": "https://t.co/34axngukSE",
                        "expanded_url": "https://twitter.com/DonovanCarmona/status/1517533170840838144/photo/1",
                        "display_url": "pic.twitter.com/34axngukSE",
                        "media_key": "3_1517533153853902848"
                    }
                ]
            },
            "attachments": {"media_keys": ["3_1517533153853902848"]},
            "text": "https://t.co/34axngukSE",
            "public_metrics": {
                "retweet_count": 23,
                "reply_count": 2,
                "like_count": 457,
                "quote_count": 1,
                "impression_count": 0
            },
            "edit_history_tweet_ids": ["1517533170840838144"]
        },
        "includes": {
            "media": [{"media_key": "3_1517533153853902848", "type": "photo"}],
            "users": [
                {
                    "verified": false,
                    "id": "166643730",
                    "public_metrics": {
                        "followers_count": 2547,
                        "following_count": 799,
                        "tweet_count": 43069,
                        "listed_count": 9
                    },
                    "username": "DonovanCarmona",
                    "created_at": "2010-07-14T17:24:34.000Z",
                    "verified_type": "none",
                    "name": "Donovan"
                }
            ]
        },
        "errors": []
    }"#;

    pub fn sample_response() -> StreamResponse {
        StreamResponse::parse(RAW_STREAM_PAYLOAD).expect("fixture payload must parse")
    }
}
