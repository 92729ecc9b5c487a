use crate::config::TelegramConfig;
use crate::models::{FailureRecord, StreamResponse};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TelegramError {
    #[error("http transport error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("telegram api error {code}: {description}")]
    Api { code: i64, description: String },
}

#[derive(Debug, Deserialize)]
struct TelegramResponse {
    ok: bool,
    #[serde(default)]
    error_code: Option<i64>,
    #[serde(default)]
    description: Option<String>,
}

/// Pushes rejected tweets to the review feed channel so a human can
/// override the bot. The message carries the failed-filter summary and
/// inline buttons; what happens when a button is pressed is handled by the
/// review bot, not by this pipeline.
pub struct TelegramNotifier {
    token: String,
    feed_channel_id: i64,
    http: reqwest::Client,
    base_url: String,
}

impl TelegramNotifier {
    pub fn new(config: &TelegramConfig) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()?;
        Ok(TelegramNotifier {
            token: config.token.clone(),
            feed_channel_id: config.feed_channel_id,
            http,
            base_url: "https://api.telegram.org".to_string(),
        })
    }

    fn api_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.base_url, self.token, method)
    }

    pub async fn send_failed_response(
        &self,
        response: &StreamResponse,
    ) -> Result<(), TelegramError> {
        let body = json!({
            "chat_id": self.feed_channel_id,
            "text": format_response(response),
            "reply_markup": failed_tweet_keyboard(&response.tweet.id, &response.author().id),
        });

        let reply: TelegramResponse = self
            .http
            .post(self.api_url("sendMessage"))
            .json(&body)
            .send()
            .await?
            .json()
            .await?;

        if reply.ok {
            Ok(())
        } else {
            Err(TelegramError::Api {
                code: reply.error_code.unwrap_or(0),
                description: reply.description.unwrap_or_default(),
            })
        }
    }
}

/// Inline keyboard offering the override actions for a rejected tweet. The
/// callback data encodes everything the review bot needs to act on it.
fn failed_tweet_keyboard(tweet_id: &str, author_id: &str) -> serde_json::Value {
    json!({
        "inline_keyboard": [[
            {
                "text": "Retweet",
                "callback_data": format!("failed_tweet:{tweet_id}:{author_id}:retweet"),
            },
            {
                "text": "Add to blacklist",
                "callback_data": format!("failed_tweet:{tweet_id}:{author_id}:add_blacklist"),
            },
        ]]
    })
}

fn format_response(response: &StreamResponse) -> String {
    format!(
        "Author: {}\n{}\n{}",
        response.author().username,
        format_failed_filters(&response.failed_filters),
        response.url()
    )
}

// Rendered like:
// Failed filters:
// ┠ MinimumFollowersFilter: [ Followers: 1280, Min: 2000 ]
// ┖ BannedTermsFilter: [ crypto, nft ]
fn format_failed_filters(failed_filters: &[FailureRecord]) -> String {
    if failed_filters.is_empty() {
        return "No failed filters".to_string();
    }

    let mut lines = vec!["Failed filters:".to_string()];
    for (index, record) in failed_filters.iter().enumerate() {
        let branch = if index == failed_filters.len() - 1 {
            '┖'
        } else {
            '┠'
        };
        lines.push(format!("{} {}", branch, format_filter(record)));
    }
    lines.join("\n")
}

fn format_filter(record: &FailureRecord) -> String {
    let details = match record.filter_name.as_str() {
        "MinimumFollowersFilter" => Some(format!(
            "Followers: {}, Min: {}",
            record.details["followers_count"], record.details["min_followers"]
        )),
        "MinimumAccountAgeFilter" => account_age_details(record),
        "MaximumNewLinesFilter" => Some(format!(
            "New lines: {}, Max: {}",
            record.details["new_lines"], record.details["max_new_lines"]
        )),
        "MaximumHashtagsFilter" => Some(format!(
            "Hashtags: {}, Max: {}",
            record.details["hashtags_count"], record.details["max_hashtags"]
        )),
        "BannedTermsFilter" => record.details["banned_words"].as_array().map(|words| {
            words
                .iter()
                .filter_map(|word| word.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        }),
        _ => None,
    };

    match details {
        Some(details) => format!("{}: [ {} ]", record.filter_name, details),
        None => record.filter_name.clone(),
    }
}

fn account_age_details(record: &FailureRecord) -> Option<String> {
    let created_at = record.details["account_created_at"].as_str()?;
    let created_at = DateTime::parse_from_rfc3339(created_at).ok()?;
    let days = (Utc::now() - created_at.with_timezone(&Utc)).num_days();
    Some(format!("Days: {}, Min: {}", days, record.details["min_days"]))
}
