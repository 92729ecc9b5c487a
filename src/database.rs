use crate::config::MongoConfig;
use crate::models::{FailureRecord, StreamResponse};
use bson::doc;
use chrono::{DateTime, Utc};
use mongodb::{Client, Collection};
use serde::{Deserialize, Serialize};

/// Audit record for a tweet the bot declined to retweet, either because
/// filters failed or because the rate limit was exhausted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotRetweetedTweet {
    #[serde(rename = "_id")]
    pub id: String,
    pub text: String,
    pub author_id: String,
    #[serde(with = "bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
    pub limit_reached: bool,
    pub failed_filters: Vec<FailureRecord>,
}

pub struct MongoDatabase {
    pub not_retweeted_tweets: NotRetweetedTweetsRepository,
}

impl MongoDatabase {
    pub async fn connect(config: &MongoConfig) -> anyhow::Result<Self> {
        let client = Client::with_uri_str(&config.uri).await?;
        let db = client.database(&config.database);
        // Fail fast at startup instead of on the first rejected tweet.
        db.run_command(doc! { "ping": 1 }).await?;
        log::info!("Connected to MongoDB database '{}'", config.database);

        Ok(MongoDatabase {
            not_retweeted_tweets: NotRetweetedTweetsRepository {
                collection: db.collection(&config.not_retweeted_collection),
            },
        })
    }
}

pub struct NotRetweetedTweetsRepository {
    collection: Collection<NotRetweetedTweet>,
}

impl NotRetweetedTweetsRepository {
    pub async fn add(&self, response: &StreamResponse) -> Result<(), mongodb::error::Error> {
        let record = NotRetweetedTweet {
            id: response.tweet.id.clone(),
            text: response.tweet.text.clone(),
            author_id: response.author().id.clone(),
            created_at: response.tweet.created_at,
            limit_reached: response.limit_reached,
            failed_filters: response.failed_filters.clone(),
        };
        self.collection.insert_one(record).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::test_fixtures::sample_response;
    use serde_json::json;

    #[test]
    fn test_record_serializes_to_bson() {
        let mut response = sample_response();
        response.limit_reached = true;
        response.failed_filters.push(FailureRecord {
            filter_name: "MinimumFollowersFilter".to_string(),
            details: json!({"min_followers": 100, "followers_count": 7}),
        });

        let record = NotRetweetedTweet {
            id: response.tweet.id.clone(),
            text: response.tweet.text.clone(),
            author_id: response.author().id.clone(),
            created_at: response.tweet.created_at,
            limit_reached: response.limit_reached,
            failed_filters: response.failed_filters.clone(),
        };

        let document = bson::to_document(&record).unwrap();
        assert_eq!(
            document.get_str("_id").unwrap(),
            "1517533170840838144"
        );
        assert_eq!(document.get_str("author_id").unwrap(), "166643730");
        assert!(document.get_bool("limit_reached").unwrap());
        assert!(document.get_datetime("created_at").is_ok());
        let filters = document.get_array("failed_filters").unwrap();
        assert_eq!(filters.len(), 1);
    }
}
