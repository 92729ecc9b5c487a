use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::env;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub twitter: TwitterConfig,
    pub mongo: MongoConfig,
    #[serde(default)]
    pub telegram: Option<TelegramConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TwitterConfig {
    #[serde(default = "default_api_url")]
    pub api_url: String,
    /// App-only token for the filtered stream. Falls back to
    /// TWITTER_BEARER_TOKEN when empty.
    #[serde(default)]
    pub bearer_token: String,
    /// User-context token for retweets and list reads. Falls back to
    /// TWITTER_ACCESS_TOKEN when empty.
    #[serde(default)]
    pub access_token: String,
    pub bot_user_id: String,
    pub whitelist_list_id: String,
    pub blacklist_list_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoConfig {
    /// Falls back to MONGO_URI when empty.
    #[serde(default)]
    pub uri: String,
    #[serde(default = "default_mongo_database")]
    pub database: String,
    #[serde(default = "default_not_retweeted_collection")]
    pub not_retweeted_collection: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    /// Falls back to TELEGRAM_TOKEN when empty.
    #[serde(default)]
    pub token: String,
    pub feed_channel_id: i64,
}

fn default_api_url() -> String {
    "https://api.twitter.com".to_string()
}

fn default_mongo_database() -> String {
    "furretweet".to_string()
}

fn default_not_retweeted_collection() -> String {
    "not_retweeted_tweets".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Config {
            twitter: TwitterConfig {
                api_url: default_api_url(),
                bearer_token: String::new(),
                access_token: String::new(),
                bot_user_id: "965641664487415809".to_string(),
                whitelist_list_id: "1474582057816834053".to_string(),
                blacklist_list_id: "1474581944432222210".to_string(),
            },
            mongo: MongoConfig {
                uri: String::new(),
                database: default_mongo_database(),
                not_retweeted_collection: default_not_retweeted_collection(),
            },
            telegram: None,
        }
    }
}

impl Config {
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        let mut config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {path}"))?;
        config.apply_env();
        Ok(config)
    }

    pub fn to_file(&self, path: &str) -> anyhow::Result<()> {
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {path}"))?;
        Ok(())
    }

    /// Secrets are kept out of the config file; any credential left empty
    /// there is taken from the environment instead.
    fn apply_env(&mut self) {
        if self.twitter.bearer_token.is_empty() {
            if let Ok(token) = env::var("TWITTER_BEARER_TOKEN") {
                self.twitter.bearer_token = token;
            }
        }
        if self.twitter.access_token.is_empty() {
            if let Ok(token) = env::var("TWITTER_ACCESS_TOKEN") {
                self.twitter.access_token = token;
            }
        }
        if self.mongo.uri.is_empty() {
            if let Ok(uri) = env::var("MONGO_URI") {
                self.mongo.uri = uri;
            }
        }
        if let Some(telegram) = &mut self.telegram {
            if telegram.token.is_empty() {
                if let Ok(token) = env::var("TELEGRAM_TOKEN") {
                    telegram.token = token;
                }
            }
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.twitter.bearer_token.is_empty() {
            anyhow::bail!("twitter.bearer_token is not set (config or TWITTER_BEARER_TOKEN)");
        }
        if self.twitter.access_token.is_empty() {
            anyhow::bail!("twitter.access_token is not set (config or TWITTER_ACCESS_TOKEN)");
        }
        if self.twitter.bot_user_id.is_empty() {
            anyhow::bail!("twitter.bot_user_id is not set");
        }
        if self.mongo.uri.is_empty() {
            anyhow::bail!("mongo.uri is not set (config or MONGO_URI)");
        }
        if let Some(telegram) = &self.telegram {
            if telegram.token.is_empty() {
                anyhow::bail!("telegram.token is not set (config or TELEGRAM_TOKEN)");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.twitter.api_url, "https://api.twitter.com");
        assert_eq!(config.mongo.database, "furretweet");
        assert_eq!(
            config.mongo.not_retweeted_collection,
            "not_retweeted_tweets"
        );
        assert!(config.telegram.is_none());
    }

    #[test]
    fn test_parse_minimal_yaml() {
        let yaml = r#"
twitter:
  bot_user_id: "965641664487415809"
  whitelist_list_id: "1474582057816834053"
  blacklist_list_id: "1474581944432222210"
mongo:
  uri: "mongodb://localhost:27017"
telegram:
  token: "123:abc"
  feed_channel_id: -498308406
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.twitter.api_url, "https://api.twitter.com");
        assert_eq!(config.mongo.database, "furretweet");
        let telegram = config.telegram.unwrap();
        assert_eq!(telegram.feed_channel_id, -498308406);
        assert_eq!(telegram.token, "123:abc");
    }

    #[test]
    fn test_validate_requires_credentials() {
        let config = Config::default();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.twitter.bearer_token = "bearer".to_string();
        config.twitter.access_token = "access".to_string();
        config.mongo.uri = "mongodb://localhost:27017".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_round_trip() {
        let config = Config::default();
        let yaml = serde_yaml::to_string(&config).unwrap();
        let parsed: Config = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed.twitter.bot_user_id, config.twitter.bot_user_id);
        assert_eq!(
            parsed.twitter.whitelist_list_id,
            config.twitter.whitelist_list_id
        );
    }
}
