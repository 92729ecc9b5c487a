use crate::config::Config;
use crate::database::MongoDatabase;
use crate::filters::{default_filters, whitelist_filters, Filter};
use crate::friday::FridayChecker;
use crate::models::{NormalizeError, StreamResponse};
use crate::rate_limiter::RetweetLimitHandler;
use crate::telegram::TelegramNotifier;
use crate::twitter::{TwitterClient, TwitterError, STREAM_RULE, STREAM_RULE_TAG};
use bytes::Bytes;
use futures_util::StreamExt;
use std::sync::Arc;
use std::time::Duration;

// Twitter's reconnect guidance: linear backoff up to a minute, then
// exponential, capped at sixteen minutes.
const LINEAR_BACKOFF_CEILING: Duration = Duration::from_secs(60);
const MAX_BACKOFF: Duration = Duration::from_secs(16 * 60);

/// The stream consumer. Owns the whole per-tweet pipeline: normalize, gate
/// on the Friday window, branch on the white/blacklists, run the filter
/// chain, and dispatch the retweet under the rate limit. Events are handled
/// strictly one at a time; the only concurrent work is the Friday checker's
/// own timer task.
pub struct FurStream {
    client: Arc<TwitterClient>,
    mongo: MongoDatabase,
    telegram: Option<TelegramNotifier>,
    friday_checker: FridayChecker,
    // Only this task ever writes the limit handler, so it needs no lock.
    rate_limit_handler: RetweetLimitHandler,
    default_filters: Vec<Box<dyn Filter>>,
    whitelist_filters: Vec<Box<dyn Filter>>,
    whitelist_list_id: String,
    blacklist_list_id: String,
}

impl FurStream {
    pub fn new(
        client: Arc<TwitterClient>,
        mongo: MongoDatabase,
        telegram: Option<TelegramNotifier>,
        config: &Config,
    ) -> Self {
        FurStream {
            client,
            mongo,
            telegram,
            friday_checker: FridayChecker::new(),
            rate_limit_handler: RetweetLimitHandler::new(),
            default_filters: default_filters(),
            whitelist_filters: whitelist_filters(),
            whitelist_list_id: config.twitter.whitelist_list_id.clone(),
            blacklist_list_id: config.twitter.blacklist_list_id.clone(),
        }
    }

    /// Connect to the filtered stream and consume it forever, reconnecting
    /// with backoff whenever Twitter drops the connection.
    pub async fn run(&mut self) -> anyhow::Result<()> {
        self.ensure_stream_rules().await?;

        let mut backoff = Duration::from_secs(1);
        loop {
            match self.client.connect_stream().await {
                Ok(response) => {
                    log::info!("Stream connected");
                    backoff = Duration::from_secs(1);
                    self.friday_checker.start();

                    match self.consume(response).await {
                        Ok(()) => log::info!("Stream closed by Twitter"),
                        Err(e) => log::error!("Stream disconnected: {e}"),
                    }
                }
                Err(e) => log::error!("Failed to connect to stream: {e}"),
            }

            log::info!("Reconnecting to stream in {}s", backoff.as_secs());
            tokio::time::sleep(backoff).await;
            backoff = next_backoff(backoff);
        }
    }

    async fn ensure_stream_rules(&self) -> anyhow::Result<()> {
        let rules = self.client.stream_rules().await?;
        if rules.is_empty() {
            log::info!("No stream rules found, adding new rules");
            self.client
                .add_stream_rule(STREAM_RULE, STREAM_RULE_TAG)
                .await?;
        } else {
            log::info!("Stream rules found");
        }
        Ok(())
    }

    /// Read the response body as newline-delimited JSON. Blank lines are
    /// the keep-alive heartbeat and are skipped.
    async fn consume(&mut self, response: reqwest::Response) -> Result<(), TwitterError> {
        let mut body = response.bytes_stream();
        let mut buffer: Vec<u8> = Vec::new();

        while let Some(chunk) = body.next().await {
            let chunk: Bytes = chunk?;
            buffer.extend_from_slice(&chunk);

            while let Some(newline) = buffer.iter().position(|&byte| byte == b'\n') {
                let line: Vec<u8> = buffer.drain(..=newline).collect();
                let line = String::from_utf8_lossy(&line);
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                self.on_data(line).await;
            }
        }
        Ok(())
    }

    /// Per-event error boundary. Nothing that goes wrong with one payload
    /// may take down the consumer loop.
    async fn on_data(&mut self, raw: &str) {
        let response = match StreamResponse::parse(raw) {
            Ok(response) => response,
            Err(e @ (NormalizeError::MissingData | NormalizeError::MissingIncludes)) => {
                log::warn!("Stream received an incomplete response: {e}");
                return;
            }
            Err(e) => {
                log::warn!("Dropping malformed stream payload: {e}");
                return;
            }
        };

        for error in &response.errors {
            log::error!("Stream partial error: {error}");
        }

        // Twitter sometimes delivers a quote retweet where only the quoted
        // tweet matched the rule. The wrapper tweet is not ours to handle.
        let text = response.tweet.text.to_lowercase();
        if !text.contains("#fursuitfriday") && !text.contains("@furretweet") {
            log::info!(
                "Tweet {} does not contain #FursuitFriday or @FurRetweet",
                response.tweet.id
            );
            return;
        }

        if let Err(e) = self.on_response(response).await {
            log::error!("Unhandled error while processing stream response: {e}");
        }
    }

    async fn on_response(&mut self, mut response: StreamResponse) -> anyhow::Result<()> {
        log::info!("Stream received response: {}", response.describe());

        if !self.friday_checker.is_friday() {
            log::info!("Not friday, ignoring...");
            return Ok(());
        }

        // Fetched fresh on every tweet; a cached list could let a freshly
        // blacklisted author through.
        let blacklist = self.client.list_members(&self.blacklist_list_id).await?;
        if blacklist.contains(&response.author().id) {
            log::info!(
                "Tweet {} not retweeted, author is blacklisted.",
                response.url()
            );
            return Ok(());
        }

        let whitelist = self.client.list_members(&self.whitelist_list_id).await?;
        let kept = if whitelist.contains(&response.author().id) {
            log::info!("Tweet {} author is whitelisted!", response.url());
            response.process_filters(&self.whitelist_filters)
        } else {
            response.process_filters(&self.default_filters)
        };

        if kept {
            self.retweet(response).await;
        } else {
            self.on_failed_filters(response).await;
        }
        Ok(())
    }

    async fn on_failed_filters(&mut self, response: StreamResponse) {
        let names: Vec<&str> = response
            .failed_filters
            .iter()
            .map(|record| record.filter_name.as_str())
            .collect();
        log::info!(
            "Tweet {} not retweeted due to failed filters {:?}.",
            response.url(),
            names
        );
        self.record_rejection(&response).await;
    }

    async fn on_rate_limit_exceeded(&mut self, mut response: StreamResponse) {
        response.limit_reached = true;
        log::info!(
            "Tweet {} not retweeted due to rate limit. Reset in {}s",
            response.url(),
            self.rate_limit_handler.seconds_until_reset()
        );
        self.record_rejection(&response).await;
    }

    /// Best-effort audit trail: the Mongo write and the Telegram ping are
    /// independent of the pipeline and of each other; failures are logged
    /// and swallowed.
    async fn record_rejection(&self, response: &StreamResponse) {
        if let Err(e) = self.mongo.not_retweeted_tweets.add(response).await {
            log::error!("Failed to record rejected tweet {}: {e}", response.tweet.id);
        }
        if let Some(telegram) = &self.telegram {
            if let Err(e) = telegram.send_failed_response(response).await {
                log::error!(
                    "Failed to notify review channel for tweet {}: {e}",
                    response.tweet.id
                );
            }
        }
    }

    /// Dispatch the retweet under the rate limit. Exactly one attempt per
    /// tweet; every branch below is terminal for this event.
    async fn retweet(&mut self, response: StreamResponse) {
        if self.rate_limit_handler.is_limit_exceeded() {
            return self.on_rate_limit_exceeded(response).await;
        }

        match self.client.retweet(&response.tweet.id).await {
            Ok(result) => {
                self.rate_limit_handler.update_limits(&result.headers);
                if result.retweeted {
                    log::info!(
                        "Retweeted tweet {} with rate limit remaining {} of {} and reseting in {}s",
                        response.url(),
                        self.rate_limit_handler.remaining,
                        self.rate_limit_handler.limit,
                        self.rate_limit_handler.seconds_until_reset()
                    );
                } else {
                    log::warn!(
                        "Retweeting tweet {} was not acknowledged by Twitter.",
                        response.url()
                    );
                }
            }
            Err(TwitterError::TooManyRequests { headers }) => {
                log::debug!("Got 429 Too Many Requests error from Twitter.");
                let was_populated = self.rate_limit_handler.populated();
                self.rate_limit_handler.update_limits(&headers);

                if !was_populated {
                    // A 429 before we ever saw quota headers: nothing we
                    // budgeted caused it, so treat it as noise.
                    log::debug!(
                        "Rate limit handler not populated, ignoring 429 Too Many Requests error."
                    );
                } else {
                    log::warn!(
                        "Limit handler somehow missed the rate limit. \
                         Got 429 Too Many Requests error from Twitter. \
                         Updating limits from response."
                    );
                    self.on_rate_limit_exceeded(response).await;
                }
            }
            Err(e) => log::error!("Error while retweeting: {e}"),
        }
    }
}

fn next_backoff(current: Duration) -> Duration {
    if current < LINEAR_BACKOFF_CEILING {
        current + Duration::from_secs(1)
    } else {
        std::cmp::min(current * 2, MAX_BACKOFF)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_grows_linearly_below_a_minute() {
        assert_eq!(
            next_backoff(Duration::from_secs(1)),
            Duration::from_secs(2)
        );
        assert_eq!(
            next_backoff(Duration::from_secs(59)),
            Duration::from_secs(60)
        );
    }

    #[test]
    fn test_backoff_doubles_above_a_minute() {
        assert_eq!(
            next_backoff(Duration::from_secs(60)),
            Duration::from_secs(120)
        );
        assert_eq!(
            next_backoff(Duration::from_secs(480)),
            Duration::from_secs(960)
        );
    }

    #[test]
    fn test_backoff_is_capped() {
        assert_eq!(next_backoff(MAX_BACKOFF), MAX_BACKOFF);
        assert_eq!(
            next_backoff(Duration::from_secs(900)),
            MAX_BACKOFF
        );
    }
}
