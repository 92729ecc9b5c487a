use crate::models::StreamResponse;
use chrono::{Duration, Utc};
use regex::Regex;
use serde_json::json;

/// Outcome of one filter over one stream response. `details` is whatever
/// diagnostics the filter wants the reviewer to see; it ends up in the
/// audit record when the filter failed.
#[derive(Debug, Clone)]
pub struct FilterOutcome {
    pub passed: bool,
    pub details: serde_json::Value,
}

impl FilterOutcome {
    pub fn pass() -> Self {
        FilterOutcome {
            passed: true,
            details: json!({}),
        }
    }

    pub fn pass_with(details: serde_json::Value) -> Self {
        FilterOutcome {
            passed: true,
            details,
        }
    }

    pub fn fail(details: serde_json::Value) -> Self {
        FilterOutcome {
            passed: false,
            details,
        }
    }
}

/// A single keep/drop predicate over a stream response. Filters are pure per
/// call and independent of each other; the chain runner records the details
/// of every filter that failed.
pub trait Filter: Send + Sync {
    fn name(&self) -> &'static str;
    fn check(&self, response: &StreamResponse) -> FilterOutcome;
}

pub struct MinimumFollowersFilter {
    min_followers: u64,
}

impl MinimumFollowersFilter {
    pub fn new(min_followers: u64) -> Self {
        MinimumFollowersFilter { min_followers }
    }
}

impl Filter for MinimumFollowersFilter {
    fn name(&self) -> &'static str {
        "MinimumFollowersFilter"
    }

    fn check(&self, response: &StreamResponse) -> FilterOutcome {
        let followers_count = response.author().public_metrics.followers_count;
        let details = json!({
            "min_followers": self.min_followers,
            "followers_count": followers_count,
        });
        if followers_count >= self.min_followers {
            FilterOutcome::pass_with(details)
        } else {
            FilterOutcome::fail(details)
        }
    }
}

pub struct NsfwFilter;

impl Filter for NsfwFilter {
    fn name(&self) -> &'static str {
        "NsfwFilter"
    }

    fn check(&self, response: &StreamResponse) -> FilterOutcome {
        if response.tweet.possibly_sensitive.unwrap_or(false) {
            FilterOutcome::fail(json!({}))
        } else {
            FilterOutcome::pass()
        }
    }
}

pub struct MinimumAccountAgeFilter {
    min_days: i64,
}

impl MinimumAccountAgeFilter {
    pub fn new(min_days: i64) -> Self {
        MinimumAccountAgeFilter { min_days }
    }
}

impl Filter for MinimumAccountAgeFilter {
    fn name(&self) -> &'static str {
        "MinimumAccountAgeFilter"
    }

    fn check(&self, response: &StreamResponse) -> FilterOutcome {
        let now = Utc::now();
        let created_at = response.author().created_at;
        let details = json!({
            "min_days": self.min_days,
            "account_created_at": created_at.to_rfc3339(),
            "checked_at": now.to_rfc3339(),
        });
        if created_at <= now - Duration::days(self.min_days) {
            FilterOutcome::pass_with(details)
        } else {
            FilterOutcome::fail(details)
        }
    }
}

pub struct MaximumNewLinesFilter {
    max: usize,
}

impl MaximumNewLinesFilter {
    pub fn new(max: usize) -> Self {
        MaximumNewLinesFilter { max }
    }
}

impl Filter for MaximumNewLinesFilter {
    fn name(&self) -> &'static str {
        "MaximumNewLinesFilter"
    }

    fn check(&self, response: &StreamResponse) -> FilterOutcome {
        let new_lines = response.tweet.text.matches('\n').count();
        let details = json!({
            "max_new_lines": self.max,
            "new_lines": new_lines,
        });
        if new_lines <= self.max {
            FilterOutcome::pass_with(details)
        } else {
            FilterOutcome::fail(details)
        }
    }
}

/// Rejects tweets whose entire text is just the hashtag itself. Twitter
/// appends a t.co link for the attached media, so those are stripped before
/// comparing.
pub struct FursuitFridayOnlyFilter {
    shortener: Regex,
}

impl FursuitFridayOnlyFilter {
    pub fn new() -> Self {
        FursuitFridayOnlyFilter {
            shortener: Regex::new(r"https?://t\.co/\S+").expect("static pattern compiles"),
        }
    }
}

impl Default for FursuitFridayOnlyFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl Filter for FursuitFridayOnlyFilter {
    fn name(&self) -> &'static str {
        "FursuitFridayOnlyFilter"
    }

    fn check(&self, response: &StreamResponse) -> FilterOutcome {
        let stripped = self.shortener.replace_all(&response.tweet.text, "");
        if stripped.trim().to_lowercase() == "#fursuitfriday" {
            FilterOutcome::fail(json!({}))
        } else {
            FilterOutcome::pass()
        }
    }
}

pub struct MediaFilter;

impl Filter for MediaFilter {
    fn name(&self) -> &'static str {
        "MediaFilter"
    }

    fn check(&self, response: &StreamResponse) -> FilterOutcome {
        if response.includes.media.is_empty() {
            FilterOutcome::fail(json!({}))
        } else {
            FilterOutcome::pass()
        }
    }
}

pub struct MaximumHashtagsFilter {
    max: usize,
}

impl MaximumHashtagsFilter {
    pub fn new(max: usize) -> Self {
        MaximumHashtagsFilter { max }
    }
}

impl Filter for MaximumHashtagsFilter {
    fn name(&self) -> &'static str {
        "MaximumHashtagsFilter"
    }

    fn check(&self, response: &StreamResponse) -> FilterOutcome {
        // A tweet without entities (or without any hashtag entries) always
        // passes, whatever the configured maximum.
        let hashtags = response
            .tweet
            .entities
            .as_ref()
            .and_then(|entities| entities.hashtags.as_ref());
        let Some(hashtags) = hashtags else {
            return FilterOutcome::pass();
        };

        let hashtags_count = hashtags.len();
        let details = json!({
            "max_hashtags": self.max,
            "hashtags_count": hashtags_count,
        });
        if hashtags_count <= self.max {
            FilterOutcome::pass_with(details)
        } else {
            FilterOutcome::fail(details)
        }
    }
}

pub struct BannedTermsFilter;

/// Lowercase substrings that disqualify a tweet outright. Matching is
/// case-insensitive against the tweet text.
const BANNED_TERMS: &[&str] = &[
    "zoofilia",
    "zoophilia",
    "nsfw",
    "trump",
    "trending",
    "kpop",
    "animalporn",
    "furryporn",
    "furrysex",
    "animalsex",
    "animaldicks",
    "hitler",
    "furrydicks",
    "gayanimal",
    "fridayvibes",
    "blackoutbts",
    "yiff",
    "bdsm",
    "catsoftwitter",
    "fancam",
    "bolsonaro",
    "murrsuit",
    "bts",
    "porn",
    "obama",
    "biden",
    "beat a furry",
    "fridaythoughts",
    "fundy",
    "\u{1F51E}",
    "\u{1F346}",
    "\u{1F351}",
    "blood",
    "commission",
    "wip",
    "my fursuit",
    "anus",
    "fucking furries",
    "stupid",
    "fart",
    "pyro",
    "floppa",
    "monk",
    "kill furry",
    "crypto",
    "nft",
    "fuck me",
    "fuck you",
    "murr",
    "bitcoin",
    "giveaway",
    "limited time",
    "earn money",
    "investment",
    "lula",
    "no minors",
    "bussy",
];

impl Filter for BannedTermsFilter {
    fn name(&self) -> &'static str {
        "BannedTermsFilter"
    }

    fn check(&self, response: &StreamResponse) -> FilterOutcome {
        let text = response.tweet.text.to_lowercase();
        let banned_words: Vec<&str> = BANNED_TERMS
            .iter()
            .copied()
            .filter(|term| text.contains(term))
            .collect();

        let details = json!({ "banned_words": banned_words });
        if banned_words.is_empty() {
            FilterOutcome::pass_with(details)
        } else {
            FilterOutcome::fail(details)
        }
    }
}

/// The chain applied to tweets from unknown authors.
pub fn default_filters() -> Vec<Box<dyn Filter>> {
    vec![
        Box::new(BannedTermsFilter),
        Box::new(MinimumFollowersFilter::new(100)),
        Box::new(NsfwFilter),
        Box::new(MinimumAccountAgeFilter::new(30)),
        Box::new(MediaFilter),
        Box::new(MaximumHashtagsFilter::new(5)),
        Box::new(MaximumNewLinesFilter::new(10)),
        Box::new(FursuitFridayOnlyFilter::new()),
    ]
}

/// The relaxed chain for whitelisted authors: only content safety and the
/// media requirement still apply.
pub fn whitelist_filters() -> Vec<Box<dyn Filter>> {
    vec![Box::new(NsfwFilter), Box::new(MediaFilter)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::test_fixtures::sample_response;
    use crate::models::{Entities, Hashtag};

    #[test]
    fn test_minimum_followers_filter() {
        let mut response = sample_response();

        response.includes.users[0].public_metrics.followers_count = 650;
        let filter = MinimumFollowersFilter::new(400);
        let outcome = filter.check(&response);
        assert!(outcome.passed);
        assert_eq!(
            outcome.details,
            json!({"min_followers": 400, "followers_count": 650})
        );

        response.includes.users[0].public_metrics.followers_count = 450;
        let filter = MinimumFollowersFilter::new(500);
        let outcome = filter.check(&response);
        assert!(!outcome.passed);
        assert_eq!(
            outcome.details,
            json!({"min_followers": 500, "followers_count": 450})
        );
    }

    #[test]
    fn test_nsfw_filter() {
        let mut response = sample_response();

        response.tweet.possibly_sensitive = Some(false);
        assert!(NsfwFilter.check(&response).passed);

        response.tweet.possibly_sensitive = None;
        assert!(NsfwFilter.check(&response).passed);

        response.tweet.possibly_sensitive = Some(true);
        assert!(!NsfwFilter.check(&response).passed);
    }

    #[test]
    fn test_minimum_account_age_filter() {
        let mut response = sample_response();

        response.includes.users[0].created_at = Utc::now() - Duration::days(200);
        let filter = MinimumAccountAgeFilter::new(50);
        let outcome = filter.check(&response);
        assert!(outcome.passed);
        assert_eq!(outcome.details["min_days"], 50);

        response.includes.users[0].created_at = Utc::now() - Duration::days(5);
        let outcome = filter.check(&response);
        assert!(!outcome.passed);
        assert_eq!(outcome.details["min_days"], 50);
    }

    #[test]
    fn test_maximum_new_lines_filter() {
        let mut response = sample_response();
        let filter = MaximumNewLinesFilter::new(3);

        response.tweet.text = "line\nline2\nline3\nline4".to_string();
        let outcome = filter.check(&response);
        assert!(outcome.passed);
        assert_eq!(outcome.details, json!({"max_new_lines": 3, "new_lines": 3}));

        response.tweet.text = "line\nline2\nline3\nline4\nline5".to_string();
        let outcome = filter.check(&response);
        assert!(!outcome.passed);
        assert_eq!(outcome.details, json!({"max_new_lines": 3, "new_lines": 4}));
    }

    #[test]
    fn test_fursuit_friday_only_filter() {
        let mut response = sample_response();
        let filter = FursuitFridayOnlyFilter::new();

        response.tweet.text = "test".to_string();
        assert!(filter.check(&response).passed);

        response.tweet.text = "#FursuitFriday".to_string();
        assert!(!filter.check(&response).passed);

        response.tweet.text = "  #fursuitfriday  ".to_string();
        assert!(!filter.check(&response).passed);

        // The media link Twitter appends does not make the tweet count as
        // having real text.
        response.tweet.text = "#FursuitFriday https://t.co/34axngukSE".to_string();
        assert!(!filter.check(&response).passed);

        response.tweet.text = "#FursuitFriday extra words".to_string();
        assert!(filter.check(&response).passed);
    }

    #[test]
    fn test_media_filter() {
        let mut response = sample_response();

        assert!(MediaFilter.check(&response).passed);

        response.includes.media.clear();
        assert!(!MediaFilter.check(&response).passed);
    }

    #[test]
    fn test_maximum_hashtags_filter() {
        let mut response = sample_response();
        let filter = MaximumHashtagsFilter::new(2);

        // Fixture has url entities but no hashtags key: always keep.
        assert!(filter.check(&response).passed);

        response.tweet.entities = None;
        assert!(filter.check(&response).passed);

        let tags = |names: &[&str]| -> Option<Vec<Hashtag>> {
            Some(
                names
                    .iter()
                    .map(|name| Hashtag {
                        tag: name.to_string(),
                    })
                    .collect(),
            )
        };

        response.tweet.entities = Some(Entities {
            hashtags: tags(&["test1", "test2"]),
            urls: None,
        });
        let outcome = filter.check(&response);
        assert!(outcome.passed);
        assert_eq!(
            outcome.details,
            json!({"max_hashtags": 2, "hashtags_count": 2})
        );

        response.tweet.entities = Some(Entities {
            hashtags: tags(&["test1", "test2", "test3"]),
            urls: None,
        });
        let outcome = filter.check(&response);
        assert!(!outcome.passed);
        assert_eq!(
            outcome.details,
            json!({"max_hashtags": 2, "hashtags_count": 3})
        );
    }

    #[test]
    fn test_banned_terms_filter() {
        let mut response = sample_response();

        response.tweet.text = "Hello world!".to_string();
        let outcome = BannedTermsFilter.check(&response);
        assert!(outcome.passed);
        assert_eq!(outcome.details, json!({"banned_words": []}));

        response.tweet.text = "Hello world! What about Crypto?".to_string();
        let outcome = BannedTermsFilter.check(&response);
        assert!(!outcome.passed);
        assert_eq!(outcome.details, json!({"banned_words": ["crypto"]}));

        // Every matched term is reported, not just the first.
        response.tweet.text = "Here is some Crypto and NFT".to_string();
        let outcome = BannedTermsFilter.check(&response);
        assert!(!outcome.passed);
        let words: Vec<&str> = outcome.details["banned_words"]
            .as_array()
            .unwrap()
            .iter()
            .map(|word| word.as_str().unwrap())
            .collect();
        assert_eq!(words.len(), 2);
        assert!(words.contains(&"crypto"));
        assert!(words.contains(&"nft"));
    }

    #[test]
    fn test_default_chain_keeps_fixture_tweet() {
        let mut response = sample_response();
        assert!(response.process_filters(&default_filters()));
        assert!(response.failed_filters.is_empty());
    }

    #[test]
    fn test_default_chain_rejects_sensitive_tweet() {
        let mut response = sample_response();
        response.tweet.possibly_sensitive = Some(true);
        assert!(!response.process_filters(&default_filters()));
        assert_eq!(response.failed_filters.len(), 1);
        assert_eq!(response.failed_filters[0].filter_name, "NsfwFilter");
    }

    #[test]
    fn test_whitelist_chain_is_relaxed() {
        let mut response = sample_response();
        // Way below the default follower floor, but whitelisted authors skip
        // that check entirely.
        response.includes.users[0].public_metrics.followers_count = 1;
        assert!(response.process_filters(&whitelist_filters()));
    }
}
