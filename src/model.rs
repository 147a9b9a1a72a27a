//! Decoded tweet records. One JSONL line decodes into a [`Post`]; quoted and
//! retweeted posts embed a full `Post` again.
//!
//! Only recognized fields are kept, extra fields are ignored by serde. Text and
//! counter fields tolerate `null` and fall back to their defaults.

use serde::{Deserialize, Deserializer};

fn nullable<'de, D, T>(d: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(d)?.unwrap_or_default())
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Post {
    pub id: i64,
    #[serde(default, deserialize_with = "nullable")]
    pub text: String,
    /// Present on extended-mode payloads; preferred over `text` when set.
    #[serde(default)]
    pub full_text: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    pub source: String,
    #[serde(default)]
    pub in_reply_to_status_id: Option<i64>,
    #[serde(default)]
    pub quoted_status_id: Option<i64>,
    #[serde(default, deserialize_with = "nullable")]
    pub retweet_count: i64,
    #[serde(default, deserialize_with = "nullable")]
    pub favorite_count: i64,
    #[serde(default, deserialize_with = "nullable")]
    pub created_at: String,
    #[serde(default, deserialize_with = "nullable")]
    pub lang: String,
    #[serde(default)]
    pub possibly_sensitive: Option<bool>,
    #[serde(default)]
    pub display_text_range: Option<(i64, i64)>,
    #[serde(default)]
    pub user: Option<Account>,
    #[serde(default)]
    pub place: Option<Place>,
    #[serde(default)]
    pub entities: Option<Entities>,
    #[serde(default)]
    pub quoted_status: Option<Box<Post>>,
    #[serde(default)]
    pub retweeted_status: Option<Box<Post>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Account {
    pub id: i64,
    #[serde(default, deserialize_with = "nullable")]
    pub name: String,
    #[serde(default, deserialize_with = "nullable")]
    pub screen_name: String,
    #[serde(default, deserialize_with = "nullable")]
    pub location: String,
    #[serde(default, deserialize_with = "nullable")]
    pub url: String,
    #[serde(default, deserialize_with = "nullable")]
    pub description: String,
    #[serde(default)]
    pub protected: Option<bool>,
    #[serde(default)]
    pub verified: Option<bool>,
    #[serde(default, deserialize_with = "nullable")]
    pub followers_count: i64,
    #[serde(default, deserialize_with = "nullable")]
    pub friends_count: i64,
    #[serde(default, deserialize_with = "nullable")]
    pub listed_count: i64,
    #[serde(default, deserialize_with = "nullable")]
    pub favourites_count: i64,
    #[serde(default, deserialize_with = "nullable")]
    pub statuses_count: i64,
    #[serde(default)]
    pub created_at: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Place {
    #[serde(default, deserialize_with = "nullable")]
    pub id: String,
    #[serde(default, deserialize_with = "nullable")]
    pub place_type: String,
    #[serde(default, deserialize_with = "nullable")]
    pub full_name: String,
    #[serde(default, deserialize_with = "nullable")]
    pub country_code: String,
    #[serde(default, deserialize_with = "nullable")]
    pub country: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Entities {
    #[serde(default, deserialize_with = "nullable")]
    pub hashtags: Vec<Hashtag>,
    #[serde(default, deserialize_with = "nullable")]
    pub user_mentions: Vec<UserMention>,
    #[serde(default, deserialize_with = "nullable")]
    pub urls: Vec<Url>,
    #[serde(default, deserialize_with = "nullable")]
    pub media: Vec<Media>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Hashtag {
    #[serde(default, deserialize_with = "nullable")]
    pub text: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UnwoundUrl {
    #[serde(default, deserialize_with = "nullable")]
    pub url: String,
    #[serde(default)]
    pub status: Option<i64>,
    #[serde(default, deserialize_with = "nullable")]
    pub title: String,
    #[serde(default, deserialize_with = "nullable")]
    pub description: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Url {
    #[serde(default, deserialize_with = "nullable")]
    pub url: String,
    #[serde(default, deserialize_with = "nullable")]
    pub expanded_url: String,
    #[serde(default, deserialize_with = "nullable")]
    pub display_url: String,
    #[serde(default)]
    pub unwound_url: Option<UnwoundUrl>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Media {
    pub id: i64,
    #[serde(default, deserialize_with = "nullable")]
    pub display_url: String,
    #[serde(default, deserialize_with = "nullable")]
    pub expanded_url: String,
    #[serde(default, deserialize_with = "nullable")]
    pub media_url: String,
    #[serde(default, deserialize_with = "nullable")]
    pub media_url_https: String,
    #[serde(rename = "type", default, deserialize_with = "nullable")]
    pub kind: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserMention {
    /// Id of the mentioned account.
    pub id: i64,
    #[serde(default, deserialize_with = "nullable")]
    pub screen_name: String,
    #[serde(default, deserialize_with = "nullable")]
    pub name: String,
}
