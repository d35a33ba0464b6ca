use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

pub type Metadata = BTreeMap<String, String>;

/// A signed-in identity, normalized across backends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: String,
    #[serde(default)]
    pub metadata: Metadata,
}

/// Demo-store user row. Keyed by email in the users map.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalUser {
    pub id: String,
    pub email: String,
    pub password_hash: String,
    #[serde(default)]
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
}

impl LocalUser {
    pub fn to_user(&self) -> User {
        User {
            id: self.id.clone(),
            email: self.email.clone(),
            metadata: self.metadata.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "de_opt_id")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl Profile {
    /// Key used by the demo store: id when known, email otherwise.
    pub fn key(&self) -> Option<&str> {
        self.id
            .as_deref()
            .or(self.email.as_deref())
            .filter(|k| !k.is_empty())
    }
}

/// Profile fields captured on the sign-up form.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProfileDraft {
    pub first_name: String,
    pub last_name: String,
    pub username: String,
    pub email: String,
}

impl ProfileDraft {
    pub fn metadata(&self) -> Metadata {
        let mut meta = Metadata::new();
        for (key, value) in [
            ("first_name", &self.first_name),
            ("last_name", &self.last_name),
            ("username", &self.username),
        ] {
            if !value.trim().is_empty() {
                meta.insert(key.to_string(), value.trim().to_string());
            }
        }
        meta
    }

    pub fn into_profile(self, id: &str) -> Profile {
        let metadata = serde_json::to_value(&self).unwrap_or(serde_json::Value::Null);
        let non_empty = |s: String| {
            let s = s.trim().to_string();
            (!s.is_empty()).then_some(s)
        };
        Profile {
            id: Some(id.to_string()),
            first_name: non_empty(self.first_name),
            last_name: non_empty(self.last_name),
            username: non_empty(self.username),
            email: non_empty(self.email),
            metadata,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    Game,
    Video,
    Story,
}

impl ContentKind {
    pub const ALL: [ContentKind; 3] = [ContentKind::Game, ContentKind::Video, ContentKind::Story];

    pub fn as_str(&self) -> &'static str {
        match self {
            ContentKind::Game => "game",
            ContentKind::Video => "video",
            ContentKind::Story => "story",
        }
    }

    /// Remote table name.
    pub fn table(&self) -> &'static str {
        match self {
            ContentKind::Game => "games",
            ContentKind::Video => "videos",
            ContentKind::Story => "stories",
        }
    }

    /// Demo-store key for admin-staged items.
    pub fn staging_key(&self) -> &'static str {
        match self {
            ContentKind::Game => "khyati_games_admin",
            ContentKind::Video => "khyati_videos_admin",
            ContentKind::Story => "khyati_stories_admin",
        }
    }
}

impl fmt::Display for ContentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContentKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "game" | "games" => Ok(ContentKind::Game),
            "video" | "videos" => Ok(ContentKind::Video),
            "story" | "stories" => Ok(ContentKind::Story),
            other => Err(format!("unknown content type: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    #[serde(default, deserialize_with = "de_opt_id")]
    pub id: Option<String>,
    pub user_id: String,
    pub content_type: ContentKind,
    pub content_id: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_email: Option<String>,
}

/// Row shape sent to the remote `comments` table.
#[derive(Debug, Clone, Serialize)]
pub struct NewComment<'a> {
    pub user_id: &'a str,
    pub content_type: ContentKind,
    pub content_id: &'a str,
    pub body: &'a str,
}

/// Trailing path segments shared by every embed URL of a host.
const GENERIC_SEGMENTS: &[&str] = &["embed", "player", "play", "fullscreen"];

/// Game, video or story. Which optional fields are set depends on the kind.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContentItem {
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "de_opt_id")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embed: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub src: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slug: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub excerpt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl ContentItem {
    /// Player source: embed URL first, then raw src.
    pub fn source(&self) -> Option<&str> {
        self.embed
            .as_deref()
            .or(self.src.as_deref())
            .filter(|s| !s.is_empty())
    }

    /// Identifier used to attach comments: row id, story slug, or the last
    /// meaningful path segment of the player source.
    pub fn content_id(&self) -> Option<String> {
        if let Some(id) = self.id.as_deref().filter(|s| !s.is_empty()) {
            return Some(id.to_string());
        }
        if let Some(slug) = self.slug.as_deref().filter(|s| !s.is_empty()) {
            return Some(slug.to_string());
        }
        let path = self.source()?.split(['?', '#']).next()?;
        path.rsplit('/')
            .find(|s| !s.is_empty() && !GENERIC_SEGMENTS.contains(s))
            .filter(|s| !s.contains(':'))
            .map(str::to_string)
    }
}

/// Row ids arrive as strings (uuid) or numbers (bigserial) from the remote
/// tables; both become strings.
fn de_opt_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) => Some(s),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_row_ids_become_strings() {
        let item: ContentItem =
            serde_json::from_str(r#"{"id": 42, "title": "Maze", "embed": "https://x/y/1234"}"#)
                .unwrap();
        assert_eq!(item.id.as_deref(), Some("42"));
        assert_eq!(item.content_id().as_deref(), Some("42"));
    }

    #[test]
    fn content_id_falls_back_to_source_segment() {
        let item = ContentItem {
            embed: Some("https://scratch.mit.edu/projects/1234/embed/".into()),
            ..Default::default()
        };
        assert_eq!(item.content_id().as_deref(), Some("1234"));

        let item = ContentItem {
            src: Some("https://example.com/games/778?autoplay=1".into()),
            ..Default::default()
        };
        assert_eq!(item.content_id().as_deref(), Some("778"));
    }

    #[test]
    fn embeds_on_one_host_get_distinct_ids() {
        let ids: Vec<Option<String>> = ["111", "222"]
            .iter()
            .map(|n| ContentItem {
                embed: Some(format!("https://scratch.mit.edu/projects/{}/embed", n)),
                ..Default::default()
            })
            .map(|item| item.content_id())
            .collect();
        assert_eq!(ids, [Some("111".to_string()), Some("222".to_string())]);
    }

    #[test]
    fn content_kind_parses_singular_and_plural() {
        assert_eq!("games".parse::<ContentKind>().unwrap(), ContentKind::Game);
        assert_eq!("story".parse::<ContentKind>().unwrap(), ContentKind::Story);
        assert!("podcast".parse::<ContentKind>().is_err());
    }

    #[test]
    fn draft_metadata_skips_blank_fields() {
        let draft = ProfileDraft {
            first_name: " Asha ".into(),
            last_name: String::new(),
            username: "asha".into(),
            email: "a@x.com".into(),
        };
        let meta = draft.metadata();
        assert_eq!(meta.get("first_name").map(String::as_str), Some("Asha"));
        assert!(!meta.contains_key("last_name"));

        let profile = draft.into_profile("u-1");
        assert_eq!(profile.key(), Some("u-1"));
        assert_eq!(profile.first_name.as_deref(), Some("Asha"));
        assert!(profile.last_name.is_none());
    }
}
