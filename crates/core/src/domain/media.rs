use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaType {
    Song,
    Movie,
    Book,
    TvShow,
    VideoGame,
}

impl MediaType {
    pub const ALL: [MediaType; 5] = [
        MediaType::Song,
        MediaType::Movie,
        MediaType::Book,
        MediaType::TvShow,
        MediaType::VideoGame,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            MediaType::Song => "song",
            MediaType::Movie => "movie",
            MediaType::Book => "book",
            MediaType::TvShow => "tv_show",
            MediaType::VideoGame => "video_game",
        }
    }

    /// Human-readable noun used in prompts ("Suggested TV show: ...").
    pub fn label(self) -> &'static str {
        match self {
            MediaType::Song => "song",
            MediaType::Movie => "movie",
            MediaType::Book => "book",
            MediaType::TvShow => "TV show",
            MediaType::VideoGame => "video game",
        }
    }

    pub fn plural(self) -> &'static str {
        match self {
            MediaType::Song => "songs",
            MediaType::Movie => "movies",
            MediaType::Book => "books",
            MediaType::TvShow => "TV shows",
            MediaType::VideoGame => "video games",
        }
    }

    /// JSON key naming the creator field in this type's response schema.
    pub fn creator_field(self) -> &'static str {
        match self {
            MediaType::Song => "artist",
            MediaType::Movie => "director",
            MediaType::Book => "author",
            MediaType::TvShow => "creator",
            MediaType::VideoGame => "developer",
        }
    }

    pub fn creator_plural(self) -> &'static str {
        match self {
            MediaType::Song => "artists",
            MediaType::Movie => "directors",
            MediaType::Book => "authors",
            MediaType::TvShow => "showrunners",
            MediaType::VideoGame => "studios",
        }
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MediaType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "song" | "music" => Ok(MediaType::Song),
            "movie" | "film" => Ok(MediaType::Movie),
            "book" => Ok(MediaType::Book),
            "tv_show" | "tv" | "show" => Ok(MediaType::TvShow),
            "video_game" | "game" => Ok(MediaType::VideoGame),
            other => Err(format!("unknown media type: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Song {
    pub title: String,
    pub artist: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub genre: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Movie {
    pub title: String,
    pub director: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub genre: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Book {
    pub title: String,
    pub author: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub genre: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TvShow {
    pub title: String,
    pub creator: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub genre: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoGame {
    pub title: String,
    pub developer: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub genre: Option<String>,
}

/// One piece of media, either from the user's library or parsed out of a model reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "media_type", rename_all = "snake_case")]
pub enum MediaItem {
    Song(Song),
    Movie(Movie),
    Book(Book),
    TvShow(TvShow),
    VideoGame(VideoGame),
}

impl MediaItem {
    pub fn media_type(&self) -> MediaType {
        match self {
            MediaItem::Song(_) => MediaType::Song,
            MediaItem::Movie(_) => MediaType::Movie,
            MediaItem::Book(_) => MediaType::Book,
            MediaItem::TvShow(_) => MediaType::TvShow,
            MediaItem::VideoGame(_) => MediaType::VideoGame,
        }
    }

    pub fn title(&self) -> &str {
        match self {
            MediaItem::Song(s) => &s.title,
            MediaItem::Movie(m) => &m.title,
            MediaItem::Book(b) => &b.title,
            MediaItem::TvShow(t) => &t.title,
            MediaItem::VideoGame(g) => &g.title,
        }
    }

    pub fn creator(&self) -> &str {
        match self {
            MediaItem::Song(s) => &s.artist,
            MediaItem::Movie(m) => &m.director,
            MediaItem::Book(b) => &b.author,
            MediaItem::TvShow(t) => &t.creator,
            MediaItem::VideoGame(g) => &g.developer,
        }
    }

    pub fn genre(&self) -> Option<&str> {
        match self {
            MediaItem::Song(s) => s.genre.as_deref(),
            MediaItem::Movie(m) => m.genre.as_deref(),
            MediaItem::Book(b) => b.genre.as_deref(),
            MediaItem::TvShow(t) => t.genre.as_deref(),
            MediaItem::VideoGame(g) => g.genre.as_deref(),
        }
    }

    /// Case-normalized title; the identity used for duplicate detection and feedback lookup.
    pub fn title_key(&self) -> String {
        normalize_title(self.title())
    }

    /// Compact `Title - Creator` form used in the favorites baseline.
    pub fn baseline_line(&self) -> String {
        format!("{} - {}", self.title().trim(), self.creator().trim())
    }

    /// Prose description used when replaying history to the model.
    pub fn describe(&self) -> String {
        let base = match self {
            MediaItem::Song(s) => format!("\"{}\" by {}", s.title, s.artist),
            MediaItem::Movie(m) => format!("{} directed by {}", m.title, m.director),
            MediaItem::Book(b) => format!("{} by {}", b.title, b.author),
            MediaItem::TvShow(t) => format!("{} created by {}", t.title, t.creator),
            MediaItem::VideoGame(g) => format!("{} developed by {}", g.title, g.developer),
        };
        match self.genre().map(str::trim).filter(|g| !g.is_empty()) {
            Some(genre) => format!("{base} ({genre})"),
            None => base,
        }
    }

    /// Trims every field; blank optional genres collapse to `None`.
    pub(crate) fn normalized(self) -> Self {
        fn genre(g: Option<String>) -> Option<String> {
            g.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
        }
        match self {
            MediaItem::Song(s) => MediaItem::Song(Song {
                title: s.title.trim().to_string(),
                artist: s.artist.trim().to_string(),
                genre: genre(s.genre),
            }),
            MediaItem::Movie(m) => MediaItem::Movie(Movie {
                title: m.title.trim().to_string(),
                director: m.director.trim().to_string(),
                genre: genre(m.genre),
            }),
            MediaItem::Book(b) => MediaItem::Book(Book {
                title: b.title.trim().to_string(),
                author: b.author.trim().to_string(),
                genre: genre(b.genre),
            }),
            MediaItem::TvShow(t) => MediaItem::TvShow(TvShow {
                title: t.title.trim().to_string(),
                creator: t.creator.trim().to_string(),
                genre: genre(t.genre),
            }),
            MediaItem::VideoGame(g) => MediaItem::VideoGame(VideoGame {
                title: g.title.trim().to_string(),
                developer: g.developer.trim().to_string(),
                genre: genre(g.genre),
            }),
        }
    }
}

pub fn normalize_title(title: &str) -> String {
    title
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}
