//! Entity structs persisted by the storage core.
//!
//! Every struct here is plain data: it says nothing about which store it
//! was read from. The same row shape exists in the primary and the replica
//! so the full resync can copy rows verbatim.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::enums::VoteKind;
use crate::ids::{LikedSongId, PlaylistId, PlaylistTrackId, VoteId};

// ---------------------------------------------------------------------------
// Guild configuration
// ---------------------------------------------------------------------------

/// Per-guild configuration row. One row per guild, created lazily by the
/// first write that touches the guild.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuildConfig {
    /// Discord guild snowflake.
    pub guild_id: String,
    /// Locale override; `None` means the bot default.
    pub locale: Option<String>,
    /// Command prefix override; `None` means the bot default.
    pub prefix: Option<String>,
    /// Default playback volume (0-200); `None` means the bot default.
    pub default_volume: Option<u8>,
    /// Whether 24/7 mode keeps the player connected when the queue empties.
    pub enabled_247: bool,
    /// Voice channel the player rejoins in 24/7 mode.
    pub channel_247_id: Option<String>,
    /// Text channel used for 24/7 mode announcements.
    pub text_247_id: Option<String>,
    /// Channel hosting the persistent setup (song request) message.
    pub setup_channel_id: Option<String>,
    /// The persistent setup message itself.
    pub setup_message_id: Option<String>,
    /// Whether the voice channel status is updated with the current track.
    pub voice_status_enabled: bool,
    /// When the row was first written.
    pub created_at: DateTime<Utc>,
    /// When the row was last written.
    pub updated_at: DateTime<Utc>,
}

impl GuildConfig {
    /// A fresh row with every override unset.
    pub fn new(guild_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            guild_id: guild_id.to_owned(),
            locale: None,
            prefix: None,
            default_volume: None,
            enabled_247: false,
            channel_247_id: None,
            text_247_id: None,
            setup_channel_id: None,
            setup_message_id: None,
            voice_status_enabled: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// The setup descriptor, present only when both ids are stored.
    pub fn setup(&self) -> Option<SetupDescriptor> {
        match (&self.setup_channel_id, &self.setup_message_id) {
            (Some(channel_id), Some(message_id)) => Some(SetupDescriptor {
                channel_id: channel_id.clone(),
                message_id: message_id.clone(),
            }),
            _ => None,
        }
    }

    /// The 24/7 mode settings of this guild.
    pub fn mode_247(&self) -> Mode247 {
        Mode247 {
            enabled: self.enabled_247,
            voice_channel_id: self.channel_247_id.clone(),
            text_channel_id: self.text_247_id.clone(),
        }
    }
}

/// Location of a guild's persistent setup message.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SetupDescriptor {
    /// Channel hosting the message.
    pub channel_id: String,
    /// The message id.
    pub message_id: String,
}

/// 24/7 mode settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mode247 {
    /// Whether 24/7 mode is on.
    pub enabled: bool,
    /// Voice channel to stay connected to.
    pub voice_channel_id: Option<String>,
    /// Text channel for announcements.
    pub text_channel_id: Option<String>,
}

// ---------------------------------------------------------------------------
// Votes and premium
// ---------------------------------------------------------------------------

/// A vote or premium grant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserVote {
    /// Row id.
    pub id: VoteId,
    /// Discord user snowflake.
    pub user_id: String,
    /// Whether this is a bot-list vote or a premium grant.
    pub kind: VoteKind,
    /// When the vote (or grant) was first recorded.
    pub voted_at: DateTime<Utc>,
    /// When the benefit lapses.
    pub expires_at: DateTime<Utc>,
}

impl UserVote {
    /// Whether the row still grants premium at `now`.
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}

/// Active premium sources of a user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PremiumStatus {
    /// The active bot-list vote, if any.
    pub vote: Option<UserVote>,
    /// The active premium grant, if any.
    pub regular: Option<UserVote>,
}

impl PremiumStatus {
    /// Build the status from a user's vote rows, ignoring expired rows.
    ///
    /// When several active rows of one kind exist (only possible for rows
    /// written before duplicate votes were folded), the one expiring last
    /// wins.
    pub fn from_votes<'a, I>(votes: I, now: DateTime<Utc>) -> Self
    where
        I: IntoIterator<Item = &'a UserVote>,
    {
        let mut status = Self::default();
        for vote in votes.into_iter().filter(|v| v.is_active(now)) {
            let slot = match vote.kind {
                VoteKind::Vote => &mut status.vote,
                VoteKind::Regular => &mut status.regular,
            };
            if slot.as_ref().is_none_or(|held| held.expires_at < vote.expires_at) {
                *slot = Some(vote.clone());
            }
        }
        status
    }

    /// Whether any premium source is active.
    pub const fn is_active(&self) -> bool {
        self.vote.is_some() || self.regular.is_some()
    }
}

// ---------------------------------------------------------------------------
// Playlists
// ---------------------------------------------------------------------------

/// A user playlist, always loaded with its full ordered track list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Playlist {
    /// Playlist id.
    pub id: PlaylistId,
    /// Owner snowflake.
    pub user_id: String,
    /// Name, unique per owner.
    pub name: String,
    /// When the playlist was created.
    pub created_at: DateTime<Utc>,
    /// Tracks in playback order.
    pub tracks: Vec<PlaylistTrack>,
}

/// One track entry of a playlist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaylistTrack {
    /// Entry id (distinct per entry even when the same url repeats).
    pub id: PlaylistTrackId,
    /// Owning playlist; entries are deleted with it.
    pub playlist_id: PlaylistId,
    /// Zero-based position; entries are append-only so positions only grow.
    pub position: u32,
    /// Playable url.
    pub url: String,
    /// Serialized track metadata as returned by the audio node.
    pub info: serde_json::Value,
}

/// A track to append to a playlist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTrack {
    /// Playable url.
    pub url: String,
    /// Serialized track metadata; `null` when unknown.
    #[serde(default)]
    pub info: serde_json::Value,
}

impl NewTrack {
    /// A track with no metadata.
    pub fn from_url(url: &str) -> Self {
        Self {
            url: url.to_owned(),
            info: serde_json::Value::Null,
        }
    }
}

// ---------------------------------------------------------------------------
// Liked songs
// ---------------------------------------------------------------------------

/// A song a user marked as liked. Unique per `(user_id, url)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LikedSong {
    /// Row id.
    pub id: LikedSongId,
    /// Discord user snowflake.
    pub user_id: String,
    /// Playable url.
    pub url: String,
    /// Track title.
    pub title: String,
    /// Track author.
    pub author: String,
    /// When the song was liked.
    pub liked_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Playback statistics
// ---------------------------------------------------------------------------

/// Identity and display metadata of a played track.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackPlay {
    /// Stable track identifier from the audio node.
    pub track_id: String,
    /// Track title.
    pub title: String,
    /// Track author.
    pub author: String,
    /// Source uri.
    pub uri: String,
}

/// Play counter for a track within a guild.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackStats {
    /// Stable track identifier.
    pub track_id: String,
    /// Guild the plays happened in.
    pub guild_id: String,
    /// Track title at the last play.
    pub title: String,
    /// Track author at the last play.
    pub author: String,
    /// Source uri at the last play.
    pub uri: String,
    /// Plays inside the rolling window.
    pub play_count: u64,
    /// Last play time.
    pub last_played: DateTime<Utc>,
}

/// Play counter for a user within a guild.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserStats {
    /// Discord user snowflake.
    pub user_id: String,
    /// Guild the plays happened in.
    pub guild_id: String,
    /// Plays requested inside the rolling window.
    pub play_count: u64,
    /// Last play time.
    pub last_played: DateTime<Utc>,
}

/// Total plays of a guild, aggregated from [`TrackStats`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuildPlays {
    /// Discord guild snowflake.
    pub guild_id: String,
    /// Sum of track play counts.
    pub play_count: u64,
}

#[cfg(test)]
#[allow(clippy::arithmetic_side_effects)]
mod tests {
    use chrono::Duration;

    use super::*;

    fn vote(kind: VoteKind, expires_in: Duration) -> UserVote {
        let now = Utc::now();
        UserVote {
            id: VoteId::new(),
            user_id: "u1".to_owned(),
            kind,
            voted_at: now,
            expires_at: now + expires_in,
        }
    }

    #[test]
    fn setup_requires_both_ids() {
        let mut config = GuildConfig::new("42", Utc::now());
        config.setup_channel_id = Some("c".to_owned());
        assert_eq!(config.setup(), None);

        config.setup_message_id = Some("m".to_owned());
        assert_eq!(
            config.setup(),
            Some(SetupDescriptor {
                channel_id: "c".to_owned(),
                message_id: "m".to_owned(),
            })
        );
    }

    #[test]
    fn premium_ignores_expired_rows() {
        let rows = vec![
            vote(VoteKind::Vote, Duration::hours(-1)),
            vote(VoteKind::Regular, Duration::days(3)),
        ];
        let status = PremiumStatus::from_votes(&rows, Utc::now());
        assert!(status.vote.is_none());
        assert!(status.regular.is_some());
        assert!(status.is_active());
    }

    #[test]
    fn premium_keeps_latest_expiry_per_kind() {
        let short = vote(VoteKind::Vote, Duration::hours(1));
        let long = vote(VoteKind::Vote, Duration::hours(5));
        let status = PremiumStatus::from_votes([&short, &long], Utc::now());
        assert_eq!(status.vote.map(|v| v.id), Some(long.id));
    }

    #[test]
    fn empty_premium_is_inactive() {
        assert!(!PremiumStatus::default().is_active());
    }

    #[test]
    fn new_track_defaults_info_to_null() {
        let track: Result<NewTrack, _> = serde_json::from_str(r#"{"url":"a"}"#);
        assert_eq!(track.ok(), Some(NewTrack::from_url("a")));
    }
}
