//! In-memory [`Store`] implementation.
//!
//! Holds every table in process memory behind one mutex and mirrors the
//! SQL store's semantics (upserts, vote extension, conflict outcomes,
//! stats eviction, ordering). Availability and latency can be switched at
//! runtime, which makes it the store of choice for exercising fallback and
//! background replay without a network database.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use cadence_types::{
    GuildConfig, GuildPlays, LikedSong, NewTrack, Playlist, PlaylistId, PlaylistTrack,
    PlaylistTrackId, TrackPlay, TrackStats, UserStats, UserVote,
};
use chrono::{DateTime, Utc};

use crate::error::DbError;
use crate::store::{
    GuildUpdate, PlaylistRow, Record, Store, Table, WriteOutcome, check_vote_times,
};

#[derive(Debug, Clone, Default)]
struct Tables {
    guilds: BTreeMap<String, GuildConfig>,
    votes: Vec<UserVote>,
    playlists: BTreeMap<PlaylistId, PlaylistRow>,
    tracks: Vec<PlaylistTrack>,
    liked: Vec<LikedSong>,
    /// Keyed by `(guild_id, track_id)`.
    track_stats: BTreeMap<(String, String), TrackStats>,
    /// Keyed by `(guild_id, user_id)`.
    user_stats: BTreeMap<(String, String), UserStats>,
}

impl Tables {
    fn playlist(&self, id: PlaylistId) -> Option<Playlist> {
        let row = self.playlists.get(&id)?;
        let mut tracks: Vec<PlaylistTrack> = self
            .tracks
            .iter()
            .filter(|t| t.playlist_id == id)
            .cloned()
            .collect();
        tracks.sort_by_key(|t| t.position);
        Some(row.clone().with_tracks(tracks))
    }

    fn insert(&mut self, record: &Record) -> Result<(), DbError> {
        let duplicate = |what: &str| DbError::InvalidRecord(format!("duplicate {what} key"));
        match record {
            Record::Guild(guild) => {
                if self.guilds.contains_key(&guild.guild_id) {
                    return Err(duplicate("guilds"));
                }
                self.guilds.insert(guild.guild_id.clone(), guild.clone());
            }
            Record::Vote(vote) => {
                check_vote_times(vote)?;
                if self.votes.iter().any(|v| v.id == vote.id) {
                    return Err(duplicate("user_votes"));
                }
                self.votes.push(vote.clone());
            }
            Record::Playlist(row) => {
                if self.playlists.contains_key(&row.id)
                    || self
                        .playlists
                        .values()
                        .any(|p| p.user_id == row.user_id && p.name == row.name)
                {
                    return Err(duplicate("playlists"));
                }
                self.playlists.insert(row.id, row.clone());
            }
            Record::PlaylistTrack(track) => {
                if self.tracks.iter().any(|t| t.id == track.id) {
                    return Err(duplicate("playlist_tracks"));
                }
                self.tracks.push(track.clone());
            }
            Record::LikedSong(song) => {
                if self
                    .liked
                    .iter()
                    .any(|s| s.id == song.id || (s.user_id == song.user_id && s.url == song.url))
                {
                    return Err(duplicate("liked_songs"));
                }
                self.liked.push(song.clone());
            }
            Record::TrackStats(stats) => {
                let key = (stats.guild_id.clone(), stats.track_id.clone());
                if self.track_stats.contains_key(&key) {
                    return Err(duplicate("track_stats"));
                }
                self.track_stats.insert(key, stats.clone());
            }
            Record::UserStats(stats) => {
                let key = (stats.guild_id.clone(), stats.user_id.clone());
                if self.user_stats.contains_key(&key) {
                    return Err(duplicate("user_stats"));
                }
                self.user_stats.insert(key, stats.clone());
            }
        }
        Ok(())
    }
}

/// Store that keeps all rows in memory.
///
/// Clones share state, so a test can keep one handle to flip availability
/// while the storage facade owns another.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    name: Arc<str>,
    tables: Arc<Mutex<Tables>>,
    available: Arc<AtomicBool>,
    latency_ms: Arc<AtomicU64>,
    calls: Arc<AtomicU64>,
}

impl MemoryStore {
    /// Create an empty, available store with no added latency.
    pub fn new(name: &str) -> Self {
        Self {
            name: Arc::from(name),
            tables: Arc::new(Mutex::new(Tables::default())),
            available: Arc::new(AtomicBool::new(true)),
            latency_ms: Arc::new(AtomicU64::new(0)),
            calls: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Make every subsequent call succeed (`true`) or fail with
    /// [`DbError::Unavailable`] (`false`).
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Whether calls currently succeed.
    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    /// Delay every subsequent call by `latency` before it runs.
    pub fn set_latency(&self, latency: Duration) {
        let millis = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);
        self.latency_ms.store(millis, Ordering::SeqCst);
    }

    /// Number of calls that reached this store, failed ones included.
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    async fn gate(&self) -> Result<(), DbError> {
        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.is_available() {
            Ok(())
        } else {
            Err(DbError::Unavailable(self.name.to_string()))
        }
    }

    fn with_tables<T>(&self, f: impl FnOnce(&mut Tables) -> Result<T, DbError>) -> Result<T, DbError> {
        let Ok(mut tables) = self.tables.lock() else {
            return Err(DbError::Unavailable(format!("{} (poisoned)", self.name)));
        };
        f(&mut tables)
    }
}

impl Store for MemoryStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn migrate(&self) -> Result<(), DbError> {
        self.gate().await
    }

    async fn ping(&self) -> Result<(), DbError> {
        self.gate().await
    }

    async fn close(&self) {}

    async fn get_guild(&self, guild_id: &str) -> Result<Option<GuildConfig>, DbError> {
        self.gate().await?;
        self.with_tables(|t| Ok(t.guilds.get(guild_id).cloned()))
    }

    async fn update_guild(
        &self,
        guild_id: &str,
        update: &GuildUpdate,
        now: DateTime<Utc>,
    ) -> Result<GuildConfig, DbError> {
        self.gate().await?;
        self.with_tables(|t| {
            let config = t
                .guilds
                .entry(guild_id.to_owned())
                .or_insert_with(|| GuildConfig::new(guild_id, now));
            update.apply(config);
            config.updated_at = now;
            Ok(config.clone())
        })
    }

    async fn backfill_guild(
        &self,
        row: &GuildConfig,
        if_updated_at: Option<DateTime<Utc>>,
    ) -> Result<bool, DbError> {
        self.gate().await?;
        self.with_tables(|t| {
            let Some(updated_at) = if_updated_at else {
                if t.guilds.contains_key(&row.guild_id) {
                    return Ok(false);
                }
                t.guilds.insert(row.guild_id.clone(), row.clone());
                return Ok(true);
            };

            let Some(stored) = t
                .guilds
                .get_mut(&row.guild_id)
                .filter(|g| g.updated_at == updated_at)
            else {
                return Ok(false);
            };
            if stored.locale.is_none() {
                stored.locale.clone_from(&row.locale);
            }
            if stored.prefix.is_none() {
                stored.prefix.clone_from(&row.prefix);
            }
            if stored.default_volume.is_none() {
                stored.default_volume = row.default_volume;
            }
            if stored.setup_channel_id.is_none() && stored.setup_message_id.is_none() {
                stored.setup_channel_id.clone_from(&row.setup_channel_id);
                stored.setup_message_id.clone_from(&row.setup_message_id);
            }
            stored.enabled_247 = row.enabled_247;
            stored.channel_247_id.clone_from(&row.channel_247_id);
            stored.text_247_id.clone_from(&row.text_247_id);
            stored.voice_status_enabled = row.voice_status_enabled;
            stored.created_at = row.created_at;
            Ok(true)
        })
    }

    async fn delete_guild(&self, guild_id: &str) -> Result<bool, DbError> {
        self.gate().await?;
        self.with_tables(|t| Ok(t.guilds.remove(guild_id).is_some()))
    }

    async fn add_vote(&self, vote: &UserVote) -> Result<UserVote, DbError> {
        self.gate().await?;
        check_vote_times(vote)?;
        self.with_tables(|t| {
            let active = t.votes.iter_mut().find(|v| {
                v.user_id == vote.user_id && v.kind == vote.kind && v.expires_at > vote.voted_at
            });
            if let Some(existing) = active {
                if existing.expires_at < vote.expires_at {
                    existing.expires_at = vote.expires_at;
                }
                return Ok(existing.clone());
            }
            t.votes.push(vote.clone());
            Ok(vote.clone())
        })
    }

    async fn active_votes(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<UserVote>, DbError> {
        self.gate().await?;
        self.with_tables(|t| {
            let mut votes: Vec<UserVote> = t
                .votes
                .iter()
                .filter(|v| v.user_id == user_id && v.is_active(now))
                .cloned()
                .collect();
            votes.sort_by(|a, b| b.expires_at.cmp(&a.expires_at));
            Ok(votes)
        })
    }

    async fn playlists_for_user(&self, user_id: &str) -> Result<Vec<Playlist>, DbError> {
        self.gate().await?;
        self.with_tables(|t| {
            let mut rows: Vec<&PlaylistRow> =
                t.playlists.values().filter(|p| p.user_id == user_id).collect();
            rows.sort_by(|a, b| (a.created_at, a.id).cmp(&(b.created_at, b.id)));
            Ok(rows.into_iter().filter_map(|row| t.playlist(row.id)).collect())
        })
    }

    async fn playlist_by_id(&self, id: PlaylistId) -> Result<Option<Playlist>, DbError> {
        self.gate().await?;
        self.with_tables(|t| Ok(t.playlist(id)))
    }

    async fn create_playlist(&self, row: &PlaylistRow) -> Result<WriteOutcome<Playlist>, DbError> {
        self.gate().await?;
        self.with_tables(|t| {
            if t.playlists
                .values()
                .any(|p| p.user_id == row.user_id && p.name == row.name)
            {
                return Ok(WriteOutcome::Conflict);
            }
            t.playlists.insert(row.id, row.clone());
            Ok(WriteOutcome::Written(row.clone().with_tracks(Vec::new())))
        })
    }

    async fn add_tracks(
        &self,
        id: PlaylistId,
        tracks: &[NewTrack],
    ) -> Result<Option<Playlist>, DbError> {
        self.gate().await?;
        self.with_tables(|t| {
            if !t.playlists.contains_key(&id) {
                return Ok(None);
            }
            let mut next = t
                .tracks
                .iter()
                .filter(|track| track.playlist_id == id)
                .map(|track| track.position.saturating_add(1))
                .max()
                .unwrap_or(0);
            for track in tracks {
                t.tracks.push(PlaylistTrack {
                    id: PlaylistTrackId::new(),
                    playlist_id: id,
                    position: next,
                    url: track.url.clone(),
                    info: track.info.clone(),
                });
                next = next.saturating_add(1);
            }
            Ok(t.playlist(id))
        })
    }

    async fn remove_track(&self, id: PlaylistId, track_id: PlaylistTrackId) -> Result<bool, DbError> {
        self.gate().await?;
        self.with_tables(|t| {
            let before = t.tracks.len();
            t.tracks
                .retain(|track| !(track.id == track_id && track.playlist_id == id));
            Ok(t.tracks.len() < before)
        })
    }

    async fn delete_playlist(&self, id: PlaylistId) -> Result<bool, DbError> {
        self.gate().await?;
        self.with_tables(|t| {
            t.tracks.retain(|track| track.playlist_id != id);
            Ok(t.playlists.remove(&id).is_some())
        })
    }

    async fn like_song(&self, song: &LikedSong) -> Result<WriteOutcome<LikedSong>, DbError> {
        self.gate().await?;
        self.with_tables(|t| {
            if t.liked
                .iter()
                .any(|s| s.user_id == song.user_id && s.url == song.url)
            {
                return Ok(WriteOutcome::Conflict);
            }
            t.liked.push(song.clone());
            Ok(WriteOutcome::Written(song.clone()))
        })
    }

    async fn unlike_song(&self, user_id: &str, url: &str) -> Result<bool, DbError> {
        self.gate().await?;
        self.with_tables(|t| {
            let before = t.liked.len();
            t.liked.retain(|s| !(s.user_id == user_id && s.url == url));
            Ok(t.liked.len() < before)
        })
    }

    async fn liked_songs(&self, user_id: &str) -> Result<Vec<LikedSong>, DbError> {
        self.gate().await?;
        self.with_tables(|t| {
            let mut songs: Vec<LikedSong> = t
                .liked
                .iter()
                .filter(|s| s.user_id == user_id)
                .cloned()
                .collect();
            songs.sort_by(|a, b| b.liked_at.cmp(&a.liked_at).then(a.id.cmp(&b.id)));
            Ok(songs)
        })
    }

    async fn record_track_play(
        &self,
        guild_id: &str,
        play: &TrackPlay,
        now: DateTime<Utc>,
        cutoff: DateTime<Utc>,
    ) -> Result<TrackStats, DbError> {
        self.gate().await?;
        self.with_tables(|t| {
            t.track_stats.retain(|_, s| s.last_played >= cutoff);
            let stats = t
                .track_stats
                .entry((guild_id.to_owned(), play.track_id.clone()))
                .and_modify(|s| s.play_count = s.play_count.saturating_add(1))
                .or_insert_with(|| TrackStats {
                    track_id: play.track_id.clone(),
                    guild_id: guild_id.to_owned(),
                    title: String::new(),
                    author: String::new(),
                    uri: String::new(),
                    play_count: 1,
                    last_played: now,
                });
            stats.title.clone_from(&play.title);
            stats.author.clone_from(&play.author);
            stats.uri.clone_from(&play.uri);
            stats.last_played = now;
            Ok(stats.clone())
        })
    }

    async fn record_user_play(
        &self,
        guild_id: &str,
        user_id: &str,
        now: DateTime<Utc>,
        cutoff: DateTime<Utc>,
    ) -> Result<UserStats, DbError> {
        self.gate().await?;
        self.with_tables(|t| {
            t.user_stats.retain(|_, s| s.last_played >= cutoff);
            let stats = t
                .user_stats
                .entry((guild_id.to_owned(), user_id.to_owned()))
                .and_modify(|s| s.play_count = s.play_count.saturating_add(1))
                .or_insert_with(|| UserStats {
                    user_id: user_id.to_owned(),
                    guild_id: guild_id.to_owned(),
                    play_count: 1,
                    last_played: now,
                });
            stats.last_played = now;
            Ok(stats.clone())
        })
    }

    async fn top_tracks(&self, guild_id: &str, limit: u32) -> Result<Vec<TrackStats>, DbError> {
        self.gate().await?;
        self.with_tables(|t| {
            let mut rows: Vec<TrackStats> = t
                .track_stats
                .values()
                .filter(|s| s.guild_id == guild_id)
                .cloned()
                .collect();
            rows.sort_by(|a, b| {
                b.play_count
                    .cmp(&a.play_count)
                    .then(b.last_played.cmp(&a.last_played))
            });
            rows.truncate(usize::try_from(limit).unwrap_or(usize::MAX));
            Ok(rows)
        })
    }

    async fn top_users(&self, guild_id: &str, limit: u32) -> Result<Vec<UserStats>, DbError> {
        self.gate().await?;
        self.with_tables(|t| {
            let mut rows: Vec<UserStats> = t
                .user_stats
                .values()
                .filter(|s| s.guild_id == guild_id)
                .cloned()
                .collect();
            rows.sort_by(|a, b| {
                b.play_count
                    .cmp(&a.play_count)
                    .then(b.last_played.cmp(&a.last_played))
            });
            rows.truncate(usize::try_from(limit).unwrap_or(usize::MAX));
            Ok(rows)
        })
    }

    async fn top_guilds(&self, limit: u32) -> Result<Vec<GuildPlays>, DbError> {
        self.gate().await?;
        self.with_tables(|t| {
            let mut totals: BTreeMap<&str, u64> = BTreeMap::new();
            for stats in t.track_stats.values() {
                let total = totals.entry(stats.guild_id.as_str()).or_insert(0);
                *total = total.saturating_add(stats.play_count);
            }
            let mut rows: Vec<GuildPlays> = totals
                .into_iter()
                .map(|(guild_id, play_count)| GuildPlays {
                    guild_id: guild_id.to_owned(),
                    play_count,
                })
                .collect();
            rows.sort_by(|a, b| b.play_count.cmp(&a.play_count).then(a.guild_id.cmp(&b.guild_id)));
            rows.truncate(usize::try_from(limit).unwrap_or(usize::MAX));
            Ok(rows)
        })
    }

    async fn read_table(&self, table: Table) -> Result<Vec<Record>, DbError> {
        self.gate().await?;
        self.with_tables(|t| {
            let records = match table {
                Table::Guilds => t.guilds.values().cloned().map(Record::Guild).collect(),
                Table::UserVotes => {
                    let mut votes = t.votes.clone();
                    votes.sort_by_key(|v| v.id);
                    votes.into_iter().map(Record::Vote).collect()
                }
                Table::Playlists => t.playlists.values().cloned().map(Record::Playlist).collect(),
                Table::PlaylistTracks => {
                    let mut tracks = t.tracks.clone();
                    tracks.sort_by_key(|track| (track.playlist_id, track.position));
                    tracks.into_iter().map(Record::PlaylistTrack).collect()
                }
                Table::LikedSongs => {
                    let mut songs = t.liked.clone();
                    songs.sort_by_key(|s| s.id);
                    songs.into_iter().map(Record::LikedSong).collect()
                }
                Table::TrackStats => t
                    .track_stats
                    .values()
                    .cloned()
                    .map(Record::TrackStats)
                    .collect(),
                Table::UserStats => t
                    .user_stats
                    .values()
                    .cloned()
                    .map(Record::UserStats)
                    .collect(),
            };
            Ok(records)
        })
    }

    async fn clear_table(&self, table: Table) -> Result<u64, DbError> {
        self.gate().await?;
        self.with_tables(|t| {
            let cleared = match table {
                Table::Guilds => std::mem::take(&mut t.guilds).len(),
                Table::UserVotes => std::mem::take(&mut t.votes).len(),
                Table::Playlists => std::mem::take(&mut t.playlists).len(),
                Table::PlaylistTracks => std::mem::take(&mut t.tracks).len(),
                Table::LikedSongs => std::mem::take(&mut t.liked).len(),
                Table::TrackStats => std::mem::take(&mut t.track_stats).len(),
                Table::UserStats => std::mem::take(&mut t.user_stats).len(),
            };
            Ok(u64::try_from(cleared).unwrap_or(u64::MAX))
        })
    }

    async fn insert_records(&self, records: &[Record]) -> Result<u64, DbError> {
        self.gate().await?;
        self.with_tables(|t| {
            // Stage on a copy so a failing row leaves nothing behind.
            let mut staged = t.clone();
            for record in records {
                staged.insert(record)?;
            }
            *t = staged;
            Ok(u64::try_from(records.len()).unwrap_or(u64::MAX))
        })
    }
}

#[cfg(test)]
#[allow(clippy::arithmetic_side_effects)]
mod tests {
    use cadence_types::{VoteId, VoteKind};
    use chrono::Duration as ChronoDuration;

    use super::*;

    #[tokio::test]
    async fn unavailable_store_fails_every_call() {
        let store = MemoryStore::new("replica");
        store.set_available(false);

        let result = store.get_guild("42").await;
        assert!(matches!(result, Err(DbError::Unavailable(name)) if name == "replica"));
        assert_eq!(store.calls(), 1);
    }

    #[tokio::test]
    async fn repeated_vote_extends_active_row() {
        let store = MemoryStore::new("primary");
        let now = Utc::now();
        let first = UserVote {
            id: VoteId::new(),
            user_id: "u1".to_owned(),
            kind: VoteKind::Vote,
            voted_at: now,
            expires_at: now + ChronoDuration::hours(12),
        };
        let second = UserVote {
            id: VoteId::new(),
            voted_at: now + ChronoDuration::hours(1),
            expires_at: now + ChronoDuration::hours(13),
            ..first.clone()
        };

        store.add_vote(&first).await.ok();
        let merged = store.add_vote(&second).await.ok();

        assert_eq!(merged.as_ref().map(|v| v.id), Some(first.id));
        assert_eq!(merged.map(|v| v.expires_at), Some(second.expires_at));
        let active = store.active_votes("u1", now).await.unwrap_or_default();
        assert_eq!(active.len(), 1);
    }

    #[tokio::test]
    async fn backfill_keeps_local_values_and_respects_guard() {
        let store = MemoryStore::new("primary");
        let now = Utc::now();
        let local = store
            .update_guild("7", &GuildUpdate::Locale(Some("de".to_owned())), now)
            .await
            .ok();
        assert!(local.is_some());

        let mut remote = GuildConfig::new("7", now - ChronoDuration::days(3));
        remote.locale = Some("fr".to_owned());
        remote.prefix = Some("!".to_owned());
        remote.default_volume = Some(80);

        let stale = store
            .backfill_guild(&remote, Some(now - ChronoDuration::seconds(1)))
            .await;
        assert!(matches!(stale, Ok(false)));

        let merged = store.backfill_guild(&remote, Some(now)).await;
        assert!(matches!(merged, Ok(true)));
        let row = store.get_guild("7").await.ok().flatten();
        assert_eq!(row.as_ref().and_then(|g| g.locale.as_deref()), Some("de"));
        assert_eq!(row.as_ref().and_then(|g| g.prefix.as_deref()), Some("!"));
        assert_eq!(row.as_ref().and_then(|g| g.default_volume), Some(80));
        assert_eq!(row.map(|g| g.created_at), Some(remote.created_at));

        // Whole-row backfill never overwrites.
        let again = store.backfill_guild(&remote, None).await;
        assert!(matches!(again, Ok(false)));
    }

    #[tokio::test]
    async fn vote_past_year_9999_is_refused() {
        let store = MemoryStore::new("primary");
        let now = Utc::now();
        let vote = UserVote {
            id: VoteId::new(),
            user_id: "u1".to_owned(),
            kind: VoteKind::Regular,
            voted_at: now,
            expires_at: now + ChronoDuration::days(3_000_000),
        };

        assert!(matches!(store.add_vote(&vote).await, Err(DbError::InvalidRecord(_))));
        assert_eq!(store.read_table(Table::UserVotes).await.map(|r| r.len()).ok(), Some(0));
    }

    #[tokio::test]
    async fn failed_bulk_insert_leaves_nothing() {
        let store = MemoryStore::new("primary");
        let guild = GuildConfig::new("1", Utc::now());
        let records = vec![Record::Guild(guild.clone()), Record::Guild(guild)];

        assert!(store.insert_records(&records).await.is_err());
        assert_eq!(store.read_table(Table::Guilds).await.map(|r| r.len()).ok(), Some(0));
    }

    #[tokio::test]
    async fn stale_stats_are_evicted_on_write() {
        let store = MemoryStore::new("replica");
        let now = Utc::now();
        let play = TrackPlay {
            track_id: "t1".to_owned(),
            title: "Song".to_owned(),
            author: "Artist".to_owned(),
            uri: "https://example.com/t1".to_owned(),
        };
        let old = now - ChronoDuration::days(20);
        store
            .record_track_play("g", &play, old, old - ChronoDuration::days(14))
            .await
            .ok();

        let fresh = store
            .record_track_play("g", &play, now, now - ChronoDuration::days(14))
            .await
            .ok();
        assert_eq!(fresh.map(|s| s.play_count), Some(1));
    }
}
