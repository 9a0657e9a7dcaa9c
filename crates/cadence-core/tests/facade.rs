//! Behavioural tests for [`BotStorage`] over in-memory stores.
//!
//! [`MemoryStore`] can be switched off or slowed down at will, which makes
//! the failure paths of the facade (fallback, background replay, cache
//! isolation) observable without any external service.

#![allow(
    clippy::expect_used,
    clippy::unwrap_used,
    clippy::missing_panics_doc,
    clippy::too_many_lines,
    clippy::indexing_slicing,
    clippy::arithmetic_side_effects
)]

use std::time::{Duration as StdDuration, Instant};

use cadence_core::{BotStorage, StorageSettings};
use cadence_db::{GuildUpdate, MemoryStore, Store, StorageError, WriteOutcome};
use cadence_types::{NewTrack, TrackPlay, UserVote, VoteId, VoteKind};
use chrono::{Duration, Utc};

fn storage() -> (BotStorage<MemoryStore, MemoryStore>, MemoryStore, MemoryStore) {
    let primary = MemoryStore::new("primary");
    let replica = MemoryStore::new("replica");
    let storage = BotStorage::new(primary.clone(), replica.clone(), StorageSettings::default());
    (storage, primary, replica)
}

fn play(track_id: &str) -> TrackPlay {
    TrackPlay {
        track_id: track_id.to_owned(),
        title: format!("Title {track_id}"),
        author: "Artist".to_owned(),
        uri: format!("https://example.com/{track_id}"),
    }
}

// =========================================================================
// Guild settings
// =========================================================================

#[tokio::test]
async fn unknown_guild_gets_defaults() {
    let (storage, _, _) = storage();

    assert_eq!(storage.get_prefix("1").await.unwrap(), "s!");
    assert_eq!(storage.get_locale("1").await.unwrap(), "en-US");
    assert_eq!(storage.get_default_volume("1").await.unwrap(), 100);
    assert_eq!(storage.get_setup("1").await.unwrap(), None);
}

#[tokio::test]
async fn cached_prefix_survives_primary_outage() {
    let (storage, primary, replica) = storage();
    storage.set_prefix("1", "!").await.unwrap();
    storage.flush_sync().await;

    primary.set_available(false);
    replica.set_available(false);
    let calls_before = primary.calls() + replica.calls();

    assert_eq!(storage.get_prefix("1").await.unwrap(), "!");
    assert_eq!(primary.calls() + replica.calls(), calls_before);
}

#[tokio::test]
async fn prefix_write_reaches_replica_in_background() {
    let (storage, primary, replica) = storage();

    storage.set_prefix("1", "!").await.unwrap();
    storage.flush_sync().await;

    let on_primary = primary.get_guild("1").await.unwrap().unwrap();
    let on_replica = replica.get_guild("1").await.unwrap().unwrap();
    assert_eq!(on_primary.prefix.as_deref(), Some("!"));
    assert_eq!(on_replica.prefix.as_deref(), Some("!"));
    assert_eq!(storage.sync_stats().succeeded, 1);
}

#[tokio::test]
async fn slow_replica_does_not_delay_writes() {
    let (storage, _, replica) = storage();
    replica.set_latency(StdDuration::from_millis(500));

    let started = Instant::now();
    storage.set_prefix("1", "!").await.unwrap();
    assert!(started.elapsed() < StdDuration::from_millis(50));

    storage.flush_sync().await;
    replica.set_latency(StdDuration::ZERO);
    let on_replica = replica.get_guild("1").await.unwrap().unwrap();
    assert_eq!(on_replica.prefix.as_deref(), Some("!"));
}

#[tokio::test]
async fn primary_down_writes_and_reads_use_replica() {
    let (storage, primary, replica) = storage();
    primary.set_available(false);

    storage.set_locale("1", "de").await.unwrap();
    storage.set_prefix("1", "!").await.unwrap();
    storage.set_default_volume("1", 60).await.unwrap();
    storage.set_setup("1", "c", "m").await.unwrap();
    storage.clear_cache();

    assert_eq!(storage.get_locale("1").await.unwrap(), "de");
    storage.clear_cache();
    assert_eq!(storage.get_prefix("1").await.unwrap(), "!");
    storage.clear_cache();
    assert_eq!(storage.get_default_volume("1").await.unwrap(), 60);
    storage.clear_cache();
    let setup = storage.get_setup("1").await.unwrap().unwrap();
    assert_eq!((setup.channel_id.as_str(), setup.message_id.as_str()), ("c", "m"));

    let config = storage.get_guild_config("1").await.unwrap().unwrap();
    assert_eq!(config.locale.as_deref(), Some("de"));
    assert_eq!(config.prefix.as_deref(), Some("!"));
    assert_eq!(config.default_volume, Some(60));

    storage.add_user_vote("u").await.unwrap();
    assert!(storage.has_active_premium("u").await.unwrap());
    let on_replica = replica.get_guild("1").await.unwrap().unwrap();
    assert_eq!(on_replica.locale.as_deref(), Some("de"));
    assert_eq!(on_replica.prefix.as_deref(), Some("!"));
}

#[tokio::test]
async fn replica_only_row_is_found_on_primary_miss() {
    let (storage, primary, replica) = storage();
    replica
        .update_guild("42", &GuildUpdate::Prefix(Some("!".to_owned())), Utc::now())
        .await
        .unwrap();

    assert_eq!(storage.get_prefix("42").await.unwrap(), "!");

    primary.set_available(false);
    replica.set_available(false);
    assert_eq!(storage.get_prefix("42").await.unwrap(), "!");
}

#[tokio::test]
async fn replica_only_row_is_copied_into_primary() {
    let (storage, primary, replica) = storage();
    replica
        .update_guild("42", &GuildUpdate::Prefix(Some("!".to_owned())), Utc::now())
        .await
        .unwrap();

    storage.get_guild_config("42").await.unwrap();
    storage.flush_sync().await;

    let on_primary = primary.get_guild("42").await.unwrap().unwrap();
    assert_eq!(on_primary.prefix.as_deref(), Some("!"));
}

#[tokio::test]
async fn replica_prefix_survives_an_unrelated_set_locale() {
    let (storage, primary, replica) = storage();
    replica
        .update_guild("42", &GuildUpdate::Prefix(Some("!".to_owned())), Utc::now())
        .await
        .unwrap();

    storage.set_locale("42", "de").await.unwrap();
    storage.flush_sync().await;
    storage.clear_cache();

    assert_eq!(storage.get_prefix("42").await.unwrap(), "!");
    assert_eq!(storage.get_locale("42").await.unwrap(), "de");

    let on_primary = primary.get_guild("42").await.unwrap().unwrap();
    assert_eq!(on_primary.prefix.as_deref(), Some("!"));
    assert_eq!(on_primary.locale.as_deref(), Some("de"));
    let on_replica = replica.get_guild("42").await.unwrap().unwrap();
    assert_eq!(on_replica.locale.as_deref(), Some("de"));
}

#[tokio::test]
async fn reset_on_new_primary_row_is_not_undone_by_replica() {
    let (storage, primary, replica) = storage();
    for update in [
        GuildUpdate::Prefix(Some("!".to_owned())),
        GuildUpdate::Locale(Some("fr".to_owned())),
    ] {
        replica.update_guild("42", &update, Utc::now()).await.unwrap();
    }

    storage.delete_prefix("42").await.unwrap();
    storage.flush_sync().await;

    assert_eq!(storage.get_prefix("42").await.unwrap(), "s!");
    assert_eq!(storage.get_locale("42").await.unwrap(), "fr");
    let on_primary = primary.get_guild("42").await.unwrap().unwrap();
    assert_eq!(on_primary.prefix, None);
}

#[tokio::test]
async fn both_stores_down_is_an_error_not_a_default() {
    let (storage, primary, replica) = storage();
    primary.set_available(false);
    replica.set_available(false);

    let read = storage.get_prefix("1").await;
    assert!(read.as_ref().is_err_and(StorageError::is_unavailable));

    let write = storage.set_prefix("1", "!").await;
    assert!(write.as_ref().is_err_and(StorageError::is_unavailable));
    assert!(storage.cache().get("1").is_none());

    storage.flush_sync().await;
    assert_eq!(storage.sync_stats().scheduled, 0);
}

#[tokio::test]
async fn delete_prefix_restores_default() {
    let (storage, _, _) = storage();
    storage.set_prefix("1", "!").await.unwrap();

    storage.delete_prefix("1").await.unwrap();

    assert!(storage.cache().get("1").is_none());
    assert_eq!(storage.get_prefix("1").await.unwrap(), "s!");
}

#[tokio::test]
async fn guild_config_reflects_every_field() {
    let (storage, _, _) = storage();
    storage.set_locale("1", "fr").await.unwrap();
    storage.set_default_volume("1", 150).await.unwrap();
    storage.set_setup("1", "c", "m").await.unwrap();

    let config = storage.get_guild_config("1").await.unwrap().unwrap();
    assert_eq!(config.locale.as_deref(), Some("fr"));
    assert_eq!(config.default_volume, Some(150));
    assert_eq!(config.setup_message_id.as_deref(), Some("m"));
    assert_eq!(config.prefix, None);
}

// =========================================================================
// Votes and premium
// =========================================================================

#[tokio::test]
async fn repeated_vote_extends_single_row() {
    let (storage, primary, replica) = storage();

    let first = storage.add_user_vote("u").await.unwrap();
    let second = storage.add_user_vote("u").await.unwrap();
    storage.flush_sync().await;

    assert_eq!(first.id, second.id);
    assert!(second.expires_at >= first.expires_at);

    let now = Utc::now();
    assert_eq!(primary.active_votes("u", now).await.unwrap().len(), 1);
    assert_eq!(replica.active_votes("u", now).await.unwrap().len(), 1);
}

#[tokio::test]
async fn premium_status_combines_sources() {
    let (storage, _, _) = storage();
    assert!(!storage.has_active_premium("u").await.unwrap());

    storage.add_user_vote("u").await.unwrap();
    storage.add_premium("u", Duration::days(30)).await.unwrap();

    let status = storage.get_premium_status("u").await.unwrap();
    assert!(status.is_active());
    let vote = status.vote.unwrap();
    let regular = status.regular.unwrap();
    assert!(regular.expires_at > vote.expires_at);
    assert!(vote.expires_at - vote.voted_at == Duration::hours(12));
}

#[tokio::test]
async fn replica_only_grant_is_seen_through_empty_primary() {
    let (storage, primary, replica) = storage();
    let now = Utc::now();
    let grant = UserVote {
        id: VoteId::new(),
        user_id: "u".to_owned(),
        kind: VoteKind::Regular,
        voted_at: now,
        expires_at: now + Duration::days(30),
    };
    replica.add_vote(&grant).await.unwrap();

    assert!(storage.has_active_premium("u").await.unwrap());

    storage.flush_sync().await;
    let on_primary = primary.active_votes("u", Utc::now()).await.unwrap();
    assert_eq!(on_primary.len(), 1);
    assert_eq!(on_primary[0].id, grant.id);
}

#[tokio::test]
async fn premium_past_year_9999_is_rejected() {
    let (storage, primary, replica) = storage();

    let result = storage.add_premium("u", Duration::days(3_000_000)).await;

    assert!(matches!(result, Err(StorageError::InvalidInput(_))));
    storage.flush_sync().await;
    let now = Utc::now();
    assert!(primary.active_votes("u", now).await.unwrap().is_empty());
    assert!(replica.active_votes("u", now).await.unwrap().is_empty());
    assert!(!storage.has_active_premium("u").await.unwrap());
}

#[tokio::test]
async fn premium_survives_primary_outage() {
    let (storage, primary, _) = storage();
    storage.add_premium("u", Duration::days(1)).await.unwrap();
    storage.flush_sync().await;

    primary.set_available(false);
    assert!(storage.has_active_premium("u").await.unwrap());
}

// =========================================================================
// Replica-only features
// =========================================================================

#[tokio::test]
async fn mode_247_and_voice_status_live_on_replica() {
    let (storage, primary, replica) = storage();
    let mode = cadence_types::Mode247 {
        enabled: true,
        voice_channel_id: Some("v".to_owned()),
        text_channel_id: Some("t".to_owned()),
    };

    storage.set_247_mode("1", mode.clone()).await.unwrap();
    storage.set_voice_status("1", true).await.unwrap();

    assert_eq!(storage.get_247_mode("1").await.unwrap(), mode);
    assert!(storage.get_voice_status("1").await.unwrap());
    assert_eq!(primary.calls(), 0);

    replica.set_available(false);
    assert!(matches!(
        storage.get_voice_status("1").await,
        Err(StorageError::Store { .. })
    ));
}

#[tokio::test]
async fn playlist_lifecycle() {
    let (storage, _, _) = storage();

    let created = storage.create_playlist("u", "Road trip").await.unwrap();
    let playlist = created.written().unwrap();
    assert!(matches!(
        storage.create_playlist("u", "Road trip").await.unwrap(),
        WriteOutcome::Conflict
    ));

    let tracks = [
        NewTrack::from_url("https://example.com/a"),
        NewTrack::from_url("https://example.com/b"),
    ];
    let filled = storage.add_tracks_to_playlist(playlist.id, &tracks).await.unwrap();
    assert_eq!(filled.tracks.len(), 2);
    assert_eq!(filled.tracks[0].position, 0);
    assert_eq!(filled.tracks[1].position, 1);

    let first = filled.tracks[0].id;
    assert!(storage.remove_song(playlist.id, first).await.unwrap());
    assert!(!storage.remove_song(playlist.id, first).await.unwrap());

    let listed = storage.get_playlists("u").await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].tracks.len(), 1);

    assert!(storage.delete_playlist(playlist.id).await.unwrap());
    assert!(storage.get_playlist_by_id(playlist.id).await.unwrap().is_none());
    assert!(matches!(
        storage.add_tracks_to_playlist(playlist.id, &tracks).await,
        Err(StorageError::NotFound { entity: "playlist", .. })
    ));
}

#[tokio::test]
async fn liking_twice_reports_duplicate() {
    let (storage, _, _) = storage();
    let url = "https://example.com/song";

    assert!(storage.like_song("u", url, "Song", "Artist").await.unwrap());
    assert!(!storage.like_song("u", url, "Song", "Artist").await.unwrap());
    assert_eq!(storage.get_liked_songs("u").await.unwrap().len(), 1);

    assert!(storage.unlike_song("u", url).await.unwrap());
    assert!(storage.get_liked_songs("u").await.unwrap().is_empty());
}

#[tokio::test]
async fn stale_stats_are_evicted_on_update() {
    let (storage, _, replica) = storage();
    let long_ago = Utc::now() - Duration::days(20);
    replica
        .record_track_play("g", &play("old"), long_ago, long_ago - Duration::days(14))
        .await
        .unwrap();

    storage.update_track_stats("g", &play("new")).await.unwrap();
    let counted = storage.update_track_stats("g", &play("new")).await.unwrap();
    assert_eq!(counted.play_count, 2);

    let top = storage.get_top_tracks("g", 10).await.unwrap();
    assert_eq!(top.len(), 1);
    assert_eq!(top[0].track_id, "new");
}

#[tokio::test]
async fn top_users_and_guilds_rank_by_plays() {
    let (storage, _, _) = storage();
    for _ in 0..3 {
        storage.update_user_stats("g1", "busy").await.unwrap();
        storage.update_track_stats("g1", &play("a")).await.unwrap();
    }
    storage.update_user_stats("g1", "quiet").await.unwrap();
    storage.update_track_stats("g2", &play("a")).await.unwrap();

    let users = storage.get_top_users("g1", 10).await.unwrap();
    assert_eq!(users[0].user_id, "busy");
    assert_eq!(users[0].play_count, 3);

    let guilds = storage.get_top_guilds(10).await.unwrap();
    assert_eq!(guilds[0].guild_id, "g1");
    assert_eq!(guilds[0].play_count, 3);
}

// =========================================================================
// Resync
// =========================================================================

#[tokio::test]
async fn resync_copies_replica_and_clears_cache() {
    let (storage, primary, replica) = storage();
    storage.set_prefix("1", "!").await.unwrap();
    storage.flush_sync().await;
    replica
        .update_guild("1", &GuildUpdate::Prefix(Some("?".to_owned())), Utc::now())
        .await
        .unwrap();

    let report = storage.full_resync().await;

    assert!(report.success);
    assert!(storage.cache().is_empty());
    assert_eq!(storage.get_prefix("1").await.unwrap(), "?");
    let on_primary = primary.get_guild("1").await.unwrap().unwrap();
    assert_eq!(on_primary.prefix.as_deref(), Some("?"));
}

#[tokio::test]
async fn failed_replay_is_broadcast() {
    let (storage, _, replica) = storage();
    let mut failures = storage.subscribe_sync_failures();
    replica.set_available(false);

    storage.set_prefix("1", "!").await.unwrap();
    storage.flush_sync().await;

    let failure = failures.recv().await.unwrap();
    assert_eq!(failure.label, "set_prefix");
    assert_eq!(storage.sync_stats().failed, 1);
}

#[tokio::test]
async fn evicted_guild_is_reloaded_from_store() {
    let (storage, primary, _) = storage();
    storage.set_prefix("1", "!").await.unwrap();
    storage.flush_sync().await;
    primary
        .update_guild("1", &GuildUpdate::Prefix(Some("?".to_owned())), Utc::now())
        .await
        .unwrap();

    assert_eq!(storage.get_prefix("1").await.unwrap(), "!");
    assert!(storage.evict_guild("1"));
    assert!(!storage.evict_guild("1"));
    assert_eq!(storage.get_prefix("1").await.unwrap(), "?");
}

#[tokio::test]
async fn close_drains_pending_replays() {
    let (storage, _, replica) = storage();
    replica.set_latency(StdDuration::from_millis(20));
    storage.set_prefix("1", "!").await.unwrap();

    storage.close().await;

    replica.set_latency(StdDuration::ZERO);
    let on_replica = replica.get_guild("1").await.unwrap().unwrap();
    assert_eq!(on_replica.prefix.as_deref(), Some("!"));
}
