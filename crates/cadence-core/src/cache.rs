//! Process-wide guild settings cache.
//!
//! Removes store round-trips from the per-message hot path (prefix and
//! locale lookups). Each guild entry holds independently known fields: a
//! cached prefix says nothing about the locale. There is no TTL; every
//! write through the facade updates the matching field, and resetting a
//! value to its default drops the whole entry so the next read resolves
//! again.
//!
//! The cache is bounded. When full, inserting a new guild evicts the guild
//! that was inserted longest ago.
//!
//! All methods are synchronous. The lock is never held across an await.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use cadence_types::SetupDescriptor;

/// A cacheable guild field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GuildField {
    /// Resolved locale.
    Locale,
    /// Resolved command prefix.
    Prefix,
    /// Resolved default volume.
    DefaultVolume,
    /// Setup message location (possibly known to be absent).
    Setup,
}

/// Cached settings of one guild. `None` means "not cached".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CachedGuild {
    /// Resolved locale.
    pub locale: Option<String>,
    /// Resolved command prefix.
    pub prefix: Option<String>,
    /// Resolved default volume.
    pub default_volume: Option<u8>,
    /// `Some(None)` caches the fact that no setup message exists.
    pub setup: Option<Option<SetupDescriptor>>,
}

impl CachedGuild {
    fn forget(&mut self, field: GuildField) {
        match field {
            GuildField::Locale => self.locale = None,
            GuildField::Prefix => self.prefix = None,
            GuildField::DefaultVolume => self.default_volume = None,
            GuildField::Setup => self.setup = None,
        }
    }

    /// Whether no field is cached.
    pub const fn is_empty(&self) -> bool {
        self.locale.is_none()
            && self.prefix.is_none()
            && self.default_volume.is_none()
            && self.setup.is_none()
    }
}

#[derive(Debug, Default)]
struct Inner {
    /// guild id -> (insertion sequence, entry)
    entries: HashMap<String, (u64, CachedGuild)>,
    /// insertion sequence -> guild id, oldest first
    order: BTreeMap<u64, String>,
    next_seq: u64,
}

/// Bounded per-guild cache.
#[derive(Debug)]
pub struct GuildCache {
    capacity: usize,
    inner: Mutex<Inner>,
}

impl GuildCache {
    /// Create a cache holding at most `capacity` guilds (at least one).
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Snapshot of a guild's cached fields.
    pub fn get(&self, guild_id: &str) -> Option<CachedGuild> {
        let Ok(inner) = self.inner.lock() else {
            return None;
        };
        inner.entries.get(guild_id).map(|(_, entry)| entry.clone())
    }

    /// Cached locale.
    pub fn locale(&self, guild_id: &str) -> Option<String> {
        self.get(guild_id).and_then(|g| g.locale)
    }

    /// Cached prefix.
    pub fn prefix(&self, guild_id: &str) -> Option<String> {
        self.get(guild_id).and_then(|g| g.prefix)
    }

    /// Cached default volume.
    pub fn default_volume(&self, guild_id: &str) -> Option<u8> {
        self.get(guild_id).and_then(|g| g.default_volume)
    }

    /// Cached setup location. `Some(None)` means known to be unset.
    pub fn setup(&self, guild_id: &str) -> Option<Option<SetupDescriptor>> {
        self.get(guild_id).and_then(|g| g.setup)
    }

    /// Cache a locale.
    pub fn set_locale(&self, guild_id: &str, locale: &str) {
        self.update(guild_id, |g| g.locale = Some(locale.to_owned()));
    }

    /// Cache a prefix.
    pub fn set_prefix(&self, guild_id: &str, prefix: &str) {
        self.update(guild_id, |g| g.prefix = Some(prefix.to_owned()));
    }

    /// Cache a default volume.
    pub fn set_default_volume(&self, guild_id: &str, volume: u8) {
        self.update(guild_id, |g| g.default_volume = Some(volume));
    }

    /// Cache a setup location (or its absence).
    pub fn set_setup(&self, guild_id: &str, setup: Option<SetupDescriptor>) {
        self.update(guild_id, |g| g.setup = Some(setup));
    }

    /// Merge every known field of `entry` into the guild's entry.
    pub fn populate(&self, guild_id: &str, entry: CachedGuild) {
        self.update(guild_id, |g| {
            if entry.locale.is_some() {
                g.locale = entry.locale;
            }
            if entry.prefix.is_some() {
                g.prefix = entry.prefix;
            }
            if entry.default_volume.is_some() {
                g.default_volume = entry.default_volume;
            }
            if entry.setup.is_some() {
                g.setup = entry.setup;
            }
        });
    }

    /// Forget one field of a guild.
    pub fn invalidate(&self, guild_id: &str, field: GuildField) {
        let Ok(mut inner) = self.inner.lock() else {
            return;
        };
        let emptied = inner.entries.get_mut(guild_id).is_some_and(|(_, entry)| {
            entry.forget(field);
            entry.is_empty()
        });
        if emptied {
            remove_entry(&mut inner, guild_id);
        }
    }

    /// Drop a guild's entry. Returns whether one existed.
    pub fn delete(&self, guild_id: &str) -> bool {
        let Ok(mut inner) = self.inner.lock() else {
            return false;
        };
        remove_entry(&mut inner, guild_id)
    }

    /// Drop every entry.
    pub fn clear(&self) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.entries.clear();
            inner.order.clear();
        }
    }

    /// Number of cached guilds.
    pub fn len(&self) -> usize {
        self.inner.lock().map(|inner| inner.entries.len()).unwrap_or(0)
    }

    /// Whether no guild is cached.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of cached guilds.
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    fn update(&self, guild_id: &str, f: impl FnOnce(&mut CachedGuild)) {
        let Ok(mut inner) = self.inner.lock() else {
            return;
        };

        if let Some((_, entry)) = inner.entries.get_mut(guild_id) {
            f(entry);
            return;
        }

        while inner.entries.len() >= self.capacity {
            let Some((_, oldest)) = inner.order.pop_first() else {
                break;
            };
            inner.entries.remove(&oldest);
            tracing::trace!(guild_id = %oldest, "Evicted guild from cache");
        }

        let seq = inner.next_seq;
        inner.next_seq = seq.wrapping_add(1);
        let mut entry = CachedGuild::default();
        f(&mut entry);
        inner.order.insert(seq, guild_id.to_owned());
        inner.entries.insert(guild_id.to_owned(), (seq, entry));
    }
}

fn remove_entry(inner: &mut Inner, guild_id: &str) -> bool {
    match inner.entries.remove(guild_id) {
        Some((seq, _)) => {
            inner.order.remove(&seq);
            true
        }
        None => false,
    }
}
