//! Token-bucket rate limiting: the process-wide per-user gate and per-command cooldowns.

use std::{
    collections::HashMap,
    hash::Hash,
    sync::{Mutex, MutexGuard},
    time::{Duration, Instant},
};

use crate::domain::{Origin, UserId};

// Idle buckets are dropped once the map grows past this many keys.
const PRUNE_THRESHOLD: usize = 10_000;

/// Outcome of a bucket check.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Admission {
    pub allowed: bool,
    pub retry_after: Duration,
}

impl Admission {
    fn allowed() -> Self {
        Self {
            allowed: true,
            retry_after: Duration::ZERO,
        }
    }
}

#[derive(Clone, Debug)]
struct Bucket {
    tokens: f64,
    last_update: Instant,
}

/// Keyed token buckets with a shared capacity and refill period.
///
/// Every read-modify-write happens under one lock, so two concurrent callers
/// for the same key can never both take the last token.
#[derive(Debug)]
pub struct TokenBuckets<K> {
    max_tokens: f64,
    refill_per_sec: f64,
    buckets: Mutex<HashMap<K, Bucket>>,
}

impl<K: Eq + Hash + Clone> TokenBuckets<K> {
    pub fn new(capacity: u32, period: Duration) -> Self {
        let max_tokens = capacity.max(1) as f64;
        let period_secs = period.as_secs_f64().max(1e-9);

        Self {
            max_tokens,
            refill_per_sec: max_tokens / period_secs,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<K, Bucket>> {
        // A panic while holding the lock cannot leave a bucket half-written.
        self.buckets.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn try_take_at(&self, key: K, now: Instant) -> Admission {
        let mut buckets = self.lock();
        if buckets.len() > PRUNE_THRESHOLD {
            self.prune(&mut buckets, now);
        }

        let bucket = buckets.entry(key).or_insert_with(|| Bucket {
            tokens: self.max_tokens,
            last_update: now,
        });

        let elapsed = now.saturating_duration_since(bucket.last_update).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.refill_per_sec).min(self.max_tokens);
        bucket.last_update = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            return Admission::allowed();
        }

        let secs = (1.0 - bucket.tokens) / self.refill_per_sec;
        Admission {
            allowed: false,
            retry_after: Duration::from_secs_f64(secs.max(0.0)),
        }
    }

    /// Tokens currently stored for `key` (without refilling).
    pub fn tokens(&self, key: &K) -> f64 {
        self.lock()
            .get(key)
            .map(|b| b.tokens)
            .unwrap_or(self.max_tokens)
    }

    pub fn capacity(&self) -> f64 {
        self.max_tokens
    }

    fn prune(&self, buckets: &mut HashMap<K, Bucket>, now: Instant) {
        let max = self.max_tokens;
        let rate = self.refill_per_sec;
        buckets.retain(|_, b| {
            let elapsed = now.saturating_duration_since(b.last_update).as_secs_f64();
            b.tokens + elapsed * rate < max
        });
    }
}

/// How a caller wants to be admitted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AdmitMode {
    Checked,
    /// Impersonated re-invocations: always admitted, bucket untouched.
    Bypass,
}

/// Process-wide gate: one command per second per user by default.
#[derive(Debug)]
pub struct RateGate {
    buckets: TokenBuckets<UserId>,
}

#[derive(Clone, Copy, Debug)]
pub struct RateGateStatus {
    pub tokens: f64,
    pub max: f64,
}

impl RateGate {
    pub fn new(capacity: u32, period: Duration) -> Self {
        Self {
            buckets: TokenBuckets::new(capacity, period),
        }
    }

    pub fn global() -> Self {
        Self::new(1, Duration::from_secs(1))
    }

    pub fn admit(&self, user: UserId, mode: AdmitMode) -> Admission {
        self.admit_at(user, mode, Instant::now())
    }

    pub fn admit_at(&self, user: UserId, mode: AdmitMode, now: Instant) -> Admission {
        match mode {
            AdmitMode::Bypass => Admission::allowed(),
            AdmitMode::Checked => self.buckets.try_take_at(user, now),
        }
    }

    pub fn status(&self, user: UserId) -> RateGateStatus {
        RateGateStatus {
            tokens: self.buckets.tokens(&user),
            max: self.buckets.capacity(),
        }
    }
}

/// Scope a per-command cooldown or concurrency limit applies to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BucketScope {
    Global,
    Guild,
    Channel,
    Category,
    Member,
    User,
}

/// Concrete key derived from a scope for one invocation.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum BucketKey {
    Global,
    Guild(i64),
    Channel(i64),
    Member { guild: i64, user: i64 },
    User(i64),
}

impl BucketScope {
    pub fn label(self) -> &'static str {
        match self {
            BucketScope::Global => "Global",
            BucketScope::Guild => "Guild",
            BucketScope::Channel => "Channel",
            BucketScope::Category => "Category",
            BucketScope::Member => "Member",
            BucketScope::User => "User",
        }
    }

    /// Guild-based scopes fall back to the user in direct channels; categories
    /// fall back to the channel since not every gateway has them.
    pub fn key(self, user: UserId, origin: &Origin) -> BucketKey {
        match (self, origin.guild_id()) {
            (BucketScope::Global, _) => BucketKey::Global,
            (BucketScope::Guild, Some(g)) => BucketKey::Guild(g.0),
            (BucketScope::Member, Some(g)) => BucketKey::Member {
                guild: g.0,
                user: user.0,
            },
            (BucketScope::Guild | BucketScope::Member | BucketScope::User, _) => {
                BucketKey::User(user.0)
            }
            (BucketScope::Channel | BucketScope::Category, _) => {
                BucketKey::Channel(origin.channel_id().0)
            }
        }
    }
}

/// Declared cooldown of a command: `rate` uses per `per`, keyed by `scope`.
#[derive(Clone, Copy, Debug)]
pub struct Cooldown {
    pub rate: u32,
    pub per: Duration,
    pub scope: BucketScope,
}

/// Live cooldown state for one command.
#[derive(Debug)]
pub struct CooldownMapping {
    cooldown: Cooldown,
    buckets: TokenBuckets<BucketKey>,
}

impl CooldownMapping {
    pub fn new(cooldown: Cooldown) -> Self {
        Self {
            cooldown,
            buckets: TokenBuckets::new(cooldown.rate, cooldown.per),
        }
    }

    /// Take a use; `Some(retry_after)` when the command is still cooling down.
    pub fn update_at(&self, user: UserId, origin: &Origin, now: Instant) -> Option<Duration> {
        let key = self.cooldown.scope.key(user, origin);
        let admission = self.buckets.try_take_at(key, now);
        (!admission.allowed).then_some(admission.retry_after)
    }
}
