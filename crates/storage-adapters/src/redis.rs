//! # Redis-backed send throttle
//!
//! Shares the sliding window across every API instance. Each sender owns a
//! sorted set of send timestamps (milliseconds); the script evicts expired
//! entries, counts, and records the new send atomically.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use deadpool_redis::redis::Script;
use deadpool_redis::{Config, Pool, Runtime};
use domains::{Admission, SendThrottle, UserId};

const SLIDING_WINDOW_SCRIPT: &str = r"
local key = KEYS[1]
local now = tonumber(ARGV[1])
local window = tonumber(ARGV[2])
local max = tonumber(ARGV[3])

redis.call('ZREMRANGEBYSCORE', key, '-inf', now - window)
local count = redis.call('ZCARD', key)
if count < max then
    redis.call('ZADD', key, now, ARGV[4])
    redis.call('PEXPIRE', key, window)
    return {1, 0}
end

local oldest = redis.call('ZRANGE', key, 0, 0, 'WITHSCORES')
return {0, tonumber(oldest[2]) + window - now}
";

pub fn create_pool(url: &str) -> anyhow::Result<Pool> {
    Ok(Config::from_url(url).create_pool(Some(Runtime::Tokio1))?)
}

pub struct RedisSendThrottle {
    pool: Pool,
    script: Script,
    max_sends: usize,
    window: Duration,
}

impl RedisSendThrottle {
    pub fn new(pool: Pool, max_sends: usize, window: Duration) -> Self {
        Self {
            pool,
            script: Script::new(SLIDING_WINDOW_SCRIPT),
            max_sends,
            window,
        }
    }

    async fn try_admit(&self, sender: &UserId) -> anyhow::Result<Admission> {
        let now_ms = i64::try_from(SystemTime::now().duration_since(UNIX_EPOCH)?.as_millis())?;
        let window_ms = i64::try_from(self.window.as_millis())?;
        let member = format!("{now_ms}-{}", uuid::Uuid::new_v4());

        let mut conn = self.pool.get().await?;
        let reply: Vec<i64> = self
            .script
            .key(format!("rate:send:{sender}"))
            .arg(now_ms)
            .arg(window_ms)
            .arg(self.max_sends)
            .arg(member)
            .invoke_async(&mut conn)
            .await?;

        match reply.as_slice() {
            [1, ..] => Ok(Admission::Admitted),
            [0, wait_ms] => Ok(Admission::Throttled {
                retry_after: Duration::from_millis(u64::try_from(*wait_ms).unwrap_or(0)),
            }),
            other => anyhow::bail!("unexpected rate limit reply {other:?}"),
        }
    }
}

#[async_trait]
impl SendThrottle for RedisSendThrottle {
    /// Fails open: an unreachable Redis must not stop people from messaging.
    async fn admit(&self, sender: &UserId) -> Admission {
        match self.try_admit(sender).await {
            Ok(admission) => {
                if let Admission::Throttled { retry_after } = admission {
                    tracing::warn!(sender = %sender, retry_after_ms = retry_after.as_millis() as u64, "send throttled");
                }
                admission
            }
            Err(e) => {
                tracing::warn!(sender = %sender, error = %e, "rate limiter unavailable, admitting send");
                Admission::Admitted
            }
        }
    }
}
