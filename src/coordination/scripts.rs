//! Lua scripts evaluated server-side by [`RedisLockStore`](super::store::RedisLockStore).
//!
//! The lock is a HASH at `KEYS[1]` mapping holder id to reentrancy count.
//! Each script runs as one `EVAL`, so the existence check and the mutation
//! are never observed separately by another client.

/// `KEYS[1]` = lock key, `ARGV[1]` = holder id, `ARGV[2]` = lease seconds.
///
/// Succeeds when nobody holds the key or the caller already does.  Returns
/// the holder's count after the increment, or 0 when another holder owns
/// the lock.
pub const ACQUIRE: &str = r#"
    if redis.call('EXISTS', KEYS[1]) == 0 or redis.call('HEXISTS', KEYS[1], ARGV[1]) == 1 then
        local count = redis.call('HINCRBY', KEYS[1], ARGV[1], 1)
        redis.call('EXPIRE', KEYS[1], ARGV[2])
        return count
    end
    return 0
"#;

/// `KEYS[1]` = lock key, `ARGV[1]` = holder id.
///
/// Returns nil when the caller holds nothing, 0 when the caller still holds
/// the lock after the decrement, or the `DEL` result once the count reaches
/// zero.
pub const RELEASE: &str = r#"
    if redis.call('HEXISTS', KEYS[1], ARGV[1]) == 0 then
        return nil
    end
    if redis.call('HINCRBY', KEYS[1], ARGV[1], -1) == 0 then
        return redis.call('DEL', KEYS[1])
    end
    return 0
"#;

/// `KEYS[1]` = lock key, `ARGV[1]` = holder id, `ARGV[2]` = lease seconds.
///
/// Refreshes the TTL only while the caller's field still exists.
pub const RENEW: &str = r#"
    if redis.call('HEXISTS', KEYS[1], ARGV[1]) == 1 then
        return redis.call('EXPIRE', KEYS[1], ARGV[2])
    end
    return 0
"#;
