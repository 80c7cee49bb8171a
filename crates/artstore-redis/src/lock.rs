//! Redis-backed distributed lock (`SET NX EX` acquire, Lua check-and-del
//! release), used to guard JWT key rotation against concurrent
//! admin-module replicas (spec §4.3).

use redis::aio::ConnectionManager;
use redis::Script;
use uuid::Uuid;

use crate::error::RedisHelperError;

/// Releases the check-and-del script only if the caller still holds the
/// lock (value matches), so one holder's expiry/release can never drop a
/// lock a later holder has since acquired.
static RELEASE_SCRIPT: &str = r#"
if redis.call("get", KEYS[1]) == ARGV[1] then
    return redis.call("del", KEYS[1])
else
    return 0
end
"#;

/// A held distributed lock. Drop does not release it — callers must
/// explicitly call [`release`] so the release can be awaited.
#[derive(Debug, Clone)]
pub struct LockHandle {
    key: String,
    value: String,
}

/// Attempt to acquire the named lock for `ttl_secs`. Returns `None` if
/// another holder currently has it.
pub async fn acquire(
    conn: &mut ConnectionManager,
    key: &str,
    ttl_secs: u64,
) -> Result<Option<LockHandle>, RedisHelperError> {
    let value = Uuid::new_v4().to_string();
    let acquired: bool = redis::cmd("SET")
        .arg(key)
        .arg(&value)
        .arg("NX")
        .arg("EX")
        .arg(ttl_secs)
        .query_async::<Option<String>>(conn)
        .await?
        .is_some();

    if acquired {
        Ok(Some(LockHandle { key: key.to_string(), value }))
    } else {
        Ok(None)
    }
}

/// Release `lock`, but only if it is still the current holder (guards
/// against releasing a lock some later holder acquired after this one's
/// TTL silently expired).
pub async fn release(
    conn: &mut ConnectionManager,
    lock: &LockHandle,
) -> Result<bool, RedisHelperError> {
    let released: i64 = Script::new(RELEASE_SCRIPT)
        .key(&lock.key)
        .arg(&lock.value)
        .invoke_async(conn)
        .await?;
    Ok(released == 1)
}
