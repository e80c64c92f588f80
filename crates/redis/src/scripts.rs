//! Server-side Lua scripts for the compare-and-swap lock operations.
//!
//! Each script takes the lock key as its sole `KEYS` entry and verifies the
//! stored lease value inside the same atomic execution as the mutation.
//! Composing the same checks client-side would admit a race where a holder
//! whose lease expired deletes or extends a lease that has since been
//! reacquired.

/// A Lua script together with the stable identity used as its cache key.
#[derive(Debug, Clone, Copy)]
pub(crate) struct LuaScript {
    pub id: &'static str,
    pub body: &'static str,
}

/// Delete the key only if it holds the expected lease value.
///
/// KEYS\[1\] = lock key
/// ARGV\[1\] = expected lease value
///
/// Returns 1 if the value matched and the key was deleted, 0 otherwise.
pub(crate) const DELETE_IF_MATCH: LuaScript = LuaScript {
    id: "delete_if_match",
    body: r"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
end
return 0
",
};

/// Reset the key's expiry only if it holds the expected lease value.
///
/// KEYS\[1\] = lock key
/// ARGV\[1\] = expected lease value
/// ARGV\[2\] = new TTL in milliseconds
///
/// Returns 1 if extended, 0 otherwise.
pub(crate) const EXTEND_IF_MATCH: LuaScript = LuaScript {
    id: "extend_if_match",
    body: r"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('PEXPIRE', KEYS[1], ARGV[2])
end
return 0
",
};

/// Renewal with a safety window: refuse to extend when the remaining TTL
/// has dropped below the caller's minimum, so a renewal cannot win a race
/// against expiry plus reacquisition and steal the lease from a new holder.
///
/// KEYS\[1\] = lock key
/// ARGV\[1\] = expected lease value
/// ARGV\[2\] = minimum remaining TTL in milliseconds
/// ARGV\[3\] = new TTL in milliseconds
///
/// Returns a three-element array `{code, ttl_ms, message}`:
///   - `{0, -2, 'key_not_found'}` when the key does not exist
///   - `{-1, current_ttl, 'value_mismatch'}` when held by someone else
///   - `{0, current_ttl, 'too_late'}` when below the safety window
///   - `{1, new_ttl, 'extended'}` on success
pub(crate) const ATOMIC_EXTEND: LuaScript = LuaScript {
    id: "atomic_extend",
    body: r"
local current = redis.call('GET', KEYS[1])
if current == false then
    return {0, -2, 'key_not_found'}
end
if current ~= ARGV[1] then
    return {-1, redis.call('PTTL', KEYS[1]), 'value_mismatch'}
end
local ttl = redis.call('PTTL', KEYS[1])
if ttl < tonumber(ARGV[2]) then
    return {0, ttl, 'too_late'}
end
redis.call('PEXPIRE', KEYS[1], ARGV[3])
return {1, tonumber(ARGV[3]), 'extended'}
",
};

/// Fetch the current lease value and remaining TTL in one round trip.
///
/// KEYS\[1\] = lock key
///
/// Returns `{value, ttl_ms}` or false when the key is absent.
pub(crate) const INSPECT: LuaScript = LuaScript {
    id: "inspect",
    body: r"
local value = redis.call('GET', KEYS[1])
if value == false then
    return false
end
return {value, redis.call('PTTL', KEYS[1])}
",
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn script_identities_are_distinct() {
        let ids = [
            DELETE_IF_MATCH.id,
            EXTEND_IF_MATCH.id,
            ATOMIC_EXTEND.id,
            INSPECT.id,
        ];
        for (i, a) in ids.iter().enumerate() {
            for b in &ids[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn mutating_scripts_verify_the_value_first() {
        assert!(DELETE_IF_MATCH.body.contains("GET"));
        assert!(DELETE_IF_MATCH.body.contains("DEL"));
        assert!(EXTEND_IF_MATCH.body.contains("GET"));
        assert!(EXTEND_IF_MATCH.body.contains("PEXPIRE"));
        assert!(ATOMIC_EXTEND.body.contains("PTTL"));
        assert!(ATOMIC_EXTEND.body.contains("too_late"));
    }
}
