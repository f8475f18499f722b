//! The atomic Lua scripts.
//!
//! All accounting runs on the store: two scripts, composed from four
//! shared fragments, carry the whole check / check-and-increment
//! protocol so that decision and mutation are one indivisible unit.
//! A client-side check-then-increment cannot be made correct by any
//! amount of client locking once several limiter instances share a
//! store; do not split these.
//!
//! Both scripts receive the same inputs:
//! - `KEYS`: prefixed identifier keys (one or more)
//! - `ARGV[1]`: JSON rule list `[[interval, limit, precision?], ...]`
//! - `ARGV[2]`: current unix time in whole seconds
//! - `ARGV[3]`: weight (>= 1)
//! - `ARGV[4]`: whitelist set key (fully qualified)
//! - `ARGV[5]`: blacklist set key (fully qualified)
//!
//! and answer with one integer: 0 allowed, 1 rate limited, 2
//! blacklisted.
//!
//! Counter layout per identifier hash: the field `"<i>:<p>:"` holds
//! the cumulative weight over the live window, `"<i>:<p>:<b>"` the
//! weight of bucket `b = floor(now / p)`. A bucket expires once it is
//! `ceil(i / p)` buckets behind the current one; the count field is
//! kept equal to the sum of all live bucket fields.

/// Name under which the check-only script is registered.
pub const CHECK_RATE_LIMIT: &str = "check_rate_limit";

/// Name under which the check-and-increment script is registered.
pub const CHECK_LIMIT_INCR: &str = "check_limit_incr";

/// Argument unpacking, shared by both scripts.
const UNPACK_ARGS: &str = r#"
local rules = cjson.decode(ARGV[1])
local now = tonumber(ARGV[2])
local weight = tonumber(ARGV[3])
local whitelist_key = ARGV[4]
local blacklist_key = ARGV[5]
"#;

/// Whitelist / blacklist short-circuit. Whitelist wins.
const CHECK_WHITELIST_BLACKLIST: &str = r#"
for _, key in ipairs(KEYS) do
    if redis.call('SISMEMBER', whitelist_key, key) == 1 then
        return 0
    end
    if redis.call('SISMEMBER', blacklist_key, key) == 1 then
        return 2
    end
end
"#;

/// Pure limit check: no writes on this path.
///
/// The effective count is the stored cumulative count minus every
/// bucket that has slid out of the window.
const CHECK_LIMIT: &str = r#"
for _, key in ipairs(KEYS) do
    local raw = redis.call('HGETALL', key)
    local hash = {}
    for i = 1, #raw, 2 do
        hash[raw[i]] = raw[i + 1]
    end
    for _, rule in ipairs(rules) do
        local interval = rule[1]
        local limit = rule[2]
        local precision = math.min(rule[3] or interval, interval)
        local count_field = interval .. ':' .. precision .. ':'
        local oldest_live = math.floor(now / precision) - math.ceil(interval / precision) + 1
        local count = tonumber(hash[count_field]) or 0
        for field, held in pairs(hash) do
            if #field > #count_field and string.sub(field, 1, #count_field) == count_field then
                local bucket = tonumber(string.sub(field, #count_field + 1))
                if bucket and bucket < oldest_live then
                    count = count - (tonumber(held) or 0)
                end
            end
        end
        if count >= limit then
            return 1
        end
    end
end
"#;

/// Two-phase increment: decide for every (key, rule) pair first, write
/// only when nothing denied. Expired buckets are dropped and the count
/// field decremented by their sum before the test; that cleanup never
/// changes an effective count.
const CHECK_INCR_LIMIT: &str = r#"
local pending = {}
local longest = 0
for _, rule in ipairs(rules) do
    if rule[1] > longest then
        longest = rule[1]
    end
end
for _, key in ipairs(KEYS) do
    local raw = redis.call('HGETALL', key)
    local hash = {}
    for i = 1, #raw, 2 do
        hash[raw[i]] = raw[i + 1]
    end
    for _, rule in ipairs(rules) do
        local interval = rule[1]
        local limit = rule[2]
        local precision = math.min(rule[3] or interval, interval)
        local count_field = interval .. ':' .. precision .. ':'
        local now_bucket = math.floor(now / precision)
        local oldest_live = now_bucket - math.ceil(interval / precision) + 1
        local expired_sum = 0
        local expired_fields = {}
        for field, held in pairs(hash) do
            if #field > #count_field and string.sub(field, 1, #count_field) == count_field then
                local bucket = tonumber(string.sub(field, #count_field + 1))
                if bucket and bucket < oldest_live then
                    expired_sum = expired_sum + (tonumber(held) or 0)
                    expired_fields[#expired_fields + 1] = field
                end
            end
        end
        local count
        if #expired_fields > 0 then
            redis.call('HDEL', key, unpack(expired_fields))
            count = redis.call('HINCRBY', key, count_field, -expired_sum)
            hash[count_field] = tostring(count)
            for _, field in ipairs(expired_fields) do
                hash[field] = nil
            end
        else
            count = tonumber(hash[count_field]) or 0
        end
        if count + weight > limit then
            return 1
        end
        pending[#pending + 1] = {key, count_field .. now_bucket, count_field}
    end
end
for _, upd in ipairs(pending) do
    redis.call('HINCRBY', upd[1], upd[2], weight)
    redis.call('HINCRBY', upd[1], upd[3], weight)
end
for _, key in ipairs(KEYS) do
    redis.call('EXPIRE', key, longest)
end
return 0
"#;

/// Body of the check-only script.
pub fn check_rate_limit_body() -> String {
    format!("{UNPACK_ARGS}{CHECK_WHITELIST_BLACKLIST}{CHECK_LIMIT}return 0\n")
}

/// Body of the check-and-increment script.
pub fn check_limit_incr_body() -> String {
    format!("{UNPACK_ARGS}{CHECK_WHITELIST_BLACKLIST}{CHECK_LIMIT}{CHECK_INCR_LIMIT}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scripts_share_fragments() {
        let check = check_rate_limit_body();
        let incr = check_limit_incr_body();
        for fragment in [UNPACK_ARGS, CHECK_WHITELIST_BLACKLIST, CHECK_LIMIT] {
            assert!(check.contains(fragment));
            assert!(incr.contains(fragment));
        }
        assert!(incr.contains(CHECK_INCR_LIMIT));
    }

    #[test]
    fn test_check_script_never_writes() {
        let check = check_rate_limit_body();
        for write_cmd in ["HINCRBY", "HDEL", "HSET", "EXPIRE", "SADD", "SREM", "DEL"] {
            assert!(
                !check.contains(write_cmd),
                "check script must not issue {}",
                write_cmd
            );
        }
    }

    #[test]
    fn test_check_script_ends_allowing() {
        assert!(check_rate_limit_body().ends_with("return 0\n"));
    }

    #[test]
    fn test_incr_script_writes_both_fields() {
        let incr = check_limit_incr_body();
        assert!(incr.contains("HINCRBY"));
        assert!(incr.contains("EXPIRE"));
    }
}
