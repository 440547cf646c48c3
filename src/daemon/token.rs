//! Opaque protocol tokens.
//!
//! A token is `"builtin" ":" <token_id> ":" <sequence_nr>`. The `builtin`
//! prefix namespaces us against other fsmonitor providers. The token id is
//! opaque and carries no ordering; equality is the only observable relation.
//! The sequence number is the boundary between batches a client has already
//! seen and batches it has not.

use std::process;
use std::sync::atomic::{AtomicU64, Ordering};

use time::OffsetDateTime;
use time::macros::format_description;

/// Environment toggle producing deterministic `test_NNNNNNNN` token ids.
pub const TOKEN_TEST_ENV: &str = "FSMONITOR_TOKEN_TEST";

const TOKEN_NAMESPACE: &str = "builtin";

/// Bumped on every mint so ids stay unique within one process even when two
/// resyncs land in the same microsecond.
static MINT_COUNT: AtomicU64 = AtomicU64::new(0);

/// Mint a fresh opaque token id.
///
/// The normal form folds in the mint counter, pid, and a UTC timestamp.
/// With [`TOKEN_TEST_ENV`] set, ids are a deterministic counter starting at
/// the env value (or 1 when the value is not a number).
pub fn mint_token_id() -> String {
    let count = MINT_COUNT.fetch_add(1, Ordering::Relaxed);

    if let Ok(value) = std::env::var(TOKEN_TEST_ENV) {
        let start = value.parse::<u64>().unwrap_or(1);
        return format!("test_{:08x}", start + count);
    }

    let now = OffsetDateTime::now_utc();
    let stamp = now
        .format(format_description!(
            "[year][month][day]T[hour][minute][second]"
        ))
        .unwrap_or_else(|_| String::from("00000000T000000"));
    format!(
        "{}.{}.{}.{:06}Z",
        count,
        process::id(),
        stamp,
        now.microsecond()
    )
}

/// Render the wire form of a token.
pub fn format_token(token_id: &str, seq: u64) -> String {
    format!("{TOKEN_NAMESPACE}:{token_id}:{seq}")
}

/// Parse a client token into `(token_id, sequence_nr)`.
///
/// The id may itself contain `:`; the sequence number is everything after
/// the last one. `None` means the token is not recognisably ours and the
/// caller must fall back to a trivial response.
pub fn parse_token(token: &str) -> Option<(&str, u64)> {
    let rest = token.strip_prefix("builtin:")?;
    let (id, seq) = rest.rsplit_once(':')?;
    if id.is_empty() {
        return None;
    }
    let seq = seq.parse::<u64>().ok()?;
    Some((id, seq))
}
