//! Key encoding for the RocksDB column families.
//!
//! All timestamps use big-endian encoding so lexicographic key order is
//! chronological order. Composite keys use `:` (0x3A) as separator.
//! Every component is fixed-width, so keys parse without length
//! prefixes: timestamps are 8 bytes, job ids are the 16 raw UUID bytes.

const SEPARATOR: u8 = b':';

/// Encode a u64 as 8 big-endian bytes.
fn encode_u64(val: u64) -> [u8; 8] {
    val.to_be_bytes()
}

/// Key in the `jobs` column family: the raw UUID bytes. UUIDv7 ids are
/// time-ordered, so a full scan visits jobs in submission order.
pub fn job_key(id: &uuid::Uuid) -> Vec<u8> {
    id.as_bytes().to_vec()
}

/// Key in the `pending` column family:
/// `{eligible_ts_ns}:{enqueued_ts_ns}:{job_id}`
///
/// Eligibility-first layout means the first entry in the column family
/// is always the next job due for dispatch; the enqueue timestamp
/// breaks ties FIFO so no eligible job starves behind later arrivals.
pub fn pending_key(eligible_ts_ns: u64, enqueued_ts_ns: u64, id: &uuid::Uuid) -> Vec<u8> {
    let mut key = Vec::with_capacity(34);
    key.extend_from_slice(&encode_u64(eligible_ts_ns));
    key.push(SEPARATOR);
    key.extend_from_slice(&encode_u64(enqueued_ts_ns));
    key.push(SEPARATOR);
    key.extend_from_slice(id.as_bytes());
    key
}

/// Decode a pending key into `(eligible_ts_ns, enqueued_ts_ns, job_id)`.
/// Returns `None` for malformed keys.
pub fn parse_pending_key(key: &[u8]) -> Option<(u64, u64, uuid::Uuid)> {
    if key.len() != 34 || key[8] != SEPARATOR || key[17] != SEPARATOR {
        return None;
    }
    let eligible = u64::from_be_bytes(key[0..8].try_into().ok()?);
    let enqueued = u64::from_be_bytes(key[9..17].try_into().ok()?);
    let id = uuid::Uuid::from_slice(&key[18..34]).ok()?;
    Some((eligible, enqueued, id))
}

/// Key in the `in_flight` column family: `{claimed_ts_ns}:{job_id}`
///
/// Timestamp-first layout enables "scan oldest claims first" iteration
/// when reclaiming work from crashed dispatchers.
pub fn in_flight_key(claimed_ts_ns: u64, id: &uuid::Uuid) -> Vec<u8> {
    let mut key = Vec::with_capacity(25);
    key.extend_from_slice(&encode_u64(claimed_ts_ns));
    key.push(SEPARATOR);
    key.extend_from_slice(id.as_bytes());
    key
}

/// Decode an in-flight key into `(claimed_ts_ns, job_id)`.
/// Returns `None` for malformed keys.
pub fn parse_in_flight_key(key: &[u8]) -> Option<(u64, uuid::Uuid)> {
    if key.len() != 25 || key[8] != SEPARATOR {
        return None;
    }
    let claimed = u64::from_be_bytes(key[0..8].try_into().ok()?);
    let id = uuid::Uuid::from_slice(&key[9..25]).ok()?;
    Some((claimed, id))
}

/// Build an upper-bound key covering every in-flight entry claimed at
/// or before `cutoff_ns`. The 0xFF padding sorts after any real key
/// that starts with the cutoff timestamp.
pub fn in_flight_upper_bound(cutoff_ns: u64) -> Vec<u8> {
    let mut bound = Vec::with_capacity(25);
    bound.extend_from_slice(&encode_u64(cutoff_ns));
    bound.extend_from_slice(&[0xFF; 17]);
    bound
}
