use super::access_index::KeyDigest;

#[derive(Debug, Clone)]
pub struct EntryInfo {
    pub key: String,
    pub digest: KeyDigest,
    pub size_bytes: u64,
    pub last_access_ms: u64,
}

#[derive(Debug, Default)]
pub struct EvictionPlan {
    pub planned: Vec<EntryInfo>,
    pub total_bytes_before: u64,
    pub total_bytes_after: u64,
}

/// Pick least recently accessed entries until the total fits in `max_bytes`.
/// A zero budget evicts everything.
pub fn plan_evictions(
    mut entries: Vec<EntryInfo>,
    max_bytes: u64,
) -> EvictionPlan {
    let mut plan = EvictionPlan::default();

    let mut total_bytes: u64 =
        entries.iter().map(|e| e.size_bytes).fold(0, u64::saturating_add);
    plan.total_bytes_before = total_bytes;

    if total_bytes > max_bytes || (max_bytes == 0 && !entries.is_empty()) {
        entries.sort_by_key(|e| e.last_access_ms);
        for e in entries {
            if total_bytes <= max_bytes && max_bytes > 0 {
                break;
            }
            total_bytes = total_bytes.saturating_sub(e.size_bytes);
            plan.planned.push(e);
        }
    }

    plan.total_bytes_after = total_bytes;
    plan
}
