use std::fmt::{self, Display, Formatter};
use std::time::Duration;

/// Cache key convention from spec §6: `logs:{device_id}:{limit}` / `stats:summary`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    RecentLogs { device_id: String, limit: u32 },
    StatsSummary,
}

impl CacheKey {
    pub const QUERY_TTL: Duration = Duration::from_secs(300);
    pub const STATS_TTL: Duration = Duration::from_secs(60);

    pub fn ttl(&self) -> Duration {
        match self {
            CacheKey::RecentLogs { .. } => Self::QUERY_TTL,
            CacheKey::StatsSummary => Self::STATS_TTL,
        }
    }
}

impl Display for CacheKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            CacheKey::RecentLogs { device_id, limit } => {
                write!(f, "logs:{device_id}:{limit}")
            }
            CacheKey::StatsSummary => write!(f, "stats:summary"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recent_logs_key_format() {
        let k = CacheKey::RecentLogs {
            device_id: "d1".into(),
            limit: 10,
        };
        assert_eq!(k.to_string(), "logs:d1:10");
        assert_eq!(k.ttl(), Duration::from_secs(300));
    }

    #[test]
    fn stats_key_format() {
        assert_eq!(CacheKey::StatsSummary.to_string(), "stats:summary");
        assert_eq!(CacheKey::StatsSummary.ttl(), Duration::from_secs(60));
    }
}
