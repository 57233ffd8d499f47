use chrono::{DateTime, Datelike, Duration, Timelike, Utc};
use std::path::{Path, PathBuf};

/// Hour-resolution key used to scope an incremental run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeBucket {
    pub year: i32,
    pub month: u32,
    pub day: u32,
    pub hour: u32,
}

impl TimeBucket {
    pub fn from_datetime(at: DateTime<Utc>) -> Self {
        Self {
            year: at.year(),
            month: at.month(),
            day: at.day(),
            hour: at.hour(),
        }
    }

    /// The bucket containing `now` followed by the `hours - 1` buckets before it.
    pub fn recent(now: DateTime<Utc>, hours: u32) -> Vec<Self> {
        (0..hours)
            .map(|i| Self::from_datetime(now - Duration::hours(i64::from(i))))
            .collect()
    }

    /// Sortable label, e.g. `2024-01-05-10`.
    pub fn label(&self) -> String {
        format!(
            "{}-{:02}-{:02}-{:02}",
            self.year, self.month, self.day, self.hour
        )
    }
}

/// Builds object-store prefixes and local working directories for one scope.
pub struct PathBuilder {
    base_prefix: String,
    time_bucket: Option<TimeBucket>,
}

impl PathBuilder {
    pub fn new(base_prefix: &str) -> Self {
        Self {
            base_prefix: base_prefix.to_string(),
            time_bucket: None,
        }
    }

    pub fn with_time_bucket(mut self, time_bucket: TimeBucket) -> Self {
        self.time_bucket = Some(time_bucket);
        self
    }

    /// Object key prefix. Hour buckets render as `{base}{year}-{month}/{day}/{hour}/`
    /// with unpadded numbers, which is how the trucks write their keys.
    pub fn build_prefix(&self) -> String {
        let base = if self.base_prefix.is_empty() || self.base_prefix.ends_with('/') {
            self.base_prefix.clone()
        } else {
            format!("{}/", self.base_prefix)
        };

        match self.time_bucket {
            Some(tb) => format!("{}{}-{}/{}/{}/", base, tb.year, tb.month, tb.day, tb.hour),
            None => base,
        }
    }

    /// Scratch directory for this scope under `root`.
    pub fn build_work_dir(&self, root: &Path) -> PathBuf {
        match self.time_bucket {
            Some(tb) => root.join(tb.label()),
            None => root.join(self.base_prefix.trim_matches('/')),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_hour_prefix_is_unpadded() {
        let tb = TimeBucket {
            year: 2024,
            month: 1,
            day: 5,
            hour: 10,
        };
        let prefix = PathBuilder::new("trucks/").with_time_bucket(tb).build_prefix();
        assert_eq!(prefix, "trucks/2024-1/5/10/");

        let prefix = PathBuilder::new("trucks").with_time_bucket(tb).build_prefix();
        assert_eq!(prefix, "trucks/2024-1/5/10/");
    }

    #[test]
    fn test_static_prefix_passes_through() {
        assert_eq!(PathBuilder::new("historical/").build_prefix(), "historical/");
        assert_eq!(
            PathBuilder::new("historical/").build_work_dir(Path::new("data")),
            PathBuf::from("data/historical")
        );
    }

    #[test]
    fn test_recent_buckets_cross_midnight() {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 1, 30, 0).unwrap();
        let buckets = TimeBucket::recent(now, 3);
        let labels: Vec<String> = buckets.iter().map(TimeBucket::label).collect();
        assert_eq!(labels, vec!["2024-03-01-01", "2024-03-01-00", "2024-02-29-23"]);
    }

    #[test]
    fn test_work_dir_uses_bucket_label() {
        let tb = TimeBucket {
            year: 2024,
            month: 11,
            day: 4,
            hour: 9,
        };
        let dir = PathBuilder::new("trucks/")
            .with_time_bucket(tb)
            .build_work_dir(Path::new("data"));
        assert_eq!(dir, PathBuf::from("data/2024-11-04-09"));
    }
}
