use std::fmt::{Display, Formatter};
use std::sync::OnceLock;

use anyhow::ensure;
use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};

/// Application version advertised to peers. Compared lexicographically per
/// dotted segment, numeric segments by value.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Encode, Decode, Serialize, Deserialize)]
pub struct AppVersion {
    pub version: String,
}

impl AppVersion {
    pub fn new(version: impl Into<String>) -> anyhow::Result<Self> {
        let version = version.into();
        ensure!(!version.is_empty(), "app version must not be empty");
        ensure!(
            !version.chars().any(char::is_whitespace),
            "app version must not contain whitespace"
        );
        Ok(Self { version })
    }

    pub fn zero() -> &'static AppVersion {
        static ZERO: OnceLock<AppVersion> = OnceLock::new();
        ZERO.get_or_init(|| AppVersion {
            version: "0.0.0".to_string(),
        })
    }

    fn segments(&self) -> impl Iterator<Item = &str> {
        self.version.split('.')
    }
}

impl PartialOrd for AppVersion {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for AppVersion {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        let mut this = self.segments();
        let mut that = other.segments();
        loop {
            match (this.next(), that.next()) {
                (None, None) => return std::cmp::Ordering::Equal,
                (None, Some(_)) => return std::cmp::Ordering::Less,
                (Some(_), None) => return std::cmp::Ordering::Greater,
                (Some(a), Some(b)) => {
                    let ordering = match (a.parse::<u64>(), b.parse::<u64>()) {
                        (Ok(a), Ok(b)) => a.cmp(&b),
                        _ => a.cmp(b),
                    };
                    if ordering != std::cmp::Ordering::Equal {
                        return ordering;
                    }
                }
            }
        }
    }
}

impl Display for AppVersion {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.version)
    }
}
