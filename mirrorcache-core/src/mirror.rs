use serde::{Deserialize, Serialize};

/// Lifecycle status of a mirror entry. Only `Approved` mirrors participate
/// in cache routing (§4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MirrorStatus {
    Approved,
    Pending,
    Blacklisted,
}

impl MirrorStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MirrorStatus::Approved => "approved",
            MirrorStatus::Pending => "pending",
            MirrorStatus::Blacklisted => "blacklisted",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "approved" => Some(MirrorStatus::Approved),
            "pending" => Some(MirrorStatus::Pending),
            "blacklisted" => Some(MirrorStatus::Blacklisted),
            _ => None,
        }
    }
}

/// A named set of equivalent upstream base URLs, consulted in order for
/// failover (§4.4, §8 property 5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mirror {
    pub name: String,
    pub urls: Vec<String>,
    pub status: MirrorStatus,
}

impl Mirror {
    pub fn new(name: impl Into<String>, urls: Vec<String>, status: MirrorStatus) -> Self {
        Self {
            name: name.into(),
            urls,
            status,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.urls.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_str() {
        for s in [MirrorStatus::Approved, MirrorStatus::Pending, MirrorStatus::Blacklisted] {
            assert_eq!(MirrorStatus::parse(s.as_str()), Some(s));
        }
    }

    #[test]
    fn unknown_status_string_is_none() {
        assert_eq!(MirrorStatus::parse("deleted"), None);
    }

    #[test]
    fn mirror_with_no_urls_is_empty() {
        let m = Mirror::new("ubuntu", vec![], MirrorStatus::Approved);
        assert!(m.is_empty());
    }
}
