//! Snapshot checksum verdicts

use std::fmt;

/// Checksum one host reported for a snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostChecksum {
    pub host: String,
    pub checksum: String,
}

/// Outcome of comparing a snapshot's checksum across etcd hosts
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChecksumVerdict {
    /// Every host reported the same checksum
    Consistent { checksum: String },
    /// At least one host disagrees; every host's value is listed
    Divergent { checksums: Vec<HostChecksum> },
    /// A host could not produce a checksum
    Unavailable { host: String, reason: String },
    /// No etcd hosts to compare
    NoHosts,
}

impl ChecksumVerdict {
    /// Judge a complete set of per-host checksums
    pub fn from_checksums(checksums: Vec<HostChecksum>) -> Self {
        let Some(first) = checksums.first() else {
            return ChecksumVerdict::NoHosts;
        };
        if checksums.iter().all(|c| c.checksum == first.checksum) {
            ChecksumVerdict::Consistent {
                checksum: first.checksum.clone(),
            }
        } else {
            ChecksumVerdict::Divergent { checksums }
        }
    }

    pub fn is_consistent(&self) -> bool {
        matches!(self, ChecksumVerdict::Consistent { .. })
    }
}

impl fmt::Display for ChecksumVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChecksumVerdict::Consistent { checksum } => {
                write!(f, "all hosts report checksum [{checksum}]")
            }
            ChecksumVerdict::Divergent { checksums } => {
                let listed = checksums
                    .iter()
                    .map(|c| format!("[{}]={}", c.host, c.checksum))
                    .collect::<Vec<_>>()
                    .join(", ");
                write!(f, "checksums differ: {listed}")
            }
            ChecksumVerdict::Unavailable { host, reason } => {
                write!(f, "no checksum from host [{host}]: {reason}")
            }
            ChecksumVerdict::NoHosts => write!(f, "no etcd hosts to compare"),
        }
    }
}

/// First field of `sha256sum` output
pub fn parse_checksum(output: &str) -> Option<String> {
    output.split_whitespace().next().map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sums(values: &[(&str, &str)]) -> Vec<HostChecksum> {
        values
            .iter()
            .map(|(host, checksum)| HostChecksum {
                host: host.to_string(),
                checksum: checksum.to_string(),
            })
            .collect()
    }

    #[test]
    fn identical_checksums_are_consistent() {
        let verdict =
            ChecksumVerdict::from_checksums(sums(&[("A", "abc123"), ("B", "abc123"), ("C", "abc123")]));
        assert_eq!(
            verdict,
            ChecksumVerdict::Consistent {
                checksum: "abc123".to_string()
            }
        );
    }

    #[test]
    fn one_divergent_value_lists_every_host() {
        let verdict =
            ChecksumVerdict::from_checksums(sums(&[("A", "abc123"), ("B", "xyz999"), ("C", "abc123")]));
        assert!(!verdict.is_consistent());
        let text = verdict.to_string();
        assert!(text.contains("[A]=abc123"));
        assert!(text.contains("[B]=xyz999"));
        assert!(text.contains("[C]=abc123"));
    }

    #[test]
    fn empty_set_is_never_consistent() {
        assert_eq!(ChecksumVerdict::from_checksums(Vec::new()), ChecksumVerdict::NoHosts);
        assert!(!ChecksumVerdict::NoHosts.is_consistent());
    }

    #[test]
    fn parses_sha256sum_output() {
        assert_eq!(
            parse_checksum("abc123  /var/lib/etcd/snapshots/pre-upgrade\n").as_deref(),
            Some("abc123")
        );
        assert_eq!(parse_checksum("  \n"), None);
    }
}
