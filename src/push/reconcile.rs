// src/push/reconcile.rs

//! End-of-night comparison of what was observed with what arrived remotely.

use std::collections::HashSet;
use std::path::Path;

use crate::reduce::exposure_number;

/// Result of comparing local exposures against the remote listing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Reconciliation {
    /// Local exposures not found remotely and above `exp_min`, newest first.
    pub missing: Vec<String>,
    /// Local exposures considered.
    pub total: usize,
    /// Local exposures absent remotely, before the `exp_min` cut.
    pub absent: usize,
}

impl Reconciliation {
    /// Share of local exposures already delivered, in percent.
    pub fn percent_sent(&self) -> f64 {
        if self.total == 0 {
            100.0
        } else {
            100.0 * (self.total - self.absent) as f64 / self.total as f64
        }
    }
}

/// `missing = local - sent` by root name, keeping exposures numbered above
/// `exp_min`, newest first. Roots without an exposure number are kept.
pub fn reconcile(local: &[String], sent: &[String], exp_min: i64) -> Reconciliation {
    let sent: HashSet<&str> = sent.iter().map(String::as_str).collect();
    let mut local: Vec<&String> = local.iter().collect();
    local.sort();
    local.dedup();

    let absent: Vec<&String> = local
        .iter()
        .copied()
        .filter(|root| !sent.contains(root.as_str()))
        .collect();

    let mut missing: Vec<String> = absent
        .iter()
        .filter(|root| exposure_number(root).is_none_or(|n| n > exp_min))
        .map(|root| root.to_string())
        .collect();
    missing.sort_by(|a, b| b.cmp(a));

    Reconciliation {
        missing,
        total: local.len(),
        absent: absent.len(),
    }
}

/// Tarball stems from an `ls` of the remote target directory.
pub fn parse_remote_listing(listing: &str) -> Vec<String> {
    listing
        .lines()
        .map(str::trim)
        .filter(|l| l.ends_with(".tar"))
        .filter_map(|l| Path::new(l).file_stem())
        .map(|s| s.to_string_lossy().into_owned())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roots(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn missing_is_local_minus_sent_newest_first() {
        let r = reconcile(
            &roots(&["DECam_00912340", "DECam_00912342", "DECam_00912341"]),
            &roots(&["DECam_00912341"]),
            -1,
        );
        assert_eq!(r.missing, roots(&["DECam_00912342", "DECam_00912340"]));
        assert_eq!(r.total, 3);
        assert_eq!(r.absent, 2);
        assert!((r.percent_sent() - 100.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn exp_min_drops_older_exposures() {
        let r = reconcile(
            &roots(&["DECam_00912340", "DECam_00912342"]),
            &[],
            912340,
        );
        assert_eq!(r.missing, roots(&["DECam_00912342"]));
        assert_eq!(r.absent, 2);
    }

    #[test]
    fn nothing_local_is_fully_sent() {
        let r = reconcile(&[], &roots(&["DECam_1"]), -1);
        assert!(r.missing.is_empty());
        assert_eq!(r.percent_sent(), 100.0);
    }

    #[test]
    fn listing_keeps_tar_stems_only() {
        let listing = "DECam_00912340.tar\nnotes.txt\n/remote/DECam_00912341.tar\n\n";
        assert_eq!(
            parse_remote_listing(listing),
            roots(&["DECam_00912340", "DECam_00912341"])
        );
    }
}
