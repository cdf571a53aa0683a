use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::CollisionReport;

/// Server-wide answer to waivable collisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AllowCollision {
    /// Waivable problems are ignored.
    Allow,
    /// Waivable problems go to the approval queue when the request allows it.
    #[default]
    Approve,
    /// Any problem rejects the request.
    Deny,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Commit,
    QueueForApproval,
    Reject,
}

impl AllowCollision {
    /// A clean report always commits and a fatal entry always rejects; the
    /// policy only decides what happens to waivable problems.
    pub fn decide(self, report: &CollisionReport, allow_approve: bool) -> Decision {
        if !report.has_collisions() {
            return Decision::Commit;
        }
        if !report.allow_approve() {
            return Decision::Reject;
        }
        match self {
            AllowCollision::Allow => Decision::Commit,
            AllowCollision::Approve if allow_approve => Decision::QueueForApproval,
            AllowCollision::Approve | AllowCollision::Deny => Decision::Reject,
        }
    }
}

impl FromStr for AllowCollision {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "allow" => Ok(AllowCollision::Allow),
            "approve" => Ok(AllowCollision::Approve),
            "deny" => Ok(AllowCollision::Deny),
            other => Err(format!(
                "allow_collision must be allow, approve or deny, got '{}'",
                other
            )),
        }
    }
}

impl fmt::Display for AllowCollision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AllowCollision::Allow => "allow",
            AllowCollision::Approve => "approve",
            AllowCollision::Deny => "deny",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collisions::{CollisionsEntry, LandError};

    fn report(errors: &[LandError]) -> CollisionReport {
        CollisionReport {
            entries: errors.iter().map(|e| CollisionsEntry::new(*e)).collect(),
            price: 0.0,
        }
    }

    #[test]
    fn clean_report_commits_under_every_policy() {
        for policy in [AllowCollision::Allow, AllowCollision::Approve, AllowCollision::Deny] {
            assert_eq!(policy.decide(&report(&[]), false), Decision::Commit);
        }
    }

    #[test]
    fn fatal_entries_always_reject() {
        let fatal = report(&[LandError::Collision, LandError::HasChildren]);
        for policy in [AllowCollision::Allow, AllowCollision::Approve, AllowCollision::Deny] {
            assert_eq!(policy.decide(&fatal, true), Decision::Reject);
        }
    }

    #[test]
    fn waivable_entries_follow_policy() {
        let waivable = report(&[LandError::Collision, LandError::OutOfParent]);
        assert_eq!(AllowCollision::Allow.decide(&waivable, false), Decision::Commit);
        assert_eq!(
            AllowCollision::Approve.decide(&waivable, true),
            Decision::QueueForApproval
        );
        assert_eq!(AllowCollision::Approve.decide(&waivable, false), Decision::Reject);
        assert_eq!(AllowCollision::Deny.decide(&waivable, true), Decision::Reject);
    }

    #[test]
    fn parses_config_names() {
        assert_eq!("DENY".parse::<AllowCollision>(), Ok(AllowCollision::Deny));
        assert!("maybe".parse::<AllowCollision>().is_err());
    }
}
