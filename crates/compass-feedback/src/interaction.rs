//! User interactions and the per-subject counters they feed.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What a user did with a subject (an offer, a notification, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionKind {
    Sent,
    Viewed,
    Clicked,
    Converted,
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interaction {
    pub subject_id: String,
    pub user_id: String,
    pub kind: InteractionKind,
    pub at: DateTime<Utc>,
}

impl Interaction {
    pub fn new(
        subject_id: impl Into<String>,
        user_id: impl Into<String>,
        kind: InteractionKind,
    ) -> Self {
        Self {
            subject_id: subject_id.into(),
            user_id: user_id.into(),
            kind,
            at: Utc::now(),
        }
    }
}

/// Counters for one subject.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InteractionMetric {
    pub subject_id: String,
    pub sent: u64,
    pub viewed: u64,
    pub clicked: u64,
    pub converted: u64,
    pub rejected: u64,
    pub distinct_users: BTreeSet<String>,
}

impl InteractionMetric {
    pub fn new(subject_id: impl Into<String>) -> Self {
        Self { subject_id: subject_id.into(), ..Self::default() }
    }

    /// Increment exactly one counter and remember the user.
    pub fn record(&mut self, interaction: &Interaction) {
        let counter = match interaction.kind {
            InteractionKind::Sent => &mut self.sent,
            InteractionKind::Viewed => &mut self.viewed,
            InteractionKind::Clicked => &mut self.clicked,
            InteractionKind::Converted => &mut self.converted,
            InteractionKind::Rejected => &mut self.rejected,
        };
        *counter += 1;
        self.distinct_users.insert(interaction.user_id.clone());
    }

    pub fn total(&self) -> u64 {
        self.sent + self.viewed + self.clicked + self.converted + self.rejected
    }

    /// `clicked / sent`, or `None` before anything was sent.
    pub fn click_rate(&self) -> Option<f64> {
        (self.sent > 0).then(|| self.clicked as f64 / self.sent as f64)
    }

    /// `converted / max(clicked, 1)`.
    pub fn conversion_rate(&self) -> f64 {
        self.converted as f64 / self.clicked.max(1) as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn each_interaction_bumps_one_counter() {
        let mut metric = InteractionMetric::new("offer-lisbon");
        for kind in [
            InteractionKind::Sent,
            InteractionKind::Sent,
            InteractionKind::Clicked,
            InteractionKind::Converted,
        ] {
            metric.record(&Interaction::new("offer-lisbon", "u1", kind));
        }
        metric.record(&Interaction::new("offer-lisbon", "u2", InteractionKind::Rejected));

        assert_eq!(metric.sent, 2);
        assert_eq!(metric.clicked, 1);
        assert_eq!(metric.converted, 1);
        assert_eq!(metric.rejected, 1);
        assert_eq!(metric.viewed, 0);
        assert_eq!(metric.total(), 5);
        assert_eq!(metric.distinct_users.len(), 2);
    }

    #[test]
    fn rates_guard_against_empty_denominators() {
        let mut metric = InteractionMetric::new("offer");
        assert_eq!(metric.click_rate(), None);
        assert_eq!(metric.conversion_rate(), 0.0);

        metric.record(&Interaction::new("offer", "u1", InteractionKind::Converted));
        assert_eq!(metric.conversion_rate(), 1.0);

        metric.record(&Interaction::new("offer", "u1", InteractionKind::Sent));
        metric.record(&Interaction::new("offer", "u2", InteractionKind::Sent));
        metric.record(&Interaction::new("offer", "u2", InteractionKind::Clicked));
        assert_eq!(metric.click_rate(), Some(0.5));
    }
}
