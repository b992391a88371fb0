//! Paid promotion state machine for directory listings.
//!
//! `NotPromoted -> Promoted(tier, started_at, expires_at)` via [`Promotion::promote`],
//! and back via [`Promotion::expire`]. Engagement counters only ever grow; they are
//! reset when a promotion is (re-)initiated and survive expiry as history.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use shopfront_core::{DomainError, ListingId};

/// Validation failures for promotion requests and rows.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PromotionError {
    #[error("invalid promotion tier: {0:?} (expected basic, premium or featured)")]
    InvalidTier(String),

    #[error("promotion duration must be positive")]
    InvalidDuration,

    #[error("invalid promotion record: {0}")]
    InvalidRecord(String),
}

impl From<PromotionError> for DomainError {
    fn from(err: PromotionError) -> Self {
        DomainError::validation(err.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromotionTier {
    Basic,
    Premium,
    Featured,
}

impl PromotionTier {
    pub const ALL: [PromotionTier; 3] = [Self::Basic, Self::Premium, Self::Featured];

    pub fn parse(raw: &str) -> Result<Self, PromotionError> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "basic" => Ok(Self::Basic),
            "premium" => Ok(Self::Premium),
            "featured" => Ok(Self::Featured),
            _ => Err(PromotionError::InvalidTier(raw.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Basic => "basic",
            Self::Premium => "premium",
            Self::Featured => "featured",
        }
    }

    /// Placement weight; higher sorts first in the directory.
    pub fn rank(&self) -> u8 {
        match self {
            Self::Basic => 1,
            Self::Premium => 2,
            Self::Featured => 3,
        }
    }
}

impl core::str::FromStr for PromotionTier {
    type Err = PromotionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl core::fmt::Display for PromotionTier {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromotionState {
    NotPromoted,
    Promoted {
        tier: PromotionTier,
        started_at: DateTime<Utc>,
        /// Open-ended when `None`; such promotions never expire through the sweep.
        expires_at: Option<DateTime<Utc>>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngagementCounter {
    Impressions,
    Clicks,
}

/// Promotion state of one listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "PromotionRecord", into = "PromotionRecord")]
pub struct Promotion {
    listing_id: ListingId,
    state: PromotionState,
    impressions: u64,
    clicks: u64,
}

impl Promotion {
    /// A listing that has never been promoted.
    pub fn new(listing_id: ListingId) -> Self {
        Self {
            listing_id,
            state: PromotionState::NotPromoted,
            impressions: 0,
            clicks: 0,
        }
    }

    pub fn listing_id(&self) -> ListingId {
        self.listing_id
    }

    pub fn state(&self) -> PromotionState {
        self.state
    }

    pub fn is_promoted(&self) -> bool {
        matches!(self.state, PromotionState::Promoted { .. })
    }

    pub fn tier(&self) -> Option<PromotionTier> {
        match self.state {
            PromotionState::Promoted { tier, .. } => Some(tier),
            PromotionState::NotPromoted => None,
        }
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        match self.state {
            PromotionState::Promoted { expires_at, .. } => expires_at,
            PromotionState::NotPromoted => None,
        }
    }

    pub fn impressions(&self) -> u64 {
        self.impressions
    }

    pub fn clicks(&self) -> u64 {
        self.clicks
    }

    /// Start (or restart) a promotion window of `duration` from `now`.
    ///
    /// Counters are reset; any running promotion is replaced.
    pub fn promote(
        &mut self,
        tier: PromotionTier,
        duration: Duration,
        now: DateTime<Utc>,
    ) -> Result<(), PromotionError> {
        if duration <= Duration::zero() {
            return Err(PromotionError::InvalidDuration);
        }
        let expires_at = now
            .checked_add_signed(duration)
            .ok_or(PromotionError::InvalidDuration)?;

        self.state = PromotionState::Promoted {
            tier,
            started_at: now,
            expires_at: Some(expires_at),
        };
        self.impressions = 0;
        self.clicks = 0;
        Ok(())
    }

    /// Increment a counter. Returns `false` (and changes nothing) when not promoted.
    pub fn record(&mut self, counter: EngagementCounter) -> bool {
        if !self.is_promoted() {
            return false;
        }
        match counter {
            EngagementCounter::Impressions => self.impressions = self.impressions.saturating_add(1),
            EngagementCounter::Clicks => self.clicks = self.clicks.saturating_add(1),
        }
        true
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        matches!(self.state, PromotionState::Promoted { expires_at: Some(at), .. } if at <= now)
    }

    /// Clear an expired promotion. Counters stay as the historical record.
    ///
    /// Returns `true` if the listing transitioned to `NotPromoted`.
    pub fn expire(&mut self, now: DateTime<Utc>) -> bool {
        if !self.is_expired_at(now) {
            return false;
        }
        self.state = PromotionState::NotPromoted;
        true
    }
}

/// Flat row shape of a promotion, used at persistence and serialization boundaries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromotionRecord {
    pub listing_id: ListingId,
    pub is_promoted: bool,
    pub tier: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub impressions: i64,
    pub clicks: i64,
}

impl TryFrom<PromotionRecord> for Promotion {
    type Error = PromotionError;

    fn try_from(row: PromotionRecord) -> Result<Self, Self::Error> {
        let counter = |value: i64, name: &str| {
            u64::try_from(value)
                .map_err(|_| PromotionError::InvalidRecord(format!("{name} is negative: {value}")))
        };
        let impressions = counter(row.impressions, "impressions")?;
        let clicks = counter(row.clicks, "clicks")?;

        let state = match (row.is_promoted, row.tier.as_deref(), row.started_at) {
            (true, Some(tier), Some(started_at)) => {
                let tier = PromotionTier::parse(tier)?;
                if let Some(expires_at) = row.expires_at {
                    if expires_at < started_at {
                        return Err(PromotionError::InvalidRecord(
                            "expires_at precedes started_at".to_string(),
                        ));
                    }
                }
                PromotionState::Promoted {
                    tier,
                    started_at,
                    expires_at: row.expires_at,
                }
            }
            (false, None, _) => PromotionState::NotPromoted,
            (true, _, _) => {
                return Err(PromotionError::InvalidRecord(
                    "promoted row is missing tier or started_at".to_string(),
                ));
            }
            (false, Some(_), _) => {
                return Err(PromotionError::InvalidRecord(
                    "row carries a tier but is not promoted".to_string(),
                ));
            }
        };

        Ok(Self {
            listing_id: row.listing_id,
            state,
            impressions,
            clicks,
        })
    }
}

impl From<Promotion> for PromotionRecord {
    fn from(p: Promotion) -> Self {
        let (is_promoted, tier, started_at, expires_at) = match p.state {
            PromotionState::Promoted {
                tier,
                started_at,
                expires_at,
            } => (true, Some(tier.as_str().to_string()), Some(started_at), expires_at),
            PromotionState::NotPromoted => (false, None, None, None),
        };
        Self {
            listing_id: p.listing_id,
            is_promoted,
            tier,
            started_at,
            expires_at,
            impressions: i64::try_from(p.impressions).unwrap_or(i64::MAX),
            clicks: i64::try_from(p.clicks).unwrap_or(i64::MAX),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap()
    }

    #[test]
    fn tier_parsing_accepts_only_known_tiers() {
        assert_eq!(PromotionTier::parse("Premium").unwrap(), PromotionTier::Premium);
        assert_eq!(" featured ".parse::<PromotionTier>().unwrap(), PromotionTier::Featured);
        assert_eq!(
            PromotionTier::parse("platinum"),
            Err(PromotionError::InvalidTier("platinum".to_string()))
        );
    }

    #[test]
    fn promote_sets_window_and_resets_counters() {
        let mut p = Promotion::new(ListingId::new());
        p.promote(PromotionTier::Basic, Duration::days(7), t0()).unwrap();
        p.record(EngagementCounter::Impressions);
        p.record(EngagementCounter::Clicks);

        p.promote(PromotionTier::Featured, Duration::days(30), t0() + Duration::days(1))
            .unwrap();

        assert_eq!(p.tier(), Some(PromotionTier::Featured));
        assert_eq!(p.expires_at(), Some(t0() + Duration::days(31)));
        assert_eq!(p.impressions(), 0);
        assert_eq!(p.clicks(), 0);
    }

    #[test]
    fn non_positive_duration_is_rejected_without_change() {
        let mut p = Promotion::new(ListingId::new());
        assert_eq!(
            p.promote(PromotionTier::Basic, Duration::zero(), t0()),
            Err(PromotionError::InvalidDuration)
        );
        assert_eq!(
            p.promote(PromotionTier::Basic, Duration::seconds(-5), t0()),
            Err(PromotionError::InvalidDuration)
        );
        assert!(!p.is_promoted());
    }

    #[test]
    fn counters_ignore_unpromoted_listing() {
        let mut p = Promotion::new(ListingId::new());
        assert!(!p.record(EngagementCounter::Impressions));
        assert_eq!(p.impressions(), 0);
    }

    #[test]
    fn expiry_clears_state_and_keeps_counters() {
        let mut p = Promotion::new(ListingId::new());
        p.promote(PromotionTier::Premium, Duration::hours(1), t0()).unwrap();
        p.record(EngagementCounter::Impressions);
        p.record(EngagementCounter::Impressions);
        p.record(EngagementCounter::Clicks);

        assert!(!p.expire(t0() + Duration::minutes(59)));
        assert!(p.is_promoted());

        assert!(p.expire(t0() + Duration::hours(1)));
        assert!(!p.is_promoted());
        assert_eq!(p.tier(), None);
        assert_eq!(p.impressions(), 2);
        assert_eq!(p.clicks(), 1);

        // After expiry counters are frozen.
        assert!(!p.record(EngagementCounter::Clicks));
        assert_eq!(p.clicks(), 1);
    }

    #[test]
    fn record_roundtrip_preserves_state() {
        let mut p = Promotion::new(ListingId::new());
        p.promote(PromotionTier::Premium, Duration::days(2), t0()).unwrap();
        p.record(EngagementCounter::Clicks);

        let row = PromotionRecord::from(p.clone());
        assert!(row.is_promoted);
        assert_eq!(row.tier.as_deref(), Some("premium"));
        assert_eq!(Promotion::try_from(row).unwrap(), p);
    }

    #[test]
    fn inconsistent_rows_are_rejected() {
        let listing_id = ListingId::new();
        let base = PromotionRecord {
            listing_id,
            is_promoted: true,
            tier: None,
            started_at: Some(t0()),
            expires_at: None,
            impressions: 0,
            clicks: 0,
        };
        assert!(Promotion::try_from(base.clone()).is_err());

        let backwards = PromotionRecord {
            tier: Some("basic".to_string()),
            expires_at: Some(t0() - Duration::hours(1)),
            ..base.clone()
        };
        assert!(Promotion::try_from(backwards).is_err());

        let negative = PromotionRecord {
            is_promoted: false,
            tier: None,
            started_at: None,
            impressions: -1,
            ..base
        };
        assert!(Promotion::try_from(negative).is_err());
    }

    #[test]
    fn serializes_as_flat_record() {
        let mut p = Promotion::new(ListingId::new());
        p.promote(PromotionTier::Basic, Duration::hours(4), t0()).unwrap();

        let json = serde_json::to_value(&p).unwrap();
        assert_eq!(json["is_promoted"], true);
        assert_eq!(json["tier"], "basic");

        let back: Promotion = serde_json::from_value(json).unwrap();
        assert_eq!(back, p);
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        #[derive(Debug, Clone)]
        enum Op {
            Promote(u8, i64),
            Impression,
            Click,
            Advance(i64),
        }

        fn op_strategy() -> impl Strategy<Value = Op> {
            prop_oneof![
                (0u8..3, 1i64..10_000).prop_map(|(t, mins)| Op::Promote(t, mins)),
                Just(Op::Impression),
                Just(Op::Click),
                (0i64..20_000).prop_map(Op::Advance),
            ]
        }

        proptest! {
            #![proptest_config(ProptestConfig {
                cases: 256,
                ..ProptestConfig::default()
            })]

            /// Property: counters only decrease through a re-promotion, and the
            /// promoted flag always agrees with the presence of a tier.
            #[test]
            fn counters_monotonic_between_promotions(ops in prop::collection::vec(op_strategy(), 0..40)) {
                let mut p = Promotion::new(ListingId::new());
                let mut now = t0();

                for op in ops {
                    let before = (p.impressions(), p.clicks());
                    let repromoted = matches!(op, Op::Promote(..));
                    match op {
                        Op::Promote(t, mins) => {
                            p.promote(PromotionTier::ALL[t as usize], Duration::minutes(mins), now).unwrap();
                        }
                        Op::Impression => { p.record(EngagementCounter::Impressions); }
                        Op::Click => { p.record(EngagementCounter::Clicks); }
                        Op::Advance(mins) => {
                            now += Duration::minutes(mins);
                            p.expire(now);
                        }
                    }
                    if !repromoted {
                        prop_assert!(p.impressions() >= before.0);
                        prop_assert!(p.clicks() >= before.1);
                    }
                    prop_assert_eq!(p.is_promoted(), p.tier().is_some());
                }
            }
        }
    }
}
