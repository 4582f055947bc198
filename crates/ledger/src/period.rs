use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use wardstock_core::{ActorId, Entity, EntityId};

use crate::error::LedgerError;

/// Accounting period identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeriodId(pub EntityId);

impl PeriodId {
    pub fn new(id: EntityId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for PeriodId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Period lifecycle: `Draft -> Open -> Closing -> Closed -> Locked`, with
/// reopening (`Closed -> Open`) permitted only while not yet locked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeriodStatus {
    Draft,
    Open,
    Closing,
    Closed,
    Locked,
}

impl PeriodStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PeriodStatus::Draft => "draft",
            PeriodStatus::Open => "open",
            PeriodStatus::Closing => "closing",
            PeriodStatus::Closed => "closed",
            PeriodStatus::Locked => "locked",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(PeriodStatus::Draft),
            "open" => Some(PeriodStatus::Open),
            "closing" => Some(PeriodStatus::Closing),
            "closed" => Some(PeriodStatus::Closed),
            "locked" => Some(PeriodStatus::Locked),
            _ => None,
        }
    }
}

impl core::fmt::Display for PeriodStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A non-overlapping date window gating which ledger entries may still be
/// created or modified.
///
/// Closing a period bulk-locks every entry posted within it; locking makes
/// the close permanent. Both date bounds are inclusive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountingPeriod {
    id: PeriodId,
    name: String,
    start: NaiveDate,
    end: NaiveDate,
    status: PeriodStatus,
    closed_at: Option<DateTime<Utc>>,
    closed_by: Option<ActorId>,
}

impl AccountingPeriod {
    pub fn new(
        id: PeriodId,
        name: impl Into<String>,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Self, LedgerError> {
        if start > end {
            return Err(LedgerError::InvalidPeriodRange { start, end });
        }
        Ok(Self {
            id,
            name: name.into(),
            start,
            end,
            status: PeriodStatus::Draft,
            closed_at: None,
            closed_by: None,
        })
    }

    /// Rehydrate from storage.
    pub fn from_stored(
        id: PeriodId,
        name: String,
        start: NaiveDate,
        end: NaiveDate,
        status: PeriodStatus,
        closed_at: Option<DateTime<Utc>>,
        closed_by: Option<ActorId>,
    ) -> Self {
        Self {
            id,
            name,
            start,
            end,
            status,
            closed_at,
            closed_by,
        }
    }

    pub fn id_typed(&self) -> PeriodId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn end(&self) -> NaiveDate {
        self.end
    }

    pub fn status(&self) -> PeriodStatus {
        self.status
    }

    pub fn closed_at(&self) -> Option<DateTime<Utc>> {
        self.closed_at
    }

    pub fn closed_by(&self) -> Option<ActorId> {
        self.closed_by
    }

    fn transition_error(&self, to: PeriodStatus) -> LedgerError {
        LedgerError::InvalidTransition {
            from: self.status,
            to,
        }
    }

    /// Make a drafted period available for posting.
    pub fn open(&mut self) -> Result<(), LedgerError> {
        match self.status {
            PeriodStatus::Draft => {
                self.status = PeriodStatus::Open;
                Ok(())
            }
            _ => Err(self.transition_error(PeriodStatus::Open)),
        }
    }

    /// Stage a close. Posting is still allowed while closing runs.
    pub fn begin_closing(&mut self) -> Result<(), LedgerError> {
        match self.status {
            PeriodStatus::Open => {
                self.status = PeriodStatus::Closing;
                Ok(())
            }
            _ => Err(self.transition_error(PeriodStatus::Closing)),
        }
    }

    /// Close the period, stamping who and when.
    ///
    /// The storage layer pairs this with the bulk entry lock in one
    /// transaction; the state change alone does not touch entries.
    pub fn close(&mut self, actor: ActorId, at: DateTime<Utc>) -> Result<(), LedgerError> {
        match self.status {
            PeriodStatus::Open | PeriodStatus::Closing => {
                self.status = PeriodStatus::Closed;
                self.closed_at = Some(at);
                self.closed_by = Some(actor);
                Ok(())
            }
            _ => Err(self.transition_error(PeriodStatus::Closed)),
        }
    }

    /// Undo a close. Forbidden once locked.
    pub fn reopen(&mut self) -> Result<(), LedgerError> {
        match self.status {
            PeriodStatus::Closed => {
                self.status = PeriodStatus::Open;
                self.closed_at = None;
                self.closed_by = None;
                Ok(())
            }
            _ => Err(self.transition_error(PeriodStatus::Open)),
        }
    }

    /// Permanently lock a closed period. There is no way back.
    pub fn lock_permanently(&mut self) -> Result<(), LedgerError> {
        match self.status {
            PeriodStatus::Closed => {
                self.status = PeriodStatus::Locked;
                Ok(())
            }
            _ => Err(self.transition_error(PeriodStatus::Locked)),
        }
    }

    /// Whether new entries may be posted into this period.
    pub fn allows_posting(&self) -> bool {
        matches!(self.status, PeriodStatus::Open | PeriodStatus::Closing)
    }

    /// Inclusive containment check.
    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }

    pub fn overlaps(&self, other: &AccountingPeriod) -> bool {
        self.start <= other.end && other.start <= self.end
    }

    /// Validate this period against every already-persisted period.
    pub fn ensure_no_overlap<'a>(
        &self,
        existing: impl IntoIterator<Item = &'a AccountingPeriod>,
    ) -> Result<(), LedgerError> {
        for other in existing {
            if other.id != self.id && self.overlaps(other) {
                return Err(LedgerError::OverlappingPeriod {
                    candidate: self.name.clone(),
                    existing: other.name.clone(),
                });
            }
        }
        Ok(())
    }

    /// Resolve the period owning a transaction date, if any.
    pub fn resolve_for_date<'a>(
        periods: &'a [AccountingPeriod],
        date: NaiveDate,
    ) -> Option<&'a AccountingPeriod> {
        periods.iter().find(|p| p.contains(date))
    }
}

impl Entity for AccountingPeriod {
    type Id = PeriodId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn march() -> AccountingPeriod {
        AccountingPeriod::new(
            PeriodId::new(EntityId::new()),
            "2026-03",
            date(2026, 3, 1),
            date(2026, 3, 31),
        )
        .unwrap()
    }

    #[test]
    fn inverted_range_is_rejected() {
        let err = AccountingPeriod::new(
            PeriodId::new(EntityId::new()),
            "bad",
            date(2026, 4, 1),
            date(2026, 3, 1),
        )
        .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidPeriodRange { .. }));
    }

    #[test]
    fn lifecycle_happy_path() {
        let mut p = march();
        assert!(!p.allows_posting());

        p.open().unwrap();
        assert!(p.allows_posting());

        p.begin_closing().unwrap();
        assert!(p.allows_posting());

        let actor = ActorId::new();
        p.close(actor, Utc::now()).unwrap();
        assert!(!p.allows_posting());
        assert_eq!(p.closed_by(), Some(actor));

        p.lock_permanently().unwrap();
        assert_eq!(p.status(), PeriodStatus::Locked);
    }

    #[test]
    fn closing_twice_is_an_invalid_transition() {
        let mut p = march();
        p.open().unwrap();
        p.close(ActorId::new(), Utc::now()).unwrap();

        let err = p.close(ActorId::new(), Utc::now()).unwrap_err();
        assert_eq!(
            err,
            LedgerError::InvalidTransition {
                from: PeriodStatus::Closed,
                to: PeriodStatus::Closed,
            }
        );
    }

    #[test]
    fn reopen_clears_the_close_stamp_but_not_after_locking() {
        let mut p = march();
        p.open().unwrap();
        p.close(ActorId::new(), Utc::now()).unwrap();

        p.reopen().unwrap();
        assert_eq!(p.status(), PeriodStatus::Open);
        assert_eq!(p.closed_at(), None);
        assert_eq!(p.closed_by(), None);

        p.close(ActorId::new(), Utc::now()).unwrap();
        p.lock_permanently().unwrap();
        let err = p.reopen().unwrap_err();
        assert_eq!(
            err,
            LedgerError::InvalidTransition {
                from: PeriodStatus::Locked,
                to: PeriodStatus::Open,
            }
        );
    }

    #[test]
    fn overlap_detection_is_inclusive() {
        let march = march();
        let touching = AccountingPeriod::new(
            PeriodId::new(EntityId::new()),
            "2026-03b",
            date(2026, 3, 31),
            date(2026, 4, 30),
        )
        .unwrap();
        let april = AccountingPeriod::new(
            PeriodId::new(EntityId::new()),
            "2026-04",
            date(2026, 4, 1),
            date(2026, 4, 30),
        )
        .unwrap();

        assert!(march.overlaps(&touching));
        assert!(!march.overlaps(&april));

        let err = touching.ensure_no_overlap([&march]).unwrap_err();
        assert!(matches!(err, LedgerError::OverlappingPeriod { .. }));
        april.ensure_no_overlap([&march]).unwrap();
    }

    #[test]
    fn resolution_by_date_containment() {
        let mut p = march();
        p.open().unwrap();
        let periods = vec![p];

        let hit = AccountingPeriod::resolve_for_date(&periods, date(2026, 3, 15));
        assert!(hit.is_some());
        assert!(AccountingPeriod::resolve_for_date(&periods, date(2026, 4, 2)).is_none());
    }
}
