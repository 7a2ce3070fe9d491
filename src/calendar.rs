//! Staged holiday/workday edits for one calendar year.
//!
//! A [`PendingChangeSet`] only ever holds genuine deltas against the server
//! baseline, so its length is the "N unsaved changes" count. The baseline is
//! always passed in at call time rather than captured.

use chrono::{Datelike, NaiveDate, Weekday};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum DesiredState {
    Holiday,
    Workday,
}

impl DesiredState {
    fn from_holiday(is_holiday: bool) -> Self {
        if is_holiday {
            DesiredState::Holiday
        } else {
            DesiredState::Workday
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DesiredState::Holiday => "holiday",
            DesiredState::Workday => "workday",
        }
    }

    pub fn is_holiday(self) -> bool {
        self == DesiredState::Holiday
    }
}

const ISO_WEEK: [Weekday; 7] = [
    Weekday::Mon,
    Weekday::Tue,
    Weekday::Wed,
    Weekday::Thu,
    Weekday::Fri,
    Weekday::Sat,
    Weekday::Sun,
];

/// Map an ISO weekday number (1 = Monday .. 7 = Sunday).
pub fn iso_weekday(n: u32) -> Option<Weekday> {
    let idx = usize::try_from(n).ok()?.checked_sub(1)?;
    ISO_WEEK.get(idx).copied()
}

/// Every date of `year` falling on one of `weekdays`, ascending.
pub fn dates_in_year(year: i32, weekdays: &[Weekday]) -> Vec<NaiveDate> {
    let Some(first) = NaiveDate::from_ymd_opt(year, 1, 1) else {
        return Vec::new();
    };
    first
        .iter_days()
        .take_while(|d| d.year() == year)
        .filter(|d| weekdays.contains(&d.weekday()))
        .collect()
}

/// Pending entries partitioned by desired state, sorted ascending.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct CommitBatch {
    pub holiday_dates: Vec<NaiveDate>,
    pub workday_dates: Vec<NaiveDate>,
}

/// Request body for the bulk calendar update endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BulkUpdateRequest {
    pub operation: String,
    pub year: i32,
    pub dates: Vec<NaiveDate>,
    #[serde(rename = "type")]
    pub kind: DesiredState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dealership_id: Option<u64>,
}

impl CommitBatch {
    pub fn is_empty(&self) -> bool {
        self.holiday_dates.is_empty() && self.workday_dates.is_empty()
    }

    /// One `set_dates` request per non-empty partition, holidays first.
    pub fn into_requests(self, year: i32, dealership_id: Option<u64>) -> Vec<BulkUpdateRequest> {
        [
            (DesiredState::Holiday, self.holiday_dates),
            (DesiredState::Workday, self.workday_dates),
        ]
        .into_iter()
        .filter(|(_, dates)| !dates.is_empty())
        .map(|(kind, dates)| BulkUpdateRequest {
            operation: "set_dates".to_string(),
            year,
            dates,
            kind,
            dealership_id,
        })
        .collect()
    }
}

#[derive(Debug, Clone, Default)]
pub struct PendingChangeSet {
    entries: HashMap<NaiveDate, DesiredState>,
}

impl PendingChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Flip the effective state of `date`. A flip back to server truth drops the entry.
    pub fn toggle(&mut self, date: NaiveDate, server_is_holiday: bool) {
        let effective = self
            .entries
            .get(&date)
            .map(|s| s.is_holiday())
            .unwrap_or(server_is_holiday);
        let wanted = !effective;
        if wanted == server_is_holiday {
            self.entries.remove(&date);
        } else {
            self.entries.insert(date, DesiredState::from_holiday(wanted));
        }
    }

    pub fn get(&self, date: NaiveDate) -> Option<DesiredState> {
        self.entries.get(&date).copied()
    }

    /// Server holidays with pending entries overlaid.
    pub fn effective_holiday_set(&self, server: &BTreeSet<NaiveDate>) -> BTreeSet<NaiveDate> {
        let mut out = server.clone();
        for (date, state) in &self.entries {
            match state {
                DesiredState::Holiday => {
                    out.insert(*date);
                }
                DesiredState::Workday => {
                    out.remove(date);
                }
            }
        }
        out
    }

    pub fn bulk_add_weekdays(
        &mut self,
        year: i32,
        weekdays: &[Weekday],
        server: &BTreeSet<NaiveDate>,
    ) {
        self.bulk_add_weekdays_with(year, weekdays, dates_in_year, server)
    }

    /// Stage `Holiday` for every matching date that the server doesn't already mark.
    pub fn bulk_add_weekdays_with<F>(
        &mut self,
        year: i32,
        weekdays: &[Weekday],
        year_dates: F,
        server: &BTreeSet<NaiveDate>,
    ) where
        F: Fn(i32, &[Weekday]) -> Vec<NaiveDate>,
    {
        for date in year_dates(year, weekdays) {
            if !server.contains(&date) {
                self.entries.insert(date, DesiredState::Holiday);
            }
        }
    }

    /// Schedule every holiday, staged or server-known, back to a workday.
    pub fn clear_year(&mut self, server: &BTreeSet<NaiveDate>) {
        self.entries.retain(|_, s| !s.is_holiday());
        for date in server {
            self.entries.insert(*date, DesiredState::Workday);
        }
    }

    /// Partition pending entries. The set is left untouched; clear it once the save succeeds.
    pub fn commit(&self) -> CommitBatch {
        let mut batch = CommitBatch::default();
        for (date, state) in &self.entries {
            match state {
                DesiredState::Holiday => batch.holiday_dates.push(*date),
                DesiredState::Workday => batch.workday_dates.push(*date),
            }
        }
        batch.holiday_dates.sort_unstable();
        batch.workday_dates.sort_unstable();
        batch
    }

    pub fn discard(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_dirty(&self) -> bool {
        !self.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn set(dates: &[&str]) -> BTreeSet<NaiveDate> {
        dates.iter().map(|s| d(s)).collect()
    }

    #[test]
    fn toggle_twice_is_noop() {
        let mut p = PendingChangeSet::new();
        p.toggle(d("2026-03-10"), false);
        assert_eq!(p.get(d("2026-03-10")), Some(DesiredState::Holiday));
        assert!(p.is_dirty());
        p.toggle(d("2026-03-10"), false);
        assert!(p.is_empty());
        assert!(!p.is_dirty());
    }

    #[test]
    fn toggle_server_holiday_stages_workday() {
        let mut p = PendingChangeSet::new();
        p.toggle(d("2026-01-01"), true);
        assert_eq!(p.get(d("2026-01-01")), Some(DesiredState::Workday));
        p.toggle(d("2026-01-01"), true);
        assert_eq!(p.len(), 0);
    }

    #[test]
    fn effective_set_overlays_pending() {
        let server = set(&["2026-01-01", "2026-01-07"]);
        let mut p = PendingChangeSet::new();
        p.toggle(d("2026-01-01"), true);
        p.toggle(d("2026-01-02"), false);
        assert_eq!(p.effective_holiday_set(&server), set(&["2026-01-02", "2026-01-07"]));
        // Baseline untouched.
        assert_eq!(server.len(), 2);
    }

    #[test]
    fn dates_in_year_saturdays_2026() {
        let sats = dates_in_year(2026, &[Weekday::Sat]);
        assert_eq!(sats.len(), 52);
        assert_eq!(sats[0], d("2026-01-03"));
        assert_eq!(*sats.last().unwrap(), d("2026-12-26"));
        assert!(sats.iter().all(|x| x.weekday() == Weekday::Sat));
    }

    #[test]
    fn iso_weekday_numbers() {
        assert_eq!(iso_weekday(1), Some(Weekday::Mon));
        assert_eq!(iso_weekday(6), Some(Weekday::Sat));
        assert_eq!(iso_weekday(7), Some(Weekday::Sun));
        assert_eq!(iso_weekday(0), None);
        assert_eq!(iso_weekday(8), None);
    }

    #[test]
    fn bulk_add_weekdays_is_idempotent_and_skips_server_holidays() {
        let server = set(&["2026-01-03"]);
        let mut once = PendingChangeSet::new();
        once.bulk_add_weekdays(2026, &[Weekday::Sat], &server);
        assert_eq!(once.len(), 51);
        assert_eq!(once.get(d("2026-01-03")), None);

        let mut twice = PendingChangeSet::new();
        twice.bulk_add_weekdays(2026, &[Weekday::Sat], &server);
        twice.bulk_add_weekdays(2026, &[Weekday::Sat], &server);
        assert_eq!(once.commit(), twice.commit());
    }

    #[test]
    fn bulk_add_uses_supplied_generator() {
        let mut p = PendingChangeSet::new();
        p.bulk_add_weekdays_with(
            2026,
            &[Weekday::Mon],
            |_, _| vec![d("2026-05-01"), d("2026-05-02")],
            &set(&["2026-05-02"]),
        );
        assert_eq!(p.commit().holiday_dates, vec![d("2026-05-01")]);
    }

    #[test]
    fn clear_year_empties_effective_set() {
        let server = set(&["2026-01-01", "2026-12-25"]);
        let mut p = PendingChangeSet::new();
        p.toggle(d("2026-07-04"), false);
        p.toggle(d("2026-12-25"), true);
        p.clear_year(&server);
        assert!(p.effective_holiday_set(&server).is_empty());
        let batch = p.commit();
        assert!(batch.holiday_dates.is_empty());
        assert_eq!(batch.workday_dates, vec![d("2026-01-01"), d("2026-12-25")]);
    }

    #[test]
    fn commit_partitions_are_complete_and_disjoint() {
        let mut p = PendingChangeSet::new();
        p.toggle(d("2026-02-02"), false);
        p.toggle(d("2026-02-01"), false);
        p.toggle(d("2026-02-03"), true);
        let batch = p.commit();
        assert_eq!(batch.holiday_dates, vec![d("2026-02-01"), d("2026-02-02")]);
        assert_eq!(batch.workday_dates, vec![d("2026-02-03")]);
        // commit does not clear
        assert_eq!(p.len(), 3);
        p.discard();
        assert!(p.commit().is_empty());
    }

    #[test]
    fn requests_match_wire_shape() {
        let batch = CommitBatch {
            holiday_dates: vec![d("2026-01-03")],
            workday_dates: vec![d("2026-01-01")],
        };
        let reqs = batch.clone().into_requests(2026, Some(7));
        assert_eq!(
            serde_json::to_value(&reqs).unwrap(),
            serde_json::json!([
                {"operation": "set_dates", "year": 2026, "dates": ["2026-01-03"], "type": "holiday", "dealership_id": 7},
                {"operation": "set_dates", "year": 2026, "dates": ["2026-01-01"], "type": "workday", "dealership_id": 7}
            ])
        );
        let only_holidays = CommitBatch {
            holiday_dates: vec![d("2026-01-03")],
            workday_dates: vec![],
        }
        .into_requests(2026, None);
        assert_eq!(only_holidays.len(), 1);
        assert!(serde_json::to_value(&only_holidays[0])
            .unwrap()
            .get("dealership_id")
            .is_none());
    }
}
