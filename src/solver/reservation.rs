use std::collections::HashMap;

use crate::geometry::{Position, PositionTime, Tick};

/// A claim on a cell at one tick. `from` is the cell the owner leaves to get
/// here; it is what makes head-on swap detection possible.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SpaceTimeRecord<O> {
    pub(crate) owner: O,
    pub(crate) from: Option<Position>,
}

/// A claim on a cell for every tick at or after `from_time` (goal parking).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PermanentRecord<O> {
    pub(crate) owner: O,
    pub(crate) from_time: Tick,
}

/// Space-time plus permanent reservations, generic over the owning identity:
/// agent ids for per-agent planners, group ids for the joint planner.
#[derive(Debug, Clone)]
pub(crate) struct ReservationTable<O> {
    space_time: HashMap<PositionTime, SpaceTimeRecord<O>>,
    permanent: HashMap<Position, PermanentRecord<O>>,
    last_nonpermanent: Tick,
}

impl<O: Copy + Eq> ReservationTable<O> {
    pub(crate) fn new() -> Self {
        ReservationTable {
            space_time: HashMap::new(),
            permanent: HashMap::new(),
            last_nonpermanent: 0,
        }
    }

    /// May `owner` step `from -> to`, arriving at tick `time`?
    pub(crate) fn passable(&self, owner: O, to: Position, from: Position, time: Tick) -> bool {
        if let Some(r) = self.space_time.get(&PositionTime::new(to, time)) {
            if r.owner != owner {
                return false;
            }
        }

        // Head-on swap: someone claims our origin cell at the arrival tick,
        // coming from exactly the cell we want to enter.
        if let Some(r) = self.space_time.get(&PositionTime::new(from, time)) {
            if r.owner != owner && r.from == Some(to) {
                return false;
            }
        }

        if let Some(r) = self.permanent.get(&to) {
            if r.owner != owner && r.from_time <= time {
                return false;
            }
        }

        true
    }

    pub(crate) fn reserve(&mut self, owner: O, pt: PositionTime, from: Option<Position>) {
        self.space_time.insert(pt, SpaceTimeRecord { owner, from });
        self.last_nonpermanent = self.last_nonpermanent.max(pt.time);
    }

    pub(crate) fn reserve_permanent(&mut self, owner: O, p: Position, from_time: Tick) {
        self.permanent.insert(p, PermanentRecord { owner, from_time });
    }

    /// Drop every claim of `owner` from both tables.
    pub(crate) fn unreserve(&mut self, owner: O) {
        self.space_time.retain(|_, r| r.owner != owner);
        self.permanent.retain(|_, r| r.owner != owner);
    }

    pub(crate) fn clear(&mut self) {
        self.space_time.clear();
        self.permanent.clear();
        self.last_nonpermanent = 0;
    }

    pub(crate) fn get(&self, pt: PositionTime) -> Option<&SpaceTimeRecord<O>> {
        self.space_time.get(&pt)
    }

    pub(crate) fn get_permanent(&self, p: Position) -> Option<&PermanentRecord<O>> {
        self.permanent.get(&p)
    }

    pub(crate) fn owns_any(&self, owner: O) -> bool {
        self.space_time.values().any(|r| r.owner == owner)
            || self.permanent.values().any(|r| r.owner == owner)
    }

    /// Owner conflicting with arriving at `to` (from `from`) at `time`.
    /// `permanent` relaxes the start-time check of permanent claims; the
    /// joint planner passes it for the last state of a plan, which stays put
    /// forever afterwards.
    pub(crate) fn find_conflict(
        &self,
        to: Position,
        from: Option<Position>,
        time: Tick,
        permanent: bool,
    ) -> Option<O> {
        if let Some(r) = self.space_time.get(&PositionTime::new(to, time)) {
            return Some(r.owner);
        }

        if let Some(from) = from {
            if let Some(r) = self.space_time.get(&PositionTime::new(from, time)) {
                if r.from == Some(to) {
                    return Some(r.owner);
                }
            }
        }

        if let Some(r) = self.permanent.get(&to) {
            if permanent || r.from_time <= time {
                return Some(r.owner);
            }
        }

        None
    }

    /// Whoever still holds a space-time claim on `p` at or after `since`:
    /// parking on `p` forever would run them over.
    pub(crate) fn find_permanent_conflict(&self, p: Position, since: Tick) -> Option<O> {
        for time in since..self.last_nonpermanent {
            if let Some(r) = self.space_time.get(&PositionTime::new(p, time)) {
                return Some(r.owner);
            }
        }
        None
    }
}
