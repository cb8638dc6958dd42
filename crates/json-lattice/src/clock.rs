//! Logical clock types: session identifiers, timestamps, timespans, and the
//! per-document clock table that tracks observed counters across sessions.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;

use uuid::Uuid;

// ── SessionId ──────────────────────────────────────────────────────────────

/// A 128-bit session identifier. Every editing site mints one per session;
/// the nil id is reserved for the document origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub const NIL: SessionId = SessionId(Uuid::nil());

    /// Mint a fresh random session id.
    pub fn generate() -> Self {
        SessionId(Uuid::new_v4())
    }

    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        SessionId(Uuid::from_bytes(bytes))
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }

    #[inline]
    pub fn is_nil(&self) -> bool {
        self.0.is_nil()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ── Core structs ───────────────────────────────────────────────────────────

/// An immutable logical timestamp: `(session_id, counter)`.
///
/// Ordering is counter-first; equal counters fall back to the byte order of
/// the session id. Counters minted by sessions start at 1, so `ORIGIN`
/// (nil session, counter 0) sorts before every real timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ts {
    pub sid: SessionId,
    pub counter: u64,
}

impl Ts {
    pub const fn new(sid: SessionId, counter: u64) -> Self {
        Self { sid, counter }
    }
}

impl Ord for Ts {
    fn cmp(&self, other: &Self) -> Ordering {
        self.counter
            .cmp(&other.counter)
            .then_with(|| self.sid.cmp(&other.sid))
    }
}

impl PartialOrd for Ts {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Ts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", print_ts(*self))
    }
}

/// The reserved root address: nil session, counter 0.
pub const ORIGIN: Ts = Ts::new(SessionId::NIL, 0);

/// An immutable logical timespan: `(session_id, counter, span)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tss {
    pub sid: SessionId,
    pub counter: u64,
    pub span: u64,
}

impl Tss {
    pub const fn new(sid: SessionId, counter: u64, span: u64) -> Self {
        Self { sid, counter, span }
    }

    pub fn ts(&self) -> Ts {
        Ts::new(self.sid, self.counter)
    }
}

// ── Factory functions ──────────────────────────────────────────────────────

/// Create a timestamp.
#[inline]
pub fn ts(sid: SessionId, counter: u64) -> Ts {
    Ts::new(sid, counter)
}

/// Create a timespan.
#[inline]
pub fn tss(sid: SessionId, counter: u64, span: u64) -> Tss {
    Tss::new(sid, counter, span)
}

/// Advance a timestamp by `cycles`, returning the new timestamp.
#[inline]
pub fn tick(stamp: Ts, cycles: u64) -> Ts {
    Ts::new(stamp.sid, stamp.counter + cycles)
}

/// Returns `true` if `[ts1, span1)` completely contains `[ts2, span2)`.
pub fn contains(ts1: Ts, span1: u64, ts2: Ts, span2: u64) -> bool {
    if ts1.sid != ts2.sid {
        return false;
    }
    if ts1.counter > ts2.counter {
        return false;
    }
    if ts1.counter + span1 < ts2.counter + span2 {
        return false;
    }
    true
}

/// Returns `true` if the timespan `[ts1, span1)` contains point `ts2`.
pub fn contains_id(ts1: Ts, span1: u64, ts2: Ts) -> bool {
    if ts1.sid != ts2.sid {
        return false;
    }
    if ts1.counter > ts2.counter {
        return false;
    }
    if ts1.counter + span1 < ts2.counter + 1 {
        return false;
    }
    true
}

/// Creates a timespan at offset `tick_offset` from `stamp` with length `span`.
pub fn interval(stamp: Ts, tick_offset: u64, span: u64) -> Tss {
    Tss::new(stamp.sid, stamp.counter + tick_offset, span)
}

/// Human-readable representation of a timestamp.
pub fn print_ts(id: Ts) -> String {
    if id.sid.is_nil() {
        return format!(".{}", id.counter);
    }
    let s = id.sid.0.simple().to_string();
    format!("..{}.{}", &s[s.len() - 4..], id.counter)
}

// ── SessionClock ───────────────────────────────────────────────────────────

/// A mutable logical clock for one session. `tick` hands out the current
/// counter and advances past it.
#[derive(Debug, Clone)]
pub struct SessionClock {
    pub sid: SessionId,
    pub counter: u64,
}

impl SessionClock {
    pub fn new(sid: SessionId, counter: u64) -> Self {
        Self { sid, counter }
    }

    /// A fresh clock for `sid` starting at the first valid counter.
    pub fn start(sid: SessionId) -> Self {
        Self::new(sid, 1)
    }

    /// Returns the current timestamp and advances the clock by `cycles`.
    pub fn tick(&mut self, cycles: u64) -> Ts {
        let stamp = Ts::new(self.sid, self.counter);
        self.counter += cycles;
        stamp
    }

    pub fn ts(&self) -> Ts {
        Ts::new(self.sid, self.counter)
    }
}

// ── ClockTable ─────────────────────────────────────────────────────────────

/// Per-document clock state: the local session clock plus the highest counter
/// observed from every peer session.
#[derive(Debug, Clone)]
pub struct ClockTable {
    pub sid: SessionId,
    pub counter: u64,
    pub observed: HashMap<SessionId, u64>,
}

impl ClockTable {
    pub fn new(sid: SessionId, counter: u64) -> Self {
        Self {
            sid,
            counter,
            observed: HashMap::new(),
        }
    }

    pub fn ts(&self) -> Ts {
        Ts::new(self.sid, self.counter)
    }

    /// Returns the current timestamp and advances the local clock by `cycles`.
    pub fn tick(&mut self, cycles: u64) -> Ts {
        let stamp = Ts::new(self.sid, self.counter);
        self.counter += cycles;
        stamp
    }

    /// Record a timestamp span seen in an incoming operation. Advances the
    /// peer entry and pushes the local counter past the observed edge, so
    /// locally minted timestamps always dominate everything seen so far.
    /// Idempotent: calling multiple times is safe.
    pub fn observe(&mut self, id: Ts, span: u64) {
        let edge = id.counter + span - 1;
        if id.sid != self.sid {
            let entry = self.observed.entry(id.sid).or_insert(0);
            if edge > *entry {
                *entry = edge;
            }
        }
        if edge >= self.counter {
            self.counter = edge + 1;
        }
    }

    /// Highest counter observed for `sid`, zero when never seen.
    pub fn observed_edge(&self, sid: SessionId) -> u64 {
        if sid == self.sid {
            self.counter.saturating_sub(1)
        } else {
            self.observed.get(&sid).copied().unwrap_or(0)
        }
    }

    /// A frozen copy of the per-session maxima, local session included.
    pub fn cut(&self) -> HashMap<SessionId, u64> {
        let mut cut = self.observed.clone();
        if self.counter > 1 {
            cut.insert(self.sid, self.counter - 1);
        }
        cut
    }

    /// Deep clone with the same session id.
    pub fn clone_same(&self) -> ClockTable {
        self.fork(self.sid)
    }

    /// Deep copy with a (potentially different) session id.
    pub fn fork(&self, new_sid: SessionId) -> ClockTable {
        let mut table = ClockTable::new(new_sid, self.counter);
        if new_sid != self.sid {
            // Record the last counter issued by the old session so the new
            // session knows not to mint below self.counter.
            if self.counter > 1 {
                table.observe(Ts::new(self.sid, self.counter - 1), 1);
            }
        }
        for (&sid, &edge) in &self.observed {
            table.observe(Ts::new(sid, edge), 1);
        }
        table
    }
}

impl fmt::Display for ClockTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "clock {}", print_ts(self.ts()))?;
        let peers: Vec<_> = self.observed.iter().collect();
        for (i, (&sid, &edge)) in peers.iter().enumerate() {
            let is_last = i == peers.len() - 1;
            write!(
                f,
                "\n{} {}",
                if is_last { "└─" } else { "├─" },
                print_ts(Ts::new(sid, edge))
            )?;
        }
        Ok(())
    }
}
