//! `NoteValue`/`MusicEvent`/`MusicResult`, the `EVal`/`MVal` value kinds, the
//! temporal algebra over `MusicResult`, and the JSON export DTOs.

use std::collections::{BTreeMap, BTreeSet};

use num_rational::Rational64;
use serde::Serialize;

use crate::error::DslError;
use crate::token::Span;

/// `(midi_pitch, duration)`. `midi_pitch == -1` denotes a rest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NoteValue {
    pub midi_pitch: i32,
    pub duration: Rational64,
}

impl NoteValue {
    pub fn is_rest(&self) -> bool {
        self.midi_pitch == -1
    }
}

/// A set of notes sharing a `start_time`. Non-empty by construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MusicEvent {
    pub start_time: Rational64,
    pub notes: BTreeSet<NoteValue>,
}

impl MusicEvent {
    fn max_duration(&self) -> Rational64 {
        self.notes.iter().map(|n| n.duration).max().unwrap_or_else(|| Rational64::from_integer(0))
    }
}

/// Sorted sequence of [`MusicEvent`]s. Empty is the identity for `++` and `|`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MusicResult {
    pub events: Vec<MusicEvent>,
}

impl MusicResult {
    pub fn empty() -> Self {
        MusicResult { events: Vec::new() }
    }

    pub fn single_note(pitch: i64, duration: Rational64) -> Self {
        let mut notes = BTreeSet::new();
        notes.insert(NoteValue { midi_pitch: pitch as i32, duration });
        MusicResult { events: vec![MusicEvent { start_time: Rational64::from_integer(0), notes }] }
    }

    pub fn is_empty_sequence(&self) -> bool {
        self.events.is_empty()
    }

    /// `span(S)`: the latest end-time reached by any note, `0` for empty `S`.
    pub fn span(&self) -> Rational64 {
        self.events
            .iter()
            .map(|e| e.start_time + e.max_duration())
            .max()
            .unwrap_or_else(|| Rational64::from_integer(0))
    }

    fn shift(&self, delta: Rational64) -> MusicResult {
        MusicResult {
            events: self
                .events
                .iter()
                .map(|e| MusicEvent { start_time: e.start_time + delta, notes: e.notes.clone() })
                .collect(),
        }
    }

    /// `A ++ B := A \u{222a} shift(B, span(A))`, re-sorted by `start_time`.
    pub fn concat(&self, other: &MusicResult) -> MusicResult {
        let shifted = other.shift(self.span());
        let mut events = self.events.clone();
        events.extend(shifted.events);
        events.sort_by_key(|e| e.start_time);
        MusicResult { events }
    }

    /// Sorted merge of `A \u{222a} B`; events sharing a `start_time` have their
    /// note sets unioned. Commutative and associative up to event-set equality.
    pub fn union(&self, other: &MusicResult) -> MusicResult {
        let mut by_start: BTreeMap<Rational64, BTreeSet<NoteValue>> = BTreeMap::new();
        for event in self.events.iter().chain(other.events.iter()) {
            by_start.entry(event.start_time).or_default().extend(event.notes.iter().copied());
        }
        let events = by_start.into_iter().map(|(start_time, notes)| MusicEvent { start_time, notes }).collect();
        MusicResult { events }
    }

    /// `A ! k`: transpose every note by `k` semitones; rests are unaffected.
    /// `RangeError` if any resulting pitch leaves `[0, 127]`.
    pub fn transpose(&self, k: i64, span: Span) -> Result<MusicResult, DslError> {
        let mut events = Vec::with_capacity(self.events.len());
        for event in &self.events {
            let mut notes = BTreeSet::new();
            for note in &event.notes {
                let midi_pitch = if note.is_rest() {
                    -1
                } else {
                    let shifted = note.midi_pitch as i64 + k;
                    if !(0..=127).contains(&shifted) {
                        return Err(DslError::range(
                            format!("transposition by {k} moves pitch to {shifted}, outside [0, 127]"),
                            span,
                        ));
                    }
                    shifted as i32
                };
                notes.insert(NoteValue { midi_pitch, duration: note.duration });
            }
            events.push(MusicEvent { start_time: event.start_time, notes });
        }
        Ok(MusicResult { events })
    }

    /// Singleton of the first event, re-zeroed to `start_time = 0`.
    /// `TypeError` if empty.
    pub fn head(&self, span: Span) -> Result<MusicResult, DslError> {
        let first = self.events.first().ok_or_else(|| DslError::type_error("head of an empty sequence", span))?;
        Ok(MusicResult { events: vec![MusicEvent { start_time: Rational64::from_integer(0), notes: first.notes.clone() }] })
    }

    /// All events after the first, shifted back by the first event's own
    /// span (`start_time + its max note duration`). This is the convention
    /// spec.md §9(c) leaves open; it's the one under which property 7
    /// (`head(A) ++ tail(A) \u{2261} A`) actually holds, since `++` re-adds
    /// exactly that span when it shifts `tail(A)` back into place behind
    /// `head(A)`. "Unchanged" absolute offsets would double-shift under `++`.
    pub fn tail(&self) -> MusicResult {
        let Some(first) = self.events.first() else { return self.clone() };
        let delta = first.start_time + first.max_duration();
        MusicResult {
            events: self
                .events
                .iter()
                .skip(1)
                .map(|e| MusicEvent { start_time: e.start_time - delta, notes: e.notes.clone() })
                .collect(),
        }
    }

    /// MIDI pitch of the lowest note in the first event (min-pitch
    /// tie-break). `TypeError` if empty.
    pub fn pitch(&self, span: Span) -> Result<i64, DslError> {
        let first = self.events.first().ok_or_else(|| DslError::type_error("pitch of an empty sequence", span))?;
        first
            .notes
            .iter()
            .map(|n| n.midi_pitch as i64)
            .min()
            .ok_or_else(|| DslError::type_error("pitch of an event with no notes", span))
    }

    /// Translate so the earliest `start_time` becomes `0`.
    pub fn initialize(&self) -> MusicResult {
        match self.events.iter().map(|e| e.start_time).min() {
            Some(min_start) => self.shift(-min_start),
            None => self.clone(),
        }
    }

    pub fn to_json(&self) -> ExportJson {
        ExportJson {
            events: self
                .events
                .iter()
                .map(|e| EventJson {
                    start: rational_to_json_number(e.start_time),
                    notes: e
                        .notes
                        .iter()
                        .map(|n| NoteJson { midi: n.midi_pitch, dur: rational_to_json_number(n.duration) })
                        .collect(),
                })
                .collect(),
        }
    }

    pub fn to_json_string(&self) -> String {
        serde_json::to_string(&self.to_json()).expect("ExportJson serialization is infallible")
    }
}

/// Emits a whole rational as a bare integer (`1`, not `1.0`); fractional
/// rationals fall back to the closest `f64`.
fn rational_to_json_number(r: Rational64) -> serde_json::Number {
    if r.is_integer() {
        serde_json::Number::from(*r.numer())
    } else {
        let value = *r.numer() as f64 / *r.denom() as f64;
        serde_json::Number::from_f64(value).unwrap_or_else(|| serde_json::Number::from(0))
    }
}

/// An expressible value.
#[derive(Debug, Clone)]
pub enum EVal {
    Int(i64),
    Bool(bool),
    Music(MusicResult),
}

/// Storable values coincide with expressible values.
pub type MVal = EVal;

impl EVal {
    pub fn type_name(&self) -> &'static str {
        match self {
            EVal::Int(_) => "int",
            EVal::Bool(_) => "bool",
            EVal::Music(_) => "MusicResult",
        }
    }

    pub fn as_int(&self, span: Span) -> Result<i64, DslError> {
        match self {
            EVal::Int(n) => Ok(*n),
            other => Err(DslError::type_error(format!("expected int, found {}", other.type_name()), span)),
        }
    }

    pub fn as_bool(&self, span: Span) -> Result<bool, DslError> {
        match self {
            EVal::Bool(b) => Ok(*b),
            other => Err(DslError::type_error(format!("expected bool, found {}", other.type_name()), span)),
        }
    }

    pub fn as_music(&self, span: Span) -> Result<&MusicResult, DslError> {
        match self {
            EVal::Music(m) => Ok(m),
            other => Err(DslError::type_error(format!("expected MusicResult, found {}", other.type_name()), span)),
        }
    }
}

impl std::fmt::Display for EVal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EVal::Int(n) => write!(f, "{n}"),
            EVal::Bool(b) => write!(f, "{b}"),
            EVal::Music(m) => write!(f, "{}", m.to_json_string()),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ExportJson {
    pub events: Vec<EventJson>,
}

#[derive(Debug, Serialize)]
pub struct EventJson {
    pub start: serde_json::Number,
    pub notes: Vec<NoteJson>,
}

#[derive(Debug, Serialize)]
pub struct NoteJson {
    pub midi: i32,
    pub dur: serde_json::Number,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn note_result(pitch: i64, dur: i64) -> MusicResult {
        MusicResult::single_note(pitch, Rational64::from_integer(dur))
    }

    #[test]
    fn test_concat_identity() {
        let a = note_result(60, 1);
        assert_eq!(MusicResult::empty().concat(&a), a);
        assert_eq!(a.concat(&MusicResult::empty()), a);
    }

    #[test]
    fn test_concat_associativity() {
        let a = note_result(60, 1);
        let b = note_result(62, 1);
        let c = note_result(64, 1);
        let left = a.concat(&b).concat(&c);
        let right = a.concat(&b.concat(&c));
        assert_eq!(left, right);
    }

    #[test]
    fn test_concat_advances_span_through_rests() {
        let note = note_result(60, 1);
        let rest = MusicResult::single_note(-1, Rational64::new(1, 2));
        let combined = note.concat(&rest);
        assert_eq!(combined.span(), Rational64::new(3, 2));
    }

    #[test]
    fn test_union_commutative() {
        let a = note_result(60, 1);
        let b = note_result(64, 1);
        assert_eq!(a.union(&b), b.union(&a));
    }

    #[test]
    fn test_union_merges_same_start() {
        let a = note_result(60, 1);
        let b = note_result(64, 1);
        let merged = a.union(&b);
        assert_eq!(merged.events.len(), 1);
        assert_eq!(merged.events[0].notes.len(), 2);
    }

    #[test]
    fn test_transpose_round_trip() {
        let a = note_result(60, 1).concat(&note_result(62, 1));
        let up = a.transpose(12, Span::DUMMY).unwrap();
        let back = up.transpose(-12, Span::DUMMY).unwrap();
        assert_eq!(back, a);
    }

    #[test]
    fn test_transpose_out_of_range() {
        let a = note_result(125, 1);
        assert!(a.transpose(10, Span::DUMMY).is_err());
    }

    #[test]
    fn test_transpose_leaves_rests_unchanged() {
        let rest = MusicResult::single_note(-1, Rational64::from_integer(1));
        let transposed = rest.transpose(5, Span::DUMMY).unwrap();
        assert_eq!(transposed.events[0].notes.iter().next().unwrap().midi_pitch, -1);
    }

    #[test]
    fn test_initialize_rezeroes_minimum() {
        let a = note_result(60, 1).concat(&note_result(62, 1));
        let initialized = a.initialize();
        assert_eq!(initialized.events[0].start_time, Rational64::from_integer(0));
        assert_eq!(initialized, a);
    }

    #[test]
    fn test_head_tail_reconstruct_concat_built_sequence() {
        let a = note_result(60, 1).concat(&note_result(62, 1)).concat(&note_result(64, 1));
        let reconstructed = a.head(Span::DUMMY).unwrap().concat(&a.tail());
        assert_eq!(reconstructed, a);
    }

    #[test]
    fn test_head_of_empty_is_type_error() {
        assert!(MusicResult::empty().head(Span::DUMMY).is_err());
    }

    #[test]
    fn test_pitch_min_tiebreak() {
        let chord = note_result(64, 1).union(&note_result(60, 1)).union(&note_result(67, 1));
        assert_eq!(chord.pitch(Span::DUMMY).unwrap(), 60);
    }

    #[test]
    fn test_json_export_shape() {
        let a = note_result(60, 1);
        let json = a.to_json_string();
        assert_eq!(json, r#"{"events":[{"start":0,"notes":[{"midi":60,"dur":1}]}]}"#);
    }

    #[test]
    fn test_json_export_fractional_duration() {
        let rest = MusicResult::single_note(-1, Rational64::new(1, 2));
        let json = rest.to_json_string();
        assert_eq!(json, r#"{"events":[{"start":0,"notes":[{"midi":-1,"dur":0.5}]}]}"#);
    }
}
