//! Predicate builder for event hooks.
//!
//! A `Filter` accumulates per-field constraints over an event type and
//! checks them shallowly. Constraining the kind to a literal also records it
//! as the filter's bucket key, which the dispatcher uses to skip hooks that
//! cannot possibly match. The bucket key is a hint only: the predicate is
//! still evaluated for every hook the dispatcher considers.
//!
//! ```ignore
//! let big_hits = filter::<Event>()
//!     .kind(kind::DAMAGE)
//!     .field(Event::source, one_of(party))
//!     .field_matches(Event::amount, |amount| *amount > 10_000)
//!     .narrow(Event::as_damage);
//! ```

use std::collections::HashSet;
use std::fmt;
use std::hash::Hash;
use std::marker::PhantomData;

use crate::types::TimelineEvent;

// ---------------------------------------------------------------------------
// Predicate
// ---------------------------------------------------------------------------

/// Anything a hook can be gated on.
///
/// `narrow` both tests the event and hands back the shape the hook callback
/// receives: the whole event for a plain filter, a variant payload for a
/// narrowed one.
pub trait Predicate<E>: 'static {
    type Output: ?Sized;

    fn narrow<'e>(&self, event: &'e E) -> Option<&'e Self::Output>;

    /// Kind this predicate is restricted to, if known up front.
    fn bucket_key(&self) -> Option<&str> {
        None
    }
}

// ---------------------------------------------------------------------------
// Matcher
// ---------------------------------------------------------------------------

/// How a single field is compared.
pub enum Matcher<V> {
    /// Shallow equality against a literal.
    Eq(V),
    /// Arbitrary match function.
    Test(Box<dyn Fn(&V) -> bool>),
}

impl<V: PartialEq> Matcher<V> {
    pub fn test(&self, value: &V) -> bool {
        match self {
            Matcher::Eq(expected) => expected == value,
            Matcher::Test(f) => f(value),
        }
    }
}

impl<V: fmt::Debug> fmt::Debug for Matcher<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Matcher::Eq(v) => f.debug_tuple("Eq").field(v).finish(),
            Matcher::Test(_) => f.write_str("Test(..)"),
        }
    }
}

/// Matches values that are members of `values`.
pub fn one_of<V>(values: impl IntoIterator<Item = V>) -> Matcher<V>
where
    V: Eq + Hash + 'static,
{
    let set: HashSet<V> = values.into_iter().collect();
    Matcher::Test(Box::new(move |v| set.contains(v)))
}

/// Matches values that are not members of `values`.
pub fn none_of<V>(values: impl IntoIterator<Item = V>) -> Matcher<V>
where
    V: Eq + Hash + 'static,
{
    let set: HashSet<V> = values.into_iter().collect();
    Matcher::Test(Box::new(move |v| !set.contains(v)))
}

// ---------------------------------------------------------------------------
// Filter
// ---------------------------------------------------------------------------

type Constraint<E> = Box<dyn Fn(&E) -> bool>;

/// Chainable field-wise predicate over `E`.
pub struct Filter<E> {
    kind: Option<String>,
    constraints: Vec<Constraint<E>>,
}

/// Start an empty filter. Matches every event until constrained.
pub fn filter<E: TimelineEvent>() -> Filter<E> {
    Filter::new()
}

impl<E: TimelineEvent> Default for Filter<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: TimelineEvent> Filter<E> {
    pub fn new() -> Self {
        Self {
            kind: None,
            constraints: Vec::new(),
        }
    }

    /// Restrict to a single kind. Also sets the bucket key.
    /// A later call replaces an earlier one.
    pub fn kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }

    /// Restrict the kind with a matcher. Leaves the bucket key untouched,
    /// since the set of matching kinds is not known up front.
    pub fn kind_where(self, matcher: Matcher<String>) -> Self {
        self.field(|e: &E| Some(e.kind().to_owned()), matcher)
    }

    /// Constrain a field. `selector` returns `None` when the event has no
    /// such field, which never matches.
    pub fn field<V, S>(mut self, selector: S, matcher: Matcher<V>) -> Self
    where
        V: PartialEq + 'static,
        S: Fn(&E) -> Option<V> + 'static,
    {
        self.constraints.push(Box::new(move |event| {
            selector(event).is_some_and(|value| matcher.test(&value))
        }));
        self
    }

    pub fn field_eq<V, S>(self, selector: S, value: V) -> Self
    where
        V: PartialEq + 'static,
        S: Fn(&E) -> Option<V> + 'static,
    {
        self.field(selector, Matcher::Eq(value))
    }

    pub fn field_matches<V, S, F>(self, selector: S, test: F) -> Self
    where
        V: PartialEq + 'static,
        S: Fn(&E) -> Option<V> + 'static,
        F: Fn(&V) -> bool + 'static,
    {
        self.field(selector, Matcher::Test(Box::new(test)))
    }

    /// Check an event against every accumulated constraint.
    pub fn matches(&self, event: &E) -> bool {
        if let Some(kind) = &self.kind {
            if event.kind() != kind {
                return false;
            }
        }
        self.constraints.iter().all(|constraint| constraint(event))
    }

    /// Narrow matching events to a payload type, so hook callbacks receive
    /// `&T` instead of the whole event.
    pub fn narrow<T: ?Sized + 'static>(self, narrow: fn(&E) -> Option<&T>) -> Narrowed<E, T> {
        Narrowed {
            filter: self,
            narrow,
        }
    }
}

impl<E: TimelineEvent> Predicate<E> for Filter<E> {
    type Output = E;

    fn narrow<'e>(&self, event: &'e E) -> Option<&'e E> {
        self.matches(event).then_some(event)
    }

    fn bucket_key(&self) -> Option<&str> {
        self.kind.as_deref()
    }
}

impl<E> fmt::Debug for Filter<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Filter")
            .field("kind", &self.kind)
            .field("constraints", &self.constraints.len())
            .finish()
    }
}

/// A filter whose matches are projected onto a payload type.
pub struct Narrowed<E, T: ?Sized> {
    filter: Filter<E>,
    narrow: fn(&E) -> Option<&T>,
}

impl<E: TimelineEvent, T: ?Sized + 'static> Predicate<E> for Narrowed<E, T> {
    type Output = T;

    fn narrow<'e>(&self, event: &'e E) -> Option<&'e T> {
        if !self.filter.matches(event) {
            return None;
        }
        (self.narrow)(event)
    }

    fn bucket_key(&self) -> Option<&str> {
        self.filter.bucket_key()
    }
}

// ---------------------------------------------------------------------------
// Bare closures
// ---------------------------------------------------------------------------

/// Predicate from a plain closure. Never carries a bucket key.
pub struct FnPredicate<E, F> {
    test: F,
    _event: PhantomData<fn(&E)>,
}

pub fn from_fn<E, F>(test: F) -> FnPredicate<E, F>
where
    F: Fn(&E) -> bool + 'static,
{
    FnPredicate {
        test,
        _event: PhantomData,
    }
}

impl<E: 'static, F> Predicate<E> for FnPredicate<E, F>
where
    F: Fn(&E) -> bool + 'static,
{
    type Output = E;

    fn narrow<'e>(&self, event: &'e E) -> Option<&'e E> {
        (self.test)(event).then_some(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{kind, DamageEvent, Event};

    fn damage(source: i64, amount: u64) -> Event {
        Event::Damage(DamageEvent {
            timestamp: 0,
            source,
            target: 99,
            action: 1,
            amount,
            overkill: 0,
            critical: false,
        })
    }

    #[test]
    fn empty_filter_matches_everything() {
        let f = filter::<Event>();
        assert!(f.matches(&damage(1, 1)));
        assert!(f.matches(&Event::init(0)));
        assert_eq!(Predicate::bucket_key(&f), None);
    }

    #[test]
    fn kind_literal_sets_bucket_key() {
        let f = filter::<Event>().kind(kind::DAMAGE);
        assert_eq!(f.bucket_key(), Some("damage"));
        assert!(f.matches(&damage(1, 1)));
        assert!(!f.matches(&Event::complete(0)));
    }

    #[test]
    fn later_kind_replaces_earlier() {
        let f = filter::<Event>().kind(kind::HEAL).kind(kind::DAMAGE);
        assert_eq!(f.bucket_key(), Some("damage"));
        assert!(f.matches(&damage(1, 1)));
    }

    #[test]
    fn kind_matcher_has_no_bucket_key() {
        let f = filter::<Event>().kind_where(one_of([
            kind::DAMAGE.to_string(),
            kind::HEAL.to_string(),
        ]));
        assert_eq!(f.bucket_key(), None);
        assert!(f.matches(&damage(1, 1)));
        assert!(!f.matches(&Event::init(0)));
    }

    #[test]
    fn missing_field_never_matches() {
        let f = filter::<Event>().field_eq(Event::source, 1);
        assert!(f.matches(&damage(1, 5)));
        assert!(!f.matches(&Event::init(0)));
    }

    #[test]
    fn narrowed_filter_yields_payload() {
        let f = filter::<Event>()
            .kind(kind::DAMAGE)
            .field_matches(Event::amount, |a: &u64| *a >= 100)
            .narrow(Event::as_damage);

        let hit = damage(3, 150);
        assert_eq!(f.narrow(&hit).map(|d| d.source), Some(3));
        assert!(f.narrow(&damage(3, 10)).is_none());
        assert_eq!(f.bucket_key(), Some("damage"));
    }

    #[test]
    fn closure_predicate_has_no_bucket() {
        let p = from_fn(|e: &Event| e.timestamp() > 10);
        assert!(p.bucket_key().is_none());
        assert!(p.narrow(&Event::init(11)).is_some());
        assert!(p.narrow(&Event::init(10)).is_none());
    }
}
