// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Size-bounded event buffer.
//!
//! An [`EventBuffer`] holds the records collected for one feature stream
//! between two harvests. It keeps a running count of the serialized size of
//! everything it holds and refuses any operation that would push the batch
//! past [`MAX_PAYLOAD_SIZE`].
//!
//! # Invariants
//!
//! - `bytes` always equals the sum of the serialized sizes of the held records
//! - `bytes` never exceeds [`MAX_PAYLOAD_SIZE`]
//!
//! # Rejection
//!
//! Every operation is total. An event or merge that does not fit is silently
//! dropped and the buffer is left untouched. Dropping telemetry is the normal
//! backpressure outcome here, so callers that care (the
//! [`FeatureAggregator`](crate::aggregator::FeatureAggregator)) check the
//! return of [`EventBuffer::try_add`] and record the loss themselves.
//!
//! # Example
//!
//! ```rust
//! use event_harvest::event_buffer::EventBuffer;
//! use serde_json::json;
//!
//! let mut pending = EventBuffer::new();
//! pending.add(json!({"test": 1})).add(json!({"test": 2}));
//!
//! let mut retry = EventBuffer::new();
//! retry.add(json!({"test": 0}));
//!
//! // Replay the failed batch before the newer events
//! pending.merge(&retry, true);
//! assert_eq!(pending.len(), 3);
//! ```

use serde::{Serialize, Serializer};
use serde_json::Value;
use std::sync::Arc;

use crate::constants::MAX_PAYLOAD_SIZE;
use crate::payload_size::{fits, serialized_size};

/// A single telemetry record.
///
/// Records are immutable once buffered and are shared, not copied, when one
/// buffer is merged into another.
pub type EventRecord = Arc<Value>;

/// The right-hand side of [`EventBuffer::merge`].
///
/// Callers at the API boundary may hold arbitrary values; anything that is not
/// an [`EventBuffer`] converts to [`MergeSource::Foreign`] and merging it is a
/// no-op.
#[derive(Debug, Clone, Copy)]
pub enum MergeSource<'a> {
    Buffer(&'a EventBuffer),
    Foreign,
}

impl<'a> From<&'a EventBuffer> for MergeSource<'a> {
    fn from(buffer: &'a EventBuffer) -> Self {
        MergeSource::Buffer(buffer)
    }
}

impl<'a> From<&'a mut EventBuffer> for MergeSource<'a> {
    fn from(buffer: &'a mut EventBuffer) -> Self {
        MergeSource::Buffer(buffer)
    }
}

impl<'a> From<Option<&'a EventBuffer>> for MergeSource<'a> {
    fn from(buffer: Option<&'a EventBuffer>) -> Self {
        buffer.map_or(MergeSource::Foreign, MergeSource::Buffer)
    }
}

impl<'a> From<&'a Value> for MergeSource<'a> {
    fn from(_: &'a Value) -> Self {
        MergeSource::Foreign
    }
}

/// Ordered, size-bounded batch of [`EventRecord`]s.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventBuffer {
    /// Records in the order they will be reported.
    pub(crate) buffer: Vec<EventRecord>,
    /// Serialized size of everything in `buffer`.
    pub(crate) bytes: usize,
}

impl EventBuffer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `event` if it fits under the payload ceiling.
    ///
    /// Returns `self` so calls can be chained. Oversized or unserializable
    /// events are dropped without error.
    pub fn add(&mut self, event: Value) -> &mut Self {
        self.try_add(event);
        self
    }

    /// Converts `record` to JSON and appends it if it fits.
    pub fn add_record<T>(&mut self, record: &T) -> &mut Self
    where
        T: Serialize + ?Sized,
    {
        if let Ok(event) = serde_json::to_value(record) {
            self.try_add(event);
        }
        self
    }

    /// Same as [`EventBuffer::add`], but reports whether the event was kept.
    pub fn try_add(&mut self, event: Value) -> bool {
        let Some(size) = serialized_size(&event) else {
            return false;
        };
        if size > MAX_PAYLOAD_SIZE || !fits(self.bytes, size) {
            return false;
        }
        self.buffer.push(Arc::new(event));
        self.bytes += size;
        true
    }

    /// Combines another buffer's records with this one.
    ///
    /// With `prepend == false` the result is `self ++ other`, otherwise
    /// `other ++ self`. The merge is all-or-nothing: if the combined size
    /// would exceed the ceiling, or `other` is not a buffer, nothing changes.
    /// `other` itself is never modified.
    pub fn merge<'a>(&mut self, other: impl Into<MergeSource<'a>>, prepend: bool) -> &mut Self {
        self.try_merge(other, prepend);
        self
    }

    /// Same as [`EventBuffer::merge`], but reports whether the merge happened.
    pub fn try_merge<'a>(&mut self, other: impl Into<MergeSource<'a>>, prepend: bool) -> bool {
        let MergeSource::Buffer(other) = other.into() else {
            return false;
        };
        if !fits(self.bytes, other.bytes) {
            return false;
        }
        if prepend {
            let mut merged = Vec::with_capacity(other.buffer.len() + self.buffer.len());
            merged.extend(other.buffer.iter().cloned());
            merged.append(&mut self.buffer);
            self.buffer = merged;
        } else {
            self.buffer.extend(other.buffer.iter().cloned());
        }
        self.bytes += other.bytes;
        true
    }

    /// Whether the buffer holds records worth harvesting.
    ///
    /// Both the record list and the byte count must be non-empty; an
    /// inconsistent buffer reads as empty.
    #[must_use]
    pub fn has_data(&self) -> bool {
        !self.buffer.is_empty() && self.bytes > 0
    }

    /// Whether `size` more bytes would still fit under the ceiling.
    #[must_use]
    pub fn can_merge(&self, size: usize) -> bool {
        fits(self.bytes, size)
    }

    /// Loosely-typed form of [`EventBuffer::can_merge`].
    ///
    /// Only a finite, non-negative JSON number is accepted; a missing value,
    /// negative numbers, strings, booleans, arrays and objects all return
    /// `false`.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn can_merge_value(&self, size: Option<&Value>) -> bool {
        let Some(Value::Number(size)) = size else {
            return false;
        };
        size.as_f64().is_some_and(|size| {
            size.is_finite()
                && size >= 0.0
                && self.bytes as f64 + size <= MAX_PAYLOAD_SIZE as f64
        })
    }

    /// Moves every record out, leaving this buffer empty.
    ///
    /// The returned buffer owns the drained batch, so a failed send can be
    /// merged straight back.
    #[must_use]
    pub fn take(&mut self) -> EventBuffer {
        std::mem::take(self)
    }

    /// Drops every record.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.bytes = 0;
    }

    #[must_use]
    pub fn events(&self) -> &[EventRecord] {
        &self.buffer
    }

    #[must_use]
    pub fn bytes(&self) -> usize {
        self.bytes
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    #[must_use]
    pub fn into_events(self) -> Vec<EventRecord> {
        self.buffer
    }
}

/// Serializes as a JSON array of the held records.
impl Serialize for EventBuffer {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_seq(self.buffer.iter().map(|event| &**event))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn size_of(event: &Value) -> usize {
        serde_json::to_string(event).unwrap().len()
    }

    fn values(buffer: &EventBuffer) -> Vec<Value> {
        buffer.events().iter().map(|e| e.as_ref().clone()).collect()
    }

    fn full_buffer() -> EventBuffer {
        let mut buffer = EventBuffer::new();
        buffer.add(json!({"test": "x".repeat(999_988)}));
        buffer
    }

    #[test]
    fn test_default_values() {
        let buffer = EventBuffer::new();
        assert_eq!(buffer.bytes(), 0);
        assert!(buffer.events().is_empty());
        assert!(!buffer.has_data());
    }

    #[test]
    fn test_add_maintains_size() {
        let mut buffer = EventBuffer::new();
        let event = json!({"test": 1});

        buffer.add(event.clone());

        assert_eq!(buffer.bytes(), size_of(&event));
        assert_eq!(values(&buffer), vec![event]);
        assert!(buffer.has_data());
    }

    #[test]
    fn test_add_rejects_single_oversized_event() {
        let mut buffer = EventBuffer::new();
        buffer.add(json!({"test": "x".repeat(1_000_000)}));

        assert!(buffer.events().is_empty());
        assert_eq!(buffer.bytes(), 0);
    }

    #[test]
    fn test_add_rejects_when_buffer_would_overflow() {
        let mut buffer = full_buffer();
        assert_eq!(buffer.bytes(), 999_999);
        assert_eq!(buffer.len(), 1);

        buffer.add(json!({"test2": "testing"}));

        assert_eq!(buffer.bytes(), 999_999);
        assert_eq!(buffer.len(), 1);
    }

    #[test]
    fn test_full_buffer_rejects_any_non_empty_event() {
        let mut buffer = full_buffer();
        assert!(!buffer.try_add(json!({})));
        assert!(!buffer.try_add(json!(0)));
        assert!(buffer.can_merge(0));
    }

    #[test]
    fn test_add_is_chainable() {
        let first = json!({"test": 1});
        let second = json!({"test": 2});
        let mut buffer = EventBuffer::new();

        buffer.add(first.clone()).add(second.clone());

        assert_eq!(buffer.bytes(), size_of(&first) + size_of(&second));
        assert_eq!(values(&buffer), vec![first, second]);
    }

    #[test]
    fn test_add_record_serializes_structs() {
        #[derive(Serialize)]
        struct Action<'a> {
            name: &'a str,
        }

        let mut buffer = EventBuffer::new();
        buffer.add_record(&Action { name: "click" });

        assert_eq!(values(&buffer), vec![json!({"name": "click"})]);
        assert_eq!(buffer.bytes(), r#"{"name":"click"}"#.len());
    }

    #[test]
    fn test_merge_append() {
        let mut buffer = EventBuffer::new();
        buffer.add(json!({"test": 1}));
        let mut second = EventBuffer::new();
        second.add(json!({"test": 2}));

        buffer.merge(&second, false);

        assert_eq!(values(&buffer), vec![json!({"test": 1}), json!({"test": 2})]);
        assert_eq!(
            buffer.bytes(),
            size_of(&json!({"test": 1})) + size_of(&json!({"test": 2}))
        );
    }

    #[test]
    fn test_merge_prepend() {
        let mut buffer = EventBuffer::new();
        buffer.add(json!({"test": 1}));
        let mut second = EventBuffer::new();
        second.add(json!({"test": 2}));

        buffer.merge(&second, true);

        assert_eq!(values(&buffer), vec![json!({"test": 2}), json!({"test": 1})]);
        assert_eq!(
            buffer.bytes(),
            size_of(&json!({"test": 1})) + size_of(&json!({"test": 2}))
        );
    }

    #[test]
    fn test_merge_leaves_source_untouched() {
        let mut buffer = EventBuffer::new();
        let mut second = EventBuffer::new();
        second.add(json!({"test": 2}));
        let before = second.clone();

        buffer.merge(&second, false);

        assert_eq!(second, before);
        // Records are shared rather than deep-copied
        assert!(Arc::ptr_eq(&buffer.events()[0], &second.events()[0]));
    }

    #[test]
    fn test_merge_foreign_values_is_noop() {
        let mut buffer = EventBuffer::new();
        buffer.add(json!({"test": 1}));
        let before = buffer.clone();

        let foreign = [
            json!({"regular": "object"}),
            json!("string"),
            json!(123),
            json!(true),
            Value::Null,
            json!({"buffer": [], "bytes": 0}),
        ];
        for value in &foreign {
            buffer.merge(value, false);
            assert_eq!(buffer, before);
        }
        buffer.merge(None::<&EventBuffer>, true);
        buffer.merge(MergeSource::Foreign, false);
        assert_eq!(buffer, before);
    }

    #[test]
    fn test_merge_rejects_when_too_big() {
        let mut buffer = full_buffer();
        let mut second = EventBuffer::new();
        second.add(json!({"test2": "testing"}));

        assert!(!buffer.try_merge(&second, false));
        assert!(!buffer.try_merge(&second, true));

        assert_eq!(buffer.len(), 1);
        assert_eq!(buffer.bytes(), 999_999);
    }

    #[test]
    fn test_merge_is_chainable() {
        let first = json!({"test1": 1});
        let second = json!({"test2": 2});
        let third = json!({"test3": 3});
        let mut buffer = EventBuffer::new();
        let mut second_buffer = EventBuffer::new();
        let mut third_buffer = EventBuffer::new();
        buffer.add(first.clone());
        second_buffer.add(second.clone());
        third_buffer.add(third.clone());

        buffer
            .merge(&second_buffer, false)
            .merge(&third_buffer, false);

        assert_eq!(
            buffer.bytes(),
            size_of(&first) + size_of(&second) + size_of(&third)
        );
        assert_eq!(values(&buffer), vec![first, second, third]);
    }

    #[test]
    fn test_has_data_false_without_events() {
        let mut buffer = EventBuffer::new();
        buffer.bytes = 100;
        assert!(!buffer.has_data());
    }

    #[test]
    fn test_has_data_false_without_bytes() {
        let mut buffer = EventBuffer::new();
        buffer.buffer.push(Arc::new(json!({"test": 1})));
        assert!(!buffer.has_data());
    }

    #[test]
    fn test_has_data_true_with_event() {
        let mut buffer = EventBuffer::new();
        buffer.add(json!({"test": 1}));
        assert!(buffer.has_data());
    }

    #[test]
    fn test_can_merge_false_when_too_big() {
        let mut buffer = EventBuffer::new();
        buffer.bytes = 999_999;
        assert!(!buffer.can_merge(1));
        assert!(buffer.can_merge(0));
        assert!(!buffer.can_merge(usize::MAX));
    }

    #[test]
    fn test_can_merge_value_requires_a_number() {
        let mut buffer = EventBuffer::new();
        buffer.buffer.push(Arc::new(json!({"test": 1})));

        assert!(!buffer.can_merge_value(None));
        assert!(!buffer.can_merge_value(Some(&json!("test"))));
        assert!(!buffer.can_merge_value(Some(&json!("20"))));
        assert!(!buffer.can_merge_value(Some(&json!(false))));
        assert!(!buffer.can_merge_value(Some(&json!(["test"]))));
        assert!(!buffer.can_merge_value(Some(&json!({"test": 1}))));
        assert!(!buffer.can_merge_value(Some(&Value::Null)));
        assert!(!buffer.can_merge_value(Some(&json!(-5))));
        assert!(!buffer.can_merge_value(Some(&json!(-0.5))));
    }

    #[test]
    fn test_can_merge_value_with_valid_size() {
        let mut buffer = EventBuffer::new();
        buffer.add(json!({"test": 1}));
        assert!(buffer.can_merge_value(Some(&json!(20))));
        assert!(buffer.can_merge_value(Some(&json!(20.5))));
        assert!(!buffer.can_merge_value(Some(&json!(999_999))));
    }

    #[test]
    fn test_take_empties_buffer() {
        let mut buffer = EventBuffer::new();
        buffer.add(json!({"test": 1})).add(json!({"test": 2}));
        let bytes = buffer.bytes();

        let drained = buffer.take();

        assert_eq!(drained.len(), 2);
        assert_eq!(drained.bytes(), bytes);
        assert!(buffer.is_empty());
        assert_eq!(buffer.bytes(), 0);

        // Adding after a take never touches the drained batch
        buffer.add(json!({"test": 3}));
        assert_eq!(drained.len(), 2);
    }

    #[test]
    fn test_clear() {
        let mut buffer = EventBuffer::new();
        buffer.add(json!({"test": 1}));
        buffer.clear();
        assert!(!buffer.has_data());
        assert_eq!(buffer.bytes(), 0);
    }

    #[test]
    fn test_serializes_as_array() {
        let mut buffer = EventBuffer::new();
        buffer.add(json!({"a": 1})).add(json!({"b": 2}));
        assert_eq!(
            serde_json::to_string(&buffer).unwrap(),
            r#"[{"a":1},{"b":2}]"#
        );
    }

    fn arb_event() -> impl Strategy<Value = Value> {
        prop_oneof![
            (any::<i64>()).prop_map(|n| json!({"n": n})),
            ".{0,64}".prop_map(|s| json!({"s": s})),
            (0usize..300_000).prop_map(|len| json!({"pad": "x".repeat(len)})),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(48))]

        #[test]
        fn prop_bytes_is_sum_of_accepted_sizes(events in proptest::collection::vec(arb_event(), 0..8)) {
            let mut buffer = EventBuffer::new();
            for event in events {
                let before = buffer.clone();
                let size = size_of(&event);
                let accepted = buffer.try_add(event);
                prop_assert_eq!(accepted, before.bytes() + size <= MAX_PAYLOAD_SIZE);
                if !accepted {
                    prop_assert_eq!(&buffer, &before);
                }
                let sum: usize = buffer.events().iter().map(|event| size_of(event)).sum();
                prop_assert_eq!(buffer.bytes(), sum);
                prop_assert!(buffer.bytes() <= MAX_PAYLOAD_SIZE);
            }
        }

        #[test]
        fn prop_merge_is_order_preserving(
            left in proptest::collection::vec(arb_event(), 0..4),
            right in proptest::collection::vec(arb_event(), 0..4),
            prepend in any::<bool>(),
        ) {
            let mut receiver = EventBuffer::new();
            for event in left {
                receiver.add(event);
            }
            let mut other = EventBuffer::new();
            for event in right {
                other.add(event);
            }
            let before = receiver.clone();

            let merged = receiver.try_merge(&other, prepend);

            if merged {
                let expected: Vec<Value> = if prepend {
                    values(&other).into_iter().chain(values(&before)).collect()
                } else {
                    values(&before).into_iter().chain(values(&other)).collect()
                };
                prop_assert_eq!(values(&receiver), expected);
                prop_assert_eq!(receiver.bytes(), before.bytes() + other.bytes());
            } else {
                prop_assert!(before.bytes() + other.bytes() > MAX_PAYLOAD_SIZE);
                prop_assert_eq!(&receiver, &before);
            }
        }
    }
}
