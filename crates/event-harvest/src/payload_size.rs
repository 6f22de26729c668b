// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Byte accounting for JSON payloads.
//!
//! Sizes are the exact UTF-8 length of the compact JSON encoding, i.e. the
//! number of bytes the record occupies in the request body. They are computed
//! by streaming the serializer into a counting writer, so no intermediate
//! string is allocated.

use serde::Serialize;
use std::io;

use crate::constants::MAX_PAYLOAD_SIZE;

#[derive(Debug, Default)]
struct ByteCounter(usize);

impl io::Write for ByteCounter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0 += buf.len();
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Returns the serialized JSON size of `value` in bytes.
///
/// Returns `None` when the value cannot be represented as JSON (for example a
/// map with non-string keys).
#[must_use]
pub fn serialized_size<T>(value: &T) -> Option<usize>
where
    T: Serialize + ?Sized,
{
    let mut counter = ByteCounter::default();
    serde_json::to_writer(&mut counter, value).ok()?;
    Some(counter.0)
}

/// Returns whether `current + additional` stays within [`MAX_PAYLOAD_SIZE`].
///
/// Overflow counts as not fitting.
#[must_use]
pub fn fits(current: usize, additional: usize) -> bool {
    current
        .checked_add(additional)
        .is_some_and(|total| total <= MAX_PAYLOAD_SIZE)
}
