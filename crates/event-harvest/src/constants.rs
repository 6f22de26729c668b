// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Size and timing limits shared by the buffers and the transport.

use std::time::Duration;

/// Maximum serialized size of a single harvest payload, in bytes.
///
/// Every [`EventBuffer`](crate::event_buffer::EventBuffer) is capped at it.
/// The cap covers the summed sizes of the buffered records only. The request
/// body adds the `{"<key>":[...]}` envelope and one comma between records, so
/// a full batch goes slightly over this many bytes on the wire.
///
/// # Value: 999,999 bytes (just under 1MB)
pub const MAX_PAYLOAD_SIZE: usize = 999_999;

/// Default time between two scheduled harvests.
pub const DEFAULT_HARVEST_INTERVAL: Duration = Duration::from_secs(30);

/// Default per-request timeout used by the HTTP transport.
pub const DEFAULT_HARVEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Default collector endpoint.
pub const DEFAULT_HARVEST_ENDPOINT: &str = "https://bam.nr-data.net";
