// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! License key handling.
//!
//! The key is part of every harvest URL, so it is kept in a [`LicenseKey`]
//! whose `Debug` and `Display` output only show the last four characters.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::OnceCell;

const VISIBLE_SUFFIX: usize = 4;

/// A non-blank license key that redacts itself when formatted.
#[derive(Clone, PartialEq, Eq)]
pub struct LicenseKey(String);

impl LicenseKey {
    /// Trims `key`, rejecting blank input.
    #[must_use]
    pub fn new(key: impl Into<String>) -> Option<Self> {
        let key = key.into();
        let trimmed = key.trim();
        if trimmed.is_empty() {
            return None;
        }
        Some(LicenseKey(trimmed.to_string()))
    }

    /// The raw key, for building request URLs.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }

    fn redacted(&self) -> String {
        let chars: Vec<char> = self.0.chars().collect();
        if chars.len() <= VISIBLE_SUFFIX {
            return "****".to_string();
        }
        let suffix: String = chars[chars.len() - VISIBLE_SUFFIX..].iter().collect();
        format!("****{suffix}")
    }
}

impl fmt::Debug for LicenseKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("LicenseKey").field(&self.redacted()).finish()
    }
}

impl fmt::Display for LicenseKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.redacted())
    }
}

pub type LicenseKeyResolverFn =
    Arc<dyn Fn() -> Pin<Box<dyn Future<Output = Option<String>> + Send>> + Send + Sync>;

/// Hands out the license key, resolving it on first use when needed.
///
/// A resolver that yields nothing (or a blank key) is asked again on the
/// next call; once a key is known it is cached for the life of the factory.
pub struct LicenseKeyFactory {
    key: OnceCell<LicenseKey>,
    resolver: Option<LicenseKeyResolverFn>,
}

impl LicenseKeyFactory {
    /// A factory that always yields `key`. A blank key yields nothing.
    #[must_use]
    pub fn from_static(key: &str) -> Self {
        LicenseKeyFactory {
            key: OnceCell::new_with(LicenseKey::new(key)),
            resolver: None,
        }
    }

    #[must_use]
    pub fn from_resolver(resolver: LicenseKeyResolverFn) -> Self {
        LicenseKeyFactory {
            key: OnceCell::new(),
            resolver: Some(resolver),
        }
    }

    pub async fn license_key(&self) -> Option<&LicenseKey> {
        if let Some(key) = self.key.get() {
            return Some(key);
        }
        let resolver = self.resolver.as_ref()?;
        self.key
            .get_or_try_init(|| async {
                resolver()
                    .await
                    .and_then(|key| LicenseKey::new(key))
                    .ok_or(())
            })
            .await
            .ok()
    }
}

impl fmt::Debug for LicenseKeyFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let source = if self.resolver.is_some() {
            "resolver"
        } else {
            "static"
        };
        f.debug_struct("LicenseKeyFactory")
            .field("source", &source)
            .field("key", &self.key.get())
            .finish()
    }
}
