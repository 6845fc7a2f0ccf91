//! Distinct maps
//!
//! A distinct map remembers which values have already been emitted. Two strategies
//! exist:
//!
//! - [`OrderedDistinctMap`]: input arrives sorted on the distinct key, so only the last
//!   hash needs to be kept.
//! - [`UnorderedDistinctMap`]: no ordering; every value seen is retained, bucketed by
//!   kind so that numbers and short strings are stored exactly.
//!
//! Both serialize to a continuation token and can be rebuilt from one.

use crate::hash;
use crate::unordered::UnorderedDistinctMap;
use query_core::{DistinctQueryType, QueryError, Result, Value};

/// Distinct map keeping only the hash of the previous value
#[derive(Debug, Clone, Default)]
pub struct OrderedDistinctMap {
    last_hash: Option<u128>,
}

impl OrderedDistinctMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resume from the hash recorded in a continuation token
    pub fn with_last_hash(last_hash: u128) -> Self {
        Self {
            last_hash: Some(last_hash),
        }
    }

    /// Add a value; true when it differs from the previous one
    pub fn add(&mut self, value: &Value) -> bool {
        let hash = hash::hash(value);
        if self.last_hash == Some(hash) {
            return false;
        }
        self.last_hash = Some(hash);
        true
    }

    /// Last hash as 32 hex digits, `None` before the first value
    pub fn continuation_token(&self) -> Option<String> {
        self.last_hash.map(|hash| format!("{:032x}", hash))
    }

    pub fn try_create(token: Option<&str>) -> Result<Self> {
        match token {
            None => Ok(Self::new()),
            Some(token) => parse_hash(token)
                .map(Self::with_last_hash)
                .ok_or_else(|| {
                    QueryError::malformed_continuation(
                        "ordered distinct map token is not a 128-bit hex hash",
                        token,
                    )
                }),
        }
    }
}

/// Parse 32 hex digits into a hash
pub(crate) fn parse_hash(text: &str) -> Option<u128> {
    if text.len() != 32 || !text.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    u128::from_str_radix(text, 16).ok()
}

/// Distinct map for either strategy
#[derive(Debug, Clone)]
pub enum DistinctMap {
    Ordered(OrderedDistinctMap),
    Unordered(UnorderedDistinctMap),
}

impl DistinctMap {
    /// Create a map for `mode`, resuming from `token` if given.
    ///
    /// `DistinctQueryType::None` is a planning error: there is nothing to deduplicate.
    pub fn try_create(mode: DistinctQueryType, token: Option<&str>) -> Result<Self> {
        match mode {
            DistinctQueryType::Ordered => {
                OrderedDistinctMap::try_create(token).map(DistinctMap::Ordered)
            }
            DistinctQueryType::Unordered => {
                UnorderedDistinctMap::try_create(token).map(DistinctMap::Unordered)
            }
            DistinctQueryType::None => Err(QueryError::InvalidPlan(
                "a distinct map needs an ordered or unordered distinct query".to_string(),
            )),
        }
    }

    /// Add a value; true when it was not seen before
    pub fn add(&mut self, value: &Value) -> bool {
        match self {
            DistinctMap::Ordered(map) => map.add(value),
            DistinctMap::Unordered(map) => map.add(value),
        }
    }

    pub fn continuation_token(&self) -> Option<String> {
        match self {
            DistinctMap::Ordered(map) => map.continuation_token(),
            DistinctMap::Unordered(map) => map.continuation_token(),
        }
    }

    pub fn mode(&self) -> DistinctQueryType {
        match self {
            DistinctMap::Ordered(_) => DistinctQueryType::Ordered,
            DistinctMap::Unordered(_) => DistinctQueryType::Unordered,
        }
    }
}
