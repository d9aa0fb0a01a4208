//! Filter builder (§4.F): the single entrypoint that turns caller-supplied
//! [`RawFilters`] into a [`StoreFilter`] that is guaranteed to carry exactly
//! one tenant-id predicate. Fails closed: there is no path that produces a
//! `StoreFilter` without a tenant id.

use crate::error::{Error, Result};
use crate::model::{Predicate, RawFilters, StoreFilter};

/// Build a [`StoreFilter`] from raw, caller-supplied filter fields.
///
/// Fails with [`Error::Invariant`] if `tenant_id` is absent or empty. The
/// tenant predicate is always the first conjunct; optional predicates are
/// appended only when their source field is present and non-empty.
pub fn build(filters: &RawFilters) -> Result<StoreFilter> {
    let tenant_id = filters
        .tenant_id
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| {
            tracing::warn!("filter builder failing closed: no tenant id supplied");
            Error::Invariant("tenant_missing".to_string())
        })?;

    let mut predicates = vec![Predicate::Equals {
        field: "tenant_id".to_string(),
        value: tenant_id.to_string(),
    }];

    if let Some(session_id) = filters.session_id.as_deref().filter(|s| !s.is_empty()) {
        predicates.push(Predicate::Equals {
            field: "session_id".to_string(),
            value: session_id.to_string(),
        });
    }

    if let Some(r#type) = filters.r#type.as_deref().filter(|s| !s.is_empty()) {
        predicates.push(Predicate::Equals {
            field: "type".to_string(),
            value: r#type.to_string(),
        });
    }

    if let Some(range) = &filters.time_range {
        predicates.push(Predicate::Range {
            field: "timestamp".to_string(),
            start: range.start,
            end: range.end,
        });
    }

    Ok(StoreFilter::from_predicates(predicates))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RawFilters;

    #[test]
    fn fails_closed_without_tenant() {
        let err = build(&RawFilters::default()).unwrap_err();
        assert!(matches!(err, Error::Invariant(_)));
    }

    #[test]
    fn fails_closed_on_empty_tenant() {
        let err = build(&RawFilters::tenant("   ")).unwrap_err();
        assert!(matches!(err, Error::Invariant(_)));
    }

    #[test]
    fn tenant_predicate_always_first_and_exactly_once() {
        let f = build(&RawFilters::tenant("acme").with_session_id("s1").with_type("turn"))
            .unwrap();
        let tenant_predicates = f
            .predicates()
            .iter()
            .filter(|p| matches!(p, Predicate::Equals { field, .. } if field == "tenant_id"))
            .count();
        assert_eq!(tenant_predicates, 1);
        assert!(matches!(
            &f.predicates()[0],
            Predicate::Equals { field, .. } if field == "tenant_id"
        ));
        assert_eq!(f.tenant_id(), "acme");
    }

    #[test]
    fn optional_predicates_omitted_when_absent() {
        let f = build(&RawFilters::tenant("acme")).unwrap();
        assert_eq!(f.predicates().len(), 1);
    }

    #[test]
    fn optional_predicates_omitted_when_empty_string() {
        let f = build(&RawFilters::tenant("acme").with_session_id("")).unwrap();
        assert_eq!(f.predicates().len(), 1);
    }

    #[test]
    fn is_idempotent_function_not_transformer() {
        let raw = RawFilters::tenant("acme").with_session_id("s1");
        let a = build(&raw).unwrap();
        let b = build(&raw).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn time_range_appends_range_predicate() {
        let f = build(&RawFilters::tenant("acme").with_time_range(10, 20)).unwrap();
        assert!(f
            .predicates()
            .iter()
            .any(|p| matches!(p, Predicate::Range { field, start: 10, end: 20 } if field == "timestamp")));
    }
}
