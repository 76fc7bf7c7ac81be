// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use yare::parameterized;

#[parameterized(
    retryable = { ErrorKind::Retryable, true },
    timeout = { ErrorKind::Timeout, true },
    validation = { ErrorKind::Validation, false },
    upstream = { ErrorKind::PermanentUpstreamFailure, false },
    cancelled = { ErrorKind::Cancelled, false },
)]
fn retry_policy(kind: ErrorKind, retryable: bool) {
    assert_eq!(kind.is_retryable(), retryable);
}

#[test]
fn node_error_displays_kind_and_detail() {
    let err = NodeError::validation("payload missing text");
    assert_eq!(err.to_string(), "validation: payload missing text");
}

#[test]
fn kind_serializes_snake_case() {
    let json = serde_json::to_string(&ErrorKind::PermanentUpstreamFailure).unwrap();
    assert_eq!(json, "\"permanent_upstream_failure\"");
}

#[test]
fn entry_captures_attempt_and_node() {
    let err = NodeError::retryable("503 from fact-check service");
    let entry = ErrorEntry::from_node_error(Stage::EvidenceRetrieve, &err, 2, 1234);
    assert_eq!(entry.node, Stage::EvidenceRetrieve);
    assert_eq!(entry.kind, ErrorKind::Retryable);
    assert_eq!(entry.attempt, 2);
    assert_eq!(entry.at_ms, 1234);
}
