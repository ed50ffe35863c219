//! Shared constants for end-to-end tests
//!
//! When tool names or canned upstream data change, update only this file.

// ============================================================================
// Server
// ============================================================================

pub const MCP_PATH: &str = "/mcp";

pub const SESSION_HEADER: &str = "mcp-session-id";

/// Cache TTL used unless a test asks for something else
pub const DEFAULT_TEST_CACHE_TTL_SECS: u64 = 60;

// ============================================================================
// Tools
// ============================================================================

pub const BMI_TOOL: &str = "calculate_bmi";

pub const PUBMED_TOOL: &str = "pubmed_search";

/// Test-only tool that blocks until released
pub const SLOW_TOOL: &str = "slow_tool";

/// Test-only tool that panics
pub const PANIC_TOOL: &str = "panic_tool";

// ============================================================================
// Canned upstream data
// ============================================================================

/// PMID returned by the fake E-utilities server for every search
pub const PUBMED_PMID: &str = "31452104";

pub const PUBMED_TITLE: &str = "Asthma in children: a review";

pub const PUBMED_JOURNAL: &str = "Pediatric Pulmonology";

// ============================================================================
// Timeouts
// ============================================================================

/// Maximum time to wait for the server to become ready
pub const SERVER_READY_TIMEOUT_MS: u64 = 5000;

/// Interval between readiness checks
pub const SERVER_READY_POLL_INTERVAL_MS: u64 = 10;

/// Per-request timeout for the test client
pub const REQUEST_TIMEOUT_SECS: u64 = 10;

/// Longest a test waits for a single SSE event
pub const SSE_EVENT_TIMEOUT_MS: u64 = 3000;
