// ABOUTME: Environment variable name constants
// ABOUTME: Centralized definitions of all environment variable names used across Kiln

// Sandbox Provider (E2B)
pub const E2B_API_KEY: &str = "E2B_API_KEY";
pub const E2B_TEMPLATE_ID: &str = "E2B_TEMPLATE_ID";
pub const E2B_API_URL: &str = "E2B_API_URL";
pub const E2B_DOMAIN: &str = "E2B_DOMAIN";

// Sandbox Lifecycle
pub const KILN_SANDBOX_TIMEOUT_SECS: &str = "KILN_SANDBOX_TIMEOUT_SECS";
pub const KILN_SANDBOX_PORT: &str = "KILN_SANDBOX_PORT";
pub const KILN_PREPARE_SETTLE_SECS: &str = "KILN_PREPARE_SETTLE_SECS";

// Model Provider
pub const OPENAI_API_KEY: &str = "OPENAI_API_KEY";
pub const OPENAI_BASE_URL: &str = "OPENAI_BASE_URL";
pub const KILN_AGENT_MODEL: &str = "KILN_AGENT_MODEL";
pub const KILN_SUMMARY_MODEL: &str = "KILN_SUMMARY_MODEL";
pub const KILN_HTTP_REQUEST_TIMEOUT_SECS: &str = "KILN_HTTP_REQUEST_TIMEOUT_SECS";

// Agent Loop
pub const KILN_MAX_ITERATIONS: &str = "KILN_MAX_ITERATIONS";
pub const KILN_CONTEXT_MESSAGES: &str = "KILN_CONTEXT_MESSAGES";

// Durable Steps
pub const KILN_STEP_MAX_ATTEMPTS: &str = "KILN_STEP_MAX_ATTEMPTS";
pub const KILN_STEP_BACKOFF_MS: &str = "KILN_STEP_BACKOFF_MS";

// Persistence
pub const DATABASE_URL: &str = "DATABASE_URL";

// Usage Credits
pub const KILN_FREE_CREDITS: &str = "KILN_FREE_CREDITS";
pub const KILN_PRO_CREDITS: &str = "KILN_PRO_CREDITS";
pub const KILN_CREDIT_WINDOW_SECS: &str = "KILN_CREDIT_WINDOW_SECS";

// Defaults
pub const DEFAULT_TEMPLATE_ID: &str = "base";
pub const DEFAULT_E2B_API_URL: &str = "https://api.e2b.dev";
pub const DEFAULT_E2B_DOMAIN: &str = "e2b.app";
pub const DEFAULT_SANDBOX_TIMEOUT_SECS: u64 = 30 * 60;
pub const DEFAULT_SANDBOX_PORT: u16 = 3000;
pub const DEFAULT_PREPARE_SETTLE_SECS: u64 = 10;
pub const DEFAULT_OPENAI_BASE_URL: &str = "https://models.github.ai/inference";
pub const DEFAULT_AGENT_MODEL: &str = "gpt-4.1";
pub const DEFAULT_SUMMARY_MODEL: &str = "gpt-4o";
pub const DEFAULT_HTTP_REQUEST_TIMEOUT_SECS: u64 = 600;
pub const DEFAULT_MAX_ITERATIONS: u32 = 15;
pub const DEFAULT_CONTEXT_MESSAGES: u32 = 5;
pub const DEFAULT_STEP_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_STEP_BACKOFF_MS: u64 = 500;
pub const DEFAULT_DATABASE_URL: &str = "sqlite://kiln.db";
pub const DEFAULT_FREE_CREDITS: u32 = 5;
pub const DEFAULT_PRO_CREDITS: u32 = 100;
pub const DEFAULT_CREDIT_WINDOW_SECS: u64 = 30 * 24 * 60 * 60;
