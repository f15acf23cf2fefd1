//! CLI plumbing: the HTTP client used by the `submit` / `status` / `cancel`
//! commands against a running server.

pub mod api_client;
