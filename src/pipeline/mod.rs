//! Building blocks of one conversion request.
//!
//! ## Data Flow
//!
//! ```text
//! workspace ──▶ backend ──▶ runner ──▶ backend (verify)
//!  (tempdir)    (script,    (spawn,     (output exists,
//!               argv, env)   timeout)    non-empty)
//! ```
//!
//! 1. [`workspace`] — scoped temporary directory; removed on release or drop
//! 2. [`backend`]   — the priority-ordered backend table, invocation building,
//!    and a single attempt including artifact verification
//! 3. [`runner`]    — the [`runner::CommandRunner`] seam and its tokio
//!    implementation with bounded output capture and kill-on-timeout
//!
//! [`crate::convert`] strings these together and owns the fallback policy.

pub mod backend;
pub mod runner;
pub mod workspace;
