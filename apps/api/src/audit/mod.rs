//! Call Logger / Audit Trail: one entry per completion attempt, grouped into sessions,
//! with per-stage reports and replay export.

pub mod handlers;
pub mod logger;
pub mod models;
pub mod replay;
