// src/services/mod.rs
//
// Shared services module containing collaborators the auth core depends on

pub mod email;

// Re-export commonly used types for convenience
pub use email::{Mailer, NullMailer, OutgoingEmail, SesMailer};
