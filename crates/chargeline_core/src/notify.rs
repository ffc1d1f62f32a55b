//! Outbound notification seam.
//!
//! # Invariants
//! - Dispatch is fire-and-forget; callers never wait on delivery.
//! - Reset tokens and addresses are never written to logs.

use log::info;

/// Delivers password-reset notifications to an account's address.
pub trait PasswordResetNotifier {
    fn send_password_reset(&self, token: &str, email: &str);
}

/// Notifier that only records the dispatch event in the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl PasswordResetNotifier for LogNotifier {
    fn send_password_reset(&self, token: &str, _email: &str) {
        info!(
            "event=password_reset_dispatch module=notify status=ok token_len={}",
            token.chars().count()
        );
    }
}

impl<N: PasswordResetNotifier + ?Sized> PasswordResetNotifier for &N {
    fn send_password_reset(&self, token: &str, email: &str) {
        (**self).send_password_reset(token, email);
    }
}
