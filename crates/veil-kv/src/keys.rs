//! Key builders for the rate-limiting namespace, one per concern.

pub fn otp(phone_number: i64) -> String {
    format!("otp:{phone_number}")
}

pub fn resend_cooldown(phone_number: i64) -> String {
    format!("resendcooldown:{phone_number}")
}

pub fn verification_attempts(phone_number: i64) -> String {
    format!("verificationattempts:{phone_number}")
}

pub fn verification_cooldown(phone_number: i64) -> String {
    format!("verificationcooldown:{phone_number}")
}
