//! Tracing initialisation and log-safe formatting helpers.

use crate::config::{LogFormat, LoggingConfig};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the global tracing subscriber.
///
/// `RUST_LOG` takes precedence; otherwise the configured level applies to
/// this crate and `warn` to everything else.
pub fn init_tracing(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "warn,voucher_backend={level},voucher_backend::middleware=info,tower_http=info",
            level = config.level.to_lowercase()
        ))
    });

    let registry = tracing_subscriber::registry().with(filter);

    let result = match config.format {
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_target(true),
            )
            .try_init(),
        LogFormat::Plain => registry
            .with(fmt::layer().with_target(false).compact())
            .try_init(),
    };

    if let Err(e) = result {
        eprintln!("tracing already initialised: {}", e);
    }
}

/// Mask a phone number for logs, keeping the country prefix and last two digits.
pub fn mask_phone(phone: &str) -> String {
    let chars: Vec<char> = phone.chars().collect();
    if chars.len() <= 6 {
        return "*".repeat(chars.len());
    }
    let head: String = chars[..5].iter().collect();
    let tail: String = chars[chars.len() - 2..].iter().collect();
    format!("{}{}{}", head, "*".repeat(chars.len() - 7), tail)
}

/// Mask a voucher code, leaving only its last two characters visible.
pub fn mask_voucher(code: &str) -> String {
    let chars: Vec<char> = code.chars().collect();
    if chars.len() <= 2 {
        return "**".to_string();
    }
    let tail: String = chars[chars.len() - 2..].iter().collect();
    format!("{}{}", "*".repeat(chars.len() - 2), tail)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phone_mask_keeps_prefix_and_suffix() {
        assert_eq!(mask_phone("+256700000001"), "+2567******01");
        assert_eq!(mask_phone("12345"), "*****");
    }

    #[test]
    fn voucher_mask_hides_all_but_tail() {
        assert_eq!(mask_voucher("WIFI-8842"), "*******42");
        assert_eq!(mask_voucher("A"), "**");
    }
}
