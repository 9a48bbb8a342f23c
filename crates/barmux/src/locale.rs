use chrono::Locale;
use std::env::var;

/// Returns the `Locale` enum based on the `LC_ALL`/`LC_TIME`/`LANG`
/// environment variables, in that precedence order.
/// If none is defined or the value is malformed, use the POSIX locale.
pub fn get_locale() -> Locale {
    let locale_string: String = var("LC_ALL")
        .or_else(|_| var("LC_TIME"))
        .or_else(|_| var("LANG"))
        .map_or_else(|_| "C".to_string(), |v| v.split('.').next().unwrap_or("C").to_string());

    match (&*locale_string).try_into() {
        Ok(x) => x,
        Err(_) => Locale::POSIX,
    }
}
