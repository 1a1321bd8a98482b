//! Locale helpers: speech locale normalisation and spoken apologies.

use crate::error::FailureKind;

/// Map short language tags to the regional speech locale the engines expect.
/// `hi` → `hi-IN`, `en_us` → `en-US`; anything unknown is passed through tidied.
pub fn normalize_locale(tag: &str) -> String {
    let tag = tag.trim().replace('_', "-");
    let mut parts = tag.split('-');
    let lang = parts.next().unwrap_or_default().to_ascii_lowercase();
    let region = parts.next().map(|r| r.to_ascii_uppercase());

    match (lang.as_str(), region) {
        ("", _) => "en-IN".to_string(),
        (_, Some(region)) if !region.is_empty() => format!("{}-{}", lang, region),
        ("en" | "hi" | "mr" | "ta" | "te" | "kn" | "bn" | "gu" | "pa" | "ml", _) => {
            format!("{}-IN", lang)
        }
        (_, _) => lang,
    }
}

/// Primary language subtag, lowercased.
pub fn language_of(locale: &str) -> String {
    locale
        .split(['-', '_'])
        .next()
        .unwrap_or_default()
        .to_ascii_lowercase()
}

/// The single apology spoken and logged for a failed turn.
pub fn apology(locale: &str, kind: FailureKind) -> &'static str {
    match (language_of(locale).as_str(), kind) {
        ("hi", FailureKind::PollingTimeout) => {
            "माफ़ कीजिए, जवाब आने में बहुत देर हो गई। कृपया फिर से पूछें।"
        }
        ("hi", FailureKind::Capture | FailureKind::CaptureUnavailable) => {
            "माफ़ कीजिए, मैं आपकी आवाज़ नहीं सुन पाया। कृपया फिर से बोलें।"
        }
        ("hi", _) => "माफ़ कीजिए, कुछ गड़बड़ हो गई। कृपया फिर से कोशिश करें।",
        (_, FailureKind::PollingTimeout) => {
            "Sorry, the answer is taking too long. Please ask again."
        }
        (_, FailureKind::Capture | FailureKind::CaptureUnavailable) => {
            "Sorry, I couldn't hear you. Please try speaking again."
        }
        (_, _) => "Sorry, something went wrong. Please try again.",
    }
}
