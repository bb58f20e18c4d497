use regex::Regex;
use url::Url;

use crate::error::AppError;
use crate::types::FeatureVector;

/// Fixed feature ordering the URL model's split indices are relative to.
/// Must stay in sync with the extractor used to train the model.
pub const URL_FEATURE_NAMES: [&str; 12] = [
    "have_ip",
    "have_at",
    "url_length",
    "url_depth",
    "redirection",
    "https_in_domain",
    "tiny_url",
    "prefix_suffix",
    "suspicious_words",
    "has_subdomain",
    "digit_count",
    "special_char_count",
];

// Words that often appear in phishing URLs
const SUSPICIOUS_WORDS: [&str; 7] = [
    "login", "secure", "account", "update", "bank", "signin", "verify",
];

pub struct UrlFeatureExtractor {
    ipv4: Regex,
    shorteners: Regex,
}

impl UrlFeatureExtractor {
    pub fn new() -> Self {
        // ASCII digit groups only; the training extractor used \d in ASCII mode
        let ipv4 = Regex::new(r"[0-9]+\.[0-9]+\.[0-9]+\.[0-9]+").expect("ipv4 pattern");
        let shorteners = Regex::new(
            r"(?i)(bit\.ly|goo\.gl|shorte\.st|go2l\.ink|x\.co|ow\.ly|tinyurl\.com|qr\.net|1url\.com|tweez\.me|v\.gd|tr\.im|link\.zip\.net)",
        )
        .expect("shortener pattern");
        Self { ipv4, shorteners }
    }

    /// Extract the 12-dimensional feature vector from an absolute URL.
    ///
    /// Lexical features are computed over the raw URL text, not a
    /// re-normalized form; the trained model was fit on exactly this
    /// encoding.
    pub fn extract(&self, url: &str) -> Result<FeatureVector, AppError> {
        let parsed = Url::parse(url).map_err(|e| AppError::MalformedUrl(e.to_string()))?;
        let hostname = parsed.host_str().unwrap_or("");
        let path = parsed.path();

        let lower = url.to_lowercase();

        let have_ip = self.ipv4.is_match(url);
        let have_at = url.contains('@');
        let url_length = url.chars().count();
        let url_depth = path.matches('/').count();
        // "//" occurring after the scheme separator
        let after_scheme = match url.find("://") {
            Some(i) => &url[i + 3..],
            None => url,
        };
        let redirection = after_scheme.contains("//");
        let https_in_domain = hostname.contains("https");
        let tiny_url = self.shorteners.is_match(url);
        let prefix_suffix = hostname.contains('-');
        // Presence per keyword, not occurrence count
        let suspicious_words = SUSPICIOUS_WORDS
            .iter()
            .filter(|w| lower.contains(*w))
            .count();
        let has_subdomain = hostname.matches('.').count() > 2;
        let digit_count = url.chars().filter(|c| c.is_ascii_digit()).count();
        let special_char_count = url
            .chars()
            .filter(|c| !(c.is_ascii_alphanumeric() || *c == '_'))
            .count();

        let mut feats = FeatureVector::with_capacity(URL_FEATURE_NAMES.len());
        feats.insert("have_ip".to_string(), have_ip as u8 as f64);
        feats.insert("have_at".to_string(), have_at as u8 as f64);
        feats.insert("url_length".to_string(), url_length as f64);
        feats.insert("url_depth".to_string(), url_depth as f64);
        feats.insert("redirection".to_string(), redirection as u8 as f64);
        feats.insert("https_in_domain".to_string(), https_in_domain as u8 as f64);
        feats.insert("tiny_url".to_string(), tiny_url as u8 as f64);
        feats.insert("prefix_suffix".to_string(), prefix_suffix as u8 as f64);
        feats.insert("suspicious_words".to_string(), suspicious_words as f64);
        feats.insert("has_subdomain".to_string(), has_subdomain as u8 as f64);
        feats.insert("digit_count".to_string(), digit_count as f64);
        feats.insert("special_char_count".to_string(), special_char_count as f64);

        Ok(feats)
    }
}

impl Default for UrlFeatureExtractor {
    fn default() -> Self {
        Self::new()
    }
}
