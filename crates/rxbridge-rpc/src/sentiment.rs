//! Keyword sentiment scorer exposed as the `sentiment.analyse` handler.

use rxbridge_core::{Fields, HandlerCall, Native};
use serde_json::{json, Value};

pub const HANDLER_NAME: &str = "sentiment.analyse";
pub const PROVIDER: &str = "rust-bridge-stub";

const POSITIVE: &[&str] = &["great", "good", "love", "fantastic", "amazing", "happy"];
const NEGATIVE: &[&str] = &["bad", "terrible", "hate", "awful", "sad", "angry"];

/// Score `text` in [-1, 1]: one third per matched keyword, clamped.
pub fn score_text(text: &str) -> f64 {
    if text.is_empty() {
        return 0.0;
    }
    let lowered = text.to_lowercase();
    let hits = |words: &[&str]| words.iter().filter(|w| lowered.contains(**w)).count() as i64;
    let score = hits(POSITIVE) - hits(NEGATIVE);
    if score == 0 {
        return 0.0;
    }
    (score as f64 / 3.0).clamp(-1.0, 1.0)
}

pub fn confidence(score: f64) -> f64 {
    if score == 0.0 {
        0.3
    } else {
        score.abs().min(1.0)
    }
}

/// Per-sentence scores. Sentences end at `.`, `!` or `?`.
pub fn breakdown(text: &str) -> Vec<Value> {
    text.split(['.', '!', '?'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| json!({"sentence": s, "score": score_text(s)}))
        .collect()
}

/// Handler entry point.
pub fn analyse(call: HandlerCall) -> anyhow::Result<Fields> {
    let body = call.input.get("body");
    let field = |key: &str| {
        body.and_then(|b| b.get(key))
            .and_then(Value::as_str)
            .map(str::trim)
            .unwrap_or_default()
            .to_string()
    };
    let text = field("text");
    let language = field("language");

    let score = score_text(&text);
    let confidence = confidence(score);

    let mut log_fields = Fields::new();
    log_fields.insert("score".into(), Native::from(score));
    log_fields.insert("confidence".into(), Native::from(confidence));
    log_fields.insert("length".into(), Native::from(text.chars().count()));
    log_fields.insert("traceId".into(), Native::from(call.meta.trace_id.as_str()));
    call.ctx.info("sentiment analysed", log_fields);

    let language = if language.is_empty() {
        Value::Null
    } else {
        Value::String(language)
    };
    let body = json!({
        "text": text,
        "language": language,
        "polarity": score,
        "confidence": confidence,
        "breakdown": breakdown(&text),
        "provider": PROVIDER,
        "timestamp": chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Nanos, true),
    });

    let mut output = Fields::new();
    output.insert("status".into(), Native::Int(200));
    output.insert("body".into(), Native::Json(body));
    Ok(output)
}
