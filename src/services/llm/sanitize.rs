//! Output hygiene for local models. Small instruction-tuned models leak
//! chat template markers, echo role labels, and hallucinate continuation
//! sections; everything here strips those before tokens reach the client
//! or the database.

use std::sync::LazyLock;

use regex::Regex;

const TEMPLATE_MARKERS: [&str; 4] = ["<|system|>", "<|user|>", "<|assistant|>", "<|end|>"];

static ROLE_ECHO_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:USER|User|user|ASSISTANT|Assistant|assistant|SYSTEM|System)\s*:\s*")
        .expect("role echo regex")
});

static TRAILING_SECTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?:QUESTION|REMINDER|DOCUMENTS|PREVIOUS CHAT|Question|Answer|Note|Important|Please note|Q|A)\s*:",
    )
    .expect("trailing section regex")
});

/// Per-token strip applied during streaming. Markers split across token
/// boundaries are caught by the accumulated pass.
pub fn clean_token(token: &str) -> String {
    let mut cleaned = token.to_string();
    for marker in TEMPLATE_MARKERS {
        if cleaned.contains(marker) {
            cleaned = cleaned.replace(marker, "");
        }
    }
    cleaned
}

/// Full strip applied to accumulated text before persistence: template
/// markers, echoed role labels at line start, and everything from the first
/// trailing hallucinated section onward.
pub fn clean_response(text: &str) -> String {
    let mut cleaned = text.to_string();
    for marker in TEMPLATE_MARKERS {
        cleaned = cleaned.replace(marker, "");
    }

    let mut kept: Vec<String> = Vec::new();
    let mut seen_content = false;
    for line in cleaned.lines() {
        let mut stripped = line.to_string();
        while let Some(m) = ROLE_ECHO_RE.find(&stripped) {
            stripped = stripped[m.end()..].to_string();
        }

        if seen_content && TRAILING_SECTION_RE.is_match(stripped.trim_start()) {
            break;
        }
        if !stripped.trim().is_empty() {
            seen_content = true;
        }
        kept.push(stripped);
    }

    kept.join("\n").trim().to_string()
}
