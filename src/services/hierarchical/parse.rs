//! Parsers for structured output coming back from LLMs, especially local
//! models that wrap JSON in prose, code fences, or half-broken syntax.
//! Each strategy is total: it returns `Option`/empty instead of failing,
//! and the chain is tried in a fixed order.

use std::sync::LazyLock;

use regex::Regex;

use crate::models::study::{FlashcardDraft, MindMapDoc, MindMapNode};

static FENCE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"```(?:json)?\s*").expect("fence regex"));

static TRAILING_COMMA_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r",\s*([\]\}])").expect("trailing comma regex"));

static CARD_PAIR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"\{\s*"front"\s*:\s*"((?:\\.|[^"\\])*)"\s*,\s*"back"\s*:\s*"((?:\\.|[^"\\])*)"\s*\}"#,
    )
    .expect("card pair regex")
});

static QA_FRONT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^(?:Q|Front|Question)\d*[:.]\s*(.+)$").expect("front regex"));

static QA_BACK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^(?:A|Back|Answer)\d*[:.]\s*(.+)$").expect("back regex"));

fn strip_fences(text: &str) -> String {
    let without_open = FENCE_RE.replace_all(text, "");
    without_open.replace("```", "").trim().to_string()
}

/// Bracket-matched extraction of the first balanced `[...]` or `{...}`,
/// skipping string literals and escape sequences.
fn extract_balanced(text: &str, open: char, close: char) -> Option<String> {
    let start = text.find(open)?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escape_next = false;

    for (i, c) in text.char_indices().skip_while(|(i, _)| *i < start) {
        if escape_next {
            escape_next = false;
            continue;
        }
        match c {
            '\\' if in_string => escape_next = true,
            '"' => in_string = !in_string,
            c if c == open && !in_string => depth += 1,
            c if c == close && !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(text[start..i + c.len_utf8()].to_string());
                }
            }
            _ => {}
        }
    }
    None
}

fn json_cards(value: serde_json::Value) -> Vec<FlashcardDraft> {
    let items = match value {
        serde_json::Value::Array(items) => items,
        serde_json::Value::Object(mut map) => match map.remove("flashcards") {
            Some(serde_json::Value::Array(items)) => items,
            _ => return Vec::new(),
        },
        _ => return Vec::new(),
    };

    items
        .into_iter()
        .filter_map(|item| {
            let front = item.get("front")?.as_str()?.trim().to_string();
            let back = item.get("back")?.as_str()?.trim().to_string();
            if front.is_empty() || back.is_empty() {
                return None;
            }
            Some(FlashcardDraft { front, back })
        })
        .collect()
}

fn parse_cards_direct(text: &str) -> Option<Vec<FlashcardDraft>> {
    let cards = json_cards(serde_json::from_str(text).ok()?);
    if cards.is_empty() { None } else { Some(cards) }
}

fn parse_cards_fenced(text: &str) -> Option<Vec<FlashcardDraft>> {
    parse_cards_direct(&strip_fences(text))
}

fn parse_cards_bracketed(text: &str) -> Option<Vec<FlashcardDraft>> {
    let cleaned = strip_fences(text);
    let candidate = extract_balanced(&cleaned, '[', ']')?;
    let candidate = TRAILING_COMMA_RE.replace_all(&candidate, "$1").to_string();
    parse_cards_direct(&candidate)
}

fn parse_cards_regex(text: &str) -> Option<Vec<FlashcardDraft>> {
    let cards: Vec<FlashcardDraft> = CARD_PAIR_RE
        .captures_iter(text)
        .filter_map(|caps| {
            let front = unescape_json_string(caps.get(1)?.as_str());
            let back = unescape_json_string(caps.get(2)?.as_str());
            Some(FlashcardDraft { front, back })
        })
        .collect();
    if cards.is_empty() { None } else { Some(cards) }
}

fn unescape_json_string(escaped: &str) -> String {
    serde_json::from_str::<String>(&format!("\"{escaped}\""))
        .unwrap_or_else(|_| escaped.replace("\\\\", "\\").replace("\\\"", "\""))
}

/// Line-oriented `Q:` / `A:` fallback for models that ignore the JSON
/// instruction entirely.
fn parse_cards_qa_lines(text: &str) -> Option<Vec<FlashcardDraft>> {
    let mut cards = Vec::new();
    let mut current_front: Option<String> = None;

    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Some(caps) = QA_FRONT_RE.captures(line) {
            current_front = Some(caps[1].trim().to_string());
        } else if let Some(caps) = QA_BACK_RE.captures(line)
            && let Some(front) = current_front.take()
        {
            cards.push(FlashcardDraft {
                front,
                back: caps[1].trim().to_string(),
            });
        }
    }

    if cards.is_empty() { None } else { Some(cards) }
}

/// Flashcard parsing chain. Returns an empty list only when every strategy
/// yields zero structured items.
pub fn parse_flashcards(text: &str) -> Vec<FlashcardDraft> {
    parse_cards_direct(text)
        .or_else(|| parse_cards_fenced(text))
        .or_else(|| parse_cards_bracketed(text))
        .or_else(|| parse_cards_regex(text))
        .or_else(|| parse_cards_qa_lines(text))
        .unwrap_or_default()
}

fn parse_mindmap_value(value: serde_json::Value) -> Option<MindMapDoc> {
    let object = value.as_object()?;
    object.get("nodes")?;
    let doc: MindMapDoc = serde_json::from_value(value.clone()).ok()?;
    if doc.nodes.is_empty() { None } else { Some(doc) }
}

fn parse_mindmap_direct(text: &str) -> Option<MindMapDoc> {
    parse_mindmap_value(serde_json::from_str(text).ok()?)
}

/// Mind-map parsing chain: direct JSON, fenced JSON, then balanced-brace
/// extraction. Node ids are normalized afterwards by the merge step.
pub fn parse_mindmap(text: &str) -> Option<MindMapDoc> {
    parse_mindmap_direct(text)
        .or_else(|| parse_mindmap_direct(&strip_fences(text)))
        .or_else(|| {
            let cleaned = strip_fences(text);
            let candidate = extract_balanced(&cleaned, '{', '}')?;
            let candidate = TRAILING_COMMA_RE.replace_all(&candidate, "$1").to_string();
            parse_mindmap_direct(&candidate)
        })
}

/// Ensures every node carries a well-formed dotted id, defaulting missing
/// or blank ids to the positional numbering.
pub fn normalize_nodes(nodes: Vec<MindMapNode>, prefix: &str) -> Vec<MindMapNode> {
    nodes
        .into_iter()
        .enumerate()
        .map(|(i, node)| {
            let id = if node.id.trim().is_empty() {
                format!("{prefix}{}", i + 1)
            } else {
                node.id
            };
            let children = node
                .children
                .map(|children| normalize_nodes(children, &format!("{id}.")));
            MindMapNode {
                id,
                label: node.label,
                children,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direct_json_array() {
        let text = r#"[{"front": "What is RAG?", "back": "Retrieval augmented generation"}]"#;
        let cards = parse_flashcards(text);
        assert_eq!(cards.len(), 1);
        assert_eq!(cards[0].front, "What is RAG?");
    }

    #[test]
    fn test_fenced_json() {
        let text = "Here you go:\n```json\n[{\"front\": \"Q1?\", \"back\": \"A1\"}]\n```";
        let cards = parse_flashcards(text);
        assert_eq!(cards.len(), 1);
    }

    #[test]
    fn test_preamble_and_trailing_comma() {
        let text = r#"Sure! The flashcards are: [{"front": "Q?", "back": "A"},]"#;
        let cards = parse_flashcards(text);
        assert_eq!(cards.len(), 1);
        assert_eq!(cards[0].back, "A");
    }

    #[test]
    fn test_regex_fallback_handles_escapes() {
        let text = r#"noise {"front": "What is \"RAG\"?", "back": "a \\ technique"} noise"#;
        let cards = parse_flashcards(text);
        assert_eq!(cards.len(), 1);
        assert_eq!(cards[0].front, "What is \"RAG\"?");
        assert_eq!(cards[0].back, "a \\ technique");
    }

    #[test]
    fn test_qa_line_fallback() {
        let text = "Q: What color is the sky?\nA: Blue\nQ2: How many legs has a spider?\nA2: Eight";
        let cards = parse_flashcards(text);
        assert_eq!(cards.len(), 2);
        assert_eq!(cards[1].back, "Eight");
    }

    #[test]
    fn test_unparseable_text_yields_empty() {
        assert!(parse_flashcards("I could not generate flashcards, sorry.").is_empty());
    }

    #[test]
    fn test_flashcards_object_wrapper() {
        let text = r#"{"flashcards": [{"front": "Q?", "back": "A"}]}"#;
        assert_eq!(parse_flashcards(text).len(), 1);
    }

    #[test]
    fn test_mindmap_direct_and_fenced() {
        let json = r#"{"title": "Topic", "nodes": [{"id": "1", "label": "Main"}]}"#;
        assert!(parse_mindmap(json).is_some());
        let fenced = format!("```json\n{json}\n```");
        assert!(parse_mindmap(&fenced).is_some());
    }

    #[test]
    fn test_mindmap_with_preamble() {
        let text = r#"Here is your map: {"title": "T", "nodes": [{"id": "1", "label": "A"}]} enjoy!"#;
        let map = parse_mindmap(text).unwrap();
        assert_eq!(map.title, "T");
        assert_eq!(map.nodes.len(), 1);
    }

    #[test]
    fn test_mindmap_string_aware_brace_matching() {
        let text = r#"{"title": "Braces } in { strings", "nodes": [{"id": "1", "label": "ok"}]}"#;
        let map = parse_mindmap(text).unwrap();
        assert_eq!(map.title, "Braces } in { strings");
    }

    #[test]
    fn test_mindmap_without_nodes_is_rejected() {
        assert!(parse_mindmap(r#"{"title": "empty"}"#).is_none());
        assert!(parse_mindmap(r#"{"title": "empty", "nodes": []}"#).is_none());
    }

    #[test]
    fn test_nodes_without_ids_still_parse() {
        let text = r#"{"title": "T", "nodes": [{"label": "only a label"}]}"#;
        let map = parse_mindmap(text).unwrap();
        assert_eq!(map.nodes[0].label, "only a label");
        let fixed = normalize_nodes(map.nodes, "");
        assert_eq!(fixed[0].id, "1");
    }

    #[test]
    fn test_normalize_nodes_fills_missing_ids() {
        let nodes = vec![MindMapNode {
            id: String::new(),
            label: "root".to_string(),
            children: Some(vec![MindMapNode {
                id: String::new(),
                label: "child".to_string(),
                children: None,
            }]),
        }];
        let fixed = normalize_nodes(nodes, "");
        assert_eq!(fixed[0].id, "1");
        assert_eq!(fixed[0].children.as_ref().unwrap()[0].id, "1.1");
    }

    #[test]
    fn test_mindmap_render_parse_roundtrip() {
        let doc = MindMapDoc {
            title: "Round trip".to_string(),
            nodes: vec![MindMapNode {
                id: "1".to_string(),
                label: "A".to_string(),
                children: Some(vec![MindMapNode {
                    id: "1.1".to_string(),
                    label: "B".to_string(),
                    children: None,
                }]),
            }],
        };
        let rendered = serde_json::to_string(&doc).unwrap();
        let parsed = parse_mindmap(&rendered).unwrap();
        assert_eq!(parsed, doc);
    }
}
