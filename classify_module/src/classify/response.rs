use tracing::debug;

use super::errors::ClassifyError;
use super::types::Analysis;

/// Parse the model's reply against the strict contract.
///
/// Models occasionally wrap JSON in Markdown fences or stop mid-object when
/// they hit an output limit; both are repaired before parsing. Anything that
/// still fails after repair is a hard contract violation.
pub(crate) fn parse_analysis(raw: &str) -> Result<Analysis, ClassifyError> {
    let candidate = extract_json(raw);

    match serde_json::from_str::<Analysis>(candidate) {
        Ok(analysis) => Ok(analysis),
        Err(first_err) => {
            let repaired = repair_json(candidate);
            debug!("classifier JSON needed repair: {}", first_err);
            serde_json::from_str::<Analysis>(&repaired)
                .map_err(|err| ClassifyError::Contract(err.to_string()))
        }
    }
}

/// Strip Markdown fences and any prose before the first `{`.
fn extract_json(raw: &str) -> &str {
    let trimmed = raw.trim();
    let without_fence = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .map(|rest| rest.trim_start())
        .unwrap_or(trimmed);
    let without_fence = without_fence
        .strip_suffix("```")
        .map(str::trim_end)
        .unwrap_or(without_fence);

    match without_fence.find('{') {
        Some(start) => &without_fence[start..],
        None => without_fence,
    }
}

/// Balance unterminated strings, brackets, and braces.
///
/// Walks the text tracking string state; at the end, closes an open string
/// and unwinds the bracket stack in reverse order. A trailing comma left
/// before a synthesized closer is dropped so the result stays parseable.
fn repair_json(input: &str) -> String {
    let mut stack: Vec<char> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for ch in input.chars() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => stack.push('}'),
            '[' => stack.push(']'),
            '}' | ']' => {
                if stack.last() == Some(&ch) {
                    stack.pop();
                }
            }
            _ => {}
        }
    }

    let mut repaired = input.trim_end().to_string();
    if in_string {
        // A dangling escape would swallow the closing quote.
        if escaped {
            repaired.pop();
        }
        repaired.push('"');
    }
    while repaired.ends_with(',') {
        repaired.pop();
    }
    while let Some(closer) = stack.pop() {
        repaired.push(closer);
    }
    repaired
}

#[cfg(test)]
mod tests {
    use super::*;

    const COMPLETE: &str = r#"{
        "messageScore": 80,
        "keywordsFlagged": ["invoice"],
        "replyMessage": "Acme sent invoice #42, due Friday.",
        "categories": {
            "primary": {"subcategory": ["financial_invoice"]},
            "secondary": [{"subcategory": ["deadline_due_date"]}]
        },
        "datelineDate": "2026-03-10"
    }"#;

    #[test]
    fn parses_complete_response() {
        let analysis = parse_analysis(COMPLETE).unwrap();
        assert_eq!(analysis.message_score, 80);
        assert_eq!(
            analysis.categories.primary.subcategory,
            vec!["financial_invoice"]
        );
        assert_eq!(analysis.dateline_date.as_deref(), Some("2026-03-10"));
    }

    #[test]
    fn strips_markdown_fences() {
        let fenced = format!("```json\n{COMPLETE}\n```");
        assert!(parse_analysis(&fenced).is_ok());
    }

    #[test]
    fn strips_leading_prose() {
        let noisy = format!("Here is the analysis you asked for:\n{COMPLETE}");
        assert!(parse_analysis(&noisy).is_ok());
    }

    #[test]
    fn repairs_truncated_object() {
        let truncated = r#"{
            "messageScore": 55,
            "keywordsFlagged": [],
            "replyMessage": "A newsletter digest",
            "categories": {"primary": {"subcategory": ["marketing_newsletter"]},
            "secondary": ["#;
        let analysis = parse_analysis(truncated).unwrap();
        assert_eq!(analysis.message_score, 55);
        assert!(analysis.categories.secondary.is_empty());
    }

    #[test]
    fn repairs_unterminated_string() {
        let truncated = r#"{"messageScore": 10, "replyMessage": "cut mid-sent"#;
        let repaired = repair_json(truncated);
        let value: serde_json::Value = serde_json::from_str(&repaired).unwrap();
        assert_eq!(value["messageScore"], 10);
    }

    #[test]
    fn unrepairable_is_contract_error() {
        let err = parse_analysis("not json at all").unwrap_err();
        assert!(matches!(err, ClassifyError::Contract(_)));
    }
}
