use std::borrow::Cow;

use super::types::ClassifyRequest;

/// Bodies longer than this are cut before prompt construction. Long
/// newsletters blow past model context for no classification benefit.
pub(crate) const MAX_BODY_CHARS: usize = 8_000;

pub(crate) const TRUNCATION_MARKER: &str = "\n[message truncated]";

pub(crate) fn truncate_body(body: &str) -> Cow<'_, str> {
    if body.chars().count() <= MAX_BODY_CHARS {
        return Cow::Borrowed(body);
    }
    let cut: String = body.chars().take(MAX_BODY_CHARS).collect();
    Cow::Owned(format!("{cut}{TRUNCATION_MARKER}"))
}

/// Build the instruction prompt for one message.
///
/// The model must answer with a single JSON object; the exact shape is
/// enforced again at parse time in `response.rs`.
pub(crate) fn build_prompt(request: &ClassifyRequest) -> String {
    let mut sections = Vec::new();

    sections.push(
        "You are an email triage assistant. Analyze the email below and respond with \
         ONE JSON object only, no prose, matching exactly this shape:\n\
         {\n\
           \"messageScore\": <number 0-100, how intrinsically important this email is>,\n\
           \"keywordsFlagged\": [<strings found in the email that drove the score>],\n\
           \"replyMessage\": <string, a 1-3 sentence summary suitable to show the user>,\n\
           \"categories\": {\n\
             \"primary\": {\"subcategory\": [<one or more subcategory keys>]},\n\
             \"secondary\": [{\"subcategory\": [<subcategory keys>]}]\n\
           },\n\
           \"calendarEvent\": {\"summary\": <string>, \"start\": <ISO datetime>, \"end\": <ISO datetime>} (omit if none),\n\
           \"datelineDate\": <\"YYYY-MM-DD\" deadline mentioned in the email, omit if none>\n\
         }"
            .to_string(),
    );

    sections.push(
        "Subcategory keys use a top-level prefix: financial_ (invoice, receipt, statement, \
         payment_due), marketing_ (newsletter, promotion), security_ (alert, login, password), \
         deadline_ (due_date, renewal, expiry), work_ (meeting, project, request), \
         personal_ (family, friend, event), legal_ (contract, notice). Pick the closest keys; \
         primary is the dominant topic, secondary are auxiliary matches."
            .to_string(),
    );

    if !request.custom_categories.is_empty() {
        let mut block = String::from(
            "The user also monitors these custom categories; use the machine key verbatim \
             when one applies:\n",
        );
        for custom in &request.custom_categories {
            block.push_str(&format!(
                "- {} ({}): {}\n",
                custom.category, custom.label, custom.description
            ));
        }
        sections.push(block);
    }

    if !request.watch_tags.is_empty() {
        sections.push(format!(
            "The user explicitly watches: {}. Matching content raises messageScore.",
            request.watch_tags.join(", ")
        ));
    }
    if !request.ignore_tags.is_empty() {
        sections.push(format!(
            "The user explicitly ignores: {}. Matching content lowers messageScore.",
            request.ignore_tags.join(", ")
        ));
    }

    let body = truncate_body(&request.body);
    sections.push(format!(
        "From: {}\nSubject: {}\n\n{}",
        request.sender, request.subject, body
    ));

    sections.join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_body_untouched() {
        let body = "short body";
        assert_eq!(truncate_body(body), body);
    }

    #[test]
    fn long_body_gets_marker() {
        let body = "x".repeat(MAX_BODY_CHARS + 50);
        let truncated = truncate_body(&body);
        assert!(truncated.ends_with(TRUNCATION_MARKER));
        assert!(truncated.chars().count() < body.chars().count());
    }

    #[test]
    fn prompt_includes_custom_categories_and_message() {
        let request = ClassifyRequest {
            sender: "billing@acme.test".to_string(),
            subject: "Invoice #42".to_string(),
            body: "Please pay by Friday.".to_string(),
            watch_tags: vec!["acme".to_string()],
            ignore_tags: Vec::new(),
            custom_categories: vec![super::super::types::CustomCategorySpec {
                category: "custom_homelab".to_string(),
                label: "Homelab".to_string(),
                description: "Alerts from my home servers".to_string(),
            }],
        };
        let prompt = build_prompt(&request);
        assert!(prompt.contains("custom_homelab"));
        assert!(prompt.contains("Invoice #42"));
        assert!(prompt.contains("acme"));
        assert!(prompt.contains("messageScore"));
    }
}
