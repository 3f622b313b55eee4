//! Scanner for the bracketed diary template.
//!
//! A qualifying reply contains, in order, `［日记标题：…］`, `［日记时间：…］`
//! and `［日记内容：…］` with full-width brackets and colons.  Arbitrary text
//! may surround and separate the three markers; each captured value runs to
//! the first closing bracket after its marker.  Only the first complete
//! match in a text is considered.

use serde::{Deserialize, Serialize};

const TITLE_MARKER: &str = "［日记标题：";
const TIME_MARKER: &str = "［日记时间：";
const BODY_MARKER: &str = "［日记内容：";
const CLOSE: char = '］';

/// Longest title the store accepts, in characters.
pub const TITLE_MAX_CHARS: usize = 100;
/// Longest body the store accepts, in characters.
pub const BODY_MAX_CHARS: usize = 5000;

/// Tokens that mark a capture as unfilled template residue rather than a
/// diary the AI actually wrote.  Checked against the space-joined,
/// lowercased fields; no token contains a space, so a token cannot form
/// across a field boundary.
const PLACEHOLDER_TOKENS: &[&str] = &[
    "{{", "}}", "标题", "时间", "内容", "title", "time", "content", "xxx", "xxxx",
];

/// Fields captured from one diary template, before persistence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiaryFields {
    pub title: String,
    pub timestamp: String,
    pub body: String,
}

/// Scan `text` for the first complete diary template.
///
/// Returns `None` when no template is present, when any captured field is
/// empty after trimming, or when the captures are placeholder residue (the
/// AI echoed the skeleton instead of filling it in).
pub fn extract(text: &str) -> Option<DiaryFields> {
    let (title, rest) = capture(text, TITLE_MARKER)?;
    let (timestamp, rest) = capture(rest, TIME_MARKER)?;
    let (body, _) = capture(rest, BODY_MARKER)?;

    let title = title.trim();
    let timestamp = timestamp.trim();
    let body = body.trim();
    if title.is_empty() || timestamp.is_empty() || body.is_empty() {
        return None;
    }
    if is_template_residue(title, timestamp, body) {
        return None;
    }

    Some(DiaryFields {
        title: title.to_string(),
        timestamp: timestamp.to_string(),
        body: body.to_string(),
    })
}

/// Value between `marker` and the next closing bracket, plus the remainder
/// of the text after that bracket.
fn capture<'a>(text: &'a str, marker: &str) -> Option<(&'a str, &'a str)> {
    let start = text.find(marker)? + marker.len();
    let after = &text[start..];
    let end = after.find(CLOSE)?;
    Some((&after[..end], &after[end + CLOSE.len_utf8()..]))
}

/// True when any field still carries an unfilled placeholder token.
///
/// Also applied when reconstructing stored records, so a template that
/// slipped past an older build does not resurface in listings.
pub fn is_template_residue(title: &str, timestamp: &str, body: &str) -> bool {
    let joined = format!("{title} {timestamp} {body}").to_lowercase();
    PLACEHOLDER_TOKENS.iter().any(|token| joined.contains(token))
}

/// The template skeleton, one marker per segment, joined with `line_break`.
///
/// Sent to the AI inside the diary prompt and shown to the user when a
/// manual record finds no template.
pub fn template_skeleton(line_break: &str) -> String {
    [
        "［日记标题：{{标题}}］",
        "［日记时间：{{时间}}］",
        "［日记内容：{{内容}}］",
    ]
    .join(line_break)
}

/// Constraint violations that keep a set of fields out of the store.
/// An empty result means the fields are persistable.
pub fn field_issues(title: &str, timestamp: &str, body: &str) -> Vec<String> {
    let mut issues = Vec::new();
    if title.trim().is_empty() {
        issues.push("日记标题不能为空".to_string());
    } else if title.chars().count() > TITLE_MAX_CHARS {
        issues.push(format!("日记标题过长（最多{TITLE_MAX_CHARS}字符）"));
    }
    if timestamp.trim().is_empty() {
        issues.push("日记时间不能为空".to_string());
    }
    if body.trim().is_empty() {
        issues.push("日记内容不能为空".to_string());
    } else if body.chars().count() > BODY_MAX_CHARS {
        issues.push(format!("日记内容过长（最多{BODY_MAX_CHARS}字符）"));
    }
    issues
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_fields_with_surrounding_text() {
        let text = "prefix ［日记标题：海边的一天］［日记时间：2024年5月1日］［日记内容：今天很开心］ suffix";
        let fields = extract(text).unwrap();
        assert_eq!(fields.title, "海边的一天");
        assert_eq!(fields.timestamp, "2024年5月1日");
        assert_eq!(fields.body, "今天很开心");
    }

    #[test]
    fn extraction_is_idempotent() {
        let text = "［日记标题：雨夜］［日记时间：2024-06-02］［日记内容：听着雨声入睡。］";
        assert_eq!(extract(text), extract(text));
    }

    #[test]
    fn rejects_unfilled_skeleton() {
        let text = "［日记标题：{{标题}}］［日记时间：{{时间}}］［日记内容：{{内容}}］";
        assert_eq!(extract(text), None);
    }

    #[test]
    fn rejects_ascii_decoy_tokens() {
        let text = "［日记标题：xxx］［日记时间：2024-01-01］［日记内容：正文在这里］";
        assert_eq!(extract(text), None);
        let text = "［日记标题：My Title］［日记时间：2024-01-01］［日记内容：正文在这里］";
        assert_eq!(extract(text), None);
    }

    #[test]
    fn token_straddling_two_fields_is_not_residue() {
        // 凌晨一时 next to 间或… must not read as the 时间 token.
        let text = "［日记标题：夜行］［日记时间：凌晨一时］［日记内容：间或传来犬吠。］";
        let fields = extract(text).unwrap();
        assert_eq!(fields.timestamp, "凌晨一时");
        assert_eq!(fields.body, "间或传来犬吠。");
    }

    #[test]
    fn first_match_wins() {
        let text = "［日记标题：第一篇］［日记时间：2024年1月1日］［日记内容：早晨的雾很大。］\
                    ［日记标题：第二篇］［日记时间：2024年1月2日］［日记内容：晚上下了雪。］";
        let fields = extract(text).unwrap();
        assert_eq!(fields.title, "第一篇");
        assert_eq!(fields.body, "早晨的雾很大。");
    }

    #[test]
    fn body_may_span_newlines() {
        let text = "［日记标题：远行］［日记时间：2024年3月9日］［日记内容：清晨出发。\n午后到站。\n夜里写下这些。］";
        let fields = extract(text).unwrap();
        assert_eq!(fields.body, "清晨出发。\n午后到站。\n夜里写下这些。");
    }

    #[test]
    fn missing_any_marker_fails() {
        assert_eq!(extract("没有任何标记的普通回复"), None);
        assert_eq!(extract("［日记标题：孤独的标记］"), None);
        assert_eq!(
            extract("［日记标题：有头无尾］［日记时间：2024年2月2日］"),
            None
        );
    }

    #[test]
    fn markers_out_of_order_fail() {
        let text = "［日记时间：2024年4月4日］［日记标题：顺序反了］［日记内容：不应当匹配］";
        assert_eq!(extract(text), None);
    }

    #[test]
    fn whitespace_only_field_fails() {
        let text = "［日记标题：　　］［日记时间：2024年5月5日］［日记内容：正文不重要了］";
        assert_eq!(extract(text), None);
    }

    #[test]
    fn captured_values_are_trimmed() {
        let text = "［日记标题： 晚风 ］［日记时间： 2024年7月7日 ］［日记内容： 风从海上来。 ］";
        let fields = extract(text).unwrap();
        assert_eq!(fields.title, "晚风");
        assert_eq!(fields.timestamp, "2024年7月7日");
        assert_eq!(fields.body, "风从海上来。");
    }

    #[test]
    fn skeleton_renders_with_separator() {
        let multi_line = template_skeleton("\n");
        assert_eq!(multi_line.lines().count(), 3);
        assert!(multi_line.starts_with("［日记标题：{{标题}}］"));
        let single_line = template_skeleton(" ");
        assert!(!single_line.contains('\n'));
    }

    #[test]
    fn skeleton_is_rejected_by_extract() {
        // The prompt we send must never itself qualify as a diary.
        assert_eq!(extract(&template_skeleton("\n")), None);
    }

    // ── field_issues ───────────────────────────────────────────────────────

    #[test]
    fn issues_empty_for_valid_fields() {
        assert!(field_issues("远行", "2024年3月9日", "清晨出发。").is_empty());
    }

    #[test]
    fn issues_flag_empty_fields() {
        let issues = field_issues("", " ", "");
        assert_eq!(issues.len(), 3);
        assert!(issues[0].contains("标题"));
    }

    #[test]
    fn issues_measure_length_in_chars() {
        let title_at_limit: String = "标".repeat(TITLE_MAX_CHARS);
        assert!(field_issues(&title_at_limit, "t", "b").is_empty());
        let title_over: String = "标".repeat(TITLE_MAX_CHARS + 1);
        assert_eq!(field_issues(&title_over, "t", "b").len(), 1);
        let body_over: String = "文".repeat(BODY_MAX_CHARS + 1);
        assert_eq!(field_issues("题", "t", &body_over).len(), 1);
    }

    #[test]
    fn fields_serde_round_trip() {
        let fields = DiaryFields {
            title: "远行".to_string(),
            timestamp: "2024年3月9日".to_string(),
            body: "清晨出发。".to_string(),
        };
        let json = serde_json::to_string(&fields).unwrap();
        let back: DiaryFields = serde_json::from_str(&json).unwrap();
        assert_eq!(back, fields);
    }
}
