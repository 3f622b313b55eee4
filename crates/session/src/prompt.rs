//! User-facing text built around the diary template.

use diarist_config::DeviceProfile;
use diarist_extract::template_skeleton;

/// Prompt asking the AI to write one diary in the bracketed template.
///
/// The `{{char}}` macro is left for the host to expand; it is replaced by
/// a literal name only when the user picked a character other than the
/// chat's ambient one.
pub fn diary_prompt(custom_character: Option<&str>, ambient_character: Option<&str>) -> String {
    let skeleton = template_skeleton("\n");
    match custom_character {
        Some(name) if ambient_character != Some(name) => {
            format!("以{name}的口吻写一则日记，日记格式为：\n{skeleton}")
        }
        _ => format!("以{{{{char}}}}的口吻写一则日记，日记格式为：\n{skeleton}"),
    }
}

/// Notice body shown when a manual record finds no usable template.
///
/// The skeleton is joined with [`line_break`], since the mobile host
/// renders notices as HTML.
pub fn expected_format_guidance(profile: DeviceProfile) -> String {
    let separator = line_break(profile);
    let skeleton = template_skeleton(separator);
    format!("未找到有效的日记格式，日记格式为：{separator}{skeleton}")
}

/// Line separator the host's notice surface understands.
pub fn line_break(profile: DeviceProfile) -> &'static str {
    match profile {
        DeviceProfile::Desktop => "\n",
        DeviceProfile::Mobile => "<br>",
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_keeps_the_char_macro_by_default() {
        let prompt = diary_prompt(None, Some("旅人"));
        assert!(prompt.starts_with("以{{char}}的口吻写一则日记，日记格式为：\n"));
        assert!(prompt.contains("［日记标题：{{标题}}］\n［日记时间：{{时间}}］\n［日记内容：{{内容}}］"));
    }

    #[test]
    fn custom_character_replaces_the_macro() {
        let prompt = diary_prompt(Some("小雨"), Some("旅人"));
        assert!(prompt.starts_with("以小雨的口吻写一则日记，日记格式为：\n"));
        assert!(!prompt.contains("{{char}}"));
    }

    #[test]
    fn matching_custom_name_keeps_the_macro() {
        let prompt = diary_prompt(Some("旅人"), Some("旅人"));
        assert!(prompt.starts_with("以{{char}}的口吻写一则日记，日记格式为："));
    }

    #[test]
    fn guidance_uses_device_line_breaks() {
        let desktop = expected_format_guidance(DeviceProfile::Desktop);
        assert!(desktop.contains("未找到有效的日记格式"));
        assert!(desktop.contains("\n［日记标题：{{标题}}］\n"));
        assert!(!desktop.contains("<br>"));

        let mobile = expected_format_guidance(DeviceProfile::Mobile);
        assert!(mobile.contains("<br>［日记标题：{{标题}}］<br>"));
        assert!(!mobile.contains('\n'));
    }
}
