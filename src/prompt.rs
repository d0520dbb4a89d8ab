//! Prompt segmentation
//!
//! Splits a multi-panel prompt into ordered panel descriptions. Lines of the
//! form `<n>. <description>` are recognized; the number decides the position,
//! so input may be out of order. Everything else is ignored.

use std::collections::BTreeMap;

/// Appended to every panel description sent to an image provider.
pub const STYLE_SUFFIX: &str =
    "Style: Cinematic, photorealistic, consistent visual style with the reference image.";

/// Parse numbered panel lines into descriptions ordered by panel number.
///
/// Gaps in the numbering are closed up and a repeated number keeps the last
/// description seen. Never fails; unmatched input yields an empty list.
pub fn parse_panel_descriptions(prompt: &str) -> Vec<String> {
    let mut numbered: BTreeMap<u64, String> = BTreeMap::new();
    for line in prompt.lines() {
        if let Some((number, description)) = parse_numbered_line(line.trim()) {
            numbered.insert(number, description.to_string());
        }
    }
    numbered.into_values().collect()
}

fn parse_numbered_line(line: &str) -> Option<(u64, &str)> {
    let digits_end = line.find(|c: char| !c.is_ascii_digit())?;
    if digits_end == 0 {
        return None;
    }
    let number: u64 = line[..digits_end].parse().ok()?;
    if number == 0 {
        return None;
    }
    let rest = line[digits_end..].strip_prefix('.')?;
    // At least one whitespace character separates the number from the text.
    if !rest.starts_with(char::is_whitespace) {
        return None;
    }
    let description = rest.trim_start();
    if description.is_empty() {
        return None;
    }
    Some((number, description))
}

/// Synthesized description for a panel the prompt did not describe.
pub fn default_description(panel_number: usize) -> String {
    format!("Panel {} of the storyboard", panel_number)
}

/// Parsed descriptions, or `default_count` synthesized ones when the prompt
/// contains no numbered lines.
pub fn segment_or_default(prompt: &str, default_count: usize) -> Vec<String> {
    let parsed = parse_panel_descriptions(prompt);
    if parsed.is_empty() {
        (1..=default_count).map(default_description).collect()
    } else {
        parsed
    }
}

/// Provider-facing prompt for one panel.
pub fn styled_prompt(description: &str) -> String {
    format!("{}\n\n{}", description, STYLE_SUFFIX)
}
