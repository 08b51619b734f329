//! Prompt model (§4.3): a fixed template per angle composed of a role
//! directive, the angle description, the optional user description, the
//! anchoring palette, the style descriptor, and an optional regeneration
//! hint.

use m3d_types::pipeline::{Angle, Style};

fn style_descriptor(style: Style) -> &'static str {
    match style {
        Style::None => "no stylization; render the object as photographed",
        Style::Bobblehead => "bobblehead caricature with an oversized head",
        Style::Chibi => "chibi proportions, large head, short limbs",
        Style::Cartoon => "flat-shaded cartoon illustration style",
        Style::Emoji => "rounded emoji-like simplified form",
    }
}

fn angle_description(angle: Angle) -> &'static str {
    match angle {
        Angle::Front => "facing the camera directly, front-on view",
        Angle::Back => "facing away from the camera, rear view",
        Angle::Left => "profile view from the subject's left side",
        Angle::Right => "profile view from the subject's right side",
    }
}

/// Builds the full prompt text for one angle.
pub fn build_angle_prompt(
    angle: Angle,
    user_description: Option<&str>,
    palette: Option<&[String]>,
    style: Style,
    hint: Option<&str>,
) -> String {
    let mut sections = vec![
        "You are generating a single consistent multi-angle reference view of the \
         object shown in the attached image. Keep identity, proportions, and \
         materials identical across all requested angles."
            .to_string(),
        format!("Angle: {}", angle_description(angle)),
    ];

    if let Some(desc) = user_description {
        if !desc.is_empty() {
            sections.push(format!("User description: {desc}"));
        }
    }

    if let Some(colors) = palette {
        if !colors.is_empty() {
            sections.push(format!(
                "Use exactly this color palette, verbatim, to anchor colors across \
                 angles: {}",
                colors.join(", ")
            ));
        }
    }

    sections.push(format!("Style: {}", style_descriptor(style)));

    if let Some(hint) = hint {
        if !hint.is_empty() {
            sections.push(format!("Regeneration hint: {hint}"));
        }
    }

    sections.push(
        "Background must be plain and uniform; do not introduce props or \
         additional objects."
            .to_string(),
    );

    sections.join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_includes_all_present_sections_in_order() {
        let prompt = build_angle_prompt(
            Angle::Front,
            Some("a red toy car"),
            Some(&["#FF0000".to_string()]),
            Style::Chibi,
            Some("bigger wheels"),
        );
        let idx_desc = prompt.find("a red toy car").unwrap();
        let idx_palette = prompt.find("#FF0000").unwrap();
        let idx_style = prompt.find("chibi").unwrap();
        let idx_hint = prompt.find("bigger wheels").unwrap();
        assert!(idx_desc < idx_palette);
        assert!(idx_palette < idx_style);
        assert!(idx_style < idx_hint);
    }

    #[test]
    fn prompt_omits_absent_optional_sections() {
        let prompt = build_angle_prompt(Angle::Back, None, None, Style::None, None);
        assert!(!prompt.contains("User description"));
        assert!(!prompt.contains("Regeneration hint"));
        assert!(!prompt.contains("color palette"));
    }
}
