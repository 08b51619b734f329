//! Structural precondition checks applied before a transition is attempted.
//! Ownership and enum-membership checks live at the API boundary (gateway);
//! these are the checks the engine itself must still make because the
//! argument types (`u8`, `String`, `Vec<String>`) don't encode the bound.

use m3d_types::error::PipelineError;

pub const MAX_USER_DESCRIPTION_LEN: usize = 300;
pub const MIN_COLOR_COUNT: u8 = 3;
pub const MAX_COLOR_COUNT: u8 = 12;
pub const MAX_INPUT_IMAGES: usize = 4;

pub fn validate_input_images(images: &[String]) -> Result<(), PipelineError> {
    if images.is_empty() {
        return Err(PipelineError::InvalidArgument(
            "at least one input image is required".to_string(),
        ));
    }
    if images.len() > MAX_INPUT_IMAGES {
        return Err(PipelineError::InvalidArgument(format!(
            "at most {MAX_INPUT_IMAGES} input images are allowed, got {}",
            images.len()
        )));
    }
    Ok(())
}

pub fn validate_color_count(color_count: u8) -> Result<(), PipelineError> {
    if !(MIN_COLOR_COUNT..=MAX_COLOR_COUNT).contains(&color_count) {
        return Err(PipelineError::InvalidArgument(format!(
            "colorCount must be between {MIN_COLOR_COUNT} and {MAX_COLOR_COUNT}, got {color_count}"
        )));
    }
    Ok(())
}

pub fn validate_user_description(description: &str) -> Result<(), PipelineError> {
    if description.chars().count() > MAX_USER_DESCRIPTION_LEN {
        return Err(PipelineError::InvalidArgument(format!(
            "description must be at most {MAX_USER_DESCRIPTION_LEN} characters"
        )));
    }
    Ok(())
}
